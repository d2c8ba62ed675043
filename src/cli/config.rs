use crate::config::generate::generate_starter_config;
use std::fs;
use std::path::PathBuf;

pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_content = generate_starter_config();

    if stdout {
        print!("{}", config_content);
        return Ok(());
    }

    let config_path = default_config_path();

    if config_path.exists() {
        return Err(format!(
            "config file already exists at {}; remove it first or use --stdout to print the config",
            config_path.display()
        )
        .into());
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&config_path, config_content)?;

    println!("Config file written to {}", config_path.display());
    Ok(())
}

/// ~/.config/dockwatch/config.yml, or /etc/dockwatch/config.yml when the
/// user directory cannot be created
fn default_config_path() -> PathBuf {
    if let Some(home_dir) = dirs::home_dir() {
        let user_config = home_dir.join(".config/dockwatch/config.yml");
        if let Some(parent) = user_config.parent() {
            match fs::create_dir_all(parent) {
                Ok(_) => return user_config,
                Err(_) => {
                    eprintln!("Warning: Could not create directory {}", parent.display());
                    eprintln!("Falling back to /etc/dockwatch/config.yml");
                }
            }
        }
    }

    PathBuf::from("/etc/dockwatch/config.yml")
}
