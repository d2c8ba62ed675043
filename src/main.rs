use clap::{Parser, Subcommand};
use dockwatch::cli::run::RunArgs;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "dockwatch")]
#[command(about = "Run a Docker container and send its output to AWS CloudWatch Logs", long_about = None)]
struct Cli {
    /// Tuning file for batching, retries and container handling
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the container and ship its output
    Run(RunArgs),
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a starter tuning file
    Init {
        #[arg(long)]
        stdout: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dockwatch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            dockwatch::cli::run::run(args, cli.config.as_deref()).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Init { stdout } => {
                dockwatch::cli::config::init(stdout)?;
            }
        },
    }

    Ok(())
}
