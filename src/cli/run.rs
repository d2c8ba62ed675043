use crate::config::parse::load_config;
use crate::config::types::{AwsSettings, Config, ContainerSpec};
use crate::config::{resolve_config_path, ConfigError};
use crate::pipeline::{drain, LogShipper, ShipError, ShipReport};
use crate::sink::{CloudWatchSink, SinkError, StreamId};
use crate::source::docker::{ContainerError, ContainerRunner};
use clap::Args;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("container error: {0}")]
    Container(#[from] ContainerError),

    #[error("log destination setup failed: {0}")]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Ship(#[from] ShipError),
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Name of the Docker image
    #[arg(long)]
    pub docker_image: String,

    /// Bash command to run inside the Docker container
    #[arg(long)]
    pub bash_command: String,

    /// Name of the AWS CloudWatch log group
    #[arg(long)]
    pub aws_cloudwatch_group: String,

    /// Name of the AWS CloudWatch log stream
    #[arg(long)]
    pub aws_cloudwatch_stream: String,

    /// AWS access key ID
    #[arg(long, env = "AWS_ACCESS_KEY_ID")]
    pub aws_access_key_id: Option<String>,

    /// AWS secret access key
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub aws_secret_access_key: Option<String>,

    /// AWS region
    #[arg(long, env = "AWS_REGION")]
    pub aws_region: String,

    /// Override the CloudWatch Logs endpoint (takes precedence over the config file)
    #[arg(long)]
    pub aws_endpoint_url: Option<String>,

    /// Leave the container in place after it exits
    #[arg(long)]
    pub keep_container: bool,
}

/// Everything one run needs, resolved from arguments and the tuning file
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub container: ContainerSpec,
    pub destination: StreamId,
    pub aws: AwsSettings,
    pub tuning: Config,
}

impl RunArgs {
    pub fn into_settings(self, mut tuning: Config) -> RunSettings {
        if self.keep_container {
            tuning.container.remove_on_exit = false;
        }

        let endpoint_url = self.aws_endpoint_url.or_else(|| tuning.aws.endpoint_url.clone());

        RunSettings {
            container: ContainerSpec {
                image: self.docker_image,
                command: self.bash_command,
            },
            destination: StreamId::new(self.aws_cloudwatch_group, self.aws_cloudwatch_stream),
            aws: AwsSettings {
                region: self.aws_region,
                access_key_id: self.aws_access_key_id,
                secret_access_key: self.aws_secret_access_key,
                endpoint_url,
            },
            tuning,
        }
    }
}

/// Load the tuning file if one is found, defaults otherwise
pub fn load_tuning(config_path: Option<&Path>) -> Result<Config, ConfigError> {
    match resolve_config_path(config_path) {
        Some(path) => {
            info!(config_path = %path.display(), "Loading configuration");
            load_config(&path)
        }
        None => {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }
}

pub async fn run(args: RunArgs, config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let tuning = load_tuning(config_path)?;
    let settings = args.into_settings(tuning);

    run_container(settings).await?;
    Ok(())
}

async fn run_container(settings: RunSettings) -> Result<ShipReport, RunError> {
    let RunSettings {
        container,
        destination,
        aws,
        tuning,
    } = settings;

    let sink = CloudWatchSink::connect(&aws).await;
    if tuning.aws.create_log_group {
        sink.ensure_log_group(&destination.group).await?;
    }
    if tuning.aws.create_log_stream {
        sink.ensure_log_stream(&destination).await?;
    }

    let runner = ContainerRunner::connect(tuning.container.docker_socket.as_deref())?;
    let container_id = runner.start(&container).await?;

    let cancel = CancellationToken::new();
    let signal_handle = tokio::spawn(wait_for_shutdown(cancel.clone()));
    let killer_handle = tokio::spawn(kill_on_cancel(
        runner.clone(),
        container_id.clone(),
        cancel.clone(),
    ));

    let mut lines = Box::pin(runner.output_lines(&container_id, tuning.container.max_line_bytes));
    let shipper = LogShipper::new(Arc::new(sink), tuning.shipper.clone());

    let outcome = match shipper.ship(&destination, &mut lines, cancel.clone()).await {
        Ok(report) => Ok(report),
        Err(mut e) => {
            // Keep consuming output so the container is not held up, but count
            // what can no longer be shipped
            warn!("Shipping stopped, discarding remaining container output");
            let discarded = drain(&mut lines, &cancel).await;
            let ShipError::Permanent { report, .. } = &mut e;
            report.lines_dropped += discarded;
            error!(
                stream = %destination,
                dropped = report.lines_dropped,
                "Lines dropped after permanent failure"
            );
            Err(e)
        }
    };
    drop(lines);

    match runner.wait(&container_id).await {
        Ok(code) => info!(container_id = %container_id, exit_code = code, "Container exited"),
        Err(e) => warn!(container_id = %container_id, error = %e, "Could not read container exit status"),
    }

    signal_handle.abort();
    killer_handle.abort();

    if tuning.container.remove_on_exit {
        if let Err(e) = runner.remove(&container_id).await {
            warn!(container_id = %container_id, error = %e, "Failed to remove container");
        }
    }

    Ok(outcome?)
}

async fn wait_for_shutdown(cancel: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Could not install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = signal::ctrl_c() => info!("Shutdown signal received"),
        _ = terminate => info!("Terminate signal received"),
    }

    cancel.cancel();
}

async fn kill_on_cancel(runner: ContainerRunner, container_id: String, cancel: CancellationToken) {
    cancel.cancelled().await;
    if let Err(e) = runner.kill(&container_id).await {
        warn!(container_id = %container_id, error = %e, "Failed to kill container");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        run: RunArgs,
    }

    fn parse(extra: &[&str]) -> RunArgs {
        let mut argv = vec![
            "dockwatch",
            "--docker-image",
            "python",
            "--bash-command",
            "echo hi",
            "--aws-cloudwatch-group",
            "group",
            "--aws-cloudwatch-stream",
            "stream",
            "--aws-region",
            "eu-west-1",
        ];
        argv.extend_from_slice(extra);
        TestCli::parse_from(argv).run
    }

    #[test]
    fn test_args_map_to_settings() {
        let settings = parse(&[
            "--aws-access-key-id",
            "AKIA",
            "--aws-secret-access-key",
            "secret",
        ])
        .into_settings(Config::default());

        assert_eq!(settings.container.image, "python");
        assert_eq!(settings.container.command, "echo hi");
        assert_eq!(settings.destination, StreamId::new("group", "stream"));
        assert_eq!(settings.aws.region, "eu-west-1");
        assert_eq!(settings.aws.access_key_id.as_deref(), Some("AKIA"));
        assert!(settings.tuning.container.remove_on_exit);
    }

    #[test]
    fn test_keep_container_overrides_tuning() {
        let settings = parse(&["--keep-container"]).into_settings(Config::default());
        assert!(!settings.tuning.container.remove_on_exit);
    }

    #[test]
    fn test_endpoint_flag_overrides_file() {
        let mut tuning = Config::default();
        tuning.aws.endpoint_url = Some("http://from-file:4566".to_string());

        let from_file = parse(&[]).into_settings(tuning.clone());
        assert_eq!(from_file.aws.endpoint_url.as_deref(), Some("http://from-file:4566"));

        let from_flag = parse(&["--aws-endpoint-url", "http://flag:4566"]).into_settings(tuning);
        assert_eq!(from_flag.aws.endpoint_url.as_deref(), Some("http://flag:4566"));
    }

    #[test]
    fn test_secret_not_in_debug_output() {
        let settings = parse(&["--aws-secret-access-key", "hunter2"]).into_settings(Config::default());
        assert!(!format!("{:?}", settings.aws).contains("hunter2"));
    }
}
