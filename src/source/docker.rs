use crate::config::types::ContainerSpec;
use crate::source::lines::split_lines;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::Docker;
use futures::stream::{Stream, StreamExt};
use futures::future;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("docker connection failed: {0}")]
    Connect(#[source] bollard::errors::Error),

    #[error("docker API error: {0}")]
    Api(#[from] bollard::errors::Error),

    #[error("container {0} ended without reporting an exit status")]
    NoExitStatus(String),
}

/// The shell line run inside the container
pub fn container_command(command: &str) -> Vec<String> {
    vec!["/bin/bash".to_string(), "-c".to_string(), command.to_string()]
}

/// Runs one-off containers through the Docker Engine API.
#[derive(Debug, Clone)]
pub struct ContainerRunner {
    docker: Docker,
}

impl ContainerRunner {
    /// Connect through `socket` when given, otherwise through the local defaults
    pub fn connect(socket: Option<&Path>) -> Result<Self, ContainerError> {
        let docker = match socket {
            Some(path) => Docker::connect_with_unix(
                &path.to_string_lossy(),
                120,
                bollard::API_DEFAULT_VERSION,
            ),
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(ContainerError::Connect)?;

        Ok(Self { docker })
    }

    /// Create and start a container, returning its ID
    pub async fn start(&self, spec: &ContainerSpec) -> Result<String, ContainerError> {
        let cmd = container_command(&spec.command);
        info!(image = %spec.image, command = ?cmd, "Running container");

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(cmd),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await?;
        for warning in &created.warnings {
            warn!(container_id = %created.id, warning = %warning, "Docker warning");
        }

        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await?;
        info!(container_id = %created.id, "Container started");

        Ok(created.id)
    }

    /// Combined stdout/stderr of the container as a lazy line stream.
    ///
    /// The stream follows the container and ends when it exits. A log stream
    /// error also ends it.
    pub fn output_lines(&self, id: &str, max_line_bytes: usize) -> impl Stream<Item = Vec<u8>> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        let container_id = id.to_string();
        let chunks = self
            .docker
            .logs(id, Some(options))
            .scan((), move |_, item| {
                future::ready(match item {
                    Ok(output) => Some(output_bytes(output)),
                    Err(e) => {
                        warn!(container_id = %container_id, error = %e, "Log stream error");
                        None
                    }
                })
            });

        split_lines(Box::pin(chunks), max_line_bytes)
    }

    /// Wait for the container to exit and return its exit code
    pub async fn wait(&self, id: &str) -> Result<i64, ContainerError> {
        let mut responses = self
            .docker
            .wait_container(id, None::<WaitContainerOptions<String>>);

        match responses.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // A non-zero exit is reported as an error by the API client
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e.into()),
            None => Err(ContainerError::NoExitStatus(id.to_string())),
        }
    }

    pub async fn kill(&self, id: &str) -> Result<(), ContainerError> {
        info!(container_id = %id, "Killing container");
        self.docker
            .kill_container(id, None::<KillContainerOptions<String>>)
            .await?;
        Ok(())
    }

    pub async fn remove(&self, id: &str) -> Result<(), ContainerError> {
        info!(container_id = %id, "Removing container");
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker.remove_container(id, Some(options)).await?;
        Ok(())
    }
}

fn output_bytes(output: LogOutput) -> Vec<u8> {
    match output {
        LogOutput::StdOut { message }
        | LogOutput::StdErr { message }
        | LogOutput::Console { message } => message.to_vec(),
        LogOutput::StdIn { .. } => Vec::new(),
    }
}
