use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Contents of the optional YAML tuning file. Every section may be omitted.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub shipper: ShipperConfig,
    #[serde(default)]
    pub container: ContainerConfig,
    #[serde(default)]
    pub aws: AwsConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ShipperConfig {
    #[serde(default = "default_max_batch_lines")]
    pub max_batch_lines: usize,
    #[serde(default = "default_max_batch_bytes")]
    pub max_batch_bytes: usize,
    #[serde(default = "default_line_overhead_bytes")]
    pub line_overhead_bytes: usize,
    #[serde(default = "default_flush_interval", with = "humantime_serde")]
    pub flush_interval: Duration,
    /// Capacity of the queue between the output reader and the delivery loop
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub retry: RetryConfig,
}

// PutLogEvents accepts at most 10,000 events and 1 MiB per call, where every
// event is charged 26 bytes on top of its message.
fn default_max_batch_lines() -> usize {
    10_000
}

fn default_max_batch_bytes() -> usize {
    1_048_576
}

fn default_line_overhead_bytes() -> usize {
    26
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_queue_capacity() -> usize {
    50
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            max_batch_lines: default_max_batch_lines(),
            max_batch_bytes: default_max_batch_bytes(),
            line_overhead_bytes: default_line_overhead_bytes(),
            flush_interval: default_flush_interval(),
            queue_capacity: default_queue_capacity(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RetryConfig {
    /// Total submit attempts per batch, the first one included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff", with = "humantime_serde")]
    pub initial_backoff: Duration,
    #[serde(default = "default_max_backoff", with = "humantime_serde")]
    pub max_backoff: Duration,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(200)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(30)
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ContainerConfig {
    /// Docker socket path; the local defaults are used when unset
    #[serde(default)]
    pub docker_socket: Option<PathBuf>,
    /// Longer lines are truncated before shipping
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    #[serde(default = "default_true")]
    pub remove_on_exit: bool,
}

// CloudWatch caps a single event at 256 KiB including the 26 byte overhead
fn default_max_line_bytes() -> usize {
    262_144 - 26
}

fn default_true() -> bool {
    true
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            docker_socket: None,
            max_line_bytes: default_max_line_bytes(),
            remove_on_exit: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AwsConfig {
    /// Override for the CloudWatch Logs endpoint (e.g. a local emulator)
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_true")]
    pub create_log_group: bool,
    #[serde(default = "default_true")]
    pub create_log_stream: bool,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            create_log_group: true,
            create_log_stream: true,
        }
    }
}

/// What to run inside the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    /// Passed to `/bin/bash -c`
    pub command: String,
}

/// Connection settings for the CloudWatch Logs client.
///
/// Both key fields must be set to use static credentials; otherwise the SDK's
/// default provider chain is used.
#[derive(Clone, PartialEq, Eq)]
pub struct AwsSettings {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint_url: Option<String>,
}

impl std::fmt::Debug for AwsSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsSettings")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("endpoint_url", &self.endpoint_url)
            .finish()
    }
}
