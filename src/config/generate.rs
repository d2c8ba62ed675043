pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# DOCKWATCH CONFIGURATION
# =============================================================================
# Optional tuning for `dockwatch run`. What to run and where to ship it are
# given on the command line; this file only controls how output is shipped.
# Every key may be omitted, the values below are the defaults.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/dockwatch/config.yml
#   3. /etc/dockwatch/config.yml
#
# $env{VAR} is replaced with the value of environment variable VAR.

# =============================================================================
# SHIPPER
# =============================================================================
# A batch is submitted when it reaches max_batch_lines or max_batch_bytes, or
# when flush_interval elapses, whichever comes first.

shipper:
  # PutLogEvents accepts at most 10000 events per call
  max_batch_lines: 10000
  # ...and at most 1 MiB, counting line_overhead_bytes per event
  max_batch_bytes: 1048576
  line_overhead_bytes: 26
  flush_interval: 5s
  # Lines buffered between the container reader and the shipper. The reader
  # waits when the queue is full.
  queue_capacity: 50
  retry:
    # Total attempts per batch for transient failures (throttling, network)
    max_attempts: 5
    initial_backoff: 200ms
    max_backoff: 30s

# =============================================================================
# CONTAINER
# =============================================================================

container:
  # docker_socket: /var/run/docker.sock
  # Longer lines are truncated
  max_line_bytes: 262118
  remove_on_exit: true

# =============================================================================
# AWS
# =============================================================================

aws:
  # endpoint_url: http://localhost:4566
  create_log_group: true
  create_log_stream: true
"#
    .to_string()
}
