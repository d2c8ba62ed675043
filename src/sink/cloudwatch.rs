use crate::config::types::AwsSettings;
use crate::pipeline::batch::{LogBatch, LogLine};
use crate::sink::{LogSink, SinkError, StreamId};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_cloudwatchlogs::config::{Credentials, Region};
use aws_sdk_cloudwatchlogs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_cloudwatchlogs::types::InputLogEvent;
use aws_sdk_cloudwatchlogs::Client;
use std::fmt::Debug;
use tracing::{debug, info, warn};

/// How a service error code should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The data is already stored; resubmission succeeded in effect
    Accepted,
    Transient,
    Permanent,
}

pub fn classify_code(code: Option<&str>) -> ErrorClass {
    match code {
        Some("DataAlreadyAcceptedException") => ErrorClass::Accepted,
        Some(
            "ThrottlingException"
            | "ServiceUnavailableException"
            | "InternalFailure"
            | "InternalServerError"
            | "RequestTimeout"
            | "RequestTimeoutException"
            | "OperationAbortedException",
        ) => ErrorClass::Transient,
        Some(
            "ResourceNotFoundException"
            | "InvalidParameterException"
            | "InvalidSequenceTokenException"
            | "UnrecognizedClientException"
            | "AccessDeniedException"
            | "ExpiredTokenException"
            | "InvalidClientTokenId"
            | "IncompleteSignature"
            | "SignatureDoesNotMatch"
            | "ValidationException",
        ) => ErrorClass::Permanent,
        _ => ErrorClass::Transient,
    }
}

fn classify<E, R>(err: &SdkError<E, R>) -> ErrorClass
where
    E: ProvideErrorMetadata,
{
    match err {
        SdkError::ConstructionFailure(_) => ErrorClass::Permanent,
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            ErrorClass::Transient
        }
        SdkError::ServiceError(_) => classify_code(err.code()),
        _ => ErrorClass::Transient,
    }
}

fn to_sink_error<E, R>(class: ErrorClass, err: &SdkError<E, R>) -> SinkError
where
    E: std::error::Error + 'static,
    R: Debug,
{
    let message = DisplayErrorContext(err).to_string();
    match class {
        ErrorClass::Permanent => SinkError::Permanent(message),
        ErrorClass::Transient | ErrorClass::Accepted => SinkError::Transient(message),
    }
}

/// CloudWatch rejects empty messages, so an empty line is sent as a single space
pub fn event_message(line: &LogLine) -> String {
    if line.message.is_empty() {
        " ".to_string()
    } else {
        line.message.clone()
    }
}

/// Ships batches with `PutLogEvents`.
#[derive(Debug, Clone)]
pub struct CloudWatchSink {
    client: Client,
}

impl CloudWatchSink {
    pub async fn connect(settings: &AwsSettings) -> Self {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(settings.region.clone()));

        if let (Some(key_id), Some(secret)) = (&settings.access_key_id, &settings.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(
                key_id.clone(),
                secret.clone(),
                None,
                None,
                "dockwatch-cli",
            ));
        }

        if let Some(url) = &settings.endpoint_url {
            loader = loader.endpoint_url(url.clone());
        }

        let sdk_config = loader.load().await;
        info!(region = %settings.region, "CloudWatch Logs client ready");

        Self::from_client(Client::new(&sdk_config))
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Create the log group unless it already exists
    pub async fn ensure_log_group(&self, group: &str) -> Result<(), SinkError> {
        match self
            .client
            .create_log_group()
            .log_group_name(group)
            .send()
            .await
        {
            Ok(_) => info!(group = %group, "Created CloudWatch log group"),
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_resource_already_exists_exception()) =>
            {
                info!(group = %group, "Log group already exists")
            }
            Err(e) => return Err(to_sink_error(classify(&e), &e)),
        }
        Ok(())
    }

    /// Create the log stream unless it already exists
    pub async fn ensure_log_stream(&self, stream: &StreamId) -> Result<(), SinkError> {
        match self
            .client
            .create_log_stream()
            .log_group_name(&stream.group)
            .log_stream_name(&stream.stream)
            .send()
            .await
        {
            Ok(_) => info!(stream = %stream, "Created CloudWatch log stream"),
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_resource_already_exists_exception()) =>
            {
                info!(stream = %stream, "Log stream already exists")
            }
            Err(e) => return Err(to_sink_error(classify(&e), &e)),
        }
        Ok(())
    }
}

#[async_trait]
impl LogSink for CloudWatchSink {
    fn name(&self) -> &str {
        "cloudwatch"
    }

    async fn submit(&self, stream: &StreamId, batch: &LogBatch) -> Result<(), SinkError> {
        let events = batch
            .lines()
            .iter()
            .map(|line| {
                InputLogEvent::builder()
                    .timestamp(line.timestamp.timestamp_millis())
                    .message(event_message(line))
                    .build()
                    .map_err(|e| SinkError::Permanent(format!("invalid log event: {}", e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(stream = %stream, count = events.len(), "Sending logs to CloudWatch");

        let result = self
            .client
            .put_log_events()
            .log_group_name(&stream.group)
            .log_stream_name(&stream.stream)
            .set_log_events(Some(events))
            .send()
            .await;

        match result {
            Ok(output) => {
                if let Some(rejected) = output.rejected_log_events_info() {
                    warn!(
                        stream = %stream,
                        too_new_start = rejected.too_new_log_event_start_index(),
                        too_old_end = rejected.too_old_log_event_end_index(),
                        expired_end = rejected.expired_log_event_end_index(),
                        "CloudWatch rejected some log events"
                    );
                }
                Ok(())
            }
            Err(e) => match classify(&e) {
                ErrorClass::Accepted => {
                    debug!(stream = %stream, "Batch was already accepted");
                    Ok(())
                }
                class => Err(to_sink_error(class, &e)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_throttling_is_transient() {
        assert_eq!(classify_code(Some("ThrottlingException")), ErrorClass::Transient);
        assert_eq!(
            classify_code(Some("ServiceUnavailableException")),
            ErrorClass::Transient
        );
    }

    #[test]
    fn test_bad_destination_and_auth_are_permanent() {
        assert_eq!(
            classify_code(Some("ResourceNotFoundException")),
            ErrorClass::Permanent
        );
        assert_eq!(
            classify_code(Some("UnrecognizedClientException")),
            ErrorClass::Permanent
        );
        assert_eq!(classify_code(Some("AccessDeniedException")), ErrorClass::Permanent);
    }

    #[test]
    fn test_already_accepted_counts_as_success() {
        assert_eq!(
            classify_code(Some("DataAlreadyAcceptedException")),
            ErrorClass::Accepted
        );
    }

    #[test]
    fn test_unknown_codes_are_retried() {
        assert_eq!(classify_code(Some("SomethingNew")), ErrorClass::Transient);
        assert_eq!(classify_code(None), ErrorClass::Transient);
    }

    #[test]
    fn test_event_message() {
        let empty = LogLine::new(0, Utc::now(), Vec::new());
        assert_eq!(event_message(&empty), " ");

        let invalid = LogLine::new(1, Utc::now(), vec![b'o', b'k', 0xff]);
        assert_eq!(event_message(&invalid), "ok\u{fffd}");
    }

    #[test]
    fn test_invalid_utf8_line_fits_event_limit() {
        use crate::config::types::ContainerConfig;
        use crate::source::lines::LineSplitter;

        let max_line_bytes = ContainerConfig::default().max_line_bytes;
        let mut splitter = LineSplitter::new(max_line_bytes);
        let mut raw = vec![0xfe; max_line_bytes];
        raw.push(b'\n');

        let lines = splitter.push(&raw);
        assert_eq!(lines.len(), 1);
        let line = LogLine::new(0, Utc::now(), lines.into_iter().next().unwrap());
        let message = event_message(&line);

        // PutLogEvents caps an event at 256 KiB including 26 bytes of overhead
        assert!(message.len() + 26 <= 262_144);
    }
}
