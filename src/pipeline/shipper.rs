use crate::config::types::ShipperConfig;
use crate::pipeline::batch::{BatchBuilder, BatchLimits, LogBatch, LogLine};
use crate::pipeline::retry::Backoff;
use crate::sink::{LogSink, SinkError, StreamId};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ShipError {
    #[error("shipping to {stream} aborted, {} lines dropped: {source}", .report.lines_dropped)]
    Permanent {
        stream: StreamId,
        source: SinkError,
        report: ShipReport,
    },
}

/// Counters for one `ship` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShipReport {
    pub batches_delivered: u64,
    pub lines_delivered: u64,
    pub lines_dropped: u64,
    pub retries: u64,
    pub cancelled: bool,
}

impl ShipReport {
    fn record_delivered(&mut self, batch: &LogBatch) {
        self.batches_delivered += 1;
        self.lines_delivered += batch.len() as u64;
    }
}

/// Outcome of delivering one batch
enum Delivery {
    Delivered,
    /// Transient failures exhausted the attempt budget
    Dropped,
    /// Cancelled while backing off; the batch was not acknowledged
    Cancelled(LogBatch),
    Aborted(SinkError, LogBatch),
}

impl From<&ShipperConfig> for BatchLimits {
    fn from(config: &ShipperConfig) -> Self {
        Self {
            max_lines: config.max_batch_lines,
            max_bytes: config.max_batch_bytes,
            line_overhead_bytes: config.line_overhead_bytes,
        }
    }
}

const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

/// Batches a line stream and delivers it to a sink in order.
///
/// Each `ship` call runs one producer (reading the source into a bounded
/// queue) and one consumer (batching and delivery) concurrently. The producer
/// waits whenever the queue is full, so a slow sink throttles the reader
/// instead of growing memory.
///
/// Sequence numbers and capture times continue across `ship` calls to the
/// same stream.
pub struct LogShipper {
    sink: Arc<dyn LogSink>,
    config: ShipperConfig,
    cursors: Mutex<HashMap<StreamId, Arc<Mutex<StreamCursor>>>>,
}

impl LogShipper {
    pub fn new(sink: Arc<dyn LogSink>, mut config: ShipperConfig) -> Self {
        config.queue_capacity = config.queue_capacity.max(1);
        config.retry.max_attempts = config.retry.max_attempts.max(1);
        config.flush_interval = config.flush_interval.max(MIN_FLUSH_INTERVAL);

        Self {
            sink,
            config,
            cursors: Mutex::new(HashMap::new()),
        }
    }

    fn cursor(&self, stream: &StreamId) -> Arc<Mutex<StreamCursor>> {
        let mut cursors = self
            .cursors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        cursors.entry(stream.clone()).or_default().clone()
    }

    /// Ship every line of `source` to `stream`.
    ///
    /// Returns when the source is exhausted (after delivering what is buffered)
    /// or when `cancel` fires (after one best-effort flush). A permanent sink
    /// error aborts immediately; the source is left where reading stopped so the
    /// caller may keep draining it.
    pub async fn ship<S>(
        &self,
        stream: &StreamId,
        source: &mut S,
        cancel: CancellationToken,
    ) -> Result<ShipReport, ShipError>
    where
        S: Stream<Item = Vec<u8>> + Unpin,
    {
        info!(
            stream = %stream,
            sink = self.sink.name(),
            max_batch_lines = self.config.max_batch_lines,
            flush_interval_ms = self.config.flush_interval.as_millis() as u64,
            "Starting log shipper"
        );

        let (tx, rx) = mpsc::channel::<LogLine>(self.config.queue_capacity);
        let stop_producer = cancel.child_token();

        let producer = produce(
            source,
            tx,
            self.cursor(stream),
            stop_producer.clone(),
        );
        let consumer = async {
            let result = self.consume(stream, rx, &cancel).await;
            stop_producer.cancel();
            result
        };

        let (abandoned, mut result) = tokio::join!(producer, consumer);

        match &mut result {
            Ok(report) => report.lines_dropped += abandoned,
            Err(ShipError::Permanent { report, .. }) => report.lines_dropped += abandoned,
        }

        match &result {
            Ok(report) => info!(
                stream = %stream,
                batches = report.batches_delivered,
                lines = report.lines_delivered,
                dropped = report.lines_dropped,
                retries = report.retries,
                cancelled = report.cancelled,
                "Log shipper finished"
            ),
            Err(e) => error!(stream = %stream, error = %e, "Log shipper aborted"),
        }

        result
    }

    async fn consume(
        &self,
        stream: &StreamId,
        mut rx: mpsc::Receiver<LogLine>,
        cancel: &CancellationToken,
    ) -> Result<ShipReport, ShipError> {
        let mut report = ShipReport::default();
        let mut builder = BatchBuilder::new(BatchLimits::from(&self.config));
        let mut flush_ticker = interval(self.config.flush_interval);
        flush_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        flush_ticker.tick().await;

        loop {
            let sealed = tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!(stream = %stream, "Cancellation requested, flushing pending lines");
                    self.flush_on_cancel(stream, None, builder, rx, &mut report).await;
                    return Ok(report);
                }

                _ = flush_ticker.tick() => {
                    let batch = builder.take();
                    if let Some(batch) = &batch {
                        debug!(stream = %stream, count = batch.len(), "Flush interval elapsed");
                    }
                    batch
                }

                received = rx.recv() => match received {
                    Some(line) => builder.push(line),
                    None => {
                        info!(stream = %stream, "Line source exhausted, draining");
                        break;
                    }
                },
            };

            if let Some(batch) = sealed {
                flush_ticker.reset();
                match self.deliver(stream, batch, cancel, &mut report).await {
                    Delivery::Delivered | Delivery::Dropped => {}
                    Delivery::Cancelled(batch) => {
                        self.flush_on_cancel(stream, Some(batch), builder, rx, &mut report)
                            .await;
                        return Ok(report);
                    }
                    Delivery::Aborted(source, batch) => {
                        report.lines_dropped += batch.len() as u64;
                        report.lines_dropped += builder.pending_lines() as u64;
                        report.lines_dropped += discard_queued(&mut rx).await;
                        return Err(ShipError::Permanent {
                            stream: stream.clone(),
                            source,
                            report,
                        });
                    }
                }
            }
        }

        if let Some(batch) = builder.take() {
            match self.deliver(stream, batch, cancel, &mut report).await {
                Delivery::Delivered | Delivery::Dropped => {}
                Delivery::Cancelled(batch) => {
                    self.flush_on_cancel(stream, Some(batch), builder, rx, &mut report)
                        .await;
                }
                Delivery::Aborted(source, batch) => {
                    report.lines_dropped += batch.len() as u64;
                    return Err(ShipError::Permanent {
                        stream: stream.clone(),
                        source,
                        report,
                    });
                }
            }
        }

        Ok(report)
    }

    /// Submit one batch, retrying transient failures with backoff
    async fn deliver(
        &self,
        stream: &StreamId,
        batch: LogBatch,
        cancel: &CancellationToken,
        report: &mut ShipReport,
    ) -> Delivery {
        let max_attempts = self.config.retry.max_attempts;
        let mut backoff = Backoff::new(&self.config.retry);
        let mut attempt = 1;

        loop {
            match self.sink.submit(stream, &batch).await {
                Ok(()) => {
                    debug!(
                        stream = %stream,
                        count = batch.len(),
                        first_sequence = batch.first_sequence(),
                        attempt = attempt,
                        "Delivered batch"
                    );
                    report.record_delivered(&batch);
                    return Delivery::Delivered;
                }
                Err(e) if e.is_transient() => {
                    if attempt >= max_attempts {
                        error!(
                            stream = %stream,
                            attempts = attempt,
                            count = batch.len(),
                            error = %e,
                            "Max retries exceeded, dropping batch"
                        );
                        report.lines_dropped += batch.len() as u64;
                        return Delivery::Dropped;
                    }

                    let delay = backoff.next_delay();
                    warn!(
                        stream = %stream,
                        attempt = attempt,
                        backoff_ms = delay.as_millis() as u64,
                        error = %e,
                        "Submit failed, retrying"
                    );
                    report.retries += 1;

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Delivery::Cancelled(batch),
                        _ = sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => {
                    error!(stream = %stream, error = %e, "Permanent sink error, aborting");
                    return Delivery::Aborted(e, batch);
                }
            }
        }
    }

    /// Best-effort final flush: one attempt per batch, stop at the first failure
    async fn flush_on_cancel(
        &self,
        stream: &StreamId,
        in_flight: Option<LogBatch>,
        mut builder: BatchBuilder,
        mut rx: mpsc::Receiver<LogLine>,
        report: &mut ShipReport,
    ) {
        report.cancelled = true;

        let mut batches: Vec<LogBatch> = in_flight.into_iter().collect();
        rx.close();
        while let Some(line) = rx.recv().await {
            if let Some(batch) = builder.push(line) {
                batches.push(batch);
            }
        }
        batches.extend(builder.take());

        let mut remaining = batches.into_iter();
        while let Some(batch) = remaining.next() {
            match self.sink.submit(stream, &batch).await {
                Ok(()) => report.record_delivered(&batch),
                Err(e) => {
                    let unsent =
                        batch.len() as u64 + remaining.map(|b| b.len() as u64).sum::<u64>();
                    warn!(
                        stream = %stream,
                        error = %e,
                        dropped = unsent,
                        "Final flush failed"
                    );
                    report.lines_dropped += unsent;
                    return;
                }
            }
        }
    }
}

/// Where a stream left off: the next sequence number and the last capture time
#[derive(Debug, Default)]
struct StreamCursor {
    next_sequence: u64,
    last_timestamp: Option<DateTime<Utc>>,
}

impl StreamCursor {
    /// Stamp a line captured at `now`. The capture time never goes backwards
    fn stamp(&mut self, now: DateTime<Utc>, payload: Vec<u8>) -> LogLine {
        let timestamp = match self.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_timestamp = Some(timestamp);

        let sequence_num = self.next_sequence;
        self.next_sequence += 1;
        LogLine::new(sequence_num, timestamp, payload)
    }
}

/// Read the source into the queue, stamping sequence numbers and capture times.
/// Returns the number of lines read but never queued.
async fn produce<S>(
    source: &mut S,
    tx: mpsc::Sender<LogLine>,
    cursor: Arc<Mutex<StreamCursor>>,
    stop: CancellationToken,
) -> u64
where
    S: Stream<Item = Vec<u8>> + Unpin,
{
    loop {
        let payload = tokio::select! {
            biased;
            _ = stop.cancelled() => return 0,
            next = source.next() => match next {
                Some(payload) => payload,
                None => return 0,
            },
        };

        let line = cursor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .stamp(Utc::now(), payload);

        tokio::select! {
            biased;
            _ = stop.cancelled() => return 1,
            sent = tx.send(line) => {
                if sent.is_err() {
                    return 1;
                }
            }
        }
    }
}

async fn discard_queued(rx: &mut mpsc::Receiver<LogLine>) -> u64 {
    rx.close();
    let mut discarded = 0;
    while rx.recv().await.is_some() {
        discarded += 1;
    }
    discarded
}

/// Consume `source` without shipping, returning the number of lines seen.
///
/// Used after a permanent failure so the monitored process can keep writing
/// output while the dropped lines are still accounted for.
pub async fn drain<S>(source: &mut S, cancel: &CancellationToken) -> u64
where
    S: Stream<Item = Vec<u8>> + Unpin,
{
    let mut dropped = 0;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return dropped,
            next = source.next() => match next {
                Some(_) => dropped += 1,
                None => return dropped,
            },
        }
    }
}
