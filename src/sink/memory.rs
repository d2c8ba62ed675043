use crate::pipeline::batch::{LogBatch, LogLine};
use crate::sink::{LogSink, SinkError, StreamId};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// One recorded `submit` call
#[derive(Debug, Clone)]
pub struct SubmitCall {
    pub stream: StreamId,
    pub messages: Vec<String>,
    pub accepted: bool,
}

impl SubmitCall {
    pub fn texts(&self) -> Vec<String> {
        self.messages.clone()
    }
}

#[derive(Debug)]
enum Scripted {
    Fail(SinkError),
    /// Store the lines, then report failure as if the acknowledgement was lost
    AcceptThenFail(SinkError),
}

#[derive(Debug, Default)]
struct MemoryState {
    streams: HashMap<StreamId, Vec<LogLine>>,
    calls: Vec<SubmitCall>,
    script: VecDeque<Scripted>,
}

/// In-process sink that keeps acknowledged lines per stream.
///
/// Lines whose sequence number is not above the last acknowledged one for the
/// stream are ignored, so resubmitting a batch never duplicates lines.
/// Failures can be queued up front to exercise retry paths.
#[derive(Debug, Default)]
pub struct MemorySink {
    state: Mutex<MemoryState>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a failure. Queued outcomes are consumed one per submit call
    pub fn fail_next(&self, error: SinkError) {
        self.lock().script.push_back(Scripted::Fail(error));
    }

    /// Queue a submit call that stores the batch but still reports `error`
    pub fn accept_then_fail_next(&self, error: SinkError) {
        self.lock().script.push_back(Scripted::AcceptThenFail(error));
    }

    /// All submit calls, failed ones included, in call order
    pub fn calls(&self) -> Vec<SubmitCall> {
        self.lock().calls.clone()
    }

    pub fn submit_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Acknowledged lines for `stream`, in sink order
    pub fn lines(&self, stream: &StreamId) -> Vec<LogLine> {
        self.lock().streams.get(stream).cloned().unwrap_or_default()
    }

    pub fn texts(&self, stream: &StreamId) -> Vec<String> {
        self.lines(stream).into_iter().map(|l| l.message).collect()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn append(streams: &mut HashMap<StreamId, Vec<LogLine>>, stream: &StreamId, batch: &LogBatch) {
    let lines = streams.entry(stream.clone()).or_default();
    let last_acked = lines.last().map(|line| line.sequence_num);

    for line in batch.lines() {
        if last_acked.map_or(true, |last| line.sequence_num > last) {
            lines.push(line.clone());
        }
    }
}

#[async_trait]
impl LogSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn submit(&self, stream: &StreamId, batch: &LogBatch) -> Result<(), SinkError> {
        let mut state = self.lock();
        let scripted = state.script.pop_front();

        let result = match scripted {
            None => {
                append(&mut state.streams, stream, batch);
                Ok(())
            }
            Some(Scripted::Fail(error)) => Err(error),
            Some(Scripted::AcceptThenFail(error)) => {
                append(&mut state.streams, stream, batch);
                Err(error)
            }
        };

        state.calls.push(SubmitCall {
            stream: stream.clone(),
            messages: batch.lines().iter().map(|l| l.message.clone()).collect(),
            accepted: result.is_ok(),
        });

        result
    }
}
