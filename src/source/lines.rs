use crate::pipeline::batch::{into_text, truncate_text};
use futures::stream::{self, Stream, StreamExt};
use std::collections::VecDeque;
use tracing::warn;

/// Splits a byte stream into lines.
///
/// Chunks may end mid-line; the partial line is carried over to the next
/// chunk. A trailing `\r` is stripped. Lines come out as valid UTF-8, with
/// invalid sequences replaced. Lines longer than `max_line_bytes` once decoded
/// are cut on a character boundary and the rest of the line is discarded.
#[derive(Debug)]
pub struct LineSplitter {
    partial: Vec<u8>,
    max_line_bytes: usize,
    truncating: bool,
    truncated_lines: u64,
}

impl LineSplitter {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            partial: Vec::new(),
            max_line_bytes: max_line_bytes.max(1),
            truncating: false,
            truncated_lines: 0,
        }
    }

    /// Feed a chunk, returning every line it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.append(&rest[..pos]);
            lines.push(self.take_line());
            rest = &rest[pos + 1..];
        }
        self.append(rest);

        lines
    }

    /// End of input: emit the unterminated tail, if any
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        if self.partial.is_empty() && !self.truncating {
            return None;
        }
        Some(self.take_line())
    }

    pub fn truncated_lines(&self) -> u64 {
        self.truncated_lines
    }

    fn append(&mut self, bytes: &[u8]) {
        let room = self.max_line_bytes.saturating_sub(self.partial.len());
        if bytes.len() <= room {
            self.partial.extend_from_slice(bytes);
            return;
        }

        self.partial.extend_from_slice(&bytes[..room]);
        if !self.truncating {
            self.truncating = true;
            self.truncated_lines += 1;
            warn!(max_line_bytes = self.max_line_bytes, "Line too long, truncating");
        }
    }

    fn take_line(&mut self) -> Vec<u8> {
        let mut line = std::mem::take(&mut self.partial);
        if line.last() == Some(&b'\r') {
            line.pop();
        }

        // Replacement characters can grow the line past the limit again
        let mut text = into_text(line);
        if truncate_text(&mut text, self.max_line_bytes) && !self.truncating {
            self.truncated_lines += 1;
            warn!(max_line_bytes = self.max_line_bytes, "Line too long after decoding, truncating");
        }

        self.truncating = false;
        text.into_bytes()
    }
}

/// Adapt a stream of byte chunks into a lazy stream of lines
pub fn split_lines<S, B>(chunks: S, max_line_bytes: usize) -> impl Stream<Item = Vec<u8>>
where
    S: Stream<Item = B> + Unpin,
    B: AsRef<[u8]>,
{
    let state = (chunks, LineSplitter::new(max_line_bytes), VecDeque::new(), false);

    stream::unfold(state, |(mut chunks, mut splitter, mut ready, mut finished)| async move {
        loop {
            if let Some(line) = ready.pop_front() {
                return Some((line, (chunks, splitter, ready, finished)));
            }
            if finished {
                return None;
            }

            match chunks.next().await {
                Some(chunk) => ready.extend(splitter.push(chunk.as_ref())),
                None => {
                    finished = true;
                    ready.extend(splitter.finish());
                }
            }
        }
    })
}
