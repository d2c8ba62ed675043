use chrono::{DateTime, Utc};

/// A single captured line of process output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Monotonic per-stream sequence number
    pub sequence_num: u64,

    /// Capture time, never earlier than the previous line of the same stream
    pub timestamp: DateTime<Utc>,

    /// Line content as it is sent, without the trailing newline
    pub message: String,
}

impl LogLine {
    /// Build a line from raw output bytes. Invalid UTF-8 is replaced with
    /// U+FFFD here, so every size computed from the line is its wire size.
    pub fn new(sequence_num: u64, timestamp: DateTime<Utc>, payload: Vec<u8>) -> Self {
        Self {
            sequence_num,
            timestamp,
            message: into_text(payload),
        }
    }
}

/// Decode `payload` as UTF-8, replacing invalid sequences
pub fn into_text(payload: Vec<u8>) -> String {
    match String::from_utf8(payload) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

/// Cut `text` to at most `max_bytes` without splitting a character.
/// Returns whether anything was removed.
pub fn truncate_text(text: &mut String, max_bytes: usize) -> bool {
    if text.len() <= max_bytes {
        return false;
    }

    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    true
}

/// Size limits applied while accumulating a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_lines: usize,
    pub max_bytes: usize,
    /// Fixed per-line cost charged by the sink on top of the message
    pub line_overhead_bytes: usize,
}

impl BatchLimits {
    pub fn line_cost(&self, line: &LogLine) -> usize {
        // An empty line still goes out as a single byte
        line.message.len().max(1) + self.line_overhead_bytes
    }
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_lines: 10_000,
            max_bytes: 1_048_576,
            line_overhead_bytes: 26,
        }
    }
}

/// An ordered, bounded group of lines delivered in one submit call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBatch {
    lines: Vec<LogLine>,
    size_bytes: usize,
}

impl LogBatch {
    pub fn lines(&self) -> &[LogLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Accounted size, including per-line overhead
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn first_sequence(&self) -> Option<u64> {
        self.lines.first().map(|line| line.sequence_num)
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.lines.last().map(|line| line.sequence_num)
    }
}

/// Accumulates lines and seals a batch as soon as a limit is reached.
#[derive(Debug)]
pub struct BatchBuilder {
    limits: BatchLimits,
    lines: Vec<LogLine>,
    size_bytes: usize,
}

impl BatchBuilder {
    pub fn new(limits: BatchLimits) -> Self {
        Self {
            limits,
            lines: Vec::new(),
            size_bytes: 0,
        }
    }

    /// Add a line, returning a sealed batch when one is ready.
    ///
    /// A line that would push the pending batch over `max_bytes` seals the
    /// pending batch first and starts the next one. A batch that reaches
    /// `max_lines` is sealed immediately. At most one batch is sealed per call.
    pub fn push(&mut self, line: LogLine) -> Option<LogBatch> {
        let cost = self.limits.line_cost(&line);

        let mut sealed = None;
        if !self.lines.is_empty() && self.size_bytes + cost > self.limits.max_bytes {
            sealed = self.take();
        }

        self.lines.push(line);
        self.size_bytes += cost;

        if sealed.is_none() && self.lines.len() >= self.limits.max_lines {
            sealed = self.take();
        }

        sealed
    }

    /// Seal whatever is pending, if anything
    pub fn take(&mut self) -> Option<LogBatch> {
        if self.lines.is_empty() {
            return None;
        }

        let lines = std::mem::take(&mut self.lines);
        let size_bytes = std::mem::replace(&mut self.size_bytes, 0);
        Some(LogBatch { lines, size_bytes })
    }

    pub fn pending_lines(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(sequence_num: u64, payload: &str) -> LogLine {
        LogLine::new(sequence_num, Utc::now(), payload.as_bytes().to_vec())
    }

    fn limits(max_lines: usize, max_bytes: usize) -> BatchLimits {
        BatchLimits {
            max_lines,
            max_bytes,
            line_overhead_bytes: 0,
        }
    }

    #[test]
    fn test_seals_on_line_count() {
        let mut builder = BatchBuilder::new(limits(2, 1024));

        assert!(builder.push(line(0, "a")).is_none());
        let batch = builder.push(line(1, "b")).expect("batch should seal at 2 lines");
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.first_sequence(), Some(0));
        assert_eq!(batch.last_sequence(), Some(1));
        assert!(builder.is_empty());
    }

    #[test]
    fn test_seals_before_exceeding_byte_limit() {
        let mut builder = BatchBuilder::new(limits(100, 10));

        assert!(builder.push(line(0, "aaaa")).is_none());
        assert!(builder.push(line(1, "bbbb")).is_none());

        // 4 + 4 + 4 > 10, so the first two lines go out on their own
        let batch = builder.push(line(2, "cccc")).expect("byte limit should seal");
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.size_bytes(), 8);
        assert_eq!(builder.pending_lines(), 1);

        let rest = builder.take().unwrap();
        assert_eq!(rest.first_sequence(), Some(2));
    }

    #[test]
    fn test_oversized_line_gets_its_own_batch() {
        let mut builder = BatchBuilder::new(limits(100, 4));

        assert!(builder.push(line(0, "this line is far too long")).is_none());
        let batch = builder.push(line(1, "x")).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.first_sequence(), Some(0));
    }

    #[test]
    fn test_overhead_counts_toward_byte_limit() {
        let mut builder = BatchBuilder::new(BatchLimits {
            max_lines: 100,
            max_bytes: 60,
            line_overhead_bytes: 26,
        });

        assert!(builder.push(line(0, "ab")).is_none());
        assert!(builder.push(line(1, "cd")).is_none());
        // 28 + 28 + 28 = 84 > 60
        let batch = builder.push(line(2, "ef")).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.size_bytes(), 56);
    }

    #[test]
    fn test_take_on_empty_builder() {
        let mut builder = BatchBuilder::new(BatchLimits::default());
        assert!(builder.take().is_none());
    }

    #[test]
    fn test_single_line_batches() {
        let mut builder = BatchBuilder::new(limits(1, 1024));

        for seq in 0..3 {
            let batch = builder.push(line(seq, "x")).unwrap();
            assert_eq!(batch.first_sequence(), Some(seq));
        }
        assert!(builder.take().is_none());
    }

    #[test]
    fn test_invalid_utf8_accounted_at_wire_size() {
        let limits = BatchLimits::default();
        let mut builder = BatchBuilder::new(limits);
        let mut batches = Vec::new();

        for seq in 0..3000 {
            let line = LogLine::new(seq, Utc::now(), vec![0xff; 1000]);
            // Each invalid byte becomes a three byte replacement character
            assert_eq!(line.message.len(), 3000);
            batches.extend(builder.push(line));
        }
        batches.extend(builder.take());

        for batch in &batches {
            let wire: usize = batch
                .lines()
                .iter()
                .map(|l| l.message.len() + limits.line_overhead_bytes)
                .sum();
            assert_eq!(wire, batch.size_bytes());
            assert!(wire <= limits.max_bytes, "batch of {} bytes", wire);
        }
        let total: usize = batches.iter().map(LogBatch::len).sum();
        assert_eq!(total, 3000);
    }

    #[test]
    fn test_empty_line_costs_one_byte() {
        let limits = limits(10, 100);
        assert_eq!(limits.line_cost(&line(0, "")), 1);
        assert_eq!(limits.line_cost(&line(1, "abc")), 3);
    }

    #[test]
    fn test_truncate_text_keeps_char_boundary() {
        let mut text = "ab\u{fffd}cd".to_string();
        assert!(truncate_text(&mut text, 4));
        assert_eq!(text, "ab");

        let mut short = "abc".to_string();
        assert!(!truncate_text(&mut short, 3));
        assert_eq!(short, "abc");
    }
}
