//! Record sinks: where completed trials go.

use crate::error::SessionError;
use crate::session::TrialRecord;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Append-only destination for trial records.
pub trait RecordSink {
    fn append(&mut self, record: &TrialRecord) -> Result<(), SessionError>;

    fn flush(&mut self) -> Result<(), SessionError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub records: Vec<TrialRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordSink for MemorySink {
    fn append(&mut self, record: &TrialRecord) -> Result<(), SessionError> {
        self.records.push(record.clone());
        Ok(())
    }
}

/// One JSON object per line. Every record is flushed as it is written so a
/// crash loses at most the trial in flight.
#[derive(Debug)]
pub struct JsonlSink<W: Write> {
    writer: W,
    written: usize,
}

impl JsonlSink<BufWriter<File>> {
    /// Open `path` for appending, creating parent directories as needed.
    pub fn create(path: &Path) -> Result<Self, SessionError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> JsonlSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> RecordSink for JsonlSink<W> {
    fn append(&mut self, record: &TrialRecord) -> Result<(), SessionError> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SessionError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Read back a JSON-lines record file. Blank lines are skipped.
pub fn read_jsonl<R: Read>(reader: R) -> Result<Vec<TrialRecord>, SessionError> {
    let mut records = Vec::new();
    for line in BufReader::new(reader).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockId;
    use crate::scene::TargetId;
    use crate::scripted::test_clock;
    use crate::time::Clock;
    use crate::trial::TrialOutcome;

    fn record(trial: u32, outcome: TrialOutcome) -> TrialRecord {
        TrialRecord {
            trial,
            block: BlockId::new("valuediff2"),
            condition: "c3v5_opt1left".to_string(),
            trial_type: "choice".to_string(),
            outcome,
            selection: Some(TargetId::Option2),
            correct_target: TargetId::Option2,
            magnitudes: vec![3, 5],
            locations: vec!["left".to_string(), "right".to_string()],
            reward: None,
            timestamp: test_clock().wall_time(),
        }
    }

    #[test]
    fn jsonl_lines_read_back_in_order() {
        let mut sink = JsonlSink::new(Vec::new());
        sink.append(&record(1, TrialOutcome::Correct)).unwrap();
        sink.append(&record(2, TrialOutcome::Incorrect)).unwrap();
        assert_eq!(sink.written(), 2);

        let mut bytes = sink.into_inner();
        bytes.extend_from_slice(b"\n  \n");
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert_eq!(text.lines().filter(|l| !l.trim().is_empty()).count(), 2);

        let back = read_jsonl(bytes.as_slice()).unwrap();
        assert_eq!(back, vec![record(1, TrialOutcome::Correct), record(2, TrialOutcome::Incorrect)]);
    }

    #[test]
    fn garbage_lines_are_an_error() {
        let err = read_jsonl(&b"{\"trial\": 1}\n"[..]).unwrap_err();
        assert!(matches!(err, SessionError::Encode(_)));
    }
}
