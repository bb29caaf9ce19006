//! JSON Lines response log.
//!
//! All appends go through one writer task fed by a bounded queue, so concurrent
//! workers never interleave bytes of two records. Files are only ever opened for
//! append.

use crate::error::ParseError;
use crate::models::{ResponseRecord, UnitId};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

const QUEUE_DEPTH: usize = 64;

/// Handle to the single log-writer task
pub struct LogWriter {
    sender: mpsc::Sender<ResponseRecord>,
    task: JoinHandle<Result<u64>>,
}

impl LogWriter {
    /// Open `path` for appending, creating it and its parent directories if needed
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open response log: {}", path.display()))?;

        // a previous run that died mid-write leaves an unterminated line behind
        if ends_without_newline(path)
            .with_context(|| format!("Failed to inspect response log: {}", path.display()))?
        {
            file.write_all(b"\n").await?;
        }

        let (sender, receiver) = mpsc::channel(QUEUE_DEPTH);
        let task = tokio::spawn(write_records(file, receiver, path.to_path_buf()));
        Ok(Self { sender, task })
    }

    /// A queue handle for workers; the writer stops once every sender is dropped
    pub fn sender(&self) -> mpsc::Sender<ResponseRecord> {
        self.sender.clone()
    }

    /// Close the queue, wait for pending records to reach disk, return how many were written
    pub async fn finish(self) -> Result<u64> {
        drop(self.sender);
        self.task.await.context("Response log writer panicked")?
    }
}

async fn write_records(
    mut file: tokio::fs::File,
    mut receiver: mpsc::Receiver<ResponseRecord>,
    path: PathBuf,
) -> Result<u64> {
    let mut written = 0u64;
    while let Some(record) = receiver.recv().await {
        let mut line = serde_json::to_string(&record).context("Failed to serialize record")?;
        line.push('\n');
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to append to {}", path.display()))?;
        file.flush().await?;
        written += 1;
    }
    file.sync_data().await?;
    debug!(path = %path.display(), written, "response log closed");
    Ok(written)
}

fn ends_without_newline(path: &Path) -> io::Result<bool> {
    let mut file = std::fs::File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

/// Records decoded from one log file, plus the lines that could not be decoded
#[derive(Debug, Default)]
pub struct LogScan {
    pub records: Vec<ResponseRecord>,
    pub malformed: Vec<ParseError>,
}

/// Read every record of a log in file order.
///
/// Blank lines are ignored and a line holding several concatenated objects
/// yields all of them. A line that fails to decode, including one cut inside a
/// multi-byte character, is reported in [`LogScan::malformed`] and reading
/// continues.
pub fn read_records(path: &Path) -> io::Result<LogScan> {
    let content = std::fs::read(path)?;
    let mut scan = LogScan::default();

    for (index, line) in content.split(|&byte| byte == b'\n').enumerate() {
        let line = line.trim_ascii();
        if line.is_empty() {
            continue;
        }
        let stream = serde_json::Deserializer::from_slice(line).into_iter::<ResponseRecord>();
        for item in stream {
            match item {
                Ok(record) => scan.records.push(record),
                Err(source) => {
                    scan.malformed.push(ParseError {
                        path: path.to_path_buf(),
                        line: index + 1,
                        source,
                    });
                    break;
                }
            }
        }
    }
    Ok(scan)
}

/// Identities already recorded in `path`; empty when the log does not exist yet
pub fn recorded_ids(path: &Path) -> io::Result<HashSet<UnitId>> {
    match read_records(path) {
        Ok(scan) => Ok(scan.records.iter().map(ResponseRecord::id).collect()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(HashSet::new()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CallError, ErrorKind};
    use crate::models::{Outcome, WorkUnit};
    use tempfile::tempdir;

    fn record(prompt_id: &str, outcome: Outcome) -> ResponseRecord {
        let unit = WorkUnit {
            prompt_id: prompt_id.to_string(),
            prompt_text: format!("prompt {prompt_id}"),
            topic_hint: None,
            model_name: "m".to_string(),
            repetition_index: 0,
        };
        ResponseRecord::for_unit(&unit, outcome)
    }

    fn success(prompt_id: &str, text: &str) -> ResponseRecord {
        record(
            prompt_id,
            Outcome::Success {
                text: text.to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_written_records_read_back_equal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("raw.jsonl");

        let mut first = success("a", "There were 17 apples");
        first.latency_ms = Some(250);
        let second = record(
            "b",
            Outcome::Failure {
                error: CallError::new(ErrorKind::Timeout, "deadline elapsed"),
            },
        );

        let writer = LogWriter::open(&path).await.unwrap();
        let sender = writer.sender();
        sender.send(first.clone()).await.unwrap();
        sender.send(second.clone()).await.unwrap();
        drop(sender);
        assert_eq!(writer.finish().await.unwrap(), 2);

        let scan = read_records(&path).unwrap();
        assert!(scan.malformed.is_empty());
        assert_eq!(scan.records, vec![first, second]);
    }

    #[tokio::test]
    async fn test_reopening_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("raw.jsonl");

        for id in ["a", "b"] {
            let writer = LogWriter::open(&path).await.unwrap();
            writer.sender().send(success(id, "1 2 3")).await.unwrap();
            writer.finish().await.unwrap();
        }

        let ids: Vec<String> = read_records(&path)
            .unwrap()
            .records
            .into_iter()
            .map(|r| r.prompt_id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_unterminated_tail_is_isolated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("raw.jsonl");
        std::fs::write(&path, r#"{"prompt_id":"cut","model_na"#).unwrap();

        let writer = LogWriter::open(&path).await.unwrap();
        writer.sender().send(success("a", "42")).await.unwrap();
        writer.finish().await.unwrap();

        let scan = read_records(&path).unwrap();
        assert_eq!(scan.records.len(), 1);
        assert_eq!(scan.records[0].prompt_id, "a");
        assert_eq!(scan.malformed.len(), 1);
        assert_eq!(scan.malformed[0].line, 1);
    }

    #[test]
    fn test_reader_tolerates_blank_and_concatenated_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("raw.jsonl");
        let a = serde_json::to_string(&success("a", "one")).unwrap();
        let b = serde_json::to_string(&success("b", "two")).unwrap();
        let c = serde_json::to_string(&success("c", "three")).unwrap();
        std::fs::write(&path, format!("{a}\n\n{b}{c}\nnot json\n")).unwrap();

        let scan = read_records(&path).unwrap();
        let ids: Vec<&str> = scan.records.iter().map(|r| r.prompt_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(scan.malformed.len(), 1);
        assert_eq!(scan.malformed[0].line, 4);
    }

    #[test]
    fn test_torn_multibyte_line_does_not_hide_neighbours() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("raw.jsonl");
        let a = serde_json::to_string(&success("a", "Total 12€")).unwrap();
        let b = serde_json::to_string(&success("b", "Total 30€")).unwrap();

        let mut content = format!("{a}\n").into_bytes();
        content.extend_from_slice(br#"{"prompt_id":"torn","text":"Total 9"#);
        content.extend_from_slice(&[0xe2, 0x82]);
        content.push(b'\n');
        content.extend_from_slice(format!("{b}\n").as_bytes());
        std::fs::write(&path, content).unwrap();

        let scan = read_records(&path).unwrap();
        let ids: Vec<&str> = scan.records.iter().map(|r| r.prompt_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(scan.malformed.len(), 1);
        assert_eq!(scan.malformed[0].line, 2);

        assert_eq!(recorded_ids(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_recorded_ids_of_missing_log_is_empty() {
        let dir = tempdir().unwrap();
        let ids = recorded_ids(&dir.path().join("absent.jsonl")).unwrap();
        assert!(ids.is_empty());
    }
}
