//! Append-only transaction log.
//!
//! One JSON object per line. Every append is flushed to storage before it
//! returns, so a record that was acknowledged survives a crash. Replaying
//! the log rebuilds the undo history.
//!
//! ```text
//! {"record":"committed","transaction":{"id":1,...}}
//! {"record":"committed","transaction":{"id":2,...}}
//! {"record":"reverted","id":2,"at":"2026-..."}
//! {"record":"pruned","id":1}
//! ```

use crate::error::{EngineError, Result};
use crate::transaction::{Transaction, TransactionId};
use chrono::{DateTime, Utc};
use osaka_snapshot::{FileSnapshot, write_durable};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One line of the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum LogRecord {
    /// A transaction was committed and pushed on the undo stack.
    Committed { transaction: Transaction },

    /// The transaction was popped and reverted. `unreverted` lists paths a
    /// partial revert left in the post-change state; `kept` holds their
    /// snapshots, which stay referenced so the pre-change content can still
    /// be restored by hand.
    Reverted {
        id: TransactionId,
        at: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        unreverted: Vec<PathBuf>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        kept: Vec<FileSnapshot>,
    },

    /// The transaction fell off the bottom of the undo stack.
    Pruned { id: TransactionId },

    /// Written first by compaction so ids stay monotonic after the records
    /// that carried them are gone.
    Checkpoint { last_id: TransactionId },
}

impl LogRecord {
    pub fn id(&self) -> TransactionId {
        match self {
            Self::Committed { transaction } => transaction.id(),
            Self::Reverted { id, .. } | Self::Pruned { id } => *id,
            Self::Checkpoint { last_id } => *last_id,
        }
    }
}

/// State reconstructed from the log.
#[derive(Debug, Default)]
pub struct Replay {
    /// Transactions still on the undo stack, oldest first.
    pub live: Vec<Transaction>,
    /// Highest id ever logged.
    pub max_id: Option<TransactionId>,
    /// Number of records read.
    pub records: usize,
    /// Partial reverts whose kept snapshots must stay referenced.
    pub stranded: Vec<LogRecord>,
    /// A torn final line was skipped.
    pub torn_tail: bool,
    /// Bytes of the log up to the end of the last intact line.
    pub intact_len: u64,
}

#[derive(Debug, Clone)]
pub struct TransactionLog {
    path: PathBuf,
}

impl TransactionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and sync it to storage.
    pub fn append(&self, record: &LogRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)
            .map_err(|e| EngineError::io(&self.path, io::Error::other(e)))?;
        line.push(b'\n');

        self.append_line(&line)
            .map_err(|e| EngineError::io(&self.path, e))?;
        debug!(record = record_name(record), tx = %record.id(), "appended log record");
        Ok(())
    }

    fn append_line(&self, line: &[u8]) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line)?;
        file.sync_data()
    }

    /// Rebuild the undo history. A missing log is an empty history.
    ///
    /// A malformed final line is a torn append from a crash and is skipped;
    /// a malformed line anywhere else is corruption.
    pub fn replay(&self) -> Result<Replay> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(EngineError::io(&self.path, e)),
        };

        let lines: Vec<(usize, &str)> = content
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty())
            .collect();
        let last = lines.len().saturating_sub(1);

        let mut replay = Replay {
            intact_len: content.len() as u64,
            ..Replay::default()
        };
        for (position, (index, line)) in lines.into_iter().enumerate() {
            let record: LogRecord = match serde_json::from_str(line) {
                Ok(record) => record,
                Err(e) if position == last && !content.ends_with('\n') => {
                    warn!(
                        log = %self.path.display(),
                        line = index + 1,
                        error = %e,
                        "skipping torn final log record"
                    );
                    replay.torn_tail = true;
                    replay.intact_len = content.rfind('\n').map_or(0, |i| i as u64 + 1);
                    continue;
                }
                Err(e) => {
                    return Err(EngineError::CorruptLog {
                        path: self.path.clone(),
                        line: index + 1,
                        message: e.to_string(),
                    });
                }
            };

            replay.records += 1;
            let id = record.id();
            replay.max_id = replay.max_id.max(Some(id));
            if let LogRecord::Reverted { kept, .. } = &record
                && !kept.is_empty()
            {
                replay.stranded.push(record.clone());
            }

            match record {
                LogRecord::Committed { transaction } => replay.live.push(transaction),
                LogRecord::Reverted { .. } | LogRecord::Pruned { .. } => {
                    replay.live.retain(|t| t.id() != id);
                }
                LogRecord::Checkpoint { .. } => {}
            }
        }

        Ok(replay)
    }

    /// Cut the log back to `len` bytes so the next append starts on a fresh
    /// line after a torn record.
    pub fn truncate(&self, len: u64) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|e| EngineError::io(&self.path, e))?;
        file.set_len(len)
            .and_then(|()| file.sync_data())
            .map_err(|e| EngineError::io(&self.path, e))?;
        warn!(log = %self.path.display(), len, "truncated torn log tail");
        Ok(())
    }

    /// Atomically replace the log with `records`.
    pub fn rewrite(&self, records: &[LogRecord]) -> Result<()> {
        let mut content = Vec::new();
        for record in records {
            serde_json::to_writer(&mut content, record)
                .map_err(|e| EngineError::io(&self.path, io::Error::other(e)))?;
            content.push(b'\n');
        }
        write_durable(&self.path, &content).map_err(|e| EngineError::io(&self.path, e))
    }
}

fn record_name(record: &LogRecord) -> &'static str {
    match record {
        LogRecord::Committed { .. } => "committed",
        LogRecord::Reverted { .. } => "reverted",
        LogRecord::Pruned { .. } => "pruned",
        LogRecord::Checkpoint { .. } => "checkpoint",
    }
}
