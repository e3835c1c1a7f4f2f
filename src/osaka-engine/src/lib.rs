#![allow(clippy::missing_errors_doc, clippy::doc_markdown)]
//! Osaka Engine - transactional multi-file edits with undo.
//!
//! The engine sits between a planner that proposes edits and the files in
//! one workspace. Every edit request becomes a transaction that applies all
//! of its patches or none of them, and every committed transaction can be
//! undone in LIFO order. Shell commands pass through a command gate first;
//! their effect on tracked paths is recorded as a transaction too.
//!
//! ```text
//!   EditRequest ──► Engine::execute ──► PatchApplier (prepare, commit)
//!                        │                   │
//!                        │              SnapshotStore (capture, restore)
//!                        ▼
//!                  TransactionLog ──► UndoStack ◄── Engine::revert_last
//!
//!   CommandRequest ──► CommandGate ──► CommandExecutor ──► transaction
//! ```
//!
//! State lives under `<root>/.osaka/`: content objects in `objects/` and
//! the append-only history in `transactions.jsonl`. Reopening a workspace
//! replays the log, so undo survives restarts.

pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod handle;
pub mod log;
pub mod request;
mod slot;
pub mod transaction;
pub mod undo;

pub use command::{
    CommandExecutor, CommandOutcome, CommandOutput, CommandRequest, ExecError, ShellExecutor,
};
pub use config::{CONFIG_FILE, DEFAULT_MAX_UNDO_DEPTH, DEFAULT_STATE_DIR, EngineConfig};
pub use engine::Engine;
pub use error::{EngineError, ErrorKind, Result};
pub use handle::EngineHandle;
pub use log::{LogRecord, Replay, TransactionLog};
pub use request::{
    EditRequest, EditResponse, ErrorDetail, PreviewEntry, ResultingHash, RevertReport,
    TransactionResult,
};
pub use transaction::{
    ChangeRecord, Origin, Transaction, TransactionId, TransactionStatus, TransactionSummary,
};
pub use undo::UndoStack;

pub use osaka_apply_patch::{AppliedResult, Edit, MatchConfig, Patch, PatchError, PatchKind};
pub use osaka_execpolicy::{Classification, CommandVerdict};
pub use osaka_snapshot::ContentHash;
