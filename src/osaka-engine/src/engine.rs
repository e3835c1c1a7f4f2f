//! The transaction coordinator.
//!
//! ```text
//! execute(patches)
//!   1. take the slot           ── busy ──────────────► TransactionInProgress
//!   2. check paths, duplicates ── bad ───────────────► validation error
//!   3. prepare every patch     ── stale / conflict ──► validation error
//!   4. capture every target
//!   5. commit in order         ── write fails ──► restore all, reverse order
//!                                                 └─ restore fails ──► Unrecoverable
//!   6. log + push on the undo stack
//! ```
//!
//! Nothing is written before step 5, so every validation error leaves the
//! tree exactly as it was.

use crate::command::{CommandExecutor, CommandOutcome, CommandRequest, ShellExecutor};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::log::{LogRecord, TransactionLog};
use crate::request::{EditRequest, EditResponse, PreviewEntry, RevertReport, TransactionResult};
use crate::slot::{SlotGuard, TransactionSlot};
use crate::transaction::{
    ChangeRecord, Origin, Transaction, TransactionId, TransactionStatus, TransactionSummary,
};
use crate::undo::UndoStack;
use chrono::Utc;
use osaka_apply_patch::{Patch, PatchApplier};
use osaka_execpolicy::{CommandGate, CommandVerdict, RuleSet};
use osaka_snapshot::{FileSnapshot, SnapshotStore, resolve_in_workspace};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

#[derive(Debug)]
struct EngineState {
    undo: UndoStack,
    next_id: TransactionId,
    /// `Reverted` records of partial reverts; compaction keeps them.
    stranded: Vec<LogRecord>,
}

/// Applies edit transactions to one workspace and keeps their undo history.
#[derive(Debug)]
pub struct Engine {
    root: PathBuf,
    config: EngineConfig,
    /// State directory relative to the root, when it lies inside it.
    reserved: Option<PathBuf>,
    snapshots: SnapshotStore,
    applier: PatchApplier,
    gate: CommandGate,
    log: TransactionLog,
    slot: TransactionSlot,
    state: Mutex<EngineState>,
}

impl Engine {
    /// Open the workspace at `root` with `osaka.toml` and environment
    /// configuration.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let config = EngineConfig::load(&root)?;
        Self::open_with_config(root, config)
    }

    /// Open the workspace at `root`, replaying its transaction log.
    pub fn open_with_config(root: impl Into<PathBuf>, config: EngineConfig) -> Result<Self> {
        let root = root.into();
        config.validate()?;
        if !root.is_dir() {
            return Err(EngineError::Config(format!(
                "workspace root {} is not a directory",
                root.display()
            )));
        }

        let gate = match config.command_rules_path(&root) {
            Some(path) => CommandGate::new(RuleSet::load(&path)?)?,
            None => CommandGate::builtin()?,
        };

        let reserved = reserved_dir(&root, &config.state_dir);
        let snapshots = SnapshotStore::new(root.clone(), config.objects_dir(&root));
        let applier = PatchApplier::with_match_config(root.clone(), config.match_options.clone());
        let log = TransactionLog::new(config.log_path(&root));

        let replay = log.replay()?;
        if replay.torn_tail {
            log.truncate(replay.intact_len)?;
        }
        let next_id = replay
            .max_id
            .map_or(TransactionId::new(1), TransactionId::next);

        let mut undo = UndoStack::new(config.max_undo_depth);
        let mut evicted = Vec::new();
        for transaction in replay.live {
            for snapshot in transaction.snapshots() {
                snapshots.retain(snapshot);
            }
            evicted.extend(undo.push(transaction));
        }
        for record in &replay.stranded {
            if let LogRecord::Reverted { kept, .. } = record {
                kept.iter().for_each(|snapshot| snapshots.retain(snapshot));
            }
        }

        let engine = Self {
            root,
            config,
            reserved,
            snapshots,
            applier,
            gate,
            log,
            slot: TransactionSlot::default(),
            state: Mutex::new(EngineState {
                undo,
                next_id,
                stranded: replay.stranded,
            }),
        };

        for transaction in evicted {
            engine.prune(transaction);
        }
        let swept = engine.snapshots.sweep()?;

        info!(
            root = %engine.root.display(),
            undo_depth = engine.undo_depth(),
            next_id = %next_id,
            records = replay.records,
            swept = swept.objects_deleted,
            "opened workspace"
        );
        Ok(engine)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn gate(&self) -> &CommandGate {
        &self.gate
    }

    pub fn snapshot_store(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Apply `patches` as one transaction: all of them or none.
    pub fn execute(&self, patches: &[Patch]) -> Result<TransactionResult> {
        let guard = self.slot.try_acquire()?;
        self.check_patch_set(patches)?;

        // Validate everything before touching the tree.
        let prepared = patches
            .iter()
            .map(|patch| self.applier.prepare(patch))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut tx = self.begin(&guard, Origin::Edit);
        let targets: Vec<PathBuf> = prepared.iter().map(|p| p.path().to_path_buf()).collect();
        self.capture_all(&mut tx, &targets)?;

        let mut applied = Vec::with_capacity(prepared.len());
        for patch in prepared {
            match self.applier.commit(patch) {
                Ok(result) => applied.push(result),
                Err(e) => return Err(self.roll_back(tx, e.into())),
            }
        }

        for result in &applied {
            tx.push_change(ChangeRecord::from(result));
        }
        let id = tx.id();
        self.finish(tx)?;
        Ok(TransactionResult { id, applied })
    }

    /// [`execute`](Self::execute) with the outcome folded into a response.
    pub fn handle_edit_request(&self, request: &EditRequest) -> EditResponse {
        match self.execute(&request.patches) {
            Ok(result) => EditResponse::committed(&result),
            Err(err) => {
                debug!(error = %err, kind = %err.kind(), "edit request failed");
                EditResponse::failed(&err)
            }
        }
    }

    /// Validate `patches` and render what they would change. Writes nothing.
    pub fn preview(&self, patches: &[Patch]) -> Result<Vec<PreviewEntry>> {
        self.check_patch_set(patches)?;
        patches
            .iter()
            .map(|patch| -> Result<PreviewEntry> {
                let prepared = self.applier.prepare(patch)?;
                Ok(PreviewEntry {
                    path: prepared.path().to_path_buf(),
                    operation: prepared.kind(),
                    prior_hash: prepared.prior_hash().cloned(),
                    new_hash: prepared.new_hash(),
                    diff: prepared.diff(),
                })
            })
            .collect()
    }

    /// Pop the most recent transaction and restore its snapshots.
    ///
    /// Unlike `execute` this is not all-or-nothing: if a restore fails, the
    /// paths restored before it stay restored and the error lists the rest.
    pub fn revert_last(&self) -> Result<RevertReport> {
        let _guard = self.slot.try_acquire()?;
        let tx = self
            .state
            .lock()
            .undo
            .pop()
            .ok_or(EngineError::NothingToUndo)?;
        let id = tx.id();

        let mut reverted = Vec::new();
        let mut failure = None;
        for snapshot in tx.snapshots().iter().rev() {
            match self.snapshots.restore(snapshot) {
                Ok(()) => reverted.push(snapshot.path().to_path_buf()),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        // Snapshots of the failed path and everything not attempted, in
        // capture order. They stay referenced so a human can restore them.
        let split = tx.snapshots().len() - reverted.len();
        let kept = tx.snapshots()[..split].to_vec();
        let unreverted: Vec<PathBuf> = kept.iter().rev().map(|s| s.path().to_path_buf()).collect();

        let record = LogRecord::Reverted {
            id,
            at: Utc::now(),
            unreverted: unreverted.clone(),
            kept,
        };
        if let Err(e) = self.log.append(&record) {
            // Keep memory in line with the log; reverting again is idempotent.
            error!(tx = %id, error = %e, "failed to log revert, keeping transaction on the stack");
            let evicted = self.state.lock().undo.push(tx);
            for transaction in evicted {
                self.prune(transaction);
            }
            return Err(e);
        }
        self.release_all(&tx.snapshots()[split..]);
        if split > 0 {
            self.state.lock().stranded.push(record);
        }

        match failure {
            None => {
                info!(tx = %id, files = reverted.len(), "reverted transaction");
                Ok(RevertReport { id, reverted })
            }
            Some(source) => {
                let failed = unreverted.first().cloned().unwrap_or_default();
                warn!(
                    tx = %id,
                    failed = %failed.display(),
                    reverted = reverted.len(),
                    unreverted = unreverted.len(),
                    "revert stopped partway"
                );
                Err(EngineError::PartialRevertFailure {
                    id,
                    reverted,
                    failed,
                    unreverted,
                    source,
                })
            }
        }
    }

    /// Classify a command without running it.
    pub fn classify(&self, command: &str) -> CommandVerdict {
        self.gate.classify(command)
    }

    /// A [`ShellExecutor`] using the configured timeout.
    pub fn shell_executor(&self) -> ShellExecutor {
        ShellExecutor::new().with_timeout(self.config.command_timeout())
    }

    /// Run a command through the gate and record its effect on tracked
    /// paths as one transaction.
    ///
    /// The slot is held while the executor runs; a hung command keeps the
    /// transaction pending until the executor returns or times out. If the
    /// returned future is dropped first, the tracked paths are rolled back.
    pub async fn run_command(
        &self,
        request: CommandRequest,
        executor: &dyn CommandExecutor,
    ) -> Result<CommandOutcome> {
        let verdict = self.gate.classify(&request.command);
        if !verdict.permits_execution(request.confirmed) {
            warn!(
                command = %request.command,
                classification = %verdict.classification,
                rule = verdict.matched_rule.as_deref(),
                "command rejected"
            );
            return Err(EngineError::UnsafeCommandRejected { verdict });
        }

        let tracked = self.resolve_tracked(&request.tracked_paths)?;
        let guard = self.slot.try_acquire()?;
        let mut tx = self.begin(
            &guard,
            Origin::Command {
                command: request.command.clone(),
            },
        );
        self.capture_all(&mut tx, &tracked)?;

        // Declared after `guard` so a cancelled command is rolled back
        // before the slot is released.
        let mut cancel = CancelGuard {
            engine: self,
            pending: Some(tx.clone()),
        };

        info!(tx = %tx.id(), command = %request.command, tracked = tracked.len(), "running command");
        let executed = executor.execute(&request.command, &self.root).await;
        cancel.disarm();

        let output = match executed {
            Ok(output) => output,
            Err(source) => {
                let cause = EngineError::CommandFailed {
                    command: request.command.clone(),
                    source,
                };
                return Err(self.roll_back(tx, cause));
            }
        };

        let changes = match self.detect_changes(tx.snapshots()) {
            Ok(changes) => changes,
            Err(e) => return Err(self.roll_back(tx, e)),
        };

        let changed: HashSet<PathBuf> = changes.iter().map(|c| c.path.clone()).collect();
        let untouched = tx.split_off_snapshots(|s| changed.contains(s.path()));
        self.release_all(&untouched);
        for change in changes {
            tx.push_change(change);
        }

        let transaction = if tx.snapshots().is_empty() {
            debug!(tx = %tx.id(), "command changed no tracked paths");
            None
        } else {
            let summary = tx.summary();
            self.finish(tx)?;
            Some(summary)
        };

        Ok(CommandOutcome {
            verdict,
            output,
            transaction,
        })
    }

    /// Live undo entries, most recent last.
    pub fn history(&self) -> Vec<TransactionSummary> {
        self.state
            .lock()
            .undo
            .iter()
            .map(Transaction::summary)
            .collect()
    }

    pub fn undo_depth(&self) -> usize {
        self.state.lock().undo.len()
    }

    /// Rewrite the log to hold only live entries. Returns how many
    /// transactions were kept.
    pub fn compact_log(&self) -> Result<usize> {
        let _guard = self.slot.try_acquire()?;

        let (records, live) = {
            let state = self.state.lock();
            let mut records = Vec::with_capacity(state.undo.len() + state.stranded.len() + 1);
            if state.next_id.get() > 1 {
                records.push(LogRecord::Checkpoint {
                    last_id: TransactionId::new(state.next_id.get() - 1),
                });
            }
            records.extend(state.stranded.iter().cloned());
            records.extend(state.undo.iter().cloned().map(|transaction| {
                LogRecord::Committed { transaction }
            }));
            (records, state.undo.len())
        };

        self.log.rewrite(&records)?;
        info!(live, log = %self.log.path().display(), "compacted transaction log");
        Ok(live)
    }

    /// Compare each snapshot with the live tree.
    fn detect_changes(&self, snapshots: &[FileSnapshot]) -> Result<Vec<ChangeRecord>> {
        let mut changes = Vec::new();
        for snapshot in snapshots {
            let current = self.snapshots.current_hash(snapshot.path())?;
            changes.extend(ChangeRecord::between(
                snapshot.path(),
                snapshot.content_hash().cloned(),
                current,
            ));
        }
        Ok(changes)
    }

    fn begin(&self, guard: &SlotGuard<'_>, origin: Origin) -> Transaction {
        let id = {
            let mut state = self.state.lock();
            let id = state.next_id;
            state.next_id = id.next();
            id
        };
        guard.bind(id);
        debug!(tx = %id, "began transaction");
        Transaction::new(id, origin)
    }

    /// Reject empty sets, paths outside the workspace and duplicate targets.
    fn check_patch_set(&self, patches: &[Patch]) -> Result<()> {
        if patches.is_empty() {
            return Err(EngineError::EmptyTransaction);
        }

        let mut seen: HashMap<PathBuf, usize> = HashMap::new();
        for (index, patch) in patches.iter().enumerate() {
            let relative = self.resolve(patch.path())?;
            if let Some(&first) = seen.get(&relative) {
                return Err(EngineError::ConflictingPatches {
                    path: relative,
                    first,
                    second: index,
                });
            }
            seen.insert(relative, index);
        }
        Ok(())
    }

    fn resolve_tracked(&self, paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let mut resolved = Vec::with_capacity(paths.len());
        for path in paths {
            let relative = self.resolve(path)?;
            if !resolved.contains(&relative) {
                resolved.push(relative);
            }
        }
        Ok(resolved)
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        let (relative, _) = resolve_in_workspace(&self.root, path)?;
        if let Some(reserved) = &self.reserved
            && relative.starts_with(reserved)
        {
            return Err(EngineError::ReservedPath { path: relative });
        }
        Ok(relative)
    }

    /// Capture every path into `tx`. On failure nothing has been written,
    /// so the captured references are dropped and the error returned.
    fn capture_all(&self, tx: &mut Transaction, paths: &[PathBuf]) -> Result<()> {
        for path in paths {
            match self.snapshots.capture(path) {
                Ok(snapshot) => tx.push_snapshot(snapshot),
                Err(e) => {
                    self.release_all(tx.snapshots());
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    /// Restore every snapshot in reverse capture order and return the error
    /// to surface: `cause` when the tree is back in its pre-state,
    /// `Unrecoverable` otherwise.
    fn roll_back(&self, mut tx: Transaction, cause: EngineError) -> EngineError {
        let id = tx.id();
        warn!(tx = %id, error = %cause, "rolling back transaction");

        let mut failures = Vec::new();
        for snapshot in tx.snapshots().iter().rev() {
            if let Err(e) = self.snapshots.restore(snapshot) {
                error!(
                    tx = %id,
                    path = %snapshot.path().display(),
                    error = %e,
                    "restore failed during rollback"
                );
                failures.push((snapshot.path().to_path_buf(), e));
            }
        }

        if let Err(e) = tx.mark(TransactionStatus::RolledBack) {
            error!(tx = %id, error = %e, "rollback of a finished transaction");
        }

        let mut failures = failures.into_iter();
        let Some((first_path, rollback)) = failures.next() else {
            self.release_all(tx.snapshots());
            info!(tx = %id, files = tx.snapshots().len(), "rolled back transaction");
            return cause;
        };

        // The snapshots stay referenced so their objects are not deleted
        // while someone repairs the tree.
        let indeterminate: Vec<PathBuf> = std::iter::once(first_path)
            .chain(failures.map(|(path, _)| path))
            .collect();
        error!(tx = %id, paths = ?indeterminate, "rollback failed, workspace needs manual repair");
        EngineError::Unrecoverable {
            id,
            cause: Box::new(cause),
            indeterminate,
            rollback,
        }
    }

    /// Log the transaction as committed and push it on the undo stack. If
    /// the log cannot be written the transaction is rolled back.
    fn finish(&self, tx: Transaction) -> Result<()> {
        let mut committed = tx.clone();
        committed.mark(TransactionStatus::Committed)?;

        if let Err(e) = self.log.append(&LogRecord::Committed {
            transaction: committed.clone(),
        }) {
            return Err(self.roll_back(tx, e));
        }

        let id = committed.id();
        let files = committed.snapshots().len();
        let origin = match committed.origin() {
            Origin::Edit => "edit",
            Origin::Command { .. } => "command",
        };

        let evicted = self.state.lock().undo.push(committed);
        for transaction in evicted {
            self.prune(transaction);
        }

        info!(tx = %id, files, origin, "committed transaction");
        Ok(())
    }

    /// Drop a transaction that fell off the undo stack.
    fn prune(&self, transaction: Transaction) {
        let id = transaction.id();
        if let Err(e) = self.log.append(&LogRecord::Pruned { id }) {
            // Replay re-applies the depth cap, so the entry is evicted again.
            warn!(tx = %id, error = %e, "failed to log pruned transaction");
        }
        self.release_all(transaction.snapshots());
        debug!(tx = %id, "pruned transaction");
    }

    fn release_all(&self, snapshots: &[FileSnapshot]) {
        for snapshot in snapshots {
            if let Err(e) = self.snapshots.release(snapshot) {
                // The next sweep reclaims the object.
                warn!(path = %snapshot.path().display(), error = %e, "failed to release snapshot");
            }
        }
    }
}

/// Rolls back a command transaction whose `run_command` future was dropped
/// while the executor was still running.
struct CancelGuard<'a> {
    engine: &'a Engine,
    pending: Option<Transaction>,
}

impl CancelGuard<'_> {
    fn disarm(&mut self) {
        self.pending = None;
    }
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        let Some(tx) = self.pending.take() else {
            return;
        };
        let id = tx.id();
        match self.engine.roll_back(tx, EngineError::Cancelled { id }) {
            EngineError::Cancelled { .. } => {
                warn!(tx = %id, "command cancelled, changes rolled back");
            }
            err => error!(tx = %id, error = %err, "command cancelled"),
        }
    }
}

/// The state directory relative to `root`, if it lies inside the workspace.
fn reserved_dir(root: &Path, state_dir: &Path) -> Option<PathBuf> {
    if state_dir.is_absolute() {
        return state_dir
            .strip_prefix(root)
            .ok()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf);
    }
    resolve_in_workspace(root, state_dir).ok().map(|(relative, _)| relative)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_dir() {
        let root = Path::new("/work");
        assert_eq!(
            reserved_dir(root, Path::new(".osaka")),
            Some(PathBuf::from(".osaka"))
        );
        assert_eq!(
            reserved_dir(root, Path::new("./state/../.osaka")),
            Some(PathBuf::from(".osaka"))
        );
        assert_eq!(
            reserved_dir(root, Path::new("/work/.state")),
            Some(PathBuf::from(".state"))
        );
        assert_eq!(reserved_dir(root, Path::new("/var/osaka")), None);
        assert_eq!(reserved_dir(root, Path::new("../outside")), None);
    }
}
