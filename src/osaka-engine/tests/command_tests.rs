//! Integration tests for gated command execution and the async handle.

mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::Workspace;
use osaka_engine::{
    Classification, CommandExecutor, CommandOutput, CommandRequest, EditRequest, Engine,
    EngineConfig, EngineError, EngineHandle, ErrorKind, ExecError, Origin, Patch, TransactionId,
};
use pretty_assertions::assert_eq;

// =============================================================================
// Mock executors
// =============================================================================

/// Runs a closure against the workspace root instead of a shell.
struct FnExecutor<F> {
    action: F,
    calls: AtomicUsize,
}

impl<F> FnExecutor<F>
where
    F: Fn(&Path) -> Result<CommandOutput, ExecError> + Send + Sync,
{
    fn new(action: F) -> Self {
        Self {
            action,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<F> CommandExecutor for FnExecutor<F>
where
    F: Fn(&Path) -> Result<CommandOutput, ExecError> + Send + Sync,
{
    async fn execute(&self, _command: &str, cwd: &Path) -> Result<CommandOutput, ExecError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.action)(cwd)
    }
}

fn exited(code: i32) -> Result<CommandOutput, ExecError> {
    Ok(CommandOutput {
        exit_code: Some(code),
        ..CommandOutput::default()
    })
}

/// Tries to start other work on the engine while its command is running.
struct IntrudingExecutor {
    engine: Arc<Engine>,
    seen: Mutex<Vec<EngineError>>,
}

#[async_trait]
impl CommandExecutor for IntrudingExecutor {
    async fn execute(&self, _command: &str, cwd: &Path) -> Result<CommandOutput, ExecError> {
        let attempts = [
            self.engine
                .execute(&[Patch::create("intruder.txt", "x")])
                .err(),
            self.engine.revert_last().err(),
            self.engine.compact_log().err(),
        ];
        self.seen.lock().unwrap().extend(attempts.into_iter().flatten());
        fs::write(cwd.join("out.txt"), "generated").unwrap();
        exited(0)
    }
}

/// Changes the tree, then never finishes.
struct StallingExecutor;

#[async_trait]
impl CommandExecutor for StallingExecutor {
    async fn execute(&self, _command: &str, cwd: &Path) -> Result<CommandOutput, ExecError> {
        fs::write(cwd.join("t.txt"), "half-done").unwrap();
        fs::write(cwd.join("new.txt"), "partial").unwrap();
        std::future::pending().await
    }
}

// =============================================================================
// Gate
// =============================================================================

#[tokio::test]
async fn test_unsafe_command_never_runs() {
    let ws = Workspace::new();
    let engine = ws.open();
    let executor = FnExecutor::new(|_: &Path| exited(0));

    let err = engine
        .run_command(CommandRequest::new("rm -rf /").confirmed(), &executor)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnsafeCommandRejected);
    match err {
        EngineError::UnsafeCommandRejected { verdict } => {
            assert_eq!(verdict.classification, Classification::Unsafe);
            assert!(verdict.matched_rule.is_some());
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(executor.calls(), 0);
    assert_eq!(engine.undo_depth(), 0);
}

#[tokio::test]
async fn test_unknown_command_needs_confirmation() {
    let ws = Workspace::new();
    let engine = ws.open();
    let executor = FnExecutor::new(|_: &Path| exited(0));

    let err = engine
        .run_command(CommandRequest::new("python3 gen.py"), &executor)
        .await
        .unwrap_err();
    match &err {
        EngineError::UnsafeCommandRejected { verdict } => {
            assert!(verdict.requires_confirmation());
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(executor.calls(), 0);

    let outcome = engine
        .run_command(CommandRequest::new("python3 gen.py").confirmed(), &executor)
        .await
        .unwrap();
    assert_eq!(outcome.verdict.classification, Classification::NeedsConfirmation);
    assert_eq!(executor.calls(), 1);
}

#[test]
fn test_classify_uses_configured_rules() {
    let ws = Workspace::new();
    ws.write(
        "rules.toml",
        "[[allow]]\nname = \"generator\"\nprograms = [\"python3\"]\nconfine_to_workspace = true\n",
    );

    let engine = ws.open_with(EngineConfig::default().with_command_rules("rules.toml"));
    let verdict = engine.classify("python3 gen.py");
    assert!(verdict.is_safe());
    assert_eq!(verdict.matched_rule.as_deref(), Some("generator"));
    assert!(engine.classify("ls").requires_confirmation());

    let builtin = ws.open();
    assert!(builtin.classify("ls").is_safe());
}

#[test]
fn test_missing_rule_file_fails_open() {
    let ws = Workspace::new();
    let err = Engine::open_with_config(
        ws.root(),
        EngineConfig::default().with_command_rules("absent.toml"),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

// =============================================================================
// Command transactions
// =============================================================================

#[tokio::test]
async fn test_tracked_changes_become_a_transaction() {
    let ws = Workspace::new();
    ws.write("keep.txt", "unchanged");
    let engine = ws.open();
    let executor = FnExecutor::new(|root: &Path| {
        fs::write(root.join("out.txt"), "generated").unwrap();
        exited(0)
    });

    let outcome = engine
        .run_command(
            CommandRequest::new("python3 gen.py")
                .confirmed()
                .track("out.txt")
                .track("keep.txt")
                .track("./out.txt"),
            &executor,
        )
        .await
        .unwrap();

    let summary = outcome.transaction.unwrap();
    assert_eq!(summary.paths, vec![PathBuf::from("out.txt")]);
    assert_eq!(
        summary.origin,
        Origin::Command {
            command: "python3 gen.py".to_string()
        }
    );
    assert_eq!(engine.undo_depth(), 1);
    // The untouched file's snapshot was dropped again.
    assert_eq!(ws.object_count(), 0);

    let report = engine.revert_last().unwrap();
    assert_eq!(report.id, summary.id);
    assert!(!ws.exists("out.txt"));
    assert_eq!(ws.read("keep.txt").as_deref(), Some("unchanged"));
}

#[tokio::test]
async fn test_command_without_changes_records_nothing() {
    let ws = Workspace::new();
    ws.write("Cargo.toml", "[package]\n");
    let engine = ws.open();
    let executor = FnExecutor::new(|_: &Path| exited(0));

    let outcome = engine
        .run_command(CommandRequest::new("cargo fmt").track("Cargo.toml"), &executor)
        .await
        .unwrap();

    assert!(outcome.verdict.is_safe());
    assert!(outcome.transaction.is_none());
    assert_eq!(engine.undo_depth(), 0);
    assert_eq!(ws.object_count(), 0);
}

#[tokio::test]
async fn test_failing_exit_status_still_commits() {
    let ws = Workspace::new();
    let h0 = ws.write("src/main.rs", "fn main(){}");
    let engine = ws.open();
    let executor = FnExecutor::new(|root: &Path| {
        fs::write(root.join("src/main.rs"), "fn main() {}\n").unwrap();
        exited(1)
    });

    let outcome = engine
        .run_command(CommandRequest::new("cargo fmt").track("src/main.rs"), &executor)
        .await
        .unwrap();

    assert!(!outcome.output.success());
    assert!(outcome.transaction.is_some());
    engine.revert_last().unwrap();
    assert_eq!(
        engine.snapshot_store().current_hash(Path::new("src/main.rs")).unwrap(),
        Some(h0)
    );
}

#[tokio::test]
async fn test_executor_failure_rolls_back() {
    let ws = Workspace::new();
    ws.write("a.txt", "before");
    let engine = ws.open();
    let executor = FnExecutor::new(|root: &Path| {
        fs::write(root.join("a.txt"), "half written").unwrap();
        fs::write(root.join("new.txt"), "partial").unwrap();
        Err(ExecError::Timeout(Duration::from_secs(30)))
    });

    let err = engine
        .run_command(
            CommandRequest::new("python3 gen.py")
                .confirmed()
                .track("a.txt")
                .track("new.txt"),
            &executor,
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::CommandFailed);
    assert!(matches!(
        err,
        EngineError::CommandFailed {
            source: ExecError::Timeout(_),
            ..
        }
    ));
    assert_eq!(ws.read("a.txt").as_deref(), Some("before"));
    assert!(!ws.exists("new.txt"));
    assert_eq!(engine.undo_depth(), 0);
    assert_eq!(ws.object_count(), 0);
}

#[tokio::test]
async fn test_dropped_command_is_rolled_back() {
    let ws = Workspace::new();
    ws.write("t.txt", "original");
    let engine = ws.open();

    let run = engine.run_command(
        CommandRequest::new("python3 gen.py")
            .confirmed()
            .track("t.txt")
            .track("new.txt"),
        &StallingExecutor,
    );
    let timed_out = tokio::time::timeout(Duration::from_millis(100), run)
        .await
        .is_err();

    assert!(timed_out);
    assert_eq!(ws.read("t.txt").as_deref(), Some("original"));
    assert!(!ws.exists("new.txt"));
    assert_eq!(engine.undo_depth(), 0);
    assert_eq!(ws.object_count(), 0);

    // The slot was released along with the future.
    let result = engine.execute(&[Patch::create("after.txt", "x")]).unwrap();
    assert_eq!(result.id, TransactionId::new(2));
}

#[tokio::test]
async fn test_failed_rollback_is_unrecoverable() {
    let ws = Workspace::new();
    ws.write("a.txt", "before");
    let engine = ws.open();
    let executor = FnExecutor::new(|root: &Path| {
        fs::write(root.join("a.txt"), "changed").unwrap();
        fs::create_dir_all(root.join("build/cache")).unwrap();
        Err(ExecError::Other("killed".to_string()))
    });

    let err = engine
        .run_command(
            CommandRequest::new("python3 gen.py")
                .confirmed()
                .track("a.txt")
                .track("build"),
            &executor,
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Unrecoverable);
    assert!(err.is_fatal());
    match &err {
        EngineError::Unrecoverable {
            cause,
            indeterminate,
            ..
        } => {
            assert_eq!(cause.kind(), ErrorKind::CommandFailed);
            assert_eq!(indeterminate, &vec![PathBuf::from("build")]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // Everything that could be restored was.
    assert_eq!(ws.read("a.txt").as_deref(), Some("before"));
    assert!(ws.path("build/cache").is_dir());
    assert_eq!(engine.undo_depth(), 0);

    // The slot is free again.
    engine.execute(&[Patch::create("next.txt", "ok")]).unwrap();
}

#[tokio::test]
async fn test_tracked_path_outside_workspace_is_rejected() {
    let ws = Workspace::new();
    let engine = ws.open();
    let executor = FnExecutor::new(|_: &Path| exited(0));

    let err = engine
        .run_command(CommandRequest::new("cargo fmt").track("../other"), &executor)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PathStateConflict);
    assert_eq!(executor.calls(), 0);
}

#[tokio::test]
async fn test_running_command_holds_the_slot() {
    let ws = Workspace::new();
    let engine = Arc::new(ws.open());
    let executor = IntrudingExecutor {
        engine: Arc::clone(&engine),
        seen: Mutex::new(Vec::new()),
    };

    let outcome = engine
        .run_command(
            CommandRequest::new("python3 gen.py").confirmed().track("out.txt"),
            &executor,
        )
        .await
        .unwrap();
    let id = outcome.transaction.unwrap().id;
    assert_eq!(id, TransactionId::new(1));

    let seen = executor.seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert!(matches!(
        seen[0],
        EngineError::TransactionInProgress { id: Some(held) } if held == id
    ));
    assert!(
        seen.iter()
            .all(|e| e.kind() == ErrorKind::TransactionInProgress)
    );
    assert!(!ws.exists("intruder.txt"));

    engine.execute(&[Patch::create("after.txt", "x")]).unwrap();
    assert_eq!(engine.undo_depth(), 2);
}

// =============================================================================
// Async handle
// =============================================================================

#[tokio::test]
async fn test_handle_round_trip() {
    let ws = Workspace::new();
    let h0 = ws.write("a.txt", "old");
    let handle = EngineHandle::new(ws.open());

    let preview = handle
        .preview(vec![Patch::replace("a.txt", Some(h0.clone()), "new")])
        .await
        .unwrap();
    assert_eq!(preview.len(), 1);
    assert_eq!(ws.read("a.txt").as_deref(), Some("old"));

    let result = handle
        .execute(vec![Patch::replace("a.txt", Some(h0), "new")])
        .await
        .unwrap();
    assert_eq!(ws.read("a.txt").as_deref(), Some("new"));

    let response = handle
        .handle_edit_request(EditRequest::new(vec![Patch::create("a.txt", "dup")]))
        .await;
    assert!(!response.committed);
    assert_eq!(
        response.error.map(|e| e.kind),
        Some(ErrorKind::PathStateConflict)
    );

    let report = handle.revert_last().await.unwrap();
    assert_eq!(report.id, result.id);
    assert_eq!(ws.read("a.txt").as_deref(), Some("old"));
    assert_eq!(handle.engine().undo_depth(), 0);
}

#[tokio::test]
async fn test_handle_clones_share_one_engine() {
    let ws = Workspace::new();
    let handle = EngineHandle::new(ws.open());
    let other = handle.clone();

    let tasks: Vec<_> = (0..4)
        .map(|i| {
            let handle = handle.clone();
            tokio::spawn(async move {
                // Contention is expected; only the outcome matters.
                loop {
                    match handle
                        .execute(vec![Patch::create(format!("f{i}.txt"), "x")])
                        .await
                    {
                        Err(EngineError::TransactionInProgress { .. }) => {
                            tokio::task::yield_now().await;
                        }
                        other => break other,
                    }
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(other.engine().undo_depth(), 4);
    let mut ids: Vec<u64> = other.engine().history().iter().map(|s| s.id.get()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2, 3, 4]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_shell_command_through_handle() {
    let ws = Workspace::new();
    let handle = EngineHandle::new(ws.open());
    let executor = handle.engine().shell_executor();

    let outcome = handle
        .run_command(
            CommandRequest::new("echo hi > out.txt").track("out.txt"),
            &executor,
        )
        .await
        .unwrap();

    assert!(outcome.verdict.is_safe());
    assert!(outcome.output.success());
    assert_eq!(ws.read("out.txt").as_deref(), Some("hi\n"));
    assert!(outcome.transaction.is_some());

    handle.revert_last().await.unwrap();
    assert!(!ws.exists("out.txt"));
}
