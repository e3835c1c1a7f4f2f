//! Async front for [`Engine`].
//!
//! Engine operations do blocking file I/O and fsync. The handle moves them
//! onto tokio's blocking pool so async callers never stall a runtime worker.

use crate::command::{CommandExecutor, CommandOutcome, CommandRequest};
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::request::{EditRequest, EditResponse, PreviewEntry, RevertReport, TransactionResult};
use osaka_apply_patch::Patch;
use std::sync::Arc;

/// Cheaply cloneable async handle to a shared [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineHandle {
    engine: Arc<Engine>,
}

impl EngineHandle {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub async fn execute(&self, patches: Vec<Patch>) -> Result<TransactionResult> {
        self.blocking(move |engine| engine.execute(&patches)).await
    }

    pub async fn revert_last(&self) -> Result<RevertReport> {
        self.blocking(Engine::revert_last).await
    }

    pub async fn preview(&self, patches: Vec<Patch>) -> Result<Vec<PreviewEntry>> {
        self.blocking(move |engine| engine.preview(&patches)).await
    }

    pub async fn handle_edit_request(&self, request: EditRequest) -> EditResponse {
        match self
            .blocking(move |engine| Ok(engine.handle_edit_request(&request)))
            .await
        {
            Ok(response) => response,
            Err(e) => EditResponse::failed(&e),
        }
    }

    /// Runs on the caller's task: capture and change detection are short,
    /// and the executor itself is async.
    pub async fn run_command(
        &self,
        request: CommandRequest,
        executor: &dyn CommandExecutor,
    ) -> Result<CommandOutcome> {
        self.engine.run_command(request, executor).await
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Engine) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || f(&engine))
            .await
            .map_err(|e| EngineError::TaskFailed(e.to_string()))?
    }
}
