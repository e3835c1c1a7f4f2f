//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Once;

use osaka_engine::{ContentHash, Engine, EngineConfig};
use tempfile::TempDir;

static TRACING: Once = Once::new();

/// Route engine logs to the test harness. Set `RUST_LOG=osaka_engine=debug`
/// to see them.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A throwaway workspace directory.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        init_tracing();
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    pub fn write(&self, relative: &str, content: &str) -> ContentHash {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        ContentHash::of(content.as_bytes())
    }

    /// Content of a file, `None` when it does not exist.
    pub fn read(&self, relative: &str) -> Option<String> {
        fs::read_to_string(self.path(relative)).ok()
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.path(relative).exists()
    }

    pub fn open(&self) -> Engine {
        Engine::open_with_config(self.root(), EngineConfig::default()).unwrap()
    }

    pub fn open_with(&self, config: EngineConfig) -> Engine {
        Engine::open_with_config(self.root(), config).unwrap()
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.path(".osaka/objects")
    }

    pub fn log_path(&self) -> PathBuf {
        self.path(".osaka/transactions.jsonl")
    }

    /// Number of content objects stored on disk.
    pub fn object_count(&self) -> usize {
        let Ok(fanout) = fs::read_dir(self.objects_dir()) else {
            return 0;
        };
        fanout
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .map(|entry| fs::read_dir(entry.path()).map(|d| d.count()).unwrap_or(0))
            .sum()
    }
}
