//! Engine configuration.
//!
//! Loaded from `osaka.toml` at the workspace root when present, then
//! overridden from the environment.

use crate::error::{EngineError, Result};
use osaka_apply_patch::MatchConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the optional config file at the workspace root.
pub const CONFIG_FILE: &str = "osaka.toml";

/// Default state directory, relative to the workspace root.
pub const DEFAULT_STATE_DIR: &str = ".osaka";

/// Default cap on undo history.
pub const DEFAULT_MAX_UNDO_DEPTH: usize = 50;

/// Default timeout for the bundled shell executor.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

const ENV_STATE_DIR: &str = "OSAKA_STATE_DIR";
const ENV_MAX_UNDO_DEPTH: &str = "OSAKA_MAX_UNDO_DEPTH";

const OBJECTS_DIR: &str = "objects";
const LOG_FILE: &str = "transactions.jsonl";

/// Configuration for an [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Where snapshots and the transaction log live. Relative paths are
    /// resolved against the workspace root.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Undo entries kept before the oldest is pruned.
    #[serde(default = "default_max_undo_depth")]
    pub max_undo_depth: usize,

    /// Tolerance when locating hunks in drifted files.
    #[serde(default)]
    pub match_options: MatchConfig,

    /// Rule file replacing the built-in command rules.
    #[serde(default)]
    pub command_rules: Option<PathBuf>,

    /// Timeout for the bundled shell executor.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_DIR)
}

fn default_max_undo_depth() -> usize {
    DEFAULT_MAX_UNDO_DEPTH
}

fn default_command_timeout_secs() -> u64 {
    DEFAULT_COMMAND_TIMEOUT.as_secs()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            max_undo_depth: DEFAULT_MAX_UNDO_DEPTH,
            match_options: MatchConfig::default(),
            command_rules: None,
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT.as_secs(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `osaka.toml` under `root` if it exists, then apply environment
    /// overrides.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        let config = match std::fs::read_to_string(&path) {
            Ok(document) => Self::from_toml_str(&document)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(EngineError::io(path, e)),
        };
        config.with_env_overrides()
    }

    pub fn from_toml_str(document: &str) -> Result<Self> {
        let config: Self = toml::from_str(document)
            .map_err(|e| EngineError::Config(format!("{CONFIG_FILE}: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `OSAKA_STATE_DIR` and `OSAKA_MAX_UNDO_DEPTH`.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(dir) = lookup(ENV_STATE_DIR).filter(|v| !v.is_empty()) {
            self.state_dir = PathBuf::from(dir);
        }
        if let Some(depth) = lookup(ENV_MAX_UNDO_DEPTH).filter(|v| !v.is_empty()) {
            self.max_undo_depth = depth.trim().parse().map_err(|_| {
                EngineError::Config(format!("{ENV_MAX_UNDO_DEPTH} must be a number, got {depth:?}"))
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_undo_depth == 0 {
            return Err(EngineError::Config(
                "max_undo_depth must be at least 1".to_string(),
            ));
        }
        if self.command_timeout_secs == 0 {
            return Err(EngineError::Config(
                "command_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.state_dir.as_os_str().is_empty() {
            return Err(EngineError::Config("state_dir must not be empty".to_string()));
        }
        Ok(())
    }

    /// Builder: set the state directory.
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    /// Builder: set the undo depth cap.
    pub fn with_max_undo_depth(mut self, depth: usize) -> Self {
        self.max_undo_depth = depth;
        self
    }

    /// Builder: set hunk matching tolerance.
    pub fn with_match_options(mut self, options: MatchConfig) -> Self {
        self.match_options = options;
        self
    }

    /// Builder: use a rule file instead of the built-in rules.
    pub fn with_command_rules(mut self, path: impl Into<PathBuf>) -> Self {
        self.command_rules = Some(path.into());
        self
    }

    /// Builder: set the shell executor timeout.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Absolute state directory for the workspace at `root`.
    pub fn state_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.state_dir)
    }

    pub fn objects_dir(&self, root: &Path) -> PathBuf {
        self.state_dir(root).join(OBJECTS_DIR)
    }

    pub fn log_path(&self, root: &Path) -> PathBuf {
        self.state_dir(root).join(LOG_FILE)
    }

    /// Rule file location, resolved against `root`.
    pub fn command_rules_path(&self, root: &Path) -> Option<PathBuf> {
        self.command_rules.as_ref().map(|p| root.join(p))
    }
}
