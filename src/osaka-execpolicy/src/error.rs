//! Error types for the command gate.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while parsing commands or loading rule sets.
///
/// Classification itself never fails: a command that cannot be parsed is
/// classified `needs-confirmation`.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Invalid command format
    #[error("invalid command format: {0}")]
    InvalidCommand(String),

    /// The rule set document could not be parsed
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// A rule is structurally invalid
    #[error("rule '{rule}' is invalid: {message}")]
    RuleParsingError { rule: String, message: String },

    /// The rule file could not be read
    #[error("failed to read rule file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
