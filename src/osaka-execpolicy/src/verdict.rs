//! Classification results.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Safety classification of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    /// May run without asking.
    Safe,
    /// Requires explicit confirmation from the user.
    NeedsConfirmation,
    /// Must never run.
    Unsafe,
}

impl Classification {
    /// Combine two classifications, taking the most restrictive.
    pub fn combine(self, other: Classification) -> Classification {
        self.max(other)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Safe => write!(f, "safe"),
            Self::NeedsConfirmation => write!(f, "needs-confirmation"),
            Self::Unsafe => write!(f, "unsafe"),
        }
    }
}

/// The gate's verdict on one command string. Ephemeral, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandVerdict {
    pub command: String,
    pub classification: Classification,
    /// Name of the deciding rule(s), if any rule decided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,
    /// Human-readable explanation.
    pub reason: String,
}

impl CommandVerdict {
    pub fn is_safe(&self) -> bool {
        self.classification == Classification::Safe
    }

    pub fn is_unsafe(&self) -> bool {
        self.classification == Classification::Unsafe
    }

    pub fn requires_confirmation(&self) -> bool {
        self.classification == Classification::NeedsConfirmation
    }

    /// Whether an executor may run the command given the user's answer.
    pub fn permits_execution(&self, confirmed: bool) -> bool {
        match self.classification {
            Classification::Safe => true,
            Classification::NeedsConfirmation => confirmed,
            Classification::Unsafe => false,
        }
    }
}

impl fmt::Display for CommandVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.classification, self.reason)?;
        if let Some(rule) = &self.matched_rule {
            write!(f, " [{rule}]")?;
        }
        Ok(())
    }
}
