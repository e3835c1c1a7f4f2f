//! Declarative rule sets.
//!
//! Rules are data, loaded from TOML. The built-in set ships as
//! `default_rules.toml` and can be replaced wholesale by a user file.

use crate::error::PolicyError;
use serde::{Deserialize, Serialize};
use std::path::Path;

const DEFAULT_RULES: &str = include_str!("default_rules.toml");

/// Path class an argument or redirect target can be tested against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetClass {
    /// One of `sensitive_paths` or inside one.
    Sensitive,
    /// Starts with one of `block_device_prefixes`.
    BlockDevice,
    /// Absolute, home-relative, variable, or climbing out via `..`.
    OutsideWorkspace,
}

/// What a rule's `pattern` is matched against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    /// Each simple command separately.
    #[default]
    Segment,
    /// The whole command line, before splitting.
    Command,
}

/// One deny or allow rule. Every condition that is set must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandRule {
    pub name: String,

    #[serde(default)]
    pub reason: String,

    #[serde(default)]
    pub scope: RuleScope,

    /// Program basenames. A trailing `*` matches any suffix (`mkfs.*`).
    #[serde(default)]
    pub programs: Vec<String>,

    /// Accepted first positional arguments (`git status`).
    #[serde(default)]
    pub subcommands: Vec<String>,

    /// At least one of these flags must be present.
    #[serde(default)]
    pub any_flags: Vec<String>,

    /// None of these flags may be present.
    #[serde(default)]
    pub forbid_flags: Vec<String>,

    /// Some path argument must fall in this class.
    #[serde(default)]
    pub targets: Option<TargetClass>,

    /// Some output redirect target must fall in this class.
    #[serde(default)]
    pub redirect_targets: Option<TargetClass>,

    /// Regular expression over the segment text, or the whole command line
    /// when `scope = "command"`.
    #[serde(default)]
    pub pattern: Option<String>,

    /// No path argument may resolve outside the working directory.
    #[serde(default)]
    pub confine_to_workspace: bool,
}

impl CommandRule {
    /// Reject rules that would match every command.
    pub fn validate(&self) -> Result<(), PolicyError> {
        let invalid = |message: &str| PolicyError::RuleParsingError {
            rule: self.name.clone(),
            message: message.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("rule has no name"));
        }
        if self.scope == RuleScope::Command && self.pattern.is_none() {
            return Err(invalid("command-scoped rules need a pattern"));
        }
        let constrained = !self.programs.is_empty()
            || self.pattern.is_some()
            || self.targets.is_some()
            || self.redirect_targets.is_some();
        if !constrained {
            return Err(invalid(
                "rule sets no programs, pattern or targets and would match everything",
            ));
        }
        Ok(())
    }
}

/// A program that runs another command named in its arguments, such as
/// `env`, `timeout 5` or `xargs`. The gate classifies the inner command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WrapperRule {
    /// Program basenames, matched like [`CommandRule::programs`].
    pub programs: Vec<String>,

    /// Options that consume the following word (`timeout -s KILL`).
    #[serde(default)]
    pub value_flags: Vec<String>,

    /// Options whose value is split into words that precede the rest of the
    /// arguments (`env -S 'rm -rf' /`).
    #[serde(default)]
    pub split_flags: Vec<String>,

    /// Positional operands before the command (`timeout DURATION`).
    #[serde(default)]
    pub leading_operands: usize,

    /// `NAME=value` words before the command are assignments.
    #[serde(default)]
    pub assignments: bool,

    /// The inner command receives arguments the gate cannot see, so it is
    /// never `safe`.
    #[serde(default)]
    pub hidden_args: bool,
}

impl WrapperRule {
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.programs.is_empty() {
            return Err(PolicyError::ConfigurationError(
                "wrapper entry names no programs".to_string(),
            ));
        }
        Ok(())
    }
}

/// A complete rule set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSet {
    /// Filesystem paths that require extra protection.
    #[serde(default)]
    pub sensitive_paths: Vec<String>,

    /// Block device prefixes (for dd, redirect protection).
    #[serde(default)]
    pub block_device_prefixes: Vec<String>,

    /// Redirect targets accepted anywhere, such as `/dev/null`.
    #[serde(default)]
    pub harmless_redirect_targets: Vec<String>,

    /// Any match classifies the command `unsafe`.
    #[serde(default)]
    pub deny: Vec<CommandRule>,

    /// Every segment must match one for the command to be `safe`.
    #[serde(default)]
    pub allow: Vec<CommandRule>,

    /// Programs whose inner command is classified in their place.
    #[serde(default)]
    pub wrappers: Vec<WrapperRule>,
}

impl RuleSet {
    /// The rule set shipped with the crate.
    pub fn builtin() -> Result<Self, PolicyError> {
        Self::from_toml_str(DEFAULT_RULES)
    }

    pub fn from_toml_str(document: &str) -> Result<Self, PolicyError> {
        let rules: Self =
            toml::from_str(document).map_err(|e| PolicyError::ConfigurationError(e.to_string()))?;
        rules.validate()?;
        Ok(rules)
    }

    /// Load a rule file from disk.
    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let document = std::fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&document)
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        self.wrappers.iter().try_for_each(WrapperRule::validate)?;
        self.deny
            .iter()
            .chain(&self.allow)
            .try_for_each(CommandRule::validate)
    }
}
