#![allow(clippy::missing_errors_doc, clippy::doc_markdown)]
//! Osaka Execpolicy - rule-driven classification of shell commands.
//!
//! Every command string gets exactly one classification:
//! - `safe` - may run without asking
//! - `needs-confirmation` - may run only after the user confirms
//! - `unsafe` - must never run
//!
//! Rules are declarative TOML (see `default_rules.toml`). A command line is
//! split into simple commands; it is `unsafe` if any deny rule matches any
//! part of it, `safe` only if every part matches an allow rule, and
//! `needs-confirmation` otherwise. Input the gate cannot analyze (unbalanced
//! quotes, runaway nesting) is never `safe`.
//!
//! ```text
//!   command line
//!        │
//!        ├── whole-line deny patterns (fork bombs, curl | sh) ──► UNSAFE
//!        │
//!        ▼
//!   split into segments + substitutions
//!        │
//!        ├── any segment matches a deny rule ─────────────────► UNSAFE
//!        ├── any segment unmatched / unparseable ─────────────► NEEDS-CONFIRMATION
//!        ▼
//!      SAFE
//! ```

#[cfg(test)]
mod tests;

mod command;
mod error;
mod gate;
mod paths;
mod rules;
mod segment;
mod verdict;

pub use command::ParsedCommand;
pub use error::PolicyError;
pub use gate::CommandGate;
pub use rules::{CommandRule, RuleScope, RuleSet, TargetClass, WrapperRule};
pub use segment::{Redirect, RedirectKind, Segment, ShellScript, split_script};
pub use verdict::{Classification, CommandVerdict};

/// Quick classification with the built-in rules.
pub fn classify(command: &str) -> Result<CommandVerdict, PolicyError> {
    Ok(CommandGate::builtin()?.classify(command))
}
