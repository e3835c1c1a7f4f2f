//! The command gate.

use crate::command::ParsedCommand;
use crate::error::PolicyError;
use crate::paths::PathClassifier;
use crate::rules::{CommandRule, RuleScope, RuleSet, TargetClass, WrapperRule};
use crate::segment::{Segment, split_script};
use crate::verdict::{Classification, CommandVerdict};
use regex::Regex;
use tracing::debug;

/// Shells whose `-c` argument is classified as a nested command line.
const SHELL_WRAPPERS: &[&str] = &["sh", "bash", "zsh", "dash", "ksh"];

/// Nesting limit for `sh -c` and command substitutions.
const MAX_NESTING: usize = 4;

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: CommandRule,
    pattern: Option<Regex>,
}

impl CompiledRule {
    fn compile(rule: CommandRule) -> Result<Self, PolicyError> {
        rule.validate()?;
        let pattern = rule
            .pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| PolicyError::RuleParsingError {
                rule: rule.name.clone(),
                message: e.to_string(),
            })?;
        Ok(Self { rule, pattern })
    }

    fn matches_command_line(&self, line: &str) -> bool {
        self.rule.scope == RuleScope::Command
            && self.pattern.as_ref().is_some_and(|re| re.is_match(line))
    }

    fn matches_segment(&self, parsed: &ParsedCommand, paths: &PathClassifier) -> bool {
        let rule = &self.rule;
        if rule.scope != RuleScope::Segment {
            return false;
        }

        if !rule.programs.is_empty()
            && !rule
                .programs
                .iter()
                .any(|p| program_matches(p, &parsed.program_basename))
        {
            return false;
        }

        if !rule.subcommands.is_empty() {
            match parsed.positional_args().first() {
                Some(sub) if rule.subcommands.iter().any(|s| s == sub) => {}
                _ => return false,
            }
        }

        if !rule.any_flags.is_empty() && !rule.any_flags.iter().any(|f| parsed.flag_present(f)) {
            return false;
        }

        if rule.forbid_flags.iter().any(|f| parsed.flag_present(f)) {
            return false;
        }

        if let Some(class) = rule.targets
            && !parsed.path_args().iter().any(|arg| paths.is(class, arg))
        {
            return false;
        }

        if let Some(class) = rule.redirect_targets
            && !parsed.redirects.iter().any(|r| {
                r.kind.writes()
                    && !paths.is_harmless_redirect(&r.target)
                    && paths.is(class, &r.target)
            })
        {
            return false;
        }

        if let Some(re) = &self.pattern
            && !re.is_match(&parsed.raw)
        {
            return false;
        }

        if rule.confine_to_workspace
            && parsed
                .path_args()
                .iter()
                .any(|arg| paths.is(TargetClass::OutsideWorkspace, arg))
        {
            return false;
        }

        true
    }
}

/// `mkfs.*` matches `mkfs.ext4`; anything else matches exactly.
fn program_matches(pattern: &str, program: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => program.starts_with(prefix),
        None => pattern == program,
    }
}

/// Intermediate result for a piece of a command line.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Finding {
    Denied { rule: String, reason: String },
    Unmatched { reason: String },
    Allowed { rules: Vec<String> },
}

impl Finding {
    fn unmatched(reason: impl Into<String>) -> Self {
        Self::Unmatched {
            reason: reason.into(),
        }
    }

    /// Keep the most restrictive finding; the first one wins a tie.
    fn combine(self, other: Finding) -> Finding {
        match (self, other) {
            (denied @ Self::Denied { .. }, _) | (_, denied @ Self::Denied { .. }) => denied,
            (unmatched @ Self::Unmatched { .. }, _) | (_, unmatched @ Self::Unmatched { .. }) => {
                unmatched
            }
            (Self::Allowed { mut rules }, Self::Allowed { rules: more }) => {
                for rule in more {
                    if !rules.contains(&rule) {
                        rules.push(rule);
                    }
                }
                Self::Allowed { rules }
            }
        }
    }

    fn is_denied(&self) -> bool {
        matches!(self, Self::Denied { .. })
    }
}

/// Classifies command strings against a rule set.
///
/// Classification is a pure function of the command string and the rules:
/// nothing is executed and nothing outside the gate is read.
#[derive(Debug, Clone)]
pub struct CommandGate {
    deny: Vec<CompiledRule>,
    allow: Vec<CompiledRule>,
    wrappers: Vec<WrapperRule>,
    paths: PathClassifier,
}

impl CommandGate {
    /// Compile a rule set into a gate.
    pub fn new(rules: RuleSet) -> Result<Self, PolicyError> {
        rules.wrappers.iter().try_for_each(WrapperRule::validate)?;
        let paths = PathClassifier::new(&rules);
        let deny = rules
            .deny
            .into_iter()
            .map(CompiledRule::compile)
            .collect::<Result<Vec<_>, _>>()?;
        let allow = rules
            .allow
            .into_iter()
            .map(CompiledRule::compile)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            deny,
            allow,
            wrappers: rules.wrappers,
            paths,
        })
    }

    /// Gate with the built-in rules.
    pub fn builtin() -> Result<Self, PolicyError> {
        Self::new(RuleSet::builtin()?)
    }

    /// Classify `command`. Total: every input gets a verdict, and anything
    /// not positively allowed is at least `needs-confirmation`.
    pub fn classify(&self, command: &str) -> CommandVerdict {
        let finding = self.evaluate(command, 0);

        let (classification, matched_rule, reason) = match finding {
            Finding::Denied { rule, reason } => (Classification::Unsafe, Some(rule), reason),
            Finding::Unmatched { reason } => (Classification::NeedsConfirmation, None, reason),
            Finding::Allowed { rules } if rules.is_empty() => (
                Classification::NeedsConfirmation,
                None,
                "command contains nothing to run".to_string(),
            ),
            Finding::Allowed { rules } => (
                Classification::Safe,
                Some(rules.join(", ")),
                "every command matches an allow rule".to_string(),
            ),
        };

        debug!(
            command,
            classification = %classification,
            rule = matched_rule.as_deref(),
            "classified command"
        );
        CommandVerdict {
            command: command.to_string(),
            classification,
            matched_rule,
            reason,
        }
    }

    fn evaluate(&self, line: &str, depth: usize) -> Finding {
        if depth > MAX_NESTING {
            return Finding::unmatched("command nesting is too deep to analyze");
        }
        if line.trim().is_empty() {
            return Finding::unmatched("empty command");
        }

        if let Some(rule) = self.deny.iter().find(|r| r.matches_command_line(line)) {
            return denied(&rule.rule, line);
        }

        let script = match split_script(line) {
            Ok(script) => script,
            Err(e) => return Finding::unmatched(format!("cannot analyze command: {e}")),
        };

        let mut finding = Finding::Allowed { rules: Vec::new() };

        for substitution in &script.substitutions {
            finding = finding.combine(self.evaluate(substitution, depth + 1));
            if finding.is_denied() {
                return finding;
            }
        }

        for segment in &script.segments {
            finding = finding.combine(self.evaluate_segment(segment, depth));
            if finding.is_denied() {
                return finding;
            }
        }

        finding
    }

    fn evaluate_segment(&self, segment: &Segment, depth: usize) -> Finding {
        let parsed = if segment.text.is_empty() {
            // A bare redirection such as `> file` truncates like `:`.
            ParsedCommand::from_args(&[":".to_string()])
        } else {
            ParsedCommand::from_shell_string(&segment.text)
        };
        let parsed = match parsed {
            Ok(parsed) => parsed.with_redirects(segment.redirects.clone()),
            // Only shell keywords (`fi`, `done`) and no redirections.
            Err(_) if segment.redirects.is_empty() && is_only_keywords(&segment.text) => {
                return Finding::Allowed { rules: Vec::new() };
            }
            Err(e) => return Finding::unmatched(format!("cannot analyze `{}`: {e}", segment.text)),
        };

        let (inner, wrappers, hidden_args) = match self.unwrap_wrappers(parsed) {
            Ok(unwrapped) => unwrapped,
            Err(e) => return Finding::unmatched(format!("cannot analyze `{}`: {e}", segment.text)),
        };

        if let Some(rule) = wrappers.iter().chain(std::iter::once(&inner)).find_map(|layer| {
            self.deny
                .iter()
                .find(|r| r.matches_segment(layer, &self.paths))
        }) {
            return denied(&rule.rule, &segment.text);
        }

        match (self.evaluate_command(&inner, depth), hidden_args) {
            (Finding::Allowed { .. }, Some(program)) => Finding::unmatched(format!(
                "`{program}` passes `{}` arguments that cannot be inspected",
                inner.program_basename
            )),
            (finding, _) => finding,
        }
    }

    /// Strip wrapper programs. Returns the inner command, the wrappers
    /// around it (outermost first) and the first wrapper that feeds the
    /// inner command hidden arguments.
    fn unwrap_wrappers(
        &self,
        mut parsed: ParsedCommand,
    ) -> Result<(ParsedCommand, Vec<ParsedCommand>, Option<String>), PolicyError> {
        let mut outer = Vec::new();
        let mut hidden_args = None;

        while let Some(wrapper) = self.wrappers.iter().find(|w| {
            w.programs
                .iter()
                .any(|p| program_matches(p, &parsed.program_basename))
        }) {
            if outer.len() > MAX_NESTING {
                return Err(PolicyError::InvalidCommand(
                    "wrapper programs are nested too deeply".to_string(),
                ));
            }
            let Some(inner) = parsed.inner_command(wrapper)? else {
                break;
            };
            if wrapper.hidden_args && hidden_args.is_none() {
                hidden_args = Some(parsed.program_basename.clone());
            }
            outer.push(std::mem::replace(&mut parsed, inner));
        }

        Ok((parsed, outer, hidden_args))
    }

    /// Classify one unwrapped command that no deny rule matched.
    fn evaluate_command(&self, parsed: &ParsedCommand, depth: usize) -> Finding {
        if let Some(redirect) = parsed.redirects.iter().find(|r| {
            !self.paths.is_harmless_redirect(&r.target)
                && self.paths.is(TargetClass::OutsideWorkspace, &r.target)
        }) {
            return Finding::unmatched(format!(
                "redirection to `{}` leaves the working directory",
                redirect.target
            ));
        }

        if SHELL_WRAPPERS.contains(&parsed.program_basename.as_str())
            && let Some(inner) = parsed.flag_value("-c")
        {
            return self.evaluate(inner, depth + 1);
        }

        if parsed.program == ":" {
            return Finding::Allowed { rules: Vec::new() };
        }

        match self
            .allow
            .iter()
            .find(|r| r.matches_segment(parsed, &self.paths))
        {
            Some(rule) => Finding::Allowed {
                rules: vec![rule.rule.name.clone()],
            },
            None => Finding::unmatched(format!("no allow rule covers `{}`", parsed.raw)),
        }
    }
}

fn denied(rule: &CommandRule, text: &str) -> Finding {
    let reason = if rule.reason.is_empty() {
        format!("matched deny rule in `{}`", text.trim())
    } else {
        format!("{} in `{}`", rule.reason, text.trim())
    };
    Finding::Denied {
        rule: rule.name.clone(),
        reason,
    }
}

fn is_only_keywords(text: &str) -> bool {
    text.split_whitespace()
        .all(|w| matches!(w, "fi" | "done" | "}" | "else" | "then" | "do" | "{" | "!"))
}
