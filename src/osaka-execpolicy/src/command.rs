//! Command parsing for the gate.

use crate::error::PolicyError;
use crate::rules::WrapperRule;
use crate::segment::Redirect;
use std::collections::VecDeque;

/// Words that introduce or close shell compound commands. They are skipped
/// so that `if x; then rm -rf /; fi` still exposes `rm` as the program.
const SHELL_KEYWORDS: &[&str] = &[
    "{", "}", "!", "if", "then", "elif", "else", "fi", "while", "until", "do", "done", "time",
];

/// One simple command with separated program and arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// The program as written.
    pub program: String,

    /// The base name of the program (without path).
    pub program_basename: String,

    /// All arguments, unquoted.
    pub args: Vec<String>,

    /// Segment text the command was parsed from.
    pub raw: String,

    /// Redirections attached to this command.
    pub redirects: Vec<Redirect>,
}

impl ParsedCommand {
    /// Build a command from already split words.
    pub fn from_args(args: &[String]) -> Result<Self, PolicyError> {
        let Some((program, rest)) = args.split_first() else {
            return Err(PolicyError::InvalidCommand("empty command".to_string()));
        };

        let program_basename = program
            .rsplit(['/', '\\'])
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(program.as_str())
            .to_string();

        Ok(Self {
            program: program.clone(),
            program_basename,
            args: rest.to_vec(),
            raw: args.join(" "),
            redirects: Vec::new(),
        })
    }

    /// Parse one simple command. Unbalanced quoting is an error, never
    /// guessed around.
    pub fn from_shell_string(cmd: &str) -> Result<Self, PolicyError> {
        let trimmed = cmd.trim();
        if trimmed.is_empty() {
            return Err(PolicyError::InvalidCommand("empty command".to_string()));
        }

        let words = shlex::split(trimmed)
            .ok_or_else(|| PolicyError::InvalidCommand(format!("cannot tokenize: {trimmed}")))?;
        let words: Vec<String> = words
            .into_iter()
            .skip_while(|w| SHELL_KEYWORDS.contains(&w.as_str()))
            .collect();

        let mut parsed = Self::from_args(&words)?;
        parsed.raw = trimmed.to_string();
        Ok(parsed)
    }

    /// Attach redirections extracted by the splitter.
    pub fn with_redirects(mut self, redirects: Vec<Redirect>) -> Self {
        self.redirects = redirects;
        self
    }

    /// Check if an argument is present (exact match).
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Check if a flag is present (handles -x, --xxx, -xyz formats).
    pub fn has_flag(&self, short: Option<char>, long: Option<&str>) -> bool {
        self.args.iter().any(|arg| {
            if let Some(l) = long
                && (arg == &format!("--{l}") || arg.starts_with(&format!("--{l}=")))
            {
                return true;
            }

            if let Some(s) = short {
                if arg == &format!("-{s}") {
                    return true;
                }
                // Combined short flags: -xyz (contains -x)
                if arg.starts_with('-') && !arg.starts_with("--") && arg[1..].contains(s) {
                    return true;
                }
            }
            false
        })
    }

    /// Check a flag written the way rule files write it: `-r` (short,
    /// possibly combined), `--recursive` (long), or `-delete` (exact).
    pub fn flag_present(&self, flag: &str) -> bool {
        if let Some(long) = flag.strip_prefix("--") {
            return self.has_flag(None, Some(long));
        }
        let mut chars = flag.chars();
        match (chars.next(), chars.next(), chars.next()) {
            (Some('-'), Some(short), None) => self.has_flag(Some(short), None),
            _ => self.has_arg(flag),
        }
    }

    /// The argument following `flag`, or the value of `--flag=value`.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        for (i, arg) in self.args.iter().enumerate() {
            if arg == flag {
                return self.args.get(i + 1).map(String::as_str);
            }
            if flag.starts_with("--")
                && let Some(value) = arg.strip_prefix(flag).and_then(|r| r.strip_prefix('='))
            {
                return Some(value);
            }
        }
        None
    }

    /// The command `wrapper` runs when this command is an invocation of
    /// it, or `None` if no inner command is named (`env` alone prints the
    /// environment). Redirections carry over to the inner command.
    pub fn inner_command(&self, wrapper: &WrapperRule) -> Result<Option<Self>, PolicyError> {
        let mut words: VecDeque<String> = self.args.iter().cloned().collect();
        let mut operands = wrapper.leading_operands;
        let mut options_done = false;

        while let Some(word) = words.pop_front() {
            if !options_done && word.starts_with('-') {
                if word == "--" {
                    options_done = true;
                    continue;
                }
                if let Some(value) = split_flag_value(wrapper, &word, &mut words) {
                    let split = shlex::split(&value).ok_or_else(|| {
                        PolicyError::InvalidCommand(format!("cannot tokenize: {value}"))
                    })?;
                    for inner in split.into_iter().rev() {
                        words.push_front(inner);
                    }
                    continue;
                }
                if wrapper.value_flags.contains(&word) {
                    words.pop_front();
                }
                continue;
            }
            if wrapper.assignments && is_assignment(&word) {
                continue;
            }
            if operands > 0 {
                operands -= 1;
                options_done = true;
                continue;
            }

            words.push_front(word);
            let argv: Vec<String> = words.into();
            let inner = Self::from_args(&argv)?.with_redirects(self.redirects.clone());
            return Ok(Some(inner));
        }
        Ok(None)
    }

    /// Non-flag arguments.
    pub fn positional_args(&self) -> Vec<&str> {
        self.args
            .iter()
            .filter(|a| !a.starts_with('-'))
            .map(String::as_str)
            .collect()
    }

    /// Arguments that may name files: positional arguments, with `key=value`
    /// operands (`dd of=/dev/sda`) reduced to their value.
    pub fn path_args(&self) -> Vec<&str> {
        self.positional_args()
            .into_iter()
            .map(|arg| match arg.split_once('=') {
                Some((key, value)) if !key.is_empty() && !key.contains('/') => value,
                _ => arg,
            })
            .collect()
    }
}

/// The value of a split flag written as `-S value`, `-Svalue` or
/// `--split-string=value`.
fn split_flag_value(
    wrapper: &WrapperRule,
    word: &str,
    rest: &mut VecDeque<String>,
) -> Option<String> {
    for flag in &wrapper.split_flags {
        if word == flag.as_str() {
            return Some(rest.pop_front().unwrap_or_default());
        }
        let attached = if flag.starts_with("--") {
            word.strip_prefix(flag.as_str()).and_then(|r| r.strip_prefix('='))
        } else {
            word.strip_prefix(flag.as_str())
        };
        if let Some(value) = attached {
            return Some(value.to_string());
        }
    }
    None
}

/// `NAME=value` with a shell variable name.
fn is_assignment(word: &str) -> bool {
    let Some((name, _)) = word.split_once('=') else {
        return false;
    };
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
