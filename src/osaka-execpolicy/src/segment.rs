//! Splitting a shell command line into simple commands.
//!
//! The splitter understands just enough shell to find segment boundaries
//! (`;`, `&&`, `||`, `|`, `&`, newlines, subshell parentheses), redirections
//! and command substitutions. Quoting is respected; everything else is left
//! for `shlex` to tokenize per segment.

use crate::error::PolicyError;
use serde::Serialize;

/// Stand-in for a substituted value. Contains `$` so path checks treat it
/// as unknown.
pub(crate) const SUBSTITUTION_PLACEHOLDER: &str = "$()";

/// Direction of a redirection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectKind {
    /// `< file`
    Input,
    /// `> file`, `&> file`, `>| file`
    Output,
    /// `>> file`
    Append,
}

impl RedirectKind {
    pub fn writes(self) -> bool {
        matches!(self, Self::Output | Self::Append)
    }
}

/// A redirection with its target word.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Redirect {
    pub kind: RedirectKind,
    pub target: String,
}

/// One simple command with its redirections removed from the text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Segment {
    pub text: String,
    pub redirects: Vec<Redirect>,
}

/// A command line split into segments.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShellScript {
    pub segments: Vec<Segment>,
    /// Bodies of `$(...)` and backtick substitutions, in order of appearance.
    pub substitutions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quote {
    Single,
    Double,
}

struct Splitter {
    chars: Vec<char>,
    pos: usize,
    current: Segment,
    script: ShellScript,
}

/// Split `raw` into segments.
///
/// Fails on unterminated quotes or substitutions and on redirections
/// without a target.
pub fn split_script(raw: &str) -> Result<ShellScript, PolicyError> {
    let mut splitter = Splitter {
        chars: raw.chars().collect(),
        pos: 0,
        current: Segment::default(),
        script: ShellScript::default(),
    };
    splitter.run()?;
    Ok(splitter.script)
}

impl Splitter {
    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn at_word_start(&self) -> bool {
        self.current
            .text
            .chars()
            .last()
            .is_none_or(|c| c.is_whitespace())
    }

    fn run(&mut self) -> Result<(), PolicyError> {
        let mut quote: Option<Quote> = None;

        while let Some(c) = self.peek(0) {
            match quote {
                Some(Quote::Single) => {
                    self.current.text.push(c);
                    if c == '\'' {
                        quote = None;
                    }
                    self.pos += 1;
                }
                Some(Quote::Double) => match c {
                    '\\' => self.push_escaped(),
                    '"' => {
                        self.current.text.push(c);
                        quote = None;
                        self.pos += 1;
                    }
                    '$' if self.peek(1) == Some('(') => self.capture_dollar_paren()?,
                    '`' => self.capture_backtick()?,
                    _ => {
                        self.current.text.push(c);
                        self.pos += 1;
                    }
                },
                None => match c {
                    '\\' => self.push_escaped(),
                    '\'' => {
                        quote = Some(Quote::Single);
                        self.current.text.push(c);
                        self.pos += 1;
                    }
                    '"' => {
                        quote = Some(Quote::Double);
                        self.current.text.push(c);
                        self.pos += 1;
                    }
                    '$' if self.peek(1) == Some('(') => self.capture_dollar_paren()?,
                    '`' => self.capture_backtick()?,
                    '#' if self.at_word_start() => {
                        while let Some(c) = self.peek(0) {
                            if c == '\n' {
                                break;
                            }
                            self.pos += 1;
                        }
                    }
                    ';' | '\n' | '(' | ')' => {
                        self.finish_segment();
                        self.pos += 1;
                    }
                    '&' => match self.peek(1) {
                        Some('&') => {
                            self.finish_segment();
                            self.pos += 2;
                        }
                        Some('>') => {
                            self.pos += 2;
                            let kind = if self.peek(0) == Some('>') {
                                self.pos += 1;
                                RedirectKind::Append
                            } else {
                                RedirectKind::Output
                            };
                            self.read_redirect_target(kind)?;
                        }
                        _ => {
                            self.finish_segment();
                            self.pos += 1;
                        }
                    },
                    '|' => {
                        self.finish_segment();
                        self.pos += match self.peek(1) {
                            Some('|') | Some('&') => 2,
                            _ => 1,
                        };
                    }
                    '>' | '<' => self.read_redirect(c)?,
                    _ => {
                        self.current.text.push(c);
                        self.pos += 1;
                    }
                },
            }
        }

        if quote.is_some() {
            return Err(PolicyError::InvalidCommand("unterminated quote".to_string()));
        }
        self.finish_segment();
        Ok(())
    }

    fn push_escaped(&mut self) {
        self.current.text.push('\\');
        if let Some(next) = self.peek(1) {
            self.current.text.push(next);
        }
        self.pos += 2;
    }

    fn finish_segment(&mut self) {
        let segment = std::mem::take(&mut self.current);
        if !segment.text.trim().is_empty() || !segment.redirects.is_empty() {
            self.script.segments.push(Segment {
                text: segment.text.trim().to_string(),
                redirects: segment.redirects,
            });
        }
    }

    fn read_redirect(&mut self, op: char) -> Result<(), PolicyError> {
        // A lone digit word before the operator is a file descriptor.
        let chars: Vec<char> = self.current.text.chars().collect();
        if let Some((&last, rest)) = chars.split_last()
            && last.is_ascii_digit()
            && rest.last().is_none_or(|c| c.is_whitespace())
        {
            self.current.text.pop();
        }

        self.pos += 1;
        let kind = if op == '<' {
            if self.peek(0) == Some('<') {
                self.pos += 1;
                // Here-strings (`<<<`) carry a word, not a file.
                if self.peek(0) == Some('<') {
                    self.pos += 1;
                }
            }
            RedirectKind::Input
        } else {
            match self.peek(0) {
                Some('>') => {
                    self.pos += 1;
                    RedirectKind::Append
                }
                Some('|') => {
                    self.pos += 1;
                    RedirectKind::Output
                }
                Some('&') => {
                    // `2>&1` duplicates a descriptor and names no file.
                    self.pos += 1;
                    while self.peek(0).is_some_and(|c| c.is_ascii_digit() || c == '-') {
                        self.pos += 1;
                    }
                    return Ok(());
                }
                _ => RedirectKind::Output,
            }
        };

        self.read_redirect_target(kind)
    }

    fn read_redirect_target(&mut self, kind: RedirectKind) -> Result<(), PolicyError> {
        while self.peek(0).is_some_and(|c| c == ' ' || c == '\t') {
            self.pos += 1;
        }

        let mut word = String::new();
        let mut quote: Option<char> = None;
        while let Some(c) = self.peek(0) {
            match quote {
                Some(q) if c == q => quote = None,
                Some(_) => word.push(c),
                None if c == '\'' || c == '"' => quote = Some(c),
                None if c.is_whitespace() || ";&|<>()".contains(c) => break,
                None => word.push(c),
            }
            self.pos += 1;
        }

        if quote.is_some() {
            return Err(PolicyError::InvalidCommand("unterminated quote".to_string()));
        }
        if word.is_empty() {
            return Err(PolicyError::InvalidCommand(
                "redirection without a target".to_string(),
            ));
        }

        self.current.redirects.push(Redirect { kind, target: word });
        Ok(())
    }

    fn capture_dollar_paren(&mut self) -> Result<(), PolicyError> {
        let start = self.pos + 2;
        let mut depth = 1usize;
        let mut quote: Option<char> = None;
        let mut i = start;

        while i < self.chars.len() {
            let c = self.chars[i];
            match quote {
                Some(q) if c == q => quote = None,
                Some(_) => {}
                None => match c {
                    '\'' | '"' => quote = Some(c),
                    '\\' => i += 1,
                    '(' => depth += 1,
                    ')' => {
                        depth -= 1;
                        if depth == 0 {
                            let body: String = self.chars[start..i].iter().collect();
                            self.script.substitutions.push(body);
                            self.current.text.push_str(SUBSTITUTION_PLACEHOLDER);
                            self.pos = i + 1;
                            return Ok(());
                        }
                    }
                    _ => {}
                },
            }
            i += 1;
        }

        Err(PolicyError::InvalidCommand(
            "unterminated command substitution".to_string(),
        ))
    }

    fn capture_backtick(&mut self) -> Result<(), PolicyError> {
        let start = self.pos + 1;
        let mut i = start;

        while i < self.chars.len() {
            match self.chars[i] {
                '\\' => i += 2,
                '`' => {
                    let body: String = self.chars[start..i].iter().collect();
                    self.script.substitutions.push(body);
                    self.current.text.push_str(SUBSTITUTION_PLACEHOLDER);
                    self.pos = i + 1;
                    return Ok(());
                }
                _ => i += 1,
            }
        }

        Err(PolicyError::InvalidCommand(
            "unterminated backtick substitution".to_string(),
        ))
    }
}
