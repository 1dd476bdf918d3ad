//! Shell-prompt detection at end-of-line.
//!
//! Two calibrated patterns cover the common shells. The first one that
//! matches a line is cached on the session and reused for the rest of the
//! session's lifetime.

use regex::Regex;
use std::sync::OnceLock;

use crate::ansi::strip_sgr;

/// A calibrated prompt pattern.
#[derive(Debug)]
pub struct PromptPattern {
    name: &'static str,
    regex: Regex,
}

impl PromptPattern {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// True when the ANSI-stripped line ends with this prompt.
    pub fn matches(&self, line: &str) -> bool {
        self.regex.is_match(&strip_sgr(line))
    }
}

fn patterns() -> &'static [PromptPattern; 2] {
    static PATTERNS: OnceLock<[PromptPattern; 2]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            PromptPattern {
                name: "powershell",
                regex: Regex::new(r"PS [^>]*> $").expect("powershell prompt regex is valid"),
            },
            PromptPattern {
                name: "posix",
                regex: Regex::new(r"[$#] $").expect("posix prompt regex is valid"),
            },
        ]
    })
}

/// Identify a shell prompt at the end of `line`, if any.
pub fn detect(line: &str) -> Option<&'static PromptPattern> {
    let stripped = strip_sgr(line);
    patterns().iter().find(|p| p.regex.is_match(&stripped))
}
