//! Advisory finish-phrase recognition.
//!
//! A match hints that a command has likely finished. It never drives a state
//! transition by itself; completion always comes from prompt re-appearance or
//! process exit plus the quiet window.

use regex::{Regex, RegexBuilder};
use std::sync::OnceLock;

use crate::ansi::strip_sgr;

const FINISH_PATTERNS: &[&str] = &[
    r"[✔✓]",
    r"\bsuccess\b",
    r"\bdone\b",
    r"\bcompleted\b",
    r"\ball tests passed\b",
    r"\b(added|audited) \d+ packages\b",
    r"\bup to date\b",
    r"\bbuilt successfully\b",
    r"\bbuild succeeded\b",
    r"\bbuild failed\b",
    r"listening on https?://",
    r"running on https?://",
    r"\bpublished\b",
    r"\bpushed\b",
    r"\bdone in \d+(\.\d+)?s\b",
    r"\btotal time: [\d.]+\s*[smh]",
];

fn finish_regexes() -> &'static Vec<Regex> {
    static REGEXES: OnceLock<Vec<Regex>> = OnceLock::new();
    REGEXES.get_or_init(|| {
        FINISH_PATTERNS
            .iter()
            .map(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .expect("finish-phrase regex is valid")
            })
            .collect()
    })
}

/// True when the line matches a known command-completion idiom.
pub fn looks_finished(line: &str) -> bool {
    let stripped = strip_sgr(line);
    finish_regexes().iter().any(|re| re.is_match(&stripped))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_completion_glyphs_and_words() {
        assert!(looks_finished("✔ compiled"));
        assert!(looks_finished("✓ 12 checks"));
        assert!(looks_finished("Success"));
        assert!(looks_finished("Done."));
        assert!(looks_finished("Completed in 3 steps"));
        assert!(looks_finished("All tests passed"));
    }

    #[test]
    fn recognizes_package_manager_phrases() {
        assert!(looks_finished("added 231 packages in 4s"));
        assert!(looks_finished("audited 512 packages"));
        assert!(looks_finished("everything is up to date"));
    }

    #[test]
    fn recognizes_build_and_server_phrases() {
        assert!(looks_finished("Project built successfully"));
        assert!(looks_finished("Build succeeded"));
        assert!(looks_finished("BUILD FAILED"));
        assert!(looks_finished("Listening on http://127.0.0.1:3000"));
        assert!(looks_finished("Running on https://0.0.0.0:8443"));
    }

    #[test]
    fn recognizes_publish_push_and_timing_phrases() {
        assert!(looks_finished("published my-pkg@1.2.3"));
        assert!(looks_finished("pushed 3 refs"));
        assert!(looks_finished("done in 12.4s"));
        assert!(looks_finished("Total time: 92 s"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert!(looks_finished("DONE"));
        assert!(looks_finished("bUiLd SuCcEeDeD"));
    }

    #[test]
    fn ignores_ordinary_output() {
        assert!(!looks_finished("compiling module 3 of 7"));
        assert!(!looks_finished("downloading..."));
        assert!(!looks_finished(""));
    }

    #[test]
    fn sees_through_sgr_colors() {
        assert!(looks_finished("\u{1b}[32mBuild succeeded\u{1b}[0m"));
    }
}
