//! SGR escape stripping and spinner-frame recognition.
//!
//! Classification heuristics look at cleaned text; the session buffer always
//! keeps the raw bytes untouched.

use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;

const SPINNER_CHARS: [char; 4] = ['|', '/', '-', '\\'];

fn sgr_regex() -> &'static Regex {
    static SGR_RE: OnceLock<Regex> = OnceLock::new();
    SGR_RE.get_or_init(|| Regex::new("\u{1b}\\[[0-9;]*m").expect("SGR regex is valid"))
}

/// Remove SGR color/style sequences (`ESC [ <digits-and-semicolons> m`).
/// Other CSI sequences are left alone.
pub fn strip_sgr(line: &str) -> Cow<'_, str> {
    sgr_regex().replace_all(line, "")
}

/// True when `next` is a spinner repaint of `prev`: after stripping SGR and
/// trailing whitespace both lines have the same length, both end in one of
/// `| / - \`, and they are identical everywhere else.
pub fn is_spinner_frame(prev: &str, next: &str) -> bool {
    let prev = strip_sgr(prev);
    let next = strip_sgr(next);
    let prev: Vec<char> = prev.trim_end().chars().collect();
    let next: Vec<char> = next.trim_end().chars().collect();

    if prev.is_empty() || prev.len() != next.len() {
        return false;
    }

    let last = prev.len() - 1;
    SPINNER_CHARS.contains(&prev[last])
        && SPINNER_CHARS.contains(&next[last])
        && prev[..last] == next[..last]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_sgr_sequences() {
        assert_eq!(strip_sgr("\u{1b}[1;32mok\u{1b}[0m"), "ok");
        assert_eq!(strip_sgr("plain"), "plain");
    }

    #[test]
    fn leaves_non_sgr_csi_alone() {
        // Cursor movement is not SGR and must survive.
        assert_eq!(strip_sgr("\u{1b}[2Khello"), "\u{1b}[2Khello");
    }

    #[test]
    fn detects_successive_spinner_frames() {
        assert!(is_spinner_frame("working |", "working /"));
        assert!(is_spinner_frame("working /", "working -"));
        assert!(is_spinner_frame("working -", "working \\"));
        assert!(is_spinner_frame("working \\", "working |"));
    }

    #[test]
    fn spinner_detection_ignores_ansi_and_trailing_whitespace() {
        assert!(is_spinner_frame("\u{1b}[36mworking |\u{1b}[0m", "working /  "));
    }

    #[test]
    fn rejects_non_spinner_pairs() {
        assert!(!is_spinner_frame("working |", "done"));
        assert!(!is_spinner_frame("working x", "working /"));
        assert!(!is_spinner_frame("working |", "working  /"));
        assert!(!is_spinner_frame("", "|"));
        assert!(!is_spinner_frame("working |", "finished /"));
    }

    #[test]
    fn identical_repaint_counts_as_spinner() {
        assert!(is_spinner_frame("busy -", "busy -"));
    }
}
