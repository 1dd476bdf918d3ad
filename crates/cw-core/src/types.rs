use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Liveness classification of a command session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    /// Created but not yet spawned.
    Idle,
    /// Child is alive and has produced output recently.
    Running,
    /// No output past the waiting threshold; likely blocked on input.
    Waiting,
    /// No output past the stuck threshold.
    PossiblyStuck,
    /// Terminal: command finished and the quiet window elapsed.
    Completed,
    /// Terminal: spawn failure, timeout kill, or adapter fault.
    Error,
}

impl SessionStatus {
    /// Returns the wire-facing name for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::PossiblyStuck => "possibly-stuck",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Terminal states are absorbing: no transition leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Signal selection for the `terminal.signal` operation.
///
/// `CtrlC` is synthetic: it writes the byte `0x03` to the adapter instead of
/// delivering an OS signal, which is what an interactive child under a PTY
/// actually expects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalSpec {
    Sigint,
    Sigterm,
    Kill,
    CtrlC,
}

impl SignalSpec {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sigint => "SIGINT",
            Self::Sigterm => "SIGTERM",
            Self::Kill => "KILL",
            Self::CtrlC => "CTRL_C",
        }
    }
}

impl std::str::FromStr for SignalSpec {
    type Err = crate::AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SIGINT" => Ok(Self::Sigint),
            "SIGTERM" => Ok(Self::Sigterm),
            "KILL" | "SIGKILL" => Ok(Self::Kill),
            "CTRL_C" => Ok(Self::CtrlC),
            other => Err(crate::AppError::InvalidSignal(other.to_string())),
        }
    }
}

impl std::fmt::Display for SignalSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Exit information reported by the process adapter.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    /// Exit code, when the child exited normally.
    pub code: Option<i32>,
    /// Signal name, when the child was signal-killed.
    pub signal: Option<String>,
}

/// One element of a tool result's `content` array.
///
/// Tool results are heterogeneous ordered sequences: human-readable text
/// items interleaved with machine-readable JSON items.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentItem {
    Text { text: String },
    Json { json: Value },
}

/// Result payload of a `tools/call` invocation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Vec<ContentItem>,
}

impl ToolResult {
    /// A result with a single text item.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::Text { text: text.into() }],
        }
    }

    /// A result with a text item followed by a JSON item.
    pub fn text_and_json(text: impl Into<String>, json: Value) -> Self {
        Self {
            content: vec![ContentItem::Text { text: text.into() }, ContentItem::Json { json }],
        }
    }
}

/// Payload for a `notifications/progress` frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Tool that produced the update (e.g. `terminal.run`).
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    /// True when no meaningful current/total can be reported.
    #[serde(default)]
    pub indeterminate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressUpdate {
    /// An indeterminate update carrying only a message.
    pub fn message(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            indeterminate: true,
            message: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Record handed to the completion sink once per terminal-state transition.
///
/// Both adapters merge stdout and stderr into one stream, so the merged
/// transcript lands in `stdout` and `stderr` stays empty.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub command: String,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub stdout: String,
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    pub shell: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}
