//! The per-command session entity.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::watch;
use ulid::Ulid;

use cw_core::{CompletionRecord, ExitInfo, SessionStatus};
use cw_process::ProcessAdapter;

use crate::buffer::RollingBuffer;
use crate::prompt::PromptPattern;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_QUIET_MS: u64 = 300;
pub const DEFAULT_WAITING_MS: u64 = 10_000;
pub const DEFAULT_STUCK_MS: u64 = 45_000;
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 2_000_000;

/// Parameters of one `run` invocation.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub command: String,
    pub cwd: Option<PathBuf>,
    /// Shell binary override for this session only.
    pub shell: Option<String>,
    pub env: HashMap<String, String>,
    /// SIGTERM the adapter after this long; 0 disables the timeout.
    pub timeout_ms: u64,
    /// Quiet window after a candidate-complete event.
    pub quiet_ms: u64,
    pub waiting_ms: u64,
    pub stuck_ms: u64,
    pub max_buffer_bytes: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            command: String::new(),
            cwd: None,
            shell: None,
            env: HashMap::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            quiet_ms: DEFAULT_QUIET_MS,
            waiting_ms: DEFAULT_WAITING_MS,
            stuck_ms: DEFAULT_STUCK_MS,
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
        }
    }
}

/// Mutable session bookkeeping, guarded by one mutex so chunk handling,
/// exit handling, timer fires, and snapshots never observe a half-applied
/// transition.
pub(crate) struct SessionState {
    pub status: SessionStatus,
    pub buffer: RollingBuffer,
    /// When the last non-spinner output was observed (or session creation).
    pub last_byte_at: Instant,
    pub last_byte_wall: DateTime<Utc>,
    /// Last classified line, for spinner-frame comparison.
    pub last_line: String,
    /// Calibrated prompt; once set, never replaced.
    pub prompt: Option<&'static PromptPattern>,
    pub exit: Option<ExitInfo>,
    pub error_reason: Option<String>,
    /// Set before a deliberate kill (timeout, eviction); the subsequent exit
    /// resolves to `error` with this reason.
    pub kill_reason: Option<String>,
    /// Pending quiet-complete deadline; rearmed on each candidate-complete
    /// event, cleared on fire and on terminal transition.
    pub quiet_deadline: Option<Instant>,
    pub ended_at: Option<DateTime<Utc>>,
    /// When the terminal transition happened, for grace-period eviction.
    pub terminal_at: Option<Instant>,
}

/// Handle to one command session, shared between the engine task, the store,
/// and tool invocations.
pub struct Session {
    id: String,
    command: String,
    shell: String,
    cwd: Option<PathBuf>,
    started_at: DateTime<Utc>,
    state: Mutex<SessionState>,
    adapter: Mutex<Option<Arc<ProcessAdapter>>>,
    done_tx: watch::Sender<bool>,
}

/// Listing entry returned by `terminal.list` and embedded in `status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBrief {
    pub id: String,
    pub status: SessionStatus,
    pub last_output_at: DateTime<Utc>,
    pub exit_code: Option<i32>,
    pub exit_signal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

pub(crate) struct FinalizeOutcome {
    pub record: CompletionRecord,
    /// Whether the adapter had already reported an exit; when false the
    /// child may still be alive and gets a best-effort SIGTERM on release.
    pub had_exit: bool,
}

impl Session {
    pub(crate) fn new(
        command: &str,
        shell: &str,
        cwd: Option<PathBuf>,
        max_buffer_bytes: usize,
    ) -> Arc<Self> {
        let now = Utc::now();
        let (done_tx, _done_rx) = watch::channel(false);
        Arc::new(Self {
            id: Ulid::new().to_string(),
            command: command.to_string(),
            shell: shell.to_string(),
            cwd,
            started_at: now,
            state: Mutex::new(SessionState {
                status: SessionStatus::Idle,
                buffer: RollingBuffer::new(max_buffer_bytes),
                last_byte_at: Instant::now(),
                last_byte_wall: now,
                last_line: String::new(),
                prompt: None,
                exit: None,
                error_reason: None,
                kill_reason: None,
                quiet_deadline: None,
                ended_at: None,
                terminal_at: None,
            }),
            adapter: Mutex::new(None),
            done_tx,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn status(&self) -> SessionStatus {
        self.lock_state().status
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub(crate) fn install_adapter(&self, adapter: Arc<ProcessAdapter>) {
        let mut guard = self.adapter.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(adapter);
    }

    /// Clone the live adapter handle, if any.
    pub(crate) fn adapter_handle(&self) -> Option<Arc<ProcessAdapter>> {
        self.adapter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub(crate) fn release_adapter(&self) -> Option<Arc<ProcessAdapter>> {
        self.adapter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// Receiver that flips to `true` once the session reaches a terminal
    /// state.
    pub fn subscribe_done(&self) -> watch::Receiver<bool> {
        self.done_tx.subscribe()
    }

    pub(crate) fn signal_done(&self) {
        let _ = self.done_tx.send(true);
    }

    fn brief_from(&self, state: &SessionState) -> SessionBrief {
        SessionBrief {
            id: self.id.clone(),
            status: state.status,
            last_output_at: state.last_byte_wall,
            exit_code: state.exit.as_ref().and_then(|e| e.code),
            exit_signal: state.exit.as_ref().and_then(|e| e.signal.clone()),
            error_reason: state.error_reason.clone(),
        }
    }

    /// Consistent point-in-time view of the session.
    pub fn snapshot(&self) -> SessionBrief {
        let state = self.lock_state();
        self.brief_from(&state)
    }

    /// Full retained output as lossy UTF-8.
    pub fn joined_output(&self) -> String {
        self.lock_state().buffer.joined_lossy()
    }

    /// Snapshot and full output taken under one lock, so the pair is a
    /// consistent point-in-time view.
    pub fn snapshot_with_output(&self) -> (SessionBrief, String) {
        let state = self.lock_state();
        (self.brief_from(&state), state.buffer.joined_lossy())
    }

    /// Last `tail_bytes` of the retained output.
    pub fn tail_output(&self, tail_bytes: usize) -> String {
        self.lock_state().buffer.tail_lossy(tail_bytes)
    }

    /// Apply the terminal transition once. Returns `None` when the session
    /// is already terminal (terminal states are absorbing).
    pub(crate) fn finalize(
        &self,
        status: SessionStatus,
        reason: Option<String>,
    ) -> Option<FinalizeOutcome> {
        debug_assert!(status.is_terminal());
        let mut state = self.lock_state();
        if state.status.is_terminal() {
            return None;
        }
        state.status = status;
        state.error_reason = reason;
        state.quiet_deadline = None;
        let ended = Utc::now();
        state.ended_at = Some(ended);
        state.terminal_at = Some(Instant::now());

        let record = CompletionRecord {
            command: self.command.clone(),
            exit_code: state.exit.as_ref().and_then(|e| e.code),
            duration_ms: (ended - self.started_at).num_milliseconds().max(0) as u64,
            stdout: state.buffer.joined_lossy(),
            stderr: String::new(),
            cwd: self.cwd.as_ref().map(|p| p.display().to_string()),
            shell: self.shell.clone(),
            started_at: self.started_at,
            ended_at: ended,
        };
        Some(FinalizeOutcome {
            record,
            had_exit: state.exit.is_some(),
        })
    }
}
