//! Session subsystem: per-command liveness classification over raw adapter
//! byte streams, bounded output buffering, and the public tool surface.

pub mod ansi;
pub mod buffer;
mod engine;
pub mod finish;
pub mod journal;
pub mod prompt;
pub mod session;
pub mod store;
pub mod tools;

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use cw_core::{CompletionRecord, ProgressUpdate};

pub use session::{
    DEFAULT_MAX_BUFFER_BYTES, DEFAULT_QUIET_MS, DEFAULT_STUCK_MS, DEFAULT_TIMEOUT_MS,
    DEFAULT_WAITING_MS, RunOptions, Session, SessionBrief,
};
pub use store::{SESSION_GRACE, SessionStore, spawn_sweeper};
pub use tools::{AttachReply, RunOutcome, StatusReply, TerminalTools};

/// Progress-notification callback. Must not block; the engine invokes it
/// inline from the session task.
pub type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// External hooks wired into every session.
#[derive(Clone, Default)]
pub struct Hooks {
    pub progress: Option<ProgressFn>,
    /// Completed-session sink. Records are handed off over a channel so sink
    /// I/O never runs on the session task.
    pub completion: Option<UnboundedSender<CompletionRecord>>,
}

impl Hooks {
    pub(crate) fn emit_progress(&self, update: ProgressUpdate) {
        if let Some(progress) = &self.progress {
            progress(update);
        }
    }

    pub(crate) fn emit_completion(&self, record: CompletionRecord) {
        if let Some(tx) = &self.completion {
            if tx.send(record).is_err() {
                debug!("completion sink is gone; record dropped");
            }
        }
    }
}
