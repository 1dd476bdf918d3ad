//! Public tool surface: `run`, `status`, `write`, `signal`, `list`,
//! `attach`, layered over the store, the adapters, and the engine.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;

use tracing::{info, warn};

use cw_config::Config;
use cw_core::{AppError, ProgressUpdate, SessionStatus, SignalSpec};
use cw_process::{SpawnSpec, spawn_adapter};

use crate::engine::{self, EngineTunables, RUN_TOOL};
use crate::session::{RunOptions, Session, SessionBrief};
use crate::store::SessionStore;
use crate::Hooks;

/// Default byte count returned by `status`.
pub const DEFAULT_STATUS_TAIL_BYTES: usize = 2_000;

/// Result of one `terminal.run` invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub session_id: String,
    /// Joined retained output.
    pub output: String,
    pub exit_code: Option<i32>,
    pub exit_signal: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of `terminal.status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReply {
    pub status: SessionStatus,
    pub last_output_at: chrono::DateTime<chrono::Utc>,
    pub exit_code: Option<i32>,
    pub exit_signal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    /// Last `tail` bytes of the joined buffer.
    pub text: String,
}

/// Result of `terminal.attach`: a consistent snapshot of the full buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachReply {
    pub id: String,
    pub status: SessionStatus,
    pub exit_code: Option<i32>,
    pub exit_signal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    pub text: String,
}

/// The tool surface. Cheap to clone; all clones share the store and hooks.
#[derive(Clone)]
pub struct TerminalTools {
    store: SessionStore,
    config: Config,
    hooks: Hooks,
}

impl TerminalTools {
    pub fn new(store: SessionStore, config: Config, hooks: Hooks) -> Self {
        Self {
            store,
            config,
            hooks,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Run a command to its terminal state.
    ///
    /// Suspends the caller until the session completes or errors. Spawn
    /// failures are reported in the outcome (`success == false`), not as an
    /// `Err`; errors before the spawn (empty command, session cap) propagate.
    pub async fn run(&self, options: RunOptions) -> Result<RunOutcome> {
        if options.command.trim().is_empty() {
            return Err(AppError::EmptyCommand.into());
        }

        let shell_override = options
            .shell
            .clone()
            .or_else(|| self.config.default_shell.clone());
        let (shell_program, _) = cw_process::shell_invocation(shell_override.as_deref());

        let session = Session::new(
            &options.command,
            &shell_program,
            options.cwd.clone(),
            options.max_buffer_bytes,
        );
        self.store.insert(Arc::clone(&session))?;

        let spec = SpawnSpec {
            command: options.command.clone(),
            cwd: options.cwd.clone(),
            shell: shell_override,
            env: options.env.clone(),
            use_pty: self.config.use_pty,
        };

        let mut adapter = match spawn_adapter(&spec).await {
            Ok(adapter) => adapter,
            Err(error) => {
                let reason = AppError::SpawnFailed(format!("{error:#}")).to_string();
                warn!(session_id = session.id(), reason = %reason, "spawn failed");
                engine::settle(&session, &self.hooks, SessionStatus::Error, Some(reason));
                return Ok(self.outcome_of(&session));
            }
        };

        let events = adapter
            .take_events()
            .ok_or_else(|| AppError::AdapterReleased(session.id().to_string()))?;
        session.install_adapter(Arc::new(adapter));
        session.lock_state().status = SessionStatus::Running;

        info!(session_id = session.id(), command = %options.command, "session started");
        self.hooks.emit_progress(ProgressUpdate::message(
            RUN_TOOL,
            format!("session {}: running: {}", session.id(), options.command),
        ));

        engine::spawn_engine(
            Arc::clone(&session),
            events,
            EngineTunables::from_options(&options),
            self.hooks.clone(),
        );

        let mut done = session.subscribe_done();
        while !*done.borrow_and_update() {
            if done.changed().await.is_err() {
                break;
            }
        }

        Ok(self.outcome_of(&session))
    }

    fn outcome_of(&self, session: &Arc<Session>) -> RunOutcome {
        let (brief, output) = session.snapshot_with_output();
        RunOutcome {
            session_id: brief.id,
            output,
            exit_code: brief.exit_code,
            exit_signal: brief.exit_signal,
            success: brief.exit_code == Some(0),
            error: brief.error_reason,
        }
    }

    /// Non-blocking status snapshot with the output tail.
    pub fn status(&self, session_id: &str, tail_bytes: Option<usize>) -> Result<StatusReply> {
        let session = self.lookup(session_id)?;
        let brief = session.snapshot();
        let text = session.tail_output(tail_bytes.unwrap_or(DEFAULT_STATUS_TAIL_BYTES));
        Ok(StatusReply {
            status: brief.status,
            last_output_at: brief.last_output_at,
            exit_code: brief.exit_code,
            exit_signal: brief.exit_signal,
            error_reason: brief.error_reason,
            text,
        })
    }

    /// Write bytes to the session's adapter verbatim.
    pub async fn write(&self, session_id: &str, data: &str) -> Result<()> {
        let session = self.lookup(session_id)?;
        if session.is_terminal() {
            return Err(AppError::SessionTerminated(session_id.to_string()).into());
        }
        let adapter = session
            .adapter_handle()
            .ok_or_else(|| AppError::AdapterReleased(session_id.to_string()))?;
        adapter.write(data.as_bytes()).await
    }

    /// Deliver a signal (or the synthetic `CTRL_C` byte) to the session.
    pub async fn signal(&self, session_id: &str, signal: SignalSpec) -> Result<()> {
        let session = self.lookup(session_id)?;
        if session.is_terminal() {
            return Err(AppError::SessionTerminated(session_id.to_string()).into());
        }
        let adapter = session
            .adapter_handle()
            .ok_or_else(|| AppError::AdapterReleased(session_id.to_string()))?;
        info!(session_id, signal = %signal, "delivering signal");
        adapter.kill(signal).await
    }

    /// Snapshot of every session in the store.
    pub fn list(&self) -> Vec<SessionBrief> {
        let mut briefs: Vec<SessionBrief> = self
            .store
            .list()
            .iter()
            .map(|session| session.snapshot())
            .collect();
        briefs.sort_by(|a, b| a.id.cmp(&b.id));
        briefs
    }

    /// Full buffer plus status, as one consistent snapshot.
    pub fn attach(&self, session_id: &str) -> Result<AttachReply> {
        let session = self.lookup(session_id)?;
        let (brief, text) = session.snapshot_with_output();
        Ok(AttachReply {
            id: brief.id,
            status: brief.status,
            exit_code: brief.exit_code,
            exit_signal: brief.exit_signal,
            error_reason: brief.error_reason,
            text,
        })
    }

    fn lookup(&self, session_id: &str) -> Result<Arc<Session>> {
        self.store
            .get(session_id)
            .ok_or_else(|| AppError::UnknownSession(session_id.to_string()).into())
    }
}
