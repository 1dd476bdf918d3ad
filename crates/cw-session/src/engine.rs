//! Heuristics engine: drives one session's state machine from adapter
//! events and timer fires.
//!
//! Each session is owned by a single task running [`drive`]. Chunk handling,
//! exit handling, the quiet-complete deadline, the idle poll, and the
//! timeout all live in one `select!` loop, so none of them can interleave
//! for the same session. Deadlines are re-read from session state on every
//! iteration, which makes rearming the quiet window a plain field write.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{Instant as TokioInstant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use cw_core::{ExitInfo, ProgressUpdate, SessionStatus, SignalSpec};
use cw_process::AdapterEvent;

use crate::session::{RunOptions, Session};
use crate::{Hooks, ansi, finish, prompt};

/// Idle classification runs at 1 Hz in production; tests shrink this.
pub(crate) const DEFAULT_IDLE_POLL: Duration = Duration::from_secs(1);

pub(crate) const RUN_TOOL: &str = "terminal.run";

#[derive(Debug, Clone, Copy)]
pub(crate) struct EngineTunables {
    pub quiet: Duration,
    pub waiting: Duration,
    pub stuck: Duration,
    /// `None` disables the timeout kill.
    pub timeout: Option<Duration>,
    pub idle_poll: Duration,
}

impl EngineTunables {
    pub(crate) fn from_options(options: &RunOptions) -> Self {
        Self {
            quiet: Duration::from_millis(options.quiet_ms),
            waiting: Duration::from_millis(options.waiting_ms),
            stuck: Duration::from_millis(options.stuck_ms),
            timeout: (options.timeout_ms > 0).then(|| Duration::from_millis(options.timeout_ms)),
            idle_poll: DEFAULT_IDLE_POLL,
        }
    }
}

/// Run the session to its terminal state. The sole consumer of the adapter
/// event stream, and therefore the session's only exit handler.
pub(crate) async fn drive(
    session: Arc<Session>,
    mut events: UnboundedReceiver<AdapterEvent>,
    tunables: EngineTunables,
    hooks: Hooks,
) {
    let timeout_at = tunables.timeout.map(|t| TokioInstant::now() + t);
    let mut timeout_armed = timeout_at.is_some();
    let mut events_open = true;

    let mut idle = tokio::time::interval(tunables.idle_poll);
    idle.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        if session.is_terminal() {
            break;
        }

        let quiet_at = session.lock_state().quiet_deadline;
        let quiet_sleep = async {
            match quiet_at {
                Some(at) => tokio::time::sleep_until(TokioInstant::from_std(at)).await,
                None => std::future::pending().await,
            }
        };
        let timeout_sleep = async {
            match timeout_at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            event = events.recv(), if events_open => match event {
                Some(AdapterEvent::Data(chunk)) => on_chunk(&session, &chunk, &tunables),
                Some(AdapterEvent::Exit(info)) => on_exit(&session, info, &tunables, &hooks),
                None => {
                    events_open = false;
                    on_stream_closed(&session, &hooks);
                }
            },
            _ = quiet_sleep, if quiet_at.is_some() => on_quiet_elapsed(&session, &hooks),
            _ = timeout_sleep, if timeout_armed => {
                timeout_armed = false;
                on_timeout(&session, &tunables, &hooks).await;
            }
            _ = idle.tick() => on_idle_tick(&session, &tunables, &hooks),
        }
    }

    debug!(session_id = session.id(), status = %session.status(), "session engine finished");
}

/// Classify the chunk line-by-line, then append the raw bytes.
fn on_chunk(session: &Arc<Session>, chunk: &[u8], tunables: &EngineTunables) {
    let mut state = session.lock_state();
    if state.status.is_terminal() {
        return;
    }

    let text = String::from_utf8_lossy(chunk);
    let mut saw_real_output = false;
    for raw_line in text.split('\n') {
        let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);
        if line.is_empty() {
            continue;
        }
        if ansi::is_spinner_frame(&state.last_line, line) {
            continue;
        }
        saw_real_output = true;
        state.last_line = line.to_string();

        if state.prompt.is_none() {
            if let Some(pattern) = prompt::detect(line) {
                debug!(
                    session_id = session.id(),
                    pattern = pattern.name(),
                    "calibrated shell prompt"
                );
                state.prompt = Some(pattern);
            }
        }
        if state.prompt.is_some_and(|p| p.matches(line)) {
            state.quiet_deadline = Some(Instant::now() + tunables.quiet);
        }
        if finish::looks_finished(line) {
            trace!(session_id = session.id(), line, "line matches a finish phrase");
        }
    }

    // A pending quiet window slides on further non-spinner output, so late
    // bytes are absorbed into the buffer before completion fires. Spinner
    // repaints must not move the deadline: classification behaves as if the
    // repaint chunk had been omitted.
    if saw_real_output && state.quiet_deadline.is_some() {
        state.quiet_deadline = Some(Instant::now() + tunables.quiet);
    }

    state.buffer.push(chunk.to_vec());
    if saw_real_output {
        state.last_byte_at = Instant::now();
        state.last_byte_wall = chrono::Utc::now();
    }
}

/// Record the exit and open the quiet window that absorbs late output.
/// A deliberate kill (timeout, eviction) resolves to `error` immediately.
fn on_exit(session: &Arc<Session>, info: ExitInfo, tunables: &EngineTunables, hooks: &Hooks) {
    let kill_reason = {
        let mut state = session.lock_state();
        if state.status.is_terminal() {
            return;
        }
        state.exit = Some(info);
        let reason = state.kill_reason.clone();
        if reason.is_none() {
            state.quiet_deadline = Some(Instant::now() + tunables.quiet);
        }
        reason
    };

    if let Some(reason) = kill_reason {
        settle(session, hooks, SessionStatus::Error, Some(reason));
    }
}

fn on_quiet_elapsed(session: &Arc<Session>, hooks: &Hooks) {
    {
        let mut state = session.lock_state();
        match state.quiet_deadline {
            Some(at) if at <= Instant::now() => state.quiet_deadline = None,
            _ => return,
        }
        if state.status.is_terminal() {
            return;
        }
    }
    settle(session, hooks, SessionStatus::Completed, None);
}

fn on_idle_tick(session: &Arc<Session>, tunables: &EngineTunables, hooks: &Hooks) {
    use SessionStatus::{PossiblyStuck, Running, Waiting};

    let message = {
        let mut state = session.lock_state();
        if state.status.is_terminal() {
            return;
        }
        let idle = state.last_byte_at.elapsed();
        match state.status {
            Running | Waiting if idle > tunables.stuck => {
                state.status = PossiblyStuck;
                Some(format!(
                    "session {}: no output for {}ms (stuck threshold {}ms); command may be stuck",
                    session.id(),
                    idle.as_millis(),
                    tunables.stuck.as_millis()
                ))
            }
            Running if idle > tunables.waiting => {
                state.status = Waiting;
                Some(format!(
                    "session {}: no output for {}ms (waiting threshold {}ms); command may be waiting for input",
                    session.id(),
                    idle.as_millis(),
                    tunables.waiting.as_millis()
                ))
            }
            // New output never promotes back to running directly; the gap is
            // re-evaluated against the thresholds on each tick.
            PossiblyStuck if idle <= tunables.stuck => {
                state.status = Waiting;
                Some(format!(
                    "session {}: output resumed; demoted to waiting",
                    session.id()
                ))
            }
            _ => None,
        }
    };

    if let Some(message) = message {
        hooks.emit_progress(ProgressUpdate::message(RUN_TOOL, message));
    }
}

/// Timeout expiry: mark the session and SIGTERM the adapter. The exit event
/// that follows resolves to `error`.
async fn on_timeout(session: &Arc<Session>, tunables: &EngineTunables, hooks: &Hooks) {
    {
        let mut state = session.lock_state();
        if state.status.is_terminal() || state.kill_reason.is_some() {
            return;
        }
        state.kill_reason = Some("Command timed out".to_string());
    }

    let timeout_ms = tunables.timeout.map(|t| t.as_millis()).unwrap_or_default();
    hooks.emit_progress(ProgressUpdate::message(
        RUN_TOOL,
        format!(
            "session {}: timed out after {timeout_ms}ms; sending SIGTERM",
            session.id()
        ),
    ));

    if let Some(adapter) = session.adapter_handle() {
        if let Err(error) = adapter.kill(SignalSpec::Sigterm).await {
            warn!(
                session_id = session.id(),
                error = %format!("{error:#}"),
                "failed to SIGTERM timed-out session"
            );
        }
    }
}

/// The adapter's event channel closed. Normal after an exit; without one it
/// means the adapter died underneath us.
fn on_stream_closed(session: &Arc<Session>, hooks: &Hooks) {
    let had_exit = {
        let state = session.lock_state();
        state.status.is_terminal() || state.exit.is_some()
    };
    if !had_exit {
        warn!(session_id = session.id(), "adapter stream closed before exit");
        settle(
            session,
            hooks,
            SessionStatus::Error,
            Some("adapter stream closed before exit".to_string()),
        );
    }
}

/// Apply the terminal transition and run the release protocol: kill a child
/// that never exited, drop the adapter, wake `run`, notify the hooks.
pub(crate) fn settle(
    session: &Arc<Session>,
    hooks: &Hooks,
    status: SessionStatus,
    reason: Option<String>,
) {
    let Some(outcome) = session.finalize(status, reason.clone()) else {
        return;
    };

    if let Some(adapter) = session.release_adapter() {
        if !outcome.had_exit {
            let session_id = session.id().to_string();
            tokio::spawn(async move {
                if let Err(error) = adapter.kill(SignalSpec::Sigterm).await {
                    debug!(
                        session_id = %session_id,
                        error = %format!("{error:#}"),
                        "best-effort kill on adapter release failed"
                    );
                }
            });
        }
    }

    session.signal_done();

    let message = match (&status, &reason) {
        (SessionStatus::Completed, _) => format!(
            "session {}: completed (exit code {})",
            session.id(),
            outcome
                .record
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "none".to_string())
        ),
        (_, Some(reason)) => format!("session {}: error: {reason}", session.id()),
        (_, None) => format!("session {}: error", session.id()),
    };
    hooks.emit_progress(ProgressUpdate::message(RUN_TOOL, message));
    hooks.emit_completion(outcome.record);
}

/// Spawn the engine task for a session.
pub(crate) fn spawn_engine(
    session: Arc<Session>,
    events: UnboundedReceiver<AdapterEvent>,
    tunables: EngineTunables,
    hooks: Hooks,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(drive(session, events, tunables, hooks))
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
