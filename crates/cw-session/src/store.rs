//! Shared session store: id → live session, plus the background sweeper
//! that enforces the post-terminal grace period and inactivity eviction.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{info, warn};

use cw_core::{AppError, SignalSpec};

use crate::session::Session;

/// Terminal sessions stay queryable for at least this long.
pub const SESSION_GRACE: Duration = Duration::from_secs(60);

const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Concurrent map of live sessions. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    max_sessions: usize,
}

impl SessionStore {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                sessions: RwLock::new(HashMap::new()),
                max_sessions,
            }),
        }
    }

    /// Register a session, enforcing the soft cap on non-terminal sessions.
    pub fn insert(&self, session: Arc<Session>) -> Result<(), AppError> {
        let mut map = self
            .inner
            .sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let live = map.values().filter(|s| !s.is_terminal()).count();
        if live >= self.inner.max_sessions {
            return Err(AppError::SessionLimitReached {
                max: self.inner.max_sessions,
            });
        }
        map.insert(session.id().to_string(), session);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(id)
            .cloned()
    }

    pub fn list(&self) -> Vec<Arc<Session>> {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.inner
            .sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(id)
    }

    pub fn len(&self) -> usize {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One sweep pass: drop terminal sessions past the grace period and
    /// SIGTERM sessions that have been inactive past `inactivity_timeout`.
    pub(crate) async fn sweep(&self, inactivity_timeout: Duration) {
        enum Action {
            Keep,
            Remove,
            Evict,
        }

        for session in self.list() {
            let action = {
                let state = session.lock_state();
                if let Some(terminal_at) = state.terminal_at {
                    if terminal_at.elapsed() >= SESSION_GRACE {
                        Action::Remove
                    } else {
                        Action::Keep
                    }
                } else if state.kill_reason.is_none()
                    && state.last_byte_at.elapsed() >= inactivity_timeout
                {
                    Action::Evict
                } else {
                    Action::Keep
                }
            };

            match action {
                Action::Keep => {}
                Action::Remove => {
                    info!(session_id = session.id(), "removing session after grace period");
                    self.remove(session.id());
                }
                Action::Evict => {
                    warn!(
                        session_id = session.id(),
                        timeout_ms = inactivity_timeout.as_millis() as u64,
                        "evicting inactive session"
                    );
                    session.lock_state().kill_reason = Some(format!(
                        "Session evicted after {}ms of inactivity",
                        inactivity_timeout.as_millis()
                    ));
                    if let Some(adapter) = session.adapter_handle() {
                        if let Err(error) = adapter.kill(SignalSpec::Sigterm).await {
                            warn!(
                                session_id = session.id(),
                                error = %format!("{error:#}"),
                                "failed to SIGTERM evicted session"
                            );
                        }
                    }
                }
            }
        }
    }
}

/// Start the background sweeper. Runs until the returned handle is aborted
/// or the runtime shuts down.
pub fn spawn_sweeper(
    store: SessionStore,
    inactivity_timeout: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(SWEEP_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            store.sweep(inactivity_timeout).await;
        }
    })
}
