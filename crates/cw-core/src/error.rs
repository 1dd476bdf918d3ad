#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Command must not be empty")]
    EmptyCommand,

    #[error("No session with id '{0}'")]
    UnknownSession(String),

    #[error("Session '{0}' has already terminated")]
    SessionTerminated(String),

    #[error("Session '{0}' has no live process adapter")]
    AdapterReleased(String),

    #[error("Unknown signal '{0}': expected SIGINT, SIGTERM, KILL, or CTRL_C")]
    InvalidSignal(String),

    #[error("Session limit reached ({max} live sessions)")]
    SessionLimitReached { max: usize },

    #[error("Failed to spawn command: {0}")]
    SpawnFailed(String),
}
