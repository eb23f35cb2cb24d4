pub type Result<T> = std::result::Result<T, Error>;

/// Run-level errors. These fail the run before (or instead of) generating
/// traffic; nothing session-local ever surfaces through this type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("script defines no scenarios")]
    NoScenarios,

    #[error("script defines no phases")]
    NoPhases,

    #[error("scenario weights must be non-negative and sum to a positive value")]
    InvalidWeights,

    #[error("phase rates and durations must be finite numbers")]
    InvalidPhase,

    #[error("unknown protocol engine: `{0}`")]
    UnknownEngine(String),

    #[error("payload row width does not match `fields` (expected {expected}, got {got})")]
    InvalidPayload { expected: usize, got: usize },

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type StepResult<T> = std::result::Result<T, StepError>;

/// Session-level step failures. A `StepError` aborts the owning session only;
/// it is counted under `code()` and never crashes the runtime.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("an URL must be specified")]
    MissingUrl,

    #[error("response timeout")]
    Timeout,

    #[error("transport error ({kind}): {message}")]
    Transport { kind: String, message: String },

    #[error("failed capture or match")]
    FailedCaptureOrMatch,

    #[error("malformed {format} content: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },

    #[error("hook `{name}` failed: {message}")]
    Hook { name: String, message: String },
}

impl StepError {
    /// Stable error-kind key used for the per-error counters in reports.
    #[must_use]
    pub fn code(&self) -> String {
        match self {
            Self::MissingUrl => "url_missing".to_string(),
            Self::Timeout => "timeout".to_string(),
            Self::Transport { kind, .. } => kind.clone(),
            Self::FailedCaptureOrMatch => "capture_or_match".to_string(),
            Self::Parse { format, .. } => format!("parse_{format}"),
            Self::Hook { name, .. } => format!("hook:{name}"),
        }
    }
}

/// Error returned by user hooks; it carries just a message and is folded
/// into a [`StepError::Hook`] by the caller.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct HookError(pub String);

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
