/// Errors returned by the session lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("capture permission denied")]
    PermissionDenied,
    #[error("session already started")]
    AlreadyStarted,
    #[error("session is not running")]
    NotStarted,
    #[error("session is not paused")]
    NotPaused,
    #[error("failed to open session connection: {0}")]
    Connection(String),
    #[error("session has ended")]
    Closed,
}

/// Recoverable faults inside a turn. None of these reach the caller; they are
/// logged and the controller retries or drops the offending callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TurnFault {
    #[error("capture error: {0}")]
    CaptureError(String),
    #[error("capture ended without a transcript")]
    EmptyResult,
    #[error("speech output error: {0}")]
    OutputError(String),
    #[error("stale callback")]
    StaleCallback,
}

/// Errors raised while validating or compiling a dialogue script.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("slot '{0}' has no prompts")]
    MissingPrompt(String),
    #[error("slot '{0}' needs at least two prompt variants, each different from the next")]
    NoRephrase(String),
    #[error("summary must contain placeholder {{{0}}} exactly once")]
    SummaryPlaceholder(String),
    #[error("tag '{0}' has no keywords")]
    EmptyTag(String),
    #[error("script has no interruption keywords")]
    NoInterruptionKeywords,
    #[error(transparent)]
    Pattern(#[from] regex::Error),
}
