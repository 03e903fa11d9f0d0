pub mod capabilities;
pub mod config;
pub mod controller;
pub mod dialogue;
pub mod error;
pub mod extract;
pub mod script;
pub mod session;
pub mod slots;
pub mod speech_input;
pub mod speech_output;
pub mod watchdog;

pub use config::SessionConfig;
pub use controller::{Capabilities, SessionHandle, TurnController};
pub use dialogue::{Advance, DialogueManager};
pub use error::{ScriptError, SessionError};
pub use script::Script;
pub use session::{Phase, SessionSnapshot};

/// How an utterance handed to the speech output adapter finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputOutcome {
    /// The engine reported the end of playback.
    Completed,
    /// The engine stopped reporting speech without signalling the end.
    Presumed,
    /// The hard cap elapsed first.
    TimedOut,
    Failed(String),
    Cancelled,
}

/// Why a capture session was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenPurpose {
    /// Waiting for the caller's answer.
    Turn,
    /// Watching for an interruption keyword while the system speaks.
    BargeIn,
}

/// How a capture session terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenOutcome {
    Captured(String),
    Empty,
    Failed(String),
    PermissionRevoked,
    Cancelled,
}

/// Stage of the two-step inactivity escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    CheckIn,
    HangUp,
}

/// Deferred controller actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    Listen,
    BargeInWatch,
    Acknowledge,
}

/// Everything that reaches the turn controller from adapters and timers.
///
/// Each variant carries the turn (or watchdog epoch) it belongs to so that
/// the controller can drop notifications from superseded turns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    OutputFinished {
        turn: u64,
        outcome: OutputOutcome,
    },
    Transcript {
        turn: u64,
        text: String,
        is_final: bool,
    },
    Interrupted {
        turn: u64,
        text: String,
    },
    ListenEnded {
        turn: u64,
        purpose: ListenPurpose,
        outcome: ListenOutcome,
    },
    Inactivity {
        epoch: u64,
        stage: Stage,
    },
    Timer {
        turn: u64,
        timer: Timer,
    },
}
