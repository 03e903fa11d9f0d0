//! Capability contracts consumed by the session core.
//!
//! The speech engines, the capture permission prompt and the session transport
//! all live outside this crate. The controller only talks to them through these
//! traits, which keeps it usable with any backend (a browser bridge, a native
//! engine, or the console host in `intake-service`) and lets tests substitute
//! mocks generated by `mockall`.

use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc;

/// Answer of the capture permission service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait CapturePermission: Send + Sync {
    /// Asks for microphone access. An `Err` means the service itself failed,
    /// which is distinct from the user refusing access.
    async fn acquire(&self) -> Result<Permission>;
}

/// Events reported by a text-to-speech engine for one utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisEvent {
    Started,
    Ended,
    Errored(String),
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Queues `text` for playback and returns the event stream for it.
    async fn speak(&self, text: &str) -> Result<mpsc::Receiver<SynthesisEvent>>;

    /// Silences everything currently playing or queued.
    fn cancel_all(&self);

    /// Whether the engine currently reports audible output.
    fn is_speaking(&self) -> bool;
}

/// Options for a single recognition session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionOptions {
    pub locale: String,
    pub continuous: bool,
    pub interim_results: bool,
}

impl RecognitionOptions {
    pub fn single_utterance(locale: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
            continuous: false,
            interim_results: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecognitionError {
    #[error("no speech detected")]
    NoSpeech,
    #[error("capture permission was revoked")]
    NotAllowed,
    #[error("recognition engine failed: {0}")]
    Engine(String),
}

/// Events reported by a speech-to-text engine for one capture session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    Partial(String),
    Final(String),
    Ended,
    Errored(RecognitionError),
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Starts a capture session and returns its event stream.
    async fn start(&self, options: RecognitionOptions)
    -> Result<mpsc::Receiver<RecognitionEvent>>;

    /// Best-effort stop of the running capture session.
    fn stop(&self);
}

/// An opened session transport. Used as a session marker; the payloads are
/// the committed utterances of the conversation.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, payload: serde_json::Value) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self) -> Result<Box<dyn Connection>>;
}
