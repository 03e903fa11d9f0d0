//! Terminal stand-ins for the speech engines.
//!
//! Synthesized speech is printed and "played" for a time proportional to its
//! length. Lines typed on stdin are the caller's speech, fed in through a
//! channel so the host decides which lines are commands.

use anyhow::Result;
use async_trait::async_trait;
use intake_core::capabilities::{
    CapturePermission, Connection, Connector, Permission, RecognitionError, RecognitionEvent,
    RecognitionOptions, SpeechRecognizer, SpeechSynthesizer, SynthesisEvent,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Replaces the running task's token, cancelling the old one.
fn replace_token(slot: &Mutex<Option<CancellationToken>>, next: Option<CancellationToken>) {
    let mut current = slot.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(previous) = std::mem::replace(&mut *current, next) {
        previous.cancel();
    }
}

/// A terminal has no microphone prompt.
pub struct ConsolePermission;

#[async_trait]
impl CapturePermission for ConsolePermission {
    async fn acquire(&self) -> Result<Permission> {
        Ok(Permission::Granted)
    }
}

pub struct ConsoleSynthesizer {
    chars_per_second: f64,
    speaking: Arc<AtomicBool>,
    current: Mutex<Option<CancellationToken>>,
}

impl ConsoleSynthesizer {
    pub fn new(chars_per_second: f64) -> Self {
        Self {
            chars_per_second: chars_per_second.max(1.0),
            speaking: Arc::new(AtomicBool::new(false)),
            current: Mutex::new(None),
        }
    }

    fn playback_time(&self, text: &str) -> Duration {
        Duration::from_secs_f64(text.chars().count() as f64 / self.chars_per_second)
    }
}

#[async_trait]
impl SpeechSynthesizer for ConsoleSynthesizer {
    async fn speak(&self, text: &str) -> Result<mpsc::Receiver<SynthesisEvent>> {
        let token = CancellationToken::new();
        replace_token(&self.current, Some(token.clone()));

        println!("assistant> {text}");
        self.speaking.store(true, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(4);
        tx.send(SynthesisEvent::Started).await?;

        let playback = self.playback_time(text);
        let speaking = self.speaking.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(playback) => {
                    speaking.store(false, Ordering::SeqCst);
                    let _ = tx.send(SynthesisEvent::Ended).await;
                }
            }
        });
        Ok(rx)
    }

    fn cancel_all(&self) {
        replace_token(&self.current, None);
        self.speaking.store(false, Ordering::SeqCst);
    }

    fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }
}

/// Treats each typed line as one final transcript. A listening window that
/// passes without a line reports no speech.
pub struct ConsoleRecognizer {
    lines: Arc<tokio::sync::Mutex<mpsc::Receiver<String>>>,
    window: Duration,
    current: Mutex<Option<CancellationToken>>,
}

impl ConsoleRecognizer {
    pub fn new(lines: mpsc::Receiver<String>, window: Duration) -> Self {
        Self {
            lines: Arc::new(tokio::sync::Mutex::new(lines)),
            window,
            current: Mutex::new(None),
        }
    }
}

#[async_trait]
impl SpeechRecognizer for ConsoleRecognizer {
    async fn start(&self, options: RecognitionOptions) -> Result<mpsc::Receiver<RecognitionEvent>> {
        tracing::trace!(locale = %options.locale, "console capture started");
        let token = CancellationToken::new();
        replace_token(&self.current, Some(token.clone()));

        let (tx, rx) = mpsc::channel(4);
        let lines = self.lines.clone();
        let window = self.window;
        tokio::spawn(async move {
            let event = tokio::select! {
                _ = token.cancelled() => return,
                event = next_line(&lines, window) => event,
            };
            let _ = tx.send(event).await;
        });
        Ok(rx)
    }

    fn stop(&self) {
        replace_token(&self.current, None);
    }
}

async fn next_line(
    lines: &tokio::sync::Mutex<mpsc::Receiver<String>>,
    window: Duration,
) -> RecognitionEvent {
    let mut lines = lines.lock().await;
    match tokio::time::timeout(window, lines.recv()).await {
        Ok(Some(line)) => RecognitionEvent::Final(line),
        Ok(None) => RecognitionEvent::Ended,
        Err(_) => RecognitionEvent::Errored(RecognitionError::NoSpeech),
    }
}

/// Logs every committed utterance instead of sending it anywhere.
pub struct LogConnector;

struct LogConnection {
    sent: usize,
}

#[async_trait]
impl Connector for LogConnector {
    async fn open(&self) -> Result<Box<dyn Connection>> {
        tracing::info!("Session connection opened");
        Ok(Box::new(LogConnection { sent: 0 }))
    }
}

#[async_trait]
impl Connection for LogConnection {
    async fn send(&mut self, payload: serde_json::Value) -> Result<()> {
        self.sent += 1;
        tracing::debug!("Session payload: {}", serde_json::to_string(&payload)?);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        tracing::info!("Session connection closed after {} utterances", self.sent);
        Ok(())
    }
}
