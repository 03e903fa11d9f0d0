use crate::capabilities::{
    RecognitionError, RecognitionEvent, RecognitionOptions, SpeechRecognizer,
};
use crate::extract::KeywordMatcher;
use crate::{Event, ListenOutcome, ListenPurpose};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Runs one capture session at a time and reports exactly one
/// [`Event::ListenEnded`] for each.
///
/// A `Turn` capture forwards interim and final transcripts as they arrive.
/// A `BargeIn` capture stays quiet and only reports [`Event::Interrupted`]
/// when the caller says one of the interruption keywords.
pub struct SpeechInputAdapter {
    recognizer: Arc<dyn SpeechRecognizer>,
    events: mpsc::UnboundedSender<Event>,
    locale: String,
    interruptions: KeywordMatcher,
    current: Option<CancellationToken>,
}

impl SpeechInputAdapter {
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        events: mpsc::UnboundedSender<Event>,
        locale: impl Into<String>,
        interruptions: KeywordMatcher,
    ) -> Self {
        Self {
            recognizer,
            events,
            locale: locale.into(),
            interruptions,
            current: None,
        }
    }

    pub fn listen(&mut self, turn: u64, purpose: ListenPurpose) {
        self.cancel();

        let token = CancellationToken::new();
        self.current = Some(token.clone());
        let capture = Capture {
            recognizer: self.recognizer.clone(),
            events: self.events.clone(),
            options: RecognitionOptions::single_utterance(self.locale.clone()),
            interruptions: self.interruptions.clone(),
            turn,
            purpose,
        };

        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => ListenOutcome::Cancelled,
                outcome = capture.run() => outcome,
            };
            tracing::debug!(turn, ?purpose, ?outcome, "capture ended");
            let _ = capture
                .events
                .send(Event::ListenEnded { turn, purpose, outcome });
        });
    }

    /// Stops the running capture, if any. It reports `Cancelled`.
    pub fn cancel(&mut self) {
        if let Some(token) = self.current.take() {
            token.cancel();
            self.recognizer.stop();
        }
    }
}

struct Capture {
    recognizer: Arc<dyn SpeechRecognizer>,
    events: mpsc::UnboundedSender<Event>,
    options: RecognitionOptions,
    interruptions: KeywordMatcher,
    turn: u64,
    purpose: ListenPurpose,
}

impl Capture {
    async fn run(&self) -> ListenOutcome {
        let mut stream = match self.recognizer.start(self.options.clone()).await {
            Ok(stream) => stream,
            Err(err) => return ListenOutcome::Failed(format!("{err:#}")),
        };

        while let Some(event) = stream.recv().await {
            match event {
                RecognitionEvent::Partial(text) => {
                    if self.watch_for_interruption(&text) {
                        return ListenOutcome::Captured(text);
                    }
                    self.forward(text, false);
                }
                RecognitionEvent::Final(text) => {
                    if self.watch_for_interruption(&text) {
                        return ListenOutcome::Captured(text);
                    }
                    if text.trim().is_empty() {
                        continue;
                    }
                    self.forward(text.clone(), true);
                    return ListenOutcome::Captured(text);
                }
                RecognitionEvent::Ended => return ListenOutcome::Empty,
                RecognitionEvent::Errored(RecognitionError::NoSpeech) => {
                    return ListenOutcome::Empty;
                }
                RecognitionEvent::Errored(RecognitionError::NotAllowed) => {
                    return ListenOutcome::PermissionRevoked;
                }
                RecognitionEvent::Errored(RecognitionError::Engine(reason)) => {
                    return ListenOutcome::Failed(reason);
                }
            }
        }
        ListenOutcome::Empty
    }

    /// In barge-in mode, reports an interruption and returns true when `text`
    /// carries a keyword.
    fn watch_for_interruption(&self, text: &str) -> bool {
        if self.purpose != ListenPurpose::BargeIn {
            return false;
        }
        match self.interruptions.find(text) {
            Some(keyword) => {
                tracing::info!(turn = self.turn, keyword, "caller interrupted");
                self.recognizer.stop();
                let _ = self.events.send(Event::Interrupted {
                    turn: self.turn,
                    text: text.to_string(),
                });
                true
            }
            None => false,
        }
    }

    fn forward(&self, text: String, is_final: bool) {
        if self.purpose != ListenPurpose::Turn {
            return;
        }
        let _ = self.events.send(Event::Transcript {
            turn: self.turn,
            text,
            is_final,
        });
    }
}
