use crate::capabilities::{SpeechSynthesizer, SynthesisEvent};
use crate::config::OutputSettings;
use crate::{Event, OutputOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Plays one utterance at a time and reports exactly one
/// [`Event::OutputFinished`] for each.
///
/// Engines are not trusted to signal the end of playback. Each utterance is
/// watched by a task racing the engine's own events against a poll of
/// `is_speaking` and a hard cap; whichever settles first decides the outcome.
pub struct SpeechOutputAdapter {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    events: mpsc::UnboundedSender<Event>,
    settings: OutputSettings,
    current: Option<CancellationToken>,
}

impl SpeechOutputAdapter {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        events: mpsc::UnboundedSender<Event>,
        settings: OutputSettings,
    ) -> Self {
        Self {
            synthesizer,
            events,
            settings,
            current: None,
        }
    }

    /// Starts speaking `text` on behalf of `turn`, silencing anything still
    /// playing. Without a `hard_cap` the cap is estimated from the text.
    pub fn speak(&mut self, text: &str, turn: u64, hard_cap: Option<Duration>) {
        self.cancel();

        let token = CancellationToken::new();
        self.current = Some(token.clone());
        let cap = hard_cap.unwrap_or_else(|| self.settings.estimated_cap(text));
        let synthesizer = self.synthesizer.clone();
        let settings = self.settings.clone();
        let events = self.events.clone();
        let text = text.to_string();

        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => OutputOutcome::Cancelled,
                outcome = follow(synthesizer.as_ref(), &text, &settings) => outcome,
                _ = tokio::time::sleep(cap) => OutputOutcome::TimedOut,
            };
            tracing::debug!(turn, ?outcome, "utterance finished");
            let _ = events.send(Event::OutputFinished { turn, outcome });
        });
    }

    /// Silences the engine and settles the running utterance as cancelled.
    pub fn cancel(&mut self) {
        if let Some(token) = self.current.take() {
            token.cancel();
        }
        self.synthesizer.cancel_all();
    }
}

async fn follow(
    synthesizer: &dyn SpeechSynthesizer,
    text: &str,
    settings: &OutputSettings,
) -> OutputOutcome {
    let mut stream = match synthesizer.speak(text).await {
        Ok(stream) => stream,
        Err(err) => return OutputOutcome::Failed(format!("{err:#}")),
    };

    let started = Instant::now();
    let mut heard = false;
    let mut stream_open = true;
    let mut poll = tokio::time::interval(settings.poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = stream.recv(), if stream_open => match event {
                Some(SynthesisEvent::Started) => tracing::trace!("engine started speaking"),
                Some(SynthesisEvent::Ended) => return OutputOutcome::Completed,
                Some(SynthesisEvent::Errored(reason)) => return OutputOutcome::Failed(reason),
                None => stream_open = false,
            },
            _ = poll.tick() => {
                if synthesizer.is_speaking() {
                    heard = true;
                } else if heard || started.elapsed() >= settings.poll_grace {
                    return OutputOutcome::Presumed;
                }
            }
        }
    }
}
