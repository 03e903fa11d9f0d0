use crate::slots::{DialogueState, SlotSet};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::BTreeSet;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    #[default]
    Idle,
    Greeting,
    Listening,
    Processing,
    Speaking,
    Paused,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Speaker {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Utterance {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Local>,
}

impl Utterance {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
            timestamp: Local::now(),
        }
    }

    /// Wire form sent over the session connection.
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "role": self.speaker,
            "text": self.text,
            "timestamp": self.timestamp.to_rfc3339(),
        })
    }
}

/// Append-only record of the conversation. Only the user turn that is still
/// being recognized can change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversationLog {
    entries: Vec<Utterance>,
    in_progress: Option<Utterance>,
}

impl ConversationLog {
    pub fn entries(&self) -> &[Utterance] {
        &self.entries
    }

    pub fn in_progress(&self) -> Option<&Utterance> {
        self.in_progress.as_ref()
    }

    pub fn push(&mut self, utterance: Utterance) -> &Utterance {
        self.entries.push(utterance);
        &self.entries[self.entries.len() - 1]
    }

    /// Replaces the text of the in-progress user turn.
    pub fn revise(&mut self, text: &str) {
        match &mut self.in_progress {
            Some(utterance) => text.clone_into(&mut utterance.text),
            None => self.in_progress = Some(Utterance::new(Speaker::User, text)),
        }
    }

    /// Moves the in-progress turn into the log with its final text.
    pub fn commit(&mut self, text: &str) -> &Utterance {
        let mut utterance = self
            .in_progress
            .take()
            .unwrap_or_else(|| Utterance::new(Speaker::User, text));
        text.clone_into(&mut utterance.text);
        self.push(utterance)
    }

    pub fn discard(&mut self) {
        self.in_progress = None;
    }
}

/// The single live conversation, owned by the turn controller.
#[derive(Debug, Default)]
pub struct Session {
    /// Phase the session is in, or was in when it got paused.
    pub phase: Phase,
    pub paused: bool,
    /// Listen again once the current utterance finishes playing.
    pub listen_after_utterance: bool,
    /// Bumped whenever the controller moves on; notifications carrying an
    /// older value are stale.
    pub turn: u64,
    pub capture_active: bool,
    pub last_listen_at: Option<Instant>,
    pub dialogue: DialogueState,
    pub log: ConversationLog,
    pub live_transcript: String,
    pub alert: Option<String>,
}

impl Session {
    /// Phase as seen from outside: a pause hides the phase underneath.
    pub fn observable_phase(&self) -> Phase {
        if self.paused && self.phase != Phase::Ended {
            Phase::Paused
        } else {
            self.phase
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.phase, Phase::Idle | Phase::Ended)
    }

    pub fn advance_turn(&mut self) -> u64 {
        self.turn += 1;
        self.turn
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.observable_phase(),
            live_transcript: self.live_transcript.clone(),
            log: self.log.entries().to_vec(),
            in_progress: self.log.in_progress().cloned(),
            slots: self.dialogue.slots.clone(),
            tags: self.dialogue.tags.clone(),
            alert: self.alert.clone(),
        }
    }
}

/// Read-only view published after every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub live_transcript: String,
    pub log: Vec<Utterance>,
    pub in_progress: Option<Utterance>,
    pub slots: SlotSet,
    pub tags: BTreeSet<String>,
    pub alert: Option<String>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Session::default().snapshot()
    }
}
