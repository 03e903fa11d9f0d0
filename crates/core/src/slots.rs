use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// One structured field of the intake interview. Declaration order is the
/// interview order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SlotName {
    Track,
    Name,
    Grade,
    Board,
    Location,
    Budget,
    TeacherPreference,
}

impl SlotName {
    pub const ORDER: [SlotName; 7] = [
        SlotName::Track,
        SlotName::Name,
        SlotName::Grade,
        SlotName::Board,
        SlotName::Location,
        SlotName::Budget,
        SlotName::TeacherPreference,
    ];

    /// Key used in scripts, summaries and telemetry.
    pub fn key(self) -> &'static str {
        match self {
            SlotName::Track => "track",
            SlotName::Name => "name",
            SlotName::Grade => "grade",
            SlotName::Board => "board",
            SlotName::Location => "location",
            SlotName::Budget => "budget",
            SlotName::TeacherPreference => "teacherPreference",
        }
    }
}

impl fmt::Display for SlotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Slot values collected so far. Every key is always present; a value, once
/// set, is never replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SlotSet {
    values: BTreeMap<SlotName, Option<String>>,
}

impl SlotSet {
    pub fn new() -> Self {
        Self {
            values: SlotName::ORDER.iter().map(|slot| (*slot, None)).collect(),
        }
    }

    pub fn get(&self, slot: SlotName) -> Option<&str> {
        self.values.get(&slot).and_then(|value| value.as_deref())
    }

    pub fn is_filled(&self, slot: SlotName) -> bool {
        self.get(slot).is_some()
    }

    /// Stores `value` unless the slot already holds an answer. Returns whether
    /// the value was taken.
    pub fn fill(&mut self, slot: SlotName, value: impl Into<String>) -> bool {
        let entry = self.values.entry(slot).or_insert(None);
        if entry.is_some() {
            return false;
        }
        *entry = Some(value.into());
        true
    }

    /// First unfilled slot in interview order.
    pub fn next_unfilled(&self) -> Option<SlotName> {
        SlotName::ORDER
            .iter()
            .copied()
            .find(|slot| !self.is_filled(*slot))
    }

    pub fn is_complete(&self) -> bool {
        self.next_unfilled().is_none()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlotName, Option<&str>)> {
        self.values
            .iter()
            .map(|(slot, value)| (*slot, value.as_deref()))
    }
}

impl Default for SlotSet {
    fn default() -> Self {
        Self::new()
    }
}

/// The slot the system last asked for, and how many times in a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PendingAsk {
    pub slot: SlotName,
    pub attempt: usize,
}

/// Everything the dialogue manager needs to take the next step. Owned by the
/// session; the dialogue manager only ever sees and returns copies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DialogueState {
    pub slots: SlotSet,
    pub tags: BTreeSet<String>,
    pub pending: Option<PendingAsk>,
}
