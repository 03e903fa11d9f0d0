use crate::error::ScriptError;
use crate::extract::{KeywordMatcher, SlotExtractor};
use crate::script::Script;
use crate::slots::{DialogueState, PendingAsk, SlotName};

/// Result of one dialogue step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advance {
    pub state: DialogueState,
    /// What the system says next: the next question, or the summary when done.
    pub utterance: String,
    pub done: bool,
    pub newly_filled: Vec<SlotName>,
    pub new_tags: Vec<String>,
}

struct TagDetector {
    label: String,
    keywords: KeywordMatcher,
    pitch: Option<String>,
}

/// Turns caller speech into slot values and decides what to say next.
///
/// The manager holds only the script and its compiled matchers. Conversation
/// state comes in as an argument and goes out in the [`Advance`], so the same
/// state and text always produce the same step.
pub struct DialogueManager {
    script: Script,
    extractor: SlotExtractor,
    tags: Vec<TagDetector>,
    interruptions: KeywordMatcher,
}

impl DialogueManager {
    pub fn new(script: Script) -> Result<Self, ScriptError> {
        script.validate()?;
        let extractor = SlotExtractor::new(&script.cities)?;
        let tags = script
            .tags
            .iter()
            .map(|rule| -> Result<TagDetector, regex::Error> {
                Ok(TagDetector {
                    label: rule.label.clone(),
                    keywords: KeywordMatcher::new(&rule.keywords)?,
                    pitch: rule.pitch.clone(),
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        let interruptions = KeywordMatcher::new(&script.interruption_keywords)?;
        Ok(Self {
            script,
            extractor,
            tags,
            interruptions,
        })
    }

    pub fn script(&self) -> &Script {
        &self.script
    }

    /// Keywords that cut the system off mid-utterance.
    pub fn interruptions(&self) -> &KeywordMatcher {
        &self.interruptions
    }

    pub fn advance(&self, state: &DialogueState, text: &str) -> Advance {
        let mut next = state.clone();
        let pending_slot = state.pending.map(|pending| pending.slot);

        let mut newly_filled = Vec::new();
        for (slot, value) in self.extractor.extract(text, &state.slots, pending_slot) {
            if next.slots.fill(slot, value) {
                newly_filled.push(slot);
            }
        }

        let mut new_tags = Vec::new();
        let mut pitches = Vec::new();
        for detector in self.tags.iter().filter(|detector| detector.keywords.is_match(text)) {
            if next.tags.insert(detector.label.clone()) {
                new_tags.push(detector.label.clone());
                if let Some(pitch) = &detector.pitch {
                    pitches.push(pitch.as_str());
                }
            }
        }

        if pending_slot.is_some_and(|slot| next.slots.is_filled(slot)) {
            next.pending = None;
        }

        let Some(slot) = next.slots.next_unfilled() else {
            next.pending = None;
            return Advance {
                utterance: self.script.render_summary(&next.slots),
                state: next,
                done: true,
                newly_filled,
                new_tags,
            };
        };

        let attempt = match next.pending {
            Some(pending) if pending.slot == slot => pending.attempt + 1,
            _ => 0,
        };
        next.pending = Some(PendingAsk { slot, attempt });

        let mut parts: Vec<String> = Vec::new();
        if newly_filled.contains(&SlotName::Name) {
            let name = next.slots.get(SlotName::Name).unwrap_or_default();
            parts.push(self.script.render_name_acknowledgement(name));
        } else if !newly_filled.is_empty() {
            parts.push(self.script.filled_acknowledgement.clone());
        }
        parts.extend(pitches.into_iter().map(str::to_string));
        parts.push(self.script.prompt(slot, attempt).to_string());

        Advance {
            utterance: parts.join(" "),
            state: next,
            done: false,
            newly_filled,
            new_tags,
        }
    }
}
