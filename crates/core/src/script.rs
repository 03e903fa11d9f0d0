//! Dialogue content for the intake interview.
//!
//! Nothing here decides control flow. The dialogue manager consults the script
//! for what to say, and the script can be replaced wholesale (the service
//! loads one from JSON) without touching the state machine.

use crate::error::ScriptError;
use crate::slots::{SlotName, SlotSet};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Greeting {
    pub morning: String,
    pub afternoon: String,
    pub evening: String,
    /// Spoken after the time-of-day salutation.
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotPrompt {
    pub slot: SlotName,
    /// The canonical question first, then rephrasings.
    pub variants: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRule {
    pub label: String,
    pub keywords: Vec<String>,
    /// Spoken the first time the tag is detected in a session.
    #[serde(default)]
    pub pitch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub greeting: Greeting,
    pub prompts: Vec<SlotPrompt>,
    /// Template with one `{slot}` placeholder per slot key.
    pub summary: String,
    /// Prefix used when the caller's name was just captured. `{name}` is replaced.
    pub name_acknowledgement: String,
    /// Prefix used when any other slot was just captured.
    pub filled_acknowledgement: String,
    pub check_in: String,
    pub farewell: String,
    /// Spoken after the caller interrupted the system.
    pub interruption_acknowledgement: String,
    pub interruption_keywords: Vec<String>,
    pub tags: Vec<TagRule>,
    /// Cities matched exactly or fuzzily for the location slot.
    pub cities: Vec<String>,
}

impl Script {
    pub fn validate(&self) -> Result<(), ScriptError> {
        for slot in SlotName::ORDER {
            let prompt = self
                .prompts
                .iter()
                .find(|prompt| prompt.slot == slot)
                .ok_or_else(|| ScriptError::MissingPrompt(slot.key().to_string()))?;
            if !rephrases_every_ask(&prompt.variants) {
                return Err(ScriptError::NoRephrase(slot.key().to_string()));
            }
            let placeholder = format!("{{{}}}", slot.key());
            if self.summary.matches(&placeholder).count() != 1 {
                return Err(ScriptError::SummaryPlaceholder(slot.key().to_string()));
            }
        }
        if self.interruption_keywords.is_empty() {
            return Err(ScriptError::NoInterruptionKeywords);
        }
        if let Some(tag) = self.tags.iter().find(|tag| tag.keywords.is_empty()) {
            return Err(ScriptError::EmptyTag(tag.label.clone()));
        }
        Ok(())
    }

    /// Greeting for a local hour of day (0-23).
    pub fn greeting_for_hour(&self, hour: u32) -> String {
        let salutation = match hour {
            0..=11 => &self.greeting.morning,
            12..=16 => &self.greeting.afternoon,
            _ => &self.greeting.evening,
        };
        format!("{} {}", salutation, self.greeting.body)
    }

    /// Prompt for `slot` on its `attempt`-th consecutive ask. Cycles through the
    /// variants so two consecutive asks never use the same one.
    pub fn prompt(&self, slot: SlotName, attempt: usize) -> &str {
        self.prompts
            .iter()
            .find(|prompt| prompt.slot == slot)
            .filter(|prompt| !prompt.variants.is_empty())
            .map(|prompt| prompt.variants[attempt % prompt.variants.len()].as_str())
            .unwrap_or_default()
    }

    /// Fills every placeholder with its slot value. Validation guarantees each
    /// placeholder occurs once, so each value is interpolated once; a value
    /// that happens to contain another ("12" inside "₹1200") still shows up
    /// inside it.
    pub fn render_summary(&self, slots: &SlotSet) -> String {
        slots.iter().fold(self.summary.clone(), |summary, (slot, value)| {
            summary.replace(&format!("{{{}}}", slot.key()), value.unwrap_or_default())
        })
    }

    pub fn render_name_acknowledgement(&self, name: &str) -> String {
        self.name_acknowledgement.replace("{name}", name)
    }
}

/// Variants are asked in a cycle, so each must differ from the one after it,
/// the last one included.
fn rephrases_every_ask(variants: &[String]) -> bool {
    variants.len() >= 2
        && variants
            .iter()
            .zip(variants.iter().cycle().skip(1))
            .all(|(current, next)| current.trim() != next.trim())
}

fn prompt(slot: SlotName, variants: &[&str]) -> SlotPrompt {
    SlotPrompt {
        slot,
        variants: variants.iter().map(|variant| variant.to_string()).collect(),
    }
}

fn tag(label: &str, keywords: &[&str], pitch: Option<&str>) -> TagRule {
    TagRule {
        label: label.to_string(),
        keywords: keywords.iter().map(|keyword| keyword.to_string()).collect(),
        pitch: pitch.map(str::to_string),
    }
}

impl Default for Script {
    /// The iiTuitions IIT-JEE mentorship intake.
    fn default() -> Self {
        Self {
            greeting: Greeting {
                morning: "Good morning!".to_string(),
                afternoon: "Good afternoon!".to_string(),
                evening: "Good evening!".to_string(),
                body: "Welcome to iiTuitions! I'm here to help you with your IIT-JEE preparation. \
                       We offer personalized 1-on-1 mentorship by IIT and NIT alumni. \
                       Which exam are you preparing for?"
                    .to_string(),
            },
            prompts: vec![
                prompt(
                    SlotName::Track,
                    &[
                        "Which exam are you preparing for, JEE Mains, JEE Advanced, or something else?",
                        "Could you tell me the exam you're aiming for? For example JEE Mains or NEET.",
                    ],
                ),
                prompt(
                    SlotName::Name,
                    &[
                        "May I know the student's name?",
                        "Sorry, I didn't catch the name. What should I call the student?",
                    ],
                ),
                prompt(
                    SlotName::Grade,
                    &[
                        "Which grade is the student in?",
                        "Is the student in 11th, 12th, or taking a drop year?",
                    ],
                ),
                prompt(
                    SlotName::Board,
                    &[
                        "Which board does the student study under?",
                        "Is that CBSE, ICSE, or a state board?",
                    ],
                ),
                prompt(
                    SlotName::Location,
                    &[
                        "Which city are you based in?",
                        "Could you tell me the city you live in?",
                    ],
                ),
                prompt(
                    SlotName::Budget,
                    &[
                        "What budget do you have in mind per hour?",
                        "Our sessions usually range from 800 to 1500 rupees per hour. What would work for you?",
                    ],
                ),
                prompt(
                    SlotName::TeacherPreference,
                    &[
                        "Do you have a preference for the mentor, for example a male or female teacher?",
                        "Would you like a particular kind of mentor, or is anyone fine?",
                    ],
                ),
            ],
            summary: "Thank you, {name}! Here's what I have: preparing for {track}, \
                      grade {grade} under {board}, based in {location}, budget {budget}, \
                      mentor preference {teacherPreference}. \
                      Our counselor will reach out shortly with the perfect mentor match."
                .to_string(),
            name_acknowledgement: "Nice to meet you, {name}.".to_string(),
            filled_acknowledgement: "Got it.".to_string(),
            check_in: "Are you still there? Take your time, I'm listening.".to_string(),
            farewell: "It seems we got disconnected. Feel free to call back anytime. Goodbye!"
                .to_string(),
            interruption_acknowledgement: "Sure, I've stopped. What would you like to know?"
                .to_string(),
            interruption_keywords: vec![
                "stop".to_string(),
                "enough".to_string(),
                "quiet".to_string(),
                "wait".to_string(),
            ],
            tags: vec![
                tag(
                    "PACE",
                    &["pace", "slow", "fast", "speed", "catch up", "behind"],
                    Some("With 1-on-1 mentorship, the teaching pace is completely adapted to the student."),
                ),
                tag(
                    "BUDGET-CONSTRAINED",
                    &["expensive", "cheap", "afford", "discount", "costly", "tight budget"],
                    Some("We also offer package deals with significant discounts."),
                ),
                tag(
                    "SUBJECT-FOCUS",
                    &["physics", "chemistry", "math", "maths", "mathematics"],
                    Some("Our mentors are experts in Physics, Chemistry, and Mathematics."),
                ),
                tag(
                    "WEAK-AREA",
                    &["weak", "struggling", "difficult", "trouble", "backlog", "doubts"],
                    Some("Every student gets unlimited doubt clearing with their mentor."),
                ),
                tag(
                    "RESULTS-FOCUSED",
                    &["rank", "success rate", "results", "score"],
                    Some("Many of our students have secured ranks under AIR 500."),
                ),
                tag(
                    "URGENT",
                    &["urgent", "asap", "crash course", "exam is near", "running out of time"],
                    Some("We can set up an intensive crash course if the exam is close."),
                ),
                tag("ONLINE", &["online", "virtual", "remote", "video call"], None),
                tag(
                    "OFFLINE",
                    &["home tuition", "in person", "in-person", "offline", "at home"],
                    None,
                ),
            ],
            cities: [
                "Mumbai",
                "Delhi",
                "Bangalore",
                "Bengaluru",
                "Hyderabad",
                "Chennai",
                "Kolkata",
                "Pune",
                "Ahmedabad",
                "Jaipur",
                "Lucknow",
                "Kota",
                "Noida",
                "Gurgaon",
                "Gurugram",
                "Chandigarh",
                "Indore",
                "Bhopal",
                "Patna",
                "Nagpur",
                "Surat",
                "Thane",
                "Kochi",
                "Bhubaneswar",
                "Ranchi",
                "Guwahati",
                "Dehradun",
                "Visakhapatnam",
            ]
            .iter()
            .map(|city| city.to_string())
            .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_script_is_valid() {
        assert!(Script::default().validate().is_ok());
    }

    #[test]
    fn greeting_follows_time_of_day() {
        let script = Script::default();

        assert!(script.greeting_for_hour(9).starts_with("Good morning!"));
        assert!(script.greeting_for_hour(12).starts_with("Good afternoon!"));
        assert!(script.greeting_for_hour(16).starts_with("Good afternoon!"));
        assert!(script.greeting_for_hour(17).starts_with("Good evening!"));
        assert!(script.greeting_for_hour(23).contains("Welcome to iiTuitions"));
    }

    #[test]
    fn prompt_variants_cycle() {
        let script = Script::default();

        let first = script.prompt(SlotName::Grade, 0);
        let second = script.prompt(SlotName::Grade, 1);
        let third = script.prompt(SlotName::Grade, 2);

        assert_ne!(first, second);
        assert_ne!(second, third);
        assert_eq!(first, third);
    }

    #[test]
    fn rejects_single_variant_prompt() {
        let mut script = Script::default();
        script.prompts[2].variants = vec!["Which grade?".to_string(), "Which grade? ".to_string()];

        let err = script.validate().unwrap_err();

        assert!(matches!(err, ScriptError::NoRephrase(slot) if slot == "grade"));
    }

    #[test]
    fn rejects_variants_that_repeat_when_the_cycle_wraps() {
        // Arrange: A, B, A asks A twice in a row on attempts 2 and 3.
        let mut script = Script::default();
        let track = script.prompts[0].variants[0].clone();
        script.prompts[0].variants = vec![track.clone(), "Which exam?".to_string(), track];

        // Act
        let err = script.validate().unwrap_err();

        // Assert
        assert!(matches!(err, ScriptError::NoRephrase(slot) if slot == "track"));
    }

    #[test]
    fn consecutive_asks_never_repeat_for_the_default_script() {
        let script = Script::default();

        for slot in SlotName::ORDER {
            for attempt in 0..6 {
                assert_ne!(script.prompt(slot, attempt), script.prompt(slot, attempt + 1));
            }
        }
    }

    #[test]
    fn rejects_summary_missing_a_placeholder() {
        let mut script = Script::default();
        script.summary = script.summary.replace("{budget}", "whatever");

        let err = script.validate().unwrap_err();

        assert!(matches!(err, ScriptError::SummaryPlaceholder(slot) if slot == "budget"));
    }

    #[test]
    fn rejects_tag_without_keywords() {
        let mut script = Script::default();
        script.tags.push(tag("EMPTY", &[], None));

        assert!(matches!(script.validate(), Err(ScriptError::EmptyTag(label)) if label == "EMPTY"));
    }

    #[test]
    fn summary_interpolates_every_slot() {
        let script = Script::default();
        let mut slots = SlotSet::new();
        slots.fill(SlotName::Track, "JEE Advanced");
        slots.fill(SlotName::Name, "Ravi");
        slots.fill(SlotName::Grade, "12");
        slots.fill(SlotName::Board, "CBSE");
        slots.fill(SlotName::Location, "Pune");
        slots.fill(SlotName::Budget, "₹900");
        slots.fill(SlotName::TeacherPreference, "Female");

        let summary = script.render_summary(&slots);

        assert!(!summary.contains('{'));
        assert!(summary.starts_with("Thank you, Ravi!"));
        assert!(summary.contains("grade 12 under CBSE, based in Pune"));
    }

    #[test]
    fn summary_interpolates_each_placeholder_once_even_when_values_overlap() {
        let mut script = Script::default();
        script.summary = "{name}|{track}|{grade}|{board}|{location}|{budget}|{teacherPreference}"
            .to_string();
        let mut slots = SlotSet::new();
        slots.fill(SlotName::Track, "JEE");
        slots.fill(SlotName::Name, "Ravi");
        slots.fill(SlotName::Grade, "12");
        slots.fill(SlotName::Board, "CBSE");
        slots.fill(SlotName::Location, "Pune");
        slots.fill(SlotName::Budget, "₹1200");
        slots.fill(SlotName::TeacherPreference, "No preference");

        let summary = script.render_summary(&slots);

        assert_eq!(summary, "Ravi|JEE|12|CBSE|Pune|₹1200|No preference");
    }

    #[test]
    fn script_round_trips_through_json() {
        let script = Script::default();

        let json = serde_json::to_string(&script).unwrap();
        let parsed: Script = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, script);
    }
}
