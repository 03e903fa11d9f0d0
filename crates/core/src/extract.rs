//! Pattern table for slot and keyword extraction.
//!
//! Each slot owns an ordered list of rules; the first rule that yields a value
//! for a slot wins for that slot, and every slot is evaluated independently of
//! the others. A second, smaller table applies only to the slot the system just
//! asked for, where a bare answer ("Ravi", "12", "about 900") is unambiguous.

use crate::slots::{SlotName, SlotSet};
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use regex::{Captures, Regex};

/// Minimum skim score for a misheard city name, as used for subtopic mentions.
const CITY_MATCH_THRESHOLD: i64 = 70;

/// Words that can follow "I'm", "from" and friends without being a name or a
/// place.
const STOPWORDS: &[&str] = &[
    "a", "about", "also", "an", "and", "appearing", "applying", "at", "available", "based",
    "but", "calling", "class", "concerned", "confused", "currently", "doing", "fine", "for",
    "free", "from", "going", "good", "grade", "happy", "here", "his", "her", "hoping", "in",
    "interested", "into", "is", "it", "it's", "its", "just", "living", "looking", "my", "new",
    "no", "not", "of", "ok", "okay", "on", "our", "parent", "planning", "preparing", "ready",
    "really", "school", "scratch", "searching", "so", "speaking", "still", "student",
    "studying", "sure", "taking", "thanks", "thank", "the", "thinking", "to", "trying", "unsure",
    "very", "well", "what", "with", "worried", "yeah", "yes", "you",
];

/// Hesitations, requests to repeat and self-descriptions. A reply made of
/// these is a non-answer, so the question gets rephrased instead of filled.
const NON_ANSWERS: &[&str] = &[
    "afraid", "again", "ah", "anxious", "average", "bad", "busy", "dont", "don't", "dunno",
    "er", "erm", "excuse", "hm", "hmm", "hmmm", "huh", "i", "idk", "know", "let", "maybe", "me",
    "nah", "nervous", "nope", "nothing", "oh", "pardon", "poor", "repeat", "scared", "sorry",
    "strong", "struggling", "think", "tired", "uh", "uhh", "um", "umm", "wait", "weak", "whats",
    "what's",
];

/// Board names never count as a place.
const BOARD_WORDS: &[&str] = &["cbse", "icse", "isc", "igcse", "ib", "ssc", "hsc", "state"];

enum Value {
    Fixed(&'static str),
    From(fn(&Captures<'_>) -> Option<String>),
}

struct SlotRule {
    slot: SlotName,
    pattern: &'static str,
    value: Value,
}

const RULES: &[SlotRule] = &[
    // track
    SlotRule { slot: SlotName::Track, pattern: r"(?i)\bjee[\s-]*adv(?:anced|ance)?\b", value: Value::Fixed("JEE Advanced") },
    SlotRule { slot: SlotName::Track, pattern: r"(?i)\bjee[\s-]*mains?\b", value: Value::Fixed("JEE Mains") },
    SlotRule { slot: SlotName::Track, pattern: r"(?i)\bneet\b", value: Value::Fixed("NEET") },
    SlotRule { slot: SlotName::Track, pattern: r"(?i)\b(?:iit[\s-]*)?jee\b", value: Value::Fixed("JEE") },
    SlotRule { slot: SlotName::Track, pattern: r"(?i)\bolympiads?\b", value: Value::Fixed("Olympiad") },
    SlotRule { slot: SlotName::Track, pattern: r"(?i)\bfoundation\b", value: Value::Fixed("Foundation") },
    SlotRule { slot: SlotName::Track, pattern: r"(?i)\bboard\s+exams?\b", value: Value::Fixed("Board exams") },
    // name
    SlotRule { slot: SlotName::Name, pattern: r"(?i)\bmy\s+name(?:['’]s|\s+is)\s+([a-z][a-z'’-]*)(?:\s+([a-z][a-z'’-]*))?", value: Value::From(person_name) },
    SlotRule { slot: SlotName::Name, pattern: r"(?i)\b(?:his|her|the\s+student['’]?s|my\s+(?:son|daughter|child)['’]?s)\s+name\s+is\s+([a-z][a-z'’-]*)(?:\s+([a-z][a-z'’-]*))?", value: Value::From(person_name) },
    SlotRule { slot: SlotName::Name, pattern: r"(?i)\bcall\s+(?:me|him|her)\s+([a-z][a-z'’-]*)(?:\s+([a-z][a-z'’-]*))?", value: Value::From(person_name) },
    SlotRule { slot: SlotName::Name, pattern: r"(?i)^\W*(?:(?:hi|hello|hey)\W+)?(?:this\s+is|i\s+am|i['’]m|im)\s+([a-z][a-z'’-]*)(?:\s+([a-z][a-z'’-]*))?", value: Value::From(person_name) },
    // grade
    SlotRule { slot: SlotName::Grade, pattern: r"(?i)\b(?:grade|class|std\.?|standard)\s*(\d{1,2})(?:st|nd|rd|th)?\b", value: Value::From(grade_number) },
    SlotRule { slot: SlotName::Grade, pattern: r"(?i)\b(\d{1,2})(?:st|nd|rd|th)\b", value: Value::From(grade_number) },
    SlotRule { slot: SlotName::Grade, pattern: r"(?i)\b(ninth|tenth|eleventh|twelfth)\b", value: Value::From(grade_word) },
    SlotRule { slot: SlotName::Grade, pattern: r"(?i)\b(?:dropper|repeater|drop\s+year|gap\s+year)\b", value: Value::Fixed("Dropper") },
    // board
    SlotRule { slot: SlotName::Board, pattern: r"(?i)\bstate\s+board\b", value: Value::Fixed("State Board") },
    SlotRule { slot: SlotName::Board, pattern: r"(?i)\binternational\s+baccalaureate\b", value: Value::Fixed("IB") },
    SlotRule { slot: SlotName::Board, pattern: r"(?i)\b(cbse|icse|isc|igcse|ib|ssc|hsc)\b", value: Value::From(board_code) },
    // location, after the city list
    SlotRule { slot: SlotName::Location, pattern: r"(?i)\b(?:live|living|stay|staying|based|located|reside|residing)\s+(?:in|at|out\s+of)\s+([a-z][a-z]+)", value: Value::From(place) },
    SlotRule { slot: SlotName::Location, pattern: r"(?i)\b(?:i['’]m|i\s+am|we['’]re|we\s+are|calling|speaking)\s+from\s+([a-z][a-z]+)", value: Value::From(place) },
    // budget
    SlotRule { slot: SlotName::Budget, pattern: r"(?i)(?:₹|\brs\.?|\binr)\s*(\d[\d,]*)\s*(k\b|thousand|lakhs?|lacs?)?", value: Value::From(amount) },
    SlotRule { slot: SlotName::Budget, pattern: r"(?i)\b(\d[\d,]*)\s*(k\b|thousand|lakhs?|lacs?)?\s*(?:rupees|rs\b|inr\b|bucks|per\s+hour|an\s+hour|/\s*hr|/\s*hour|per\s+month|a\s+month|monthly|per\s+session)", value: Value::From(amount) },
    SlotRule { slot: SlotName::Budget, pattern: r"(?i)\bbudget\D{0,20}?(\d[\d,]*)\s*(k\b|thousand|lakhs?|lacs?)?", value: Value::From(amount) },
    SlotRule { slot: SlotName::Budget, pattern: r"(?i)\b(?:no\s+budget|flexible\s+budget|budget\s+is\s+flexible|money\s+is\s+not\s+an?\s+(?:issue|problem))\b", value: Value::Fixed("Flexible") },
    // teacher preference
    SlotRule { slot: SlotName::TeacherPreference, pattern: r"(?i)\b(?:male|gentleman|man|sir)\s+(?:teacher|tutor|mentor|faculty)", value: Value::Fixed("Male") },
    SlotRule { slot: SlotName::TeacherPreference, pattern: r"(?i)\b(?:female|lady|woman|women|madam|ma['’]am)\s+(?:teacher|tutor|mentor|faculty)", value: Value::Fixed("Female") },
    SlotRule { slot: SlotName::TeacherPreference, pattern: r"(?i)\b(?:iit|nit|iitian)s?\s*(?:/\s*nit\s*)?(?:alumni|alumnus|graduates?)\b", value: Value::Fixed("IIT/NIT alumni") },
    SlotRule { slot: SlotName::TeacherPreference, pattern: r"(?i)\b(?:no\s+preference|any\s+(?:teacher|tutor|mentor)\s+(?:is\s+)?(?:fine|ok|okay))\b", value: Value::Fixed("No preference") },
];

/// Bare answers, only consulted for the slot that was just asked.
const PENDING_RULES: &[SlotRule] = &[
    SlotRule { slot: SlotName::Name, pattern: r"(?i)^\W*([a-z][a-z'’-]*(?:\s+[a-z][a-z'’-]*){0,2})\W*$", value: Value::From(phrase_name) },
    SlotRule { slot: SlotName::Grade, pattern: r"(?i)^\W*(\d{1,2})\W*$", value: Value::From(grade_number) },
    SlotRule { slot: SlotName::Location, pattern: r"(?i)^\W*([a-z][a-z'’-]*(?:\s+[a-z][a-z'’-]*){0,2})\W*$", value: Value::From(phrase_place) },
    SlotRule { slot: SlotName::Budget, pattern: r"(?i)^\W*(?:around|about|maybe|approximately|roughly)?\s*(\d[\d,]*)\s*(k\b|thousand|lakhs?|lacs?)?\W*$", value: Value::From(amount) },
    SlotRule { slot: SlotName::TeacherPreference, pattern: r"(?i)^\W*(?:any(?:one|body)?|no|none|nope|doesn['’]?t\s+matter|does\s+not\s+matter|not\s+really|whatever|either|anything)\b", value: Value::Fixed("No preference") },
];

struct Rule {
    slot: SlotName,
    pattern: Regex,
    value: &'static Value,
}

impl Rule {
    fn compile(spec: &'static SlotRule) -> Result<Self, regex::Error> {
        Ok(Self {
            slot: spec.slot,
            pattern: Regex::new(spec.pattern)?,
            value: &spec.value,
        })
    }

    fn apply(&self, text: &str) -> Option<String> {
        let captures = self.pattern.captures(text)?;
        match self.value {
            Value::Fixed(value) => Some(value.to_string()),
            Value::From(convert) => convert(&captures),
        }
    }
}

/// Case-insensitive whole-word match against a keyword list.
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    pattern: Regex,
}

impl KeywordMatcher {
    pub fn new<S: AsRef<str>>(keywords: &[S]) -> Result<Self, regex::Error> {
        let alternatives = keywords
            .iter()
            .map(|keyword| regex::escape(keyword.as_ref().trim()))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = Regex::new(&format!(r"(?i)\b(?:{alternatives})\b"))?;
        Ok(Self { pattern })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }

    pub fn find<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.pattern.find(text).map(|found| found.as_str())
    }
}

/// Known cities, matched exactly or with letters dropped by the recognizer.
struct CityMatcher {
    cities: Vec<String>,
    exact: Option<KeywordMatcher>,
    matcher: SkimMatcherV2,
}

impl CityMatcher {
    fn new(cities: &[String]) -> Result<Self, regex::Error> {
        let exact = if cities.is_empty() {
            None
        } else {
            Some(KeywordMatcher::new(cities)?)
        };
        Ok(Self {
            cities: cities.to_vec(),
            exact,
            matcher: SkimMatcherV2::default(),
        })
    }

    fn find(&self, text: &str) -> Option<String> {
        if let Some(found) = self.exact.as_ref().and_then(|exact| exact.find(text)) {
            return self
                .cities
                .iter()
                .find(|city| city.eq_ignore_ascii_case(found))
                .cloned();
        }

        let lower = text.to_lowercase();
        lower
            .split(|c: char| !c.is_alphabetic())
            .filter(|token| token.chars().count() >= 5)
            .find_map(|token| self.closest(token))
    }

    fn closest(&self, token: &str) -> Option<String> {
        let token_len = token.chars().count();
        self.cities
            .iter()
            .filter_map(|city| {
                let name = city.to_lowercase();
                let name_len = name.chars().count();
                if name_len < token_len
                    || name_len - token_len > 2
                    || name.chars().next() != token.chars().next()
                {
                    return None;
                }
                let score = self.matcher.fuzzy_match(&name, token)?;
                (score >= CITY_MATCH_THRESHOLD).then_some((score, city))
            })
            .max_by_key(|(score, _)| *score)
            .map(|(_, city)| city.clone())
    }
}

pub struct SlotExtractor {
    rules: Vec<Rule>,
    pending_rules: Vec<Rule>,
    cities: CityMatcher,
}

impl SlotExtractor {
    pub fn new(cities: &[String]) -> Result<Self, regex::Error> {
        Ok(Self {
            rules: RULES.iter().map(Rule::compile).collect::<Result<_, _>>()?,
            pending_rules: PENDING_RULES
                .iter()
                .map(Rule::compile)
                .collect::<Result<_, _>>()?,
            cities: CityMatcher::new(cities)?,
        })
    }

    /// Values found in `text` for every slot that is still empty, in interview
    /// order. `pending` is the slot the caller was just asked about.
    pub fn extract(
        &self,
        text: &str,
        slots: &SlotSet,
        pending: Option<SlotName>,
    ) -> Vec<(SlotName, String)> {
        let text = text.trim();
        SlotName::ORDER
            .iter()
            .copied()
            .filter(|slot| !slots.is_filled(*slot))
            .filter_map(|slot| {
                let value = if slot == SlotName::Location {
                    self.cities.find(text).or_else(|| self.first_match(&self.rules, slot, text))
                } else {
                    self.first_match(&self.rules, slot, text)
                };
                value
                    .or_else(|| {
                        (pending == Some(slot))
                            .then(|| self.first_match(&self.pending_rules, slot, text))
                            .flatten()
                    })
                    .map(|value| (slot, value))
            })
            .collect()
    }

    fn first_match(&self, rules: &[Rule], slot: SlotName, text: &str) -> Option<String> {
        rules
            .iter()
            .filter(|rule| rule.slot == slot)
            .find_map(|rule| rule.apply(text))
    }
}

fn is_stopword(word: &str) -> bool {
    let word = word.to_lowercase().replace('’', "'");
    STOPWORDS.contains(&word.as_str()) || NON_ANSWERS.contains(&word.as_str())
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn person_name(captures: &Captures<'_>) -> Option<String> {
    let first = captures.get(1)?.as_str();
    if is_stopword(first) {
        return None;
    }
    let mut name = title_case(first);
    if let Some(second) = captures.get(2).map(|m| m.as_str()) {
        if !is_stopword(second) {
            name.push(' ');
            name.push_str(&title_case(second));
        }
    }
    Some(name)
}

/// One to three words, none of them filler.
fn bare_phrase(captures: &Captures<'_>) -> Option<Vec<String>> {
    let words: Vec<&str> = captures.get(1)?.as_str().split_whitespace().collect();
    if words.iter().any(|word| is_stopword(word)) {
        return None;
    }
    Some(words.into_iter().map(title_case).collect())
}

fn phrase_name(captures: &Captures<'_>) -> Option<String> {
    bare_phrase(captures).map(|words| words.join(" "))
}

fn phrase_place(captures: &Captures<'_>) -> Option<String> {
    let words = bare_phrase(captures)?;
    if words
        .iter()
        .any(|word| BOARD_WORDS.contains(&word.to_lowercase().as_str()))
    {
        return None;
    }
    Some(words.join(" "))
}

fn place(captures: &Captures<'_>) -> Option<String> {
    let word = captures.get(1)?.as_str();
    let lower = word.to_lowercase();
    if is_stopword(&lower) || BOARD_WORDS.contains(&lower.as_str()) {
        return None;
    }
    Some(title_case(word))
}

fn grade_number(captures: &Captures<'_>) -> Option<String> {
    let grade: u8 = captures.get(1)?.as_str().parse().ok()?;
    (1..=12).contains(&grade).then(|| grade.to_string())
}

fn grade_word(captures: &Captures<'_>) -> Option<String> {
    let grade = match captures.get(1)?.as_str().to_lowercase().as_str() {
        "ninth" => "9",
        "tenth" => "10",
        "eleventh" => "11",
        "twelfth" => "12",
        _ => return None,
    };
    Some(grade.to_string())
}

fn board_code(captures: &Captures<'_>) -> Option<String> {
    Some(captures.get(1)?.as_str().to_uppercase())
}

fn amount(captures: &Captures<'_>) -> Option<String> {
    let digits: String = captures
        .get(1)?
        .as_str()
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    let base: u64 = digits.parse().ok()?;
    let multiplier = match captures.get(2).map(|m| m.as_str().to_lowercase()) {
        Some(unit) if unit == "k" || unit == "thousand" => 1_000,
        Some(unit) if unit.starts_with("lakh") || unit.starts_with("lac") => 100_000,
        _ => 1,
    };
    let value = base.checked_mul(multiplier)?;
    (value > 0).then(|| format!("₹{value}"))
}
