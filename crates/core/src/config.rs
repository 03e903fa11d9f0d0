//! Session timing and behavior settings.

use std::time::Duration;

/// Settings for the output adapter's completion watchdogs.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSettings {
    /// How often the engine is polled for "still speaking".
    pub poll_interval: Duration,
    /// How long a silent engine is given before polling may presume completion.
    pub poll_grace: Duration,
    /// Speaking rate used to estimate the hard cap of an utterance.
    pub chars_per_second: f64,
    /// Added on top of the estimated speaking time.
    pub cap_padding: Duration,
}

impl OutputSettings {
    /// Upper bound on how long `text` may take to play.
    pub fn estimated_cap(&self, text: &str) -> Duration {
        let chars = text.chars().count() as f64;
        let rate = if self.chars_per_second > 0.0 {
            self.chars_per_second
        } else {
            1.0
        };
        Duration::from_secs_f64(chars / rate) + self.cap_padding
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            poll_grace: Duration::from_millis(1500),
            chars_per_second: 14.0,
            cap_padding: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Locale handed to the speech recognizer.
    pub locale: String,
    /// Ceiling on the greeting before listening starts anyway.
    pub greeting_ceiling: Duration,
    /// Minimum spacing between two listen attempts.
    pub listen_cooldown: Duration,
    /// Delay before listening again after a capture ended empty.
    pub relisten_delay: Duration,
    /// Delay before retrying after a recognition or synthesis failure.
    pub retry_delay: Duration,
    /// Delay between a barge-in and the spoken acknowledgement.
    pub acknowledge_delay: Duration,
    /// Stage 1 of the inactivity watchdog.
    pub check_in_after: Duration,
    /// Stage 2 of the inactivity watchdog, counted from the stage 1 fire.
    pub hang_up_after: Duration,
    /// Watch for interruption keywords while the system is speaking.
    pub barge_in: bool,
    pub output: OutputSettings,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            locale: "en-IN".to_string(),
            greeting_ceiling: Duration::from_millis(3500),
            listen_cooldown: Duration::from_millis(400),
            relisten_delay: Duration::from_millis(300),
            retry_delay: Duration::from_secs(1),
            acknowledge_delay: Duration::from_millis(500),
            check_in_after: Duration::from_secs(120),
            hang_up_after: Duration::from_secs(15),
            barge_in: true,
            output: OutputSettings::default(),
        }
    }
}
