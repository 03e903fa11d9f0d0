//! Service configuration loaded from the environment.
//!
//! Everything has a default, so an empty environment runs the built-in
//! script with the standard timings.

use intake_core::SessionConfig;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: Level,
    pub locale: String,
    /// JSON script replacing the built-in one.
    pub script_path: Option<PathBuf>,
    pub check_in_after: Duration,
    pub hang_up_after: Duration,
    pub barge_in: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
    #[error("Invalid value for {name}: {value}")]
    InvalidVar { name: &'static str, value: String },
}

impl Config {
    /// Loads configuration from environment variables, reading `.env` first
    /// when present.
    ///
    // *   `RUST_LOG`: (Optional) TRACE, DEBUG, INFO, WARN or ERROR. Defaults to INFO.
    // *   `INTAKE_LOCALE`: (Optional) Recognition locale. Defaults to "en-IN".
    // *   `INTAKE_SCRIPT`: (Optional) Path to a JSON conversation script.
    // *   `INTAKE_CHECK_IN_SECS`: (Optional) Silence before the check-in. Defaults to 120.
    // *   `INTAKE_HANG_UP_SECS`: (Optional) Silence after the check-in before hanging up. Defaults to 15.
    // *   `INTAKE_BARGE_IN`: (Optional) "true" or "false". Defaults to "false": a line typed
    //     while the assistant talks would otherwise go to the interruption watch and be lost.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = SessionConfig::default();

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        let locale = lookup("INTAKE_LOCALE").unwrap_or(defaults.locale);
        let script_path = lookup("INTAKE_SCRIPT")
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);

        let check_in_after =
            seconds(&lookup, "INTAKE_CHECK_IN_SECS")?.unwrap_or(defaults.check_in_after);
        let hang_up_after =
            seconds(&lookup, "INTAKE_HANG_UP_SECS")?.unwrap_or(defaults.hang_up_after);

        let barge_in = match lookup("INTAKE_BARGE_IN") {
            None => false,
            Some(value) => match value.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => true,
                "false" | "0" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::InvalidVar {
                        name: "INTAKE_BARGE_IN",
                        value,
                    });
                }
            },
        };

        Ok(Self {
            log_level,
            locale,
            script_path,
            check_in_after,
            hang_up_after,
            barge_in,
        })
    }

    /// Session timings with this configuration applied.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            locale: self.locale.clone(),
            check_in_after: self.check_in_after,
            hang_up_after: self.hang_up_after,
            barge_in: self.barge_in,
            ..SessionConfig::default()
        }
    }
}

fn seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    let Some(value) = lookup(name) else {
        return Ok(None);
    };
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Some(Duration::from_secs(secs))),
        _ => Err(ConfigError::InvalidVar { name, value }),
    }
}
