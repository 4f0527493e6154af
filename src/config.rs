//! User configuration.
//!
//! Read from a JSON file with the same camelCase keys the editor settings
//! used. Every key has a default; a missing file means all defaults.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Longest settle delay honored, in seconds.
pub const MAX_RESPONSE_DELAY_SECONDS: u64 = 60 * 60;
/// Longest keep-alive interval honored, in minutes.
pub const MAX_CONTINUOUS_TIMEOUT_MINUTES: u64 = 24 * 60;
/// Longest fast-response threshold honored, in seconds.
pub const MAX_FAST_RESPONSE_TIMEOUT_SECONDS: u64 = 60 * 60;
/// Longest inactivity before sleep prevention is released, in minutes.
pub const MAX_SLEEP_PREVENTION_IDLE_MINUTES: u64 = 24 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Settle delay between seeing a dialog and answering it
    pub auto_response_delay_seconds: u64,
    /// Keep-alive interval in continuous mode
    pub continuous_timeout_minutes: u64,
    /// Whether the toggle cycle includes continuous mode
    pub enable_continuous_mode: bool,
    /// Answer "2" when the dialog offers "don't ask again this session"
    pub enable_dont_ask_again: bool,
    /// Backup poll of the log in case change notifications are missed
    pub enable_terminal_buffer_refresh: bool,
    /// Answer even when the buffer contains a destructive command
    pub ignore_destructive_commands_detection: bool,
    /// Extra destructive-command regexes (case-insensitive)
    pub custom_blacklist: Vec<String>,
    pub enable_fast_response_pause: bool,
    /// Keep-alive answers quicker than this count as "fast"
    pub fast_response_timeout_seconds: u64,
    /// Consecutive fast answers before continuous mode pauses itself
    pub fast_response_limit: u32,
    /// Switch to continuous mode while the usage-limit banner is shown
    pub enable_usage_limit_auto_switch: bool,
    /// Record sent answers and vetoes in the skipped-question log
    pub log_skipped_questions: bool,
    /// Send a newline after a response code
    pub append_newline_to_response: bool,
    /// Release sleep prevention after this long without terminal activity
    pub sleep_prevention_idle_minutes: u64,
    pub debug_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auto_response_delay_seconds: 5,
            continuous_timeout_minutes: 30,
            enable_continuous_mode: true,
            enable_dont_ask_again: true,
            enable_terminal_buffer_refresh: true,
            ignore_destructive_commands_detection: false,
            custom_blacklist: Vec::new(),
            enable_fast_response_pause: true,
            fast_response_timeout_seconds: 10,
            fast_response_limit: 3,
            enable_usage_limit_auto_switch: true,
            log_skipped_questions: true,
            append_newline_to_response: false,
            sleep_prevention_idle_minutes: 60,
            debug_mode: false,
        }
    }
}

impl Config {
    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content).map_err(|source| Error::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(content: &str) -> std::result::Result<Self, serde_json::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(content)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.response_delay_secs())
    }

    fn response_delay_secs(&self) -> u64 {
        self.auto_response_delay_seconds.min(MAX_RESPONSE_DELAY_SECONDS)
    }

    /// Smallest keep-alive interval that cannot race the settle delay.
    ///
    /// The delay rounded up to whole minutes, plus one, so always strictly
    /// longer than the delay itself.
    pub fn min_continuous_timeout_minutes(&self) -> u64 {
        self.response_delay_secs().div_ceil(60) + 1
    }

    /// Keep-alive interval, and whether the configured value was raised.
    pub fn effective_continuous_timeout(&self) -> (Duration, bool) {
        let floor = self.min_continuous_timeout_minutes();
        let clamped = self.continuous_timeout_minutes < floor;
        let minutes = self
            .continuous_timeout_minutes
            .min(MAX_CONTINUOUS_TIMEOUT_MINUTES)
            .max(floor);
        (Duration::from_secs(minutes.saturating_mul(60)), clamped)
    }

    pub fn fast_response_timeout(&self) -> Duration {
        Duration::from_secs(
            self.fast_response_timeout_seconds
                .min(MAX_FAST_RESPONSE_TIMEOUT_SECONDS),
        )
    }

    pub fn sleep_prevention_idle(&self) -> Duration {
        let minutes = self
            .sleep_prevention_idle_minutes
            .min(MAX_SLEEP_PREVENTION_IDLE_MINUTES);
        Duration::from_secs(minutes.saturating_mul(60))
    }

    /// Log a warning for every value that will be corrected at use time.
    pub fn warn_on_clamps(&self) {
        if self.auto_response_delay_seconds > MAX_RESPONSE_DELAY_SECONDS {
            warn!(
                "autoResponseDelaySeconds={} is too long, using {}",
                self.auto_response_delay_seconds, MAX_RESPONSE_DELAY_SECONDS
            );
        }
        let (timeout, clamped) = self.effective_continuous_timeout();
        if clamped {
            warn!(
                "continuousTimeoutMinutes={} is shorter than the settle delay allows, using {} minutes",
                self.continuous_timeout_minutes,
                timeout.as_secs() / 60
            );
        } else if self.continuous_timeout_minutes > MAX_CONTINUOUS_TIMEOUT_MINUTES {
            warn!(
                "continuousTimeoutMinutes={} is too long, using {} minutes",
                self.continuous_timeout_minutes, MAX_CONTINUOUS_TIMEOUT_MINUTES
            );
        }
        if self.fast_response_timeout_seconds > MAX_FAST_RESPONSE_TIMEOUT_SECONDS {
            warn!(
                "fastResponseTimeoutSeconds={} is too long, using {}",
                self.fast_response_timeout_seconds, MAX_FAST_RESPONSE_TIMEOUT_SECONDS
            );
        }
        if self.sleep_prevention_idle_minutes > MAX_SLEEP_PREVENTION_IDLE_MINUTES {
            warn!(
                "sleepPreventionIdleMinutes={} is too long, using {}",
                self.sleep_prevention_idle_minutes, MAX_SLEEP_PREVENTION_IDLE_MINUTES
            );
        }
        if self.enable_fast_response_pause && self.fast_response_limit == 0 {
            warn!("fastResponseLimit=0 would pause on the first keep-alive, using 1");
        }
    }

    pub fn fast_response_limit(&self) -> u32 {
        self.fast_response_limit.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.auto_response_delay_seconds, 5);
        assert_eq!(config.continuous_timeout_minutes, 30);
        assert!(!config.append_newline_to_response);
        assert!(config.custom_blacklist.is_empty());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = Config::from_json(
            r#"{"autoResponseDelaySeconds": 2, "customBlacklist": ["terraform destroy"], "unknownKey": 1}"#,
        )
        .unwrap();
        assert_eq!(config.auto_response_delay_seconds, 2);
        assert_eq!(config.custom_blacklist, vec!["terraform destroy".to_string()]);
        assert_eq!(config.continuous_timeout_minutes, 30);
        assert!(config.enable_dont_ask_again);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_invalid_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Config::load(&path), Err(Error::Config { .. })));
    }

    #[test]
    fn test_effective_timeout_no_clamp() {
        let config = Config::default();
        let (timeout, clamped) = config.effective_continuous_timeout();
        assert_eq!(timeout, Duration::from_secs(30 * 60));
        assert!(!clamped);
    }

    #[test]
    fn test_effective_timeout_clamped() {
        // 5 s rounds up to one minute, plus one
        let config = Config {
            continuous_timeout_minutes: 0,
            ..Config::default()
        };
        let (timeout, clamped) = config.effective_continuous_timeout();
        assert_eq!(timeout, Duration::from_secs(2 * 60));
        assert!(clamped);

        let config = Config {
            continuous_timeout_minutes: 0,
            auto_response_delay_seconds: 0,
            ..Config::default()
        };
        let (timeout, clamped) = config.effective_continuous_timeout();
        assert_eq!(timeout, Duration::from_secs(60));
        assert!(clamped);
    }

    #[test]
    fn test_floor_rounds_partial_minutes_up() {
        let config = Config {
            continuous_timeout_minutes: 2,
            auto_response_delay_seconds: 90,
            ..Config::default()
        };
        assert_eq!(config.min_continuous_timeout_minutes(), 3);
        let (timeout, clamped) = config.effective_continuous_timeout();
        assert_eq!(timeout, Duration::from_secs(3 * 60));
        assert!(clamped);

        let config = Config {
            continuous_timeout_minutes: 2,
            auto_response_delay_seconds: 60,
            ..Config::default()
        };
        let (timeout, clamped) = config.effective_continuous_timeout();
        assert_eq!(timeout, Duration::from_secs(2 * 60));
        assert!(!clamped);
    }

    #[test]
    fn test_huge_values_are_capped() {
        let config = Config {
            auto_response_delay_seconds: u64::MAX,
            continuous_timeout_minutes: u64::MAX,
            fast_response_timeout_seconds: u64::MAX,
            sleep_prevention_idle_minutes: u64::MAX,
            ..Config::default()
        };
        config.warn_on_clamps();

        assert_eq!(
            config.settle_delay(),
            Duration::from_secs(MAX_RESPONSE_DELAY_SECONDS)
        );
        let (timeout, clamped) = config.effective_continuous_timeout();
        assert_eq!(
            timeout,
            Duration::from_secs(MAX_CONTINUOUS_TIMEOUT_MINUTES * 60)
        );
        assert!(!clamped);
        assert_eq!(
            config.fast_response_timeout(),
            Duration::from_secs(MAX_FAST_RESPONSE_TIMEOUT_SECONDS)
        );
        assert_eq!(
            config.sleep_prevention_idle(),
            Duration::from_secs(MAX_SLEEP_PREVENTION_IDLE_MINUTES * 60)
        );
    }
}
