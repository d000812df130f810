use std::env;

use chrono::Duration;

const DEFAULT_SUBJECT_WINDOW_DAYS: i64 = 30;
const MAX_SUBJECT_WINDOW_DAYS: i64 = 36_500;

/// Runtime configuration for thread assembly.
#[derive(Debug, Clone)]
pub struct ThreadingConfig {
    /// Whether the subject + participant fallback is used at all.
    pub subject_matching: bool,
    /// How far back a thread's last activity may be for a subject match.
    pub subject_window: Duration,
}

impl ThreadingConfig {
    pub fn from_env() -> Self {
        let subject_matching = env::var("THREADING_SUBJECT_MATCHING")
            .ok()
            .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(true);
        let window_days = env::var("THREADING_SUBJECT_WINDOW_DAYS")
            .ok()
            .and_then(|value| value.parse::<i64>().ok())
            .filter(|days| *days > 0)
            .unwrap_or(DEFAULT_SUBJECT_WINDOW_DAYS);

        Self {
            subject_matching,
            subject_window: subject_window_from_days(window_days),
        }
    }
}

fn subject_window_from_days(days: i64) -> Duration {
    if days > MAX_SUBJECT_WINDOW_DAYS {
        log::warn!(
            "THREADING_SUBJECT_WINDOW_DAYS={} exceeds {}, clamping",
            days,
            MAX_SUBJECT_WINDOW_DAYS
        );
    }
    Duration::try_days(days.min(MAX_SUBJECT_WINDOW_DAYS))
        .unwrap_or_else(|| Duration::days(DEFAULT_SUBJECT_WINDOW_DAYS))
}

impl Default for ThreadingConfig {
    fn default() -> Self {
        Self {
            subject_matching: true,
            subject_window: Duration::days(DEFAULT_SUBJECT_WINDOW_DAYS),
        }
    }
}
