//! Window hashers derive the store key for an identifier's current period.
//!
//! A hasher fixes the granularity of any limiter built on top of it. Keys are
//! calendar-aligned and derived from UTC, so every process sharing a store
//! maps the same instant to the same key; when the calendar rolls into the
//! next period the key changes and counting starts fresh. The first window an
//! identifier ever sees is therefore usually partial.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};

/// Derives per-period store keys for identifiers.
///
/// Implementations must be pure in (identifier, current instant): the same
/// identifier maps to the same key for the whole period, and distinct
/// identifiers never collide within one.
pub trait WindowHasher: Send + Sync {
    /// Store key holding `id`'s counter for the current period.
    fn hash(&self, id: &str) -> String;

    /// Length of one period. Doubles as the counter TTL and as a caller's
    /// retry estimate after a rejection.
    fn period(&self) -> Duration;
}

/// Keys roll over every calendar second.
///
/// The key suffix is the Unix timestamp, e.g. `"203.0.113.7:1700000000"`.
#[derive(Debug, Clone)]
pub struct PerSecondHasher {
    clock: Arc<dyn Clock>,
}

impl PerSecondHasher {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl Default for PerSecondHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowHasher for PerSecondHasher {
    fn hash(&self, id: &str) -> String {
        format!("{}:{}", id, self.clock.now().timestamp())
    }

    fn period(&self) -> Duration {
        Duration::from_secs(1)
    }
}

/// Keys roll over every calendar minute.
///
/// The key suffix is the minute truncation of UTC now, e.g.
/// `"203.0.113.7:2023-11-14T22:13"`.
#[derive(Debug, Clone)]
pub struct PerMinuteHasher {
    clock: Arc<dyn Clock>,
}

impl PerMinuteHasher {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl Default for PerMinuteHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowHasher for PerMinuteHasher {
    fn hash(&self, id: &str) -> String {
        format!("{}:{}", id, self.clock.now().format("%Y-%m-%dT%H:%M"))
    }

    fn period(&self) -> Duration {
        Duration::from_secs(60)
    }
}

/// Keys roll over every calendar hour.
///
/// The key suffix is the hour truncation of UTC now, e.g.
/// `"203.0.113.7:2023-11-14T22"`.
#[derive(Debug, Clone)]
pub struct PerHourHasher {
    clock: Arc<dyn Clock>,
}

impl PerHourHasher {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl Default for PerHourHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowHasher for PerHourHasher {
    fn hash(&self, id: &str) -> String {
        format!("{}:{}", id, self.clock.now().format("%Y-%m-%dT%H"))
    }

    fn period(&self) -> Duration {
        Duration::from_secs(60 * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn clocked<H>(build: impl Fn(Arc<dyn Clock>) -> H) -> (H, ManualClock) {
        let clock = ManualClock::epoch();
        let hasher = build(Arc::new(clock.clone()));
        (hasher, clock)
    }

    #[test]
    fn per_second_key_is_stable_within_the_second() {
        let (hasher, _clock) = clocked(PerSecondHasher::with_clock);
        assert_eq!(hasher.hash("10.0.0.1"), hasher.hash("10.0.0.1"));
        assert_eq!(hasher.hash("10.0.0.1"), "10.0.0.1:0");
    }

    #[test]
    fn per_second_key_rolls_with_the_clock() {
        let (hasher, clock) = clocked(PerSecondHasher::with_clock);
        let before = hasher.hash("10.0.0.1");
        clock.advance(Duration::from_secs(1));
        let after = hasher.hash("10.0.0.1");
        assert_ne!(before, after);
        assert_eq!(after, "10.0.0.1:1");
    }

    #[test]
    fn per_minute_key_survives_seconds_but_not_minutes() {
        let (hasher, clock) = clocked(PerMinuteHasher::with_clock);
        let start = hasher.hash("10.0.0.1");
        assert_eq!(start, "10.0.0.1:1970-01-01T00:00");

        clock.advance(Duration::from_secs(59));
        assert_eq!(hasher.hash("10.0.0.1"), start);

        clock.advance(Duration::from_secs(1));
        assert_eq!(hasher.hash("10.0.0.1"), "10.0.0.1:1970-01-01T00:01");
    }

    #[test]
    fn per_hour_key_survives_minutes_but_not_hours() {
        let (hasher, clock) = clocked(PerHourHasher::with_clock);
        let start = hasher.hash("10.0.0.1");
        assert_eq!(start, "10.0.0.1:1970-01-01T00");

        clock.advance(Duration::from_secs(59 * 60));
        assert_eq!(hasher.hash("10.0.0.1"), start);

        clock.advance(Duration::from_secs(60));
        assert_eq!(hasher.hash("10.0.0.1"), "10.0.0.1:1970-01-01T01");
    }

    #[test]
    fn distinct_identifiers_never_share_a_key() {
        let (hasher, _clock) = clocked(PerMinuteHasher::with_clock);
        assert_ne!(hasher.hash("10.0.0.1"), hasher.hash("10.0.0.2"));
    }

    #[test]
    fn empty_identifier_yields_a_distinct_stable_key() {
        let (hasher, _clock) = clocked(PerMinuteHasher::with_clock);
        assert_eq!(hasher.hash(""), ":1970-01-01T00:00");
        assert_ne!(hasher.hash(""), hasher.hash("10.0.0.1"));
    }

    #[test]
    fn periods_match_granularity() {
        assert_eq!(PerSecondHasher::new().period(), Duration::from_secs(1));
        assert_eq!(PerMinuteHasher::new().period(), Duration::from_secs(60));
        assert_eq!(PerHourHasher::new().period(), Duration::from_secs(3600));
    }

    #[test]
    fn default_hashers_use_the_system_clock() {
        // Smoke test only: the key embeds whatever "now" is.
        let key = PerSecondHasher::default().hash("10.0.0.1");
        assert!(key.starts_with("10.0.0.1:"));
        assert!(key.len() > "10.0.0.1:".len());
    }
}
