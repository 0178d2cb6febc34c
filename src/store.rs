//! Abstract storage interface for window counters, plus an in-memory
//! implementation for tests and single-process deployments.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clock::{Clock, SystemClock};

/// Storage capability the limiter needs from a backend.
///
/// The model is one record per window key: an integer count with a
/// server-managed expiry. Anything that can provide these three operations
/// can back a limiter, whether a remote Redis or a mutex-guarded map.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Error type for storage operations, surfaced verbatim to callers.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Whether a record exists for `key`.
    async fn exists(&self, key: &str) -> Result<bool, Self::Error>;

    /// Raw stored value for `key`, `Ok(None)` when there is no record.
    /// Absence is a normal outcome, never an error.
    async fn get(&self, key: &str) -> Result<Option<String>, Self::Error>;

    /// Atomically increment the count at `key` (creating it at 1) and re-arm
    /// its expiry to `ttl` from now, but only if the store still holds what
    /// the caller last read: `seen` is that count, `None` meaning "no
    /// record". When an interleaved write has moved the count, the store
    /// changes nothing and returns `Ok(false)`; the caller re-reads and
    /// retries.
    ///
    /// The increment and the expiry update must never be observable as two
    /// separate steps.
    async fn incr_and_expire(
        &self,
        key: &str,
        ttl: Duration,
        seen: Option<i64>,
    ) -> Result<bool, Self::Error>;
}

#[derive(Debug, Clone, Copy)]
struct Record {
    count: i64,
    expires_at: DateTime<Utc>,
}

/// Mutex-guarded in-memory counter store with real expiry semantics.
///
/// Records whose expiry has lapsed read as absent, and every write sweeps
/// them out of the map, so rolled-over windows do not accumulate. Clones
/// share the same map, so several limiters (or a limiter and a test
/// assertion) can observe one set of counters. Pairs with
/// [`ManualClock`](crate::ManualClock) for deterministic window tests; shares
/// nothing across processes.
#[derive(Debug, Clone)]
pub struct InMemoryCounterStore {
    clock: Arc<dyn Clock>,
    records: Arc<Mutex<HashMap<String, Record>>>,
}

impl InMemoryCounterStore {
    /// Store running on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Store running on the given clock. Hand the same clock to the window
    /// hasher so counters expire in step with the windows that created them.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock, records: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Live count for `key`, evicting the record first if it has expired.
    fn live_count(
        records: &mut HashMap<String, Record>,
        key: &str,
        now: DateTime<Utc>,
    ) -> Option<i64> {
        match records.get(key) {
            Some(record) if record.expires_at <= now => {
                records.remove(key);
                None
            }
            Some(record) => Some(record.count),
            None => None,
        }
    }
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    type Error = std::convert::Infallible;

    async fn exists(&self, key: &str) -> Result<bool, Self::Error> {
        let now = self.clock.now();
        let mut records = self.records.lock().unwrap();
        Ok(Self::live_count(&mut records, key, now).is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, Self::Error> {
        let now = self.clock.now();
        let mut records = self.records.lock().unwrap();
        Ok(Self::live_count(&mut records, key, now).map(|count| count.to_string()))
    }

    async fn incr_and_expire(
        &self,
        key: &str,
        ttl: Duration,
        seen: Option<i64>,
    ) -> Result<bool, Self::Error> {
        let now = self.clock.now();
        let mut records = self.records.lock().unwrap();

        // Nothing ever touches a rolled-over window's key again, so expired
        // records are swept here rather than left to pile up.
        records.retain(|_, record| record.expires_at > now);

        if Self::live_count(&mut records, key, now) != seen {
            return Ok(false); // count moved since the caller's read
        }

        let expires_at = now
            .checked_add_signed(TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let record =
            records.entry(key.to_string()).or_insert(Record { count: 0, expires_at });
        record.count += 1;
        record.expires_at = expires_at;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn clocked_store() -> (InMemoryCounterStore, ManualClock) {
        let clock = ManualClock::epoch();
        let store = InMemoryCounterStore::with_clock(Arc::new(clock.clone()));
        (store, clock)
    }

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn absent_key_reads_as_nothing() {
        let (store, _clock) = clocked_store();
        assert!(!store.exists("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn first_increment_creates_record_at_one() {
        let (store, _clock) = clocked_store();
        assert!(store.incr_and_expire("k", TTL, None).await.unwrap());
        assert!(store.exists("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn increments_accumulate_when_reads_are_fresh() {
        let (store, _clock) = clocked_store();
        assert!(store.incr_and_expire("k", TTL, None).await.unwrap());
        assert!(store.incr_and_expire("k", TTL, Some(1)).await.unwrap());
        assert!(store.incr_and_expire("k", TTL, Some(2)).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn stale_read_loses_and_changes_nothing() {
        let (store, _clock) = clocked_store();
        assert!(store.incr_and_expire("k", TTL, None).await.unwrap());

        // Expected absent, but a record exists.
        assert!(!store.incr_and_expire("k", TTL, None).await.unwrap());
        // Expected a different count.
        assert!(!store.incr_and_expire("k", TTL, Some(7)).await.unwrap());

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn expired_record_reads_as_absent_and_can_be_recreated() {
        let (store, clock) = clocked_store();
        assert!(store.incr_and_expire("k", TTL, None).await.unwrap());

        clock.advance(TTL + Duration::from_secs(1));
        assert!(!store.exists("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);

        // A fresh create goes back to 1, not 2.
        assert!(store.incr_and_expire("k", TTL, None).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn successful_increment_rearms_expiry() {
        let (store, clock) = clocked_store();
        assert!(store.incr_and_expire("k", TTL, None).await.unwrap());

        clock.advance(Duration::from_secs(45));
        assert!(store.incr_and_expire("k", TTL, Some(1)).await.unwrap());

        // 45s + 45s is past the original expiry but not the re-armed one.
        clock.advance(Duration::from_secs(45));
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let (store, _clock) = clocked_store();
        assert!(store.incr_and_expire("a", TTL, None).await.unwrap());
        assert!(!store.exists("b").await.unwrap());
        assert!(store.incr_and_expire("b", TTL, None).await.unwrap());
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.get("b").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn clones_share_the_same_counters() {
        let (store, _clock) = clocked_store();
        let other = store.clone();
        assert!(store.incr_and_expire("k", TTL, None).await.unwrap());
        assert_eq!(other.get("k").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn writes_sweep_records_from_rolled_over_windows() {
        let (store, clock) = clocked_store();

        for n in 0..100 {
            let key = format!("10.0.0.{n}:w0");
            assert!(store.incr_and_expire(&key, TTL, None).await.unwrap());
        }
        assert_eq!(store.records.lock().unwrap().len(), 100);

        // After rollover the old keys are never touched again; writes under
        // the new window's keys must still reclaim them.
        clock.advance(TTL + Duration::from_secs(1));
        for n in 0..100 {
            let key = format!("10.0.0.{n}:w1");
            assert!(store.incr_and_expire(&key, TTL, None).await.unwrap());
        }
        assert_eq!(store.records.lock().unwrap().len(), 100);
    }
}
