//! The counting and admission core.

use std::sync::Arc;
use std::time::Duration;

use crate::error::LimitError;
use crate::store::CounterStore;
use crate::window::WindowHasher;

/// How many times [`RateLimiter::attempt`] re-runs its read-check-write cycle
/// when conditional writes keep losing to concurrent callers.
///
/// Every lost round means some other caller committed an increment, and
/// commits stop once the count reaches `max`, so a single attempt can lose at
/// most `max` rounds. Budgets below this bound can never exhaust it.
pub const MAX_CONFLICT_RETRIES: usize = 8;

/// Fixed-window rate limiter over a shared counter store.
///
/// The limiter holds no mutable state of its own: every operation derives the
/// current window key from the hasher and goes to the store, so any number of
/// processes pointed at the same store enforce one shared budget. Attempts
/// are admitted while the count already recorded this window is below `max`,
/// and rejected (without being counted) from then on. When the calendar rolls
/// into the next window the hasher produces a fresh key and counting starts
/// over; the store's expiry only sweeps up abandoned records.
pub struct RateLimiter<S, H> {
    store: Arc<S>,
    hasher: H,
    max: i64,
}

impl<S, H> RateLimiter<S, H>
where
    S: CounterStore,
    H: WindowHasher,
{
    /// Create a limiter admitting at most `max` attempts per identifier per
    /// window.
    ///
    /// `max` is taken as given: zero admits nothing, and a negative value
    /// behaves like zero.
    pub fn new(store: S, hasher: H, max: i64) -> Self {
        Self { store: Arc::new(store), hasher, max }
    }

    /// The per-window budget.
    pub fn max(&self) -> i64 {
        self.max
    }

    /// Length of one window, e.g. for a retry-after estimate on rejection.
    pub fn period(&self) -> Duration {
        self.hasher.period()
    }

    /// Whether `id` has a counter record in the current window, i.e. whether
    /// at least one attempt was admitted this window.
    pub async fn has(&self, id: &str) -> Result<bool, LimitError<S::Error>> {
        let key = self.hasher.hash(id);
        self.store.exists(&key).await.map_err(LimitError::Store)
    }

    /// Number of attempts admitted for `id` in the current window. Zero when
    /// no record exists.
    pub async fn attempted(&self, id: &str) -> Result<i64, LimitError<S::Error>> {
        let key = self.hasher.hash(id);
        Ok(self.read_count(&key).await?.unwrap_or(0))
    }

    /// Remaining budget for `id` in the current window, floored at zero.
    pub async fn left(&self, id: &str) -> Result<i64, LimitError<S::Error>> {
        let attempted = self.attempted(id).await?;
        Ok((self.max - attempted).max(0))
    }

    /// Record an attempt for `id` if the window budget allows it.
    ///
    /// Returns `Ok(true)` after incrementing the counter when admitted, or
    /// `Ok(false)` without touching the store when the budget is spent. The
    /// increment and the expiry re-arm are one atomic store operation,
    /// conditioned on the count this call's admission check read; when a
    /// concurrent caller commits first, the whole cycle re-runs against the
    /// fresh count, up to [`MAX_CONFLICT_RETRIES`] times.
    pub async fn attempt(&self, id: &str) -> Result<bool, LimitError<S::Error>> {
        let key = self.hasher.hash(id);
        let ttl = self.hasher.period();

        for round in 0..MAX_CONFLICT_RETRIES {
            let seen = self.read_count(&key).await?;
            let count = seen.unwrap_or(0);
            if count >= self.max {
                tracing::debug!(key = %key, count, max = self.max, "Rate limiter: attempt rejected");
                return Ok(false);
            }
            if self
                .store
                .incr_and_expire(&key, ttl, seen)
                .await
                .map_err(LimitError::Store)?
            {
                return Ok(true);
            }
            // Another caller committed between our read and our write; check
            // admission again against the fresh count.
            tracing::trace!(key = %key, round, "Rate limiter: conditional write lost");
        }

        Err(LimitError::Contention { key, retries: MAX_CONFLICT_RETRIES })
    }

    async fn read_count(&self, key: &str) -> Result<Option<i64>, LimitError<S::Error>> {
        match self.store.get(key).await.map_err(LimitError::Store)? {
            None => Ok(None),
            Some(raw) => match raw.parse::<i64>() {
                Ok(count) => Ok(Some(count)),
                Err(_) => Err(LimitError::Corrupt { key: key.to_owned(), value: raw }),
            },
        }
    }
}
