//! Redis counter store for `turnpike` (companion crate).
//! Bring your own connection: the store wraps an existing
//! `redis::aio::ConnectionManager`, so pooling and reconnects stay in the
//! caller's hands.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use std::sync::Arc;
use std::time::Duration;
use turnpike::CounterStore;

/// Conditional increment, run server-side so it is one atomic step.
///
/// KEYS[1] is the counter, ARGV[1] the TTL in milliseconds, ARGV[2] the count
/// the caller last read (empty string for "no record"). Returns 1 when the
/// comparison holds and the increment commits, 0 when an interleaved write
/// won. A script beats WATCH/MULTI here: WATCH state is tied to one
/// connection, which a shared multiplexed manager cannot dedicate to a
/// caller.
const INCR_AND_EXPIRE: &str = r"
local current = redis.call('GET', KEYS[1])
if ARGV[2] == '' then
    if current then return 0 end
elseif current ~= ARGV[2] then
    return 0
end
redis.call('INCR', KEYS[1])
redis.call('PEXPIRE', KEYS[1], ARGV[1])
return 1
";

/// [`CounterStore`] backed by a shared Redis.
///
/// Clones share the underlying connection, so one store can feed several
/// limiters. With a prefix, every counter lives under `prefix:`, keeping
/// limiter keys out of the way of whatever else shares the database.
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
    prefix: Option<String>,
    script: Arc<Script>,
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("prefix", &self.prefix)
            .field("conn", &"<redis::aio::ConnectionManager>")
            .finish()
    }
}

impl RedisCounterStore {
    /// Create a store using an existing connection manager; keys are stored
    /// verbatim.
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn, prefix: None, script: Arc::new(Script::new(INCR_AND_EXPIRE)) }
    }

    /// Like [`RedisCounterStore::new`], but every counter is stored under
    /// `prefix:`.
    ///
    /// # Errors
    /// Returns `Err` if the prefix is empty after normalization or contains
    /// whitespace or control characters.
    pub fn with_prefix(
        conn: ConnectionManager,
        prefix: impl Into<String>,
    ) -> Result<Self, String> {
        let prefix = normalize_prefix(prefix.into())?;
        Ok(Self {
            conn,
            prefix: Some(prefix),
            script: Arc::new(Script::new(INCR_AND_EXPIRE)),
        })
    }

    fn storage_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}:{}", prefix, key),
            None => key.to_string(),
        }
    }
}

/// Normalize: trim whitespace and strip trailing separators, then validate.
fn normalize_prefix(prefix: String) -> Result<String, String> {
    let prefix = prefix.trim().trim_end_matches(':').to_string();

    if prefix.is_empty() {
        return Err("prefix cannot be empty".to_string());
    }
    if prefix.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err("prefix cannot contain whitespace or control characters".to_string());
    }

    Ok(prefix)
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    type Error = redis::RedisError;

    async fn exists(&self, key: &str) -> Result<bool, Self::Error> {
        let mut conn = self.conn.clone();
        redis::cmd("EXISTS").arg(self.storage_key(key)).query_async(&mut conn).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, Self::Error> {
        let mut conn = self.conn.clone();
        redis::cmd("GET").arg(self.storage_key(key)).query_async(&mut conn).await
    }

    async fn incr_and_expire(
        &self,
        key: &str,
        ttl: Duration,
        seen: Option<i64>,
    ) -> Result<bool, Self::Error> {
        let mut conn = self.conn.clone();
        let storage_key = self.storage_key(key);
        // PEXPIRE 0 would delete the record outright.
        let ttl_millis = (ttl.as_millis() as u64).max(1);
        let expected = seen.map(|count| count.to_string()).unwrap_or_default();

        let committed: i64 = self
            .script
            .key(&storage_key)
            .arg(ttl_millis)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;

        if committed == 0 {
            tracing::trace!(
                target: "turnpike::redis",
                key = %storage_key,
                "conditional increment lost to an interleaved write"
            );
        }
        Ok(committed == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_is_trimmed_and_stripped() {
        assert_eq!(normalize_prefix("  api-limits:  ".to_string()).unwrap(), "api-limits");
        assert_eq!(normalize_prefix("api".to_string()).unwrap(), "api");
        assert_eq!(normalize_prefix("a:b:".to_string()).unwrap(), "a:b");
    }

    #[test]
    fn empty_prefix_is_rejected() {
        assert!(normalize_prefix("".to_string()).is_err());
        assert!(normalize_prefix("   ".to_string()).is_err());
        assert!(normalize_prefix("::".to_string()).is_err());
    }

    #[test]
    fn whitespace_and_control_characters_are_rejected() {
        assert!(normalize_prefix("api limits".to_string()).is_err());
        assert!(normalize_prefix("api\tlimits".to_string()).is_err());
        assert!(normalize_prefix("api\u{1}limits".to_string()).is_err());
    }
}
