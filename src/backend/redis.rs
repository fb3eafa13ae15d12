use crate::backend::{RateLimitStore, RateLimitWindow, StoreError, WindowKey, WindowTier};
use crate::error_log::{ErrorLog, ErrorLogEntry};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::aio::ConnectionManager;

const COUNT_FIELD: &str = "request_count";
const UPDATED_FIELD: &str = "updated_at";

/// Seconds after its start that a window is kept, matching the limiter's garbage collection
/// horizon. The hour bucket ends at exactly this instant.
const RETENTION_SECONDS: i64 = 3600;

/// A [RateLimitStore] that keeps each window as a Redis hash.
///
/// Expired windows are removed by Redis itself (every window is written with an `EXPIREAT`), so
/// [RateLimitStore::delete_expired] has nothing to do.
///
/// Windows are assumed to be aligned to their tier, as the
/// [RateLimiter](crate::limiter::RateLimiter) writes them.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    key_prefix: Option<String>,
}

impl RedisStore {
    /// Create a RedisStore builder.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use function_gate::backend::redis::RedisStore;
    /// # use redis::aio::ConnectionManager;
    /// # async fn example() {
    /// let client = redis::Client::open("redis://127.0.0.1/").unwrap();
    /// let manager = ConnectionManager::new(client).await.unwrap();
    /// let store = RedisStore::builder(manager).key_prefix(Some("gate:")).build();
    /// # };
    /// ```
    pub fn builder(connection: ConnectionManager) -> Builder {
        Builder {
            connection,
            key_prefix: None,
        }
    }

    fn make_key(&self, key: &WindowKey, tier: WindowTier, window_start: DateTime<Utc>) -> String {
        format!(
            "{}{}:{}:{}:{}:{}",
            self.key_prefix.as_deref().unwrap_or_default(),
            key.function_name,
            key.identifier_type,
            key.identifier,
            tier.as_str(),
            window_start.timestamp()
        )
    }
}

pub struct Builder {
    connection: ConnectionManager,
    key_prefix: Option<String>,
}

impl Builder {
    /// Apply an optional prefix to all keys written by this store.
    ///
    /// The prefix acts as a namespace when the Redis instance is shared with other caches.
    pub fn key_prefix(mut self, key_prefix: Option<&str>) -> Self {
        self.key_prefix = key_prefix.map(ToOwned::to_owned);
        self
    }

    pub fn build(self) -> RedisStore {
        RedisStore {
            connection: self.connection,
            key_prefix: self.key_prefix,
        }
    }
}

#[async_trait]
impl RateLimitStore for RedisStore {
    async fn delete_expired(&self, _before: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(0)
    }

    async fn latest_window(
        &self,
        key: &WindowKey,
        tier: WindowTier,
        since: DateTime<Utc>,
    ) -> Result<Option<RateLimitWindow>, StoreError> {
        // The only aligned bucket in (since, since + length]
        let window_start = tier.truncate(since) + tier.length();
        let redis_key = self.make_key(key, tier, window_start);
        let mut con = self.connection.clone();
        let (count, updated): (Option<u64>, Option<i64>) = redis::cmd("HMGET")
            .arg(&redis_key)
            .arg(COUNT_FIELD)
            .arg(UPDATED_FIELD)
            .query_async(&mut con)
            .await?;
        Ok(count.map(|request_count| RateLimitWindow {
            identifier: key.identifier.clone(),
            identifier_type: key.identifier_type,
            function_name: key.function_name.clone(),
            tier,
            window_start,
            request_count,
            updated_at: updated
                .and_then(|ts| DateTime::from_timestamp(ts, 0))
                .unwrap_or(window_start),
        }))
    }

    async fn increment(
        &self,
        key: &WindowKey,
        tier: WindowTier,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RateLimitWindow, StoreError> {
        let redis_key = self.make_key(key, tier, window_start);
        let expire_at = window_start + Duration::seconds(RETENTION_SECONDS);

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("HINCRBY")
            .arg(&redis_key)
            .arg(COUNT_FIELD)
            .arg(1)
            .cmd("HSET")
            .arg(&redis_key)
            .arg(UPDATED_FIELD)
            .arg(now.timestamp())
            .ignore()
            .cmd("EXPIREAT")
            .arg(&redis_key)
            .arg(expire_at.timestamp())
            .ignore();

        let mut con = self.connection.clone();
        let (request_count,): (u64,) = pipe.query_async(&mut con).await?;
        Ok(RateLimitWindow {
            identifier: key.identifier.clone(),
            identifier_type: key.identifier_type,
            function_name: key.function_name.clone(),
            tier,
            window_start,
            request_count,
            updated_at: now,
        })
    }
}

/// An [ErrorLog] that appends JSON encoded entries to a capped Redis list.
#[derive(Clone)]
pub struct RedisErrorLog {
    connection: ConnectionManager,
    list_key: String,
    max_entries: usize,
}

impl RedisErrorLog {
    pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

    pub fn new(connection: ConnectionManager, list_key: impl Into<String>) -> Self {
        Self {
            connection,
            list_key: list_key.into(),
            max_entries: Self::DEFAULT_MAX_ENTRIES,
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }
}

#[async_trait]
impl ErrorLog for RedisErrorLog {
    async fn record(&self, entry: ErrorLogEntry) -> Result<(), StoreError> {
        let json = serde_json::to_string(&entry)?;
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("RPUSH")
            .arg(&self.list_key)
            .arg(json)
            .ignore()
            .cmd("LTRIM")
            .arg(&self.list_key)
            .arg(-(self.max_entries as i64))
            .arg(-1)
            .ignore();
        let mut con = self.connection.clone();
        let () = pipe.query_async(&mut con).await?;
        Ok(())
    }
}
