#[cfg(feature = "dashmap")]
#[cfg_attr(docsrs, doc(cfg(feature = "dashmap")))]
pub mod memory;

#[cfg(feature = "redis")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
pub mod redis;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use thiserror::Error;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Decision {
    Allowed,
    Denied,
}

impl Decision {
    pub fn from_allowed(allowed: bool) -> Self {
        if allowed {
            Self::Allowed
        } else {
            Self::Denied
        }
    }

    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn is_denied(self) -> bool {
        matches!(self, Self::Denied)
    }
}

/// What kind of subject a rate limit identifier refers to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierType {
    User,
    Ip,
}

impl IdentifierType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Ip => "ip",
        }
    }
}

impl Display for IdentifierType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bucket granularity of a stored window.
///
/// Minute and hour rows for the same key are kept apart by their tier, since both truncations
/// land on the same timestamp at the top of every hour.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowTier {
    Minute,
    Hour,
}

impl WindowTier {
    /// Tiers in the order they are checked.
    pub const ALL: [WindowTier; 2] = [WindowTier::Minute, WindowTier::Hour];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
        }
    }

    pub fn length(self) -> Duration {
        match self {
            Self::Minute => Duration::seconds(60),
            Self::Hour => Duration::seconds(3600),
        }
    }

    /// Truncates a timestamp down to the start of the bucket containing it.
    pub fn truncate(self, at: DateTime<Utc>) -> DateTime<Utc> {
        let secs = at.timestamp();
        let start = secs - secs.rem_euclid(self.length().num_seconds());
        DateTime::from_timestamp(start, 0).unwrap_or(at)
    }
}

/// The tuple that addresses a family of stored windows.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct WindowKey {
    pub identifier: String,
    pub identifier_type: IdentifierType,
    pub function_name: String,
}

impl WindowKey {
    pub fn new(
        identifier: impl Into<String>,
        identifier_type: IdentifierType,
        function_name: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            identifier_type,
            function_name: function_name.into(),
        }
    }
}

/// Request count accrued by one key within one bucket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitWindow {
    pub identifier: String,
    pub identifier_type: IdentifierType,
    pub function_name: String,
    pub tier: WindowTier,
    pub window_start: DateTime<Utc>,
    pub request_count: u64,
    pub updated_at: DateTime<Utc>,
}

impl RateLimitWindow {
    /// Time at which this bucket stops counting.
    pub fn reset(&self) -> DateTime<Utc> {
        self.window_start + self.tier.length()
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(
        #[source]
        #[from]
        ::redis::RedisError,
    ),
    #[error("Unable to encode stored value: {0}")]
    Encoding(
        #[source]
        #[from]
        serde_json::Error,
    ),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Describes persistent storage for rate limit windows.
///
/// Implementations are shared between requests, so they must be cheap to reference from many
/// handlers at once (usually an [Arc](std::sync::Arc) around a pool or map).
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Deletes every window, for any key, whose `window_start` is before `before`.
    ///
    /// Returns the number of windows removed where the store is able to report it.
    async fn delete_expired(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Finds the most recent window of the given tier for `key` whose `window_start` is strictly
    /// after `since`.
    async fn latest_window(
        &self,
        key: &WindowKey,
        tier: WindowTier,
        since: DateTime<Utc>,
    ) -> Result<Option<RateLimitWindow>, StoreError>;

    /// Increments the counter of the window starting at `window_start`, creating it with a count
    /// of 1 if it doesn't exist.
    ///
    /// Returns the window after the increment.
    async fn increment(
        &self,
        key: &WindowKey,
        tier: WindowTier,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RateLimitWindow, StoreError>;
}
