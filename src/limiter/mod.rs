use crate::backend::{Decision, RateLimitStore, WindowKey, WindowTier};
use crate::clock::{Clock, SystemClock};
use crate::identifier::RateLimitIdentifier;
use crate::policy::RateLimitPolicy;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Windows older than this are removed at the start of every check.
pub const GC_HORIZON_SECONDS: i64 = 3600;

/// Result of [RateLimiter::check_and_consume].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RateLimitOutcome {
    Allowed,
    Denied {
        /// Seconds until the exhausted bucket resets, at least 1.
        retry_after_seconds: u64,
    },
}

impl RateLimitOutcome {
    pub fn decision(&self) -> Decision {
        Decision::from_allowed(matches!(self, Self::Allowed))
    }

    pub fn is_allowed(&self) -> bool {
        self.decision().is_allowed()
    }

    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::Allowed => None,
            Self::Denied {
                retry_after_seconds,
            } => Some(*retry_after_seconds),
        }
    }
}

/// Two-tier fixed window rate limiter shared by every function.
///
/// Each check reads the current minute and hour buckets for the caller, and if both are under
/// the policy, increments both. Check and increment are separate store operations, so two
/// concurrent requests at the edge of a limit may both be allowed.
///
/// Store failures never deny a request: a failed read allows it, and a failed write is logged
/// and ignored.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn RateLimitStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn check_and_consume(
        &self,
        identifier: &RateLimitIdentifier,
        function_name: &str,
        policy: &RateLimitPolicy,
    ) -> RateLimitOutcome {
        let now = self.clock.now();
        let key = WindowKey::new(identifier.value(), identifier.kind(), function_name);

        if let Err(e) = self
            .store
            .delete_expired(now - Duration::seconds(GC_HORIZON_SECONDS))
            .await
        {
            log::warn!("Rate limit garbage collection failed: {e}");
        }

        for tier in WindowTier::ALL {
            match self.check_tier(&key, tier, policy.limit(tier), now).await {
                Ok(RateLimitOutcome::Allowed) => {}
                Ok(denied) => {
                    log::debug!(
                        "Rate limit ({}) exceeded for {} {} on {function_name}",
                        tier.as_str(),
                        key.identifier_type,
                        key.identifier
                    );
                    return denied;
                }
                Err(e) => {
                    log::warn!(
                        "Rate limit check failed: {e}, allowing the request to {function_name} anyway"
                    );
                    return RateLimitOutcome::Allowed;
                }
            }
        }

        for tier in WindowTier::ALL {
            if let Err(e) = self
                .store
                .increment(&key, tier, tier.truncate(now), now)
                .await
            {
                log::warn!(
                    "Unable to record {} rate limit window for {function_name}: {e}",
                    tier.as_str()
                );
            }
        }

        RateLimitOutcome::Allowed
    }

    async fn check_tier(
        &self,
        key: &WindowKey,
        tier: WindowTier,
        limit: u64,
        now: DateTime<Utc>,
    ) -> Result<RateLimitOutcome, crate::backend::StoreError> {
        let window = self
            .store
            .latest_window(key, tier, now - tier.length())
            .await?;
        Ok(match window {
            Some(window) if window.request_count >= limit => RateLimitOutcome::Denied {
                retry_after_seconds: seconds_until(window.reset(), now),
            },
            // A zero limit denies even before a window exists
            None if limit == 0 => RateLimitOutcome::Denied {
                retry_after_seconds: seconds_until(tier.truncate(now) + tier.length(), now),
            },
            _ => RateLimitOutcome::Allowed,
        })
    }
}

/// Seconds from `now` until `reset` (rounded upwards, so that it is guaranteed to be reset after
/// waiting for the duration), never less than 1.
fn seconds_until(reset: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (reset - now).num_milliseconds().max(0) as f64;
    ((millis / 1000f64).ceil() as u64).max(1)
}

#[cfg(test)]
mod tests;
