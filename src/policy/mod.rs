use crate::backend::WindowTier;
use serde::{Deserialize, Serialize};

/// Request allowance for one protected function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// The total requests to be allowed within a minute bucket.
    pub requests_per_minute: u64,
    /// The total requests to be allowed within an hour bucket.
    pub requests_per_hour: u64,
}

impl RateLimitPolicy {
    pub const fn new(requests_per_minute: u64, requests_per_hour: u64) -> Self {
        Self {
            requests_per_minute,
            requests_per_hour,
        }
    }

    pub fn limit(&self, tier: WindowTier) -> u64 {
        match tier {
            WindowTier::Minute => self.requests_per_minute,
            WindowTier::Hour => self.requests_per_hour,
        }
    }
}
