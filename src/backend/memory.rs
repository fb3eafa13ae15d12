use crate::backend::{RateLimitStore, RateLimitWindow, StoreError, WindowKey, WindowTier};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::Arc;

/// Windows of one key and tier, ordered by start.
type Windows = BTreeMap<DateTime<Utc>, RateLimitWindow>;

/// A [RateLimitStore] that uses [Dashmap](dashmap::DashMap) to keep windows in memory.
///
/// Windows are grouped per key and tier, so lookups do not depend on how many other callers
/// are being tracked. Only suitable for a single instance deployment, or for tests.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    map: Arc<DashMap<(WindowKey, WindowTier), Windows>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of windows currently held.
    pub fn len(&self) -> usize {
        self.map.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a copy of every stored window.
    pub fn windows(&self) -> Vec<RateLimitWindow> {
        self.map
            .iter()
            .flat_map(|entry| entry.value().values().cloned().collect::<Vec<_>>())
            .collect()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryStore {
    async fn delete_expired(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut removed = 0;
        self.map.retain(|_k, windows| {
            let kept = windows.split_off(&before);
            removed += windows.len() as u64;
            *windows = kept;
            !windows.is_empty()
        });
        Ok(removed)
    }

    async fn latest_window(
        &self,
        key: &WindowKey,
        tier: WindowTier,
        since: DateTime<Utc>,
    ) -> Result<Option<RateLimitWindow>, StoreError> {
        Ok(self.map.get(&(key.clone(), tier)).and_then(|windows| {
            windows
                .range((Excluded(since), Unbounded))
                .next_back()
                .map(|(_, window)| window.clone())
        }))
    }

    async fn increment(
        &self,
        key: &WindowKey,
        tier: WindowTier,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RateLimitWindow, StoreError> {
        let mut windows = self.map.entry((key.clone(), tier)).or_default();
        let window = windows
            .entry(window_start)
            .and_modify(|v| {
                v.request_count += 1;
                v.updated_at = now;
            })
            .or_insert_with(|| RateLimitWindow {
                identifier: key.identifier.clone(),
                identifier_type: key.identifier_type,
                function_name: key.function_name.clone(),
                tier,
                window_start,
                request_count: 1,
                updated_at: now,
            });
        Ok(window.clone())
    }
}
