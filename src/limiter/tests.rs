use super::*;
use crate::backend::memory::InMemoryStore;
use crate::backend::{IdentifierType, RateLimitWindow, StoreError};
use crate::clock::ManualClock;
use async_trait::async_trait;

const FUNCTION: &str = "create-cloudflare-worker";

// 2024-05-01T10:00:00Z, aligned to both a minute and an hour
fn start() -> DateTime<Utc> {
    DateTime::from_timestamp(1_714_557_600, 0).unwrap()
}

fn limiter(store: InMemoryStore) -> (RateLimiter, ManualClock) {
    let clock = ManualClock::new(start());
    let limiter = RateLimiter::with_clock(Arc::new(store), Arc::new(clock.clone()));
    (limiter, clock)
}

struct FlakyStore {
    inner: InMemoryStore,
    fail_reads: bool,
    fail_writes: bool,
}

#[async_trait]
impl RateLimitStore for FlakyStore {
    async fn delete_expired(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        if self.fail_writes {
            return Err(StoreError::Unavailable("delete failed".to_string()));
        }
        self.inner.delete_expired(before).await
    }

    async fn latest_window(
        &self,
        key: &WindowKey,
        tier: WindowTier,
        since: DateTime<Utc>,
    ) -> Result<Option<RateLimitWindow>, StoreError> {
        if self.fail_reads {
            return Err(StoreError::Unavailable("read failed".to_string()));
        }
        self.inner.latest_window(key, tier, since).await
    }

    async fn increment(
        &self,
        key: &WindowKey,
        tier: WindowTier,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RateLimitWindow, StoreError> {
        if self.fail_writes {
            return Err(StoreError::Unavailable("write failed".to_string()));
        }
        self.inner.increment(key, tier, window_start, now).await
    }
}

#[actix_web::test]
async fn test_allow_deny_within_minute() {
    let (limiter, clock) = limiter(InMemoryStore::new());
    let policy = RateLimitPolicy::new(5, 20);
    let ip = RateLimitIdentifier::ip("203.0.113.5");
    for _ in 0..5 {
        // First 5 should be allowed
        let outcome = limiter.check_and_consume(&ip, FUNCTION, &policy).await;
        assert!(outcome.is_allowed());
        clock.advance(Duration::seconds(2));
    }
    // Sixth, ten seconds into the minute, should be denied
    let outcome = limiter.check_and_consume(&ip, FUNCTION, &policy).await;
    assert_eq!(
        outcome,
        RateLimitOutcome::Denied {
            retry_after_seconds: 50
        }
    );
    assert!(outcome.decision().is_denied());
}

#[actix_web::test]
async fn test_denied_requests_are_not_counted() {
    let store = InMemoryStore::new();
    let (limiter, _clock) = limiter(store.clone());
    let policy = RateLimitPolicy::new(1, 20);
    let user = RateLimitIdentifier::user("user-1");
    assert!(limiter.check_and_consume(&user, FUNCTION, &policy).await.is_allowed());
    for _ in 0..3 {
        assert!(!limiter.check_and_consume(&user, FUNCTION, &policy).await.is_allowed());
    }
    assert!(store.windows().iter().all(|w| w.request_count == 1));
}

#[actix_web::test]
async fn test_reset_after_minute() {
    let (limiter, clock) = limiter(InMemoryStore::new());
    let policy = RateLimitPolicy::new(1, 20);
    let user = RateLimitIdentifier::user("user-1");
    assert!(limiter.check_and_consume(&user, FUNCTION, &policy).await.is_allowed());
    clock.advance(Duration::seconds(30));
    let outcome = limiter.check_and_consume(&user, FUNCTION, &policy).await;
    assert_eq!(outcome.retry_after_seconds(), Some(30));
    // Sixty seconds after the first call the bucket has elapsed
    clock.advance(Duration::seconds(30));
    assert!(limiter.check_and_consume(&user, FUNCTION, &policy).await.is_allowed());
}

#[actix_web::test]
async fn test_hour_cap_independent_of_minute() {
    let (limiter, clock) = limiter(InMemoryStore::new());
    let policy = RateLimitPolicy::new(10, 3);
    let user = RateLimitIdentifier::user("user-1");
    for _ in 0..3 {
        // One request per minute stays well under the minute cap
        assert!(limiter.check_and_consume(&user, FUNCTION, &policy).await.is_allowed());
        clock.advance(Duration::seconds(60));
    }
    let outcome = limiter.check_and_consume(&user, FUNCTION, &policy).await;
    let retry = outcome.retry_after_seconds().unwrap();
    assert!((1..=3600).contains(&retry));
    assert_eq!(retry, 3600 - 180);

    // Still denied a few minutes later, then allowed in the next hour
    clock.advance(Duration::seconds(600));
    assert!(!limiter.check_and_consume(&user, FUNCTION, &policy).await.is_allowed());
    clock.set(start() + Duration::seconds(3600));
    assert!(limiter.check_and_consume(&user, FUNCTION, &policy).await.is_allowed());
}

#[actix_web::test]
async fn test_minute_check_runs_first() {
    let (limiter, _clock) = limiter(InMemoryStore::new());
    // Both caps are exhausted by the first request
    let policy = RateLimitPolicy::new(1, 1);
    let user = RateLimitIdentifier::user("user-1");
    assert!(limiter.check_and_consume(&user, FUNCTION, &policy).await.is_allowed());
    let outcome = limiter.check_and_consume(&user, FUNCTION, &policy).await;
    // The minute bucket's reset is reported, not the hour's
    assert_eq!(outcome.retry_after_seconds(), Some(60));
}

#[actix_web::test]
async fn test_retry_after_floor() {
    let (limiter, clock) = limiter(InMemoryStore::new());
    let policy = RateLimitPolicy::new(1, 20);
    let user = RateLimitIdentifier::user("user-1");
    assert!(limiter.check_and_consume(&user, FUNCTION, &policy).await.is_allowed());
    clock.advance(Duration::milliseconds(59_900));
    let outcome = limiter.check_and_consume(&user, FUNCTION, &policy).await;
    assert_eq!(outcome.retry_after_seconds(), Some(1));
}

#[actix_web::test]
async fn test_zero_limit_denies() {
    let (limiter, clock) = limiter(InMemoryStore::new());
    clock.advance(Duration::seconds(15));
    let outcome = limiter
        .check_and_consume(
            &RateLimitIdentifier::user("user-1"),
            FUNCTION,
            &RateLimitPolicy::new(0, 10),
        )
        .await;
    assert_eq!(outcome.retry_after_seconds(), Some(45));
}

#[actix_web::test]
async fn test_keys_are_independent() {
    let (limiter, _clock) = limiter(InMemoryStore::new());
    let policy = RateLimitPolicy::new(1, 20);
    let user = RateLimitIdentifier::user("10.0.0.1");
    let ip = RateLimitIdentifier::ip("10.0.0.1");
    assert!(limiter.check_and_consume(&user, FUNCTION, &policy).await.is_allowed());
    // Same value but different identifier type
    assert!(limiter.check_and_consume(&ip, FUNCTION, &policy).await.is_allowed());
    // Same identifier but different function
    assert!(limiter
        .check_and_consume(&user, "send-contact-email", &policy)
        .await
        .is_allowed());
    assert!(!limiter.check_and_consume(&user, FUNCTION, &policy).await.is_allowed());
}

#[actix_web::test]
async fn test_records_minute_and_hour_windows() {
    let store = InMemoryStore::new();
    let (limiter, clock) = limiter(store.clone());
    clock.advance(Duration::seconds(125));
    let user = RateLimitIdentifier::user("user-1");
    limiter
        .check_and_consume(&user, FUNCTION, &RateLimitPolicy::new(5, 20))
        .await;
    let mut windows = store.windows();
    windows.sort_by_key(|w| w.window_start);
    assert_eq!(windows.len(), 2);
    assert_eq!(windows[0].tier, WindowTier::Hour);
    assert_eq!(windows[0].window_start, start());
    assert_eq!(windows[1].tier, WindowTier::Minute);
    assert_eq!(windows[1].window_start, start() + Duration::seconds(120));
    assert!(windows
        .iter()
        .all(|w| w.identifier_type == IdentifierType::User && w.function_name == FUNCTION));
}

#[actix_web::test]
async fn test_garbage_collection() {
    let store = InMemoryStore::new();
    let (limiter, _clock) = limiter(store.clone());
    let stale = WindowKey::new("user-old", IdentifierType::User, "send-contact-email");
    let old_start = start() - Duration::seconds(7200);
    store
        .increment(&stale, WindowTier::Hour, old_start, old_start)
        .await
        .unwrap();
    assert_eq!(store.len(), 1);

    // Any check, for any identifier, sweeps the old window
    limiter
        .check_and_consume(
            &RateLimitIdentifier::ip("198.51.100.7"),
            FUNCTION,
            &RateLimitPolicy::new(5, 20),
        )
        .await;
    assert!(store.windows().iter().all(|w| w.identifier != "user-old"));
    assert_eq!(store.len(), 2);
}

#[actix_web::test]
async fn test_fail_open_on_read_error() {
    let store = FlakyStore {
        inner: InMemoryStore::new(),
        fail_reads: true,
        fail_writes: false,
    };
    let limiter = RateLimiter::with_clock(Arc::new(store), Arc::new(ManualClock::new(start())));
    let policy = RateLimitPolicy::new(1, 1);
    let user = RateLimitIdentifier::user("user-1");
    for _ in 0..3 {
        assert!(limiter.check_and_consume(&user, FUNCTION, &policy).await.is_allowed());
    }
}

#[actix_web::test]
async fn test_write_errors_do_not_deny() {
    let store = FlakyStore {
        inner: InMemoryStore::new(),
        fail_reads: false,
        fail_writes: true,
    };
    let limiter = RateLimiter::with_clock(Arc::new(store), Arc::new(ManualClock::new(start())));
    let outcome = limiter
        .check_and_consume(
            &RateLimitIdentifier::user("user-1"),
            FUNCTION,
            &RateLimitPolicy::new(1, 1),
        )
        .await;
    assert_eq!(outcome, RateLimitOutcome::Allowed);
}
