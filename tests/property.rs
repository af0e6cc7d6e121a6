//! Property-based checks over the resilience primitives.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fetchkit::{normalize_url, FetchError, RetryConfig};
use fetchkit_coalesce::Deduplicator;
use fetchkit_core::{FetchRequest, RequestKey};
use fetchkit_ratelimit::RateLimitConfig;
use fetchkit_retry::{BackoffStrategy, RetryDecision};
use proptest::prelude::*;
use url::Url;

proptest! {
    /// normalize(normalize(u)) == normalize(u).
    #[test]
    fn normalization_is_idempotent(
        scheme in prop::sample::select(vec!["http", "https", "ftp", "ftps"]),
        host in "[a-zA-Z][a-zA-Z0-9-]{0,15}(\\.[a-z]{2,5}){1,2}",
        segments in prop::collection::vec("[a-zA-Z0-9._-]{1,8}", 0..4),
        query in prop::option::of("[a-z]{1,5}=[a-z0-9]{1,5}"),
    ) {
        let mut raw = format!("{scheme}://{host}/{}", segments.join("/"));
        if let Some(query) = query {
            raw.push('?');
            raw.push_str(&query);
        }
        let once = normalize_url(&raw, None).unwrap();
        let twice = normalize_url(&once, None).unwrap();
        prop_assert_eq!(once, twice);
    }

    /// Exponential delays stay inside the jitter envelope around
    /// min(max_delay, base * 2^n).
    #[test]
    fn exponential_backoff_respects_bounds(
        base_ms in 10u64..500,
        max_ms in 500u64..5_000,
        jitter in 0.0f64..0.5,
        attempt in 0u32..6,
    ) {
        let controller = RetryConfig::builder()
            .strategy(BackoffStrategy::Exponential)
            .base_delay(Duration::from_millis(base_ms))
            .max_delay(Duration::from_millis(max_ms))
            .max_retries(10)
            .jitter_factor(jitter)
            .build();

        let error = FetchError::Server { status: 503 };
        let nominal = Duration::from_millis(base_ms.saturating_mul(1 << attempt.min(32)))
            .min(Duration::from_millis(max_ms));

        match controller.decide(&error, attempt, "host.test:443") {
            RetryDecision::RetryAfter(delay) => {
                let lower = nominal
                    .mul_f64((1.0 - jitter).max(0.0))
                    .saturating_sub(Duration::from_micros(1));
                let upper = nominal.mul_f64(1.0 + jitter) + Duration::from_micros(1);
                prop_assert!(delay >= lower, "{delay:?} < {lower:?}");
                prop_assert!(delay <= upper, "{delay:?} > {upper:?}");
            }
            RetryDecision::GiveUp => prop_assert!(false, "should retry"),
        }
    }

    /// The request key is a function of the request alone.
    #[test]
    fn request_keys_are_deterministic(
        host in "[a-z]{3,10}\\.test",
        path_segment in "[a-z0-9]{1,10}",
    ) {
        let url = Url::parse(&format!("https://{host}/{path_segment}")).unwrap();
        let a = RequestKey::for_request(&FetchRequest::get(url.clone()));
        let b = RequestKey::for_request(&FetchRequest::get(url));
        prop_assert_eq!(a, b);
    }
}

/// With no time to refill, a token bucket admits at most `burst`
/// zero-delay calls.
#[test]
fn token_bucket_burst_bound() {
    for burst in [1usize, 5, 20] {
        let limiter = RateLimitConfig::builder()
            .requests_per_second(10.0)
            .burst_size(burst)
            .build();

        let mut immediate = 0;
        for _ in 0..(burst * 3) {
            if limiter.reserve("host.test:443") == Duration::ZERO {
                immediate += 1;
            }
        }
        // One extra admission can slip in from clock progress between
        // calls; more than that means the bound is broken.
        assert!(
            immediate <= burst + 1,
            "burst {burst} admitted {immediate} immediately"
        );
    }
}

/// N concurrent deduplicated calls run the executor exactly once and
/// every caller sees the same outcome.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dedup_collapses_concurrent_executions() {
    for n in [2usize, 8, 32] {
        let dedupe: Arc<Deduplicator<Result<String, FetchError>>> =
            Arc::new(Deduplicator::default());
        let executions = Arc::new(AtomicU32::new(0));
        let key = RequestKey::for_request(&FetchRequest::get(
            Url::parse(&format!("https://dedup.test/{n}")).unwrap(),
        ));

        let mut handles = Vec::new();
        for _ in 0..n {
            let dedupe = Arc::clone(&dedupe);
            let executions = Arc::clone(&executions);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                dedupe
                    .deduplicate(key, || {
                        let executions = Arc::clone(&executions);
                        async move {
                            executions.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok("payload".to_string())
                        }
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok("payload".to_string()));
        }
        assert_eq!(executions.load(Ordering::SeqCst), 1, "n = {n}");
    }
}

/// All waiters observe the leader's error when the execution fails.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dedup_shares_failures() {
    let dedupe: Arc<Deduplicator<Result<String, FetchError>>> = Arc::new(Deduplicator::default());
    let key = RequestKey::for_request(&FetchRequest::get(
        Url::parse("https://dedup.test/fails").unwrap(),
    ));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let dedupe = Arc::clone(&dedupe);
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            dedupe
                .deduplicate(key, || async {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Err::<String, _>(FetchError::Server { status: 502 })
                })
                .await
        }));
    }
    for handle in handles {
        assert_eq!(
            handle.await.unwrap(),
            Err(FetchError::Server { status: 502 })
        );
    }
}

/// Sliding-window admission is FIFO by admit time: a full window
/// reports a delay no longer than the window itself.
#[test]
fn sliding_window_delay_is_bounded_by_the_window() {
    let window = Duration::from_millis(200);
    let limiter = RateLimitConfig::builder()
        .algorithm(fetchkit::Algorithm::SlidingWindow)
        .requests_per_second(10.0)
        .window(window)
        .build();

    // capacity = 10 rps * 0.2 s = 2 admissions per window
    assert_eq!(limiter.reserve("w.test:443"), Duration::ZERO);
    assert_eq!(limiter.reserve("w.test:443"), Duration::ZERO);
    let delay = limiter.reserve("w.test:443");
    assert!(delay > Duration::ZERO);
    assert!(delay <= window, "delay {delay:?} beyond the window");
}
