use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use anyhow::Result;
use notification_pipeline::{
    models::{
        error::{DeliveryError, Retryable},
        retry::RetryConfig,
    },
    utils::{backoff_delay, retry_with_backoff},
};
use tokio::time::Instant;

fn fast_config() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        initial_delay_ms: 20,
        max_delay_ms: 200,
        backoff_multiplier: 2,
    }
}

fn transient_error() -> DeliveryError {
    DeliveryError::network("ECONNREFUSED", "connection refused")
}

/// Test: Successful operations complete without retry
#[tokio::test]
async fn test_successful_operation_no_retry() -> Result<()> {
    let attempt_count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempt_count);

    let result = retry_with_backoff(&fast_config(), "test", || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, DeliveryError>("success")
        }
    })
    .await
    .map_err(|e| anyhow::anyhow!("{}", e))?;

    assert_eq!(result, "success");
    assert_eq!(
        attempt_count.load(Ordering::SeqCst),
        1,
        "Should only attempt once"
    );

    Ok(())
}

/// Test: Transient failures are retried until they succeed
#[tokio::test]
async fn test_transient_failures_are_retried() -> Result<()> {
    let attempt_count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempt_count);

    let result = retry_with_backoff(&fast_config(), "test", || {
        let counter = Arc::clone(&counter);
        async move {
            let attempts = counter.fetch_add(1, Ordering::SeqCst);

            // Fail first 2 attempts, succeed on 3rd
            if attempts < 2 {
                Err(transient_error())
            } else {
                Ok("success")
            }
        }
    })
    .await
    .map_err(|e| anyhow::anyhow!("{}", e))?;

    assert_eq!(result, "success");
    assert_eq!(
        attempt_count.load(Ordering::SeqCst),
        3,
        "Should retry 2 times then succeed"
    );

    Ok(())
}

/// Test: A persistently failing retryable operation makes max_retries + 1 attempts
#[tokio::test]
async fn test_retry_budget_exhausted() -> Result<()> {
    let attempt_count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempt_count);

    let result = retry_with_backoff(&fast_config(), "test", || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<String, _>(transient_error())
        }
    })
    .await;

    let failure = result.expect_err("Should fail after exhausting attempts");

    assert_eq!(
        attempt_count.load(Ordering::SeqCst),
        4,
        "maxRetries=3 means 4 total invocations"
    );
    assert_eq!(failure.attempts, 4);
    assert!(failure.retryable, "Exhausted error keeps its retryability tag");

    Ok(())
}

/// Test: Non-retryable errors short-circuit with no sleep
#[tokio::test]
async fn test_non_retryable_short_circuits() -> Result<()> {
    let config = RetryConfig {
        max_retries: 5,
        initial_delay_ms: 5000,
        max_delay_ms: 60000,
        backoff_multiplier: 2,
    };

    let attempt_count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempt_count);
    let start = Instant::now();

    let result = retry_with_backoff(&config, "test", || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<String, _>(DeliveryError::InvalidRecipient("no such user".to_string()))
        }
    })
    .await;

    let failure = result.expect_err("Should fail immediately");

    assert_eq!(attempt_count.load(Ordering::SeqCst), 1, "No retry budget consumed");
    assert_eq!(failure.attempts, 1);
    assert!(!failure.retryable);
    assert!(
        start.elapsed().as_millis() < 1000,
        "Non-retryable failure must not sleep"
    );

    Ok(())
}

/// Test: Jittered delay stays within ±10% of the capped exponential curve
#[tokio::test]
async fn test_backoff_delay_bounds() -> Result<()> {
    let config = RetryConfig {
        max_retries: 3,
        initial_delay_ms: 1000,
        max_delay_ms: 60000,
        backoff_multiplier: 2,
    };

    for attempt in 0..16u32 {
        let base = (1000u64 * 2u64.saturating_pow(attempt)).min(60000);

        for _ in 0..20 {
            let delay = backoff_delay(&config, attempt);

            assert!(
                delay as f64 >= base as f64 * 0.9 - 1.0,
                "delay({}) = {} below jitter floor of {}",
                attempt,
                delay,
                base
            );
            assert!(
                delay as f64 <= base as f64 * 1.1 + 1.0,
                "delay({}) = {} above jitter ceiling of {}",
                attempt,
                delay,
                base
            );
        }
    }

    Ok(())
}

/// Test: Delay cap is respected for large attempt numbers
#[tokio::test]
async fn test_max_delay_cap_respected() -> Result<()> {
    let config = RetryConfig {
        max_retries: 3,
        initial_delay_ms: 1000,
        max_delay_ms: 60000,
        backoff_multiplier: 2,
    };

    let delay = backoff_delay(&config, 40);

    assert!(
        delay <= 66000,
        "Delay should be capped at max_delay_ms plus jitter (got {})",
        delay
    );

    Ok(())
}

/// Test: Jitter varies across invocations
#[tokio::test]
async fn test_jitter_applied_to_delays() -> Result<()> {
    let config = RetryConfig {
        max_retries: 3,
        initial_delay_ms: 10000,
        max_delay_ms: 60000,
        backoff_multiplier: 2,
    };

    let delays: Vec<u64> = (0..32).map(|_| backoff_delay(&config, 0)).collect();

    let min_delay = delays.iter().min().unwrap();
    let max_delay = delays.iter().max().unwrap();

    assert!(
        max_delay > min_delay,
        "Delays should vary due to jitter (min: {}, max: {})",
        min_delay,
        max_delay
    );

    Ok(())
}

/// Test: Retry delays follow exponential backoff between attempts
#[tokio::test]
async fn test_exponential_backoff_timing() -> Result<()> {
    let config = RetryConfig {
        max_retries: 3,
        initial_delay_ms: 100,
        max_delay_ms: 1000,
        backoff_multiplier: 2,
    };

    let start = Instant::now();
    let attempt_times = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let times = Arc::clone(&attempt_times);

    let _ = retry_with_backoff(&config, "test", || {
        let times = Arc::clone(&times);
        async move {
            let elapsed = start.elapsed().as_millis();
            times.lock().await.push(elapsed);
            Err::<String, _>(transient_error())
        }
    })
    .await;

    let times = attempt_times.lock().await;

    assert_eq!(times.len(), 4);
    assert!(times[0] < 50, "First attempt should be immediate");

    for i in 1..times.len() {
        let delay = times[i] - times[i - 1];
        let expected = config.initial_delay_ms * config.backoff_multiplier.pow(i as u32 - 1);

        assert!(
            delay as f64 >= expected as f64 * 0.85,
            "Delay {} should be at least 85% of {} (actual: {})",
            i,
            expected,
            delay
        );
        assert!(
            delay as f64 <= expected as f64 * 2.0,
            "Delay {} should not wildly exceed {} (actual: {})",
            i,
            expected,
            delay
        );
    }

    Ok(())
}

/// Test: Error taxonomy classifies retryability as documented
#[tokio::test]
async fn test_retryability_classification() -> Result<()> {
    assert!(DeliveryError::network("ECONNREFUSED", "refused").is_retryable());
    assert!(DeliveryError::network("ETIMEDOUT", "timed out").is_retryable());
    assert!(DeliveryError::network("ENOTFOUND", "dns lookup failed").is_retryable());

    assert!(DeliveryError::http(429, "too many requests").is_retryable());
    assert!(DeliveryError::http(503, "service unavailable").is_retryable());
    assert!(DeliveryError::http(504, "gateway timeout").is_retryable());

    assert!(
        DeliveryError::RateLimited {
            code: "sms_provider_throttle".to_string()
        }
        .is_retryable()
    );

    assert!(!DeliveryError::http(400, "bad request").is_retryable());
    assert!(!DeliveryError::http(500, "internal error").is_retryable());
    assert!(!DeliveryError::InvalidRecipient("bad number".to_string()).is_retryable());
    assert!(!DeliveryError::MalformedPayload("not json".to_string()).is_retryable());
    assert!(!DeliveryError::Auth("expired credentials".to_string()).is_retryable());
    assert!(!DeliveryError::Other("validation failed".to_string()).is_retryable());

    Ok(())
}
