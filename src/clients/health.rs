use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use tracing::{info, warn};

/// Broker publish-path health, tracked by observation rather than active
/// probing: a publish failure marks the path unhealthy, and health is
/// presumed restored once the recovery window has elapsed since the last
/// recorded failure (half-open on the next publish attempt).
pub struct BrokerHealth {
    recovery_after_ms: i64,
    last_failure_ms: AtomicI64,
}

impl BrokerHealth {
    pub fn new(recovery_after_secs: u64) -> Self {
        Self::with_recovery_ms(recovery_after_secs as i64 * 1000)
    }

    pub fn with_recovery_ms(recovery_after_ms: i64) -> Self {
        Self {
            recovery_after_ms,
            last_failure_ms: AtomicI64::new(0),
        }
    }

    pub fn is_healthy(&self) -> bool {
        let last_failure = self.last_failure_ms.load(Ordering::Relaxed);

        if last_failure == 0 {
            return true;
        }

        Utc::now().timestamp_millis() - last_failure >= self.recovery_after_ms
    }

    pub fn record_failure(&self) {
        let now = Utc::now().timestamp_millis();
        let previous = self.last_failure_ms.swap(now, Ordering::Relaxed);

        if previous == 0 {
            warn!(
                recovery_after_ms = self.recovery_after_ms,
                "Broker publish path marked unhealthy"
            );
        }
    }

    pub fn record_success(&self) {
        let previous = self.last_failure_ms.swap(0, Ordering::Relaxed);

        if previous != 0 {
            info!("Broker publish path recovered");
        }
    }
}
