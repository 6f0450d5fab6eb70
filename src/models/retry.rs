use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 60000,
            backoff_multiplier: 2,
        }
    }
}

impl RetryConfig {
    /// Total invocation budget: the first attempt plus `max_retries` retries.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// Terminal result of an exhausted or short-circuited retry cycle. Carries
/// the final error and how many invocations were actually made.
#[derive(Debug)]
pub struct RetryError<E> {
    pub error: E,
    pub attempts: u32,
    pub retryable: bool,
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "failed after {} attempt(s) (retryable: {}): {}",
            self.attempts, self.retryable, self.error
        )
    }
}

impl<E: std::fmt::Display + std::fmt::Debug> std::error::Error for RetryError<E> {}
