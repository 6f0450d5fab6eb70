use anyhow::{Error, Result};
use async_trait::async_trait;

pub mod database;
pub mod health;
pub mod kafka;
pub mod memory;
pub mod redis;

/// Publish-side seam over the broker. Every record is keyed so per-recipient
/// ordering survives partitioning.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), Error>;

    /// Idempotent check-then-create of a destination topic. Implementations
    /// cache topics they have already verified.
    async fn ensure_topic(
        &self,
        topic: &str,
        partitions: i32,
        retention_ms: Option<i64>,
    ) -> Result<(), Error>;
}
