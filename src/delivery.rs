use std::sync::Arc;

use anyhow::{Error, Result};
use tracing::{info, warn};

use crate::{
    clients::EventSink,
    config::Config,
    models::{
        dlq::DlqEnvelope,
        error::DeliveryError,
        event::{Channel, NotificationEvent},
    },
    utils::retry_with_backoff,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryResult {
    Delivered,
    /// A retryable failure exhausted its budget and was dead-lettered.
    DeadLettered { attempts: u32 },
    /// Non-retryable failure: logged and dropped, no dead-letter entry.
    Dropped,
}

/// Drives one channel send to completion on behalf of the email and SMS
/// consumers. Push/socket delivery is fire-and-forget and never enters here.
pub struct DeliveryExecutor {
    sink: Arc<dyn EventSink>,
    config: Config,
}

impl DeliveryExecutor {
    pub fn new(sink: Arc<dyn EventSink>, config: Config) -> Self {
        Self { sink, config }
    }

    pub async fn execute<F, Fut>(
        &self,
        channel: Channel,
        event: &NotificationEvent,
        operation: F,
    ) -> Result<DeliveryResult, Error>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<(), DeliveryError>>,
    {
        let retry_config = self.config.retry_config_for(channel);
        let label = format!("deliver:{}", channel.as_str().to_lowercase());

        match retry_with_backoff(&retry_config, &label, operation).await {
            Ok(()) => Ok(DeliveryResult::Delivered),
            Err(failure) if failure.retryable => {
                warn!(
                    channel = %channel,
                    event_id = %event.id,
                    attempts = failure.attempts,
                    error = %failure.error,
                    "Delivery exhausted retries, dead-lettering"
                );

                let envelope = DlqEnvelope::new(
                    event.clone(),
                    channel,
                    failure.error.to_string(),
                    failure.attempts,
                );
                self.publish_dlq(&envelope).await?;

                Ok(DeliveryResult::DeadLettered {
                    attempts: failure.attempts,
                })
            }
            Err(failure) => {
                warn!(
                    channel = %channel,
                    event_id = %event.id,
                    error = %failure.error,
                    "Dropping non-retryable delivery failure"
                );
                Ok(DeliveryResult::Dropped)
            }
        }
    }

    async fn publish_dlq(&self, envelope: &DlqEnvelope) -> Result<(), Error> {
        let topic = self.config.dlq_topic(envelope.failed_channel);

        self.sink
            .ensure_topic(
                &topic,
                self.config.dlq_partitions,
                Some(self.config.dlq_retention_ms),
            )
            .await?;

        let payload = serde_json::to_vec(envelope)?;
        self.sink
            .publish(&topic, &envelope.event.target_id, &payload)
            .await?;

        info!(
            topic = %topic,
            event_id = %envelope.event.id,
            attempts = envelope.attempt_count,
            "Dead-letter envelope published"
        );

        Ok(())
    }
}
