use std::sync::Arc;

use anyhow::{Error, Result};
use async_trait::async_trait;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Duration, MissedTickBehavior, interval},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    clients::{EventSink, health::BrokerHealth},
    models::{
        event::NotificationEvent,
        fallback::{FallbackRecord, FallbackStats},
    },
};

/// Durable collection absorbing publishes the broker could not take.
#[async_trait]
pub trait FallbackStore: Send + Sync {
    async fn create(&self, record: &FallbackRecord) -> Result<(), Error>;

    /// Oldest-first records still eligible for redelivery (unprocessed and
    /// below the retry cap).
    async fn fetch_unprocessed(&self, limit: i64) -> Result<Vec<FallbackRecord>, Error>;

    async fn mark_processed(&self, id: Uuid) -> Result<(), Error>;

    async fn record_failure(&self, id: Uuid, last_error: &str) -> Result<(), Error>;

    async fn stats(&self) -> Result<FallbackStats, Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishPath {
    Broker,
    Fallback,
}

/// Ingress publish path with broker-outage diversion. While the broker is
/// presumed unhealthy, publishes go straight to the fallback store instead
/// of blocking on repeated broker timeouts.
pub struct FallbackPublisher {
    sink: Arc<dyn EventSink>,
    store: Arc<dyn FallbackStore>,
    health: Arc<BrokerHealth>,
}

impl FallbackPublisher {
    pub fn new(
        sink: Arc<dyn EventSink>,
        store: Arc<dyn FallbackStore>,
        health: Arc<BrokerHealth>,
    ) -> Self {
        Self { sink, store, health }
    }

    pub async fn publish(
        &self,
        event: &NotificationEvent,
        topic: &str,
    ) -> Result<PublishPath, Error> {
        if !self.health.is_healthy() {
            debug!(
                event_id = %event.id,
                topic,
                "Broker presumed unhealthy, diverting to fallback store"
            );
            self.divert(event, topic).await?;
            return Ok(PublishPath::Fallback);
        }

        let payload = serde_json::to_vec(event)?;

        match self.sink.publish(topic, &event.target_id, &payload).await {
            Ok(()) => {
                self.health.record_success();
                Ok(PublishPath::Broker)
            }
            Err(e) => {
                self.health.record_failure();
                warn!(
                    event_id = %event.id,
                    topic,
                    error = %e,
                    "Broker publish failed, diverting to fallback store"
                );
                self.divert(event, topic).await?;
                Ok(PublishPath::Fallback)
            }
        }
    }

    async fn divert(&self, event: &NotificationEvent, topic: &str) -> Result<(), Error> {
        let record = FallbackRecord::from_event(event, topic)?;
        self.store.create(&record).await
    }
}

/// Periodically redelivers stored fallback records once the broker looks
/// healthy again. Records that keep failing accumulate retry counts until
/// the store's cap moves them to the failed bucket for good.
pub struct RecoveryWorker {
    store: Arc<dyn FallbackStore>,
    sink: Arc<dyn EventSink>,
    health: Arc<BrokerHealth>,
    batch_size: i64,
    interval: Duration,
}

impl RecoveryWorker {
    pub fn new(
        store: Arc<dyn FallbackStore>,
        sink: Arc<dyn EventSink>,
        health: Arc<BrokerHealth>,
        batch_size: i64,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            sink,
            health,
            batch_size,
            interval,
        }
    }

    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "Fallback recovery worker started");

            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.drain_once().await {
                            warn!(error = %e, "Fallback recovery pass failed");
                        }
                    }
                }
            }

            info!("Fallback recovery worker stopped");
        })
    }

    /// One redelivery pass, oldest records first. A publish failure stops
    /// the pass; the broker is evidently still down.
    pub async fn drain_once(&self) -> Result<usize, Error> {
        if !self.health.is_healthy() {
            return Ok(0);
        }

        let records = self.store.fetch_unprocessed(self.batch_size).await?;
        let mut delivered = 0;

        for record in records {
            let event: NotificationEvent = match serde_json::from_value(record.payload.clone()) {
                Ok(event) => event,
                Err(e) => {
                    self.store
                        .record_failure(record.id, &format!("undecodable payload: {}", e))
                        .await?;
                    continue;
                }
            };

            let payload = serde_json::to_vec(&event)?;

            match self.sink.publish(&record.topic, &event.target_id, &payload).await {
                Ok(()) => {
                    self.health.record_success();
                    self.store.mark_processed(record.id).await?;
                    delivered += 1;
                }
                Err(e) => {
                    self.health.record_failure();
                    self.store.record_failure(record.id, &e.to_string()).await?;
                    break;
                }
            }
        }

        if delivered > 0 {
            info!(delivered, "Redelivered fallback records to broker");
        }

        Ok(delivered)
    }
}
