use std::sync::Arc;

use anyhow::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use rdkafka::{
    Message,
    consumer::{CommitMode, Consumer, StreamConsumer},
    message::BorrowedMessage,
};
use tokio::{sync::watch, task::JoinHandle, time::Duration};
use tracing::{error, info, warn};

use crate::{
    aggregation::WindowManager,
    clients::{EventSink, kafka::create_tier_consumer},
    config::Config,
    models::{
        aggregation::AggregationDecision,
        audit::{CreateAuditEntry, DeliveryOutcome},
        event::{NotificationEvent, NotificationType, Priority},
    },
};

/// Per-recipient delivery preference check, answered by an external service.
#[async_trait]
pub trait PreferenceProvider: Send + Sync {
    async fn should_deliver(
        &self,
        target_id: &str,
        event_type: NotificationType,
    ) -> Result<bool, Error>;
}

/// Best-effort audit trail. Failures are logged by callers and never block
/// the pipeline.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: CreateAuditEntry) -> Result<(), Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Published to the ready stream (as-is or as an aggregate).
    Emitted,
    /// Absorbed into an open aggregation window.
    Absorbed,
    /// Suppressed by the recipient's preferences.
    Filtered,
}

/// The per-event pipeline every tier runs: preference filter, aggregation
/// decision, channel selection, one publish to the ready stream, audit.
pub struct EventPipeline {
    windows: Arc<WindowManager>,
    sink: Arc<dyn EventSink>,
    preferences: Arc<dyn PreferenceProvider>,
    audit: Arc<dyn AuditSink>,
    ready_topic: String,
}

impl EventPipeline {
    pub fn new(
        windows: Arc<WindowManager>,
        sink: Arc<dyn EventSink>,
        preferences: Arc<dyn PreferenceProvider>,
        audit: Arc<dyn AuditSink>,
        ready_topic: String,
    ) -> Self {
        Self {
            windows,
            sink,
            preferences,
            audit,
            ready_topic,
        }
    }

    pub async fn process(&self, event: NotificationEvent) -> Result<PipelineOutcome, Error> {
        let deliver = match self
            .preferences
            .should_deliver(&event.target_id, event.event_type)
            .await
        {
            Ok(deliver) => deliver,
            Err(e) => {
                // Losing the preference service must not lose notifications.
                warn!(error = %e, "Preference check failed, delivering anyway");
                true
            }
        };

        if !deliver {
            info!(
                event_id = %event.id,
                target_id = %event.target_id,
                "Notification suppressed by user preferences"
            );
            self.audit_best_effort(CreateAuditEntry::new(&event, DeliveryOutcome::FilteredPrefs))
                .await;
            return Ok(PipelineOutcome::Filtered);
        }

        let now_ms = Utc::now().timestamp_millis();

        let outbound = match self.windows.observe(event, now_ms).await {
            AggregationDecision::SendNow(event) => event,
            AggregationDecision::SendAggregated(event) => event,
            AggregationDecision::Absorbed => return Ok(PipelineOutcome::Absorbed),
        };

        self.emit(outbound).await
    }

    /// Resolves channels, publishes exactly once to the ready stream keyed
    /// by recipient, then audits.
    pub async fn emit(&self, mut event: NotificationEvent) -> Result<PipelineOutcome, Error> {
        event.attach_channels();

        let payload = serde_json::to_vec(&event)?;

        match self
            .sink
            .publish(&self.ready_topic, &event.target_id, &payload)
            .await
        {
            Ok(()) => {
                let metadata = serde_json::to_value(&event.metadata)
                    .unwrap_or_else(|_| serde_json::json!({}));
                self.audit_best_effort(
                    CreateAuditEntry::new(&event, DeliveryOutcome::Sent).with_metadata(metadata),
                )
                .await;
                Ok(PipelineOutcome::Emitted)
            }
            Err(e) => {
                self.audit_best_effort(
                    CreateAuditEntry::new(&event, DeliveryOutcome::Failed)
                        .with_error(e.to_string()),
                )
                .await;
                Err(e)
            }
        }
    }

    async fn audit_best_effort(&self, entry: CreateAuditEntry) {
        if let Err(e) = self.audit.record(entry).await {
            warn!(error = %e, "Failed to write audit log");
        }
    }
}

/// Spawns every tier's consumer workers. Each worker is an independent
/// member of the tier's consumer group and processes its partitions
/// strictly serially.
pub fn spawn_tier_workers(
    config: &Config,
    pipeline: Arc<EventPipeline>,
    shutdown: watch::Receiver<bool>,
) -> Result<Vec<JoinHandle<()>>, Error> {
    let mut handles = Vec::new();

    for tier in config.tiers() {
        for worker in 0..tier.concurrency {
            let consumer = create_tier_consumer(&config.kafka_brokers, &tier.group_id, &tier.topic)?;
            let pipeline = Arc::clone(&pipeline);
            let shutdown = shutdown.clone();
            let priority = tier.priority;

            handles.push(tokio::spawn(async move {
                run_consumer_loop(consumer, pipeline, priority, worker, shutdown).await;
            }));
        }
    }

    Ok(handles)
}

async fn run_consumer_loop(
    consumer: StreamConsumer,
    pipeline: Arc<EventPipeline>,
    priority: Priority,
    worker: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(tier = %priority, worker, "Tier consumer started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = consumer.recv() => {
                match result {
                    Ok(message) => {
                        handle_message(&consumer, &message, &pipeline, priority).await;
                    }
                    Err(e) => {
                        error!(tier = %priority, worker, error = %e, "Consumer poll error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }

    info!(tier = %priority, worker, "Tier consumer stopped");
}

/// The offset advances only after the full pipeline has run (or the event
/// was intentionally skipped). A crash before the commit replays the event;
/// downstream state tolerates the duplicate.
async fn handle_message(
    consumer: &StreamConsumer,
    message: &BorrowedMessage<'_>,
    pipeline: &EventPipeline,
    priority: Priority,
) {
    let Some(payload) = message.payload() else {
        warn!(tier = %priority, "Skipping message with empty payload");
        commit(consumer, message, priority);
        return;
    };

    match serde_json::from_slice::<NotificationEvent>(payload) {
        Ok(event) => {
            let event_id = event.id;
            match pipeline.process(event).await {
                Ok(_) => commit(consumer, message, priority),
                Err(e) => {
                    // Left uncommitted for replay; the loop moves on.
                    error!(
                        tier = %priority,
                        event_id = %event_id,
                        error = %e,
                        "Event processing failed"
                    );
                }
            }
        }
        Err(e) => {
            error!(tier = %priority, error = %e, "Skipping undeserializable event");
            commit(consumer, message, priority);
        }
    }
}

fn commit(consumer: &StreamConsumer, message: &BorrowedMessage<'_>, priority: Priority) {
    if let Err(e) = consumer.commit_message(message, CommitMode::Async) {
        error!(tier = %priority, error = %e, "Failed to commit offset");
    }
}
