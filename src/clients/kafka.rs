use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use rdkafka::{
    ClientConfig,
    admin::{AdminClient, AdminOptions, NewTopic, TopicReplication},
    client::DefaultClientContext,
    consumer::{Consumer, StreamConsumer},
    error::RDKafkaErrorCode,
    producer::{FutureProducer, FutureRecord},
};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{clients::EventSink, config::Config};

const METADATA_TIMEOUT: Duration = Duration::from_secs(5);
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

pub struct KafkaClient {
    producer: FutureProducer,
    admin: AdminClient<DefaultClientContext>,
    ensured_topics: Mutex<HashSet<String>>,
}

impl KafkaClient {
    pub fn connect(config: &Config) -> Result<Self, Error> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.kafka_brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| anyhow!("Failed to create Kafka producer: {}", e))?;

        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &config.kafka_brokers)
            .create()
            .map_err(|e| anyhow!("Failed to create Kafka admin client: {}", e))?;

        info!(brokers = %config.kafka_brokers, "Kafka client initialized");

        Ok(Self {
            producer,
            admin,
            ensured_topics: Mutex::new(HashSet::new()),
        })
    }

    /// Creates the three priority ingress topics and the ready topic.
    /// Startup must not proceed without them.
    pub async fn provision_topics(&self, config: &Config) -> Result<(), Error> {
        for tier in config.tiers() {
            self.create_topic(&tier.topic, tier.partitions, None).await?;
        }

        self.create_topic(&config.ready_topic, config.ready_partitions, None)
            .await?;

        info!("Kafka topics provisioned");
        Ok(())
    }

    async fn create_topic(
        &self,
        topic: &str,
        partitions: i32,
        retention_ms: Option<i64>,
    ) -> Result<(), Error> {
        let retention = retention_ms.map(|ms| ms.to_string());

        let mut new_topic = NewTopic::new(topic, partitions, TopicReplication::Fixed(1));
        if let Some(retention) = retention.as_deref() {
            new_topic = new_topic.set("retention.ms", retention);
        }

        let results = self
            .admin
            .create_topics(&[new_topic], &AdminOptions::new())
            .await
            .map_err(|e| anyhow!("Topic creation request failed: {}", e))?;

        for result in results {
            match result {
                Ok(name) => {
                    debug!(topic = %name, partitions, "Topic created");
                }
                Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {}
                Err((name, code)) => {
                    return Err(anyhow!("Failed to create topic {}: {}", name, code));
                }
            }
        }

        Ok(())
    }

    fn topic_exists(&self, topic: &str) -> Result<bool, Error> {
        let metadata = self
            .admin
            .inner()
            .fetch_metadata(Some(topic), METADATA_TIMEOUT)
            .map_err(|e| anyhow!("Failed to fetch topic metadata: {}", e))?;

        Ok(metadata
            .topics()
            .iter()
            .any(|t| t.name() == topic && t.error().is_none() && !t.partitions().is_empty()))
    }
}

#[async_trait]
impl EventSink for KafkaClient {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), Error> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        self.producer
            .send(record, PUBLISH_TIMEOUT)
            .await
            .map_err(|(e, _)| anyhow!("Publish to {} failed: {}", topic, e))?;

        Ok(())
    }

    async fn ensure_topic(
        &self,
        topic: &str,
        partitions: i32,
        retention_ms: Option<i64>,
    ) -> Result<(), Error> {
        let mut ensured = self.ensured_topics.lock().await;

        if ensured.contains(topic) {
            return Ok(());
        }

        if !self.topic_exists(topic)? {
            self.create_topic(topic, partitions, retention_ms).await?;
            info!(topic, partitions, "Created destination topic on first use");
        }

        ensured.insert(topic.to_string());
        Ok(())
    }
}

/// One consumer in the tier's group. Offsets are committed manually, only
/// after the per-event pipeline has completed.
pub fn create_tier_consumer(
    brokers: &str,
    group_id: &str,
    topic: &str,
) -> Result<StreamConsumer, Error> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .set("group.id", group_id)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .set("session.timeout.ms", "45000")
        .create()
        .map_err(|e| anyhow!("Failed to create consumer for group {}: {}", group_id, e))?;

    consumer
        .subscribe(&[topic])
        .map_err(|e| anyhow!("Failed to subscribe to {}: {}", topic, e))?;

    Ok(consumer)
}
