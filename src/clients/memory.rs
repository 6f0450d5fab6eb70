use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    aggregation::AggregationStore,
    clients::EventSink,
    fallback::FallbackStore,
    models::{
        aggregation::{ActorProfile, WindowContents},
        audit::CreateAuditEntry,
        event::{NotificationEvent, NotificationType},
        fallback::{FallbackRecord, FallbackStats},
    },
    pipeline::{AuditSink, PreferenceProvider},
};

struct MemoryWindow {
    members: Vec<(String, i64)>,
    profiles: HashMap<String, ActorProfile>,
    first_event: Option<NotificationEvent>,
    expires_at: Instant,
}

/// In-process aggregation store with the same atomicity contract as the
/// Redis adapter. Backs local development and the test suite.
#[derive(Default)]
pub struct MemoryAggregationStore {
    windows: Mutex<HashMap<String, MemoryWindow>>,
}

impl MemoryAggregationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn purge_expired(windows: &mut HashMap<String, MemoryWindow>) {
        let now = Instant::now();
        windows.retain(|_, window| window.expires_at > now);
    }
}

#[async_trait]
impl AggregationStore for MemoryAggregationStore {
    async fn add_member(&self, key: &str, actor_id: &str, ts_ms: i64) -> Result<u64, Error> {
        let mut windows = self.windows.lock().await;
        Self::purge_expired(&mut windows);

        let window = windows.entry(key.to_string()).or_insert_with(|| MemoryWindow {
            members: Vec::new(),
            profiles: HashMap::new(),
            first_event: None,
            expires_at: Instant::now() + Duration::from_secs(60),
        });

        if !window.members.iter().any(|(actor, _)| actor == actor_id) {
            window.members.push((actor_id.to_string(), ts_ms));
        }

        Ok(window.members.len() as u64)
    }

    async fn upsert_profile(
        &self,
        key: &str,
        actor_id: &str,
        profile: &ActorProfile,
    ) -> Result<(), Error> {
        let mut windows = self.windows.lock().await;

        if let Some(window) = windows.get_mut(key) {
            window
                .profiles
                .entry(actor_id.to_string())
                .or_insert_with(|| profile.clone());
        }

        Ok(())
    }

    async fn init_meta(&self, key: &str, first_event: &NotificationEvent) -> Result<(), Error> {
        let mut windows = self.windows.lock().await;

        if let Some(window) = windows.get_mut(key) {
            if window.first_event.is_none() {
                window.first_event = Some(first_event.clone());
            }
        }

        Ok(())
    }

    async fn refresh_ttl(&self, key: &str, ttl_secs: i64) -> Result<(), Error> {
        let mut windows = self.windows.lock().await;

        if let Some(window) = windows.get_mut(key) {
            window.expires_at = Instant::now() + Duration::from_secs(ttl_secs.max(0) as u64);
        }

        Ok(())
    }

    async fn take_window(&self, key: &str) -> Result<Option<WindowContents>, Error> {
        let mut windows = self.windows.lock().await;

        let Some(window) = windows.remove(key) else {
            return Ok(None);
        };

        let Some(first_event) = window.first_event else {
            return Ok(None);
        };

        Ok(Some(WindowContents {
            members: window.members,
            profiles: window.profiles,
            first_event,
        }))
    }

    async fn scan_generation(&self, window_id: i64) -> Result<Vec<String>, Error> {
        let mut windows = self.windows.lock().await;
        Self::purge_expired(&mut windows);

        let prefix = format!("agg:{}:", window_id);

        Ok(windows
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct PublishedRecord {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
}

impl PublishedRecord {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, Error> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Capturing sink with switchable publish failure, standing in for the
/// broker producer.
#[derive(Default)]
pub struct MemoryEventSink {
    publishes: Mutex<Vec<PublishedRecord>>,
    ensured: Mutex<HashSet<String>>,
    fail_publishes: AtomicBool,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_publishes.store(failing, Ordering::SeqCst);
    }

    pub async fn published(&self) -> Vec<PublishedRecord> {
        self.publishes.lock().await.clone()
    }

    pub async fn published_to(&self, topic: &str) -> Vec<PublishedRecord> {
        self.publishes
            .lock()
            .await
            .iter()
            .filter(|record| record.topic == topic)
            .cloned()
            .collect()
    }

    pub async fn ensured_topics(&self) -> HashSet<String> {
        self.ensured.lock().await.clone()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), Error> {
        if self.fail_publishes.load(Ordering::SeqCst) {
            return Err(anyhow!("Broker unavailable"));
        }

        self.publishes.lock().await.push(PublishedRecord {
            topic: topic.to_string(),
            key: key.to_string(),
            payload: payload.to_vec(),
        });

        Ok(())
    }

    async fn ensure_topic(
        &self,
        topic: &str,
        _partitions: i32,
        _retention_ms: Option<i64>,
    ) -> Result<(), Error> {
        self.ensured.lock().await.insert(topic.to_string());
        Ok(())
    }
}

/// In-process fallback store mirroring the Postgres adapter's semantics.
pub struct MemoryFallbackStore {
    records: Mutex<HashMap<Uuid, FallbackRecord>>,
    max_retries: i32,
}

impl MemoryFallbackStore {
    pub fn new(max_retries: i32) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            max_retries,
        }
    }

    pub async fn get(&self, id: Uuid) -> Option<FallbackRecord> {
        self.records.lock().await.get(&id).cloned()
    }
}

#[async_trait]
impl FallbackStore for MemoryFallbackStore {
    async fn create(&self, record: &FallbackRecord) -> Result<(), Error> {
        self.records
            .lock()
            .await
            .entry(record.id)
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn fetch_unprocessed(&self, limit: i64) -> Result<Vec<FallbackRecord>, Error> {
        let records = self.records.lock().await;

        let mut unprocessed: Vec<FallbackRecord> = records
            .values()
            .filter(|record| !record.processed && record.retry_count < self.max_retries)
            .cloned()
            .collect();

        unprocessed.sort_by_key(|record| record.created_at);
        unprocessed.truncate(limit.max(0) as usize);

        Ok(unprocessed)
    }

    async fn mark_processed(&self, id: Uuid) -> Result<(), Error> {
        let mut records = self.records.lock().await;

        if let Some(record) = records.get_mut(&id) {
            record.processed = true;
            record.processed_at = Some(Utc::now());
        }

        Ok(())
    }

    async fn record_failure(&self, id: Uuid, last_error: &str) -> Result<(), Error> {
        let mut records = self.records.lock().await;

        if let Some(record) = records.get_mut(&id) {
            record.retry_count += 1;
            record.last_error = Some(last_error.to_string());
        }

        Ok(())
    }

    async fn stats(&self) -> Result<FallbackStats, Error> {
        let records = self.records.lock().await;

        let mut stats = FallbackStats::default();

        for record in records.values() {
            if record.processed {
                stats.processed += 1;
            } else if record.retry_count >= self.max_retries {
                stats.failed += 1;
            } else {
                stats.pending += 1;
            }
        }

        Ok(stats)
    }
}

/// Stand-in for the preference service: everything is deliverable.
pub struct AllowAllPreferences;

#[async_trait]
impl PreferenceProvider for AllowAllPreferences {
    async fn should_deliver(
        &self,
        _target_id: &str,
        _event_type: NotificationType,
    ) -> Result<bool, Error> {
        Ok(true)
    }
}

/// Preference provider with an explicit suppression list.
#[derive(Default)]
pub struct MemoryPreferences {
    suppressed: Mutex<HashSet<(String, String)>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn suppress(&self, target_id: &str, event_type: NotificationType) {
        self.suppressed
            .lock()
            .await
            .insert((target_id.to_string(), event_type.as_str().to_string()));
    }
}

#[async_trait]
impl PreferenceProvider for MemoryPreferences {
    async fn should_deliver(
        &self,
        target_id: &str,
        event_type: NotificationType,
    ) -> Result<bool, Error> {
        let suppressed = self.suppressed.lock().await;
        Ok(!suppressed.contains(&(target_id.to_string(), event_type.as_str().to_string())))
    }
}

#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<CreateAuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<CreateAuditEntry> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, entry: CreateAuditEntry) -> Result<(), Error> {
        self.entries.lock().await.push(entry);
        Ok(())
    }
}
