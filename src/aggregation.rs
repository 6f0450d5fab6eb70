use std::sync::Arc;

use anyhow::{Error, Result};
use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{
    aggregation::{
        ActorProfile, AggregatedPayload, AggregationDecision, WindowContents, WindowKey,
    },
    event::{NotificationEvent, NotificationType},
};

// Windows outlive their generation by this much so the sweep can still claim
// them after the generation rolls over.
const WINDOW_TTL_SLACK_SECS: i64 = 10;

/// Keyed, TTL-capable concurrent store backing the aggregation windows.
/// Every mutation must be atomic or an idempotent upsert; concurrent writers
/// on the same key are the expected case, not the exception.
#[async_trait]
pub trait AggregationStore: Send + Sync {
    /// Atomic insert-if-absent of a member with its arrival timestamp.
    /// Returns the window's distinct cardinality after the insert.
    async fn add_member(&self, key: &str, actor_id: &str, ts_ms: i64) -> Result<u64, Error>;

    /// Idempotent per-actor display profile upsert (first write wins).
    async fn upsert_profile(
        &self,
        key: &str,
        actor_id: &str,
        profile: &ActorProfile,
    ) -> Result<(), Error>;

    /// Stores the first-event snapshot unless a snapshot already exists.
    async fn init_meta(&self, key: &str, first_event: &NotificationEvent) -> Result<(), Error>;

    /// Pushes the window's expiry out to `ttl_secs` from now.
    async fn refresh_ttl(&self, key: &str, ttl_secs: i64) -> Result<(), Error>;

    /// Atomically reads and deletes a window. The first concurrent caller
    /// receives the contents; every later caller observes `None`.
    async fn take_window(&self, key: &str) -> Result<Option<WindowContents>, Error>;

    /// Storage keys of every live window in the given generation.
    async fn scan_generation(&self, window_id: i64) -> Result<Vec<String>, Error>;
}

/// Collapses bursts of same-type events into one downstream notification
/// ("X and N others liked your post").
pub struct WindowManager {
    store: Arc<dyn AggregationStore>,
    window_duration_ms: i64,
    max_batch_size: u64,
}

impl WindowManager {
    pub fn new(store: Arc<dyn AggregationStore>, window_duration_ms: i64, max_batch_size: u64) -> Self {
        Self {
            store,
            window_duration_ms,
            max_batch_size,
        }
    }

    pub fn window_ttl_secs(&self) -> i64 {
        self.window_duration_ms / 1000 + WINDOW_TTL_SLACK_SECS
    }

    /// Offers one event to its window. Non-aggregatable types pass straight
    /// through; a window that reaches the batch threshold is flushed inline.
    /// A broken store degrades to immediate delivery, never to a lost event.
    pub async fn observe(&self, event: NotificationEvent, now_ms: i64) -> AggregationDecision {
        if !event.event_type.is_aggregatable() {
            return AggregationDecision::SendNow(event);
        }

        let key = WindowKey::for_event(&event, self.window_duration_ms, now_ms).storage_key();

        let count = match self.absorb(&key, &event, now_ms).await {
            Ok(count) => count,
            Err(e) => {
                warn!(key = %key, error = %e, "Aggregation store error, sending immediately");
                return AggregationDecision::SendNow(event);
            }
        };

        if count >= self.max_batch_size {
            return match self.flush(&key).await {
                Ok(Some(aggregated)) => AggregationDecision::SendAggregated(aggregated),
                // A concurrent flush consumed the window first.
                Ok(None) => AggregationDecision::Absorbed,
                Err(e) => {
                    warn!(key = %key, error = %e, "Threshold flush failed, sending immediately");
                    AggregationDecision::SendNow(event)
                }
            };
        }

        debug!(key = %key, count, "Event absorbed into aggregation window");
        AggregationDecision::Absorbed
    }

    async fn absorb(&self, key: &str, event: &NotificationEvent, now_ms: i64) -> Result<u64, Error> {
        let count = self.store.add_member(key, &event.actor_id, now_ms).await?;

        let profile = ActorProfile {
            name: event.actor_name.clone(),
            avatar: event.actor_avatar.clone(),
        };
        self.store.upsert_profile(key, &event.actor_id, &profile).await?;
        self.store.init_meta(key, event).await?;
        self.store.refresh_ttl(key, self.window_ttl_secs()).await?;

        Ok(count)
    }

    /// First-flush-wins: the take is atomic, so the concurrent loser observes
    /// an already-deleted window and emits nothing.
    pub async fn flush(&self, key: &str) -> Result<Option<NotificationEvent>, Error> {
        let Some(contents) = self.store.take_window(key).await? else {
            return Ok(None);
        };

        if contents.members.is_empty() {
            return Ok(None);
        }

        let payload = AggregatedPayload::from_contents(contents);
        debug!(key = %key, count = payload.count, "Flushing aggregation window");

        Ok(Some(build_aggregated_event(payload)))
    }

    /// Flushes every window of the generation preceding `now_ms`. Only the
    /// previous generation is considered, so worst-case latency from first
    /// event to flush approaches twice the window duration.
    pub async fn sweep(&self, now_ms: i64) -> Result<Vec<NotificationEvent>, Error> {
        let previous = WindowKey::window_id_at(now_ms, self.window_duration_ms) - 1;
        let keys = self.store.scan_generation(previous).await?;

        let mut flushed = Vec::new();

        for key in keys {
            match self.flush(&key).await {
                Ok(Some(event)) => flushed.push(event),
                Ok(None) => {}
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to flush swept window");
                }
            }
        }

        Ok(flushed)
    }
}

fn build_aggregated_event(payload: AggregatedPayload) -> NotificationEvent {
    let others = payload.count.saturating_sub(1);
    let first_name = payload
        .actor_names
        .first()
        .cloned()
        .unwrap_or_else(|| payload.first_event.actor_name.clone());

    let mut event = payload.first_event;
    event.id = Uuid::new_v4();
    event.timestamp = payload.last_timestamp;
    event.message = aggregated_message(event.event_type, &first_name, others);

    event
        .metadata
        .insert("aggregated".to_string(), serde_json::json!(true));
    event
        .metadata
        .insert("aggregated_count".to_string(), serde_json::json!(payload.count));
    event
        .metadata
        .insert("actors".to_string(), serde_json::json!(payload.actors));
    event
        .metadata
        .insert("actor_names".to_string(), serde_json::json!(payload.actor_names));
    event.metadata.insert(
        "actor_avatars".to_string(),
        serde_json::json!(payload.actor_avatars),
    );

    event
}

/// Human copy for an aggregate. Total over the closed type set: every
/// variant has an arm, so a new type without copy fails to compile here.
pub fn aggregated_message(event_type: NotificationType, first_actor: &str, others: usize) -> String {
    let who = match others {
        0 => first_actor.to_string(),
        1 => format!("{} and 1 other", first_actor),
        n => format!("{} and {} others", first_actor, n),
    };

    match event_type {
        NotificationType::Like => format!("{} liked your post", who),
        NotificationType::Comment => format!("{} commented on your post", who),
        NotificationType::CommentReply => format!("{} replied to your comment", who),
        NotificationType::Follow => format!("{} started following you", who),
        NotificationType::PostShare => format!("{} shared your post", who),
        NotificationType::StoryView => format!("{} viewed your story", who),
        NotificationType::Mention
        | NotificationType::DirectMessage
        | NotificationType::Otp
        | NotificationType::SecurityAlert
        | NotificationType::SystemAnnouncement => format!("{} sent you a notification", who),
    }
}
