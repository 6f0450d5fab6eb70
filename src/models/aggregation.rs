use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::event::{NotificationEvent, NotificationType};

/// Identity of one aggregation bucket. The generation (`window_id`) leads the
/// storage key so a whole generation can be scanned by prefix at sweep time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    pub window_id: i64,
    pub target_id: String,
    pub event_type: NotificationType,
    pub target_entity_id: Option<String>,
}

impl WindowKey {
    pub fn window_id_at(now_ms: i64, window_duration_ms: i64) -> i64 {
        now_ms / window_duration_ms
    }

    pub fn for_event(event: &NotificationEvent, window_duration_ms: i64, now_ms: i64) -> Self {
        Self {
            window_id: Self::window_id_at(now_ms, window_duration_ms),
            target_id: event.target_id.clone(),
            event_type: event.event_type,
            target_entity_id: event.target_entity_id.clone(),
        }
    }

    pub fn storage_key(&self) -> String {
        format!(
            "agg:{}:{}:{}:{}",
            self.window_id,
            self.target_id,
            self.event_type.as_str(),
            self.target_entity_id.as_deref().unwrap_or("-")
        )
    }

    pub fn generation_pattern(window_id: i64) -> String {
        format!("agg:{}:*", window_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorProfile {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Everything an atomic take-and-delete of a window returns: the distinct
/// members in first-seen order, their display profiles, and the snapshot of
/// the event that opened the window.
#[derive(Debug, Clone)]
pub struct WindowContents {
    pub members: Vec<(String, i64)>,
    pub profiles: HashMap<String, ActorProfile>,
    pub first_event: NotificationEvent,
}

#[derive(Debug, Clone)]
pub struct AggregatedPayload {
    pub actors: Vec<String>,
    pub actor_names: Vec<String>,
    pub actor_avatars: Vec<String>,
    pub first_event: NotificationEvent,
    pub last_timestamp: DateTime<Utc>,
    pub count: usize,
}

impl AggregatedPayload {
    pub fn from_contents(contents: WindowContents) -> Self {
        let count = contents.members.len();
        let actors: Vec<String> = contents
            .members
            .iter()
            .map(|(actor, _)| actor.clone())
            .collect();

        let mut actor_names = Vec::new();
        let mut actor_avatars = Vec::new();

        for actor in &actors {
            if let Some(profile) = contents.profiles.get(actor) {
                if !actor_names.contains(&profile.name) {
                    actor_names.push(profile.name.clone());
                }
                if let Some(avatar) = &profile.avatar {
                    if !actor_avatars.contains(avatar) {
                        actor_avatars.push(avatar.clone());
                    }
                }
            }
        }

        Self {
            actors,
            actor_names,
            actor_avatars,
            first_event: contents.first_event,
            last_timestamp: Utc::now(),
            count,
        }
    }
}

/// Outcome of offering one event to the window manager.
#[derive(Debug)]
pub enum AggregationDecision {
    /// Deliver the event as-is; aggregation does not apply.
    SendNow(NotificationEvent),
    /// The batch threshold was hit; deliver the aggregate built inline.
    SendAggregated(NotificationEvent),
    /// The event was absorbed into an open window.
    Absorbed,
}
