use anyhow::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::event::{NotificationEvent, Priority};

/// Durable stand-in for a broker publish that could not happen. Records keep
/// the originating event's id so redelivery stays traceable end to end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackRecord {
    pub id: Uuid,
    pub payload: serde_json::Value,
    pub topic: String,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub processed: bool,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl FallbackRecord {
    pub fn from_event(event: &NotificationEvent, topic: &str) -> Result<Self, Error> {
        Ok(Self {
            id: event.id,
            payload: serde_json::to_value(event)?,
            topic: topic.to_string(),
            priority: event.priority,
            created_at: Utc::now(),
            processed: false,
            retry_count: 0,
            last_error: None,
            processed_at: None,
        })
    }
}

/// Pending and failed are disjoint buckets: a record past the retry cap is
/// retained for inspection but never counted as deliverable work.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FallbackStats {
    pub pending: i64,
    pub failed: i64,
    pub processed: i64,
}
