use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::event::{Channel, NotificationEvent};

/// Terminal record of a delivery that exhausted its retry budget. Write-once;
/// nothing in the pipeline ever mutates an envelope after publication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEnvelope {
    pub event: NotificationEvent,
    pub failed_channel: Channel,
    pub error_message: String,
    pub attempt_count: u32,
    pub failed_at: DateTime<Utc>,
    pub original_timestamp: DateTime<Utc>,
}

impl DlqEnvelope {
    pub fn new(
        event: NotificationEvent,
        failed_channel: Channel,
        error_message: String,
        attempt_count: u32,
    ) -> Self {
        let original_timestamp = event.timestamp;

        Self {
            event,
            failed_channel,
            error_message,
            attempt_count,
            failed_at: Utc::now(),
            original_timestamp,
        }
    }
}
