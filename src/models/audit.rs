use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::event::NotificationEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Sent,
    FilteredPrefs,
    Failed,
}

impl Display for DeliveryOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            DeliveryOutcome::Sent => write!(f, "sent"),
            DeliveryOutcome::FilteredPrefs => write!(f, "filtered_prefs"),
            DeliveryOutcome::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateAuditEntry {
    pub event_id: Uuid,
    pub target_id: String,
    pub notification_type: String,
    pub priority: String,
    pub outcome: DeliveryOutcome,
    pub error_message: Option<String>,
    pub metadata: JsonValue,
}

impl CreateAuditEntry {
    pub fn new(event: &NotificationEvent, outcome: DeliveryOutcome) -> Self {
        Self {
            event_id: event.id,
            target_id: event.target_id.clone(),
            notification_type: event.event_type.as_str().to_string(),
            priority: event.priority.as_str().to_string(),
            outcome,
            error_message: None,
            metadata: serde_json::json!({}),
        }
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error_message = Some(error);
        self
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = metadata;
        self
    }
}
