use std::collections::HashMap;
use std::fmt::{Display, Formatter, Result as FmtResult};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    Like,
    Comment,
    CommentReply,
    Follow,
    PostShare,
    StoryView,
    Mention,
    DirectMessage,
    Otp,
    SecurityAlert,
    SystemAnnouncement,
}

impl NotificationType {
    pub fn is_aggregatable(&self) -> bool {
        matches!(
            self,
            NotificationType::Like
                | NotificationType::Comment
                | NotificationType::CommentReply
                | NotificationType::Follow
                | NotificationType::PostShare
                | NotificationType::StoryView
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Like => "LIKE",
            NotificationType::Comment => "COMMENT",
            NotificationType::CommentReply => "COMMENT_REPLY",
            NotificationType::Follow => "FOLLOW",
            NotificationType::PostShare => "POST_SHARE",
            NotificationType::StoryView => "STORY_VIEW",
            NotificationType::Mention => "MENTION",
            NotificationType::DirectMessage => "DIRECT_MESSAGE",
            NotificationType::Otp => "OTP",
            NotificationType::SecurityAlert => "SECURITY_ALERT",
            NotificationType::SystemAnnouncement => "SYSTEM_ANNOUNCEMENT",
        }
    }
}

impl Display for NotificationType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Critical,
    High,
    Low,
}

impl Priority {
    /// Channel allow-list consumed by the delivery services. A channel absent
    /// from the list must not be attempted even if that service is healthy.
    pub fn channels(&self) -> &'static [Channel] {
        match self {
            Priority::Critical => &[Channel::Push, Channel::Email, Channel::Sms],
            Priority::High => &[Channel::Push, Channel::Email],
            Priority::Low => &[Channel::Push],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "CRITICAL",
            Priority::High => "HIGH",
            Priority::Low => "LOW",
        }
    }

    /// Unrecognized values degrade to the least urgent tier.
    pub fn from_string(s: &str) -> Self {
        match s {
            "CRITICAL" => Priority::Critical,
            "HIGH" => Priority::High,
            _ => Priority::Low,
        }
    }
}

impl Display for Priority {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Channel {
    Push,
    Email,
    Sms,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Push => "PUSH",
            Channel::Email => "EMAIL",
            Channel::Sms => "SMS",
        }
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub id: Uuid,
    pub event_type: NotificationType,
    pub priority: Priority,
    pub actor_id: String,
    pub actor_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_avatar: Option<String>,

    pub target_id: String,
    pub target_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_entity_id: Option<String>,

    pub title: String,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,

    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl NotificationEvent {
    pub fn new(
        event_type: NotificationType,
        priority: Priority,
        actor_id: String,
        actor_name: String,
        target_id: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            priority,
            actor_id,
            actor_name,
            actor_avatar: None,
            target_id,
            target_type: "user".to_string(),
            target_entity_id: None,
            title: String::new(),
            message: String::new(),
            image_url: None,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_entity(mut self, entity_id: String) -> Self {
        self.target_entity_id = Some(entity_id);
        self
    }

    pub fn with_content(mut self, title: String, message: String) -> Self {
        self.title = title;
        self.message = message;
        self
    }

    pub fn with_avatar(mut self, avatar_url: String) -> Self {
        self.actor_avatar = Some(avatar_url);
        self
    }

    /// Attaches the resolved channel allow-list to the event's metadata so
    /// delivery-channel consumers never have to re-derive it.
    pub fn attach_channels(&mut self) {
        let channels: Vec<&str> = self.priority.channels().iter().map(Channel::as_str).collect();
        self.metadata
            .insert("channels".to_string(), serde_json::json!(channels));
    }
}
