use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message kinds as stored and sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Webhook,
    Notification,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Webhook => "webhook",
            MessageKind::Notification => "notification",
        }
    }

    pub fn from_db(raw: &str) -> MessageKind {
        match raw {
            "image" => MessageKind::Image,
            "webhook" => MessageKind::Webhook,
            "notification" => MessageKind::Notification,
            _ => MessageKind::Text,
        }
    }
}

/// Wire shape of a message, used both for REST responses and the
/// `message:new` realtime event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: i64,
    pub channel_id: i64,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub sender_uuid: Uuid,
    pub sender_name: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub read_by: Vec<Uuid>,
}

/// Events pushed to realtime listeners. Each broadcast serializes the
/// envelope exactly once; every recipient sees a byte-identical payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum RealtimeEvent {
    /// Handshake confirmation, pushed right after a connection registers.
    #[serde(rename = "connected")]
    Connected {
        #[serde(rename = "channelId")]
        channel_id: Option<i64>,
        #[serde(rename = "userId")]
        user_id: Uuid,
    },

    /// A message was persisted to a channel.
    #[serde(rename = "message:new")]
    MessageNew(MessagePayload),

    /// A user caught up on messages in a channel.
    #[serde(rename = "message:read")]
    MessageRead {
        #[serde(rename = "messageIds")]
        message_ids: Vec<i64>,
        #[serde(rename = "userId")]
        user_id: Uuid,
    },

    #[serde(rename = "error")]
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_envelope_shape() {
        let user_id = Uuid::new_v4();
        let event = RealtimeEvent::Connected {
            channel_id: Some(7),
            user_id,
        };

        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "connected");
        assert_eq!(json["data"]["channelId"], 7);
        assert_eq!(json["data"]["userId"], user_id.to_string());
    }

    #[test]
    fn message_read_envelope_shape() {
        let user_id = Uuid::new_v4();
        let event = RealtimeEvent::MessageRead {
            message_ids: vec![1, 2, 3],
            user_id,
        };

        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "message:read");
        assert_eq!(json["data"]["messageIds"], serde_json::json!([1, 2, 3]));
    }

    #[test]
    fn message_new_omits_absent_image_url() {
        let event = RealtimeEvent::MessageNew(MessagePayload {
            id: 1,
            channel_id: 7,
            kind: MessageKind::Text,
            content: "hi".into(),
            image_url: None,
            sender_uuid: Uuid::new_v4(),
            sender_name: "Dev".into(),
            created_at: chrono::Utc::now(),
            read_by: vec![],
        });

        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "message:new");
        assert_eq!(json["data"]["type"], "text");
        assert!(json["data"].get("image_url").is_none());
    }
}
