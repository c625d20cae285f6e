//! Client -> server control frames.

use serde::{Deserialize, Serialize};

/// Control frames sent from the browser to the actor.
///
/// `event_id` is a caller-chosen correlation key, unique among the
/// caller's concurrently active streams.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Start a generation stream for a conversation.
    #[serde(rename = "chat.stream.create")]
    StreamCreate {
        #[serde(rename = "eventId")]
        event_id: String,
        #[serde(rename = "conversationId")]
        conversation_id: String,
        content: String,
        model: String,
    },

    /// Cancel an in-flight generation stream.
    #[serde(rename = "chat.stream.cancel")]
    StreamCancel {
        #[serde(rename = "eventId")]
        event_id: String,
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },

    /// Rename a conversation; the new title is rebroadcast to watchers.
    #[serde(rename = "conversation.title.update")]
    TitleUpdate {
        #[serde(rename = "eventId")]
        event_id: String,
        #[serde(rename = "conversationId")]
        conversation_id: String,
        title: String,
    },
}

impl ClientFrame {
    /// The conversation every inbound frame refers to.
    pub fn conversation_id(&self) -> &str {
        match self {
            ClientFrame::StreamCreate {
                conversation_id, ..
            }
            | ClientFrame::StreamCancel {
                conversation_id, ..
            }
            | ClientFrame::TitleUpdate {
                conversation_id, ..
            } => conversation_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_create_round_trips_wire_names() {
        let json = r#"{
            "type": "chat.stream.create",
            "eventId": "evt-1",
            "conversationId": "conv-1",
            "content": "hello",
            "model": "small"
        }"#;

        let frame: ClientFrame = serde_json::from_str(json).unwrap();
        assert_eq!(
            frame,
            ClientFrame::StreamCreate {
                event_id: "evt-1".to_string(),
                conversation_id: "conv-1".to_string(),
                content: "hello".to_string(),
                model: "small".to_string(),
            }
        );
        assert_eq!(frame.conversation_id(), "conv-1");

        let out = serde_json::to_string(&frame).unwrap();
        assert!(out.contains("\"type\":\"chat.stream.create\""));
        assert!(out.contains("\"eventId\":\"evt-1\""));
    }

    #[test]
    fn cancel_frame_parses() {
        let json = r#"{"type":"chat.stream.cancel","eventId":"e","conversationId":"c"}"#;
        let frame: ClientFrame = serde_json::from_str(json).unwrap();
        assert!(matches!(frame, ClientFrame::StreamCancel { .. }));
    }

    #[test]
    fn unknown_type_is_an_error() {
        let json = r#"{"type":"chat.stream.destroy","eventId":"e","conversationId":"c"}"#;
        assert!(serde_json::from_str::<ClientFrame>(json).is_err());
    }

    #[test]
    fn missing_field_is_an_error() {
        let json = r#"{"type":"chat.stream.create","eventId":"e","conversationId":"c"}"#;
        assert!(serde_json::from_str::<ClientFrame>(json).is_err());
    }
}
