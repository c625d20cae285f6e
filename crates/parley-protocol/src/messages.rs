//! Server -> client event frames.

use serde::{Deserialize, Serialize};

/// Event frames broadcast from the actor to every connection watching a
/// conversation.
///
/// For one `event_id` the client sees zero or more `StreamResponse`
/// frames followed by at most one `StreamDone`. A cancelled stream ends
/// without `StreamDone`; the socket staying open is the implicit stop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// One fragment of streamed assistant output.
    #[serde(rename = "chat.stream.response")]
    StreamResponse {
        #[serde(rename = "eventId")]
        event_id: String,
        #[serde(rename = "conversationId")]
        conversation_id: String,
        content: String,
    },

    /// The stream for `event_id` completed and its message was persisted.
    #[serde(rename = "chat.stream.done")]
    StreamDone {
        #[serde(rename = "eventId")]
        event_id: String,
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },

    /// A conversation title changed (manual rename or auto-generated).
    #[serde(rename = "conversation.title.update")]
    TitleUpdate {
        #[serde(rename = "eventId")]
        event_id: String,
        #[serde(rename = "conversationId")]
        conversation_id: String,
        title: String,
    },
}
