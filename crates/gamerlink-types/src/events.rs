use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Events sent over a chat room WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// Sent once, to this connection only, when the session becomes active
    Ready { match_id: i64, user_id: i64 },

    /// A message was persisted in the room
    Message {
        id: i64,
        match_id: i64,
        sender_id: i64,
        content: String,
        created_at: DateTime<Utc>,
        sender_identity: String,
    },
}

impl ChatEvent {
    /// Serialize for the wire. The event types hold no maps with non-string
    /// keys, so this only fails on allocation errors.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Payload sent FROM client TO server over the chat WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCommand {
    pub content: String,
}
