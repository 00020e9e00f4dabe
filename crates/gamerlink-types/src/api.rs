use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ChatMessage, UserSummary};

// -- JWT Claims --

/// JWT claims shared across gamerlink-api (REST middleware) and
/// gamerlink-gateway (WebSocket authentication).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub email: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub game: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Returned by both register and login.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub user: UserSummary,
    pub access_token: String,
    pub token_type: String,
}

// -- Profile --

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub game: Option<String>,
    pub is_active: Option<bool>,
}

// -- Likes --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LikeStatus {
    Liked,
    Matched,
    AlreadyLiked,
    Error,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LikeResponse {
    pub status: LikeStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub like_id: Option<i64>,
}

/// One pending like, seen from either side: `user_id` is the other party.
#[derive(Debug, Serialize, Deserialize)]
pub struct PendingLike {
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
}

// -- Chat --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatRoom {
    pub match_id: i64,
    pub other_user: UserSummary,
    pub last_message: Option<ChatMessage>,
    pub unread_count: u64,
}

/// Upper bound on a single chat message, in characters.
pub const MAX_MESSAGE_CHARS: usize = 2000;

/// Trims and validates chat content. Returns `None` for empty or over-long text.
pub fn normalize_content(raw: &str) -> Option<&str> {
    let content = raw.trim();
    if content.is_empty() || content.chars().count() > MAX_MESSAGE_CHARS {
        return None;
    }
    Some(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_status_uses_screaming_case() {
        let json = serde_json::to_string(&LikeStatus::AlreadyLiked).unwrap();
        assert_eq!(json, "\"ALREADY_LIKED\"");
    }

    #[test]
    fn like_response_omits_absent_ids() {
        let resp = LikeResponse {
            status: LikeStatus::Liked,
            message: "ok".into(),
            match_id: None,
            like_id: Some(4),
        };
        let value = serde_json::to_value(&resp).unwrap();
        assert!(value.get("match_id").is_none());
        assert_eq!(value["like_id"], 4);
    }

    #[test]
    fn content_is_trimmed_and_bounded() {
        assert_eq!(normalize_content("  hi \n"), Some("hi"));
        assert_eq!(normalize_content("   "), None);
        let long = "x".repeat(MAX_MESSAGE_CHARS + 1);
        assert_eq!(normalize_content(&long), None);
    }
}
