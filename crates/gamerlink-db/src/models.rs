//! Database row types. These map directly to SQLite rows and stay distinct
//! from the gamerlink-types API models to keep the DB layer independent.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::Row;
use tracing::warn;

use gamerlink_types::models::{ChatMessage, MatchStatus, UserSummary};

/// Fixed-width so that lexical order on the TEXT column is chronological.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map(|ndt| ndt.and_utc())
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub email: String,
    pub password: String,
    pub is_active: bool,
    pub game: Option<String>,
    pub created_at: String,
}

impl UserRow {
    pub const COLUMNS: &'static str = "id, email, password, is_active, game, created_at";

    /// Read a user starting at column `offset`, for joined queries.
    pub(crate) fn from_row_at(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(offset)?,
            email: row.get(offset + 1)?,
            password: row.get(offset + 2)?,
            is_active: row.get(offset + 3)?,
            game: row.get(offset + 4)?,
            created_at: row.get(offset + 5)?,
        })
    }

    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            email: self.email.clone(),
            game: self.game.clone(),
            is_active: self.is_active,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LikeRow {
    pub id: i64,
    pub liker_id: i64,
    pub liked_id: i64,
    pub matured: bool,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct MatchRow {
    pub id: i64,
    pub user_a_id: i64,
    pub user_b_id: i64,
    pub status: MatchStatus,
    pub created_at: String,
}

impl MatchRow {
    pub(crate) fn from_row_at(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        let status: String = row.get(offset + 3)?;
        Ok(Self {
            id: row.get(offset)?,
            user_a_id: row.get(offset + 1)?,
            user_b_id: row.get(offset + 2)?,
            status: MatchStatus::parse(&status).unwrap_or_else(|| {
                warn!("Unknown match status '{}', treating as pending", status);
                MatchStatus::Pending
            }),
            created_at: row.get(offset + 4)?,
        })
    }

    /// The participant that is not `user_id`.
    pub fn other_participant(&self, user_id: i64) -> i64 {
        if self.user_a_id == user_id {
            self.user_b_id
        } else {
            self.user_a_id
        }
    }
}

/// A match with both participants resolved.
#[derive(Debug, Clone)]
pub struct MatchDetailRow {
    pub row: MatchRow,
    pub user_a: UserRow,
    pub user_b: UserRow,
}

impl MatchDetailRow {
    pub fn into_model(self) -> gamerlink_types::models::Match {
        gamerlink_types::models::Match {
            id: self.row.id,
            user_a: self.user_a.summary(),
            user_b: self.user_b.summary(),
            status: self.row.status,
            created_at: parse_timestamp(&self.row.created_at),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatMessageRow {
    pub id: i64,
    pub match_id: i64,
    pub sender_id: i64,
    pub sender_email: String,
    pub content: String,
    pub created_at: String,
}

impl ChatMessageRow {
    pub fn to_model(&self) -> ChatMessage {
        ChatMessage {
            id: self.id,
            match_id: self.match_id,
            sender_id: self.sender_id,
            content: self.content.clone(),
            created_at: parse_timestamp(&self.created_at),
        }
    }
}

pub struct ChatRoomRow {
    pub match_id: i64,
    pub other_user: UserRow,
    pub last_message: Option<ChatMessageRow>,
    pub unread_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_sort_lexically() {
        let early = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let late = early + chrono::Duration::microseconds(1);
        let (a, b) = (format_timestamp(early), format_timestamp(late));
        assert!(a < b);
        assert_eq!(parse_timestamp(&b), late);
    }
}
