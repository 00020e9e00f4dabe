//! Like/match reciprocity.
//!
//! A like is a directed edge. When the second direction of a pair is
//! recorded, a single `matched` row is created for the unordered pair.
//! The whole check-then-insert sequence runs in one `BEGIN IMMEDIATE`
//! transaction on the writer connection, and the schema's
//! `UNIQUE(liker_id, liked_id)` / `UNIQUE(user_a_id, user_b_id)`
//! constraints back that up at the store level.

use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info};

use gamerlink_types::models::MatchStatus;

use crate::Database;
use crate::models::{LikeRow, MatchDetailRow, MatchRow, UserRow, now_timestamp};

/// Result of a `like` call. Only `Liked` and `Matched` change state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeOutcome {
    Liked { like_id: i64 },
    Matched { like_id: i64, match_id: i64 },
    AlreadyLiked,
    SelfLike,
    /// Target does not exist or is deactivated.
    TargetNotFound,
}

/// Order a pair so that the smaller id comes first.
pub fn canonical_pair(a: i64, b: i64) -> (i64, i64) {
    if a < b { (a, b) } else { (b, a) }
}

impl Database {
    pub fn like(&self, liker_id: i64, target_id: i64) -> Result<LikeOutcome> {
        if liker_id == target_id {
            return Ok(LikeOutcome::SelfLike);
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let target_active: Option<bool> = tx
                .query_row("SELECT is_active FROM users WHERE id = ?1", [target_id], |row| row.get(0))
                .optional()?;
            if target_active != Some(true) {
                return Ok(LikeOutcome::TargetNotFound);
            }

            if find_like(&tx, liker_id, target_id)?.is_some() {
                return Ok(LikeOutcome::AlreadyLiked);
            }

            let now = now_timestamp();
            tx.execute(
                "INSERT INTO likes (liker_id, liked_id, matured, created_at) VALUES (?1, ?2, 0, ?3)",
                rusqlite::params![liker_id, target_id, now],
            )?;
            let like_id = tx.last_insert_rowid();

            if find_like(&tx, target_id, liker_id)?.is_none() {
                tx.commit()?;
                debug!("User {} liked {}", liker_id, target_id);
                return Ok(LikeOutcome::Liked { like_id });
            }

            let (user_a, user_b) = canonical_pair(liker_id, target_id);
            tx.execute(
                "INSERT INTO matches (user_a_id, user_b_id, status, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![user_a, user_b, MatchStatus::Matched.as_str(), now],
            )?;
            let match_id = tx.last_insert_rowid();

            tx.execute(
                "UPDATE likes SET matured = 1
                 WHERE (liker_id = ?1 AND liked_id = ?2) OR (liker_id = ?2 AND liked_id = ?1)",
                [user_a, user_b],
            )?;

            tx.commit()?;
            info!("Match {} created between {} and {}", match_id, user_a, user_b);
            Ok(LikeOutcome::Matched { like_id, match_id })
        })
    }

    /// All `matched` matches the user takes part in, with both participants.
    pub fn get_user_matches(&self, user_id: i64) -> Result<Vec<MatchDetailRow>> {
        self.with_conn(|conn| query_user_matches(conn, user_id))
    }

    /// Likes sent by `user_id` that have not matured into a match.
    pub fn get_pending_likes_sent(&self, user_id: i64) -> Result<Vec<LikeRow>> {
        self.with_conn(|conn| query_pending_likes(conn, "liker_id", user_id))
    }

    /// Likes received by `user_id` that have not matured into a match.
    pub fn get_pending_likes_received(&self, user_id: i64) -> Result<Vec<LikeRow>> {
        self.with_conn(|conn| query_pending_likes(conn, "liked_id", user_id))
    }

    pub fn get_match_between(&self, a: i64, b: i64) -> Result<Option<MatchRow>> {
        let (user_a, user_b) = canonical_pair(a, b);
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, user_a_id, user_b_id, status, created_at FROM matches
                     WHERE user_a_id = ?1 AND user_b_id = ?2",
                    [user_a, user_b],
                    |row| MatchRow::from_row_at(row, 0),
                )
                .optional()?;
            Ok(row)
        })
    }
}

fn find_like(conn: &Connection, liker_id: i64, liked_id: i64) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT id FROM likes WHERE liker_id = ?1 AND liked_id = ?2",
            [liker_id, liked_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

fn query_pending_likes(conn: &Connection, side: &'static str, user_id: i64) -> Result<Vec<LikeRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, liker_id, liked_id, matured, created_at FROM likes
         WHERE {side} = ?1 AND matured = 0
         ORDER BY created_at, id"
    ))?;

    let rows = stmt
        .query_map([user_id], |row| {
            Ok(LikeRow {
                id: row.get(0)?,
                liker_id: row.get(1)?,
                liked_id: row.get(2)?,
                matured: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_user_matches(conn: &Connection, user_id: i64) -> Result<Vec<MatchDetailRow>> {
    // JOIN both participants in a single query
    let mut stmt = conn.prepare(&format!(
        "SELECT m.id, m.user_a_id, m.user_b_id, m.status, m.created_at, {a}, {b}
         FROM matches m
         JOIN users a ON a.id = m.user_a_id
         JOIN users b ON b.id = m.user_b_id
         WHERE (m.user_a_id = ?1 OR m.user_b_id = ?1) AND m.status = ?2
         ORDER BY m.created_at, m.id",
        a = prefixed_user_columns("a"),
        b = prefixed_user_columns("b"),
    ))?;

    let rows = stmt
        .query_map(rusqlite::params![user_id, MatchStatus::Matched.as_str()], |row| {
            Ok(MatchDetailRow {
                row: MatchRow::from_row_at(row, 0)?,
                user_a: UserRow::from_row_at(row, 5)?,
                user_b: UserRow::from_row_at(row, 11)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

pub(crate) fn prefixed_user_columns(alias: &str) -> String {
    UserRow::COLUMNS
        .split(", ")
        .map(|col| format!("{alias}.{col}"))
        .collect::<Vec<_>>()
        .join(", ")
}
