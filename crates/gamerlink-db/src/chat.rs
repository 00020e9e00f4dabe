use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};

use gamerlink_types::models::MatchStatus;

use crate::models::{ChatMessageRow, ChatRoomRow, MatchRow, UserRow, format_timestamp, parse_timestamp};
use crate::queries::query_user_by_id;
use crate::{Database, DbSession};

impl Database {
    /// Messages of a room in creation order, or `None` when `user_id` is
    /// not a participant of a `matched` match with that id.
    pub fn get_chat_messages(&self, match_id: i64, user_id: i64) -> Result<Option<Vec<ChatMessageRow>>> {
        self.with_conn(|conn| {
            if query_participant_match(conn, match_id, user_id)?.is_none() {
                return Ok(None);
            }
            query_messages(conn, match_id).map(Some)
        })
    }

    /// Persist a message. `None` when the sender is not a participant.
    pub fn insert_chat_message(
        &self,
        match_id: i64,
        sender_id: i64,
        content: &str,
    ) -> Result<Option<ChatMessageRow>> {
        self.with_conn_mut(|conn| insert_message(conn, match_id, sender_id, content))
    }

    /// Advance the user's read marker to the newest message in the room.
    pub fn mark_room_read(&self, match_id: i64, user_id: i64) -> Result<()> {
        self.with_conn_mut(|conn| mark_read(conn, match_id, user_id))
    }

    pub fn get_chat_rooms(&self, user_id: i64) -> Result<Vec<ChatRoomRow>> {
        self.with_conn(|conn| query_rooms(conn, user_id))
    }
}

impl DbSession {
    pub fn get_user(&self, user_id: i64) -> Result<Option<UserRow>> {
        query_user_by_id(self.conn(), user_id)
    }

    pub fn find_participant_match(&self, match_id: i64, user_id: i64) -> Result<Option<MatchRow>> {
        query_participant_match(self.conn(), match_id, user_id)
    }

    pub fn insert_chat_message(
        &mut self,
        match_id: i64,
        sender_id: i64,
        content: &str,
    ) -> Result<Option<ChatMessageRow>> {
        insert_message(self.conn_mut(), match_id, sender_id, content)
    }

    pub fn mark_room_read(&mut self, match_id: i64, user_id: i64) -> Result<()> {
        mark_read(self.conn_mut(), match_id, user_id)
    }
}

fn query_participant_match(conn: &Connection, match_id: i64, user_id: i64) -> Result<Option<MatchRow>> {
    let row = conn
        .query_row(
            "SELECT id, user_a_id, user_b_id, status, created_at FROM matches
             WHERE id = ?1 AND status = ?2 AND (user_a_id = ?3 OR user_b_id = ?3)",
            rusqlite::params![match_id, MatchStatus::Matched.as_str(), user_id],
            |row| MatchRow::from_row_at(row, 0),
        )
        .optional()?;
    Ok(row)
}

fn insert_message(
    conn: &mut Connection,
    match_id: i64,
    sender_id: i64,
    content: &str,
) -> Result<Option<ChatMessageRow>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if query_participant_match(&tx, match_id, sender_id)?.is_none() {
        return Ok(None);
    }

    // Never stamp a message earlier than the newest one already in the room.
    let latest: Option<String> = tx.query_row(
        "SELECT MAX(created_at) FROM chat_messages WHERE match_id = ?1",
        [match_id],
        |row| row.get(0),
    )?;
    let mut created_at = Utc::now();
    if let Some(latest) = latest.as_deref().map(parse_timestamp) {
        created_at = created_at.max(latest);
    }
    let created_at = format_timestamp(created_at);

    tx.execute(
        "INSERT INTO chat_messages (match_id, sender_id, content, created_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![match_id, sender_id, content, created_at],
    )?;
    let id = tx.last_insert_rowid();
    let row = query_message(&tx, id)?;
    tx.commit()?;

    Ok(row)
}

fn mark_read(conn: &mut Connection, match_id: i64, user_id: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO chat_reads (match_id, user_id, last_read_id)
         SELECT ?1, ?2, COALESCE(MAX(id), 0) FROM chat_messages WHERE match_id = ?1
         ON CONFLICT(match_id, user_id) DO UPDATE SET last_read_id = MAX(last_read_id, excluded.last_read_id)",
        [match_id, user_id],
    )?;
    Ok(())
}

const MESSAGE_SELECT: &str = "SELECT c.id, c.match_id, c.sender_id, COALESCE(u.email, 'unknown'), c.content, c.created_at
     FROM chat_messages c
     LEFT JOIN users u ON u.id = c.sender_id";

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessageRow> {
    Ok(ChatMessageRow {
        id: row.get(0)?,
        match_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_email: row.get(3)?,
        content: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn query_message(conn: &Connection, id: i64) -> Result<Option<ChatMessageRow>> {
    let row = conn
        .query_row(&format!("{MESSAGE_SELECT} WHERE c.id = ?1"), [id], message_from_row)
        .optional()?;
    Ok(row)
}

fn query_messages(conn: &Connection, match_id: i64) -> Result<Vec<ChatMessageRow>> {
    let mut stmt = conn.prepare(&format!(
        "{MESSAGE_SELECT} WHERE c.match_id = ?1 ORDER BY c.created_at, c.id"
    ))?;
    let rows = stmt
        .query_map([match_id], message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn query_rooms(conn: &Connection, user_id: i64) -> Result<Vec<ChatRoomRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_a_id, user_b_id, status, created_at FROM matches
         WHERE (user_a_id = ?1 OR user_b_id = ?1) AND status = ?2
         ORDER BY created_at, id",
    )?;
    let matches = stmt
        .query_map(rusqlite::params![user_id, MatchStatus::Matched.as_str()], |row| {
            MatchRow::from_row_at(row, 0)
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut rooms = Vec::with_capacity(matches.len());
    for m in matches {
        let other_id = m.other_participant(user_id);
        let Some(other_user) = query_user_by_id(conn, other_id)? else {
            continue;
        };

        let last_message = conn
            .query_row(
                &format!("{MESSAGE_SELECT} WHERE c.match_id = ?1 ORDER BY c.created_at DESC, c.id DESC LIMIT 1"),
                [m.id],
                message_from_row,
            )
            .optional()?;

        let unread_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chat_messages
             WHERE match_id = ?1 AND sender_id <> ?2
               AND id > COALESCE((SELECT last_read_id FROM chat_reads WHERE match_id = ?1 AND user_id = ?2), 0)",
            [m.id, user_id],
            |row| row.get(0),
        )?;

        rooms.push(ChatRoomRow {
            match_id: m.id,
            other_user,
            last_message,
            unread_count: unread_count.max(0) as u64,
        });
    }

    Ok(rooms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{open_temp, user};

    fn matched_pair(db: &Database) -> (i64, i64, i64) {
        let alice = user(db, "alice@example.com", Some("Valorant"));
        let bob = user(db, "bob@example.com", Some("Valorant"));
        db.like(alice, bob).unwrap();
        let crate::reciprocity::LikeOutcome::Matched { match_id, .. } = db.like(bob, alice).unwrap() else {
            panic!("expected a match");
        };
        (alice, bob, match_id)
    }

    #[test]
    fn outsiders_cannot_read_or_write() {
        let (_dir, db) = open_temp();
        let (_alice, _bob, match_id) = matched_pair(&db);
        let mallory = user(&db, "mallory@example.com", None);

        assert!(db.get_chat_messages(match_id, mallory).unwrap().is_none());
        assert!(db.insert_chat_message(match_id, mallory, "hi").unwrap().is_none());
        assert!(db.get_chat_messages(match_id + 100, mallory).unwrap().is_none());
    }

    #[test]
    fn pending_likes_do_not_open_a_room() {
        let (_dir, db) = open_temp();
        let alice = user(&db, "alice@example.com", None);
        let bob = user(&db, "bob@example.com", None);
        db.like(alice, bob).unwrap();

        assert!(db.get_chat_rooms(alice).unwrap().is_empty());
    }

    #[test]
    fn messages_come_back_in_order_with_rising_timestamps() {
        let (_dir, db) = open_temp();
        let (alice, bob, match_id) = matched_pair(&db);

        for i in 0..10 {
            let sender = if i % 2 == 0 { alice } else { bob };
            db.insert_chat_message(match_id, sender, &format!("m{i}")).unwrap().unwrap();
        }

        let messages = db.get_chat_messages(match_id, alice).unwrap().unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, (0..10).map(|i| format!("m{i}")).collect::<Vec<_>>());
        assert!(messages.windows(2).all(|w| w[0].created_at <= w[1].created_at));
        assert_eq!(messages[1].sender_email, "bob@example.com");
    }

    #[test]
    fn session_handle_shares_the_store() {
        let (_dir, db) = open_temp();
        let (alice, _bob, match_id) = matched_pair(&db);

        let mut session = db.open_session().unwrap();
        assert!(session.find_participant_match(match_id, alice).unwrap().is_some());
        let saved = session.insert_chat_message(match_id, alice, "from session").unwrap().unwrap();
        drop(session);

        let messages = db.get_chat_messages(match_id, alice).unwrap().unwrap();
        assert_eq!(messages.last().map(|m| m.id), Some(saved.id));
    }

    #[test]
    fn rooms_track_last_message_and_unread() {
        let (_dir, db) = open_temp();
        let (alice, bob, match_id) = matched_pair(&db);

        db.insert_chat_message(match_id, bob, "one").unwrap();
        db.insert_chat_message(match_id, bob, "two").unwrap();
        db.insert_chat_message(match_id, alice, "mine").unwrap();

        let rooms = db.get_chat_rooms(alice).unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].other_user.id, bob);
        assert_eq!(rooms[0].last_message.as_ref().map(|m| m.content.as_str()), Some("mine"));
        assert_eq!(rooms[0].unread_count, 2);

        db.mark_room_read(match_id, alice).unwrap();
        assert_eq!(db.get_chat_rooms(alice).unwrap()[0].unread_count, 0);

        db.insert_chat_message(match_id, bob, "three").unwrap();
        assert_eq!(db.get_chat_rooms(alice).unwrap()[0].unread_count, 1);
        assert_eq!(db.get_chat_rooms(bob).unwrap()[0].unread_count, 1);
    }
}
