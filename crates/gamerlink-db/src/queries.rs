use crate::Database;
use crate::models::{UserRow, now_timestamp};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};

/// Partial profile update. `None` leaves the field untouched; `game: Some(None)` clears it.
#[derive(Debug, Default, Clone)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub game: Option<Option<String>>,
    pub is_active: Option<bool>,
}

#[derive(Debug)]
pub enum ProfileUpdate {
    Updated(UserRow),
    EmailTaken,
    NotFound,
}

impl Database {
    // -- Users --

    /// Returns `None` when the email is already registered.
    pub fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        game: Option<&str>,
    ) -> Result<Option<UserRow>> {
        self.with_conn_mut(|conn| {
            if query_user_by_email(conn, email)?.is_some() {
                return Ok(None);
            }
            conn.execute(
                "INSERT INTO users (email, password, is_active, game, created_at) VALUES (?1, ?2, 1, ?3, ?4)",
                rusqlite::params![email, password_hash, game, now_timestamp()],
            )?;
            let id = conn.last_insert_rowid();
            query_user_by_id(conn, id)
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_email(conn, email))
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    pub fn update_user(&self, id: i64, update: &UserUpdate) -> Result<ProfileUpdate> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let Some(current) = query_user_by_id(&tx, id)? else {
                return Ok(ProfileUpdate::NotFound);
            };

            if let Some(email) = &update.email {
                if *email != current.email && query_user_by_email(&tx, email)?.is_some() {
                    return Ok(ProfileUpdate::EmailTaken);
                }
            }

            let email = update.email.clone().unwrap_or(current.email);
            let game = update.game.clone().unwrap_or(current.game);
            let is_active = update.is_active.unwrap_or(current.is_active);

            tx.execute(
                "UPDATE users SET email = ?1, game = ?2, is_active = ?3 WHERE id = ?4",
                rusqlite::params![email, game, is_active, id],
            )?;
            let updated = query_user_by_id(&tx, id)?;
            tx.commit()?;

            Ok(updated.map_or(ProfileUpdate::NotFound, ProfileUpdate::Updated))
        })
    }

    /// Active players of `game`, excluding `user_id`.
    pub fn users_with_same_game(&self, user_id: i64, game: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM users WHERE game = ?1 AND id <> ?2 AND is_active = 1 ORDER BY id",
                UserRow::COLUMNS
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![game, user_id], |row| UserRow::from_row_at(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

pub(crate) fn query_user_by_email(conn: &Connection, email: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM users WHERE email = ?1", UserRow::COLUMNS))?;
    let row = stmt.query_row([email], |row| UserRow::from_row_at(row, 0)).optional()?;
    Ok(row)
}

pub(crate) fn query_user_by_id(conn: &Connection, id: i64) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM users WHERE id = ?1", UserRow::COLUMNS))?;
    let row = stmt.query_row([id], |row| UserRow::from_row_at(row, 0)).optional()?;
    Ok(row)
}
