use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            BEGIN;

            CREATE TABLE users (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                email       TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                is_active   INTEGER NOT NULL DEFAULT 1,
                game        TEXT,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_users_game ON users(game);

            CREATE TABLE likes (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                liker_id    INTEGER NOT NULL REFERENCES users(id),
                liked_id    INTEGER NOT NULL REFERENCES users(id),
                matured     INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL,
                UNIQUE(liker_id, liked_id),
                CHECK(liker_id <> liked_id)
            );

            CREATE INDEX idx_likes_liked ON likes(liked_id);

            CREATE TABLE matches (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_a_id   INTEGER NOT NULL REFERENCES users(id),
                user_b_id   INTEGER NOT NULL REFERENCES users(id),
                status      TEXT NOT NULL CHECK(status IN ('pending', 'matched')),
                created_at  TEXT NOT NULL,
                UNIQUE(user_a_id, user_b_id),
                CHECK(user_a_id < user_b_id)
            );

            CREATE INDEX idx_matches_user_b ON matches(user_b_id);

            CREATE TABLE chat_messages (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                match_id    INTEGER NOT NULL REFERENCES matches(id),
                sender_id   INTEGER NOT NULL REFERENCES users(id),
                content     TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_chat_messages_match
                ON chat_messages(match_id, created_at, id);

            CREATE TABLE chat_reads (
                match_id      INTEGER NOT NULL REFERENCES matches(id),
                user_id       INTEGER NOT NULL REFERENCES users(id),
                last_read_id  INTEGER NOT NULL,
                PRIMARY KEY (match_id, user_id)
            );

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
