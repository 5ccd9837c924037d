//! v001 -- Initial schema creation.
//!
//! Creates the three core tables: `discussions`, `participants` and
//! `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Discussions
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS discussions (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    is_active INTEGER NOT NULL DEFAULT 1,      -- boolean 0/1
    is_group  INTEGER NOT NULL DEFAULT 0,      -- boolean 0/1
    name      TEXT NOT NULL DEFAULT '',
    photo     TEXT NOT NULL DEFAULT '',
    time      TEXT NOT NULL                    -- RFC-3339, last activity
);

-- ----------------------------------------------------------------
-- Participants
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS participants (
    discussion_id       INTEGER NOT NULL,      -- FK -> discussions(id)
    user_id             TEXT NOT NULL,
    first_name          TEXT NOT NULL DEFAULT '',
    last_name           TEXT NOT NULL DEFAULT '',
    photo               TEXT NOT NULL DEFAULT '',
    unread_messages_cnt INTEGER NOT NULL DEFAULT 0 CHECK (unread_messages_cnt >= 0),

    PRIMARY KEY (discussion_id, user_id),
    FOREIGN KEY (discussion_id) REFERENCES discussions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_participants_user_id ON participants(user_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    discussion_id INTEGER NOT NULL,            -- FK -> discussions(id)
    sender_id     TEXT NOT NULL,
    text          TEXT NOT NULL DEFAULT '',
    file_path     TEXT NOT NULL DEFAULT '',
    is_read       INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    sent_time     TEXT NOT NULL,               -- RFC-3339

    CHECK (text <> '' OR file_path <> ''),
    FOREIGN KEY (discussion_id) REFERENCES discussions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_discussion_ts
    ON messages(discussion_id, sent_time);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
