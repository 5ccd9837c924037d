use agora_shared::models::{Message, MessagePatch};
use agora_shared::types::{DiscussionId, MessageId, UserId};
use rusqlite::params;

use crate::database::{from_sql_time, to_sql_time, Database};
use crate::error::{Result, StoreError};

impl Database {
    /// Insert `message` (its `id` is ignored) and return the stored row.
    pub fn insert_message(&self, message: &Message) -> Result<Message> {
        self.conn().execute(
            "INSERT INTO messages (discussion_id, sender_id, text, file_path, is_read, sent_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.discussion_id.0,
                message.sender_id.as_str(),
                message.text,
                message.file_path,
                message.is_read,
                to_sql_time(&message.sent_time),
            ],
        )?;
        let id = MessageId(self.conn().last_insert_rowid());
        self.get_message(id)
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                "SELECT id, discussion_id, sender_id, text, file_path, is_read, sent_time
                 FROM messages WHERE id = ?1",
                params![id.0],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::MessageNotFound(id),
                other => StoreError::Sqlite(other),
            })
    }

    /// Message history of a discussion, oldest first.
    pub fn list_messages(&self, discussion_id: DiscussionId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, discussion_id, sender_id, text, file_path, is_read, sent_time
             FROM messages
             WHERE discussion_id = ?1
             ORDER BY sent_time ASC, id ASC",
        )?;

        let rows = stmt.query_map(params![discussion_id.0], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Apply the set fields of `patch`.
    ///
    /// Setting the read flag is conditional: a message that is already read
    /// yields [`StoreError::AlreadyRead`], so two concurrent readers can never
    /// both flip it.
    pub fn update_message(&self, id: MessageId, patch: &MessagePatch) -> Result<()> {
        if patch.is_empty() {
            return Err(StoreError::NothingToUpdate);
        }

        let tx = self.conn().unchecked_transaction()?;

        if let Some(is_read) = patch.is_read {
            let affected = if is_read {
                tx.execute(
                    "UPDATE messages SET is_read = 1 WHERE id = ?1 AND is_read = 0",
                    params![id.0],
                )?
            } else {
                tx.execute("UPDATE messages SET is_read = 0 WHERE id = ?1", params![id.0])?
            };
            if affected == 0 {
                // Distinguish "missing" from "already read".
                self.get_message(id)?;
                return Err(StoreError::AlreadyRead(id));
            }
        }

        if let Some(ref text) = patch.text {
            let affected = tx.execute(
                "UPDATE messages SET text = ?1 WHERE id = ?2",
                params![text, id.0],
            )?;
            if affected == 0 {
                return Err(StoreError::MessageNotFound(id));
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Number of unread messages in a discussion sent by someone other than `user_id`.
    #[cfg(test)]
    pub fn count_unread_from_others(&self, discussion_id: DiscussionId, user_id: &UserId) -> Result<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM messages
             WHERE discussion_id = ?1 AND sender_id != ?2 AND is_read = 0",
            params![discussion_id.0, user_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let sent_str: String = row.get(6)?;

    Ok(Message {
        id: MessageId(row.get(0)?),
        discussion_id: DiscussionId(row.get(1)?),
        sender_id: UserId(row.get(2)?),
        text: row.get(3)?,
        file_path: row.get(4)?,
        is_read: row.get(5)?,
        sent_time: from_sql_time(6, &sent_str)?,
    })
}
