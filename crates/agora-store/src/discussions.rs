//! CRUD operations for [`Discussion`] records.

use agora_shared::models::{Discussion, DiscussionPatch, NewDiscussion};
use agora_shared::types::{DiscussionId, UserId};
use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::database::{from_sql_time, to_sql_time, Database};
use crate::error::{Result, StoreError};

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a discussion together with its participant rows.
    ///
    /// Callers validate `new` first; the store only enforces what the schema
    /// enforces (one row per discussion/user pair).
    pub fn create_discussion(&self, new: &NewDiscussion, now: DateTime<Utc>) -> Result<Discussion> {
        let tx = self.conn().unchecked_transaction()?;

        tx.execute(
            "INSERT INTO discussions (is_active, is_group, name, photo, time)
             VALUES (1, ?1, ?2, ?3, ?4)",
            params![new.is_group, new.name, new.photo, to_sql_time(&now)],
        )?;
        let id = DiscussionId(tx.last_insert_rowid());

        for participant in &new.participants {
            tx.execute(
                "INSERT INTO participants
                     (discussion_id, user_id, first_name, last_name, photo, unread_messages_cnt)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0)",
                params![
                    id.0,
                    participant.user_id.as_str(),
                    participant.first_name,
                    participant.last_name,
                    participant.photo,
                ],
            )?;
        }

        tx.commit()?;

        tracing::debug!(discussion = %id, participants = new.participants.len(), "discussion created");

        self.get_discussion(id)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single discussion by id.
    pub fn get_discussion(&self, id: DiscussionId) -> Result<Discussion> {
        let mut discussion = self
            .conn()
            .query_row(
                "SELECT id, is_active, is_group, name, photo, time
                 FROM discussions
                 WHERE id = ?1",
                params![id.0],
                row_to_discussion,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::DiscussionNotFound(id),
                other => StoreError::Sqlite(other),
            })?;

        discussion.participants = self.participant_ids(id)?;
        Ok(discussion)
    }

    /// List the discussions `user_id` participates in, most recently active first.
    pub fn list_discussions_for_user(&self, user_id: &UserId) -> Result<Vec<Discussion>> {
        let mut stmt = self.conn().prepare(
            "SELECT d.id, d.is_active, d.is_group, d.name, d.photo, d.time
             FROM discussions AS d
             JOIN participants AS p ON p.discussion_id = d.id
             WHERE p.user_id = ?1
             ORDER BY d.time DESC, d.id DESC",
        )?;

        let rows = stmt.query_map(params![user_id.as_str()], row_to_discussion)?;

        let mut discussions = Vec::new();
        for row in rows {
            let mut discussion = row?;
            discussion.participants = self.participant_ids(discussion.id)?;
            discussions.push(discussion);
        }
        Ok(discussions)
    }

    fn participant_ids(&self, id: DiscussionId) -> Result<Vec<UserId>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id FROM participants WHERE discussion_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![id.0], |row| row.get::<_, String>(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(UserId(row?));
        }
        Ok(ids)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Apply the set fields of `patch`.
    pub fn update_discussion(&self, id: DiscussionId, patch: &DiscussionPatch) -> Result<()> {
        if patch.is_empty() {
            return Err(StoreError::NothingToUpdate);
        }

        let tx = self.conn().unchecked_transaction()?;
        let mut affected = 0;

        if let Some(is_active) = patch.is_active {
            affected += tx.execute(
                "UPDATE discussions SET is_active = ?1 WHERE id = ?2",
                params![is_active, id.0],
            )?;
        }
        if let Some(time) = patch.time {
            affected += tx.execute(
                "UPDATE discussions SET time = ?1 WHERE id = ?2",
                params![to_sql_time(&time), id.0],
            )?;
        }

        if affected == 0 {
            return Err(StoreError::DiscussionNotFound(id));
        }

        tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a discussion with its participants and messages.
    /// Returns `true` if a row was deleted.
    pub fn delete_discussion(&self, id: DiscussionId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM discussions WHERE id = ?1", params![id.0])?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Discussion`] without participants.
fn row_to_discussion(row: &rusqlite::Row<'_>) -> rusqlite::Result<Discussion> {
    let id: i64 = row.get(0)?;
    let is_active: bool = row.get(1)?;
    let is_group: bool = row.get(2)?;
    let name: String = row.get(3)?;
    let photo: String = row.get(4)?;
    let time_str: String = row.get(5)?;

    Ok(Discussion {
        id: DiscussionId(id),
        is_active,
        is_group,
        name,
        photo,
        time: from_sql_time(5, &time_str)?,
        participants: Vec::new(),
    })
}
