use agora_shared::models::Participant;
use agora_shared::types::{DiscussionId, UserId};
use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};

impl Database {
    pub fn list_participants(&self, discussion_id: DiscussionId) -> Result<Vec<Participant>> {
        let mut stmt = self.conn().prepare(
            "SELECT discussion_id, user_id, first_name, last_name, photo, unread_messages_cnt
             FROM participants
             WHERE discussion_id = ?1
             ORDER BY rowid",
        )?;

        let rows = stmt.query_map(params![discussion_id.0], row_to_participant)?;

        let mut participants = Vec::new();
        for row in rows {
            participants.push(row?);
        }
        Ok(participants)
    }

    #[cfg(test)]
    pub fn get_participant(&self, discussion_id: DiscussionId, user_id: &UserId) -> Result<Participant> {
        self.conn()
            .query_row(
                "SELECT discussion_id, user_id, first_name, last_name, photo, unread_messages_cnt
                 FROM participants
                 WHERE discussion_id = ?1 AND user_id = ?2",
                params![discussion_id.0, user_id.as_str()],
                row_to_participant,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::ParticipantNotFound {
                    discussion: discussion_id,
                    user: user_id.clone(),
                },
                other => StoreError::Sqlite(other),
            })
    }

    pub fn increment_unread(&self, discussion_id: DiscussionId, user_id: &UserId) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE participants SET unread_messages_cnt = unread_messages_cnt + 1
             WHERE discussion_id = ?1 AND user_id = ?2",
            params![discussion_id.0, user_id.as_str()],
        )?;
        not_found_if_zero(affected, discussion_id, user_id)
    }

    /// Decrement the unread counter, saturating at zero.
    pub fn decrement_unread(&self, discussion_id: DiscussionId, user_id: &UserId) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE participants SET unread_messages_cnt = MAX(unread_messages_cnt - 1, 0)
             WHERE discussion_id = ?1 AND user_id = ?2",
            params![discussion_id.0, user_id.as_str()],
        )?;
        not_found_if_zero(affected, discussion_id, user_id)
    }
}

fn not_found_if_zero(affected: usize, discussion: DiscussionId, user: &UserId) -> Result<()> {
    if affected == 0 {
        return Err(StoreError::ParticipantNotFound {
            discussion,
            user: user.clone(),
        });
    }
    Ok(())
}

fn row_to_participant(row: &rusqlite::Row<'_>) -> rusqlite::Result<Participant> {
    Ok(Participant {
        discussion_id: DiscussionId(row.get(0)?),
        user_id: UserId(row.get(1)?),
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        photo: row.get(4)?,
        unread_messages_cnt: row.get(5)?,
    })
}
