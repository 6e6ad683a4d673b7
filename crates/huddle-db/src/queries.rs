use anyhow::{Result, anyhow};
use rusqlite::{Connection, OptionalExtension, params};

use crate::Database;
use crate::models::{
    ChannelRow, MessageRow, NewMessage, RefreshTokenRow, RoleRow, UserRow, WebhookRow,
};

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        uuid: &str,
        email: &str,
        password_hash: &str,
        display_name: &str,
        role: &str,
        branch: Option<&str>,
        team: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (uuid, email, password, display_name, role, branch, team)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![uuid, email, password_hash, display_name, role, branch, team],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("{} WHERE email = ?1", SELECT_USER),
                [email],
                map_user,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    pub fn get_user_by_uuid(&self, uuid: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(&format!("{} WHERE uuid = ?1", SELECT_USER), [uuid], map_user)
                .optional()
                .map_err(Into::into)
        })
    }

    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("{} ORDER BY created_at DESC", SELECT_USER))?;
            let rows = stmt
                .query_map([], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Roles --

    pub fn create_role(&self, id: &str, name: &str) -> Result<RoleRow> {
        self.with_conn(|conn| {
            conn.execute("INSERT INTO roles (id, name) VALUES (?1, ?2)", params![id, name])?;
            conn.query_row(
                "SELECT id, name, created_at FROM roles WHERE id = ?1",
                [id],
                map_role,
            )
            .map_err(Into::into)
        })
    }

    pub fn get_role_by_name(&self, name: &str) -> Result<Option<RoleRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, created_at FROM roles WHERE name = ?1",
                [name],
                map_role,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    pub fn list_roles(&self) -> Result<Vec<RoleRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, name, created_at FROM roles ORDER BY created_at DESC")?;
            let rows = stmt
                .query_map([], map_role)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Of the given role ids, return the ones that actually exist.
    pub fn existing_role_ids(&self, role_ids: &[String]) -> Result<Vec<String>> {
        if role_ids.is_empty() {
            return Ok(vec![]);
        }
        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=role_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id FROM roles WHERE id IN ({})",
                placeholders.join(", ")
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(role_ids.iter()), |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(rows)
        })
    }

    pub fn user_role_ids(&self, user_uuid: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT role_id FROM user_roles WHERE user_uuid = ?1")?;
            let rows = stmt
                .query_map([user_uuid], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(rows)
        })
    }

    pub fn user_roles(&self, user_uuid: &str) -> Result<Vec<RoleRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id, r.name, r.created_at FROM user_roles ur
                 JOIN roles r ON ur.role_id = r.id
                 WHERE ur.user_uuid = ?1",
            )?;
            let rows = stmt
                .query_map([user_uuid], map_role)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Replace a user's role assignments in one transaction.
    pub fn replace_user_roles(&self, user_uuid: &str, role_ids: &[String]) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM user_roles WHERE user_uuid = ?1", [user_uuid])?;
            for role_id in role_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO user_roles (user_uuid, role_id) VALUES (?1, ?2)",
                    params![user_uuid, role_id],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    // -- Channels --

    pub fn create_channel(
        &self,
        name: &str,
        icon_codepoint: Option<i64>,
        icon_color: Option<&str>,
        created_by: Option<&str>,
    ) -> Result<ChannelRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO channels (name, icon_codepoint, icon_color, created_by)
                 VALUES (?1, ?2, ?3, ?4)",
                params![name, icon_codepoint, icon_color, created_by],
            )?;
            let id = conn.last_insert_rowid();
            query_channel(conn, id)?.ok_or_else(|| anyhow!("channel {} vanished after insert", id))
        })
    }

    pub fn find_channel(&self, id: i64) -> Result<Option<ChannelRow>> {
        self.with_conn(|conn| query_channel(conn, id))
    }

    pub fn channel_name_taken(&self, name: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let existing: Option<i64> = conn
                .query_row("SELECT id FROM channels WHERE name = ?1", [name], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(existing.is_some())
        })
    }

    pub fn list_active_channels(&self) -> Result<Vec<ChannelRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE is_active = 1 ORDER BY created_at DESC",
                SELECT_CHANNEL
            ))?;
            let rows = stmt
                .query_map([], map_channel)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Active channels the user owns or that any of their roles can see.
    pub fn list_channels_visible_to(
        &self,
        user_uuid: &str,
        role_ids: &[String],
    ) -> Result<Vec<ChannelRow>> {
        self.with_conn(|conn| {
            if role_ids.is_empty() {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE is_active = 1 AND created_by = ?1 ORDER BY created_at DESC",
                    SELECT_CHANNEL
                ))?;
                let rows = stmt
                    .query_map([user_uuid], map_channel)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                return Ok(rows);
            }

            let placeholders: Vec<String> =
                (2..=role_ids.len() + 1).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "{} WHERE is_active = 1 AND (created_by = ?1 OR id IN (
                    SELECT channel_id FROM channel_role_visibility WHERE role_id IN ({})
                 )) ORDER BY created_at DESC",
                SELECT_CHANNEL,
                placeholders.join(", ")
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut bind: Vec<&dyn rusqlite::types::ToSql> = vec![&user_uuid];
            bind.extend(role_ids.iter().map(|r| r as &dyn rusqlite::types::ToSql));
            let rows = stmt
                .query_map(bind.as_slice(), map_channel)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn deactivate_channel(&self, id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE channels SET is_active = 0, updated_at = datetime('now') WHERE id = ?1",
                [id],
            )?;
            Ok(())
        })
    }

    pub fn last_message_in(&self, channel_id: i64) -> Result<Option<(String, String)>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT content, created_at FROM messages
                 WHERE channel_id = ?1 ORDER BY created_at DESC, id DESC LIMIT 1",
                [channel_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(Into::into)
        })
    }

    /// Messages in a channel neither sent nor read by the user.
    pub fn unread_count(&self, channel_id: i64, user_uuid: &str) -> Result<i64> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM messages m
                 WHERE m.channel_id = ?1 AND m.sender_uuid != ?2
                   AND NOT EXISTS (
                     SELECT 1 FROM message_reads r
                     WHERE r.message_id = m.id AND r.user_uuid = ?2
                   )",
                params![channel_id, user_uuid],
                |row| row.get(0),
            )
            .map_err(Into::into)
        })
    }

    // -- Role visibility --

    pub fn visibility_role_ids(&self, channel_id: i64) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT role_id FROM channel_role_visibility WHERE channel_id = ?1")?;
            let rows = stmt
                .query_map([channel_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(rows)
        })
    }

    /// How many of the user's role ids appear in the channel's visibility set.
    pub fn count_visibility_matches(&self, channel_id: i64, role_ids: &[String]) -> Result<i64> {
        if role_ids.is_empty() {
            return Ok(0);
        }
        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (2..=role_ids.len() + 1).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT COUNT(*) FROM channel_role_visibility
                 WHERE channel_id = ?1 AND role_id IN ({})",
                placeholders.join(", ")
            );
            let mut bind: Vec<&dyn rusqlite::types::ToSql> = vec![&channel_id];
            bind.extend(role_ids.iter().map(|r| r as &dyn rusqlite::types::ToSql));
            conn.query_row(&sql, bind.as_slice(), |row| row.get(0))
                .map_err(Into::into)
        })
    }

    /// Replace a channel's visibility set in one transaction.
    pub fn replace_channel_visibility(&self, channel_id: i64, role_ids: &[String]) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM channel_role_visibility WHERE channel_id = ?1",
                [channel_id],
            )?;
            for role_id in role_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO channel_role_visibility (channel_id, role_id)
                     VALUES (?1, ?2)",
                    params![channel_id, role_id],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    // -- Messages --

    /// Insert a message; the sender's own read receipt lands in the same
    /// transaction when requested. Returns the new message id.
    pub fn create_message(&self, message: &NewMessage<'_>) -> Result<i64> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (channel_id, type, content, sender_uuid, image_url)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    message.channel_id,
                    message.kind,
                    message.content,
                    message.sender_uuid,
                    message.image_url
                ],
            )?;
            let id = tx.last_insert_rowid();
            if message.mark_read_by_sender {
                tx.execute(
                    "INSERT OR IGNORE INTO message_reads (message_id, user_uuid) VALUES (?1, ?2)",
                    params![id, message.sender_uuid],
                )?;
            }
            tx.commit()?;
            Ok(id)
        })
    }

    pub fn fetch_message(&self, id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("{} WHERE m.id = ?1", SELECT_MESSAGE),
                [id],
                map_message,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    /// All messages for a channel in stable chronological order, ties broken
    /// by id ascending.
    pub fn messages_for_channel(&self, channel_id: i64) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE m.channel_id = ?1 ORDER BY m.created_at ASC, m.id ASC",
                SELECT_MESSAGE
            ))?;
            let rows = stmt
                .query_map([channel_id], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Batch-fetch (message_id, reader_uuid) pairs for a set of message ids.
    pub fn readers_for_messages(&self, message_ids: &[i64]) -> Result<Vec<(i64, String)>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }
        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT message_id, user_uuid FROM message_reads WHERE message_id IN ({})",
                placeholders.join(", ")
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(message_ids.iter()), |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Ids of messages in the channel the user has neither sent nor read,
    /// optionally restricted to an explicit id set.
    pub fn unread_message_ids(
        &self,
        channel_id: i64,
        user_uuid: &str,
        only: Option<&[i64]>,
    ) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT m.id FROM messages m
                 WHERE m.channel_id = ?1 AND m.sender_uuid != ?2
                   AND NOT EXISTS (
                     SELECT 1 FROM message_reads r
                     WHERE r.message_id = m.id AND r.user_uuid = ?2
                   )",
            );
            let mut bind: Vec<&dyn rusqlite::types::ToSql> = vec![&channel_id, &user_uuid];
            if let Some(ids) = only {
                if ids.is_empty() {
                    return Ok(vec![]);
                }
                let placeholders: Vec<String> =
                    (3..=ids.len() + 2).map(|i| format!("?{}", i)).collect();
                sql.push_str(&format!(" AND m.id IN ({})", placeholders.join(", ")));
                bind.extend(ids.iter().map(|id| id as &dyn rusqlite::types::ToSql));
            }
            sql.push_str(" ORDER BY m.id ASC");

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(bind.as_slice(), |row| row.get(0))?
                .collect::<std::result::Result<Vec<i64>, _>>()?;
            Ok(rows)
        })
    }

    /// Bulk-insert read receipts. Duplicates are ignored, so retrying is a
    /// no-op. Returns how many rows were actually inserted.
    pub fn mark_messages_read(&self, message_ids: &[i64], user_uuid: &str) -> Result<usize> {
        if message_ids.is_empty() {
            return Ok(0);
        }
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut inserted = 0;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO message_reads (message_id, user_uuid) VALUES (?1, ?2)",
                )?;
                for id in message_ids {
                    inserted += stmt.execute(params![id, user_uuid])?;
                }
            }
            tx.commit()?;
            Ok(inserted)
        })
    }

    // -- Webhooks --

    pub fn create_webhook(&self, channel_id: i64, url: &str, secret_token: &str) -> Result<WebhookRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO webhook_subscriptions (channel_id, url, secret_token)
                 VALUES (?1, ?2, ?3)",
                params![channel_id, url, secret_token],
            )?;
            let id = conn.last_insert_rowid();
            conn.query_row(
                &format!("{} WHERE id = ?1", SELECT_WEBHOOK),
                [id],
                map_webhook,
            )
            .map_err(Into::into)
        })
    }

    pub fn list_webhooks(&self, channel_id: i64) -> Result<Vec<WebhookRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE channel_id = ?1 ORDER BY created_at DESC",
                SELECT_WEBHOOK
            ))?;
            let rows = stmt
                .query_map([channel_id], map_webhook)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Look up the subscription authenticating an inbound webhook post.
    pub fn find_webhook(&self, channel_id: i64, secret_token: &str) -> Result<Option<WebhookRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "{} WHERE channel_id = ?1 AND secret_token = ?2",
                    SELECT_WEBHOOK
                ),
                params![channel_id, secret_token],
                map_webhook,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    /// (url, secret) pairs for outbound dispatch.
    pub fn webhook_endpoints(&self, channel_id: i64) -> Result<Vec<(String, String)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT url, secret_token FROM webhook_subscriptions WHERE channel_id = ?1",
            )?;
            let rows = stmt
                .query_map([channel_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Refresh tokens --

    pub fn store_refresh_token(
        &self,
        user_uuid: &str,
        refresh_token: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
        expires_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO refresh_tokens (user_uuid, refresh_token, ip_address, user_agent, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![user_uuid, refresh_token, ip_address, user_agent, expires_at],
            )?;
            Ok(())
        })
    }

    pub fn find_active_refresh_token(&self, refresh_token: &str) -> Result<Option<RefreshTokenRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, user_uuid, refresh_token, expires_at, is_revoked
                 FROM refresh_tokens WHERE refresh_token = ?1 AND is_revoked = 0",
                [refresh_token],
                |row| {
                    Ok(RefreshTokenRow {
                        id: row.get(0)?,
                        user_uuid: row.get(1)?,
                        refresh_token: row.get(2)?,
                        expires_at: row.get(3)?,
                        is_revoked: row.get::<_, i64>(4)? != 0,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
        })
    }

    pub fn revoke_refresh_token(&self, refresh_token: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE refresh_tokens SET is_revoked = 1 WHERE refresh_token = ?1",
                [refresh_token],
            )?;
            Ok(())
        })
    }

    /// Revoke the old refresh token and store its replacement atomically.
    pub fn rotate_refresh_token(
        &self,
        old_token: &str,
        user_uuid: &str,
        new_token: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
        expires_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE refresh_tokens SET is_revoked = 1 WHERE refresh_token = ?1",
                [old_token],
            )?;
            tx.execute(
                "INSERT INTO refresh_tokens (user_uuid, refresh_token, ip_address, user_agent, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![user_uuid, new_token, ip_address, user_agent, expires_at],
            )?;
            tx.commit()?;
            Ok(())
        })
    }
}

const SELECT_USER: &str =
    "SELECT uuid, email, password, display_name, role, branch, team, created_at FROM users";

const SELECT_CHANNEL: &str =
    "SELECT id, name, icon_codepoint, icon_color, is_active, created_by, created_at, updated_at
     FROM channels";

// JOIN users to fetch the sender's display name in one query.
const SELECT_MESSAGE: &str =
    "SELECT m.id, m.channel_id, m.type, m.content, m.image_url, m.sender_uuid,
            u.display_name, m.created_at
     FROM messages m
     LEFT JOIN users u ON m.sender_uuid = u.uuid";

const SELECT_WEBHOOK: &str =
    "SELECT id, channel_id, url, secret_token, created_at FROM webhook_subscriptions";

fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        uuid: row.get(0)?,
        email: row.get(1)?,
        password: row.get(2)?,
        display_name: row.get(3)?,
        role: row.get(4)?,
        branch: row.get(5)?,
        team: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn map_role(row: &rusqlite::Row<'_>) -> rusqlite::Result<RoleRow> {
    Ok(RoleRow {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
    })
}

fn map_channel(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChannelRow> {
    Ok(ChannelRow {
        id: row.get(0)?,
        name: row.get(1)?,
        icon_codepoint: row.get(2)?,
        icon_color: row.get(3)?,
        is_active: row.get::<_, i64>(4)? != 0,
        created_by: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn map_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        kind: row.get(2)?,
        content: row.get(3)?,
        image_url: row.get(4)?,
        sender_uuid: row.get(5)?,
        sender_name: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn map_webhook(row: &rusqlite::Row<'_>) -> rusqlite::Result<WebhookRow> {
    Ok(WebhookRow {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        url: row.get(2)?,
        secret_token: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn query_channel(conn: &Connection, id: i64) -> Result<Option<ChannelRow>> {
    conn.query_row(&format!("{} WHERE id = ?1", SELECT_CHANNEL), [id], map_channel)
        .optional()
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn add_user(db: &Database, uuid: &str) {
        db.create_user(
            uuid,
            &format!("{}@example.com", uuid),
            "hash",
            uuid,
            "employee",
            None,
            None,
        )
        .unwrap();
    }

    fn post(db: &Database, channel_id: i64, sender: &str, content: &str) -> i64 {
        db.create_message(&NewMessage {
            channel_id,
            kind: "text",
            content,
            sender_uuid: sender,
            image_url: None,
            mark_read_by_sender: true,
        })
        .unwrap()
    }

    #[test]
    fn messages_come_back_in_insertion_order() {
        let db = db();
        add_user(&db, "alice");
        let channel = db.create_channel("general", None, None, Some("alice")).unwrap();

        // Same-second timestamps; the id tiebreaker keeps order stable.
        let m1 = post(&db, channel.id, "alice", "first");
        let m2 = post(&db, channel.id, "alice", "second");
        let m3 = post(&db, channel.id, "alice", "third");

        let ids: Vec<i64> = db
            .messages_for_channel(channel.id)
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![m1, m2, m3]);
    }

    #[test]
    fn mark_read_is_idempotent() {
        let db = db();
        add_user(&db, "alice");
        add_user(&db, "bob");
        let channel = db.create_channel("general", None, None, Some("alice")).unwrap();
        let m1 = post(&db, channel.id, "alice", "hi");
        let m2 = post(&db, channel.id, "alice", "there");

        let unread = db.unread_message_ids(channel.id, "bob", None).unwrap();
        assert_eq!(unread, vec![m1, m2]);

        assert_eq!(db.mark_messages_read(&unread, "bob").unwrap(), 2);
        // Second pass inserts nothing and does not error.
        assert_eq!(db.mark_messages_read(&unread, "bob").unwrap(), 0);

        assert!(db.unread_message_ids(channel.id, "bob", None).unwrap().is_empty());

        let readers = db.readers_for_messages(&[m1, m2]).unwrap();
        assert_eq!(readers.iter().filter(|(_, u)| u == "bob").count(), 2);
    }

    #[test]
    fn unread_excludes_own_messages() {
        let db = db();
        add_user(&db, "alice");
        add_user(&db, "bob");
        let channel = db.create_channel("general", None, None, Some("alice")).unwrap();
        post(&db, channel.id, "bob", "mine");
        let theirs = post(&db, channel.id, "alice", "yours");

        assert_eq!(db.unread_message_ids(channel.id, "bob", None).unwrap(), vec![theirs]);
        assert_eq!(db.unread_count(channel.id, "bob").unwrap(), 1);
    }

    #[test]
    fn unread_filter_restricts_id_set() {
        let db = db();
        add_user(&db, "alice");
        add_user(&db, "bob");
        let channel = db.create_channel("general", None, None, Some("alice")).unwrap();
        let m1 = post(&db, channel.id, "alice", "one");
        let _m2 = post(&db, channel.id, "alice", "two");

        assert_eq!(
            db.unread_message_ids(channel.id, "bob", Some(&[m1])).unwrap(),
            vec![m1]
        );
        assert!(db.unread_message_ids(channel.id, "bob", Some(&[])).unwrap().is_empty());
    }

    #[test]
    fn visibility_matches_count_role_overlap() {
        let db = db();
        add_user(&db, "alice");
        let channel = db.create_channel("ops", None, None, Some("alice")).unwrap();
        let support = db.create_role("role-support", "support").unwrap();
        db.create_role("role-sales", "sales").unwrap();

        let roles = vec![support.id.clone()];
        assert_eq!(db.count_visibility_matches(channel.id, &roles).unwrap(), 0);

        db.replace_channel_visibility(channel.id, &roles).unwrap();
        assert_eq!(db.count_visibility_matches(channel.id, &roles).unwrap(), 1);

        // Replace-all semantics: a new set drops the old one.
        db.replace_channel_visibility(channel.id, &["role-sales".to_string()]).unwrap();
        assert_eq!(db.count_visibility_matches(channel.id, &roles).unwrap(), 0);
    }

    #[test]
    fn visible_channel_listing_honors_ownership_and_roles() {
        let db = db();
        add_user(&db, "alice");
        add_user(&db, "bob");
        let owned = db.create_channel("owned", None, None, Some("bob")).unwrap();
        let visible = db.create_channel("visible", None, None, Some("alice")).unwrap();
        let hidden = db.create_channel("hidden", None, None, Some("alice")).unwrap();
        db.create_role("role-eng", "engineering").unwrap();
        db.replace_channel_visibility(visible.id, &["role-eng".to_string()]).unwrap();

        let listed = db
            .list_channels_visible_to("bob", &["role-eng".to_string()])
            .unwrap();
        let ids: Vec<i64> = listed.iter().map(|c| c.id).collect();
        assert!(ids.contains(&owned.id));
        assert!(ids.contains(&visible.id));
        assert!(!ids.contains(&hidden.id));
    }

    #[test]
    fn webhook_lookup_requires_matching_secret() {
        let db = db();
        add_user(&db, "alice");
        let channel = db.create_channel("alerts", None, None, Some("alice")).unwrap();
        db.create_webhook(channel.id, "internal", "s3cret").unwrap();

        assert!(db.find_webhook(channel.id, "s3cret").unwrap().is_some());
        assert!(db.find_webhook(channel.id, "wrong").unwrap().is_none());
        assert!(db.find_webhook(channel.id + 1, "s3cret").unwrap().is_none());
    }

    #[test]
    fn refresh_token_rotation_revokes_old() {
        let db = db();
        add_user(&db, "alice");
        db.store_refresh_token("alice", "old-token", None, Some("test-agent"), "2099-01-01T00:00:00Z")
            .unwrap();

        assert!(db.find_active_refresh_token("old-token").unwrap().is_some());

        db.rotate_refresh_token("old-token", "alice", "new-token", None, None, "2099-01-01T00:00:00Z")
            .unwrap();

        assert!(db.find_active_refresh_token("old-token").unwrap().is_none());
        assert!(db.find_active_refresh_token("new-token").unwrap().is_some());
    }
}
