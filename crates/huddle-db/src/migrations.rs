use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            uuid         TEXT PRIMARY KEY,
            email        TEXT NOT NULL UNIQUE,
            password     TEXT NOT NULL,
            display_name TEXT NOT NULL,
            role         TEXT NOT NULL DEFAULT 'employee',
            branch       TEXT,
            team         TEXT,
            created_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS roles (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL UNIQUE,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS user_roles (
            user_uuid   TEXT NOT NULL REFERENCES users(uuid),
            role_id     TEXT NOT NULL REFERENCES roles(id),
            PRIMARY KEY (user_uuid, role_id)
        );

        CREATE TABLE IF NOT EXISTS channels (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            name           TEXT NOT NULL UNIQUE,
            icon_codepoint INTEGER,
            icon_color     TEXT,
            is_active      INTEGER NOT NULL DEFAULT 1,
            created_by     TEXT REFERENCES users(uuid),
            created_at     TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at     TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS channel_role_visibility (
            channel_id  INTEGER NOT NULL REFERENCES channels(id),
            role_id     TEXT NOT NULL REFERENCES roles(id),
            PRIMARY KEY (channel_id, role_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            channel_id  INTEGER NOT NULL REFERENCES channels(id),
            type        TEXT NOT NULL DEFAULT 'text',
            content     TEXT NOT NULL,
            sender_uuid TEXT NOT NULL,
            image_url   TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_channel
            ON messages(channel_id, created_at);

        CREATE TABLE IF NOT EXISTS message_reads (
            message_id  INTEGER NOT NULL REFERENCES messages(id),
            user_uuid   TEXT NOT NULL,
            read_at     TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (message_id, user_uuid)
        );

        CREATE TABLE IF NOT EXISTS webhook_subscriptions (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            channel_id   INTEGER NOT NULL REFERENCES channels(id),
            url          TEXT NOT NULL,
            secret_token TEXT NOT NULL,
            created_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_webhooks_channel
            ON webhook_subscriptions(channel_id);

        CREATE TABLE IF NOT EXISTS refresh_tokens (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            user_uuid     TEXT NOT NULL REFERENCES users(uuid),
            refresh_token TEXT NOT NULL,
            ip_address    TEXT,
            user_agent    TEXT,
            expires_at    TEXT NOT NULL,
            is_revoked    INTEGER NOT NULL DEFAULT 0,
            created_at    TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_refresh_tokens_token
            ON refresh_tokens(refresh_token);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
