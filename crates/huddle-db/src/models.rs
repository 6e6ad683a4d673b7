/// Database row types — these map directly to SQLite rows.
/// Distinct from huddle-types API models to keep the DB layer independent.

pub struct UserRow {
    pub uuid: String,
    pub email: String,
    pub password: String,
    pub display_name: String,
    pub role: String,
    pub branch: Option<String>,
    pub team: Option<String>,
    pub created_at: String,
}

pub struct RoleRow {
    pub id: String,
    pub name: String,
    pub created_at: String,
}

#[derive(Debug)]
pub struct ChannelRow {
    pub id: i64,
    pub name: String,
    pub icon_codepoint: Option<i64>,
    pub icon_color: Option<String>,
    pub is_active: bool,
    pub created_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub struct MessageRow {
    pub id: i64,
    pub channel_id: i64,
    pub kind: String,
    pub content: String,
    pub image_url: Option<String>,
    pub sender_uuid: String,
    /// Display name joined from users; None when the sender is not a
    /// registered user (e.g. a configured webhook sender).
    pub sender_name: Option<String>,
    pub created_at: String,
}

pub struct WebhookRow {
    pub id: i64,
    pub channel_id: i64,
    pub url: String,
    pub secret_token: String,
    pub created_at: String,
}

pub struct RefreshTokenRow {
    pub id: i64,
    pub user_uuid: String,
    pub refresh_token: String,
    pub expires_at: String,
    pub is_revoked: bool,
}

/// Fields for a message insert. `mark_read_by_sender` adds the sender's own
/// read receipt in the same transaction.
pub struct NewMessage<'a> {
    pub channel_id: i64,
    pub kind: &'a str,
    pub content: &'a str,
    pub sender_uuid: &'a str,
    pub image_url: Option<&'a str>,
    pub mark_read_by_sender: bool,
}
