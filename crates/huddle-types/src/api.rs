use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::MessageKind;
use crate::token::Role;

// -- Auth --

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub display_name: String,
    pub role: Option<Role>,
    pub branch: Option<String>,
    pub team: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub uuid: Uuid,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub branch: Option<String>,
    pub team: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPairResponse {
    pub user: UserResponse,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

// -- Channels --

#[derive(Debug, Deserialize)]
pub struct CreateChannelRequest {
    pub name: String,
    pub icon_codepoint: Option<i64>,
    pub icon_color: Option<String>,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelResponse {
    pub id: i64,
    pub name: String,
    pub icon_codepoint: Option<i64>,
    pub icon_color: Option<String>,
    pub is_active: bool,
    pub created_by: Option<Uuid>,
    pub created_at: String,
    pub updated_at: String,
}

/// Channel listing entry: the channel plus per-user unread state.
#[derive(Debug, Serialize)]
pub struct ChannelListItem {
    #[serde(flatten)]
    pub channel: ChannelResponse,
    pub last_message_content: Option<String>,
    pub last_message_at: Option<String>,
    pub unread_count: i64,
}

#[derive(Debug, Deserialize)]
pub struct RoleIdsRequest {
    pub role_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct RoleVisibilityEntry {
    pub id: Uuid,
    pub name: String,
    pub has_access: bool,
}

#[derive(Debug, Serialize)]
pub struct ChannelRolesResponse {
    pub channel_id: i64,
    pub role_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct UserRolesResponse {
    pub user_id: Uuid,
    pub role_ids: Vec<Uuid>,
}

// -- Roles --

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct RoleResponse {
    pub id: Uuid,
    pub name: String,
    pub created_at: String,
}

// -- Messages --

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub channel_id: i64,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: Option<MessageKind>,
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub message_ids: Option<Vec<i64>>,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub message_ids: Vec<i64>,
}

// -- Webhooks --

#[derive(Debug, Deserialize)]
pub struct CreateWebhookRequest {
    pub channel_id: i64,
    pub url: Option<String>,
    pub secret_token: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub id: i64,
    pub channel_id: i64,
    pub url: String,
    pub created_at: String,
}

/// Inbound webhook post body. The shared secret may arrive here or in the
/// `x-webhook-secret` header.
#[derive(Debug, Deserialize)]
pub struct WebhookIngestRequest {
    pub channel_id: i64,
    pub content: Option<String>,
    pub sender_uuid: Option<Uuid>,
    pub image_url: Option<String>,
    pub secret_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NotificationIngestRequest {
    pub channel_id: i64,
    pub title: Option<String>,
    pub content: Option<String>,
    pub sender_uuid: Option<Uuid>,
    pub secret_token: Option<String>,
}
