use huddle_db::Database;
use huddle_db::models::ChannelRow;
use huddle_types::token::{Identity, Role};

use crate::error::ApiError;

pub const NO_CHANNEL_ACCESS: &str = "no access to this channel";
pub const NOT_CHANNEL_MANAGER: &str = "only the channel owner or an admin can manage this channel";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Granted,
    Denied(&'static str),
}

impl Access {
    pub fn allowed(&self) -> bool {
        matches!(self, Access::Granted)
    }
}

fn is_owner(identity: &Identity, channel: &ChannelRow) -> bool {
    channel
        .created_by
        .as_deref()
        .is_some_and(|owner| owner == identity.id.to_string())
}

/// The access predicate shared by every message-bearing operation: fetching,
/// posting, and marking read all call through here. Rules, in order: admins
/// see everything; owners see their own channels; everyone else needs at
/// least one of their role ids in the channel's visibility set.
pub fn can_access_channel(
    identity: &Identity,
    channel: &ChannelRow,
    user_role_ids: &[String],
    visibility_matches: i64,
) -> Access {
    if identity.role == Role::Admin {
        return Access::Granted;
    }
    if is_owner(identity, channel) {
        return Access::Granted;
    }
    if !user_role_ids.is_empty() && visibility_matches > 0 {
        Access::Granted
    } else {
        Access::Denied(NO_CHANNEL_ACCESS)
    }
}

/// Administrative companion: managing a channel's visibility set or its
/// webhooks takes ownership or the admin role, never mere visibility.
pub fn can_administer(identity: &Identity, channel: &ChannelRow) -> Access {
    if identity.role == Role::Admin || is_owner(identity, channel) {
        Access::Granted
    } else {
        Access::Denied(NOT_CHANNEL_MANAGER)
    }
}

/// Resolve the channel and evaluate the access predicate, fetching role data
/// only when the cheap owner/admin grants don't apply.
pub fn ensure_channel_access(
    db: &Database,
    identity: &Identity,
    channel_id: i64,
) -> Result<ChannelRow, ApiError> {
    let channel = db
        .find_channel(channel_id)?
        .ok_or_else(|| ApiError::NotFound("channel not found".into()))?;

    // Owner and admin grants need no role lookup.
    if can_access_channel(identity, &channel, &[], 0).allowed() {
        return Ok(channel);
    }

    let role_ids = db.user_role_ids(&identity.id.to_string())?;
    let matches = db.count_visibility_matches(channel_id, &role_ids)?;
    match can_access_channel(identity, &channel, &role_ids, matches) {
        Access::Granted => Ok(channel),
        Access::Denied(reason) => Err(ApiError::AccessDenied(reason.into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn identity(role: Role) -> Identity {
        Identity {
            id: Uuid::new_v4(),
            role,
            email: "dev@example.com".into(),
        }
    }

    fn channel_owned_by(owner: Option<&Identity>) -> ChannelRow {
        ChannelRow {
            id: 7,
            name: "general".into(),
            icon_codepoint: None,
            icon_color: None,
            is_active: true,
            created_by: owner.map(|o| o.id.to_string()),
            created_at: "2024-01-01 00:00:00".into(),
            updated_at: "2024-01-01 00:00:00".into(),
        }
    }

    #[test]
    fn admin_is_always_granted() {
        let admin = identity(Role::Admin);
        let channel = channel_owned_by(None);
        // Even with no roles and an empty visibility set.
        assert!(can_access_channel(&admin, &channel, &[], 0).allowed());
    }

    #[test]
    fn owner_is_always_granted() {
        let owner = identity(Role::Employee);
        let channel = channel_owned_by(Some(&owner));
        assert!(can_access_channel(&owner, &channel, &[], 0).allowed());
    }

    #[test]
    fn member_needs_a_visibility_match() {
        let member = identity(Role::Employee);
        let channel = channel_owned_by(None);
        let roles = vec!["role-eng".to_string()];

        assert_eq!(
            can_access_channel(&member, &channel, &roles, 0),
            Access::Denied(NO_CHANNEL_ACCESS)
        );
        assert!(can_access_channel(&member, &channel, &roles, 1).allowed());
    }

    #[test]
    fn member_without_roles_is_denied() {
        let member = identity(Role::Employee);
        let channel = channel_owned_by(None);
        assert_eq!(
            can_access_channel(&member, &channel, &[], 0),
            Access::Denied(NO_CHANNEL_ACCESS)
        );
    }

    #[test]
    fn granting_a_matching_role_never_revokes_access() {
        let member = identity(Role::Employee);
        let owner = identity(Role::Employee);
        let admin = identity(Role::Admin);
        let channel = channel_owned_by(Some(&owner));

        let mut roles: Vec<String> = vec![];
        let mut matches = 0;
        let mut previously_granted = [
            can_access_channel(&member, &channel, &roles, matches).allowed(),
            can_access_channel(&owner, &channel, &roles, matches).allowed(),
            can_access_channel(&admin, &channel, &roles, matches).allowed(),
        ];

        // Each round adds one role that matches the visibility set; access
        // only ever moves from denied to granted.
        for i in 0..4 {
            roles.push(format!("role-{}", i));
            matches += 1;
            let now_granted = [
                can_access_channel(&member, &channel, &roles, matches).allowed(),
                can_access_channel(&owner, &channel, &roles, matches).allowed(),
                can_access_channel(&admin, &channel, &roles, matches).allowed(),
            ];
            for (before, after) in previously_granted.iter().zip(now_granted.iter()) {
                assert!(*after >= *before);
            }
            previously_granted = now_granted;
        }
    }

    #[test]
    fn administer_requires_ownership_or_admin() {
        let owner = identity(Role::Employee);
        let member = identity(Role::Employee);
        let admin = identity(Role::Admin);
        let channel = channel_owned_by(Some(&owner));

        assert!(can_administer(&owner, &channel).allowed());
        assert!(can_administer(&admin, &channel).allowed());
        assert_eq!(
            can_administer(&member, &channel),
            Access::Denied(NOT_CHANNEL_MANAGER)
        );
    }

    #[test]
    fn ensure_channel_access_walks_the_lookup_chain() {
        let db = Database::open_in_memory().unwrap();
        let owner = identity(Role::Employee);
        let member = identity(Role::Employee);

        db.create_user(&owner.id.to_string(), "owner@example.com", "hash", "Owner", "employee", None, None)
            .unwrap();
        db.create_user(&member.id.to_string(), "member@example.com", "hash", "Member", "employee", None, None)
            .unwrap();
        let channel = db
            .create_channel("ops", None, None, Some(&owner.id.to_string()))
            .unwrap();

        // Owner passes without any visibility configured.
        assert!(ensure_channel_access(&db, &owner, channel.id).is_ok());

        // Member is denied with the canonical reason...
        let err = ensure_channel_access(&db, &member, channel.id).unwrap_err();
        assert!(matches!(err, ApiError::AccessDenied(ref reason) if reason.as_str() == NO_CHANNEL_ACCESS));

        // ...until one of their roles lands in the visibility set.
        db.create_role("role-ops", "ops-crew").unwrap();
        db.replace_user_roles(&member.id.to_string(), &["role-ops".to_string()]).unwrap();
        db.replace_channel_visibility(channel.id, &["role-ops".to_string()]).unwrap();
        assert!(ensure_channel_access(&db, &member, channel.id).is_ok());

        // Unknown channel is a 404-class failure, not a policy denial.
        let err = ensure_channel_access(&db, &member, channel.id + 100).unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
