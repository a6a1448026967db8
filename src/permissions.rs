//! Pure, stateless permission resolution (C2).
//!
//! `effective` never touches the Store — callers assemble the member's role
//! set, the server's `@everyone` role, and the channel's overwrites, and this
//! module folds them into a single 64-bit mask per §4.2.

use bitflags::bitflags;
use uuid::Uuid;

use crate::models::{OverwriteTarget, PermissionOverwrite, Role, ServerMember};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Permissions: i64 {
        const VIEW_CHANNELS        = 1 << 0;
        const SEND_MESSAGES        = 1 << 1;
        const READ_MESSAGE_HISTORY = 1 << 2;
        const MANAGE_CHANNELS      = 1 << 3;
        const MANAGE_ROLES         = 1 << 4;
        const KICK_MEMBERS         = 1 << 5;
        const BAN_MEMBERS          = 1 << 6;
        const MUTE_MEMBERS         = 1 << 7;
        const MANAGE_MESSAGES      = 1 << 8;
        const MANAGE_SERVER        = 1 << 9;
        const ADMINISTRATOR        = 1 << 10;
    }
}

impl Permissions {
    pub fn from_bits_lossy_mask(bits: i64) -> Self {
        Self::from_bits_truncate(bits)
    }
}

/// Inputs the caller must assemble before calling [`effective`]. `member_roles`
/// must include the `@everyone` role; `overwrites` should be every overwrite
/// configured on the target channel (role and member alike).
pub struct PermissionContext<'a> {
    pub owner_id: Uuid,
    pub everyone_role: &'a Role,
    pub member_roles: &'a [Role],
    pub overwrites: &'a [PermissionOverwrite],
}

/// Compute the effective permission mask for `member` on a channel described
/// by `ctx`. Implements §4.2 steps 1–4 exactly.
pub fn effective(member: &ServerMember, ctx: &PermissionContext<'_>) -> Permissions {
    // 1. Owner bypasses everything.
    if member.user_id == ctx.owner_id {
        return Permissions::all();
    }

    // 2. Base mask: @everyone OR every held role. ADMINISTRATOR short-circuits.
    let mut base = Permissions::from_bits_lossy_mask(ctx.everyone_role.permissions);
    for role in ctx.member_roles {
        if member.role_ids.contains(&role.id) {
            base |= Permissions::from_bits_lossy_mask(role.permissions);
        }
    }
    if base.contains(Permissions::ADMINISTRATOR) {
        return Permissions::all();
    }

    // 3. Channel overwrites, strict order: @everyone, then role union, then member.
    let mut perms = base;

    if let Some(ow) = ctx
        .overwrites
        .iter()
        .find(|o| o.target_type == OverwriteTarget::Role && o.target_id == ctx.everyone_role.id)
    {
        perms &= !Permissions::from_bits_lossy_mask(ow.deny);
        perms |= Permissions::from_bits_lossy_mask(ow.allow);
    }

    let (role_deny, role_allow) = ctx
        .overwrites
        .iter()
        .filter(|o| {
            o.target_type == OverwriteTarget::Role
                && o.target_id != ctx.everyone_role.id
                && member.role_ids.contains(&o.target_id)
        })
        .fold((Permissions::empty(), Permissions::empty()), |(deny, allow), ow| {
            (
                deny | Permissions::from_bits_lossy_mask(ow.deny),
                allow | Permissions::from_bits_lossy_mask(ow.allow),
            )
        });
    perms &= !role_deny;
    perms |= role_allow;

    if let Some(ow) = ctx
        .overwrites
        .iter()
        .find(|o| o.target_type == OverwriteTarget::Member && o.target_id == member.user_id)
    {
        perms &= !Permissions::from_bits_lossy_mask(ow.deny);
        perms |= Permissions::from_bits_lossy_mask(ow.allow);
    }

    perms
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn everyone(server_id: Uuid, perms: i64) -> Role {
        Role {
            id: Uuid::nil(),
            server_id,
            name: "@everyone".into(),
            color: 0,
            permissions: perms,
            position: 0,
            is_hoisted: false,
            is_mentionable: false,
            is_default: true,
        }
    }

    fn member(user_id: Uuid, server_id: Uuid, role_ids: Vec<Uuid>) -> ServerMember {
        ServerMember {
            user_id,
            server_id,
            nickname: None,
            joined_at: Utc::now(),
            is_muted: false,
            is_deafened: false,
            role_ids,
            user: None,
        }
    }

    #[test]
    fn owner_has_every_bit() {
        let server_id = Uuid::new_v4();
        let owner_id = Uuid::new_v4();
        let everyone = everyone(server_id, 0);
        let m = member(owner_id, server_id, vec![]);
        let ctx = PermissionContext {
            owner_id,
            everyone_role: &everyone,
            member_roles: &[],
            overwrites: &[],
        };
        assert_eq!(effective(&m, &ctx), Permissions::all());
    }

    #[test]
    fn administrator_bypasses_overwrites() {
        let server_id = Uuid::new_v4();
        let owner_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let admin_role_id = Uuid::new_v4();
        let everyone = everyone(server_id, 0);
        let admin_role = Role {
            id: admin_role_id,
            server_id,
            name: "Admin".into(),
            color: 0,
            permissions: Permissions::ADMINISTRATOR.bits(),
            position: 1,
            is_hoisted: false,
            is_mentionable: true,
            is_default: false,
        };
        let m = member(user_id, server_id, vec![admin_role_id]);
        let deny_all = PermissionOverwrite {
            channel_id: Uuid::new_v4(),
            target_id: user_id,
            target_type: OverwriteTarget::Member,
            allow: 0,
            deny: Permissions::all().bits(),
        };
        let ctx = PermissionContext {
            owner_id,
            everyone_role: &everyone,
            member_roles: &[admin_role],
            overwrites: &[deny_all],
        };
        assert_eq!(effective(&m, &ctx), Permissions::all());
    }

    #[test]
    fn overwrite_precedence_everyone_then_role_then_member() {
        let server_id = Uuid::new_v4();
        let owner_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let channel_id = Uuid::new_v4();
        let role_id = Uuid::new_v4();

        let everyone = everyone(server_id, Permissions::VIEW_CHANNELS.bits());
        let role = Role {
            id: role_id,
            server_id,
            name: "Muted".into(),
            color: 0,
            permissions: 0,
            position: 1,
            is_hoisted: false,
            is_mentionable: false,
            is_default: false,
        };
        let m = member(user_id, server_id, vec![role_id]);

        // @everyone denies SEND_MESSAGES; role denies it too; member overwrite re-allows it.
        let overwrites = vec![
            PermissionOverwrite {
                channel_id,
                target_id: everyone.id,
                target_type: OverwriteTarget::Role,
                allow: 0,
                deny: Permissions::SEND_MESSAGES.bits(),
            },
            PermissionOverwrite {
                channel_id,
                target_id: role_id,
                target_type: OverwriteTarget::Role,
                allow: 0,
                deny: Permissions::SEND_MESSAGES.bits(),
            },
            PermissionOverwrite {
                channel_id,
                target_id: user_id,
                target_type: OverwriteTarget::Member,
                allow: Permissions::SEND_MESSAGES.bits(),
                deny: 0,
            },
        ];

        let ctx = PermissionContext {
            owner_id,
            everyone_role: &everyone,
            member_roles: &[role],
            overwrites: &overwrites,
        };
        let result = effective(&m, &ctx);
        assert!(result.contains(Permissions::SEND_MESSAGES));
        assert!(result.contains(Permissions::VIEW_CHANNELS));
    }

    #[test]
    fn no_overwrite_keeps_base_mask() {
        let server_id = Uuid::new_v4();
        let owner_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let everyone = everyone(server_id, Permissions::VIEW_CHANNELS.bits() | Permissions::SEND_MESSAGES.bits());
        let m = member(user_id, server_id, vec![]);
        let ctx = PermissionContext {
            owner_id,
            everyone_role: &everyone,
            member_roles: &[],
            overwrites: &[],
        };
        let result = effective(&m, &ctx);
        assert!(result.contains(Permissions::VIEW_CHANNELS));
        assert!(result.contains(Permissions::SEND_MESSAGES));
        assert!(!result.contains(Permissions::BAN_MEMBERS));
    }
}
