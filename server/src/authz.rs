use lazy_static::lazy_static;
use std::collections::{HashMap, HashSet};

use crate::errors::Error;
use crate::metrics::AUTHZ_DENIED_TOTAL;
use crate::model::{Actor, Device, DeviceStatus, Preset, PresetVisibility, Role};

/// Entity kinds covered by the role policy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Device,
    Preset,
}

/// Operations a role can hold on a resource. `Edit` and `Delete` are scoped
/// to the caller's own entities; the `*Others` variants lift that scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Create,
    Edit,
    Delete,
    EditOthers,
    DeleteOthers,
}

lazy_static! {
    /// Role policy table, fixed at process start and never mutated.
    static ref POLICY: HashMap<Role, HashSet<(Resource, Capability)>> = {
        use Capability::*;
        use Resource::*;

        let member: HashSet<(Resource, Capability)> = [
            (Device, Create),
            (Device, Edit),
            (Device, Delete),
            (Preset, Create),
            (Preset, Edit),
            (Preset, Delete),
        ]
        .into_iter()
        .collect();

        let mut admin = member.clone();
        admin.extend([
            (Device, EditOthers),
            (Device, DeleteOthers),
            (Preset, EditOthers),
            (Preset, DeleteOthers),
        ]);

        let mut table = HashMap::new();
        table.insert(Role::Member, member);
        table.insert(Role::Admin, admin);
        table
    };
}

pub fn role_has(role: Role, resource: Resource, capability: Capability) -> bool {
    POLICY
        .get(&role)
        .is_some_and(|caps| caps.contains(&(resource, capability)))
}

/// Turns a denial into the wire error: anonymous callers get 401,
/// authenticated ones 403. Counts every denial.
pub fn denial(actor: Option<&Actor>, action: &str) -> Error {
    match actor {
        None => unauthenticated(),
        Some(_) => {
            AUTHZ_DENIED_TOTAL.inc();
            Error::Forbidden(format!("you are not allowed to {action}"))
        }
    }
}

/// Denial for requests that carry no identity at all.
pub fn unauthenticated() -> Error {
    AUTHZ_DENIED_TOTAL.inc();
    Error::Unauthenticated
}

/// Allow-list membership. An empty email never matches: identities without
/// an email cannot be granted entry through an allow list.
pub fn email_allowed(email: &str, allowed_users: &[String]) -> bool {
    !email.is_empty() && allowed_users.iter().any(|e| e == email)
}

/// How much of a device a caller may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAccess {
    /// Full body, credentials included.
    Owner,
    /// Full body minus credentials.
    Allowed,
    /// Client id only.
    Redacted,
    Deny,
}

/// Single-device read decision, rules evaluated in order: deleted devices are
/// invisible; anonymous callers get the redacted view of published devices;
/// then owner, then allow-list membership. Authenticated callers matching
/// neither are denied.
pub fn device_read(actor: Option<&Actor>, device: &Device) -> DeviceAccess {
    if device.status == DeviceStatus::Deleted {
        return DeviceAccess::Deny;
    }

    let actor = match actor {
        None => {
            return if device.status == DeviceStatus::Published {
                DeviceAccess::Redacted
            } else {
                DeviceAccess::Deny
            };
        }
        Some(actor) => actor,
    };

    if device.owner == actor.user_id {
        return DeviceAccess::Owner;
    }
    if email_allowed(&actor.email, &device.allowed_users) {
        return DeviceAccess::Allowed;
    }
    DeviceAccess::Deny
}

/// State pushes require allow-list membership, nothing else. Ownership alone
/// is insufficient and roles are not consulted; this mirrors the upstream
/// permission check exactly.
pub fn can_push_state(actor: Option<&Actor>, device: &Device) -> bool {
    if device.status == DeviceStatus::Deleted {
        return false;
    }
    match actor {
        Some(actor) => email_allowed(&actor.email, &device.allowed_users),
        None => false,
    }
}

pub fn can_create(actor: &Actor, resource: Resource) -> bool {
    role_has(actor.role, resource, Capability::Create)
}

pub fn can_edit_device(actor: &Actor, device: &Device) -> bool {
    if device.owner == actor.user_id {
        role_has(actor.role, Resource::Device, Capability::Edit)
    } else {
        role_has(actor.role, Resource::Device, Capability::EditOthers)
    }
}

pub fn can_delete_device(actor: &Actor, device: &Device) -> bool {
    if device.owner == actor.user_id {
        role_has(actor.role, Resource::Device, Capability::Delete)
    } else {
        role_has(actor.role, Resource::Device, Capability::DeleteOthers)
    }
}

pub fn can_read_preset(actor: Option<&Actor>, preset: &Preset) -> bool {
    match preset.visibility {
        PresetVisibility::Public => true,
        PresetVisibility::Private => {
            actor.is_some_and(|actor| actor.user_id == preset.owner)
        }
        PresetVisibility::Deleted => false,
    }
}

pub fn can_edit_preset(actor: &Actor, preset: &Preset) -> bool {
    if preset.owner == actor.user_id {
        role_has(actor.role, Resource::Preset, Capability::Edit)
    } else {
        role_has(actor.role, Resource::Preset, Capability::EditOthers)
    }
}

pub fn can_delete_preset(actor: &Actor, preset: &Preset) -> bool {
    if preset.owner == actor.user_id {
        role_has(actor.role, Resource::Preset, Capability::Delete)
    } else {
        role_has(actor.role, Resource::Preset, Capability::DeleteOthers)
    }
}

/// Visible-set filter for device listings. Computed here, translated into a
/// query by each store backend; entities outside the scope are omitted, never
/// errored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceScope {
    /// Anonymous callers see published devices (redacted by the caller).
    PublishedOnly,
    /// Authenticated callers see their own devices plus allow-listed ones,
    /// published or private.
    OwnerOrAllowed { user_id: String, email: String },
}

pub fn device_list_scope(actor: Option<&Actor>) -> DeviceScope {
    match actor {
        None => DeviceScope::PublishedOnly,
        Some(actor) => DeviceScope::OwnerOrAllowed {
            user_id: actor.user_id.clone(),
            email: actor.email.clone(),
        },
    }
}

/// Visible-set filter for preset listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresetScope {
    /// Anonymous callers see public presets only.
    PublicOnly,
    /// Authenticated callers see public presets plus their own private ones.
    PublicOrOwn { user_id: String },
}

pub fn preset_list_scope(actor: Option<&Actor>) -> PresetScope {
    match actor {
        None => PresetScope::PublicOnly,
        Some(actor) => PresetScope::PublicOrOwn {
            user_id: actor.user_id.clone(),
        },
    }
}
