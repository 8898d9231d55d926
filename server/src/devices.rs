use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::authz::{self, DeviceAccess, Resource};
use crate::errors::{Error, Result};
use crate::metrics::{DEVICES_CREATED_TOTAL, DUPLICATE_CLIENT_ID_TOTAL, STATE_UPDATES_TOTAL};
use crate::model::{
    Actor, CreateDevice, Device, DevicePatch, DeviceStatePatch, DeviceStatus, DeviceView,
    StateUpdateResponse,
};
use crate::store::{DeviceStore, Page};
use crate::validate;

/// Registers a device. The caller becomes the owner regardless of request
/// content, and the caller's email, when the account has one, is merged into
/// `allowed_users` so the creator can push state.
pub async fn create(
    store: &dyn DeviceStore,
    actor: &Actor,
    req: CreateDevice,
) -> Result<DeviceView> {
    if !authz::can_create(actor, Resource::Device) {
        return Err(authz::denial(Some(actor), "register devices"));
    }
    validate::validate_new_device(&req)?;
    let client_id = req.mqtt_client_id.clone().ok_or(Error::MissingClientId)?;

    let mut allowed_users: Vec<String> = Vec::new();
    for email in req.allowed_users.iter().chain(std::iter::once(&actor.email)) {
        if !email.is_empty() && !allowed_users.contains(email) {
            allowed_users.push(email.clone());
        }
    }

    let now = Utc::now();
    let device = Device {
        id: Uuid::new_v4(),
        owner: actor.user_id.clone(),
        title: req.title,
        status: req.status.unwrap_or(DeviceStatus::Published),
        client_id,
        username: req.mqtt_username,
        password: req.mqtt_password,
        network_address: req.ip_address,
        allowed_users,
        timers: req.timers_json,
        connected: false,
        on: false,
        brightness: 0,
        last_command: String::new(),
        last_update: String::new(),
        created_at: now,
        updated_at: now,
    };

    let device = match store.insert(device).await {
        Ok(device) => device,
        Err(err) => {
            if matches!(err, Error::DuplicateClientId(_)) {
                DUPLICATE_CLIENT_ID_TOTAL.inc();
            }
            return Err(err);
        }
    };

    DEVICES_CREATED_TOTAL.inc();
    info!(
        "Registered device {} for user {}",
        device.client_id, actor.user_id
    );
    Ok(DeviceView::for_owner(&device))
}

pub async fn get(store: &dyn DeviceStore, actor: Option<&Actor>, id: Uuid) -> Result<DeviceView> {
    let device = store.get(id).await?.ok_or(Error::NotFound(id))?;
    match authz::device_read(actor, &device) {
        DeviceAccess::Owner => Ok(DeviceView::for_owner(&device)),
        DeviceAccess::Allowed => Ok(DeviceView::for_allowed(&device)),
        DeviceAccess::Redacted => Ok(DeviceView::redacted(&device)),
        DeviceAccess::Deny => Err(authz::denial(actor, "access this device")),
    }
}

/// Lists the devices visible to the caller. Out-of-scope devices are
/// omitted, never an error.
pub async fn list(
    store: &dyn DeviceStore,
    actor: Option<&Actor>,
    page: Page,
) -> Result<Vec<DeviceView>> {
    let scope = authz::device_list_scope(actor);
    let devices = store.list(&scope, page).await?;
    Ok(devices
        .iter()
        .filter_map(|device| match authz::device_read(actor, device) {
            DeviceAccess::Owner => Some(DeviceView::for_owner(device)),
            DeviceAccess::Allowed => Some(DeviceView::for_allowed(device)),
            DeviceAccess::Redacted => Some(DeviceView::redacted(device)),
            DeviceAccess::Deny => None,
        })
        .collect())
}

pub async fn update(
    store: &dyn DeviceStore,
    actor: &Actor,
    id: Uuid,
    patch: DevicePatch,
) -> Result<DeviceView> {
    validate::validate_device_patch(&patch)?;
    let mut device = store.get(id).await?.ok_or(Error::NotFound(id))?;
    if !authz::can_edit_device(actor, &device) {
        return Err(authz::denial(Some(actor), "edit this device"));
    }
    if patch.is_empty() {
        return Ok(view_for_editor(actor, &device));
    }

    if let Some(title) = patch.title {
        device.title = title;
    }
    if let Some(status) = patch.status {
        device.status = status;
    }
    if let Some(client_id) = patch.mqtt_client_id {
        device.client_id = client_id;
    }
    if let Some(username) = patch.mqtt_username {
        device.username = username;
    }
    if let Some(password) = patch.mqtt_password {
        device.password = password;
    }
    if let Some(address) = patch.ip_address {
        device.network_address = address;
    }
    if let Some(allowed) = patch.allowed_users {
        device.allowed_users = allowed;
    }
    if let Some(timers) = patch.timers_json {
        device.timers = timers;
    }
    device.updated_at = Utc::now();

    let device = match store.update(device).await {
        Ok(device) => device,
        Err(err) => {
            if matches!(err, Error::DuplicateClientId(_)) {
                DUPLICATE_CLIENT_ID_TOTAL.inc();
            }
            return Err(err);
        }
    };
    Ok(view_for_editor(actor, &device))
}

/// Soft-deletes a device and returns its last visible body.
pub async fn delete(store: &dyn DeviceStore, actor: &Actor, id: Uuid) -> Result<DeviceView> {
    let device = store.get(id).await?.ok_or(Error::NotFound(id))?;
    if !authz::can_delete_device(actor, &device) {
        return Err(authz::denial(Some(actor), "delete this device"));
    }
    store.delete(id).await?;
    info!("Deleted device {} ({})", device.id, device.client_id);
    Ok(view_for_editor(actor, &device))
}

/// Applies a reported-state patch. Authorization runs before validation and
/// validation before any write, so a rejected request changes nothing. The
/// response echoes exactly the fields that were applied.
pub async fn apply_state(
    store: &dyn DeviceStore,
    actor: Option<&Actor>,
    id: Uuid,
    patch: DeviceStatePatch,
) -> Result<StateUpdateResponse> {
    let device = store.get(id).await?.ok_or(Error::NotFound(id))?;
    if !authz::can_push_state(actor, &device) {
        return Err(authz::denial(actor, "update this device's state"));
    }
    validate::validate_state_patch(&patch)?;

    if !patch.is_empty() {
        store.apply_state(id, &patch).await?;
        STATE_UPDATES_TOTAL.inc();
    }
    Ok(StateUpdateResponse {
        success: true,
        updated: patch,
    })
}

/// Editors see the full body; credentials stay owner-only even for admins
/// editing someone else's device.
fn view_for_editor(actor: &Actor, device: &Device) -> DeviceView {
    if device.owner == actor.user_id {
        DeviceView::for_owner(device)
    } else {
        DeviceView::for_allowed(device)
    }
}
