use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::authz::{email_allowed, DeviceScope, PresetScope};
use crate::errors::{Error, Result};
use crate::model::{Device, DeviceStatePatch, DeviceStatus, Preset, PresetVisibility};
use crate::store::{DeviceStore, Page, PresetStore};

/// In-memory backend. Backs the test suite and small single-node
/// deployments; state is lost on restart.
#[derive(Default)]
pub struct MemStore {
    devices: RwLock<HashMap<Uuid, Device>>,
    presets: RwLock<HashMap<Uuid, Preset>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn page_slice<T>(mut items: Vec<T>, page: Page) -> Vec<T> {
    if page.offset >= items.len() {
        return Vec::new();
    }
    items.drain(..page.offset);
    items.truncate(page.limit);
    items
}

#[async_trait]
impl DeviceStore for MemStore {
    async fn insert(&self, device: Device) -> Result<Device> {
        let mut devices = self.devices.write().await;
        let taken = devices
            .values()
            .any(|d| d.status != DeviceStatus::Deleted && d.client_id == device.client_id);
        if taken {
            return Err(Error::DuplicateClientId(device.client_id));
        }
        devices.insert(device.id, device.clone());
        Ok(device)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Device>> {
        let devices = self.devices.read().await;
        Ok(devices
            .get(&id)
            .filter(|d| d.status != DeviceStatus::Deleted)
            .cloned())
    }

    async fn list(&self, scope: &DeviceScope, page: Page) -> Result<Vec<Device>> {
        let devices = self.devices.read().await;
        let mut visible: Vec<Device> = devices
            .values()
            .filter(|d| match scope {
                DeviceScope::PublishedOnly => d.status == DeviceStatus::Published,
                DeviceScope::OwnerOrAllowed { user_id, email } => {
                    d.status != DeviceStatus::Deleted
                        && (&d.owner == user_id || email_allowed(email, &d.allowed_users))
                }
            })
            .cloned()
            .collect();
        visible.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page_slice(visible, page))
    }

    async fn update(&self, device: Device) -> Result<Device> {
        let mut devices = self.devices.write().await;
        let taken = devices.values().any(|d| {
            d.id != device.id
                && d.status != DeviceStatus::Deleted
                && d.client_id == device.client_id
        });
        if taken {
            return Err(Error::DuplicateClientId(device.client_id));
        }
        match devices.get(&device.id) {
            Some(current) if current.status != DeviceStatus::Deleted => {
                devices.insert(device.id, device.clone());
                Ok(device)
            }
            _ => Err(Error::NotFound(device.id)),
        }
    }

    async fn apply_state(&self, id: Uuid, patch: &DeviceStatePatch) -> Result<Device> {
        let mut devices = self.devices.write().await;
        let device = devices
            .get_mut(&id)
            .filter(|d| d.status != DeviceStatus::Deleted)
            .ok_or(Error::NotFound(id))?;

        if let Some(connected) = patch.is_connected {
            device.connected = connected;
        }
        if let Some(on) = patch.on {
            device.on = on;
        }
        if let Some(bri) = patch.bri {
            device.brightness = bri.clamp(0, i64::from(u8::MAX)) as u8;
        }
        if let Some(command) = &patch.last_mqtt_command {
            device.last_command = command.clone();
        }
        if let Some(update) = &patch.last_state_update {
            device.last_update = update.clone();
        }
        device.updated_at = Utc::now();
        Ok(device.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut devices = self.devices.write().await;
        let device = devices
            .get_mut(&id)
            .filter(|d| d.status != DeviceStatus::Deleted)
            .ok_or(Error::NotFound(id))?;
        device.status = DeviceStatus::Deleted;
        device.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl PresetStore for MemStore {
    async fn insert(&self, preset: Preset) -> Result<Preset> {
        let mut presets = self.presets.write().await;
        presets.insert(preset.id, preset.clone());
        Ok(preset)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Preset>> {
        let presets = self.presets.read().await;
        Ok(presets
            .get(&id)
            .filter(|p| p.visibility != PresetVisibility::Deleted)
            .cloned())
    }

    async fn list(&self, scope: &PresetScope, page: Page) -> Result<Vec<Preset>> {
        let presets = self.presets.read().await;
        let mut visible: Vec<Preset> = presets
            .values()
            .filter(|p| match scope {
                PresetScope::PublicOnly => p.visibility == PresetVisibility::Public,
                PresetScope::PublicOrOwn { user_id } => {
                    p.visibility == PresetVisibility::Public
                        || (p.visibility == PresetVisibility::Private && &p.owner == user_id)
                }
            })
            .cloned()
            .collect();
        visible.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page_slice(visible, page))
    }

    async fn update(&self, preset: Preset) -> Result<Preset> {
        let mut presets = self.presets.write().await;
        match presets.get(&preset.id) {
            Some(current) if current.visibility != PresetVisibility::Deleted => {
                presets.insert(preset.id, preset.clone());
                Ok(preset)
            }
            _ => Err(Error::NotFound(preset.id)),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut presets = self.presets.write().await;
        let preset = presets
            .get_mut(&id)
            .filter(|p| p.visibility != PresetVisibility::Deleted)
            .ok_or(Error::NotFound(id))?;
        preset.visibility = PresetVisibility::Deleted;
        preset.updated_at = Utc::now();
        Ok(())
    }
}
