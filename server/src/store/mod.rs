use async_trait::async_trait;
use uuid::Uuid;

use crate::authz::{DeviceScope, PresetScope};
use crate::errors::Result;
use crate::model::{Device, DeviceStatePatch, Preset};

mod memory;
mod postgres;

pub use memory::MemStore;
pub use postgres::PgStore;

/// Listing window. Clamped by the REST layer before it reaches a store.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

/// Device persistence. Deletes are soft: rows are retained but excluded from
/// every read and from client-id uniqueness.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Inserts a new device. Fails with `DuplicateClientId` when another
    /// non-deleted device already holds the same client id.
    async fn insert(&self, device: Device) -> Result<Device>;

    /// Fetches a device by id. Deleted devices read as absent.
    async fn get(&self, id: Uuid) -> Result<Option<Device>>;

    /// Lists devices visible under `scope`, newest first.
    async fn list(&self, scope: &DeviceScope, page: Page) -> Result<Vec<Device>>;

    /// Persists a full device record. Client-id uniqueness is re-checked so
    /// an update cannot steal another device's id.
    async fn update(&self, device: Device) -> Result<Device>;

    /// Applies a reported-state patch in a single write. Fields absent from
    /// the patch keep their stored value; values are range-checked before
    /// they reach the store.
    async fn apply_state(&self, id: Uuid, patch: &DeviceStatePatch) -> Result<Device>;

    /// Marks a device deleted, freeing its client id for re-registration.
    async fn delete(&self, id: Uuid) -> Result<()>;
}

/// Preset persistence. Same soft-delete contract as devices.
#[async_trait]
pub trait PresetStore: Send + Sync {
    async fn insert(&self, preset: Preset) -> Result<Preset>;

    async fn get(&self, id: Uuid) -> Result<Option<Preset>>;

    async fn list(&self, scope: &PresetScope, page: Page) -> Result<Vec<Preset>>;

    async fn update(&self, preset: Preset) -> Result<Preset>;

    async fn delete(&self, id: Uuid) -> Result<()>;
}
