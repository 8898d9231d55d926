use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::authz::{self, Resource};
use crate::errors::{Error, Result};
use crate::metrics::PRESETS_CREATED_TOTAL;
use crate::model::{Actor, CreatePreset, Preset, PresetPatch, PresetVisibility};
use crate::store::{Page, PresetStore};
use crate::validate;

/// Creates a preset. Visibility is forced to private and ownership to the
/// caller, whatever the request says; the owner can publish it afterwards
/// with an update.
pub async fn create(store: &dyn PresetStore, actor: &Actor, req: CreatePreset) -> Result<Preset> {
    if !authz::can_create(actor, Resource::Preset) {
        return Err(authz::denial(Some(actor), "create presets"));
    }
    validate::validate_new_preset(&req)?;

    let now = Utc::now();
    let preset = Preset {
        id: Uuid::new_v4(),
        owner: actor.user_id.clone(),
        title: req.title,
        visibility: PresetVisibility::Private,
        effect_id: req.effect_id as u8,
        palette_id: req.palette_id as u8,
        speed: req.speed as u8,
        intensity: req.intensity as u8,
        c1: req.c1 as u8,
        c2: req.c2 as u8,
        c3: req.c3 as u8,
        o1: req.o1,
        o2: req.o2,
        o3: req.o3,
        on: req.on,
        main_segment: req.main_segment as i32,
        colors: req.colors,
        categories: req.categories,
        icon: req.icon_name,
        created_at: now,
        updated_at: now,
    };

    let preset = store.insert(preset).await?;
    PRESETS_CREATED_TOTAL.inc();
    info!("Created preset '{}' for user {}", preset.title, actor.user_id);
    Ok(preset)
}

pub async fn get(store: &dyn PresetStore, actor: Option<&Actor>, id: Uuid) -> Result<Preset> {
    let preset = store.get(id).await?.ok_or(Error::NotFound(id))?;
    if !authz::can_read_preset(actor, &preset) {
        return Err(authz::denial(actor, "access this preset"));
    }
    Ok(preset)
}

pub async fn list(
    store: &dyn PresetStore,
    actor: Option<&Actor>,
    page: Page,
) -> Result<Vec<Preset>> {
    let scope = authz::preset_list_scope(actor);
    store.list(&scope, page).await
}

pub async fn update(
    store: &dyn PresetStore,
    actor: &Actor,
    id: Uuid,
    patch: PresetPatch,
) -> Result<Preset> {
    validate::validate_preset_patch(&patch)?;
    let mut preset = store.get(id).await?.ok_or(Error::NotFound(id))?;
    if !authz::can_edit_preset(actor, &preset) {
        return Err(authz::denial(Some(actor), "edit this preset"));
    }

    if let Some(title) = patch.title {
        preset.title = title;
    }
    if let Some(visibility) = patch.visibility {
        preset.visibility = visibility;
    }
    if let Some(fx) = patch.effect_id {
        preset.effect_id = fx as u8;
    }
    if let Some(palette_id) = patch.palette_id {
        preset.palette_id = palette_id as u8;
    }
    if let Some(sx) = patch.speed {
        preset.speed = sx as u8;
    }
    if let Some(ix) = patch.intensity {
        preset.intensity = ix as u8;
    }
    if let Some(c1) = patch.c1 {
        preset.c1 = c1 as u8;
    }
    if let Some(c2) = patch.c2 {
        preset.c2 = c2 as u8;
    }
    if let Some(c3) = patch.c3 {
        preset.c3 = c3 as u8;
    }
    if let Some(o1) = patch.o1 {
        preset.o1 = o1;
    }
    if let Some(o2) = patch.o2 {
        preset.o2 = o2;
    }
    if let Some(o3) = patch.o3 {
        preset.o3 = o3;
    }
    if let Some(on) = patch.on {
        preset.on = on;
    }
    if let Some(mainseg) = patch.main_segment {
        preset.main_segment = mainseg as i32;
    }
    if let Some(colors) = patch.colors {
        preset.colors = colors;
    }
    if let Some(categories) = patch.categories {
        preset.categories = categories;
    }
    if let Some(icon) = patch.icon_name {
        preset.icon = icon;
    }
    preset.updated_at = Utc::now();

    store.update(preset).await
}

/// Soft-deletes a preset and returns its last body.
pub async fn delete(store: &dyn PresetStore, actor: &Actor, id: Uuid) -> Result<Preset> {
    let preset = store.get(id).await?.ok_or(Error::NotFound(id))?;
    if !authz::can_delete_preset(actor, &preset) {
        return Err(authz::denial(Some(actor), "delete this preset"));
    }
    store.delete(id).await?;
    info!("Deleted preset {} ('{}')", preset.id, preset.title);
    Ok(preset)
}
