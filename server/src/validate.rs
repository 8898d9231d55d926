use crate::errors::{Error, Result};
use crate::model::{
    CreateDevice, CreatePreset, DevicePatch, DeviceStatePatch, DeviceStatus, PresetPatch,
    PresetVisibility,
};

const EFFECT_ID_MAX: i64 = 200;
const PALETTE_ID_MAX: i64 = 70;
const CHANNEL_MAX: i64 = 255;

/// Icons the app knows how to render.
const ICON_NAMES: &[&str] = &[
    "lightbulb",
    "color_lens",
    "pattern",
    "directions_run",
    "waves",
    "power_off",
    "local_drink",
    "local_florist",
    "local_fire_department",
    "directions_car",
    "cake",
    "attractions",
    "nights_stay",
    "directions",
];

fn check_range(field: &str, value: i64, max: i64) -> Result<()> {
    if value < 0 || value > max {
        return Err(Error::Validation(format!(
            "{} {} out of range [0, {}]",
            field, value, max
        )));
    }
    Ok(())
}

/// Validates a device creation request
pub fn validate_new_device(req: &CreateDevice) -> Result<()> {
    match req.mqtt_client_id.as_deref() {
        None | Some("") => return Err(Error::MissingClientId),
        Some(_) => {}
    }

    if req.status == Some(DeviceStatus::Deleted) {
        return Err(Error::Validation(
            "status cannot be 'deleted' at creation".to_string(),
        ));
    }

    Ok(())
}

/// Validates a device metadata patch
pub fn validate_device_patch(patch: &DevicePatch) -> Result<()> {
    if patch.mqtt_client_id.as_deref() == Some("") {
        return Err(Error::Validation(
            "mqtt_client_id cannot be empty".to_string(),
        ));
    }

    if patch.status == Some(DeviceStatus::Deleted) {
        return Err(Error::Validation(
            "status cannot be set to 'deleted'; delete the device instead".to_string(),
        ));
    }

    Ok(())
}

/// Validates a device state patch
pub fn validate_state_patch(patch: &DeviceStatePatch) -> Result<()> {
    if let Some(bri) = patch.bri {
        check_range("bri", bri, CHANNEL_MAX)?;
    }
    Ok(())
}

/// Validates a preset creation request
pub fn validate_new_preset(req: &CreatePreset) -> Result<()> {
    if req.title.is_empty() {
        return Err(Error::Validation("title cannot be empty".to_string()));
    }

    check_range("fx", req.effect_id, EFFECT_ID_MAX)?;
    check_range("palette_id", req.palette_id, PALETTE_ID_MAX)?;
    check_range("sx", req.speed, CHANNEL_MAX)?;
    check_range("ix", req.intensity, CHANNEL_MAX)?;
    check_range("c1", req.c1, CHANNEL_MAX)?;
    check_range("c2", req.c2, CHANNEL_MAX)?;
    check_range("c3", req.c3, CHANNEL_MAX)?;
    check_range("mainseg", req.main_segment, i32::MAX as i64)?;

    validate_colors(&req.colors)?;
    validate_icon(&req.icon_name)?;

    Ok(())
}

/// Validates a preset patch
pub fn validate_preset_patch(patch: &PresetPatch) -> Result<()> {
    if patch.title.as_deref() == Some("") {
        return Err(Error::Validation("title cannot be empty".to_string()));
    }

    if patch.visibility == Some(PresetVisibility::Deleted) {
        return Err(Error::Validation(
            "visibility cannot be set to 'deleted'; delete the preset instead".to_string(),
        ));
    }

    if let Some(fx) = patch.effect_id {
        check_range("fx", fx, EFFECT_ID_MAX)?;
    }
    if let Some(palette_id) = patch.palette_id {
        check_range("palette_id", palette_id, PALETTE_ID_MAX)?;
    }
    if let Some(sx) = patch.speed {
        check_range("sx", sx, CHANNEL_MAX)?;
    }
    if let Some(ix) = patch.intensity {
        check_range("ix", ix, CHANNEL_MAX)?;
    }
    if let Some(c1) = patch.c1 {
        check_range("c1", c1, CHANNEL_MAX)?;
    }
    if let Some(c2) = patch.c2 {
        check_range("c2", c2, CHANNEL_MAX)?;
    }
    if let Some(c3) = patch.c3 {
        check_range("c3", c3, CHANNEL_MAX)?;
    }
    if let Some(mainseg) = patch.main_segment {
        check_range("mainseg", mainseg, i32::MAX as i64)?;
    }

    if let Some(colors) = &patch.colors {
        validate_colors(colors)?;
    }
    if let Some(icon) = &patch.icon_name {
        validate_icon(icon)?;
    }

    Ok(())
}

fn validate_colors(colors: &[String]) -> Result<()> {
    for color in colors {
        if color.len() != 6 || !color.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::Validation(format!(
                "color '{}' is not a 6-digit hex value",
                color
            )));
        }
    }
    Ok(())
}

fn validate_icon(icon: &str) -> Result<()> {
    if !ICON_NAMES.contains(&icon) {
        return Err(Error::Validation(format!("unknown icon '{}'", icon)));
    }
    Ok(())
}
