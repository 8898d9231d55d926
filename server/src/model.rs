use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Publication status of a device record. `Deleted` rows stay in storage but
/// are excluded from every read path and from the duplicate guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Published,
    Private,
    Deleted,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Published => "published",
            DeviceStatus::Private => "private",
            DeviceStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "published" => Some(DeviceStatus::Published),
            "private" => Some(DeviceStatus::Private),
            "deleted" => Some(DeviceStatus::Deleted),
            _ => None,
        }
    }
}

/// Who may see a preset. Owner-controlled after creation; creation always
/// starts at `Private`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresetVisibility {
    Public,
    Private,
    Deleted,
}

impl PresetVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresetVisibility::Public => "public",
            PresetVisibility::Private => "private",
            PresetVisibility::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(PresetVisibility::Public),
            "private" => Some(PresetVisibility::Private),
            "deleted" => Some(PresetVisibility::Deleted),
            _ => None,
        }
    }
}

/// A WLED lighting controller registration.
///
/// `owner` is set once at creation from the authenticated caller and never
/// from client input. `client_id` is unique across non-deleted devices.
#[derive(Debug, Clone)]
pub struct Device {
    pub id: Uuid,
    pub owner: String,
    pub title: String,
    pub status: DeviceStatus,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub network_address: String,
    /// Emails permitted to push state; the creator's email is merged in at
    /// creation.
    pub allowed_users: Vec<String>,
    pub timers: String,
    pub connected: bool,
    pub on: bool,
    pub brightness: u8,
    pub last_command: String,
    pub last_update: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A saved lighting-effect configuration.
#[derive(Debug, Clone, Serialize)]
pub struct Preset {
    pub id: Uuid,
    pub owner: String,
    pub title: String,
    pub visibility: PresetVisibility,
    #[serde(rename = "fx")]
    pub effect_id: u8,
    pub palette_id: u8,
    #[serde(rename = "sx")]
    pub speed: u8,
    #[serde(rename = "ix")]
    pub intensity: u8,
    pub c1: u8,
    pub c2: u8,
    pub c3: u8,
    pub o1: bool,
    pub o2: bool,
    pub o3: bool,
    pub on: bool,
    #[serde(rename = "mainseg")]
    pub main_segment: i32,
    /// Hex color strings without the leading '#', e.g. "FF0000".
    pub colors: Vec<String>,
    pub categories: Vec<String>,
    #[serde(rename = "icon_name")]
    pub icon: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Service roles. The upstream CMS exposed five roles but only two distinct
/// grant sets; `Admin` additionally holds the edit-others/delete-others
/// capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Member,
    Admin,
}

impl Role {
    /// Unknown role strings fall back to `Member`.
    pub fn parse(s: &str) -> Self {
        match s {
            "admin" | "administrator" => Role::Admin,
            _ => Role::Member,
        }
    }
}

/// Authenticated caller identity, established by the upstream gateway.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: String,
    pub email: String,
    pub role: Role,
}

/// Request body for `POST /devices`.
#[derive(Debug, Default, Deserialize)]
pub struct CreateDevice {
    #[serde(default)]
    pub title: String,
    pub status: Option<DeviceStatus>,
    pub mqtt_client_id: Option<String>,
    #[serde(default)]
    pub mqtt_username: String,
    #[serde(default)]
    pub mqtt_password: String,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub allowed_users: Vec<String>,
    #[serde(default)]
    pub timers_json: String,
}

/// Request body for `PATCH /devices/{id}`. Absent fields are left untouched.
#[derive(Debug, Default, Deserialize)]
pub struct DevicePatch {
    pub title: Option<String>,
    pub status: Option<DeviceStatus>,
    pub mqtt_client_id: Option<String>,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub ip_address: Option<String>,
    pub allowed_users: Option<Vec<String>>,
    pub timers_json: Option<String>,
}

impl DevicePatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.status.is_none()
            && self.mqtt_client_id.is_none()
            && self.mqtt_username.is_none()
            && self.mqtt_password.is_none()
            && self.ip_address.is_none()
            && self.allowed_users.is_none()
            && self.timers_json.is_none()
    }
}

/// Partial state pushed by controllers to `POST /devices/{id}/state`.
///
/// Doubles as the `updated` echo in the response: serializing the validated
/// patch reports exactly the fields that were applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceStatePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_connected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on: Option<bool>,
    /// Wide on the wire; validated into [0, 255] before application.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bri: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_mqtt_command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_state_update: Option<String>,
}

impl DeviceStatePatch {
    pub fn is_empty(&self) -> bool {
        self.is_connected.is_none()
            && self.on.is_none()
            && self.bri.is_none()
            && self.last_mqtt_command.is_none()
            && self.last_state_update.is_none()
    }
}

/// Response for `POST /devices/{id}/state`.
#[derive(Debug, Serialize)]
pub struct StateUpdateResponse {
    pub success: bool,
    pub updated: DeviceStatePatch,
}

/// Request body for `POST /presets`. A requested visibility is accepted but
/// overridden to private at creation.
#[derive(Debug, Default, Deserialize)]
pub struct CreatePreset {
    #[serde(default)]
    pub title: String,
    pub visibility: Option<PresetVisibility>,
    #[serde(default, rename = "fx")]
    pub effect_id: i64,
    #[serde(default)]
    pub palette_id: i64,
    #[serde(default, rename = "sx")]
    pub speed: i64,
    #[serde(default, rename = "ix")]
    pub intensity: i64,
    #[serde(default)]
    pub c1: i64,
    #[serde(default)]
    pub c2: i64,
    #[serde(default)]
    pub c3: i64,
    #[serde(default)]
    pub o1: bool,
    #[serde(default)]
    pub o2: bool,
    #[serde(default)]
    pub o3: bool,
    #[serde(default)]
    pub on: bool,
    #[serde(default, rename = "mainseg")]
    pub main_segment: i64,
    #[serde(default)]
    pub colors: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default = "default_icon")]
    pub icon_name: String,
}

pub fn default_icon() -> String {
    "lightbulb".to_string()
}

/// Request body for `PATCH /presets/{id}`.
#[derive(Debug, Default, Deserialize)]
pub struct PresetPatch {
    pub title: Option<String>,
    pub visibility: Option<PresetVisibility>,
    #[serde(rename = "fx")]
    pub effect_id: Option<i64>,
    pub palette_id: Option<i64>,
    #[serde(rename = "sx")]
    pub speed: Option<i64>,
    #[serde(rename = "ix")]
    pub intensity: Option<i64>,
    pub c1: Option<i64>,
    pub c2: Option<i64>,
    pub c3: Option<i64>,
    pub o1: Option<bool>,
    pub o2: Option<bool>,
    pub o3: Option<bool>,
    pub on: Option<bool>,
    #[serde(rename = "mainseg")]
    pub main_segment: Option<i64>,
    pub colors: Option<Vec<String>>,
    pub categories: Option<Vec<String>>,
    pub icon_name: Option<String>,
}

/// Full device body, with credentials present only for the owner.
#[derive(Debug, Serialize)]
pub struct DeviceBody {
    pub id: Uuid,
    pub owner: String,
    pub title: String,
    pub status: DeviceStatus,
    pub mqtt_client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mqtt_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mqtt_password: Option<String>,
    pub ip_address: String,
    pub allowed_users: Vec<String>,
    pub timers_json: String,
    pub is_connected: bool,
    pub on: bool,
    pub bri: u8,
    pub last_mqtt_command: String,
    pub last_state_update: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What an unauthenticated caller sees of a device.
#[derive(Debug, Serialize)]
pub struct RedactedDevice {
    pub id: Uuid,
    pub mqtt_client_id: String,
}

/// Wire view of a device, shaped by what the caller may see.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum DeviceView {
    Full(Box<DeviceBody>),
    Redacted(RedactedDevice),
}

impl DeviceView {
    /// View for the device owner: everything, credentials included.
    pub fn for_owner(device: &Device) -> Self {
        DeviceView::Full(Box::new(DeviceBody {
            mqtt_username: Some(device.username.clone()),
            mqtt_password: Some(device.password.clone()),
            ..DeviceBody::base(device)
        }))
    }

    /// View for an allowed user: everything except credentials.
    pub fn for_allowed(device: &Device) -> Self {
        DeviceView::Full(Box::new(DeviceBody::base(device)))
    }

    /// View for an unauthenticated caller: the client id, nothing else.
    pub fn redacted(device: &Device) -> Self {
        DeviceView::Redacted(RedactedDevice {
            id: device.id,
            mqtt_client_id: device.client_id.clone(),
        })
    }
}

impl DeviceBody {
    fn base(device: &Device) -> Self {
        DeviceBody {
            id: device.id,
            owner: device.owner.clone(),
            title: device.title.clone(),
            status: device.status,
            mqtt_client_id: device.client_id.clone(),
            mqtt_username: None,
            mqtt_password: None,
            ip_address: device.network_address.clone(),
            allowed_users: device.allowed_users.clone(),
            timers_json: device.timers.clone(),
            is_connected: device.connected,
            on: device.on,
            bri: device.brightness,
            last_mqtt_command: device.last_command.clone(),
            last_state_update: device.last_update.clone(),
            created_at: device.created_at,
            updated_at: device.updated_at,
        }
    }
}

/// List envelope shared by the device and preset collections.
#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub data: Vec<T>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}
