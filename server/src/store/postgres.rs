use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::authz::{DeviceScope, PresetScope};
use crate::errors::{Error, Result};
use crate::model::{Device, DeviceStatePatch, DeviceStatus, Preset, PresetVisibility};
use crate::store::{DeviceStore, Page, PresetStore};

const DEVICE_COLUMNS: &str = r#"id, owner_id AS owner, title, status,
    mqtt_client_id AS client_id, mqtt_username AS username, mqtt_password AS password,
    ip_address AS network_address, allowed_users, timers_json AS timers,
    is_connected AS connected, is_on AS "on", brightness,
    last_mqtt_command AS last_command, last_state_update AS last_update,
    created_at, updated_at"#;

const PRESET_COLUMNS: &str = r#"id, owner_id AS owner, title, visibility, effect_id,
    palette_id, speed, intensity, c1, c2, c3, o1, o2, o3, is_on AS "on",
    main_segment, colors, categories, icon_name AS icon, created_at, updated_at"#;

/// Postgres backend. Client-id uniqueness is enforced by a partial unique
/// index over non-deleted rows, so concurrent registrations race safely.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        info!("Connecting to database...");
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;

        info!("Database connection established");
        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Migrations completed");

        Ok(Self { pool })
    }
}

/// Translates a unique-index violation on the client id into the domain
/// error; everything else stays a database error.
fn duplicate_or_db(err: sqlx::Error, client_id: &str) -> Error {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return Error::DuplicateClientId(client_id.to_string());
        }
    }
    Error::Database(err)
}

#[derive(sqlx::FromRow)]
struct DeviceRow {
    id: Uuid,
    owner: String,
    title: String,
    status: String,
    client_id: String,
    username: String,
    password: String,
    network_address: String,
    allowed_users: Vec<String>,
    timers: String,
    connected: bool,
    on: bool,
    brightness: i16,
    last_command: String,
    last_update: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DeviceRow> for Device {
    type Error = Error;

    fn try_from(row: DeviceRow) -> Result<Self> {
        let status = DeviceStatus::parse(&row.status).ok_or_else(|| {
            Error::Internal(anyhow::anyhow!("unknown device status '{}'", row.status))
        })?;
        Ok(Device {
            id: row.id,
            owner: row.owner,
            title: row.title,
            status,
            client_id: row.client_id,
            username: row.username,
            password: row.password,
            network_address: row.network_address,
            allowed_users: row.allowed_users,
            timers: row.timers,
            connected: row.connected,
            on: row.on,
            brightness: row.brightness.clamp(0, i16::from(u8::MAX)) as u8,
            last_command: row.last_command,
            last_update: row.last_update,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PresetRow {
    id: Uuid,
    owner: String,
    title: String,
    visibility: String,
    effect_id: i16,
    palette_id: i16,
    speed: i16,
    intensity: i16,
    c1: i16,
    c2: i16,
    c3: i16,
    o1: bool,
    o2: bool,
    o3: bool,
    on: bool,
    main_segment: i32,
    colors: Vec<String>,
    categories: Vec<String>,
    icon: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PresetRow> for Preset {
    type Error = Error;

    fn try_from(row: PresetRow) -> Result<Self> {
        let visibility = PresetVisibility::parse(&row.visibility).ok_or_else(|| {
            Error::Internal(anyhow::anyhow!(
                "unknown preset visibility '{}'",
                row.visibility
            ))
        })?;
        let channel = |v: i16| v.clamp(0, i16::from(u8::MAX)) as u8;
        Ok(Preset {
            id: row.id,
            owner: row.owner,
            title: row.title,
            visibility,
            effect_id: channel(row.effect_id),
            palette_id: channel(row.palette_id),
            speed: channel(row.speed),
            intensity: channel(row.intensity),
            c1: channel(row.c1),
            c2: channel(row.c2),
            c3: channel(row.c3),
            o1: row.o1,
            o2: row.o2,
            o3: row.o3,
            on: row.on,
            main_segment: row.main_segment,
            colors: row.colors,
            categories: row.categories,
            icon: row.icon,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl DeviceStore for PgStore {
    async fn insert(&self, device: Device) -> Result<Device> {
        let query = format!(
            "INSERT INTO devices (id, owner_id, title, status, mqtt_client_id, mqtt_username, \
             mqtt_password, ip_address, allowed_users, timers_json, is_connected, is_on, \
             brightness, last_mqtt_command, last_state_update, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
             RETURNING {DEVICE_COLUMNS}"
        );

        let row = sqlx::query_as::<_, DeviceRow>(&query)
            .bind(device.id)
            .bind(&device.owner)
            .bind(&device.title)
            .bind(device.status.as_str())
            .bind(&device.client_id)
            .bind(&device.username)
            .bind(&device.password)
            .bind(&device.network_address)
            .bind(&device.allowed_users)
            .bind(&device.timers)
            .bind(device.connected)
            .bind(device.on)
            .bind(i16::from(device.brightness))
            .bind(&device.last_command)
            .bind(&device.last_update)
            .bind(device.created_at)
            .bind(device.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| duplicate_or_db(e, &device.client_id))?;

        row.try_into()
    }

    async fn get(&self, id: Uuid) -> Result<Option<Device>> {
        let query =
            format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE id = $1 AND status <> 'deleted'");
        let row = sqlx::query_as::<_, DeviceRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Device::try_from).transpose()
    }

    async fn list(&self, scope: &DeviceScope, page: Page) -> Result<Vec<Device>> {
        let rows = match scope {
            DeviceScope::PublishedOnly => {
                let query = format!(
                    "SELECT {DEVICE_COLUMNS} FROM devices WHERE status = 'published' \
                     ORDER BY created_at DESC LIMIT {} OFFSET {}",
                    page.limit, page.offset
                );
                sqlx::query_as::<_, DeviceRow>(&query)
                    .fetch_all(&self.pool)
                    .await?
            }
            DeviceScope::OwnerOrAllowed { user_id, email } => {
                let query = format!(
                    "SELECT {DEVICE_COLUMNS} FROM devices WHERE status <> 'deleted' \
                     AND (owner_id = $1 OR ($2 <> '' AND $2 = ANY(allowed_users))) \
                     ORDER BY created_at DESC LIMIT {} OFFSET {}",
                    page.limit, page.offset
                );
                sqlx::query_as::<_, DeviceRow>(&query)
                    .bind(user_id)
                    .bind(email)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(Device::try_from).collect()
    }

    async fn update(&self, device: Device) -> Result<Device> {
        let query = format!(
            "UPDATE devices SET title = $2, status = $3, mqtt_client_id = $4, \
             mqtt_username = $5, mqtt_password = $6, ip_address = $7, allowed_users = $8, \
             timers_json = $9, is_connected = $10, is_on = $11, brightness = $12, \
             last_mqtt_command = $13, last_state_update = $14, updated_at = $15 \
             WHERE id = $1 AND status <> 'deleted' \
             RETURNING {DEVICE_COLUMNS}"
        );

        let row = sqlx::query_as::<_, DeviceRow>(&query)
            .bind(device.id)
            .bind(&device.title)
            .bind(device.status.as_str())
            .bind(&device.client_id)
            .bind(&device.username)
            .bind(&device.password)
            .bind(&device.network_address)
            .bind(&device.allowed_users)
            .bind(&device.timers)
            .bind(device.connected)
            .bind(device.on)
            .bind(i16::from(device.brightness))
            .bind(&device.last_command)
            .bind(&device.last_update)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| duplicate_or_db(e, &device.client_id))?;

        row.ok_or(Error::NotFound(device.id))?.try_into()
    }

    async fn apply_state(&self, id: Uuid, patch: &DeviceStatePatch) -> Result<Device> {
        // Single write; absent fields keep their stored value.
        let query = format!(
            "UPDATE devices SET \
             is_connected = COALESCE($2, is_connected), \
             is_on = COALESCE($3, is_on), \
             brightness = COALESCE($4, brightness), \
             last_mqtt_command = COALESCE($5, last_mqtt_command), \
             last_state_update = COALESCE($6, last_state_update), \
             updated_at = $7 \
             WHERE id = $1 AND status <> 'deleted' \
             RETURNING {DEVICE_COLUMNS}"
        );

        let row = sqlx::query_as::<_, DeviceRow>(&query)
            .bind(id)
            .bind(patch.is_connected)
            .bind(patch.on)
            .bind(patch.bri.map(|b| b.clamp(0, i64::from(u8::MAX)) as i16))
            .bind(patch.last_mqtt_command.as_deref())
            .bind(patch.last_state_update.as_deref())
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or(Error::NotFound(id))?.try_into()
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE devices SET status = 'deleted', updated_at = $2 \
             WHERE id = $1 AND status <> 'deleted'",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(id));
        }
        Ok(())
    }
}

#[async_trait]
impl PresetStore for PgStore {
    async fn insert(&self, preset: Preset) -> Result<Preset> {
        let query = format!(
            "INSERT INTO presets (id, owner_id, title, visibility, effect_id, palette_id, \
             speed, intensity, c1, c2, c3, o1, o2, o3, is_on, main_segment, colors, \
             categories, icon_name, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
             $17, $18, $19, $20, $21) \
             RETURNING {PRESET_COLUMNS}"
        );

        let row = sqlx::query_as::<_, PresetRow>(&query)
            .bind(preset.id)
            .bind(&preset.owner)
            .bind(&preset.title)
            .bind(preset.visibility.as_str())
            .bind(i16::from(preset.effect_id))
            .bind(i16::from(preset.palette_id))
            .bind(i16::from(preset.speed))
            .bind(i16::from(preset.intensity))
            .bind(i16::from(preset.c1))
            .bind(i16::from(preset.c2))
            .bind(i16::from(preset.c3))
            .bind(preset.o1)
            .bind(preset.o2)
            .bind(preset.o3)
            .bind(preset.on)
            .bind(preset.main_segment)
            .bind(&preset.colors)
            .bind(&preset.categories)
            .bind(&preset.icon)
            .bind(preset.created_at)
            .bind(preset.updated_at)
            .fetch_one(&self.pool)
            .await?;

        row.try_into()
    }

    async fn get(&self, id: Uuid) -> Result<Option<Preset>> {
        let query = format!(
            "SELECT {PRESET_COLUMNS} FROM presets WHERE id = $1 AND visibility <> 'deleted'"
        );
        let row = sqlx::query_as::<_, PresetRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Preset::try_from).transpose()
    }

    async fn list(&self, scope: &PresetScope, page: Page) -> Result<Vec<Preset>> {
        let rows = match scope {
            PresetScope::PublicOnly => {
                let query = format!(
                    "SELECT {PRESET_COLUMNS} FROM presets WHERE visibility = 'public' \
                     ORDER BY created_at DESC LIMIT {} OFFSET {}",
                    page.limit, page.offset
                );
                sqlx::query_as::<_, PresetRow>(&query)
                    .fetch_all(&self.pool)
                    .await?
            }
            PresetScope::PublicOrOwn { user_id } => {
                let query = format!(
                    "SELECT {PRESET_COLUMNS} FROM presets WHERE visibility = 'public' \
                     OR (visibility = 'private' AND owner_id = $1) \
                     ORDER BY created_at DESC LIMIT {} OFFSET {}",
                    page.limit, page.offset
                );
                sqlx::query_as::<_, PresetRow>(&query)
                    .bind(user_id)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(Preset::try_from).collect()
    }

    async fn update(&self, preset: Preset) -> Result<Preset> {
        let query = format!(
            "UPDATE presets SET title = $2, visibility = $3, effect_id = $4, palette_id = $5, \
             speed = $6, intensity = $7, c1 = $8, c2 = $9, c3 = $10, o1 = $11, o2 = $12, \
             o3 = $13, is_on = $14, main_segment = $15, colors = $16, categories = $17, \
             icon_name = $18, updated_at = $19 \
             WHERE id = $1 AND visibility <> 'deleted' \
             RETURNING {PRESET_COLUMNS}"
        );

        let row = sqlx::query_as::<_, PresetRow>(&query)
            .bind(preset.id)
            .bind(&preset.title)
            .bind(preset.visibility.as_str())
            .bind(i16::from(preset.effect_id))
            .bind(i16::from(preset.palette_id))
            .bind(i16::from(preset.speed))
            .bind(i16::from(preset.intensity))
            .bind(i16::from(preset.c1))
            .bind(i16::from(preset.c2))
            .bind(i16::from(preset.c3))
            .bind(preset.o1)
            .bind(preset.o2)
            .bind(preset.o3)
            .bind(preset.on)
            .bind(preset.main_segment)
            .bind(&preset.colors)
            .bind(&preset.categories)
            .bind(&preset.icon)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or(Error::NotFound(preset.id))?.try_into()
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE presets SET visibility = 'deleted', updated_at = $2 \
             WHERE id = $1 AND visibility <> 'deleted'",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(id));
        }
        Ok(())
    }
}
