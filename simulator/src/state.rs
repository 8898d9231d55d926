use serde::{Deserialize, Serialize};

/// State payload pushed to `POST /api/v1/devices/{id}/state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatePayload {
    pub on: bool,
    pub bri: u8,
    pub last_state_update: String,
}
