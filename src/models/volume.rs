use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::state::LifecycleState;

pub const MIN_VOLUME_GB: i32 = 10;
pub const MAX_VOLUME_GB: i32 = 1000;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Volume {
    pub id: Uuid,
    pub name: String,
    pub provider: String,
    /// Resource id on the provider side, assigned once created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    pub region: String,
    pub size_gb: i32,
    pub status: LifecycleState,
    pub error_message: Option<String>,
    pub description: Option<String>,
    #[serde(skip)]
    pub in_use_count: i32,
    pub created_at: DateTime<Utc>,
}

impl Volume {
    pub fn in_use(&self) -> bool {
        self.in_use_count > 0
    }
}

// `in_use` is derived from the reference count, so serialization goes
// through a dedicated wire struct.
#[derive(Debug, Serialize)]
pub struct VolumeView {
    #[serde(flatten)]
    pub volume: Volume,
    pub in_use: bool,
}

impl From<Volume> for VolumeView {
    fn from(volume: Volume) -> Self {
        let in_use = volume.in_use();
        VolumeView { volume, in_use }
    }
}

#[derive(Debug, Deserialize)]
pub struct VolumeCreateRequest {
    pub name: String,
    pub provider: String,
    pub region: String,
    pub size: i32,
    #[serde(default)]
    pub description: Option<String>,
    /// Opaque provider credentials used to create the block volume.
    pub provider_config: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct VolumeCreateResponse {
    pub name: String,
    pub status: LifecycleState,
}
