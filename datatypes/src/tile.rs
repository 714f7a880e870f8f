use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of a claimed tile. Unique key for a row is
/// `(service_id, x, y, z)`; the one-tile-per-`(service_id, user_id)`
/// invariant applies only to rows not in `Released`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileStage {
    Claimed,
    Submitted,
    Released,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileAssignment {
    pub service_id: String,
    pub user_id: String,
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub stage: TileStage,
    pub created_at: DateTime<Utc>,
    pub data: Option<Value>,
}

impl TileAssignment {
    pub fn new(service_id: impl Into<String>, user_id: impl Into<String>, x: u32, y: u32, z: u32, created_at: DateTime<Utc>) -> Self {
        TileAssignment {
            service_id: service_id.into(),
            user_id: user_id.into(),
            x,
            y,
            z,
            stage: TileStage::Claimed,
            created_at,
            data: None,
        }
    }

    pub fn key(&self) -> (String, u32, u32, u32) {
        (self.service_id.clone(), self.x, self.y, self.z)
    }
}
