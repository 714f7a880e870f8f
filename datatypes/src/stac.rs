use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::primitives::BoundingBox;

/// A single STAC asset: an href plus the bits of its proj extension the
/// reader needs to window and warp without a second round-trip to the
/// catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub href: String,
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(rename = "proj:transform", default)]
    pub proj_transform: Option<[f64; 6]>,
    #[serde(rename = "proj:shape", default)]
    pub proj_shape: Option<[usize; 2]>,
    #[serde(rename = "proj:epsg", default)]
    pub proj_epsg: Option<u32>,
}

/// A STAC item, trimmed to the fields this system actually reads: its
/// geometry (for cutline rasterisation), bbox, datetime, assets and the
/// properties CQL2 filtering runs against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StacItem {
    pub id: String,
    pub bbox: BoundingBox,
    pub datetime: Option<DateTime<Utc>>,
    pub geometry: Option<Value>,
    pub assets: HashMap<String, Asset>,
    #[serde(default)]
    pub properties: HashMap<String, Value>,
    #[serde(default = "default_stac_version")]
    pub stac_version: String,
}

fn default_stac_version() -> String {
    "1.0.0".to_string()
}

impl StacItem {
    pub fn asset(&self, key: &str) -> Option<&Asset> {
        self.assets.get(key)
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}
