//! In-memory `StacSource` and `TaskRealizer` doubles, for exercising
//! `load_collection`/`load_stac` and lazy-stack realisation without a real
//! STAC API or GDAL read behind them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ndarray::{Array2, Array3};
use openeo_raster_datatypes::{BoxError, Image, ReadTask, StacItem, TaskRealizer};
use serde_json::Value;

use crate::source::{ItemQuery, StacSource};

/// A `StacSource` double backed by a fixed collection → items map. Counts
/// calls to `get_items` so retry-policy tests can assert how many attempts
/// actually reached the source.
#[derive(Default)]
pub struct MockStacSource {
    pub collections: Vec<Value>,
    pub items_by_collection: HashMap<String, Vec<StacItem>>,
    pub calls: AtomicUsize,
}

impl MockStacSource {
    pub fn new() -> Self {
        MockStacSource::default()
    }

    pub fn with_items(mut self, collection_id: impl Into<String>, items: Vec<StacItem>) -> Self {
        self.items_by_collection.insert(collection_id.into(), items);
        self
    }
}

#[async_trait]
impl StacSource for MockStacSource {
    async fn get_collections(&self) -> Result<Vec<Value>, BoxError> {
        Ok(self.collections.clone())
    }

    async fn get_collection(&self, collection_id: &str) -> Result<Value, BoxError> {
        self.collections
            .iter()
            .find(|c| c.get("id").and_then(Value::as_str) == Some(collection_id))
            .cloned()
            .ok_or_else(|| format!("unknown collection '{collection_id}'").into())
    }

    async fn get_items(&self, query: &ItemQuery) -> Result<Vec<StacItem>, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut items = Vec::new();
        for collection_id in &query.collections {
            if let Some(found) = self.items_by_collection.get(collection_id) {
                items.extend(found.iter().cloned());
            }
        }
        Ok(items)
    }
}

/// A `TaskRealizer` double that never touches GDAL: every realised `Image`
/// is a constant-filled array of the requested shape, fully unmasked. The
/// cutline mask is likewise all-valid unless `outside_items` names items to
/// treat as falling outside the target footprint.
pub struct MockTaskRealizer {
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    pub fill_value: f64,
    pub outside_items: Vec<String>,
    pub realize_calls: AtomicUsize,
}

impl MockTaskRealizer {
    pub fn new(width: usize, height: usize, bands: usize) -> Self {
        MockTaskRealizer {
            width,
            height,
            bands,
            fill_value: 1.0,
            outside_items: Vec::new(),
            realize_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_fill_value(mut self, value: f64) -> Self {
        self.fill_value = value;
        self
    }

    pub fn with_outside_items(mut self, ids: Vec<String>) -> Self {
        self.outside_items = ids;
        self
    }

    fn is_outside(&self, task: &ReadTask) -> bool {
        task.items.iter().any(|item| self.outside_items.contains(&item.id))
    }
}

#[async_trait]
impl TaskRealizer for MockTaskRealizer {
    async fn realize(&self, task: &ReadTask) -> Result<Image, BoxError> {
        self.realize_calls.fetch_add(1, Ordering::SeqCst);
        let data = Array3::<f64>::from_elem((self.bands, self.height, self.width), self.fill_value);
        let mask = Array3::<bool>::from_elem((self.bands, self.height, self.width), self.is_outside(task));
        let bounds = task
            .items
            .first()
            .map(|item| item.bbox)
            .unwrap_or_else(|| openeo_raster_datatypes::BoundingBox::new(0.0, 0.0, 1.0, 1.0, Default::default()).unwrap());
        Image::new(data, mask, bounds, Default::default()).map_err(|e| Box::new(e) as BoxError)
    }

    async fn cutline_mask(&self, task: &ReadTask) -> Result<Array2<bool>, BoxError> {
        Ok(Array2::<bool>::from_elem(
            (self.height, self.width),
            self.is_outside(task),
        ))
    }
}

impl Default for MockTaskRealizer {
    fn default() -> Self {
        MockTaskRealizer::new(2, 2, 1)
    }
}

pub fn as_realizer(realizer: MockTaskRealizer) -> Arc<dyn TaskRealizer> {
    Arc::new(realizer)
}
