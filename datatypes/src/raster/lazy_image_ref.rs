use std::sync::Arc;

use async_trait::async_trait;
use ndarray::Array2;
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::primitives::{BoundingBox, SpatialReference};
use crate::raster::Image;
use crate::stac::StacItem;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Collaborator that turns a `ReadTask` into pixel data or, cheaply, into a
/// rasterised footprint mask. Implemented by the asset reader in the
/// operators crate; kept generic here so this crate stays free of I/O and
/// GDAL concerns.
#[async_trait]
pub trait TaskRealizer: Send + Sync {
    async fn realize(&self, task: &super::ReadTask) -> Result<Image, BoxError>;

    /// Rasterises the item's footprint against the target grid without
    /// reading any pixel bytes. `true` = outside the footprint.
    async fn cutline_mask(&self, task: &super::ReadTask) -> Result<Array2<bool>, BoxError>;
}

/// The grid a `LazyRasterStack` realises images onto, shared by every entry.
#[derive(Debug, Clone)]
pub struct TargetGeometry {
    pub width: usize,
    pub height: usize,
    pub bounds: BoundingBox,
    pub crs: SpatialReference,
    pub band_names: Option<Vec<String>>,
}

/// A handle to a not-yet-realised image. Exposes enough of the item to
/// drive the aggregated-cutline optimisation (`cutline_mask`) without
/// forcing a read, and `realize()` to force one when needed.
pub struct LazyImageRef {
    pub key: String,
    pub geometry: Option<Value>,
    pub width: usize,
    pub height: usize,
    pub bounds: BoundingBox,
    pub crs: SpatialReference,
    pub band_names: Option<Vec<String>>,
    pub count: usize,
    task: super::ReadTask,
    realizer: Arc<dyn TaskRealizer>,
    cutline_cache: OnceCell<Array2<bool>>,
}

impl LazyImageRef {
    pub(crate) fn new(
        task: super::ReadTask,
        items: &[StacItem],
        target: &TargetGeometry,
        realizer: Arc<dyn TaskRealizer>,
    ) -> Self {
        let count = target
            .band_names
            .as_ref()
            .map(|names| names.len())
            .unwrap_or(task.assets.len());
        LazyImageRef {
            key: task.key.clone(),
            geometry: items.first().and_then(|item| item.geometry.clone()),
            width: target.width,
            height: target.height,
            bounds: target.bounds,
            crs: target.crs.clone(),
            band_names: target.band_names.clone(),
            count,
            task,
            realizer,
            cutline_cache: OnceCell::new(),
        }
    }

    /// Computes (and caches) the rasterised footprint of this entry. Cheap:
    /// it never fetches pixel bytes.
    pub async fn cutline_mask(&self) -> Result<&Array2<bool>, BoxError> {
        self.cutline_cache
            .get_or_try_init(|| self.realizer.cutline_mask(&self.task))
            .await
    }

    pub async fn realize(&self) -> Result<Image, BoxError> {
        self.realizer.realize(&self.task).await
    }

    pub fn task(&self) -> &super::ReadTask {
        &self.task
    }
}

impl std::fmt::Debug for LazyImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyImageRef")
            .field("key", &self.key)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("count", &self.count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ndarray::Array3;

    use super::*;
    use crate::raster::ReadTask;

    struct CountingRealizer {
        realize_calls: AtomicUsize,
        cutline_calls: AtomicUsize,
        outside: bool,
    }

    impl CountingRealizer {
        fn new(outside: bool) -> Self {
            CountingRealizer {
                realize_calls: AtomicUsize::new(0),
                cutline_calls: AtomicUsize::new(0),
                outside,
            }
        }
    }

    #[async_trait]
    impl TaskRealizer for CountingRealizer {
        async fn realize(&self, task: &super::super::ReadTask) -> Result<Image, BoxError> {
            self.realize_calls.fetch_add(1, Ordering::SeqCst);
            let data = Array3::<f64>::zeros((1, 1, 1));
            let mask = Array3::<bool>::from_elem((1, 1, 1), false);
            Image::new(data, mask, task.items[0].bbox, SpatialReference::WGS84)
                .map_err(|e| Box::new(e) as BoxError)
        }

        async fn cutline_mask(&self, _task: &super::super::ReadTask) -> Result<Array2<bool>, BoxError> {
            self.cutline_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Array2::from_elem((1, 1), self.outside))
        }
    }

    fn item(id: &str) -> StacItem {
        StacItem {
            id: id.to_string(),
            bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0, SpatialReference::WGS84).unwrap(),
            datetime: None,
            geometry: None,
            assets: HashMap::new(),
            properties: HashMap::new(),
            stac_version: "1.0.0".to_string(),
        }
    }

    fn lazy_ref(realizer: Arc<CountingRealizer>) -> LazyImageRef {
        let items = vec![item("a")];
        let task = ReadTask {
            key: "a".to_string(),
            timestamp: None,
            items: items.clone(),
            assets: vec!["data".to_string()],
        };
        let target = TargetGeometry {
            width: 1,
            height: 1,
            bounds: item("a").bbox,
            crs: SpatialReference::WGS84,
            band_names: Some(vec!["data".to_string()]),
        };
        LazyImageRef::new(task, &items, &target, realizer)
    }

    #[tokio::test]
    async fn cutline_mask_is_cached_after_first_call() {
        let realizer = Arc::new(CountingRealizer::new(false));
        let lazy = lazy_ref(Arc::clone(&realizer));

        lazy.cutline_mask().await.unwrap();
        lazy.cutline_mask().await.unwrap();

        assert_eq!(realizer.cutline_calls.load(Ordering::SeqCst), 1);
        assert_eq!(realizer.realize_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cutline_mask_reports_outside_footprint() {
        let realizer = Arc::new(CountingRealizer::new(true));
        let lazy = lazy_ref(realizer);

        let mask = lazy.cutline_mask().await.unwrap();
        assert!(mask[[0, 0]]);
    }

    #[tokio::test]
    async fn realize_invokes_the_realizer_each_call() {
        let realizer = Arc::new(CountingRealizer::new(false));
        let lazy = lazy_ref(Arc::clone(&realizer));

        lazy.realize().await.unwrap();
        lazy.realize().await.unwrap();

        assert_eq!(realizer.realize_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn count_falls_back_to_asset_count_without_band_names() {
        let items = vec![item("a")];
        let task = ReadTask {
            key: "a".to_string(),
            timestamp: None,
            items: items.clone(),
            assets: vec!["red".to_string(), "green".to_string()],
        };
        let target = TargetGeometry {
            width: 1,
            height: 1,
            bounds: item("a").bbox,
            crs: SpatialReference::WGS84,
            band_names: None,
        };
        let realizer = Arc::new(CountingRealizer::new(false));
        let lazy = LazyImageRef::new(task, &items, &target, realizer);
        assert_eq!(lazy.count, 2);
    }
}
