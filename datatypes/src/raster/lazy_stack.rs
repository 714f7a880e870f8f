use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;

use crate::error::{self, Error};
use crate::raster::lazy_image_ref::{BoxError, TargetGeometry, TaskRealizer};
use crate::raster::{Image, LazyImageRef, RasterStack};
use crate::stac::StacItem;

/// One unit of deferred work: "realise this stack entry from these assets of
/// these items". A value type rather than a closure, so the executor can own
/// caching without capturing mutable state inside each task. `items` holds
/// more than one entry when several STAC items share the group's key (the
/// same datetime, per spec.md §4.3 step 5) and must be mosaicked together.
#[derive(Debug, Clone)]
pub struct ReadTask {
    pub key: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub items: Vec<StacItem>,
    pub assets: Vec<String>,
}

enum Slot {
    Realized(Image),
    Skipped,
    Failed(String),
}

/// A raster stack whose entries are realised on first access and cached
/// afterwards. Each key is backed by its own `OnceCell` so concurrent access
/// to distinct keys runs concurrently, and concurrent access to the same key
/// runs the task exactly once.
pub struct LazyRasterStack {
    order: Vec<String>,
    index: HashMap<String, usize>,
    tasks: Vec<ReadTask>,
    cache: Vec<Arc<OnceCell<Slot>>>,
    realizer: Arc<dyn TaskRealizer>,
    allowed_exceptions: Arc<dyn Fn(&BoxError) -> bool + Send + Sync>,
    target: Option<TargetGeometry>,
    realized_count: AtomicUsize,
    /// Tracks, per key, whether an allowed-exception skip has already been
    /// reported once through `get()`. The first access to a skipped key
    /// returns `Ok(None)`; every access after that re-raises `KeyError`,
    /// since a caller re-requesting a key it already learned was empty is
    /// treating this stack as if the key were never there.
    skip_reported: Vec<std::sync::atomic::AtomicBool>,
}

impl LazyRasterStack {
    /// `groups`: ordered `(items, asset_keys)` pairs, as returned from a STAC
    /// search grouped by key (one or more items share a group when they are
    /// mosaicked together, e.g. several items at the same datetime). `key_fn`
    /// derives the stack key (e.g. the item id or a formatted date);
    /// `timestamp_fn` optionally derives a sort timestamp distinct from the
    /// key. `allowed_exceptions` decides whether a read failure should be
    /// skipped silently rather than propagated.
    pub fn new(
        groups: Vec<(Vec<StacItem>, Vec<String>)>,
        key_fn: impl Fn(&[StacItem]) -> String,
        timestamp_fn: Option<impl Fn(&[StacItem]) -> Option<DateTime<Utc>>>,
        allowed_exceptions: Arc<dyn Fn(&BoxError) -> bool + Send + Sync>,
        target: Option<TargetGeometry>,
        realizer: Arc<dyn TaskRealizer>,
    ) -> Self {
        let mut tasks: Vec<ReadTask> = groups
            .into_iter()
            .map(|(items, assets)| {
                let key = key_fn(&items);
                let timestamp = timestamp_fn
                    .as_ref()
                    .and_then(|f| f(&items))
                    .or_else(|| items.first().and_then(|i| i.datetime));
                ReadTask {
                    key,
                    timestamp,
                    items,
                    assets,
                }
            })
            .collect();

        // Stable sort: ties (equal or missing timestamps) keep the caller's
        // original relative order.
        tasks.sort_by_key(|t| t.timestamp.unwrap_or(DateTime::<Utc>::MIN_UTC));

        let order: Vec<String> = tasks.iter().map(|t| t.key.clone()).collect();
        let index: HashMap<String, usize> = order
            .iter()
            .enumerate()
            .map(|(i, k)| (k.clone(), i))
            .collect();
        let cache = (0..tasks.len()).map(|_| Arc::new(OnceCell::new())).collect();
        let skip_reported = (0..tasks.len())
            .map(|_| std::sync::atomic::AtomicBool::new(false))
            .collect();

        LazyRasterStack {
            order,
            index,
            tasks,
            cache,
            realizer,
            allowed_exceptions,
            target,
            realized_count: AtomicUsize::new(0),
            skip_reported,
        }
    }

    /// Number of tasks actually realised so far (tasks skipped because of an
    /// allowed exception are not counted as "not realised" — they did run).
    pub fn realized_count(&self) -> usize {
        self.realized_count.load(Ordering::Relaxed)
    }

    fn slot_for(&self, key: &str) -> Result<(usize, Arc<OnceCell<Slot>>), Error> {
        let idx = *self
            .index
            .get(key)
            .ok_or_else(|| error::KeyError { key }.build())?;
        Ok((idx, Arc::clone(&self.cache[idx])))
    }

    /// Realises exactly one task (at most once, cached thereafter) and
    /// returns a clone of the image, or `None` if the read failed with an
    /// allowed exception. Returns an owned value rather than a reference
    /// because the cache cell realising it is reached through a cloned
    /// `Arc`, not through `&self` directly.
    pub async fn get(&self, key: &str) -> Result<Option<Image>, Error> {
        let (idx, cell) = self.slot_for(key)?;
        let task = &self.tasks[idx];
        let realizer = Arc::clone(&self.realizer);
        let allowed = Arc::clone(&self.allowed_exceptions);
        let realized_count = &self.realized_count;
        let slot = cell
            .get_or_init(|| async move {
                match realizer.realize(task).await {
                    Ok(image) => {
                        realized_count.fetch_add(1, Ordering::Relaxed);
                        Slot::Realized(image)
                    }
                    Err(err) if allowed(&err) => {
                        realized_count.fetch_add(1, Ordering::Relaxed);
                        Slot::Skipped
                    }
                    Err(err) => {
                        realized_count.fetch_add(1, Ordering::Relaxed);
                        Slot::Failed(err.to_string())
                    }
                }
            })
            .await;
        match slot {
            Slot::Realized(image) => Ok(Some(image.clone())),
            Slot::Skipped => {
                if self.skip_reported[idx].swap(true, Ordering::Relaxed) {
                    error::KeyError { key }.fail()
                } else {
                    Ok(None)
                }
            }
            Slot::Failed(message) => error::TaskRealizationFailed { key, message: message.clone() }.fail(),
        }
    }

    /// Whether `err` is one `get()`/the caller should treat as a silent skip
    /// rather than a fatal failure, per this stack's `allowed_exceptions`
    /// predicate. Lets callers that bypass `get()` (e.g. the `lazy_ref()`
    /// path, which realises directly through the `TaskRealizer` to reach the
    /// cutline-optimised code path) apply the same filtering `get()` does.
    pub fn is_allowed_exception(&self, err: &BoxError) -> bool {
        (self.allowed_exceptions)(err)
    }

    pub fn lazy_ref(&self, key: &str) -> Result<Option<LazyImageRef>, Error> {
        let (idx, _) = self.slot_for(key)?;
        let Some(target) = &self.target else {
            return Ok(None);
        };
        let task = self.tasks[idx].clone();
        Ok(Some(LazyImageRef::new(
            task.clone(),
            &task.items,
            target,
            Arc::clone(&self.realizer),
        )))
    }

    pub fn has_target_geometry(&self) -> bool {
        self.target.is_some()
    }
}

impl RasterStack for LazyRasterStack {
    fn keys(&self) -> Vec<String> {
        self.order.clone()
    }
}
