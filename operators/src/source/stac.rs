//! The STAC item source contract and the query-building/retry logic that
//! sits in front of it. The source itself — the HTTP client that actually
//! talks to a STAC API — is an external collaborator (spec.md §6); this
//! module only shapes the query and governs how failures are retried.

use std::time::Duration;

use async_trait::async_trait;
use openeo_raster_datatypes::{BoundingBox, SpatialReference, StacItem, TemporalInterval};
use serde_json::Value;

use crate::error::{self, Error};
use crate::source::cql2::properties_to_cql2;

/// Default STAC field projection requested for every item search: enough to
/// drive dimension estimation and asset reads without the extra weight of
/// a full item document.
pub const DEFAULT_FIELDS: &[&str] = &[
    "assets",
    "id",
    "bbox",
    "collection",
    "properties",
    "type",
    "stac_version",
];

#[derive(Debug, Clone, Default)]
pub struct ItemQuery {
    pub collections: Vec<String>,
    pub bbox: Option<[f64; 4]>,
    pub datetime: Option<String>,
    pub filter: Option<Value>,
    pub fields: Vec<String>,
    pub limit: usize,
    pub max_items: usize,
}

/// External collaborator: a STAC API client. Implementations are expected
/// to pool their own HTTP connections (spec.md §5).
#[async_trait]
pub trait StacSource: Send + Sync {
    async fn get_collections(&self) -> Result<Vec<Value>, Box<dyn std::error::Error + Send + Sync>>;

    async fn get_collection(
        &self,
        collection_id: &str,
    ) -> Result<Value, Box<dyn std::error::Error + Send + Sync>>;

    async fn get_items(
        &self,
        query: &ItemQuery,
    ) -> Result<Vec<StacItem>, Box<dyn std::error::Error + Send + Sync>>;
}

/// Builds the item query `load_collection` issues against a `StacSource`:
/// reprojects `spatial_extent` to WGS84 when needed, renders `temporal_extent`
/// to STAC's `start/end` datetime string, and translates `properties` to
/// CQL2-JSON (spec.md §4.3 step 1, §4.4).
pub fn build_item_query(
    collection_id: &str,
    spatial_extent: Option<&BoundingBox>,
    temporal_extent: Option<&TemporalInterval>,
    properties: Option<&serde_json::Map<String, Value>>,
    named_parameters: &serde_json::Map<String, Value>,
    limit: usize,
    max_items: usize,
) -> Result<ItemQuery, Error> {
    let bbox = spatial_extent.map(to_wgs84_array).transpose()?;

    let datetime = match temporal_extent {
        Some(interval) => {
            let range = interval.to_range_string();
            if interval.is_open_start() && interval.is_open_end() {
                return error::TemporalExtentEmpty { extent: range }.fail();
            }
            Some(range)
        }
        None => None,
    };

    let filter = properties.map(|p| properties_to_cql2(p, named_parameters));

    Ok(ItemQuery {
        collections: vec![collection_id.to_string()],
        bbox,
        datetime,
        filter,
        fields: DEFAULT_FIELDS.iter().map(|s| s.to_string()).collect(),
        limit,
        max_items,
    })
}

fn to_wgs84_array(bbox: &BoundingBox) -> Result<[f64; 4], Error> {
    if bbox.crs.is_wgs84() {
        return Ok([bbox.west, bbox.south, bbox.east, bbox.north]);
    }
    use gdal::spatial_ref::{CoordTransform, SpatialRef};

    let to_srs = |crs: &SpatialReference| -> Result<SpatialRef, Error> {
        match crs {
            SpatialReference::Epsg(code) => SpatialRef::from_epsg(*code),
            SpatialReference::Wkt(wkt) => SpatialRef::from_wkt(wkt),
        }
        .map_err(|e| error::AssetRead { source: Box::new(e) as _ }.build())
    };
    let src = to_srs(&bbox.crs)?;
    let dst = to_srs(&SpatialReference::WGS84)?;
    let transform = CoordTransform::new(&src, &dst)
        .map_err(|e| error::AssetRead { source: Box::new(e) as _ }.build())?;
    let mut xs = [bbox.west, bbox.east];
    let mut ys = [bbox.south, bbox.north];
    let mut zs = [0.0, 0.0];
    transform
        .transform_coords(&mut xs, &mut ys, &mut zs)
        .map_err(|e| error::AssetRead { source: Box::new(e) as _ }.build())?;
    Ok([xs[0].min(xs[1]), ys[0].min(ys[1]), xs[0].max(xs[1]), ys[0].max(ys[1])])
}

/// Calls `source.get_items` with bounded retries and exponential backoff
/// (spec.md §6/§7's "STAC / network errors ... bounded retries with
/// backoff"). Retries any error the source reports; callers decide what
/// counts as fatal by the `max_attempts`/`base_delay` they pass in.
pub async fn get_items_with_retry(
    source: &dyn StacSource,
    query: &ItemQuery,
    max_attempts: u32,
    base_delay: Duration,
) -> Result<Vec<StacItem>, Error> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match source.get_items(query).await {
            Ok(items) => return Ok(items),
            Err(_) if attempt < max_attempts => {
                tokio::time::sleep(base_delay * 2u32.pow(attempt - 1)).await;
                continue;
            }
            Err(err) => {
                return error::StacSource { attempts: attempt, source: err }.fail();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn builds_datetime_range_string() {
        let interval =
            TemporalInterval::parse("2021-01-01T00:00:00Z/2021-02-01T00:00:00Z").unwrap();
        let query =
            build_item_query("sentinel-2", None, Some(&interval), None, &serde_json::Map::new(), 100, 100).unwrap();
        let datetime = query.datetime.unwrap();
        assert!(datetime.starts_with("2021-01-01"));
        assert!(datetime.ends_with("2021-02-01T00:00:00+00:00"));
    }

    #[test]
    fn translates_properties_into_filter() {
        let mut properties = serde_json::Map::new();
        properties.insert("platform".to_string(), serde_json::json!("Sentinel-2"));
        let query = build_item_query(
            "sentinel-2",
            None,
            None,
            Some(&properties),
            &serde_json::Map::new(),
            100,
            100,
        )
        .unwrap();
        assert!(query.filter.is_some());
    }

    #[test]
    fn resolves_from_parameter_reference_in_properties() {
        let mut properties = serde_json::Map::new();
        properties.insert(
            "cloud_cover".to_string(),
            serde_json::json!({
                "process_graph": {
                    "n": {
                        "process_id": "lt",
                        "arguments": {
                            "x": {"from_parameter": "value"},
                            "y": {"from_parameter": "cloud_cover"},
                        },
                    },
                },
            }),
        );
        let mut named_parameters = serde_json::Map::new();
        named_parameters.insert("cloud_cover".to_string(), serde_json::json!(20));
        let query =
            build_item_query("sentinel-2", None, None, Some(&properties), &named_parameters, 100, 100).unwrap();
        assert_eq!(
            query.filter,
            Some(serde_json::json!({"op": "<", "args": [{"property": "cloud_cover"}, 20]}))
        );
    }

    struct FlakySource {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StacSource for FlakySource {
        async fn get_collections(&self) -> Result<Vec<Value>, Box<dyn std::error::Error + Send + Sync>> {
            Ok(vec![])
        }

        async fn get_collection(
            &self,
            _collection_id: &str,
        ) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
            Ok(Value::Null)
        }

        async fn get_items(
            &self,
            _query: &ItemQuery,
        ) -> Result<Vec<StacItem>, Box<dyn std::error::Error + Send + Sync>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err("temporary failure".into())
            } else {
                Ok(vec![])
            }
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let source = FlakySource { failures: 2, calls: AtomicUsize::new(0) };
        let query = ItemQuery::default();
        let result = get_items_with_retry(&source, &query, 5, Duration::from_millis(1)).await;
        assert!(result.is_ok());
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let source = FlakySource { failures: 10, calls: AtomicUsize::new(0) };
        let query = ItemQuery::default();
        let result = get_items_with_retry(&source, &query, 3, Duration::from_millis(1)).await;
        assert!(matches!(result, Err(Error::StacSource { attempts: 3, .. })));
    }
}
