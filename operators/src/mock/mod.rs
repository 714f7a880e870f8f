//! Test doubles for the core's external collaborators — `StacSource`,
//! `TaskRealizer`, `RasterEncoder`, `Reducer` — mirroring the teacher's
//! `mock/source` convention: in-memory stand-ins for integration-style
//! tests, never production HTTP/GDAL/encoder clients. The tile-assignment
//! store's own in-memory implementation (`tile_assignment::InMemoryTileStore`)
//! already serves this role for that collaborator.

mod encoder;
mod reducer;
mod source;

pub use encoder::{EncodeCall, MockRasterEncoder};
pub use reducer::MockReducer;
pub use source::{as_realizer, MockStacSource, MockTaskRealizer};

/// End-to-end pipelines stitched from the doubles above, proving the pieces
/// fit together the way a real request does: a lazily-realised stack, fed
/// through a mosaic, encoded by a format-dispatching `save_result` call.
/// `load_collection` itself always wires a real `GdalAssetReader`, so these
/// tests build the `LazyRasterStack` directly instead, the same way
/// `load_collection` does internally (spec.md §8, scenario S1).
#[cfg(test)]
mod integration_tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use openeo_raster_datatypes::{
        Asset, BoundingBox, LazyRasterStack, SpatialReference, StacItem, TargetGeometry,
    };
    use serde_json::Map;

    use super::*;
    use crate::engine::param::StackValue;
    use crate::processing::{mosaic_stack, PixelSelectionMethod};
    use crate::save_result::{save_result, SaveResultInput};

    fn stac_item(id: &str) -> StacItem {
        let mut assets = HashMap::new();
        assets.insert(
            "data".to_string(),
            Asset {
                href: format!("mock://{id}"),
                media_type: None,
                roles: vec![],
                proj_transform: None,
                proj_shape: None,
                proj_epsg: None,
            },
        );
        StacItem {
            id: id.to_string(),
            bbox: BoundingBox::new(16.0, 47.0, 17.0, 48.0, SpatialReference::WGS84).unwrap(),
            datetime: None,
            geometry: None,
            assets,
            properties: HashMap::new(),
            stac_version: "1.0.0".to_string(),
        }
    }

    fn lazy_stack_of(realizer: Arc<dyn openeo_raster_datatypes::TaskRealizer>, width: usize, height: usize) -> LazyRasterStack {
        let bounds = BoundingBox::new(16.0, 47.0, 17.0, 48.0, SpatialReference::WGS84).unwrap();
        let target = TargetGeometry {
            width,
            height,
            bounds,
            crs: SpatialReference::WGS84,
            band_names: Some(vec!["data".to_string()]),
        };
        let groups = vec![(vec![stac_item("a")], vec!["data".to_string()])];
        LazyRasterStack::new(
            groups,
            |items: &[StacItem]| items.first().map(|i| i.id.clone()).unwrap_or_default(),
            None::<fn(&[StacItem]) -> Option<chrono::DateTime<chrono::Utc>>>,
            Arc::new(|_: &openeo_raster_datatypes::BoxError| false),
            Some(target),
            realizer,
        )
    }

    #[tokio::test]
    async fn single_tile_png_round_trip() {
        let realizer = as_realizer(MockTaskRealizer::new(4, 4, 1));
        let lazy = lazy_stack_of(realizer, 4, 4);
        let stack = StackValue::Lazy(Arc::new(lazy));

        let mosaicked = mosaic_stack(&stack, PixelSelectionMethod::First).await.unwrap();

        let encoder = MockRasterEncoder::new();
        let result = save_result(
            SaveResultInput::Image(mosaicked),
            "png",
            &Map::new(),
            &encoder,
        )
        .unwrap();

        assert_eq!(result.media_type, "image/png");
        let calls = encoder.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].format, "png");
        assert_eq!((calls[0].bands, calls[0].height, calls[0].width), (1, 4, 4));
    }

    #[tokio::test]
    async fn tiles_outside_footprint_stay_masked_through_the_mosaic() {
        let realizer = as_realizer(MockTaskRealizer::new(2, 2, 1).with_outside_items(vec!["a".to_string()]));
        let lazy = lazy_stack_of(realizer, 2, 2);
        let stack = StackValue::Lazy(Arc::new(lazy));

        let mosaicked = mosaic_stack(&stack, PixelSelectionMethod::First).await.unwrap();
        assert!(mosaicked.mask.iter().all(|m| *m));
    }
}
