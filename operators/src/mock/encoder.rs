//! A `RasterEncoder` double that records every call instead of producing
//! real image bytes, for asserting `save_result`'s dispatch logic without a
//! PNG/JPEG/GeoTIFF writer behind it.

use std::sync::Mutex;

use openeo_raster_datatypes::Image;
use serde_json::{Map, Value};

use crate::save_result::{BoxError, RasterEncoder};

#[derive(Debug, Clone)]
pub struct EncodeCall {
    pub format: String,
    pub bands: usize,
    pub width: usize,
    pub height: usize,
}

/// Returns bytes shaped `"<format>:<bands>x<height>x<width>"`, deterministic
/// and cheap to assert on, and keeps a log of every call it served.
#[derive(Default)]
pub struct MockRasterEncoder {
    calls: Mutex<Vec<EncodeCall>>,
}

impl MockRasterEncoder {
    pub fn new() -> Self {
        MockRasterEncoder::default()
    }

    pub fn calls(&self) -> Vec<EncodeCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl RasterEncoder for MockRasterEncoder {
    fn encode(&self, image: &Image, format: &str, _options: &Map<String, Value>) -> Result<Vec<u8>, BoxError> {
        let call = EncodeCall {
            format: format.to_string(),
            bands: image.bands(),
            width: image.width(),
            height: image.height(),
        };
        let bytes = format!("{}:{}x{}x{}", call.format, call.bands, call.height, call.width).into_bytes();
        self.calls.lock().unwrap().push(call);
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array3;
    use openeo_raster_datatypes::{BoundingBox, SpatialReference};

    use super::*;

    #[test]
    fn records_every_call() {
        let encoder = MockRasterEncoder::new();
        let data = Array3::<f64>::zeros((1, 2, 2));
        let mask = Array3::<bool>::from_elem((1, 2, 2), false);
        let bounds = BoundingBox::new(0.0, 0.0, 1.0, 1.0, SpatialReference::WGS84).unwrap();
        let image = Image::new(data, mask, bounds, SpatialReference::WGS84).unwrap();

        encoder.encode(&image, "png", &Map::new()).unwrap();
        encoder.encode(&image, "gtiff", &Map::new()).unwrap();

        let calls = encoder.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].format, "png");
        assert_eq!(calls[1].format, "gtiff");
    }
}
