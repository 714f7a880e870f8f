//! `save_result`: renders a data cube or plain value into a byte blob of a
//! requested media type (spec.md §4.7). Byte-format raster encoding itself
//! is an external collaborator (`RasterEncoder`); this module shapes the
//! input, picks the media type, and handles the non-raster formats
//! directly.

use std::collections::HashMap;

use openeo_raster_datatypes::{BoundingBox, EagerRasterStack, Image, RasterStack, SpatialReference};
use serde_json::{Map, Value};

use crate::error::{self, Error};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The rendered output `save_result` returns: raw bytes plus the media type
/// they were encoded as.
#[derive(Debug, Clone)]
pub struct SavedResult {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

/// What `save_result` was handed: either a plain JSON value (a dict, scalar,
/// or GeoJSON FeatureCollection) or realised raster data.
pub enum SaveResultInput {
    Json(Value),
    Image(Image),
    Stack(EagerRasterStack),
}

/// External collaborator: turns a realised `Image` into format-specific
/// bytes (PNG/JPEG/GeoTIFF encoding). Implemented outside this crate; see
/// spec.md §6.
pub trait RasterEncoder: Send + Sync {
    fn encode(&self, image: &Image, format: &str, options: &Map<String, Value>) -> Result<Vec<u8>, BoxError>;
}

/// The media type a recognised `format` string maps to; an unrecognised
/// format falls back to `application/<format>` (spec.md §6).
pub fn media_type_for_format(format: &str) -> String {
    match format.to_lowercase().as_str() {
        "txt" | "plain" => "text/plain".to_string(),
        "json" | "geojson" | "metajson" => "application/json".to_string(),
        "csv" => "text/csv".to_string(),
        "png" => "image/png".to_string(),
        "jpeg" | "jpg" => "image/jpeg".to_string(),
        "gtiff" | "tiff" => "image/tiff".to_string(),
        other => format!("application/{other}"),
    }
}

fn is_byte_format(format: &str) -> bool {
    matches!(format, "png" | "jpeg" | "jpg")
}

fn is_gtiff_format(format: &str) -> bool {
    matches!(format, "gtiff" | "tiff")
}

/// Rounds and clamps `image`'s pixel data into `[0, 255]`, keeping the mask
/// untouched, the cast byte-format encoders expect (spec.md §4.7).
fn cast_to_uint8(image: &Image) -> Image {
    let data = image.data.mapv(|v| v.round().clamp(0.0, 255.0));
    Image {
        data,
        mask: image.mask.clone(),
        bounds: image.bounds,
        crs: image.crs.clone(),
        band_names: image.band_names.clone(),
        band_stats: image.band_stats.clone(),
        cutline_mask: image.cutline_mask.clone(),
        metadata: image.metadata.clone(),
    }
}

fn render_image(
    image: &Image,
    format: &str,
    options: &Map<String, Value>,
    encoder: &dyn RasterEncoder,
) -> Result<SavedResult, Error> {
    if format == "metajson" {
        let bytes = serde_json::to_vec(&image.metadata)
            .map_err(|e| error::Unexpected { message: e.to_string() }.build())?;
        return Ok(SavedResult { bytes, media_type: media_type_for_format(format) });
    }

    let rendered = if is_byte_format(format) {
        cast_to_uint8(image)
    } else {
        image.clone()
    };

    let bytes = encoder
        .encode(&rendered, format, options)
        .map_err(|e| error::AssetRead { source: e }.build())?;
    Ok(SavedResult { bytes, media_type: media_type_for_format(format) })
}

/// Concatenates every entry of `stack` along the band axis into a single
/// multi-band `Image`, band names taken from the stack's keys. Requires
/// every entry to share shape, bounds and CRS (spec.md §4.7).
fn combine_bands(stack: &EagerRasterStack) -> Result<Image, Error> {
    let mut keys = stack.keys().into_iter();
    let first_key = keys.next().ok_or_else(|| {
        error::ProcessParameterInvalid {
            process_id: "save_result",
            parameter: "data".to_string(),
            reason: "raster stack is empty".to_string(),
        }
        .build()
    })?;
    let first = stack.get(&first_key)?;
    let shape = (first.height(), first.width());

    let mut bands = Vec::new();
    let mut masks = Vec::new();
    let mut band_names = Vec::new();
    for key in std::iter::once(first_key).chain(keys) {
        let image = stack.get(&key)?;
        if (image.height(), image.width()) != shape {
            return error::ProcessParameterInvalid {
                process_id: "save_result",
                parameter: "data",
                reason: "all entries in the stack must share the same shape".to_string(),
            }
            .fail();
        }
        if image.bounds != first.bounds {
            return error::ProcessParameterInvalid {
                process_id: "save_result",
                parameter: "data",
                reason: "all entries in the stack must share the same bounds".to_string(),
            }
            .fail();
        }
        if image.crs != first.crs {
            return error::ProcessParameterInvalid {
                process_id: "save_result",
                parameter: "data",
                reason: "all entries in the stack must share the same CRS".to_string(),
            }
            .fail();
        }
        for band in 0..image.bands() {
            bands.push(image.data.index_axis(ndarray::Axis(0), band).to_owned());
            masks.push(image.mask.index_axis(ndarray::Axis(0), band).to_owned());
        }
        band_names.push(key);
    }

    let data_views: Vec<_> = bands.iter().map(ndarray::ArrayView2::from).collect();
    let data = ndarray::stack(ndarray::Axis(0), &data_views)
        .map_err(|e| error::Unexpected { message: e.to_string() }.build())?;
    let mask_views: Vec<_> = masks.iter().map(ndarray::ArrayView2::from).collect();
    let mask = ndarray::stack(ndarray::Axis(0), &mask_views)
        .map_err(|e| error::Unexpected { message: e.to_string() }.build())?;
    Image::new(data, mask, first.bounds, first.crs.clone())?
        .with_band_names(band_names)
        .map_err(Error::from)
}

fn stringify_json(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn handle_text(value: &Value) -> SavedResult {
    let text = match value {
        Value::Object(map) => {
            let stringified: HashMap<&String, String> =
                map.iter().map(|(k, v)| (k, stringify_json(v))).collect();
            format!("{stringified:?}")
        }
        other => stringify_json(other),
    };
    SavedResult { bytes: text.into_bytes(), media_type: "text/plain".to_string() }
}

fn handle_json(value: &Value) -> Result<SavedResult, Error> {
    let bytes = serde_json::to_vec(value).map_err(|e| error::Unexpected { message: e.to_string() }.build())?;
    Ok(SavedResult { bytes, media_type: "application/json".to_string() })
}

fn is_feature_collection(value: &Value) -> bool {
    value.get("type").and_then(Value::as_str) == Some("FeatureCollection")
}

/// Renders a GeoJSON `FeatureCollection`'s per-feature `properties.values`
/// (a `{date: value}` map) as CSV columns `date, feature_index, value`
/// (spec.md §4.7).
fn handle_geojson_csv(value: &Value) -> Result<SavedResult, Error> {
    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    writer
        .write_record(["date", "feature_index", "value"])
        .map_err(|e| error::Unexpected { message: e.to_string() }.build())?;

    let features = value.get("features").and_then(Value::as_array).cloned().unwrap_or_default();
    for (index, feature) in features.iter().enumerate() {
        let values = feature
            .get("properties")
            .and_then(|p| p.get("values"))
            .and_then(Value::as_object);
        if let Some(values) = values {
            for (date, v) in values {
                let index_str = index.to_string();
                let value_str = stringify_json(v);
                writer
                    .write_record([date.as_str(), index_str.as_str(), value_str.as_str()])
                    .map_err(|e| error::Unexpected { message: e.to_string() }.build())?;
            }
        }
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| error::Unexpected { message: e.to_string() }.build())?;
    Ok(SavedResult { bytes, media_type: "text/csv".to_string() })
}

/// Renders `data` as `format`, dispatching to the text/JSON/CSV handling
/// this module owns directly, or to `encoder` for raster formats
/// (spec.md §4.7).
pub fn save_result(
    data: SaveResultInput,
    format: &str,
    options: &Map<String, Value>,
    encoder: &dyn RasterEncoder,
) -> Result<SavedResult, Error> {
    let format_lower = format.to_lowercase();

    if matches!(format_lower.as_str(), "txt" | "plain") {
        let value = match &data {
            SaveResultInput::Json(v) => v.clone(),
            SaveResultInput::Image(_) | SaveResultInput::Stack(_) => {
                return error::ProcessParameterInvalid {
                    process_id: "save_result",
                    parameter: "format",
                    reason: "text format requires a scalar or dict result, not a raster".to_string(),
                }
                .fail();
            }
        };
        return Ok(handle_text(&value));
    }

    if let SaveResultInput::Json(value) = &data {
        if is_feature_collection(value) {
            return match format_lower.as_str() {
                "json" | "geojson" => handle_json(value),
                "csv" => handle_geojson_csv(value),
                other => error::ProcessParameterInvalid {
                    process_id: "save_result",
                    parameter: "format",
                    reason: format!("GeoJSON FeatureCollection only supports json or csv, not '{other}'"),
                }
                .fail(),
            };
        }
        if matches!(format_lower.as_str(), "json" | "geojson") {
            return handle_json(value);
        }
        return error::ProcessParameterInvalid {
            process_id: "save_result",
            parameter: "format",
            reason: format!("non-raster data cannot be saved as '{format_lower}'"),
        }
        .fail();
    }

    match data {
        SaveResultInput::Image(image) => render_image(&image, &format_lower, options, encoder),
        SaveResultInput::Stack(stack) => {
            if stack.len() == 1 {
                let key = stack.keys().into_iter().next().unwrap();
                let image = stack.get(&key)?;
                render_image(image, &format_lower, options, encoder)
            } else if is_gtiff_format(&format_lower) {
                let combined = combine_bands(&stack)?;
                render_image(&combined, &format_lower, options, encoder)
            } else {
                error::ProcessParameterInvalid {
                    process_id: "save_result",
                    parameter: "data",
                    reason: format!(
                        "a stack of {} entries can only be saved as gtiff, not '{format_lower}'",
                        stack.len()
                    ),
                }
                .fail()
            }
        }
        SaveResultInput::Json(_) => unreachable!("handled above"),
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array3;

    use super::*;

    struct StubEncoder;
    impl RasterEncoder for StubEncoder {
        fn encode(&self, image: &Image, format: &str, _options: &Map<String, Value>) -> Result<Vec<u8>, BoxError> {
            Ok(format!("{format}:{}x{}", image.width(), image.height()).into_bytes())
        }
    }

    fn sample_image(bands: usize) -> Image {
        let data = Array3::<f64>::from_elem((bands, 2, 2), 300.0);
        let mask = Array3::<bool>::from_elem((bands, 2, 2), false);
        let bounds = BoundingBox::new(0.0, 0.0, 1.0, 1.0, SpatialReference::WGS84).unwrap();
        Image::new(data, mask, bounds, SpatialReference::WGS84).unwrap()
    }

    #[test]
    fn text_format_stringifies_scalar() {
        let result =
            save_result(SaveResultInput::Json(Value::from(42)), "txt", &Map::new(), &StubEncoder).unwrap();
        assert_eq!(result.media_type, "text/plain");
        assert_eq!(result.bytes, b"42");
    }

    #[test]
    fn json_format_serialises_dict() {
        let value = serde_json::json!({"a": 1});
        let result =
            save_result(SaveResultInput::Json(value), "json", &Map::new(), &StubEncoder).unwrap();
        assert_eq!(result.media_type, "application/json");
    }

    #[test]
    fn feature_collection_to_csv() {
        let value = serde_json::json!({
            "type": "FeatureCollection",
            "features": [
                {"properties": {"values": {"2021-01-01": 5}}},
            ],
        });
        let result = save_result(SaveResultInput::Json(value), "csv", &Map::new(), &StubEncoder).unwrap();
        assert_eq!(result.media_type, "text/csv");
        let text = String::from_utf8(result.bytes).unwrap();
        assert!(text.contains("2021-01-01"));
    }

    #[test]
    fn byte_format_casts_to_uint8_range() {
        let image = sample_image(1);
        let result =
            save_result(SaveResultInput::Image(image), "png", &Map::new(), &StubEncoder).unwrap();
        assert_eq!(result.media_type, "image/png");
    }

    #[test]
    fn gtiff_combines_multi_entry_stack() {
        let mut stack = EagerRasterStack::new();
        stack.insert("red", sample_image(1));
        stack.insert("nir", sample_image(1));
        let result =
            save_result(SaveResultInput::Stack(stack), "gtiff", &Map::new(), &StubEncoder).unwrap();
        assert_eq!(result.media_type, "image/tiff");
    }

    #[test]
    fn multi_entry_stack_rejects_non_gtiff() {
        let mut stack = EagerRasterStack::new();
        stack.insert("red", sample_image(1));
        stack.insert("nir", sample_image(1));
        let result = save_result(SaveResultInput::Stack(stack), "png", &Map::new(), &StubEncoder);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_format_falls_back_to_application_prefix() {
        assert_eq!(media_type_for_format("netcdf"), "application/netcdf");
    }

    #[test]
    fn combine_bands_rejects_shape_mismatch() {
        let mut stack = EagerRasterStack::new();
        stack.insert("a", sample_image(1));
        let mismatched = {
            let data = Array3::<f64>::zeros((1, 3, 3));
            let mask = Array3::<bool>::from_elem((1, 3, 3), false);
            let bounds = BoundingBox::new(0.0, 0.0, 1.0, 1.0, SpatialReference::WGS84).unwrap();
            Image::new(data, mask, bounds, SpatialReference::WGS84).unwrap()
        };
        stack.insert("b", mismatched);
        assert!(combine_bands(&stack).is_err());
    }
}
