//! Output-dimension estimation and datetime grouping for `load_collection`.

use gdal::spatial_ref::{CoordTransform, SpatialRef};
use indexmap::IndexMap;
use openeo_raster_datatypes::{BoundingBox, SpatialReference, StacItem};

use crate::error::{self, Error};

/// Default side length (pixels) used when neither an explicit width/height
/// nor any per-asset resolution metadata is available.
const DEFAULT_DIMENSION: usize = 1024;

/// Resolved output geometry for a `load_collection` call.
#[derive(Debug, Clone)]
pub struct EstimatedDimensions {
    pub width: usize,
    pub height: usize,
    pub crs: SpatialReference,
    pub bbox: BoundingBox,
}

pub fn validate_input_parameters(
    spatial_extent: Option<&BoundingBox>,
    items: &[StacItem],
    bands: Option<&[String]>,
) -> Result<(), Error> {
    if spatial_extent.is_none() {
        return error::ProcessParameterMissing {
            process_id: "load_collection",
            parameter: "spatial_extent".to_string(),
        }
        .fail();
    }
    if items.is_empty() {
        return error::ProcessParameterMissing {
            process_id: "load_collection",
            parameter: "items".to_string(),
        }
        .fail();
    }
    if bands.map_or(true, |b| b.is_empty()) {
        return error::ProcessParameterMissing {
            process_id: "load_collection",
            parameter: "bands".to_string(),
        }
        .fail();
    }
    Ok(())
}

/// Per-band resolution implied by an item's asset metadata, in the item's
/// native CRS units. `None` when the asset carries neither `proj:transform`
/// nor `proj:shape` — the original falls back to a literal default
/// resolution in this case; we skip straight to `DEFAULT_DIMENSION` in
/// `calculate_dimensions` instead of inventing a fake resolution value.
fn item_resolutions(item: &StacItem, bands: &[String], bbox: &BoundingBox) -> (Vec<f64>, Vec<f64>) {
    let mut x_res = Vec::new();
    let mut y_res = Vec::new();
    for band in bands {
        let Some(asset) = item.asset(band) else {
            continue;
        };
        if let Some(transform) = asset.proj_transform {
            x_res.push(transform[0].abs());
            y_res.push(transform[4].abs());
        } else if let Some([height, width]) = asset.proj_shape {
            if width > 0 && height > 0 {
                x_res.push(bbox.width().abs() / width as f64);
                y_res.push(bbox.height().abs() / height as f64);
            }
        }
    }
    (x_res, y_res)
}

/// Reprojects a resolution (in `src_crs` units) to `dst_crs` units by
/// measuring the ground distance of a one-pixel step at the bbox centre,
/// the same finite-difference approach a raster reader uses to estimate
/// native ground resolution after warping.
fn reproject_resolution(
    src_crs: &SpatialReference,
    dst_crs: &SpatialReference,
    bbox: &BoundingBox,
    x_res: f64,
    y_res: f64,
) -> Result<(f64, f64), Error> {
    if src_crs == dst_crs {
        return Ok((x_res, y_res));
    }
    let src = spatial_ref_from(src_crs)?;
    let dst = spatial_ref_from(dst_crs)?;
    let transform = CoordTransform::new(&src, &dst)
        .map_err(|e| error::AssetRead { source: Box::new(e) as _ }.build())?;

    let cx = (bbox.west + bbox.east) / 2.0;
    let cy = (bbox.south + bbox.north) / 2.0;
    let mut xs = [cx, cx + x_res, cx];
    let mut ys = [cy, cy, cy + y_res];
    let mut zs = [0.0, 0.0, 0.0];
    transform
        .transform_coords(&mut xs, &mut ys, &mut zs)
        .map_err(|e| error::AssetRead { source: Box::new(e) as _ }.build())?;

    let dx = ((xs[1] - xs[0]).powi(2) + (ys[1] - ys[0]).powi(2)).sqrt();
    let dy = ((xs[2] - xs[0]).powi(2) + (ys[2] - ys[0]).powi(2)).sqrt();
    Ok((dx, dy))
}

fn spatial_ref_from(crs: &SpatialReference) -> Result<SpatialRef, Error> {
    let built = match crs {
        SpatialReference::Epsg(code) => SpatialRef::from_epsg(*code),
        SpatialReference::Wkt(wkt) => SpatialRef::from_wkt(wkt),
    };
    built.map_err(|e| error::AssetRead { source: Box::new(e) as _ }.build())
}

fn calculate_dimensions(
    bbox: &BoundingBox,
    x_resolution: Option<f64>,
    y_resolution: Option<f64>,
    width: Option<usize>,
    height: Option<usize>,
) -> (usize, usize) {
    if let (Some(w), Some(h)) = (width, height) {
        return (w, h);
    }
    if let (Some(xr), Some(yr)) = (x_resolution, y_resolution) {
        if xr > 0.0 && yr > 0.0 {
            let w = (bbox.width().abs() / xr).round().max(1.0) as usize;
            let h = (bbox.height().abs() / yr).round().max(1.0) as usize;
            return (w, h);
        }
    }
    (DEFAULT_DIMENSION, DEFAULT_DIMENSION)
}

pub fn check_pixel_limit(width: usize, height: usize, item_count: usize, max_pixels: u64) -> Result<(), Error> {
    let pixels = width as u64 * height as u64 * item_count.max(1) as u64;
    if pixels > max_pixels {
        return error::OutputLimitExceeded { pixels, limit: max_pixels }.fail();
    }
    Ok(())
}

/// The CRS an item's assets were captured in, if its STAC metadata declares
/// one (`proj:epsg` on the requested bands, falling back to the item's own
/// `proj:epsg` property). `None` means the item carries no projection
/// metadata and is assumed to match the target CRS.
fn item_crs(item: &StacItem, bands: &[String]) -> Option<SpatialReference> {
    for band in bands {
        if let Some(epsg) = item.asset(band).and_then(|a| a.proj_epsg) {
            return Some(SpatialReference::Epsg(epsg));
        }
    }
    match item.property("proj:epsg") {
        Some(serde_json::Value::Number(n)) => n.as_u64().map(|v| SpatialReference::Epsg(v as u32)),
        _ => None,
    }
}

fn check_mixed_crs(items: &[StacItem], bands: &[String], expected: &SpatialReference) -> Result<(), Error> {
    let mut found: Vec<String> = Vec::new();
    for item in items {
        if let Some(crs) = item_crs(item, bands) {
            if &crs != expected && !found.contains(&crs.to_string()) {
                found.push(crs.to_string());
            }
        }
    }
    if !found.is_empty() {
        let mut crs_list = vec![expected.to_string()];
        crs_list.extend(found);
        return error::MixedCrs { crs_list }.fail();
    }
    Ok(())
}

/// Full dimension-estimation step of `load_collection` (spec.md §4.3 step
/// 3–4): prefers explicit `width`/`height`, otherwise derives them from the
/// finest per-asset resolution across `items`, reprojected to `target_crs`;
/// rejects heterogeneous item CRS and over-budget pixel counts.
pub fn estimate_output_dimensions(
    items: &[StacItem],
    bbox: &BoundingBox,
    target_crs: &SpatialReference,
    bands: &[String],
    width: Option<usize>,
    height: Option<usize>,
    max_pixels: u64,
) -> Result<EstimatedDimensions, Error> {
    check_mixed_crs(items, bands, target_crs)?;

    let mut best: Option<(f64, f64)> = None;
    if width.is_none() || height.is_none() {
        for item in items {
            let item_native_crs = item_crs(item, bands).unwrap_or_else(|| target_crs.clone());
            let (xs, ys) = item_resolutions(item, bands, bbox);
            for (xr, yr) in xs.into_iter().zip(ys) {
                let (xr, yr) = reproject_resolution(&item_native_crs, target_crs, bbox, xr, yr)?;
                best = Some(match best {
                    Some((bx, by)) => (bx.min(xr), by.min(yr)),
                    None => (xr, yr),
                });
            }
        }
    }

    let (w, h) = calculate_dimensions(bbox, best.map(|(x, _)| x), best.map(|(_, y)| y), width, height);
    check_pixel_limit(w, h, items.len(), max_pixels)?;

    Ok(EstimatedDimensions {
        width: w,
        height: h,
        crs: target_crs.clone(),
        bbox: *bbox,
    })
}

/// The datetime group key a single item falls into: its RFC3339 rendering,
/// or `"null"` for an item without a datetime. Shared by
/// `group_items_by_datetime` and the stack-key function `load_collection`
/// hands to `LazyRasterStack::new`, so a group's key is always derivable
/// from its items alone.
pub fn datetime_group_key(item: &StacItem) -> String {
    item.datetime
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| "null".to_string())
}

/// Groups `items` by their datetime's RFC3339 rendering, preserving the
/// order in which each distinct datetime was first seen (spec.md §4.3 step
/// 5; exposed standalone per SPEC_FULL.md's supplemented-features note
/// since reducers and tile code reuse the grouping independently of
/// `load_collection`).
pub fn group_items_by_datetime(items: Vec<StacItem>) -> IndexMap<String, Vec<StacItem>> {
    let mut groups: IndexMap<String, Vec<StacItem>> = IndexMap::new();
    for item in items {
        let key = datetime_group_key(&item);
        groups.entry(key).or_default().push(item);
    }
    groups
}
