use std::collections::HashMap;

use ndarray::{ArrayD, Axis};
use openeo_raster_datatypes::{EagerRasterStack, Image, RasterStack};
use serde_json::Value as JsonValue;

use crate::concurrency::WorkerPool;
use crate::engine::param::StackValue;
use crate::error::{self, Error};
use crate::processing::pixel_selection::{mosaic_stack, PixelSelectionMethod};

/// The axis `reduce_dimension` collapses. Temporal reduction is a no-op on a
/// single-item stack; spectral reduction stacks every entry's band axis
/// and reduces once regardless of how many keys the stack holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Temporal,
    Spectral,
}

impl Dimension {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "temporal" | "time" | "t" => Some(Dimension::Temporal),
            "spectral" | "bands" => Some(Dimension::Spectral),
            _ => None,
        }
    }
}

/// A reduction over a stacked array whose axis 0 is the dimension being
/// collapsed. `process_id` identifies a reducer recognisable as a single-node
/// pixel-selection process, letting `reduce_dimension` take the early-
/// termination mosaic path for temporal reduction instead of stacking and
/// realising every entry.
pub trait Reducer: Send + Sync {
    fn process_id(&self) -> Option<&str> {
        None
    }

    /// Collapses axis 0 of `data`/`mask`, fully or partially. Called exactly
    /// once per `reduce_dimension` invocation — never per-image.
    fn reduce(&self, data: ArrayD<f64>, mask: ArrayD<bool>) -> Result<(ArrayD<f64>, ArrayD<bool>), Error>;
}

/// The reducers recognised by `process_id`: the same set the pixel-selection
/// equivalence table names, plus `first`, implemented here as a plain
/// array-axis reduction since outside the temporal shortcut there is no
/// accumulator to feed incrementally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinReducer {
    First,
    Lowest,
    Highest,
    Mean,
    Median,
    Sum,
    Count,
    Stdev,
    Variance,
}

impl BuiltinReducer {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "first" => Some(BuiltinReducer::First),
            "min" => Some(BuiltinReducer::Lowest),
            "max" => Some(BuiltinReducer::Highest),
            "mean" => Some(BuiltinReducer::Mean),
            "median" => Some(BuiltinReducer::Median),
            "sum" => Some(BuiltinReducer::Sum),
            "count" => Some(BuiltinReducer::Count),
            "sd" | "stdev" => Some(BuiltinReducer::Stdev),
            "variance" => Some(BuiltinReducer::Variance),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BuiltinReducer::First => "first",
            BuiltinReducer::Lowest => "min",
            BuiltinReducer::Highest => "max",
            BuiltinReducer::Mean => "mean",
            BuiltinReducer::Median => "median",
            BuiltinReducer::Sum => "sum",
            BuiltinReducer::Count => "count",
            BuiltinReducer::Stdev => "sd",
            BuiltinReducer::Variance => "variance",
        }
    }

    fn apply(&self, samples: &[f64]) -> f64 {
        match self {
            BuiltinReducer::First => samples[0],
            BuiltinReducer::Lowest => samples.iter().copied().fold(f64::INFINITY, f64::min),
            BuiltinReducer::Highest => samples.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            BuiltinReducer::Sum => samples.iter().sum(),
            BuiltinReducer::Count => samples.len() as f64,
            BuiltinReducer::Mean => samples.iter().sum::<f64>() / samples.len() as f64,
            BuiltinReducer::Median => {
                let mut sorted = samples.to_vec();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                }
            }
            BuiltinReducer::Stdev | BuiltinReducer::Variance => {
                let mean = samples.iter().sum::<f64>() / samples.len() as f64;
                let variance =
                    samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / samples.len() as f64;
                if matches!(self, BuiltinReducer::Stdev) {
                    variance.sqrt()
                } else {
                    variance
                }
            }
        }
    }
}

impl Reducer for BuiltinReducer {
    fn process_id(&self) -> Option<&str> {
        Some(self.name())
    }

    fn reduce(&self, data: ArrayD<f64>, mask: ArrayD<bool>) -> Result<(ArrayD<f64>, ArrayD<bool>), Error> {
        let mut out_shape = data.shape().to_vec();
        out_shape.remove(0);
        let mut out_data = ArrayD::zeros(out_shape.clone());
        let mut out_mask = ArrayD::from_elem(out_shape, true);

        ndarray::Zip::from(data.lanes(Axis(0)))
            .and(mask.lanes(Axis(0)))
            .and(&mut out_data)
            .and(&mut out_mask)
            .for_each(|values, valid, out_value, out_invalid| {
                let samples: Vec<f64> = values
                    .iter()
                    .zip(valid.iter())
                    .filter(|(_, invalid)| !**invalid)
                    .map(|(v, _)| *v)
                    .collect();
                if samples.is_empty() {
                    *out_value = 0.0;
                    *out_invalid = true;
                } else {
                    *out_value = self.apply(&samples);
                    *out_invalid = false;
                }
            });

        Ok((out_data, out_mask))
    }
}

/// Recognises a reducer's `process_id` against the same equivalence table
/// the pixel-selection mosaic uses, so a temporal `reduce_dimension` call
/// can delegate to the early-termination accumulator path instead of
/// stacking every entry.
pub fn recognize_pixel_selection(process_id: &str) -> Option<PixelSelectionMethod> {
    PixelSelectionMethod::recognize_reducer_process_id(process_id)
}

pub async fn reduce_dimension(
    stack: &StackValue,
    reducer: &dyn Reducer,
    dimension: &str,
) -> Result<EagerRasterStack, Error> {
    let dim = Dimension::parse(dimension).ok_or_else(|| {
        error::DimensionNotAvailable {
            dimension: dimension.to_string(),
        }
        .build()
    })?;
    match dim {
        Dimension::Temporal => reduce_temporal(stack, reducer).await,
        Dimension::Spectral => reduce_spectral(stack, reducer).await,
    }
}

async fn realize_all(stack: &StackValue) -> Result<Vec<(String, Image)>, Error> {
    match stack {
        StackValue::Eager(eager) => Ok(eager.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        StackValue::Lazy(lazy) => {
            // Keys are realised independently of one another, so fan them out
            // across the bounded worker pool instead of awaiting one at a time.
            let pool = WorkerPool::default();
            let keys = lazy.keys();
            let realized = pool
                .run(keys, move |key| async move {
                    let result = lazy.get(&key).await;
                    (key, result)
                })
                .await;

            let mut out = Vec::new();
            for (key, result) in realized {
                if let Some(image) = result? {
                    out.push((key, image));
                }
            }
            Ok(out)
        }
    }
}

fn with_reduction_metadata(mut image: Image, dimension: &str, method: &str) -> Image {
    image
        .metadata
        .insert("reduced_dimension".to_string(), JsonValue::String(dimension.to_string()));
    image
        .metadata
        .insert("reduction_method".to_string(), JsonValue::String(method.to_string()));
    image
}

async fn reduce_temporal(stack: &StackValue, reducer: &dyn Reducer) -> Result<EagerRasterStack, Error> {
    // Checked before any realisation happens: delegating to the mosaic's
    // accumulator lets it stop once the output is fully covered, instead of
    // `realize_all` forcing every lazy task up front and making that
    // shortcut pointless.
    if let Some(process_id) = reducer.process_id() {
        if let Some(method) = recognize_pixel_selection(process_id) {
            let mosaic = mosaic_stack(stack, method).await?;
            let mut out = EagerRasterStack::new();
            out.insert("reduced", with_reduction_metadata(mosaic, "temporal", process_id));
            return Ok(out);
        }
    }

    let images = realize_all(stack).await?;
    if images.is_empty() {
        return error::NoSuccessfulTasks.fail();
    }

    let method_name = reducer.process_id().unwrap_or("custom").to_string();

    if images.len() == 1 {
        let (_, image) = images.into_iter().next().unwrap();
        let mut out = EagerRasterStack::new();
        out.insert("reduced", with_reduction_metadata(image, "temporal", &method_name));
        return Ok(out);
    }

    let template = images[0].1.clone();
    let bands = template.bands();
    let (height, width) = (template.height(), template.width());
    for (key, image) in &images {
        if (image.bands(), image.height(), image.width()) != (bands, height, width) {
            return error::ProcessParameterInvalid {
                process_id: "reduce_dimension",
                parameter: "data".to_string(),
                reason: format!("stack entry '{key}' does not match the shape of the first entry"),
            }
            .fail();
        }
    }

    let data_views: Vec<_> = images.iter().map(|(_, img)| img.data.view()).collect();
    let mask_views: Vec<_> = images.iter().map(|(_, img)| img.mask.view()).collect();
    let stacked_data = ndarray::stack(Axis(0), &data_views)
        .map_err(|source| error::Unexpected { message: source.to_string() }.build())?
        .into_dyn();
    let stacked_mask = ndarray::stack(Axis(0), &mask_views)
        .map_err(|source| error::Unexpected { message: source.to_string() }.build())?
        .into_dyn();

    let (reduced_data, reduced_mask) = reducer.reduce(stacked_data, stacked_mask)?;
    let image = rewrap(&template, reduced_data, reduced_mask, "temporal", &method_name)?;

    let mut out = EagerRasterStack::new();
    out.insert("reduced", image);
    Ok(out)
}

async fn reduce_spectral(stack: &StackValue, reducer: &dyn Reducer) -> Result<EagerRasterStack, Error> {
    let images = realize_all(stack).await?;
    if images.is_empty() {
        return error::NoSuccessfulTasks.fail();
    }

    let method_name = reducer.process_id().unwrap_or("custom").to_string();

    if images.len() == 1 {
        let (key, image) = images.into_iter().next().unwrap();
        let data = image.data.clone().into_dyn();
        let mask = image.mask.clone().into_dyn();
        let (reduced_data, reduced_mask) = reducer.reduce(data, mask)?;
        let out_image = rewrap(&image, reduced_data, reduced_mask, "spectral", &method_name)?;
        let mut out = EagerRasterStack::new();
        out.insert(key, out_image);
        return Ok(out);
    }

    let bands = images[0].1.bands();
    for (key, image) in &images {
        if image.bands() != bands {
            return error::ProcessParameterInvalid {
                process_id: "reduce_dimension",
                parameter: "data".to_string(),
                reason: format!("stack entry '{key}' has {} bands, expected {bands}", image.bands()),
            }
            .fail();
        }
    }

    // (bands, H, W) per key stacked with a new axis inserted at position 1,
    // so axis 0 (bands) is what the reducer collapses and axis 1 (keys)
    // survives to be split back out afterwards.
    let data_views: Vec<_> = images.iter().map(|(_, img)| img.data.view()).collect();
    let mask_views: Vec<_> = images.iter().map(|(_, img)| img.mask.view()).collect();
    let stacked_data = ndarray::stack(Axis(1), &data_views)
        .map_err(|source| error::Unexpected { message: source.to_string() }.build())?
        .into_dyn();
    let stacked_mask = ndarray::stack(Axis(1), &mask_views)
        .map_err(|source| error::Unexpected { message: source.to_string() }.build())?
        .into_dyn();

    let (reduced_data, reduced_mask) = reducer.reduce(stacked_data, stacked_mask)?;

    let mut out = EagerRasterStack::new();
    match reduced_data.ndim() {
        3 => {
            // fully collapsed bands: (keys, H, W)
            for (i, (key, template)) in images.iter().enumerate() {
                let d = reduced_data.index_axis(Axis(0), i).to_owned().into_dyn();
                let m = reduced_mask.index_axis(Axis(0), i).to_owned().into_dyn();
                out.insert(key.clone(), rewrap(template, d, m, "spectral", &method_name)?);
            }
        }
        4 => {
            // partially collapsed: (bands', keys, H, W)
            for (i, (key, template)) in images.iter().enumerate() {
                let d = reduced_data.index_axis(Axis(1), i).to_owned().into_dyn();
                let m = reduced_mask.index_axis(Axis(1), i).to_owned().into_dyn();
                out.insert(key.clone(), rewrap(template, d, m, "spectral", &method_name)?);
            }
        }
        other => {
            return error::Unexpected {
                message: format!("spectral reducer returned unexpected rank {other}"),
            }
            .fail()
        }
    }

    Ok(out)
}

/// Normalises a reducer's output (2-D, fully collapsed to a single band, or
/// 3-D already shaped `(bands', H, W)`) into an `Image`, clearing
/// `band_names` whenever the band count changed so index-based band access
/// stays consistent.
fn rewrap(
    template: &Image,
    data: ArrayD<f64>,
    mask: ArrayD<bool>,
    dimension: &str,
    method: &str,
) -> Result<Image, Error> {
    let data3 = match data.ndim() {
        2 => data.insert_axis(Axis(0)),
        3 => data,
        other => {
            return error::Unexpected {
                message: format!("reducer returned unexpected rank {other}"),
            }
            .fail()
        }
    };
    let mask3 = match mask.ndim() {
        2 => mask.insert_axis(Axis(0)),
        3 => mask,
        other => {
            return error::Unexpected {
                message: format!("reducer returned unexpected rank {other}"),
            }
            .fail()
        }
    };
    let data3 = data3
        .into_dimensionality::<ndarray::Ix3>()
        .map_err(|source| error::Unexpected { message: source.to_string() }.build())?;
    let mask3 = mask3
        .into_dimensionality::<ndarray::Ix3>()
        .map_err(|source| error::Unexpected { message: source.to_string() }.build())?;

    let mut image = Image::new(data3, mask3, template.bounds, template.crs.clone())?;
    if image.bands() == template.bands() {
        image.band_names = template.band_names.clone();
    }
    image.metadata = template.metadata.clone();
    Ok(with_reduction_metadata(image, dimension, method))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use ndarray::Array3;
    use openeo_raster_datatypes::{BoundingBox, SpatialReference};

    use super::*;

    fn bounds() -> BoundingBox {
        BoundingBox::new(0.0, 0.0, 1.0, 1.0, SpatialReference::WGS84).unwrap()
    }

    fn constant_image(bands: usize, value: f64) -> Image {
        let data = Array3::from_elem((bands, 2, 2), value);
        let mask = Array3::from_elem((bands, 2, 2), false);
        Image::new(data, mask, bounds(), SpatialReference::WGS84).unwrap()
    }

    fn stack(values: &[f64]) -> EagerRasterStack {
        let mut stack = EagerRasterStack::new();
        for (i, v) in values.iter().enumerate() {
            stack.insert(format!("t{i}"), constant_image(1, *v));
        }
        stack
    }

    #[tokio::test]
    async fn temporal_single_item_is_a_no_op() {
        let stack = StackValue::Eager(Arc::new(stack(&[42.0])));
        let reducer = BuiltinReducer::Mean;
        let out = reduce_dimension(&stack, &reducer, "temporal").await.unwrap();
        assert_eq!(out.get("reduced").unwrap().data[[0, 0, 0]], 42.0);
    }

    #[tokio::test]
    async fn temporal_mean_matches_scenario_s4() {
        let stack = StackValue::Eager(Arc::new(stack(&[1.0, 2.0, 3.0])));
        let reducer = BuiltinReducer::Mean;
        let out = reduce_dimension(&stack, &reducer, "temporal").await.unwrap();
        let image = out.get("reduced").unwrap();
        assert!((image.data[[0, 0, 0]] - 2.0).abs() < 1e-9);
        assert_eq!(
            image.metadata.get("reduced_dimension").unwrap(),
            &JsonValue::String("temporal".to_string())
        );
    }

    #[tokio::test]
    async fn unknown_dimension_errors() {
        let stack = StackValue::Eager(Arc::new(stack(&[1.0])));
        let reducer = BuiltinReducer::Mean;
        let result = reduce_dimension(&stack, &reducer, "nonsense").await;
        assert!(matches!(result, Err(Error::DimensionNotAvailable { .. })));
    }

    struct CountingReducer {
        calls: Arc<AtomicUsize>,
    }

    impl Reducer for CountingReducer {
        fn reduce(&self, data: ArrayD<f64>, mask: ArrayD<bool>) -> Result<(ArrayD<f64>, ArrayD<bool>), Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            BuiltinReducer::Mean.reduce(data, mask)
        }
    }

    #[tokio::test]
    async fn spectral_reducer_is_invoked_exactly_once() {
        let mut eager = EagerRasterStack::new();
        for i in 0..3 {
            eager.insert(format!("t{i}"), constant_image(4, 1.0 + i as f64));
        }
        let stack_value = StackValue::Eager(Arc::new(eager));
        let calls = Arc::new(AtomicUsize::new(0));
        let reducer = CountingReducer { calls: Arc::clone(&calls) };

        let out = reduce_dimension(&stack_value, &reducer, "spectral").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(out.len(), 3);
    }

    fn lazy_item(id: &str) -> openeo_raster_datatypes::StacItem {
        openeo_raster_datatypes::StacItem {
            id: id.to_string(),
            bbox: bounds(),
            datetime: None,
            geometry: None,
            assets: HashMap::new(),
            properties: HashMap::new(),
            stac_version: "1.0.0".to_string(),
        }
    }

    /// A pixel-selection-recognised temporal reducer over a lazy stack must
    /// delegate to the mosaic's early-termination path, not realise every
    /// entry up front.
    #[tokio::test]
    async fn temporal_pixel_selection_reducer_does_not_realize_every_lazy_entry() {
        use crate::mock::MockTaskRealizer;

        let realizer = Arc::new(MockTaskRealizer::new(2, 2, 1));
        let target = openeo_raster_datatypes::TargetGeometry {
            width: 2,
            height: 2,
            bounds: bounds(),
            crs: SpatialReference::WGS84,
            band_names: Some(vec!["data".to_string()]),
        };
        let groups = vec![
            (vec![lazy_item("a")], vec!["data".to_string()]),
            (vec![lazy_item("b")], vec!["data".to_string()]),
            (vec![lazy_item("c")], vec!["data".to_string()]),
        ];
        let dyn_realizer: Arc<dyn openeo_raster_datatypes::TaskRealizer> = Arc::clone(&realizer);
        let lazy = openeo_raster_datatypes::LazyRasterStack::new(
            groups,
            |items: &[openeo_raster_datatypes::StacItem]| items[0].id.clone(),
            None::<fn(&[openeo_raster_datatypes::StacItem]) -> Option<chrono::DateTime<chrono::Utc>>>,
            Arc::new(|_: &openeo_raster_datatypes::BoxError| false),
            Some(target),
            dyn_realizer,
        );

        let stack_value = StackValue::Lazy(Arc::new(lazy));
        let reducer = BuiltinReducer::First;
        let out = reduce_dimension(&stack_value, &reducer, "temporal").await.unwrap();

        assert_eq!(realizer.realize_calls.load(Ordering::SeqCst), 1);
        assert_eq!(out.get("reduced").unwrap().data[[0, 0, 0]], 1.0);
    }

    #[tokio::test]
    async fn spectral_reduction_clears_band_names_on_band_count_change() {
        let image = constant_image(4, 2.0)
            .with_band_names(vec!["r".into(), "g".into(), "b".into(), "nir".into()])
            .unwrap();
        let mut eager = EagerRasterStack::new();
        eager.insert("single", image);
        let stack_value = StackValue::Eager(Arc::new(eager));
        let reducer = BuiltinReducer::Mean;

        let out = reduce_dimension(&stack_value, &reducer, "spectral").await.unwrap();
        let image = out.get("single").unwrap();
        assert_eq!(image.bands(), 1);
        assert!(image.band_names.is_none());
    }
}
