use std::collections::HashMap;

use ndarray::{Array2, Array3, Axis};
use openeo_raster_datatypes::Image;
use rayon::prelude::*;
use tracing::warn;

use crate::engine::param::StackValue;
use crate::error::{self, Error};

/// A per-timestep pixel-selection mosaic method. Feed order matters for
/// `first` and the `lastband*` variants; every other method is
/// order-independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelSelectionMethod {
    First,
    Lowest,
    Highest,
    Mean,
    Median,
    Stdev,
    Count,
    LastBandHigh,
    LastBandLow,
    /// Not one of the recognised `pixel_selection` method strings; only
    /// reachable via `recognize_reducer_process_id` mapping a `sum`
    /// reducer onto the same running-total machinery `mean` uses.
    Sum,
    /// Likewise, reached only through `sd`/`variance` reducer recognition.
    Variance,
}

impl PixelSelectionMethod {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "first" => Some(PixelSelectionMethod::First),
            "lowest" => Some(PixelSelectionMethod::Lowest),
            "highest" => Some(PixelSelectionMethod::Highest),
            "mean" => Some(PixelSelectionMethod::Mean),
            "median" => Some(PixelSelectionMethod::Median),
            "stdev" => Some(PixelSelectionMethod::Stdev),
            "count" => Some(PixelSelectionMethod::Count),
            // "lastbandhight" is the spelling this system's recognised
            // method-string list actually uses; "lastbandhigh" is accepted
            // too since it is the obvious intended spelling.
            "lastbandhight" | "lastbandhigh" => Some(PixelSelectionMethod::LastBandHigh),
            "lastbandlow" => Some(PixelSelectionMethod::LastBandLow),
            _ => None,
        }
    }

    /// Maps a reducer's recognised `process_id` onto the mosaic method with
    /// the same semantics, per the reducer/pixel-selection equivalence
    /// table. Broader than `parse`: `sum` and `variance` have no standalone
    /// `pixel_selection` method string but are still recognised reducers.
    pub fn recognize_reducer_process_id(process_id: &str) -> Option<Self> {
        match process_id {
            "min" => Some(PixelSelectionMethod::Lowest),
            "max" => Some(PixelSelectionMethod::Highest),
            "sum" => Some(PixelSelectionMethod::Sum),
            "sd" | "variance" => Some(PixelSelectionMethod::Variance),
            other => Self::parse(other),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PixelSelectionMethod::First => "first",
            PixelSelectionMethod::Lowest => "lowest",
            PixelSelectionMethod::Highest => "highest",
            PixelSelectionMethod::Mean => "mean",
            PixelSelectionMethod::Median => "median",
            PixelSelectionMethod::Stdev => "stdev",
            PixelSelectionMethod::Count => "count",
            PixelSelectionMethod::LastBandHigh => "lastbandhight",
            PixelSelectionMethod::LastBandLow => "lastbandlow",
            PixelSelectionMethod::Sum => "sum",
            PixelSelectionMethod::Variance => "variance",
        }
    }
}

struct Accumulator {
    method: PixelSelectionMethod,
    data: Array3<f64>,
    /// `true` = not yet written to (still masked).
    unfilled: Array3<bool>,
    sum: Option<Array3<f64>>,
    count: Option<Array3<f64>>,
    welford_mean: Option<Array3<f64>>,
    welford_m2: Option<Array3<f64>>,
    median_samples: Vec<(Array3<f64>, Array3<bool>)>,
    last_band_selector: Option<Array2<f64>>,
    bands: usize,
    height: usize,
    width: usize,
}

impl Accumulator {
    fn new(method: PixelSelectionMethod, bands: usize, height: usize, width: usize) -> Self {
        let shape = (bands, height, width);
        Accumulator {
            method,
            data: Array3::zeros(shape),
            unfilled: Array3::from_elem(shape, true),
            sum: matches!(method, PixelSelectionMethod::Mean | PixelSelectionMethod::Sum)
                .then(|| Array3::zeros(shape)),
            count: matches!(
                method,
                PixelSelectionMethod::Mean
                    | PixelSelectionMethod::Count
                    | PixelSelectionMethod::Stdev
                    | PixelSelectionMethod::Sum
                    | PixelSelectionMethod::Variance
            )
            .then(|| Array3::zeros(shape)),
            welford_mean: matches!(method, PixelSelectionMethod::Stdev | PixelSelectionMethod::Variance)
                .then(|| Array3::zeros(shape)),
            welford_m2: matches!(method, PixelSelectionMethod::Stdev | PixelSelectionMethod::Variance)
                .then(|| Array3::zeros(shape)),
            median_samples: Vec::new(),
            last_band_selector: matches!(
                method,
                PixelSelectionMethod::LastBandHigh | PixelSelectionMethod::LastBandLow
            )
            .then(|| Array2::from_elem((height, width), f64::NAN)),
            bands,
            height,
            width,
        }
    }

    /// Resizes `image` to this accumulator's grid if its dimensions differ,
    /// using nearest-neighbour for both data and mask, as the spec requires.
    fn resample(&self, image: &Image) -> (Array3<f64>, Array3<bool>) {
        if image.height() == self.height && image.width() == self.width {
            return (image.data.clone(), image.mask.clone());
        }
        warn!(
            from = ?(image.height(), image.width()),
            to = ?(self.height, self.width),
            "resampling mosaic input with nearest-neighbour"
        );
        let mut data = Array3::zeros((self.bands.min(image.bands()), self.height, self.width));
        let mut mask = Array3::from_elem((self.bands.min(image.bands()), self.height, self.width), true);
        for b in 0..data.dim().0 {
            for y in 0..self.height {
                let sy = y * image.height() / self.height.max(1);
                for x in 0..self.width {
                    let sx = x * image.width() / self.width.max(1);
                    data[[b, y, x]] = image.data[[b, sy.min(image.height() - 1), sx.min(image.width() - 1)]];
                    mask[[b, y, x]] = image.mask[[b, sy.min(image.height() - 1), sx.min(image.width() - 1)]];
                }
            }
        }
        (data, mask)
    }

    fn feed(&mut self, image: &Image) {
        let (data, mask) = self.resample(image);

        match self.method {
            PixelSelectionMethod::First => {
                ndarray::Zip::from(&mut self.data)
                    .and(&mut self.unfilled)
                    .and(&data)
                    .and(&mask)
                    .for_each(|acc, unfilled, value, invalid| {
                        if *unfilled && !*invalid {
                            *acc = *value;
                            *unfilled = false;
                        }
                    });
            }
            PixelSelectionMethod::Lowest => {
                ndarray::Zip::from(&mut self.data)
                    .and(&mut self.unfilled)
                    .and(&data)
                    .and(&mask)
                    .for_each(|acc, unfilled, value, invalid| {
                        if !*invalid && (*unfilled || *value < *acc) {
                            *acc = *value;
                            *unfilled = false;
                        }
                    });
            }
            PixelSelectionMethod::Highest => {
                ndarray::Zip::from(&mut self.data)
                    .and(&mut self.unfilled)
                    .and(&data)
                    .and(&mask)
                    .for_each(|acc, unfilled, value, invalid| {
                        if !*invalid && (*unfilled || *value > *acc) {
                            *acc = *value;
                            *unfilled = false;
                        }
                    });
            }
            PixelSelectionMethod::Mean | PixelSelectionMethod::Sum => {
                let sum = self.sum.as_mut().expect("mean/sum accumulator missing sum");
                let count = self.count.as_mut().expect("mean/sum accumulator missing count");
                ndarray::Zip::from(sum)
                    .and(count)
                    .and(&mut self.unfilled)
                    .and(&data)
                    .and(&mask)
                    .for_each(|sum, count, unfilled, value, invalid| {
                        if !*invalid {
                            *sum += *value;
                            *count += 1.0;
                            *unfilled = false;
                        }
                    });
            }
            PixelSelectionMethod::Count => {
                let count = self.count.as_mut().expect("count accumulator missing count");
                ndarray::Zip::from(count)
                    .and(&mut self.unfilled)
                    .and(&mask)
                    .for_each(|count, unfilled, invalid| {
                        if !*invalid {
                            *count += 1.0;
                            *unfilled = false;
                        }
                    });
            }
            PixelSelectionMethod::Stdev | PixelSelectionMethod::Variance => {
                let mean = self.welford_mean.as_mut().expect("stdev/variance accumulator missing mean");
                let m2 = self.welford_m2.as_mut().expect("stdev/variance accumulator missing m2");
                let count = self.count.as_mut().expect("stdev/variance accumulator missing count");
                ndarray::Zip::from(mean)
                    .and(m2)
                    .and(count)
                    .and(&mut self.unfilled)
                    .and(&data)
                    .and(&mask)
                    .for_each(|mean, m2, count, unfilled, value, invalid| {
                        if !*invalid {
                            *count += 1.0;
                            let delta = *value - *mean;
                            *mean += delta / *count;
                            let delta2 = *value - *mean;
                            *m2 += delta * delta2;
                            *unfilled = false;
                        }
                    });
            }
            PixelSelectionMethod::Median => {
                self.median_samples.push((data.clone(), mask.clone()));
                ndarray::Zip::from(&mut self.unfilled)
                    .and(&mask)
                    .for_each(|unfilled, invalid| {
                        if !*invalid {
                            *unfilled = false;
                        }
                    });
            }
            PixelSelectionMethod::LastBandHigh | PixelSelectionMethod::LastBandLow => {
                let selector_band = self.bands - 1;
                let selector = self.last_band_selector.as_mut().expect("selector missing");
                for y in 0..self.height {
                    for x in 0..self.width {
                        if mask[[selector_band, y, x]] {
                            continue;
                        }
                        let candidate = data[[selector_band, y, x]];
                        let current = selector[[y, x]];
                        let better = match self.method {
                            PixelSelectionMethod::LastBandHigh => current.is_nan() || candidate >= current,
                            PixelSelectionMethod::LastBandLow => current.is_nan() || candidate <= current,
                            _ => unreachable!(),
                        };
                        if better {
                            selector[[y, x]] = candidate;
                            for b in 0..self.bands {
                                self.data[[b, y, x]] = data[[b, y, x]];
                                self.unfilled[[b, y, x]] = false;
                            }
                        }
                    }
                }
            }
        }
    }

    fn finalize(mut self) -> (Array3<f64>, Array3<bool>) {
        match self.method {
            PixelSelectionMethod::Mean => {
                let sum = self.sum.take().unwrap();
                let count = self.count.take().unwrap();
                ndarray::Zip::from(&mut self.data)
                    .and(&sum)
                    .and(&count)
                    .for_each(|acc, sum, count| {
                        *acc = if *count > 0.0 { sum / count } else { 0.0 };
                    });
            }
            PixelSelectionMethod::Count => {
                let count = self.count.take().unwrap();
                self.data = count;
            }
            PixelSelectionMethod::Sum => {
                let sum = self.sum.take().unwrap();
                self.data = sum;
            }
            PixelSelectionMethod::Stdev => {
                let m2 = self.welford_m2.take().unwrap();
                let count = self.count.take().unwrap();
                ndarray::Zip::from(&mut self.data)
                    .and(&m2)
                    .and(&count)
                    .for_each(|acc, m2, count| {
                        *acc = if *count > 0.0 { (m2 / count).sqrt() } else { 0.0 };
                    });
            }
            PixelSelectionMethod::Variance => {
                let m2 = self.welford_m2.take().unwrap();
                let count = self.count.take().unwrap();
                ndarray::Zip::from(&mut self.data)
                    .and(&m2)
                    .and(&count)
                    .for_each(|acc, m2, count| {
                        *acc = if *count > 0.0 { m2 / count } else { 0.0 };
                    });
            }
            PixelSelectionMethod::Median => {
                // Each pixel's median scans every fed sample independently of
                // its neighbours, so bands split cleanly across rayon's pool
                // instead of walking the whole volume on one thread.
                let (height, width) = (self.height, self.width);
                let samples = &self.median_samples;
                let per_band: Vec<(Array2<f64>, Array2<bool>)> = (0..self.bands)
                    .into_par_iter()
                    .map(|b| {
                        let mut band_result = Array2::zeros((height, width));
                        let mut band_mask = Array2::from_elem((height, width), true);
                        for y in 0..height {
                            for x in 0..width {
                                let mut values: Vec<f64> = samples
                                    .iter()
                                    .filter(|(_, mask)| !mask[[b, y, x]])
                                    .map(|(data, _)| data[[b, y, x]])
                                    .collect();
                                if values.is_empty() {
                                    continue;
                                }
                                values.sort_by(|a, c| a.partial_cmp(c).unwrap());
                                let mid = values.len() / 2;
                                let median = if values.len() % 2 == 0 {
                                    (values[mid - 1] + values[mid]) / 2.0
                                } else {
                                    values[mid]
                                };
                                band_result[[y, x]] = median;
                                band_mask[[y, x]] = false;
                            }
                        }
                        (band_result, band_mask)
                    })
                    .collect();
                let data_views: Vec<_> = per_band.iter().map(|(d, _)| d.view()).collect();
                let mask_views: Vec<_> = per_band.iter().map(|(_, m)| m.view()).collect();
                self.data = ndarray::stack(Axis(0), &data_views).expect("per-band shapes are uniform");
                self.unfilled = ndarray::stack(Axis(0), &mask_views).expect("per-band shapes are uniform");
            }
            _ => {}
        }
        (self.data, self.unfilled)
    }

    fn is_done(&self, cutline_union: Option<&Array2<bool>>) -> bool {
        let band_zero = self.unfilled.index_axis(Axis(0), 0);
        match cutline_union {
            Some(cutline) => ndarray::Zip::from(band_zero)
                .and(cutline)
                .fold(true, |ok, unfilled, outside| ok && (!*unfilled || *outside)),
            None => band_zero.iter().all(|unfilled| !*unfilled),
        }
    }
}

/// Feeds an ordered raster stack into a pixel-selection accumulator,
/// stopping early (without realising further lazy tasks) once the
/// aggregated cutline mask implies no more valid pixels can be written.
pub async fn mosaic_stack(
    stack: &StackValue,
    method: PixelSelectionMethod,
) -> Result<Image, Error> {
    match stack {
        StackValue::Eager(eager) => {
            let mut accumulator: Option<Accumulator> = None;
            for (_, image) in eager.iter() {
                let acc = accumulator.get_or_insert_with(|| {
                    Accumulator::new(method, image.bands(), image.height(), image.width())
                });
                if acc.is_done(None) {
                    break;
                }
                acc.feed(image);
            }
            finish(accumulator, method, eager.values().next())
        }
        StackValue::Lazy(lazy) => mosaic_lazy_stack(lazy, method).await,
    }
}

async fn mosaic_lazy_stack(
    lazy: &openeo_raster_datatypes::LazyRasterStack,
    method: PixelSelectionMethod,
) -> Result<Image, Error> {
    let mut accumulator: Option<Accumulator> = None;
    let mut cutline_union: Option<Array2<bool>> = None;
    let mut template: Option<Image> = None;

    for key in lazy.keys() {
        if let Some(lazy_ref) = lazy
            .lazy_ref(&key)
            .map_err(crate::error::Error::from)?
        {
            let bands = lazy_ref.count.max(1);
            let acc = accumulator
                .get_or_insert_with(|| Accumulator::new(method, bands, lazy_ref.height, lazy_ref.width));

            let cutline = lazy_ref
                .cutline_mask()
                .await
                .map_err(|source| error::AssetRead { source }.build())?;
            cutline_union = Some(match cutline_union.take() {
                Some(existing) => {
                    ndarray::Zip::from(&existing).and(cutline).map_collect(|a, b| *a && *b)
                }
                None => cutline.clone(),
            });

            if acc.is_done(cutline_union.as_ref()) {
                break;
            }

            let image = match lazy_ref.realize().await {
                Ok(image) => image,
                Err(source) if lazy.is_allowed_exception(&source) => continue,
                Err(source) => return error::AssetRead { source }.fail(),
            };
            if template.is_none() {
                template = Some(image.clone());
            }
            acc.feed(&image);

            if acc.is_done(cutline_union.as_ref()) {
                break;
            }
        } else {
            let Some(image) = lazy.get(&key).await.map_err(crate::error::Error::from)? else {
                continue;
            };
            let acc = accumulator.get_or_insert_with(|| {
                Accumulator::new(method, image.bands(), image.height(), image.width())
            });
            if acc.is_done(None) {
                break;
            }
            if template.is_none() {
                template = Some(image.clone());
            }
            acc.feed(&image);
        }
    }

    finish(accumulator, method, template.as_ref())
}

fn finish(
    accumulator: Option<Accumulator>,
    method: PixelSelectionMethod,
    template: Option<&Image>,
) -> Result<Image, Error> {
    let Some(accumulator) = accumulator else {
        return error::NoSuccessfulTasks.fail();
    };
    let template = template.ok_or_else(|| error::NoSuccessfulTasks.build())?;
    let (data, mask) = accumulator.finalize();

    let mut metadata: HashMap<String, serde_json::Value> = HashMap::new();
    metadata.insert(
        "pixel_selection_method".to_string(),
        serde_json::Value::String(method.name().to_string()),
    );

    let mut image = Image::new(data, mask, template.bounds, template.crs.clone())?;
    image.band_names = template.band_names.clone();
    image.metadata = metadata;
    Ok(image)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    use openeo_raster_datatypes::{BoundingBox, EagerRasterStack, LazyRasterStack, SpatialReference, StacItem, TargetGeometry};

    use super::*;
    use crate::mock::MockTaskRealizer;

    fn sample_image(value: f64, masked: bool) -> Image {
        let data = Array3::<f64>::from_elem((1, 2, 2), value);
        let mask = Array3::<bool>::from_elem((1, 2, 2), masked);
        let bounds = BoundingBox::new(0.0, 0.0, 1.0, 1.0, SpatialReference::WGS84).unwrap();
        Image::new(data, mask, bounds, SpatialReference::WGS84).unwrap()
    }

    fn eager_of(images: Vec<(&str, Image)>) -> StackValue {
        let mut stack = EagerRasterStack::new();
        for (key, image) in images {
            stack.insert(key, image);
        }
        StackValue::Eager(Arc::new(stack))
    }

    #[tokio::test]
    async fn first_picks_the_earliest_unmasked_value() {
        let stack = eager_of(vec![
            ("a", sample_image(1.0, false)),
            ("b", sample_image(2.0, false)),
        ]);
        let result = mosaic_stack(&stack, PixelSelectionMethod::First).await.unwrap();
        assert!(result.data.iter().all(|v| *v == 1.0));
    }

    #[tokio::test]
    async fn mean_averages_across_unmasked_inputs() {
        let stack = eager_of(vec![
            ("a", sample_image(1.0, false)),
            ("b", sample_image(2.0, false)),
            ("c", sample_image(3.0, false)),
        ]);
        let result = mosaic_stack(&stack, PixelSelectionMethod::Mean).await.unwrap();
        assert!(result.data.iter().all(|v| (*v - 2.0).abs() < 1e-9));
    }

    #[tokio::test]
    async fn median_ignores_masked_samples() {
        let stack = eager_of(vec![
            ("a", sample_image(1.0, false)),
            ("b", sample_image(99.0, true)),
            ("c", sample_image(3.0, false)),
        ]);
        let result = mosaic_stack(&stack, PixelSelectionMethod::Median).await.unwrap();
        assert!(result.data.iter().all(|v| (*v - 2.0).abs() < 1e-9));
    }

    /// Property #4: feeding `[A, B, C]` under `first` gives the same result
    /// as interleaving fully-masked images between them, since `first` only
    /// writes where the accumulator is still unfilled.
    #[tokio::test]
    async fn first_is_idempotent_under_inserted_masked_images() {
        let a = sample_image(1.0, false);
        let b = sample_image(2.0, false);
        let c = sample_image(3.0, false);
        let masked = sample_image(99.0, true);

        let plain = eager_of(vec![("a", a.clone()), ("b", b.clone()), ("c", c.clone())]);
        let padded = eager_of(vec![
            ("a", a),
            ("m1", masked.clone()),
            ("m2", masked),
            ("b", b),
            ("c", c),
        ]);

        let plain_result = mosaic_stack(&plain, PixelSelectionMethod::First).await.unwrap();
        let padded_result = mosaic_stack(&padded, PixelSelectionMethod::First).await.unwrap();
        assert_eq!(plain_result.data, padded_result.data);
    }

    fn lazy_item(id: &str) -> StacItem {
        StacItem {
            id: id.to_string(),
            bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0, SpatialReference::WGS84).unwrap(),
            datetime: None,
            geometry: None,
            assets: std::collections::HashMap::new(),
            properties: std::collections::HashMap::new(),
            stac_version: "1.0.0".to_string(),
        }
    }

    /// Property #5: on `first`, once the first realised image is entirely
    /// unmasked the mosaic is fully covered and no further lazy task runs.
    #[tokio::test]
    async fn first_terminates_early_once_fully_covered() {
        let realizer = Arc::new(MockTaskRealizer::new(2, 2, 1));
        let target = TargetGeometry {
            width: 2,
            height: 2,
            bounds: BoundingBox::new(0.0, 0.0, 1.0, 1.0, SpatialReference::WGS84).unwrap(),
            crs: SpatialReference::WGS84,
            band_names: Some(vec!["data".to_string()]),
        };
        let groups = vec![
            (vec![lazy_item("a")], vec!["data".to_string()]),
            (vec![lazy_item("b")], vec!["data".to_string()]),
            (vec![lazy_item("c")], vec!["data".to_string()]),
        ];
        let dyn_realizer: Arc<dyn openeo_raster_datatypes::TaskRealizer> = Arc::clone(&realizer);
        let lazy = LazyRasterStack::new(
            groups,
            |items: &[StacItem]| items[0].id.clone(),
            None::<fn(&[StacItem]) -> Option<chrono::DateTime<chrono::Utc>>>,
            Arc::new(|_: &openeo_raster_datatypes::BoxError| false),
            Some(target),
            dyn_realizer,
        );

        let stack = StackValue::Lazy(Arc::new(lazy));
        mosaic_stack(&stack, PixelSelectionMethod::First).await.unwrap();

        assert_eq!(realizer.realize_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn mismatched_dimensions_resample_with_nearest_neighbour() {
        let bounds = BoundingBox::new(0.0, 0.0, 1.0, 1.0, SpatialReference::WGS84).unwrap();
        let first = Image::new(
            Array3::<f64>::zeros((1, 2, 2)),
            Array3::<bool>::from_elem((1, 2, 2), true),
            bounds,
            SpatialReference::WGS84,
        )
        .unwrap();
        let second = Image::new(
            Array3::<f64>::from_elem((1, 1, 1), 9.0),
            Array3::<bool>::from_elem((1, 1, 1), false),
            bounds,
            SpatialReference::WGS84,
        )
        .unwrap();
        let stack = eager_of(vec![("a", first), ("b", second)]);

        let result = mosaic_stack(&stack, PixelSelectionMethod::First).await.unwrap();
        assert_eq!(result.data.dim(), (1, 2, 2));
        assert!(result.data.iter().all(|v| *v == 9.0));
    }
}
