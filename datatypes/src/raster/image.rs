use std::collections::HashMap;

use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

use crate::error::{self, Error};
use crate::primitives::{BoundingBox, SpatialReference};

/// Per-band dataset statistics, as typically carried alongside a STAC asset
/// or computed once on read.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandStatistics {
    pub minimum: f64,
    pub maximum: f64,
    pub mean: Option<f64>,
    pub stddev: Option<f64>,
}

/// A realised raster: a `(bands, height, width)` masked array plus its
/// spatial context. This is the unit of currency between readers, the
/// mosaicking engine, the reducers, and `save_result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub data: Array3<f64>,
    pub mask: Array3<bool>,
    pub bounds: BoundingBox,
    pub crs: SpatialReference,
    pub band_names: Option<Vec<String>>,
    pub band_stats: Option<Vec<BandStatistics>>,
    /// `true` = outside the footprint of this image (invalid); `None` means
    /// the image has no cutline (e.g. it was not clipped from a larger read).
    pub cutline_mask: Option<Array2<bool>>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Image {
    pub fn new(
        data: Array3<f64>,
        mask: Array3<bool>,
        bounds: BoundingBox,
        crs: SpatialReference,
    ) -> Result<Self, Error> {
        let image = Image {
            data,
            mask,
            bounds,
            crs,
            band_names: None,
            band_stats: None,
            cutline_mask: None,
            metadata: HashMap::new(),
        };
        image.check_invariants()?;
        Ok(image)
    }

    pub fn with_band_names(mut self, band_names: Vec<String>) -> Result<Self, Error> {
        if band_names.len() != self.bands() {
            return error::BandNameCountMismatch {
                bands: self.bands(),
                band_names: band_names.len(),
            }
            .fail();
        }
        self.band_names = Some(band_names);
        Ok(self)
    }

    pub fn with_band_stats(mut self, stats: Vec<BandStatistics>) -> Self {
        self.band_stats = Some(stats);
        self
    }

    pub fn with_cutline_mask(mut self, cutline_mask: Array2<bool>) -> Result<Self, Error> {
        let expected = (self.height(), self.width());
        if cutline_mask.dim() != expected {
            return error::CutlineMaskShapeMismatch {
                mask_shape: cutline_mask.dim(),
                image_shape: expected,
            }
            .fail();
        }
        self.cutline_mask = Some(cutline_mask);
        Ok(self)
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    fn check_invariants(&self) -> Result<(), Error> {
        if self.data.dim() != self.mask.dim() {
            return error::MaskShapeMismatch {
                data_shape: self.data.dim(),
                mask_shape: self.mask.dim(),
            }
            .fail();
        }
        if let Some(band_names) = &self.band_names {
            if band_names.len() != self.bands() {
                return error::BandNameCountMismatch {
                    bands: self.bands(),
                    band_names: band_names.len(),
                }
                .fail();
            }
        }
        if let Some(cutline_mask) = &self.cutline_mask {
            let expected = (self.height(), self.width());
            if cutline_mask.dim() != expected {
                return error::CutlineMaskShapeMismatch {
                    mask_shape: cutline_mask.dim(),
                    image_shape: expected,
                }
                .fail();
            }
        }
        Ok(())
    }

    pub fn bands(&self) -> usize {
        self.data.dim().0
    }

    pub fn height(&self) -> usize {
        self.data.dim().1
    }

    pub fn width(&self) -> usize {
        self.data.dim().2
    }

    pub fn band_index(&self, name: &str) -> Result<usize, Error> {
        self.band_names
            .as_ref()
            .and_then(|names| names.iter().position(|n| n == name))
            .ok_or_else(|| {
                error::UnknownBand {
                    name: name.to_string(),
                }
                .build()
            })
    }

    /// A fully-masked image with the same shape and context as `self`, used
    /// to prove pixel-selection idempotence (feeding a masked filler image
    /// must be a no-op for `first`).
    pub fn fully_masked_like(&self) -> Image {
        Image {
            data: Array3::zeros(self.data.dim()),
            mask: Array3::from_elem(self.mask.dim(), true),
            bounds: self.bounds,
            crs: self.crs.clone(),
            band_names: self.band_names.clone(),
            band_stats: None,
            cutline_mask: self.cutline_mask.clone(),
            metadata: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn sample_bounds() -> BoundingBox {
        BoundingBox::new(0.0, 0.0, 10.0, 10.0, SpatialReference::WGS84).unwrap()
    }

    #[test]
    fn rejects_mismatched_mask_shape() {
        let data = Array3::<f64>::zeros((2, 4, 4));
        let mask = Array3::<bool>::from_elem((2, 4, 5), false);
        let result = Image::new(data, mask, sample_bounds(), SpatialReference::WGS84);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_wrong_band_name_count() {
        let data = Array3::<f64>::zeros((2, 4, 4));
        let mask = Array3::<bool>::from_elem((2, 4, 4), false);
        let image = Image::new(data, mask, sample_bounds(), SpatialReference::WGS84).unwrap();
        assert!(image.with_band_names(vec!["red".to_string()]).is_err());
    }

    #[test]
    fn accepts_matching_cutline_mask() {
        let data = Array3::<f64>::zeros((1, 3, 4));
        let mask = Array3::<bool>::from_elem((1, 3, 4), false);
        let image = Image::new(data, mask, sample_bounds(), SpatialReference::WGS84).unwrap();
        let cutline = Array2::<bool>::from_elem((3, 4), false);
        assert!(image.with_cutline_mask(cutline).is_ok());
    }
}
