use indexmap::IndexMap;

use crate::error::{self, Error};
use crate::raster::Image;

/// Shared interface over the two raster-stack flavours: an already-realised
/// `EagerRasterStack` and the on-demand `LazyRasterStack`. Both preserve
/// chronological key order with stable insertion-order tie-breaking.
pub trait RasterStack {
    fn keys(&self) -> Vec<String>;
    fn len(&self) -> usize {
        self.keys().len()
    }
    fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }
}

/// An ordered mapping of key to already-realised `Image`, used once a
/// pipeline stage no longer needs to defer reads (e.g. the output of
/// mosaicking, or a stack built directly from in-memory images in tests).
#[derive(Debug, Clone, Default)]
pub struct EagerRasterStack {
    images: IndexMap<String, Image>,
}

impl EagerRasterStack {
    pub fn new() -> Self {
        EagerRasterStack {
            images: IndexMap::new(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, image: Image) {
        self.images.insert(key.into(), image);
    }

    pub fn get(&self, key: &str) -> Result<&Image, Error> {
        self.images
            .get(key)
            .ok_or_else(|| error::KeyError { key }.build())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Image)> {
        self.images.iter()
    }

    pub fn into_iter(self) -> impl Iterator<Item = (String, Image)> {
        self.images.into_iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &Image> {
        self.images.values()
    }
}

impl RasterStack for EagerRasterStack {
    fn keys(&self) -> Vec<String> {
        self.images.keys().cloned().collect()
    }
}

impl FromIterator<(String, Image)> for EagerRasterStack {
    fn from_iter<T: IntoIterator<Item = (String, Image)>>(iter: T) -> Self {
        EagerRasterStack {
            images: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{BoundingBox, SpatialReference};
    use ndarray::Array3;

    fn sample_image() -> Image {
        let data = Array3::<f64>::zeros((1, 2, 2));
        let mask = Array3::<bool>::from_elem((1, 2, 2), false);
        let bounds = BoundingBox::new(0.0, 0.0, 1.0, 1.0, SpatialReference::WGS84).unwrap();
        Image::new(data, mask, bounds, SpatialReference::WGS84).unwrap()
    }

    #[test]
    fn preserves_insertion_order() {
        let mut stack = EagerRasterStack::new();
        stack.insert("2021-02-01", sample_image());
        stack.insert("2021-01-01", sample_image());
        assert_eq!(stack.keys(), vec!["2021-02-01", "2021-01-01"]);
    }

    #[test]
    fn missing_key_errors() {
        let stack = EagerRasterStack::new();
        assert!(stack.get("missing").is_err());
    }
}
