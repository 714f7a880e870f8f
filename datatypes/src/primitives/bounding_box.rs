use serde::{Deserialize, Serialize};

use super::SpatialReference;
use crate::error::{self, Error};

/// An axis-aligned spatial extent in some `crs`. `west`/`east` are allowed to
/// wrap the antimeridian (`west > east`) the way STAC bboxes do; `south` must
/// stay `<= north`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
    #[serde(default)]
    pub crs: SpatialReference,
}

impl BoundingBox {
    pub fn new(
        west: f64,
        south: f64,
        east: f64,
        north: f64,
        crs: SpatialReference,
    ) -> Result<Self, Error> {
        if !west.is_finite()
            || !south.is_finite()
            || !east.is_finite()
            || !north.is_finite()
            || south > north
        {
            return Err(error::InvalidBoundingBox {
                west,
                south,
                east,
                north,
            }
            .build());
        }
        Ok(BoundingBox {
            west,
            south,
            east,
            north,
            crs,
        })
    }

    /// A bbox from a 4-element `[west, south, east, north]` array, as STAC
    /// items and openEO `bounding-box` parameters encode it.
    pub fn from_array(coords: [f64; 4], crs: SpatialReference) -> Result<Self, Error> {
        Self::new(coords[0], coords[1], coords[2], coords[3], crs)
    }

    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.west < other.east
            && other.west < self.east
            && self.south < other.north
            && other.south < self.north
    }

    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        if !self.intersects(other) {
            return None;
        }
        Some(BoundingBox {
            west: self.west.max(other.west),
            south: self.south.max(other.south),
            east: self.east.min(other.east),
            north: self.north.min(other.north),
            crs: self.crs.clone(),
        })
    }

    pub fn as_array(&self) -> [f64; 4] {
        [self.west, self.south, self.east, self.north]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inverted_latitude() {
        assert!(BoundingBox::new(0.0, 10.0, 1.0, 5.0, SpatialReference::WGS84).is_err());
    }

    #[test]
    fn computes_intersection() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0, SpatialReference::WGS84).unwrap();
        let b = BoundingBox::new(5.0, 5.0, 15.0, 15.0, SpatialReference::WGS84).unwrap();
        let i = a.intersection(&b).unwrap();
        assert_eq!(i.as_array(), [5.0, 5.0, 10.0, 10.0]);
    }

    #[test]
    fn disjoint_boxes_do_not_intersect() {
        let a = BoundingBox::new(0.0, 0.0, 1.0, 1.0, SpatialReference::WGS84).unwrap();
        let b = BoundingBox::new(2.0, 2.0, 3.0, 3.0, SpatialReference::WGS84).unwrap();
        assert!(a.intersection(&b).is_none());
    }
}
