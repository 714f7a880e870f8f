mod bounding_box;
mod spatial_reference;
mod temporal;

pub use bounding_box::BoundingBox;
pub use spatial_reference::SpatialReference;
pub use temporal::TemporalInterval;
