//! Core data types for the openEO raster processing pipeline: images, raster
//! stacks (eager and lazy), spatial/temporal primitives, and the small
//! external-interface records (`User`, `StacItem`, `TileAssignment`) shared
//! between the processing core and its collaborators.

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod primitives;
pub mod raster;
pub mod stac;
pub mod tile;
pub mod user;

pub use error::{Error, Result};
pub use primitives::{BoundingBox, SpatialReference, TemporalInterval};
pub use raster::{
    BandStatistics, BoxError, EagerRasterStack, Image, LazyImageRef, LazyRasterStack, ReadTask,
    RasterStack, TargetGeometry, TaskRealizer,
};
pub use stac::{Asset, StacItem};
pub use tile::{TileAssignment, TileStage};
pub use user::User;
