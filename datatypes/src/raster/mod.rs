mod image;
mod lazy_image_ref;
mod lazy_stack;
mod stack;

pub use image::{BandStatistics, Image};
pub use lazy_image_ref::{BoxError, LazyImageRef, TargetGeometry, TaskRealizer};
pub use lazy_stack::{LazyRasterStack, ReadTask};
pub use stack::{EagerRasterStack, RasterStack};
