mod filter_bands;
mod pixel_selection;
mod reduce;

pub use filter_bands::{filter_bands, BandSelector};
pub use pixel_selection::{mosaic_stack, PixelSelectionMethod};
pub use reduce::{reduce_dimension, BuiltinReducer, Dimension, Reducer};
