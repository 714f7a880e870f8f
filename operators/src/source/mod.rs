//! STAC-backed data loading: query building and CQL2 translation, output-
//! dimension estimation, the GDAL asset reader, and the `load_collection`
//! family of entry points built on top of them.

mod cql2;
mod dimension;
mod load_collection;
mod reader;
mod stac;

pub use cql2::properties_to_cql2;
pub use dimension::{datetime_group_key, estimate_output_dimensions, group_items_by_datetime, EstimatedDimensions};
pub use load_collection::{load_collection, load_collection_and_reduce, load_stac, LoadCollectionArgs, ProcessingLimits};
pub use reader::{cutline_mask, read_window, GdalAssetReader, WindowRequest};
pub use stac::{build_item_query, get_items_with_retry, ItemQuery, StacSource, DEFAULT_FIELDS};
