use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[snafu(context(suffix(false)))]
pub enum Error {
    #[snafu(display(
        "image data shape {data_shape:?} does not match mask shape {mask_shape:?}"
    ))]
    MaskShapeMismatch {
        data_shape: (usize, usize, usize),
        mask_shape: (usize, usize, usize),
    },

    #[snafu(display(
        "image has {bands} bands but {band_names} band names were provided"
    ))]
    BandNameCountMismatch { bands: usize, band_names: usize },

    #[snafu(display(
        "cutline mask shape {mask_shape:?} does not match image shape {image_shape:?}"
    ))]
    CutlineMaskShapeMismatch {
        mask_shape: (usize, usize),
        image_shape: (usize, usize),
    },

    #[snafu(display("bounding box is invalid: west={west} south={south} east={east} north={north}"))]
    InvalidBoundingBox {
        west: f64,
        south: f64,
        east: f64,
        north: f64,
    },

    #[snafu(display("could not parse temporal extent '{value}': {reason}"))]
    InvalidTemporalExtent { value: String, reason: String },

    #[snafu(display("could not parse spatial reference '{value}'"))]
    InvalidSpatialReference { value: String },

    #[snafu(display("unknown band name '{name}'"))]
    UnknownBand { name: String },

    #[snafu(display("key '{key}' not found in raster stack"))]
    KeyError { key: String },

    #[snafu(display("raster stack has no successfully realised images"))]
    NoSuccessfulTasks,

    #[snafu(display("failed to realise stack entry '{key}': {message}"))]
    TaskRealizationFailed { key: String, message: String },
}
