use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[snafu(context(suffix(false)))]
pub enum Error {
    #[snafu(display("process '{process_id}' is missing required parameter '{parameter}'"))]
    ProcessParameterMissing {
        process_id: String,
        parameter: String,
    },

    #[snafu(display(
        "process '{process_id}' parameter '{parameter}' is invalid: {reason}"
    ))]
    ProcessParameterInvalid {
        process_id: String,
        parameter: String,
        reason: String,
    },

    #[snafu(display(
        "process '{process_id}' parameter '{parameter}' expected openEO type '{expected}' but got '{got}'"
    ))]
    TypeValidation {
        process_id: String,
        parameter: String,
        expected: String,
        got: String,
    },

    #[snafu(display("dimension '{dimension}' is not available on this data cube"))]
    DimensionNotAvailable { dimension: String },

    #[snafu(display("temporal extent '{extent}' matches no items"))]
    TemporalExtentEmpty { extent: String },

    #[snafu(display("items span more than one spatial reference system: {crs_list:?}"))]
    MixedCrs { crs_list: Vec<String> },

    #[snafu(display("requested output of {pixels} pixels exceeds the limit of {limit}"))]
    OutputLimitExceeded { pixels: u64, limit: u64 },

    #[snafu(display("request matched {count} items, exceeding the limit of {limit}"))]
    ItemsLimitExceeded { count: usize, limit: usize },

    #[snafu(display("no data available for collection '{collection}'"))]
    NoDataAvailable { collection: String },

    #[snafu(display("requested bbox does not intersect item '{item_id}'"))]
    TileOutsideBounds { item_id: String },

    #[snafu(display("no tasks were realised successfully"))]
    NoSuccessfulTasks,

    #[snafu(display("invalid process graph: {reason}"))]
    InvalidProcessGraph { reason: String },

    #[snafu(display("no unassigned tile available in the requested range"))]
    NoTileAvailable,

    #[snafu(display("no tile is assigned to user '{user_id}' on service '{service_id}'"))]
    TileNotAssigned { service_id: String, user_id: String },

    #[snafu(display("tile ({x}, {y}, {z}) is already submitted and locked"))]
    TileAlreadyLocked { x: u32, y: u32, z: u32 },

    #[snafu(display("STAC source error after {attempts} attempts: {source}"))]
    StacSource {
        attempts: u32,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[snafu(display("asset read error: {source}"))]
    AssetRead {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[snafu(display("{source}"))]
    Data { source: openeo_raster_datatypes::Error },

    #[snafu(display("unexpected error: {message}"))]
    Unexpected { message: String },
}

impl From<openeo_raster_datatypes::Error> for Error {
    fn from(source: openeo_raster_datatypes::Error) -> Self {
        Error::Data { source }
    }
}

/// HTTP status code this error should surface as, per the error taxonomy.
impl Error {
    pub fn status_code(&self) -> u16 {
        match self {
            Error::ProcessParameterMissing { .. }
            | Error::ProcessParameterInvalid { .. }
            | Error::DimensionNotAvailable { .. }
            | Error::TemporalExtentEmpty { .. }
            | Error::TypeValidation { .. } => 400,
            Error::MixedCrs { .. } | Error::InvalidProcessGraph { .. } => 422,
            Error::OutputLimitExceeded { .. } => 413,
            Error::ItemsLimitExceeded { .. } => 422,
            Error::NoDataAvailable { .. } => 404,
            Error::NoSuccessfulTasks => 404,
            Error::NoTileAvailable | Error::TileAlreadyLocked { .. } => 409,
            Error::TileNotAssigned { .. } => 404,
            Error::StacSource { .. } => 502,
            Error::TileOutsideBounds { .. } | Error::AssetRead { .. } | Error::Data { .. } => 500,
            Error::Unexpected { .. } => 500,
        }
    }
}
