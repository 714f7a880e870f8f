use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{self, Error};

/// A coordinate reference system, addressed the way STAC/openEO address it:
/// an EPSG code in the overwhelming majority of cases, with a WKT escape
/// hatch for the rare CRS that has none.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SpatialReference {
    Epsg(u32),
    Wkt(String),
}

impl SpatialReference {
    pub const WGS84: SpatialReference = SpatialReference::Epsg(4326);
    pub const WEB_MERCATOR: SpatialReference = SpatialReference::Epsg(3857);

    /// Parses the common openEO/STAC spellings: `"EPSG:4326"`, `"epsg:4326"`,
    /// a bare `"4326"`, or a WKT string (identified by not parsing as a number).
    pub fn parse(value: &str) -> Result<Self, Error> {
        let trimmed = value.trim();
        if let Some(code) = trimmed
            .strip_prefix("EPSG:")
            .or_else(|| trimmed.strip_prefix("epsg:"))
        {
            return code
                .parse::<u32>()
                .map(SpatialReference::Epsg)
                .map_err(|_| error::InvalidSpatialReference { value }.build());
        }
        if let Ok(code) = trimmed.parse::<u32>() {
            return Ok(SpatialReference::Epsg(code));
        }
        if trimmed.to_uppercase().starts_with("GEOGCS")
            || trimmed.to_uppercase().starts_with("PROJCS")
        {
            return Ok(SpatialReference::Wkt(trimmed.to_string()));
        }
        Err(error::InvalidSpatialReference { value }.build())
    }

    pub fn is_wgs84(&self) -> bool {
        matches!(self, SpatialReference::Epsg(4326))
    }
}

impl Default for SpatialReference {
    fn default() -> Self {
        SpatialReference::WGS84
    }
}

impl fmt::Display for SpatialReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpatialReference::Epsg(code) => write!(f, "EPSG:{code}"),
            SpatialReference::Wkt(wkt) => write!(f, "{wkt}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_spellings() {
        assert_eq!(
            SpatialReference::parse("EPSG:4326").unwrap(),
            SpatialReference::Epsg(4326)
        );
        assert_eq!(
            SpatialReference::parse("epsg:3857").unwrap(),
            SpatialReference::Epsg(3857)
        );
        assert_eq!(
            SpatialReference::parse("4326").unwrap(),
            SpatialReference::Epsg(4326)
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(SpatialReference::parse("not-a-crs").is_err());
    }
}
