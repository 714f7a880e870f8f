use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{self, Error};

/// An openEO temporal interval: `[start, end]`, either bound `null` for an
/// open range. Serializes/parses the RFC3339 `"start/end"` string form STAC
/// and openEO both use, including the `../end` and `start/..` spellings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalInterval {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TemporalInterval {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Result<Self, Error> {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(error::InvalidTemporalExtent {
                    value: format!("{s}/{e}"),
                    reason: "start is after end".to_string(),
                }
                .build());
            }
        }
        Ok(TemporalInterval { start, end })
    }

    /// Parses `"start/end"`, `"start/.."`, `"../end"`, or a bare instant
    /// (treated as a zero-width interval).
    pub fn parse(value: &str) -> Result<Self, Error> {
        let invalid = |reason: &str| {
            error::InvalidTemporalExtent {
                value: value.to_string(),
                reason: reason.to_string(),
            }
            .build()
        };

        match value.split_once('/') {
            Some((start, end)) => {
                let start = parse_bound(start).map_err(|_| invalid("bad start timestamp"))?;
                let end = parse_bound(end).map_err(|_| invalid("bad end timestamp"))?;
                if start.is_none() && end.is_none() {
                    return Err(invalid("both bounds open"));
                }
                Self::new(start, end)
            }
            None => {
                let instant = DateTime::parse_from_rfc3339(value)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|_| invalid("bad timestamp"))?;
                Self::new(Some(instant), Some(instant))
            }
        }
    }

    pub fn is_open_start(&self) -> bool {
        self.start.is_none()
    }

    pub fn is_open_end(&self) -> bool {
        self.end.is_none()
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| instant >= s) && self.end.map_or(true, |e| instant <= e)
    }

    /// Renders back to the STAC `"start/end"` wire format, `..` for open
    /// bounds.
    pub fn to_range_string(&self) -> String {
        let start = self
            .start
            .map(|s| s.to_rfc3339())
            .unwrap_or_else(|| "..".to_string());
        let end = self
            .end
            .map(|e| e.to_rfc3339())
            .unwrap_or_else(|| "..".to_string());
        format!("{start}/{end}")
    }
}

fn parse_bound(value: &str) -> Result<Option<DateTime<Utc>>, chrono::ParseError> {
    if value == ".." || value.is_empty() {
        return Ok(None);
    }
    DateTime::parse_from_rfc3339(value).map(|dt| Some(dt.with_timezone(&Utc)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_closed_range() {
        let interval =
            TemporalInterval::parse("2021-01-01T00:00:00Z/2021-02-01T00:00:00Z").unwrap();
        assert!(interval.start.is_some());
        assert!(interval.end.is_some());
    }

    #[test]
    fn parses_open_start() {
        let interval = TemporalInterval::parse("../2021-02-01T00:00:00Z").unwrap();
        assert!(interval.is_open_start());
        assert!(!interval.is_open_end());
    }

    #[test]
    fn rejects_fully_open_range() {
        assert!(TemporalInterval::parse("../..").is_err());
    }

    #[test]
    fn round_trips_range_string() {
        let interval =
            TemporalInterval::parse("2021-01-01T00:00:00Z/2021-02-01T00:00:00Z").unwrap();
        let rendered = interval.to_range_string();
        assert!(rendered.contains("2021-01-01"));
        assert!(rendered.contains("2021-02-01"));
    }
}
