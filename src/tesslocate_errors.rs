use thiserror::Error;

use crate::constants::CcdKey;

/// Crate-wide error type.
///
/// Two variants are recoverable inside the locate pipeline and make a
/// candidate detector drop out of the result set instead of aborting the
/// query: [`TessLocateError::WcsNotFound`] (the catalog has no projection for
/// the triple) and [`TessLocateError::ProjectionDiverged`] (the target lies
/// behind the tangent plane of the candidate's projection). Out-of-range
/// pixel coordinates reported by [`TessLocateError::ColumnOutOfRange`] and
/// [`TessLocateError::RowOutOfRange`] are likewise skip-conditions during a
/// locate, but fatal when constructing a coordinate directly. Everything else
/// aborts the operation that raised it.
#[derive(Error, Debug)]
pub enum TessLocateError {
    #[error("`targets` and the epoch constraint must have matching lengths ({targets} targets, {constraints} constraints)")]
    ShapeMismatch { targets: usize, constraints: usize },

    #[error("camera id must be in 1..=4, got {0}")]
    InvalidCamera(u8),

    #[error("ccd id must be in 1..=4, got {0}")]
    InvalidCcd(u8),

    #[error("column {0} outside the science area [44.5, 2092.5]")]
    ColumnOutOfRange(f64),

    #[error("row {0} outside the science area [0.5, 2048.5]")]
    RowOutOfRange(f64),

    #[error("declination must be in [-90, +90] degrees, got {0}")]
    InvalidDeclination(f64),

    #[error("sky coordinate must be finite, got {0}")]
    NonFiniteSkyCoordinate(f64),

    #[error("no WCS in the catalog for {0}")]
    WcsNotFound(CcdKey),

    #[error("sky position (ra={ra}, dec={dec}) does not project onto the tangent plane")]
    ProjectionDiverged { ra: f64, dec: f64 },

    #[error("malformed WCS header: {0}")]
    MalformedWcsHeader(String),

    #[error("malformed sector-dates table: {0}")]
    MalformedSectorDates(String),

    #[error("malformed HEALPix index file: {0}")]
    MalformedHealpixIndex(String),

    #[error("malformed WCS catalog: {0}")]
    MalformedWcsCatalog(String),

    #[error("malformed coordinate table: {0}")]
    MalformedCoordTable(String),

    #[error("malformed FFI catalog: {0}")]
    MalformedFfiCatalog(String),

    #[error("FFI filename does not encode a (sector, camera, ccd) triple: {0}")]
    InvalidFfiFilename(String),

    #[error("no sector-dates file and no WCS catalog to derive the calendar from: {0}")]
    MissingCalendar(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("unable to perform file operation: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Parquet error: {0}")]
    ParquetError(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow_schema::ArrowError),
}

impl PartialEq for TessLocateError {
    fn eq(&self, other: &Self) -> bool {
        use TessLocateError::*;
        match (self, other) {
            (
                ShapeMismatch {
                    targets: a,
                    constraints: b,
                },
                ShapeMismatch {
                    targets: c,
                    constraints: d,
                },
            ) => a == c && b == d,
            (InvalidCamera(a), InvalidCamera(b)) => a == b,
            (InvalidCcd(a), InvalidCcd(b)) => a == b,
            (ColumnOutOfRange(a), ColumnOutOfRange(b)) => a == b,
            (RowOutOfRange(a), RowOutOfRange(b)) => a == b,
            (InvalidDeclination(a), InvalidDeclination(b)) => a == b,
            (NonFiniteSkyCoordinate(a), NonFiniteSkyCoordinate(b)) => a == b,
            (WcsNotFound(a), WcsNotFound(b)) => a == b,
            (
                ProjectionDiverged { ra: a, dec: b },
                ProjectionDiverged { ra: c, dec: d },
            ) => a == c && b == d,
            (MalformedWcsHeader(a), MalformedWcsHeader(b)) => a == b,
            (MalformedSectorDates(a), MalformedSectorDates(b)) => a == b,
            (MalformedHealpixIndex(a), MalformedHealpixIndex(b)) => a == b,
            (MalformedWcsCatalog(a), MalformedWcsCatalog(b)) => a == b,
            (MalformedCoordTable(a), MalformedCoordTable(b)) => a == b,
            (MalformedFfiCatalog(a), MalformedFfiCatalog(b)) => a == b,
            (InvalidFfiFilename(a), InvalidFfiFilename(b)) => a == b,
            (MissingCalendar(a), MissingCalendar(b)) => a == b,
            (InvalidTimestamp(a), InvalidTimestamp(b)) => a == b,

            // Wrapped foreign errors are not comparable: equal if same variant
            (IoError(_), IoError(_)) => true,
            (CsvError(_), CsvError(_)) => true,
            (JsonError(_), JsonError(_)) => true,
            (ParquetError(_), ParquetError(_)) => true,
            (ArrowError(_), ArrowError(_)) => true,

            _ => false,
        }
    }
}
