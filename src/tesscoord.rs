//! # Coordinate value objects
//!
//! [`SkyPosition`] is a validated ICRS sky coordinate. [`TessCoord`] binds a
//! fractional pixel position on one detector to one observing sector, with
//! an optional timestamp; construction enforces the science-area bounds and
//! never clamps. [`TessCoordList`] is the ordered collection returned by the
//! locator, with Arrow interchange and a truncating table renderer.

use std::sync::Arc;

use arrow_array::array::{Array, Float64Array, UInt32Array};
use arrow_array::RecordBatch;
use arrow_schema::{DataType, Field, Schema};

use crate::constants::{
    Camera, Ccd, CcdKey, Degree, Pixel, Sector, CAMERA_COUNT, CCDS_PER_CAMERA, COLUMN_MAX,
    COLUMN_MIN, MJD, ROW_MAX, ROW_MIN,
};
use crate::healpix::cells::angular_separation;
use crate::tesslocate::TessLocate;
use crate::tesslocate_errors::TessLocateError;

/// A validated ICRS sky coordinate in degrees.
///
/// Right ascension is normalized into [0, 360) at construction; declination
/// must lie in [-90, +90]. Non-finite input is rejected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyPosition {
    pub ra: Degree,
    pub dec: Degree,
}

impl SkyPosition {
    pub fn new(ra: Degree, dec: Degree) -> Result<Self, TessLocateError> {
        if !ra.is_finite() {
            return Err(TessLocateError::NonFiniteSkyCoordinate(ra));
        }
        if !dec.is_finite() {
            return Err(TessLocateError::NonFiniteSkyCoordinate(dec));
        }
        if !(-90.0..=90.0).contains(&dec) {
            return Err(TessLocateError::InvalidDeclination(dec));
        }
        let mut ra = ra.rem_euclid(360.0);
        // rem_euclid of a tiny negative value can round up to exactly 360
        if ra >= 360.0 {
            ra = 0.0;
        }
        Ok(SkyPosition { ra, dec })
    }

    /// Angular separation to another position, degrees.
    pub fn separation_to(&self, other: &SkyPosition) -> Degree {
        angular_separation(self.ra, self.dec, other.ra, other.dec)
    }
}

impl std::fmt::Display for SkyPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.ra, self.dec)
    }
}

/// One located point: a detector pixel position during one sector.
///
/// See also
/// ------------
/// * [`crate::tesslocate::TessLocate::locate`] – produces these.
/// * [`TessCoordList`] – the collection type with tabular interchange.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TessCoord {
    pub sector: Sector,
    pub camera: Camera,
    pub ccd: Ccd,
    pub column: Pixel,
    pub row: Pixel,
    /// Observing timestamp (MJD, UTC), when the query carried one
    pub time: Option<MJD>,
}

impl TessCoord {
    /// Build a located point, validating every field.
    ///
    /// Arguments
    /// -----------------
    /// * `sector`: observing sector number.
    /// * `camera`, `ccd`: ids in 1..=4.
    /// * `column`: fractional pixel in [44.5, 2092.5] (inclusive).
    /// * `row`: fractional pixel in [0.5, 2048.5] (inclusive).
    /// * `time`: optional timestamp (MJD, UTC); must be finite when present.
    ///
    /// Return
    /// ----------
    /// * The point, or the first violated constraint. Out-of-range values
    ///   are reported, never clamped; NaN fails the range checks.
    pub fn new(
        sector: Sector,
        camera: Camera,
        ccd: Ccd,
        column: Pixel,
        row: Pixel,
        time: Option<MJD>,
    ) -> Result<Self, TessLocateError> {
        if !(1..=CAMERA_COUNT).contains(&camera) {
            return Err(TessLocateError::InvalidCamera(camera));
        }
        if !(1..=CCDS_PER_CAMERA).contains(&ccd) {
            return Err(TessLocateError::InvalidCcd(ccd));
        }
        if !(COLUMN_MIN..=COLUMN_MAX).contains(&column) {
            return Err(TessLocateError::ColumnOutOfRange(column));
        }
        if !(ROW_MIN..=ROW_MAX).contains(&row) {
            return Err(TessLocateError::RowOutOfRange(row));
        }
        if let Some(t) = time {
            if !t.is_finite() {
                return Err(TessLocateError::InvalidTimestamp(t.to_string()));
            }
        }
        Ok(TessCoord {
            sector,
            camera,
            ccd,
            column,
            row,
            time,
        })
    }

    /// The `(sector, camera, ccd)` triple of this point.
    pub fn key(&self) -> CcdKey {
        CcdKey::new(self.sector, self.camera, self.ccd)
    }

    /// Sky position of this pixel, using the locator's projection catalog.
    pub fn to_sky(&self, locator: &TessLocate) -> Result<SkyPosition, TessLocateError> {
        locator.to_sky(self)
    }
}

impl std::fmt::Display for TessCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sector {:>2} camera {} ccd {} column {:>8.2} row {:>8.2}",
            self.sector, self.camera, self.ccd, self.column, self.row
        )?;
        if let Some(t) = self.time {
            write!(f, " time {t:.6}")?;
        }
        Ok(())
    }
}

/// Ordered collection of located points.
///
/// Equality compares the tabular projection of both lists: same length, same
/// values column by column, with absent timestamps only equal to absent
/// timestamps. Since every field of a valid [`TessCoord`] is finite, this is
/// exactly element-wise equality, which is what the derived impl does.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TessCoordList(Vec<TessCoord>);

/// Arrow schema of the tabular projection (`time` is the only nullable
/// column).
fn coord_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("sector", DataType::UInt32, false),
        Field::new("camera", DataType::UInt32, false),
        Field::new("ccd", DataType::UInt32, false),
        Field::new("column", DataType::Float64, false),
        Field::new("row", DataType::Float64, false),
        Field::new("time", DataType::Float64, true),
    ]))
}

impl TessCoordList {
    pub fn new() -> Self {
        TessCoordList(Vec::new())
    }

    pub(crate) fn push(&mut self, coord: TessCoord) {
        self.0.push(coord);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&TessCoord> {
        self.0.get(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TessCoord> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[TessCoord] {
        &self.0
    }

    /// Export as an Arrow record batch, one row per point.
    ///
    /// Columns: `sector (u32), camera (u32), ccd (u32), column (f64),
    /// row (f64), time (f64, nullable)`.
    pub fn to_record_batch(&self) -> Result<RecordBatch, TessLocateError> {
        let sectors: UInt32Array = self.0.iter().map(|c| Some(c.sector)).collect();
        let cameras: UInt32Array = self.0.iter().map(|c| Some(c.camera as u32)).collect();
        let ccds: UInt32Array = self.0.iter().map(|c| Some(c.ccd as u32)).collect();
        let columns: Float64Array = self.0.iter().map(|c| Some(c.column)).collect();
        let rows: Float64Array = self.0.iter().map(|c| Some(c.row)).collect();
        let times: Float64Array = self.0.iter().map(|c| c.time).collect();

        let batch = RecordBatch::try_new(
            coord_schema(),
            vec![
                Arc::new(sectors),
                Arc::new(cameras),
                Arc::new(ccds),
                Arc::new(columns),
                Arc::new(rows),
                Arc::new(times),
            ],
        )?;
        Ok(batch)
    }

    /// Import the inverse of [`TessCoordList::to_record_batch`], validating
    /// every row as if constructed directly.
    pub fn from_record_batch(batch: &RecordBatch) -> Result<Self, TessLocateError> {
        let sectors = coord_column::<UInt32Array>(batch, "sector")?;
        let cameras = coord_column::<UInt32Array>(batch, "camera")?;
        let ccds = coord_column::<UInt32Array>(batch, "ccd")?;
        let columns = coord_column::<Float64Array>(batch, "column")?;
        let rows = coord_column::<Float64Array>(batch, "row")?;
        let times = coord_column::<Float64Array>(batch, "time")?;

        for (name, array) in [
            ("sector", sectors as &dyn Array),
            ("camera", cameras as &dyn Array),
            ("ccd", ccds as &dyn Array),
            ("column", columns as &dyn Array),
            ("row", rows as &dyn Array),
        ] {
            if array.null_count() > 0 {
                return Err(TessLocateError::MalformedCoordTable(format!(
                    "column '{name}' holds nulls"
                )));
            }
        }

        let mut coords = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let camera = narrow_id(cameras.value(row), "camera")?;
            let ccd = narrow_id(ccds.value(row), "ccd")?;
            let time = (!times.is_null(row)).then(|| times.value(row));
            coords.push(TessCoord::new(
                sectors.value(row),
                camera,
                ccd,
                columns.value(row),
                rows.value(row),
                time,
            )?);
        }
        Ok(TessCoordList(coords))
    }
}

fn coord_column<'a, T: 'static>(
    batch: &'a RecordBatch,
    name: &str,
) -> Result<&'a T, TessLocateError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| {
            TessLocateError::MalformedCoordTable(format!("column '{name}' is missing"))
        })?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| {
            TessLocateError::MalformedCoordTable(format!(
                "column '{name}' has an unexpected type"
            ))
        })
}

fn narrow_id(value: u32, what: &str) -> Result<u8, TessLocateError> {
    u8::try_from(value).map_err(|_| {
        TessLocateError::MalformedCoordTable(format!("{what} id {value} does not fit a u8"))
    })
}

impl From<Vec<TessCoord>> for TessCoordList {
    fn from(coords: Vec<TessCoord>) -> Self {
        TessCoordList(coords)
    }
}

impl std::ops::Index<usize> for TessCoordList {
    type Output = TessCoord;

    fn index(&self, idx: usize) -> &TessCoord {
        &self.0[idx]
    }
}

impl IntoIterator for TessCoordList {
    type Item = TessCoord;
    type IntoIter = std::vec::IntoIter<TessCoord>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a TessCoordList {
    type Item = &'a TessCoord;
    type IntoIter = std::slice::Iter<'a, TessCoord>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Compact table renderer; collections longer than [`DISPLAY_LIMIT`] rows
/// are truncated with a trailing count.
const DISPLAY_LIMIT: usize = 10;

impl std::fmt::Display for TessCoordList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "TessCoordList of {} entries", self.len())?;
        for (idx, coord) in self.0.iter().take(DISPLAY_LIMIT).enumerate() {
            writeln!(f, "{idx:>4}  {coord}")?;
        }
        if self.len() > DISPLAY_LIMIT {
            writeln!(f, "      … ({} more)", self.len() - DISPLAY_LIMIT)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tesscoord_test {
    use super::*;

    #[test]
    fn test_sky_position_normalizes_ra() {
        assert_eq!(SkyPosition::new(370.0, 10.0).unwrap().ra, 10.0);
        assert_eq!(SkyPosition::new(-30.0, 10.0).unwrap().ra, 330.0);
        assert_eq!(SkyPosition::new(360.0, 10.0).unwrap().ra, 0.0);
    }

    #[test]
    fn test_sky_position_rejects_bad_input() {
        assert!(matches!(
            SkyPosition::new(10.0, 91.0),
            Err(TessLocateError::InvalidDeclination(_))
        ));
        assert!(matches!(
            SkyPosition::new(f64::NAN, 0.0),
            Err(TessLocateError::NonFiniteSkyCoordinate(_))
        ));
        assert!(matches!(
            SkyPosition::new(0.0, f64::INFINITY),
            Err(TessLocateError::NonFiniteSkyCoordinate(_))
        ));
    }

    #[test]
    fn test_separation() {
        let a = SkyPosition::new(0.0, 0.0).unwrap();
        let b = SkyPosition::new(90.0, 0.0).unwrap();
        approx::assert_relative_eq!(a.separation_to(&b), 90.0, epsilon = 1e-9);
    }

    #[test]
    fn test_tesscoord_accepts_exact_bounds() {
        let low = TessCoord::new(17, 1, 4, COLUMN_MIN, ROW_MIN, None).unwrap();
        assert_eq!(low.column, COLUMN_MIN);
        let high = TessCoord::new(17, 4, 1, COLUMN_MAX, ROW_MAX, None).unwrap();
        assert_eq!(high.row, ROW_MAX);
    }

    #[test]
    fn test_tesscoord_rejects_out_of_range_pixels() {
        assert!(matches!(
            TessCoord::new(17, 1, 4, 44.49999999999999, 1000.0, None),
            Err(TessLocateError::ColumnOutOfRange(_))
        ));
        assert!(matches!(
            TessCoord::new(17, 1, 4, 2092.5000000001, 1000.0, None),
            Err(TessLocateError::ColumnOutOfRange(_))
        ));
        assert!(matches!(
            TessCoord::new(17, 1, 4, 1000.0, 0.4, None),
            Err(TessLocateError::RowOutOfRange(_))
        ));
        assert!(matches!(
            TessCoord::new(17, 1, 4, 1000.0, 2048.6, None),
            Err(TessLocateError::RowOutOfRange(_))
        ));
        // NaN must not slip through the range checks
        assert!(matches!(
            TessCoord::new(17, 1, 4, f64::NAN, 1000.0, None),
            Err(TessLocateError::ColumnOutOfRange(_))
        ));
    }

    #[test]
    fn test_tesscoord_rejects_bad_ids() {
        assert!(matches!(
            TessCoord::new(17, 0, 4, 1000.0, 1000.0, None),
            Err(TessLocateError::InvalidCamera(0))
        ));
        assert!(matches!(
            TessCoord::new(17, 5, 4, 1000.0, 1000.0, None),
            Err(TessLocateError::InvalidCamera(5))
        ));
        assert!(matches!(
            TessCoord::new(17, 1, 5, 1000.0, 1000.0, None),
            Err(TessLocateError::InvalidCcd(5))
        ));
    }

    #[test]
    fn test_record_batch_round_trip() {
        let list = TessCoordList::from(vec![
            TessCoord::new(17, 1, 4, 1700.25, 2000.5, Some(58790.123)).unwrap(),
            TessCoord::new(18, 2, 3, 44.5, 0.5, None).unwrap(),
        ]);
        let batch = list.to_record_batch().unwrap();
        assert_eq!(batch.num_rows(), 2);
        let back = TessCoordList::from_record_batch(&batch).unwrap();
        assert_eq!(back, list);
    }

    #[test]
    fn test_record_batch_round_trip_empty() {
        let list = TessCoordList::new();
        let batch = list.to_record_batch().unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(TessCoordList::from_record_batch(&batch).unwrap(), list);
    }

    #[test]
    fn test_from_record_batch_rejects_missing_column() {
        let list = TessCoordList::from(vec![
            TessCoord::new(17, 1, 4, 1700.25, 2000.5, None).unwrap()
        ]);
        let batch = list.to_record_batch().unwrap();
        let narrowed = batch.project(&[0, 1, 2, 3, 4]).unwrap();
        assert!(matches!(
            TessCoordList::from_record_batch(&narrowed),
            Err(TessLocateError::MalformedCoordTable(_))
        ));
    }

    #[test]
    fn test_display_truncates() {
        let coords: Vec<TessCoord> = (0..15)
            .map(|i| TessCoord::new(17, 1, 4, 100.0 + i as f64, 200.0, None).unwrap())
            .collect();
        let rendered = TessCoordList::from(coords).to_string();
        assert!(rendered.contains("TessCoordList of 15 entries"));
        assert!(rendered.contains("… (5 more)"));
        assert!(!rendered.contains("114.00"));
    }
}
