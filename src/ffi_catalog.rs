//! # Per-sector FFI image catalogs
//!
//! A light-weight inventory of the full-frame images the survey published,
//! one Parquet file per sector (`tess-s{SSSS}-ffi-catalog.parquet`) with
//! columns
//!
//! | column | type | content |
//! |---|---|---|
//! | `filename` | utf8 | archive filename of the image |
//! | `camera` | u32 | camera id (1..=4) |
//! | `ccd`    | u32 | ccd id (1..=4) |
//! | `begin`  | f64 | exposure start (MJD, UTC) |
//! | `end`    | f64 | exposure end (MJD, UTC) |
//!
//! Every archive filename encodes its own `(sector, camera, ccd)` triple, so
//! the filename is the authoritative source for the ids; the id columns exist
//! for tools that filter without parsing names. [`list_images`] resolves the
//! classic "which images cover this detector at this time" question; pixel
//! coordinates are [`crate::tesslocate::TessLocate`]'s job.

use std::fs::File;
use std::sync::Arc;

use arrow_array::array::{Array, Float64Array, StringArray, UInt32Array};
use arrow_array::RecordBatch;
use arrow_schema::{DataType, Field, Schema};
use camino::{Utf8Path, Utf8PathBuf};
use hifitime::Epoch;
use once_cell::sync::Lazy;
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ProjectionMask};
use regex::Regex;

use crate::constants::{Camera, Ccd, CcdKey, Sector, CAMERA_COUNT, CCDS_PER_CAMERA, MJD};
use crate::tesslocate_errors::TessLocateError;
use crate::time::epoch_to_mjd;

/// Public archive prefix; appending a filename yields its download URL.
pub const FFI_URL_PREFIX: &str =
    "https://mast.stsci.edu/portal/Download/file?uri=mast:TESS/product/";

/// File name of the FFI catalog of `sector` inside a data directory.
pub fn ffi_catalog_filename(sector: Sector) -> String {
    format!("tess-s{sector:04}-ffi-catalog.parquet")
}

static FFI_FILENAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r".*-s(\d+)-(\d)-(\d)-.*").expect("hardcoded regex is valid")
});

/// One published full-frame image.
///
/// The `(sector, camera, ccd)` triple is decoded from the archive filename at
/// construction, so an `FfiImage` always carries consistent ids.
#[derive(Debug, Clone, PartialEq)]
pub struct FfiImage {
    pub filename: String,
    pub sector: Sector,
    pub camera: Camera,
    pub ccd: Ccd,
    /// Exposure start (MJD, UTC).
    pub begin: MJD,
    /// Exposure end (MJD, UTC).
    pub end: MJD,
}

impl FfiImage {
    /// Build an image entry from its archive filename and exposure span.
    ///
    /// Arguments
    /// -----------------
    /// * `filename`: archive name encoding `-s{sector}-{camera}-{ccd}-`.
    /// * `begin`, `end`: exposure span (MJD, UTC), both finite.
    ///
    /// Return
    /// ----------
    /// * The image, [`TessLocateError::InvalidFfiFilename`] when the name
    ///   does not encode a triple, or an id/timestamp validation error.
    pub fn new(
        filename: impl Into<String>,
        begin: MJD,
        end: MJD,
    ) -> Result<Self, TessLocateError> {
        let filename = filename.into();
        let caps = FFI_FILENAME_RE
            .captures(&filename)
            .ok_or_else(|| TessLocateError::InvalidFfiFilename(filename.clone()))?;
        let sector = caps[1]
            .parse::<Sector>()
            .map_err(|_| TessLocateError::InvalidFfiFilename(filename.clone()))?;
        let camera = caps[2]
            .parse::<Camera>()
            .map_err(|_| TessLocateError::InvalidFfiFilename(filename.clone()))?;
        let ccd = caps[3]
            .parse::<Ccd>()
            .map_err(|_| TessLocateError::InvalidFfiFilename(filename.clone()))?;
        if !(1..=CAMERA_COUNT).contains(&camera) {
            return Err(TessLocateError::InvalidCamera(camera));
        }
        if !(1..=CCDS_PER_CAMERA).contains(&ccd) {
            return Err(TessLocateError::InvalidCcd(ccd));
        }
        if !begin.is_finite() {
            return Err(TessLocateError::InvalidTimestamp(begin.to_string()));
        }
        if !end.is_finite() {
            return Err(TessLocateError::InvalidTimestamp(end.to_string()));
        }
        Ok(FfiImage {
            filename,
            sector,
            camera,
            ccd,
            begin,
            end,
        })
    }

    /// The `(sector, camera, ccd)` triple of this image.
    pub fn key(&self) -> CcdKey {
        CcdKey::new(self.sector, self.camera, self.ccd)
    }

    /// Download URL of the image at the public archive.
    pub fn url(&self) -> String {
        format!("{FFI_URL_PREFIX}{}", self.filename)
    }

    /// Whether the exposure span covers `mjd` (inclusive bounds).
    pub fn covers(&self, mjd: MJD) -> bool {
        (self.begin..=self.end).contains(&mjd)
    }
}

impl std::fmt::Display for FfiImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}  [{:.4}, {:.4}]", self.filename, self.begin, self.end)
    }
}

/// Ordered collection of [`FfiImage`] entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FfiImageList(Vec<FfiImage>);

impl FfiImageList {
    pub fn new() -> Self {
        FfiImageList(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&FfiImage> {
        self.0.get(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FfiImage> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[FfiImage] {
        self.0.as_slice()
    }

    /// Export as an Arrow record batch, one row per image.
    ///
    /// Columns: `filename (utf8), sector (u32), camera (u32), ccd (u32),
    /// begin (f64), end (f64), url (utf8)`; `url` is derived from the
    /// filename for convenience.
    pub fn to_record_batch(&self) -> Result<RecordBatch, TessLocateError> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("filename", DataType::Utf8, false),
            Field::new("sector", DataType::UInt32, false),
            Field::new("camera", DataType::UInt32, false),
            Field::new("ccd", DataType::UInt32, false),
            Field::new("begin", DataType::Float64, false),
            Field::new("end", DataType::Float64, false),
            Field::new("url", DataType::Utf8, false),
        ]));

        let filenames: StringArray = self.0.iter().map(|im| Some(im.filename.as_str())).collect();
        let sectors: UInt32Array = self.0.iter().map(|im| Some(im.sector)).collect();
        let cameras: UInt32Array = self.0.iter().map(|im| Some(im.camera as u32)).collect();
        let ccds: UInt32Array = self.0.iter().map(|im| Some(im.ccd as u32)).collect();
        let begins: Float64Array = self.0.iter().map(|im| Some(im.begin)).collect();
        let ends: Float64Array = self.0.iter().map(|im| Some(im.end)).collect();
        let urls: StringArray = self.0.iter().map(|im| Some(im.url())).collect();

        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(filenames),
                Arc::new(sectors),
                Arc::new(cameras),
                Arc::new(ccds),
                Arc::new(begins),
                Arc::new(ends),
                Arc::new(urls),
            ],
        )?;
        Ok(batch)
    }
}

impl From<Vec<FfiImage>> for FfiImageList {
    fn from(images: Vec<FfiImage>) -> Self {
        FfiImageList(images)
    }
}

impl std::ops::Index<usize> for FfiImageList {
    type Output = FfiImage;

    fn index(&self, idx: usize) -> &FfiImage {
        &self.0[idx]
    }
}

impl IntoIterator for FfiImageList {
    type Item = FfiImage;
    type IntoIter = std::vec::IntoIter<FfiImage>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a FfiImageList {
    type Item = &'a FfiImage;
    type IntoIter = std::slice::Iter<'a, FfiImage>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Compact renderer; collections longer than [`DISPLAY_LIMIT`] rows are
/// truncated with a trailing count.
const DISPLAY_LIMIT: usize = 10;

impl std::fmt::Display for FfiImageList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "FfiImageList of {} entries", self.len())?;
        for (idx, image) in self.0.iter().take(DISPLAY_LIMIT).enumerate() {
            writeln!(f, "{idx:>4}  {image}")?;
        }
        if self.len() > DISPLAY_LIMIT {
            writeln!(f, "      … ({} more)", self.len() - DISPLAY_LIMIT)?;
        }
        Ok(())
    }
}

/// List the images of one sector, optionally narrowed by detector and time.
///
/// Arguments
/// -----------------
/// * `data_dir`: directory holding `tess-sNNNN-ffi-catalog.parquet` files.
/// * `sector`: observing sector whose catalog is read; a missing catalog
///   file is an error here, unlike the locator's WCS lookups.
/// * `camera`, `ccd`: keep only images of this camera/ccd when given.
/// * `time`: keep only images whose exposure span covers this instant
///   (inclusive bounds) when given.
///
/// Return
/// ----------
/// * The matching images in catalog order.
///
/// See also
/// ------------
/// * [`FfiImage::covers`] – The time predicate.
/// * [`write_ffi_catalog_file`] – Producer of the catalog files.
pub fn list_images(
    data_dir: &Utf8Path,
    sector: Sector,
    camera: Option<Camera>,
    ccd: Option<Ccd>,
    time: Option<Epoch>,
) -> Result<FfiImageList, TessLocateError> {
    let path = data_dir.join(ffi_catalog_filename(sector));
    let mut images = read_ffi_file(&path)?;
    if let Some(camera) = camera {
        images.retain(|im| im.camera == camera);
    }
    if let Some(ccd) = ccd {
        images.retain(|im| im.ccd == ccd);
    }
    if let Some(time) = time {
        let mjd = epoch_to_mjd(time);
        images.retain(|im| im.covers(mjd));
    }
    log::debug!("{} images match in {path}", images.len());
    Ok(FfiImageList(images))
}

/// Read a whole per-sector FFI catalog file.
fn read_ffi_file(path: &Utf8Path) -> Result<Vec<FfiImage>, TessLocateError> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;

    let schema_descr = builder.metadata().file_metadata().schema_descr();
    let all_fields = schema_descr.columns();
    let column_names = ["filename", "begin", "end"];
    let projection_indices = column_names
        .iter()
        .map(|name| {
            all_fields
                .iter()
                .position(|f| f.name() == *name)
                .ok_or_else(|| {
                    TessLocateError::MalformedFfiCatalog(format!(
                        "column '{name}' not found in {path}"
                    ))
                })
        })
        .collect::<Result<Vec<usize>, TessLocateError>>()?;

    let mask = ProjectionMask::leaves(schema_descr, projection_indices);
    let reader = builder.with_projection(mask).with_batch_size(2048).build()?;

    let mut images = Vec::new();
    for maybe_batch in reader {
        let batch = maybe_batch?;
        let filenames = ffi_column::<StringArray>(&batch, "filename", path)?;
        let begins = ffi_column::<Float64Array>(&batch, "begin", path)?;
        let ends = ffi_column::<Float64Array>(&batch, "end", path)?;

        for row in 0..batch.num_rows() {
            images.push(FfiImage::new(
                filenames.value(row),
                begins.value(row),
                ends.value(row),
            )?);
        }
    }
    Ok(images)
}

fn ffi_column<'a, T: 'static>(
    batch: &'a RecordBatch,
    name: &str,
    path: &Utf8Path,
) -> Result<&'a T, TessLocateError> {
    let array = batch.column_by_name(name).ok_or_else(|| {
        TessLocateError::MalformedFfiCatalog(format!("column '{name}' not found in {path}"))
    })?;
    if array.null_count() > 0 {
        return Err(TessLocateError::MalformedFfiCatalog(format!(
            "column '{name}' holds nulls in {path}"
        )));
    }
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        TessLocateError::MalformedFfiCatalog(format!(
            "column '{name}' has an unexpected type in {path}"
        ))
    })
}

/// Write the FFI catalog file of one sector under `dir`, sorted by filename.
///
/// Used by data-preparation jobs and tests; the query side only reads.
pub fn write_ffi_catalog_file(
    dir: &Utf8Path,
    sector: Sector,
    images: &[FfiImage],
) -> Result<Utf8PathBuf, TessLocateError> {
    let mut ordered: Vec<&FfiImage> = images.iter().collect();
    ordered.sort_by(|a, b| a.filename.cmp(&b.filename));

    let schema = Arc::new(Schema::new(vec![
        Field::new("filename", DataType::Utf8, false),
        Field::new("camera", DataType::UInt32, false),
        Field::new("ccd", DataType::UInt32, false),
        Field::new("begin", DataType::Float64, false),
        Field::new("end", DataType::Float64, false),
    ]));

    let filenames: StringArray = ordered.iter().map(|im| Some(im.filename.as_str())).collect();
    let cameras: UInt32Array = ordered.iter().map(|im| Some(im.camera as u32)).collect();
    let ccds: UInt32Array = ordered.iter().map(|im| Some(im.ccd as u32)).collect();
    let begins: Float64Array = ordered.iter().map(|im| Some(im.begin)).collect();
    let ends: Float64Array = ordered.iter().map(|im| Some(im.end)).collect();

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(filenames),
            Arc::new(cameras),
            Arc::new(ccds),
            Arc::new(begins),
            Arc::new(ends),
        ],
    )?;

    let path = dir.join(ffi_catalog_filename(sector));
    let file = File::create(&path)?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(path)
}

#[cfg(test)]
mod ffi_catalog_test {
    use super::*;

    use crate::time::mjd_to_epoch;

    fn image(camera: Camera, ccd: Ccd, cadence: u32, begin: MJD) -> FfiImage {
        FfiImage::new(
            format!("tess2019279{cadence:06}-s0017-{camera}-{ccd}-0161-s_ffic.fits"),
            begin,
            begin + 0.02,
        )
        .unwrap()
    }

    #[test]
    fn test_filename_encodes_the_triple() {
        let image =
            FfiImage::new("tess2019279210107-s0017-1-3-0161-s_ffic.fits", 58764.0, 58764.02)
                .unwrap();
        assert_eq!(image.sector, 17);
        assert_eq!(image.camera, 1);
        assert_eq!(image.ccd, 3);
        assert_eq!(image.key(), CcdKey::new(17, 1, 3));
        assert_eq!(
            image.url(),
            "https://mast.stsci.edu/portal/Download/file?uri=mast:TESS/product/\
             tess2019279210107-s0017-1-3-0161-s_ffic.fits"
        );
    }

    #[test]
    fn test_rejects_bad_filenames() {
        assert_eq!(
            FfiImage::new("hlsp_qlp_llc_12345.fits", 58764.0, 58764.02).unwrap_err(),
            TessLocateError::InvalidFfiFilename("hlsp_qlp_llc_12345.fits".into())
        );
        assert_eq!(
            FfiImage::new("tess2019279210107-s0017-5-1-0161-s_ffic.fits", 58764.0, 58764.02)
                .unwrap_err(),
            TessLocateError::InvalidCamera(5)
        );
        assert_eq!(
            FfiImage::new("tess2019279210107-s0017-1-0-0161-s_ffic.fits", 58764.0, 58764.02)
                .unwrap_err(),
            TessLocateError::InvalidCcd(0)
        );
        assert!(matches!(
            FfiImage::new("tess2019279210107-s0017-1-1-0161-s_ffic.fits", f64::NAN, 58764.02),
            Err(TessLocateError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_covers_is_inclusive() {
        let image =
            FfiImage::new("tess2019279000000-s0017-1-1-0161-s_ffic.fits", 58764.0, 58764.02)
                .unwrap();
        assert!(image.covers(58764.0));
        assert!(image.covers(58764.02));
        assert!(image.covers(58764.01));
        assert!(!image.covers(58764.021));
        assert!(!image.covers(58763.999));
    }

    #[test]
    fn test_catalog_round_trip_with_filters() {
        let dir = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(dir.path()).unwrap();
        let images = vec![
            image(1, 1, 3, 58764.00),
            image(1, 1, 1, 58764.03),
            image(2, 4, 2, 58764.00),
        ];
        write_ffi_catalog_file(dir, 17, &images).unwrap();

        let all = list_images(dir, 17, None, None, None).unwrap();
        assert_eq!(all.len(), 3);
        // rows come back sorted by filename
        assert_eq!(all[0].filename, "tess2019279000001-s0017-1-1-0161-s_ffic.fits");
        assert_eq!(all[1].filename, "tess2019279000002-s0017-2-4-0161-s_ffic.fits");
        assert_eq!(all[2].filename, "tess2019279000003-s0017-1-1-0161-s_ffic.fits");

        let camera1 = list_images(dir, 17, Some(1), None, None).unwrap();
        assert_eq!(camera1.len(), 2);
        let ccd4 = list_images(dir, 17, None, Some(4), None).unwrap();
        assert_eq!(ccd4.len(), 1);
        assert_eq!(ccd4[0].key(), CcdKey::new(17, 2, 4));

        let at = list_images(dir, 17, Some(1), None, Some(mjd_to_epoch(58764.04))).unwrap();
        assert_eq!(at.len(), 1);
        assert_eq!(at[0].begin, 58764.03);
        let gap = list_images(dir, 17, None, None, Some(mjd_to_epoch(58770.0))).unwrap();
        assert!(gap.is_empty());
    }

    #[test]
    fn test_missing_catalog_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(dir.path()).unwrap();
        assert!(matches!(
            list_images(dir, 17, None, None, None),
            Err(TessLocateError::IoError(_))
        ));
    }

    #[test]
    fn test_display_truncates() {
        let images: Vec<FfiImage> = (0..12).map(|i| image(1, 1, i, 58764.0)).collect();
        let rendered = FfiImageList::from(images).to_string();
        assert!(rendered.starts_with("FfiImageList of 12 entries"));
        assert!(rendered.contains("(2 more)"));
    }
}
