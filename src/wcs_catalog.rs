//! # Per-sector WCS catalogs
//!
//! This module stores and retrieves the raw projection headers of every
//! detector triple. On disk the catalog is one Parquet file per sector,
//! `tess-s{SSSS}-wcs-catalog.parquet`, with columns
//!
//! | column | type | content |
//! |---|---|---|
//! | `sector` | u32 | observing sector number |
//! | `camera` | u32 | camera id (1..=4) |
//! | `ccd`    | u32 | ccd id (1..=4) |
//! | `begin`  | f64 | first covered timestamp (MJD, UTC) |
//! | `end`    | f64 | last covered timestamp (MJD, UTC) |
//! | `wcs`    | utf8 | FITS-style header string of the projection |
//!
//! [`WcsStore`] is the seam between the locator and the storage: the
//! `Parquet` backend reads sector files lazily from a data directory and
//! caches them, the `Memory` backend serves a prebuilt table (tests,
//! embedders). Fetching a triple that is absent, or whose sector file is
//! absent, is not an error; the locator treats it as a candidate to skip.

use std::collections::HashMap;
use std::fs::File;
use std::sync::{Arc, PoisonError, RwLock};

use arrow_array::array::{Array, Float64Array, StringArray, UInt32Array};
use arrow_array::RecordBatch;
use arrow_schema::{DataType, Field, Schema};
use camino::{Utf8Path, Utf8PathBuf};
use once_cell::sync::Lazy;
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ProjectionMask};
use regex::Regex;

use crate::constants::{CcdKey, Sector, CAMERA_COUNT, CCDS_PER_CAMERA, MJD};
use crate::sector_dates::SectorWindow;
use crate::tesslocate_errors::TessLocateError;

/// One catalog row: the projection header of a detector triple together with
/// the time span it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct WcsRecord {
    pub key: CcdKey,
    pub begin: MJD,
    pub end: MJD,
    /// FITS-style header string, parsed on demand by [`crate::wcs::Wcs`]
    pub header: String,
}

type SectorMap = HashMap<CcdKey, WcsRecord, ahash::RandomState>;

static WCS_CATALOG_FILENAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^tess-s(\d{4})-wcs-catalog\.parquet$").expect("hardcoded regex is valid")
});

/// File name of the WCS catalog of `sector` inside a data directory.
pub fn wcs_catalog_filename(sector: Sector) -> String {
    format!("tess-s{sector:04}-wcs-catalog.parquet")
}

/// Storage backend for projection headers.
#[derive(Debug)]
pub enum WcsStore {
    /// Lazily read per-sector Parquet files from a data directory.
    Parquet(ParquetWcsCatalog),
    /// Serve a prebuilt in-memory table.
    Memory(MemoryWcsStore),
}

impl WcsStore {
    /// A store reading `tess-s{SSSS}-wcs-catalog.parquet` files under `dir`.
    pub fn parquet(dir: impl Into<Utf8PathBuf>) -> Self {
        WcsStore::Parquet(ParquetWcsCatalog {
            data_dir: dir.into(),
            sectors: RwLock::new(HashMap::default()),
        })
    }

    /// A store serving the given records from memory.
    pub fn memory(records: Vec<WcsRecord>) -> Self {
        let mut by_key: HashMap<CcdKey, WcsRecord, ahash::RandomState> = HashMap::default();
        for record in records {
            by_key.insert(record.key, record);
        }
        WcsStore::Memory(MemoryWcsStore { records: by_key })
    }

    /// Fetch the record of one triple.
    ///
    /// Return
    /// ----------
    /// * `Ok(Some(record))` when the catalog holds the triple,
    /// * `Ok(None)` when the triple (or its whole sector file) is absent,
    /// * `Err` when a sector file exists but cannot be read or violates the
    ///   catalog schema.
    pub fn fetch(&self, key: &CcdKey) -> Result<Option<WcsRecord>, TessLocateError> {
        match self {
            WcsStore::Parquet(catalog) => catalog.fetch(key),
            WcsStore::Memory(store) => Ok(store.records.get(key).cloned()),
        }
    }

    /// Aggregated validity window of every sector known to the store,
    /// sorted by sector: `[min(begin), max(end)]` over the sector's triples.
    ///
    /// Sectors whose catalog holds no rows are skipped. For the Parquet
    /// backend this loads every sector file once (they stay cached).
    pub fn sector_windows(&self) -> Result<Vec<SectorWindow>, TessLocateError> {
        match self {
            WcsStore::Parquet(catalog) => catalog.sector_windows(),
            WcsStore::Memory(store) => {
                let mut per_sector: HashMap<Sector, (MJD, MJD), ahash::RandomState> =
                    HashMap::default();
                for record in store.records.values() {
                    let entry = per_sector
                        .entry(record.key.sector)
                        .or_insert((record.begin, record.end));
                    entry.0 = entry.0.min(record.begin);
                    entry.1 = entry.1.max(record.end);
                }
                let mut windows: Vec<SectorWindow> = per_sector
                    .into_iter()
                    .map(|(sector, (begin, end))| SectorWindow { sector, begin, end })
                    .collect();
                windows.sort_by_key(|w| w.sector);
                Ok(windows)
            }
        }
    }
}

/// In-memory backend of [`WcsStore`].
#[derive(Debug)]
pub struct MemoryWcsStore {
    records: HashMap<CcdKey, WcsRecord, ahash::RandomState>,
}

/// Parquet backend of [`WcsStore`]: sector files are read on first touch and
/// cached for the lifetime of the store.
#[derive(Debug)]
pub struct ParquetWcsCatalog {
    data_dir: Utf8PathBuf,
    sectors: RwLock<HashMap<Sector, SectorMap, ahash::RandomState>>,
}

impl ParquetWcsCatalog {
    fn fetch(&self, key: &CcdKey) -> Result<Option<WcsRecord>, TessLocateError> {
        {
            let guard = self
                .sectors
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(map) = guard.get(&key.sector) {
                return Ok(map.get(key).cloned());
            }
        }
        let mut guard = self
            .sectors
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        // another thread may have loaded the sector while we waited
        if let Some(map) = guard.get(&key.sector) {
            return Ok(map.get(key).cloned());
        }
        let map = self.load_sector(key.sector)?;
        let record = map.get(key).cloned();
        guard.insert(key.sector, map);
        Ok(record)
    }

    /// Read one sector file, or an empty map when the file does not exist.
    fn load_sector(&self, sector: Sector) -> Result<SectorMap, TessLocateError> {
        let path = self.data_dir.join(wcs_catalog_filename(sector));
        if !path.exists() {
            log::debug!("no WCS catalog for sector {sector} at {path}");
            return Ok(SectorMap::default());
        }
        read_sector_file(&path)
    }

    /// Sector numbers present in the data directory, sorted.
    fn available_sectors(&self) -> Result<Vec<Sector>, TessLocateError> {
        let mut sectors = Vec::new();
        for entry in std::fs::read_dir(self.data_dir.as_std_path())? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(caps) = WCS_CATALOG_FILENAME_RE.captures(name) {
                if let Ok(sector) = caps[1].parse::<Sector>() {
                    sectors.push(sector);
                }
            }
        }
        sectors.sort_unstable();
        Ok(sectors)
    }

    fn sector_windows(&self) -> Result<Vec<SectorWindow>, TessLocateError> {
        let sectors = self.available_sectors()?;
        let mut windows = Vec::with_capacity(sectors.len());
        let mut guard = self
            .sectors
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for sector in sectors {
            if !guard.contains_key(&sector) {
                let map = self.load_sector(sector)?;
                guard.insert(sector, map);
            }
            let map = &guard[&sector];
            let window = map.values().fold(None, |acc: Option<(MJD, MJD)>, record| {
                Some(match acc {
                    None => (record.begin, record.end),
                    Some((begin, end)) => (begin.min(record.begin), end.max(record.end)),
                })
            });
            match window {
                Some((begin, end)) => windows.push(SectorWindow { sector, begin, end }),
                None => log::warn!("WCS catalog of sector {sector} holds no rows"),
            }
        }
        Ok(windows)
    }
}

/// Read a whole per-sector catalog file into a keyed map.
fn read_sector_file(path: &Utf8Path) -> Result<SectorMap, TessLocateError> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;

    let schema_descr = builder.metadata().file_metadata().schema_descr();
    let all_fields = schema_descr.columns();
    let column_names = ["sector", "camera", "ccd", "begin", "end", "wcs"];
    let projection_indices = column_names
        .iter()
        .map(|name| {
            all_fields
                .iter()
                .position(|f| f.name() == *name)
                .ok_or_else(|| {
                    TessLocateError::MalformedWcsCatalog(format!(
                        "column '{name}' not found in {path}"
                    ))
                })
        })
        .collect::<Result<Vec<usize>, TessLocateError>>()?;

    let mask = ProjectionMask::leaves(schema_descr, projection_indices);
    let reader = builder.with_projection(mask).with_batch_size(2048).build()?;

    let mut map = SectorMap::default();
    for maybe_batch in reader {
        let batch = maybe_batch?;
        let sector = column_u32(&batch, "sector", path)?;
        let camera = column_u32(&batch, "camera", path)?;
        let ccd = column_u32(&batch, "ccd", path)?;
        let begin = column_f64(&batch, "begin", path)?;
        let end = column_f64(&batch, "end", path)?;
        let wcs = column_utf8(&batch, "wcs", path)?;

        for row in 0..batch.num_rows() {
            let key = CcdKey::new(
                sector.value(row),
                checked_id(camera.value(row), CAMERA_COUNT, "camera", path)?,
                checked_id(ccd.value(row), CCDS_PER_CAMERA, "ccd", path)?,
            );
            map.insert(
                key,
                WcsRecord {
                    key,
                    begin: begin.value(row),
                    end: end.value(row),
                    header: wcs.value(row).to_string(),
                },
            );
        }
    }
    Ok(map)
}

fn checked_id(
    value: u32,
    max: u8,
    what: &str,
    path: &Utf8Path,
) -> Result<u8, TessLocateError> {
    match u8::try_from(value) {
        Ok(id) if (1..=max).contains(&id) => Ok(id),
        _ => Err(TessLocateError::MalformedWcsCatalog(format!(
            "{what} id {value} out of range in {path}"
        ))),
    }
}

fn column<'a, T: 'static>(
    batch: &'a RecordBatch,
    name: &str,
    path: &Utf8Path,
) -> Result<&'a T, TessLocateError> {
    let array = batch.column_by_name(name).ok_or_else(|| {
        TessLocateError::MalformedWcsCatalog(format!("column '{name}' not found in {path}"))
    })?;
    if array.null_count() > 0 {
        return Err(TessLocateError::MalformedWcsCatalog(format!(
            "column '{name}' holds nulls in {path}"
        )));
    }
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        TessLocateError::MalformedWcsCatalog(format!(
            "column '{name}' has an unexpected type in {path}"
        ))
    })
}

fn column_u32<'a>(
    batch: &'a RecordBatch,
    name: &str,
    path: &Utf8Path,
) -> Result<&'a UInt32Array, TessLocateError> {
    column::<UInt32Array>(batch, name, path)
}

fn column_f64<'a>(
    batch: &'a RecordBatch,
    name: &str,
    path: &Utf8Path,
) -> Result<&'a Float64Array, TessLocateError> {
    column::<Float64Array>(batch, name, path)
}

fn column_utf8<'a>(
    batch: &'a RecordBatch,
    name: &str,
    path: &Utf8Path,
) -> Result<&'a StringArray, TessLocateError> {
    column::<StringArray>(batch, name, path)
}

/// Write the catalog file of one sector under `dir`, one row per record.
///
/// Used by data-preparation jobs and tests; the locator itself only reads.
pub fn write_sector_file(
    dir: &Utf8Path,
    sector: Sector,
    records: &[WcsRecord],
) -> Result<Utf8PathBuf, TessLocateError> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("sector", DataType::UInt32, false),
        Field::new("camera", DataType::UInt32, false),
        Field::new("ccd", DataType::UInt32, false),
        Field::new("begin", DataType::Float64, false),
        Field::new("end", DataType::Float64, false),
        Field::new("wcs", DataType::Utf8, false),
    ]));

    let sectors: UInt32Array = records.iter().map(|r| Some(r.key.sector)).collect();
    let cameras: UInt32Array = records.iter().map(|r| Some(r.key.camera as u32)).collect();
    let ccds: UInt32Array = records.iter().map(|r| Some(r.key.ccd as u32)).collect();
    let begins: Float64Array = records.iter().map(|r| Some(r.begin)).collect();
    let ends: Float64Array = records.iter().map(|r| Some(r.end)).collect();
    let headers: StringArray = records.iter().map(|r| Some(r.header.as_str())).collect();

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(sectors),
            Arc::new(cameras),
            Arc::new(ccds),
            Arc::new(begins),
            Arc::new(ends),
            Arc::new(headers),
        ],
    )?;

    let path = dir.join(wcs_catalog_filename(sector));
    let file = File::create(&path)?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(path)
}

#[cfg(test)]
mod wcs_catalog_test {
    use super::*;
    use crate::constants::{Camera, Ccd};

    fn record(sector: Sector, camera: Camera, ccd: Ccd) -> WcsRecord {
        WcsRecord {
            key: CcdKey::new(sector, camera, ccd),
            begin: 58750.0,
            end: 58775.0,
            header: format!(
                "CRPIX1  = 1045.0\nCRPIX2  = 1001.0\n\
                 CRVAL1  = {}.0\nCRVAL2  = -40.0\n\
                 CD1_1   = -0.0058\nCD1_2   = 0.0\nCD2_1   = 0.0\nCD2_2   = 0.0058",
                10 * camera as u32 + ccd as u32
            ),
        }
    }

    #[test]
    fn test_memory_store_fetch() {
        let store = WcsStore::memory(vec![record(17, 1, 4), record(17, 2, 1)]);
        let hit = store.fetch(&CcdKey::new(17, 1, 4)).unwrap().unwrap();
        assert_eq!(hit.key, CcdKey::new(17, 1, 4));
        assert!(store.fetch(&CcdKey::new(17, 3, 3)).unwrap().is_none());
        assert!(store.fetch(&CcdKey::new(18, 1, 4)).unwrap().is_none());
    }

    #[test]
    fn test_memory_store_sector_windows() {
        let mut late = record(18, 1, 1);
        late.begin = 58790.0;
        late.end = 58815.0;
        let store = WcsStore::memory(vec![record(17, 1, 4), record(17, 2, 1), late]);
        let windows = store.sector_windows().unwrap();
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].sector, 17);
        assert_eq!(windows[0].begin, 58750.0);
        assert_eq!(windows[1].sector, 18);
        assert_eq!(windows[1].end, 58815.0);
    }

    #[test]
    fn test_parquet_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let dir_path = Utf8Path::from_path(dir.path()).unwrap();
        let records = vec![record(17, 1, 4), record(17, 2, 1)];
        write_sector_file(dir_path, 17, &records).unwrap();

        let store = WcsStore::parquet(dir_path);
        let hit = store.fetch(&CcdKey::new(17, 2, 1)).unwrap().unwrap();
        assert_eq!(hit, records[1]);
        // triple absent from an existing sector file
        assert!(store.fetch(&CcdKey::new(17, 4, 4)).unwrap().is_none());
        // sector file absent entirely
        assert!(store.fetch(&CcdKey::new(3, 1, 1)).unwrap().is_none());
    }

    #[test]
    fn test_parquet_sector_windows() {
        let dir = tempfile::tempdir().unwrap();
        let dir_path = Utf8Path::from_path(dir.path()).unwrap();
        write_sector_file(dir_path, 17, &[record(17, 1, 4)]).unwrap();
        let mut next = record(18, 2, 2);
        next.begin = 58790.0;
        next.end = 58815.0;
        write_sector_file(dir_path, 18, &[next]).unwrap();

        let store = WcsStore::parquet(dir_path);
        let windows = store.sector_windows().unwrap();
        assert_eq!(
            windows,
            vec![
                SectorWindow {
                    sector: 17,
                    begin: 58750.0,
                    end: 58775.0
                },
                SectorWindow {
                    sector: 18,
                    begin: 58790.0,
                    end: 58815.0
                },
            ]
        );
    }

    #[test]
    fn test_out_of_range_camera_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let dir_path = Utf8Path::from_path(dir.path()).unwrap();
        let mut bad = record(17, 1, 1);
        bad.key = CcdKey::new(17, 9, 1);
        write_sector_file(dir_path, 17, &[bad]).unwrap();

        let store = WcsStore::parquet(dir_path);
        let res = store.fetch(&CcdKey::new(17, 1, 1));
        assert!(matches!(
            res,
            Err(TessLocateError::MalformedWcsCatalog(_))
        ));
    }

    #[test]
    fn test_catalog_filename() {
        assert_eq!(wcs_catalog_filename(17), "tess-s0017-wcs-catalog.parquet");
        assert_eq!(wcs_catalog_filename(1), "tess-s0001-wcs-catalog.parquet");
    }
}
