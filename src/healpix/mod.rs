//! # Coarse spatial index
//!
//! Maps every HEALPix cell to the detector triples whose footprint could
//! intersect it, so that a locate query only has to project a handful of
//! candidates instead of every triple of every sector.
//!
//! ## Overview
//!
//! [`HealpixIndex::build`] walks every `(sector, camera, ccd)` of a
//! [`WcsStore`], projects the detector center to the sky and registers the
//! triple in every cell whose center lies within [`CONE_RADIUS_DEG`] of it.
//! The radius over-approximates the footprint, so the index never misses a
//! detector that truly covers a position (no false negatives); the extra
//! candidates it yields are discarded by the exact projection stage of the
//! locator.
//!
//! The index persists as a gzip-compressed JSON file
//! (`tess-healpix-index.json.gz`) recording nside and radius alongside the
//! cell table, and is validated on load.

pub mod cells;

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};

use camino::Utf8Path;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use itertools::iproduct;
use serde::{Deserialize, Serialize};

use crate::constants::{
    CcdKey, Degree, CAMERA_COUNT, CCDS_PER_CAMERA, CCD_CENTER_COLUMN, CCD_CENTER_ROW,
    CONE_RADIUS_DEG, HEALPIX_NSIDE,
};
use crate::tesscoord::SkyPosition;
use crate::tesslocate_errors::TessLocateError;
use crate::wcs::Wcs;
use crate::wcs_catalog::WcsStore;
use cells::{ang2pix, cone_cells, n_cells};

/// Standard file name of the persisted index inside a data directory.
pub const HEALPIX_INDEX_FILENAME: &str = "tess-healpix-index.json.gz";

/// Cell id → detector triples whose footprint could reach the cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealpixIndex {
    nside: u32,
    radius: Degree,
    table: HashMap<u64, Vec<CcdKey>, ahash::RandomState>,
}

impl HealpixIndex {
    /// Build the index over every triple of `store`, with the default
    /// resolution and cone radius.
    pub fn build(store: &WcsStore) -> Result<Self, TessLocateError> {
        Self::build_with(store, HEALPIX_NSIDE, CONE_RADIUS_DEG)
    }

    /// Build the index with an explicit resolution and cone radius.
    ///
    /// Arguments
    /// -----------------
    /// * `store`: catalog of projection headers; every sector it reports via
    ///   [`WcsStore::sector_windows`] is indexed.
    /// * `nside`: HEALPix resolution (power of two).
    /// * `radius`: cone radius in degrees around each detector center; must
    ///   be at least the detector center-to-corner distance plus the cell
    ///   circumradius for the no-false-negative guarantee to hold.
    ///
    /// Return
    /// ----------
    /// * The index, or an error when a sector file is unreadable or a header
    ///   does not parse. Triples absent from the store are skipped.
    pub fn build_with(
        store: &WcsStore,
        nside: u32,
        radius: Degree,
    ) -> Result<Self, TessLocateError> {
        if nside == 0 || !nside.is_power_of_two() {
            return Err(TessLocateError::MalformedHealpixIndex(format!(
                "nside {nside} is not a power of two"
            )));
        }
        let windows = store.sector_windows()?;
        let mut table: HashMap<u64, Vec<CcdKey>, ahash::RandomState> = HashMap::default();
        let mut indexed = 0usize;

        for (window, camera, ccd) in
            iproduct!(windows.iter(), 1..=CAMERA_COUNT, 1..=CCDS_PER_CAMERA)
        {
            let key = CcdKey::new(window.sector, camera, ccd);
            let Some(record) = store.fetch(&key)? else {
                log::debug!("skipping {key}: not in the WCS catalog");
                continue;
            };
            let wcs = Wcs::from_header_str(&record.header)?;
            let (ra, dec) = wcs.pixel_to_world(CCD_CENTER_COLUMN, CCD_CENTER_ROW);
            for cell in cone_cells(nside, ra, dec, radius) {
                table.entry(cell).or_default().push(key);
            }
            indexed += 1;
        }
        log::debug!(
            "indexed {indexed} detector triples over {} cells",
            table.len()
        );

        Ok(HealpixIndex {
            nside,
            radius,
            table,
        })
    }

    /// Candidate triples for a sky position. Empty when no detector reaches
    /// the position's cell.
    pub fn lookup(&self, position: &SkyPosition) -> &[CcdKey] {
        let cell = ang2pix(self.nside, position.ra, position.dec);
        self.table.get(&cell).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Batch form of [`HealpixIndex::lookup`]; order and length preserving.
    pub fn lookup_many(&self, positions: &[SkyPosition]) -> Vec<&[CcdKey]> {
        positions.iter().map(|p| self.lookup(p)).collect()
    }

    pub fn nside(&self) -> u32 {
        self.nside
    }

    pub fn radius(&self) -> Degree {
        self.radius
    }

    /// Number of non-empty cells.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Write the index as gzip-compressed JSON.
    pub fn write_gzip_json(&self, path: &Utf8Path) -> Result<(), TessLocateError> {
        let file = File::create(path)?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        serde_json::to_writer(&mut encoder, self)?;
        encoder.finish()?;
        Ok(())
    }

    /// Read an index written by [`HealpixIndex::write_gzip_json`] and
    /// validate its invariants.
    pub fn read_gzip_json(path: &Utf8Path) -> Result<Self, TessLocateError> {
        let file = File::open(path)?;
        let decoder = GzDecoder::new(BufReader::new(file));
        let index: HealpixIndex = serde_json::from_reader(decoder)?;
        index.validate(path)?;
        Ok(index)
    }

    fn validate(&self, path: &Utf8Path) -> Result<(), TessLocateError> {
        if self.nside == 0 || !self.nside.is_power_of_two() {
            return Err(TessLocateError::MalformedHealpixIndex(format!(
                "nside {} in {path} is not a power of two",
                self.nside
            )));
        }
        if !self.radius.is_finite() || self.radius <= 0.0 {
            return Err(TessLocateError::MalformedHealpixIndex(format!(
                "cone radius {} in {path} is not a positive number",
                self.radius
            )));
        }
        let max_cell = n_cells(self.nside);
        if let Some(cell) = self.table.keys().find(|&&cell| cell >= max_cell) {
            return Err(TessLocateError::MalformedHealpixIndex(format!(
                "cell id {cell} in {path} exceeds the nside {} cell count",
                self.nside
            )));
        }
        Ok(())
    }
}
