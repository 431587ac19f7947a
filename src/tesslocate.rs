//! # TessLocate: sector calendar, spatial index, and projection cache
//!
//! This module defines the [`TessLocate`](crate::tesslocate::TessLocate) struct, the central façade that wires together:
//!
//! 1. **Sector calendar** ([`SectorCalendar`](crate::sector_dates::SectorCalendar)) – timestamp to sector resolution.
//! 2. **Coarse spatial index** ([`HealpixIndex`](crate::healpix::HealpixIndex)) – sky position to candidate
//!    `(sector, camera, ccd)` triples, with no false negatives.
//! 3. **Projection catalog access** ([`WcsStore`](crate::wcs_catalog::WcsStore)) – per-triple tangent-plane
//!    projections parsed into [`Wcs`](crate::wcs::Wcs) instances and retained behind `Arc` handles.
//!
//! The design emphasizes *lazy initialization* and *idempotent caching*:
//! - The calendar and the spatial index are loaded (or rebuilt) on first use via
//!   [`OnceCell`](once_cell::sync::OnceCell), then reused.
//! - Parsed projections accumulate in an internal map; each catalog header is parsed once.
//!
//! Construction itself touches no files, so a locator can be built unconditionally
//! and only pays for the catalogs a query actually reaches.
//!
//! ## Key responsibilities
//!
//! - **Sky to pixel** resolution through [`locate`](crate::tesslocate::TessLocate::locate) and
//!   [`locate_many`](crate::tesslocate::TessLocate::locate_many), honoring per-target epoch or
//!   sector constraints
//! - **Pixel to sky** resolution through [`to_sky`](crate::tesslocate::TessLocate::to_sky)
//! - Candidate pruning through the HEALPix index before any exact projection runs
//! - Classification of per-candidate failures (missing projection, diverged projection,
//!   pixel outside the science area) as *skips*, never as hard errors
//!
//! ## Typical usage
//!
//! ```rust, no_run
//! use tesslocate::tesscoord::SkyPosition;
//! use tesslocate::tesslocate::{SectorConstraint, TessLocate};
//!
//! // Instantiate the locator over a data directory; nothing is read yet
//! let locator = TessLocate::new("data");
//!
//! // Find every detector pixel that ever observed this position
//! let star = SkyPosition::new(84.291188, -80.469120).unwrap();
//! let found = locator.locate(&star, SectorConstraint::Any).unwrap();
//! for coord in found.iter() {
//!     println!("{coord}");
//! }
//! ```
//!
//! ## Notes
//!
//! - The data directory is expected to hold per-sector projection catalogs
//!   (`tess-sNNNN-wcs-catalog.parquet`), optionally a pre-built spatial index
//!   (`tess-healpix-index.json.gz`) and a sector-dates table
//!   (`tess-sector-dates.csv`). Missing index and calendar files are derived
//!   from the catalogs instead of failing.
//!
//! ## See also
//! ------------
//! * [`SectorCalendar`](crate::sector_dates::SectorCalendar) – Observing-window table behind epoch constraints.
//! * [`HealpixIndex`](crate::healpix::HealpixIndex) – Cone-overlap index pruning the candidate set.
//! * [`WcsStore`](crate::wcs_catalog::WcsStore) – Parquet-backed or in-memory projection catalog.
//! * [`TessCoord`](crate::tesscoord::TessCoord) / [`TessCoordList`](crate::tesscoord::TessCoordList) – Query results.
//!
//! ## Panics & errors
//!
//! - No method here panics on bad input; malformed catalogs, unknown triples and
//!   shape mismatches are surfaced as [`TessLocateError`](crate::tesslocate_errors::TessLocateError).

use std::sync::{Arc, PoisonError, RwLock};

use camino::Utf8PathBuf;
use hifitime::Epoch;
use once_cell::sync::OnceCell;

use crate::{
    constants::{CcdKey, CcdWcsMap, Sector, MJD},
    healpix::{HealpixIndex, HEALPIX_INDEX_FILENAME},
    sector_dates::{SectorCalendar, SECTOR_DATES_FILENAME},
    tesscoord::{SkyPosition, TessCoord, TessCoordList},
    tesslocate_errors::TessLocateError,
    time::epoch_to_mjd,
    wcs::Wcs,
    wcs_catalog::WcsStore,
};

/// Epoch constraint applied to a single located target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SectorConstraint {
    /// Search every sector the spatial index covers.
    Any,
    /// Restrict to the sector observing at this instant. A timestamp falling
    /// in a downlink gap matches no sector and yields an empty result.
    Time(Epoch),
    /// Restrict to one explicit sector number.
    Sector(Sector),
}

/// Epoch constraints applied to a batch of targets.
///
/// The `Times` and `Sectors` forms carry one entry per target and must match
/// the target slice length exactly; `Any` applies to every target.
#[derive(Debug, Clone, Copy)]
pub enum SectorConstraints<'a> {
    Any,
    Times(&'a [Epoch]),
    Sectors(&'a [Sector]),
}

#[derive(Debug)]
pub struct TessLocate {
    data_dir: Option<Utf8PathBuf>,
    wcs_store: WcsStore,
    calendar: OnceCell<SectorCalendar>,
    healpix: OnceCell<HealpixIndex>,
    wcs_cache: RwLock<CcdWcsMap>,
}

impl TessLocate {
    /// Construct a locator over a data directory of per-sector catalogs.
    ///
    /// Nothing is read here; the calendar, the spatial index and individual
    /// projections are loaded lazily the first time a query needs them.
    ///
    /// Arguments
    /// -----------------
    /// * `data_dir`: directory holding `tess-sNNNN-wcs-catalog.parquet` files
    ///   and, optionally, the index and sector-dates files.
    ///
    /// See also
    /// ------------
    /// * [`TessLocate::from_parts`] – Build from already-loaded components.
    pub fn new(data_dir: impl Into<Utf8PathBuf>) -> Self {
        let data_dir = data_dir.into();
        TessLocate {
            wcs_store: WcsStore::parquet(data_dir.clone()),
            data_dir: Some(data_dir),
            calendar: OnceCell::new(),
            healpix: OnceCell::new(),
            wcs_cache: RwLock::new(CcdWcsMap::default()),
        }
    }

    /// Assemble a locator from components built elsewhere.
    ///
    /// Useful with an in-memory [`WcsStore`] and a freshly built index, e.g.
    /// in tests or when the catalogs come from somewhere other than a local
    /// data directory. The calendar and index cells start out filled, so no
    /// lazy loading happens later.
    pub fn from_parts(store: WcsStore, calendar: SectorCalendar, index: HealpixIndex) -> Self {
        TessLocate {
            data_dir: None,
            wcs_store: store,
            calendar: OnceCell::with_value(calendar),
            healpix: OnceCell::with_value(index),
            wcs_cache: RwLock::new(CcdWcsMap::default()),
        }
    }

    /// The projection catalog this locator reads from.
    pub fn wcs_store(&self) -> &WcsStore {
        &self.wcs_store
    }

    /// Get the lazily-initialized sector calendar.
    ///
    /// On first call the calendar is read from `tess-sector-dates.csv` in the
    /// data directory. When that file is absent, the calendar is derived from
    /// the validity windows of the projection catalogs instead, so epoch
    /// queries keep working on a directory that ships only catalogs.
    ///
    /// Return
    /// ----------
    /// * `&SectorCalendar` on success, or a [`TessLocateError`] if no source
    ///   for the calendar exists.
    ///
    /// See also
    /// ------------
    /// * [`SectorCalendar::from_csv_path`] – Underlying CSV loader.
    /// * [`WcsStore::sector_windows`] – Fallback source of observing windows.
    pub fn get_calendar(&self) -> Result<&SectorCalendar, TessLocateError> {
        self.calendar.get_or_try_init(|| match &self.data_dir {
            Some(dir) => {
                let path = dir.join(SECTOR_DATES_FILENAME);
                if path.is_file() {
                    SectorCalendar::from_csv_path(&path)
                } else {
                    log::debug!(
                        "no {SECTOR_DATES_FILENAME} under {dir}, deriving the calendar from the catalogs"
                    );
                    let windows = self.wcs_store.sector_windows()?;
                    if windows.is_empty() {
                        return Err(TessLocateError::MissingCalendar(dir.to_string()));
                    }
                    SectorCalendar::from_windows(windows)
                }
            }
            None => {
                let windows = self.wcs_store.sector_windows()?;
                if windows.is_empty() {
                    return Err(TessLocateError::MissingCalendar(
                        "locator has no data directory and an empty catalog".into(),
                    ));
                }
                SectorCalendar::from_windows(windows)
            }
        })
    }

    /// Get the lazily-initialized HEALPix index.
    ///
    /// On first call the index is read from `tess-healpix-index.json.gz` in
    /// the data directory; when that file is absent it is rebuilt from the
    /// projection catalogs, which takes a few seconds per hundred triples but
    /// leaves query results identical.
    ///
    /// See also
    /// ------------
    /// * [`HealpixIndex::build`] – The rebuild path.
    /// * [`HealpixIndex::read_gzip_json`] – The pre-built path.
    pub fn get_healpix(&self) -> Result<&HealpixIndex, TessLocateError> {
        self.healpix.get_or_try_init(|| match &self.data_dir {
            Some(dir) => {
                let path = dir.join(HEALPIX_INDEX_FILENAME);
                if path.is_file() {
                    HealpixIndex::read_gzip_json(&path)
                } else {
                    log::debug!(
                        "no {HEALPIX_INDEX_FILENAME} under {dir}, building the index from the catalogs"
                    );
                    HealpixIndex::build(&self.wcs_store)
                }
            }
            None => HealpixIndex::build(&self.wcs_store),
        })
    }

    /// Get the parsed projection for one `(sector, camera, ccd)` triple.
    ///
    /// The first request for a triple fetches its header from the catalog and
    /// parses it; later requests clone the cached [`Arc`].
    ///
    /// Arguments
    /// -----------------
    /// * `key`: the triple to resolve.
    ///
    /// Return
    /// ----------
    /// * A shared handle to the projection, or
    ///   [`TessLocateError::WcsNotFound`] when the catalog has no record for
    ///   the triple.
    pub fn get_wcs(&self, key: &CcdKey) -> Result<Arc<Wcs>, TessLocateError> {
        {
            let cache = self
                .wcs_cache
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(wcs) = cache.get(key) {
                return Ok(wcs.clone());
            }
        }
        let mut cache = self
            .wcs_cache
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(wcs) = cache.get(key) {
            return Ok(wcs.clone());
        }
        let record = self
            .wcs_store
            .fetch(key)?
            .ok_or(TessLocateError::WcsNotFound(*key))?;
        let wcs = Arc::new(Wcs::from_header_str(&record.header)?);
        cache.insert(*key, wcs.clone());
        Ok(wcs)
    }

    /// Resolve one sky position to every detector pixel that observed it.
    ///
    /// Candidates come from the HEALPix index, are filtered by the epoch
    /// constraint, then projected exactly. A candidate whose projection is
    /// missing from the catalog, diverges for this position, or lands outside
    /// the science pixel area is skipped silently (logged at debug level);
    /// anything else, a malformed catalog for instance, aborts the query.
    ///
    /// Arguments
    /// -----------------
    /// * `target`: the sky position to resolve.
    /// * `constraint`: epoch restriction, see [`SectorConstraint`].
    ///
    /// Return
    /// ----------
    /// * All matching pixel locations in candidate-discovery order, possibly
    ///   empty. With [`SectorConstraint::Time`] each result carries the query
    ///   timestamp; otherwise the time field is empty.
    ///
    /// See also
    /// ------------
    /// * [`TessLocate::locate_many`] – Batch form with per-target constraints.
    /// * [`TessLocate::to_sky`] – The inverse resolution.
    pub fn locate(
        &self,
        target: &SkyPosition,
        constraint: SectorConstraint,
    ) -> Result<TessCoordList, TessLocateError> {
        let mut results = TessCoordList::new();
        self.locate_into(target, constraint, &mut results)?;
        Ok(results)
    }

    /// Resolve a batch of sky positions, one constraint per target.
    ///
    /// The constraint slice length is checked against the target slice length
    /// before any catalog access; a mismatch fails the whole call with
    /// [`TessLocateError::ShapeMismatch`] and resolves nothing.
    ///
    /// Arguments
    /// -----------------
    /// * `targets`: sky positions to resolve.
    /// * `constraints`: [`SectorConstraints::Any`], or exactly one
    ///   epoch/sector entry per target.
    ///
    /// Return
    /// ----------
    /// * Matches for all targets concatenated in target order, each target's
    ///   matches in candidate-discovery order.
    pub fn locate_many(
        &self,
        targets: &[SkyPosition],
        constraints: SectorConstraints<'_>,
    ) -> Result<TessCoordList, TessLocateError> {
        let expected = match constraints {
            SectorConstraints::Any => None,
            SectorConstraints::Times(times) => Some(times.len()),
            SectorConstraints::Sectors(sectors) => Some(sectors.len()),
        };
        if let Some(len) = expected {
            if len != targets.len() {
                return Err(TessLocateError::ShapeMismatch {
                    targets: targets.len(),
                    constraints: len,
                });
            }
        }

        let mut results = TessCoordList::new();
        for (idx, target) in targets.iter().enumerate() {
            let constraint = match constraints {
                SectorConstraints::Any => SectorConstraint::Any,
                SectorConstraints::Times(times) => SectorConstraint::Time(times[idx]),
                SectorConstraints::Sectors(sectors) => SectorConstraint::Sector(sectors[idx]),
            };
            self.locate_into(target, constraint, &mut results)?;
        }
        Ok(results)
    }

    /// Resolve a pixel location back to its sky position.
    ///
    /// Unlike [`locate`](TessLocate::locate), a missing projection is a hard
    /// error here: the caller named one specific triple, so there is nothing
    /// to fall back to.
    pub fn to_sky(&self, coord: &TessCoord) -> Result<SkyPosition, TessLocateError> {
        let wcs = self.get_wcs(&coord.key())?;
        let (ra, dec) = wcs.pixel_to_world(coord.column, coord.row);
        SkyPosition::new(ra, dec)
    }

    /// Run the candidate pipeline for one target, appending matches.
    fn locate_into(
        &self,
        target: &SkyPosition,
        constraint: SectorConstraint,
        results: &mut TessCoordList,
    ) -> Result<(), TessLocateError> {
        let (sector_filter, time) = match constraint {
            SectorConstraint::Any => (None, None),
            SectorConstraint::Sector(sector) => (Some(sector), None),
            SectorConstraint::Time(epoch) => {
                let mjd = epoch_to_mjd(epoch);
                match self.get_calendar()?.sector_for_mjd(mjd) {
                    Some(sector) => (Some(sector), Some(mjd)),
                    None => {
                        log::debug!("MJD {mjd} falls in a downlink gap, no sector matches");
                        return Ok(());
                    }
                }
            }
        };

        for key in self.get_healpix()?.lookup(target) {
            if let Some(sector) = sector_filter {
                if key.sector != sector {
                    continue;
                }
            }
            let wcs = match self.get_wcs(key) {
                Ok(wcs) => wcs,
                Err(TessLocateError::WcsNotFound(_)) => {
                    log::debug!("skipping {key}: no projection in the catalog");
                    continue;
                }
                Err(other) => return Err(other),
            };
            let (column, row) = match wcs.world_to_pixel(target.ra, target.dec) {
                Ok(pixel) => pixel,
                Err(TessLocateError::ProjectionDiverged { .. }) => {
                    log::debug!("skipping {key}: target is behind its tangent plane");
                    continue;
                }
                Err(other) => return Err(other),
            };
            match TessCoord::new(key.sector, key.camera, key.ccd, column, row, time) {
                Ok(coord) => results.push(coord),
                Err(TessLocateError::ColumnOutOfRange(_) | TessLocateError::RowOutOfRange(_)) => {
                    log::debug!("skipping {key}: ({column:.2}, {row:.2}) is outside the science area");
                    continue;
                }
                Err(other) => return Err(other),
            }
        }
        Ok(())
    }
}
