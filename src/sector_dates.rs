//! Observing-sector calendar: maps timestamps to sector numbers.
//!
//! The calendar is a small table of `(sector, begin, end)` windows loaded
//! wholesale from a CSV file (or derived from the WCS catalog validity
//! windows, see [`crate::tesslocate::TessLocate`]). Window bounds are
//! inclusive at both ends; the gaps between consecutive windows are the
//! downlink intervals during which the instrument did not observe, and they
//! resolve to no sector at all.

use std::io::Read;

use camino::Utf8Path;
use hifitime::Epoch;
use serde::Deserialize;

use crate::constants::{Sector, MJD};
use crate::tesslocate_errors::TessLocateError;
use crate::time::{epoch_to_mjd, iso_to_mjd};

/// File name of the sector-dates table inside a locator data directory.
pub const SECTOR_DATES_FILENAME: &str = "tess-sector-dates.csv";

/// One observing window: the sector observed continuously from `begin` to
/// `end` (MJD, UTC, inclusive bounds).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SectorWindow {
    pub sector: Sector,
    pub begin: MJD,
    pub end: MJD,
}

/// CSV row shape of the sector-dates table.
#[derive(Debug, Deserialize)]
struct SectorDatesRow {
    sector: Sector,
    begin: String,
    end: String,
}

/// Validated, ordered table of observing windows.
#[derive(Debug, Clone, PartialEq)]
pub struct SectorCalendar {
    windows: Vec<SectorWindow>,
}

impl SectorCalendar {
    /// Load the calendar from a `sector,begin,end` CSV file with ISO-8601
    /// UTC timestamps.
    pub fn from_csv_path(path: &Utf8Path) -> Result<Self, TessLocateError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// Load the calendar from any CSV reader (same format as
    /// [`SectorCalendar::from_csv_path`]).
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, TessLocateError> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let mut windows = Vec::new();
        for row in csv_reader.deserialize::<SectorDatesRow>() {
            let row = row?;
            windows.push(SectorWindow {
                sector: row.sector,
                begin: iso_to_mjd(&row.begin)?,
                end: iso_to_mjd(&row.end)?,
            });
        }
        Self::from_windows(windows)
    }

    /// Build a calendar from pre-parsed windows, validating the table:
    /// finite bounds, `begin <= end`, strictly increasing sector numbers,
    /// non-overlapping windows.
    pub fn from_windows(windows: Vec<SectorWindow>) -> Result<Self, TessLocateError> {
        for window in &windows {
            if !window.begin.is_finite() || !window.end.is_finite() {
                return Err(TessLocateError::MalformedSectorDates(format!(
                    "sector {} has a non-finite bound",
                    window.sector
                )));
            }
            if window.begin > window.end {
                return Err(TessLocateError::MalformedSectorDates(format!(
                    "sector {} window ends before it begins",
                    window.sector
                )));
            }
        }
        for pair in windows.windows(2) {
            if pair[1].sector <= pair[0].sector {
                return Err(TessLocateError::MalformedSectorDates(format!(
                    "sector numbers not strictly increasing around sector {}",
                    pair[0].sector
                )));
            }
            if pair[1].begin <= pair[0].end {
                return Err(TessLocateError::MalformedSectorDates(format!(
                    "windows of sectors {} and {} overlap",
                    pair[0].sector, pair[1].sector
                )));
            }
        }
        Ok(SectorCalendar { windows })
    }

    /// Sector observed at `epoch`, or `None` during downlink gaps and
    /// outside the covered range.
    pub fn sector_for(&self, epoch: Epoch) -> Option<Sector> {
        self.sector_for_mjd(epoch_to_mjd(epoch))
    }

    /// Same as [`SectorCalendar::sector_for`] on a raw MJD (UTC days).
    pub fn sector_for_mjd(&self, mjd: MJD) -> Option<Sector> {
        // first window whose end is not before `mjd`
        let idx = self.windows.partition_point(|w| w.end < mjd);
        self.windows
            .get(idx)
            .and_then(|w| (w.begin <= mjd && mjd <= w.end).then_some(w.sector))
    }

    /// Batch form of [`SectorCalendar::sector_for`]; order preserving.
    pub fn sectors_for(&self, epochs: &[Epoch]) -> Vec<Option<Sector>> {
        epochs.iter().map(|e| self.sector_for(*e)).collect()
    }

    /// Observing window of `sector`, if the calendar covers it.
    pub fn window(&self, sector: Sector) -> Option<SectorWindow> {
        self.windows.iter().find(|w| w.sector == sector).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SectorWindow> {
        self.windows.iter()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
