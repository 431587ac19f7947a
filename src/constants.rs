//! # Constants and type definitions for tesslocate
//!
//! This module centralizes the **detector geometry constants**, **index tuning
//! parameters**, and **common type definitions** used throughout the
//! `tesslocate` library. It also defines the key identifier type for detector
//! triples.
//!
//! ## Overview
//!
//! - Science-area pixel bounds of a single CCD
//! - Camera/CCD id ranges of the focal plane
//! - HEALPix resolution and cone radius used by the coarse index
//! - Core type aliases used across the crate
//! - [`CcdKey`], the `(sector, camera, ccd)` triple identifying one detector
//!   during one observing sector
//!
//! These definitions are used by all main modules, including the locator,
//! the coarse spatial index, and the WCS catalog readers.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::wcs::Wcs;

// -------------------------------------------------------------------------------------------------
// Detector geometry
// -------------------------------------------------------------------------------------------------

/// Number of cameras on the focal plane
pub const CAMERA_COUNT: u8 = 4;

/// Number of CCDs per camera
pub const CCDS_PER_CAMERA: u8 = 4;

/// First science column of a CCD, pixel-center convention (1-based FITS).
///
/// The leading 44 columns of the 2136-column raw frame are collateral pixels;
/// science data starts at column 45, whose left edge is 44.5.
pub const COLUMN_MIN: f64 = 44.5;

/// Last science column edge of a CCD
pub const COLUMN_MAX: f64 = 2092.5;

/// First science row edge of a CCD
pub const ROW_MIN: f64 = 0.5;

/// Last science row edge of a CCD
pub const ROW_MAX: f64 = 2048.5;

/// Column of the science-area center, used as the cone axis when indexing
pub const CCD_CENTER_COLUMN: f64 = (COLUMN_MIN + COLUMN_MAX) / 2.0;

/// Row of the science-area center
pub const CCD_CENTER_ROW: f64 = (ROW_MIN + ROW_MAX) / 2.0;

// -------------------------------------------------------------------------------------------------
// Coarse index tuning
// -------------------------------------------------------------------------------------------------

/// HEALPix resolution of the coarse sky index (nested scheme).
///
/// nside 64 partitions the sky into 49 152 cells of ~0.84° side, small enough
/// that a cell's candidate list stays short and large enough that the whole
/// table fits in a few hundred kilobytes.
pub const HEALPIX_NSIDE: u32 = 64;

/// Search-cone radius (degrees) applied around each CCD center when building
/// the coarse index.
///
/// The science area spans ~12° across, so the center-to-corner distance is
/// ~8.5°. The extra margin absorbs the nside-64 cell circumradius (~0.65°)
/// so that every cell overlapping the CCD footprint has its center inside the
/// cone. Over-approximation only adds false positives, which the exact WCS
/// projection filters out.
pub const CONE_RADIUS_DEG: f64 = 9.5;

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Angle in degrees
pub type Degree = f64;
/// Fractional pixel coordinate (1-based, pixel-center convention)
pub type Pixel = f64;
/// Observing sector number (1-based)
pub type Sector = u32;
/// Camera id on the focal plane (1..=4)
pub type Camera = u8;
/// CCD id within a camera (1..=4)
pub type Ccd = u8;

/// Modified Julian Date (days, UTC)
pub type MJD = f64;

/// Lookup table from detector triple to its parsed [`Wcs`]
pub type CcdWcsMap = HashMap<CcdKey, Arc<Wcs>, ahash::RandomState>;

// -------------------------------------------------------------------------------------------------
// Identifiers
// -------------------------------------------------------------------------------------------------

/// Identifier of one detector during one observing sector.
///
/// The focal plane carries 4 cameras of 4 CCDs each, so a sector exposes at
/// most 16 distinct triples. Ordering is lexicographic by
/// (sector, camera, ccd), which is also the candidate discovery order of the
/// coarse index.
///
/// Serialization uses the compact tuple form `[sector, camera, ccd]` so the
/// on-disk index stays small.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "(Sector, Camera, Ccd)", into = "(Sector, Camera, Ccd)")]
pub struct CcdKey {
    /// Observing sector number
    pub sector: Sector,
    /// Camera id (1..=4)
    pub camera: Camera,
    /// CCD id (1..=4)
    pub ccd: Ccd,
}

impl CcdKey {
    /// Build a key from its three components.
    pub fn new(sector: Sector, camera: Camera, ccd: Ccd) -> Self {
        CcdKey {
            sector,
            camera,
            ccd,
        }
    }
}

impl std::fmt::Display for CcdKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sector {}, camera {}, ccd {}",
            self.sector, self.camera, self.ccd
        )
    }
}

impl From<(Sector, Camera, Ccd)> for CcdKey {
    fn from((sector, camera, ccd): (Sector, Camera, Ccd)) -> Self {
        CcdKey {
            sector,
            camera,
            ccd,
        }
    }
}

impl From<CcdKey> for (Sector, Camera, Ccd) {
    fn from(key: CcdKey) -> Self {
        (key.sector, key.camera, key.ccd)
    }
}
