#![allow(dead_code)]

use std::sync::LazyLock;

use tesslocate::constants::{Camera, Ccd, CcdKey, Degree, MJD};
use tesslocate::healpix::HealpixIndex;
use tesslocate::sector_dates::{SectorCalendar, SectorWindow};
use tesslocate::tesslocate::TessLocate;
use tesslocate::wcs_catalog::{WcsRecord, WcsStore};

/// Pi Mensae-like position observed by sector 17 camera 1 CCD 4 and again by
/// sector 18 camera 1 CCD 1.
pub const KNOWN_STAR_RA: Degree = 84.291188;
pub const KNOWN_STAR_DEC: Degree = -80.46912;

pub const SECTOR17_MID_MJD: MJD = 58770.0;
pub const SECTOR19_MID_MJD: MJD = 58820.0;

/// One shared locator per test binary; building the index takes a moment.
pub static SURVEY: LazyLock<TessLocate> = LazyLock::new(|| {
    let store = WcsStore::memory(survey_records());
    let index = HealpixIndex::build(&store).expect("building the survey index");
    TessLocate::from_parts(store, survey_calendar(), index)
});

/// A TAN header with the science-area center as reference pixel, a TESS-like
/// plate scale and the tangent point at `(ra, dec)`.
pub fn survey_header(ra: Degree, dec: Degree) -> String {
    format!(
        "CRPIX1  =               1068.5\n\
         CRPIX2  =               1024.5\n\
         CRVAL1  =     {ra:>16.10}\n\
         CRVAL2  =     {dec:>16.10}\n\
         CD1_1   =            -0.005699\n\
         CD1_2   =             0.001527\n\
         CD2_1   =             0.001527\n\
         CD2_2   =             0.005699\n\
         CTYPE1  = 'RA---TAN'\n\
         CTYPE2  = 'DEC--TAN'"
    )
}

fn tangent_of(camera: Camera, ccd: Ccd) -> (Degree, Degree) {
    if (camera, ccd) == (1, 4) {
        return (KNOWN_STAR_RA, KNOWN_STAR_DEC);
    }
    let slot = ((camera - 1) * 4 + (ccd - 1)) as f64;
    ((slot * 80.0) % 360.0, -60.0 + slot * 8.0)
}

/// Three observing sectors: 17 fully populated with camera 1 / CCD 4 on the
/// known star, 18 re-observing the same field with camera 1 / CCD 1, and 19
/// pointing far away from it.
pub fn survey_records() -> Vec<WcsRecord> {
    let mut records = Vec::new();
    for camera in 1..=4u8 {
        for ccd in 1..=4u8 {
            let (ra, dec) = tangent_of(camera, ccd);
            records.push(WcsRecord {
                key: CcdKey::new(17, camera, ccd),
                begin: 58764.173,
                end: 58789.186,
                header: survey_header(ra, dec),
            });
        }
    }
    records.push(WcsRecord {
        key: CcdKey::new(18, 1, 1),
        begin: 58790.154,
        end: 58814.88,
        header: survey_header(KNOWN_STAR_RA, KNOWN_STAR_DEC),
    });
    records.push(WcsRecord {
        key: CcdKey::new(19, 1, 1),
        begin: 58816.0,
        end: 58840.0,
        header: survey_header(200.0, 10.0),
    });
    records
}

pub fn survey_calendar() -> SectorCalendar {
    SectorCalendar::from_windows(vec![
        SectorWindow {
            sector: 17,
            begin: 58764.173,
            end: 58789.186,
        },
        SectorWindow {
            sector: 18,
            begin: 58790.154,
            end: 58814.88,
        },
        SectorWindow {
            sector: 19,
            begin: 58816.0,
            end: 58840.0,
        },
    ])
    .expect("survey windows are valid")
}
