mod common;

use std::collections::BTreeMap;
use std::fs;

use camino::Utf8Path;
use common::{survey_records, KNOWN_STAR_DEC, KNOWN_STAR_RA, SECTOR17_MID_MJD};
use tesslocate::constants::{CcdKey, Sector};
use tesslocate::healpix::{HealpixIndex, HEALPIX_INDEX_FILENAME};
use tesslocate::sector_dates::SECTOR_DATES_FILENAME;
use tesslocate::tesscoord::SkyPosition;
use tesslocate::tesslocate::{SectorConstraint, TessLocate};
use tesslocate::time::mjd_to_epoch;
use tesslocate::wcs_catalog::{write_sector_file, WcsRecord, WcsStore};

fn known_star() -> SkyPosition {
    SkyPosition::new(KNOWN_STAR_RA, KNOWN_STAR_DEC).unwrap()
}

/// Write the survey's per-sector catalog files under `dir`.
fn write_survey_catalogs(dir: &Utf8Path) {
    let mut by_sector: BTreeMap<Sector, Vec<WcsRecord>> = BTreeMap::new();
    for record in survey_records() {
        by_sector.entry(record.key.sector).or_default().push(record);
    }
    for (sector, records) in by_sector {
        write_sector_file(dir, sector, &records).unwrap();
    }
}

/// A data directory holding nothing but catalog files still serves queries:
/// the calendar is derived from the catalog validity windows and the index
/// is rebuilt on first use.
#[test]
fn test_locator_over_a_bare_data_directory() {
    let dir = tempfile::tempdir().unwrap();
    let dir = Utf8Path::from_path(dir.path()).unwrap();
    write_survey_catalogs(dir);

    let locator = TessLocate::new(dir.to_path_buf());

    let found = locator.locate(&known_star(), SectorConstraint::Any).unwrap();
    let keys: Vec<CcdKey> = found.iter().map(|c| c.key()).collect();
    assert_eq!(keys, vec![CcdKey::new(17, 1, 4), CcdKey::new(18, 1, 1)]);

    // the derived calendar resolves in-sector timestamps and gaps alike
    let at = locator
        .locate(
            &known_star(),
            SectorConstraint::Time(mjd_to_epoch(SECTOR17_MID_MJD)),
        )
        .unwrap();
    assert_eq!(at.len(), 1);
    assert_eq!(at[0].key(), CcdKey::new(17, 1, 4));
    assert_eq!(at[0].time, Some(SECTOR17_MID_MJD));

    let gap = locator
        .locate(&known_star(), SectorConstraint::Time(mjd_to_epoch(58789.5)))
        .unwrap();
    assert!(gap.is_empty());
}

/// A pre-built index file round-trips through gzip JSON and yields the same
/// query results as a rebuild from the catalogs.
#[test]
fn test_prebuilt_index_file() {
    let dir = tempfile::tempdir().unwrap();
    let dir = Utf8Path::from_path(dir.path()).unwrap();
    write_survey_catalogs(dir);

    let built = HealpixIndex::build(&WcsStore::memory(survey_records())).unwrap();
    let index_path = dir.join(HEALPIX_INDEX_FILENAME);
    built.write_gzip_json(&index_path).unwrap();
    assert_eq!(HealpixIndex::read_gzip_json(&index_path).unwrap(), built);

    let locator = TessLocate::new(dir.to_path_buf());
    let found = locator.locate(&known_star(), SectorConstraint::Any).unwrap();
    let keys: Vec<CcdKey> = found.iter().map(|c| c.key()).collect();
    assert_eq!(keys, vec![CcdKey::new(17, 1, 4), CcdKey::new(18, 1, 1)]);
}

/// An explicit sector-dates file wins over calendar derivation: sectors it
/// does not list stop matching time queries.
#[test]
fn test_sector_dates_file_overrides_derivation() {
    let dir = tempfile::tempdir().unwrap();
    let dir = Utf8Path::from_path(dir.path()).unwrap();
    write_survey_catalogs(dir);
    fs::write(
        dir.join(SECTOR_DATES_FILENAME),
        "sector,begin,end\n17,2019-10-08T04:09:23,2019-11-02T04:27:45\n",
    )
    .unwrap();

    let locator = TessLocate::new(dir.to_path_buf());

    let at = locator
        .locate(
            &known_star(),
            SectorConstraint::Time(mjd_to_epoch(SECTOR17_MID_MJD)),
        )
        .unwrap();
    assert_eq!(at.len(), 1);
    assert_eq!(at[0].key(), CcdKey::new(17, 1, 4));

    // sector 18 is observed per the catalogs but absent from the CSV
    let in_18 = locator
        .locate(&known_star(), SectorConstraint::Time(mjd_to_epoch(58800.0)))
        .unwrap();
    assert!(in_18.is_empty());

    // sector constraints bypass the calendar entirely
    let by_sector = locator
        .locate(&known_star(), SectorConstraint::Sector(18))
        .unwrap();
    assert_eq!(by_sector.len(), 1);
}
