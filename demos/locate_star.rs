use std::env;

use tesslocate::tesscoord::{SkyPosition, TessCoordList};
use tesslocate::tesslocate::{SectorConstraint, TessLocate};
use tesslocate::tesslocate_errors::TessLocateError;
use tesslocate::time::{iso_to_mjd, mjd_to_epoch};

/// Remove `--flag VALUE` from the argument list and return the value.
fn take_option(args: &mut Vec<String>, flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.remove(pos);
    if pos < args.len() {
        Some(args.remove(pos))
    } else {
        None
    }
}

/// Resolve one sky position and verify each match by projecting it back.
///
/// Arguments
/// -----------------
/// * `locator`: the locator over the catalog directory.
/// * `target`: the sky position to resolve.
/// * `constraint`: epoch restriction applied to the query.
///
/// Return
/// ----------
/// * `Ok(TessCoordList)` — every detector pixel that observed the target.
/// * `Err(TessLocateError)` — if the catalogs cannot be read.
///
/// See also
/// ------------
/// * [`TessLocate::locate`] – The underlying single-target query.
/// * [`TessLocate::to_sky`] – The inverse resolution used for the check.
fn resolve_once(
    locator: &TessLocate,
    target: &SkyPosition,
    constraint: SectorConstraint,
) -> Result<TessCoordList, TessLocateError> {
    let found = locator.locate(target, constraint)?;
    for coord in found.iter() {
        let back = locator.to_sky(coord)?;
        println!(
            "{coord}  ({:.4} arcsec from the query)",
            target.separation_to(&back) * 3600.0
        );
    }
    Ok(found)
}

/// Resolve a star to detector pixels across the archived sectors.
/// Usage:
///   locate_star [RA_DEG DEC_DEG] [--sector N | --time TIMESTAMP] [--data-dir DIR] [--verbose]
/// Example:
///   locate_star 84.291188 -80.46912 --sector 17 --verbose
fn main() -> Result<(), TessLocateError> {
    let mut args = env::args().skip(1).collect::<Vec<_>>();
    let verbose = if let Some(pos) = args.iter().position(|a| a == "--verbose") {
        args.remove(pos);
        true
    } else {
        false
    };
    let data_dir = take_option(&mut args, "--data-dir").unwrap_or_else(|| "data".to_string());
    let sector = take_option(&mut args, "--sector");
    let time = take_option(&mut args, "--time");

    // Pi Mensae unless a position is given on the command line.
    let ra = args
        .first()
        .map(|a| a.parse().expect("RA must be decimal degrees"))
        .unwrap_or(84.291188);
    let dec = args
        .get(1)
        .map(|a| a.parse().expect("DEC must be decimal degrees"))
        .unwrap_or(-80.46912);
    let target = SkyPosition::new(ra, dec)?;

    let constraint = if let Some(sector) = sector {
        SectorConstraint::Sector(sector.parse().expect("--sector takes a sector number"))
    } else if let Some(timestamp) = time {
        SectorConstraint::Time(mjd_to_epoch(iso_to_mjd(&timestamp)?))
    } else {
        SectorConstraint::Any
    };

    let locator = TessLocate::new(data_dir);
    let found = resolve_once(&locator, &target, constraint)?;

    if verbose {
        eprintln!("[locate_star] target = {target}");
        eprintln!("[locate_star] matches = {}", found.len());
    }
    if found.is_empty() {
        println!("{target} was not observed under this constraint.");
    }

    Ok(())
}
