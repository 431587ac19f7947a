use hifitime::Epoch;
use std::str::FromStr;

use crate::constants::MJD;
use crate::tesslocate_errors::TessLocateError;

/// Parse an ISO-8601 UTC timestamp (YYYY-MM-ddTHH:mm:ss) into a modified
/// julian date (MJD).
///
/// Argument
/// --------
/// * `timestamp`: a date string in the format YYYY-MM-ddTHH:mm:ss
///
/// Return
/// ------
/// * the input date as a modified julian date (MJD, UTC days)
pub fn iso_to_mjd(timestamp: &str) -> Result<MJD, TessLocateError> {
    let epoch = Epoch::from_str(timestamp)
        .map_err(|e| TessLocateError::InvalidTimestamp(format!("{timestamp}: {e}")))?;
    Ok(epoch.to_mjd_utc_days())
}

/// Convert a [`hifitime::Epoch`] to a modified julian date (MJD, UTC days).
pub fn epoch_to_mjd(epoch: Epoch) -> MJD {
    epoch.to_mjd_utc_days()
}

/// Convert a modified julian date (MJD, UTC days) back to a [`hifitime::Epoch`].
pub fn mjd_to_epoch(mjd: MJD) -> Epoch {
    Epoch::from_mjd_utc(mjd)
}

#[cfg(test)]
mod time_test {
    use super::*;

    #[test]
    fn test_iso_to_mjd() {
        let mjd = iso_to_mjd("2021-01-01T00:00:00").unwrap();
        assert_eq!(mjd, 59215.0);

        let mjd = iso_to_mjd("2021-01-02T00:00:00").unwrap();
        assert_eq!(mjd, 59216.0);

        // noon lands exactly on the half day
        let mjd = iso_to_mjd("2021-01-01T12:00:00").unwrap();
        assert_eq!(mjd, 59215.5);
    }

    #[test]
    fn test_iso_to_mjd_rejects_garbage() {
        let res = iso_to_mjd("not a date");
        assert!(matches!(res, Err(TessLocateError::InvalidTimestamp(_))));
    }

    #[test]
    fn test_epoch_mjd_round_trip() {
        let epoch = Epoch::from_str("2019-10-08T04:09:23").unwrap();
        let mjd = epoch_to_mjd(epoch);
        assert_eq!(mjd_to_epoch(mjd).to_mjd_utc_days(), mjd);
    }
}
