//! # Gnomonic (TAN) detector projections
//!
//! This module implements the per-detector mapping between sky coordinates
//! (ICRS right ascension and declination, degrees) and fractional pixel
//! coordinates (column, row; 1-based FITS pixel-center convention).
//!
//! ## Overview
//!
//! A [`Wcs`] is defined by three quantities taken from a FITS-style header:
//!
//! - `CRPIX1/CRPIX2`: the reference pixel,
//! - `CRVAL1/CRVAL2`: the sky position of the reference pixel (the tangent
//!   point of the gnomonic projection),
//! - `CD1_1..CD2_2`: the 2×2 linear transform between pixel offsets and
//!   intermediate world coordinates, in degrees per pixel.
//!
//! [`Wcs::pixel_to_world`] is total. [`Wcs::world_to_pixel`] fails with
//! [`TessLocateError::ProjectionDiverged`] for positions at 90° or more from
//! the tangent point, which lie behind the projection plane. Higher-order
//! distortion terms (SIP) are not evaluated; for this instrument they amount
//! to a fraction of a pixel, well below the coarse-to-fine filtering needs of
//! the locator.

use std::collections::HashMap;

use nalgebra::{Matrix2, Vector2};

use crate::constants::{Degree, Pixel};
use crate::tesslocate_errors::TessLocateError;

/// Gnomonic projection of a single detector.
///
/// See also
/// ------------
/// * [`crate::wcs_catalog::WcsStore`] – per-sector storage of header strings.
/// * [`crate::tesslocate::TessLocate::locate`] – consumer of the projection.
#[derive(Debug, Clone, PartialEq)]
pub struct Wcs {
    /// Reference pixel (column, row)
    crpix: Vector2<f64>,
    /// Sky position of the reference pixel (ra, dec), degrees
    crval: Vector2<f64>,
    /// Pixel offsets → intermediate world coordinates, degrees per pixel
    cd: Matrix2<f64>,
    /// Cached inverse of `cd`
    cd_inv: Matrix2<f64>,
}

impl Wcs {
    /// Build a projection from its raw parameters.
    ///
    /// Arguments
    /// -----------------
    /// * `crpix`: reference pixel `[column, row]`.
    /// * `crval`: sky position of the reference pixel `[ra, dec]` in degrees.
    /// * `cd`: row-major CD matrix `[[cd1_1, cd1_2], [cd2_1, cd2_2]]` in
    ///   degrees per pixel.
    ///
    /// Return
    /// ----------
    /// * The projection, or [`TessLocateError::MalformedWcsHeader`] when a
    ///   parameter is non-finite, the declination is outside [-90, +90], or
    ///   the CD matrix is singular.
    pub fn new(
        crpix: [f64; 2],
        crval: [f64; 2],
        cd: [[f64; 2]; 2],
    ) -> Result<Self, TessLocateError> {
        let flat = [
            crpix[0], crpix[1], crval[0], crval[1], cd[0][0], cd[0][1], cd[1][0], cd[1][1],
        ];
        if flat.iter().any(|v| !v.is_finite()) {
            return Err(TessLocateError::MalformedWcsHeader(
                "non-finite WCS parameter".to_string(),
            ));
        }
        if !(-90.0..=90.0).contains(&crval[1]) {
            return Err(TessLocateError::MalformedWcsHeader(format!(
                "reference declination {} outside [-90, +90]",
                crval[1]
            )));
        }
        let cd = Matrix2::new(cd[0][0], cd[0][1], cd[1][0], cd[1][1]);
        let cd_inv = cd.try_inverse().ok_or_else(|| {
            TessLocateError::MalformedWcsHeader("singular CD matrix".to_string())
        })?;
        Ok(Wcs {
            crpix: Vector2::new(crpix[0], crpix[1]),
            crval: Vector2::new(crval[0], crval[1]),
            cd,
            cd_inv,
        })
    }

    /// Parse a projection from a FITS-style header string.
    ///
    /// The header may be newline-separated or a single contiguous run of
    /// 80-character cards. Cards other than the WCS keywords are ignored.
    /// When `CTYPE1` is present it must name a TAN projection.
    ///
    /// Arguments
    /// -----------------
    /// * `header`: the header text holding at least `CRPIX1`, `CRPIX2`,
    ///   `CRVAL1`, `CRVAL2` and the four `CDi_j` cards.
    ///
    /// Return
    /// ----------
    /// * The parsed projection, or
    ///   [`TessLocateError::MalformedWcsHeader`] for a missing card, an
    ///   unparseable value, an unsupported projection type or a singular CD
    ///   matrix.
    pub fn from_header_str(header: &str) -> Result<Self, TessLocateError> {
        let values: HashMap<&str, &str> = header_cards(header)
            .iter()
            .filter_map(|card| parse_card(card))
            .collect();

        if let Some(ctype) = values.get("CTYPE1") {
            if !ctype.contains("TAN") {
                return Err(TessLocateError::MalformedWcsHeader(format!(
                    "unsupported projection type: {}",
                    ctype.trim()
                )));
            }
        }

        let crpix = [card_f64(&values, "CRPIX1")?, card_f64(&values, "CRPIX2")?];
        let crval = [card_f64(&values, "CRVAL1")?, card_f64(&values, "CRVAL2")?];
        let cd = [
            [card_f64(&values, "CD1_1")?, card_f64(&values, "CD1_2")?],
            [card_f64(&values, "CD2_1")?, card_f64(&values, "CD2_2")?],
        ];
        Wcs::new(crpix, crval, cd)
    }

    /// Sky position of a pixel.
    ///
    /// Arguments
    /// -----------------
    /// * `column`, `row`: fractional pixel coordinates (1-based FITS
    ///   convention; not required to lie on the science area).
    ///
    /// Return
    /// ----------
    /// * `(ra, dec)` in degrees, ra normalized to [0, 360).
    pub fn pixel_to_world(&self, column: Pixel, row: Pixel) -> (Degree, Degree) {
        let offset = Vector2::new(column - self.crpix.x, row - self.crpix.y);
        let iwc = self.cd * offset;
        let xi = iwc.x.to_radians();
        let eta = iwc.y.to_radians();

        let ra0 = self.crval.x.to_radians();
        let dec0 = self.crval.y.to_radians();
        let (sin_dec0, cos_dec0) = dec0.sin_cos();

        let rho = (xi * xi + eta * eta).sqrt();
        if rho == 0.0 {
            return (self.crval.x.rem_euclid(360.0), self.crval.y);
        }
        let c = rho.atan();
        let (sin_c, cos_c) = c.sin_cos();

        // rounding can push the sine a few ulp past 1 near the poles
        let dec = (cos_c * sin_dec0 + eta * sin_c * cos_dec0 / rho)
            .clamp(-1.0, 1.0)
            .asin();
        let ra = ra0 + (xi * sin_c).atan2(rho * cos_dec0 * cos_c - eta * sin_dec0 * sin_c);

        (ra.to_degrees().rem_euclid(360.0), dec.to_degrees())
    }

    /// Pixel position of a sky coordinate.
    ///
    /// Arguments
    /// -----------------
    /// * `ra`, `dec`: ICRS coordinates in degrees.
    ///
    /// Return
    /// ----------
    /// * `(column, row)` fractional pixels, or
    ///   [`TessLocateError::ProjectionDiverged`] when the position is at 90°
    ///   or more from the tangent point. The result may lie outside the
    ///   science area; bounds are enforced by
    ///   [`crate::tesscoord::TessCoord::new`].
    pub fn world_to_pixel(&self, ra: Degree, dec: Degree) -> Result<(Pixel, Pixel), TessLocateError> {
        let ra0 = self.crval.x.to_radians();
        let dec0 = self.crval.y.to_radians();
        let (sin_dec0, cos_dec0) = dec0.sin_cos();
        let (sin_dec, cos_dec) = dec.to_radians().sin_cos();
        let dra = ra.to_radians() - ra0;
        let (sin_dra, cos_dra) = dra.sin_cos();

        // Cosine of the angular distance to the tangent point. Non-positive
        // means the position is behind the projection plane.
        let cosc = sin_dec0 * sin_dec + cos_dec0 * cos_dec * cos_dra;
        if cosc <= 0.0 {
            return Err(TessLocateError::ProjectionDiverged { ra, dec });
        }

        let xi = (cos_dec * sin_dra / cosc).to_degrees();
        let eta = ((cos_dec0 * sin_dec - sin_dec0 * cos_dec * cos_dra) / cosc).to_degrees();

        let offset = self.cd_inv * Vector2::new(xi, eta);
        Ok((offset.x + self.crpix.x, offset.y + self.crpix.y))
    }

    /// Sky position of the tangent point `(ra, dec)`, degrees.
    pub fn tangent_point(&self) -> (Degree, Degree) {
        (self.crval.x.rem_euclid(360.0), self.crval.y)
    }
}

/// Split a header into cards: by line when the text carries newlines,
/// otherwise by runs of 80 characters as written by common FITS writers.
fn header_cards(header: &str) -> Vec<&str> {
    if header.contains('\n') {
        header.lines().collect()
    } else {
        header
            .as_bytes()
            .chunks(80)
            .filter_map(|chunk| std::str::from_utf8(chunk).ok())
            .collect()
    }
}

/// Extract `(keyword, value)` from one card, skipping commentary cards and
/// anything that does not look like `KEYWORD = value [/ comment]`.
fn parse_card(card: &str) -> Option<(&str, &str)> {
    let (raw_key, rest) = card.split_once('=')?;
    let key = raw_key.trim();
    let keyword_like = !key.is_empty()
        && key.len() <= 8
        && key
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_' || b == b'-');
    if !keyword_like {
        return None;
    }
    let rest = rest.trim_start();
    let value = if let Some(quoted) = rest.strip_prefix('\'') {
        let end = quoted.find('\'')?;
        quoted[..end].trim_end()
    } else {
        match rest.find('/') {
            Some(pos) => rest[..pos].trim(),
            None => rest.trim(),
        }
    };
    Some((key, value))
}

fn card_f64(values: &HashMap<&str, &str>, key: &str) -> Result<f64, TessLocateError> {
    let raw = values
        .get(key)
        .ok_or_else(|| TessLocateError::MalformedWcsHeader(format!("missing card {key}")))?;
    raw.parse::<f64>().map_err(|_| {
        TessLocateError::MalformedWcsHeader(format!("card {key} is not a number: {raw}"))
    })
}

#[cfg(test)]
mod wcs_test {
    use super::*;
    use approx::assert_relative_eq;

    fn tan_header(ra0: f64, dec0: f64) -> String {
        format!(
            "WCSAXES =                    2 / Number of coordinate axes\n\
             CRPIX1  =               1045.0 / Pixel coordinate of reference point\n\
             CRPIX2  =               1001.0 / Pixel coordinate of reference point\n\
             CRVAL1  =     {ra0:>16.10} / [deg] Coordinate value at reference point\n\
             CRVAL2  =     {dec0:>16.10} / [deg] Coordinate value at reference point\n\
             CD1_1   =     -0.0057806620416 / Coordinate transformation matrix element\n\
             CD1_2   =      0.0011819677368 / Coordinate transformation matrix element\n\
             CD2_1   =     -0.0011686237086 / Coordinate transformation matrix element\n\
             CD2_2   =     -0.0057791000465 / Coordinate transformation matrix element\n\
             CTYPE1  = 'RA---TAN-SIP'       / TAN (gnomonic) projection + SIP distortions\n\
             CTYPE2  = 'DEC--TAN-SIP'       / TAN (gnomonic) projection + SIP distortions"
        )
    }

    #[test]
    fn test_parse_header() {
        let wcs = Wcs::from_header_str(&tan_header(84.29, -80.47)).unwrap();
        let (ra, dec) = wcs.tangent_point();
        assert_relative_eq!(ra, 84.29, epsilon = 1e-9);
        assert_relative_eq!(dec, -80.47, epsilon = 1e-9);
    }

    #[test]
    fn test_parse_header_without_newlines() {
        // Same cards padded to the 80-character FITS card width.
        let contiguous: String = tan_header(120.0, 30.0)
            .lines()
            .map(|card| format!("{card:<80}"))
            .collect();
        let wcs = Wcs::from_header_str(&contiguous).unwrap();
        assert_relative_eq!(wcs.tangent_point().0, 120.0, epsilon = 1e-9);
    }

    #[test]
    fn test_reference_pixel_maps_to_tangent_point() {
        let wcs = Wcs::new(
            [1045.0, 1001.0],
            [30.0, -45.0],
            [[-0.005, 0.0], [0.0, 0.005]],
        )
        .unwrap();
        assert_eq!(wcs.pixel_to_world(1045.0, 1001.0), (30.0, -45.0));
        let (col, row) = wcs.world_to_pixel(30.0, -45.0).unwrap();
        assert_eq!((col, row), (1045.0, 1001.0));
    }

    #[test]
    fn test_projection_round_trip() {
        let wcs = Wcs::from_header_str(&tan_header(84.291188, -80.469120)).unwrap();
        for &(col, row) in &[(44.5, 0.5), (2092.5, 2048.5), (300.25, 1717.75), (1045.0, 1.0)] {
            let (ra, dec) = wcs.pixel_to_world(col, row);
            let (col2, row2) = wcs.world_to_pixel(ra, dec).unwrap();
            assert_relative_eq!(col2, col, epsilon = 1e-9);
            assert_relative_eq!(row2, row, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_world_to_pixel_diverges_behind_tangent_plane() {
        let wcs = Wcs::new([1.0, 1.0], [10.0, 20.0], [[0.005, 0.0], [0.0, 0.005]]).unwrap();
        // antipode of the tangent point
        let res = wcs.world_to_pixel(190.0, -20.0);
        assert!(matches!(
            res,
            Err(TessLocateError::ProjectionDiverged { .. })
        ));
    }

    #[test]
    fn test_singular_cd_matrix_is_rejected() {
        let res = Wcs::new([1.0, 1.0], [10.0, 20.0], [[0.005, 0.005], [0.005, 0.005]]);
        assert!(matches!(
            res,
            Err(TessLocateError::MalformedWcsHeader(_))
        ));
    }

    #[test]
    fn test_missing_card_is_rejected() {
        let header = "CRPIX1  =               1045.0\nCRPIX2  =               1001.0";
        let res = Wcs::from_header_str(header);
        assert!(matches!(
            res,
            Err(TessLocateError::MalformedWcsHeader(msg)) if msg.contains("CRVAL1")
        ));
    }

    #[test]
    fn test_non_tan_projection_is_rejected() {
        let header = tan_header(10.0, 10.0).replace("RA---TAN-SIP", "RA---SIN");
        let res = Wcs::from_header_str(&header);
        assert!(matches!(
            res,
            Err(TessLocateError::MalformedWcsHeader(msg)) if msg.contains("RA---SIN")
        ));
    }
}
