//! Nested-scheme HEALPix cell math.
//!
//! Self-contained implementation of the equal-area sky tessellation used by
//! the coarse index: sky position → cell id ([`ang2pix`]), cell id → cell
//! center ([`pix2ang`]), and conservative cone enumeration ([`cone_cells`]).
//! Only the nested numbering scheme is implemented and `nside` must be a
//! power of two.
//!
//! The sphere is divided into 12 base faces of `nside × nside` cells each.
//! Within a face, cells are numbered by bit-interleaving their (x, y)
//! position (z-order), so `cell = face · nside² + interleave(x, y)`.

use crate::constants::Degree;

/// Ring offsets of the 12 base faces (scaled ring index of the face corner).
const JRLL: [i64; 12] = [2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4];
/// Longitude offsets of the 12 base faces, in units of π/4.
const JPLL: [i64; 12] = [1, 3, 5, 7, 0, 2, 4, 6, 1, 3, 5, 7];

/// Total number of cells at the given resolution: `12 · nside²`.
pub fn n_cells(nside: u32) -> u64 {
    12 * nside as u64 * nside as u64
}

/// Interleave the bits of an in-face position into a z-order cell offset.
fn z_order(ix: u64, iy: u64) -> u64 {
    let mut pix = 0u64;
    for bit in 0..32 {
        pix |= ((ix >> bit) & 1) << (2 * bit);
        pix |= ((iy >> bit) & 1) << (2 * bit + 1);
    }
    pix
}

/// Inverse of [`z_order`]: split a cell offset back into (ix, iy).
fn z_order_inverse(ipf: u64) -> (u64, u64) {
    let mut ix = 0u64;
    let mut iy = 0u64;
    for bit in 0..32 {
        ix |= ((ipf >> (2 * bit)) & 1) << bit;
        iy |= ((ipf >> (2 * bit + 1)) & 1) << bit;
    }
    (ix, iy)
}

/// Cell id (nested scheme) containing the sky position.
///
/// Arguments
/// -----------------
/// * `nside`: resolution, a power of two.
/// * `ra`, `dec`: ICRS coordinates in degrees; `ra` may be any finite value
///   and is wrapped into [0, 360).
///
/// Return
/// ----------
/// * The cell id in `0..n_cells(nside)`.
pub fn ang2pix(nside: u32, ra: Degree, dec: Degree) -> u64 {
    let nside_i = nside as i64;
    let order = nside.trailing_zeros();
    let z = dec.to_radians().sin();
    let za = z.abs();
    // longitude in units of π/2, in [0, 4)
    let tt = ra.rem_euclid(360.0) / 90.0;

    if za <= 2.0 / 3.0 {
        // equatorial region: locate the cell between the ascending and
        // descending edge lines
        let temp1 = nside as f64 * (0.5 + tt);
        let temp2 = nside as f64 * (z * 0.75);
        let jp = (temp1 - temp2) as i64;
        let jm = (temp1 + temp2) as i64;
        let ifp = jp >> order;
        let ifm = jm >> order;
        let face = if ifp == ifm {
            (ifp & 3) + 4
        } else if ifp < ifm {
            ifp & 3
        } else {
            (ifm & 3) + 8
        };
        let ix = jm & (nside_i - 1);
        let iy = nside_i - 1 - (jp & (nside_i - 1));
        face_cell(nside, face as u64, ix as u64, iy as u64)
    } else {
        // polar caps
        let ntt = (tt as i64).min(3);
        let tp = tt - ntt as f64;
        let tmp = nside as f64 * (3.0 * (1.0 - za)).sqrt();
        let jp = ((tp * tmp) as i64).min(nside_i - 1);
        let jm = (((1.0 - tp) * tmp) as i64).min(nside_i - 1);
        if z >= 0.0 {
            face_cell(
                nside,
                ntt as u64,
                (nside_i - jm - 1) as u64,
                (nside_i - jp - 1) as u64,
            )
        } else {
            face_cell(nside, (ntt + 8) as u64, jp as u64, jm as u64)
        }
    }
}

fn face_cell(nside: u32, face: u64, ix: u64, iy: u64) -> u64 {
    face * (nside as u64 * nside as u64) + z_order(ix, iy)
}

/// Center of a cell (nested scheme).
///
/// Arguments
/// -----------------
/// * `nside`: resolution, a power of two.
/// * `cell`: a cell id in `0..n_cells(nside)`.
///
/// Return
/// ----------
/// * `(ra, dec)` of the cell center in degrees, ra in [0, 360).
pub fn pix2ang(nside: u32, cell: u64) -> (Degree, Degree) {
    debug_assert!(cell < n_cells(nside));
    let nside_i = nside as i64;
    let npface = nside as u64 * nside as u64;
    let face = (cell / npface) as usize;
    let (ix, iy) = z_order_inverse(cell % npface);

    // ring index, 1 at the north pole to 4·nside - 1 at the south pole
    let jr = JRLL[face] * nside_i - ix as i64 - iy as i64 - 1;

    let (nr, z, kshift) = if jr < nside_i {
        // north polar cap
        let nr = jr;
        let z = 1.0 - (nr * nr) as f64 / (3.0 * npface as f64);
        (nr, z, 0)
    } else if jr > 3 * nside_i {
        // south polar cap
        let nr = 4 * nside_i - jr;
        let z = -1.0 + (nr * nr) as f64 / (3.0 * npface as f64);
        (nr, z, 0)
    } else {
        // equatorial region; rings alternate phase with kshift
        let z = (2 * nside_i - jr) as f64 * 2.0 / (3.0 * nside as f64);
        (nside_i, z, (jr - nside_i) & 1)
    };

    let mut jp = (JPLL[face] * nr + ix as i64 - iy as i64 + 1 + kshift) / 2;
    if jp > 4 * nr {
        jp -= 4 * nr;
    }
    if jp < 1 {
        jp += 4 * nr;
    }

    let phi = (jp as f64 - (kshift + 1) as f64 * 0.5) * std::f64::consts::FRAC_PI_2 / nr as f64;
    (phi.to_degrees().rem_euclid(360.0), z.asin().to_degrees())
}

/// Angular separation between two sky positions, in degrees.
///
/// Uses the Vincenty formula, which stays accurate for both tiny and
/// antipodal separations.
pub fn angular_separation(ra1: Degree, dec1: Degree, ra2: Degree, dec2: Degree) -> Degree {
    let (sin_d1, cos_d1) = dec1.to_radians().sin_cos();
    let (sin_d2, cos_d2) = dec2.to_radians().sin_cos();
    let (sin_dra, cos_dra) = (ra2 - ra1).to_radians().sin_cos();

    let num = ((cos_d2 * sin_dra).powi(2)
        + (cos_d1 * sin_d2 - sin_d1 * cos_d2 * cos_dra).powi(2))
    .sqrt();
    let den = sin_d1 * sin_d2 + cos_d1 * cos_d2 * cos_dra;
    num.atan2(den).to_degrees()
}

/// All cells whose **center** lies within `radius` degrees of the given
/// position.
///
/// This is the conservative cone enumeration of the coarse index builder:
/// with a radius padded by the cell circumradius, every cell overlapping the
/// true footprint is guaranteed to be returned (possibly with some extra
/// neighbours, which only cost a projection check later).
pub fn cone_cells(nside: u32, ra: Degree, dec: Degree, radius: Degree) -> Vec<u64> {
    (0..n_cells(nside))
        .filter(|&cell| {
            let (cell_ra, cell_dec) = pix2ang(nside, cell);
            angular_separation(ra, dec, cell_ra, cell_dec) <= radius
        })
        .collect()
}
