pub mod constants;
pub mod ffi_catalog;
pub mod healpix;
pub mod sector_dates;
pub mod tesscoord;
pub mod tesslocate;
pub mod tesslocate_errors;
pub mod time;
pub mod wcs;
pub mod wcs_catalog;
