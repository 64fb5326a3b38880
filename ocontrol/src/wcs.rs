//! Sky to pixel conversion for reduced frames
//!
//! The pipeline delivers a TAN (gnomonic) WCS solution with each reduction it
//! fitted. `TanWcsLookup` keeps those solutions by reduced filename and
//! converts a sky position to a pixel position on that frame.
//!
//! CRPIX is 1-based as in FITS. Pixels in and out of this module are 0-based,
//! like the brightest pixel the pipeline reports and the target pixel.

use std::collections::HashMap;
use std::sync::Mutex;

use log::debug;
use olibmsg::{OError, OResult, WcsSolution};

/// Sky to pixel lookup on a reduced frame
pub trait WcsLookup: Send + Sync {
    /// Pixel of (`ra_deg`, `dec_deg`) on `reduced_filename`
    fn pixel_for_sky(&self, reduced_filename: &str, ra_deg: f64, dec_deg: f64) -> OResult<(f64, f64)>;
}

/// Forward gnomonic projection of (`ra`, `dec`) about (`ra0`, `dec0`), all in radians.
///
/// Returns standard coordinates (ξ, η) in radians, or `None` when the point is
/// on or behind the tangent plane.
pub fn tan_project(ra: f64, dec: f64, ra0: f64, dec0: f64) -> Option<(f64, f64)> {
    let da = ra - ra0;
    let cos_da = da.cos();
    let denom = dec.sin() * dec0.sin() + dec.cos() * dec0.cos() * cos_da;
    if denom <= 1e-12 {
        return None;
    }
    let xi = dec.cos() * da.sin() / denom;
    let eta = (dec.sin() * dec0.cos() - dec.cos() * dec0.sin() * cos_da) / denom;
    Some((xi, eta))
}

/// Inverse gnomonic projection, radians in and out
pub fn inverse_tan_project(xi: f64, eta: f64, ra0: f64, dec0: f64) -> (f64, f64) {
    let rho = (xi * xi + eta * eta).sqrt();
    if rho < 1e-15 {
        return (ra0, dec0);
    }
    let c = rho.atan();
    let (sin_c, cos_c) = c.sin_cos();
    let dec = (cos_c * dec0.sin() + eta * sin_c * dec0.cos() / rho).asin();
    let ra = ra0 + (xi * sin_c).atan2(rho * dec0.cos() * cos_c - eta * dec0.sin() * sin_c);
    (ra, dec)
}

fn cd_inverse(cd: &[[f64; 2]; 2]) -> Option<[[f64; 2]; 2]> {
    let det = cd[0][0] * cd[1][1] - cd[0][1] * cd[1][0];
    if det.abs() < 1e-30 {
        return None;
    }
    Some([
        [cd[1][1] / det, -cd[0][1] / det],
        [-cd[1][0] / det, cd[0][0] / det],
    ])
}

/// 0-based pixel of a sky position under `solution`
pub fn sky_to_pixel(solution: &WcsSolution, ra_deg: f64, dec_deg: f64) -> OResult<(f64, f64)> {
    let (xi, eta) = tan_project(
        ra_deg.to_radians(),
        dec_deg.to_radians(),
        solution.crval[0].to_radians(),
        solution.crval[1].to_radians(),
    )
    .ok_or_else(|| OError::Wcs(format!("RA {} Dec {} is not on the frame's tangent plane", ra_deg, dec_deg)))?;
    let inverse = cd_inverse(&solution.cd).ok_or_else(|| OError::Wcs("Singular CD matrix".to_string()))?;

    let (x, y) = (xi.to_degrees(), eta.to_degrees());
    Ok((
        solution.crpix[0] - 1.0 + inverse[0][0] * x + inverse[0][1] * y,
        solution.crpix[1] - 1.0 + inverse[1][0] * x + inverse[1][1] * y,
    ))
}

/// Sky position in degrees of a 0-based pixel under `solution`
pub fn pixel_to_sky(solution: &WcsSolution, x_pixel: f64, y_pixel: f64) -> (f64, f64) {
    let dx = x_pixel + 1.0 - solution.crpix[0];
    let dy = y_pixel + 1.0 - solution.crpix[1];
    let x = solution.cd[0][0] * dx + solution.cd[0][1] * dy;
    let y = solution.cd[1][0] * dx + solution.cd[1][1] * dy;
    let (ra, dec) = inverse_tan_project(
        x.to_radians(),
        y.to_radians(),
        solution.crval[0].to_radians(),
        solution.crval[1].to_radians(),
    );
    (ra.to_degrees().rem_euclid(360.0), dec.to_degrees())
}

/// WCS solutions by reduced filename, each consumed by its lookup
#[derive(Debug, Default)]
pub struct TanWcsLookup {
    solutions: Mutex<HashMap<String, WcsSolution>>,
}

impl TanWcsLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, reduced_filename: &str, solution: WcsSolution) {
        debug!("WCS solution for {}: {:?}", reduced_filename, solution);
        self.solutions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(reduced_filename.to_string(), solution);
    }
}

impl WcsLookup for TanWcsLookup {
    fn pixel_for_sky(&self, reduced_filename: &str, ra_deg: f64, dec_deg: f64) -> OResult<(f64, f64)> {
        let solution = self
            .solutions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(reduced_filename)
            .ok_or_else(|| OError::Wcs(format!("No WCS fit for {}", reduced_filename)))?;
        sky_to_pixel(&solution, ra_deg, dec_deg)
    }
}
