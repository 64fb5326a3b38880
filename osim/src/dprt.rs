//! Simulated data pipeline (DpRt)
//!
//! Every expose-reduce "finds" one star. Its pixel position follows the
//! telescope focal plane offset, so an acquisition loop run against this
//! simulator converges on the requested pixel.

use std::sync::Arc;
use std::time::Duration;

use log::info;
use olibmsg::{
    CalibrationResult, DonePayload, DpRtCommand, OResult, ReductionResult, WcsSolution,
};
use rand::Rng;

use crate::iss::TelescopeState;
use crate::servers::SimHandler;

/// Sky and detector model of the simulated field
#[derive(Debug, Clone, PartialEq)]
pub struct SkyModel {
    /// Binned pixel of the star with no telescope offset
    pub star_pixel: (f64, f64),
    /// RA/Dec of the star, degrees
    pub star_sky_deg: (f64, f64),
    /// Arcseconds per binned pixel
    pub arcsec_per_pixel: f64,
    /// Half-width of the uniform centroid noise, pixels
    pub jitter_pixels: f64,
}

impl Default for SkyModel {
    fn default() -> Self {
        Self {
            star_pixel: (600.0, 480.0),
            star_sky_deg: (180.0, 30.0),
            arcsec_per_pixel: 0.3,
            jitter_pixels: 0.05,
        }
    }
}

pub struct SimulatedDpRt {
    telescope: Arc<TelescopeState>,
    sky: SkyModel,
    reduce_time: Duration,
}

impl SimulatedDpRt {
    pub fn new(telescope: Arc<TelescopeState>, sky: SkyModel, reduce_time: Duration) -> Self {
        Self {
            telescope,
            sky,
            reduce_time,
        }
    }

    /// Star position given the current telescope offset
    pub fn star_pixel(&self) -> (f64, f64) {
        let (dx, dy) = self.telescope.offset();
        let (jx, jy) = if self.sky.jitter_pixels > 0.0 {
            let mut rng = rand::thread_rng();
            let j = self.sky.jitter_pixels;
            (rng.gen_range(-j..j), rng.gen_range(-j..j))
        } else {
            (0.0, 0.0)
        };
        (
            self.sky.star_pixel.0 - dx / self.sky.arcsec_per_pixel + jx,
            self.sky.star_pixel.1 - dy / self.sky.arcsec_per_pixel + jy,
        )
    }

    fn wcs_for(&self, star: (f64, f64)) -> WcsSolution {
        let scale = self.sky.arcsec_per_pixel / 3600.0;
        WcsSolution {
            crval: [self.sky.star_sky_deg.0, self.sky.star_sky_deg.1],
            crpix: [star.0 + 1.0, star.1 + 1.0],
            cd: [[-scale, 0.0], [0.0, scale]],
        }
    }

    fn expose_reduce(&self, filename: &str, wcs_fit: bool) -> ReductionResult {
        let star = self.star_pixel();
        let mut rng = rand::thread_rng();
        ReductionResult {
            reduced_filename: reduced_name(filename),
            brightest_pixel: star,
            seeing: rng.gen_range(0.8..1.6),
            counts: rng.gen_range(20_000.0..40_000.0),
            photometricity: rng.gen_range(0.9..1.0),
            sky_brightness: rng.gen_range(19.0..21.0),
            saturation: false,
            wcs: wcs_fit.then(|| self.wcs_for(star)),
        }
    }

    fn calibrate_reduce(&self, filename: &str) -> CalibrationResult {
        let mut rng = rand::thread_rng();
        let mean_counts = rng.gen_range(900.0..1100.0);
        CalibrationResult {
            reduced_filename: reduced_name(filename),
            mean_counts,
            peak_counts: mean_counts + rng.gen_range(50.0..200.0),
        }
    }
}

/// Reduced frames carry pipeline flag 1 in place of the raw flag 0
fn reduced_name(filename: &str) -> String {
    match filename.strip_suffix("_0.fits") {
        Some(stem) => format!("{}_1.fits", stem),
        None => format!("{}.reduced", filename),
    }
}

impl SimHandler<DpRtCommand> for SimulatedDpRt {
    fn name(&self) -> &str {
        "DpRt"
    }

    fn duration(&self, command: &DpRtCommand) -> Duration {
        match command {
            DpRtCommand::Abort => Duration::ZERO,
            _ => self.reduce_time,
        }
    }

    fn handle(&self, command: &DpRtCommand) -> OResult<DonePayload> {
        match command {
            DpRtCommand::ExposeReduce { filename, wcs_fit } => {
                let result = self.expose_reduce(filename, *wcs_fit);
                info!(
                    "DpRt reduced {}: star at ({:.2}, {:.2})",
                    filename, result.brightest_pixel.0, result.brightest_pixel.1
                );
                Ok(DonePayload::Reduction(result))
            }
            DpRtCommand::CalibrateReduce { filename } => {
                let result = self.calibrate_reduce(filename);
                info!("DpRt calibrated {}: mean {:.1}", filename, result.mean_counts);
                Ok(DonePayload::Calibration(result))
            }
            DpRtCommand::Abort => {
                info!("DpRt abort");
                Ok(DonePayload::Empty)
            }
        }
    }
}
