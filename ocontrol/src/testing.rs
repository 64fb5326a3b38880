//! In-memory collaborators for unit tests

use std::collections::VecDeque;
use std::sync::Mutex;

use olibmsg::{CalibrationResult, OError, OResult, ReductionResult, RequestId};

use crate::cancel::CancelToken;
use crate::pipeline::ReductionPipeline;
use crate::telescope::TelescopeControl;
use crate::wcs::WcsLookup;

fn reduced_name(filename: &str) -> String {
    match filename.strip_suffix("_0.fits") {
        Some(stem) => format!("{}_1.fits", stem),
        None => format!("{}.reduced", filename),
    }
}

/// Pipeline returning scripted brightest pixels, repeating the last one
pub(crate) struct FakePipeline {
    pixels: Mutex<VecDeque<(f64, f64)>>,
    failure: Mutex<Option<String>>,
    calls: Mutex<Vec<(RequestId, String, bool)>>,
}

impl FakePipeline {
    pub(crate) fn new(pixels: Vec<(f64, f64)>) -> Self {
        Self {
            pixels: Mutex::new(pixels.into()),
            failure: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    /// (id, filename, wcs_fit) of every reduction, calibrations with `wcs_fit` false
    pub(crate) fn calls(&self) -> Vec<(RequestId, String, bool)> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, id: &RequestId, filename: &str, wcs_fit: bool) -> OResult<()> {
        self.calls.lock().unwrap().push((id.clone(), filename.to_string(), wcs_fit));
        match self.failure.lock().unwrap().as_ref() {
            Some(message) => Err(OError::reduction(message.clone())),
            None => Ok(()),
        }
    }
}

impl ReductionPipeline for FakePipeline {
    fn expose_reduce(&self, id: &RequestId, filename: &str, wcs_fit: bool) -> OResult<ReductionResult> {
        self.record(id, filename, wcs_fit)?;
        let mut pixels = self.pixels.lock().unwrap();
        let pixel = if pixels.len() > 1 {
            pixels.pop_front().unwrap()
        } else {
            pixels.front().copied().unwrap_or((0.0, 0.0))
        };
        Ok(ReductionResult {
            reduced_filename: reduced_name(filename),
            brightest_pixel: pixel,
            seeing: 1.1,
            counts: 12_000.0,
            photometricity: 0.9,
            sky_brightness: 19.5,
            saturation: false,
            wcs: None,
        })
    }

    fn calibrate_reduce(&self, id: &RequestId, filename: &str) -> OResult<CalibrationResult> {
        self.record(id, filename, false)?;
        Ok(CalibrationResult {
            reduced_filename: reduced_name(filename),
            mean_counts: 1_000.0,
            peak_counts: 1_100.0,
        })
    }
}

/// Telescope recording the offsets it is sent
pub(crate) struct FakeTelescope {
    offsets: Mutex<Vec<(RequestId, f64, f64, f64)>>,
    cancel: Mutex<Option<CancelToken>>,
}

impl FakeTelescope {
    pub(crate) fn new() -> Self {
        Self {
            offsets: Mutex::new(Vec::new()),
            cancel: Mutex::new(None),
        }
    }

    /// Cancel `token` whenever an offset arrives
    pub(crate) fn cancel_on_offset(&self, token: CancelToken) {
        *self.cancel.lock().unwrap() = Some(token);
    }

    pub(crate) fn offsets(&self) -> Vec<(RequestId, f64, f64, f64)> {
        self.offsets.lock().unwrap().clone()
    }
}

impl TelescopeControl for FakeTelescope {
    fn offset_focal_plane(&self, id: &RequestId, x_arcsec: f64, y_arcsec: f64, rotation_deg: f64) -> OResult<()> {
        self.offsets
            .lock()
            .unwrap()
            .push((id.clone(), x_arcsec, y_arcsec, rotation_deg));
        if let Some(token) = self.cancel.lock().unwrap().as_ref() {
            token.cancel();
        }
        Ok(())
    }
}

/// WCS lookup answering every query with one pixel
pub(crate) struct FakeWcs {
    pixel: (f64, f64),
    queries: Mutex<Vec<(String, f64, f64)>>,
}

impl FakeWcs {
    pub(crate) fn new(pixel: (f64, f64)) -> Self {
        Self {
            pixel,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn queries(&self) -> Vec<(String, f64, f64)> {
        self.queries.lock().unwrap().clone()
    }
}

impl WcsLookup for FakeWcs {
    fn pixel_for_sky(&self, reduced_filename: &str, ra_deg: f64, dec_deg: f64) -> OResult<(f64, f64)> {
        self.queries
            .lock()
            .unwrap()
            .push((reduced_filename.to_string(), ra_deg, dec_deg));
        Ok(self.pixel)
    }
}
