//! Simulated CCD controller
//!
//! Stands in for the vendor driver: exposures take real time and honour
//! cancellation, frames are written as empty placeholder files.

use std::fs::{self, File};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info};
use olibmsg::{DetectorSetup, OError, OResult, Timestamp};

use crate::cancel::CancelToken;
use crate::hardware::{CcdController, ExposureTimes};

#[derive(Debug, Default)]
struct SimulatedState {
    setup: DetectorSetup,
    filter_position: Option<u32>,
    exposures: u32,
    biases: u32,
    paused: bool,
    failure: Option<String>,
}

/// Simulated CCD controller
#[derive(Debug)]
pub struct SimulatedCcd {
    readout: Duration,
    write_frames: bool,
    state: Mutex<SimulatedState>,
}

impl SimulatedCcd {
    pub fn new(readout: Duration, write_frames: bool) -> Self {
        Self {
            readout,
            write_frames,
            state: Mutex::new(SimulatedState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimulatedState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every following exposure fail with a hardware error
    pub fn fail_with(&self, message: impl Into<String>) {
        self.state().failure = Some(message.into());
    }

    pub fn exposure_count(&self) -> u32 {
        self.state().exposures
    }

    pub fn bias_count(&self) -> u32 {
        self.state().biases
    }

    pub fn filter_position(&self) -> Option<u32> {
        self.state().filter_position
    }

    pub fn setup(&self) -> DetectorSetup {
        self.state().setup
    }

    pub fn is_paused(&self) -> bool {
        self.state().paused
    }

    fn check_failure(&self) -> OResult<()> {
        match &self.state().failure {
            Some(message) => Err(OError::hardware(message.clone())),
            None => Ok(()),
        }
    }

    fn write_frame(&self, filename: &str) -> OResult<()> {
        if !self.write_frames {
            return Ok(());
        }
        if let Some(parent) = Path::new(filename).parent() {
            fs::create_dir_all(parent)?;
        }
        File::create(filename)?;
        Ok(())
    }
}

impl CcdController for SimulatedCcd {
    fn setup_dimensions(&self, setup: &DetectorSetup) -> OResult<()> {
        debug!("Simulated CCD setup {:?}", setup);
        self.state().setup = *setup;
        Ok(())
    }

    fn expose(
        &self,
        open_shutter: bool,
        start_time: Option<Timestamp>,
        exposure_length_ms: u64,
        filename: &str,
        cancel: &CancelToken,
    ) -> OResult<ExposureTimes> {
        self.check_failure()?;

        if let Some(start_time) = start_time {
            let wait = start_time.seconds_since(&Timestamp::now());
            if wait > 0.0 {
                cancel.sleep(Duration::from_secs_f64(wait))?;
            }
        }

        let start = Timestamp::now();
        debug!(
            "Simulated CCD exposing {} ms (shutter {}) to {}",
            exposure_length_ms,
            if open_shutter { "open" } else { "closed" },
            filename
        );
        cancel.sleep(Duration::from_millis(exposure_length_ms))?;
        let end = Timestamp::now();
        cancel.sleep(self.readout)?;

        self.write_frame(filename)?;
        self.state().exposures += 1;
        Ok(ExposureTimes { start, end })
    }

    fn bias(&self, filename: &str) -> OResult<()> {
        self.check_failure()?;
        std::thread::sleep(self.readout);
        self.write_frame(filename)?;
        self.state().biases += 1;
        Ok(())
    }

    fn filter_wheel_move(&self, position: u32) -> OResult<()> {
        info!("Simulated filter wheel moving to {}", position);
        self.state().filter_position = Some(position);
        Ok(())
    }

    fn abort(&self) -> OResult<()> {
        info!("Simulated CCD abort");
        Ok(())
    }

    fn reset(&self) -> OResult<()> {
        info!("Simulated CCD reset");
        let mut state = self.state();
        state.setup = DetectorSetup::default();
        state.paused = false;
        Ok(())
    }

    fn pause(&self) -> OResult<()> {
        self.state().paused = true;
        Ok(())
    }

    fn resume(&self) -> OResult<()> {
        self.state().paused = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_expose_writes_frame() {
        let dir = tempdir().unwrap();
        let filename = dir.path().join("night/h_e_1.fits");
        let ccd = SimulatedCcd::new(Duration::from_millis(1), true);

        let times = ccd
            .expose(true, None, 20, filename.to_str().unwrap(), &CancelToken::new())
            .unwrap();
        assert!(times.end.seconds_since(&times.start) >= 0.019);
        assert!(filename.exists());
        assert_eq!(ccd.exposure_count(), 1);
    }

    #[test]
    fn test_expose_cancelled() {
        let ccd = SimulatedCcd::new(Duration::from_millis(1), false);
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = ccd.expose(true, None, 10_000, "unused.fits", &cancel);
        assert!(matches!(result, Err(OError::Aborted)));
        assert_eq!(ccd.exposure_count(), 0);
    }

    #[test]
    fn test_failure_injection() {
        let ccd = SimulatedCcd::new(Duration::from_millis(1), false);
        ccd.fail_with("shutter stuck");
        assert!(matches!(ccd.bias("b.fits"), Err(OError::Hardware(_))));
    }

    #[test]
    fn test_reset_restores_default_setup() {
        let ccd = SimulatedCcd::new(Duration::from_millis(1), false);
        ccd.setup_dimensions(&DetectorSetup { bin_x: 2, bin_y: 2, window: None }).unwrap();
        ccd.pause().unwrap();
        ccd.reset().unwrap();
        assert_eq!(ccd.setup(), DetectorSetup::default());
        assert!(!ccd.is_paused());
    }
}
