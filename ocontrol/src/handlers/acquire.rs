//! ACQUIRE

use std::time::Duration;

use chrono::Utc;
use log::{info, warn};
use olibmsg::{AcquireMode, Command, DetectorSetup, DonePayload, OError, OResult};

use super::{frame_estimate, CommandHandler, HandlerContext};
use crate::acquisition::{
    Acquisition, AcquisitionPhase, AcquisitionRequest, AcquisitionSettings, AcquisitionState, Collaborators,
};
use crate::config::OConfig;
use crate::fits::ExposureType;

/// Centres a target on a detector pixel by offsetting the telescope
pub struct AcquireHandler;

impl CommandHandler for AcquireHandler {
    fn estimate(&self, _command: &Command, config: &OConfig) -> Duration {
        let frames = config.acquire.max_offset_count.saturating_add(1);
        frame_estimate(config, config.acquire.exposure_length_ms)
            .saturating_mul(frames)
            .saturating_add(config.timing.offset().saturating_mul(config.acquire.max_offset_count))
    }

    fn handle(&self, command: &Command, ctx: &HandlerContext<'_>) -> OResult<DonePayload> {
        let acquire = match command {
            Command::Acquire(acquire) => acquire,
            other => {
                return Err(OError::protocol(format!(
                    "{} is not an acquisition",
                    other.cmd_type().name()
                )))
            }
        };
        let services = ctx.services;
        let request = AcquisitionRequest::from(acquire);
        let settings = AcquisitionSettings::from_config(ctx.config())?;
        info!(
            "ACQUIRE {:?}: RA {:.6} Dec {:.6} rad onto ({:.1}, {:.1}), threshold {} arcsec",
            request.mode, request.ra, request.dec, request.target_pixel.0, request.target_pixel.1, request.threshold
        );

        let acquisition = Acquisition::new(
            ctx.id,
            request,
            settings,
            Collaborators {
                ccd: services.ccd.as_ref(),
                pipeline: services.pipeline.as_ref(),
                telescope: services.telescope.as_ref(),
                wcs: services.wcs.as_ref(),
            },
            &ctx.cancel,
        );
        let mut state = AcquisitionState::default();
        if request.mode == AcquireMode::None {
            let done = acquisition.run(&mut state, &mut |_| String::new(), &mut |_| {})?;
            return Ok(DonePayload::Acquire(done));
        }

        let previous = services.status.detector().unwrap_or(ctx.config().detector.default_setup);
        services.ccd.setup_dimensions(&DetectorSetup {
            bin_x: settings.binning,
            bin_y: settings.binning,
            window: None,
        })?;

        let run = services.filenames.start_run(ExposureType::Acquire, Utc::now());
        services
            .status
            .start_exposures(settings.max_offset_count.saturating_add(1), settings.exposure_length_ms);
        let config = ctx.config();
        let result = acquisition.run(&mut state, &mut |frame| run.frame(frame), &mut |phase| match phase {
            AcquisitionPhase::Exposing { .. } => {
                ctx.acknowledge(frame_estimate(config, settings.exposure_length_ms))
            }
            AcquisitionPhase::Exposed { frame, start } => services.status.exposure_started(frame, start),
            AcquisitionPhase::Reducing { .. } => ctx.acknowledge(config.timing.reduce()),
            AcquisitionPhase::Offsetting { .. } => ctx.acknowledge(config.timing.offset()),
        });

        let restored = services.ccd.setup_dimensions(&previous);
        match (result, restored) {
            (Ok(done), Ok(())) => Ok(DonePayload::Acquire(done)),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), restored) => {
                if let Err(restore_error) = restored {
                    warn!("Restoring detector setup after failed ACQUIRE: {}", restore_error);
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::tests::TestRig;
    use olibmsg::{AcquireCommand, AcquireDone, RequestId};
    use tempfile::tempdir;

    fn acquire(mode: AcquireMode) -> Command {
        Command::Acquire(AcquireCommand {
            mode,
            ra: 1.0,
            dec: 0.5,
            x_pixel: 200.0,
            y_pixel: 102.0,
            threshold: 0.5,
            moving: None,
        })
    }

    #[test]
    fn test_acquire_brightest() {
        let dir = tempdir().unwrap();
        let rig = TestRig::new(dir.path(), vec![(100.0, 100.0), (100.0, 51.0)]);
        let payload = rig.run(&acquire(AcquireMode::Brightest)).unwrap();
        match payload {
            DonePayload::Acquire(AcquireDone {
                attempts,
                offset_arcsec,
                last_filename,
                ..
            }) => {
                assert_eq!(attempts, 1);
                assert!((offset_arcsec.1 - 29.4).abs() < 1e-9);
                assert!(last_filename.unwrap().ends_with("_1_2_1_0.fits"));
            }
            other => panic!("unexpected payload {:?}", other),
        }
        let offsets = rig.telescope.offsets();
        assert_eq!(offsets.len(), 1);
        assert_eq!(offsets[0].0, RequestId::new("rcs-1-offset-1"));
        assert_eq!(rig.services.status.exposure_number(), 2);
    }

    #[test]
    fn test_detector_setup_restored() {
        let dir = tempdir().unwrap();
        let rig = TestRig::new(dir.path(), vec![(500.0, 500.0)]);
        let result = rig.run(&acquire(AcquireMode::Brightest));
        assert!(matches!(
            result,
            Err(OError::RetryBudgetExceeded { attempts: 3, maximum: 3 })
        ));
        assert_eq!(rig.ccd.setup(), DetectorSetup::default());
        assert_eq!(rig.ccd.exposure_count(), 4);
    }

    #[test]
    fn test_mode_none() {
        let dir = tempdir().unwrap();
        let rig = TestRig::new(dir.path(), vec![]);
        let payload = rig.run(&acquire(AcquireMode::None)).unwrap();
        assert!(matches!(payload, DonePayload::Acquire(AcquireDone { attempts: 0, .. })));
        assert_eq!(rig.ccd.exposure_count(), 0);
    }

    #[test]
    fn test_missing_plate_scale() {
        let dir = tempdir().unwrap();
        let mut config = crate::config::tests::test_config();
        config.fits.data_dir = dir.path().display().to_string();
        config.fits.header_defaults.clear();
        let rig = TestRig::with_config(config, vec![]);
        let result = rig.run(&acquire(AcquireMode::Brightest));
        assert!(matches!(result, Err(OError::Config(_))));
    }

    #[test]
    fn test_estimate_saturates() {
        let mut config = crate::config::tests::test_config();
        config.acquire.max_offset_count = u32::MAX;
        config.acquire.exposure_length_ms = u64::MAX;
        assert_eq!(AcquireHandler.estimate(&acquire(AcquireMode::Wcs), &config), Duration::MAX);
    }
}
