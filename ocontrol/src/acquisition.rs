//! ACQUIRE convergence loop
//!
//! Repeatedly takes a frame, reduces it, works out how far the target lies
//! from the requested pixel and offsets the telescope, until the distance
//! drops below the threshold or the offset budget runs out.
//!
//! Pixel offsets are binned. The cumulative offset is kept in binned pixels
//! and converted to arcseconds with `plate_scale * binning` each time the
//! telescope is commanded.

use std::time::Duration;

use log::{debug, info, warn};
use olibmsg::{AcquireCommand, AcquireDone, AcquireMode, MovingTarget, OError, OResult, RequestId, Timestamp};

use crate::cancel::CancelToken;
use crate::config::OConfig;
use crate::hardware::{CcdController, ExposureTimes};
use crate::pipeline::ReductionPipeline;
use crate::telescope::TelescopeControl;
use crate::wcs::WcsLookup;

/// Result of comparing an object pixel with the target pixel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Offset {
    /// Binned pixel offset, object minus target
    pub x: f64,
    pub y: f64,
    pub distance_arcsec: f64,
    pub converged: bool,
}

/// Offset of `object` (binned) from `target_unbinned`.
///
/// Converged when the distance in arcseconds is strictly below `threshold`.
pub fn compute_offset(
    object: (f64, f64),
    target_unbinned: (f64, f64),
    binning: u32,
    plate_scale: f64,
    threshold: f64,
) -> OResult<Offset> {
    if binning == 0 {
        return Err(OError::parameter("Binning of zero"));
    }
    let binning = binning as f64;
    let x = object.0 - target_unbinned.0 / binning;
    let y = object.1 - target_unbinned.1 / binning;
    let distance_arcsec = (x * x + y * y).sqrt() * plate_scale * binning;
    Ok(Offset {
        x,
        y,
        distance_arcsec,
        converged: distance_arcsec < threshold,
    })
}

/// RA/Dec (radians) of a moving target at the middle of an exposure
pub fn compensate_moving_target(
    ra: f64,
    dec: f64,
    moving: Option<&MovingTarget>,
    exposure_start: Timestamp,
    exposure_length_ms: u64,
) -> (f64, f64) {
    let moving = match moving {
        Some(moving) => moving,
        None => return (ra, dec),
    };
    if moving.rate_epoch > exposure_start {
        warn!(
            "Rate epoch {:.3} is after the exposure start {:.3}",
            moving.rate_epoch.as_secs_f64(),
            exposure_start.as_secs_f64()
        );
    }
    let mid_exposure = exposure_start.add(Duration::from_millis(exposure_length_ms / 2));
    let elapsed = mid_exposure.seconds_since(&moving.rate_epoch);
    debug!(
        "Moving target: {:.3} s since rate epoch, rates ({:e}, {:e}) rad/s",
        elapsed, moving.ra_rate, moving.dec_rate
    );
    (ra + moving.ra_rate * elapsed, dec + moving.dec_rate * elapsed)
}

/// What to acquire
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionRequest {
    pub mode: AcquireMode,
    /// Target position in radians
    pub ra: f64,
    pub dec: f64,
    /// Target pixel, unbinned
    pub target_pixel: (f64, f64),
    /// Convergence threshold in arcseconds
    pub threshold: f64,
    pub moving: Option<MovingTarget>,
}

impl From<&AcquireCommand> for AcquisitionRequest {
    fn from(command: &AcquireCommand) -> Self {
        Self {
            mode: command.mode,
            ra: command.ra,
            dec: command.dec,
            target_pixel: (command.x_pixel, command.y_pixel),
            threshold: command.threshold,
            moving: command.moving,
        }
    }
}

/// Progress of one acquisition
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AcquisitionState {
    /// Cumulative offset commanded so far, binned pixels
    pub offset: (f64, f64),
    /// Telescope offsets issued
    pub attempts: u32,
    pub done: bool,
}

/// One reduced acquisition frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameResult {
    pub filename: String,
    pub reduced_filename: String,
    pub times: ExposureTimes,
    pub brightest_pixel: (f64, f64),
    pub seeing: f64,
    pub counts: f64,
    pub photometricity: f64,
    pub sky_brightness: f64,
    pub saturation: bool,
    /// Pixel of the target RA/Dec, WCS mode only
    pub wcs_pixel: Option<(f64, f64)>,
}

impl FrameResult {
    /// Pixel compared against the target pixel
    pub fn object_pixel(&self) -> (f64, f64) {
        self.wcs_pixel.unwrap_or(self.brightest_pixel)
    }
}

/// Fixed parameters of the loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionSettings {
    pub binning: u32,
    pub exposure_length_ms: u64,
    pub max_offset_count: u32,
    pub min_threshold_arcsec: f64,
    /// Arcseconds per unbinned pixel
    pub plate_scale: f64,
    pub rotation_deg: f64,
}

impl AcquisitionSettings {
    pub fn from_config(config: &OConfig) -> OResult<Self> {
        Ok(Self {
            binning: config.acquire.binning,
            exposure_length_ms: config.acquire.exposure_length_ms,
            max_offset_count: config.acquire.max_offset_count,
            min_threshold_arcsec: config.acquire.min_threshold_arcsec,
            plate_scale: config.plate_scale()?,
            rotation_deg: config.acquire.rotation_deg,
        })
    }

    /// Arcseconds per binned pixel
    pub fn arcsec_per_pixel(&self) -> f64 {
        self.plate_scale * self.binning as f64
    }
}

/// Step the loop is about to block on
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AcquisitionPhase {
    Exposing { frame: u32 },
    Exposed { frame: u32, start: Timestamp },
    Reducing { frame: u32 },
    Offsetting { attempt: u32 },
}

/// External systems the loop drives
pub struct Collaborators<'a> {
    pub ccd: &'a dyn CcdController,
    pub pipeline: &'a dyn ReductionPipeline,
    pub telescope: &'a dyn TelescopeControl,
    pub wcs: &'a dyn WcsLookup,
}

/// One ACQUIRE run
pub struct Acquisition<'a> {
    id: &'a RequestId,
    request: AcquisitionRequest,
    settings: AcquisitionSettings,
    collaborators: Collaborators<'a>,
    cancel: &'a CancelToken,
}

impl<'a> Acquisition<'a> {
    pub fn new(
        id: &'a RequestId,
        request: AcquisitionRequest,
        settings: AcquisitionSettings,
        collaborators: Collaborators<'a>,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            id,
            request,
            settings,
            collaborators,
            cancel,
        }
    }

    fn check_request(&self) -> OResult<()> {
        if self.request.threshold <= 0.0 || self.request.threshold < self.settings.min_threshold_arcsec {
            return Err(OError::parameter(format!(
                "Threshold {} arcsec below minimum {}",
                self.request.threshold, self.settings.min_threshold_arcsec
            )));
        }
        if self.settings.binning == 0 {
            return Err(OError::parameter("Acquisition binning of zero"));
        }
        Ok(())
    }

    fn sub_id(&self, step: &str, n: u32) -> RequestId {
        RequestId::new(format!("{}-{}-{}", self.id, step, n))
    }

    /// Expose and reduce frame number `frame`
    fn take_frame(
        &self,
        frame: u32,
        filename: String,
        on_phase: &mut dyn FnMut(AcquisitionPhase),
    ) -> OResult<FrameResult> {
        let Collaborators { ccd, pipeline, wcs, .. } = self.collaborators;

        on_phase(AcquisitionPhase::Exposing { frame });
        let times = ccd.expose(true, None, self.settings.exposure_length_ms, &filename, self.cancel)?;
        self.cancel.check()?;
        on_phase(AcquisitionPhase::Exposed { frame, start: times.start });

        on_phase(AcquisitionPhase::Reducing { frame });
        let wcs_fit = self.request.mode == AcquireMode::Wcs;
        let reduction = pipeline.expose_reduce(&self.sub_id("reduce", frame), &filename, wcs_fit)?;

        let wcs_pixel = if wcs_fit {
            let (ra, dec) = compensate_moving_target(
                self.request.ra,
                self.request.dec,
                self.request.moving.as_ref(),
                times.start,
                self.settings.exposure_length_ms,
            );
            Some(wcs.pixel_for_sky(&reduction.reduced_filename, ra.to_degrees(), dec.to_degrees())?)
        } else {
            None
        };
        self.cancel.check()?;

        Ok(FrameResult {
            filename,
            reduced_filename: reduction.reduced_filename,
            times,
            brightest_pixel: reduction.brightest_pixel,
            seeing: reduction.seeing,
            counts: reduction.counts,
            photometricity: reduction.photometricity,
            sky_brightness: reduction.sky_brightness,
            saturation: reduction.saturation,
            wcs_pixel,
        })
    }

    /// Run the loop from `state`.
    ///
    /// `frame_filename` names frame `n` (1-based), `on_phase` is told before
    /// each blocking step.
    pub fn run(
        &self,
        state: &mut AcquisitionState,
        frame_filename: &mut dyn FnMut(u32) -> String,
        on_phase: &mut dyn FnMut(AcquisitionPhase),
    ) -> OResult<AcquireDone> {
        let scale = self.settings.arcsec_per_pixel();
        let cumulative_arcsec = |state: &AcquisitionState| (state.offset.0 * scale, state.offset.1 * scale);

        if self.request.mode == AcquireMode::None {
            info!("Acquisition mode NONE, nothing to do");
            state.done = true;
            return Ok(AcquireDone {
                attempts: state.attempts,
                offset_arcsec: cumulative_arcsec(state),
                distance_arcsec: 0.0,
                last_filename: None,
            });
        }
        self.check_request()?;
        self.cancel.check()?;

        let maximum = self.settings.max_offset_count;
        let mut frame = 0;
        loop {
            if state.attempts > maximum {
                return Err(OError::RetryBudgetExceeded {
                    attempts: state.attempts,
                    maximum,
                });
            }

            frame += 1;
            let result = self.take_frame(frame, frame_filename(frame), on_phase)?;
            let offset = compute_offset(
                result.object_pixel(),
                self.request.target_pixel,
                self.settings.binning,
                self.settings.plate_scale,
                self.request.threshold,
            )?;
            info!(
                "Frame {}: object at ({:.2}, {:.2}), offset ({:.2}, {:.2}) px, {:.3} arcsec from target",
                frame,
                result.object_pixel().0,
                result.object_pixel().1,
                offset.x,
                offset.y,
                offset.distance_arcsec
            );

            if offset.converged {
                state.done = true;
                info!(
                    "Acquired after {} offsets, {:.3} arcsec from target",
                    state.attempts, offset.distance_arcsec
                );
                return Ok(AcquireDone {
                    attempts: state.attempts,
                    offset_arcsec: cumulative_arcsec(state),
                    distance_arcsec: offset.distance_arcsec,
                    last_filename: Some(result.filename),
                });
            }
            if state.attempts >= maximum {
                return Err(OError::RetryBudgetExceeded {
                    attempts: state.attempts,
                    maximum,
                });
            }

            state.offset.0 += offset.x;
            state.offset.1 += offset.y;
            let attempt = state.attempts + 1;
            let (x_arcsec, y_arcsec) = cumulative_arcsec(state);
            on_phase(AcquisitionPhase::Offsetting { attempt });
            self.collaborators.telescope.offset_focal_plane(
                &self.sub_id("offset", attempt),
                x_arcsec,
                y_arcsec,
                self.settings.rotation_deg,
            )?;
            state.attempts = attempt;
            self.cancel.check()?;
        }
    }
}
