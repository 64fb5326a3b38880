//! Hardware proxy interfaces
//!
//! The CCD controller driver and the ND filter slide controller are external
//! collaborators. Handlers only see these traits.

use olibmsg::{DetectorSetup, OResult, SlidePosition, Timestamp};

use crate::cancel::CancelToken;

/// Start and end of a completed exposure
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureTimes {
    pub start: Timestamp,
    pub end: Timestamp,
}

/// CCD controller proxy
pub trait CcdController: Send + Sync {
    /// Set binning and readout window for subsequent frames
    fn setup_dimensions(&self, setup: &DetectorSetup) -> OResult<()>;

    /// Take one frame and write it to `filename`.
    ///
    /// `open_shutter` is false for darks. With `start_time` the exposure waits
    /// for that time, otherwise it starts at once.
    fn expose(
        &self,
        open_shutter: bool,
        start_time: Option<Timestamp>,
        exposure_length_ms: u64,
        filename: &str,
        cancel: &CancelToken,
    ) -> OResult<ExposureTimes>;

    /// Read out a zero length frame to `filename`
    fn bias(&self, filename: &str) -> OResult<()>;

    fn filter_wheel_move(&self, position: u32) -> OResult<()>;

    /// Abort the exposure or readout in progress
    fn abort(&self) -> OResult<()>;

    /// Re-initialise the controller
    fn reset(&self) -> OResult<()>;

    fn pause(&self) -> OResult<()>;

    fn resume(&self) -> OResult<()>;
}

/// ND filter slide proxy
pub trait FilterSlide: Send + Sync {
    fn slide_count(&self) -> usize;

    fn move_slide(&self, slide: usize, position: SlidePosition) -> OResult<()>;

    fn slide_position(&self, slide: usize) -> OResult<SlidePosition>;
}
