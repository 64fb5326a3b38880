//! Simulated telescope (ISS)

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::info;
use olibmsg::{DonePayload, IssCommand, OResult};

use crate::servers::SimHandler;

/// Pointing shared between the simulated telescope and pipeline
#[derive(Debug, Default)]
pub struct TelescopeState {
    offset: Mutex<(f64, f64)>,
}

impl TelescopeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Focal plane offset from the nominal pointing, arcseconds
    pub fn offset(&self) -> (f64, f64) {
        *self.offset.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_offset(&self, offset: (f64, f64)) {
        *self.offset.lock().unwrap_or_else(|e| e.into_inner()) = offset;
    }
}

pub struct SimulatedIss {
    state: Arc<TelescopeState>,
    offset_time: Duration,
}

impl SimulatedIss {
    pub fn new(state: Arc<TelescopeState>, offset_time: Duration) -> Self {
        Self { state, offset_time }
    }
}

impl SimHandler<IssCommand> for SimulatedIss {
    fn name(&self) -> &str {
        "ISS"
    }

    fn duration(&self, _command: &IssCommand) -> Duration {
        self.offset_time
    }

    fn handle(&self, command: &IssCommand) -> OResult<DonePayload> {
        match *command {
            IssCommand::OffsetFocalPlane {
                x_arcsec,
                y_arcsec,
                rotation_deg,
            } => {
                info!(
                    "ISS focal plane offset ({:.3}, {:.3}) arcsec, rotation {:.2}",
                    x_arcsec, y_arcsec, rotation_deg
                );
                self.state.set_offset((x_arcsec, y_arcsec));
            }
        }
        Ok(DonePayload::Empty)
    }
}
