//! Command handlers
//!
//! Every instrument command is served by one `CommandHandler`. Handlers share
//! the hardware proxies, the external system clients and the live status
//! through `Services`, and see the request being served through a
//! `HandlerContext`.

mod acquire;
mod calibrate;
mod control;
mod expose;
mod setup;

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use olibmsg::{Command, CommandType, DonePayload, OResult, RequestId};

use crate::cancel::{CancelToken, CommandSlot};
use crate::config::OConfig;
use crate::fits::FitsFilename;
use crate::hardware::{CcdController, FilterSlide};
use crate::keepalive::KeepAlive;
use crate::pipeline::ReductionPipeline;
use crate::status::Status;
use crate::telescope::TelescopeControl;
use crate::wcs::WcsLookup;

pub use acquire::AcquireHandler;
pub use calibrate::CalibrateHandler;
pub use control::{GetStatusHandler, InterruptHandler, PauseHandler, RebootHandler, ResumeHandler};
pub use expose::{GlanceHandler, SaveHandler};
pub use setup::SetupHandler;

/// Server run state and the exit code REBOOT asks for
#[derive(Debug)]
pub struct Shutdown {
    running: Arc<AtomicBool>,
    exit_code: AtomicI32,
}

impl Shutdown {
    pub fn new(running: Arc<AtomicBool>) -> Self {
        Self {
            running,
            exit_code: AtomicI32::new(0),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the server, exiting with `exit_code`
    pub fn request(&self, exit_code: i32) {
        self.exit_code.store(exit_code, Ordering::SeqCst);
        self.stop();
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::SeqCst)
    }
}

/// Everything the handlers share
pub struct Services {
    pub config: OConfig,
    pub status: Status,
    pub ccd: Arc<dyn CcdController>,
    pub slides: Option<Arc<dyn FilterSlide>>,
    pub pipeline: Arc<dyn ReductionPipeline>,
    pub telescope: Arc<dyn TelescopeControl>,
    pub wcs: Arc<dyn WcsLookup>,
    pub filenames: FitsFilename,
    pub slot: CommandSlot,
    pub shutdown: Shutdown,
}

/// The request a handler is serving
pub struct HandlerContext<'a> {
    pub id: &'a RequestId,
    pub services: &'a Services,
    pub cancel: CancelToken,
    pub keep_alive: Option<&'a KeepAlive>,
}

impl HandlerContext<'_> {
    /// Tell the client the command needs `estimate` more
    pub fn acknowledge(&self, estimate: Duration) {
        if let Some(keep_alive) = self.keep_alive {
            keep_alive.set_estimate(estimate);
        }
    }

    /// Identifier for sub-command `n` of `step`
    pub fn sub_id(&self, step: &str, n: u32) -> RequestId {
        RequestId::new(format!("{}-{}-{}", self.id, step, n))
    }

    pub fn config(&self) -> &OConfig {
        &self.services.config
    }

    pub fn status(&self) -> &Status {
        &self.services.status
    }
}

/// One instrument command implementation
pub trait CommandHandler: Sync {
    /// Expected run time, sent with the first ACK
    fn estimate(&self, command: &Command, config: &OConfig) -> Duration;

    fn handle(&self, command: &Command, ctx: &HandlerContext<'_>) -> OResult<DonePayload>;
}

/// Handler serving `cmd_type`
pub fn handler_for(cmd_type: CommandType) -> &'static dyn CommandHandler {
    match cmd_type {
        CommandType::Bias | CommandType::Dark | CommandType::MultBias | CommandType::MultDark => {
            &CalibrateHandler
        }
        CommandType::Glance => &GlanceHandler,
        CommandType::Save => &SaveHandler,
        CommandType::Acquire => &AcquireHandler,
        CommandType::Setup => &SetupHandler,
        CommandType::Reboot => &RebootHandler,
        CommandType::Interrupt => &InterruptHandler,
        CommandType::Pause => &PauseHandler,
        CommandType::Resume => &ResumeHandler,
        CommandType::GetStatus => &GetStatusHandler,
    }
}

/// Per-frame time: exposure, readout and reduction
pub(crate) fn frame_estimate(config: &OConfig, exposure_length_ms: u64) -> Duration {
    Duration::from_millis(exposure_length_ms)
        .saturating_add(config.readout_time())
        .saturating_add(config.timing.reduce())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::simulated::SimulatedCcd;
    use crate::testing::{FakePipeline, FakeTelescope, FakeWcs};
    use std::path::Path;

    /// Services over simulated and fake collaborators
    pub(crate) struct TestRig {
        pub(crate) services: Services,
        pub(crate) ccd: Arc<SimulatedCcd>,
        pub(crate) pipeline: Arc<FakePipeline>,
        pub(crate) telescope: Arc<FakeTelescope>,
    }

    impl TestRig {
        pub(crate) fn new(data_dir: &Path, pixels: Vec<(f64, f64)>) -> Self {
            let mut config = test_config();
            config.fits.data_dir = data_dir.display().to_string();
            Self::with_config(config, pixels)
        }

        pub(crate) fn with_config(config: OConfig, pixels: Vec<(f64, f64)>) -> Self {
            let ccd = Arc::new(SimulatedCcd::new(config.readout_time(), true));
            let pipeline = Arc::new(FakePipeline::new(pixels));
            let telescope = Arc::new(FakeTelescope::new());
            let filenames = FitsFilename::new(&config.fits.data_dir, config.fits.instrument_code.clone());
            let services = Services {
                config,
                status: Status::new(),
                ccd: ccd.clone(),
                slides: None,
                pipeline: pipeline.clone(),
                telescope: telescope.clone(),
                wcs: Arc::new(FakeWcs::new((0.0, 0.0))),
                filenames,
                slot: CommandSlot::new(),
                shutdown: Shutdown::new(Arc::new(AtomicBool::new(true))),
            };
            Self {
                services,
                ccd,
                pipeline,
                telescope,
            }
        }

        /// Run `command` to completion without keep-alives
        pub(crate) fn run(&self, command: &Command) -> OResult<DonePayload> {
            let id = RequestId::new("rcs-1");
            let ctx = HandlerContext {
                id: &id,
                services: &self.services,
                cancel: CancelToken::new(),
                keep_alive: None,
            };
            handler_for(command.cmd_type()).handle(command, &ctx)
        }
    }

    #[test]
    fn test_shutdown_request() {
        let running = Arc::new(AtomicBool::new(true));
        let shutdown = Shutdown::new(running.clone());
        assert!(shutdown.is_running());
        shutdown.request(2);
        assert!(!running.load(Ordering::SeqCst));
        assert_eq!(shutdown.exit_code(), 2);
    }

    #[test]
    fn test_sub_id() {
        let rig = TestRig::with_config(test_config(), vec![]);
        let id = RequestId::new("rcs-9");
        let ctx = HandlerContext {
            id: &id,
            services: &rig.services,
            cancel: CancelToken::new(),
            keep_alive: None,
        };
        assert_eq!(ctx.sub_id("offset", 2), RequestId::new("rcs-9-offset-2"));
    }

    #[test]
    fn test_frame_estimate() {
        let config = test_config();
        assert_eq!(frame_estimate(&config, 1_000), Duration::from_millis(1_020));
    }
}
