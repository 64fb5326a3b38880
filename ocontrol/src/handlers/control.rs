//! REBOOT, INTERRUPT, PAUSE, RESUME and GET_STATUS

use std::time::Duration;

use log::{info, warn};
use olibmsg::{Command, DonePayload, OError, OResult, RebootLevel, Timestamp};

use super::{CommandHandler, HandlerContext};
use crate::config::constants::{EXIT_HARDWARE_REBOOT, EXIT_POWER_OFF, EXIT_SOFTWARE_RESTART};
use crate::config::OConfig;

pub struct RebootHandler;

impl CommandHandler for RebootHandler {
    fn estimate(&self, _command: &Command, config: &OConfig) -> Duration {
        config.readout_time()
    }

    fn handle(&self, command: &Command, ctx: &HandlerContext<'_>) -> OResult<DonePayload> {
        let level = match command {
            Command::Reboot(reboot) => reboot.level,
            other => {
                return Err(OError::protocol(format!(
                    "{} is not a reboot",
                    other.cmd_type().name()
                )))
            }
        };
        let services = ctx.services;
        let permissions = &ctx.config().reboot;
        info!("REBOOT {:?}", level);

        match level {
            RebootLevel::Redatum => {
                services.ccd.reset()?;
                services
                    .ccd
                    .setup_dimensions(&ctx.config().detector.default_setup)?;
            }
            RebootLevel::Software => services.shutdown.request(EXIT_SOFTWARE_RESTART),
            RebootLevel::Hardware if permissions.enable_hardware => {
                services.shutdown.request(EXIT_HARDWARE_REBOOT)
            }
            RebootLevel::PowerOff if permissions.enable_power_off => {
                services.shutdown.request(EXIT_POWER_OFF)
            }
            RebootLevel::Hardware | RebootLevel::PowerOff => {
                warn!("REBOOT {:?} refused, not enabled", level);
                return Err(OError::parameter(format!("REBOOT {:?} is not enabled", level)));
            }
        }
        Ok(DonePayload::Empty)
    }
}

/// Cancels the primary command in flight
pub struct InterruptHandler;

impl CommandHandler for InterruptHandler {
    fn estimate(&self, _command: &Command, _config: &OConfig) -> Duration {
        Duration::ZERO
    }

    fn handle(&self, _command: &Command, ctx: &HandlerContext<'_>) -> OResult<DonePayload> {
        match ctx.services.slot.cancel_current() {
            Some(cmd_type) => {
                info!("INTERRUPT {}", cmd_type.name());
                ctx.services.ccd.abort()?;
            }
            None => info!("INTERRUPT with no command in progress"),
        }
        Ok(DonePayload::Empty)
    }
}

pub struct PauseHandler;

impl CommandHandler for PauseHandler {
    fn estimate(&self, _command: &Command, _config: &OConfig) -> Duration {
        Duration::ZERO
    }

    fn handle(&self, _command: &Command, ctx: &HandlerContext<'_>) -> OResult<DonePayload> {
        ctx.services.ccd.pause()?;
        ctx.status().add_pause_time(Timestamp::now());
        Ok(DonePayload::Empty)
    }
}

pub struct ResumeHandler;

impl CommandHandler for ResumeHandler {
    fn estimate(&self, _command: &Command, _config: &OConfig) -> Duration {
        Duration::ZERO
    }

    fn handle(&self, _command: &Command, ctx: &HandlerContext<'_>) -> OResult<DonePayload> {
        ctx.services.ccd.resume()?;
        ctx.status().add_resume_time(Timestamp::now());
        Ok(DonePayload::Empty)
    }
}

pub struct GetStatusHandler;

impl CommandHandler for GetStatusHandler {
    fn estimate(&self, _command: &Command, _config: &OConfig) -> Duration {
        Duration::ZERO
    }

    fn handle(&self, _command: &Command, ctx: &HandlerContext<'_>) -> OResult<DonePayload> {
        Ok(DonePayload::Status(ctx.status().report()))
    }
}
