//! GLANCE and SAVE

use std::time::Duration;

use chrono::Utc;
use log::info;
use olibmsg::{Command, DonePayload, ExposeCommand, OError, OResult, Timestamp};

use super::{frame_estimate, CommandHandler, HandlerContext};
use crate::config::OConfig;
use crate::fits::ExposureType;

fn expose_command(command: &Command, config: &OConfig) -> OResult<ExposeCommand> {
    let expose = match command {
        Command::Glance(expose) | Command::Save(expose) => *expose,
        other => {
            return Err(OError::protocol(format!(
                "{} is not an exposure",
                other.cmd_type().name()
            )))
        }
    };
    config.check_exposures(1, expose.exposure_length_ms)?;
    Ok(expose)
}

/// Take one open shutter frame into `filename`
fn take_frame(ctx: &HandlerContext<'_>, exposure_length_ms: u64, filename: &str) -> OResult<()> {
    let services = ctx.services;
    services.status.start_exposures(1, exposure_length_ms);
    services.status.exposure_started(1, Timestamp::now());
    services
        .ccd
        .expose(true, None, exposure_length_ms, filename, &ctx.cancel)?;
    ctx.cancel.check()
}

/// Quick look exposure, overwritten each time and never reduced
pub struct GlanceHandler;

impl CommandHandler for GlanceHandler {
    fn estimate(&self, command: &Command, config: &OConfig) -> Duration {
        match expose_command(command, config) {
            Ok(expose) => Duration::from_millis(expose.exposure_length_ms).saturating_add(config.readout_time()),
            Err(_) => Duration::ZERO,
        }
    }

    fn handle(&self, command: &Command, ctx: &HandlerContext<'_>) -> OResult<DonePayload> {
        let expose = expose_command(command, ctx.config())?;
        let filename = ctx.services.filenames.glance();
        info!("GLANCE {} ms to {}", expose.exposure_length_ms, filename);
        take_frame(ctx, expose.exposure_length_ms, &filename)?;
        Ok(DonePayload::Expose {
            filename,
            reduction: None,
        })
    }
}

/// Science exposure, saved and reduced
pub struct SaveHandler;

impl CommandHandler for SaveHandler {
    fn estimate(&self, command: &Command, config: &OConfig) -> Duration {
        match expose_command(command, config) {
            Ok(expose) => frame_estimate(config, expose.exposure_length_ms),
            Err(_) => Duration::ZERO,
        }
    }

    fn handle(&self, command: &Command, ctx: &HandlerContext<'_>) -> OResult<DonePayload> {
        let expose = expose_command(command, ctx.config())?;
        let run = ctx.services.filenames.start_run(ExposureType::Exposure, Utc::now());
        let filename = run.frame(1);
        info!("SAVE {} ms to {}", expose.exposure_length_ms, filename);
        take_frame(ctx, expose.exposure_length_ms, &filename)?;

        ctx.acknowledge(ctx.config().timing.reduce());
        let reduction = ctx
            .services
            .pipeline
            .expose_reduce(&ctx.sub_id("reduce", 1), &filename, false)?;
        ctx.cancel.check()?;
        Ok(DonePayload::Expose {
            filename,
            reduction: Some(reduction),
        })
    }
}
