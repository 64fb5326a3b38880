//! BIAS, DARK, MULTBIAS and MULTDARK

use std::time::Duration;

use chrono::Utc;
use log::info;
use olibmsg::{Command, DonePayload, OError, OResult, Timestamp};

use super::{frame_estimate, CommandHandler, HandlerContext};
use crate::config::OConfig;
use crate::fits::ExposureType;

/// Frames a calibration command asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CalibrationPlan {
    exposure_type: ExposureType,
    count: u32,
    exposure_length_ms: u64,
}

impl CalibrationPlan {
    fn from_command(command: &Command, config: &OConfig) -> OResult<Self> {
        let (exposure_type, count, exposure_length_ms) = match command {
            Command::Bias => (ExposureType::Bias, 1, 0),
            Command::Dark(dark) => (ExposureType::Dark, 1, dark.exposure_length_ms),
            Command::MultBias(mult) => (ExposureType::Bias, mult.number_exposures, 0),
            Command::MultDark(mult) => (ExposureType::Dark, mult.number_exposures, mult.exposure_length_ms),
            other => {
                return Err(OError::protocol(format!(
                    "{} is not a calibration",
                    other.cmd_type().name()
                )))
            }
        };
        if count == 0 {
            return Err(OError::parameter("Number of exposures must be positive"));
        }
        if exposure_type == ExposureType::Dark && exposure_length_ms == 0 {
            return Err(OError::parameter("Dark exposure length must be positive"));
        }
        config.check_exposures(count, exposure_length_ms)?;
        Ok(Self {
            exposure_type,
            count,
            exposure_length_ms,
        })
    }
}

/// Bias and dark frames, each calibrate-reduced
pub struct CalibrateHandler;

impl CommandHandler for CalibrateHandler {
    fn estimate(&self, command: &Command, config: &OConfig) -> Duration {
        match CalibrationPlan::from_command(command, config) {
            Ok(plan) => frame_estimate(config, plan.exposure_length_ms).saturating_mul(plan.count),
            Err(_) => Duration::ZERO,
        }
    }

    fn handle(&self, command: &Command, ctx: &HandlerContext<'_>) -> OResult<DonePayload> {
        let plan = CalibrationPlan::from_command(command, ctx.config())?;
        let services = ctx.services;
        let run = services.filenames.start_run(plan.exposure_type, Utc::now());
        services.status.start_exposures(plan.count, plan.exposure_length_ms);
        info!(
            "{}: {} frame(s) of {} ms, run {}",
            command.cmd_type().name(),
            plan.count,
            plan.exposure_length_ms,
            run.run_number
        );

        let mut filenames = Vec::new();
        let mut last = None;
        for n in 1..=plan.count {
            ctx.cancel.check()?;
            let remaining = plan.count - n + 1;
            ctx.acknowledge(frame_estimate(ctx.config(), plan.exposure_length_ms).saturating_mul(remaining));

            let filename = run.frame(n);
            services.status.exposure_started(n, Timestamp::now());
            match plan.exposure_type {
                ExposureType::Bias => services.ccd.bias(&filename)?,
                _ => {
                    services
                        .ccd
                        .expose(false, None, plan.exposure_length_ms, &filename, &ctx.cancel)?;
                }
            }
            ctx.cancel.check()?;

            ctx.acknowledge(ctx.config().timing.reduce());
            let result = services.pipeline.calibrate_reduce(&ctx.sub_id("reduce", n), &filename)?;
            info!(
                "{}: mean {:.1}, peak {:.1}",
                result.reduced_filename, result.mean_counts, result.peak_counts
            );
            filenames.push(filename);
            last = Some(result);
        }

        Ok(DonePayload::Calibrate { filenames, last })
    }
}
