//! Command definitions for the O instrument
//!
//! Commands are sent by the robotic control system to the instrument server.
//! Sub-commands are sent by the instrument server to the telescope (ISS) and
//! the data reduction pipeline (DpRt).

use serde::{Deserialize, Serialize};
use crate::types::{
    AcquireMode, DetectorSetup, MovingTarget, RebootLevel, RequestId, SlidePosition,
};

/// Command types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CommandType {
    Bias,
    Dark,
    MultBias,
    MultDark,
    Glance,
    Save,
    Acquire,
    Setup,
    Reboot,
    Interrupt,
    Pause,
    Resume,
    GetStatus,
}

impl CommandType {
    pub fn to_u8(&self) -> u8 {
        match self {
            CommandType::Bias => 0x01,
            CommandType::Dark => 0x02,
            CommandType::MultBias => 0x03,
            CommandType::MultDark => 0x04,
            CommandType::Glance => 0x10,
            CommandType::Save => 0x11,
            CommandType::Acquire => 0x12,
            CommandType::Setup => 0x20,
            CommandType::Reboot => 0x30,
            CommandType::Interrupt => 0x31,
            CommandType::Pause => 0x32,
            CommandType::Resume => 0x33,
            CommandType::GetStatus => 0x40,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(CommandType::Bias),
            0x02 => Some(CommandType::Dark),
            0x03 => Some(CommandType::MultBias),
            0x04 => Some(CommandType::MultDark),
            0x10 => Some(CommandType::Glance),
            0x11 => Some(CommandType::Save),
            0x12 => Some(CommandType::Acquire),
            0x20 => Some(CommandType::Setup),
            0x30 => Some(CommandType::Reboot),
            0x31 => Some(CommandType::Interrupt),
            0x32 => Some(CommandType::Pause),
            0x33 => Some(CommandType::Resume),
            0x40 => Some(CommandType::GetStatus),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CommandType::Bias => "BIAS",
            CommandType::Dark => "DARK",
            CommandType::MultBias => "MULTBIAS",
            CommandType::MultDark => "MULTDARK",
            CommandType::Glance => "GLANCE",
            CommandType::Save => "SAVE",
            CommandType::Acquire => "ACQUIRE",
            CommandType::Setup => "SETUP",
            CommandType::Reboot => "REBOOT",
            CommandType::Interrupt => "INTERRUPT",
            CommandType::Pause => "PAUSE",
            CommandType::Resume => "RESUME",
            CommandType::GetStatus => "GET_STATUS",
        }
    }

    /// Exempt commands may run while a primary command is in flight
    pub fn is_exempt(&self) -> bool {
        matches!(
            self,
            CommandType::Interrupt | CommandType::Pause | CommandType::Resume | CommandType::GetStatus
        )
    }
}

/// DARK command - one frame with the shutter closed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DarkCommand {
    pub exposure_length_ms: u64,
}

/// MULTBIAS command - a run of bias frames
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MultBiasCommand {
    pub number_exposures: u32,
}

/// MULTDARK command - a run of dark frames
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MultDarkCommand {
    pub number_exposures: u32,
    pub exposure_length_ms: u64,
}

/// GLANCE and SAVE commands - one exposure with the shutter open
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExposeCommand {
    pub exposure_length_ms: u64,
}

/// ACQUIRE command - centre a target on a detector pixel
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AcquireCommand {
    pub mode: AcquireMode,
    /// Target right ascension in radians
    pub ra: f64,
    /// Target declination in radians
    pub dec: f64,
    /// Target pixel, unbinned
    pub x_pixel: f64,
    pub y_pixel: f64,
    /// Convergence threshold in arcseconds
    pub threshold: f64,
    #[serde(default)]
    pub moving: Option<MovingTarget>,
}

/// SETUP command - detector, filter wheel and ND slide configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetupCommand {
    pub name: String,
    pub detector: DetectorSetup,
    pub filter: String,
    #[serde(default)]
    pub nd_slides: Vec<SlidePosition>,
}

/// REBOOT command
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RebootCommand {
    pub level: RebootLevel,
}

/// Union of all command types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Command {
    Bias,
    Dark(DarkCommand),
    MultBias(MultBiasCommand),
    MultDark(MultDarkCommand),
    Glance(ExposeCommand),
    Save(ExposeCommand),
    Acquire(AcquireCommand),
    Setup(SetupCommand),
    Reboot(RebootCommand),
    Interrupt,
    Pause,
    Resume,
    GetStatus,
}

impl Command {
    pub fn cmd_type(&self) -> CommandType {
        match self {
            Command::Bias => CommandType::Bias,
            Command::Dark(_) => CommandType::Dark,
            Command::MultBias(_) => CommandType::MultBias,
            Command::MultDark(_) => CommandType::MultDark,
            Command::Glance(_) => CommandType::Glance,
            Command::Save(_) => CommandType::Save,
            Command::Acquire(_) => CommandType::Acquire,
            Command::Setup(_) => CommandType::Setup,
            Command::Reboot(_) => CommandType::Reboot,
            Command::Interrupt => CommandType::Interrupt,
            Command::Pause => CommandType::Pause,
            Command::Resume => CommandType::Resume,
            Command::GetStatus => CommandType::GetStatus,
        }
    }
}

/// Sub-commands for the telescope control system
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum IssCommand {
    /// Offset the focal plane by the given amounts relative to the nominal position
    OffsetFocalPlane {
        x_arcsec: f64,
        y_arcsec: f64,
        rotation_deg: f64,
    },
}

/// Sub-commands for the data reduction pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum DpRtCommand {
    ExposeReduce { filename: String, wcs_fit: bool },
    CalibrateReduce { filename: String },
    Abort,
}

/// A command together with the identifier its replies carry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request<C> {
    pub id: RequestId,
    pub command: C,
}

impl<C> Request<C> {
    pub fn new(id: RequestId, command: C) -> Self {
        Self { id, command }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_type_conversion() {
        let cmd_type = CommandType::Acquire;
        assert_eq!(cmd_type.to_u8(), 0x12);
        assert_eq!(CommandType::from_u8(0x12), Some(CommandType::Acquire));
        assert_eq!(CommandType::from_u8(0xff), None);
    }

    #[test]
    fn test_exempt_commands() {
        assert!(Command::Interrupt.cmd_type().is_exempt());
        assert!(Command::GetStatus.cmd_type().is_exempt());
        assert!(!Command::Bias.cmd_type().is_exempt());
        assert!(!Command::Glance(ExposeCommand { exposure_length_ms: 10 }).cmd_type().is_exempt());
    }

    #[test]
    fn test_request_serialization() {
        let request = Request::new(
            RequestId::new("rcs-7"),
            Command::Dark(DarkCommand { exposure_length_ms: 30_000 }),
        );
        let json = serde_json::to_string(&request).unwrap();
        let decoded: Request<Command> = serde_json::from_str(&json).unwrap();
        assert_eq!(request, decoded);
    }
}
