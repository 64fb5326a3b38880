//! Configuration loading for the O instrument server

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use olibmsg::{DetectorSetup, OError, OResult};
use serde::{Deserialize, Serialize};

use crate::config::constants::{
    DEFAULT_ACQUIRE_BINNING, DEFAULT_ACQUIRE_EXPOSURE_MS, DEFAULT_KEEP_ALIVE_MS,
    DEFAULT_MAX_EXPOSURE_COUNT, DEFAULT_MAX_EXPOSURE_MS, DEFAULT_MAX_OFFSET_COUNT,
    DEFAULT_MIN_THRESHOLD_ARCSEC, MAX_BINNING, PLATE_SCALE_KEYWORD,
};

/// Network endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointConfig {
    pub address: String,
    pub port: u16,
}

impl EndpointConfig {
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Detector geometry and timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectorConfig {
    /// Unbinned detector size
    pub width: u32,
    pub height: u32,
    /// Readout time of a full unbinned frame
    pub readout_ms: u64,
    /// Setup applied at startup
    #[serde(default)]
    pub default_setup: DetectorSetup,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            width: 4096,
            height: 4112,
            readout_ms: 20_000,
            default_setup: DetectorSetup::default(),
        }
    }
}

/// FITS naming and header defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FitsConfig {
    pub data_dir: String,
    pub instrument_code: String,
    /// Default header values, keyed by FITS keyword
    #[serde(default)]
    pub header_defaults: BTreeMap<String, serde_json::Value>,
}

/// ACQUIRE settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AcquireConfig {
    pub binning: u32,
    pub exposure_length_ms: u64,
    pub max_offset_count: u32,
    pub min_threshold_arcsec: f64,
    #[serde(default)]
    pub rotation_deg: f64,
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            binning: DEFAULT_ACQUIRE_BINNING,
            exposure_length_ms: DEFAULT_ACQUIRE_EXPOSURE_MS,
            max_offset_count: DEFAULT_MAX_OFFSET_COUNT,
            min_threshold_arcsec: DEFAULT_MIN_THRESHOLD_ARCSEC,
            rotation_deg: 0.0,
        }
    }
}

/// Time estimates used in ACK replies
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimingConfig {
    pub keep_alive_ms: u64,
    pub reduce_ms: u64,
    pub offset_ms: u64,
    pub filter_move_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            keep_alive_ms: DEFAULT_KEEP_ALIVE_MS,
            reduce_ms: 30_000,
            offset_ms: 20_000,
            filter_move_ms: 30_000,
        }
    }
}

impl TimingConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    pub fn reduce(&self) -> Duration {
        Duration::from_millis(self.reduce_ms)
    }

    pub fn offset(&self) -> Duration {
        Duration::from_millis(self.offset_ms)
    }

    pub fn filter_move(&self) -> Duration {
        Duration::from_millis(self.filter_move_ms)
    }
}

/// Bounds on what a single command may ask the detector for
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExposureLimits {
    pub max_exposure_count: u32,
    pub max_exposure_length_ms: u64,
}

impl Default for ExposureLimits {
    fn default() -> Self {
        Self {
            max_exposure_count: DEFAULT_MAX_EXPOSURE_COUNT,
            max_exposure_length_ms: DEFAULT_MAX_EXPOSURE_MS,
        }
    }
}

/// Which REBOOT levels may leave the process
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RebootConfig {
    pub enable_hardware: bool,
    pub enable_power_off: bool,
}

/// Complete server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OConfig {
    pub server: EndpointConfig,
    pub iss: EndpointConfig,
    pub dprt: EndpointConfig,
    #[serde(default)]
    pub filter_slide: Option<EndpointConfig>,
    #[serde(default)]
    pub nd_slide_count: usize,
    #[serde(default)]
    pub detector: DetectorConfig,
    pub fits: FitsConfig,
    /// Filter wheel position by filter name
    pub filters: BTreeMap<String, u32>,
    #[serde(default)]
    pub acquire: AcquireConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub limits: ExposureLimits,
    #[serde(default)]
    pub reboot: RebootConfig,
}

impl OConfig {
    /// Plate scale in arcseconds per unbinned pixel, from the FITS defaults
    pub fn plate_scale(&self) -> OResult<f64> {
        let value = self
            .fits
            .header_defaults
            .get(PLATE_SCALE_KEYWORD)
            .ok_or_else(|| OError::Config(format!("Missing FITS default {}", PLATE_SCALE_KEYWORD)))?;
        let scale = value
            .as_f64()
            .ok_or_else(|| OError::Config(format!("FITS default {} is not a number", PLATE_SCALE_KEYWORD)))?;
        if scale <= 0.0 {
            return Err(OError::Config(format!("FITS default {} must be positive", PLATE_SCALE_KEYWORD)));
        }
        Ok(scale)
    }

    /// Filter wheel position of a named filter
    pub fn filter_position(&self, name: &str) -> OResult<u32> {
        self.filters
            .get(name)
            .copied()
            .ok_or_else(|| OError::parameter(format!("Unknown filter {}", name)))
    }

    /// Name of the filter at a wheel position
    pub fn filter_name(&self, position: u32) -> Option<&str> {
        self.filters
            .iter()
            .find(|(_, p)| **p == position)
            .map(|(name, _)| name.as_str())
    }

    /// Reject `count` frames of `length_ms` beyond the configured limits
    pub fn check_exposures(&self, count: u32, length_ms: u64) -> OResult<()> {
        if count > self.limits.max_exposure_count {
            return Err(OError::parameter(format!(
                "{} exposures exceeds the maximum of {}",
                count, self.limits.max_exposure_count
            )));
        }
        if length_ms > self.limits.max_exposure_length_ms {
            return Err(OError::parameter(format!(
                "Exposure length {} ms exceeds the maximum of {} ms",
                length_ms, self.limits.max_exposure_length_ms
            )));
        }
        Ok(())
    }

    pub fn readout_time(&self) -> Duration {
        Duration::from_millis(self.detector.readout_ms)
    }

    fn validate(&self) -> Result<(), String> {
        if self.fits.instrument_code.is_empty() {
            return Err("Empty instrument code".to_string());
        }
        if self.acquire.binning == 0 || self.acquire.binning > MAX_BINNING {
            return Err(format!("Invalid acquire binning {}", self.acquire.binning));
        }
        if self.acquire.min_threshold_arcsec <= 0.0 {
            return Err("Acquire minimum threshold must be positive".to_string());
        }
        if self.acquire.max_offset_count >= self.limits.max_exposure_count {
            return Err(format!(
                "Acquire offset count {} needs more than {} exposures",
                self.acquire.max_offset_count, self.limits.max_exposure_count
            ));
        }
        if self.acquire.exposure_length_ms > self.limits.max_exposure_length_ms {
            return Err("Acquire exposure length exceeds the exposure limit".to_string());
        }
        if self.timing.keep_alive_ms == 0 {
            return Err("Keep-alive interval must be positive".to_string());
        }
        if self.nd_slide_count > 0 && self.filter_slide.is_none() {
            return Err("ND slides configured without a filter slide endpoint".to_string());
        }
        self.plate_scale().map_err(|e| e.to_string())?;
        Ok(())
    }
}

/// Load server configuration from a JSON file
pub fn load_config<P: AsRef<Path>>(path: P) -> OResult<OConfig> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let config: OConfig = serde_json::from_reader(reader)?;

    config.validate().map_err(OError::Config)?;

    Ok(config)
}

/// Configuration constants
pub mod constants {
    use std::time::Duration;

    /// FITS keyword holding the plate scale in arcsec per unbinned pixel
    pub const PLATE_SCALE_KEYWORD: &str = "CCDSCALE";

    pub const MAX_BINNING: u32 = 4;

    pub const DEFAULT_ACQUIRE_BINNING: u32 = 2;

    pub const DEFAULT_ACQUIRE_EXPOSURE_MS: u64 = 10_000;

    pub const DEFAULT_MAX_OFFSET_COUNT: u32 = 5;

    pub const DEFAULT_MIN_THRESHOLD_ARCSEC: f64 = 0.1;

    pub const DEFAULT_KEEP_ALIVE_MS: u64 = 5_000;

    /// Frames one MULTBIAS or MULTDARK may take
    pub const DEFAULT_MAX_EXPOSURE_COUNT: u32 = 1_000;

    pub const DEFAULT_MAX_EXPOSURE_MS: u64 = 3_600_000;

    /// How long the accept loop sleeps when no client is waiting
    pub const ACCEPT_POLL: Duration = Duration::from_millis(100);

    /// Longest completion time an ACK announces
    pub const MAX_ACK_ESTIMATE: Duration = Duration::from_secs(7 * 24 * 3600);

    /// Read timeout for the request that opens a connection
    pub const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(10);

    /// Granularity of cancellable sleeps
    pub const CANCEL_POLL: Duration = Duration::from_millis(50);

    /// Reply timeout for the ND filter slide controller
    pub const FILTER_SLIDE_TIMEOUT: Duration = Duration::from_secs(30);

    /// Process exit codes requested by REBOOT
    pub const EXIT_SOFTWARE_RESTART: i32 = 2;
    pub const EXIT_HARDWARE_REBOOT: i32 = 3;
    pub const EXIT_POWER_OFF: i32 = 4;

    /// Name of the GLANCE frame inside the data directory
    pub const GLANCE_FILENAME: &str = "glance.fits";
}
