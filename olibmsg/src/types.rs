//! Type definitions shared between the instrument server and its clients

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock timestamp
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    /// Seconds since UNIX epoch
    pub seconds: i64,
    /// Nanoseconds within the current second
    pub nanoseconds: u32,
}

impl Timestamp {
    /// Create a new timestamp from the current system time
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            seconds: duration.as_secs() as i64,
            nanoseconds: duration.subsec_nanos(),
        }
    }

    pub fn from_secs_f64(seconds: f64) -> Self {
        let whole = seconds.floor();
        Self {
            seconds: whole as i64,
            nanoseconds: ((seconds - whole) * 1e9) as u32,
        }
    }

    /// Seconds since UNIX epoch as a float
    pub fn as_secs_f64(&self) -> f64 {
        self.seconds as f64 + self.nanoseconds as f64 * 1e-9
    }

    /// Timestamp advanced by `duration`
    pub fn add(&self, duration: Duration) -> Self {
        Self::from_secs_f64(self.as_secs_f64() + duration.as_secs_f64())
    }

    /// Signed seconds from `earlier` to `self`
    pub fn seconds_since(&self, earlier: &Timestamp) -> f64 {
        self.as_secs_f64() - earlier.as_secs_f64()
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.seconds, self.nanoseconds)
            .single()
            .unwrap_or_default()
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(datetime: DateTime<Utc>) -> Self {
        Self {
            seconds: datetime.timestamp(),
            nanoseconds: datetime.timestamp_subsec_nanos(),
        }
    }
}

/// Request identifier, unique per command and reused for idempotent retries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How ACQUIRE locates the object it centres
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AcquireMode {
    /// No acquisition, the command succeeds immediately
    None,
    /// Fit a WCS and move the target RA/Dec onto the requested pixel
    Wcs,
    /// Move the brightest object onto the requested pixel
    Brightest,
}

/// Proper motion of a moving target
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MovingTarget {
    /// RA rate in radians per second
    pub ra_rate: f64,
    /// Dec rate in radians per second
    pub dec_rate: f64,
    /// Time the rates (and the supplied RA/Dec) were calculated for
    pub rate_epoch: Timestamp,
}

/// Readout window in unbinned pixels, inclusive
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Window {
    pub x_start: u32,
    pub y_start: u32,
    pub x_end: u32,
    pub y_end: u32,
}

impl Window {
    pub fn width(&self) -> u32 {
        self.x_end.saturating_sub(self.x_start) + 1
    }

    pub fn height(&self) -> u32 {
        self.y_end.saturating_sub(self.y_start) + 1
    }
}

/// Detector readout configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DetectorSetup {
    pub bin_x: u32,
    pub bin_y: u32,
    #[serde(default)]
    pub window: Option<Window>,
}

impl Default for DetectorSetup {
    fn default() -> Self {
        Self {
            bin_x: 1,
            bin_y: 1,
            window: None,
        }
    }
}

/// Position of one ND filter slide
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SlidePosition {
    In,
    Out,
}

impl SlidePosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlidePosition::In => "in",
            SlidePosition::Out => "out",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "in" => Some(SlidePosition::In),
            "out" => Some(SlidePosition::Out),
            _ => None,
        }
    }
}

/// Level of a REBOOT command
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RebootLevel {
    /// Reset the CCD controller, keep the server running
    Redatum,
    /// Restart the server process
    Software,
    /// Reboot the instrument computer
    Hardware,
    /// Power off the instrument computer
    PowerOff,
}

/// World coordinate system solution for a reduced frame (TAN projection)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct WcsSolution {
    /// Reference sky position (RA, Dec) in degrees
    pub crval: [f64; 2],
    /// Reference pixel (x, y), 1-based as in FITS
    pub crpix: [f64; 2],
    /// Degrees per pixel: `[[CD1_1, CD1_2], [CD2_1, CD2_2]]`
    pub cd: [[f64; 2]; 2],
}

/// Result of a DpRt expose-reduce
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReductionResult {
    pub reduced_filename: String,
    /// Brightest object pixel (x, y), binned
    pub brightest_pixel: (f64, f64),
    pub seeing: f64,
    pub counts: f64,
    pub photometricity: f64,
    pub sky_brightness: f64,
    pub saturation: bool,
    /// Present when a WCS fit was requested and succeeded
    #[serde(default)]
    pub wcs: Option<WcsSolution>,
}

/// Result of a DpRt calibrate-reduce
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationResult {
    pub reduced_filename: String,
    pub mean_counts: f64,
    pub peak_counts: f64,
}

/// Snapshot of the server status returned by GET_STATUS
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatusReport {
    pub timestamp: Option<Timestamp>,
    pub current_command: Option<String>,
    pub exposure_count: u32,
    pub exposure_number: u32,
    pub exposure_length_ms: u64,
    pub exposure_start: Option<Timestamp>,
    pub config_id: u32,
    pub config_name: Option<String>,
    pub filter: Option<String>,
    pub detector: Option<DetectorSetup>,
    pub pause_times: Vec<Timestamp>,
    pub resume_times: Vec<Timestamp>,
}
