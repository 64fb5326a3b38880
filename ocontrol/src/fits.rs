//! FITS filename generation
//!
//! Frames are named `<inst>_<type>_<yyyymmdd>_<run>_<exposure>_<window>_<pipeline>.fits`.
//! The date is the night date, which rolls over at midday UTC. Run numbers
//! restart at 1 on each new night.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Timelike, Utc};

use crate::config::constants::GLANCE_FILENAME;

/// Exposure type code in a FITS filename
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureType {
    Bias,
    Dark,
    Exposure,
    Acquire,
}

impl ExposureType {
    pub fn code(&self) -> char {
        match self {
            ExposureType::Bias => 'b',
            ExposureType::Dark => 'd',
            ExposureType::Exposure => 'e',
            ExposureType::Acquire => 'q',
        }
    }
}

/// Night date of an observation time
pub fn night_date(now: DateTime<Utc>) -> NaiveDate {
    let date = now.date_naive();
    if now.hour() < 12 {
        date - ChronoDuration::days(1)
    } else {
        date
    }
}

#[derive(Debug)]
struct RunCounter {
    night: Option<NaiveDate>,
    run_number: u32,
}

/// Generator of FITS filenames
#[derive(Debug)]
pub struct FitsFilename {
    data_dir: PathBuf,
    instrument_code: String,
    counter: Mutex<RunCounter>,
}

/// Filenames of the frames of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    prefix: PathBuf,
    pub run_number: u32,
}

impl Run {
    /// Raw filename of exposure `exposure_number` (1-based) in window 1
    pub fn frame(&self, exposure_number: u32) -> String {
        format!("{}_{}_1_0.fits", self.prefix.display(), exposure_number)
    }
}

impl FitsFilename {
    pub fn new(data_dir: impl AsRef<Path>, instrument_code: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            instrument_code: instrument_code.into(),
            counter: Mutex::new(RunCounter { night: None, run_number: 0 }),
        }
    }

    /// Start a new run of `exposure_type` frames
    pub fn start_run(&self, exposure_type: ExposureType, now: DateTime<Utc>) -> Run {
        let night = night_date(now);
        let mut counter = self.counter.lock().unwrap_or_else(|e| e.into_inner());
        if counter.night != Some(night) {
            counter.night = Some(night);
            counter.run_number = 0;
        }
        counter.run_number += 1;

        let stem = format!(
            "{}_{}_{}_{}",
            self.instrument_code,
            exposure_type.code(),
            night.format("%Y%m%d"),
            counter.run_number
        );
        Run {
            prefix: self.data_dir.join(stem),
            run_number: counter.run_number,
        }
    }

    /// Scratch file overwritten by every GLANCE
    pub fn glance(&self) -> String {
        self.data_dir.join(GLANCE_FILENAME).display().to_string()
    }
}
