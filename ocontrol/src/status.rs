//! Live instrument status shared by the command handlers

use std::sync::{Mutex, MutexGuard};

use olibmsg::{CommandType, DetectorSetup, StatusReport, Timestamp};

#[derive(Debug, Default)]
struct StatusData {
    current_command: Option<CommandType>,
    exposure_count: u32,
    exposure_number: u32,
    exposure_length_ms: u64,
    exposure_start: Option<Timestamp>,
    config_id: u32,
    config_name: Option<String>,
    filter: Option<String>,
    detector: Option<DetectorSetup>,
    pause_times: Vec<Timestamp>,
    resume_times: Vec<Timestamp>,
}

/// Instrument status
#[derive(Debug, Default)]
pub struct Status {
    data: Mutex<StatusData>,
}

impl Status {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> MutexGuard<'_, StatusData> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_current_command(&self, cmd_type: Option<CommandType>) {
        self.data().current_command = cmd_type;
    }

    pub fn current_command(&self) -> Option<CommandType> {
        self.data().current_command
    }

    /// Start a run of `count` exposures of `length_ms` each
    pub fn start_exposures(&self, count: u32, length_ms: u64) {
        let mut data = self.data();
        data.exposure_count = count;
        data.exposure_number = 0;
        data.exposure_length_ms = length_ms;
        data.exposure_start = None;
        data.pause_times.clear();
        data.resume_times.clear();
    }

    /// Record the start of exposure `number` (1-based) of the current run
    pub fn exposure_started(&self, number: u32, start: Timestamp) {
        let mut data = self.data();
        data.exposure_number = number;
        data.exposure_start = Some(start);
    }

    pub fn exposure_count(&self) -> u32 {
        self.data().exposure_count
    }

    pub fn exposure_number(&self) -> u32 {
        self.data().exposure_number
    }

    pub fn exposure_length_ms(&self) -> u64 {
        self.data().exposure_length_ms
    }

    pub fn exposure_start(&self) -> Option<Timestamp> {
        self.data().exposure_start
    }

    /// Record a completed SETUP and return the new configuration id
    pub fn apply_config(&self, name: &str, detector: DetectorSetup, filter: &str) -> u32 {
        let mut data = self.data();
        data.config_id += 1;
        data.config_name = Some(name.to_string());
        data.detector = Some(detector);
        data.filter = Some(filter.to_string());
        data.config_id
    }

    pub fn config_id(&self) -> u32 {
        self.data().config_id
    }

    pub fn config_name(&self) -> Option<String> {
        self.data().config_name.clone()
    }

    pub fn filter(&self) -> Option<String> {
        self.data().filter.clone()
    }

    /// Detector setup last applied by SETUP
    pub fn detector(&self) -> Option<DetectorSetup> {
        self.data().detector
    }

    pub fn add_pause_time(&self, time: Timestamp) {
        self.data().pause_times.push(time);
    }

    pub fn add_resume_time(&self, time: Timestamp) {
        self.data().resume_times.push(time);
    }

    /// Total time spent paused during the current exposure, in seconds
    pub fn paused_seconds(&self, now: Timestamp) -> f64 {
        let data = self.data();
        data.pause_times
            .iter()
            .enumerate()
            .map(|(i, pause)| {
                let resume = data.resume_times.get(i).copied().unwrap_or(now);
                resume.seconds_since(pause).max(0.0)
            })
            .sum()
    }

    pub fn report(&self) -> StatusReport {
        let data = self.data();
        StatusReport {
            timestamp: Some(Timestamp::now()),
            current_command: data.current_command.map(|c| c.name().to_string()),
            exposure_count: data.exposure_count,
            exposure_number: data.exposure_number,
            exposure_length_ms: data.exposure_length_ms,
            exposure_start: data.exposure_start,
            config_id: data.config_id,
            config_name: data.config_name.clone(),
            filter: data.filter.clone(),
            detector: data.detector,
            pause_times: data.pause_times.clone(),
            resume_times: data.resume_times.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_id_increments() {
        let status = Status::new();
        assert_eq!(status.config_id(), 0);
        let id = status.apply_config("r-band", DetectorSetup::default(), "SDSS-R");
        assert_eq!(id, 1);
        let id = status.apply_config("g-band", DetectorSetup::default(), "SDSS-G");
        assert_eq!(id, 2);
        assert_eq!(status.config_name().as_deref(), Some("g-band"));
        assert_eq!(status.filter().as_deref(), Some("SDSS-G"));
    }

    #[test]
    fn test_exposure_counters() {
        let status = Status::new();
        status.start_exposures(5, 30_000);
        let start = Timestamp { seconds: 1000, nanoseconds: 0 };
        status.exposure_started(2, start);

        let report = status.report();
        assert_eq!(report.exposure_count, 5);
        assert_eq!(report.exposure_number, 2);
        assert_eq!(report.exposure_length_ms, 30_000);
        assert_eq!(report.exposure_start, Some(start));
    }

    #[test]
    fn test_paused_seconds() {
        let status = Status::new();
        status.add_pause_time(Timestamp { seconds: 100, nanoseconds: 0 });
        status.add_resume_time(Timestamp { seconds: 104, nanoseconds: 0 });
        status.add_pause_time(Timestamp { seconds: 110, nanoseconds: 0 });
        let now = Timestamp { seconds: 111, nanoseconds: 500_000_000 };
        assert!((status.paused_seconds(now) - 5.5).abs() < 1e-6);

        status.start_exposures(1, 1000);
        assert_eq!(status.paused_seconds(now), 0.0);
    }
}
