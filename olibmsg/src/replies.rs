//! Reply definitions for the O instrument
//!
//! A command is answered by zero or more ACK replies, each carrying the time
//! the sender still expects to need, followed by exactly one DONE reply.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use crate::error::OError;
use crate::types::{CalibrationResult, ReductionResult, RequestId, StatusReport};

/// ACK reply - the command is still running
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AckReply {
    pub id: RequestId,
    /// Estimated time until the next reply, in milliseconds
    pub time_to_complete_ms: u64,
}

impl AckReply {
    pub fn new(id: RequestId, time_to_complete: Duration) -> Self {
        Self {
            id,
            time_to_complete_ms: time_to_complete.as_millis() as u64,
        }
    }

    pub fn time_to_complete(&self) -> Duration {
        Duration::from_millis(self.time_to_complete_ms)
    }
}

/// Result of an ACQUIRE command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AcquireDone {
    /// Number of telescope offsets issued
    pub attempts: u32,
    /// Final cumulative focal plane offset in arcseconds
    pub offset_arcsec: (f64, f64),
    /// Distance from the target pixel on the last frame
    pub distance_arcsec: f64,
    pub last_filename: Option<String>,
}

/// Command specific content of a DONE reply
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub enum DonePayload {
    #[default]
    Empty,
    /// BIAS, DARK, MULTBIAS, MULTDARK
    Calibrate {
        filenames: Vec<String>,
        last: Option<CalibrationResult>,
    },
    /// GLANCE, SAVE
    Expose {
        filename: String,
        reduction: Option<ReductionResult>,
    },
    Acquire(AcquireDone),
    Setup { config_id: u32 },
    Status(StatusReport),
    /// DpRt expose-reduce
    Reduction(ReductionResult),
    /// DpRt calibrate-reduce
    Calibration(CalibrationResult),
}

/// DONE reply - the command has finished
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DoneReply {
    pub id: RequestId,
    pub successful: bool,
    pub error_num: i32,
    pub error_string: String,
    pub payload: DonePayload,
}

impl DoneReply {
    pub fn success(id: RequestId, payload: DonePayload) -> Self {
        Self {
            id,
            successful: true,
            error_num: 0,
            error_string: String::new(),
            payload,
        }
    }

    pub fn failure(id: RequestId, error: &OError) -> Self {
        Self {
            id,
            successful: false,
            error_num: error.code(),
            error_string: error.to_string(),
            payload: DonePayload::Empty,
        }
    }

    /// Convert a failed DONE into an error, passing successful ones through
    pub fn into_result(self) -> Result<DonePayload, OError> {
        if self.successful {
            Ok(self.payload)
        } else {
            Err(OError::Remote {
                code: self.error_num,
                message: self.error_string,
            })
        }
    }
}

/// Union of all reply types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Reply {
    Ack(AckReply),
    Done(DoneReply),
}

impl Reply {
    pub fn id(&self) -> &RequestId {
        match self {
            Reply::Ack(ack) => &ack.id,
            Reply::Done(done) => &done.id,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Reply::Done(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_time_to_complete() {
        let ack = AckReply::new(RequestId::new("1"), Duration::from_secs(12));
        assert_eq!(ack.time_to_complete_ms, 12_000);
        assert_eq!(ack.time_to_complete(), Duration::from_secs(12));
    }

    #[test]
    fn test_failure_carries_code() {
        let done = DoneReply::failure(RequestId::new("2"), &OError::Aborted);
        assert!(!done.successful);
        assert_eq!(done.error_num, 500);
        match done.into_result() {
            Err(OError::Remote { code, message }) => {
                assert_eq!(code, 500);
                assert_eq!(message, "Command aborted");
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_reply_id() {
        let reply = Reply::Done(DoneReply::success(RequestId::new("3"), DonePayload::Empty));
        assert_eq!(reply.id(), &RequestId::new("3"));
        assert!(reply.is_done());
    }
}
