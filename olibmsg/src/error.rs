//! Error definitions for the O instrument

use thiserror::Error;

/// O instrument error types
#[derive(Error, Debug)]
pub enum OError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Parameter error: {0}")]
    Parameter(String),

    #[error("Hardware error: {0}")]
    Hardware(String),

    #[error("Reduction error: {0}")]
    Reduction(String),

    #[error("WCS error: {0}")]
    Wcs(String),

    #[error("Command aborted")]
    Aborted,

    #[error("Acquisition failed to converge after {attempts} offsets (maximum {maximum})")]
    RetryBudgetExceeded { attempts: u32, maximum: u32 },

    #[error("Timeout")]
    Timeout,

    #[error("No reply from {0}")]
    NoReply(String),

    #[error("Busy: {0} already in progress")]
    Busy(String),

    #[error("Remote command failed ({code}): {message}")]
    Remote { code: i32, message: String },
}

impl OError {
    pub fn parameter(message: impl Into<String>) -> Self {
        OError::Parameter(message.into())
    }

    pub fn hardware(message: impl Into<String>) -> Self {
        OError::Hardware(message.into())
    }

    pub fn reduction(message: impl Into<String>) -> Self {
        OError::Reduction(message.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        OError::Protocol(message.into())
    }

    /// Numeric error code reported in a DONE reply
    pub fn code(&self) -> i32 {
        match self {
            OError::Io(_) => 100,
            OError::Json(_) => 101,
            OError::Config(_) => 102,
            OError::Protocol(_) => 103,
            OError::Timeout => 104,
            OError::NoReply(_) => 105,
            OError::Busy(_) => 106,
            OError::Parameter(_) => 200,
            OError::Hardware(_) => 300,
            OError::Reduction(_) => 400,
            OError::Wcs(_) => 401,
            OError::Aborted => 500,
            OError::RetryBudgetExceeded { .. } => 600,
            OError::Remote { code, .. } => *code,
        }
    }
}

/// Result type alias for O instrument operations
pub type OResult<T> = Result<T, OError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OError::Config("test".to_string());
        assert_eq!(format!("{}", err), "Configuration error: test");
    }

    #[test]
    fn test_retry_budget_display() {
        let err = OError::RetryBudgetExceeded { attempts: 3, maximum: 3 };
        assert_eq!(
            err.to_string(),
            "Acquisition failed to converge after 3 offsets (maximum 3)"
        );
        assert_eq!(err.code(), 600);
    }

    #[test]
    fn test_remote_code_passthrough() {
        let err = OError::Remote { code: 1234, message: "dome closed".to_string() };
        assert_eq!(err.code(), 1234);
    }
}
