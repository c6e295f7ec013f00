//! Error types for the observability pipeline.

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for detection, compliance and tracing operations
#[derive(Debug, Error)]
pub enum Error {
    /// Not enough samples to fit a detector or compute a baseline
    #[error("Insufficient data for {algorithm}: need {required} samples, have {actual}")]
    InsufficientData {
        algorithm: String,
        required: usize,
        actual: usize,
    },

    /// Non-finite sample rejected at the ingestion boundary
    #[error("Invalid sample for '{metric}': {value}")]
    InvalidSample { metric: String, value: f64 },

    /// Metric was never registered
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    /// SLA was never defined
    #[error("Unknown SLA: {0}")]
    UnknownSla(String),

    /// Trace or span not present in the trace store
    #[error("Unknown trace: {0}")]
    UnknownTrace(String),

    /// Invalid configuration error
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Operation not allowed in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Identity validation rejected the caller
    #[error("Unauthorized source: {0}")]
    Unauthorized(String),

    /// Configuration loading error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for an [`Error::InsufficientData`]
    pub fn insufficient(algorithm: impl Into<String>, required: usize, actual: usize) -> Self {
        Error::InsufficientData {
            algorithm: algorithm.into(),
            required,
            actual,
        }
    }

    /// Whether the error is a recoverable data condition rather than misuse
    pub fn is_data_condition(&self) -> bool {
        matches!(
            self,
            Error::InsufficientData { .. } | Error::InvalidSample { .. }
        )
    }
}

/// Reject NaN and infinite values before they reach a rolling statistic.
pub fn ensure_finite(metric: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(Error::InvalidSample {
            metric: metric.to_string(),
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_data_message() {
        let err = Error::insufficient("iqr", 4, 2);
        assert!(err.to_string().contains("iqr"));
        assert!(err.is_data_condition());
    }

    #[test]
    fn test_ensure_finite() {
        assert_eq!(ensure_finite("cpu", 1.5).unwrap(), 1.5);
        assert!(matches!(
            ensure_finite("cpu", f64::NAN),
            Err(Error::InvalidSample { .. })
        ));
        assert!(ensure_finite("cpu", f64::INFINITY).is_err());
        assert!(!Error::UnknownSla("x".into()).is_data_condition());
    }
}
