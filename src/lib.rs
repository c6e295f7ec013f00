//! # observatory-rs
//!
//! Service observability pipeline: hybrid anomaly detection, SLA compliance
//! monitoring and latency-aware trace sampling.
//!
//! Metric samples flow through two detection paths. The ensemble path fits
//! isolation forest, LOF, IQR and moving-average detectors per metric and
//! aggregates their votes; the production path keeps a rolling baseline per
//! component and metric and emits severity-classified events. A
//! [`HybridCombiner`] reconciles both according to a [`DetectionMode`].
//! Components are constructed once through an [`ObservabilityRegistry`].

pub mod analytics;
pub mod config;
pub mod error;
pub mod logging;
pub mod monitoring;
pub mod registry;

pub use analytics::anomaly::{
    AdaptiveThresholdDetector, AnomalyEvent, AnomalySeverity, DetectionMode, EnsembleDetector,
    HybridCombiner, HybridDetectionResult, Verdict, VotingStrategy,
};
pub use config::{ConfigLoader, PipelineConfig};
pub use error::{Error, Result};
pub use monitoring::{SlaComplianceMonitor, TracingOptimizer};
pub use registry::{AllowAll, AllowList, IdentityValidator, ObservabilityRegistry};


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::UnknownSla("latency".to_string());
        assert!(err.to_string().contains("latency"));
    }

    #[test]
    fn test_normal_samples_are_reproducible() {
        let a = testing::normal_samples(7, 10.0, 2.0, 500);
        let b = testing::normal_samples(7, 10.0, 2.0, 500);
        assert_eq!(a, b);

        let mean = a.iter().sum::<f64>() / a.len() as f64;
        assert!((mean - 10.0).abs() < 0.5);
    }
}
