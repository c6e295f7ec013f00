//! Analytics Module
//!
//! 異常検知システム

pub mod anomaly;

pub use anomaly::{
    AdaptiveThresholdDetector, AnomalyEvent, AnomalySeverity, DetectionMode, EnsembleDetector,
    HybridCombiner, HybridDetectionResult, Verdict, VotingStrategy,
};
