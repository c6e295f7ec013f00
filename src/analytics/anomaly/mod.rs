//! Anomaly Detection Module
//!
//! 異常検知システム（アンサンブル・本番パス・ハイブリッド統合）

pub mod correlation;
pub mod detector;
pub mod ensemble;
pub mod hybrid;
pub mod isolation_forest;
pub mod lof;
pub mod production;
pub mod seasonality;
pub mod types;
pub mod voting;

pub use correlation::{pearson, CorrelationAnalyzer, MetricCorrelation};
pub use detector::{AnomalyAlgorithm, IqrDetector, MovingAverageDetector, ZScoreDetector};
pub use ensemble::{EnsembleDetectionResult, EnsembleDetector, EnsembleHealth};
pub use hybrid::{DetectionMode, HybridCombiner, HybridDetectionResult, SystemHealth};
pub use isolation_forest::IsolationForestDetector;
pub use lof::LocalOutlierFactorDetector;
pub use production::{
    AdaptiveThresholdDetector, AnomalyEvent, AnomalySummary, ProductionOutcome, SeverityPolicy,
};
pub use seasonality::{SeasonalPattern, SeasonalityDetector};
pub use types::{AnomalySeverity, DetectionVote, DetectorOutput, Verdict};
pub use voting::{
    AverageConfidenceVoting, ConsensusVoting, MajorityVoting, VoteTally, VotingPolicy,
    VotingStrategy, WeightedVoting,
};
