use crate::analytics::anomaly::hybrid::DetectionMode;
use crate::analytics::anomaly::production::SeverityPolicy;
use crate::analytics::anomaly::voting::{default_weights, VotingStrategy};
use crate::error::{Error, Result};
use crate::logging::LogRotation;
use crate::monitoring::tracing_optimizer::SamplingStrategy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Main pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Ensemble detector settings
    pub ensemble: EnsembleConfig,

    /// Production (adaptive threshold) detector settings
    pub production: ProductionConfig,

    /// Hybrid combiner settings
    pub hybrid: HybridConfig,

    /// SLA compliance settings
    pub sla: SlaConfig,

    /// Tracing optimizer settings
    pub tracing: TracingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl PipelineConfig {
    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.ensemble.validate()?;
        self.production.validate()?;
        self.hybrid.validate()?;
        self.sla.validate()?;
        self.tracing.validate()?;
        self.logging.validate()
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidConfiguration(message.into())
}

/// Ensemble detector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Vote aggregation strategy
    pub voting_strategy: VotingStrategy,

    /// Per-algorithm weights for WEIGHTED voting
    pub weights: HashMap<String, f64>,

    /// Rolling history kept per metric
    pub history_capacity: usize,

    /// Samples required before the first fit
    pub min_training_samples: usize,

    /// New samples between refits after the first fit
    pub refit_interval: usize,

    /// Isolation forest parameters
    pub isolation_forest: IsolationForestConfig,

    /// LOF neighbour count
    pub lof_neighbors: usize,

    /// IQR fence multiplier
    pub iqr_multiplier: f64,

    /// Moving-average window length
    pub moving_average_window: usize,

    /// Moving-average threshold in standard deviations
    pub moving_average_threshold: f64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            voting_strategy: VotingStrategy::Weighted,
            weights: default_weights(),
            history_capacity: 1000,
            min_training_samples: 20,
            refit_interval: 100,
            isolation_forest: IsolationForestConfig::default(),
            lof_neighbors: 5,
            iqr_multiplier: 1.5,
            moving_average_window: 10,
            moving_average_threshold: 3.0,
        }
    }
}

impl EnsembleConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_training_samples == 0 {
            return Err(invalid("ensemble.min_training_samples must be at least 1"));
        }
        if self.history_capacity < self.min_training_samples {
            return Err(invalid(
                "ensemble.history_capacity must be >= ensemble.min_training_samples",
            ));
        }
        if self.refit_interval == 0 {
            return Err(invalid("ensemble.refit_interval must be at least 1"));
        }
        if let Some((name, weight)) = self
            .weights
            .iter()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(invalid(format!(
                "ensemble.weights.{} must be a non-negative number, got {}",
                name, weight
            )));
        }
        if self.lof_neighbors == 0 {
            return Err(invalid("ensemble.lof_neighbors must be at least 1"));
        }
        if self.moving_average_window < 2 {
            return Err(invalid("ensemble.moving_average_window must be at least 2"));
        }
        if self.iqr_multiplier <= 0.0 || self.moving_average_threshold <= 0.0 {
            return Err(invalid("ensemble thresholds must be positive"));
        }
        self.isolation_forest.validate()
    }
}

/// Isolation forest configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationForestConfig {
    pub n_trees: usize,
    pub sample_size: usize,
    pub contamination: f64,
    /// Tree construction time budget in milliseconds
    pub build_budget_ms: u64,
    /// Fixed RNG seed for reproducible forests
    pub seed: Option<u64>,
}

impl Default for IsolationForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            sample_size: 256,
            contamination: 0.1,
            build_budget_ms: 50,
            seed: None,
        }
    }
}

impl IsolationForestConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_trees == 0 {
            return Err(invalid("ensemble.isolation_forest.n_trees must be at least 1"));
        }
        if self.sample_size < 2 {
            return Err(invalid(
                "ensemble.isolation_forest.sample_size must be at least 2",
            ));
        }
        if !(0.0..=0.5).contains(&self.contamination) {
            return Err(invalid(
                "ensemble.isolation_forest.contamination must be within [0, 0.5]",
            ));
        }
        Ok(())
    }

    pub fn build_budget(&self) -> Duration {
        Duration::from_millis(self.build_budget_ms)
    }
}

/// Production detector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductionConfig {
    /// Rolling window per (component, metric)
    pub window_size: usize,

    /// Samples required before a baseline exists
    pub min_samples: usize,

    /// Z-score threshold
    pub sensitivity: f64,

    /// Minimum seconds between events for the same key
    pub suppression_window_secs: u64,

    /// Anomaly history ring buffer size
    pub max_history: usize,

    pub seasonality: SeasonalityConfig,

    pub correlation: CorrelationConfig,

    /// Severity bands
    pub severity: SeverityPolicy,
}

impl Default for ProductionConfig {
    fn default() -> Self {
        Self {
            window_size: 300,
            min_samples: 10,
            sensitivity: 2.5,
            suppression_window_secs: 60,
            max_history: 10_000,
            seasonality: SeasonalityConfig::default(),
            correlation: CorrelationConfig::default(),
            severity: SeverityPolicy::default(),
        }
    }
}

impl ProductionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_samples < 2 {
            return Err(invalid("production.min_samples must be at least 2"));
        }
        if self.window_size < self.min_samples {
            return Err(invalid(
                "production.window_size must be >= production.min_samples",
            ));
        }
        if !self.sensitivity.is_finite() || self.sensitivity <= 0.0 {
            return Err(invalid("production.sensitivity must be positive"));
        }
        if self.max_history == 0 {
            return Err(invalid("production.max_history must be at least 1"));
        }
        self.seasonality.validate()?;
        if self.seasonality.enabled && !self.seasonality_reachable() {
            tracing::warn!(
                window_size = self.window_size,
                required = self.seasonality.required_samples(),
                "Seasonality is enabled but production.window_size can never hold enough samples"
            );
        }
        self.correlation.validate()?;
        self.severity.validate()
    }

    /// 季節性除去が有効で、かつウィンドウが必要サンプル数を保持できる
    pub fn seasonality_reachable(&self) -> bool {
        self.seasonality.enabled && self.window_size >= self.seasonality.required_samples()
    }

    pub fn suppression_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.suppression_window_secs as i64)
    }
}

/// Seasonality removal configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeasonalityConfig {
    pub enabled: bool,
    /// Period length in samples
    pub period: usize,
    /// Full periods required before a pattern is trusted
    pub min_periods: usize,
}

impl Default for SeasonalityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period: 3600,
            min_periods: 3,
        }
    }
}

impl SeasonalityConfig {
    pub fn required_samples(&self) -> usize {
        self.period.saturating_mul(self.min_periods)
    }

    pub fn validate(&self) -> Result<()> {
        if self.period < 2 || self.min_periods == 0 {
            return Err(invalid(
                "production.seasonality requires period >= 2 and min_periods >= 1",
            ));
        }
        Ok(())
    }
}

/// Cross-metric correlation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Values kept per metric
    pub window_size: usize,
    /// Minimum |r| for a metric to be reported as correlated
    pub threshold: f64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            window_size: 300,
            threshold: 0.7,
        }
    }
}

impl CorrelationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_size < 3 {
            return Err(invalid("production.correlation.window_size must be at least 3"));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(invalid(
                "production.correlation.threshold must be within [0, 1]",
            ));
        }
        Ok(())
    }
}

/// Hybrid combiner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridConfig {
    pub mode: DetectionMode,
    /// Detection history ring buffer size
    pub max_history: usize,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            mode: DetectionMode::Hybrid,
            max_history: 10_000,
        }
    }
}

impl HybridConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_history == 0 {
            return Err(invalid("hybrid.max_history must be at least 1"));
        }
        Ok(())
    }
}

/// SLA compliance configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaConfig {
    /// Compliance records kept per SLA
    pub max_records_per_sla: usize,
    /// Values kept per registered metric
    pub metric_window: usize,
    /// Overall percentage at or above which status is "compliant"
    pub compliant_threshold: f64,
    /// Overall percentage at or above which status is "at_risk"
    pub at_risk_threshold: f64,
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            max_records_per_sla: 10_000,
            metric_window: 1000,
            compliant_threshold: 99.0,
            at_risk_threshold: 95.0,
        }
    }
}

impl SlaConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_records_per_sla == 0 || self.metric_window == 0 {
            return Err(invalid("sla buffers must hold at least one entry"));
        }
        if self.at_risk_threshold > self.compliant_threshold {
            return Err(invalid(
                "sla.at_risk_threshold must not exceed sla.compliant_threshold",
            ));
        }
        Ok(())
    }
}

/// Tracing optimizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    /// Traces kept before the oldest is evicted
    pub max_traces: usize,
    /// Latency samples kept per operation
    pub latency_window: usize,
    pub sampling: SamplingStrategy,
    /// Seed for sampling decisions
    pub seed: Option<u64>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            max_traces: 10_000,
            latency_window: 1000,
            sampling: SamplingStrategy::LatencyAware { base_rate: 0.1 },
            seed: None,
        }
    }
}

impl TracingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_traces == 0 || self.latency_window == 0 {
            return Err(invalid("tracing buffers must hold at least one entry"));
        }
        self.sampling.validate()
    }
}

/// Logging configuration section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (trace, debug, info, warn, error or an EnvFilter string)
    pub level: String,
    /// Log file directory; defaults to ./logs
    pub directory: Option<PathBuf>,
    pub rotation: LogRotation,
    pub console: bool,
    pub file: bool,
    /// Emit JSON lines instead of the human-readable format
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            rotation: LogRotation::Daily,
            console: true,
            file: false,
            json: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.level.trim().is_empty() {
            return Err(invalid("logging.level must not be empty"));
        }
        Ok(())
    }
}
