//! Pipeline configuration: typed sections plus a layered loader.

pub mod loader;
pub mod types;

pub use loader::ConfigLoader;
pub use types::{
    CorrelationConfig, EnsembleConfig, HybridConfig, IsolationForestConfig, LoggingConfig,
    PipelineConfig, ProductionConfig, SeasonalityConfig, SlaConfig, TracingConfig,
};
