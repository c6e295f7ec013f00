//! リアルタイム監視
//!
//! メトリクスウィンドウとベースライン、SLA コンプライアンス監視、
//! 分散トレーシング最適化を提供します。

pub mod metrics;
pub mod sla;
pub mod tracing_optimizer;
pub mod window;

pub use metrics::{MetricKind, MetricSample, MetricStats};
pub use sla::{
    ComplianceReport, ComplianceStatus, OverallCompliance, Sla, SlaComplianceMonitor,
    SlaComplianceRecord, SlaOperator, SlaReport,
};
pub use tracing_optimizer::{
    PerformanceReport, RootCause, SamplingStrategy, Span, SpanStatus, Trace, TraceAnalysis,
    TracingOptimizer,
};
pub use window::{Baseline, MetricWindow};
