//! 分散トレーシング最適化
//!
//! スパンの取り込み、サンプリング、根本原因分析を提供します。

pub mod optimizer;
pub mod sampling;
pub mod span;

pub use optimizer::{OperationReport, PerformanceReport, TraceAnalysis, TracingOptimizer};
pub use sampling::{Sampler, SamplingContext, SamplingStrategy};
pub use span::{RootCause, Span, SpanStatus, Trace};
