//! 分散トレーシング最適化
//!
//! スパンを取り込み、操作ごとのレイテンシ分布を追跡し、
//! トレース単位のサンプリング判定と根本原因分析を行います。

use super::sampling::{Sampler, SamplingContext, SamplingStrategy};
use super::span::{RootCause, Span, SpanStatus, Trace};
use crate::config::types::TracingConfig;
use crate::error::{Error, Result};
use crate::monitoring::metrics::{percentile, MetricStats};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use tracing::{debug, info};

/// P95 を信頼するのに必要な最小サンプル数
const MIN_LATENCY_SAMPLES: usize = 10;

/// トレース分析結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceAnalysis {
    pub trace_id: String,
    pub span_count: usize,
    pub service_count: usize,
    pub duration_ms: Option<f64>,
    pub error_count: usize,
    pub sampled: bool,
    pub root_cause: Option<RootCause>,
}

/// 操作ごとのレイテンシ統計
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationReport {
    pub count: usize,
    pub error_count: usize,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

/// パフォーマンスレポート
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub total_spans: usize,
    pub total_traces: usize,
    pub stored_traces: usize,
    pub sampled_traces: usize,
    pub error_spans: usize,
    pub sampling_strategy: String,
    pub services: Vec<String>,
    pub operations: BTreeMap<String, OperationReport>,
    pub timestamp: DateTime<Utc>,
}

struct TraceRecord {
    trace: Trace,
    /// 一度 true になったら変わらない
    sampled: Option<bool>,
}

#[derive(Default)]
struct TraceStore {
    traces: HashMap<String, TraceRecord>,
    /// 挿入順（古い順）
    order: VecDeque<String>,
}

struct OperationStats {
    latencies: VecDeque<f64>,
    count: usize,
    error_count: usize,
}

#[derive(Default)]
struct Counters {
    total_spans: usize,
    total_traces: usize,
    sampled_traces: usize,
    error_spans: usize,
    services: BTreeSet<String>,
}

/// トレーシング最適化器
pub struct TracingOptimizer {
    config: TracingConfig,
    sampler: Sampler,
    store: RwLock<TraceStore>,
    operations: RwLock<HashMap<String, OperationStats>>,
    counters: Mutex<Counters>,
}

impl TracingOptimizer {
    pub fn new(config: TracingConfig) -> Self {
        info!(
            "Tracing optimizer initialized with {} sampling",
            config.sampling.name()
        );
        Self {
            sampler: Sampler::new(config.sampling, config.seed),
            config,
            store: RwLock::new(TraceStore::default()),
            operations: RwLock::new(HashMap::new()),
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn sampling_strategy(&self) -> SamplingStrategy {
        self.sampler.strategy()
    }

    /// スパンを取り込む
    pub fn process_span(&self, span: Span) -> Result<()> {
        span.validate()?;

        {
            let mut store = self.store.write();
            if !store.traces.contains_key(&span.trace_id) {
                if store.order.len() >= self.config.max_traces {
                    if let Some(oldest) = store.order.pop_front() {
                        store.traces.remove(&oldest);
                        debug!("Evicted trace {}", oldest);
                    }
                }
                store.order.push_back(span.trace_id.clone());
                store.traces.insert(
                    span.trace_id.clone(),
                    TraceRecord {
                        trace: Trace::new(span.trace_id.clone()),
                        sampled: None,
                    },
                );
                self.counters.lock().total_traces += 1;
            }

            let record = store
                .traces
                .get_mut(&span.trace_id)
                .ok_or_else(|| Error::UnknownTrace(span.trace_id.clone()))?;
            if record.trace.span(&span.span_id).is_some() {
                return Err(Error::InvalidState(format!(
                    "span {} already recorded in trace {}",
                    span.span_id, span.trace_id
                )));
            }
            record.trace.spans.push(span.clone());
        }

        {
            let mut counters = self.counters.lock();
            counters.total_spans += 1;
            counters.services.insert(span.service_name.clone());
        }

        if span.is_completed() {
            self.on_span_completed(&span);
        }
        Ok(())
    }

    /// 開いているスパンを終了
    pub fn end_span(
        &self,
        trace_id: &str,
        span_id: &str,
        end_time: DateTime<Utc>,
        status: SpanStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let completed = {
            let mut store = self.store.write();
            let record = store
                .traces
                .get_mut(trace_id)
                .ok_or_else(|| Error::UnknownTrace(trace_id.to_string()))?;
            let span = record
                .trace
                .span_mut(span_id)
                .ok_or_else(|| Error::UnknownTrace(format!("{}/{}", trace_id, span_id)))?;
            span.end(end_time, status, error_message)?;
            span.clone()
        };

        self.on_span_completed(&completed);
        Ok(())
    }

    /// 完了スパンのレイテンシ記録とサンプリング判定
    fn on_span_completed(&self, span: &Span) {
        let duration_ms = span.duration_ms().unwrap_or(0.0);

        let operation_p95 = {
            let mut operations = self.operations.write();
            let stats = operations
                .entry(span.operation_name.clone())
                .or_insert_with(|| OperationStats {
                    latencies: VecDeque::with_capacity(self.config.latency_window),
                    count: 0,
                    error_count: 0,
                });

            let p95 = (stats.latencies.len() >= MIN_LATENCY_SAMPLES).then(|| {
                let mut sorted: Vec<f64> = stats.latencies.iter().copied().collect();
                sorted.sort_by(f64::total_cmp);
                percentile(&sorted, 0.95)
            });

            if stats.latencies.len() >= self.config.latency_window {
                stats.latencies.pop_front();
            }
            stats.latencies.push_back(duration_ms);
            stats.count += 1;
            if span.is_error() {
                stats.error_count += 1;
            }
            p95
        };

        if span.is_error() {
            self.counters.lock().error_spans += 1;
        }

        let mut store = self.store.write();
        let Some(record) = store.traces.get_mut(&span.trace_id) else {
            return;
        };

        let decide = match record.sampled {
            None => true,
            Some(false) => span.is_error(),
            Some(true) => false,
        };
        if !decide {
            return;
        }

        let sampled = self.sampler.should_sample(&SamplingContext {
            is_error: span.is_error(),
            duration_ms,
            operation_p95,
            timestamp: span.end_time.unwrap_or(span.start_time),
        });
        record.sampled = Some(sampled);
        if sampled {
            self.counters.lock().sampled_traces += 1;
            debug!(trace_id = %span.trace_id, "Trace sampled");
        }
    }

    /// トレースのコピー
    pub fn get_trace(&self, trace_id: &str) -> Option<Trace> {
        self.store.read().traces.get(trace_id).map(|r| r.trace.clone())
    }

    /// トレースが保持対象か
    pub fn is_sampled(&self, trace_id: &str) -> bool {
        self.store
            .read()
            .traces
            .get(trace_id)
            .and_then(|r| r.sampled)
            .unwrap_or(false)
    }

    /// トレース分析
    pub fn analyze_trace(&self, trace_id: &str) -> Result<TraceAnalysis> {
        let store = self.store.read();
        let record = store
            .traces
            .get(trace_id)
            .ok_or_else(|| Error::UnknownTrace(trace_id.to_string()))?;
        let trace = &record.trace;

        Ok(TraceAnalysis {
            trace_id: trace_id.to_string(),
            span_count: trace.span_count(),
            service_count: trace.service_count(),
            duration_ms: trace.duration_ms(),
            error_count: trace.error_count(),
            sampled: record.sampled.unwrap_or(false),
            root_cause: trace.root_cause(),
        })
    }

    /// エラートレースの根本原因
    pub fn analyze_error_trace(&self, trace_id: &str) -> Result<Option<RootCause>> {
        self.store
            .read()
            .traces
            .get(trace_id)
            .map(|r| r.trace.root_cause())
            .ok_or_else(|| Error::UnknownTrace(trace_id.to_string()))
    }

    /// パフォーマンスレポート
    pub fn get_performance_report(&self) -> PerformanceReport {
        let operations = self
            .operations
            .read()
            .iter()
            .map(|(name, stats)| {
                let summary = MetricStats::from_values(stats.latencies.iter().copied().collect());
                (
                    name.clone(),
                    OperationReport {
                        count: stats.count,
                        error_count: stats.error_count,
                        mean_ms: summary.mean,
                        p50_ms: summary.p50,
                        p95_ms: summary.p95,
                        p99_ms: summary.p99,
                    },
                )
            })
            .collect();

        let stored_traces = self.store.read().traces.len();
        let counters = self.counters.lock();

        PerformanceReport {
            total_spans: counters.total_spans,
            total_traces: counters.total_traces,
            stored_traces,
            sampled_traces: counters.sampled_traces,
            error_spans: counters.error_spans,
            sampling_strategy: self.sampler.strategy().name().to_string(),
            services: counters.services.iter().cloned().collect(),
            operations,
            timestamp: Utc::now(),
        }
    }
}

impl Default for TracingOptimizer {
    fn default() -> Self {
        Self::new(TracingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn always_on() -> TracingOptimizer {
        TracingOptimizer::new(TracingConfig {
            sampling: SamplingStrategy::AlwaysOn,
            ..Default::default()
        })
    }

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
            + Duration::milliseconds(ms)
    }

    #[test]
    fn test_process_and_analyze() {
        let optimizer = always_on();
        optimizer
            .process_span(Span::new("t1", "root", "GET /cart", "frontend", at(0)).finished_at(at(120)))
            .unwrap();
        optimizer
            .process_span(
                Span::new("t1", "db", "SELECT cart", "postgres", at(10))
                    .with_parent("root")
                    .finished_at(at(90)),
            )
            .unwrap();

        let analysis = optimizer.analyze_trace("t1").unwrap();
        assert_eq!(analysis.span_count, 2);
        assert_eq!(analysis.service_count, 2);
        assert_eq!(analysis.duration_ms, Some(120.0));
        assert_eq!(analysis.error_count, 0);
        assert!(analysis.sampled);
        assert!(analysis.root_cause.is_none());
    }

    #[test]
    fn test_unknown_trace() {
        let optimizer = always_on();
        assert!(matches!(
            optimizer.analyze_trace("missing"),
            Err(Error::UnknownTrace(_))
        ));
        assert!(optimizer.analyze_error_trace("missing").is_err());
    }

    #[test]
    fn test_end_span_lifecycle() {
        let optimizer = always_on();
        optimizer
            .process_span(Span::new("t", "s", "op", "svc", at(0)))
            .unwrap();
        assert!(!optimizer.is_sampled("t"));

        optimizer
            .end_span("t", "s", at(30), SpanStatus::Error, Some("boom".into()))
            .unwrap();
        assert!(optimizer.is_sampled("t"));
        assert!(matches!(
            optimizer.end_span("t", "s", at(40), SpanStatus::Ok, None),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            optimizer.end_span("t", "nope", at(40), SpanStatus::Ok, None),
            Err(Error::UnknownTrace(_))
        ));

        let cause = optimizer.analyze_error_trace("t").unwrap().unwrap();
        assert_eq!(cause.service_name, "svc");
        assert_eq!(cause.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_duplicate_span_rejected() {
        let optimizer = always_on();
        let span = Span::new("t", "s", "op", "svc", at(0));
        optimizer.process_span(span.clone()).unwrap();
        assert!(matches!(
            optimizer.process_span(span),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_trace_store_bounded() {
        let optimizer = TracingOptimizer::new(TracingConfig {
            max_traces: 3,
            sampling: SamplingStrategy::AlwaysOn,
            ..Default::default()
        });
        for i in 0..5 {
            optimizer
                .process_span(Span::new(format!("t{}", i), "s", "op", "svc", at(0)).finished_at(at(1)))
                .unwrap();
        }

        assert!(optimizer.get_trace("t0").is_none());
        assert!(optimizer.get_trace("t4").is_some());
        let report = optimizer.get_performance_report();
        assert_eq!(report.total_traces, 5);
        assert_eq!(report.stored_traces, 3);
    }

    #[test]
    fn test_sampling_decision_is_sticky() {
        let optimizer = TracingOptimizer::new(TracingConfig {
            sampling: SamplingStrategy::AlwaysOff,
            ..Default::default()
        });
        optimizer
            .process_span(Span::new("t", "a", "op", "svc", at(0)).finished_at(at(5)))
            .unwrap();
        assert!(!optimizer.is_sampled("t"));

        optimizer
            .process_span(
                Span::new("t", "b", "op", "svc", at(1))
                    .finished_at(at(3))
                    .failed("err"),
            )
            .unwrap();
        assert!(optimizer.is_sampled("t"));

        optimizer
            .process_span(Span::new("t", "c", "op", "svc", at(2)).finished_at(at(4)))
            .unwrap();
        assert!(optimizer.is_sampled("t"));
        assert_eq!(optimizer.get_performance_report().sampled_traces, 1);
    }

    #[test]
    fn test_latency_aware_keeps_slow_trace() {
        let optimizer = TracingOptimizer::new(TracingConfig {
            sampling: SamplingStrategy::LatencyAware { base_rate: 0.0 },
            ..Default::default()
        });
        for i in 0..20 {
            let id = format!("fast-{}", i);
            optimizer
                .process_span(Span::new(id.as_str(), "s", "GET /", "api", at(0)).finished_at(at(10 + i % 3)))
                .unwrap();
            assert!(!optimizer.is_sampled(&id));
        }

        optimizer
            .process_span(Span::new("slow", "s", "GET /", "api", at(0)).finished_at(at(500)))
            .unwrap();
        assert!(optimizer.is_sampled("slow"));
    }

    #[test]
    fn test_performance_report() {
        let optimizer = always_on();
        for i in 0..10 {
            let span = Span::new(format!("t{}", i), "s", "charge", "payments", at(0))
                .finished_at(at(10 * (i + 1)));
            let span = if i == 9 { span.failed("declined") } else { span };
            optimizer.process_span(span).unwrap();
        }

        let report = optimizer.get_performance_report();
        assert_eq!(report.total_spans, 10);
        assert_eq!(report.error_spans, 1);
        assert_eq!(report.services, vec!["payments".to_string()]);

        let charge = &report.operations["charge"];
        assert_eq!(charge.count, 10);
        assert_eq!(charge.error_count, 1);
        assert!((charge.mean_ms - 55.0).abs() < 1e-9);
        assert_eq!(charge.p99_ms, 100.0);
    }
}
