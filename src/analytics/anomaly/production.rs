//! Production Anomaly Detector
//!
//! (component, metric) ごとのベースラインに対する適応閾値（Z-スコア）で異常を検知し、
//! 重大度を分類したイベントを抑制ウィンドウ付きで発行します。

use super::correlation::{CorrelationAnalyzer, MetricCorrelation};
use super::detector::{ratio_confidence, ZScoreDetector};
use super::seasonality::SeasonalityDetector;
use super::types::{AnomalySeverity, Verdict};
use crate::config::types::ProductionConfig;
use crate::error::{ensure_finite, Error, Result};
use crate::monitoring::metrics::mean_std;
use crate::monitoring::window::{Baseline, MetricWindow};
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// 重大度の閾値（score = |z| + |偏差%| / 100）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityPolicy {
    pub critical: f64,
    pub high: f64,
    pub medium: f64,
}

impl Default for SeverityPolicy {
    fn default() -> Self {
        Self {
            critical: 5.0,
            high: 3.5,
            medium: 2.5,
        }
    }
}

impl SeverityPolicy {
    /// Z-スコアと偏差率から重大度を分類
    pub fn classify(&self, z_score: f64, deviation_percent: f64) -> AnomalySeverity {
        let score = z_score.abs() + deviation_percent.abs() / 100.0;
        if score > self.critical {
            AnomalySeverity::Critical
        } else if score > self.high {
            AnomalySeverity::High
        } else if score > self.medium {
            AnomalySeverity::Medium
        } else {
            AnomalySeverity::Low
        }
    }

    pub fn validate(&self) -> Result<()> {
        let ordered = self.critical >= self.high && self.high >= self.medium && self.medium >= 0.0;
        if !ordered {
            return Err(Error::InvalidConfiguration(
                "production.severity bands must satisfy critical >= high >= medium >= 0"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// 異常イベント
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub component: String,
    pub metric_name: String,
    pub current_value: f64,
    pub expected_value: f64,
    pub deviation_percent: f64,
    pub z_score: f64,
    pub severity: AnomalySeverity,
    pub confidence: f64,
    pub description: String,
    /// イベント時点で相関閾値を超えていたメトリクス
    pub correlated_metrics: Vec<String>,
}

/// 1サンプルの評価結果
#[derive(Debug, Clone, PartialEq)]
pub struct ProductionOutcome {
    /// ベースラインがなければ NotEvaluated
    pub verdict: Verdict,
    pub z_score: Option<f64>,
    /// 異常時の重大度
    pub severity: Option<AnomalySeverity>,
    /// 発行されたイベント（抑制中なら None）
    pub event: Option<AnomalyEvent>,
    /// 異常だったが抑制ウィンドウ内だった
    pub suppressed: bool,
}

impl ProductionOutcome {
    fn not_evaluated() -> Self {
        Self {
            verdict: Verdict::NotEvaluated,
            z_score: None,
            severity: None,
            event: None,
            suppressed: false,
        }
    }

    /// 統合判定向けの判定（抑制された異常は未発火扱い）
    pub fn effective_verdict(&self) -> Verdict {
        if self.suppressed {
            Verdict::ConfirmedNormal
        } else {
            self.verdict
        }
    }
}

/// 異常サマリー
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalySummary {
    pub total_anomalies: usize,
    pub recent_60min: usize,
    pub by_severity: BTreeMap<AnomalySeverity, usize>,
    pub metrics_tracked: usize,
    pub timestamp: DateTime<Utc>,
}

struct KeyState {
    window: MetricWindow,
    baseline: Option<Baseline>,
    last_event_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct EventLog {
    events: VecDeque<AnomalyEvent>,
    total: usize,
    by_severity: BTreeMap<AnomalySeverity, usize>,
}

/// 評価に使う基準値
struct Reference {
    expected: f64,
    z_score: Option<f64>,
}

type MetricKey = (String, String);

/// 適応閾値異常検知器（本番パス）
pub struct AdaptiveThresholdDetector {
    config: ProductionConfig,
    seasonality: SeasonalityDetector,
    correlation: CorrelationAnalyzer,
    states: RwLock<HashMap<MetricKey, Arc<Mutex<KeyState>>>>,
    log: Mutex<EventLog>,
}

impl AdaptiveThresholdDetector {
    pub fn new(config: ProductionConfig) -> Self {
        let seasonality =
            SeasonalityDetector::new(config.seasonality.period, config.seasonality.min_periods);
        let correlation =
            CorrelationAnalyzer::new(config.correlation.window_size, config.correlation.threshold);
        Self {
            config,
            seasonality,
            correlation,
            states: RwLock::new(HashMap::new()),
            log: Mutex::new(EventLog::default()),
        }
    }

    pub fn config(&self) -> &ProductionConfig {
        &self.config
    }

    fn state_for(&self, component: &str, metric_name: &str) -> Arc<Mutex<KeyState>> {
        let key = (component.to_string(), metric_name.to_string());
        if let Some(state) = self.states.read().get(&key) {
            return Arc::clone(state);
        }
        let mut states = self.states.write();
        Arc::clone(states.entry(key).or_insert_with(|| {
            Arc::new(Mutex::new(KeyState {
                window: MetricWindow::new(metric_name, self.config.window_size),
                baseline: None,
                last_event_at: None,
            }))
        }))
    }

    /// メトリクスを記録し、イベントが発行されれば返す
    pub fn record_metric(
        &self,
        component: &str,
        metric_name: &str,
        value: f64,
    ) -> Result<Option<AnomalyEvent>> {
        self.record_metric_at(component, metric_name, value, Utc::now())
    }

    /// タイムスタンプを指定して記録
    pub fn record_metric_at(
        &self,
        component: &str,
        metric_name: &str,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<AnomalyEvent>> {
        Ok(self.evaluate_at(component, metric_name, value, timestamp)?.event)
    }

    /// 評価の詳細を返す
    pub fn evaluate(&self, component: &str, metric_name: &str, value: f64) -> Result<ProductionOutcome> {
        self.evaluate_at(component, metric_name, value, Utc::now())
    }

    /// タイムスタンプを指定して評価
    ///
    /// 値は追加前のベースラインで評価され、その後ウィンドウに追加されます。
    pub fn evaluate_at(
        &self,
        component: &str,
        metric_name: &str,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<ProductionOutcome> {
        ensure_finite(metric_name, value)?;
        self.correlation.record(metric_name, value);

        let state = self.state_for(component, metric_name);
        let outcome = {
            let mut state = state.lock();

            let reference = state
                .baseline
                .as_ref()
                .map(|baseline| self.reference(&state.window, baseline, value));

            state.window.push(value)?;
            state.baseline = Baseline::compute(&state.window.snapshot(), self.config.min_samples);

            match reference {
                None => ProductionOutcome::not_evaluated(),
                Some(reference) => {
                    self.classify(&mut state, component, metric_name, value, timestamp, reference)
                }
            }
        };

        if let Some(event) = &outcome.event {
            warn!(
                "Anomaly detected: {}.{} = {:.3} (expected {:.3}, z={:.2}, severity {})",
                component,
                metric_name,
                value,
                event.expected_value,
                event.z_score,
                event.severity
            );
            let mut log = self.log.lock();
            if log.events.len() >= self.config.max_history {
                log.events.pop_front();
            }
            log.events.push_back(event.clone());
            log.total += 1;
            *log.by_severity.entry(event.severity).or_insert(0) += 1;
        } else if outcome.suppressed {
            debug!(
                component,
                metric = metric_name,
                "Anomaly suppressed within suppression window"
            );
        }

        Ok(outcome)
    }

    /// 現在のベースライン（季節性があれば除去後）に対する期待値とZ-スコア
    fn reference(&self, window: &MetricWindow, baseline: &Baseline, value: f64) -> Reference {
        if self.config.seasonality.enabled && window.len() >= self.seasonality.required_samples() {
            let values = window.snapshot();
            if let Some(pattern) = self.seasonality.detect_pattern(&values) {
                let residuals = pattern.deseasonalize(&values);
                let (mean, std_dev) = mean_std(&residuals);
                let expected = mean + pattern.seasonal_component(values.len());
                let detector =
                    ZScoreDetector::from_moments(expected, std_dev, self.config.sensitivity);
                return Reference {
                    expected,
                    z_score: detector.z_score(value),
                };
            }
        }

        let detector =
            ZScoreDetector::from_moments(baseline.mean, baseline.stddev, self.config.sensitivity);
        Reference {
            expected: baseline.mean,
            z_score: detector.z_score(value),
        }
    }

    fn classify(
        &self,
        state: &mut KeyState,
        component: &str,
        metric_name: &str,
        value: f64,
        timestamp: DateTime<Utc>,
        reference: Reference,
    ) -> ProductionOutcome {
        let Some(z_score) = reference.z_score else {
            return ProductionOutcome {
                verdict: Verdict::ConfirmedNormal,
                z_score: None,
                severity: None,
                event: None,
                suppressed: false,
            };
        };

        if z_score <= self.config.sensitivity {
            return ProductionOutcome {
                verdict: Verdict::ConfirmedNormal,
                z_score: Some(z_score),
                severity: None,
                event: None,
                suppressed: false,
            };
        }

        let deviation_percent = if reference.expected.abs() > f64::EPSILON {
            (value - reference.expected) / reference.expected.abs() * 100.0
        } else {
            0.0
        };
        let severity = self.config.severity.classify(z_score, deviation_percent);
        let confidence = ratio_confidence(z_score, self.config.sensitivity);

        let suppressed = state
            .last_event_at
            .map(|last| timestamp - last < self.config.suppression_window())
            .unwrap_or(false);

        let event = if suppressed {
            None
        } else {
            state.last_event_at = Some(timestamp);
            Some(AnomalyEvent {
                id: Uuid::new_v4(),
                timestamp,
                component: component.to_string(),
                metric_name: metric_name.to_string(),
                current_value: value,
                expected_value: reference.expected,
                deviation_percent,
                z_score,
                severity,
                confidence,
                description: format!(
                    "{}.{} = {:.3} deviates {:+.1}% from expected {:.3} (z={:.2})",
                    component, metric_name, value, deviation_percent, reference.expected, z_score
                ),
                correlated_metrics: self.correlation.correlated_with(metric_name),
            })
        };

        ProductionOutcome {
            verdict: Verdict::anomalous(confidence),
            z_score: Some(z_score),
            severity: Some(severity),
            event,
            suppressed,
        }
    }

    /// 異常サマリー
    pub fn get_anomaly_summary(&self) -> AnomalySummary {
        let now = Utc::now();
        let cutoff = now - Duration::minutes(60);
        let log = self.log.lock();

        let mut by_severity: BTreeMap<AnomalySeverity, usize> =
            AnomalySeverity::all().into_iter().map(|s| (s, 0)).collect();
        for (severity, count) in &log.by_severity {
            by_severity.insert(*severity, *count);
        }

        AnomalySummary {
            total_anomalies: log.total,
            recent_60min: log.events.iter().filter(|e| e.timestamp >= cutoff).count(),
            by_severity,
            metrics_tracked: self.states.read().len(),
            timestamp: now,
        }
    }

    /// 直近のイベント（新しい順）
    pub fn get_recent_anomalies(&self, limit: usize) -> Vec<AnomalyEvent> {
        self.log.lock().events.iter().rev().take(limit).cloned().collect()
    }

    pub fn get_baseline(&self, component: &str, metric_name: &str) -> Option<Baseline> {
        let key = (component.to_string(), metric_name.to_string());
        let state = self.states.read().get(&key).cloned()?;
        let baseline = state.lock().baseline.clone();
        baseline
    }

    pub fn get_correlations(&self) -> Vec<MetricCorrelation> {
        self.correlation.correlations()
    }
}

impl Default for AdaptiveThresholdDetector {
    fn default() -> Self {
        Self::new(ProductionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::SeasonalityConfig;
    use crate::testing::normal_samples;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_severity_policy() {
        let policy = SeverityPolicy::default();
        assert_eq!(policy.classify(80.0, 400.0), AnomalySeverity::Critical);
        assert_eq!(policy.classify(3.0, 60.0), AnomalySeverity::High);
        assert_eq!(policy.classify(2.6, 10.0), AnomalySeverity::Medium);
        assert_eq!(policy.classify(2.0, 10.0), AnomalySeverity::Low);

        let inverted = SeverityPolicy {
            critical: 1.0,
            high: 2.0,
            medium: 3.0,
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_no_baseline_until_min_samples() {
        let detector = AdaptiveThresholdDetector::default();
        for i in 0..10 {
            let outcome = detector
                .evaluate("api", "latency", 100.0 + i as f64)
                .unwrap();
            assert_eq!(outcome.verdict, Verdict::NotEvaluated);
        }
        assert!(detector.get_baseline("api", "latency").is_some());
        let outcome = detector.evaluate("api", "latency", 104.0).unwrap();
        assert_eq!(outcome.verdict, Verdict::ConfirmedNormal);
    }

    #[test]
    fn test_spike_is_critical() {
        let detector = AdaptiveThresholdDetector::default();
        let start = t0();
        for (i, v) in normal_samples(17, 100.0, 5.0, 100).into_iter().enumerate() {
            detector
                .record_metric_at("api", "response_time", v, start + Duration::seconds(i as i64))
                .unwrap();
        }

        let event = detector
            .record_metric_at("api", "response_time", 500.0, start + Duration::hours(1))
            .unwrap()
            .expect("spike should emit an event");

        assert_eq!(event.severity, AnomalySeverity::Critical);
        assert!(event.z_score > 60.0 && event.z_score < 100.0);
        assert!((event.expected_value - 100.0).abs() < 3.0);
        assert!(event.confidence > 0.9);
    }

    #[test]
    fn test_evaluates_before_push() {
        let detector = AdaptiveThresholdDetector::default();
        for i in 0..20 {
            detector
                .record_metric("svc", "m", if i % 2 == 0 { 9.0 } else { 11.0 })
                .unwrap();
        }
        let outcome = detector.evaluate("svc", "m", 20.0).unwrap();
        // baseline mean 10, std 1 before the spike joins the window
        assert!((outcome.z_score.unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_suppression_window() {
        let detector = AdaptiveThresholdDetector::default();
        let start = t0();
        for i in 0..30 {
            let v = if i % 2 == 0 { 99.0 } else { 101.0 };
            detector
                .record_metric_at("db", "qps", v, start + Duration::seconds(i))
                .unwrap();
        }

        let mut event_times = Vec::new();
        let mut suppressed = 0;
        for i in 0..40 {
            let ts = start + Duration::seconds(30 + i * 10);
            let outcome = detector.evaluate_at("db", "qps", 10_000.0, ts).unwrap();
            if let Some(event) = outcome.event {
                event_times.push(event.timestamp);
            } else if outcome.verdict.is_anomalous() {
                assert!(outcome.suppressed);
                suppressed += 1;
            }
        }

        assert!(!event_times.is_empty());
        assert!(suppressed > 0);
        for pair in event_times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::seconds(60));
        }
    }

    #[test]
    fn test_constant_series_confirmed_normal() {
        let detector = AdaptiveThresholdDetector::default();
        for _ in 0..20 {
            detector.record_metric("c", "flat", 5.0).unwrap();
        }
        let outcome = detector.evaluate("c", "flat", 500.0).unwrap();
        assert_eq!(outcome.verdict, Verdict::ConfirmedNormal);
        assert!(outcome.event.is_none());
    }

    #[test]
    fn test_rejects_non_finite() {
        let detector = AdaptiveThresholdDetector::default();
        assert!(matches!(
            detector.record_metric("c", "m", f64::NAN),
            Err(Error::InvalidSample { .. })
        ));
    }

    #[test]
    fn test_window_bounded() {
        let config = ProductionConfig {
            window_size: 25,
            ..Default::default()
        };
        let detector = AdaptiveThresholdDetector::new(config);
        for i in 0..100 {
            detector.record_metric("c", "m", (i % 10) as f64).unwrap();
        }
        assert_eq!(detector.get_baseline("c", "m").unwrap().sample_count, 25);
    }

    #[test]
    fn test_seasonal_values_not_flagged() {
        let config = ProductionConfig {
            window_size: 120,
            seasonality: SeasonalityConfig {
                enabled: true,
                period: 4,
                min_periods: 3,
            },
            ..Default::default()
        };
        let detector = AdaptiveThresholdDetector::new(config);
        let cycle = [10.0, 50.0, 90.0, 50.0];
        let start = t0();
        let mut noise = normal_samples(5, 0.0, 0.5, 200).into_iter();
        for i in 0..100 {
            let v = cycle[i % 4] + noise.next().unwrap();
            detector
                .record_metric_at("svc", "load", v, start + Duration::seconds(i as i64))
                .unwrap();
        }

        // next phase is 0: a value at the phase mean is normal even though it is far from the overall mean
        let outcome = detector
            .evaluate_at("svc", "load", 10.0, start + Duration::seconds(100))
            .unwrap();
        assert_eq!(outcome.verdict, Verdict::ConfirmedNormal);

        let spike = detector
            .evaluate_at("svc", "load", 90.0, start + Duration::seconds(101))
            .unwrap();
        assert!(spike.verdict.is_anomalous());
    }

    #[test]
    fn test_summary_and_history() {
        let config = ProductionConfig {
            max_history: 2,
            suppression_window_secs: 0,
            ..Default::default()
        };
        let detector = AdaptiveThresholdDetector::new(config);
        let start = Utc::now();
        for i in 0..20 {
            let v = if i % 2 == 0 { 9.0 } else { 11.0 };
            detector
                .record_metric_at("svc", "m", v, start + Duration::seconds(i))
                .unwrap();
        }
        for i in 0..3 {
            let event = detector
                .record_metric_at("svc", "m", 1e6, start + Duration::seconds(20 + i))
                .unwrap();
            assert!(event.is_some());
        }

        let summary = detector.get_anomaly_summary();
        assert_eq!(summary.total_anomalies, 3);
        assert_eq!(summary.metrics_tracked, 1);
        assert_eq!(summary.by_severity.len(), 4);
        assert_eq!(detector.get_recent_anomalies(10).len(), 2);
    }

    #[test]
    fn test_correlated_metrics_reported() {
        let config = ProductionConfig {
            correlation: crate::config::types::CorrelationConfig {
                window_size: 100,
                threshold: 0.9,
            },
            ..Default::default()
        };
        let detector = AdaptiveThresholdDetector::new(config);
        for i in 0..30 {
            let v = 100.0 + (i % 5) as f64;
            detector.record_metric("web", "cpu", v).unwrap();
            detector.record_metric("web", "latency", v * 2.0).unwrap();
        }
        detector.record_metric("web", "cpu", 200.0).unwrap();
        let event = detector
            .record_metric("web", "latency", 400.0)
            .unwrap()
            .unwrap();
        assert_eq!(event.correlated_metrics, vec!["cpu".to_string()]);
        assert!(!detector.get_correlations().is_empty());
    }
}
