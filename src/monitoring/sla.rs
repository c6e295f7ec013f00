//! SLA コンプライアンス監視
//!
//! 登録済みメトリクスに SLA（閾値＋比較演算子）を定義し、
//! 記録された最新値ごとに準拠・違反を記録します。

use crate::config::types::SlaConfig;
use crate::error::{ensure_finite, Error, Result};
use crate::monitoring::metrics::{MetricKind, MetricStats};
use crate::monitoring::window::MetricWindow;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// 比較演算子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlaOperator {
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<")]
    Less,
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = "==")]
    Equal,
}

impl SlaOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LessOrEqual => "<=",
            Self::GreaterOrEqual => ">=",
            Self::Less => "<",
            Self::Greater => ">",
            Self::Equal => "==",
        }
    }

    /// 観測値が閾値を満たすか
    pub fn is_satisfied(&self, observed: f64, threshold: f64) -> bool {
        match self {
            Self::LessOrEqual => observed <= threshold,
            Self::GreaterOrEqual => observed >= threshold,
            Self::Less => observed < threshold,
            Self::Greater => observed > threshold,
            Self::Equal => (observed - threshold).abs() <= f64::EPSILON * threshold.abs().max(1.0),
        }
    }
}

impl fmt::Display for SlaOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SlaOperator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "<=" => Ok(Self::LessOrEqual),
            ">=" => Ok(Self::GreaterOrEqual),
            "<" => Ok(Self::Less),
            ">" => Ok(Self::Greater),
            "==" => Ok(Self::Equal),
            other => Err(Error::InvalidConfiguration(format!(
                "unsupported SLA operator '{}'",
                other
            ))),
        }
    }
}

/// SLA 定義
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sla {
    pub name: String,
    pub metric_name: String,
    pub threshold: f64,
    pub operator: SlaOperator,
}

/// コンプライアンス記録
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaComplianceRecord {
    pub sla_name: String,
    pub observed_value: f64,
    pub is_compliant: bool,
    pub timestamp: DateTime<Utc>,
}

/// 登録済みメトリクス
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredMetric {
    pub name: String,
    pub kind: MetricKind,
    pub unit: String,
}

/// 全体ステータス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    Compliant,
    AtRisk,
    Violated,
}

impl ComplianceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compliant => "compliant",
            Self::AtRisk => "at_risk",
            Self::Violated => "violated",
        }
    }
}

/// 全体コンプライアンス
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallCompliance {
    pub overall_compliance_percentage: f64,
    pub status: ComplianceStatus,
    pub total_records: usize,
    pub compliant_records: usize,
}

/// SLA ごとのレポート
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaReport {
    pub metric: String,
    pub operator: SlaOperator,
    pub threshold: f64,
    pub current_value: Option<f64>,
    pub compliance_percentage: f64,
    pub violations: usize,
    pub total_checks: usize,
    pub metric_stats: MetricStats,
}

/// コンプライアンスレポート
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub slas: BTreeMap<String, SlaReport>,
    pub overall: OverallCompliance,
    pub timestamp: DateTime<Utc>,
}

struct MetricEntry {
    info: RegisteredMetric,
    window: MetricWindow,
    /// 記録済みサンプル数（最新サンプルの通番）
    sequence: u64,
}

struct SlaEntry {
    sla: Sla,
    records: VecDeque<SlaComplianceRecord>,
    total_checks: usize,
    violations: usize,
    /// 評価済みの最新サンプル通番
    evaluated_through: u64,
}

impl SlaEntry {
    fn compliance_percentage(&self) -> f64 {
        percentage(self.total_checks - self.violations, self.total_checks)
    }
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// SLA コンプライアンス監視
pub struct SlaComplianceMonitor {
    config: SlaConfig,
    metrics: RwLock<HashMap<String, MetricEntry>>,
    slas: RwLock<BTreeMap<String, SlaEntry>>,
}

impl SlaComplianceMonitor {
    pub fn new(config: SlaConfig) -> Self {
        Self {
            config,
            metrics: RwLock::new(HashMap::new()),
            slas: RwLock::new(BTreeMap::new()),
        }
    }

    /// メトリクスを登録（既存なら種類と単位を更新）
    pub fn register_metric(&self, name: &str, kind: MetricKind, unit: &str) {
        let mut metrics = self.metrics.write();
        let info = RegisteredMetric {
            name: name.to_string(),
            kind,
            unit: unit.to_string(),
        };
        match metrics.get_mut(name) {
            Some(entry) => entry.info = info,
            None => {
                metrics.insert(
                    name.to_string(),
                    MetricEntry {
                        info,
                        window: MetricWindow::new(name, self.config.metric_window),
                        sequence: 0,
                    },
                );
                debug!("Registered metric '{}' ({})", name, kind.as_str());
            }
        }
    }

    pub fn registered_metrics(&self) -> Vec<RegisteredMetric> {
        let mut metrics: Vec<RegisteredMetric> =
            self.metrics.read().values().map(|e| e.info.clone()).collect();
        metrics.sort_by(|a, b| a.name.cmp(&b.name));
        metrics
    }

    /// SLA を定義（同名なら置き換え）
    pub fn define_sla(
        &self,
        name: &str,
        metric_name: &str,
        threshold: f64,
        operator: &str,
    ) -> Result<()> {
        let operator: SlaOperator = operator.parse()?;
        if !threshold.is_finite() {
            return Err(Error::InvalidConfiguration(format!(
                "SLA '{}' threshold must be finite",
                name
            )));
        }
        if !self.metrics.read().contains_key(metric_name) {
            return Err(Error::UnknownMetric(metric_name.to_string()));
        }

        let sla = Sla {
            name: name.to_string(),
            metric_name: metric_name.to_string(),
            threshold,
            operator,
        };
        info!(
            "SLA defined: {} ({} {} {})",
            name, metric_name, operator, threshold
        );
        self.slas.write().insert(
            name.to_string(),
            SlaEntry {
                sla,
                records: VecDeque::new(),
                total_checks: 0,
                violations: 0,
                evaluated_through: 0,
            },
        );
        Ok(())
    }

    /// 値を記録し、紐づく全 SLA を評価
    pub fn record_metric(&self, name: &str, value: f64) -> Result<Vec<SlaComplianceRecord>> {
        ensure_finite(name, value)?;
        let sequence = {
            let mut metrics = self.metrics.write();
            let entry = metrics
                .get_mut(name)
                .ok_or_else(|| Error::UnknownMetric(name.to_string()))?;
            entry.window.push(value)?;
            entry.sequence += 1;
            entry.sequence
        };

        let now = Utc::now();
        let mut slas = self.slas.write();
        let records = slas
            .values_mut()
            .filter(|entry| entry.sla.metric_name == name)
            .map(|entry| self.append_record(entry, value, sequence, now))
            .collect();
        Ok(records)
    }

    fn append_record(
        &self,
        entry: &mut SlaEntry,
        observed_value: f64,
        sequence: u64,
        timestamp: DateTime<Utc>,
    ) -> SlaComplianceRecord {
        entry.evaluated_through = sequence;
        let is_compliant = entry.sla.operator.is_satisfied(observed_value, entry.sla.threshold);
        let record = SlaComplianceRecord {
            sla_name: entry.sla.name.clone(),
            observed_value,
            is_compliant,
            timestamp,
        };

        entry.total_checks += 1;
        if !is_compliant {
            entry.violations += 1;
            warn!(
                "SLA violation: {} observed {} (required {} {})",
                entry.sla.name, observed_value, entry.sla.operator, entry.sla.threshold
            );
        }
        if entry.records.len() >= self.config.max_records_per_sla {
            entry.records.pop_front();
        }
        entry.records.push_back(record.clone());
        record
    }

    fn latest_value(&self, metric_name: &str) -> Option<(f64, u64)> {
        let metrics = self.metrics.read();
        let entry = metrics.get(metric_name)?;
        entry.window.last().map(|value| (value, entry.sequence))
    }

    /// 最新値で SLA を評価（サンプルがなければ None）
    ///
    /// 同じサンプルは一度しか記録されないため、呼び出し回数は準拠率に影響しません。
    pub fn check_compliance(&self, sla_name: &str) -> Result<Option<SlaComplianceRecord>> {
        let metric_name = self
            .slas
            .read()
            .get(sla_name)
            .map(|e| e.sla.metric_name.clone())
            .ok_or_else(|| Error::UnknownSla(sla_name.to_string()))?;

        let Some((latest, sequence)) = self.latest_value(&metric_name) else {
            return Ok(None);
        };

        let mut slas = self.slas.write();
        let entry = slas
            .get_mut(sla_name)
            .ok_or_else(|| Error::UnknownSla(sla_name.to_string()))?;
        if entry.evaluated_through >= sequence {
            if let Some(record) = entry.records.back() {
                return Ok(Some(record.clone()));
            }
        }
        Ok(Some(self.append_record(entry, latest, sequence, Utc::now())))
    }

    /// SLA の記録（古い順）
    pub fn get_records(&self, sla_name: &str) -> Result<Vec<SlaComplianceRecord>> {
        self.slas
            .read()
            .get(sla_name)
            .map(|e| e.records.iter().cloned().collect())
            .ok_or_else(|| Error::UnknownSla(sla_name.to_string()))
    }

    fn status_for(&self, percentage: f64) -> ComplianceStatus {
        if percentage >= self.config.compliant_threshold {
            ComplianceStatus::Compliant
        } else if percentage >= self.config.at_risk_threshold {
            ComplianceStatus::AtRisk
        } else {
            ComplianceStatus::Violated
        }
    }

    /// 全体コンプライアンス（記録なしなら 100%）
    pub fn get_overall_compliance(&self) -> OverallCompliance {
        let slas = self.slas.read();
        let total_records: usize = slas.values().map(|e| e.total_checks).sum();
        let violations: usize = slas.values().map(|e| e.violations).sum();
        let compliant_records = total_records - violations;
        let overall = percentage(compliant_records, total_records);

        OverallCompliance {
            overall_compliance_percentage: overall,
            status: self.status_for(overall),
            total_records,
            compliant_records,
        }
    }

    /// SLA ごとの詳細レポート
    pub fn get_compliance_report(&self) -> ComplianceReport {
        let metric_views: HashMap<String, (Option<f64>, MetricStats)> = self
            .metrics
            .read()
            .iter()
            .map(|(name, entry)| {
                (
                    name.clone(),
                    (
                        entry.window.last(),
                        MetricStats::from_values(entry.window.snapshot()),
                    ),
                )
            })
            .collect();

        let slas = self
            .slas
            .read()
            .iter()
            .map(|(name, entry)| {
                let (current_value, metric_stats) = metric_views
                    .get(&entry.sla.metric_name)
                    .cloned()
                    .unwrap_or_default();
                (
                    name.clone(),
                    SlaReport {
                        metric: entry.sla.metric_name.clone(),
                        operator: entry.sla.operator,
                        threshold: entry.sla.threshold,
                        current_value,
                        compliance_percentage: entry.compliance_percentage(),
                        violations: entry.violations,
                        total_checks: entry.total_checks,
                        metric_stats,
                    },
                )
            })
            .collect();

        ComplianceReport {
            slas,
            overall: self.get_overall_compliance(),
            timestamp: Utc::now(),
        }
    }
}

impl Default for SlaComplianceMonitor {
    fn default() -> Self {
        Self::new(SlaConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor_with_latency_sla() -> SlaComplianceMonitor {
        let monitor = SlaComplianceMonitor::default();
        monitor.register_metric("api_latency_ms", MetricKind::Histogram, "ms");
        monitor
            .define_sla("latency_p99", "api_latency_ms", 100.0, "<=")
            .unwrap();
        monitor
    }

    #[test]
    fn test_operator_parsing() {
        assert_eq!("<=".parse::<SlaOperator>().unwrap(), SlaOperator::LessOrEqual);
        assert_eq!(" > ".parse::<SlaOperator>().unwrap(), SlaOperator::Greater);
        assert!(matches!(
            "=>".parse::<SlaOperator>(),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(SlaOperator::Equal.is_satisfied(0.1 + 0.2, 0.3));
        assert!(!SlaOperator::Less.is_satisfied(1.0, 1.0));
    }

    #[test]
    fn test_empty_monitor_is_fully_compliant() {
        let overall = SlaComplianceMonitor::default().get_overall_compliance();
        assert_eq!(overall.overall_compliance_percentage, 100.0);
        assert_eq!(overall.status, ComplianceStatus::Compliant);
        assert_eq!(overall.total_records, 0);
    }

    #[test]
    fn test_one_compliant_one_violating() {
        let monitor = monitor_with_latency_sla();
        let first = monitor.record_metric("api_latency_ms", 50.0).unwrap();
        assert!(first[0].is_compliant);
        let second = monitor.record_metric("api_latency_ms", 150.0).unwrap();
        assert!(!second[0].is_compliant);

        let overall = monitor.get_overall_compliance();
        assert_eq!(overall.overall_compliance_percentage, 50.0);
        assert_eq!(overall.total_records, 2);
        assert_eq!(overall.compliant_records, 1);
        assert_eq!(overall.status, ComplianceStatus::Violated);
    }

    #[test]
    fn test_define_sla_requires_registered_metric() {
        let monitor = SlaComplianceMonitor::default();
        assert!(matches!(
            monitor.define_sla("x", "missing", 1.0, "<"),
            Err(Error::UnknownMetric(_))
        ));
        monitor.register_metric("m", MetricKind::Gauge, "%");
        assert!(monitor.define_sla("x", "m", 1.0, "~").is_err());
        assert!(monitor.define_sla("x", "m", f64::NAN, "<").is_err());
    }

    #[test]
    fn test_record_unknown_or_invalid() {
        let monitor = monitor_with_latency_sla();
        assert!(matches!(
            monitor.record_metric("nope", 1.0),
            Err(Error::UnknownMetric(_))
        ));
        assert!(matches!(
            monitor.record_metric("api_latency_ms", f64::INFINITY),
            Err(Error::InvalidSample { .. })
        ));
    }

    #[test]
    fn test_check_compliance_uses_latest_value() {
        let monitor = monitor_with_latency_sla();
        assert!(monitor.check_compliance("latency_p99").unwrap().is_none());
        assert!(matches!(
            monitor.check_compliance("unknown"),
            Err(Error::UnknownSla(_))
        ));

        monitor.record_metric("api_latency_ms", 500.0).unwrap();
        monitor.record_metric("api_latency_ms", 80.0).unwrap();
        let record = monitor.check_compliance("latency_p99").unwrap().unwrap();
        assert_eq!(record.observed_value, 80.0);
        assert!(record.is_compliant);
        assert_eq!(monitor.get_records("latency_p99").unwrap().len(), 2);
    }

    #[test]
    fn test_repeated_checks_do_not_move_compliance() {
        let monitor = monitor_with_latency_sla();
        monitor.record_metric("api_latency_ms", 150.0).unwrap();
        monitor.record_metric("api_latency_ms", 350.0).unwrap();
        let before = monitor.get_overall_compliance().overall_compliance_percentage;

        for _ in 0..5 {
            let record = monitor.check_compliance("latency_p99").unwrap().unwrap();
            assert_eq!(record.observed_value, 350.0);
        }

        assert_eq!(
            monitor.get_overall_compliance().overall_compliance_percentage,
            before
        );
        assert_eq!(monitor.get_records("latency_p99").unwrap().len(), 2);
    }

    #[test]
    fn test_check_compliance_evaluates_samples_recorded_before_definition() {
        let monitor = SlaComplianceMonitor::default();
        monitor.register_metric("errors", MetricKind::Gauge, "count");
        monitor.record_metric("errors", 3.0).unwrap();
        monitor.define_sla("error_budget", "errors", 5.0, "<").unwrap();
        assert!(monitor.get_records("error_budget").unwrap().is_empty());

        let record = monitor.check_compliance("error_budget").unwrap().unwrap();
        assert!(record.is_compliant);
        monitor.check_compliance("error_budget").unwrap();
        assert_eq!(monitor.get_records("error_budget").unwrap().len(), 1);
    }

    #[test]
    fn test_status_bands() {
        let monitor = monitor_with_latency_sla();
        for _ in 0..96 {
            monitor.record_metric("api_latency_ms", 10.0).unwrap();
        }
        for _ in 0..4 {
            monitor.record_metric("api_latency_ms", 1000.0).unwrap();
        }
        let overall = monitor.get_overall_compliance();
        assert_eq!(overall.overall_compliance_percentage, 96.0);
        assert_eq!(overall.status, ComplianceStatus::AtRisk);
    }

    #[test]
    fn test_records_bounded_and_report() {
        let monitor = SlaComplianceMonitor::new(SlaConfig {
            max_records_per_sla: 5,
            ..Default::default()
        });
        monitor.register_metric("availability", MetricKind::Gauge, "%");
        monitor
            .define_sla("uptime", "availability", 99.9, ">=")
            .unwrap();
        for i in 0..20 {
            monitor
                .record_metric("availability", if i % 10 == 0 { 95.0 } else { 100.0 })
                .unwrap();
        }

        assert_eq!(monitor.get_records("uptime").unwrap().len(), 5);

        let report = monitor.get_compliance_report();
        let uptime = &report.slas["uptime"];
        assert_eq!(uptime.total_checks, 20);
        assert_eq!(uptime.violations, 2);
        assert_eq!(uptime.compliance_percentage, 90.0);
        assert_eq!(uptime.current_value, Some(100.0));
        assert_eq!(uptime.metric_stats.count, 20);
        assert_eq!(report.overall.total_records, 20);
    }
}
