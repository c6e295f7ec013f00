//! メトリクス型定義

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// メトリクスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// 単調増加カウンター
    Counter,
    /// 瞬時値
    Gauge,
    /// 分布（レイテンシなど）
    Histogram,
}

impl MetricKind {
    /// 種類名を取得
    pub fn as_str(&self) -> &str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Histogram => "histogram",
        }
    }
}

/// メトリクスサンプル（記録後は不変）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// メトリクス名
    pub metric_name: String,
    /// 値
    pub value: f64,
    /// タイムスタンプ
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    /// 新しいサンプルを作成
    pub fn new(metric_name: impl Into<String>, value: f64) -> Self {
        Self {
            metric_name: metric_name.into(),
            value,
            timestamp: Utc::now(),
        }
    }

    /// タイムスタンプを指定
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// メトリクス統計
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    /// 最小値
    pub min: f64,
    /// 最大値
    pub max: f64,
    /// 平均値
    pub mean: f64,
    /// 標準偏差（母標準偏差）
    pub std_dev: f64,
    /// パーセンタイル（P50, P95, P99）
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    /// サンプル数
    pub count: usize,
}

impl MetricStats {
    /// 値のリストから統計を計算
    pub fn from_values(mut values: Vec<f64>) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        values.sort_by(f64::total_cmp);

        let count = values.len();
        let (mean, std_dev) = mean_std(&values);

        Self {
            min: values[0],
            max: values[count - 1],
            mean,
            std_dev,
            p50: percentile(&values, 0.5),
            p95: percentile(&values, 0.95),
            p99: percentile(&values, 0.99),
            count,
        }
    }
}

impl Default for MetricStats {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 0.0,
            mean: 0.0,
            std_dev: 0.0,
            p50: 0.0,
            p95: 0.0,
            p99: 0.0,
            count: 0,
        }
    }
}

/// 平均と母標準偏差を計算（空の場合は (0, 0)）
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    (mean, variance.max(0.0).sqrt())
}

/// パーセンタイルを計算（ソート済み、最近傍ランク）
pub fn percentile(sorted_values: &[f64], p: f64) -> f64 {
    if sorted_values.is_empty() {
        return 0.0;
    }

    let index = (p * (sorted_values.len() - 1) as f64).round() as usize;
    sorted_values[index.min(sorted_values.len() - 1)]
}

/// 分位点を線形補間で計算（ソート済み）
pub fn quantile(sorted_values: &[f64], q: f64) -> f64 {
    match sorted_values.len() {
        0 => 0.0,
        1 => sorted_values[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lower = pos.floor() as usize;
            let upper = pos.ceil() as usize;
            let frac = pos - lower as f64;
            sorted_values[lower] + (sorted_values[upper] - sorted_values[lower]) * frac
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_kind_name() {
        assert_eq!(MetricKind::Histogram.as_str(), "histogram");
        assert_eq!(MetricKind::Gauge.as_str(), "gauge");
    }

    #[test]
    fn test_metric_sample_creation() {
        let sample = MetricSample::new("response_time", 42.0);
        assert_eq!(sample.metric_name, "response_time");
        assert_eq!(sample.value, 42.0);
    }

    #[test]
    fn test_metric_stats() {
        let values = vec![5.0, 1.0, 3.0, 2.0, 4.0];
        let stats = MetricStats::from_values(values);

        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 5.0);
        assert_eq!(stats.mean, 3.0);
        assert_eq!(stats.p50, 3.0);
        assert_eq!(stats.count, 5);
        assert!((stats.std_dev - 2.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_empty_stats() {
        let stats = MetricStats::from_values(Vec::new());
        assert_eq!(stats.count, 0);
        assert_eq!(stats.std_dev, 0.0);
    }

    #[test]
    fn test_quantile_interpolation() {
        let sorted: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        assert!((quantile(&sorted, 0.25) - 25.75).abs() < 1e-9);
        assert!((quantile(&sorted, 0.75) - 75.25).abs() < 1e-9);
        assert_eq!(quantile(&[7.0], 0.5), 7.0);
        assert_eq!(quantile(&[], 0.5), 0.0);
    }
}
