//! メトリクス間相関分析

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// ピアソン相関係数（定数系列など計算不能なら NaN）
pub fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return f64::NAN;
    }
    let xs = &xs[xs.len() - n..];
    let ys = &ys[ys.len() - n..];

    let mean_x = xs.iter().sum::<f64>() / n as f64;
    let mean_y = ys.iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let denom = (var_x * var_y).sqrt();
    if denom <= f64::EPSILON {
        return f64::NAN;
    }
    (cov / denom).clamp(-1.0, 1.0)
}

/// メトリクスペアの相関
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricCorrelation {
    pub metric_a: String,
    pub metric_b: String,
    pub coefficient: f64,
    /// 計算に使った末尾サンプル数
    pub samples: usize,
}

/// 相関分析器
///
/// メトリクスごとにローリングウィンドウを保持し、ペアごとに
/// 末尾を揃えた区間でピアソン相関を計算します。
#[derive(Debug)]
pub struct CorrelationAnalyzer {
    window_size: usize,
    threshold: f64,
    series: RwLock<BTreeMap<String, VecDeque<f64>>>,
}

impl CorrelationAnalyzer {
    /// 相関計算に必要な最小サンプル数
    pub const MIN_SAMPLES: usize = 3;

    pub fn new(window_size: usize, threshold: f64) -> Self {
        Self {
            window_size: window_size.max(Self::MIN_SAMPLES),
            threshold,
            series: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// 値を記録
    pub fn record(&self, metric: &str, value: f64) {
        let mut series = self.series.write();
        let window = series
            .entry(metric.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.window_size));
        if window.len() >= self.window_size {
            window.pop_front();
        }
        window.push_back(value);
    }

    fn correlate(a: &VecDeque<f64>, b: &VecDeque<f64>) -> Option<(f64, usize)> {
        let n = a.len().min(b.len());
        if n < Self::MIN_SAMPLES {
            return None;
        }
        let xs: Vec<f64> = a.iter().skip(a.len() - n).copied().collect();
        let ys: Vec<f64> = b.iter().skip(b.len() - n).copied().collect();
        let r = pearson(&xs, &ys);
        (!r.is_nan()).then_some((r, n))
    }

    /// 2メトリクス間の相関（計算不能なら None）
    pub fn correlation(&self, metric_a: &str, metric_b: &str) -> Option<f64> {
        let series = self.series.read();
        Self::correlate(series.get(metric_a)?, series.get(metric_b)?).map(|(r, _)| r)
    }

    /// 全ペアの相関（NaN は除外）
    pub fn correlations(&self) -> Vec<MetricCorrelation> {
        let series = self.series.read();
        let names: Vec<&String> = series.keys().collect();

        let mut result = Vec::new();
        for (i, a) in names.iter().enumerate() {
            for b in &names[i + 1..] {
                if let Some((coefficient, samples)) = Self::correlate(&series[*a], &series[*b]) {
                    result.push(MetricCorrelation {
                        metric_a: (*a).clone(),
                        metric_b: (*b).clone(),
                        coefficient,
                        samples,
                    });
                }
            }
        }
        result
    }

    /// 閾値以上に相関しているメトリクス
    pub fn correlated_with(&self, metric: &str) -> Vec<String> {
        let series = self.series.read();
        let Some(target) = series.get(metric) else {
            return Vec::new();
        };

        series
            .iter()
            .filter(|(name, _)| name.as_str() != metric)
            .filter_map(|(name, values)| {
                Self::correlate(target, values)
                    .filter(|(r, _)| r.abs() >= self.threshold)
                    .map(|_| name.clone())
            })
            .collect()
    }

    pub fn metric_count(&self) -> usize {
        self.series.read().len()
    }
}

impl Default for CorrelationAnalyzer {
    fn default() -> Self {
        Self::new(300, 0.7)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pearson() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        assert!((pearson(&xs, &[2.0, 4.0, 6.0, 8.0]) - 1.0).abs() < 1e-12);
        assert!((pearson(&xs, &[8.0, 6.0, 4.0, 2.0]) + 1.0).abs() < 1e-12);
        assert!(pearson(&xs, &[5.0; 4]).is_nan());
    }

    #[test]
    fn test_constant_series_dropped() {
        let analyzer = CorrelationAnalyzer::new(100, 0.7);
        for i in 0..20 {
            analyzer.record("cpu", i as f64);
            analyzer.record("memory", i as f64 * 2.0 + 1.0);
            analyzer.record("flat", 1.0);
        }

        let pairs = analyzer.correlations();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].metric_a, "cpu");
        assert_eq!(pairs[0].metric_b, "memory");
        assert!(analyzer.correlation("cpu", "flat").is_none());
        assert_eq!(analyzer.correlated_with("cpu"), vec!["memory".to_string()]);
    }

    #[test]
    fn test_aligned_tail() {
        let analyzer = CorrelationAnalyzer::new(100, 0.5);
        for v in [100.0, -50.0, 7.0] {
            analyzer.record("a", v);
        }
        for i in 0..5 {
            analyzer.record("a", i as f64);
            analyzer.record("b", i as f64);
        }
        let r = analyzer.correlation("a", "b").unwrap();
        assert!((r - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_window_bounded() {
        let analyzer = CorrelationAnalyzer::new(5, 0.5);
        for i in 0..50 {
            analyzer.record("a", i as f64);
        }
        assert_eq!(analyzer.series.read()["a"].len(), 5);
    }
}
