//! 季節性パターン検出

use serde::{Deserialize, Serialize};

/// 検出された周期パターン
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonalPattern {
    /// 周期（サンプル数）
    pub period: usize,
    /// 位相ごとの平均
    pub phase_means: Vec<f64>,
    /// 位相平均の分散 / 全体分散（0-1）
    pub strength: f64,
}

impl SeasonalPattern {
    /// 位置 `index` の季節成分
    pub fn seasonal_component(&self, index: usize) -> f64 {
        self.phase_means[index % self.period]
    }

    /// 季節成分を除去
    pub fn deseasonalize(&self, values: &[f64]) -> Vec<f64> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| v - self.seasonal_component(i))
            .collect()
    }
}

/// 季節性検出器
#[derive(Debug, Clone)]
pub struct SeasonalityDetector {
    period: usize,
    min_periods: usize,
}

impl SeasonalityDetector {
    pub fn new(period: usize, min_periods: usize) -> Self {
        Self {
            period: period.max(1),
            min_periods: min_periods.max(1),
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// パターン検出に必要なサンプル数
    pub fn required_samples(&self) -> usize {
        self.period * self.min_periods
    }

    /// 周期パターンを検出（サンプル不足なら None）
    pub fn detect_pattern(&self, values: &[f64]) -> Option<SeasonalPattern> {
        if values.len() < self.required_samples() {
            return None;
        }

        let mut sums = vec![0.0; self.period];
        let mut counts = vec![0usize; self.period];
        for (i, v) in values.iter().enumerate() {
            sums[i % self.period] += v;
            counts[i % self.period] += 1;
        }
        let phase_means: Vec<f64> = sums
            .iter()
            .zip(&counts)
            .map(|(s, c)| s / (*c).max(1) as f64)
            .collect();

        let (mean, std_dev) = crate::monitoring::metrics::mean_std(values);
        let total_var = std_dev * std_dev;
        let phase_var = phase_means.iter().map(|m| (m - mean).powi(2)).sum::<f64>()
            / self.period as f64;
        let strength = if total_var > f64::EPSILON {
            (phase_var / total_var).min(1.0)
        } else {
            0.0
        };

        Some(SeasonalPattern {
            period: self.period,
            phase_means,
            strength,
        })
    }

    /// パターンがあれば除去、なければそのまま返す
    pub fn deseasonalize(&self, values: &[f64]) -> Vec<f64> {
        match self.detect_pattern(values) {
            Some(pattern) => pattern.deseasonalize(values),
            None => values.to_vec(),
        }
    }
}

impl Default for SeasonalityDetector {
    fn default() -> Self {
        Self::new(3600, 3)
    }
}
