//! ローリングウィンドウとベースライン
//!
//! メトリクス名ごとに固定容量のリングバッファを保持し、
//! 十分なサンプルが揃った時点でベースライン統計を再計算します。

use crate::error::{ensure_finite, Result};
use crate::monitoring::metrics::MetricStats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// ベースライン計算に必要な最小サンプル数
pub const DEFAULT_MIN_BASELINE_SAMPLES: usize = 10;

/// 固定容量のメトリクスウィンドウ（FIFO）
#[derive(Debug, Clone)]
pub struct MetricWindow {
    /// メトリクス名
    metric_name: String,
    /// 値バッファ
    values: VecDeque<f64>,
    /// 容量上限
    capacity: usize,
}

impl MetricWindow {
    /// 新しいウィンドウを作成（容量は最低1）
    pub fn new(metric_name: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            metric_name: metric_name.into(),
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// 値を追加（容量超過時は最古の値を削除）
    pub fn push(&mut self, value: f64) -> Result<()> {
        let value = ensure_finite(&self.metric_name, value)?;

        if self.values.len() >= self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);

        Ok(())
    }

    /// 値を一括追加
    pub fn extend(&mut self, values: &[f64]) -> Result<()> {
        for &value in values {
            self.push(value)?;
        }
        Ok(())
    }

    /// 現在の値のコピーを取得（古い順）
    pub fn snapshot(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }

    /// 値を走査
    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.values.iter()
    }

    /// 最新の値
    pub fn last(&self) -> Option<f64> {
        self.values.back().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }
}

/// ベースライン統計（ウィンドウから導出されるスナップショット）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub mean: f64,
    pub stddev: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub min: f64,
    pub max: f64,
    /// 計算に使用したサンプル数
    pub sample_count: usize,
    /// 更新日時
    pub updated_at: DateTime<Utc>,
}

impl Baseline {
    /// 値列からベースラインを計算（サンプル不足なら None）
    pub fn compute(values: &[f64], min_samples: usize) -> Option<Self> {
        if values.is_empty() || values.len() < min_samples {
            return None;
        }

        let stats = MetricStats::from_values(values.to_vec());
        Some(Self::from_stats(&stats))
    }

    /// 統計からベースラインを作成
    pub fn from_stats(stats: &MetricStats) -> Self {
        Self {
            mean: stats.mean,
            stddev: stats.std_dev.max(0.0),
            p50: stats.p50,
            p95: stats.p95,
            p99: stats.p99,
            min: stats.min,
            max: stats.max,
            sample_count: stats.count,
            updated_at: Utc::now(),
        }
    }

    /// 平均からの偏差率（%）
    pub fn deviation_percent(&self, value: f64) -> f64 {
        if self.mean.abs() <= f64::EPSILON {
            return 0.0;
        }
        (value - self.mean) / self.mean.abs() * 100.0
    }
}
