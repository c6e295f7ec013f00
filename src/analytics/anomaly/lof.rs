//! Local Outlier Factor（1次元簡易実装）

use super::detector::{require_samples, AnomalyAlgorithm};
use super::types::DetectorOutput;
use crate::error::{ensure_finite, Error, Result};

/// 到達可能距離の下限（重複値で密度が発散しないように）
const MIN_REACH_DISTANCE: f64 = 1e-10;

#[derive(Debug, Clone)]
struct LofModel {
    /// ソート済み学習データ
    sorted: Vec<f64>,
    /// 各点の k-距離
    k_distance: Vec<f64>,
    /// 各点の局所到達可能密度
    lrd: Vec<f64>,
    /// 学習データの平均 LOF
    mean_lof: f64,
}

/// ソート済み配列から x の k 近傍を探す（`exclude` は自身のインデックス）
fn k_nearest(sorted: &[f64], x: f64, k: usize, exclude: Option<usize>) -> Vec<usize> {
    let split = sorted.partition_point(|v| *v < x);
    let mut left = split.checked_sub(1);
    let mut right = split;
    let mut neighbors = Vec::with_capacity(k);

    while neighbors.len() < k {
        if left == exclude && left.is_some() {
            left = left.and_then(|l| l.checked_sub(1));
            continue;
        }
        if Some(right) == exclude {
            right += 1;
            continue;
        }

        let left_dist = left.map(|l| x - sorted[l]);
        let right_dist = sorted.get(right).map(|r| r - x);

        match (left_dist, right_dist) {
            (Some(ld), Some(rd)) if ld <= rd => {
                neighbors.push(left.unwrap_or_default());
                left = left.and_then(|l| l.checked_sub(1));
            }
            (_, Some(_)) => {
                neighbors.push(right);
                right += 1;
            }
            (Some(_), None) => {
                neighbors.push(left.unwrap_or_default());
                left = left.and_then(|l| l.checked_sub(1));
            }
            (None, None) => break,
        }
    }

    neighbors
}

impl LofModel {
    fn reach_distance(&self, x: f64, neighbor: usize) -> f64 {
        (x - self.sorted[neighbor])
            .abs()
            .max(self.k_distance[neighbor])
            .max(MIN_REACH_DISTANCE)
    }

    /// 近傍集合に対する局所到達可能密度
    fn local_reachability_density(&self, x: f64, neighbors: &[usize]) -> f64 {
        let mean_reach = neighbors
            .iter()
            .map(|&o| self.reach_distance(x, o))
            .sum::<f64>()
            / neighbors.len() as f64;
        1.0 / mean_reach
    }

    fn local_outlier_factor(&self, lrd: f64, neighbors: &[usize]) -> f64 {
        let neighbor_lrd =
            neighbors.iter().map(|&o| self.lrd[o]).sum::<f64>() / neighbors.len() as f64;
        neighbor_lrd / lrd
    }
}

/// LOF 異常検知器
#[derive(Debug, Clone)]
pub struct LocalOutlierFactorDetector {
    /// 近傍数
    k_neighbors: usize,
    /// 平均 LOF に対する倍率の閾値
    threshold_factor: f64,
    model: Option<LofModel>,
}

impl LocalOutlierFactorDetector {
    pub fn new(k_neighbors: usize) -> Self {
        Self {
            k_neighbors: k_neighbors.max(1),
            threshold_factor: 1.5,
            model: None,
        }
    }

    pub fn with_threshold_factor(mut self, factor: f64) -> Self {
        self.threshold_factor = factor.max(1.0 + f64::EPSILON);
        self
    }

    /// 値の LOF スコア。未学習なら None
    pub fn score(&self, value: f64) -> Option<f64> {
        let model = self.model.as_ref()?;
        let neighbors = k_nearest(&model.sorted, value, self.k_neighbors, None);
        let lrd = model.local_reachability_density(value, &neighbors);
        Some(model.local_outlier_factor(lrd, &neighbors))
    }

    /// 学習データの平均 LOF
    pub fn mean_lof(&self) -> Option<f64> {
        self.model.as_ref().map(|m| m.mean_lof)
    }
}

impl Default for LocalOutlierFactorDetector {
    fn default() -> Self {
        Self::new(5)
    }
}

impl AnomalyAlgorithm for LocalOutlierFactorDetector {
    fn name(&self) -> &'static str {
        "lof"
    }

    fn min_samples(&self) -> usize {
        self.k_neighbors + 1
    }

    fn fit(&mut self, history: &[f64]) -> Result<()> {
        require_samples(self.name(), history, self.min_samples())?;

        let mut sorted = history.to_vec();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len();
        let k = self.k_neighbors;

        let neighborhoods: Vec<Vec<usize>> = (0..n)
            .map(|i| k_nearest(&sorted, sorted[i], k, Some(i)))
            .collect();

        let k_distance: Vec<f64> = neighborhoods
            .iter()
            .enumerate()
            .map(|(i, nbrs)| {
                nbrs.iter()
                    .map(|&o| (sorted[i] - sorted[o]).abs())
                    .fold(0.0, f64::max)
            })
            .collect();

        let mut model = LofModel {
            sorted,
            k_distance,
            lrd: Vec::new(),
            mean_lof: 1.0,
        };

        model.lrd = (0..n)
            .map(|i| model.local_reachability_density(model.sorted[i], &neighborhoods[i]))
            .collect();

        let total_lof: f64 = (0..n)
            .map(|i| model.local_outlier_factor(model.lrd[i], &neighborhoods[i]))
            .sum();
        model.mean_lof = (total_lof / n as f64).max(f64::MIN_POSITIVE);

        self.model = Some(model);
        Ok(())
    }

    fn predict(&self, value: f64) -> Result<DetectorOutput> {
        ensure_finite(self.name(), value)?;
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| Error::insufficient(self.name(), self.min_samples(), 0))?;

        let neighbors = k_nearest(&model.sorted, value, self.k_neighbors, None);
        let lrd = model.local_reachability_density(value, &neighbors);
        let lof = model.local_outlier_factor(lrd, &neighbors);

        let ratio = lof / model.mean_lof;
        let is_anomaly = ratio > self.threshold_factor;
        // 正常側の票は重みを持たない
        let confidence = if is_anomaly {
            (ratio - 1.0) / (2.0 * (self.threshold_factor - 1.0))
        } else {
            0.0
        };

        Ok(DetectorOutput::new(is_anomaly, confidence))
    }

    fn is_fitted(&self) -> bool {
        self.model.is_some()
    }
}
