//! Isolation Forest（1次元簡易実装）
//!
//! ランダム分割木で値を孤立させるまでの平均パス長をスコアとします。
//! パス長が短いほど孤立しやすい＝異常です。

use super::detector::{require_samples, AnomalyAlgorithm};
use super::types::DetectorOutput;
use crate::error::{ensure_finite, Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// n 個の点での二分探索木の平均パス長 c(n)
pub(crate) fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// 分割木ノード
#[derive(Debug, Clone)]
enum IsolationNode {
    Leaf {
        size: usize,
    },
    Split {
        min: f64,
        max: f64,
        split: f64,
        left: Box<IsolationNode>,
        right: Box<IsolationNode>,
    },
}

impl IsolationNode {
    fn build(values: Vec<f64>, depth: usize, height_limit: usize, rng: &mut StdRng) -> Self {
        if depth >= height_limit || values.len() <= 1 {
            return Self::Leaf { size: values.len() };
        }

        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if max - min <= f64::EPSILON {
            return Self::Leaf { size: values.len() };
        }

        let split = rng.gen_range(min..max);
        let (left, right): (Vec<f64>, Vec<f64>) = values.into_iter().partition(|v| *v < split);

        Self::Split {
            min,
            max,
            split,
            left: Box::new(Self::build(left, depth + 1, height_limit, rng)),
            right: Box::new(Self::build(right, depth + 1, height_limit, rng)),
        }
    }

    fn path_length(&self, value: f64, depth: usize) -> f64 {
        match self {
            Self::Leaf { size } => depth as f64 + average_path_length(*size),
            Self::Split {
                min,
                max,
                split,
                left,
                right,
            } => {
                // ノードの範囲外の値はここで孤立する
                if value < *min || value > *max {
                    return depth as f64 + 1.0;
                }
                if value < *split {
                    left.path_length(value, depth + 1)
                } else {
                    right.path_length(value, depth + 1)
                }
            }
        }
    }
}

/// 学習済みフォレスト
#[derive(Debug, Clone)]
struct Forest {
    trees: Vec<IsolationNode>,
    /// 学習データの平均パス長
    mean_path: f64,
    /// 判定閾値（これより短いパスは異常）
    threshold: f64,
}

impl Forest {
    fn path_length(&self, value: f64) -> f64 {
        let total: f64 = self.trees.iter().map(|t| t.path_length(value, 0)).sum();
        total / self.trees.len() as f64
    }
}

/// Isolation Forest 異常検知器
#[derive(Debug, Clone)]
pub struct IsolationForestDetector {
    /// ランダムツリーの数
    n_trees: usize,
    /// サンプリングサイズ
    sample_size: usize,
    /// 想定異常率
    contamination: f64,
    /// 乱数シード（None ならエントロピーから）
    seed: Option<u64>,
    /// 木構築の時間予算
    build_budget: Duration,
    forest: Option<Forest>,
}

impl IsolationForestDetector {
    pub const MIN_SAMPLES: usize = 10;

    pub fn new(n_trees: usize, contamination: f64) -> Self {
        Self {
            n_trees: n_trees.max(1),
            sample_size: 256,
            contamination: contamination.clamp(0.0, 0.5),
            seed: None,
            build_budget: Duration::from_millis(50),
            forest: None,
        }
    }

    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size.max(2);
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_build_budget(mut self, budget: Duration) -> Self {
        self.build_budget = budget;
        self
    }

    /// 平均パス長（スコア）。未学習なら None
    pub fn score(&self, value: f64) -> Option<f64> {
        self.forest.as_ref().map(|f| f.path_length(value))
    }

    /// 判定閾値。未学習なら None
    pub fn threshold(&self) -> Option<f64> {
        self.forest.as_ref().map(|f| f.threshold)
    }

    /// 構築済みの木の数
    pub fn tree_count(&self) -> usize {
        self.forest.as_ref().map(|f| f.trees.len()).unwrap_or(0)
    }
}

impl Default for IsolationForestDetector {
    fn default() -> Self {
        Self::new(100, 0.1)
    }
}

impl AnomalyAlgorithm for IsolationForestDetector {
    fn name(&self) -> &'static str {
        "isolation_forest"
    }

    fn min_samples(&self) -> usize {
        Self::MIN_SAMPLES
    }

    fn fit(&mut self, history: &[f64]) -> Result<()> {
        require_samples(self.name(), history, Self::MIN_SAMPLES)?;

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let sample_size = self.sample_size.min(history.len());
        let height_limit = (sample_size as f64).log2().ceil().max(1.0) as usize;

        let started = Instant::now();
        let mut trees = Vec::with_capacity(self.n_trees);
        for _ in 0..self.n_trees {
            if !trees.is_empty() && started.elapsed() > self.build_budget {
                warn!(
                    "Isolation forest build budget exhausted after {} of {} trees",
                    trees.len(),
                    self.n_trees
                );
                break;
            }

            let sample: Vec<f64> = rand::seq::index::sample(&mut rng, history.len(), sample_size)
                .into_iter()
                .map(|i| history[i])
                .collect();
            trees.push(IsolationNode::build(sample, 0, height_limit, &mut rng));
        }

        let mut forest = Forest {
            trees,
            mean_path: 0.0,
            threshold: 0.0,
        };
        forest.mean_path =
            history.iter().map(|v| forest.path_length(*v)).sum::<f64>() / history.len() as f64;
        forest.threshold = forest.mean_path * (1.0 - self.contamination);

        debug!(
            trees = forest.trees.len(),
            mean_path = forest.mean_path,
            threshold = forest.threshold,
            "Isolation forest fitted"
        );

        self.forest = Some(forest);
        Ok(())
    }

    fn predict(&self, value: f64) -> Result<DetectorOutput> {
        ensure_finite(self.name(), value)?;
        let forest = self
            .forest
            .as_ref()
            .ok_or_else(|| Error::insufficient(self.name(), Self::MIN_SAMPLES, 0))?;

        let path = forest.path_length(value);
        if path < forest.threshold {
            Ok(DetectorOutput::new(true, (forest.threshold - path) * 2.0))
        } else {
            Ok(DetectorOutput::normal())
        }
    }

    fn is_fitted(&self) -> bool {
        self.forest.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::normal_samples;

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!((average_path_length(20) - 5.1432).abs() < 1e-3);
    }

    #[test]
    fn test_requires_ten_samples() {
        let mut detector = IsolationForestDetector::default();
        assert!(matches!(
            detector.fit(&[1.0; 9]),
            Err(Error::InsufficientData { required: 10, .. })
        ));
        assert!(detector.predict(1.0).is_err());
    }

    #[test]
    fn test_detects_far_outlier() {
        let data = normal_samples(7, 100.0, 5.0, 100);
        let mut detector = IsolationForestDetector::new(50, 0.1).with_seed(Some(42));
        detector.fit(&data).unwrap();

        let outlier = detector.predict(1000.0).unwrap();
        assert!(outlier.is_anomaly);
        assert!(outlier.confidence > 0.9);

        let normal = detector.predict(100.0).unwrap();
        assert!(!normal.is_anomaly);
        assert_eq!(normal.confidence, 0.0);
    }

    #[test]
    fn test_two_cluster_minority_is_isolated() {
        let mut data = vec![100.0; 80];
        data.extend(vec![500.0; 20]);

        let mut detector = IsolationForestDetector::default().with_seed(Some(1));
        detector.fit(&data).unwrap();

        assert!(!detector.predict(100.0).unwrap().is_anomaly);
        let minority = detector.predict(500.0).unwrap();
        assert!(minority.is_anomaly);
        assert_eq!(minority.confidence, 1.0);
    }

    #[test]
    fn test_build_budget_keeps_at_least_one_tree() {
        let data: Vec<f64> = (0..500).map(|i| i as f64).collect();
        let mut detector = IsolationForestDetector::new(1000, 0.1)
            .with_seed(Some(3))
            .with_build_budget(Duration::ZERO);
        detector.fit(&data).unwrap();

        assert!(detector.tree_count() >= 1);
        assert!(detector.tree_count() < 1000);
    }

    #[test]
    fn test_confidence_in_unit_range() {
        let data = normal_samples(11, 0.0, 1.0, 200);
        let mut detector = IsolationForestDetector::new(30, 0.1).with_seed(Some(5));
        detector.fit(&data).unwrap();

        for value in [-1e9, -10.0, -1.0, 0.0, 0.5, 3.0, 1e12] {
            let out = detector.predict(value).unwrap();
            assert!((0.0..=1.0).contains(&out.confidence));
        }
    }
}
