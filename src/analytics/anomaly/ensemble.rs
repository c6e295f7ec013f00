//! Ensemble Anomaly Detector
//!
//! Isolation Forest / LOF / IQR / 移動平均の4アルゴリズムをメトリクスごとに学習し、
//! 投票戦略で最終判定を行います。

use super::detector::{AnomalyAlgorithm, IqrDetector, MovingAverageDetector};
use super::isolation_forest::IsolationForestDetector;
use super::lof::LocalOutlierFactorDetector;
use super::types::{DetectionVote, Verdict};
use super::voting::{VotingPolicy, VotingStrategy};
use crate::config::types::EnsembleConfig;
use crate::error::{ensure_finite, Result};
use crate::monitoring::window::MetricWindow;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 学習済みアルゴリズムの集合（不変・共有）
type DetectorSet = Vec<Box<dyn AnomalyAlgorithm>>;

const INSUFFICIENT_TRAINING_DATA: &str = "insufficient training data";

/// アンサンブル判定結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleDetectionResult {
    pub timestamp: DateTime<Utc>,
    pub metric_name: String,
    pub value: f64,
    pub is_anomaly: bool,
    /// 最終確信度（異常なら平均確信度、正常なら 1 - 平均確信度）
    pub confidence: f64,
    /// アルゴリズム名ごとの票
    pub votes: BTreeMap<String, DetectionVote>,
    pub consensus_level: f64,
    pub reason: String,
}

impl EnsembleDetectionResult {
    fn untrained(metric_name: &str, value: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            metric_name: metric_name.to_string(),
            value,
            is_anomaly: false,
            confidence: 0.0,
            votes: BTreeMap::new(),
            consensus_level: 0.0,
            reason: INSUFFICIENT_TRAINING_DATA.to_string(),
        }
    }

    /// 三状態の判定に変換（票がなければ未評価）
    pub fn verdict(&self) -> Verdict {
        if self.votes.is_empty() {
            Verdict::NotEvaluated
        } else if self.is_anomaly {
            Verdict::anomalous(self.confidence)
        } else {
            Verdict::ConfirmedNormal
        }
    }
}

/// アンサンブル検知器のヘルス情報
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleHealth {
    pub detectors: Vec<String>,
    pub voting_strategy: String,
    pub weights: BTreeMap<String, f64>,
    pub metrics_trained: usize,
    pub timestamp: DateTime<Utc>,
}

/// メトリクスごとの状態
struct MetricState {
    history: MetricWindow,
    fitted: Option<Arc<DetectorSet>>,
    /// 前回学習以降に追加されたサンプル数
    since_fit: usize,
    /// 開始した学習の通番
    generation: u64,
    /// 現在の `fitted` を作った学習の通番
    fitted_generation: u64,
}

impl MetricState {
    fn new(metric_name: &str, capacity: usize) -> Self {
        Self {
            history: MetricWindow::new(metric_name, capacity),
            fitted: None,
            since_fit: 0,
            generation: 0,
            fitted_generation: 0,
        }
    }

    /// 学習の開始を記録し、その通番を返す
    fn begin_fit(&mut self) -> u64 {
        self.since_fit = 0;
        self.generation += 1;
        self.generation
    }

    /// 学習結果を反映（より新しい学習が反映済みなら破棄）
    fn install(&mut self, generation: u64, fitted: Arc<DetectorSet>) -> Option<Arc<DetectorSet>> {
        if generation > self.fitted_generation {
            self.fitted = Some(fitted);
            self.fitted_generation = generation;
        }
        self.fitted.clone()
    }
}

/// アンサンブル異常検知器
pub struct EnsembleDetector {
    config: EnsembleConfig,
    policy: Arc<dyn VotingPolicy>,
    metrics: RwLock<HashMap<String, Arc<Mutex<MetricState>>>>,
}

impl EnsembleDetector {
    /// 設定の投票戦略で作成
    pub fn new(config: EnsembleConfig) -> Self {
        let policy = config.voting_strategy.policy(&config.weights);
        Self::with_policy(config, policy)
    }

    /// 任意の投票ポリシーを注入して作成
    pub fn with_policy(config: EnsembleConfig, policy: Arc<dyn VotingPolicy>) -> Self {
        info!(
            "Ensemble detector initialized with {} voting",
            policy.name()
        );
        Self {
            config,
            policy,
            metrics: RwLock::new(HashMap::new()),
        }
    }

    /// 投票戦略を指定して作成
    pub fn with_strategy(strategy: VotingStrategy) -> Self {
        Self::new(EnsembleConfig {
            voting_strategy: strategy,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    fn state_for(&self, metric_name: &str) -> Arc<Mutex<MetricState>> {
        if let Some(state) = self.metrics.read().get(metric_name) {
            return Arc::clone(state);
        }
        let mut metrics = self.metrics.write();
        Arc::clone(metrics.entry(metric_name.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(MetricState::new(
                metric_name,
                self.config.history_capacity,
            )))
        }))
    }

    /// 未学習のアルゴリズム一式を生成
    fn build_detectors(&self) -> DetectorSet {
        let forest = &self.config.isolation_forest;
        vec![
            Box::new(
                IsolationForestDetector::new(forest.n_trees, forest.contamination)
                    .with_sample_size(forest.sample_size)
                    .with_seed(forest.seed)
                    .with_build_budget(forest.build_budget()),
            ),
            Box::new(LocalOutlierFactorDetector::new(self.config.lof_neighbors)),
            Box::new(IqrDetector::new(self.config.iqr_multiplier)),
            Box::new(MovingAverageDetector::new(
                self.config.moving_average_window,
                self.config.moving_average_threshold,
            )),
        ]
    }

    /// スナップショットで全アルゴリズムを学習（個別の失敗は記録のみ）
    fn fit_detectors(&self, metric_name: &str, data: &[f64]) -> Arc<DetectorSet> {
        let mut detectors = self.build_detectors();
        for detector in detectors.iter_mut() {
            if let Err(e) = detector.fit(data) {
                warn!(
                    "Failed to fit {} for metric '{}': {}",
                    detector.name(),
                    metric_name,
                    e
                );
            }
        }
        debug!(
            metric = metric_name,
            samples = data.len(),
            "Ensemble detectors fitted"
        );
        Arc::new(detectors)
    }

    /// 履歴データで学習
    ///
    /// 最小学習サンプル数に満たない場合はログを出して何もしません（エラーではない）。
    pub fn fit(&self, metric_name: &str, data: &[f64]) -> Result<()> {
        if data.len() < self.config.min_training_samples {
            info!(
                "Not enough training data for '{}' ({} < {}), staying in low-confidence mode",
                metric_name,
                data.len(),
                self.config.min_training_samples
            );
            return Ok(());
        }
        for &value in data {
            ensure_finite(metric_name, value)?;
        }

        let state = self.state_for(metric_name);
        let generation = state.lock().begin_fit();
        let fitted = self.fit_detectors(metric_name, data);

        let mut state = state.lock();
        state.history.extend(data)?;
        state.install(generation, fitted);

        info!(
            "Ensemble trained for '{}' on {} samples",
            metric_name,
            data.len()
        );
        Ok(())
    }

    /// 値を判定
    pub fn predict(&self, metric_name: &str, value: f64) -> Result<EnsembleDetectionResult> {
        ensure_finite(metric_name, value)?;

        let state = self.state_for(metric_name);
        let (current, refit_data) = {
            let mut state = state.lock();
            state.history.push(value)?;
            state.since_fit += 1;

            let needs_fit = match state.fitted {
                None => state.history.len() >= self.config.min_training_samples,
                Some(_) => state.since_fit >= self.config.refit_interval,
            };
            let refit_data = if needs_fit {
                let generation = state.begin_fit();
                Some((generation, state.history.snapshot()))
            } else {
                None
            };
            (state.fitted.clone(), refit_data)
        };

        let detectors = match refit_data {
            Some((generation, data)) => {
                let fitted = self.fit_detectors(metric_name, &data);
                state.lock().install(generation, fitted)
            }
            None => current,
        };

        let Some(detectors) = detectors else {
            return Ok(EnsembleDetectionResult::untrained(metric_name, value));
        };

        Ok(self.vote(metric_name, value, &detectors))
    }

    fn vote(&self, metric_name: &str, value: f64, detectors: &DetectorSet) -> EnsembleDetectionResult {
        let votes: Vec<DetectionVote> = detectors
            .iter()
            .map(|detector| match detector.predict(value) {
                Ok(output) => DetectionVote::new(detector.name(), output),
                Err(e) => {
                    debug!("{} abstained for '{}': {}", detector.name(), metric_name, e);
                    DetectionVote::abstain(detector.name())
                }
            })
            .collect();

        let tally = self.policy.aggregate(&votes);
        let mean_confidence = if votes.is_empty() {
            0.0
        } else {
            votes.iter().map(|v| v.confidence).sum::<f64>() / votes.len() as f64
        };
        let confidence = if tally.is_anomaly {
            mean_confidence
        } else {
            1.0 - mean_confidence
        };

        let flagged: Vec<&str> = votes
            .iter()
            .filter(|v| v.is_anomaly)
            .map(|v| v.algorithm.as_str())
            .collect();
        let reason = if tally.is_anomaly {
            format!(
                "{} voting flagged anomaly ({}/{} detectors: {})",
                self.policy.name(),
                flagged.len(),
                votes.len(),
                flagged.join(", ")
            )
        } else {
            format!(
                "{} voting found no anomaly ({}/{} detectors flagged)",
                self.policy.name(),
                flagged.len(),
                votes.len()
            )
        };

        EnsembleDetectionResult {
            timestamp: Utc::now(),
            metric_name: metric_name.to_string(),
            value,
            is_anomaly: tally.is_anomaly,
            confidence: confidence.clamp(0.0, 1.0),
            votes: votes
                .into_iter()
                .map(|v| (v.algorithm.clone(), v))
                .collect(),
            consensus_level: tally.consensus_level,
            reason,
        }
    }

    /// メトリクスが学習済みか
    pub fn is_trained(&self, metric_name: &str) -> bool {
        self.metrics
            .read()
            .get(metric_name)
            .map(|s| s.lock().fitted.is_some())
            .unwrap_or(false)
    }

    /// 保持している履歴の長さ
    pub fn history_len(&self, metric_name: &str) -> usize {
        self.metrics
            .read()
            .get(metric_name)
            .map(|s| s.lock().history.len())
            .unwrap_or(0)
    }

    /// 検知器のヘルス情報
    pub fn get_detector_health(&self) -> EnsembleHealth {
        let metrics_trained = self
            .metrics
            .read()
            .values()
            .filter(|s| s.lock().fitted.is_some())
            .count();

        EnsembleHealth {
            detectors: self
                .build_detectors()
                .iter()
                .map(|d| d.name().to_string())
                .collect(),
            voting_strategy: self.policy.name().to_string(),
            weights: self
                .config
                .weights
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            metrics_trained,
            timestamp: Utc::now(),
        }
    }
}
