//! Hybrid Detection
//!
//! 本番パス（適応閾値）とアンサンブルパスをモードに応じて実行し、判定を統合します。

use super::ensemble::{EnsembleDetectionResult, EnsembleDetector, EnsembleHealth};
use super::production::{AdaptiveThresholdDetector, AnomalyEvent, AnomalySummary, ProductionOutcome};
use super::types::{AnomalySeverity, Verdict};
use crate::config::types::HybridConfig;
use crate::error::{ensure_finite, Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// 検知モード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectionMode {
    ProductionOnly,
    EnsembleOnly,
    #[default]
    Hybrid,
    Consensus,
}

impl DetectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProductionOnly => "PRODUCTION_ONLY",
            Self::EnsembleOnly => "ENSEMBLE_ONLY",
            Self::Hybrid => "HYBRID",
            Self::Consensus => "CONSENSUS",
        }
    }

    fn runs_production(&self) -> bool {
        !matches!(self, Self::EnsembleOnly)
    }

    fn runs_ensemble(&self) -> bool {
        !matches!(self, Self::ProductionOnly)
    }
}

impl fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "PRODUCTION_ONLY" => Ok(Self::ProductionOnly),
            "ENSEMBLE_ONLY" => Ok(Self::EnsembleOnly),
            "HYBRID" => Ok(Self::Hybrid),
            "CONSENSUS" => Ok(Self::Consensus),
            other => Err(Error::InvalidConfiguration(format!(
                "unknown detection mode '{}'",
                other
            ))),
        }
    }
}

/// 統合判定結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridDetectionResult {
    pub timestamp: DateTime<Utc>,
    pub component: String,
    pub metric_name: String,
    pub value: f64,
    pub production_event: Option<AnomalyEvent>,
    pub ensemble_result: Option<EnsembleDetectionResult>,
    pub production_verdict: Verdict,
    pub ensemble_verdict: Verdict,
    pub is_anomaly: bool,
    pub confidence: f64,
    pub severity: AnomalySeverity,
    /// 両パスが評価した場合のみ
    pub agreement: Option<bool>,
    pub detection_method: String,
}

/// システムヘルス
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub mode: DetectionMode,
    pub detections_made: usize,
    /// 両パスが評価した回数のうち一致した割合（比較なしなら None）
    pub agreement_ratio: Option<f64>,
    pub component_agreement: BTreeMap<String, f64>,
    pub production: AnomalySummary,
    pub ensemble: EnsembleHealth,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Copy)]
struct AgreementCounter {
    agreements: usize,
    comparisons: usize,
}

impl AgreementCounter {
    fn record(&mut self, agreed: bool) {
        self.comparisons += 1;
        if agreed {
            self.agreements += 1;
        }
    }

    fn ratio(&self) -> Option<f64> {
        (self.comparisons > 0).then(|| self.agreements as f64 / self.comparisons as f64)
    }
}

#[derive(Default)]
struct CombinerStats {
    detections_made: usize,
    overall: AgreementCounter,
    per_component: HashMap<String, AgreementCounter>,
}

/// ハイブリッド統合器
pub struct HybridCombiner {
    mode: DetectionMode,
    max_history: usize,
    production: Arc<AdaptiveThresholdDetector>,
    ensemble: Arc<EnsembleDetector>,
    history: Mutex<VecDeque<HybridDetectionResult>>,
    stats: Mutex<CombinerStats>,
}

impl HybridCombiner {
    pub fn new(
        config: &HybridConfig,
        production: Arc<AdaptiveThresholdDetector>,
        ensemble: Arc<EnsembleDetector>,
    ) -> Self {
        info!("Hybrid combiner initialized in {} mode", config.mode);
        Self {
            mode: config.mode,
            max_history: config.max_history.max(1),
            production,
            ensemble,
            history: Mutex::new(VecDeque::new()),
            stats: Mutex::new(CombinerStats::default()),
        }
    }

    pub fn mode(&self) -> DetectionMode {
        self.mode
    }

    pub fn production(&self) -> &Arc<AdaptiveThresholdDetector> {
        &self.production
    }

    pub fn ensemble(&self) -> &Arc<EnsembleDetector> {
        &self.ensemble
    }

    /// アンサンブルを履歴データで学習
    pub fn train_ensemble(&self, metric_name: &str, data: &[f64]) -> Result<()> {
        self.ensemble.fit(metric_name, data)
    }

    /// 値を判定（異常がなければ None）
    pub fn detect(
        &self,
        component: &str,
        metric_name: &str,
        value: f64,
    ) -> Result<Option<HybridDetectionResult>> {
        self.detect_at(component, metric_name, value, Utc::now())
    }

    /// タイムスタンプを指定して判定
    pub fn detect_at(
        &self,
        component: &str,
        metric_name: &str,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<HybridDetectionResult>> {
        ensure_finite(metric_name, value)?;

        let production = if self.mode.runs_production() {
            Some(
                self.production
                    .evaluate_at(component, metric_name, value, timestamp)?,
            )
        } else {
            None
        };
        let ensemble = if self.mode.runs_ensemble() {
            Some(self.ensemble.predict(metric_name, value)?)
        } else {
            None
        };

        let production_verdict = production
            .as_ref()
            .map(ProductionOutcome::effective_verdict)
            .unwrap_or(Verdict::NotEvaluated);
        let ensemble_verdict = ensemble
            .as_ref()
            .map(|r| r.verdict())
            .unwrap_or(Verdict::NotEvaluated);

        let agreement = (production_verdict.is_evaluated() && ensemble_verdict.is_evaluated())
            .then(|| production_verdict.is_anomalous() == ensemble_verdict.is_anomalous());
        if let Some(agreed) = agreement {
            let mut stats = self.stats.lock();
            stats.overall.record(agreed);
            stats
                .per_component
                .entry(component.to_string())
                .or_default()
                .record(agreed);
        }

        let Some(confidence) = self.combine(production_verdict, ensemble_verdict) else {
            return Ok(None);
        };

        let severity = production
            .as_ref()
            .filter(|o| !o.suppressed)
            .and_then(|o| o.severity)
            .unwrap_or_else(|| AnomalySeverity::from_confidence(confidence));

        let result = HybridDetectionResult {
            timestamp,
            component: component.to_string(),
            metric_name: metric_name.to_string(),
            value,
            production_event: production.and_then(|o| o.event),
            ensemble_result: ensemble,
            production_verdict,
            ensemble_verdict,
            is_anomaly: true,
            confidence,
            severity,
            agreement,
            detection_method: self.detection_method(production_verdict, ensemble_verdict),
        };

        debug!(
            component,
            metric = metric_name,
            confidence,
            severity = severity.as_str(),
            "Hybrid detection"
        );

        {
            let mut history = self.history.lock();
            if history.len() >= self.max_history {
                history.pop_front();
            }
            history.push_back(result.clone());
        }
        self.stats.lock().detections_made += 1;

        Ok(Some(result))
    }

    /// モードに応じて判定を統合（異常なら確信度）
    fn combine(&self, production: Verdict, ensemble: Verdict) -> Option<f64> {
        match self.mode {
            DetectionMode::ProductionOnly => production.confidence(),
            DetectionMode::EnsembleOnly => ensemble.confidence(),
            DetectionMode::Hybrid => {
                if !production.is_anomalous() && !ensemble.is_anomalous() {
                    return None;
                }
                let p = production.confidence().unwrap_or(0.0);
                let e = ensemble.confidence().unwrap_or(0.0);
                Some((p + e) / 2.0)
            }
            DetectionMode::Consensus => {
                let p = production.confidence()?;
                let e = ensemble.confidence()?;
                Some(p.min(e))
            }
        }
    }

    fn detection_method(&self, production: Verdict, ensemble: Verdict) -> String {
        match self.mode {
            DetectionMode::ProductionOnly => "production".to_string(),
            DetectionMode::EnsembleOnly => "ensemble".to_string(),
            DetectionMode::Consensus => "consensus".to_string(),
            DetectionMode::Hybrid => match (production.is_anomalous(), ensemble.is_anomalous()) {
                (true, true) => "hybrid_both".to_string(),
                (true, false) => "hybrid_production".to_string(),
                _ => "hybrid_ensemble".to_string(),
            },
        }
    }

    /// 直近の検知結果（新しい順）
    pub fn get_recent_detections(&self, limit: usize) -> Vec<HybridDetectionResult> {
        self.history.lock().iter().rev().take(limit).cloned().collect()
    }

    /// 全体の一致率
    pub fn agreement_ratio(&self) -> Option<f64> {
        self.stats.lock().overall.ratio()
    }

    /// システムヘルス
    pub fn get_system_health(&self) -> SystemHealth {
        let (detections_made, agreement_ratio, component_agreement) = {
            let stats = self.stats.lock();
            (
                stats.detections_made,
                stats.overall.ratio(),
                stats
                    .per_component
                    .iter()
                    .filter_map(|(name, counter)| counter.ratio().map(|r| (name.clone(), r)))
                    .collect(),
            )
        };

        SystemHealth {
            mode: self.mode,
            detections_made,
            agreement_ratio,
            component_agreement,
            production: self.production.get_anomaly_summary(),
            ensemble: self.ensemble.get_detector_health(),
            timestamp: Utc::now(),
        }
    }
}
