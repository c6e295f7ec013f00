//! Anomaly Detection Types
//!
//! 異常検知用の型定義

use serde::{Deserialize, Serialize};
use std::fmt;

/// 単一アルゴリズムの判定結果
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorOutput {
    /// 異常フラグ
    pub is_anomaly: bool,
    /// 確信度（0.0-1.0）
    pub confidence: f64,
}

impl DetectorOutput {
    /// 新しい判定結果を作成（確信度は [0, 1] にクランプ）
    pub fn new(is_anomaly: bool, confidence: f64) -> Self {
        Self {
            is_anomaly,
            confidence: clamp_unit(confidence),
        }
    }

    /// 正常（異常の根拠なし）
    pub fn normal() -> Self {
        Self::new(false, 0.0)
    }
}

/// アンサンブル内の1票
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionVote {
    /// アルゴリズム名
    pub algorithm: String,
    /// 異常フラグ
    pub is_anomaly: bool,
    /// 確信度（0.0-1.0）
    pub confidence: f64,
}

impl DetectionVote {
    pub fn new(algorithm: impl Into<String>, output: DetectorOutput) -> Self {
        Self {
            algorithm: algorithm.into(),
            is_anomaly: output.is_anomaly,
            confidence: clamp_unit(output.confidence),
        }
    }

    /// 検知器が失敗した場合の票
    pub fn abstain(algorithm: impl Into<String>) -> Self {
        Self::new(algorithm, DetectorOutput::normal())
    }
}

/// 異常の重大度
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum AnomalySeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AnomalySeverity {
    /// レベル名を取得
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    /// 確信度から重大度を推定（>0.9 CRITICAL, >0.75 HIGH, >0.5 MEDIUM）
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence > 0.9 {
            Self::Critical
        } else if confidence > 0.75 {
            Self::High
        } else if confidence > 0.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn all() -> [AnomalySeverity; 4] {
        [Self::Low, Self::Medium, Self::High, Self::Critical]
    }
}

impl fmt::Display for AnomalySeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 検知経路ごとの判定（未評価・正常確定・異常）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Verdict {
    /// 評価されていない（データ不足・モード対象外）
    NotEvaluated,
    /// 評価した結果、正常
    ConfirmedNormal,
    /// 異常
    Anomalous { confidence: f64 },
}

impl Verdict {
    pub fn anomalous(confidence: f64) -> Self {
        Self::Anomalous {
            confidence: clamp_unit(confidence),
        }
    }

    pub fn is_anomalous(&self) -> bool {
        matches!(self, Self::Anomalous { .. })
    }

    pub fn is_evaluated(&self) -> bool {
        !matches!(self, Self::NotEvaluated)
    }

    /// 異常時の確信度
    pub fn confidence(&self) -> Option<f64> {
        match self {
            Self::Anomalous { confidence } => Some(*confidence),
            _ => None,
        }
    }
}

/// 確信度を [0, 1] に収める（NaN は 0）
pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detector_output_clamps() {
        assert_eq!(DetectorOutput::new(true, 3.0).confidence, 1.0);
        assert_eq!(DetectorOutput::new(false, -1.0).confidence, 0.0);
        assert_eq!(DetectorOutput::new(false, f64::NAN).confidence, 0.0);
    }

    #[test]
    fn test_severity_from_confidence() {
        assert_eq!(AnomalySeverity::from_confidence(0.95), AnomalySeverity::Critical);
        assert_eq!(AnomalySeverity::from_confidence(0.8), AnomalySeverity::High);
        assert_eq!(AnomalySeverity::from_confidence(0.6), AnomalySeverity::Medium);
        assert_eq!(AnomalySeverity::from_confidence(0.5), AnomalySeverity::Low);
        assert!(AnomalySeverity::Critical > AnomalySeverity::Low);
    }

    #[test]
    fn test_verdict_states() {
        assert!(!Verdict::NotEvaluated.is_evaluated());
        assert!(Verdict::ConfirmedNormal.is_evaluated());
        assert!(!Verdict::ConfirmedNormal.is_anomalous());
        assert_eq!(Verdict::anomalous(0.7).confidence(), Some(0.7));
    }

    #[test]
    fn test_severity_serialization() {
        let json = serde_json::to_string(&AnomalySeverity::Critical).unwrap();
        assert_eq!(json, "\"CRITICAL\"");
    }
}
