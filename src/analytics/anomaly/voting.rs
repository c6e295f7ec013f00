//! 投票戦略
//!
//! アンサンブル内の各アルゴリズムの票を集約して最終判定を出します。
//! 戦略は [`VotingPolicy`] トレイトとして実装され、[`VotingStrategy`] で選択します。

use super::types::DetectionVote;
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// 集約結果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoteTally {
    /// 異常判定
    pub is_anomaly: bool,
    /// 合意度（戦略ごとの定義）
    pub consensus_level: f64,
}

/// 投票集約のインターフェース
pub trait VotingPolicy: Send + Sync + fmt::Debug {
    /// 戦略名
    fn name(&self) -> &str;

    /// 票を集約
    fn aggregate(&self, votes: &[DetectionVote]) -> VoteTally;
}

fn anomaly_fraction(votes: &[DetectionVote]) -> f64 {
    if votes.is_empty() {
        return 0.0;
    }
    votes.iter().filter(|v| v.is_anomaly).count() as f64 / votes.len() as f64
}

fn mean_confidence(votes: &[DetectionVote]) -> f64 {
    if votes.is_empty() {
        return 0.0;
    }
    votes.iter().map(|v| v.confidence).sum::<f64>() / votes.len() as f64
}

/// 多数決
#[derive(Debug, Default, Clone)]
pub struct MajorityVoting;

impl VotingPolicy for MajorityVoting {
    fn name(&self) -> &str {
        VotingStrategy::Majority.as_str()
    }

    fn aggregate(&self, votes: &[DetectionVote]) -> VoteTally {
        let anomalous = votes.iter().filter(|v| v.is_anomaly).count();
        VoteTally {
            is_anomaly: anomalous * 2 > votes.len(),
            consensus_level: anomaly_fraction(votes),
        }
    }
}

/// 重み付き投票
#[derive(Debug, Clone)]
pub struct WeightedVoting {
    weights: HashMap<String, f64>,
}

impl WeightedVoting {
    pub fn new(weights: HashMap<String, f64>) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &HashMap<String, f64> {
        &self.weights
    }
}

impl Default for WeightedVoting {
    fn default() -> Self {
        Self::new(default_weights())
    }
}

impl VotingPolicy for WeightedVoting {
    fn name(&self) -> &str {
        VotingStrategy::Weighted.as_str()
    }

    fn aggregate(&self, votes: &[DetectionVote]) -> VoteTally {
        let score: f64 = votes
            .iter()
            .map(|v| v.confidence * self.weights.get(&v.algorithm).copied().unwrap_or(0.0))
            .sum();
        VoteTally {
            is_anomaly: score > 0.5,
            consensus_level: score,
        }
    }
}

/// 全会一致
#[derive(Debug, Default, Clone)]
pub struct ConsensusVoting;

impl VotingPolicy for ConsensusVoting {
    fn name(&self) -> &str {
        VotingStrategy::Consensus.as_str()
    }

    fn aggregate(&self, votes: &[DetectionVote]) -> VoteTally {
        let unanimous = !votes.is_empty() && votes.iter().all(|v| v.is_anomaly);
        VoteTally {
            is_anomaly: unanimous,
            consensus_level: if unanimous { 1.0 } else { anomaly_fraction(votes) },
        }
    }
}

/// 平均確信度
#[derive(Debug, Default, Clone)]
pub struct AverageConfidenceVoting;

impl VotingPolicy for AverageConfidenceVoting {
    fn name(&self) -> &str {
        VotingStrategy::AverageConfidence.as_str()
    }

    fn aggregate(&self, votes: &[DetectionVote]) -> VoteTally {
        let mean = mean_confidence(votes);
        VoteTally {
            is_anomaly: mean > 0.5,
            consensus_level: mean,
        }
    }
}

/// 組み込みの投票戦略
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VotingStrategy {
    Majority,
    #[default]
    Weighted,
    Consensus,
    AverageConfidence,
}

impl VotingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Majority => "MAJORITY",
            Self::Weighted => "WEIGHTED",
            Self::Consensus => "CONSENSUS",
            Self::AverageConfidence => "AVERAGE_CONFIDENCE",
        }
    }

    /// 戦略に対応するポリシーを生成（重みは WEIGHTED のみ使用）
    pub fn policy(&self, weights: &HashMap<String, f64>) -> Arc<dyn VotingPolicy> {
        match self {
            Self::Majority => Arc::new(MajorityVoting),
            Self::Weighted => Arc::new(WeightedVoting::new(weights.clone())),
            Self::Consensus => Arc::new(ConsensusVoting),
            Self::AverageConfidence => Arc::new(AverageConfidenceVoting),
        }
    }
}

impl fmt::Display for VotingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VotingStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "MAJORITY" => Ok(Self::Majority),
            "WEIGHTED" => Ok(Self::Weighted),
            "CONSENSUS" => Ok(Self::Consensus),
            "AVERAGE_CONFIDENCE" => Ok(Self::AverageConfidence),
            other => Err(Error::InvalidConfiguration(format!(
                "unknown voting strategy '{}'",
                other
            ))),
        }
    }
}

/// デフォルトのアルゴリズム重み
pub fn default_weights() -> HashMap<String, f64> {
    HashMap::from([
        ("isolation_forest".to_string(), 0.3),
        ("lof".to_string(), 0.25),
        ("iqr".to_string(), 0.25),
        ("moving_average".to_string(), 0.2),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::anomaly::types::DetectorOutput;

    fn votes(entries: &[(&str, bool, f64)]) -> Vec<DetectionVote> {
        entries
            .iter()
            .map(|(name, flag, conf)| DetectionVote::new(*name, DetectorOutput::new(*flag, *conf)))
            .collect()
    }

    #[test]
    fn test_majority_needs_more_than_half() {
        let tie = votes(&[
            ("isolation_forest", true, 0.9),
            ("lof", true, 0.9),
            ("iqr", false, 0.0),
            ("moving_average", false, 0.0),
        ]);
        let tally = MajorityVoting.aggregate(&tie);
        assert!(!tally.is_anomaly);
        assert_eq!(tally.consensus_level, 0.5);

        let three = votes(&[
            ("isolation_forest", true, 0.9),
            ("lof", true, 0.9),
            ("iqr", true, 0.6),
            ("moving_average", false, 0.0),
        ]);
        assert!(MajorityVoting.aggregate(&three).is_anomaly);
    }

    #[test]
    fn test_weighted_sum() {
        let policy = WeightedVoting::default();
        let v = votes(&[
            ("isolation_forest", true, 1.0),
            ("lof", false, 0.0),
            ("iqr", true, 1.0),
            ("moving_average", false, 0.0),
        ]);
        let tally = policy.aggregate(&v);
        assert!((tally.consensus_level - 0.55).abs() < 1e-12);
        assert!(tally.is_anomaly);

        let unknown = votes(&[("custom", true, 1.0)]);
        assert!(!policy.aggregate(&unknown).is_anomaly);
    }

    #[test]
    fn test_consensus_requires_all() {
        let all = votes(&[("a", true, 0.7), ("b", true, 0.8)]);
        let tally = ConsensusVoting.aggregate(&all);
        assert!(tally.is_anomaly);
        assert_eq!(tally.consensus_level, 1.0);

        let split = votes(&[("a", true, 0.7), ("b", false, 0.1)]);
        let tally = ConsensusVoting.aggregate(&split);
        assert!(!tally.is_anomaly);
        assert_eq!(tally.consensus_level, 0.5);

        assert!(!ConsensusVoting.aggregate(&[]).is_anomaly);
    }

    #[test]
    fn test_average_confidence() {
        let v = votes(&[("a", true, 0.9), ("b", false, 0.3)]);
        let tally = AverageConfidenceVoting.aggregate(&v);
        assert!(tally.is_anomaly);
        assert!((tally.consensus_level - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_strategy_parse_and_policy() {
        assert_eq!(
            "average_confidence".parse::<VotingStrategy>().unwrap(),
            VotingStrategy::AverageConfidence
        );
        assert!("plurality".parse::<VotingStrategy>().is_err());

        let policy = VotingStrategy::Consensus.policy(&default_weights());
        assert_eq!(policy.name(), "CONSENSUS");

        let json = serde_json::to_string(&VotingStrategy::AverageConfidence).unwrap();
        assert_eq!(json, "\"AVERAGE_CONFIDENCE\"");
    }
}
