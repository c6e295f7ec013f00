//! Anomaly Detector Implementation
//!
//! 単一アルゴリズムの異常検知器（Z-スコア、IQR、移動平均）

use super::types::DetectorOutput;
use crate::error::{ensure_finite, Error, Result};
use crate::monitoring::metrics::{mean_std, quantile};

/// 異常検知アルゴリズムの共通インターフェース
///
/// `fit` は最小サンプル数に満たない場合 [`Error::InsufficientData`] を返し、
/// 以前の学習状態を保持します。`predict` は有限値に対して失敗しません
/// （未学習の場合のみ `InsufficientData`）。
pub trait AnomalyAlgorithm: Send + Sync {
    /// アルゴリズム名
    fn name(&self) -> &'static str;

    /// 学習に必要な最小サンプル数
    fn min_samples(&self) -> usize;

    /// 履歴データで学習
    fn fit(&mut self, history: &[f64]) -> Result<()>;

    /// 値を判定
    fn predict(&self, value: f64) -> Result<DetectorOutput>;

    /// 学習済みか
    fn is_fitted(&self) -> bool;
}

/// 学習データが足りているか確認
pub(crate) fn require_samples(algorithm: &str, history: &[f64], required: usize) -> Result<()> {
    if history.len() < required {
        return Err(Error::insufficient(algorithm, required, history.len()));
    }
    if let Some(bad) = history.iter().find(|v| !v.is_finite()) {
        return ensure_finite(algorithm, *bad).map(|_| ());
    }
    Ok(())
}

/// 比率スコアを確信度に変換（閾値でちょうど 0.5）
pub(crate) fn ratio_confidence(score: f64, threshold: f64) -> f64 {
    if threshold <= 0.0 {
        return if score > 0.0 { 1.0 } else { 0.0 };
    }
    (score / (threshold * 2.0)).min(1.0)
}

/// 適応閾値（Z-スコア法）
///
/// 本番パスはローリングベースラインから [`ZScoreDetector::from_moments`] で生成して使います。
#[derive(Debug, Clone)]
pub struct ZScoreDetector {
    /// 感度（Z-スコア閾値）
    sensitivity: f64,
    /// 学習済み (平均, 標準偏差)
    fitted: Option<(f64, f64)>,
}

impl ZScoreDetector {
    pub const MIN_SAMPLES: usize = 10;

    pub fn new(sensitivity: f64) -> Self {
        Self {
            sensitivity,
            fitted: None,
        }
    }

    /// 既知の平均・標準偏差から学習済みの検知器を作成
    pub fn from_moments(mean: f64, std_dev: f64, sensitivity: f64) -> Self {
        Self {
            sensitivity,
            fitted: Some((mean, std_dev.max(0.0))),
        }
    }

    pub fn sensitivity(&self) -> f64 {
        self.sensitivity
    }

    /// Z-スコア（未学習または分散ゼロなら None）
    pub fn z_score(&self, value: f64) -> Option<f64> {
        let (mean, std_dev) = self.fitted?;
        // 分散ゼロでは判定しない
        (std_dev > f64::EPSILON).then(|| (value - mean).abs() / std_dev)
    }
}

impl Default for ZScoreDetector {
    fn default() -> Self {
        Self::new(2.5)
    }
}

impl AnomalyAlgorithm for ZScoreDetector {
    fn name(&self) -> &'static str {
        "adaptive_threshold"
    }

    fn min_samples(&self) -> usize {
        Self::MIN_SAMPLES
    }

    fn fit(&mut self, history: &[f64]) -> Result<()> {
        require_samples(self.name(), history, Self::MIN_SAMPLES)?;
        self.fitted = Some(mean_std(history));
        Ok(())
    }

    fn predict(&self, value: f64) -> Result<DetectorOutput> {
        ensure_finite(self.name(), value)?;
        if self.fitted.is_none() {
            return Err(Error::insufficient(self.name(), Self::MIN_SAMPLES, 0));
        }

        Ok(match self.z_score(value) {
            Some(z_score) => DetectorOutput::new(
                z_score > self.sensitivity,
                ratio_confidence(z_score, self.sensitivity),
            ),
            None => DetectorOutput::normal(),
        })
    }

    fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }
}

/// IQR法（四分位範囲）
#[derive(Debug, Clone)]
pub struct IqrDetector {
    /// 倍率 k
    k: f64,
    /// 学習済み (Q1, Q3)
    quartiles: Option<(f64, f64)>,
}

impl IqrDetector {
    pub const MIN_SAMPLES: usize = 4;

    pub fn new(k: f64) -> Self {
        Self { k, quartiles: None }
    }

    /// 学習済みの下限・上限
    pub fn bounds(&self) -> Option<(f64, f64)> {
        self.quartiles.map(|(q1, q3)| {
            let iqr = q3 - q1;
            (q1 - self.k * iqr, q3 + self.k * iqr)
        })
    }
}

impl Default for IqrDetector {
    fn default() -> Self {
        Self::new(1.5)
    }
}

impl AnomalyAlgorithm for IqrDetector {
    fn name(&self) -> &'static str {
        "iqr"
    }

    fn min_samples(&self) -> usize {
        Self::MIN_SAMPLES
    }

    fn fit(&mut self, history: &[f64]) -> Result<()> {
        require_samples(self.name(), history, Self::MIN_SAMPLES)?;

        let mut sorted = history.to_vec();
        sorted.sort_by(f64::total_cmp);
        self.quartiles = Some((quantile(&sorted, 0.25), quantile(&sorted, 0.75)));
        Ok(())
    }

    fn predict(&self, value: f64) -> Result<DetectorOutput> {
        ensure_finite(self.name(), value)?;
        let (q1, q3) = self
            .quartiles
            .ok_or_else(|| Error::insufficient(self.name(), Self::MIN_SAMPLES, 0))?;

        let iqr = q3 - q1;
        let lower_bound = q1 - self.k * iqr;
        let upper_bound = q3 + self.k * iqr;

        let distance = if value < lower_bound {
            lower_bound - value
        } else if value > upper_bound {
            value - upper_bound
        } else {
            return Ok(DetectorOutput::normal());
        };

        let confidence = if iqr > f64::EPSILON {
            (distance / iqr).min(1.0)
        } else {
            1.0
        };

        Ok(DetectorOutput::new(true, confidence))
    }

    fn is_fitted(&self) -> bool {
        self.quartiles.is_some()
    }
}

/// 分散ゼロ時の相対偏差上限（50%）
const ZERO_VARIANCE_RELATIVE_LIMIT: f64 = 0.5;

/// 移動平均法
#[derive(Debug, Clone)]
pub struct MovingAverageDetector {
    /// ウィンドウサイズ
    window_size: usize,
    /// 標準偏差の倍数による閾値
    threshold_std: f64,
    /// 学習済み (直近平均, 直近標準偏差)
    recent: Option<(f64, f64)>,
}

impl MovingAverageDetector {
    pub fn new(window_size: usize, threshold_std: f64) -> Self {
        Self {
            window_size: window_size.max(2),
            threshold_std,
            recent: None,
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }
}

impl Default for MovingAverageDetector {
    fn default() -> Self {
        Self::new(10, 3.0)
    }
}

impl AnomalyAlgorithm for MovingAverageDetector {
    fn name(&self) -> &'static str {
        "moving_average"
    }

    fn min_samples(&self) -> usize {
        self.window_size
    }

    fn fit(&mut self, history: &[f64]) -> Result<()> {
        require_samples(self.name(), history, self.window_size)?;

        let recent = &history[history.len() - self.window_size..];
        self.recent = Some(mean_std(recent));
        Ok(())
    }

    fn predict(&self, value: f64) -> Result<DetectorOutput> {
        ensure_finite(self.name(), value)?;
        let (ma, std_dev) = self
            .recent
            .ok_or_else(|| Error::insufficient(self.name(), self.window_size, 0))?;

        if std_dev > f64::EPSILON {
            let deviation = (value - ma).abs() / std_dev;
            return Ok(DetectorOutput::new(
                deviation > self.threshold_std,
                ratio_confidence(deviation, self.threshold_std),
            ));
        }

        // 直近が一定値の場合は相対偏差で判定
        let relative = (value - ma).abs() / ma.abs().max(f64::EPSILON);
        Ok(DetectorOutput::new(
            relative > ZERO_VARIANCE_RELATIVE_LIMIT,
            ratio_confidence(relative, ZERO_VARIANCE_RELATIVE_LIMIT),
        ))
    }

    fn is_fitted(&self) -> bool {
        self.recent.is_some()
    }
}
