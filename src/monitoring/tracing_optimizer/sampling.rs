//! トレースサンプリング戦略

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// サンプリング戦略
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SamplingStrategy {
    /// 全トレースを保持
    AlwaysOn,
    /// エラー以外は保持しない
    AlwaysOff,
    /// 固定確率
    Probabilistic { rate: f64 },
    /// 操作の P95 より遅いスパンは必ず保持、それ以外は base_rate
    LatencyAware { base_rate: f64 },
    /// 観測量から確率を調整し、秒あたり target_rate トレースを目標にする
    Adaptive { target_rate: f64 },
}

impl SamplingStrategy {
    pub fn validate(&self) -> Result<()> {
        let ok = match self {
            Self::AlwaysOn | Self::AlwaysOff => true,
            Self::Probabilistic { rate } => (0.0..=1.0).contains(rate),
            Self::LatencyAware { base_rate } => (0.0..=1.0).contains(base_rate),
            Self::Adaptive { target_rate } => target_rate.is_finite() && *target_rate > 0.0,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::InvalidConfiguration(format!(
                "invalid sampling strategy {:?}",
                self
            )))
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AlwaysOn => "always_on",
            Self::AlwaysOff => "always_off",
            Self::Probabilistic { .. } => "probabilistic",
            Self::LatencyAware { .. } => "latency_aware",
            Self::Adaptive { .. } => "adaptive",
        }
    }
}

/// サンプリング判定の入力
#[derive(Debug, Clone, Copy)]
pub struct SamplingContext {
    pub is_error: bool,
    pub duration_ms: f64,
    /// 同じ操作のこれまでの P95（データ不足なら None）
    pub operation_p95: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// 適応サンプリングの観測窓
#[derive(Debug)]
struct AdaptiveWindow {
    started: Option<DateTime<Utc>>,
    seen: u64,
    rate: f64,
}

/// サンプラー
#[derive(Debug)]
pub struct Sampler {
    strategy: SamplingStrategy,
    rng: Mutex<StdRng>,
    adaptive: Mutex<AdaptiveWindow>,
}

impl Sampler {
    pub fn new(strategy: SamplingStrategy, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            strategy,
            rng: Mutex::new(rng),
            adaptive: Mutex::new(AdaptiveWindow {
                started: None,
                seen: 0,
                rate: 1.0,
            }),
        }
    }

    pub fn strategy(&self) -> SamplingStrategy {
        self.strategy
    }

    fn coin(&self, probability: f64) -> bool {
        if probability >= 1.0 {
            return true;
        }
        if probability <= 0.0 {
            return false;
        }
        self.rng.lock().gen::<f64>() < probability
    }

    /// 1秒ごとに観測レートを測り、確率を target / observed に更新
    fn adaptive_rate(&self, target_rate: f64, timestamp: DateTime<Utc>) -> f64 {
        let mut window = self.adaptive.lock();
        let started = *window.started.get_or_insert(timestamp);
        window.seen += 1;

        let elapsed = timestamp - started;
        if elapsed >= Duration::seconds(1) {
            let seconds = elapsed.num_milliseconds() as f64 / 1000.0;
            let observed = window.seen as f64 / seconds;
            window.rate = (target_rate / observed).clamp(0.0, 1.0);
            window.started = Some(timestamp);
            window.seen = 0;
        }
        window.rate
    }

    /// 現在の適応サンプリング確率
    pub fn current_adaptive_rate(&self) -> f64 {
        self.adaptive.lock().rate
    }

    /// トレースを保持するか判定（エラーは常に保持）
    pub fn should_sample(&self, ctx: &SamplingContext) -> bool {
        if ctx.is_error {
            return true;
        }
        match self.strategy {
            SamplingStrategy::AlwaysOn => true,
            SamplingStrategy::AlwaysOff => false,
            SamplingStrategy::Probabilistic { rate } => self.coin(rate),
            SamplingStrategy::LatencyAware { base_rate } => {
                let slow = ctx
                    .operation_p95
                    .map(|p95| ctx.duration_ms > p95)
                    .unwrap_or(false);
                slow || self.coin(base_rate)
            }
            SamplingStrategy::Adaptive { target_rate } => {
                let rate = self.adaptive_rate(target_rate, ctx.timestamp);
                self.coin(rate)
            }
        }
    }
}
