//! Learned model state: decision thresholds, feature weights, rolling performance and the
//! signal-drought relaxation. Every mutation re-clamps into the documented bounds.

use super::features::{FeatureGroup, FeatureVector, FEATURE_COUNT};
use crate::config::TradingConfig;
use crate::feedback::TradeOutcome;
use serde::{Deserialize, Serialize};

pub const WEIGHT_MIN: f64 = 0.05;
pub const WEIGHT_MAX: f64 = 0.45;

pub const PROBABILITY_BOUNDS: (f64, f64) = (0.52, 0.70);
pub const CONFIDENCE_BOUNDS: (f64, f64) = (0.30, 0.75);
pub const RISK_BOUNDS: (f64, f64) = (0.40, 0.80);
const THRESHOLD_STEP: f64 = 0.005;

const TIGHTEN_WIN_RATE: f64 = 0.55;
const TIGHTEN_PROFIT_FACTOR: f64 = 1.15;
const LOOSEN_WIN_RATE: f64 = 0.42;
const LOOSEN_PROFIT_FACTOR: f64 = 0.92;

const STRONG_GAP: f64 = 0.2;
const WEAK_GAP: f64 = 0.08;
const WEIGHT_BOOST: f64 = 1.1;
const WEIGHT_DECAY: f64 = 0.95;

/// Profit factor reported when there are wins and no losses.
const PROFIT_FACTOR_CAP: f64 = 10.0;
const DROUGHT_RATE: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveThresholds {
    pub min_probability: f64,
    pub min_confidence: f64,
    pub max_risk: f64,
}

impl AdaptiveThresholds {
    pub fn from_config(cfg: &TradingConfig) -> Self {
        let mut t = Self {
            min_probability: cfg.min_probability,
            min_confidence: cfg.min_confidence,
            max_risk: cfg.max_risk_score,
        };
        t.clamp();
        t
    }

    pub fn clamp(&mut self) {
        self.min_probability = clamp_bounds(self.min_probability, PROBABILITY_BOUNDS);
        self.min_confidence = clamp_bounds(self.min_confidence, CONFIDENCE_BOUNDS);
        self.max_risk = clamp_bounds(self.max_risk, RISK_BOUNDS);
    }

    /// Demands more of a signal after the model has been doing well.
    pub fn tighten(&mut self) {
        self.min_probability += THRESHOLD_STEP;
        self.min_confidence += THRESHOLD_STEP;
        self.max_risk -= THRESHOLD_STEP;
        self.clamp();
    }

    pub fn loosen(&mut self) {
        self.min_probability -= THRESHOLD_STEP;
        self.min_confidence -= THRESHOLD_STEP;
        self.max_risk += THRESHOLD_STEP;
        self.clamp();
    }

    /// Adjusts thresholds from the latest metrics. Returns the direction taken, if any.
    pub fn adapt(&mut self, metrics: &PerformanceMetrics) -> Option<&'static str> {
        if metrics.win_rate > TIGHTEN_WIN_RATE && metrics.profit_factor > TIGHTEN_PROFIT_FACTOR {
            self.tighten();
            Some("tighten")
        } else if metrics.win_rate < LOOSEN_WIN_RATE || metrics.profit_factor < LOOSEN_PROFIT_FACTOR {
            self.loosen();
            Some("loosen")
        } else {
            None
        }
    }

    /// Relaxed copy for a signal drought; `factor` is in (0, 1], 1 meaning no relaxation.
    pub fn relaxed(&self, factor: f64) -> Self {
        let factor = factor.clamp(f64::EPSILON, 1.0);
        Self {
            min_probability: 0.5 + (self.min_probability - 0.5) * factor,
            min_confidence: self.min_confidence * factor,
            max_risk: (self.max_risk / factor).min(RISK_BOUNDS.1),
        }
    }
}

fn clamp_bounds(value: f64, (lo, hi): (f64, f64)) -> f64 {
    if value.is_finite() {
        value.clamp(lo, hi)
    } else {
        lo
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelWeights(pub [f64; FEATURE_COUNT]);

impl Default for ModelWeights {
    fn default() -> Self {
        Self([0.25, 0.20, 0.15, 0.20, 0.20])
    }
}

impl ModelWeights {
    pub fn get(&self, group: FeatureGroup) -> f64 {
        self.0[group.index()]
    }

    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    /// Nudges weights from the success/failure feature gap of recent trades, then
    /// projects back onto the bounded simplex.
    pub fn retrain(&mut self, outcomes: &[TradeOutcome]) -> bool {
        let aligned = |o: &TradeOutcome| -> FeatureVector {
            let sign = o.side.sign();
            let mut v = o.prediction.features;
            v.0.iter_mut().for_each(|x| *x *= sign);
            v
        };
        let (wins, losses): (Vec<_>, Vec<_>) = outcomes.iter().partition(|o| o.is_win());
        if wins.is_empty() || losses.is_empty() {
            return false;
        }

        let mean_of = |set: &[&TradeOutcome], idx: usize| -> f64 {
            set.iter().map(|o| aligned(*o).0[idx]).sum::<f64>() / set.len() as f64
        };

        let mut raw = self.0;
        for (idx, weight) in raw.iter_mut().enumerate() {
            let gap = mean_of(&wins, idx) - mean_of(&losses, idx);
            if gap > STRONG_GAP {
                *weight *= WEIGHT_BOOST;
            } else if gap.abs() < WEAK_GAP {
                *weight *= WEIGHT_DECAY;
            }
        }
        self.0 = project_weights(raw);
        true
    }
}

/// Finds a common scale so the clamped weights sum to one. Every output is in
/// `[WEIGHT_MIN, WEIGHT_MAX]`.
pub fn project_weights(raw: [f64; FEATURE_COUNT]) -> [f64; FEATURE_COUNT] {
    let raw = raw.map(|w| if w.is_finite() && w > 0.0 { w } else { WEIGHT_MIN });
    let scaled = |lambda: f64| raw.map(|w| (w * lambda).clamp(WEIGHT_MIN, WEIGHT_MAX));
    let total = |lambda: f64| scaled(lambda).iter().sum::<f64>();

    let mut lo = 0.0;
    let mut hi = 1.0;
    while total(hi) < 1.0 {
        hi *= 2.0;
    }
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if total(mid) < 1.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    let mut out = scaled(hi);
    let residual = 1.0 - out.iter().sum::<f64>();
    if let Some(w) = out
        .iter_mut()
        .find(|w| **w + residual >= WEIGHT_MIN && **w + residual <= WEIGHT_MAX)
    {
        *w += residual;
    }
    out
}

/// Rolling statistics over the most recent outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub sample_count: usize,
    pub win_rate: f64,
    pub sharpe_ratio: f64,
    pub profit_factor: f64,
    pub avg_return: f64,
    pub avg_mfe: f64,
    pub avg_mae: f64,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self {
            sample_count: 0,
            win_rate: 0.5,
            sharpe_ratio: 0.0,
            profit_factor: 1.0,
            avg_return: 0.0,
            avg_mfe: 0.0,
            avg_mae: 0.0,
        }
    }
}

impl PerformanceMetrics {
    pub fn from_outcomes(outcomes: &[TradeOutcome]) -> Self {
        if outcomes.is_empty() {
            return Self::default();
        }
        let n = outcomes.len() as f64;
        let returns: Vec<f64> = outcomes.iter().map(|o| o.realized_return).collect();
        let wins = outcomes.iter().filter(|o| o.is_win()).count() as f64;
        let gross_win: f64 = returns.iter().filter(|r| **r > 0.0).sum();
        let gross_loss: f64 = -returns.iter().filter(|r| **r < 0.0).sum::<f64>();

        let avg_return = returns.iter().sum::<f64>() / n;
        let variance = returns.iter().map(|r| (r - avg_return).powi(2)).sum::<f64>() / n;
        let sd = variance.sqrt();

        let profit_factor = if gross_loss > 0.0 {
            (gross_win / gross_loss).min(PROFIT_FACTOR_CAP)
        } else if gross_win > 0.0 {
            PROFIT_FACTOR_CAP
        } else {
            1.0
        };

        Self {
            sample_count: outcomes.len(),
            win_rate: wins / n,
            sharpe_ratio: if sd > 0.0 { avg_return / sd } else { 0.0 },
            profit_factor,
            avg_return,
            avg_mfe: outcomes.iter().map(|o| o.max_favorable_excursion).sum::<f64>() / n,
            avg_mae: outcomes.iter().map(|o| o.max_adverse_excursion).sum::<f64>() / n,
        }
    }
}

/// Tracks time since the last qualifying signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DroughtTracker {
    first_seen_ms: Option<u64>,
    last_signal_ms: Option<u64>,
}

impl DroughtTracker {
    pub fn observe(&mut self, now_ms: u64) {
        self.first_seen_ms.get_or_insert(now_ms);
    }

    pub fn record_signal(&mut self, now_ms: u64) {
        self.last_signal_ms = Some(now_ms);
    }

    /// 1.0 until the drought starts, then decays linearly per step down to `floor`.
    pub fn factor(&self, now_ms: u64, start_secs: u64, step_secs: u64, floor: f64) -> f64 {
        let Some(since) = self.last_signal_ms.or(self.first_seen_ms) else {
            return 1.0;
        };
        let elapsed = now_ms.saturating_sub(since) as f64 / 1_000.0;
        let start = start_secs as f64;
        if elapsed <= start {
            return 1.0;
        }
        let steps = (elapsed - start) / step_secs.max(1) as f64;
        (1.0 - DROUGHT_RATE * steps).max(floor)
    }
}
