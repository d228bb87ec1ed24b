//! Probabilistic scoring of the current market state plus the feedback path that tunes it.
//!
//! `predict` is a pure function of its input and the current weights/thresholds.
//! `update_model` is the only mutator of learned state besides `reset`.

pub mod adaptive;
pub mod features;

pub use adaptive::{AdaptiveThresholds, DroughtTracker, ModelWeights, PerformanceMetrics};
pub use features::{FeatureGroup, FeatureVector, FEATURE_COUNT};

use crate::config::{TradingConfig, KELLY_HARD_CAP};
use crate::error::OutcomeError;
use crate::feedback::TradeOutcome;
use crate::indicators::{IndicatorSet, MarketContext, MarketRegime, VolatilityRegime};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

pub const CONFIDENCE_BOUNDS: (f64, f64) = (0.25, 0.92);
pub const RISK_SCORE_BOUNDS: (f64, f64) = (0.05, 0.80);
pub const HORIZON_BOUNDS_SECS: (f64, f64) = (20.0, 180.0);

const SIGMOID_SLOPE: f64 = 4.0;
const PROBABILITY_OFFSET: f64 = 0.0;
const PERFORMANCE_BIAS_SCALE: f64 = 0.1;
const OPPORTUNITY_BONUS: f64 = 0.05;
const OPPORTUNITY_FEATURE: f64 = 0.6;
const EXPECTED_RETURN_SCALE: f64 = 4.0;
const KELLY_LOSS_RATIO: f64 = 0.4;
const BASE_HORIZON_SECS: f64 = 60.0;

const METRICS_WINDOW: usize = 50;
const RETRAIN_WINDOW: usize = 40;
const RETRAIN_EVERY: u64 = 2;
/// Outcomes required before metrics start steering thresholds, weights and bias.
const MIN_LEARNING_SAMPLES: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionOutput {
    pub probability: f64,
    pub confidence: f64,
    /// Signed fraction of price; positive when the model leans long.
    pub expected_return: f64,
    pub time_horizon_secs: f64,
    pub risk_score: f64,
    pub kelly_fraction: f64,
    /// Expected worst excursion as a fraction of price.
    pub max_adverse_excursion: f64,
    pub features: FeatureVector,
    pub feature_contributions: FeatureVector,
}

impl PredictionOutput {
    /// Stand-in for positions recovered without their entry prediction.
    pub fn neutral() -> Self {
        Self {
            probability: 0.5,
            confidence: CONFIDENCE_BOUNDS.0,
            expected_return: 0.0,
            time_horizon_secs: HORIZON_BOUNDS_SECS.1,
            risk_score: RISK_SCORE_BOUNDS.1,
            kelly_fraction: 0.0,
            max_adverse_excursion: 0.0,
            features: FeatureVector::default(),
            feature_contributions: FeatureVector::default(),
        }
    }

    /// Strongest contributions first.
    pub fn dominant_features(&self) -> Vec<(FeatureGroup, f64)> {
        let mut items: Vec<_> = self.feature_contributions.iter().collect();
        items.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
        items
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PredictionInput<'a> {
    pub indicators: &'a IndicatorSet,
    pub context: &'a MarketContext,
    pub imbalance: f64,
}

#[derive(Debug, Clone)]
pub struct PredictionEngine {
    weights: ModelWeights,
    thresholds: AdaptiveThresholds,
    metrics: PerformanceMetrics,
    buffer: VecDeque<TradeOutcome>,
    updates: u64,
    drought: DroughtTracker,
    config: TradingConfig,
}

impl PredictionEngine {
    pub fn new(config: &TradingConfig) -> Self {
        Self {
            weights: ModelWeights::default(),
            thresholds: AdaptiveThresholds::from_config(config),
            metrics: PerformanceMetrics::default(),
            buffer: VecDeque::with_capacity(config.max_training_buffer),
            updates: 0,
            drought: DroughtTracker::default(),
            config: config.clone(),
        }
    }

    pub fn weights(&self) -> ModelWeights {
        self.weights
    }

    pub fn thresholds(&self) -> AdaptiveThresholds {
        self.thresholds
    }

    pub fn performance(&self) -> PerformanceMetrics {
        self.metrics
    }

    pub fn training_len(&self) -> usize {
        self.buffer.len()
    }

    /// Replaces the tunables. Threshold fields overwrite the learned ones only when asked.
    pub fn apply_config(&mut self, config: &TradingConfig, overwrite_thresholds: bool) {
        self.config = config.clone();
        if overwrite_thresholds {
            self.thresholds = AdaptiveThresholds::from_config(config);
        }
        while self.buffer.len() > self.config.max_training_buffer {
            self.buffer.pop_front();
        }
    }

    /// Drops everything learned and returns to the configured defaults.
    pub fn reset(&mut self) {
        info!("Resetting prediction model to defaults");
        *self = Self::new(&self.config);
    }

    pub fn observe_clock(&mut self, now_ms: u64) {
        self.drought.observe(now_ms);
    }

    pub fn record_signal(&mut self, now_ms: u64) {
        self.drought.record_signal(now_ms);
    }

    /// Learned thresholds, relaxed for the current signal drought.
    pub fn effective_thresholds(&self, now_ms: u64) -> AdaptiveThresholds {
        let factor = self.drought.factor(
            now_ms,
            self.config.drought_start_secs,
            self.config.drought_step_secs,
            self.config.drought_floor,
        );
        self.thresholds.relaxed(factor)
    }

    pub fn predict(&self, input: PredictionInput<'_>) -> PredictionOutput {
        let ind = input.indicators;
        let ctx = input.context;
        let regime = ctx.market_regime;

        let features = features::extract(ind, ctx, input.imbalance);
        let multipliers = regime_feature_multipliers(regime);
        let mut contributions = FeatureVector::default();
        for group in FeatureGroup::ALL {
            let i = group.index();
            contributions.0[i] = features.0[i] * self.weights.0[i] * multipliers[i];
        }

        let base = contributions.sum();
        let direction = if base >= 0.0 { 1.0 } else { -1.0 };
        let mut score = base;
        if self.metrics.sample_count >= MIN_LEARNING_SAMPLES {
            score += (self.metrics.win_rate - 0.5) * PERFORMANCE_BIAS_SCALE * direction;
        }
        if features.max_abs() > OPPORTUNITY_FEATURE && ctx.liquidity_score >= 0.4 && ctx.spread_quality >= 0.5 {
            score += OPPORTUNITY_BONUS * direction;
        }

        let probability = (sigmoid(score * SIGMOID_SLOPE) + PROBABILITY_OFFSET).clamp(0.001, 0.999);
        let confidence = self.confidence(&features, ctx, score);
        let expected_return = expected_return(ind, ctx, confidence, probability);
        let risk_score = risk_score(ind, ctx, input.imbalance);
        let kelly_fraction = kelly(probability, expected_return, self.config.kelly_cap);

        let horizon = BASE_HORIZON_SECS
            * match regime {
                MarketRegime::StrongBull | MarketRegime::StrongBear => 1.5,
                MarketRegime::WeakBull | MarketRegime::WeakBear => 1.2,
                MarketRegime::SidewaysVolatile => 0.7,
                MarketRegime::SidewaysQuiet => 1.0,
            }
            * match ctx.volatility_regime {
                VolatilityRegime::Low => 1.3,
                VolatilityRegime::Medium => 1.0,
                VolatilityRegime::High => 0.7,
            }
            * (0.5 + confidence);

        let atr_ratio = if ind.price > 0.0 { ind.atr / ind.price } else { 0.0 };
        let mae = atr_ratio
            * match regime {
                MarketRegime::SidewaysVolatile => 1.5,
                MarketRegime::WeakBull | MarketRegime::WeakBear => 1.2,
                MarketRegime::StrongBull | MarketRegime::StrongBear => 1.0,
                MarketRegime::SidewaysQuiet => 0.8,
            };

        PredictionOutput {
            probability,
            confidence,
            expected_return,
            time_horizon_secs: finite_or(horizon, HORIZON_BOUNDS_SECS.1).clamp(HORIZON_BOUNDS_SECS.0, HORIZON_BOUNDS_SECS.1),
            risk_score,
            kelly_fraction,
            max_adverse_excursion: finite_or(mae, 0.0).max(0.0),
            features,
            feature_contributions: contributions,
        }
    }

    fn confidence(&self, features: &FeatureVector, ctx: &MarketContext, score: f64) -> f64 {
        let mut c = 0.5;
        c += match ctx.market_regime {
            MarketRegime::StrongBull | MarketRegime::StrongBear => 0.10,
            MarketRegime::WeakBull | MarketRegime::WeakBear => 0.05,
            MarketRegime::SidewaysQuiet => -0.05,
            MarketRegime::SidewaysVolatile => -0.10,
        };
        c += 0.1 * (ctx.liquidity_score - 0.5);
        c += 0.1 * (ctx.spread_quality - 0.5);
        c += 0.3 * features.mean_abs();

        let agreeing = features.0.iter().filter(|f| **f * score > 0.0).count() as f64;
        c += 0.1 * (agreeing / FEATURE_COUNT as f64 - 0.5) * 2.0;

        finite_or(c, CONFIDENCE_BOUNDS.0).clamp(CONFIDENCE_BOUNDS.0, CONFIDENCE_BOUNDS.1)
    }

    /// Feeds one closed trade back into the model.
    pub fn update_model(&mut self, outcome: TradeOutcome) -> Result<(), OutcomeError> {
        if let Err(e) = outcome.validate() {
            warn!("Rejected trade outcome for position {:?}: {}", outcome.position_id, e);
            return Err(e);
        }

        self.buffer.push_back(outcome);
        while self.buffer.len() > self.config.max_training_buffer {
            self.buffer.pop_front();
        }
        self.updates += 1;

        let recent = self.recent(METRICS_WINDOW);
        self.metrics = PerformanceMetrics::from_outcomes(&recent);

        if self.buffer.len() >= MIN_LEARNING_SAMPLES {
            if let Some(direction) = self.thresholds.adapt(&self.metrics) {
                debug!(
                    "Thresholds {}: p>={:.3} conf>={:.3} risk<={:.3}",
                    direction,
                    self.thresholds.min_probability,
                    self.thresholds.min_confidence,
                    self.thresholds.max_risk
                );
            }
        }

        if self.updates % RETRAIN_EVERY == 0 {
            let window = self.recent(RETRAIN_WINDOW);
            if window.len() >= MIN_LEARNING_SAMPLES && self.weights.retrain(&window) {
                debug!("Retrained feature weights: {:?}", self.weights.0);
            }
        }

        info!(
            "Model updated: {} outcomes, win rate {:.2}, profit factor {:.2}",
            self.buffer.len(),
            self.metrics.win_rate,
            self.metrics.profit_factor
        );
        Ok(())
    }

    /// Replays stored outcomes, e.g. after a restart. Returns how many were accepted.
    pub fn warm_start(&mut self, outcomes: impl IntoIterator<Item = TradeOutcome>) -> usize {
        outcomes
            .into_iter()
            .filter_map(|o| self.update_model(o).ok())
            .count()
    }

    fn recent(&self, n: usize) -> Vec<TradeOutcome> {
        let skip = self.buffer.len().saturating_sub(n);
        self.buffer.iter().skip(skip).cloned().collect()
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn finite_or(v: f64, fallback: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        fallback
    }
}

fn regime_feature_multipliers(regime: MarketRegime) -> [f64; FEATURE_COUNT] {
    // technical, momentum, volatility, market_structure, orderbook_depth
    match regime {
        MarketRegime::StrongBull | MarketRegime::StrongBear => [1.2, 1.2, 0.8, 1.0, 1.0],
        MarketRegime::SidewaysVolatile | MarketRegime::SidewaysQuiet => [0.8, 0.8, 1.2, 1.0, 1.0],
        MarketRegime::WeakBull | MarketRegime::WeakBear => [1.0; FEATURE_COUNT],
    }
}

fn expected_return(ind: &IndicatorSet, ctx: &MarketContext, confidence: f64, probability: f64) -> f64 {
    let regime_mult = match ctx.market_regime {
        MarketRegime::StrongBull | MarketRegime::StrongBear => 1.2,
        MarketRegime::WeakBull | MarketRegime::WeakBear => 1.0,
        MarketRegime::SidewaysVolatile => 0.8,
        MarketRegime::SidewaysQuiet => 0.6,
    };
    let vol_mult = match ctx.volatility_regime {
        VolatilityRegime::Low => 0.8,
        VolatilityRegime::Medium => 1.0,
        VolatilityRegime::High => 1.3,
    };
    let liquidity_mult = 0.7 + 0.6 * ctx.liquidity_score;
    let edge = probability - 0.5;
    let magnitude = ind.bollinger_width.max(0.0)
        * regime_mult
        * vol_mult
        * liquidity_mult
        * confidence
        * edge.abs()
        * EXPECTED_RETURN_SCALE;
    finite_or(magnitude, 0.0) * if edge >= 0.0 { 1.0 } else { -1.0 }
}

fn risk_score(ind: &IndicatorSet, ctx: &MarketContext, imbalance: f64) -> f64 {
    let mut r = 0.3;
    r += match ctx.market_regime {
        MarketRegime::SidewaysVolatile => 0.15,
        MarketRegime::StrongBull | MarketRegime::StrongBear => -0.05,
        MarketRegime::SidewaysQuiet => -0.05,
        MarketRegime::WeakBull | MarketRegime::WeakBear => 0.0,
    };
    r += match ctx.volatility_regime {
        VolatilityRegime::High => 0.15,
        VolatilityRegime::Medium => 0.0,
        VolatilityRegime::Low => -0.05,
    };
    r += 0.1 * (0.5 - ctx.liquidity_score);
    r += 0.1 * (0.5 - ctx.spread_quality);
    if ind.rsi > 80.0 || ind.rsi < 20.0 {
        r += 0.1;
    }
    if imbalance.abs() > 0.6 {
        r += 0.05;
    }
    finite_or(r, RISK_SCORE_BOUNDS.1).clamp(RISK_SCORE_BOUNDS.0, RISK_SCORE_BOUNDS.1)
}

/// `(p·W − (1−p)·L) / W` with `L = 0.4·W`, using the win probability of the predicted direction.
pub fn kelly(probability: f64, expected_return: f64, cap: f64) -> f64 {
    let avg_win = expected_return.abs();
    if !(avg_win > 0.0) || !probability.is_finite() {
        return 0.0;
    }
    let p = probability.max(1.0 - probability);
    let avg_loss = KELLY_LOSS_RATIO * avg_win;
    let f = (p * avg_win - (1.0 - p) * avg_loss) / avg_win;
    f.clamp(0.0, cap.clamp(0.0, KELLY_HARD_CAP))
}
