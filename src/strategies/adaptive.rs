//! Signal decision policy: regime-adjusted thresholds on top of the adaptive model,
//! confluence-gated direction and capped Kelly sizing.

use super::traits::{DecisionInput, Strategy};
use crate::config::TradingConfig;
use crate::indicators::{MarketContext, MarketRegime};
use crate::prediction::AdaptiveThresholds;
use crate::types::{Side, TradingSignal};
use crate::utils::precision::{normalize_quantity, to_decimal};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info};

pub const SIGNAL_HISTORY: usize = 100;
/// Share of available balance a single order may use.
const BALANCE_CAP: Decimal = dec!(0.95);
const LOW_LIQUIDITY: f64 = 0.3;

pub struct AdaptivePolicy {
    config: TradingConfig,
    last_evaluated: HashMap<String, u64>,
    history: VecDeque<TradingSignal>,
}

impl AdaptivePolicy {
    pub fn new(config: &TradingConfig) -> Self {
        Self {
            config: config.clone(),
            last_evaluated: HashMap::new(),
            history: VecDeque::with_capacity(SIGNAL_HISTORY),
        }
    }

    /// Shifts floors and ceilings for the current regime and liquidity.
    pub fn regime_adjusted(thresholds: AdaptiveThresholds, ctx: &MarketContext) -> AdaptiveThresholds {
        let mut t = thresholds;
        match ctx.market_regime {
            MarketRegime::StrongBull | MarketRegime::StrongBear => {
                t.min_probability -= 0.01;
                t.min_confidence -= 0.02;
            }
            MarketRegime::SidewaysVolatile => {
                t.min_probability += 0.02;
                t.max_risk -= 0.05;
            }
            MarketRegime::SidewaysQuiet => t.min_confidence += 0.02,
            MarketRegime::WeakBull | MarketRegime::WeakBear => {}
        }
        if ctx.liquidity_score < LOW_LIQUIDITY {
            t.min_probability += 0.02;
            t.min_confidence += 0.03;
        }
        t.min_probability = t.min_probability.clamp(0.5, 0.99);
        t.min_confidence = t.min_confidence.clamp(0.0, 1.0);
        t.max_risk = t.max_risk.clamp(0.0, 1.0);
        t
    }

    /// Quote value to commit, before conversion to quantity.
    pub fn position_value(&self, kelly_fraction: f64, available: Decimal) -> Decimal {
        if available <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let cap = available * BALANCE_CAP;
        let kelly = to_decimal(kelly_fraction).unwrap_or(Decimal::ZERO);
        let min_kelly = to_decimal(self.config.min_kelly_fraction).unwrap_or(Decimal::ZERO);

        if self.config.kelly_enabled && kelly > Decimal::ZERO && kelly >= min_kelly {
            (kelly * available).min(self.config.max_position_size).min(cap)
        } else {
            let flat = to_decimal(self.config.flat_size_fraction).unwrap_or(Decimal::ZERO);
            (flat * self.config.max_position_size).min(cap)
        }
    }

    fn direction(&self, input: &DecisionInput<'_>, t: &AdaptiveThresholds) -> Option<Side> {
        let pred = input.prediction;
        if pred.confidence < t.min_confidence || pred.risk_score > t.max_risk {
            return None;
        }
        let confluence = pred.features.mean();
        let min_confluence = self.config.min_confluence;
        if pred.probability >= t.min_probability && confluence >= min_confluence {
            Some(Side::Buy)
        } else if pred.probability <= 1.0 - t.min_probability && confluence <= -min_confluence {
            Some(Side::Sell)
        } else {
            None
        }
    }

    fn reasoning(side: Side, input: &DecisionInput<'_>) -> String {
        let pred = input.prediction;
        let drivers = pred
            .dominant_features()
            .into_iter()
            .take(3)
            .map(|(group, v)| format!("{} {:+.3}", group.name(), v))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "{:?} p={:.3} conf={:.2} risk={:.2} | {} | {} liq {:.2} spread {:.2} | kelly {:.3}",
            side,
            pred.probability,
            pred.confidence,
            pred.risk_score,
            drivers,
            input.context.market_regime,
            input.context.liquidity_score,
            input.context.spread_quality,
            pred.kelly_fraction,
        )
    }
}

impl Strategy for AdaptivePolicy {
    fn name(&self) -> &str {
        "adaptive"
    }

    fn ready(&self, symbol: &str, now_ms: u64) -> bool {
        match self.last_evaluated.get(symbol) {
            Some(last) => now_ms.saturating_sub(*last) >= self.config.signal_cooldown_ms,
            None => true,
        }
    }

    fn evaluate(&mut self, input: &DecisionInput<'_>) -> Option<TradingSignal> {
        self.last_evaluated.insert(input.symbol.to_string(), input.timestamp);

        let thresholds = Self::regime_adjusted(input.thresholds, input.context);
        let Some(side) = self.direction(input, &thresholds) else {
            debug!(
                "HOLD {}: p={:.3} conf={:.2} risk={:.2} confluence={:+.3}",
                input.symbol,
                input.prediction.probability,
                input.prediction.confidence,
                input.prediction.risk_score,
                input.prediction.features.mean()
            );
            return None;
        };

        if input.price <= Decimal::ZERO {
            return None;
        }
        let value = self.position_value(input.prediction.kelly_fraction, input.available_balance);
        let quantity = normalize_quantity(value / input.price, self.config.quantity_step);
        if quantity <= Decimal::ZERO {
            debug!("{:?} {} sized to zero (available {})", side, input.symbol, input.available_balance);
            return None;
        }

        let signal = TradingSignal {
            id: uuid::Uuid::new_v4(),
            symbol: input.symbol.to_string(),
            action: side,
            confidence: input.prediction.confidence,
            price: input.price,
            quantity,
            timestamp: input.timestamp,
            reasoning: Self::reasoning(side, input),
            prediction: input.prediction.clone(),
        };
        info!("Signal {} {}: {}", signal.symbol, quantity, signal.reasoning);

        if self.history.len() == SIGNAL_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(signal.clone());
        Some(signal)
    }

    fn set_config(&mut self, config: &TradingConfig) {
        self.config = config.clone();
    }

    fn recent_signals(&self) -> Vec<TradingSignal> {
        self.history.iter().cloned().collect()
    }
}
