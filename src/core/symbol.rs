//! One instrument's closed loop: tick -> indicators -> prediction -> decision -> portfolio,
//! with closed trades fed straight back into the model. Synchronous and deterministic given
//! its inputs; the async worker in `engine.rs` owns one of these per symbol.

use crate::config::{ConfigPatch, TradingConfig};
use crate::feedback::TradeOutcome;
use crate::indicators::{IndicatorEngine, IndicatorSet, MarketContext};
use crate::portfolio::{PortfolioManager, PortfolioState, PositionEvent};
use crate::prediction::{PredictionEngine, PredictionInput, PredictionOutput};
use crate::strategies::adaptive::AdaptivePolicy;
use crate::strategies::traits::{DecisionInput, Strategy};
use crate::types::{BookLevel, EngineEvent, EngineSnapshot, PriceTick};
use crate::utils::precision::to_decimal;
use tracing::{debug, info, warn};

pub struct SymbolEngine<S: Strategy = AdaptivePolicy> {
    symbol: String,
    config: TradingConfig,
    indicators: IndicatorEngine,
    prediction: PredictionEngine,
    policy: S,
    portfolio: PortfolioManager,
    last_indicators: Option<IndicatorSet>,
    last_context: Option<MarketContext>,
    last_prediction: Option<PredictionOutput>,
}

impl SymbolEngine<AdaptivePolicy> {
    pub fn new(symbol: impl Into<String>, config: &TradingConfig) -> Self {
        Self::with_strategy(symbol, config, AdaptivePolicy::new(config))
    }
}

impl<S: Strategy> SymbolEngine<S> {
    pub fn with_strategy(symbol: impl Into<String>, config: &TradingConfig, policy: S) -> Self {
        let symbol = symbol.into();
        debug!("{}: {} decision policy", symbol, policy.name());
        Self {
            symbol,
            config: config.clone(),
            indicators: IndicatorEngine::new(),
            prediction: PredictionEngine::new(config),
            policy,
            portfolio: PortfolioManager::new(config),
            last_indicators: None,
            last_context: None,
            last_prediction: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn config(&self) -> &TradingConfig {
        &self.config
    }

    pub fn indicators(&self) -> &IndicatorEngine {
        &self.indicators
    }

    pub fn prediction(&self) -> &PredictionEngine {
        &self.prediction
    }

    pub fn portfolio(&self) -> &PortfolioManager {
        &self.portfolio
    }

    pub fn portfolio_mut(&mut self) -> &mut PortfolioManager {
        &mut self.portfolio
    }

    /// Replaces the default portfolio with a persisted one.
    pub fn recover(&mut self, state: PortfolioState, now_ms: u64) {
        self.portfolio = PortfolioManager::recover(&self.config, state, now_ms);
    }

    pub fn warm_start(&mut self, outcomes: Vec<TradeOutcome>) -> usize {
        let total = outcomes.len();
        let accepted = self.prediction.warm_start(outcomes);
        info!("{}: warm start replayed {}/{} outcomes", self.symbol, accepted, total);
        accepted
    }

    /// Full book update; the mid is taken from the best levels.
    pub fn on_book(&mut self, bids: &[BookLevel], asks: &[BookLevel], timestamp: u64) -> Vec<EngineEvent> {
        match PriceTick::from_levels(self.symbol.clone(), bids, asks, timestamp) {
            Some(tick) => self.on_tick(&tick),
            None => {
                debug!("{}: empty book side dropped", self.symbol);
                Vec::new()
            }
        }
    }

    pub fn on_tick(&mut self, tick: &PriceTick) -> Vec<EngineEvent> {
        if tick.symbol != self.symbol {
            debug!("{}: dropped tick for {}", self.symbol, tick.symbol);
            return Vec::new();
        }
        if let Err(reason) = tick.validate() {
            debug!("{}: dropped tick: {}", self.symbol, reason);
            return Vec::new();
        }
        let Some(price) = to_decimal(tick.mid) else {
            return Vec::new();
        };
        let now = tick.timestamp;

        self.indicators.on_tick(tick);
        let indicators = self.indicators.calculate();
        let atr = indicators.as_ref().map(|ind| ind.atr);

        let mut events = Vec::new();
        let position_events = self.portfolio.on_price(price, atr, now);
        let portfolio_changed = !position_events.is_empty();
        for event in position_events {
            match event {
                PositionEvent::PartiallyClosed { position, .. } => {
                    events.push(EngineEvent::PositionUpdated(position));
                }
                PositionEvent::Closed { position, outcome } => {
                    events.push(EngineEvent::PositionClosed { id: position.id, position });
                    self.feed_back(&outcome);
                    events.push(EngineEvent::TradeClosed(outcome));
                }
            }
        }
        if portfolio_changed {
            events.push(EngineEvent::PortfolioUpdated(self.portfolio.portfolio().clone()));
        }

        let Some(ind) = indicators else {
            return events;
        };
        let context = self.indicators.context(&ind);
        self.prediction.observe_clock(now);

        if self.policy.ready(&self.symbol, now) {
            let prediction = self.prediction.predict(PredictionInput {
                indicators: &ind,
                context: &context,
                imbalance: tick.imbalance(),
            });
            let decision = self.policy.evaluate(&DecisionInput {
                symbol: &self.symbol,
                price,
                timestamp: now,
                prediction: &prediction,
                context: &context,
                thresholds: self.prediction.effective_thresholds(now),
                available_balance: self.portfolio.portfolio().available_balance,
            });
            if let Some(signal) = decision {
                self.prediction.record_signal(now);
                events.push(EngineEvent::Signal(signal.clone()));

                match self.portfolio.add_position(
                    &self.symbol,
                    signal.action,
                    signal.quantity,
                    signal.price,
                    prediction.clone(),
                    now,
                ) {
                    Ok(id) => {
                        if let Some(position) = self.portfolio.position(id) {
                            events.push(EngineEvent::PositionOpened(position.clone()));
                        }
                        events.push(EngineEvent::PortfolioUpdated(self.portfolio.portfolio().clone()));
                    }
                    Err(reason) => {
                        warn!("{}: {:?} rejected: {}", self.symbol, signal.action, reason);
                        events.push(EngineEvent::PositionRejected {
                            symbol: self.symbol.clone(),
                            side: signal.action,
                            reason,
                        });
                    }
                }
            }
            self.last_prediction = Some(prediction);
        }

        self.last_indicators = Some(ind);
        self.last_context = Some(context);
        events
    }

    fn feed_back(&mut self, outcome: &TradeOutcome) {
        if let Err(e) = self.prediction.update_model(outcome.clone()) {
            warn!("{}: outcome for {} not learned: {}", self.symbol, outcome.position_id, e);
        }
    }

    pub fn update_config(&mut self, patch: &ConfigPatch) {
        self.config.apply(patch);
        self.prediction.apply_config(&self.config, patch.touches_thresholds());
        self.policy.set_config(&self.config);
        self.portfolio.set_config(&self.config);
        info!("{}: configuration updated", self.symbol);
    }

    pub fn reset_model(&mut self) {
        self.prediction.reset();
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            symbol: self.symbol.clone(),
            portfolio: self.portfolio.portfolio().clone(),
            open_positions: self.portfolio.open_positions().cloned().collect(),
            indicators: self.last_indicators.clone(),
            context: self.last_context.clone(),
            last_prediction: self.last_prediction.clone(),
            recent_signals: self.policy.recent_signals(),
            performance: self.prediction.performance(),
            thresholds: self.prediction.thresholds(),
            weights: self.prediction.weights(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prediction::AdaptiveThresholds;
    use crate::types::Side;
    use rust_decimal_macros::dec;

    fn tick(mid: f64, ts: u64) -> PriceTick {
        PriceTick::new("BTCUSDT", mid - 0.01, mid + 0.01, 5.0, 5.0, ts)
    }

    #[test]
    fn invalid_ticks_never_reach_indicators() {
        let mut engine = SymbolEngine::new("BTCUSDT", &TradingConfig::default());
        engine.on_tick(&tick(100.0, 0));
        let before = engine.indicators().len();

        let crossed = PriceTick::new("BTCUSDT", 101.0, 100.0, 1.0, 1.0, 1);
        assert!(engine.on_tick(&crossed).is_empty());
        assert!(engine.on_tick(&PriceTick::new("BTCUSDT", f64::NAN, 100.0, 1.0, 1.0, 2)).is_empty());
        assert!(engine.on_tick(&PriceTick::new("ETHUSDT", 99.99, 100.01, 5.0, 5.0, 3)).is_empty());
        assert_eq!(engine.indicators().len(), before);
    }

    #[test]
    fn closed_trade_feeds_the_model() {
        let mut engine = SymbolEngine::new("BTCUSDT", &TradingConfig::default());
        let id = engine
            .portfolio_mut()
            .add_position("BTCUSDT", Side::Buy, dec!(1), dec!(100), PredictionOutput::neutral(), 0)
            .unwrap();

        let events = engine.on_tick(&tick(99.5, 1_000));
        assert!(events
            .iter()
            .any(|e| matches!(e, EngineEvent::PositionClosed { id: closed, .. } if *closed == id)));
        let outcome = events
            .iter()
            .find_map(|e| match e {
                EngineEvent::TradeClosed(o) => Some(o),
                _ => None,
            })
            .unwrap();
        assert_eq!(outcome.exit_reason, "stop loss");
        assert!(outcome.realized_return < 0.0);
        assert_eq!(engine.prediction().training_len(), 1);
        assert!(events.iter().any(|e| matches!(e, EngineEvent::PortfolioUpdated(_))));
    }

    #[test]
    fn indicators_appear_after_warmup() {
        let mut engine = SymbolEngine::new("BTCUSDT", &TradingConfig::default());
        for i in 0..25 {
            engine.on_tick(&tick(100.0 + i as f64 * 0.4, i * 1_000));
        }
        let snap = engine.snapshot();
        assert!(snap.indicators.is_some());
        assert!(snap.context.unwrap().market_regime.is_bullish());
        assert!(snap.last_prediction.is_some());
        assert_eq!(snap.portfolio.equity, snap.portfolio.base_capital + snap.portfolio.total_pnl + snap.portfolio.locked_profits);
    }

    #[test]
    fn book_levels_become_ticks() {
        let mut engine = SymbolEngine::new("BTCUSDT", &TradingConfig::default());
        let bids = [BookLevel { price: 99.9, quantity: 1.0 }];
        let asks = [BookLevel { price: 100.1, quantity: 2.0 }];
        engine.on_book(&bids, &asks, 0);
        assert!((engine.indicators().last_price().unwrap() - 100.0).abs() < 1e-9);
        engine.on_book(&[], &asks, 1);
        assert_eq!(engine.indicators().len(), 1);
    }

    #[test]
    fn non_finite_patch_does_not_stall_the_loop() {
        let mut engine = SymbolEngine::new("BTCUSDT", &TradingConfig::default());
        engine.update_config(&ConfigPatch {
            kelly_cap: Some(f64::NAN),
            min_probability: Some(f64::NAN),
            ..Default::default()
        });
        assert!(engine.config().kelly_cap.is_finite());
        for i in 0..30 {
            engine.on_tick(&tick(100.0 + i as f64 * 0.3, i * 1_000));
        }
        let snap = engine.snapshot();
        let prediction = snap.last_prediction.unwrap();
        assert!((0.0..=0.25).contains(&prediction.kelly_fraction));
        assert!(snap.thresholds.min_probability.is_finite());
    }

    #[test]
    fn config_patch_reaches_every_component() {
        let mut engine = SymbolEngine::new("BTCUSDT", &TradingConfig::default());
        engine.update_config(&ConfigPatch {
            min_probability: Some(0.65),
            max_open_positions: Some(1),
            ..Default::default()
        });
        assert_eq!(engine.prediction().thresholds().min_probability, 0.65);
        assert_eq!(engine.config().max_open_positions, 1);

        engine.update_config(&ConfigPatch {
            kelly_enabled: Some(false),
            ..Default::default()
        });
        assert_eq!(engine.prediction().thresholds().min_probability, 0.65);

        engine.reset_model();
        assert_eq!(
            engine.prediction().thresholds(),
            AdaptiveThresholds::from_config(engine.config())
        );
    }
}
