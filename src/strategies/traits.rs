// src/strategies/traits.rs
use crate::config::TradingConfig;
use crate::indicators::MarketContext;
use crate::prediction::{AdaptiveThresholds, PredictionOutput};
use crate::types::TradingSignal;
use rust_decimal::Decimal;

/// Everything a decision policy may look at for one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct DecisionInput<'a> {
    pub symbol: &'a str,
    pub price: Decimal,
    pub timestamp: u64,
    pub prediction: &'a PredictionOutput,
    pub context: &'a MarketContext,
    /// Thresholds after drought relaxation, before regime adjustment.
    pub thresholds: AdaptiveThresholds,
    pub available_balance: Decimal,
}

pub trait Strategy: Send {
    fn name(&self) -> &str;

    // Cooldown gate, checked before a prediction is computed
    fn ready(&self, symbol: &str, now_ms: u64) -> bool;

    // None means HOLD
    fn evaluate(&mut self, input: &DecisionInput<'_>) -> Option<TradingSignal>;

    fn set_config(&mut self, config: &TradingConfig);

    /// Most recent signals, oldest first.
    fn recent_signals(&self) -> Vec<TradingSignal>;
}
