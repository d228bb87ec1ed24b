// src/types.rs
use crate::config::ConfigPatch;
use crate::indicators::{IndicatorSet, MarketContext};
use crate::portfolio::{Portfolio, Position, PositionId};
use crate::prediction::{AdaptiveThresholds, ModelWeights, PerformanceMetrics, PredictionOutput};
use crate::feedback::TradeOutcome;
use crate::error::{EngineError, RejectReason};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for longs, -1 for shorts.
    pub fn sign(self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }

    pub fn decimal_sign(self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

/// One price level of the order book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub quantity: f64,
}

/// Top-of-book update for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub mid: f64, // Mid-Price
    pub bid_volume: f64,
    pub ask_volume: f64,
    pub timestamp: u64, // ms
}

impl PriceTick {
    pub fn new(symbol: impl Into<String>, bid: f64, ask: f64, bid_volume: f64, ask_volume: f64, timestamp: u64) -> Self {
        Self {
            symbol: symbol.into(),
            bid,
            ask,
            mid: (bid + ask) / 2.0,
            bid_volume,
            ask_volume,
            timestamp,
        }
    }

    /// Builds a tick from full book sides: best bid is the highest bid, best ask the lowest ask,
    /// volumes are summed over the supplied levels. `None` when either side is empty.
    pub fn from_levels(symbol: impl Into<String>, bids: &[BookLevel], asks: &[BookLevel], timestamp: u64) -> Option<Self> {
        let best_bid = bids.iter().map(|l| l.price).fold(None, |acc: Option<f64>, p| {
            Some(acc.map_or(p, |a| a.max(p)))
        })?;
        let best_ask = asks.iter().map(|l| l.price).fold(None, |acc: Option<f64>, p| {
            Some(acc.map_or(p, |a| a.min(p)))
        })?;
        let bid_volume = bids.iter().map(|l| l.quantity).sum();
        let ask_volume = asks.iter().map(|l| l.quantity).sum();
        Some(Self::new(symbol, best_bid, best_ask, bid_volume, ask_volume, timestamp))
    }

    /// Rejects non-finite, non-positive and crossed quotes.
    pub fn validate(&self) -> crate::error::Result<()> {
        let invalid = |message: String| -> crate::error::Result<()> { Err(EngineError::InvalidTick { message }) };
        let fields = [self.bid, self.ask, self.mid, self.bid_volume, self.ask_volume];
        if fields.iter().any(|v| !v.is_finite()) {
            return invalid("non-finite field".to_string());
        }
        if self.bid <= 0.0 || self.ask <= 0.0 {
            return invalid(format!("non-positive quote bid={} ask={}", self.bid, self.ask));
        }
        if self.ask < self.bid {
            return invalid(format!("crossed book bid={} ask={}", self.bid, self.ask));
        }
        if self.bid_volume < 0.0 || self.ask_volume < 0.0 {
            return invalid("negative volume".to_string());
        }
        Ok(())
    }

    pub fn total_volume(&self) -> f64 {
        self.bid_volume + self.ask_volume
    }

    /// (bid - ask) / (bid + ask) volume imbalance, 0 on an empty book.
    pub fn imbalance(&self) -> f64 {
        let total = self.total_volume();
        if total > 0.0 {
            (self.bid_volume - self.ask_volume) / total
        } else {
            0.0
        }
    }
}

/// Actionable recommendation. Never constructed for HOLD.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
    pub id: uuid::Uuid,
    pub symbol: String,
    pub action: Side,
    pub confidence: f64,
    pub price: Decimal,
    pub quantity: Decimal,
    pub timestamp: u64,
    pub reasoning: String,
    pub prediction: PredictionOutput,
}

/// Read-only projection handed to presentation and persistence collaborators.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub symbol: String,
    pub portfolio: Portfolio,
    pub open_positions: Vec<Position>,
    pub indicators: Option<IndicatorSet>,
    pub context: Option<MarketContext>,
    pub last_prediction: Option<PredictionOutput>,
    pub recent_signals: Vec<TradingSignal>,
    pub performance: PerformanceMetrics,
    pub thresholds: AdaptiveThresholds,
    pub weights: ModelWeights,
}

/// Fire-and-forget events published by a symbol worker.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Signal(TradingSignal),
    PositionOpened(Position),
    PositionUpdated(Position),
    PositionRejected { symbol: String, side: Side, reason: RejectReason },
    PositionClosed { id: PositionId, position: Position },
    TradeClosed(TradeOutcome),
    PortfolioUpdated(Portfolio),
}

impl EngineEvent {
    /// Events after which the persisted portfolio snapshot is stale.
    pub fn mutates_portfolio(&self) -> bool {
        matches!(
            self,
            EngineEvent::PositionOpened(_) | EngineEvent::PositionUpdated(_) | EngineEvent::PositionClosed { .. }
        )
    }
}

/// Control messages accepted by a running symbol worker.
#[derive(Debug)]
pub enum EngineCommand {
    UpdateConfig(ConfigPatch),
    ResetModel,
    Snapshot(oneshot::Sender<EngineSnapshot>),
}
