//! Trade outcomes: the only input the adaptive model learns from.

use crate::error::OutcomeError;
use crate::portfolio::PositionId;
use crate::prediction::PredictionOutput;
use crate::types::Side;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Largest absolute realized return (as a fraction) accepted into the training buffer.
pub const MAX_ABS_RETURN: f64 = 0.5;

/// Immutable record of one fully closed position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub position_id: PositionId,
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub exit_price: f64,
    pub initial_size: Decimal,
    pub realized_pnl: Decimal,
    /// Realized P&L over entry notional.
    pub realized_return: f64,
    pub holding_time_ms: u64,
    pub max_favorable_excursion: f64,
    pub max_adverse_excursion: f64,
    pub exit_reason: String,
    pub prediction: PredictionOutput,
    pub closed_at: u64,
}

impl TradeOutcome {
    pub fn validate(&self) -> Result<(), OutcomeError> {
        if !self.entry_price.is_finite() || !self.exit_price.is_finite() {
            return Err(OutcomeError::NonFinite("price"));
        }
        if self.entry_price <= 0.0 || self.exit_price <= 0.0 {
            return Err(OutcomeError::NonPositivePrice {
                entry: self.entry_price,
                exit: self.exit_price,
            });
        }
        if !self.realized_return.is_finite() {
            return Err(OutcomeError::NonFinite("realized_return"));
        }
        if !self.max_favorable_excursion.is_finite() || !self.max_adverse_excursion.is_finite() {
            return Err(OutcomeError::NonFinite("excursion"));
        }
        if self.realized_return.abs() > MAX_ABS_RETURN {
            return Err(OutcomeError::ReturnOutOfBounds(self.realized_return));
        }
        if self.prediction.features.0.iter().any(|v| !v.is_finite()) {
            return Err(OutcomeError::NonFinite("features"));
        }
        Ok(())
    }

    pub fn is_win(&self) -> bool {
        self.realized_return > 0.0
    }
}

/// Durable home for trade outcomes, owned by the persistence collaborator.
#[async_trait]
pub trait OutcomeRepository: Send + Sync {
    async fn save(&self, outcome: &TradeOutcome) -> Result<()>;

    /// Newest `n` outcomes, oldest first.
    async fn load_recent(&self, n: usize) -> Result<Vec<TradeOutcome>>;
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::prediction::FeatureVector;

    pub fn outcome(side: Side, realized_return: f64, features: [f64; 5]) -> TradeOutcome {
        let entry = 100.0;
        let exit = entry * (1.0 + realized_return * side.sign());
        TradeOutcome {
            position_id: PositionId(0),
            symbol: "BTCUSDT".to_string(),
            side,
            entry_price: entry,
            exit_price: exit,
            initial_size: Decimal::ONE,
            realized_pnl: Decimal::try_from(realized_return * entry).unwrap_or_default(),
            realized_return,
            holding_time_ms: 30_000,
            max_favorable_excursion: realized_return.max(0.0),
            max_adverse_excursion: realized_return.min(0.0),
            exit_reason: "test".to_string(),
            prediction: PredictionOutput {
                features: FeatureVector(features),
                ..PredictionOutput::neutral()
            },
            closed_at: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::outcome;
    use super::*;

    #[test]
    fn corrupt_outcomes_are_rejected() {
        let ok = outcome(Side::Buy, 0.01, [0.0; 5]);
        assert!(ok.validate().is_ok());

        let mut bad = ok.clone();
        bad.entry_price = 0.0;
        assert!(matches!(bad.validate(), Err(OutcomeError::NonPositivePrice { .. })));

        let mut bad = ok.clone();
        bad.realized_return = 0.9;
        assert_eq!(bad.validate(), Err(OutcomeError::ReturnOutOfBounds(0.9)));

        let mut bad = ok;
        bad.max_adverse_excursion = f64::NAN;
        assert_eq!(bad.validate(), Err(OutcomeError::NonFinite("excursion")));
    }
}
