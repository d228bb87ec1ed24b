//! Exit triggers evaluated on every tick for every open position.
//!
//! Order matters, first match wins:
//!   1. time horizon reached          -> full exit
//!   2. next partial-profit tier hit  -> partial exit
//!   3. trailing stop touched         -> full exit
//!   4. adverse move beyond stop      -> full exit
//!   5. favourable move hits target   -> full exit

use super::position::{Position, PositionTracking};
use crate::config::TradingConfig;
use crate::types::Side;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExitKind {
    TimeHorizon,
    PartialProfit { level: f64 },
    TrailingStop,
    StopLoss,
    ProfitTarget,
}

impl ExitKind {
    pub fn is_partial(&self) -> bool {
        matches!(self, ExitKind::PartialProfit { .. })
    }

    pub fn reason(&self) -> String {
        match self {
            ExitKind::TimeHorizon => "time horizon".to_string(),
            ExitKind::PartialProfit { level } => format!("partial profit @{}%", trim_pct(*level)),
            ExitKind::TrailingStop => "trailing stop".to_string(),
            ExitKind::StopLoss => "stop loss".to_string(),
            ExitKind::ProfitTarget => "profit target".to_string(),
        }
    }
}

fn trim_pct(level: f64) -> String {
    let pct = format!("{:.3}", level * 100.0);
    pct.trim_end_matches('0').trim_end_matches('.').to_string()
}

pub fn evaluate(
    pos: &Position,
    track: &PositionTracking,
    price: f64,
    now_ms: u64,
    cfg: &TradingConfig,
) -> Option<ExitKind> {
    let prediction = &track.prediction;
    let ret = pos.return_at(price);

    let held_secs = now_ms.saturating_sub(track.entry_time) as f64 / 1_000.0;
    let max_hold = prediction.time_horizon_secs.min(cfg.max_hold_secs as f64);
    if held_secs >= max_hold {
        return Some(ExitKind::TimeHorizon);
    }

    if let Some(level) = cfg.partial_profit_levels.get(track.partial_tiers_taken) {
        if ret >= *level {
            return Some(ExitKind::PartialProfit { level: *level });
        }
    }

    if let Some(stop) = track.trailing_stop {
        let touched = match pos.side {
            Side::Buy => price <= stop,
            Side::Sell => price >= stop,
        };
        if touched {
            return Some(ExitKind::TrailingStop);
        }
    }

    let stop_distance = prediction.max_adverse_excursion.max(cfg.stop_loss_percentage);
    if ret <= -stop_distance {
        return Some(ExitKind::StopLoss);
    }

    // The full target never undercuts a tier still to be taken.
    let ladder_top = if track.partial_tiers_taken < cfg.partial_profit_levels.len() {
        cfg.partial_profit_levels.last().copied().unwrap_or(0.0)
    } else {
        0.0
    };
    let target = prediction
        .expected_return
        .abs()
        .max(cfg.take_profit_percentage)
        .max(ladder_top);
    if ret >= target {
        return Some(ExitKind::ProfitTarget);
    }

    None
}

/// Moves the trailing stop toward price, never away from it. Inactive until the position
/// has been at least `trailing_activation_percentage` in profit.
pub fn ratchet_trailing(
    side: Side,
    track: &PositionTracking,
    price: f64,
    atr: f64,
    cfg: &TradingConfig,
) -> Option<f64> {
    if !cfg.trailing_stop_enabled || !(atr > 0.0) || !price.is_finite() {
        return track.trailing_stop;
    }
    if track.max_favorable_excursion < cfg.trailing_activation_percentage {
        return track.trailing_stop;
    }
    let distance = atr * cfg.trailing_stop_atr_multiplier;
    let candidate = match side {
        Side::Buy => price - distance,
        Side::Sell => price + distance,
    };
    Some(match (side, track.trailing_stop) {
        (Side::Buy, Some(prev)) => candidate.max(prev),
        (Side::Sell, Some(prev)) => candidate.min(prev),
        (_, None) => candidate,
    })
}
