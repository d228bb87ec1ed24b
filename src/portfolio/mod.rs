//! Virtual portfolio: risk-checked opens, per-tick marking, exit handling, profit locking.
//!
//! Open positions live in a dense table owned by [`PortfolioManager`], keyed by a stable
//! [`PositionId`]. Fully closed positions move to a bounded history and their P&L is folded
//! into running totals. Totals are only ever produced by [`PortfolioManager::recalculate`].

pub mod exits;
pub mod position;

pub use exits::ExitKind;
pub use position::{Position, PositionId, PositionStatus, PositionTracking};

use crate::config::TradingConfig;
use crate::error::RejectReason;
use crate::feedback::TradeOutcome;
use crate::prediction::PredictionOutput;
use crate::types::Side;
use crate::utils::precision::{normalize_quantity, round_money, to_decimal, to_f64};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::{info, warn};

const DAY_MS: u64 = 86_400_000;
/// Closed positions kept for lookups after they leave the open table.
pub const CLOSED_HISTORY: usize = 200;

/// Account totals, all rounded to money precision.
///
/// `equity == base_capital + total_pnl + locked_profits` and
/// `available_balance == equity - locked_profits - open exposure`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub base_capital: Decimal,
    pub available_balance: Decimal,
    pub locked_profits: Decimal,
    pub total_pnl: Decimal,
    pub day_pnl: Decimal,
    pub equity: Decimal,
}

impl Portfolio {
    pub fn new(base_capital: Decimal) -> Self {
        Self {
            base_capital,
            available_balance: base_capital,
            locked_profits: Decimal::ZERO,
            total_pnl: Decimal::ZERO,
            day_pnl: Decimal::ZERO,
            equity: base_capital,
        }
    }
}

/// What persistence keeps to resume a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    pub portfolio: Portfolio,
    pub open_positions: Vec<Position>,
    /// UTC day (`ms / 86_400_000`) that `portfolio.day_pnl` covers.
    #[serde(default)]
    pub day: u64,
    #[serde(default)]
    pub next_id: u64,
}

/// Side effects of marking positions to a new price.
#[derive(Debug, Clone)]
pub enum PositionEvent {
    PartiallyClosed {
        position: Position,
        closed_size: Decimal,
        pnl: Decimal,
        reason: String,
    },
    Closed {
        position: Position,
        outcome: TradeOutcome,
    },
}

#[derive(Debug, Clone)]
pub struct PortfolioManager {
    config: TradingConfig,
    portfolio: Portfolio,
    open: Vec<Position>,
    closed: VecDeque<Position>,
    tracking: HashMap<PositionId, PositionTracking>,
    /// Realized P&L of every fully closed position, earlier sessions included.
    closed_pnl: Decimal,
    /// Part of `closed_pnl` realized on `current_day`.
    closed_day_pnl: Decimal,
    current_day: u64,
    next_id: u64,
}

impl PortfolioManager {
    pub fn new(config: &TradingConfig) -> Self {
        Self {
            config: config.clone(),
            portfolio: Portfolio::new(config.base_capital),
            open: Vec::new(),
            closed: VecDeque::with_capacity(CLOSED_HISTORY),
            tracking: HashMap::new(),
            closed_pnl: Decimal::ZERO,
            closed_day_pnl: Decimal::ZERO,
            current_day: 0,
            next_id: 0,
        }
    }

    /// Resumes from persisted state. Open positions keep their ids and are tracked with a
    /// neutral prediction, since the entry prediction is not persisted. Closed P&L, and the
    /// day's share of it when the snapshot is from the same UTC day, carries over.
    pub fn recover(config: &TradingConfig, state: PortfolioState, now_ms: u64) -> Self {
        let mut manager = Self::new(config);
        manager.portfolio.base_capital = state.portfolio.base_capital;
        manager.portfolio.locked_profits = state.portfolio.locked_profits;
        manager.current_day = now_ms / DAY_MS;

        let mut open_pnl = Decimal::ZERO;
        let mut open_day_pnl = Decimal::ZERO;
        let mut next_id = state.next_id;
        for pos in state.open_positions.into_iter().filter(|p| p.is_open()) {
            let pnl = pos.realized_pnl + pos.unrealized_pnl;
            open_pnl += pnl;
            if pos.timestamp / DAY_MS == state.day {
                open_day_pnl += pnl;
            }
            next_id = next_id.max(pos.id.0 + 1);
            manager
                .tracking
                .insert(pos.id, PositionTracking::new(PredictionOutput::neutral(), pos.timestamp));
            manager.open.push(pos);
        }
        manager.next_id = next_id;
        manager.closed_pnl =
            round_money(state.portfolio.total_pnl + state.portfolio.locked_profits - open_pnl);
        if state.day == manager.current_day {
            manager.closed_day_pnl = round_money(state.portfolio.day_pnl - open_day_pnl);
        }
        manager.recalculate();
        info!(
            "Recovered portfolio: equity {}, day P&L {}, {} open positions",
            manager.portfolio.equity,
            manager.portfolio.day_pnl,
            manager.open.len()
        );
        manager
    }

    pub fn set_config(&mut self, config: &TradingConfig) {
        self.config = config.clone();
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    /// Open positions first, then the closed history.
    pub fn position(&self, id: PositionId) -> Option<&Position> {
        self.open
            .iter()
            .find(|p| p.id == id)
            .or_else(|| self.closed.iter().rev().find(|p| p.id == id))
    }

    pub fn tracking(&self, id: PositionId) -> Option<&PositionTracking> {
        self.tracking.get(&id)
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.open.iter()
    }

    /// Most recent fully closed positions, oldest first.
    pub fn closed_positions(&self) -> impl Iterator<Item = &Position> {
        self.closed.iter()
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn state(&self) -> PortfolioState {
        PortfolioState {
            portfolio: self.portfolio.clone(),
            open_positions: self.open.clone(),
            day: self.current_day,
            next_id: self.next_id,
        }
    }

    /// Re-derives every total from the open positions and the closed running totals.
    /// Idempotent.
    pub fn recalculate(&mut self) -> &Portfolio {
        let mut realized = self.closed_pnl;
        let mut unrealized = Decimal::ZERO;
        let mut exposure = Decimal::ZERO;
        let mut day_pnl = self.closed_day_pnl;

        for pos in &self.open {
            realized += pos.realized_pnl;
            unrealized += pos.unrealized_pnl;
            exposure += pos.exposure();
            if pos.timestamp / DAY_MS == self.current_day {
                day_pnl += pos.realized_pnl + pos.unrealized_pnl;
            }
        }

        let locked = round_money(self.portfolio.locked_profits);
        let p = &mut self.portfolio;
        p.locked_profits = locked;
        p.total_pnl = round_money(realized + unrealized - locked);
        p.equity = round_money(p.base_capital + p.total_pnl + locked);
        p.available_balance = round_money(p.equity - locked - exposure);
        p.day_pnl = round_money(day_pnl);
        &self.portfolio
    }

    fn roll_day(&mut self, now_ms: u64) {
        let day = now_ms / DAY_MS;
        if day != self.current_day {
            self.current_day = day;
            self.closed_day_pnl = Decimal::ZERO;
            self.recalculate();
        }
    }

    /// Opens a position if every risk limit allows it. A rejection changes nothing.
    pub fn add_position(
        &mut self,
        symbol: &str,
        side: Side,
        size: Decimal,
        price: Decimal,
        prediction: PredictionOutput,
        now_ms: u64,
    ) -> Result<PositionId, RejectReason> {
        if size <= Decimal::ZERO || price <= Decimal::ZERO {
            return Err(RejectReason::InvalidOrder(format!("size {} @ {}", size, price)));
        }
        self.roll_day(now_ms);

        let value = round_money(size * price);
        let p = &self.portfolio;
        if p.available_balance < value {
            return Err(RejectReason::InsufficientBalance {
                required: value,
                available: p.available_balance,
            });
        }
        let open = self.open_count();
        if open >= self.config.max_open_positions {
            return Err(RejectReason::MaxOpenPositions {
                max: self.config.max_open_positions,
            });
        }
        if value > self.config.max_position_size {
            return Err(RejectReason::PositionTooLarge {
                value,
                max: self.config.max_position_size,
            });
        }
        if p.day_pnl.abs() >= self.config.max_daily_loss {
            return Err(RejectReason::DailyLossLimit {
                day_pnl: p.day_pnl,
                limit: self.config.max_daily_loss,
            });
        }

        let id = PositionId(self.next_id);
        self.next_id += 1;
        self.open.push(Position {
            id,
            symbol: symbol.to_string(),
            side,
            size,
            initial_size: size,
            entry_price: price,
            current_price: price,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            status: PositionStatus::Open,
            timestamp: now_ms,
            closed_at: None,
            exit_reason: None,
        });
        self.tracking.insert(id, PositionTracking::new(prediction, now_ms));
        self.recalculate();

        info!(
            "Opened {} {:?} {} {} @ {} (value {}, available {})",
            id, side, size, symbol, price, value, self.portfolio.available_balance
        );
        Ok(id)
    }

    /// Marks every open position to `price`, ratchets trailing stops and fires at most one
    /// exit per position.
    pub fn on_price(&mut self, price: Decimal, atr: Option<f64>, now_ms: u64) -> Vec<PositionEvent> {
        self.roll_day(now_ms);
        let price_f = to_f64(price);
        let mut exits = Vec::new();

        for pos in self.open.iter_mut() {
            pos.mark(price);
            let Some(track) = self.tracking.get_mut(&pos.id) else {
                continue;
            };
            track.record_excursion(pos.return_at(price_f));
            track.trailing_stop =
                exits::ratchet_trailing(pos.side, track, price_f, atr.unwrap_or(0.0), &self.config);

            if let Some(kind) = exits::evaluate(pos, track, price_f, now_ms, &self.config) {
                exits.push((pos.id, kind));
            }
        }
        self.recalculate();

        let mut events = Vec::with_capacity(exits.len());
        for (id, kind) in exits {
            let event = if kind.is_partial() {
                self.take_partial(id, price, kind, now_ms)
            } else {
                self.close_position(id, price, &kind.reason(), now_ms)
                    .and_then(|outcome| {
                        self.position(id).cloned().map(|position| PositionEvent::Closed { position, outcome })
                    })
            };
            events.extend(event);
        }
        events
    }

    fn take_partial(&mut self, id: PositionId, price: Decimal, kind: ExitKind, now_ms: u64) -> Option<PositionEvent> {
        let reason = kind.reason();
        let pos = self.position(id)?;
        let fraction = to_decimal(self.config.partial_exit_fraction).unwrap_or(Decimal::ZERO);
        let closed_size = normalize_quantity(pos.size * fraction, self.config.quantity_step);

        if closed_size <= Decimal::ZERO || closed_size >= pos.size {
            let outcome = self.close_position(id, price, &reason, now_ms)?;
            let position = self.position(id)?.clone();
            return Some(PositionEvent::Closed { position, outcome });
        }

        let pnl = pos.pnl_at(price, closed_size);
        self.lock_profit(pnl);
        let idx = self.open.iter().position(|p| p.id == id)?;
        let pos = &mut self.open[idx];
        pos.size -= closed_size;
        pos.realized_pnl = round_money(pos.realized_pnl + pnl);
        pos.status = PositionStatus::Partial;
        pos.mark(price);
        if let Some(track) = self.tracking.get_mut(&id) {
            track.partial_tiers_taken += 1;
        }
        self.recalculate();

        let position = self.open[idx].clone();
        info!("{} {}: closed {} for {}, {} remaining", id, reason, closed_size, pnl, position.size);
        Some(PositionEvent::PartiallyClosed {
            position,
            closed_size,
            pnl,
            reason,
        })
    }

    fn lock_profit(&mut self, pnl: Decimal) {
        if pnl > Decimal::ZERO && pnl >= self.config.profit_lock_min_threshold {
            let lock = round_money(pnl * self.config.profit_lock_percentage);
            self.portfolio.locked_profits += lock;
        }
    }

    /// Fully closes a position and returns its outcome. Unknown or already closed ids are a
    /// logged no-op.
    pub fn close_position(&mut self, id: PositionId, price: Decimal, reason: &str, now_ms: u64) -> Option<TradeOutcome> {
        let Some(idx) = self.open.iter().position(|p| p.id == id) else {
            warn!("close_position({}) ignored: unknown or already closed", id);
            return None;
        };
        self.roll_day(now_ms);

        let mut pos = self.open.remove(idx);
        let pnl = pos.pnl_at(price, pos.size);
        self.lock_profit(pnl);

        pos.current_price = price;
        pos.realized_pnl = round_money(pos.realized_pnl + pnl);
        pos.unrealized_pnl = Decimal::ZERO;
        pos.size = Decimal::ZERO;
        pos.status = PositionStatus::Closed;
        pos.closed_at = Some(now_ms);
        pos.exit_reason = Some(reason.to_string());

        self.closed_pnl = round_money(self.closed_pnl + pos.realized_pnl);
        if now_ms / DAY_MS == self.current_day {
            self.closed_day_pnl = round_money(self.closed_day_pnl + pos.realized_pnl);
        }
        if self.closed.len() == CLOSED_HISTORY {
            self.closed.pop_front();
        }
        self.closed.push_back(pos.clone());

        let track = self
            .tracking
            .remove(&id)
            .unwrap_or_else(|| PositionTracking::new(PredictionOutput::neutral(), pos.timestamp));
        self.recalculate();

        let entry = to_f64(pos.entry_price);
        let notional = entry * to_f64(pos.initial_size);
        let realized_return = if notional > 0.0 { to_f64(pos.realized_pnl) / notional } else { 0.0 };

        info!(
            "Closed {} ({}) @ {}: realized {}, equity {}",
            id, reason, price, pos.realized_pnl, self.portfolio.equity
        );

        Some(TradeOutcome {
            position_id: id,
            symbol: pos.symbol.clone(),
            side: pos.side,
            entry_price: entry,
            exit_price: to_f64(price),
            initial_size: pos.initial_size,
            realized_pnl: pos.realized_pnl,
            realized_return,
            holding_time_ms: now_ms.saturating_sub(track.entry_time),
            max_favorable_excursion: track.max_favorable_excursion,
            max_adverse_excursion: track.max_adverse_excursion,
            exit_reason: reason.to_string(),
            prediction: track.prediction,
            closed_at: now_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn manager_with(partial_profit_levels: Vec<f64>) -> PortfolioManager {
        PortfolioManager::new(&TradingConfig {
            max_position_size: dec!(100000),
            max_daily_loss: dec!(100000),
            trailing_stop_enabled: false,
            partial_profit_levels,
            ..TradingConfig::default()
        })
    }

    fn manager() -> PortfolioManager {
        manager_with(vec![])
    }

    fn prediction() -> PredictionOutput {
        PredictionOutput {
            time_horizon_secs: 180.0,
            expected_return: 0.5,
            max_adverse_excursion: 0.5,
            ..PredictionOutput::neutral()
        }
    }

    fn assert_identities(m: &PortfolioManager) {
        let p = m.portfolio();
        assert_eq!(p.equity, p.base_capital + p.total_pnl + p.locked_profits);
        let exposure: Decimal = m.open_positions().map(|p| p.exposure()).sum();
        assert_eq!(p.available_balance, p.equity - p.locked_profits - exposure);
    }

    #[test]
    fn unrealized_pnl_is_exact() {
        let mut m = manager();
        let id = m.add_position("BTCUSDT", Side::Buy, dec!(1), dec!(100), prediction(), 0).unwrap();
        m.on_price(dec!(102), None, 1_000);
        assert_eq!(m.position(id).unwrap().unrealized_pnl, dec!(2.0));
        assert_eq!(m.portfolio().equity, dec!(10002));
        assert_eq!(m.portfolio().available_balance, dec!(9900));
        assert_identities(&m);
    }

    #[test]
    fn rejection_leaves_portfolio_untouched() {
        let mut m = manager();
        let before = m.portfolio().clone();
        let err = m
            .add_position("BTCUSDT", Side::Buy, dec!(200), dec!(100), prediction(), 0)
            .unwrap_err();
        assert!(matches!(err, RejectReason::InsufficientBalance { .. }));
        assert_eq!(m.portfolio(), &before);
        assert_eq!(m.open_count(), 0);
        assert!(m.position(PositionId(0)).is_none());
    }

    #[test]
    fn every_risk_limit_rejects() {
        let cfg = TradingConfig {
            max_open_positions: 1,
            max_position_size: dec!(500),
            max_daily_loss: dec!(10),
            ..TradingConfig::default()
        };
        let mut m = PortfolioManager::new(&cfg);
        assert!(matches!(
            m.add_position("X", Side::Buy, dec!(6), dec!(100), prediction(), 0),
            Err(RejectReason::PositionTooLarge { .. })
        ));
        assert!(matches!(
            m.add_position("X", Side::Buy, dec!(0), dec!(100), prediction(), 0),
            Err(RejectReason::InvalidOrder(_))
        ));
        let id = m.add_position("X", Side::Buy, dec!(1), dec!(100), prediction(), 0).unwrap();
        assert!(matches!(
            m.add_position("X", Side::Buy, dec!(1), dec!(100), prediction(), 0),
            Err(RejectReason::MaxOpenPositions { max: 1 })
        ));
        m.close_position(id, dec!(80), "manual", 1_000).unwrap();
        assert!(matches!(
            m.add_position("X", Side::Buy, dec!(1), dec!(100), prediction(), 2_000),
            Err(RejectReason::DailyLossLimit { .. })
        ));
        // a new day resets the daily loss window
        assert!(m
            .add_position("X", Side::Buy, dec!(1), dec!(100), prediction(), DAY_MS + 1)
            .is_ok());
    }

    #[test]
    fn profit_lock_takes_configured_share() {
        let mut m = manager();
        let id = m.add_position("BTCUSDT", Side::Buy, dec!(1), dec!(100), prediction(), 0).unwrap();
        let outcome = m.close_position(id, dec!(150), "manual", 5_000).unwrap();
        assert_eq!(outcome.realized_pnl, dec!(50));
        assert_eq!(m.portfolio().locked_profits, dec!(40));
        assert_eq!(m.portfolio().equity, dec!(10050));
        assert_eq!(m.portfolio().available_balance, dec!(10010));
        assert!((outcome.realized_return - 0.5).abs() < 1e-12);
        assert_eq!(outcome.holding_time_ms, 5_000);
        assert!(m.tracking(id).is_none());
        assert_identities(&m);
    }

    #[test]
    fn losses_are_never_locked() {
        let mut m = manager();
        let id = m.add_position("BTCUSDT", Side::Sell, dec!(1), dec!(100), prediction(), 0).unwrap();
        let outcome = m.close_position(id, dec!(110), "manual", 1).unwrap();
        assert_eq!(outcome.realized_pnl, dec!(-10));
        assert_eq!(m.portfolio().locked_profits, Decimal::ZERO);
        assert_eq!(m.portfolio().equity, dec!(9990));
    }

    #[test]
    fn closing_twice_is_a_noop() {
        let mut m = manager();
        let id = m.add_position("BTCUSDT", Side::Buy, dec!(1), dec!(100), prediction(), 0).unwrap();
        assert!(m.close_position(id, dec!(101), "manual", 1).is_some());
        let after = m.portfolio().clone();
        assert!(m.close_position(id, dec!(200), "manual", 2).is_none());
        assert!(m.close_position(PositionId(99), dec!(200), "manual", 2).is_none());
        assert_eq!(m.portfolio(), &after);
    }

    #[test]
    fn recalculation_is_idempotent() {
        let mut m = manager();
        m.add_position("BTCUSDT", Side::Buy, dec!(0.5), dec!(100), prediction(), 0).unwrap();
        m.add_position("BTCUSDT", Side::Sell, dec!(0.3), dec!(100), prediction(), 0).unwrap();
        m.on_price(dec!(100.123456789), None, 10);
        let first = m.recalculate().clone();
        let second = m.recalculate().clone();
        assert_eq!(first, second);
        assert_identities(&m);
    }

    #[test]
    fn partial_ladder_then_full_exit() {
        let mut m = manager_with(vec![0.003, 0.006]);
        let id = m.add_position("BTCUSDT", Side::Buy, dec!(1), dec!(100), prediction(), 0).unwrap();

        let events = m.on_price(dec!(100.35), None, 1_000);
        assert!(matches!(&events[..], [PositionEvent::PartiallyClosed { closed_size, .. }] if *closed_size == dec!(0.5)));
        let pos = m.position(id).unwrap();
        assert_eq!(pos.status, PositionStatus::Partial);
        assert_eq!(pos.size, dec!(0.5));
        assert_eq!(pos.realized_pnl, dec!(0.175));
        assert_eq!(m.tracking(id).unwrap().partial_tiers_taken, 1);
        assert_identities(&m);

        let events = m.on_price(dec!(100.7), None, 2_000);
        assert!(matches!(&events[..], [PositionEvent::PartiallyClosed { .. }]));
        assert_eq!(m.position(id).unwrap().size, dec!(0.25));

        let events = m.on_price(dec!(100.1), None, 181_000);
        match &events[..] {
            [PositionEvent::Closed { position, outcome }] => {
                assert_eq!(position.status, PositionStatus::Closed);
                assert_eq!(outcome.exit_reason, "time horizon");
                assert!(outcome.max_favorable_excursion >= 0.007 - 1e-12);
            }
            other => panic!("unexpected events {:?}", other),
        }
        assert_eq!(m.open_count(), 0);
        assert_identities(&m);
    }

    #[test]
    fn trailing_stop_closes_after_pullback() {
        let mut m = PortfolioManager::new(&TradingConfig {
            partial_profit_levels: vec![],
            ..TradingConfig::default()
        });
        let pred = PredictionOutput {
            time_horizon_secs: 180.0,
            expected_return: 0.05,
            max_adverse_excursion: 0.05,
            ..PredictionOutput::neutral()
        };
        let id = m.add_position("BTCUSDT", Side::Buy, dec!(1), dec!(100), pred, 0).unwrap();
        let mut last_stop = f64::MIN;
        for (i, px) in [dec!(100.5), dec!(101), dec!(101.5)].into_iter().enumerate() {
            assert!(m.on_price(px, Some(0.2), (i as u64 + 1) * 1_000).is_empty());
            let stop = m.tracking(id).unwrap().trailing_stop.unwrap();
            assert!(stop >= last_stop);
            last_stop = stop;
        }
        let events = m.on_price(dec!(101.1), Some(0.2), 5_000);
        match &events[..] {
            [PositionEvent::Closed { outcome, .. }] => assert_eq!(outcome.exit_reason, "trailing stop"),
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[test]
    fn recovery_preserves_equity() {
        let mut m = manager();
        let a = m.add_position("BTCUSDT", Side::Buy, dec!(1), dec!(100), prediction(), 0).unwrap();
        m.add_position("BTCUSDT", Side::Buy, dec!(2), dec!(100), prediction(), 0).unwrap();
        m.close_position(a, dec!(110), "manual", 10).unwrap();
        m.on_price(dec!(105), None, 20);
        let state = m.state();

        let recovered = PortfolioManager::recover(&m.config, state.clone(), 30);
        assert_eq!(recovered.portfolio().equity, m.portfolio().equity);
        assert_eq!(recovered.portfolio().locked_profits, m.portfolio().locked_profits);
        assert_eq!(recovered.portfolio().available_balance, m.portfolio().available_balance);
        assert_eq!(recovered.open_count(), 1);
        assert_eq!(recovered.open_positions().next().unwrap().id, PositionId(1));
        assert_identities(&recovered);

        let mut recovered = recovered;
        let next = recovered
            .add_position("BTCUSDT", Side::Buy, dec!(1), dec!(100), prediction(), 40)
            .unwrap();
        assert_eq!(next, PositionId(2));
    }

    #[test]
    fn daily_loss_survives_recovery_on_the_same_day() {
        let cfg = TradingConfig {
            max_daily_loss: dec!(10),
            partial_profit_levels: vec![],
            ..TradingConfig::default()
        };
        let mut m = PortfolioManager::new(&cfg);
        let id = m.add_position("X", Side::Buy, dec!(1), dec!(100), prediction(), 1_000).unwrap();
        m.close_position(id, dec!(80), "manual", 2_000).unwrap();
        assert_eq!(m.portfolio().day_pnl, dec!(-20));

        let mut same_day = PortfolioManager::recover(&cfg, m.state(), 3_000);
        assert_eq!(same_day.portfolio().day_pnl, dec!(-20));
        assert_eq!(same_day.portfolio().equity, dec!(9980));
        assert!(matches!(
            same_day.add_position("X", Side::Buy, dec!(1), dec!(100), prediction(), 4_000),
            Err(RejectReason::DailyLossLimit { .. })
        ));

        let mut next_day = PortfolioManager::recover(&cfg, m.state(), DAY_MS + 1);
        assert_eq!(next_day.portfolio().day_pnl, Decimal::ZERO);
        assert_eq!(next_day.portfolio().equity, dec!(9980));
        assert!(next_day
            .add_position("X", Side::Buy, dec!(1), dec!(100), prediction(), DAY_MS + 2)
            .is_ok());
    }

    #[test]
    fn open_position_day_pnl_is_not_carried_twice() {
        let mut m = manager();
        let a = m.add_position("X", Side::Buy, dec!(1), dec!(100), prediction(), 0).unwrap();
        m.add_position("X", Side::Buy, dec!(1), dec!(100), prediction(), 0).unwrap();
        m.close_position(a, dec!(97), "manual", 10).unwrap();
        m.on_price(dec!(99), None, 20);
        assert_eq!(m.portfolio().day_pnl, dec!(-4));

        let recovered = PortfolioManager::recover(&m.config, m.state(), 30);
        assert_eq!(recovered.portfolio().day_pnl, dec!(-4));
        assert_identities(&recovered);
    }

    #[test]
    fn closed_history_is_bounded_and_totals_survive_eviction() {
        let mut m = manager();
        for i in 0..(CLOSED_HISTORY as u64 + 10) {
            let id = m.add_position("X", Side::Buy, dec!(1), dec!(100), prediction(), i).unwrap();
            m.close_position(id, dec!(100.5), "manual", i).unwrap();
        }
        assert_eq!(m.closed_positions().count(), CLOSED_HISTORY);
        assert!(m.position(PositionId(0)).is_none());
        assert_eq!(m.closed_positions().next().unwrap().id, PositionId(10));
        let trades = Decimal::from(CLOSED_HISTORY as u64 + 10);
        assert_eq!(m.portfolio().equity, dec!(10000) + dec!(0.5) * trades);
        assert_eq!(m.portfolio().day_pnl, dec!(0.5) * trades);
        assert_identities(&m);
    }

    #[test]
    fn default_ladder_fires_on_a_gradual_move() {
        let cfg = TradingConfig {
            trailing_stop_enabled: false,
            ..TradingConfig::default()
        };
        let mut m = PortfolioManager::new(&cfg);
        let pred = PredictionOutput {
            time_horizon_secs: 180.0,
            expected_return: 0.0015,
            max_adverse_excursion: 0.0,
            ..PredictionOutput::neutral()
        };
        m.add_position("BTCUSDT", Side::Buy, dec!(1), dec!(100), pred, 0).unwrap();

        let mut reasons = Vec::new();
        let mut price = dec!(100);
        for step in 1..=20u64 {
            price += dec!(0.05);
            for event in m.on_price(price, None, step * 1_000) {
                reasons.push(match event {
                    PositionEvent::PartiallyClosed { reason, .. } => reason,
                    PositionEvent::Closed { outcome, .. } => outcome.exit_reason,
                });
            }
        }
        assert_eq!(
            reasons,
            vec!["partial profit @0.3%", "partial profit @0.6%", "profit target"]
        );
        assert_eq!(m.open_count(), 0);
    }
}
