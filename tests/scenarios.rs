use adaptive_sniper::config::TradingConfig;
use adaptive_sniper::core::SymbolEngine;
use adaptive_sniper::error::RejectReason;
use adaptive_sniper::indicators::IndicatorEngine;
use adaptive_sniper::portfolio::PortfolioManager;
use adaptive_sniper::prediction::PredictionOutput;
use adaptive_sniper::types::{PriceTick, Side};
use adaptive_sniper::utils::precision::to_decimal;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn holding_prediction() -> PredictionOutput {
    PredictionOutput {
        expected_return: 0.05,
        max_adverse_excursion: 0.05,
        ..PredictionOutput::neutral()
    }
}

fn quiet_config() -> TradingConfig {
    TradingConfig {
        partial_profit_levels: vec![],
        ..TradingConfig::default()
    }
}

#[test]
fn scenario_a_rising_prices_read_overbought_and_bullish() {
    let mut engine = IndicatorEngine::new();
    for i in 0..25u64 {
        let price = 100.0 + 10.0 * i as f64 / 24.0;
        engine.push(price, 10.0, i * 1_000);
    }
    let ind = engine.calculate().expect("25 samples are enough");
    assert!(ind.rsi > 70.0, "rsi {}", ind.rsi);
    assert!(engine.context(&ind).market_regime.is_bullish());
}

#[test]
fn scenario_b_unrealized_pnl_is_exact() {
    let mut pm = PortfolioManager::new(&quiet_config());
    let id = pm
        .add_position("BTCUSDT", Side::Buy, dec!(1), dec!(100), holding_prediction(), 0)
        .unwrap();
    let events = pm.on_price(dec!(102), None, 1_000);
    assert!(events.is_empty());
    assert_eq!(pm.position(id).unwrap().unrealized_pnl, dec!(2.0));
}

#[test]
fn scenario_c_oversized_order_is_rejected_without_side_effects() {
    let mut pm = PortfolioManager::new(&TradingConfig::default());
    let before = pm.portfolio().clone();
    let result = pm.add_position("BTCUSDT", Side::Buy, dec!(101), dec!(100), holding_prediction(), 0);
    assert!(matches!(result, Err(RejectReason::InsufficientBalance { .. })));
    assert_eq!(pm.portfolio(), &before);
    assert_eq!(pm.open_count(), 0);
}

#[test]
fn scenario_d_profit_lock_takes_eighty_percent() {
    let mut pm = PortfolioManager::new(&TradingConfig::default());
    let id = pm
        .add_position("BTCUSDT", Side::Buy, dec!(1), dec!(100), holding_prediction(), 0)
        .unwrap();
    let locked_before = pm.portfolio().locked_profits;
    let outcome = pm.close_position(id, dec!(150), "manual", 10_000).unwrap();
    assert_eq!(outcome.realized_pnl, dec!(50));
    assert_eq!(pm.portfolio().locked_profits - locked_before, dec!(40));
}

#[test]
fn scenario_e_crossed_book_is_dropped() {
    let mut engine = SymbolEngine::new("BTCUSDT", &TradingConfig::default());
    engine.on_tick(&PriceTick::new("BTCUSDT", 99.99, 100.01, 1.0, 1.0, 0));
    let len = engine.indicators().len();

    let events = engine.on_tick(&PriceTick::new("BTCUSDT", 100.5, 100.0, 1.0, 1.0, 1));
    assert!(events.is_empty());
    assert_eq!(engine.indicators().len(), len);
}

#[test]
fn recalculation_is_idempotent() {
    let mut pm = PortfolioManager::new(&quiet_config());
    pm.add_position("BTCUSDT", Side::Sell, dec!(0.3333), dec!(100.07), holding_prediction(), 0)
        .unwrap();
    pm.on_price(dec!(99.123456789), None, 1);
    let once = pm.recalculate().clone();
    assert_eq!(&once, pm.recalculate());
}

proptest! {
    #[test]
    fn equity_identity_holds_along_any_path(
        path in prop::collection::vec(95.0f64..105.0, 1..60),
        sides in prop::collection::vec(any::<bool>(), 3),
    ) {
        let mut pm = PortfolioManager::new(&TradingConfig::default());
        for (i, buy) in sides.iter().enumerate() {
            let side = if *buy { Side::Buy } else { Side::Sell };
            let _ = pm.add_position("BTCUSDT", side, dec!(1.5), dec!(100), PredictionOutput::neutral(), i as u64);
        }
        for (i, px) in path.iter().enumerate() {
            let price = to_decimal(*px).unwrap();
            pm.on_price(price, Some(0.3), 1_000 * (i as u64 + 1));

            let p = pm.portfolio().clone();
            prop_assert_eq!(p.equity, p.base_capital + p.total_pnl + p.locked_profits);
            let exposure: Decimal = pm.open_positions().map(|pos| pos.exposure()).sum();
            prop_assert_eq!(p.available_balance, p.equity - p.locked_profits - exposure);
            prop_assert!(p.locked_profits >= Decimal::ZERO);
        }
    }
}
