// src/config.rs

use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Hard ceiling on the Kelly fraction regardless of configuration.
pub const KELLY_HARD_CAP: f64 = 0.25;

/// Tunables for the decision loop. Every field is mutable at runtime through [`ConfigPatch`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TradingConfig {
    pub base_capital: Decimal,

    // Initial decision thresholds; the adaptive model takes over from here.
    pub min_probability: f64,
    pub min_confidence: f64,
    pub max_risk_score: f64,
    pub min_confluence: f64,

    // Risk limits (quote currency)
    pub max_position_size: Decimal,
    pub max_open_positions: usize,
    pub max_daily_loss: Decimal,

    pub stop_loss_percentage: f64,
    /// Floor for the profit target exit.
    pub take_profit_percentage: f64,

    pub kelly_enabled: bool,
    pub kelly_cap: f64,
    pub min_kelly_fraction: f64,
    /// Fraction of `max_position_size` used when Kelly sizing is off or near zero.
    pub flat_size_fraction: f64,

    pub trailing_stop_enabled: bool,
    pub trailing_stop_atr_multiplier: f64,
    pub trailing_activation_percentage: f64,

    pub partial_profit_levels: Vec<f64>,
    pub partial_exit_fraction: f64,

    pub profit_lock_percentage: Decimal,
    pub profit_lock_min_threshold: Decimal,

    pub signal_cooldown_ms: u64,
    pub max_hold_secs: u64,
    pub max_training_buffer: usize,
    pub quantity_step: Decimal,

    // Signal drought relaxation
    pub drought_start_secs: u64,
    pub drought_step_secs: u64,
    pub drought_floor: f64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            base_capital: dec!(10000),
            min_probability: 0.56,
            min_confidence: 0.45,
            max_risk_score: 0.65,
            min_confluence: 0.05,
            max_position_size: dec!(2000),
            max_open_positions: 3,
            max_daily_loss: dec!(500),
            stop_loss_percentage: 0.004,
            take_profit_percentage: 0.002,
            kelly_enabled: true,
            kelly_cap: KELLY_HARD_CAP,
            min_kelly_fraction: 0.005,
            flat_size_fraction: 0.25,
            trailing_stop_enabled: true,
            trailing_stop_atr_multiplier: 1.5,
            trailing_activation_percentage: 0.001,
            partial_profit_levels: vec![0.003, 0.006],
            partial_exit_fraction: 0.5,
            profit_lock_percentage: dec!(0.8),
            profit_lock_min_threshold: dec!(1.0),
            signal_cooldown_ms: 3_000,
            max_hold_secs: 180,
            max_training_buffer: 1_000,
            quantity_step: dec!(0.0001),
            drought_start_secs: 60,
            drought_step_secs: 60,
            drought_floor: 0.85,
        }
    }
}

/// Partial update for [`TradingConfig`]; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigPatch {
    pub min_probability: Option<f64>,
    pub min_confidence: Option<f64>,
    pub max_risk_score: Option<f64>,
    pub min_confluence: Option<f64>,
    pub max_position_size: Option<Decimal>,
    pub max_open_positions: Option<usize>,
    pub max_daily_loss: Option<Decimal>,
    pub stop_loss_percentage: Option<f64>,
    pub take_profit_percentage: Option<f64>,
    pub kelly_enabled: Option<bool>,
    pub kelly_cap: Option<f64>,
    pub min_kelly_fraction: Option<f64>,
    pub flat_size_fraction: Option<f64>,
    pub trailing_stop_enabled: Option<bool>,
    pub trailing_stop_atr_multiplier: Option<f64>,
    pub trailing_activation_percentage: Option<f64>,
    pub partial_profit_levels: Option<Vec<f64>>,
    pub partial_exit_fraction: Option<f64>,
    pub profit_lock_percentage: Option<Decimal>,
    pub profit_lock_min_threshold: Option<Decimal>,
    pub signal_cooldown_ms: Option<u64>,
    pub max_hold_secs: Option<u64>,
    pub max_training_buffer: Option<usize>,
}

impl ConfigPatch {
    /// True when the patch touches one of the adaptive thresholds.
    pub fn touches_thresholds(&self) -> bool {
        self.min_probability.is_some()
            || self.min_confidence.is_some()
            || self.max_risk_score.is_some()
    }
}

impl TradingConfig {
    pub fn apply(&mut self, patch: &ConfigPatch) {
        macro_rules! merge {
            ($($field:ident),* $(,)?) => {
                $(if let Some(v) = patch.$field.clone() { self.$field = v; })*
            };
        }
        merge!(
            min_probability,
            min_confidence,
            max_risk_score,
            min_confluence,
            max_position_size,
            max_open_positions,
            max_daily_loss,
            stop_loss_percentage,
            take_profit_percentage,
            kelly_enabled,
            kelly_cap,
            min_kelly_fraction,
            flat_size_fraction,
            trailing_stop_enabled,
            trailing_stop_atr_multiplier,
            trailing_activation_percentage,
            partial_profit_levels,
            partial_exit_fraction,
            profit_lock_percentage,
            profit_lock_min_threshold,
            signal_cooldown_ms,
            max_hold_secs,
            max_training_buffer,
        );
        self.sanitize();
    }

    /// Pulls every field back into its meaningful range.
    pub fn sanitize(&mut self) {
        let defaults = Self::default();
        macro_rules! finite_or_default {
            ($($field:ident),* $(,)?) => {
                $(if !self.$field.is_finite() { self.$field = defaults.$field; })*
            };
        }
        finite_or_default!(
            min_probability,
            min_confidence,
            max_risk_score,
            min_confluence,
            stop_loss_percentage,
            take_profit_percentage,
            kelly_cap,
            min_kelly_fraction,
            flat_size_fraction,
            trailing_stop_atr_multiplier,
            trailing_activation_percentage,
            partial_exit_fraction,
            drought_floor,
        );

        self.min_probability = self.min_probability.clamp(0.5, 0.99);
        self.min_confidence = self.min_confidence.clamp(0.0, 1.0);
        self.max_risk_score = self.max_risk_score.clamp(0.0, 1.0);
        self.min_confluence = self.min_confluence.clamp(0.0, 1.0);
        self.kelly_cap = self.kelly_cap.clamp(0.0, KELLY_HARD_CAP);
        self.min_kelly_fraction = self.min_kelly_fraction.clamp(0.0, KELLY_HARD_CAP);
        self.flat_size_fraction = self.flat_size_fraction.clamp(0.0, 1.0);
        self.partial_exit_fraction = self.partial_exit_fraction.clamp(0.0, 1.0);
        self.stop_loss_percentage = self.stop_loss_percentage.abs();
        self.take_profit_percentage = self.take_profit_percentage.abs();
        self.trailing_stop_atr_multiplier = self.trailing_stop_atr_multiplier.max(0.0);
        self.trailing_activation_percentage = self.trailing_activation_percentage.max(0.0);
        self.drought_floor = self.drought_floor.clamp(0.0, 1.0);
        self.max_training_buffer = self.max_training_buffer.max(1);
        self.profit_lock_percentage = self.profit_lock_percentage.clamp(Decimal::ZERO, Decimal::ONE);
        self.partial_profit_levels
            .retain(|level| level.is_finite() && *level > 0.0);
        self.partial_profit_levels.sort_by(|a, b| a.total_cmp(b));
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub symbols: Vec<String>,
    pub stream_url: String,
    pub tick_channel_capacity: usize,
    pub event_channel_capacity: usize,
    pub state_dir: String,
    pub log_dir: String,
    pub trading: TradingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["BTCUSDT".to_string()],
            stream_url: "wss://stream.binance.com:9443/ws".to_string(),
            tick_channel_capacity: 256,
            event_channel_capacity: 1024,
            state_dir: "state".to_string(),
            log_dir: "logs".to_string(),
            trading: TradingConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name("Settings").required(false))
            .add_source(Environment::with_prefix("APP").separator("__"));

        let config = builder.build()?;
        let mut app: AppConfig = config.try_deserialize()?;
        app.trading.sanitize();
        Ok(app)
    }
}
