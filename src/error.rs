// src/error.rs
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("Invalid tick: {message}")]
    InvalidTick { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Why a position open request was refused. Rejections never mutate the portfolio.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectReason {
    #[error("insufficient balance: need {required}, available {available}")]
    InsufficientBalance { required: Decimal, available: Decimal },

    #[error("max open positions reached ({max})")]
    MaxOpenPositions { max: usize },

    #[error("position value {value} exceeds max size {max}")]
    PositionTooLarge { value: Decimal, max: Decimal },

    #[error("daily loss limit hit: day P&L {day_pnl}, limit {limit}")]
    DailyLossLimit { day_pnl: Decimal, limit: Decimal },

    #[error("invalid order: {0}")]
    InvalidOrder(String),
}

/// Trade outcomes that would corrupt the model are refused with one of these.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OutcomeError {
    #[error("non-positive price (entry {entry}, exit {exit})")]
    NonPositivePrice { entry: f64, exit: f64 },

    #[error("non-finite field: {0}")]
    NonFinite(&'static str),

    #[error("realized return {0} outside accepted bounds")]
    ReturnOutOfBounds(f64),
}
