//! Adaptive sniper: a paper-trading closed loop for one instrument per worker.
//!
//! market tick -> [`indicators`] -> [`prediction`] -> [`strategies`] -> [`portfolio`]
//! -> (on close) [`feedback`] -> [`prediction`]

pub mod config;
pub mod connectors;
pub mod core;
pub mod error;
pub mod feedback;
pub mod indicators;
pub mod portfolio;
pub mod prediction;
pub mod storage;
pub mod strategies;
pub mod types;
pub mod utils;

pub use crate::core::{EngineHandle, SymbolEngine, TradingEngine};
pub use config::{AppConfig, ConfigPatch, TradingConfig};
pub use error::{EngineError, RejectReason};
pub use feedback::{OutcomeRepository, TradeOutcome};
pub use types::{EngineEvent, PriceTick, TradingSignal};
