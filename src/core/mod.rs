pub mod engine;
pub mod symbol;

pub use engine::{EngineHandle, TradingEngine};
pub use symbol::SymbolEngine;
