// src/connectors/messages.rs
use crate::types::PriceTick;
use crate::utils::precision::to_f64;
use rust_decimal::Decimal;
use serde::Deserialize;

/// Best bid/ask update from wss://stream.binance.com:9443/ws/<symbol>@bookTicker
/// Short field names are Binance's own.
#[derive(Debug, Deserialize)]
pub struct BinanceBookTicker {
    #[serde(rename = "u")]
    pub update_id: u64,

    #[serde(rename = "s")]
    pub symbol: String,

    #[serde(rename = "b")]
    pub bid_price: Decimal,

    #[serde(rename = "B")]
    pub bid_qty: Decimal,

    #[serde(rename = "a")]
    pub ask_price: Decimal,

    #[serde(rename = "A")]
    pub ask_qty: Decimal,
}

impl BinanceBookTicker {
    /// Stamps the update with the local receive time; bookTicker carries no event time.
    pub fn into_tick(self, timestamp: u64) -> PriceTick {
        PriceTick::new(
            self.symbol,
            to_f64(self.bid_price),
            to_f64(self.ask_price),
            to_f64(self.bid_qty),
            to_f64(self.ask_qty),
            timestamp,
        )
    }
}
