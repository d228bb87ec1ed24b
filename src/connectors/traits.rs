// src/connectors/traits.rs
use crate::types::PriceTick;
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Market-data source. Implementations push ticks until the receiver is dropped.
#[async_trait]
pub trait StreamClient: Send + Sync {
    async fn subscribe_ticker(&mut self, symbol: &str, sender: mpsc::Sender<PriceTick>) -> Result<()>;
}
