// src/connectors/binance.rs
use crate::connectors::messages::BinanceBookTicker;
use crate::connectors::traits::StreamClient;
use crate::types::PriceTick;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use url::Url;

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub struct BinanceStream {
    base_ws_url: String,
}

impl BinanceStream {
    pub fn new(base_ws_url: impl Into<String>) -> Self {
        Self {
            base_ws_url: base_ws_url.into(),
        }
    }

    fn stream_url(&self, symbol: &str) -> Result<Url> {
        let ws_url = format!(
            "{}/{}@bookTicker",
            self.base_ws_url.trim_end_matches('/'),
            symbol.to_lowercase()
        );
        Ok(Url::parse(&ws_url)?)
    }
}

impl Default for BinanceStream {
    fn default() -> Self {
        Self::new("wss://stream.binance.com:9443/ws")
    }
}

/// Decodes one text frame. Anything that is not a bookTicker update is ignored.
pub fn parse_book_ticker(text: &str, timestamp: u64) -> Option<PriceTick> {
    serde_json::from_str::<BinanceBookTicker>(text)
        .ok()
        .map(|msg| msg.into_tick(timestamp))
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

enum Disconnect {
    Retry,
    ReceiverGone,
}

async fn pump(url: &Url, symbol: &str, sender: &mpsc::Sender<PriceTick>) -> Disconnect {
    let (ws_stream, _) = match connect_async(url.as_str()).await {
        Ok(conn) => conn,
        Err(e) => {
            error!("Failed to connect WebSocket for {}: {}", symbol, e);
            return Disconnect::Retry;
        }
    };
    let (_, mut read) = ws_stream.split();
    info!("WebSocket connected for {}", symbol);

    let mut dropped: u64 = 0;
    while let Some(message) = read.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(frame)) => {
                warn!("WebSocket closed by server for {}: {:?}", symbol, frame);
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                error!("WebSocket Error for {}: {}", symbol, e);
                break;
            }
        };
        let Some(tick) = parse_book_ticker(&text, Utc::now().timestamp_millis() as u64) else {
            continue;
        };
        match sender.try_send(tick) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                dropped += 1;
                if dropped % 100 == 1 {
                    debug!("Tick channel full for {}, {} ticks dropped so far", symbol, dropped);
                }
            }
            Err(TrySendError::Closed(_)) => return Disconnect::ReceiverGone,
        }
    }
    Disconnect::Retry
}

#[async_trait]
impl StreamClient for BinanceStream {
    async fn subscribe_ticker(&mut self, symbol: &str, sender: mpsc::Sender<PriceTick>) -> Result<()> {
        let url = self.stream_url(symbol)?;
        info!("Starting WebSocket task for: {}", symbol);

        let symbol = symbol.to_string();
        tokio::spawn(async move {
            let mut backoff = INITIAL_BACKOFF;
            loop {
                let started = tokio::time::Instant::now();
                match pump(&url, &symbol, &sender).await {
                    Disconnect::ReceiverGone => break,
                    Disconnect::Retry => {
                        // a connection that stayed up for a while earns a fresh backoff
                        if started.elapsed() > MAX_BACKOFF {
                            backoff = INITIAL_BACKOFF;
                        }
                        warn!("Reconnecting {} in {:?}", symbol, backoff);
                        tokio::time::sleep(backoff).await;
                        backoff = next_backoff(backoff);
                    }
                }
                if sender.is_closed() {
                    break;
                }
            }
            info!("WebSocket task finished for {}", symbol);
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_url_targets_book_ticker() {
        let client = BinanceStream::new("wss://stream.binance.com:9443/ws/");
        let url = client.stream_url("BTCUSDT").unwrap();
        assert_eq!(url.as_str(), "wss://stream.binance.com:9443/ws/btcusdt@bookTicker");
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let mut b = INITIAL_BACKOFF;
        for _ in 0..10 {
            b = next_backoff(b);
        }
        assert_eq!(b, MAX_BACKOFF);
        assert_eq!(next_backoff(INITIAL_BACKOFF), Duration::from_secs(1));
    }

    #[test]
    fn non_ticker_frames_are_ignored() {
        assert!(parse_book_ticker(r#"{"result":null,"id":1}"#, 0).is_none());
        assert!(parse_book_ticker("not json", 0).is_none());
        let tick = parse_book_ticker(
            r#"{"u":1,"s":"BTCUSDT","b":"100.0","B":"1.5","a":"100.5","A":"2.0"}"#,
            7,
        )
        .unwrap();
        assert_eq!(tick.mid, 100.25);
    }
}
