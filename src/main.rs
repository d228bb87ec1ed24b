// src/main.rs
use adaptive_sniper::config::AppConfig;
use adaptive_sniper::connectors::binance::BinanceStream;
use adaptive_sniper::connectors::traits::StreamClient;
use adaptive_sniper::core::{EngineHandle, SymbolEngine, TradingEngine};
use adaptive_sniper::feedback::OutcomeRepository;
use adaptive_sniper::storage::{JsonlOutcomeStore, StateFile};
use adaptive_sniper::types::EngineEvent;
use anyhow::Context;
use dotenvy::dotenv;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

fn init_logging(log_dir: &str) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir).with_context(|| format!("creating log dir {}", log_dir))?;
    let appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "adaptive_sniper.log");
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .init();
    Ok(guard)
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::Signal(s) => info!("[{}] signal {:?} {} @ {}", s.symbol, s.action, s.quantity, s.price),
        EngineEvent::PositionOpened(p) => info!("[{}] opened {} {:?} {} @ {}", p.symbol, p.id, p.side, p.size, p.entry_price),
        EngineEvent::PositionRejected { symbol, side, reason } => warn!("[{}] {:?} rejected: {}", symbol, side, reason),
        EngineEvent::TradeClosed(o) => info!(
            "[{}] closed {} ({}): pnl {} return {:.4}%",
            o.symbol,
            o.position_id,
            o.exit_reason,
            o.realized_pnl,
            o.realized_return * 100.0
        ),
        EngineEvent::PortfolioUpdated(p) => info!(
            "equity {} available {} locked {} day {}",
            p.equity, p.available_balance, p.locked_profits, p.day_pnl
        ),
        EngineEvent::PositionUpdated(_) | EngineEvent::PositionClosed { .. } => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // 1. Load Configuration
    let config = AppConfig::new()?;
    let _guard = init_logging(&config.log_dir)?;

    info!("========================================");
    info!("     ADAPTIVE SNIPER - v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    info!("Targets: {:?}", config.symbols);
    info!("Mode:    PAPER TRADING");
    info!("Capital: {}", config.trading.base_capital);

    // 2. Event fan-in from every worker
    let (event_tx, mut event_rx) = mpsc::channel(config.event_channel_capacity);

    // 3. One stream + one worker per symbol
    let mut handles: Vec<(String, EngineHandle)> = Vec::new();
    for symbol in &config.symbols {
        let (ticker_tx, ticker_rx) = mpsc::channel(config.tick_channel_capacity);
        let mut stream = BinanceStream::new(config.stream_url.clone());
        stream.subscribe_ticker(symbol, ticker_tx).await?;

        let outcomes_path = Path::new(&config.state_dir).join(format!("{}_outcomes.jsonl", symbol.to_lowercase()));
        let repository: Arc<dyn OutcomeRepository> = Arc::new(JsonlOutcomeStore::new(outcomes_path));
        let state_file = StateFile::new(&config.state_dir, symbol);

        let (worker, handle) = TradingEngine::new(
            SymbolEngine::new(symbol.clone(), &config.trading),
            ticker_rx,
            event_tx.clone(),
            repository,
            Some(state_file),
        );
        let name = symbol.clone();
        tokio::spawn(async move {
            if let Err(e) = worker.run().await {
                tracing::error!("Fatal Engine Error for {}: {}", name, e);
            }
        });
        handles.push((symbol.clone(), handle));
    }
    drop(event_tx);

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            log_event(&event);
        }
    });

    // 4. Run until Ctrl+C
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    for (symbol, handle) in &handles {
        match handle.snapshot().await {
            Ok(snap) => info!(
                "[{}] final equity {} ({} open, win rate {:.2} over last {} trades)",
                symbol,
                snap.portfolio.equity,
                snap.open_positions.len(),
                snap.performance.win_rate,
                snap.performance.sample_count
            ),
            Err(e) => warn!("[{}] no final snapshot: {}", symbol, e),
        }
    }
    Ok(())
}
