// src/core/engine.rs
use crate::core::symbol::SymbolEngine;
use crate::feedback::{OutcomeRepository, TradeOutcome};
use crate::portfolio::PortfolioState;
use crate::storage::StateFile;
use crate::strategies::traits::Strategy;
use crate::types::{EngineCommand, EngineEvent, EngineSnapshot, PriceTick};
use crate::config::ConfigPatch;
use crate::error::EngineError;
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const COMMAND_CAPACITY: usize = 32;
const OUTCOME_CAPACITY: usize = 256;

/// Cloneable control surface for a running [`TradingEngine`].
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub async fn update_config(&self, patch: ConfigPatch) -> Result<()> {
        self.send(EngineCommand::UpdateConfig(patch)).await
    }

    pub async fn reset_model(&self) -> Result<()> {
        self.send(EngineCommand::ResetModel).await
    }

    pub async fn snapshot(&self) -> Result<EngineSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::Snapshot(tx)).await?;
        Ok(rx.await.map_err(|_| EngineError::ChannelClosed("snapshot reply"))?)
    }

    async fn send(&self, command: EngineCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| EngineError::ChannelClosed("engine commands"))?;
        Ok(())
    }
}

/// Per-symbol worker: owns the [`SymbolEngine`] and processes ticks and commands strictly
/// in arrival order. Persistence runs on a separate task and never blocks the loop.
pub struct TradingEngine<S: Strategy> {
    engine: SymbolEngine<S>,
    ticker_receiver: mpsc::Receiver<PriceTick>,
    command_receiver: mpsc::Receiver<EngineCommand>,
    event_sender: mpsc::Sender<EngineEvent>,
    repository: Arc<dyn OutcomeRepository>,
    state_file: Option<StateFile>,
}

impl<S: Strategy> TradingEngine<S> {
    pub fn new(
        engine: SymbolEngine<S>,
        ticker_receiver: mpsc::Receiver<PriceTick>,
        event_sender: mpsc::Sender<EngineEvent>,
        repository: Arc<dyn OutcomeRepository>,
        state_file: Option<StateFile>,
    ) -> (Self, EngineHandle) {
        let (commands, command_receiver) = mpsc::channel(COMMAND_CAPACITY);
        let engine = Self {
            engine,
            ticker_receiver,
            command_receiver,
            event_sender,
            repository,
            state_file,
        };
        (engine, EngineHandle { commands })
    }

    async fn load_state(&mut self) {
        let Some(file) = &self.state_file else {
            return;
        };
        match file.load().await {
            Ok(Some(state)) => {
                let now = Utc::now().timestamp_millis() as u64;
                self.engine.recover(state, now);
            }
            Ok(None) => info!("{}: no saved state, starting fresh", self.engine.symbol()),
            Err(e) => warn!("{}: ignoring unreadable state file: {}", self.engine.symbol(), e),
        }
    }

    async fn warm_start(&mut self) {
        let n = self.engine.config().max_training_buffer;
        match self.repository.load_recent(n).await {
            Ok(outcomes) if !outcomes.is_empty() => {
                self.engine.warm_start(outcomes);
            }
            Ok(_) => {}
            Err(e) => warn!("{}: warm start skipped: {}", self.engine.symbol(), e),
        }
    }

    fn send_event(&self, event: EngineEvent) {
        match self.event_sender.try_send(event) {
            Ok(_) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {}
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!("Event channel closed! Subscribers are likely gone.");
            }
        }
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::UpdateConfig(patch) => self.engine.update_config(&patch),
            EngineCommand::ResetModel => self.engine.reset_model(),
            EngineCommand::Snapshot(reply) => {
                let _ = reply.send(self.engine.snapshot());
            }
        }
    }

    /// Runs until the tick stream ends, then drains pending persistence.
    pub async fn run(mut self) -> Result<()> {
        info!("Engine starting for {}...", self.engine.symbol());
        self.load_state().await;
        self.warm_start().await;

        let (outcome_tx, outcome_rx) = mpsc::channel(OUTCOME_CAPACITY);
        let (state_tx, state_rx) = watch::channel(self.engine.portfolio().state());
        let persistence = spawn_persistence(
            self.engine.symbol().to_string(),
            self.repository.clone(),
            self.state_file.clone(),
            outcome_rx,
            state_rx,
        );

        info!("Engine loop running for {}", self.engine.symbol());
        loop {
            tokio::select! {
                biased;

                Some(command) = self.command_receiver.recv() => self.handle_command(command),

                tick = self.ticker_receiver.recv() => {
                    let Some(tick) = tick else { break };
                    let mut dirty = false;
                    for event in self.engine.on_tick(&tick) {
                        dirty |= event.mutates_portfolio();
                        if let EngineEvent::TradeClosed(outcome) = &event {
                            if outcome_tx.try_send(outcome.clone()).is_err() {
                                error!("Outcome queue full, {} not persisted", outcome.position_id);
                            }
                        }
                        self.send_event(event);
                    }
                    if dirty {
                        let _ = state_tx.send(self.engine.portfolio().state());
                    }
                }
            }
        }

        info!("Tick stream closed for {}, flushing state", self.engine.symbol());
        drop(outcome_tx);
        drop(state_tx);
        if let Err(e) = persistence.await {
            error!("Persistence task failed: {}", e);
        }
        Ok(())
    }
}

/// Saves outcomes in order and the newest portfolio snapshot whenever it changes.
fn spawn_persistence(
    symbol: String,
    repository: Arc<dyn OutcomeRepository>,
    state_file: Option<StateFile>,
    mut outcomes: mpsc::Receiver<TradeOutcome>,
    mut states: watch::Receiver<PortfolioState>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut outcomes_open = true;
        let mut states_open = true;
        while outcomes_open || states_open {
            tokio::select! {
                outcome = outcomes.recv(), if outcomes_open => match outcome {
                    Some(outcome) => {
                        if let Err(e) = repository.save(&outcome).await {
                            error!("{}: failed to save outcome {}: {}", symbol, outcome.position_id, e);
                        }
                    }
                    None => outcomes_open = false,
                },
                changed = states.changed(), if states_open => {
                    if changed.is_err() {
                        states_open = false;
                    } else {
                        let state = states.borrow_and_update().clone();
                        if let Some(file) = &state_file {
                            if let Err(e) = file.save(&state).await {
                                error!("{}: failed to save state: {}", symbol, e);
                            }
                        }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TradingConfig;
    use crate::portfolio::PortfolioManager;
    use crate::prediction::PredictionOutput;
    use crate::storage::MemoryOutcomeStore;
    use crate::types::Side;
    use rust_decimal_macros::dec;

    fn tick(mid: f64, ts: u64) -> PriceTick {
        PriceTick::new("BTCUSDT", mid - 0.01, mid + 0.01, 5.0, 5.0, ts)
    }

    #[tokio::test]
    async fn serves_snapshots_and_config_while_running() {
        let cfg = TradingConfig::default();
        let (tick_tx, tick_rx) = mpsc::channel(64);
        let (event_tx, _event_rx) = mpsc::channel(1024);
        let store = Arc::new(MemoryOutcomeStore::default());
        let (engine, handle) =
            TradingEngine::new(SymbolEngine::new("BTCUSDT", &cfg), tick_rx, event_tx, store, None);
        let worker = tokio::spawn(engine.run());

        for i in 0..25u64 {
            tick_tx.send(tick(100.0 + i as f64 * 0.4, i * 1_000)).await.unwrap();
        }
        handle
            .update_config(ConfigPatch {
                max_open_positions: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        // commands and ticks share one loop; give the ticks time to land
        let mut snap = handle.snapshot().await.unwrap();
        for _ in 0..50 {
            if snap.indicators.is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            snap = handle.snapshot().await.unwrap();
        }
        assert!(snap.indicators.is_some());
        assert_eq!(snap.symbol, "BTCUSDT");

        drop(tick_tx);
        worker.await.unwrap().unwrap();
        assert!(handle.snapshot().await.is_err());
    }

    #[tokio::test]
    async fn recovers_state_and_persists_closed_trades() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TradingConfig::default();
        let file = StateFile::new(dir.path(), "BTCUSDT");

        let now = Utc::now().timestamp_millis() as u64;
        let mut pm = PortfolioManager::new(&cfg);
        pm.add_position("BTCUSDT", Side::Buy, dec!(1), dec!(100), PredictionOutput::neutral(), now)
            .unwrap();
        file.save(&pm.state()).await.unwrap();

        let (tick_tx, tick_rx) = mpsc::channel(8);
        let (event_tx, mut event_rx) = mpsc::channel(64);
        let store = Arc::new(MemoryOutcomeStore::default());
        let (engine, _handle) = TradingEngine::new(
            SymbolEngine::new("BTCUSDT", &cfg),
            tick_rx,
            event_tx,
            store.clone(),
            Some(file.clone()),
        );
        let worker = tokio::spawn(engine.run());

        // 1% under entry, past the recovered long's stop
        tick_tx.send(tick(99.0, now + 1_000)).await.unwrap();
        drop(tick_tx);
        worker.await.unwrap().unwrap();

        assert_eq!(store.len().await, 1);
        let saved = file.load().await.unwrap().unwrap();
        assert!(saved.open_positions.is_empty());
        assert_eq!(saved.portfolio.equity, dec!(9999));

        let mut closed = false;
        while let Ok(event) = event_rx.try_recv() {
            closed |= matches!(event, EngineEvent::TradeClosed(_));
        }
        assert!(closed);
    }
}
