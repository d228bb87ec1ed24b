//! Persistence collaborators: trade-outcome repositories and the per-symbol state file.

use crate::error::{EngineError, Result};
use crate::feedback::{OutcomeRepository, TradeOutcome};
use crate::portfolio::PortfolioState;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Append-only JSON-lines file, one outcome per line.
pub struct JsonlOutcomeStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlOutcomeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl OutcomeRepository for JsonlOutcomeStore {
    async fn save(&self, outcome: &TradeOutcome) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(outcome)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn load_recent(&self, n: usize) -> anyhow::Result<Vec<TradeOutcome>> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut outcomes = Vec::new();
        for (lineno, line) in data.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
            match serde_json::from_str::<TradeOutcome>(line) {
                Ok(o) => outcomes.push(o),
                Err(e) => warn!("Skipping corrupt outcome at {}:{}: {}", self.path.display(), lineno + 1, e),
            }
        }
        let skip = outcomes.len().saturating_sub(n);
        Ok(outcomes.split_off(skip))
    }
}

/// Process-local repository, for tests and paper sessions without a data dir.
#[derive(Default)]
pub struct MemoryOutcomeStore {
    outcomes: Mutex<Vec<TradeOutcome>>,
}

impl MemoryOutcomeStore {
    pub async fn len(&self) -> usize {
        self.outcomes.lock().await.len()
    }
}

#[async_trait]
impl OutcomeRepository for MemoryOutcomeStore {
    async fn save(&self, outcome: &TradeOutcome) -> anyhow::Result<()> {
        self.outcomes.lock().await.push(outcome.clone());
        Ok(())
    }

    async fn load_recent(&self, n: usize) -> anyhow::Result<Vec<TradeOutcome>> {
        let outcomes = self.outcomes.lock().await;
        let skip = outcomes.len().saturating_sub(n);
        Ok(outcomes[skip..].to_vec())
    }
}

/// `<dir>/<symbol>.json` snapshot of the portfolio and its open positions.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(dir: impl AsRef<Path>, symbol: &str) -> Self {
        Self {
            path: dir.as_ref().join(format!("{}.json", symbol.to_lowercase())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when no snapshot exists yet.
    pub async fn load(&self) -> Result<Option<PortfolioState>> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state = serde_json::from_str::<PortfolioState>(&data)?;
        info!("Restored state from {}", self.path.display());
        Ok(Some(state))
    }

    /// Written through a sibling temp file, then renamed into place.
    pub async fn save(&self, state: &PortfolioState) -> Result<()> {
        let data = serde_json::to_string_pretty(state)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| EngineError::Storage {
            message: format!("rename {} -> {}: {}", tmp.display(), self.path.display(), e),
        })
    }
}
