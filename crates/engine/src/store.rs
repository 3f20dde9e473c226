//! Persistence collaborator for the active configuration and alert history.

use crate::alerts::SafetyAlert;
use crate::config::SafetyConfiguration;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// Persistence used by the configuration and alert managers.
///
/// Callers treat every method as best-effort: failures are logged and never
/// roll back in-memory state.
#[async_trait]
pub trait SafetyStore: Send + Sync {
    async fn load_configuration(&self) -> Result<Option<SafetyConfiguration>>;

    async fn save_configuration(&self, config: &SafetyConfiguration) -> Result<()>;

    /// Appends one alert state change.
    async fn append_alert_history(&self, alert: &SafetyAlert) -> Result<()>;
}

const CONFIGURATION_FILE: &str = "configuration.json";
const ALERT_HISTORY_FILE: &str = "alert_history.jsonl";

/// Stores state as files under one directory.
///
/// - `configuration.json`: the last installed configuration, replaced atomically
/// - `alert_history.jsonl`: one alert snapshot per line, append-only
pub struct JsonFileStore {
    dir: PathBuf,
    history_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Opens the store, creating the directory if needed.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("create_dir_all {:?}", dir))?;
        Ok(Self {
            dir,
            history_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reads back the full alert history.
    pub async fn read_alert_history(&self) -> Result<Vec<SafetyAlert>> {
        let path = self.dir.join(ALERT_HISTORY_FILE);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("read {:?}", path)),
        };

        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(n, line)| {
                serde_json::from_str(line)
                    .with_context(|| format!("parse alert history line {}", n + 1))
            })
            .collect()
    }
}

#[async_trait]
impl SafetyStore for JsonFileStore {
    async fn load_configuration(&self) -> Result<Option<SafetyConfiguration>> {
        let path = self.dir.join(CONFIGURATION_FILE);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("read {:?}", path)),
        };
        let config = serde_json::from_str(&raw).with_context(|| format!("parse {:?}", path))?;
        Ok(Some(config))
    }

    async fn save_configuration(&self, config: &SafetyConfiguration) -> Result<()> {
        let path = self.dir.join(CONFIGURATION_FILE);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(config).context("serialize configuration")?;

        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("write {:?}", tmp))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("rename {:?} -> {:?}", tmp, path))?;

        debug!(path = ?path, version = config.version, "Configuration saved");
        Ok(())
    }

    async fn append_alert_history(&self, alert: &SafetyAlert) -> Result<()> {
        let path = self.dir.join(ALERT_HISTORY_FILE);
        let mut line = serde_json::to_string(alert).context("serialize alert")?;
        line.push('\n');

        let _guard = self.history_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("open {:?}", path))?;
        file.write_all(line.as_bytes())
            .await
            .context("write alert history line")?;
        file.flush().await.context("flush alert history")?;
        Ok(())
    }
}

/// Keeps everything in memory. Used by tests and the simulator.
#[derive(Default)]
pub struct MemoryStore {
    configuration: Mutex<Option<SafetyConfiguration>>,
    history: Mutex<Vec<SafetyAlert>>,
}

impl MemoryStore {
    pub async fn history(&self) -> Vec<SafetyAlert> {
        self.history.lock().await.clone()
    }
}

#[async_trait]
impl SafetyStore for MemoryStore {
    async fn load_configuration(&self) -> Result<Option<SafetyConfiguration>> {
        Ok(self.configuration.lock().await.clone())
    }

    async fn save_configuration(&self, config: &SafetyConfiguration) -> Result<()> {
        *self.configuration.lock().await = Some(config.clone());
        Ok(())
    }

    async fn append_alert_history(&self, alert: &SafetyAlert) -> Result<()> {
        self.history.lock().await.push(alert.clone());
        Ok(())
    }
}
