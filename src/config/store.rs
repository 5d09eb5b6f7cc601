use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::RelayConfig;
use crate::error::{AppError, Result};

/// Configuration store backed by a JSON file
///
/// Uses `ArcSwap` for lock-free reads; the idle sweeper and request
/// handlers read the current config on every tick without contention.
#[derive(Clone)]
pub struct ConfigStore {
    path: PathBuf,
    cache: Arc<ArcSwap<RelayConfig>>,
}

impl ConfigStore {
    /// Open the configuration file, creating it with defaults if missing
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let config = match tokio::fs::read_to_string(path).await {
            Ok(json) => {
                serde_json::from_str(&json).map_err(|e| AppError::Config(e.to_string()))?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = RelayConfig::default();
                Self::save_to_file(path, &config).await?;
                tracing::info!("Created default configuration at {}", path.display());
                config
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path: path.to_path_buf(),
            cache: Arc::new(ArcSwap::from_pointee(config)),
        })
    }

    /// In-memory store that never touches disk (tests, `--config` unset)
    pub fn ephemeral(config: RelayConfig) -> Self {
        Self {
            path: PathBuf::new(),
            cache: Arc::new(ArcSwap::from_pointee(config)),
        }
    }

    /// Write through a temp file and rename so readers never see a torn file
    async fn save_to_file(path: &Path, config: &RelayConfig) -> Result<()> {
        let json = serde_json::to_string_pretty(config)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Get current configuration (lock-free)
    pub fn get(&self) -> Arc<RelayConfig> {
        self.cache.load_full()
    }

    /// Replace the cached config without persisting (CLI overrides)
    pub fn override_with(&self, config: RelayConfig) {
        self.cache.store(Arc::new(config));
    }

    /// Update configuration with a closure, persist, then swap the cache
    ///
    /// Last write wins for concurrent updates.
    pub async fn update<F>(&self, f: F) -> Result<Arc<RelayConfig>>
    where
        F: FnOnce(&mut RelayConfig),
    {
        let mut config = (**self.cache.load()).clone();
        f(&mut config);

        if !self.path.as_os_str().is_empty() {
            Self::save_to_file(&self.path, &config).await?;
        }

        let config = Arc::new(config);
        self.cache.store(config.clone());
        Ok(config)
    }

    /// Path of the backing file (empty for ephemeral stores)
    pub fn path(&self) -> &Path {
        &self.path
    }
}
