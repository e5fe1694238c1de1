//! Store selection for the command line driver

use crate::settings::Settings;
use anyhow::{Context, Result};
use riskfold_core::PipelineConfig;
use riskfold_store::{MemoryStore, Store};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The backend a command runs against
pub enum StoreHandle {
    /// In-memory store loaded from, and written back to, a JSON snapshot
    Snapshot { store: Arc<MemoryStore>, path: PathBuf },

    #[cfg(feature = "postgres")]
    Postgres(Arc<riskfold_store::PostgresStore>),
}

impl StoreHandle {
    /// A snapshot file wins over the database URL
    pub async fn open(settings: &Settings, snapshot: Option<&Path>, config: &PipelineConfig) -> Result<Self> {
        if let Some(path) = snapshot {
            let store = MemoryStore::from_json_file(path)
                .await
                .with_context(|| format!("Failed to load snapshot {}", path.display()))?;
            tracing::info!(path = %path.display(), "Using snapshot store");
            return Ok(Self::Snapshot {
                store: Arc::new(store),
                path: path.to_path_buf(),
            });
        }
        Self::open_database(settings, config).await
    }

    #[cfg(feature = "postgres")]
    async fn open_database(settings: &Settings, config: &PipelineConfig) -> Result<Self> {
        let url = settings
            .database_url
            .as_deref()
            .context("DATABASE_URL is not set and no --snapshot was given")?;
        let store = riskfold_store::PostgresStore::connect(url, settings.max_connections)
            .await?
            .with_allow_list(riskfold_store::IdentifierAllowList::from_config(config));
        tracing::info!(max_connections = settings.max_connections, "Connected to Postgres");
        Ok(Self::Postgres(Arc::new(store)))
    }

    #[cfg(not(feature = "postgres"))]
    async fn open_database(_settings: &Settings, _config: &PipelineConfig) -> Result<Self> {
        anyhow::bail!("Built without the `postgres` feature; pass --snapshot <file>")
    }

    pub fn store(&self) -> Arc<dyn Store> {
        match self {
            Self::Snapshot { store, .. } => Arc::clone(store) as Arc<dyn Store>,
            #[cfg(feature = "postgres")]
            Self::Postgres(store) => Arc::clone(store) as Arc<dyn Store>,
        }
    }

    /// Write a snapshot store back to its file; no-op for databases
    pub async fn persist(&self) -> Result<()> {
        match self {
            Self::Snapshot { store, path } => {
                store
                    .to_json_file(path)
                    .await
                    .with_context(|| format!("Failed to write snapshot {}", path.display()))?;
                tracing::info!(path = %path.display(), "Saved snapshot store");
                Ok(())
            }
            #[cfg(feature = "postgres")]
            Self::Postgres(_) => Ok(()),
        }
    }
}
