//! Catalog persisted as a JSON document on the local file system.

use super::{CatalogEntry, SchemaCatalog};
use crate::error::{EtlError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// A catalog stored in a single JSON file mapping table names to entries.
///
/// Writes go to a temporary file that is renamed over the catalog, so a
/// crashed run never leaves a truncated document behind.
#[derive(Debug)]
pub struct JsonFileCatalog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<BTreeMap<String, CatalogEntry>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) if text.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                EtlError::Serialization(format!(
                    "Invalid catalog file '{}': {e}",
                    self.path.display()
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SchemaCatalog for JsonFileCatalog {
    #[instrument(skip(self), fields(catalog.path = %self.path.display()))]
    async fn load(&self, table: &str) -> Result<Option<CatalogEntry>> {
        Ok(self.read_all().await?.remove(table))
    }

    #[instrument(skip(self, entry), fields(
        catalog.path = %self.path.display(),
        table = %entry.table,
        version = entry.version
    ))]
    async fn store(&self, entry: CatalogEntry) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut entries = self.read_all().await?;
        entries.insert(entry.table.clone(), entry);
        let text = serde_json::to_string_pretty(&entries)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp, text).await?;
        tokio::fs::rename(&temp, &self.path).await?;

        debug!(tables = entries.len(), "Catalog written");
        Ok(())
    }

    fn description(&self) -> String {
        format!("JSON catalog: {}", self.path.display())
    }
}
