//! In-memory catalog, used when no catalog file is configured and in tests.

use super::{CatalogEntry, SchemaCatalog};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::instrument;

/// A catalog that lives only as long as the process.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    entries: Arc<RwLock<HashMap<String, CatalogEntry>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded tables.
    pub async fn size(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl SchemaCatalog for InMemoryCatalog {
    #[instrument(skip(self))]
    async fn load(&self, table: &str) -> Result<Option<CatalogEntry>> {
        Ok(self.entries.read().await.get(table).cloned())
    }

    #[instrument(skip(self, entry), fields(table = %entry.table, version = entry.version))]
    async fn store(&self, entry: CatalogEntry) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(entry.table.clone(), entry);
        Ok(())
    }

    fn description(&self) -> String {
        "in-memory catalog".to_string()
    }
}
