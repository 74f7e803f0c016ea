//! Schema catalog for the published output.
//!
//! Each successful run records the schema of the written dataset. The next run
//! merges its schema into the recorded one according to [`SchemaEvolution`]:
//! under `Allow`, new columns are appended and columns that disappeared are
//! retained; under `Strict`, any difference is rejected. A column changing type
//! is rejected under both policies.

use crate::config::SchemaEvolution;
use crate::error::{EtlError, Result};
use arrow::datatypes::Schema;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Debug;

mod in_memory;
mod json_file;

pub use in_memory::InMemoryCatalog;
pub use json_file::JsonFileCatalog;

/// One column of a recorded schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogColumn {
    pub name: String,
    /// Arrow data type, rendered as text
    pub data_type: String,
    pub nullable: bool,
}

/// The recorded schema of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub table: String,
    pub location: String,
    pub columns: Vec<CatalogColumn>,
    pub partition_keys: Vec<String>,
    /// Incremented whenever the recorded schema changes
    pub version: u64,
    /// SHA-256 of the columns and partition keys
    pub fingerprint: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by_run: String,
}

/// The schema a run is about to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table: String,
    pub location: String,
    pub columns: Vec<CatalogColumn>,
    pub partition_keys: Vec<String>,
}

impl TableSchema {
    /// Describes an Arrow schema written under `partition_keys`.
    pub fn from_arrow(
        table: impl Into<String>,
        location: impl Into<String>,
        schema: &Schema,
        partition_keys: &[&str],
    ) -> Self {
        Self {
            table: table.into(),
            location: location.into(),
            columns: schema
                .fields()
                .iter()
                .map(|f| CatalogColumn {
                    name: f.name().clone(),
                    data_type: f.data_type().to_string(),
                    nullable: f.is_nullable(),
                })
                .collect(),
            partition_keys: partition_keys.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Computes the fingerprint of a column list and partition layout.
pub fn fingerprint(columns: &[CatalogColumn], partition_keys: &[String]) -> String {
    let mut hasher = Sha256::new();
    for column in columns {
        hasher.update(column.name.as_bytes());
        hasher.update(b":");
        hasher.update(column.data_type.as_bytes());
        hasher.update(if column.nullable { b":null;" } else { b":some;" });
    }
    hasher.update(b"|");
    for key in partition_keys {
        hasher.update(key.as_bytes());
        hasher.update(b";");
    }
    hex::encode(hasher.finalize())
}

fn evolution_error(table: &str, message: impl Into<String>) -> EtlError {
    EtlError::SchemaEvolution {
        table: table.to_string(),
        message: message.into(),
    }
}

/// Merges `schema` into the `previous` entry, producing the entry to record.
///
/// The version is bumped only when the merged schema differs from the previous one.
pub fn evolve(
    previous: Option<&CatalogEntry>,
    schema: TableSchema,
    policy: SchemaEvolution,
    run_id: &str,
) -> Result<CatalogEntry> {
    let Some(previous) = previous else {
        let fingerprint = fingerprint(&schema.columns, &schema.partition_keys);
        return Ok(CatalogEntry {
            table: schema.table,
            location: schema.location,
            columns: schema.columns,
            partition_keys: schema.partition_keys,
            version: 1,
            fingerprint,
            updated_at: Utc::now(),
            updated_by_run: run_id.to_string(),
        });
    };

    let table = schema.table.as_str();
    if previous.partition_keys != schema.partition_keys {
        return Err(evolution_error(
            table,
            format!(
                "partition keys changed from {:?} to {:?}",
                previous.partition_keys, schema.partition_keys
            ),
        ));
    }

    let columns = match policy {
        SchemaEvolution::Strict => {
            if previous.columns != schema.columns {
                return Err(evolution_error(
                    table,
                    "schema differs from the recorded schema and evolution is strict",
                ));
            }
            schema.columns
        }
        SchemaEvolution::Allow => {
            let mut merged = Vec::with_capacity(previous.columns.len());
            for old in &previous.columns {
                match schema.columns.iter().find(|c| c.name == old.name) {
                    Some(new) if new.data_type != old.data_type => {
                        return Err(evolution_error(
                            table,
                            format!(
                                "column '{}' changed type from {} to {}",
                                old.name, old.data_type, new.data_type
                            ),
                        ));
                    }
                    Some(new) => merged.push(CatalogColumn {
                        nullable: old.nullable || new.nullable,
                        ..old.clone()
                    }),
                    // Dropped columns stay readable as nulls in older partitions.
                    None => merged.push(CatalogColumn {
                        nullable: true,
                        ..old.clone()
                    }),
                }
            }
            merged.extend(
                schema
                    .columns
                    .into_iter()
                    .filter(|new| !previous.columns.iter().any(|old| old.name == new.name)),
            );
            merged
        }
    };

    let fingerprint = fingerprint(&columns, &schema.partition_keys);
    let version = if fingerprint == previous.fingerprint {
        previous.version
    } else {
        previous.version + 1
    };

    Ok(CatalogEntry {
        table: schema.table,
        location: schema.location,
        columns,
        partition_keys: schema.partition_keys,
        version,
        fingerprint,
        updated_at: Utc::now(),
        updated_by_run: run_id.to_string(),
    })
}

/// Storage for catalog entries.
#[async_trait]
pub trait SchemaCatalog: Debug + Send + Sync {
    /// Loads the entry recorded for `table`, if any.
    async fn load(&self, table: &str) -> Result<Option<CatalogEntry>>;

    /// Records `entry`, replacing any previous entry for its table.
    async fn store(&self, entry: CatalogEntry) -> Result<()>;

    /// Returns a human-readable description of the catalog.
    fn description(&self) -> String;
}
