//! Data source connectors for the pipeline inputs.
//!
//! Sources load header-delimited files into DataFusion DataFrames. Local files,
//! directories and glob patterns are always supported; object-store URLs
//! (`s3://...`) require the `s3` feature.

use crate::core::EtlContext;
use crate::error::{EtlError, Result};
use async_trait::async_trait;
use datafusion::arrow::datatypes::Schema;
use datafusion::dataframe::DataFrame;
use datafusion::datasource::file_format::file_compression_type::FileCompressionType;
use datafusion::prelude::SessionContext;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::info;

mod csv;

#[cfg(feature = "cloud-storage")]
pub mod cloud;

pub use csv::{CsvOptions, CsvSource};

/// A data source that can be loaded into a DataFusion context.
#[async_trait]
pub trait DataSource: Debug + Send + Sync {
    /// Loads the source as a DataFrame.
    ///
    /// Unreadable or missing locations are errors; there is no fallback.
    async fn load(&self, ctx: &SessionContext) -> Result<DataFrame>;

    /// Loads the source and registers it as a view named `table_name`.
    async fn register(&self, ctx: &EtlContext, table_name: &str) -> Result<DataFrame> {
        let df = self.load(ctx.inner()).await?;
        ctx.register_view(table_name, df.clone())?;
        info!(
            table.name = %table_name,
            source = %self.description(),
            "Registered data source"
        );
        Ok(df)
    }

    /// Returns the declared schema of this source, if any.
    fn schema(&self) -> Option<&Arc<Schema>>;

    /// Returns a human-readable description of this data source.
    fn description(&self) -> String;
}

/// Compression formats supported for CSV sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    /// No compression
    None,
    /// Gzip compression
    Gzip,
    /// Bzip2 compression
    Bzip2,
    /// XZ compression
    Xz,
    /// Zstandard compression
    Zstd,
    /// Automatic detection based on file extension
    #[default]
    Auto,
}

impl CompressionType {
    /// Detects compression type from file path extension.
    pub fn from_path(path: &str) -> Self {
        let lower = path.to_lowercase();
        if lower.ends_with(".gz") || lower.ends_with(".gzip") {
            Self::Gzip
        } else if lower.ends_with(".zst") || lower.ends_with(".zstd") {
            Self::Zstd
        } else if lower.ends_with(".bz2") || lower.ends_with(".bzip2") {
            Self::Bzip2
        } else if lower.ends_with(".xz") {
            Self::Xz
        } else {
            Self::None
        }
    }

    /// Resolves `Auto` against a concrete path.
    pub fn resolve(self, path: &str) -> Self {
        match self {
            Self::Auto => Self::from_path(path),
            other => other,
        }
    }

    /// Returns the file extension for this compression type.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::None | Self::Auto => "",
            Self::Gzip => ".gz",
            Self::Bzip2 => ".bz2",
            Self::Xz => ".xz",
            Self::Zstd => ".zst",
        }
    }

    pub(crate) fn to_file_compression(self) -> FileCompressionType {
        match self {
            Self::None | Self::Auto => FileCompressionType::UNCOMPRESSED,
            Self::Gzip => FileCompressionType::GZIP,
            Self::Bzip2 => FileCompressionType::BZIP2,
            Self::Xz => FileCompressionType::XZ,
            Self::Zstd => FileCompressionType::ZSTD,
        }
    }
}

/// Returns true if `location` is a URL naming a non-local object store.
pub fn is_remote(location: &str) -> bool {
    match url::Url::parse(location) {
        // Single-letter schemes are Windows drive letters.
        Ok(url) => url.scheme().len() > 1 && url.scheme() != "file",
        Err(_) => false,
    }
}

/// Returns true if `location` contains glob metacharacters.
pub(crate) fn is_glob(location: &str) -> bool {
    location.contains(['*', '?', '['])
}

/// Utility function to expand glob patterns into file paths.
pub(crate) fn expand_globs(patterns: &[String]) -> Result<Vec<String>> {
    use glob::glob;

    let mut paths = Vec::new();
    for pattern in patterns {
        let matches = glob(pattern).map_err(|e| {
            EtlError::Configuration(format!("Invalid glob pattern '{pattern}': {e}"))
        })?;

        for entry in matches {
            let path = entry.map_err(|e| EtlError::Io(std::io::Error::other(e)))?;

            if path.is_file() {
                if let Some(path_str) = path.to_str() {
                    paths.push(path_str.to_string());
                }
            }
        }
    }

    if paths.is_empty() {
        return Err(EtlError::data_source(
            "file",
            format!("No files found matching glob patterns {patterns:?}"),
        ));
    }

    paths.sort();
    Ok(paths)
}

/// Makes object-store locations readable by the session.
///
/// Local locations need no registration. Remote locations require the matching
/// storage feature; without it they are rejected up front.
pub(crate) fn prepare_location(ctx: &SessionContext, location: &str) -> Result<()> {
    if !is_remote(location) {
        return Ok(());
    }

    #[cfg(feature = "cloud-storage")]
    {
        cloud::register_object_store(ctx, location)
    }

    #[cfg(not(feature = "cloud-storage"))]
    {
        let _ = ctx;
        Err(EtlError::Configuration(format!(
            "'{location}' is an object-store location but supply-etl was built without cloud storage support (enable the `s3` feature)"
        )))
    }
}
