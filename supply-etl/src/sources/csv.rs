//! CSV file source implementation.

use super::{expand_globs, is_glob, is_remote, prepare_location, CompressionType, DataSource};
use crate::error::{EtlError, Result};
use async_trait::async_trait;
use datafusion::arrow::datatypes::{DataType, Field, Schema};
use datafusion::dataframe::DataFrame;
use datafusion::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Options for configuring CSV file reading.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvOptions {
    /// Whether the CSV file has a header row
    pub has_header: bool,
    /// Field delimiter (default: ',')
    pub delimiter: u8,
    /// Quote character (default: '"')
    pub quote: u8,
    /// Escape character (default: None)
    pub escape: Option<u8>,
    /// Comment prefix (lines starting with this are ignored)
    pub comment: Option<u8>,
    /// Extension of the data files, before any compression suffix
    pub file_extension: String,
    /// Compression type (default: Auto)
    pub compression: CompressionType,
    /// Infer column types; when false every column is read as text
    pub infer_types: bool,
    /// Maximum records to read for schema inference
    pub schema_infer_max_records: usize,
    /// Schema to use (if None, will be derived from the files)
    #[serde(skip)]
    pub schema: Option<Arc<Schema>>,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            has_header: true,
            delimiter: b',',
            quote: b'"',
            escape: None,
            comment: None,
            file_extension: ".csv".to_string(),
            compression: CompressionType::Auto,
            infer_types: false,
            schema_infer_max_records: 1000,
            schema: None,
        }
    }
}

/// A CSV data source over one or more files, a directory, or an object-store prefix.
///
/// By default every column is read as text, leaving typing to the cleaning
/// stage; set [`CsvOptions::infer_types`] to keep DataFusion's inferred types.
///
/// # Examples
///
/// ```rust,no_run
/// use supply_etl::sources::{CsvOptions, CsvSource};
///
/// # fn example() -> supply_etl::error::Result<()> {
/// let source = CsvSource::new("data/raw/sales/")?;
///
/// let options = CsvOptions {
///     delimiter: b'\t',
///     file_extension: ".tsv".to_string(),
///     ..Default::default()
/// };
/// let source = CsvSource::with_options("data/raw/shipments.tsv", options)?;
///
/// let source = CsvSource::new("data/raw/warehouse_*.csv")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CsvSource {
    paths: Vec<String>,
    options: CsvOptions,
}

impl CsvSource {
    /// Creates a new CSV source from a location.
    ///
    /// Local glob patterns are expanded immediately; local paths must exist.
    pub fn new(location: impl Into<String>) -> Result<Self> {
        Self::with_options(location, CsvOptions::default())
    }

    /// Creates a new CSV source with custom options.
    pub fn with_options(location: impl Into<String>, options: CsvOptions) -> Result<Self> {
        let location = location.into();
        let paths = resolve_location(&location)?;
        Ok(Self { paths, options })
    }

    /// Creates a CSV source from multiple file paths.
    pub fn from_paths(paths: Vec<String>) -> Result<Self> {
        if paths.is_empty() {
            return Err(EtlError::Configuration(
                "At least one path must be provided".to_string(),
            ));
        }
        Ok(Self {
            paths,
            options: CsvOptions::default(),
        })
    }

    /// Sets custom options for this CSV source.
    pub fn with_custom_options(mut self, options: CsvOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the resolved paths this source reads.
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    fn compression(&self) -> CompressionType {
        self.options.compression.resolve(&self.paths[0])
    }

    fn file_extension(&self) -> String {
        format!(
            "{}{}",
            self.options.file_extension,
            self.compression().extension()
        )
    }

    fn read_options<'a>(
        &self,
        extension: &'a str,
        schema: Option<&'a Schema>,
    ) -> CsvReadOptions<'a> {
        let mut options = CsvReadOptions::new()
            .has_header(self.options.has_header)
            .delimiter(self.options.delimiter)
            .quote(self.options.quote)
            .schema_infer_max_records(self.options.schema_infer_max_records)
            .file_extension(extension)
            .file_compression_type(self.compression().to_file_compression());

        if let Some(escape) = self.options.escape {
            options = options.escape(escape);
        }
        if let Some(comment) = self.options.comment {
            options = options.comment(comment);
        }
        if let Some(schema) = schema {
            options = options.schema(schema);
        }
        options
    }

    async fn read(&self, ctx: &SessionContext, schema: Option<&Schema>) -> Result<DataFrame> {
        let extension = self.file_extension();
        ctx.read_csv(self.paths.clone(), self.read_options(&extension, schema))
            .await
            .map_err(|e| {
                EtlError::data_source_with_source(
                    "CSV",
                    format!("Failed to read {}", self.description()),
                    Box::new(e),
                )
            })
    }
}

/// Resolves a configured location into the list of paths handed to the engine.
fn resolve_location(location: &str) -> Result<Vec<String>> {
    if location.trim().is_empty() {
        return Err(EtlError::Configuration(
            "Source location must not be empty".to_string(),
        ));
    }

    if is_remote(location) {
        return Ok(vec![location.to_string()]);
    }

    if is_glob(location) {
        return expand_globs(&[location.to_string()]);
    }

    let path = std::path::Path::new(location);
    if !path.exists() {
        return Err(EtlError::data_source(
            "CSV",
            format!("Source location '{location}' does not exist"),
        ));
    }

    // Directories are listed by prefix; the trailing separator marks them as such.
    if path.is_dir() && !location.ends_with('/') {
        return Ok(vec![format!("{location}/")]);
    }

    Ok(vec![location.to_string()])
}

/// Same field names as `schema`, every field nullable text.
fn text_schema(schema: &Schema) -> Schema {
    Schema::new(
        schema
            .fields()
            .iter()
            .map(|f| Field::new(f.name(), DataType::Utf8, true))
            .collect::<Vec<_>>(),
    )
}

#[async_trait]
impl DataSource for CsvSource {
    #[instrument(skip(self, ctx), fields(
        source.type = "csv",
        source.files = self.paths.len(),
        csv.delimiter = %self.options.delimiter as char,
        csv.has_header = self.options.has_header
    ))]
    async fn load(&self, ctx: &SessionContext) -> Result<DataFrame> {
        info!(
            source.type = "csv",
            source.paths = ?self.paths,
            csv.compression = ?self.compression(),
            csv.infer_types = self.options.infer_types,
            "Loading CSV data source"
        );

        prepare_location(ctx, &self.paths[0])?;

        let df = if let Some(schema) = &self.options.schema {
            self.read(ctx, Some(schema.as_ref())).await?
        } else {
            let inferred = self.read(ctx, None).await?;
            if self.options.infer_types {
                inferred
            } else {
                let schema = text_schema(inferred.schema().inner());
                self.read(ctx, Some(&schema)).await?
            }
        };

        debug!(
            source.type = "csv",
            source.files = self.paths.len(),
            source.columns = df.schema().fields().len(),
            "CSV data source loaded"
        );

        Ok(df)
    }

    fn schema(&self) -> Option<&Arc<Schema>> {
        self.options.schema.as_ref()
    }

    fn description(&self) -> String {
        if self.paths.len() == 1 {
            let path = &self.paths[0];
            format!("CSV source: {path}")
        } else {
            let count = self.paths.len();
            format!("CSV source: {count} files")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_csv() -> NamedTempFile {
        let mut file = NamedTempFile::with_suffix(".csv").unwrap();
        writeln!(file, "Order_ID,Quantity,Order_Date").unwrap();
        writeln!(file, "O1,5,2024-01-01").unwrap();
        writeln!(file, "O2,3,2024-01-02").unwrap();
        writeln!(file, "O3,7,2024-01-03").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_csv_source_single_file() {
        let file = create_test_csv();
        let source = CsvSource::new(file.path().to_str().unwrap()).unwrap();

        assert_eq!(source.paths().len(), 1);
        assert!(source.description().contains("CSV source"));
    }

    #[test]
    fn test_csv_source_missing_location() {
        let err = CsvSource::new("/definitely/not/here/sales.csv").unwrap_err();
        assert!(matches!(err, EtlError::DataSource { .. }));
        assert!(CsvSource::new("").is_err());
    }

    #[test]
    fn test_csv_source_empty_paths() {
        assert!(CsvSource::from_paths(vec![]).is_err());
    }

    #[tokio::test]
    async fn test_reads_all_columns_as_text_by_default() {
        let file = create_test_csv();
        let source = CsvSource::new(file.path().to_str().unwrap()).unwrap();

        let ctx = SessionContext::new();
        let df = source.load(&ctx).await.unwrap();

        for field in df.schema().fields() {
            assert_eq!(field.data_type(), &DataType::Utf8, "{}", field.name());
        }
        assert_eq!(df.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_infer_types_keeps_engine_types() {
        let file = create_test_csv();
        let options = CsvOptions {
            infer_types: true,
            ..Default::default()
        };
        let source = CsvSource::with_options(file.path().to_str().unwrap(), options).unwrap();

        let ctx = SessionContext::new();
        let df = source.load(&ctx).await.unwrap();
        let quantity = df.schema().field_with_unqualified_name("Quantity").unwrap();
        assert_eq!(quantity.data_type(), &DataType::Int64);
    }

    #[tokio::test]
    async fn test_directory_source() {
        let dir = tempfile::tempdir().unwrap();
        for (name, id) in [("part-0.csv", "O1"), ("part-1.csv", "O2")] {
            let mut file = std::fs::File::create(dir.path().join(name)).unwrap();
            writeln!(file, "Order_ID,Delay_Days").unwrap();
            writeln!(file, "{id},4").unwrap();
        }

        let source = CsvSource::new(dir.path().to_str().unwrap()).unwrap();
        let ctx = SessionContext::new();
        let df = source.load(&ctx).await.unwrap();
        assert_eq!(df.count().await.unwrap(), 2);
    }
}
