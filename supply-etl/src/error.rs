//! Error types for the supply-etl pipeline.
//!
//! All fallible operations in the crate return [`EtlError`]. The taxonomy follows
//! the pipeline's failure model: I/O and engine errors are fatal and propagate to
//! the process exit, a quality-gate breach is raised deliberately, and row-level
//! data problems never surface here (they are dropped and counted instead).

use thiserror::Error;

/// The main error type for the pipeline.
#[derive(Error, Debug)]
pub enum EtlError {
    /// A pipeline stage failed for a reason that is not an engine error.
    #[error("Stage '{stage}' failed: {message}")]
    Stage {
        /// Name of the stage that failed
        stage: String,
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The data-quality gate rejected the run.
    #[error("Quality gate failed on '{check}': {message}")]
    QualityGate {
        /// Name of the failing check
        check: String,
        /// Detailed error message
        message: String,
        /// Metric observed by the check, if any
        metric: Option<f64>,
    },

    /// Error from DataFusion operations.
    #[error("DataFusion error: {0}")]
    DataFusion(#[from] datafusion::error::DataFusionError),

    /// Error from Arrow operations.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Error from object store operations.
    #[cfg(feature = "cloud-storage")]
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// Error from data source operations.
    #[error("Data source error: {message}")]
    DataSource {
        /// Type of data source (e.g., "CSV", "S3")
        source_type: String,
        /// Detailed error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Error from I/O operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error related to configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The output schema cannot be reconciled with the catalog entry.
    #[error("Schema evolution rejected for '{table}': {message}")]
    SchemaEvolution { table: String, message: String },

    /// Error from serialization/deserialization operations.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error when a required column is not found in a source.
    #[error("Column '{column}' not found in {table}")]
    ColumnNotFound { table: String, column: String },

    /// Generic internal error for unexpected conditions.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Security-related error.
    #[error("Security error: {0}")]
    SecurityError(String),
}

/// A type alias for `Result<T, EtlError>`.
pub type Result<T> = std::result::Result<T, EtlError>;

impl EtlError {
    /// Creates a new stage error.
    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new stage error with a source error.
    pub fn stage_with_source(
        stage: impl Into<String>,
        message: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Stage {
            stage: stage.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Creates a new data source error.
    pub fn data_source(source_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DataSource {
            source_type: source_type.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new data source error with a source error.
    pub fn data_source_with_source(
        source_type: impl Into<String>,
        message: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::DataSource {
            source_type: source_type.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Creates a new quality gate error.
    pub fn quality_gate(
        check: impl Into<String>,
        message: impl Into<String>,
        metric: Option<f64>,
    ) -> Self {
        Self::QualityGate {
            check: check.into(),
            message: message.into(),
            metric,
        }
    }

    /// Returns true if this error was raised by the quality gate.
    pub fn is_quality_failure(&self) -> bool {
        matches!(self, Self::QualityGate { .. })
    }
}

impl From<serde_json::Error> for EtlError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Adds context to an error.
    fn context(self, msg: &str) -> Result<T>;

    /// Adds context with a lazy message.
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<EtlError>,
{
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| match e.into() {
            EtlError::Internal(inner) => EtlError::Internal(format!("{msg}: {inner}")),
            other => EtlError::Internal(format!("{msg}: {other}")),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let msg = f();
            match e.into() {
                EtlError::Internal(inner) => EtlError::Internal(format!("{msg}: {inner}")),
                other => EtlError::Internal(format!("{msg}: {other}")),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_stage_error() {
        let err = EtlError::stage("clean", "no rows");
        assert_eq!(err.to_string(), "Stage 'clean' failed: no rows");
    }

    #[test]
    fn test_stage_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let err = EtlError::stage_with_source("ingest", "could not open", Box::new(source));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_quality_gate_error() {
        let err = EtlError::quality_gate("null_rate(daily_qty)", "High null rate detected", Some(0.1));
        assert!(err.is_quality_failure());
        assert_eq!(
            err.to_string(),
            "Quality gate failed on 'null_rate(daily_qty)': High null rate detected"
        );
    }

    #[test]
    fn test_data_source_error() {
        let err = EtlError::data_source("CSV", "Invalid file format");
        assert_eq!(err.to_string(), "Data source error: Invalid file format");
        assert!(!err.is_quality_failure());
    }

    #[test]
    fn test_column_not_found() {
        let err = EtlError::ColumnNotFound {
            table: "raw_sales".to_string(),
            column: "Order_ID".to_string(),
        };
        assert_eq!(err.to_string(), "Column 'Order_ID' not found in raw_sales");
    }

    #[test]
    fn test_error_context() {
        fn failing_operation() -> Result<()> {
            Err(EtlError::Internal("Something went wrong".to_string()))
        }

        let err = failing_operation().context("During aggregation").unwrap_err();
        assert!(err.to_string().contains("During aggregation"));
    }
}
