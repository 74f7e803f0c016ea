//! Prelude for commonly used types and traits in supply-etl.

pub use crate::catalog::{InMemoryCatalog, JsonFileCatalog, SchemaCatalog};
pub use crate::config::PipelineConfig;
pub use crate::core::{EtlContext, EtlContextConfig};
pub use crate::error::{ErrorContext, EtlError, Result};
pub use crate::formatters::{FormatterConfig, HumanFormatter, JsonFormatter, ReportFormatter};
pub use crate::logging::LogConfig;
pub use crate::pipeline::{InputSources, Pipeline};
pub use crate::quality::{Level, QualityCheck, QualityGate};
pub use crate::report::RunReport;
pub use crate::sources::{CsvSource, DataSource};
