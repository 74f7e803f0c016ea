//! Execution context threaded through every pipeline stage.
//!
//! [`EtlContext`] wraps DataFusion's [`SessionContext`] together with the job
//! identity of the current run. Stages receive it explicitly instead of reaching
//! for a process-wide session, and register their outputs as named views on it.

use crate::error::{EtlError, Result};
use chrono::{DateTime, Utc};
use datafusion::dataframe::DataFrame;
use datafusion::datasource::TableProvider;
use datafusion::execution::context::{SessionConfig, SessionContext};
use datafusion::execution::memory_pool::{FairSpillPool, MemoryPool};
use datafusion::execution::runtime_env::RuntimeEnvBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, instrument};

/// Engine settings for an [`EtlContext`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EtlContextConfig {
    /// Batch size for query execution
    pub batch_size: usize,
    /// Target number of partitions for parallel execution
    pub target_partitions: usize,
    /// Maximum memory for query execution (in bytes)
    pub max_memory: usize,
    /// Materialize every stage output in memory before the next stage runs
    pub materialize_stages: bool,
}

impl Default for EtlContextConfig {
    fn default() -> Self {
        Self {
            batch_size: 8192,
            target_partitions: std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4),
            max_memory: 2 * 1024 * 1024 * 1024, // 2GB
            materialize_stages: true,
        }
    }
}

/// Identity of a single pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    /// Job name resolved from the invocation arguments
    pub job_name: String,
    /// Unique, path-safe identifier of this run
    pub run_id: String,
    /// When the run was initialized
    pub started_at: DateTime<Utc>,
}

impl JobInfo {
    /// Initializes the identity for a new run of `job_name`.
    pub fn init(job_name: impl Into<String>) -> Result<Self> {
        let job_name = job_name.into();
        if job_name.trim().is_empty() {
            return Err(EtlError::Configuration(
                "job name must not be empty".to_string(),
            ));
        }

        let started_at = Utc::now();
        let safe_name: String = job_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let run_id = format!("{safe_name}-{}", started_at.format("%Y%m%dT%H%M%S%3fZ"));

        Ok(Self {
            job_name,
            run_id,
            started_at,
        })
    }
}

/// A managed DataFusion context for one pipeline run.
///
/// # Examples
///
/// ```rust,no_run
/// use supply_etl::core::EtlContext;
///
/// # async fn example() -> supply_etl::error::Result<()> {
/// let ctx = EtlContext::new("daily-sales")?;
/// let df = ctx.sql("SELECT 1 AS one").await?;
/// ctx.register_view("one", df)?;
/// assert!(ctx.has_table("one"));
/// # Ok(())
/// # }
/// ```
pub struct EtlContext {
    inner: SessionContext,
    views: RwLock<HashMap<String, Arc<dyn TableProvider>>>,
    config: EtlContextConfig,
    job: JobInfo,
}

impl std::fmt::Debug for EtlContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtlContext")
            .field("job", &self.job)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EtlContext {
    /// Creates a new context with default engine configuration.
    #[instrument]
    pub fn new(job_name: &str) -> Result<Self> {
        Self::with_config(job_name, EtlContextConfig::default())
    }

    /// Creates a new context with custom engine configuration.
    #[instrument(skip(config))]
    pub fn with_config(job_name: &str, config: EtlContextConfig) -> Result<Self> {
        let job = JobInfo::init(job_name)?;

        let session_config = SessionConfig::new()
            .with_batch_size(config.batch_size)
            .with_target_partitions(config.target_partitions)
            .with_information_schema(true);

        let memory_pool = Arc::new(FairSpillPool::new(config.max_memory)) as Arc<dyn MemoryPool>;

        let runtime_env = RuntimeEnvBuilder::new()
            .with_memory_pool(memory_pool)
            .with_temp_file_path(std::env::temp_dir())
            .build()
            .map(Arc::new)?;

        let inner = SessionContext::new_with_config_rt(session_config, runtime_env);

        Ok(Self {
            inner,
            views: RwLock::new(HashMap::new()),
            config,
            job,
        })
    }

    /// Returns a reference to the underlying DataFusion [`SessionContext`].
    pub fn inner(&self) -> &SessionContext {
        &self.inner
    }

    /// Returns the engine configuration used to create this context.
    pub fn config(&self) -> &EtlContextConfig {
        &self.config
    }

    /// Returns the identity of the current run.
    pub fn job(&self) -> &JobInfo {
        &self.job
    }

    /// Plans a SQL query against the registered views.
    pub async fn sql(&self, sql: &str) -> Result<DataFrame> {
        debug!(query = %sql, "Planning stage query");
        Ok(self.inner.sql(sql).await?)
    }

    /// Materializes a stage output when `materialize_stages` is enabled.
    ///
    /// Otherwise the DataFrame is returned as-is and the engine is free to fuse
    /// it with the stages that consume it.
    pub async fn materialize(&self, df: DataFrame) -> Result<DataFrame> {
        if self.config.materialize_stages {
            Ok(df.cache().await?)
        } else {
            Ok(df)
        }
    }

    /// Registers a DataFrame as a named view, replacing any previous view of that name.
    #[instrument(skip(self, df))]
    pub fn register_view(&self, name: &str, df: DataFrame) -> Result<()> {
        let provider = df.into_view();
        self.inner.deregister_table(name)?;
        self.inner.register_table(name, provider.clone())?;
        self.views
            .write()
            .map_err(|_| EtlError::Internal("view registry lock poisoned".to_string()))?
            .insert(name.to_string(), provider);
        Ok(())
    }

    /// Returns a registered view as a DataFrame.
    pub async fn table(&self, name: &str) -> Result<DataFrame> {
        Ok(self.inner.table(name).await?)
    }

    /// Returns the names of all views registered through this context.
    pub fn registered_tables(&self) -> Vec<String> {
        self.views
            .read()
            .map(|views| {
                let mut names: Vec<String> = views.keys().cloned().collect();
                names.sort();
                names
            })
            .unwrap_or_default()
    }

    /// Checks if a view is registered.
    pub fn has_table(&self, name: &str) -> bool {
        self.views
            .read()
            .map(|views| views.contains_key(name))
            .unwrap_or(false)
    }

    /// Deregisters a view.
    pub fn deregister_table(&self, name: &str) -> Result<()> {
        self.inner.deregister_table(name)?;
        self.views
            .write()
            .map_err(|_| EtlError::Internal("view registry lock poisoned".to_string()))?
            .remove(name);
        Ok(())
    }

    /// Deregisters every view registered through this context.
    pub fn clear_tables(&self) -> Result<()> {
        for name in self.registered_tables() {
            self.deregister_table(&name)?;
        }
        Ok(())
    }
}

impl Drop for EtlContext {
    fn drop(&mut self) {
        if let Err(e) = self.clear_tables() {
            tracing::warn!("Failed to clear views during EtlContext drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;

    #[test]
    fn test_default_config() {
        let config = EtlContextConfig::default();
        assert_eq!(config.batch_size, 8192);
        assert_eq!(config.max_memory, 2 * 1024 * 1024 * 1024);
        assert!(config.target_partitions >= 1);
        assert!(config.materialize_stages);
    }

    #[test]
    fn test_job_info_run_id_is_path_safe() {
        let job = JobInfo::init("daily sales/etl").unwrap();
        assert_eq!(job.job_name, "daily sales/etl");
        assert!(job.run_id.starts_with("daily_sales_etl-"));
        assert!(job
            .run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_empty_job_name_rejected() {
        assert!(JobInfo::init("  ").is_err());
        assert!(EtlContext::new("").is_err());
    }

    #[tokio::test]
    async fn test_register_and_replace_view() {
        let ctx = EtlContext::new("test").unwrap();

        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3])),
                Arc::new(StringArray::from(vec!["a", "b", "c"])),
            ],
        )
        .unwrap();

        let df = ctx.inner().read_batch(batch).unwrap();
        ctx.register_view("items", df).unwrap();
        assert!(ctx.has_table("items"));

        let filtered = ctx.sql("SELECT * FROM items WHERE id > 1").await.unwrap();
        ctx.register_view("items", filtered).unwrap();

        let count = ctx.table("items").await.unwrap().count().await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(ctx.registered_tables(), vec!["items".to_string()]);
    }

    #[tokio::test]
    async fn test_clear_tables() {
        let ctx = EtlContext::new("test").unwrap();
        for i in 0..3 {
            let df = ctx.sql(&format!("SELECT {i} AS n")).await.unwrap();
            ctx.register_view(&format!("t{i}"), df).unwrap();
        }
        assert_eq!(ctx.registered_tables().len(), 3);

        ctx.clear_tables().unwrap();
        assert!(ctx.registered_tables().is_empty());
        assert!(ctx.table("t0").await.is_err());
    }
}
