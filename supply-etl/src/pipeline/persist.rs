//! Partitioned Parquet output with staging-then-swap overwrite.
//!
//! The aggregate is first written to a staging location next to the output.
//! Only after the quality gate passes does the staged dataset replace the live
//! one; a failed gate discards it and leaves the live output untouched.
//!
//! Partition directories follow the Hive layout `region=…/year=…/month=…/day=…`.
//! Null partition values are written as [`NULL_PARTITION`].

use super::tables;
use crate::core::EtlContext;
use crate::error::{EtlError, Result};
use crate::sources::is_remote;
use arrow::array::AsArray;
use arrow::datatypes::{SchemaRef, UInt64Type};
use datafusion::dataframe::{DataFrame, DataFrameWriteOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

#[cfg(feature = "cloud-storage")]
use crate::sources::prepare_location;
#[cfg(feature = "cloud-storage")]
use futures::TryStreamExt;
#[cfg(feature = "cloud-storage")]
use object_store::{path::Path as ObjectPath, ObjectMeta, ObjectStore};
#[cfg(feature = "cloud-storage")]
use std::sync::Arc;
#[cfg(feature = "cloud-storage")]
use url::Url;

/// Partition value written for nulls.
pub const NULL_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

/// Partition columns, outermost first.
pub const PARTITION_COLUMNS: [&str; 4] = ["region", "year", "month", "day"];

/// Data columns of every written file.
const DATA_COLUMNS: &str =
    "product_id, sales_date, daily_qty, daily_sales, lag_7d_qty, delay_days, adjusted_qty";

fn date_partition(part: &str) -> String {
    format!(
        "COALESCE(arrow_cast(CAST(date_part('{part}', sales_date) AS INT), 'Utf8'), '{NULL_PARTITION}') AS \"{part}\""
    )
}

fn partitioned_sql() -> String {
    format!(
        "SELECT {DATA_COLUMNS},
            COALESCE(arrow_cast(region, 'Utf8'), '{NULL_PARTITION}') AS \"region\",
            {year},
            {month},
            {day}
         FROM {aggregate}",
        year = date_partition("year"),
        month = date_partition("month"),
        day = date_partition("day"),
        aggregate = tables::ADJUSTED_AGGREGATE
    )
}

/// Where the partitioned dataset lives.
#[derive(Debug, Clone)]
pub enum OutputLocation {
    /// A directory on the local file system
    Local(PathBuf),
    /// A prefix in an object store
    #[cfg(feature = "cloud-storage")]
    Remote {
        url: Url,
        store: Arc<dyn ObjectStore>,
    },
}

impl OutputLocation {
    /// Parses a configured output location.
    pub fn parse(location: &str) -> Result<Self> {
        let location = location.trim();
        if location.is_empty() {
            return Err(EtlError::Configuration(
                "Output location must not be empty".to_string(),
            ));
        }

        if is_remote(location) {
            return Self::remote(location);
        }

        let path = std::path::absolute(location)?;
        if path.file_name().is_none() {
            return Err(EtlError::Configuration(format!(
                "Output location '{location}' must name a directory below the root"
            )));
        }
        Ok(Self::Local(path))
    }

    #[cfg(feature = "cloud-storage")]
    fn remote(location: &str) -> Result<Self> {
        let mut url = Url::parse(location)
            .map_err(|e| EtlError::Configuration(format!("Invalid output URL '{location}': {e}")))?;
        let trimmed = url.path().trim_end_matches('/').to_string();
        if trimmed.is_empty() {
            return Err(EtlError::Configuration(format!(
                "Output location '{location}' must name a prefix below the bucket"
            )));
        }
        url.set_path(&trimmed);
        let store = crate::sources::cloud::object_store_for(location)?;
        Ok(Self::Remote { url, store })
    }

    #[cfg(not(feature = "cloud-storage"))]
    fn remote(location: &str) -> Result<Self> {
        Err(EtlError::Configuration(format!(
            "'{location}' is an object-store location but supply-etl was built without cloud storage support (enable the `s3` feature)"
        )))
    }

    /// The location as handed to the engine, with a trailing separator so it
    /// is treated as a directory.
    pub fn table_url(&self) -> String {
        match self {
            Self::Local(path) => format!("{}/", path.display()),
            #[cfg(feature = "cloud-storage")]
            Self::Remote { url, .. } => format!("{url}/"),
        }
    }

    /// A sibling location for staging the output of run `run_id`.
    fn staging(&self, run_id: &str) -> Self {
        match self {
            Self::Local(path) => Self::Local(sibling(path, &format!("staging-{run_id}"))),
            #[cfg(feature = "cloud-storage")]
            Self::Remote { url, store } => {
                let mut staged = url.clone();
                staged.set_path(&format!("{}.staging-{run_id}", url.path()));
                Self::Remote {
                    url: staged,
                    store: Arc::clone(store),
                }
            }
        }
    }

    #[cfg_attr(not(feature = "cloud-storage"), allow(unused_variables))]
    async fn prepare(&self, ctx: &EtlContext) -> Result<()> {
        match self {
            Self::Local(path) => {
                tokio::fs::create_dir_all(path).await?;
                Ok(())
            }
            #[cfg(feature = "cloud-storage")]
            Self::Remote { url, .. } => prepare_location(ctx.inner(), url.as_str()),
        }
    }

    async fn remove(&self) -> Result<()> {
        match self {
            Self::Local(path) => remove_local(path).await,
            #[cfg(feature = "cloud-storage")]
            Self::Remote { url, store } => {
                let prefix = object_prefix(url)?;
                for meta in list(store.as_ref(), &prefix).await? {
                    store.delete(&meta.location).await?;
                }
                Ok(())
            }
        }
    }

    async fn replace_with(&self, staged: &Self, run_id: &str) -> Result<()> {
        match (self, staged) {
            (Self::Local(target), Self::Local(staging)) => {
                replace_local(target, staging, run_id).await
            }
            #[cfg(feature = "cloud-storage")]
            (Self::Remote { url, store }, Self::Remote { url: staged_url, .. }) => {
                replace_remote(store.as_ref(), url, staged_url).await
            }
            #[cfg(feature = "cloud-storage")]
            _ => Err(EtlError::Internal(
                "staging and output locations use different storage".to_string(),
            )),
        }
    }
}

impl std::fmt::Display for OutputLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            #[cfg(feature = "cloud-storage")]
            Self::Remote { url, .. } => write!(f, "{url}"),
        }
    }
}

/// `path` with its final component renamed to `.{name}.{suffix}`.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{suffix}"))
}

async fn remove_local(path: &Path) -> Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => Ok(tokio::fs::remove_dir_all(path).await?),
        Ok(_) => Ok(tokio::fs::remove_file(path).await?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Moves the previous output aside, renames staging into place, then drops
/// the previous output. A failed rename restores the previous output.
async fn replace_local(target: &Path, staging: &Path, run_id: &str) -> Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let backup = sibling(target, &format!("replaced-{run_id}"));
    let had_previous = tokio::fs::try_exists(target).await?;
    if had_previous {
        tokio::fs::rename(target, &backup).await?;
    }

    if let Err(e) = tokio::fs::rename(staging, target).await {
        if had_previous {
            if let Err(restore) = tokio::fs::rename(&backup, target).await {
                warn!(
                    backup = %backup.display(),
                    error = %restore,
                    "Failed to restore previous output"
                );
            }
        }
        return Err(e.into());
    }

    if had_previous {
        remove_local(&backup).await?;
    }
    Ok(())
}

#[cfg(feature = "cloud-storage")]
fn object_prefix(url: &Url) -> Result<ObjectPath> {
    ObjectPath::from_url_path(url.path()).map_err(|e| {
        EtlError::Configuration(format!("Invalid object store path '{}': {e}", url.path()))
    })
}

#[cfg(feature = "cloud-storage")]
async fn list(store: &dyn ObjectStore, prefix: &ObjectPath) -> Result<Vec<ObjectMeta>> {
    Ok(store.list(Some(prefix)).try_collect().await?)
}

/// Object stores have no rename: the live prefix is cleared, then every
/// staged object is copied into place and removed from staging.
#[cfg(feature = "cloud-storage")]
async fn replace_remote(store: &dyn ObjectStore, target: &Url, staging: &Url) -> Result<()> {
    let target_prefix = object_prefix(target)?;
    let staging_prefix = object_prefix(staging)?;

    for meta in list(store, &target_prefix).await? {
        store.delete(&meta.location).await?;
    }

    for meta in list(store, &staging_prefix).await? {
        let Some(parts) = meta.location.prefix_match(&staging_prefix) else {
            continue;
        };
        let destination = parts.fold(target_prefix.clone(), |path, part| path.child(part));
        store.copy(&meta.location, &destination).await?;
        store.delete(&meta.location).await?;
    }
    Ok(())
}

/// A partitioned dataset written to staging, waiting for the quality gate.
#[derive(Debug)]
#[must_use = "a staged output must be committed or discarded"]
pub struct StagedOutput {
    target: OutputLocation,
    staging: OutputLocation,
    run_id: String,
    rows_written: u64,
    schema: SchemaRef,
}

impl StagedOutput {
    /// Rows written to staging.
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Schema of the data columns in every written file.
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Where the dataset will be published.
    pub fn target(&self) -> &OutputLocation {
        &self.target
    }

    /// Where the dataset currently sits.
    pub fn staging(&self) -> &OutputLocation {
        &self.staging
    }

    /// Replaces the live output with the staged dataset.
    #[instrument(skip(self), fields(output = %self.target, rows = self.rows_written))]
    pub async fn commit(self) -> Result<()> {
        self.target.replace_with(&self.staging, &self.run_id).await?;
        info!(output = %self.target, rows = self.rows_written, "Published partitioned output");
        Ok(())
    }

    /// Deletes the staged dataset, leaving the live output untouched.
    #[instrument(skip(self), fields(staging = %self.staging))]
    pub async fn discard(self) -> Result<()> {
        self.staging.remove().await?;
        warn!(output = %self.target, "Discarded staged output");
        Ok(())
    }
}

fn rows_from_write_result(batches: &[arrow::record_batch::RecordBatch]) -> u64 {
    batches
        .iter()
        .filter_map(|batch| batch.column_by_name("count"))
        .filter_map(|column| column.as_primitive_opt::<UInt64Type>())
        .map(|counts| counts.iter().flatten().sum::<u64>())
        .sum()
}

/// Writes the adjusted aggregate to a staging location beside `target`.
#[instrument(skip_all, fields(stage = "persist", output = %target))]
pub async fn stage_output(
    ctx: &EtlContext,
    aggregate: DataFrame,
    target: &OutputLocation,
) -> Result<StagedOutput> {
    ctx.register_view(tables::ADJUSTED_AGGREGATE, aggregate)?;

    let staging = target.staging(&ctx.job().run_id);
    staging.remove().await?;
    staging.prepare(ctx).await?;

    let partitioned = ctx.sql(&partitioned_sql()).await?;
    let schema = ctx
        .sql(&format!(
            "SELECT {DATA_COLUMNS} FROM {}",
            tables::ADJUSTED_AGGREGATE
        ))
        .await?
        .schema()
        .inner()
        .clone();

    debug!(staging = %staging, "Writing partitioned Parquet to staging");
    let options = DataFrameWriteOptions::new().with_partition_by(
        PARTITION_COLUMNS.iter().map(|c| c.to_string()).collect(),
    );
    let result = partitioned
        .write_parquet(&staging.table_url(), options, None)
        .await;

    let batches = match result {
        Ok(batches) => batches,
        Err(e) => {
            if let Err(cleanup) = staging.remove().await {
                warn!(error = %cleanup, "Failed to remove partial staging output");
            }
            return Err(EtlError::stage_with_source(
                "persist",
                format!("Failed to write Parquet to {staging}"),
                Box::new(e),
            ));
        }
    };

    let rows_written = rows_from_write_result(&batches);
    info!(rows.written = rows_written, staging = %staging, "Staged partitioned output");

    Ok(StagedOutput {
        target: target.clone(),
        staging,
        run_id: ctx.job().run_id.clone(),
        rows_written,
        schema,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn adjusted_frame(ctx: &EtlContext, values: &str) -> DataFrame {
        ctx.sql(&format!(
            "SELECT region, product_id, sales_date, daily_qty, daily_sales,
                CAST(NULL AS BIGINT) AS lag_7d_qty, delay_days, CAST(daily_qty AS DOUBLE) AS adjusted_qty
             FROM (VALUES {values}) AS t(region, product_id, sales_date, daily_qty, daily_sales, delay_days)"
        ))
        .await
        .unwrap()
    }

    #[test]
    fn test_parse_local_location() {
        let location = OutputLocation::parse("out/sales").unwrap();
        assert!(matches!(location, OutputLocation::Local(ref p) if p.is_absolute()));
        assert!(location.table_url().ends_with("out/sales/"));
        assert!(OutputLocation::parse(" ").is_err());
        assert!(OutputLocation::parse("/").is_err());
    }

    #[cfg(not(feature = "cloud-storage"))]
    #[test]
    fn test_remote_output_requires_cloud_feature() {
        let err = OutputLocation::parse("s3://bucket/processed/sales/").unwrap_err();
        assert!(matches!(err, EtlError::Configuration(_)));
    }

    #[test]
    fn test_staging_is_a_hidden_sibling() {
        let target = OutputLocation::Local(PathBuf::from("/data/processed/sales"));
        let staging = target.staging("job-20240105T000000000Z");
        assert_eq!(
            staging.to_string(),
            "/data/processed/.sales.staging-job-20240105T000000000Z"
        );
    }

    #[tokio::test]
    async fn test_commit_writes_hive_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let target = OutputLocation::parse(dir.path().join("sales").to_str().unwrap()).unwrap();

        let ctx = EtlContext::new("persist-test").unwrap();
        let aggregate = adjusted_frame(
            &ctx,
            "('NORTH', 'P1', CAST('2024-01-05' AS DATE), CAST(5 AS BIGINT), 10.0, CAST(NULL AS BIGINT)),
             ('SOUTH', 'P2', CAST(NULL AS DATE), CAST(2 AS BIGINT), 4.0, CAST(4 AS BIGINT))",
        )
        .await;

        let staged = stage_output(&ctx, aggregate, &target).await.unwrap();
        assert_eq!(staged.rows_written(), 2);
        assert_eq!(staged.schema().fields().len(), 7);
        staged.commit().await.unwrap();

        let root = dir.path().join("sales");
        assert!(root.join("region=NORTH/year=2024/month=1/day=5").is_dir());
        assert!(root
            .join(format!(
                "region=SOUTH/year={NULL_PARTITION}/month={NULL_PARTITION}/day={NULL_PARTITION}"
            ))
            .is_dir());

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("sales")]);
    }

    #[tokio::test]
    async fn test_commit_replaces_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("sales");
        std::fs::create_dir_all(root.join("region=OLD")).unwrap();
        std::fs::write(root.join("region=OLD/part.parquet"), b"stale").unwrap();
        let target = OutputLocation::parse(root.to_str().unwrap()).unwrap();

        let ctx = EtlContext::new("persist-test").unwrap();
        let aggregate = adjusted_frame(
            &ctx,
            "('NORTH', 'P1', CAST('2024-01-05' AS DATE), CAST(5 AS BIGINT), 10.0, CAST(NULL AS BIGINT))",
        )
        .await;

        stage_output(&ctx, aggregate, &target)
            .await
            .unwrap()
            .commit()
            .await
            .unwrap();

        assert!(!root.join("region=OLD").exists());
        assert!(root.join("region=NORTH").is_dir());
    }

    #[tokio::test]
    async fn test_discard_keeps_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("sales");
        std::fs::create_dir_all(root.join("region=OLD")).unwrap();
        let target = OutputLocation::parse(root.to_str().unwrap()).unwrap();

        let ctx = EtlContext::new("persist-test").unwrap();
        let aggregate = adjusted_frame(
            &ctx,
            "('NORTH', 'P1', CAST('2024-01-05' AS DATE), CAST(5 AS BIGINT), 10.0, CAST(NULL AS BIGINT))",
        )
        .await;

        let staged = stage_output(&ctx, aggregate, &target).await.unwrap();
        let staging = staged.staging().to_string();
        staged.discard().await.unwrap();

        assert!(root.join("region=OLD").is_dir());
        assert!(!root.join("region=NORTH").exists());
        assert!(!Path::new(&staging).exists());
    }
}
