//! The sales pipeline: stages and the orchestrator that runs them.
//!
//! Each stage takes DataFrames in and returns a DataFrame (plus counts) out,
//! registering its inputs and output under the names in [`tables`] so that
//! later stages and the quality gate can query them with SQL.
//!
//! ```text
//! ingest -> clean -> normalize -> enrich -> aggregate -> delay -> stage
//!        -> catalog check -> quality gate -> commit -> catalog store
//! ```

use crate::catalog::{evolve, InMemoryCatalog, JsonFileCatalog, SchemaCatalog, TableSchema};
use crate::config::PipelineConfig;
use crate::core::EtlContext;
use crate::error::{EtlError, Result};
use crate::logging::LogConfig;
use crate::quality::QualityGate;
use crate::report::{CatalogSummary, RunReport};
use arrow::array::{Array, AsArray};
use arrow::datatypes::{DataType, Int64Type};
use datafusion::dataframe::DataFrame;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

mod aggregate;
mod clean;
mod delay;
mod enrich;
mod ingest;
mod persist;

pub use aggregate::{aggregate_daily, LAG_PERIODS};
pub use clean::{clean_sales, CleanOutput, CleanStats};
pub use delay::{adjust_for_delays, adjusted_quantity, DelayOutput, DelayStats};
pub use enrich::{enrich_with_warehouse, normalize_regions, EnrichOutput, EnrichStats};
pub use ingest::{ingest, InputSources, RawInputs};
pub use persist::{stage_output, OutputLocation, StagedOutput, NULL_PARTITION, PARTITION_COLUMNS};

/// Names under which stage inputs and outputs are registered.
pub mod tables {
    pub const RAW_SALES: &str = "raw_sales";
    pub const RAW_SHIPMENTS: &str = "raw_shipments";
    pub const RAW_WAREHOUSE: &str = "raw_warehouse";
    pub const CLEAN_SALES: &str = "clean_sales";
    pub const ENRICHED_SALES: &str = "enriched_sales";
    pub const DAILY_AGGREGATE: &str = "daily_aggregate";
    pub const ADJUSTED_AGGREGATE: &str = "adjusted_aggregate";
}

/// Columns of a cleaned sales row.
pub(crate) const SALES_COLUMNS: [&str; 8] = [
    "order_id",
    "product_id",
    "region",
    "order_date",
    "quantity",
    "unit_price",
    "discount",
    "total_sales",
];

/// Fails with [`EtlError::ColumnNotFound`] for the first missing column.
pub(crate) fn require_columns<S: AsRef<str>>(
    df: &DataFrame,
    table: &str,
    columns: &[S],
) -> Result<()> {
    match columns.iter().find(|c| !has_column(df, c.as_ref())) {
        Some(missing) => Err(EtlError::ColumnNotFound {
            table: table.to_string(),
            column: missing.as_ref().to_string(),
        }),
        None => Ok(()),
    }
}

pub(crate) fn has_column(df: &DataFrame, name: &str) -> bool {
    df.schema().has_column_with_unqualified_name(name)
}

pub(crate) async fn count_rows(df: &DataFrame) -> Result<usize> {
    Ok(df.clone().count().await?)
}

/// Runs a query returning a single count and reads it back.
pub(crate) async fn query_count(ctx: &EtlContext, sql: &str) -> Result<usize> {
    let batches = ctx.sql(sql).await?.collect().await?;
    let column = batches
        .iter()
        .find(|b| b.num_rows() > 0)
        .map(|b| b.column(0).clone())
        .ok_or_else(|| EtlError::Internal(format!("Count query returned no rows: {sql}")))?;
    let counts = arrow::compute::cast(&column, &DataType::Int64)?;
    let counts = counts.as_primitive::<Int64Type>();
    if counts.is_null(0) {
        return Ok(0);
    }
    Ok(counts.value(0).max(0) as usize)
}

/// SQL expression truncating `column` to its calendar day as a DATE.
pub(crate) fn day_of(column: &str) -> String {
    format!("CAST(date_trunc('day', CAST({column} AS TIMESTAMP)) AS DATE)")
}

/// Runs the full pipeline for one configuration.
///
/// # Examples
///
/// ```rust,no_run
/// use supply_etl::config::PipelineConfig;
/// use supply_etl::pipeline::Pipeline;
///
/// # async fn example() -> supply_etl::error::Result<()> {
/// let config = PipelineConfig::from_json_file("pipeline.json")?;
/// let pipeline = Pipeline::new(config)?;
/// let ctx = pipeline.context("daily-sales")?;
/// let report = pipeline.run(&ctx).await?;
/// println!("wrote {} rows", report.rows_written);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    catalog: Arc<dyn SchemaCatalog>,
    log_config: LogConfig,
}

impl Pipeline {
    /// Validates `config` and opens the catalog it names.
    ///
    /// Without a catalog path, schemas are tracked in memory for the run only.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let catalog: Arc<dyn SchemaCatalog> = match &config.catalog.path {
            Some(path) => Arc::new(JsonFileCatalog::new(path)),
            None => Arc::new(InMemoryCatalog::new()),
        };
        Ok(Self {
            config,
            catalog,
            log_config: LogConfig::default(),
        })
    }

    /// Replaces the schema catalog.
    pub fn with_catalog(mut self, catalog: Arc<dyn SchemaCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_log_config(mut self, log_config: LogConfig) -> Self {
        self.log_config = log_config;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<dyn SchemaCatalog> {
        &self.catalog
    }

    /// Creates an engine context for a run of `job_name` with the configured engine settings.
    pub fn context(&self, job_name: &str) -> Result<EtlContext> {
        EtlContext::with_config(job_name, self.config.engine.clone())
    }

    /// Runs the pipeline against the configured CSV sources.
    pub async fn run(&self, ctx: &EtlContext) -> Result<RunReport> {
        let sources = ingest::InputSources::from_config(&self.config.sources)?;
        self.run_with_sources(ctx, &sources).await
    }

    /// Runs the pipeline against explicit sources.
    ///
    /// Any stage error aborts the run. Output is only published once the
    /// quality gate passes; on every failure after staging, the staged
    /// dataset is discarded and the live output is left as it was.
    #[instrument(skip_all, fields(
        job.name = %ctx.job().job_name,
        job.run_id = %ctx.job().run_id,
        output = %self.config.output.location
    ))]
    pub async fn run_with_sources(
        &self,
        ctx: &EtlContext,
        sources: &InputSources,
    ) -> Result<RunReport> {
        info!(
            job.name = %ctx.job().job_name,
            source.sales = %self.log_config.truncate(&sources.sales.description()),
            source.shipments = %self.log_config.truncate(&sources.shipments.description()),
            source.warehouse = %self.log_config.truncate(&sources.warehouse.description()),
            "Starting pipeline run"
        );

        let config = &self.config;
        let target = OutputLocation::parse(&config.output.location)?;
        let mut report = RunReport::new(ctx.job(), target.to_string());

        let started = Instant::now();
        let raw = ingest(ctx, sources, &config.columns).await?;
        self.finish_stage(&mut report, "ingest", started, None);

        let started = Instant::now();
        let cleaned = clean_sales(ctx, raw.sales, &config.columns).await?;
        report.clean = cleaned.stats;
        self.finish_stage(&mut report, "clean", started, Some(cleaned.stats.output_rows));

        let started = Instant::now();
        let normalized = normalize_regions(ctx, cleaned.sales, &config.normalization).await?;
        let enriched =
            enrich_with_warehouse(ctx, normalized, raw.warehouse, &config.columns).await?;
        let enriched_rows = enriched.stats.rows;
        report.enrich = enriched.stats;
        self.finish_stage(&mut report, "enrich", started, Some(enriched_rows));

        let started = Instant::now();
        let daily = aggregate_daily(ctx, enriched.sales.clone()).await?;
        report.aggregate_rows = count_rows(&daily).await?;
        let aggregate_rows = report.aggregate_rows;
        self.finish_stage(&mut report, "aggregate", started, Some(aggregate_rows));

        let started = Instant::now();
        let adjusted = adjust_for_delays(
            ctx,
            daily,
            enriched.sales,
            raw.shipments,
            &config.columns,
            &config.delay,
        )
        .await?;
        report.delay = adjusted.stats;
        self.finish_stage(&mut report, "delay_adjustment", started, Some(aggregate_rows));

        let started = Instant::now();
        let staged = stage_output(ctx, adjusted.aggregate, &target).await?;
        report.rows_written = staged.rows_written();
        crate::log_data_op!(
            self.log_config,
            staging = %staged.staging(),
            rows.written = staged.rows_written(),
            "Output staged, awaiting catalog and quality checks"
        );
        self.finish_stage(
            &mut report,
            "persist",
            started,
            Some(staged.rows_written() as usize),
        );

        let started = Instant::now();
        let entry = match self.check_catalog(ctx, &staged, &target).await {
            Ok(entry) => entry,
            Err(e) => return Self::abandon(staged, e).await,
        };
        self.finish_stage(&mut report, "catalog", started, None);

        let started = Instant::now();
        let gate = QualityGate::from_config(&config.quality);
        let gate_report = match gate.evaluate(ctx, tables::ADJUSTED_AGGREGATE).await {
            Ok(gate_report) => gate_report,
            Err(e) => return Self::abandon(staged, e).await,
        };
        if let Err(e) = gate_report.enforce() {
            error!(
                table = tables::ADJUSTED_AGGREGATE,
                error = %self.log_config.truncate(&e.to_string()),
                "Quality gate failed, live output left untouched"
            );
            return Self::abandon(staged, e).await;
        }
        report.quality = gate_report;
        self.finish_stage(&mut report, "quality_gate", started, None);

        let started = Instant::now();
        staged.commit().await?;
        self.catalog.store(entry.clone()).await?;
        report.catalog = Some(CatalogSummary::from(&entry));
        self.finish_stage(&mut report, "publish", started, None);

        report.finish();
        info!(
            job.name = %report.job_name,
            rows.written = report.rows_written,
            catalog.version = entry.version,
            duration_ms = report.duration_ms(),
            "Pipeline run completed"
        );
        Ok(report)
    }

    /// Merges the staged schema into the catalog entry without storing it.
    async fn check_catalog(
        &self,
        ctx: &EtlContext,
        staged: &StagedOutput,
        target: &OutputLocation,
    ) -> Result<crate::catalog::CatalogEntry> {
        let table = self.config.catalog_table();
        let schema =
            TableSchema::from_arrow(&table, target.to_string(), staged.schema(), &PARTITION_COLUMNS);
        let previous = self.catalog.load(&table).await?;
        let entry = evolve(
            previous.as_ref(),
            schema,
            self.config.catalog.evolution,
            &ctx.job().run_id,
        )?;
        crate::log_stage!(
            self.log_config,
            catalog = %self.catalog.description(),
            catalog.table = %table,
            catalog.version = entry.version,
            catalog.fingerprint = %entry.fingerprint,
            "Checked output schema against catalog"
        );
        Ok(entry)
    }

    /// Discards the staged output and returns `err`.
    async fn abandon<T>(staged: StagedOutput, err: EtlError) -> Result<T> {
        if let Err(cleanup) = staged.discard().await {
            warn!(error = %cleanup, "Failed to discard staged output");
        }
        Err(err)
    }

    fn finish_stage(
        &self,
        report: &mut RunReport,
        stage: &str,
        started: Instant,
        rows: Option<usize>,
    ) {
        let elapsed = started.elapsed();
        crate::perf_debug!(
            self.log_config,
            stage = stage,
            duration_ms = elapsed.as_millis() as u64,
            rows = ?rows,
            "Stage finished"
        );
        report.record_stage(stage, elapsed, rows);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::*;

    #[tokio::test]
    async fn test_require_columns_reports_first_missing() {
        let ctx = EtlContext::new("pipeline-test").unwrap();
        let df = text_frame(&ctx, &SHIPMENT_HEADERS, &[vec![Some("O1"), Some("2")]]);

        assert!(require_columns(&df, "shipments", &["Order_ID", "Delay_Days"]).is_ok());
        let err = require_columns(&df, "shipments", &["Order_ID", "Carrier", "Depot"]).unwrap_err();
        assert!(matches!(err, EtlError::ColumnNotFound { ref column, .. } if column == "Carrier"));
    }

    #[tokio::test]
    async fn test_query_count_reads_scalar() {
        let ctx = EtlContext::new("pipeline-test").unwrap();
        let count = query_count(&ctx, "SELECT COUNT(*) FROM (VALUES (1), (2), (3)) AS t(x)")
            .await
            .unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_day_of_truncates_to_date() {
        let ctx = EtlContext::new("pipeline-test").unwrap();
        let df = ctx
            .sql(&format!(
                "SELECT arrow_cast({}, 'Utf8') AS d FROM (VALUES (CAST('2024-03-09' AS DATE))) AS t(x)",
                day_of("x")
            ))
            .await
            .unwrap();
        let batch = collect_one(df).await;
        assert_eq!(strings(&batch, "d"), vec![Some("2024-03-09".to_string())]);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = PipelineConfig::default();
        config.quality.max_null_rate = 1.5;
        assert!(matches!(
            Pipeline::new(config).unwrap_err(),
            EtlError::Configuration(_)
        ));
    }
}
