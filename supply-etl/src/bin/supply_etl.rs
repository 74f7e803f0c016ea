//! supply-etl
//!
//! Runs the daily sales pipeline once and prints the run report.
//! Exits with 2 when the quality gate trips and 1 on any other failure.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::process::ExitCode;
use supply_etl::config::PipelineConfig;
use supply_etl::error::EtlError;
use supply_etl::formatters::{FormatterConfig, HumanFormatter, JsonFormatter, ReportFormatter};
use supply_etl::logging::setup::{init_logging, LoggingConfig};
use supply_etl::logging::LogConfig;
use supply_etl::pipeline::Pipeline;
use supply_etl::report::RunReport;
use tracing::Level;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ReportFormat {
    Human,
    Json,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Name of the job, recorded in logs, the report and the catalog
    #[arg(long = "job-name", alias = "JOB_NAME")]
    job_name: String,

    /// JSON pipeline configuration; defaults apply to anything it omits
    #[arg(long)]
    config: Option<String>,

    /// Sales CSV location
    #[arg(long)]
    sales: Option<String>,

    /// Shipment CSV location
    #[arg(long)]
    shipments: Option<String>,

    /// Warehouse master CSV location
    #[arg(long)]
    warehouse: Option<String>,

    /// Output dataset location
    #[arg(long)]
    output: Option<String>,

    /// Schema catalog file
    #[arg(long)]
    catalog: Option<String>,

    /// Maximum tolerated null rate of daily_qty
    #[arg(long)]
    max_null_rate: Option<f64>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[arg(long, value_enum, default_value_t = ReportFormat::Human)]
    report_format: ReportFormat,

    /// Log stage details at debug level
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("loading configuration from {path}"))?,
            None => PipelineConfig::default(),
        };

        if let Some(sales) = &self.sales {
            config.sources.sales = sales.clone();
        }
        if let Some(shipments) = &self.shipments {
            config.sources.shipments = shipments.clone();
        }
        if let Some(warehouse) = &self.warehouse {
            config.sources.warehouse = warehouse.clone();
        }
        if let Some(output) = &self.output {
            config.output.location = output.clone();
        }
        if let Some(catalog) = &self.catalog {
            config.catalog.path = Some(catalog.clone());
        }
        if let Some(rate) = self.max_null_rate {
            config.quality.max_null_rate = rate;
        }
        Ok(config)
    }

    fn logging_config(&self) -> LoggingConfig {
        let base = match self.log_format {
            LogFormat::Text => LoggingConfig::default(),
            LogFormat::Json => LoggingConfig::production(),
        };
        if self.verbose {
            base.with_etl_level(Level::DEBUG)
        } else {
            base
        }
    }

    fn render(&self, report: &RunReport) -> supply_etl::error::Result<String> {
        match self.report_format {
            ReportFormat::Human => HumanFormatter::with_config(
                FormatterConfig::default().with_colors(self.log_format == LogFormat::Text),
            )
            .format(report),
            ReportFormat::Json => JsonFormatter::new().format(report),
        }
    }
}

async fn run(args: &Args) -> Result<RunReport> {
    let config = args.pipeline_config()?;
    let log_config = if args.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };

    let pipeline = Pipeline::new(config)?.with_log_config(log_config);
    let ctx = pipeline.context(&args.job_name)?;
    let report = pipeline.run(&ctx).await?;
    Ok(report)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(args.logging_config()) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run(&args).await {
        Ok(report) => match args.render(&report) {
            Ok(output) => {
                println!("{output}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: {e}");
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Pipeline run failed");
            eprintln!("error: {e:#}");
            let quality_failure = e
                .downcast_ref::<EtlError>()
                .is_some_and(EtlError::is_quality_failure);
            if quality_failure {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
