//! # supply-etl - Daily supply-chain sales pipeline on DataFusion
//!
//! A batch pipeline that turns raw sales, shipment and warehouse CSV exports
//! into a partitioned Parquet dataset of daily aggregates per region and
//! product, with a lagged quantity feature and a shipment-delay adjustment.
//! Every run is gated on data quality: the dataset is only published when the
//! quality checks pass.
//!
//! ## Stages
//!
//! 1. **Ingest** the three CSV sources (local files, directories, globs, or
//!    object-store prefixes with the `s3` feature).
//! 2. **Clean** sales: one row per order id, typed columns, invalid rows dropped.
//! 3. **Normalize** regions and **enrich** with warehouse attributes.
//! 4. **Aggregate** per (region, product, day) with `lag_7d_qty`.
//! 5. **Adjust** quantities of delayed shipments.
//! 6. **Persist** to staging, check the schema catalog, run the **quality gate**,
//!    then publish.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use supply_etl::prelude::*;
//!
//! # async fn example() -> supply_etl::error::Result<()> {
//! let mut config = PipelineConfig::default();
//! config.sources.sales = "data/raw/sales/".to_string();
//! config.sources.shipments = "data/raw/shipment/".to_string();
//! config.sources.warehouse = "data/raw/warehouse_master/".to_string();
//! config.output.location = "data/processed/sales".to_string();
//!
//! let pipeline = Pipeline::new(config)?;
//! let ctx = pipeline.context("daily-sales")?;
//! let report = pipeline.run(&ctx).await?;
//!
//! println!("{}", HumanFormatter::new().format(&report)?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Failure
//!
//! Any stage error aborts the run with an [`error::EtlError`]. A quality gate
//! breach surfaces as [`error::EtlError::QualityGate`]; the staged output is
//! discarded and the previously published dataset stays in place.

pub mod catalog;
pub mod config;
pub mod core;
pub mod error;
pub mod formatters;
pub mod logging;
pub mod pipeline;
pub mod prelude;
pub mod quality;
pub mod report;
pub mod security;
pub mod sources;

#[cfg(test)]
pub mod test_fixtures;
