//! Pipeline configuration.
//!
//! [`PipelineConfig`] gathers everything a run needs: source and output
//! locations, source column names, stage parameters, the quality gate and the
//! engine settings. Every field has a default, so a JSON file only needs the
//! values it overrides; command-line flags are applied on top by the binary.

use crate::core::EtlContextConfig;
use crate::error::{EtlError, Result};
use crate::security::SqlSecurity;
use crate::sources::CsvOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Top-level configuration for a pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sources: SourceLocations,
    pub columns: SourceColumns,
    pub output: OutputConfig,
    pub normalization: NormalizationConfig,
    pub delay: DelayAdjustmentConfig,
    pub quality: QualityGateConfig,
    pub catalog: CatalogConfig,
    pub engine: EtlContextConfig,
}

/// Locations of the three raw inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceLocations {
    /// Sales CSV location (file, directory, glob or object-store URL)
    pub sales: String,
    /// Shipment CSV location
    pub shipments: String,
    /// Warehouse master CSV location
    pub warehouse: String,
    /// CSV read options shared by all three sources
    pub csv: CsvOptions,
}

impl Default for SourceLocations {
    fn default() -> Self {
        Self {
            sales: "s3://supply-chain-data-lake/raw/sales/".to_string(),
            shipments: "s3://supply-chain-data-lake/raw/shipment/".to_string(),
            warehouse: "s3://supply-chain-data-lake/raw/warehouse_master/".to_string(),
            csv: CsvOptions::default(),
        }
    }
}

/// Header names of the raw source columns the pipeline references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceColumns {
    pub order_id: String,
    pub product_id: String,
    pub region: String,
    pub order_date: String,
    pub quantity: String,
    pub unit_price: String,
    pub discount: String,
    pub total_sales: String,
    pub delay_days: String,
}

impl Default for SourceColumns {
    fn default() -> Self {
        Self {
            order_id: "Order_ID".to_string(),
            product_id: "Product_ID".to_string(),
            region: "Region".to_string(),
            order_date: "Order_Date".to_string(),
            quantity: "Quantity".to_string(),
            unit_price: "Unit_Price".to_string(),
            discount: "Discount".to_string(),
            total_sales: "Total_Sales".to_string(),
            delay_days: "Delay_Days".to_string(),
        }
    }
}

impl SourceColumns {
    fn all(&self) -> [&str; 9] {
        [
            &self.order_id,
            &self.product_id,
            &self.region,
            &self.order_date,
            &self.quantity,
            &self.unit_price,
            &self.discount,
            &self.total_sales,
            &self.delay_days,
        ]
    }
}

/// Output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Root of the partitioned Parquet dataset
    pub location: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            location: "s3://supply-chain-data-lake/processed/sales/".to_string(),
        }
    }
}

/// Region normalization settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    /// Synonyms applied after trimming and upper-casing, e.g. `"N" -> "NORTH"`.
    /// Keys are matched against the normalized value. Empty means no mapping.
    pub region_synonyms: BTreeMap<String, String>,
}

/// Shipment delay adjustment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayAdjustmentConfig {
    /// Delays strictly greater than this many days trigger the adjustment
    pub threshold_days: i64,
    /// Multiplier applied to `daily_qty` for delayed rows, in (0, 1]
    pub factor: f64,
}

impl Default for DelayAdjustmentConfig {
    fn default() -> Self {
        Self {
            threshold_days: 3,
            factor: 0.95,
        }
    }
}

/// Quality gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityGateConfig {
    /// Maximum tolerated fraction of null `daily_qty` rows
    pub max_null_rate: f64,
    /// Fail the run when the aggregate is empty; `false` skips the gate instead
    pub fail_on_empty: bool,
    /// Also enforce uniqueness of the (region, product_id, sales_date) key
    pub check_unique_keys: bool,
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        Self {
            max_null_rate: 0.05,
            fail_on_empty: true,
            check_unique_keys: true,
        }
    }
}

/// How the schema catalog reacts to a changed output schema.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaEvolution {
    /// New columns are accepted; type changes are rejected
    #[default]
    Allow,
    /// Any difference from the recorded schema is rejected
    Strict,
}

/// Schema catalog settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// JSON catalog file; `None` keeps the catalog in memory for the run
    pub path: Option<String>,
    /// Table name the output is recorded under
    pub table: Option<String>,
    pub evolution: SchemaEvolution,
}

impl PipelineConfig {
    /// Loads a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            EtlError::Configuration(format!(
                "Failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_json_str(&text)
    }

    /// Parses a configuration from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| EtlError::Configuration(format!("Invalid pipeline config: {e}")))
    }

    /// Table name used for the catalog entry.
    pub fn catalog_table(&self) -> String {
        self.catalog
            .table
            .clone()
            .unwrap_or_else(|| "daily_sales_aggregate".to_string())
    }

    /// Rejects configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        for (name, location) in [
            ("sales", &self.sources.sales),
            ("shipments", &self.sources.shipments),
            ("warehouse", &self.sources.warehouse),
            ("output", &self.output.location),
        ] {
            if location.trim().is_empty() {
                return Err(EtlError::Configuration(format!(
                    "{name} location must not be empty"
                )));
            }
        }

        for column in self.columns.all() {
            SqlSecurity::validate_identifier(column)?;
        }

        let rate = self.quality.max_null_rate;
        if !(0.0..=1.0).contains(&rate) {
            return Err(EtlError::Configuration(format!(
                "max_null_rate must be between 0.0 and 1.0, got {rate}"
            )));
        }

        let factor = self.delay.factor;
        if !(factor > 0.0 && factor <= 1.0) {
            return Err(EtlError::Configuration(format!(
                "delay factor must be in (0, 1], got {factor}"
            )));
        }

        if self.delay.threshold_days < 0 {
            return Err(EtlError::Configuration(format!(
                "delay threshold must not be negative, got {}",
                self.delay.threshold_days
            )));
        }

        for (from, to) in &self.normalization.region_synonyms {
            if from.trim().is_empty() || to.trim().is_empty() {
                return Err(EtlError::Configuration(
                    "region synonyms must map non-empty values".to_string(),
                ));
            }
        }

        if self.engine.batch_size == 0 || self.engine.target_partitions == 0 {
            return Err(EtlError::Configuration(
                "engine batch_size and target_partitions must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
