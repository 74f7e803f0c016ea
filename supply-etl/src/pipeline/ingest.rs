//! Loading of the three raw inputs.

use super::{count_rows, require_columns, tables};
use crate::config::{SourceColumns, SourceLocations};
use crate::core::EtlContext;
use crate::error::Result;
use crate::sources::{CsvSource, DataSource};
use datafusion::dataframe::DataFrame;
use tracing::{info, instrument};

/// The sources a run reads from.
#[derive(Debug)]
pub struct InputSources {
    pub sales: Box<dyn DataSource>,
    pub shipments: Box<dyn DataSource>,
    pub warehouse: Box<dyn DataSource>,
}

impl InputSources {
    /// CSV sources at the configured locations.
    pub fn from_config(sources: &SourceLocations) -> Result<Self> {
        Ok(Self {
            sales: Box::new(CsvSource::with_options(&sources.sales, sources.csv.clone())?),
            shipments: Box::new(CsvSource::with_options(
                &sources.shipments,
                sources.csv.clone(),
            )?),
            warehouse: Box::new(CsvSource::with_options(
                &sources.warehouse,
                sources.csv.clone(),
            )?),
        })
    }
}

/// The raw inputs as loaded, one DataFrame per source.
#[derive(Debug, Clone)]
pub struct RawInputs {
    pub sales: DataFrame,
    pub shipments: DataFrame,
    pub warehouse: DataFrame,
}

/// Loads every source, registers it under its `raw_*` name and checks that
/// the columns later stages reference are present.
///
/// Cleaning checks the sales columns itself, so only the join keys of the
/// other two inputs are checked here.
#[instrument(skip_all, fields(stage = "ingest"))]
pub async fn ingest(
    ctx: &EtlContext,
    sources: &InputSources,
    columns: &SourceColumns,
) -> Result<RawInputs> {
    let sales = sources.sales.register(ctx, tables::RAW_SALES).await?;
    let shipments = sources
        .shipments
        .register(ctx, tables::RAW_SHIPMENTS)
        .await?;
    let warehouse = sources
        .warehouse
        .register(ctx, tables::RAW_WAREHOUSE)
        .await?;

    require_columns(
        &shipments,
        tables::RAW_SHIPMENTS,
        &[&columns.order_id, &columns.delay_days],
    )?;
    require_columns(&warehouse, tables::RAW_WAREHOUSE, &[&columns.product_id])?;

    info!(
        rows.sales = count_rows(&sales).await?,
        rows.shipments = count_rows(&shipments).await?,
        rows.warehouse = count_rows(&warehouse).await?,
        "Ingested raw inputs"
    );

    Ok(RawInputs {
        sales,
        shipments,
        warehouse,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EtlError;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, contents: &str) -> String {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path.to_string_lossy().to_string()
    }

    fn locations(dir: &TempDir, shipments: &str) -> SourceLocations {
        SourceLocations {
            sales: write_file(
                dir,
                "sales.csv",
                "Order_ID,Product_ID,Region,Order_Date,Quantity,Unit_Price,Discount,Total_Sales\n\
                 O1,P1,north,2024-01-05,2,10.0,,20.0\n",
            ),
            shipments: write_file(dir, "shipments.csv", shipments),
            warehouse: write_file(dir, "warehouse.csv", "Product_ID,Warehouse\nP1,W1\n"),
            csv: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_ingest_registers_raw_views() {
        let dir = TempDir::new().unwrap();
        let sources =
            InputSources::from_config(&locations(&dir, "Order_ID,Delay_Days\nO1,4\n")).unwrap();
        let ctx = EtlContext::new("ingest-test").unwrap();

        let raw = ingest(&ctx, &sources, &SourceColumns::default())
            .await
            .unwrap();

        assert_eq!(raw.sales.clone().count().await.unwrap(), 1);
        assert!(ctx.has_table(tables::RAW_SALES));
        assert!(ctx.has_table(tables::RAW_SHIPMENTS));
        assert!(ctx.has_table(tables::RAW_WAREHOUSE));
    }

    #[tokio::test]
    async fn test_missing_join_column_is_reported() {
        let dir = TempDir::new().unwrap();
        let sources =
            InputSources::from_config(&locations(&dir, "Order_ID,Late_By\nO1,4\n")).unwrap();
        let ctx = EtlContext::new("ingest-test").unwrap();

        let err = ingest(&ctx, &sources, &SourceColumns::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EtlError::ColumnNotFound { ref table, ref column }
                if table == tables::RAW_SHIPMENTS && column == "Delay_Days"
        ));
    }

    #[test]
    fn test_missing_source_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut locations = locations(&dir, "Order_ID,Delay_Days\n");
        locations.warehouse = dir.path().join("absent.csv").to_string_lossy().to_string();
        assert!(InputSources::from_config(&locations).is_err());
    }
}
