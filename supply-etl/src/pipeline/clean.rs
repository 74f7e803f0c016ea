//! Sales cleaning: typing, deduplication and the validity filter.
//!
//! Raw sales arrive as text. Cleaning types every referenced column, keeps one
//! row per order id and drops rows whose quantity or unit price is unusable.
//! Bad order dates are not fatal; they become null.

use super::{count_rows, has_column, require_columns, tables};
use crate::config::SourceColumns;
use crate::core::EtlContext;
use crate::error::Result;
use crate::security::SqlSecurity;
use datafusion::dataframe::DataFrame;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

/// Row counts recorded while cleaning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanStats {
    /// Raw sales rows read
    pub input_rows: usize,
    /// Rows removed because another row with the same order id was kept
    pub duplicate_rows: usize,
    /// Deduplicated rows removed by the quantity / unit price filter
    pub invalid_rows: usize,
    /// Rows handed to enrichment
    pub output_rows: usize,
}

/// Output of the cleaning stage.
#[derive(Debug, Clone)]
pub struct CleanOutput {
    pub sales: DataFrame,
    pub stats: CleanStats,
}

/// Types the raw sales columns.
///
/// Quantities and prices that do not parse become null and are dropped later by
/// the validity filter. A discount that is missing, empty or unparseable is 0.
fn typed_sales_sql(columns: &SourceColumns, has_discount: bool) -> Result<String> {
    let order_id = SqlSecurity::escape_identifier(&columns.order_id)?;
    let product_id = SqlSecurity::escape_identifier(&columns.product_id)?;
    let region = SqlSecurity::escape_identifier(&columns.region)?;
    let order_date = SqlSecurity::escape_identifier(&columns.order_date)?;
    let quantity = SqlSecurity::escape_identifier(&columns.quantity)?;
    let unit_price = SqlSecurity::escape_identifier(&columns.unit_price)?;
    let total_sales = SqlSecurity::escape_identifier(&columns.total_sales)?;

    let discount = if has_discount {
        let discount = SqlSecurity::escape_identifier(&columns.discount)?;
        format!("COALESCE(TRY_CAST(arrow_cast({discount}, 'Utf8') AS DOUBLE), 0.0)")
    } else {
        "CAST(0.0 AS DOUBLE)".to_string()
    };

    Ok(format!(
        "SELECT
            arrow_cast({order_id}, 'Utf8') AS order_id,
            arrow_cast({product_id}, 'Utf8') AS product_id,
            arrow_cast({region}, 'Utf8') AS region,
            CASE
                WHEN arrow_cast({order_date}, 'Utf8') ~ '^[0-9]{{4}}-[0-9]{{2}}-[0-9]{{2}}$'
                THEN TRY_CAST(arrow_cast({order_date}, 'Utf8') AS DATE)
            END AS order_date,
            TRY_CAST(arrow_cast({quantity}, 'Utf8') AS BIGINT) AS quantity,
            TRY_CAST(arrow_cast({unit_price}, 'Utf8') AS DOUBLE) AS unit_price,
            {discount} AS discount,
            TRY_CAST(arrow_cast({total_sales}, 'Utf8') AS DOUBLE) AS total_sales
         FROM {raw}",
        raw = tables::RAW_SALES
    ))
}

/// Keeps one row per order id.
///
/// Rows that pass the validity filter rank first, so a valid duplicate always
/// wins over an invalid one. Remaining ties go to the earliest order date, then
/// the larger quantity, unit price, total sales and discount, then product id
/// and region, which makes the survivor deterministic.
const DEDUP_SQL: &str = "SELECT order_id, product_id, region, order_date, quantity, unit_price, discount, total_sales
     FROM (
         SELECT *,
             ROW_NUMBER() OVER (
                 PARTITION BY order_id
                 ORDER BY
                     CASE WHEN quantity >= 0 AND unit_price > 0 THEN 0 ELSE 1 END,
                     order_date ASC NULLS LAST,
                     quantity DESC NULLS LAST,
                     unit_price DESC NULLS LAST,
                     total_sales DESC NULLS LAST,
                     discount DESC NULLS LAST,
                     product_id ASC NULLS LAST,
                     region ASC NULLS LAST
             ) AS dedup_rank
         FROM typed_sales
     ) ranked
     WHERE dedup_rank = 1";

const VALIDITY_SQL: &str =
    "SELECT * FROM deduplicated_sales WHERE quantity >= 0 AND unit_price > 0";

/// Cleans raw sales and registers the result as `clean_sales`.
#[instrument(skip_all, fields(stage = "clean"))]
pub async fn clean_sales(
    ctx: &EtlContext,
    raw_sales: DataFrame,
    columns: &SourceColumns,
) -> Result<CleanOutput> {
    require_columns(
        &raw_sales,
        tables::RAW_SALES,
        &[
            &columns.order_id,
            &columns.product_id,
            &columns.region,
            &columns.order_date,
            &columns.quantity,
            &columns.unit_price,
            &columns.total_sales,
        ],
    )?;

    let has_discount = has_column(&raw_sales, &columns.discount);
    if !has_discount {
        warn!(
            column = %columns.discount,
            "Discount column missing from sales, defaulting every discount to 0"
        );
    }

    let input_rows = count_rows(&raw_sales).await?;
    ctx.register_view(tables::RAW_SALES, raw_sales)?;

    let typed = ctx.sql(&typed_sales_sql(columns, has_discount)?).await?;
    ctx.register_view("typed_sales", typed)?;

    let deduplicated = ctx.materialize(ctx.sql(DEDUP_SQL).await?).await?;
    let deduplicated_rows = count_rows(&deduplicated).await?;
    ctx.register_view("deduplicated_sales", deduplicated)?;

    let sales = ctx.materialize(ctx.sql(VALIDITY_SQL).await?).await?;
    let output_rows = count_rows(&sales).await?;
    ctx.register_view(tables::CLEAN_SALES, sales.clone())?;

    let stats = CleanStats {
        input_rows,
        duplicate_rows: input_rows - deduplicated_rows,
        invalid_rows: deduplicated_rows - output_rows,
        output_rows,
    };

    info!(
        rows.input = stats.input_rows,
        rows.duplicates = stats.duplicate_rows,
        rows.invalid = stats.invalid_rows,
        rows.output = stats.output_rows,
        "Cleaned sales"
    );

    Ok(CleanOutput { sales, stats })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::*;
    use arrow::array::RecordBatch;
    use datafusion::prelude::col;

    async fn clean(rows: &[Vec<Option<&str>>]) -> (RecordBatch, CleanStats) {
        let ctx = EtlContext::new("clean-test").unwrap();
        let raw = text_frame(&ctx, &SALES_HEADERS, rows);
        let output = clean_sales(&ctx, raw, &SourceColumns::default())
            .await
            .unwrap();
        let sorted = output
            .sales
            .sort(vec![col("order_id").sort(true, true)])
            .unwrap();
        (collect_one(sorted).await, output.stats)
    }

    #[tokio::test]
    async fn test_drops_negative_quantity_and_non_positive_price() {
        let (batch, stats) = clean(&[
            sales_row("O1", "P1", "north", "2024-01-05", "5", "2.0", "10.0"),
            sales_row("O2", "P1", "north", "2024-01-05", "-1", "2.0", "-2.0"),
            sales_row("O3", "P1", "north", "2024-01-05", "3", "0", "0.0"),
            sales_row("O4", "P1", "north", "2024-01-05", "0", "1.5", "0.0"),
            sales_row("O5", "P1", "north", "2024-01-05", "abc", "1.5", "0.0"),
        ])
        .await;

        assert_eq!(
            strings(&batch, "order_id"),
            vec![Some("O1".to_string()), Some("O4".to_string())]
        );
        assert_eq!(stats.invalid_rows, 3);
        assert_eq!(stats.duplicate_rows, 0);
        assert_eq!(stats.output_rows, 2);
    }

    #[tokio::test]
    async fn test_dedup_keeps_one_row_per_order() {
        let (batch, stats) = clean(&[
            sales_row("O1", "P1", "north", "2024-01-06", "5", "2.0", "10.0"),
            sales_row("O1", "P1", "north", "2024-01-05", "4", "2.0", "8.0"),
            sales_row("O2", "P2", "south", "2024-01-05", "1", "3.0", "3.0"),
        ])
        .await;

        assert_eq!(batch.num_rows(), 2);
        assert_eq!(stats.duplicate_rows, 1);
        // Earliest order date wins
        assert_eq!(ints(&batch, "quantity")[0], Some(4));
        assert_eq!(strings(&batch, "order_date")[0].as_deref(), Some("2024-01-05"));
    }

    #[tokio::test]
    async fn test_valid_duplicate_beats_invalid_one() {
        let (batch, stats) = clean(&[
            sales_row("O1", "P1", "north", "2024-01-01", "-3", "2.0", "-6.0"),
            sales_row("O1", "P1", "north", "2024-01-09", "2", "2.0", "4.0"),
        ])
        .await;

        assert_eq!(batch.num_rows(), 1);
        assert_eq!(ints(&batch, "quantity"), vec![Some(2)]);
        assert_eq!(stats.duplicate_rows, 1);
        assert_eq!(stats.invalid_rows, 0);
    }

    #[tokio::test]
    async fn test_discount_defaults_to_zero() {
        let mut with_discount = sales_row("O2", "P1", "north", "2024-01-05", "1", "1.0", "1.0");
        with_discount[6] = Some("0.1");
        let mut bad_discount = sales_row("O3", "P1", "north", "2024-01-05", "1", "1.0", "1.0");
        bad_discount[6] = Some("n/a");

        let (batch, _) = clean(&[
            sales_row("O1", "P1", "north", "2024-01-05", "1", "1.0", "1.0"),
            with_discount,
            bad_discount,
        ])
        .await;

        assert_eq!(
            floats(&batch, "discount"),
            vec![Some(0.0), Some(0.1), Some(0.0)]
        );
    }

    #[tokio::test]
    async fn test_missing_discount_column_is_added() {
        let ctx = EtlContext::new("clean-test").unwrap();
        let headers: Vec<&str> = SALES_HEADERS
            .iter()
            .copied()
            .filter(|h| *h != "Discount")
            .collect();
        let raw = text_frame(
            &ctx,
            &headers,
            &[vec![
                Some("O1"),
                Some("P1"),
                Some("north"),
                Some("2024-01-05"),
                Some("2"),
                Some("1.0"),
                Some("2.0"),
            ]],
        );

        let output = clean_sales(&ctx, raw, &SourceColumns::default())
            .await
            .unwrap();
        let batch = collect_one(output.sales).await;
        assert_eq!(floats(&batch, "discount"), vec![Some(0.0)]);
    }

    #[tokio::test]
    async fn test_unparseable_dates_become_null() {
        let (batch, stats) = clean(&[
            sales_row("O1", "P1", "north", "2024-01-05", "1", "1.0", "1.0"),
            sales_row("O2", "P1", "north", "05/01/2024", "1", "1.0", "1.0"),
            sales_row("O3", "P1", "north", "2024-1-5", "1", "1.0", "1.0"),
            sales_row("O4", "P1", "north", "2024-02-30", "1", "1.0", "1.0"),
        ])
        .await;

        assert_eq!(stats.output_rows, 4);
        let dates = strings(&batch, "order_date");
        assert_eq!(dates[0].as_deref(), Some("2024-01-05"));
        assert_eq!(dates[1], None);
        assert_eq!(dates[2], None);
        assert_eq!(dates[3], None);
    }

    #[tokio::test]
    async fn test_missing_required_column_is_an_error() {
        let ctx = EtlContext::new("clean-test").unwrap();
        let raw = text_frame(&ctx, &["Order_ID"], &[vec![Some("O1")]]);
        let err = clean_sales(&ctx, raw, &SourceColumns::default())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::EtlError::ColumnNotFound { .. }));
    }
}
