//! Daily aggregation with the lagged quantity feature.

use super::{count_rows, day_of, tables};
use crate::core::EtlContext;
use crate::error::Result;
use datafusion::dataframe::DataFrame;
use tracing::{info, instrument};

/// Row offset of the lag feature.
///
/// The lag counts rows within a (product id, region) series, not calendar
/// days: when days are missing from a series, the value comes from further back.
pub const LAG_PERIODS: usize = 7;

fn aggregate_sql() -> String {
    format!(
        "SELECT
            region,
            product_id,
            sales_date,
            daily_qty,
            daily_sales,
            LAG(daily_qty, {LAG_PERIODS}) OVER (
                PARTITION BY product_id, region
                ORDER BY sales_date ASC NULLS LAST
            ) AS lag_7d_qty
         FROM (
             SELECT region, product_id, sales_date,
                 SUM(quantity) AS daily_qty,
                 SUM(total_sales) AS daily_sales
             FROM (
                 SELECT region, product_id, {sales_date} AS sales_date, quantity, total_sales
                 FROM {enriched}
             ) dated
             GROUP BY region, product_id, sales_date
         ) daily",
        sales_date = day_of("order_date"),
        enriched = tables::ENRICHED_SALES
    )
}

/// Aggregates enriched sales to one row per (region, product id, day).
///
/// Rows with a null order date form their own group per region and product
/// and sort after every dated row of their series.
#[instrument(skip_all, fields(stage = "aggregate", lag.periods = LAG_PERIODS))]
pub async fn aggregate_daily(ctx: &EtlContext, enriched: DataFrame) -> Result<DataFrame> {
    ctx.register_view(tables::ENRICHED_SALES, enriched)?;

    let daily = ctx.materialize(ctx.sql(&aggregate_sql()).await?).await?;
    let groups = count_rows(&daily).await?;
    ctx.register_view(tables::DAILY_AGGREGATE, daily.clone())?;

    info!(rows.groups = groups, "Aggregated daily sales");
    Ok(daily)
}
