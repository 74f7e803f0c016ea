//! Shipment delay adjustment.
//!
//! Delay is recorded per order, while the aggregate is keyed by (region,
//! product id, day). Delays are rolled up to that grain before joining: the
//! largest delay of an order, then the largest delay among the orders that
//! make up each aggregate row.
//!
//! Aggregate rows with a null key part (an unparseable order date, say) are
//! their own group, so the grain join matches nulls as equal.

use super::{day_of, query_count, require_columns, tables};
use crate::config::{DelayAdjustmentConfig, SourceColumns};
use crate::core::EtlContext;
use crate::error::Result;
use crate::security::SqlSecurity;
use datafusion::dataframe::DataFrame;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

/// Row counts recorded while adjusting for delays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayStats {
    /// Aggregate rows with a known delay
    pub rows_with_delay: usize,
    /// Aggregate rows whose quantity was scaled down
    pub adjusted_rows: usize,
}

/// Output of the delay adjustment stage.
#[derive(Debug, Clone)]
pub struct DelayOutput {
    pub aggregate: DataFrame,
    pub stats: DelayStats,
}

/// Computes `adjusted_qty` for a row, mirroring the SQL rule.
///
/// Delays strictly above the threshold scale the quantity by `factor`; no
/// delay, or a delay at or below the threshold, leaves it unchanged.
pub fn adjusted_quantity(daily_qty: i64, delay_days: Option<i64>, config: &DelayAdjustmentConfig) -> f64 {
    match delay_days {
        Some(delay) if delay > config.threshold_days => daily_qty as f64 * config.factor,
        _ => daily_qty as f64,
    }
}

fn adjustment_sql(columns: &SourceColumns, config: &DelayAdjustmentConfig) -> Result<String> {
    let order_id = SqlSecurity::escape_identifier(&columns.order_id)?;
    let delay_days = SqlSecurity::escape_identifier(&columns.delay_days)?;
    let factor = SqlSecurity::float_literal(config.factor)?;
    let threshold = config.threshold_days;

    Ok(format!(
        "WITH order_delays AS (
             SELECT arrow_cast({order_id}, 'Utf8') AS order_id,
                 MAX(TRY_CAST(arrow_cast({delay_days}, 'Utf8') AS BIGINT)) AS delay_days
             FROM {shipments}
             GROUP BY arrow_cast({order_id}, 'Utf8')
         ),
         grain_delays AS (
             SELECT e.region, e.product_id, e.sales_date, MAX(d.delay_days) AS delay_days
             FROM (
                 SELECT order_id, region, product_id, {sales_date} AS sales_date
                 FROM {enriched}
             ) e
             JOIN order_delays d ON e.order_id = d.order_id
             GROUP BY e.region, e.product_id, e.sales_date
         )
         SELECT
             a.region,
             a.product_id,
             a.sales_date,
             a.daily_qty,
             a.daily_sales,
             a.lag_7d_qty,
             g.delay_days,
             CASE
                 WHEN g.delay_days > {threshold} THEN CAST(a.daily_qty AS DOUBLE) * {factor}
                 ELSE CAST(a.daily_qty AS DOUBLE)
             END AS adjusted_qty
         FROM {daily} a
         LEFT JOIN grain_delays g
             ON a.region IS NOT DISTINCT FROM g.region
             AND a.product_id IS NOT DISTINCT FROM g.product_id
             AND a.sales_date IS NOT DISTINCT FROM g.sales_date",
        shipments = tables::RAW_SHIPMENTS,
        enriched = tables::ENRICHED_SALES,
        daily = tables::DAILY_AGGREGATE,
        sales_date = day_of("order_date"),
    ))
}

/// Attaches shipment delays to the daily aggregate and computes `adjusted_qty`.
#[instrument(skip_all, fields(
    stage = "delay_adjustment",
    delay.threshold_days = config.threshold_days,
    delay.factor = config.factor
))]
pub async fn adjust_for_delays(
    ctx: &EtlContext,
    daily: DataFrame,
    enriched: DataFrame,
    shipments: DataFrame,
    columns: &SourceColumns,
    config: &DelayAdjustmentConfig,
) -> Result<DelayOutput> {
    require_columns(
        &shipments,
        tables::RAW_SHIPMENTS,
        &[&columns.order_id, &columns.delay_days],
    )?;

    ctx.register_view(tables::RAW_SHIPMENTS, shipments)?;
    ctx.register_view(tables::ENRICHED_SALES, enriched)?;
    ctx.register_view(tables::DAILY_AGGREGATE, daily)?;

    let adjusted = ctx
        .materialize(ctx.sql(&adjustment_sql(columns, config)?).await?)
        .await?;
    ctx.register_view(tables::ADJUSTED_AGGREGATE, adjusted.clone())?;

    let rows_with_delay = query_count(
        ctx,
        &format!(
            "SELECT COUNT(delay_days) FROM {}",
            tables::ADJUSTED_AGGREGATE
        ),
    )
    .await?;
    let adjusted_rows = query_count(
        ctx,
        &format!(
            "SELECT COUNT(*) FROM {} WHERE delay_days > {}",
            tables::ADJUSTED_AGGREGATE,
            config.threshold_days
        ),
    )
    .await?;

    let stats = DelayStats {
        rows_with_delay,
        adjusted_rows,
    };
    info!(
        rows.with_delay = stats.rows_with_delay,
        rows.adjusted = stats.adjusted_rows,
        "Applied shipment delay adjustment"
    );

    Ok(DelayOutput {
        aggregate: adjusted,
        stats,
    })
}
