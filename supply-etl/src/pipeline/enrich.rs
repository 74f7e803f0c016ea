//! Region normalization and warehouse enrichment.

use super::{count_rows, query_count, require_columns, tables, SALES_COLUMNS};
use crate::config::{NormalizationConfig, SourceColumns};
use crate::core::EtlContext;
use crate::error::Result;
use crate::security::SqlSecurity;
use datafusion::dataframe::DataFrame;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

/// Row counts recorded while enriching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichStats {
    /// Cleaned sales rows enriched
    pub rows: usize,
    /// Sales rows with no warehouse record for their product id
    pub unmatched_rows: usize,
    /// Warehouse rows ignored because their product id was already taken
    pub duplicate_warehouse_rows: usize,
    /// Warehouse columns attached to every sales row, after renaming
    pub warehouse_columns: Vec<String>,
}

/// Output of the enrichment stage.
#[derive(Debug, Clone)]
pub struct EnrichOutput {
    pub sales: DataFrame,
    pub stats: EnrichStats,
}

fn normalize(value: &str) -> String {
    value.trim().to_uppercase()
}

/// Builds the region expression: trim and upper-case, then apply synonyms.
fn region_expr(synonyms: &BTreeMap<String, String>) -> String {
    let base = "UPPER(TRIM(region))";
    if synonyms.is_empty() {
        return base.to_string();
    }

    let arms = synonyms
        .iter()
        .map(|(from, to)| {
            format!(
                "WHEN {} THEN {}",
                SqlSecurity::quote_literal(&normalize(from)),
                SqlSecurity::quote_literal(&normalize(to))
            )
        })
        .collect::<Vec<_>>()
        .join(" ");
    format!("CASE {base} {arms} ELSE {base} END")
}

/// Normalizes the region of every cleaned sales row.
#[instrument(skip_all, fields(stage = "normalize", synonyms = config.region_synonyms.len()))]
pub async fn normalize_regions(
    ctx: &EtlContext,
    clean_sales: DataFrame,
    config: &NormalizationConfig,
) -> Result<DataFrame> {
    ctx.register_view(tables::CLEAN_SALES, clean_sales)?;

    let sql = format!(
        "SELECT order_id, product_id, {region} AS region, order_date, quantity, unit_price, discount, total_sales
         FROM {clean}",
        region = region_expr(&config.region_synonyms),
        clean = tables::CLEAN_SALES
    );
    let normalized = ctx.sql(&sql).await?;
    ctx.register_view("normalized_sales", normalized.clone())?;
    Ok(normalized)
}

/// Picks the output name of a warehouse column, prefixing sales-name collisions.
fn output_name(name: &str) -> String {
    if name.eq_ignore_ascii_case("warehouse_key")
        || SALES_COLUMNS.iter().any(|c| c.eq_ignore_ascii_case(name))
    {
        format!("warehouse_{name}")
    } else {
        name.to_string()
    }
}

/// Left-joins warehouse attributes onto normalized sales by product id.
///
/// Every sales row survives. The warehouse master is reduced to one row per
/// product id first so the join cannot multiply sales rows.
#[instrument(skip_all, fields(stage = "enrich"))]
pub async fn enrich_with_warehouse(
    ctx: &EtlContext,
    sales: DataFrame,
    warehouse: DataFrame,
    columns: &SourceColumns,
) -> Result<EnrichOutput> {
    require_columns(&warehouse, tables::RAW_WAREHOUSE, &[&columns.product_id])?;

    let key = SqlSecurity::escape_identifier(&columns.product_id)?;
    let passthrough: Vec<String> = warehouse
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .filter(|name| name != &columns.product_id)
        .collect();

    let mut ranked_select = vec![format!("arrow_cast({key}, 'Utf8') AS warehouse_key")];
    let mut joined_select = Vec::with_capacity(passthrough.len());
    let mut warehouse_columns = Vec::with_capacity(passthrough.len());
    for name in &passthrough {
        let source = SqlSecurity::quote_identifier(name);
        let target = output_name(name);
        let target_ident = SqlSecurity::quote_identifier(&target);
        ranked_select.push(format!("{source} AS {target_ident}"));
        joined_select.push(format!("w.{target_ident} AS {target_ident}"));
        warehouse_columns.push(target);
    }

    let ordering = if warehouse_columns.is_empty() {
        "warehouse_key".to_string()
    } else {
        warehouse_columns
            .iter()
            .map(|c| format!("{} ASC NULLS LAST", SqlSecurity::quote_identifier(c)))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let warehouse_rows = count_rows(&warehouse).await?;
    ctx.register_view(tables::RAW_WAREHOUSE, warehouse)?;
    ctx.register_view("normalized_sales", sales)?;

    let mut dimension_select = vec!["warehouse_key".to_string()];
    dimension_select.extend(
        warehouse_columns
            .iter()
            .map(|c| SqlSecurity::quote_identifier(c)),
    );
    let dimension_sql = format!(
        "SELECT {dimension}
         FROM (
             SELECT *, ROW_NUMBER() OVER (PARTITION BY warehouse_key ORDER BY {ordering}) AS warehouse_rank
             FROM (SELECT {ranked} FROM {raw}) keyed
         ) ranked
         WHERE warehouse_rank = 1 AND warehouse_key IS NOT NULL",
        dimension = dimension_select.join(", "),
        ranked = ranked_select.join(", "),
        raw = tables::RAW_WAREHOUSE
    );
    let dimension = ctx.materialize(ctx.sql(&dimension_sql).await?).await?;
    let dimension_rows = count_rows(&dimension).await?;
    ctx.register_view("warehouse_dim", dimension)?;

    let passthrough_select = if joined_select.is_empty() {
        String::new()
    } else {
        format!(", {}", joined_select.join(", "))
    };
    let enrich_sql = format!(
        "SELECT s.order_id, s.product_id, s.region, s.order_date, s.quantity, s.unit_price, s.discount, s.total_sales{passthrough_select}
         FROM normalized_sales s
         LEFT JOIN warehouse_dim w ON s.product_id = w.warehouse_key"
    );
    let enriched = ctx.materialize(ctx.sql(&enrich_sql).await?).await?;
    let rows = count_rows(&enriched).await?;
    ctx.register_view(tables::ENRICHED_SALES, enriched.clone())?;

    let unmatched_rows = query_count(
        ctx,
        "SELECT COUNT(*) FROM normalized_sales s
         LEFT JOIN warehouse_dim w ON s.product_id = w.warehouse_key
         WHERE w.warehouse_key IS NULL",
    )
    .await?;

    let stats = EnrichStats {
        rows,
        unmatched_rows,
        duplicate_warehouse_rows: warehouse_rows.saturating_sub(dimension_rows),
        warehouse_columns,
    };

    if stats.duplicate_warehouse_rows > 0 {
        warn!(
            rows.ignored = stats.duplicate_warehouse_rows,
            "Warehouse master has repeated or empty product ids; keeping one row per product"
        );
    }
    debug!(warehouse.columns = ?stats.warehouse_columns, "Warehouse attributes attached");
    info!(
        rows.enriched = stats.rows,
        rows.unmatched = stats.unmatched_rows,
        "Enriched sales with warehouse attributes"
    );

    Ok(EnrichOutput {
        sales: enriched,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::*;
    use datafusion::prelude::col;

    fn clean_frame(ctx: &EtlContext, rows: &[(&str, &str, &str)]) -> DataFrame {
        let raw = text_frame(
            ctx,
            &["order_id", "product_id", "region"],
            &rows
                .iter()
                .map(|(o, p, r)| vec![Some(*o), Some(*p), Some(*r)])
                .collect::<Vec<_>>(),
        );
        raw.select_exprs(&[
            "order_id",
            "product_id",
            "region",
            "CAST('2024-01-05' AS DATE) AS order_date",
            "CAST(1 AS BIGINT) AS quantity",
            "CAST(1.0 AS DOUBLE) AS unit_price",
            "CAST(0.0 AS DOUBLE) AS discount",
            "CAST(1.0 AS DOUBLE) AS total_sales",
        ])
        .unwrap()
    }

    #[test]
    fn test_region_expr_without_synonyms() {
        assert_eq!(region_expr(&BTreeMap::new()), "UPPER(TRIM(region))");
    }

    #[test]
    fn test_output_name_prefixes_collisions() {
        assert_eq!(output_name("Warehouse_Name"), "Warehouse_Name");
        assert_eq!(output_name("region"), "warehouse_region");
        assert_eq!(output_name("Region"), "warehouse_Region");
    }

    #[tokio::test]
    async fn test_region_is_trimmed_and_upper_cased() {
        let ctx = EtlContext::new("enrich-test").unwrap();
        let sales = clean_frame(&ctx, &[("O1", "P1", " north "), ("O2", "P1", "South")]);

        let normalized = normalize_regions(&ctx, sales, &NormalizationConfig::default())
            .await
            .unwrap();
        let batch = collect_one(normalized.sort(vec![col("order_id").sort(true, true)]).unwrap()).await;
        assert_eq!(
            strings(&batch, "region"),
            vec![Some("NORTH".to_string()), Some("SOUTH".to_string())]
        );
    }

    #[tokio::test]
    async fn test_region_synonyms_apply_after_normalization() {
        let ctx = EtlContext::new("enrich-test").unwrap();
        let sales = clean_frame(&ctx, &[("O1", "P1", " n "), ("O2", "P1", "east")]);
        let config = NormalizationConfig {
            region_synonyms: BTreeMap::from([("N".to_string(), "north".to_string())]),
        };

        let normalized = normalize_regions(&ctx, sales, &config).await.unwrap();
        let batch = collect_one(normalized.sort(vec![col("order_id").sort(true, true)]).unwrap()).await;
        assert_eq!(
            strings(&batch, "region"),
            vec![Some("NORTH".to_string()), Some("EAST".to_string())]
        );
    }

    #[tokio::test]
    async fn test_left_join_keeps_unmatched_rows() {
        let ctx = EtlContext::new("enrich-test").unwrap();
        let sales = clean_frame(&ctx, &[("O1", "P1", "NORTH"), ("O2", "P9", "NORTH")]);
        let warehouse = text_frame(
            &ctx,
            &["Product_ID", "Warehouse", "Region"],
            &[
                vec![Some("P1"), Some("WH-1"), Some("EU")],
                vec![Some("P1"), Some("WH-2"), Some("EU")],
            ],
        );

        let output = enrich_with_warehouse(&ctx, sales, warehouse, &SourceColumns::default())
            .await
            .unwrap();
        assert_eq!(output.stats.rows, 2);
        assert_eq!(output.stats.unmatched_rows, 1);
        assert_eq!(output.stats.duplicate_warehouse_rows, 1);
        assert_eq!(
            output.stats.warehouse_columns,
            vec!["Warehouse".to_string(), "warehouse_Region".to_string()]
        );

        let batch = collect_one(
            output
                .sales
                .sort(vec![col("order_id").sort(true, true)])
                .unwrap(),
        )
        .await;
        assert_eq!(
            strings(&batch, "Warehouse"),
            vec![Some("WH-1".to_string()), None]
        );
        assert_eq!(
            strings(&batch, "region"),
            vec![Some("NORTH".to_string()), Some("NORTH".to_string())]
        );
    }

    #[tokio::test]
    async fn test_warehouse_without_key_column_is_an_error() {
        let ctx = EtlContext::new("enrich-test").unwrap();
        let sales = clean_frame(&ctx, &[("O1", "P1", "NORTH")]);
        let warehouse = text_frame(&ctx, &["Sku"], &[vec![Some("P1")]]);

        let err = enrich_with_warehouse(&ctx, sales, warehouse, &SourceColumns::default())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::EtlError::ColumnNotFound { .. }));
    }
}
