//! Composite key uniqueness check.

use super::{int_value, single_row, CheckResult, Level, QualityCheck};
use crate::core::EtlContext;
use crate::error::Result;
use crate::security::SqlSecurity;
use async_trait::async_trait;
use tracing::instrument;

/// Fails when any combination of the key columns occurs more than once.
///
/// Nulls compare equal for grouping purposes, so two rows with the same null
/// key component count as duplicates.
#[derive(Debug, Clone)]
pub struct UniqueKeyCheck {
    columns: Vec<String>,
}

impl UniqueKeyCheck {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

#[async_trait]
impl QualityCheck for UniqueKeyCheck {
    #[instrument(skip(self, ctx), fields(check.name = %self.name(), check.columns = ?self.columns))]
    async fn evaluate(&self, ctx: &EtlContext, table: &str) -> Result<CheckResult> {
        if self.columns.is_empty() {
            return Ok(CheckResult::skipped("No key columns configured"));
        }

        let key = self
            .columns
            .iter()
            .map(|c| SqlSecurity::escape_identifier(c))
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        let sql = format!(
            "SELECT COUNT(*) AS duplicate_keys FROM (
                 SELECT {key} FROM {table} GROUP BY {key} HAVING COUNT(*) > 1
             ) duplicated"
        );

        let Some(batch) = single_row(ctx, &sql).await? else {
            return Ok(CheckResult::skipped("No data to validate"));
        };
        let duplicates = int_value(&batch, 0, "duplicate key count")?;

        if duplicates == 0 {
            Ok(CheckResult::success_with_metric(0.0))
        } else {
            Ok(CheckResult::failure_with_metric(
                duplicates as f64,
                format!(
                    "{duplicates} key value(s) of ({}) occur more than once",
                    self.columns.join(", ")
                ),
            ))
        }
    }

    fn name(&self) -> &str {
        "unique_key"
    }

    fn level(&self) -> Level {
        Level::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::CheckStatus;

    async fn context_with(values: &str) -> EtlContext {
        let ctx = EtlContext::new("uniqueness-test").unwrap();
        let df = ctx
            .sql(&format!(
                "SELECT * FROM (VALUES {values}) AS t(region, product_id, sales_date)"
            ))
            .await
            .unwrap();
        ctx.register_view("daily", df).unwrap();
        ctx
    }

    #[tokio::test]
    async fn test_unique_keys_pass() {
        let ctx = context_with("('NORTH', 'P1', 1), ('NORTH', 'P1', 2), ('SOUTH', 'P1', 1)").await;
        let result = UniqueKeyCheck::new(["region", "product_id", "sales_date"])
            .evaluate(&ctx, "daily")
            .await
            .unwrap();
        assert_eq!(result.status, CheckStatus::Success);
    }

    #[tokio::test]
    async fn test_duplicate_keys_fail() {
        let ctx = context_with("('NORTH', 'P1', 1), ('NORTH', 'P1', 1), ('SOUTH', 'P1', 1)").await;
        let result = UniqueKeyCheck::new(["region", "product_id", "sales_date"])
            .evaluate(&ctx, "daily")
            .await
            .unwrap();
        assert_eq!(result.status, CheckStatus::Failure);
        assert_eq!(result.metric, Some(1.0));
    }
}
