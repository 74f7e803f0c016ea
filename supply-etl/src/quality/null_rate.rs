//! Null-rate check: the fraction of null values in a column must not exceed a maximum.

use super::{int_value, single_row, CheckResult, Level, QualityCheck};
use crate::core::EtlContext;
use crate::error::Result;
use crate::security::SqlSecurity;
use async_trait::async_trait;
use tracing::{debug, instrument};

/// Returns true when `null_count / total` is strictly greater than `max_null_rate`.
///
/// An empty input never exceeds the rate.
pub fn null_rate_exceeds(null_count: u64, total: u64, max_null_rate: f64) -> bool {
    total > 0 && (null_count as f64 / total as f64) > max_null_rate
}

/// Fails when the null rate of a column is above `max_null_rate`.
///
/// An empty table is skipped unless [`NullRateCheck::fail_on_empty`] is set.
#[derive(Debug, Clone)]
pub struct NullRateCheck {
    column: String,
    max_null_rate: f64,
    fail_on_empty: bool,
}

impl NullRateCheck {
    pub fn new(column: impl Into<String>, max_null_rate: f64) -> Self {
        Self {
            column: column.into(),
            max_null_rate,
            fail_on_empty: false,
        }
    }

    /// Fails instead of skipping when the table has no rows.
    pub fn fail_on_empty(mut self, fail: bool) -> Self {
        self.fail_on_empty = fail;
        self
    }
}

#[async_trait]
impl QualityCheck for NullRateCheck {
    #[instrument(skip(self, ctx), fields(
        check.name = %self.name(),
        check.column = %self.column,
        check.max_null_rate = %self.max_null_rate
    ))]
    async fn evaluate(&self, ctx: &EtlContext, table: &str) -> Result<CheckResult> {
        let column = SqlSecurity::escape_identifier(&self.column)?;
        let sql = format!(
            "SELECT COUNT(*) AS total_count, COUNT({column}) AS non_null_count FROM {table}"
        );

        let Some(batch) = single_row(ctx, &sql).await? else {
            return Ok(CheckResult::skipped("No data to validate"));
        };
        let total = int_value(&batch, 0, "total count")? as u64;
        let non_null = int_value(&batch, 1, "non-null count")? as u64;

        if total == 0 {
            debug!(skip.reason = "empty table", "Null rate not computed");
            return Ok(if self.fail_on_empty {
                CheckResult::failure(format!("{table} is empty"))
            } else {
                CheckResult::skipped("No data to validate")
            });
        }

        let null_count = total - non_null;
        let rate = null_count as f64 / total as f64;
        debug!(
            data.rows = total,
            data.nulls = null_count,
            check.rate = rate,
            "Computed null rate"
        );

        if null_rate_exceeds(null_count, total, self.max_null_rate) {
            Ok(CheckResult::failure_with_metric(
                rate,
                format!(
                    "Null rate of {} is {:.4}% ({null_count} of {total} rows), above the maximum of {:.4}%",
                    self.column,
                    rate * 100.0,
                    self.max_null_rate * 100.0
                ),
            ))
        } else {
            Ok(CheckResult::success_with_metric(rate))
        }
    }

    fn name(&self) -> &str {
        "null_rate"
    }

    fn level(&self) -> Level {
        Level::Error
    }

    fn column(&self) -> Option<&str> {
        Some(&self.column)
    }
}
