//! Column statistics recorded alongside the gate.

use super::{float_value, single_row, CheckResult, Level, QualityCheck};
use crate::core::EtlContext;
use crate::error::Result;
use crate::security::SqlSecurity;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::instrument;

/// Statistic computed by a [`RangeCheck`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Statistic {
    Min,
    Max,
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statistic::Min => write!(f, "min"),
            Statistic::Max => write!(f, "max"),
        }
    }
}

/// Records the minimum or maximum of a column, optionally asserting bounds.
///
/// Without bounds the check always succeeds and only reports the metric.
#[derive(Debug, Clone)]
pub struct RangeCheck {
    name: String,
    column: String,
    statistic: Statistic,
    lower: Option<f64>,
    upper: Option<f64>,
    level: Level,
}

impl RangeCheck {
    pub fn new(column: impl Into<String>, statistic: Statistic) -> Self {
        let column = column.into();
        Self {
            name: format!("{statistic}_{column}"),
            column,
            statistic,
            lower: None,
            upper: None,
            level: Level::Info,
        }
    }

    /// Fails when the statistic is below `bound`.
    pub fn at_least(mut self, bound: f64) -> Self {
        self.lower = Some(bound);
        self
    }

    /// Fails when the statistic is above `bound`.
    pub fn at_most(mut self, bound: f64) -> Self {
        self.upper = Some(bound);
        self
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }
}

#[async_trait]
impl QualityCheck for RangeCheck {
    #[instrument(skip(self, ctx), fields(check.name = %self.name, check.column = %self.column))]
    async fn evaluate(&self, ctx: &EtlContext, table: &str) -> Result<CheckResult> {
        let column = SqlSecurity::escape_identifier(&self.column)?;
        let function = match self.statistic {
            Statistic::Min => "MIN",
            Statistic::Max => "MAX",
        };
        let sql = format!("SELECT CAST({function}({column}) AS DOUBLE) AS value FROM {table}");

        let Some(batch) = single_row(ctx, &sql).await? else {
            return Ok(CheckResult::skipped("No data to validate"));
        };
        let Some(value) = float_value(&batch, 0, "statistic")? else {
            return Ok(CheckResult::skipped("No non-null values"));
        };

        if let Some(lower) = self.lower.filter(|lower| value < *lower) {
            return Ok(CheckResult::failure_with_metric(
                value,
                format!("{} of {} is {value}, below {lower}", self.statistic, self.column),
            ));
        }
        if let Some(upper) = self.upper.filter(|upper| value > *upper) {
            return Ok(CheckResult::failure_with_metric(
                value,
                format!("{} of {} is {value}, above {upper}", self.statistic, self.column),
            ));
        }
        Ok(CheckResult::success_with_metric(value))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn level(&self) -> Level {
        self.level
    }

    fn column(&self) -> Option<&str> {
        Some(&self.column)
    }
}
