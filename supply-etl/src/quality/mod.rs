//! Data-quality gate evaluated against the final aggregate.
//!
//! A [`QualityGate`] is a list of [`QualityCheck`]s, each with a severity
//! [`Level`]. Every check runs; only failures at [`Level::Error`] stop the run.
//!
//! ```text
//! QualityGate
//!     ├── NullRateCheck   (Error)    null daily_qty rate <= max_null_rate
//!     ├── UniqueKeyCheck  (Error)    (region, product_id, sales_date) unique
//!     ├── RangeCheck      (Info)     min daily_qty
//!     └── RangeCheck      (Info)     max daily_sales
//! ```

use crate::config::QualityGateConfig;
use crate::core::EtlContext;
use crate::error::{EtlError, Result};
use arrow::array::{Array, Float64Array, Int64Array, RecordBatch};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use tracing::{error, info, instrument, warn};

mod null_rate;
mod range;
mod uniqueness;

pub use null_rate::{null_rate_exceeds, NullRateCheck};
pub use range::{RangeCheck, Statistic};
pub use uniqueness::UniqueKeyCheck;

/// The severity level of a quality check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Recorded for observability only
    Info = 0,
    /// Reported but does not stop the run
    #[default]
    Warning = 1,
    /// Stops the run and discards the staged output
    Error = 2,
}

impl Level {
    /// Returns the string representation of the level.
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
        }
    }

    /// Checks if this level is at least as severe as another level.
    pub fn is_at_least(&self, other: Level) -> bool {
        *self >= other
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The status of a check evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Success,
    Failure,
    /// Nothing to evaluate, e.g. an empty aggregate
    Skipped,
}

impl CheckStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, CheckStatus::Success)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, CheckStatus::Failure)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, CheckStatus::Skipped)
    }
}

/// The result of evaluating one check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: CheckStatus,
    /// Metric computed during evaluation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckResult {
    pub fn success() -> Self {
        Self {
            status: CheckStatus::Success,
            metric: None,
            message: None,
        }
    }

    pub fn success_with_metric(metric: f64) -> Self {
        Self {
            status: CheckStatus::Success,
            metric: Some(metric),
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Failure,
            metric: None,
            message: Some(message.into()),
        }
    }

    pub fn failure_with_metric(metric: f64, message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Failure,
            metric: Some(metric),
            message: Some(message.into()),
        }
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Skipped,
            metric: None,
            message: Some(message.into()),
        }
    }
}

/// A data-quality check evaluated against a registered table.
///
/// Implementations are stateless and query the table through SQL; `table` has
/// already been validated as an identifier by the gate.
#[async_trait]
pub trait QualityCheck: Debug + Send + Sync {
    /// Evaluates the check against `table`.
    async fn evaluate(&self, ctx: &EtlContext, table: &str) -> Result<CheckResult>;

    /// Returns the name of the check.
    fn name(&self) -> &str;

    /// Returns the severity of a failure.
    fn level(&self) -> Level;

    /// Returns the column this check operates on, if single-column.
    fn column(&self) -> Option<&str> {
        None
    }
}

/// The outcome of one check within a gate evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub check: String,
    pub level: Level,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(flatten)]
    pub result: CheckResult,
}

impl CheckOutcome {
    /// Returns true if this outcome stops the run.
    pub fn is_blocking(&self) -> bool {
        self.level == Level::Error && self.result.status.is_failure()
    }
}

/// Results of evaluating every check of a gate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateReport {
    pub table: String,
    pub outcomes: Vec<CheckOutcome>,
}

impl GateReport {
    /// Returns true if no Error-level check failed.
    pub fn passed(&self) -> bool {
        !self.outcomes.iter().any(CheckOutcome::is_blocking)
    }

    /// Outcomes that failed at `level` or above.
    pub fn failures_at_least(&self, level: Level) -> Vec<&CheckOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.result.status.is_failure() && o.level.is_at_least(level))
            .collect()
    }

    /// Looks up the outcome of a check by name.
    pub fn outcome(&self, check: &str) -> Option<&CheckOutcome> {
        self.outcomes.iter().find(|o| o.check == check)
    }

    /// Converts the first blocking failure into a quality-gate error.
    pub fn enforce(&self) -> Result<()> {
        match self.outcomes.iter().find(|o| o.is_blocking()) {
            Some(outcome) => Err(EtlError::quality_gate(
                outcome.check.clone(),
                outcome
                    .result
                    .message
                    .clone()
                    .unwrap_or_else(|| "check failed".to_string()),
                outcome.result.metric,
            )),
            None => Ok(()),
        }
    }
}

/// An ordered collection of quality checks.
#[derive(Debug, Default)]
pub struct QualityGate {
    checks: Vec<Box<dyn QualityCheck>>,
}

impl QualityGate {
    /// Creates an empty gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a check to the gate.
    pub fn with_check(mut self, check: impl QualityCheck + 'static) -> Self {
        self.checks.push(Box::new(check));
        self
    }

    /// Builds the standard gate for the daily aggregate.
    pub fn from_config(config: &QualityGateConfig) -> Self {
        let mut gate = Self::new().with_check(
            NullRateCheck::new("daily_qty", config.max_null_rate)
                .fail_on_empty(config.fail_on_empty),
        );
        if config.check_unique_keys {
            gate = gate.with_check(UniqueKeyCheck::new(["region", "product_id", "sales_date"]));
        }
        gate.with_check(RangeCheck::new("daily_qty", Statistic::Min))
            .with_check(RangeCheck::new("daily_sales", Statistic::Max))
    }

    /// Number of checks in the gate.
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Runs every check against `table` and collects the outcomes.
    ///
    /// Check failures are reported, not raised; call [`GateReport::enforce`]
    /// to turn a blocking failure into an error.
    #[instrument(skip(self, ctx), fields(gate.checks = self.checks.len()))]
    pub async fn evaluate(&self, ctx: &EtlContext, table: &str) -> Result<GateReport> {
        crate::security::SqlSecurity::validate_identifier(table)?;

        let mut outcomes = Vec::with_capacity(self.checks.len());
        for check in &self.checks {
            let result = check.evaluate(ctx, table).await?;
            let outcome = CheckOutcome {
                check: check.name().to_string(),
                level: check.level(),
                column: check.column().map(str::to_string),
                result,
            };

            match (outcome.result.status, outcome.level) {
                (CheckStatus::Failure, Level::Error) => error!(
                    check.name = %outcome.check,
                    check.metric = ?outcome.result.metric,
                    check.message = ?outcome.result.message,
                    "Quality check failed"
                ),
                (CheckStatus::Failure, _) => warn!(
                    check.name = %outcome.check,
                    check.level = %outcome.level,
                    check.metric = ?outcome.result.metric,
                    check.message = ?outcome.result.message,
                    "Quality check failed"
                ),
                (status, _) => info!(
                    check.name = %outcome.check,
                    check.status = ?status,
                    check.metric = ?outcome.result.metric,
                    "Quality check evaluated"
                ),
            }
            outcomes.push(outcome);
        }

        Ok(GateReport {
            table: table.to_string(),
            outcomes,
        })
    }
}

/// Runs a single-row query and returns its batch, or `None` if it produced no rows.
pub(crate) async fn single_row(ctx: &EtlContext, sql: &str) -> Result<Option<RecordBatch>> {
    let batches = ctx.sql(sql).await?.collect().await?;
    Ok(batches.into_iter().find(|b| b.num_rows() > 0))
}

pub(crate) fn int_value(batch: &RecordBatch, index: usize, what: &str) -> Result<i64> {
    batch
        .column(index)
        .as_any()
        .downcast_ref::<Int64Array>()
        .map(|a| a.value(0))
        .ok_or_else(|| EtlError::Internal(format!("Failed to extract {what}")))
}

pub(crate) fn float_value(batch: &RecordBatch, index: usize, what: &str) -> Result<Option<f64>> {
    let array = batch
        .column(index)
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| EtlError::Internal(format!("Failed to extract {what}")))?;
    Ok((!array.is_null(0)).then(|| array.value(0)))
}
