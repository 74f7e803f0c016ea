//! Rendering of run reports for the console and for machines.
//!
//! # Examples
//!
//! ```rust,no_run
//! use supply_etl::formatters::{HumanFormatter, ReportFormatter};
//! # use supply_etl::report::RunReport;
//! # fn show(report: &RunReport) -> supply_etl::error::Result<()> {
//! let output = HumanFormatter::new().format(report)?;
//! println!("{output}");
//! # Ok(())
//! # }
//! ```

use crate::error::{EtlError, Result};
use crate::quality::{CheckStatus, Level};
use crate::report::RunReport;
use std::fmt::Write;

/// Configuration options for formatting run reports.
#[derive(Debug, Clone)]
pub struct FormatterConfig {
    /// Include per-stage timings
    pub include_stages: bool,
    /// Include passing quality checks, not only failures
    pub include_passed_checks: bool,
    /// Whether to use colorized output (for human formatter)
    pub use_colors: bool,
    /// Whether to include timestamps in output
    pub include_timestamps: bool,
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self {
            include_stages: true,
            include_passed_checks: true,
            use_colors: true,
            include_timestamps: true,
        }
    }
}

impl FormatterConfig {
    /// Creates a minimal configuration showing only the summary.
    pub fn minimal() -> Self {
        Self {
            include_stages: false,
            include_passed_checks: false,
            use_colors: false,
            include_timestamps: false,
        }
    }

    /// Creates a configuration suitable for scheduler logs.
    pub fn ci() -> Self {
        Self {
            include_stages: true,
            include_passed_checks: false,
            use_colors: false,
            include_timestamps: true,
        }
    }

    pub fn with_stages(mut self, include: bool) -> Self {
        self.include_stages = include;
        self
    }

    pub fn with_colors(mut self, use_colors: bool) -> Self {
        self.use_colors = use_colors;
        self
    }
}

/// Trait for turning a run report into text.
pub trait ReportFormatter {
    fn format(&self, report: &RunReport) -> Result<String>;

    /// Formats with explicit configuration; the default ignores it.
    fn format_with_config(&self, report: &RunReport, _config: &FormatterConfig) -> Result<String> {
        self.format(report)
    }
}

/// Formats run reports as JSON.
#[derive(Debug, Clone)]
pub struct JsonFormatter {
    config: FormatterConfig,
    pretty: bool,
}

impl JsonFormatter {
    pub fn new() -> Self {
        Self {
            config: FormatterConfig::default(),
            pretty: true,
        }
    }

    pub fn with_config(config: FormatterConfig) -> Self {
        Self {
            config,
            pretty: true,
        }
    }

    /// Sets whether to use pretty-printed JSON.
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }
}

impl Default for JsonFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportFormatter for JsonFormatter {
    fn format(&self, report: &RunReport) -> Result<String> {
        self.format_with_config(report, &self.config)
    }

    fn format_with_config(&self, report: &RunReport, config: &FormatterConfig) -> Result<String> {
        let mut filtered = report.clone();
        if !config.include_stages {
            filtered.stages.clear();
        }
        if !config.include_passed_checks {
            filtered
                .quality
                .outcomes
                .retain(|o| !o.result.status.is_success());
        }

        let rendered = if self.pretty {
            serde_json::to_string_pretty(&filtered)
        } else {
            serde_json::to_string(&filtered)
        };
        rendered
            .map_err(|e| EtlError::Internal(format!("Failed to serialize report to JSON: {e}")))
    }
}

/// Formats run reports for a terminal.
#[derive(Debug, Clone)]
pub struct HumanFormatter {
    config: FormatterConfig,
}

impl HumanFormatter {
    pub fn new() -> Self {
        Self {
            config: FormatterConfig::default(),
        }
    }

    pub fn with_config(config: FormatterConfig) -> Self {
        Self { config }
    }

    fn paint(text: &str, code: &str, config: &FormatterConfig) -> String {
        if config.use_colors {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }
}

impl Default for HumanFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn write_human(output: &mut String, report: &RunReport, config: &FormatterConfig) -> std::fmt::Result {
    writeln!(output)?;
    let status = if report.quality.passed() {
        HumanFormatter::paint("Run SUCCEEDED", "32", config)
    } else {
        HumanFormatter::paint("Run FAILED", "31", config)
    };
    writeln!(output, "{status}")?;
    writeln!(output)?;
    writeln!(output, "Job: {} (run {})", report.job_name, report.run_id)?;
    if config.include_timestamps {
        writeln!(output, "Started: {}", report.started_at)?;
        writeln!(output, "Finished: {}", report.finished_at)?;
    }
    writeln!(output, "Duration: {}ms", report.duration_ms())?;
    writeln!(output, "Output: {}", report.output_location)?;

    writeln!(output)?;
    writeln!(output, "Rows:")?;
    writeln!(output, "   Read: {}", report.clean.input_rows)?;
    writeln!(output, "   Duplicates dropped: {}", report.clean.duplicate_rows)?;
    writeln!(output, "   Invalid dropped: {}", report.clean.invalid_rows)?;
    writeln!(output, "   Clean: {}", report.clean.output_rows)?;
    writeln!(
        output,
        "   Without warehouse match: {}",
        report.enrich.unmatched_rows
    )?;
    writeln!(output, "   Daily groups: {}", report.aggregate_rows)?;
    writeln!(output, "   Delay adjusted: {}", report.delay.adjusted_rows)?;
    writeln!(output, "   Written: {}", report.rows_written)?;

    if let Some(catalog) = &report.catalog {
        writeln!(output)?;
        writeln!(
            output,
            "Catalog: {} v{} ({})",
            catalog.table, catalog.version, catalog.fingerprint
        )?;
    }

    if config.include_stages && !report.stages.is_empty() {
        writeln!(output)?;
        writeln!(output, "Stages:")?;
        for stage in &report.stages {
            match stage.rows {
                Some(rows) => writeln!(
                    output,
                    "   {:<20} {:>8}ms {rows:>10} rows",
                    stage.stage, stage.duration_ms
                )?,
                None => writeln!(output, "   {:<20} {:>8}ms", stage.stage, stage.duration_ms)?,
            }
        }
    }

    let shown: Vec<_> = report
        .quality
        .outcomes
        .iter()
        .filter(|o| config.include_passed_checks || !o.result.status.is_success())
        .collect();
    if !shown.is_empty() {
        writeln!(output)?;
        writeln!(output, "Quality checks on {}:", report.quality.table)?;
        for outcome in shown {
            let mark = match (outcome.result.status, outcome.level) {
                (CheckStatus::Success, _) => HumanFormatter::paint("PASS", "32", config),
                (CheckStatus::Skipped, _) => HumanFormatter::paint("SKIP", "33", config),
                (CheckStatus::Failure, Level::Error) => HumanFormatter::paint("FAIL", "31", config),
                (CheckStatus::Failure, _) => HumanFormatter::paint("WARN", "33", config),
            };
            write!(output, "   [{mark}] {} ({})", outcome.check, outcome.level)?;
            if let Some(metric) = outcome.result.metric {
                write!(output, " metric={metric:.4}")?;
            }
            if let Some(message) = &outcome.result.message {
                write!(output, ": {message}")?;
            }
            writeln!(output)?;
        }
    }

    Ok(())
}

impl ReportFormatter for HumanFormatter {
    fn format(&self, report: &RunReport) -> Result<String> {
        self.format_with_config(report, &self.config)
    }

    fn format_with_config(&self, report: &RunReport, config: &FormatterConfig) -> Result<String> {
        let mut output = String::new();
        write_human(&mut output, report, config)
            .map_err(|e| EtlError::Internal(format!("Failed to format report: {e}")))?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::JobInfo;
    use crate::quality::{CheckOutcome, CheckResult, GateReport};

    fn sample_report() -> RunReport {
        let job = JobInfo::init("daily-sales").unwrap();
        let mut report = RunReport::new(&job, "/data/daily");
        report.rows_written = 42;
        report.quality = GateReport {
            table: "adjusted_aggregate".to_string(),
            outcomes: vec![
                CheckOutcome {
                    check: "null_rate".to_string(),
                    level: Level::Error,
                    column: Some("daily_qty".to_string()),
                    result: CheckResult::success_with_metric(0.0),
                },
                CheckOutcome {
                    check: "max_daily_sales".to_string(),
                    level: Level::Info,
                    column: Some("daily_sales".to_string()),
                    result: CheckResult::failure_with_metric(1e9, "above bound"),
                },
            ],
        };
        report
    }

    #[test]
    fn test_human_format_plain() {
        let output = HumanFormatter::with_config(FormatterConfig::default().with_colors(false))
            .format(&sample_report())
            .unwrap();

        assert!(output.contains("Run SUCCEEDED"));
        assert!(output.contains("Written: 42"));
        assert!(output.contains("[PASS] null_rate (error)"));
        assert!(output.contains("[WARN] max_daily_sales (info)"));
        assert!(!output.contains("\x1b["));
    }

    #[test]
    fn test_minimal_hides_passed_checks() {
        let output = HumanFormatter::with_config(FormatterConfig::minimal())
            .format(&sample_report())
            .unwrap();
        assert!(!output.contains("null_rate"));
        assert!(output.contains("max_daily_sales"));
        assert!(!output.contains("Started:"));
    }

    #[test]
    fn test_json_compact_filters_checks() {
        let output = JsonFormatter::with_config(FormatterConfig::ci())
            .with_pretty(false)
            .format(&sample_report())
            .unwrap();
        assert!(!output.contains('\n'));

        let json: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(json["rows_written"], 42);
        assert_eq!(json["quality"]["outcomes"].as_array().unwrap().len(), 1);
        assert_eq!(json["quality"]["outcomes"][0]["check"], "max_daily_sales");
    }
}
