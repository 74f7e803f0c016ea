//! Summary of a completed pipeline run.

use crate::catalog::CatalogEntry;
use crate::core::JobInfo;
use crate::pipeline::{CleanStats, DelayStats, EnrichStats};
use crate::quality::GateReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing and output size of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: String,
    pub duration_ms: u64,
    /// Rows produced by the stage, where counted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<usize>,
}

/// The catalog entry recorded for the published output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSummary {
    pub table: String,
    pub version: u64,
    pub fingerprint: String,
}

impl From<&CatalogEntry> for CatalogSummary {
    fn from(entry: &CatalogEntry) -> Self {
        Self {
            table: entry.table.clone(),
            version: entry.version,
            fingerprint: entry.fingerprint.clone(),
        }
    }
}

/// Everything a successful run recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub job_name: String,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub output_location: String,
    pub stages: Vec<StageReport>,
    pub clean: CleanStats,
    pub enrich: EnrichStats,
    pub aggregate_rows: usize,
    pub delay: DelayStats,
    pub rows_written: u64,
    pub quality: GateReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog: Option<CatalogSummary>,
}

impl RunReport {
    /// Starts a report for the run identified by `job`.
    pub fn new(job: &JobInfo, output_location: impl Into<String>) -> Self {
        Self {
            job_name: job.job_name.clone(),
            run_id: job.run_id.clone(),
            started_at: job.started_at,
            finished_at: job.started_at,
            output_location: output_location.into(),
            stages: Vec::new(),
            clean: CleanStats::default(),
            enrich: EnrichStats::default(),
            aggregate_rows: 0,
            delay: DelayStats::default(),
            rows_written: 0,
            quality: GateReport::default(),
            catalog: None,
        }
    }

    /// Records the timing of a finished stage.
    pub fn record_stage(&mut self, stage: &str, elapsed: Duration, rows: Option<usize>) {
        self.stages.push(StageReport {
            stage: stage.to_string(),
            duration_ms: elapsed.as_millis() as u64,
            rows,
        });
    }

    /// Marks the run as finished now.
    pub fn finish(&mut self) {
        self.finished_at = Utc::now();
    }

    /// Wall-clock duration of the run in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    pub fn to_json(&self) -> crate::error::Result<String> {
        use crate::formatters::{JsonFormatter, ReportFormatter};
        JsonFormatter::new().format(self)
    }

    pub fn to_human(&self) -> crate::error::Result<String> {
        use crate::formatters::{HumanFormatter, ReportFormatter};
        HumanFormatter::new().format(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_stage_and_finish() {
        let job = JobInfo::init("daily-sales").unwrap();
        let mut report = RunReport::new(&job, "/out");
        report.record_stage("clean", Duration::from_millis(12), Some(10));
        report.finish();

        assert_eq!(report.stages.len(), 1);
        assert_eq!(report.stages[0].duration_ms, 12);
        assert!(report.duration_ms() >= 0);

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["job_name"], "daily-sales");
        assert_eq!(json["stages"][0]["rows"], 10);
        assert!(json.get("catalog").is_none());
    }
}
