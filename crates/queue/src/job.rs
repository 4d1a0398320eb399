//! Job record and the export configuration carried in `source_key`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use conduit_core::Resource;
use conduit_ingest::{ExportError, ExportFilters, ExportFormat};

use crate::error::JobError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Import,
    Export,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Import => "IMPORT",
            JobType::Export => "EXPORT",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IMPORT" => Ok(JobType::Import),
            "EXPORT" => Ok(JobType::Export),
            other => Err(format!("unknown job type '{other}'")),
        }
    }
}

/// `PENDING -> PROCESSING -> {COMPLETED, FAILED}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "PROCESSING" => Ok(JobStatus::Processing),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub resource: Resource,
    pub status: JobStatus,
    /// Import: blob key or URL of the source. Export: encoded [`ExportConfig`].
    pub source_key: String,
    /// Export output, or the error report of an import with failures.
    pub result_key: Option<String>,
    pub total_rows: i64,
    pub processed_rows: i64,
    pub failed_rows: i64,
    pub idempotency_key: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Creation request.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: JobType,
    pub resource: Resource,
    pub source_key: String,
    pub idempotency_key: Option<String>,
}

impl NewJob {
    pub fn import(resource: Resource, source_key: impl Into<String>) -> Self {
        Self {
            job_type: JobType::Import,
            resource,
            source_key: source_key.into(),
            idempotency_key: None,
        }
    }

    pub fn export(resource: Resource, config: &ExportConfig) -> Self {
        Self {
            job_type: JobType::Export,
            resource,
            source_key: config.encode(),
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: Option<String>) -> Self {
        self.idempotency_key = key.filter(|k| !k.trim().is_empty());
        self
    }
}

/// Final counters of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobCompletion {
    pub processed: u64,
    pub failed: u64,
    /// Authoritative row total; replaces any earlier estimate.
    pub total: u64,
    pub result_key: Option<String>,
}

/// Output format and filters of an export job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub filters: ExportFilters,
}

impl ExportConfig {
    pub fn new(format: ExportFormat, filters: ExportFilters) -> Self {
        Self {
            format: format.to_string(),
            filters,
        }
    }

    pub fn encode(&self) -> String {
        // a string map cannot fail to serialize
        serde_json::to_string(self).unwrap_or_default()
    }

    /// JSON, or the legacy `format|...` form which carries no filters.
    pub fn decode(source_key: &str) -> Result<Self, JobError> {
        let raw = source_key.trim();
        if raw.starts_with('{') {
            return serde_json::from_str(raw).map_err(|e| JobError::Config(e.to_string()));
        }
        let format = raw.split('|').next().unwrap_or_default();
        Ok(Self {
            format: format.trim().to_string(),
            filters: ExportFilters::new(),
        })
    }

    pub fn format(&self) -> Result<ExportFormat, ExportError> {
        self.format.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_config_round_trip() {
        let mut filters = ExportFilters::new();
        filters.insert("author".into(), "alice".into());
        let config = ExportConfig::new(ExportFormat::Csv, filters);

        let decoded = ExportConfig::decode(&config.encode()).unwrap();
        assert_eq!(decoded, config);
        assert_eq!(decoded.format().unwrap(), ExportFormat::Csv);
    }

    #[test]
    fn legacy_and_blank_configs() {
        let legacy = ExportConfig::decode("json|author=alice").unwrap();
        assert_eq!(legacy.format().unwrap(), ExportFormat::Json);
        assert!(legacy.filters.is_empty());

        let blank = ExportConfig::decode("").unwrap();
        assert_eq!(blank.format().unwrap(), ExportFormat::Ndjson);

        let json_blank = ExportConfig::decode("{\"filters\":{}}").unwrap();
        assert_eq!(json_blank.format().unwrap(), ExportFormat::Ndjson);
    }

    #[test]
    fn unknown_format_is_rejected_at_run_time() {
        let config = ExportConfig::decode("{\"format\":\"xml\"}").unwrap();
        assert!(config.format().is_err());
        assert!(ExportConfig::decode("{not json").is_err());
    }

    #[test]
    fn status_strings() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert_eq!(
            serde_json::to_string(&JobType::Export).unwrap(),
            "\"EXPORT\""
        );
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }
}
