//! Core types for usage-export

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::ArtifactPolicy;
use crate::error::{ArtifactError, Error, Result};

/// Wire format for export window boundaries
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Subdirectory of the work dir holding decompressed reports
pub const REPORTS_DIR: &str = "reports";

/// Identifier assigned to an export job by the service
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Get the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// API token sent in the `Circle-Token` header
///
/// The `Debug` output is redacted so tokens never end up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials(String);

impl Credentials {
    /// Wrap a bearer token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token value
    pub fn token(&self) -> &str {
        &self.0
    }

    /// True when the token is empty or whitespace
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credentials(<redacted>)")
    }
}

/// Export job status as reported by the service's `state` field
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobStatus {
    /// Still being materialized
    Processing,
    /// Ready to download
    Completed,
    /// Failed on the service side
    Failed,
    /// Any other state string, kept verbatim
    Unknown(String),
}

impl JobStatus {
    /// Map the raw `state` string to a status
    pub fn from_state(state: &str) -> Self {
        match state {
            "processing" => JobStatus::Processing,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            other => JobStatus::Unknown(other.to_string()),
        }
    }

    /// The raw state string
    pub fn as_state(&self) -> &str {
        match self {
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Unknown(state) => state,
        }
    }

    /// True when no further polling is meaningful
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Processing)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_state())
    }
}

/// Parameters of a usage export job
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportRequest {
    /// Organization whose usage is exported
    pub organization_id: String,
    /// Start of the export window (inclusive)
    pub start: DateTime<Utc>,
    /// End of the export window
    pub end: DateTime<Utc>,
    /// Additional organizations sharing usage with this one
    pub shared_org_ids: Vec<String>,
}

impl ExportRequest {
    /// Check the request invariants
    ///
    /// The organization id must be non-empty and the window must satisfy
    /// `start < end`.
    pub fn validate(&self) -> Result<()> {
        if self.organization_id.trim().is_empty() {
            return Err(Error::config("ORG_ID", "organization id is required"));
        }
        if self.start >= self.end {
            return Err(Error::config(
                "END_DATE",
                format!(
                    "export window start ({}) must be before end ({})",
                    self.start.format(TIMESTAMP_FORMAT),
                    self.end.format(TIMESTAMP_FORMAT)
                ),
            ));
        }
        if self.shared_org_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(Error::config(
                "SHARED_ORG_IDS",
                "shared organization ids must not be empty",
            ));
        }
        Ok(())
    }
}

/// A submitted export job, owned by the poller until it reaches a terminal state
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportJob {
    /// Identifier assigned by the service
    pub job_id: JobId,
    /// Organization the job belongs to
    pub organization_id: String,
    /// Last observed status
    pub status: JobStatus,
    /// Artifact URLs, populated once the job completes
    pub download_urls: Vec<String>,
}

impl ExportJob {
    /// A freshly submitted job
    pub fn processing(job_id: JobId, organization_id: impl Into<String>) -> Self {
        Self {
            job_id,
            organization_id: organization_id.into(),
            status: JobStatus::Processing,
            download_urls: Vec::new(),
        }
    }
}

/// Deterministic local paths of one artifact
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactPaths {
    /// `<work_dir>/<prefix>_<index>.csv.gz`
    pub compressed: PathBuf,
    /// `<work_dir>/reports/<prefix>_<index>.csv`
    pub decompressed: PathBuf,
}

impl ArtifactPaths {
    /// Paths for the artifact at `index`
    pub fn new(work_dir: &Path, prefix: &str, index: usize) -> Self {
        Self {
            compressed: work_dir.join(format!("{prefix}_{index}.csv.gz")),
            decompressed: reports_dir(work_dir).join(format!("{prefix}_{index}.csv")),
        }
    }
}

/// Directory the decompressed reports are written to
pub fn reports_dir(work_dir: &Path) -> PathBuf {
    work_dir.join(REPORTS_DIR)
}

/// A downloaded and decompressed artifact
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artifact {
    /// Position in the job's URL list
    pub index: usize,
    /// Where it was downloaded from
    pub source_url: String,
    /// The gzip file as received
    pub compressed_path: PathBuf,
    /// The decoded CSV
    pub decompressed_path: PathBuf,
    /// Size of the compressed file
    pub compressed_bytes: u64,
    /// Size of the decoded file
    pub decompressed_bytes: u64,
}

/// Result of handling one download URL
#[derive(Debug)]
pub struct ArtifactOutcome {
    /// Position in the job's URL list
    pub index: usize,
    /// The download URL
    pub url: String,
    /// The artifact, or why it could not be produced
    pub result: std::result::Result<Artifact, ArtifactError>,
}

impl ArtifactOutcome {
    /// True when the artifact was downloaded and decoded
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Aggregate result of resolving a completed export job
#[derive(Debug)]
pub struct ResolveReport {
    /// The resolved job
    pub job_id: JobId,
    /// One outcome per download URL, ordered by index
    pub outcomes: Vec<ArtifactOutcome>,
}

impl ResolveReport {
    /// Build a report, ordering outcomes by artifact index
    pub fn new(job_id: JobId, mut outcomes: Vec<ArtifactOutcome>) -> Self {
        outcomes.sort_by_key(|o| o.index);
        Self { job_id, outcomes }
    }

    /// Successfully produced artifacts
    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    /// Per-artifact failures
    pub fn failures(&self) -> impl Iterator<Item = &ArtifactError> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().err())
    }

    /// Number of artifacts reported by the job
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    /// Number of successful artifacts
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    /// Number of failed artifacts
    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }

    /// Apply the partial-failure policy
    pub fn check(&self, policy: ArtifactPolicy) -> Result<()> {
        if policy.is_satisfied(self.succeeded(), self.total()) {
            Ok(())
        } else {
            Err(Error::ArtifactsFailed {
                succeeded: self.succeeded(),
                failed: self.failed(),
                total: self.total(),
                policy,
            })
        }
    }
}
