//! Shared test fixtures: a scripted in-memory [`UsageApi`] and gzip helpers.

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::api::{CreateJobRequest, JobStatusResponse, UsageApi};
use crate::error::{ArtifactError, Result};
use crate::types::{Credentials, JobId};

/// Gzip `data` in memory
pub(crate) fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// A status response in the given state
pub(crate) fn status(state: &str, urls: &[&str]) -> Result<JobStatusResponse> {
    Ok(JobStatusResponse {
        state: state.to_string(),
        download_urls: urls.iter().map(|u| u.to_string()).collect(),
    })
}

/// What the fake serves for a download URL
pub(crate) enum FakeArtifact {
    Body(Vec<u8>),
    Status(u16),
}

/// Scripted [`UsageApi`] that records every call
///
/// Status responses are served in order; once the script runs out every
/// further status check reports `processing`.
#[derive(Default)]
pub(crate) struct FakeApi {
    pub(crate) job_id: Option<String>,
    pub(crate) statuses: Mutex<VecDeque<Result<JobStatusResponse>>>,
    pub(crate) artifacts: HashMap<String, FakeArtifact>,
    pub(crate) submissions: AtomicU32,
    pub(crate) status_calls: AtomicU32,
    pub(crate) status_times: Mutex<Vec<tokio::time::Instant>>,
    pub(crate) downloads: Mutex<Vec<String>>,
}

impl FakeApi {
    pub(crate) fn new(job_id: &str) -> Self {
        Self {
            job_id: Some(job_id.to_string()),
            ..Default::default()
        }
    }

    pub(crate) fn with_statuses(
        mut self,
        statuses: impl IntoIterator<Item = Result<JobStatusResponse>>,
    ) -> Self {
        self.statuses = Mutex::new(statuses.into_iter().collect());
        self
    }

    pub(crate) fn with_artifact(mut self, url: &str, artifact: FakeArtifact) -> Self {
        self.artifacts.insert(url.to_string(), artifact);
        self
    }

    pub(crate) fn submissions(&self) -> u32 {
        self.submissions.load(Ordering::SeqCst)
    }

    pub(crate) fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn download_count(&self) -> usize {
        self.downloads.lock().unwrap().len()
    }
}

#[async_trait]
impl UsageApi for FakeApi {
    async fn create_export_job(
        &self,
        _credentials: &Credentials,
        _organization_id: &str,
        _request: &CreateJobRequest,
    ) -> Result<JobId> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        Ok(JobId::from(self.job_id.clone().unwrap_or_default()))
    }

    async fn get_export_job(
        &self,
        _credentials: &Credentials,
        _organization_id: &str,
        _job_id: &JobId,
    ) -> Result<JobStatusResponse> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.status_times
            .lock()
            .unwrap()
            .push(tokio::time::Instant::now());
        let next = self.statuses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| status("processing", &[]))
    }

    async fn download_artifact(
        &self,
        index: usize,
        url: &str,
        dest: &Path,
    ) -> std::result::Result<u64, ArtifactError> {
        self.downloads.lock().unwrap().push(url.to_string());
        match self.artifacts.get(url) {
            Some(FakeArtifact::Body(bytes)) => {
                tokio::fs::write(dest, bytes)
                    .await
                    .map_err(|source| ArtifactError::Io {
                        index,
                        path: dest.to_path_buf(),
                        source,
                    })?;
                Ok(bytes.len() as u64)
            }
            Some(FakeArtifact::Status(status)) => Err(ArtifactError::HttpStatus {
                index,
                url: url.to_string(),
                status: *status,
            }),
            None => Err(ArtifactError::HttpStatus {
                index,
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}
