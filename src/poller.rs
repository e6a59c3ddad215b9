//! Export job status polling
//!
//! [`JobPoller::resolve`] drives a submitted job through its state machine:
//!
//! - `processing` → wait the poll interval and check again
//! - `completed` → download every artifact
//! - anything else → fail immediately with the raw state
//!
//! The attempt budget and interval come from [`PollConfig`]; running out while
//! the job is still processing is a [`Error::PollTimeout`], which is distinct
//! from the service reporting a failure.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::api::UsageApi;
use crate::config::{DownloadConfig, PollConfig};
use crate::downloader::ArtifactDownloader;
use crate::error::{Error, Result};
use crate::retry::{PollError, PollOutcome, poll_until_ready};
use crate::types::{Credentials, ExportJob, JobStatus, ResolveReport};

/// Polls an export job to completion and fetches its artifacts
#[derive(Clone)]
pub struct JobPoller {
    api: Arc<dyn UsageApi>,
    downloader: ArtifactDownloader,
}

impl JobPoller {
    /// Create a poller that downloads according to `download`
    pub fn new(api: Arc<dyn UsageApi>, download: DownloadConfig) -> Self {
        let downloader = ArtifactDownloader::new(Arc::clone(&api), download);
        Self { api, downloader }
    }

    /// Wait for `job` to complete, then download and decode its artifacts
    ///
    /// Returns a report of per-artifact outcomes once the job completed, even
    /// if some or all artifacts failed. Fails if the job never completed.
    pub async fn resolve(
        &self,
        mut job: ExportJob,
        credentials: &Credentials,
        policy: &PollConfig,
        cancel: &CancellationToken,
    ) -> Result<ResolveReport> {
        if credentials.is_empty() {
            return Err(Error::config("CIRCLECI_API_TOKEN", "API token is required"));
        }

        let api = &self.api;
        let job_id = &job.job_id;
        let organization_id = job.organization_id.as_str();

        let polled = poll_until_ready(policy, cancel, |attempt| async move {
            tracing::info!(
                job_id = %job_id,
                attempt,
                max_attempts = policy.max_attempts,
                "Checking if usage export can be downloaded"
            );
            let response = api
                .get_export_job(credentials, organization_id, job_id)
                .await?;

            match response.status() {
                JobStatus::Completed => Ok(PollOutcome::Ready(response.download_urls)),
                JobStatus::Processing => {
                    tracing::info!(
                        job_id = %job_id,
                        retry_in_secs = policy.interval.as_secs(),
                        "Usage export still processing"
                    );
                    Ok(PollOutcome::Pending)
                }
                other => Err(Error::JobFailed {
                    job_id: job_id.clone(),
                    state: other.as_state().to_string(),
                }),
            }
        })
        .await;

        let download_urls = match polled {
            Ok(urls) => urls,
            Err(PollError::Fatal { error, .. }) => return Err(error),
            Err(PollError::Exhausted {
                attempts,
                last_error,
            }) => {
                tracing::error!(
                    job_id = %job.job_id,
                    attempts,
                    "Usage export still processing after all status checks"
                );
                return Err(Error::PollTimeout {
                    job_id: job.job_id,
                    attempts,
                    last_error: last_error.map(|e| e.to_string()),
                });
            }
            Err(PollError::Cancelled { attempts }) => {
                tracing::warn!(job_id = %job.job_id, attempts, "Polling cancelled");
                return Err(Error::Cancelled {
                    job_id: job.job_id,
                    attempts,
                });
            }
        };

        job.status = JobStatus::Completed;
        job.download_urls = download_urls;
        tracing::info!(
            job_id = %job.job_id,
            status = %job.status,
            artifacts = job.download_urls.len(),
            "Usage export generated, downloading"
        );

        let outcomes = self
            .downloader
            .download_all(&job.job_id, &job.download_urls)
            .await?;
        let report = ResolveReport::new(job.job_id, outcomes);

        tracing::info!(
            job_id = %report.job_id,
            succeeded = report.succeeded(),
            failed = report.failed(),
            total = report.total(),
            "Artifact downloads finished"
        );
        Ok(report)
    }
}
