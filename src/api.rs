//! Usage export service client
//!
//! [`UsageApi`] is the seam between the protocol (submit, poll, download) and
//! the network. [`HttpUsageApi`] is the reqwest-backed implementation.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::config::ApiConfig;
use crate::error::{ArtifactError, Error, Result};
use crate::types::{Credentials, ExportRequest, JobId, JobStatus, TIMESTAMP_FORMAT};

/// Header carrying the API token
pub const TOKEN_HEADER: &str = "Circle-Token";

/// Body of the job creation request
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CreateJobRequest {
    /// Window start, `YYYY-MM-DDTHH:MM:SSZ`
    pub start: String,
    /// Window end, `YYYY-MM-DDTHH:MM:SSZ`
    pub end: String,
    /// Organizations sharing usage
    pub shared_org_ids: Vec<String>,
}

impl From<&ExportRequest> for CreateJobRequest {
    fn from(request: &ExportRequest) -> Self {
        Self {
            start: request.start.format(TIMESTAMP_FORMAT).to_string(),
            end: request.end.format(TIMESTAMP_FORMAT).to_string(),
            shared_org_ids: request.shared_org_ids.clone(),
        }
    }
}

/// Body of a job status response
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct JobStatusResponse {
    /// Raw job state (`processing`, `completed`, ...)
    pub state: String,
    /// Artifact URLs, present once completed
    #[serde(default, deserialize_with = "null_as_empty")]
    pub download_urls: Vec<String>,
}

/// The service sends `null` rather than omitting the field while processing
fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<Vec<String>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl JobStatusResponse {
    /// Parsed job status
    pub fn status(&self) -> JobStatus {
        JobStatus::from_state(&self.state)
    }
}

/// Operations the export protocol needs from the service
#[async_trait]
pub trait UsageApi: Send + Sync {
    /// Create an export job and return its identifier
    async fn create_export_job(
        &self,
        credentials: &Credentials,
        organization_id: &str,
        request: &CreateJobRequest,
    ) -> Result<JobId>;

    /// Fetch the current status of an export job
    async fn get_export_job(
        &self,
        credentials: &Credentials,
        organization_id: &str,
        job_id: &JobId,
    ) -> Result<JobStatusResponse>;

    /// Stream one artifact into `dest`, returning the number of bytes written
    ///
    /// `dest` is created or truncated. Download URLs are pre-signed, so no
    /// credentials are sent.
    async fn download_artifact(
        &self,
        index: usize,
        url: &str,
        dest: &Path,
    ) -> std::result::Result<u64, ArtifactError>;
}

/// reqwest-backed [`UsageApi`]
#[derive(Clone, Debug)]
pub struct HttpUsageApi {
    client: reqwest::Client,
    base_url: Url,
    request_timeout: Duration,
    download_timeout: Duration,
}

impl HttpUsageApi {
    /// Create a client for the configured service
    pub fn new(api: &ApiConfig, download_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::HttpClient)?;

        Ok(Self {
            client,
            base_url: api.base_url.clone(),
            request_timeout: api.request_timeout,
            download_timeout,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                Error::config(
                    "USAGE_EXPORT_API_URL",
                    format!("'{}' cannot be used as a base URL", self.base_url),
                )
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl UsageApi for HttpUsageApi {
    async fn create_export_job(
        &self,
        credentials: &Credentials,
        organization_id: &str,
        request: &CreateJobRequest,
    ) -> Result<JobId> {
        let url = self.endpoint(&["organizations", organization_id, "usage_export_job"])?;

        let response = self
            .client
            .post(url.clone())
            .header(TOKEN_HEADER, credentials.token())
            .json(request)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|source| Error::Transport {
                operation: "submitting export job",
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|source| Error::Transport {
            operation: "reading submission response",
            url: url.to_string(),
            source,
        })?;

        if status != reqwest::StatusCode::CREATED {
            return Err(Error::Submission {
                status: status.as_u16(),
                body,
            });
        }
        tracing::debug!(status = status.as_u16(), body = %body, "Export job submission response");

        parse_job_id(&body).ok_or_else(|| Error::InvalidResponse {
            url: url.to_string(),
            reason: format!("no usage_export_job_id in response body: {body}"),
        })
    }

    async fn get_export_job(
        &self,
        credentials: &Credentials,
        organization_id: &str,
        job_id: &JobId,
    ) -> Result<JobStatusResponse> {
        let url = self.endpoint(&[
            "organizations",
            organization_id,
            "usage_export_job",
            job_id.as_str(),
        ])?;

        let response = self
            .client
            .get(url.clone())
            .header(TOKEN_HEADER, credentials.token())
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|source| Error::Transport {
                operation: "checking export job status",
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|source| Error::Transport {
            operation: "reading export job status",
            url: url.to_string(),
            source,
        })?;

        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                url: url.to_string(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| Error::InvalidResponse {
            url: url.to_string(),
            reason: format!("malformed job status ({e}): {body}"),
        })
    }

    async fn download_artifact(
        &self,
        index: usize,
        url: &str,
        dest: &Path,
    ) -> std::result::Result<u64, ArtifactError> {
        let parsed = Url::parse(url).map_err(|e| ArtifactError::InvalidUrl {
            index,
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let response = self
            .client
            .get(parsed)
            .timeout(self.download_timeout)
            .send()
            .await
            .map_err(|e| ArtifactError::Transport {
                index,
                url: url.to_string(),
                reason: describe(&e),
            })?;

        if !response.status().is_success() {
            return Err(ArtifactError::HttpStatus {
                index,
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let io_err = |source: std::io::Error| ArtifactError::Io {
            index,
            path: dest.to_path_buf(),
            source,
        };

        let mut file = tokio::fs::File::create(dest).await.map_err(io_err)?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ArtifactError::Transport {
                index,
                url: url.to_string(),
                reason: describe(&e),
            })?;
            file.write_all(&chunk).await.map_err(io_err)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(io_err)?;

        Ok(written)
    }
}

/// Extract the job id, accepting either a string or a numeric id
fn parse_job_id(body: &str) -> Option<JobId> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get("usage_export_job_id")? {
        serde_json::Value::String(id) if !id.trim().is_empty() => Some(JobId::from(id.as_str())),
        serde_json::Value::Number(n) => Some(JobId(n.to_string())),
        _ => None,
    }
}

/// Render a client error with its source chain
fn describe(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
