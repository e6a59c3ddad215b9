//! Export job submission

use std::sync::Arc;

use crate::api::{CreateJobRequest, UsageApi};
use crate::error::{Error, Result};
use crate::types::{Credentials, ExportJob, ExportRequest, TIMESTAMP_FORMAT};

/// Creates export jobs
#[derive(Clone)]
pub struct JobSubmitter {
    api: Arc<dyn UsageApi>,
}

impl JobSubmitter {
    /// Create a submitter backed by `api`
    pub fn new(api: Arc<dyn UsageApi>) -> Self {
        Self { api }
    }

    /// Submit `request` and return the new job in the processing state
    ///
    /// The request and credentials are validated first; an invalid request
    /// fails with [`Error::Config`] without touching the network. Exactly one
    /// request is sent otherwise, and a rejection is not retried.
    pub async fn submit(
        &self,
        request: &ExportRequest,
        credentials: &Credentials,
    ) -> Result<ExportJob> {
        request.validate()?;
        if credentials.is_empty() {
            return Err(Error::config("CIRCLECI_API_TOKEN", "API token is required"));
        }

        tracing::info!(
            organization_id = %request.organization_id,
            start = %request.start.format(TIMESTAMP_FORMAT),
            end = %request.end.format(TIMESTAMP_FORMAT),
            shared_orgs = request.shared_org_ids.len(),
            "Requesting usage export"
        );

        let body = CreateJobRequest::from(request);
        let job_id = match self
            .api
            .create_export_job(credentials, &request.organization_id, &body)
            .await
        {
            Ok(job_id) => job_id,
            Err(e) => {
                tracing::error!(error = %e, "Usage export request failed");
                return Err(e);
            }
        };

        tracing::info!(job_id = %job_id, "Usage export requested");
        Ok(ExportJob::processing(job_id, request.organization_id.clone()))
    }
}
