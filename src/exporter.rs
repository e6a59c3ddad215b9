//! End-to-end export run: submit, poll, download.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::api::{HttpUsageApi, UsageApi};
use crate::config::Config;
use crate::error::Result;
use crate::poller::JobPoller;
use crate::submitter::JobSubmitter;
use crate::types::ResolveReport;

/// Runs one usage export from a validated [`Config`]
#[derive(Clone)]
pub struct UsageExporter {
    config: Config,
    submitter: JobSubmitter,
    poller: JobPoller,
}

impl UsageExporter {
    /// Create an exporter talking to the configured service over HTTP
    pub fn new(config: Config) -> Result<Self> {
        let api = HttpUsageApi::new(&config.api, config.download.timeout)?;
        Ok(Self::with_api(config, Arc::new(api)))
    }

    /// Create an exporter on top of a custom [`UsageApi`]
    pub fn with_api(config: Config, api: Arc<dyn UsageApi>) -> Self {
        let submitter = JobSubmitter::new(Arc::clone(&api));
        let poller = JobPoller::new(api, config.download.clone());
        Self {
            config,
            submitter,
            poller,
        }
    }

    /// The configuration this exporter runs with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Submit the export job and resolve it into local artifacts
    ///
    /// The artifact policy is not applied here; see [`ResolveReport::check`].
    pub async fn run(&self, cancel: &CancellationToken) -> Result<ResolveReport> {
        let job = self
            .submitter
            .submit(&self.config.export_request(), &self.config.credentials)
            .await?;

        self.poller
            .resolve(job, &self.config.credentials, &self.config.poll, cancel)
            .await
    }
}
