//! # usage-export
//!
//! Client for asynchronous usage export jobs: submit an export request, poll
//! the job until it is ready, then download and decompress every result file
//! into a local working directory.
//!
//! ## Protocol
//!
//! 1. [`JobSubmitter`] validates an [`ExportRequest`] and creates the job.
//! 2. [`JobPoller`] checks the job status at a fixed interval, within a
//!    bounded number of attempts, until it completes or fails.
//! 3. [`ArtifactDownloader`] fetches each download URL and gunzips it to
//!    `<work_dir>/reports/<prefix>_<index>.csv`. Failures are isolated per
//!    artifact and reported in a [`ResolveReport`].
//!
//! Combining, deduplicating and plotting the CSV files is left to downstream
//! tools reading the reports directory.
//!
//! ## Quick Start
//!
//! ```no_run
//! use usage_export::{Config, Settings, UsageExporter};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_settings(Settings {
//!         org_id: Some("my-org-id".to_string()),
//!         token: Some("my-token".to_string()),
//!         start_date: Some("2024-01-01".to_string()),
//!         end_date: Some("2024-02-01".to_string()),
//!         ..Default::default()
//!     })?;
//!
//!     let cancel = CancellationToken::new();
//!     tokio::spawn(usage_export::cancel_on_signal(cancel.clone()));
//!
//!     let report = UsageExporter::new(config)?.run(&cancel).await?;
//!     println!("{} of {} artifacts downloaded", report.succeeded(), report.total());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Usage export service client
pub mod api;
/// Configuration types
pub mod config;
/// Artifact download and decompression
pub mod downloader;
/// Error types
pub mod error;
/// End-to-end export runs
pub mod exporter;
/// Export job status polling
pub mod poller;
/// Bounded fixed-interval polling
pub mod retry;
/// Export job submission
pub mod submitter;
/// Core types
pub mod types;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use api::{HttpUsageApi, UsageApi};
pub use config::{ArtifactPolicy, Config, DownloadConfig, PollConfig, Settings};
pub use downloader::ArtifactDownloader;
pub use error::{ArtifactError, Error, Result, ToExitCode};
pub use exporter::UsageExporter;
pub use poller::JobPoller;
pub use submitter::JobSubmitter;
pub use types::{
    Artifact, ArtifactOutcome, Credentials, ExportJob, ExportRequest, JobId, JobStatus,
    ResolveReport,
};

use tokio_util::sync::CancellationToken;

/// Cancel `token` when the process receives SIGTERM or Ctrl+C (SIGINT).
///
/// Returns without cancelling once the token is cancelled elsewhere, so the
/// spawned task ends with the run.
pub async fn cancel_on_signal(token: CancellationToken) {
    tokio::select! {
        signal = termination_signal() => {
            tracing::warn!(signal, "Shutdown requested, cancelling export");
            token.cancel();
        }
        _ = token.cancelled() => {}
    }
}

#[cfg(unix)]
async fn termination_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            name = interrupt() => name,
        },
        Err(e) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl+C only");
            interrupt().await
        }
    }
}

#[cfg(not(unix))]
async fn termination_signal() -> &'static str {
    interrupt().await
}

/// Resolves on Ctrl+C; never resolves if the handler cannot be installed
async fn interrupt() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "SIGINT",
        Err(e) => {
            tracing::error!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending().await
        }
    }
}
