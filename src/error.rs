//! Error types for usage-export
//!
//! This module provides the error taxonomy of the export protocol:
//! - Job-level errors ([`Error`]) that abort a submit or resolve call
//! - Per-artifact errors ([`ArtifactError`]) that are isolated to one download
//! - Process exit code mapping for the command line entry point

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ArtifactPolicy;
use crate::types::JobId;

/// Result type alias for usage-export operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for usage-export
///
/// Each variant carries enough context (HTTP status, response body, URL,
/// attempt count) to be logged on its own.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid configuration, detected before any network call
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "ORG_ID")
        key: Option<String>,
    },

    /// The request never produced an HTTP response (connect, DNS, timeout)
    #[error("transport error while {operation} ({url}): {source}")]
    Transport {
        /// What was being attempted (e.g., "submitting export job")
        operation: &'static str,
        /// The request URL
        url: String,
        /// Underlying client error
        #[source]
        source: reqwest::Error,
    },

    /// The HTTP client could not be constructed (TLS backend, proxy settings)
    #[error("failed to create HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    /// The service rejected the export job request
    #[error("export job submission rejected with HTTP {status}: {body}")]
    Submission {
        /// HTTP status code returned by the service
        status: u16,
        /// Raw response body
        body: String,
    },

    /// Unexpected non-success status on a status check
    #[error("unexpected HTTP {status} from {url}: {body}")]
    Api {
        /// HTTP status code returned by the service
        status: u16,
        /// The request URL
        url: String,
        /// Raw response body
        body: String,
    },

    /// A success response whose body could not be interpreted
    #[error("invalid response from {url}: {reason}")]
    InvalidResponse {
        /// The request URL
        url: String,
        /// Why the body was rejected
        reason: String,
    },

    /// The attempt budget ran out while the job was still processing
    #[error("export job {job_id} still processing after {attempts} status checks")]
    PollTimeout {
        /// The job that did not finish in time
        job_id: JobId,
        /// Number of status requests issued
        attempts: u32,
        /// Error from the final attempt, if it failed rather than reporting processing
        last_error: Option<String>,
    },

    /// The service reported a terminal state other than completed
    #[error("export job {job_id} ended in state '{state}'")]
    JobFailed {
        /// The failed job
        job_id: JobId,
        /// Raw state string reported by the service
        state: String,
    },

    /// Polling was cancelled by the caller
    #[error("export job {job_id}: polling cancelled after {attempts} status checks")]
    Cancelled {
        /// The job being polled
        job_id: JobId,
        /// Number of status requests issued before cancellation
        attempts: u32,
    },

    /// Artifact outcomes did not satisfy the configured policy
    #[error("{failed} of {total} artifacts failed (policy: {policy})")]
    ArtifactsFailed {
        /// Number of artifacts downloaded and decoded successfully
        succeeded: usize,
        /// Number of artifacts that failed
        failed: usize,
        /// Total number of artifacts reported by the job
        total: usize,
        /// The policy that was violated
        policy: ArtifactPolicy,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Build a configuration error tied to a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Failure of a single artifact download or decode
///
/// These never abort sibling artifacts; they are collected into the
/// [`ResolveReport`](crate::types::ResolveReport).
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// The download URL could not be parsed
    #[error("artifact {index}: invalid download URL '{url}': {reason}")]
    InvalidUrl {
        /// Position of the artifact in the job's URL list
        index: usize,
        /// The offending URL
        url: String,
        /// Parser error
        reason: String,
    },

    /// The download returned a non-success status
    #[error("artifact {index}: download from {url} failed with HTTP {status}")]
    HttpStatus {
        /// Position of the artifact in the job's URL list
        index: usize,
        /// The download URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// The download failed below HTTP (connect, timeout, body stream)
    #[error("artifact {index}: download from {url} failed: {reason}")]
    Transport {
        /// Position of the artifact in the job's URL list
        index: usize,
        /// The download URL
        url: String,
        /// Client error text
        reason: String,
    },

    /// A local file could not be read or written
    #[error("artifact {index}: I/O error on {path}: {source}")]
    Io {
        /// Position of the artifact in the job's URL list
        index: usize,
        /// The file being accessed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The compressed stream was corrupt or truncated
    #[error("artifact {index}: failed to decompress {path}: {reason}")]
    Decode {
        /// Position of the artifact in the job's URL list
        index: usize,
        /// The compressed file
        path: PathBuf,
        /// Decoder error text
        reason: String,
    },
}

impl ArtifactError {
    /// Position of the failed artifact
    pub fn index(&self) -> usize {
        match self {
            ArtifactError::InvalidUrl { index, .. }
            | ArtifactError::HttpStatus { index, .. }
            | ArtifactError::Transport { index, .. }
            | ArtifactError::Io { index, .. }
            | ArtifactError::Decode { index, .. } => *index,
        }
    }

    /// True for failures in the fetch step
    pub fn is_download_error(&self) -> bool {
        matches!(
            self,
            ArtifactError::InvalidUrl { .. }
                | ArtifactError::HttpStatus { .. }
                | ArtifactError::Transport { .. }
        )
    }

    /// True for failures in the decompression step
    pub fn is_decode_error(&self) -> bool {
        matches!(self, ArtifactError::Decode { .. })
    }
}

/// Convert errors to process exit codes for the command line entry point
pub trait ToExitCode {
    /// Get the process exit code for this error
    fn exit_code(&self) -> u8;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToExitCode for Error {
    fn exit_code(&self) -> u8 {
        match self {
            Error::Config { .. } => 2,
            Error::Submission { .. } => 3,
            Error::Transport { .. } => 4,
            Error::Api { .. } | Error::InvalidResponse { .. } => 5,
            Error::PollTimeout { .. } => 6,
            Error::JobFailed { .. } => 7,
            Error::ArtifactsFailed { .. } => 8,
            Error::HttpClient(_) => 9,
            // Same as a shell reporting SIGINT
            Error::Cancelled { .. } => 130,
            Error::Io(_) | Error::Serialization(_) => 1,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Transport { .. } => "transport_error",
            Error::HttpClient(_) => "http_client_error",
            Error::Submission { .. } => "submission_error",
            Error::Api { .. } => "api_error",
            Error::InvalidResponse { .. } => "invalid_response",
            Error::PollTimeout { .. } => "poll_timeout",
            Error::JobFailed { .. } => "job_failed",
            Error::Cancelled { .. } => "cancelled",
            Error::ArtifactsFailed { .. } => "artifacts_failed",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
        }
    }
}
