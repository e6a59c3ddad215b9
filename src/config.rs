//! Configuration types for usage-export
//!
//! Raw inputs arrive as [`Settings`] (from the environment, a `.env` file or
//! command line flags) and are validated once into a [`Config`]. Protocol
//! code only ever sees the validated form.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use url::Url;

use crate::error::{Error, Result};
use crate::types::{Credentials, ExportRequest};

/// Default API root
pub const DEFAULT_API_URL: &str = "https://circleci.com/api/v2";

/// Default file name prefix for downloaded artifacts
pub const DEFAULT_FILENAME_PREFIX: &str = "usage_report";

/// Raw, unvalidated configuration inputs
///
/// Every field is optional so that all missing required keys can be
/// reported together.
#[derive(Clone, Debug, Default)]
pub struct Settings {
    /// `ORG_ID`
    pub org_id: Option<String>,
    /// `CIRCLECI_API_TOKEN`
    pub token: Option<String>,
    /// `START_DATE` (`YYYY-MM-DD` or RFC 3339)
    pub start_date: Option<String>,
    /// `END_DATE` (`YYYY-MM-DD` or RFC 3339)
    pub end_date: Option<String>,
    /// `FILENAME_PREFIX`
    pub filename_prefix: Option<String>,
    /// `SHARED_ORG_IDS`
    pub shared_org_ids: Vec<String>,
    /// `USAGE_EXPORT_API_URL`
    pub api_url: Option<String>,
    /// `USAGE_EXPORT_WORK_DIR`
    pub work_dir: Option<PathBuf>,
    /// `USAGE_EXPORT_MAX_ATTEMPTS`
    pub max_attempts: Option<u32>,
    /// `USAGE_EXPORT_POLL_INTERVAL_SECS`
    pub poll_interval_secs: Option<u64>,
    /// `USAGE_EXPORT_CONCURRENCY`
    pub concurrency: Option<usize>,
    /// `USAGE_EXPORT_ARTIFACT_POLICY`
    pub artifact_policy: Option<ArtifactPolicy>,
}

/// Validated configuration for one export run
#[derive(Clone, Debug)]
pub struct Config {
    /// Organization whose usage is exported
    pub organization_id: String,
    /// API token
    pub credentials: Credentials,
    /// Start of the export window
    pub start: DateTime<Utc>,
    /// End of the export window
    pub end: DateTime<Utc>,
    /// Organizations sharing usage with this one
    pub shared_org_ids: Vec<String>,
    /// Service endpoint settings
    pub api: ApiConfig,
    /// Status polling policy
    pub poll: PollConfig,
    /// Artifact download settings
    pub download: DownloadConfig,
    /// When partial artifact failure fails the run
    pub artifact_policy: ArtifactPolicy,
}

/// Service endpoint settings
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// API root, e.g. `https://circleci.com/api/v2`
    pub base_url: Url,
    /// Per-request timeout for submission and status checks
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    // DEFAULT_API_URL is a valid absolute URL
    #[allow(clippy::expect_used)]
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_API_URL).expect("default API URL is valid"),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Fixed-interval polling policy
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Maximum number of status requests (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause between status requests (default: 60 seconds)
    #[serde(default = "default_poll_interval", with = "seconds")]
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval: default_poll_interval(),
        }
    }
}

/// Artifact download settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Working directory (default: the system temp dir)
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// File name prefix (default: "usage_report")
    #[serde(default = "default_filename_prefix")]
    pub filename_prefix: String,

    /// Maximum concurrent artifact downloads (default: 4)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Per-artifact download timeout (default: 300 seconds)
    #[serde(default = "default_download_timeout", with = "seconds")]
    pub timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            filename_prefix: default_filename_prefix(),
            max_concurrent: default_max_concurrent(),
            timeout: default_download_timeout(),
        }
    }
}

/// How artifact-level failures affect the overall result
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactPolicy {
    /// Fail only when artifacts were expected and none succeeded (default)
    #[default]
    RequireAny,
    /// Fail when any artifact failed
    RequireAll,
    /// Never fail on artifact errors once the job completed
    Tolerate,
}

impl ArtifactPolicy {
    /// Whether `succeeded` out of `total` artifacts is acceptable
    pub fn is_satisfied(&self, succeeded: usize, total: usize) -> bool {
        match self {
            ArtifactPolicy::RequireAny => total == 0 || succeeded > 0,
            ArtifactPolicy::RequireAll => succeeded == total,
            ArtifactPolicy::Tolerate => true,
        }
    }
}

impl std::fmt::Display for ArtifactPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ArtifactPolicy::RequireAny => "require-any",
            ArtifactPolicy::RequireAll => "require-all",
            ArtifactPolicy::Tolerate => "tolerate",
        })
    }
}

impl Config {
    /// Validate raw settings
    ///
    /// Fails with [`Error::Config`] naming every missing required key, or the
    /// first invalid value.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let required = [
            ("ORG_ID", &settings.org_id),
            ("CIRCLECI_API_TOKEN", &settings.token),
            ("START_DATE", &settings.start_date),
            ("END_DATE", &settings.end_date),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.as_deref().is_none_or(|v| v.trim().is_empty()))
            .map(|(key, _)| *key)
            .collect();
        if !missing.is_empty() {
            return Err(Error::Config {
                message: format!("missing required settings: {}", missing.join(", ")),
                key: Some(missing.join(", ")),
            });
        }

        let Settings {
            org_id,
            token,
            start_date,
            end_date,
            filename_prefix,
            shared_org_ids,
            api_url,
            work_dir,
            max_attempts,
            poll_interval_secs,
            concurrency,
            artifact_policy,
        } = settings;

        let start = parse_timestamp("START_DATE", start_date.as_deref().unwrap_or_default())?;
        let end = parse_timestamp("END_DATE", end_date.as_deref().unwrap_or_default())?;

        let mut api = ApiConfig::default();
        if let Some(raw) = api_url {
            api.base_url = parse_api_url(&raw)?;
        }

        let mut poll = PollConfig::default();
        if let Some(attempts) = max_attempts {
            poll.max_attempts = attempts;
        }
        if let Some(secs) = poll_interval_secs {
            poll.interval = Duration::from_secs(secs);
        }

        let mut download = DownloadConfig::default();
        if let Some(dir) = work_dir {
            download.work_dir = dir;
        }
        if let Some(prefix) = filename_prefix {
            download.filename_prefix = prefix;
        }
        if let Some(n) = concurrency {
            download.max_concurrent = n;
        }

        let config = Self {
            organization_id: org_id.unwrap_or_default().trim().to_string(),
            credentials: Credentials::new(token.unwrap_or_default().trim()),
            start,
            end,
            shared_org_ids: shared_org_ids
                .into_iter()
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect(),
            api,
            poll,
            download,
            artifact_policy: artifact_policy.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants
    pub fn validate(&self) -> Result<()> {
        self.export_request().validate()?;
        if self.credentials.is_empty() {
            return Err(Error::config("CIRCLECI_API_TOKEN", "API token is required"));
        }
        if self.poll.max_attempts == 0 {
            return Err(Error::config(
                "USAGE_EXPORT_MAX_ATTEMPTS",
                "at least one status check is required",
            ));
        }
        if self.download.max_concurrent == 0 {
            return Err(Error::config(
                "USAGE_EXPORT_CONCURRENCY",
                "download concurrency must be at least 1",
            ));
        }
        validate_prefix(&self.download.filename_prefix)
    }

    /// The export request described by this configuration
    pub fn export_request(&self) -> ExportRequest {
        ExportRequest {
            organization_id: self.organization_id.clone(),
            start: self.start,
            end: self.end,
            shared_org_ids: self.shared_org_ids.clone(),
        }
    }
}

/// Parse a window boundary
///
/// A bare date is pinned to `00:00:01Z` of that day, matching what the
/// service expects.
pub fn parse_timestamp(key: &str, value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 1)
            .map(|dt| dt.and_utc())
            .ok_or_else(|| Error::config(key, format!("invalid date '{value}'")));
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            Error::config(
                key,
                format!("expected YYYY-MM-DD or an RFC 3339 timestamp, got '{value}': {e}"),
            )
        })
}

fn parse_api_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| Error::config("USAGE_EXPORT_API_URL", format!("invalid URL '{raw}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(Error::config(
            "USAGE_EXPORT_API_URL",
            format!("'{raw}' is not an http(s) base URL"),
        ));
    }
    Ok(url)
}

fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        return Err(Error::config("FILENAME_PREFIX", "file name prefix must not be empty"));
    }
    if prefix.contains(['/', '\\']) || prefix == "." || prefix == ".." {
        return Err(Error::config(
            "FILENAME_PREFIX",
            format!("file name prefix '{prefix}' must not contain path separators"),
        ));
    }
    Ok(())
}

fn default_max_attempts() -> u32 {
    5
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_filename_prefix() -> String {
    DEFAULT_FILENAME_PREFIX.to_string()
}

fn default_max_concurrent() -> usize {
    4
}

fn default_download_timeout() -> Duration {
    Duration::from_secs(300)
}

/// Durations as seconds: whole values stay integers, sub-second values
/// round-trip as fractions so millisecond poll intervals survive.
mod seconds {
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        if value.subsec_nanos() == 0 {
            serializer.serialize_u64(value.as_secs())
        } else {
            serializer.serialize_f64(value.as_secs_f64())
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|e| D::Error::custom(format!("invalid duration {secs}: {e}")))
    }
}
