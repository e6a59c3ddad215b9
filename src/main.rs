//! usage-export: request a usage export, wait for it, download the reports.
//!
//! Settings come from flags or the environment (a `.env` file is loaded
//! first). The process exit code identifies the failure class; see
//! [`usage_export::ToExitCode`].

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use usage_export::types::reports_dir;
use usage_export::{ArtifactPolicy, Config, ResolveReport, Settings, ToExitCode, UsageExporter};

// ── CLI ─────────────────────────────────────────────────────────────

/// Export organization usage data as CSV reports.
#[derive(Parser, Debug)]
#[command(name = "usage-export", version, about)]
struct Cli {
    /// Organization to export usage for.
    #[arg(long, env = "ORG_ID")]
    org_id: Option<String>,

    /// API token sent with every request.
    #[arg(long, env = "CIRCLECI_API_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Start of the window (YYYY-MM-DD or RFC 3339).
    #[arg(long, env = "START_DATE")]
    start_date: Option<String>,

    /// End of the window (YYYY-MM-DD or RFC 3339).
    #[arg(long, env = "END_DATE")]
    end_date: Option<String>,

    /// Prefix for artifact file names.
    #[arg(long, env = "FILENAME_PREFIX")]
    filename_prefix: Option<String>,

    /// Comma-separated organizations sharing usage with this one.
    #[arg(long, env = "SHARED_ORG_IDS", value_delimiter = ',')]
    shared_org_ids: Vec<String>,

    /// API root URL.
    #[arg(long, env = "USAGE_EXPORT_API_URL")]
    api_url: Option<String>,

    /// Directory receiving downloads and the reports folder.
    #[arg(long, env = "USAGE_EXPORT_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Status checks before giving up.
    #[arg(long, env = "USAGE_EXPORT_MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    /// Seconds between status checks.
    #[arg(long, env = "USAGE_EXPORT_POLL_INTERVAL_SECS")]
    poll_interval_secs: Option<u64>,

    /// Artifacts downloaded at once.
    #[arg(long, env = "USAGE_EXPORT_CONCURRENCY")]
    concurrency: Option<usize>,

    /// How artifact failures affect the exit status.
    #[arg(long, env = "USAGE_EXPORT_ARTIFACT_POLICY", value_enum)]
    artifact_policy: Option<ArtifactPolicy>,
}

impl From<Cli> for Settings {
    fn from(cli: Cli) -> Self {
        Settings {
            org_id: cli.org_id,
            token: cli.token,
            start_date: cli.start_date,
            end_date: cli.end_date,
            filename_prefix: cli.filename_prefix,
            shared_org_ids: cli
                .shared_org_ids
                .into_iter()
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect(),
            api_url: cli.api_url,
            work_dir: cli.work_dir,
            max_attempts: cli.max_attempts,
            poll_interval_secs: cli.poll_interval_secs,
            concurrency: cli.concurrency,
            artifact_policy: cli.artifact_policy,
        }
    }
}

// ── Main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, code = e.error_code(), "Usage export failed");
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> usage_export::Result<()> {
    let config = Config::from_settings(cli.into())?;
    let policy = config.artifact_policy;
    let work_dir = config.download.work_dir.clone();

    let cancel = CancellationToken::new();
    tokio::spawn(usage_export::cancel_on_signal(cancel.clone()));

    let report = UsageExporter::new(config)?.run(&cancel).await;
    cancel.cancel();
    let report = report?;

    print_summary(&report, &work_dir);
    report.check(policy)
}

fn print_summary(report: &ResolveReport, work_dir: &std::path::Path) {
    println!("Usage export {}", report.job_id);
    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(artifact) => println!(
                "  [{}] ok      {} ({} bytes)",
                outcome.index,
                artifact.decompressed_path.display(),
                artifact.decompressed_bytes
            ),
            Err(e) => println!("  [{}] failed  {e}", outcome.index),
        }
    }
    println!(
        "{} of {} artifacts written to {}",
        report.succeeded(),
        report.total(),
        reports_dir(work_dir).display()
    );
}
