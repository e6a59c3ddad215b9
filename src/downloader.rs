//! Artifact download and decompression
//!
//! Each download URL of a completed job is handled independently: it is
//! streamed to `<work_dir>/<prefix>_<index>.csv.gz`, then gunzipped in a
//! single pass to `<work_dir>/reports/<prefix>_<index>.csv`. Failures are
//! recorded per artifact and never stop the siblings.

use flate2::read::MultiGzDecoder;
use futures::stream::{self, StreamExt};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::api::UsageApi;
use crate::config::DownloadConfig;
use crate::error::{ArtifactError, Result};
use crate::types::{Artifact, ArtifactOutcome, ArtifactPaths, JobId, reports_dir};

const DECODE_BUFFER_SIZE: usize = 64 * 1024;

/// Downloads and decodes the artifacts of a completed job
#[derive(Clone)]
pub struct ArtifactDownloader {
    api: Arc<dyn UsageApi>,
    config: DownloadConfig,
}

impl ArtifactDownloader {
    /// Create a downloader writing under `config.work_dir`
    pub fn new(api: Arc<dyn UsageApi>, config: DownloadConfig) -> Self {
        Self { api, config }
    }

    /// Download every URL with bounded concurrency
    ///
    /// Only failing to create the output directories is an error; everything
    /// else is reported per artifact in the returned outcomes (unordered).
    pub async fn download_all(
        &self,
        job_id: &JobId,
        urls: &[String],
    ) -> Result<Vec<ArtifactOutcome>> {
        tokio::fs::create_dir_all(reports_dir(&self.config.work_dir)).await?;

        tracing::info!(
            job_id = %job_id,
            artifacts = urls.len(),
            concurrency = self.config.max_concurrent,
            "Downloading export artifacts"
        );

        let outcomes: Vec<ArtifactOutcome> = stream::iter(urls.iter().enumerate())
            .map(|(index, url)| async move {
                let result = self.fetch_one(index, url).await;
                match &result {
                    Ok(artifact) => tracing::info!(
                        job_id = %job_id,
                        index,
                        bytes = artifact.decompressed_bytes,
                        path = %artifact.decompressed_path.display(),
                        "Artifact downloaded and extracted"
                    ),
                    Err(e) => tracing::warn!(job_id = %job_id, index, error = %e, "Artifact failed"),
                }
                ArtifactOutcome {
                    index,
                    url: url.clone(),
                    result,
                }
            })
            .buffer_unordered(self.config.max_concurrent.max(1))
            .collect()
            .await;

        Ok(outcomes)
    }

    async fn fetch_one(
        &self,
        index: usize,
        url: &str,
    ) -> std::result::Result<Artifact, ArtifactError> {
        let paths = ArtifactPaths::new(&self.config.work_dir, &self.config.filename_prefix, index);

        let compressed_bytes = match self
            .api
            .download_artifact(index, url, &paths.compressed)
            .await
        {
            Ok(n) => n,
            Err(e) => {
                // Leave nothing from an earlier run that could pass for this one
                remove_stale(&paths).await;
                return Err(e);
            }
        };

        let decompressed_bytes =
            match decompress_in_background(index, &paths.compressed, &paths.decompressed).await {
                Ok(n) => n,
                Err(e) => {
                    remove_stale(&paths).await;
                    return Err(e);
                }
            };

        Ok(Artifact {
            index,
            source_url: url.to_string(),
            compressed_path: paths.compressed,
            decompressed_path: paths.decompressed,
            compressed_bytes,
            decompressed_bytes,
        })
    }
}

async fn decompress_in_background(
    index: usize,
    src: &Path,
    dest: &Path,
) -> std::result::Result<u64, ArtifactError> {
    let (src, dest): (PathBuf, PathBuf) = (src.to_path_buf(), dest.to_path_buf());
    let path = src.clone();
    tokio::task::spawn_blocking(move || decompress_gzip(index, &src, &dest))
        .await
        .map_err(|e| ArtifactError::Decode {
            index,
            path,
            reason: format!("decoder task failed: {e}"),
        })?
}

/// Gunzip `src` into `dest` in a single streaming pass
///
/// Concatenated gzip members are decoded back to back. On a corrupt or
/// truncated stream the partially written `dest` is removed.
pub fn decompress_gzip(
    index: usize,
    src: &Path,
    dest: &Path,
) -> std::result::Result<u64, ArtifactError> {
    let io_err = |path: &Path, source: std::io::Error| ArtifactError::Io {
        index,
        path: path.to_path_buf(),
        source,
    };

    let input = File::open(src).map_err(|e| io_err(src, e))?;
    let mut decoder = MultiGzDecoder::new(BufReader::new(input));
    let mut output = BufWriter::new(File::create(dest).map_err(|e| io_err(dest, e))?);

    let mut buf = vec![0u8; DECODE_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = match decoder.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                drop(output);
                if let Err(remove) = std::fs::remove_file(dest) {
                    tracing::warn!(
                        path = %dest.display(),
                        error = %remove,
                        "Failed to remove partial decode output"
                    );
                }
                return Err(ArtifactError::Decode {
                    index,
                    path: src.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        };
        output.write_all(&buf[..n]).map_err(|e| io_err(dest, e))?;
        total += n as u64;
    }
    output.flush().map_err(|e| io_err(dest, e))?;

    Ok(total)
}

async fn remove_stale(paths: &ArtifactPaths) {
    for path in [&paths.compressed, &paths.decompressed] {
        match tokio::fs::remove_file(path).await {
            Ok(()) => tracing::debug!(path = %path.display(), "Removed stale artifact file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to remove stale artifact file"
            ),
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{FakeApi, FakeArtifact, gzip};
    use tempfile::TempDir;

    const CSV: &[u8] = b"org_id,project,credits\norg-1,api,120\norg-1,web,42\n";

    fn downloader(api: FakeApi, dir: &TempDir, max_concurrent: usize) -> ArtifactDownloader {
        ArtifactDownloader::new(
            Arc::new(api),
            DownloadConfig {
                work_dir: dir.path().to_path_buf(),
                filename_prefix: "usage_report".into(),
                max_concurrent,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_decompress_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.csv.gz");
        let dest = dir.path().join("a.csv");
        std::fs::write(&src, gzip(CSV)).unwrap();

        let n = decompress_gzip(0, &src, &dest).unwrap();

        assert_eq!(n, CSV.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), CSV);
    }

    #[test]
    fn test_decompress_concatenated_members() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.csv.gz");
        let dest = dir.path().join("a.csv");
        let mut data = gzip(b"header\n");
        data.extend(gzip(b"row\n"));
        std::fs::write(&src, data).unwrap();

        decompress_gzip(0, &src, &dest).unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"header\nrow\n");
    }

    #[test]
    fn test_decompress_truncated_stream_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.csv.gz");
        let dest = dir.path().join("a.csv");
        let data = gzip(CSV);
        std::fs::write(&src, &data[..data.len() / 2]).unwrap();

        let err = decompress_gzip(3, &src, &dest).unwrap_err();

        assert!(err.is_decode_error(), "got {err:?}");
        assert_eq!(err.index(), 3);
        assert!(!dest.exists(), "partial output should be removed");
    }

    #[test]
    fn test_decompress_missing_source_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = decompress_gzip(0, &dir.path().join("nope.gz"), &dir.path().join("out"))
            .unwrap_err();
        assert!(matches!(err, ArtifactError::Io { .. }));
    }

    #[tokio::test]
    async fn test_download_all_writes_deterministic_paths() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::new("job")
            .with_artifact("https://files/0", FakeArtifact::Body(gzip(b"zero\n")))
            .with_artifact("https://files/1", FakeArtifact::Body(gzip(b"one\n")));
        let urls = vec!["https://files/0".to_string(), "https://files/1".to_string()];

        let outcomes = downloader(api, &dir, 2)
            .download_all(&JobId::from("job"), &urls)
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.is_success()));
        assert_eq!(
            std::fs::read(dir.path().join("reports/usage_report_0.csv")).unwrap(),
            b"zero\n"
        );
        assert_eq!(
            std::fs::read(dir.path().join("reports/usage_report_1.csv")).unwrap(),
            b"one\n"
        );
        assert!(dir.path().join("usage_report_1.csv.gz").exists());
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::new("job")
            .with_artifact("https://files/0", FakeArtifact::Status(500))
            .with_artifact("https://files/1", FakeArtifact::Body(b"not gzip".to_vec()))
            .with_artifact("https://files/2", FakeArtifact::Body(gzip(CSV)));
        let urls: Vec<String> = (0..3).map(|i| format!("https://files/{i}")).collect();

        let mut outcomes = downloader(api, &dir, 1)
            .download_all(&JobId::from("job"), &urls)
            .await
            .unwrap();
        outcomes.sort_by_key(|o| o.index);

        assert!(outcomes[0].result.as_ref().unwrap_err().is_download_error());
        assert!(outcomes[1].result.as_ref().unwrap_err().is_decode_error());
        let artifact = outcomes[2].result.as_ref().unwrap();
        assert_eq!(std::fs::read(&artifact.decompressed_path).unwrap(), CSV);

        // Failed artifacts leave no files behind
        assert!(!dir.path().join("usage_report_1.csv.gz").exists());
        assert!(!dir.path().join("reports/usage_report_1.csv").exists());
    }

    #[tokio::test]
    async fn test_failed_rerun_removes_stale_output() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("reports/usage_report_0.csv");
        std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
        std::fs::write(&stale, b"old data").unwrap();

        let api = FakeApi::new("job").with_artifact("https://files/0", FakeArtifact::Status(404));
        let outcomes = downloader(api, &dir, 1)
            .download_all(&JobId::from("job"), &["https://files/0".to_string()])
            .await
            .unwrap();

        assert!(!outcomes[0].is_success());
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn test_empty_url_list_creates_reports_dir() {
        let dir = tempfile::tempdir().unwrap();
        let outcomes = downloader(FakeApi::new("job"), &dir, 4)
            .download_all(&JobId::from("job"), &[])
            .await
            .unwrap();

        assert!(outcomes.is_empty());
        assert!(dir.path().join("reports").is_dir());
    }
}
