//! Common test utilities for usage-export integration tests

#![allow(dead_code)]

use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::json;
use std::io::Write;
use std::time::Duration;
use tempfile::TempDir;
use usage_export::{Config, Settings};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const ORG_ID: &str = "org-1";
pub const TOKEN: &str = "test-token";
pub const JOB_ID: &str = "job-42";

/// Path of the job creation endpoint under the mock server
pub fn create_path() -> String {
    format!("/api/v2/organizations/{ORG_ID}/usage_export_job")
}

/// Path of the job status endpoint under the mock server
pub fn status_path() -> String {
    format!("/api/v2/organizations/{ORG_ID}/usage_export_job/{JOB_ID}")
}

/// Build a config pointing at `server` and writing into `dir`
///
/// The poll interval is shortened to a few milliseconds so real-time tests
/// stay fast.
pub fn test_config(server: &MockServer, dir: &TempDir, max_attempts: u32) -> Config {
    let mut config = Config::from_settings(Settings {
        org_id: Some(ORG_ID.to_string()),
        token: Some(TOKEN.to_string()),
        start_date: Some("2024-01-01".to_string()),
        end_date: Some("2024-02-01".to_string()),
        api_url: Some(format!("{}/api/v2", server.uri())),
        work_dir: Some(dir.path().to_path_buf()),
        max_attempts: Some(max_attempts),
        ..Default::default()
    })
    .expect("test settings are valid");
    config.poll.interval = Duration::from_millis(10);
    config
}

/// Gzip `data` into a single member
pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("write to Vec");
    encoder.finish().expect("finish gzip")
}

/// Mount a 201 response carrying the job id for the creation endpoint
pub async fn mount_create_job(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(create_path()))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!({ "usage_export_job_id": JOB_ID })),
        )
        .expect(1)
        .mount(server)
        .await;
}

/// Mount `processing` for the next `times` status checks
pub async fn mount_processing(server: &MockServer, times: u64) {
    Mock::given(method("GET"))
        .and(path(status_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "state": "processing" })))
        .up_to_n_times(times)
        .mount(server)
        .await;
}

/// Mount `completed` with download URLs for `files` served by the same server
pub async fn mount_completed(server: &MockServer, files: &[&str]) {
    let urls: Vec<String> = files
        .iter()
        .map(|f| format!("{}/files/{f}", server.uri()))
        .collect();
    Mock::given(method("GET"))
        .and(path(status_path()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "state": "completed", "download_urls": urls })),
        )
        .mount(server)
        .await;
}

/// Serve `body` at `/files/<name>`
pub async fn mount_file(server: &MockServer, name: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(format!("/files/{name}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

/// Answer `/files/<name>` with `status`
pub async fn mount_file_status(server: &MockServer, name: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(format!("/files/{name}")))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Number of received requests for `path`
pub async fn request_count(server: &MockServer, request_path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == request_path)
        .count()
}
