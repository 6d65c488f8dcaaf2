//! Integration tests for the Agave client against a mock API server.

use eod_client::{AgaveClient, Error};
use eod_engine::{JobSubmission, RemoteOperationError, RemotePlatform};
use serde_json::json;
use wiremock::matchers::{body_json, body_partial_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn static_client(server: &MockServer) -> AgaveClient {
    AgaveClient::builder()
        .base_url(server.uri())
        .storage_system("sys")
        .access_token("static")
        .build()
        .unwrap()
}

fn refreshing_client(server: &MockServer) -> AgaveClient {
    AgaveClient::builder()
        .base_url(server.uri())
        .storage_system("sys")
        .refresh_credentials("key", "secret", "rt1")
        .build()
        .unwrap()
}

fn submission() -> JobSubmission {
    JobSubmission {
        name: "eod-wf-align".to_string(),
        app_id: "bwa-0.7.10".to_string(),
        archive: true,
        archive_system: "sys".to_string(),
        archive_path: "jdoe/wf/align/outputs".to_string(),
        inputs: Default::default(),
        parameters: Default::default(),
    }
}

fn job_accepted(server: &MockServer) -> ResponseTemplate {
    ResponseTemplate::new(201).set_body_json(json!({
        "status": "success",
        "message": null,
        "result": {
            "id": "job-0001",
            "status": "PENDING",
            "_links": {"history": {"href": format!("{}/jobs/v2/job-0001/history", server.uri())}}
        }
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tokens
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_refresh_token_exchanged_once() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        // base64("key:secret")
        .and(header("authorization", "Basic a2V5OnNlY3JldA=="))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rt1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh",
            "refresh_token": "rt2",
            "expires_in": 14400,
            "token_type": "bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/jobs/v2/"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(job_accepted(&server))
        .expect(2)
        .mount(&server)
        .await;

    let client = refreshing_client(&server);
    client.submit(&submission()).await.unwrap();
    client.submit(&submission()).await.unwrap();
}

#[tokio::test]
async fn test_rejected_refresh_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
        .mount(&server)
        .await;

    let client = refreshing_client(&server);
    let err = client.access_token().await.unwrap_err();
    assert!(err.is_auth_error());

    let err = client.current_access_token().await.unwrap_err();
    assert!(matches!(err, RemoteOperationError::Auth(_)));
}

#[tokio::test]
async fn test_rejected_access_token_is_refreshed() {
    let server = MockServer::start().await;

    let tokens = |access: &str, refresh: &str| {
        ResponseTemplate::new(200).set_body_json(json!({
            "access_token": access,
            "refresh_token": refresh,
            "expires_in": 14400
        }))
    };
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("refresh_token=rt1"))
        .respond_with(tokens("revoked", "rt2"))
        .expect(1)
        .mount(&server)
        .await;
    // The rotated refresh token is used after the 401, not the initial one.
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("refresh_token=rt2"))
        .respond_with(tokens("fresh", "rt3"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/jobs/v2/"))
        .and(header("authorization", "Bearer revoked"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token revoked"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/jobs/v2/"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(job_accepted(&server))
        .expect(1)
        .mount(&server)
        .await;

    let client = refreshing_client(&server);
    let err = client.submit(&submission()).await.unwrap_err();
    assert!(err.is_auth_error());
    let handle = client.submit(&submission()).await.unwrap();
    assert_eq!(handle.id, "job-0001");
}

// ─────────────────────────────────────────────────────────────────────────────
// Jobs
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_submit_job_returns_history_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/jobs/v2/"))
        .and(header("authorization", "Bearer static"))
        .and(body_partial_json(json!({
            "name": "eod-wf-align",
            "appId": "bwa-0.7.10",
            "archive": true,
            "archiveSystem": "sys",
            "archivePath": "jdoe/wf/align/outputs"
        })))
        .respond_with(job_accepted(&server))
        .mount(&server)
        .await;

    let handle = static_client(&server).submit_job(&submission()).await.unwrap();
    assert_eq!(handle.id, "job-0001");
    assert_eq!(
        handle.status_url,
        format!("{}/jobs/v2/job-0001/history", server.uri())
    );
}

#[tokio::test]
async fn test_api_error_message_from_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/jobs/v2/"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "status": "error",
            "message": "No app found matching bwa-0.7.10",
            "result": null
        })))
        .mount(&server)
        .await;

    let err = static_client(&server).submit(&submission()).await.unwrap_err();
    match err {
        Error::Api {
            status, message, ..
        } => {
            assert_eq!(status, 400);
            assert_eq!(message, "No app found matching bwa-0.7.10");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_status_history() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jobs/v2/job-0001/history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "result": [
                {"status": "PENDING", "created": "2015-09-16T10:39:01.000-05:00",
                 "description": "Job accepted"},
                {"status": "ARCHIVING_FINISHED", "created": "2015-09-16T10:45:12.000-05:00"}
            ]
        })))
        .mount(&server)
        .await;

    let url = format!("{}/jobs/v2/job-0001/history", server.uri());
    let events = static_client(&server).status_history(&url).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].description.as_deref(), Some("Job accepted"));
    assert_eq!(
        eod_engine::collapse_history(&events),
        eod_engine::JobStatus::Complete
    );
}

#[tokio::test]
async fn test_missing_history_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jobs/v2/job-0001/history"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = static_client(&server)
        .status_history("jobs/v2/job-0001/history")
        .await
        .unwrap_err();
    assert!(err.is_transient(), "{err:?}");
}

// ─────────────────────────────────────────────────────────────────────────────
// Files
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_upload_is_multipart() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/files/v2/media/system/sys/jdoe/wf/align/inputs/query/0"))
        .and(body_string_contains("name=\"fileToUpload\""))
        .and(body_string_contains("ACGTACGT"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "status": "success",
            "result": {
                "path": "jdoe/wf/align/inputs/query/0/reads.fq",
                "_links": {"history": {"href": format!("{}/files/v2/history/system/sys/x", server.uri())}}
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("reads.fq");
    std::fs::write(&local, "ACGTACGT\n").unwrap();

    let handle = static_client(&server)
        .upload(&local, "/jdoe/wf/align/inputs/query/0")
        .await
        .unwrap();
    assert_eq!(
        handle.status_url,
        format!("{}/files/v2/history/system/sys/x", server.uri())
    );
}

#[tokio::test]
async fn test_upload_missing_file() {
    let server = MockServer::start().await;
    let err = static_client(&server)
        .import(std::path::Path::new("/nonexistent/reads.fq"), "jdoe")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Io { .. }));
}

#[tokio::test]
async fn test_download_agave_uri() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/v2/media/system/data.example.org/jdoe/wf/align/outputs/out.bam"))
        .and(header("authorization", "Bearer static"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"BAM\x01".to_vec()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("out.bam");
    static_client(&server)
        .download("agave://data.example.org//jdoe/wf/align/outputs/out.bam", &local)
        .await
        .unwrap();
    assert_eq!(std::fs::read(&local).unwrap(), b"BAM\x01");
}

#[tokio::test]
async fn test_download_plain_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/public/reads.fq"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ACGT\n"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("reads.fq");
    static_client(&server)
        .fetch(&format!("{}/public/reads.fq", server.uri()), &local)
        .await
        .unwrap();
    assert_eq!(std::fs::read_to_string(&local).unwrap(), "ACGT\n");
}

#[tokio::test]
async fn test_download_failure_leaves_no_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("out.bam");
    let err = static_client(&server)
        .download("agave://sys//jdoe/out.bam", &local)
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteOperationError::Status { status: 500, .. }));
    assert!(!local.exists());
}

#[tokio::test]
async fn test_make_dir() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/files/v2/media/system/sys/"))
        .and(body_json(json!({"action": "mkdir", "path": "jdoe/wf/align/inputs/query/0"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"status": "success"})))
        .expect(1)
        .mount(&server)
        .await;

    static_client(&server)
        .make_dir("/jdoe/wf/align/inputs/query/0")
        .await
        .unwrap();
}
