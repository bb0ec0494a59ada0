//! End-to-end uploads against a mocked Drive and token endpoint.

mod common;

use common::*;
use gdrive_upload::{App, Error};
use serde_json::json;
use wiremock::matchers::{body_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_session(server: &MockServer, token: &str) {
    Mock::given(method("POST"))
        .and(path("/upload/drive/v3/files"))
        .and(query_param("uploadType", "resumable"))
        .and(header("authorization", format!("Bearer {token}").as_str()))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Location", format!("{}/session/1", server.uri()).as_str()),
        )
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_small_text_file_uploads_in_one_chunk() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(&server, dir.path());
    store_credential(&config, &valid_credential());
    let source = write_source(dir.path(), "hello.txt", b"0123456789");

    Mock::given(method("POST"))
        .and(path("/upload/drive/v3/files"))
        .and(query_param("uploadType", "resumable"))
        .and(header("authorization", "Bearer ya29.valid"))
        .and(header("x-upload-content-type", "text/plain"))
        .and(header("x-upload-content-length", "10"))
        .and(body_json(json!({ "name": "hello.txt", "mimeType": "text/plain" })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Location", format!("{}/session/1", server.uri()).as_str()),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/session/1"))
        .and(header("content-range", "bytes 0-9/10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "file-1" })))
        .expect(1)
        .mount(&server)
        .await;

    let app = App::with_clock(config, clock()).unwrap();
    let report = app.upload(&source, ".", None).await.unwrap();

    assert_eq!(report.bytes_uploaded, 10);
    assert_eq!(report.chunks_sent, 1);
    assert_eq!(report.retries, 0);
    assert_eq!(report.session_uri, format!("{}/session/1", server.uri()));
}

#[tokio::test]
async fn test_destination_prefix_becomes_part_of_name() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(&server, dir.path());
    store_credential(&config, &valid_credential());
    let source = write_source(dir.path(), "photo.png", b"\x89PNG");

    Mock::given(method("POST"))
        .and(path("/upload/drive/v3/files"))
        .and(body_json(json!({ "name": "albums/2024/photo.png", "mimeType": "image/png" })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Location", format!("{}/session/1", server.uri()).as_str()),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/session/1"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    let app = App::with_clock(config, clock()).unwrap();
    app.upload(&source, "albums/2024/", None).await.unwrap();
}

#[tokio::test]
async fn test_expired_credential_is_refreshed_before_upload() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(&server, dir.path());
    store_credential(&config, &expired_credential());
    let source = write_source(dir.path(), "notes.md", b"# notes\n");

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.fresh",
            "expires_in": 3599,
            "scope": "https://www.googleapis.com/auth/drive.file",
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_session(&server, "ya29.fresh").await;
    Mock::given(method("PUT"))
        .and(path("/session/1"))
        .and(header("authorization", "Bearer ya29.fresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let app = App::with_clock(config.clone(), clock()).unwrap();
    app.upload(&source, ".", None).await.unwrap();

    let stored = stored_credential(&config).unwrap();
    assert_eq!(stored.access_token, "ya29.fresh");
    assert_eq!(stored.refresh_token, "1//refresh");
    assert_eq!(stored.expires_at, NOW + 3_599_000);
}

#[tokio::test]
async fn test_interrupted_chunk_resumes_from_server_offset() {
    const CHUNK: u64 = 256 * 1024;
    const TOTAL: u64 = CHUNK + 37_856;

    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(&server, dir.path());
    config.upload.chunk_size = CHUNK;
    store_credential(&config, &valid_credential());
    let content: Vec<u8> = (0..TOTAL).map(|i| (i % 256) as u8).collect();
    let source = write_source(dir.path(), "archive.zip", &content);

    mount_session(&server, "ya29.valid").await;
    Mock::given(method("PUT"))
        .and(header("content-range", format!("bytes 0-{}/{TOTAL}", CHUNK - 1).as_str()))
        .respond_with(
            ResponseTemplate::new(308).insert_header("Range", format!("bytes=0-{}", CHUNK - 1).as_str()),
        )
        .expect(1)
        .mount(&server)
        .await;
    let last = format!("bytes {CHUNK}-{}/{TOTAL}", TOTAL - 1);
    Mock::given(method("PUT"))
        .and(header("content-range", last.as_str()))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(header("content-range", format!("bytes */{TOTAL}").as_str()))
        .respond_with(
            ResponseTemplate::new(308).insert_header("Range", format!("bytes=0-{}", CHUNK - 1).as_str()),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(header("content-range", last.as_str()))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let app = App::with_clock(config, clock()).unwrap();
    let report = app.upload(&source, ".", None).await.unwrap();

    assert_eq!(report.bytes_uploaded, TOTAL);
    assert_eq!(report.chunks_sent, 3);
    assert_eq!(report.retries, 1);
}

#[tokio::test]
async fn test_persistent_failure_exhausts_retry_budget() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(&server, dir.path());
    config.upload.max_retries = 3;
    store_credential(&config, &valid_credential());
    let source = write_source(dir.path(), "hello.txt", b"0123456789");

    mount_session(&server, "ya29.valid").await;
    Mock::given(method("PUT"))
        .and(header("content-range", "bytes 0-9/10"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(header("content-range", "bytes */10"))
        .respond_with(ResponseTemplate::new(308))
        .expect(2)
        .mount(&server)
        .await;

    let app = App::with_clock(config, clock()).unwrap();
    let err = app.upload(&source, ".", None).await.unwrap_err();

    assert!(matches!(err, Error::Upload(_)), "{err:?}");
}

#[tokio::test]
async fn test_missing_source_makes_no_requests() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(&server, dir.path());
    store_credential(&config, &valid_credential());

    let app = App::with_clock(config, clock()).unwrap();
    let err = app
        .upload(&dir.path().join("nope.txt"), ".", None)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::LocalIo { .. }));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_upload_without_credential_is_not_authenticated() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(&server, dir.path());
    let source = write_source(dir.path(), "hello.txt", b"hi");

    let app = App::with_clock(config, clock()).unwrap();
    let err = app.upload(&source, ".", None).await.unwrap_err();

    assert!(matches!(err, Error::NotAuthenticated));
    assert!(err.requires_reauth());
}
