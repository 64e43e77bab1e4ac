//! Contract tests for SnapshotBackend implementations.
//!
//! Every backend must read back what it wrote and report a missing snapshot
//! as `None` rather than an error.

use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use modbump_state::fakes::MemoryBackend;
use modbump_state::{FileBackend, S3Backend, S3BackendConfig, SnapshotBackend, StateError};
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NO_SUCH_KEY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>NoSuchKey</Code><Message>The specified key does not exist.</Message><Key>modbump-state.json</Key><RequestId>4442587FB7D0A2F9</RequestId></Error>"#;

const ACCESS_DENIED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>AccessDenied</Code><Message>Access Denied</Message><RequestId>4442587FB7D0A2FA</RequestId></Error>"#;

/// S3 backend pointed at a mock server with static credentials and no retries.
fn s3_backend(server: &MockServer, config: S3BackendConfig) -> S3Backend {
    let conf = aws_sdk_s3::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new("eu-west-1"))
        .endpoint_url(server.uri())
        .force_path_style(true)
        .credentials_provider(Credentials::new("AKIDEXAMPLE", "secret", None, None, "static"))
        .retry_config(RetryConfig::disabled())
        .build();
    S3Backend::with_client(config, aws_sdk_s3::Client::from_conf(conf))
}

async fn assert_round_trip(backend: &dyn SnapshotBackend) {
    assert!(backend.read().await.unwrap().is_none());
    backend.write(br#"[{"name":"svc"}]"#).await.unwrap();
    let got = backend.read().await.unwrap().expect("snapshot written");
    assert_eq!(got, br#"[{"name":"svc"}]"#);
}

// ===========================================================================
// Local backends
// ===========================================================================

#[tokio::test]
async fn memory_backend_round_trip() {
    let backend = MemoryBackend::new();
    assert_round_trip(&backend).await;
    assert_eq!(backend.write_count(), 1);
}

#[tokio::test]
async fn file_backend_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FileBackend::new(dir.path().join("state.json"));
    assert_round_trip(&backend).await;
}

#[tokio::test]
async fn failing_memory_backend_keeps_previous_snapshot() {
    let backend = MemoryBackend::failing_writes();
    let err = backend.write(b"[]").await.unwrap_err();
    assert!(matches!(err, StateError::Backend { .. }));
    assert!(backend.read().await.unwrap().is_none());
}

// ===========================================================================
// S3
// ===========================================================================

#[tokio::test]
async fn s3_no_such_key_reads_as_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fleet/modbump-state.json"))
        .respond_with(
            ResponseTemplate::new(404)
                .insert_header("content-type", "application/xml")
                .set_body_string(NO_SUCH_KEY),
        )
        .expect(1)
        .mount(&server)
        .await;

    let backend = s3_backend(&server, S3BackendConfig::new("fleet"));
    assert!(backend.read().await.unwrap().is_none());
}

#[tokio::test]
async fn s3_reads_existing_object_with_signed_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fleet/state/modbump.json"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"[]".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let config = S3BackendConfig::new("fleet").with_key("state/modbump.json");
    let backend = s3_backend(&server, config);
    assert_eq!(backend.read().await.unwrap().as_deref(), Some(&b"[]"[..]));
}

#[tokio::test]
async fn s3_write_puts_object() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/fleet/modbump-state.json"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let backend = s3_backend(&server, S3BackendConfig::new("fleet"));
    backend.write(b"[]").await.unwrap();
}

#[tokio::test]
async fn s3_access_denied_is_backend_error() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("content-type", "application/xml")
                .set_body_string(ACCESS_DENIED),
        )
        .mount(&server)
        .await;

    let backend = s3_backend(&server, S3BackendConfig::new("fleet"));
    let err = backend.write(b"[]").await.unwrap_err();
    match err {
        StateError::Backend {
            backend, operation, detail,
        } => {
            assert_eq!(backend, "s3://fleet/modbump-state.json");
            assert_eq!(operation, "write");
            assert!(detail.contains("AccessDenied"));
        }
        other => panic!("expected backend error, got {other:?}"),
    }
}

#[tokio::test]
async fn s3_read_server_error_is_not_treated_as_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let backend = s3_backend(&server, S3BackendConfig::new("fleet"));
    assert!(backend.read().await.is_err());
}
