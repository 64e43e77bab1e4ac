//! AWS S3 snapshot backend.
//!
//! The snapshot is the single object `s3://{bucket}/{key}`. Credentials, and
//! the region unless configured, come from the default AWS provider chain
//! (environment, shared profile, web identity, instance metadata). A missing
//! object (`NoSuchKey`, or a bare 404 from a compatible store) means no
//! snapshot has been written yet.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::SnapshotBackend;
use crate::error::{StateError, StateResult};
use crate::file::DEFAULT_SNAPSHOT_FILENAME;

/// Settings for [`S3Backend`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3BackendConfig {
    /// Falls back to the provider chain (`AWS_REGION`, profile) when unset.
    #[serde(default)]
    pub region: Option<String>,
    #[serde(alias = "bucketname")]
    pub bucket: String,
    #[serde(default = "default_key", alias = "filename")]
    pub key: String,
    /// Endpoint of an S3-compatible store; forces path-style addressing.
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_key() -> String {
    DEFAULT_SNAPSHOT_FILENAME.to_string()
}

impl S3BackendConfig {
    pub fn new(bucket: &str) -> Self {
        Self {
            region: None,
            bucket: bucket.to_string(),
            key: default_key(),
            endpoint: None,
        }
    }

    pub fn with_key(mut self, key: &str) -> Self {
        self.key = key.to_string();
        self
    }

    pub fn with_region(mut self, region: &str) -> Self {
        self.region = Some(region.to_string());
        self
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = Some(endpoint.to_string());
        self
    }

    fn object_uri(&self) -> String {
        format!(
            "s3://{}/{}",
            self.bucket,
            self.key.trim_start_matches('/')
        )
    }
}

/// Snapshot stored as a single S3 object.
pub struct S3Backend {
    config: S3BackendConfig,
    client: Client,
}

impl S3Backend {
    /// Resolve credentials and region from the environment and build a client.
    pub async fn new(config: S3BackendConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint.as_str()).force_path_style(true);
        }
        Self::with_client(config, Client::from_conf(builder.build()))
    }

    /// Use an already configured client.
    pub fn with_client(config: S3BackendConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn failed<E>(&self, operation: &'static str, err: SdkError<E>) -> StateError
    where
        E: std::error::Error + 'static,
    {
        let detail = DisplayErrorContext(&err).to_string();
        if err.as_service_error().is_some() {
            StateError::Backend {
                backend: self.describe(),
                operation,
                detail,
            }
        } else {
            StateError::Http(detail)
        }
    }
}

fn is_missing(err: &SdkError<GetObjectError>) -> bool {
    if err
        .as_service_error()
        .is_some_and(|e| e.is_no_such_key())
    {
        return true;
    }
    err.raw_response()
        .is_some_and(|r| r.status().as_u16() == 404)
}

#[async_trait]
impl SnapshotBackend for S3Backend {
    fn describe(&self) -> String {
        self.config.object_uri()
    }

    async fn read(&self) -> StateResult<Option<Vec<u8>>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(&self.config.key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let body = output.body.collect().await.map_err(|e| StateError::Backend {
                    backend: self.describe(),
                    operation: "read",
                    detail: e.to_string(),
                })?;
                Ok(Some(body.into_bytes().to_vec()))
            }
            Err(err) if is_missing(&err) => {
                debug!(object = %self.config.object_uri(), "no snapshot object yet");
                Ok(None)
            }
            Err(err) => Err(self.failed("read", err)),
        }
    }

    async fn write(&self, data: &[u8]) -> StateResult<()> {
        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(&self.config.key)
            .content_type("application/json")
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|e| self.failed("write", e))?;
        Ok(())
    }
}
