use super::{Connector, ObjectBackend};
use crate::models::{ObjectProperties, Protocol, StorageConfig};
use crate::transport::ResilientTransport;
use crate::{Error, Result};
use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::{ByteStream, DateTimeFormat};
use aws_sdk_s3::{config::Region, Client as S3Client};
use std::sync::Arc;
use std::time::Duration;

const PRESIGN_EXPIRY: Duration = Duration::from_secs(3600);

/// Map an SDK failure onto the crate's taxonomy.
///
/// `missing` recognizes the operation's own "no such key" variant; a bare
/// 404 is treated the same way since some S3-compatible stores omit the code.
fn classify<E>(name: &str, err: SdkError<E>, missing: impl FnOnce(&E) -> bool) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());

    if err.as_service_error().is_some_and(missing) || status == Some(404) {
        return Error::NotFound(name.to_string());
    }

    let message = DisplayErrorContext(&err).to_string();
    tracing::error!("S3 request for {} failed: {}", name, message);

    match (&err, status) {
        (SdkError::TimeoutError(_) | SdkError::DispatchFailure(_), _) => Error::Transient(message),
        (_, Some(code)) if code == 429 || (500..600).contains(&code) => Error::Transient(message),
        _ => Error::Backend(message),
    }
}

/// S3 (or S3-compatible) backend; containers map to buckets.
pub struct S3Backend {
    client: S3Client,
}

impl S3Backend {
    pub fn new(client: S3Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectBackend for S3Backend {
    async fn get_object(&self, container: &str, name: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(container)
            .key(name)
            .send()
            .await
            .map_err(|e| classify(name, e, |e| e.is_no_such_key()))?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| Error::Transient(format!("Failed to read body: {}", e)))?;

        Ok(bytes.into_bytes().to_vec())
    }

    async fn put_object(
        &self,
        container: &str,
        name: &str,
        data: &[u8],
        content_type: Option<&str>,
    ) -> Result<()> {
        self.client
            .put_object()
            .bucket(container)
            .key(name)
            .body(ByteStream::from(data.to_vec()))
            .set_content_type(content_type.map(str::to_string))
            .send()
            .await
            .map_err(|e| classify(name, e, |_| false))?;

        Ok(())
    }

    async fn delete_object(&self, container: &str, name: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(container)
            .key(name)
            .send()
            .await
            .map_err(|e| classify(name, e, |_| false))?;

        Ok(())
    }

    async fn stat_object(&self, container: &str, name: &str) -> Result<ObjectProperties> {
        let head = self
            .client
            .head_object()
            .bucket(container)
            .key(name)
            .send()
            .await
            .map_err(|e| classify(name, e, |e| e.is_not_found()))?;

        let last_modified = match head.last_modified() {
            Some(t) => Some(
                t.fmt(DateTimeFormat::HttpDate)
                    .map_err(|e| Error::Backend(format!("bad last-modified: {}", e)))?,
            ),
            None => None,
        };

        Ok(ObjectProperties {
            size: head.content_length().unwrap_or(0).max(0) as u64,
            content_type: head.content_type().map(str::to_string),
            last_modified,
        })
    }

    async fn list_objects(&self, container: &str) -> Result<Vec<String>> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(container)
            .into_paginator()
            .send();

        let mut names = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| classify(container, e, |_| false))?;
            names.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );
        }
        Ok(names)
    }

    async fn build_url(
        &self,
        container: &str,
        name: &str,
        protocol: Option<Protocol>,
    ) -> Result<Option<String>> {
        let presigning = PresigningConfig::expires_in(PRESIGN_EXPIRY)
            .map_err(|e| Error::Configuration(format!("invalid presign expiry: {}", e)))?;

        let request = self
            .client
            .get_object()
            .bucket(container)
            .key(name)
            .presigned(presigning)
            .await
            .map_err(|e| classify(name, e, |_| false))?;

        let mut url = request.uri().to_string();
        // The signature does not cover the scheme.
        if let Some(protocol) = protocol {
            if let Some((_, rest)) = url.split_once("://") {
                url = format!("{}://{}", protocol.scheme(), rest);
            }
        }
        Ok(Some(url))
    }
}

/// Builds the S3 client on first use from static account credentials.
pub struct S3Connector {
    access_key_id: String,
    secret_access_key: String,
    region: String,
    endpoint: Option<String>,
}

impl S3Connector {
    pub fn new(access_key_id: String, secret_access_key: String, region: String) -> Self {
        Self {
            access_key_id,
            secret_access_key,
            region,
            endpoint: None,
        }
    }

    /// Custom endpoint for S3-compatible stores (MinIO, Spaces, ...).
    pub fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let (Some(name), Some(key)) = (&config.account_name, &config.account_key) else {
            return Err(Error::Configuration(
                "S3 backend requires account credentials".to_string(),
            ));
        };

        let mut connector = Self::new(name.clone(), key.clone(), config.region.clone());
        if let Some(endpoint) = &config.endpoint {
            connector = connector.with_endpoint(endpoint.clone());
        }
        Ok(connector)
    }
}

#[async_trait]
impl Connector for S3Connector {
    async fn connect(&self, transport: &ResilientTransport) -> Result<Arc<dyn ObjectBackend>> {
        tracing::info!(
            "Connecting to S3 (region: {}, endpoint: {})",
            self.region,
            self.endpoint.as_deref().unwrap_or("default")
        );

        let credentials = aws_sdk_s3::config::Credentials::new(
            self.access_key_id.clone(),
            self.secret_access_key.clone(),
            None,
            None,
            "blobkit",
        );

        // Retries are owned by the transport, so the SDK's own are disabled.
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(self.region.clone()))
            .retry_config(RetryConfig::disabled())
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_attempt_timeout(transport.config().timeout)
                    .build(),
            );
        if let Some(endpoint) = &self.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(self.endpoint.is_some())
            .build();

        Ok(Arc::new(S3Backend::new(S3Client::from_conf(s3_config))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn backend(server: &MockServer) -> Arc<dyn ObjectBackend> {
        let transport = ResilientTransport::new(TransportConfig::default()).unwrap();
        S3Connector::new("akid".to_string(), "secret".to_string(), "us-east-1".to_string())
            .with_endpoint(server.uri())
            .connect(&transport)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_get_object_path_style() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/assets/img.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let data = backend(&server)
            .await
            .get_object("assets", "img.png")
            .await
            .unwrap();
        assert_eq!(data, b"png");
    }

    #[tokio::test]
    async fn test_head_missing_is_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = backend(&server)
            .await
            .stat_object("assets", "missing.png")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_collects_keys() {
        let server = MockServer::start().await;

        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>assets</Name>
  <KeyCount>2</KeyCount>
  <MaxKeys>1000</MaxKeys>
  <IsTruncated>false</IsTruncated>
  <Contents><Key>a.txt</Key><Size>1</Size></Contents>
  <Contents><Key>b/c.txt</Key><Size>2</Size></Contents>
</ListBucketResult>"#;

        Mock::given(method("GET"))
            .and(path("/assets"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "application/xml")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let names = backend(&server).await.list_objects("assets").await.unwrap();
        assert_eq!(names, vec!["a.txt", "b/c.txt"]);
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = backend(&server)
            .await
            .get_object("assets", "img.png")
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_presigned_url_honours_protocol() {
        let server = MockServer::start().await;
        let url = backend(&server)
            .await
            .build_url("assets", "img.png", Some(Protocol::Https))
            .await
            .unwrap()
            .unwrap();

        assert!(url.starts_with("https://"));
        assert!(url.contains("/assets/img.png"));
        assert!(url.contains("X-Amz-Signature="));
    }

    #[test]
    fn test_from_config_requires_credentials() {
        let config = StorageConfig::new("assets");
        assert!(matches!(
            S3Connector::from_config(&config),
            Err(Error::Configuration(_))
        ));

        let config = StorageConfig::new("assets").with_account("akid", "secret");
        assert!(S3Connector::from_config(&config).is_ok());
    }
}
