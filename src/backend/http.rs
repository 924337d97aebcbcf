use super::{Connector, ObjectBackend};
use crate::models::{ObjectProperties, Protocol, StorageConfig};
use crate::transport::ResilientTransport;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, LAST_MODIFIED};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct ListResponse {
    names: Vec<String>,
}

#[derive(Debug, Clone)]
struct Credentials {
    account_name: String,
    account_key: String,
}

/// Plain HTTP blob endpoint: `{endpoint}/{container}/{name}`.
///
/// Objects are read with GET, written with PUT, removed with DELETE and
/// inspected with HEAD. `GET {endpoint}/{container}` returns
/// `{"names": [...]}`.
pub struct HttpBackend {
    client: Client,
    endpoint: Url,
    credentials: Option<Credentials>,
}

impl HttpBackend {
    pub fn new(client: Client, endpoint: &str) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| Error::Configuration(format!("invalid endpoint '{}': {}", endpoint, e)))?;

        if endpoint.cannot_be_a_base() {
            return Err(Error::Configuration(format!(
                "endpoint '{}' cannot be a base URL",
                endpoint
            )));
        }

        Ok(Self {
            client,
            endpoint,
            credentials: None,
        })
    }

    pub fn with_credentials(mut self, account_name: String, account_key: String) -> Self {
        self.credentials = Some(Credentials {
            account_name,
            account_key,
        });
        self
    }

    fn url(&self, container: &str, name: Option<&str>) -> Result<Url> {
        let mut url = self.endpoint.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| Error::Configuration("endpoint cannot be a base URL".to_string()))?;
            segments.pop_if_empty().push(container);
            if let Some(name) = name {
                segments.extend(name.split('/'));
            }
        }
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some(c) => request.basic_auth(&c.account_name, Some(&c.account_key)),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, name: &str) -> Result<Response> {
        let response = self.authorize(request).send().await.map_err(|e| {
            tracing::error!("Failed to send request for {}: {}", name, e);
            Error::from(e)
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(name.to_string()));
        }

        let error_text = response.text().await.unwrap_or_default();
        tracing::error!("Blob endpoint error (status {}): {}", status, error_text);

        let message = format!("status {}: {}", status, error_text);
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(Error::Transient(message))
        } else {
            Err(Error::Backend(message))
        }
    }
}

fn header_str(response: &Response, header: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(header)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[async_trait]
impl ObjectBackend for HttpBackend {
    async fn get_object(&self, container: &str, name: &str) -> Result<Vec<u8>> {
        let url = self.url(container, Some(name))?;
        let response = self.send(self.client.get(url), name).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn put_object(
        &self,
        container: &str,
        name: &str,
        data: &[u8],
        content_type: Option<&str>,
    ) -> Result<()> {
        let url = self.url(container, Some(name))?;
        let mut request = self.client.put(url).body(data.to_vec());
        if let Some(content_type) = content_type {
            request = request.header(CONTENT_TYPE, content_type);
        }
        self.send(request, name).await?;
        Ok(())
    }

    async fn delete_object(&self, container: &str, name: &str) -> Result<()> {
        let url = self.url(container, Some(name))?;
        self.send(self.client.delete(url), name).await?;
        Ok(())
    }

    async fn stat_object(&self, container: &str, name: &str) -> Result<ObjectProperties> {
        let url = self.url(container, Some(name))?;
        let response = self.send(self.client.head(url), name).await?;

        let size = header_str(&response, CONTENT_LENGTH)
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| Error::Backend(format!("no Content-Length for {}", name)))?;

        Ok(ObjectProperties {
            size,
            content_type: header_str(&response, CONTENT_TYPE),
            last_modified: header_str(&response, LAST_MODIFIED),
        })
    }

    async fn list_objects(&self, container: &str) -> Result<Vec<String>> {
        let url = self.url(container, None)?;
        let response = match self.send(self.client.get(url), container).await {
            Ok(response) => response,
            Err(Error::NotFound(_)) => {
                tracing::debug!("Container {} not found, listing as empty", container);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let body = response.text().await?;
        let list: ListResponse = serde_json::from_str(&body).map_err(|e| {
            tracing::error!("Failed to parse listing: {}\nBody: {}", e, body);
            Error::Backend(format!("Failed to parse listing: {}", e))
        })?;
        Ok(list.names)
    }

    async fn build_url(
        &self,
        container: &str,
        name: &str,
        protocol: Option<Protocol>,
    ) -> Result<Option<String>> {
        let mut url = self.url(container, Some(name))?;
        if let Some(protocol) = protocol {
            url.set_scheme(protocol.scheme()).map_err(|_| {
                Error::Configuration(format!("cannot switch {} to {}", url, protocol.scheme()))
            })?;
        }
        Ok(Some(url.to_string()))
    }
}

/// Connects an [`HttpBackend`] over the transport's shared HTTP client.
pub struct HttpConnector {
    endpoint: String,
    credentials: Option<(String, String)>,
}

impl HttpConnector {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            credentials: None,
        }
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| Error::Configuration("HTTP backend requires an endpoint".to_string()))?;

        Ok(Self {
            endpoint,
            credentials: config.account_name.clone().zip(config.account_key.clone()),
        })
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn connect(&self, transport: &ResilientTransport) -> Result<Arc<dyn ObjectBackend>> {
        tracing::info!("Connecting to blob endpoint {}", self.endpoint);

        let mut backend = HttpBackend::new(transport.http_client(), &self.endpoint)?;
        if let Some((name, key)) = self.credentials.clone() {
            backend = backend.with_credentials(name, key);
        }
        Ok(Arc::new(backend))
    }
}
