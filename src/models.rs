//! Data models and configuration
//!
//! Defines the values exchanged with backends and the explicit configuration
//! handed to [`crate::storage::ObjectStorage`].

use crate::transport::TransportConfig;
use crate::{Error, Result};
use std::time::Duration;

/// Properties of a stored object as reported by the backend at call time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectProperties {
    pub size: u64,
    pub content_type: Option<String>,
    /// Raw RFC-1123 string, e.g. `Sun, 09 Sep 2001 01:46:40 GMT`.
    pub last_modified: Option<String>,
}

/// Result of listing a container: `(directories, files)`.
///
/// Containers are flat, so `directories` is always empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub directories: Vec<String>,
    pub files: Vec<String>,
}

impl Listing {
    pub fn flat(mut files: Vec<String>) -> Self {
        files.sort();
        Self {
            directories: Vec::new(),
            files,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    /// `None` means "let the backend decide".
    pub fn from_use_ssl(use_ssl: Option<bool>) -> Option<Self> {
        use_ssl.map(|ssl| if ssl { Protocol::Https } else { Protocol::Http })
    }

    pub fn scheme(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

/// What `modified_time` reports when the backend has no timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissingTimestamp {
    #[default]
    Unknown,
    Now,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackendKind {
    #[default]
    Memory,
    Http,
    S3,
}

// Configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub account_name: Option<String>,
    pub account_key: Option<String>,
    pub container_name: String,
    pub use_ssl: Option<bool>,
    pub cdn_base_url: Option<String>,
    pub cdn_token_key: Option<String>,
    pub cdn_token_timeout: Option<Duration>,
    pub media_url: Option<String>,
    pub missing_timestamp: MissingTimestamp,
    pub transport: TransportConfig,
    pub backend: BackendKind,
    pub endpoint: Option<String>,
    pub region: String,
}

const DEFAULT_REGION: &str = "us-east-1";

impl StorageConfig {
    pub fn new(container_name: impl Into<String>) -> Self {
        Self {
            account_name: None,
            account_key: None,
            container_name: container_name.into(),
            use_ssl: None,
            cdn_base_url: None,
            cdn_token_key: None,
            cdn_token_timeout: None,
            media_url: None,
            missing_timestamp: MissingTimestamp::default(),
            transport: TransportConfig::default(),
            backend: BackendKind::default(),
            endpoint: None,
            region: DEFAULT_REGION.to_string(),
        }
    }

    pub fn with_account(mut self, name: impl Into<String>, key: impl Into<String>) -> Self {
        self.account_name = Some(name.into());
        self.account_key = Some(key.into());
        self
    }

    pub fn with_use_ssl(mut self, use_ssl: bool) -> Self {
        self.use_ssl = Some(use_ssl);
        self
    }

    pub fn with_cdn_base_url(mut self, url: impl Into<String>) -> Self {
        self.cdn_base_url = Some(url.into());
        self
    }

    pub fn with_cdn_token(mut self, key: impl Into<String>, timeout: Duration) -> Self {
        self.cdn_token_key = Some(key.into());
        self.cdn_token_timeout = Some(timeout);
        self
    }

    pub fn with_media_url(mut self, url: impl Into<String>) -> Self {
        self.media_url = Some(url.into());
        self
    }

    pub fn with_missing_timestamp(mut self, policy: MissingTimestamp) -> Self {
        self.missing_timestamp = policy;
        self
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_backend(mut self, backend: BackendKind, endpoint: Option<String>) -> Self {
        self.backend = backend;
        self.endpoint = endpoint;
        self
    }

    pub fn protocol(&self) -> Option<Protocol> {
        Protocol::from_use_ssl(self.use_ssl)
    }

    /// Key and timeout, present only when both are configured.
    pub fn signing(&self) -> Option<(&str, Duration)> {
        match (&self.cdn_token_key, self.cdn_token_timeout) {
            (Some(key), Some(timeout)) => Some((key.as_str(), timeout)),
            _ => None,
        }
    }

    /// Reject inconsistent combinations up front rather than mid-operation.
    pub fn validate(&self) -> Result<()> {
        if self.container_name.trim().is_empty() {
            return Err(Error::Configuration("container name is empty".to_string()));
        }

        match (&self.cdn_token_key, self.cdn_token_timeout) {
            (Some(_), None) => {
                return Err(Error::Configuration(
                    "CDN token key is set without a token timeout".to_string(),
                ))
            }
            (None, Some(_)) => {
                return Err(Error::Configuration(
                    "CDN token timeout is set without a token key".to_string(),
                ))
            }
            (Some(key), Some(timeout)) => {
                if key.is_empty() {
                    return Err(Error::Configuration("CDN token key is empty".to_string()));
                }
                if timeout.is_zero() {
                    return Err(Error::Configuration(
                        "CDN token timeout must be positive".to_string(),
                    ));
                }
            }
            (None, None) => {}
        }

        if self.transport.timeout.is_zero() {
            return Err(Error::Configuration(
                "transport timeout must be positive".to_string(),
            ));
        }

        if self.account_name.is_some() != self.account_key.is_some() {
            return Err(Error::Configuration(
                "account name and account key must be set together".to_string(),
            ));
        }

        match self.backend {
            BackendKind::Http if self.endpoint.is_none() => Err(Error::Configuration(
                "HTTP backend requires an endpoint".to_string(),
            )),
            BackendKind::S3 if self.account_name.is_none() => Err(Error::Configuration(
                "S3 backend requires account credentials".to_string(),
            )),
            _ => Ok(()),
        }
    }

    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let container_name = var("STORAGE_CONTAINER")
            .ok_or_else(|| Error::Configuration("STORAGE_CONTAINER not set".to_string()))?;

        let mut transport = TransportConfig::default();
        if let Some(secs) = var("STORAGE_TIMEOUT_SECS") {
            transport.timeout = Duration::from_secs(parse_number("STORAGE_TIMEOUT_SECS", &secs)?);
        }
        if let Some(retries) = var("STORAGE_MAX_RETRIES") {
            transport.max_retries = parse_number("STORAGE_MAX_RETRIES", &retries)? as usize;
        }

        let config = Self {
            account_name: var("STORAGE_ACCOUNT_NAME"),
            account_key: var("STORAGE_ACCOUNT_KEY"),
            container_name,
            use_ssl: var("STORAGE_USE_SSL")
                .map(|v| parse_bool("STORAGE_USE_SSL", &v))
                .transpose()?,
            cdn_base_url: var("STORAGE_CDN_URL"),
            cdn_token_key: var("STORAGE_CDN_TOKEN_KEY"),
            cdn_token_timeout: var("STORAGE_CDN_TOKEN_TIMEOUT")
                .map(|v| parse_number("STORAGE_CDN_TOKEN_TIMEOUT", &v).map(Duration::from_secs))
                .transpose()?,
            media_url: var("STORAGE_MEDIA_URL"),
            missing_timestamp: match var("STORAGE_MISSING_TIMESTAMP").as_deref() {
                None | Some("unknown") => MissingTimestamp::Unknown,
                Some("now") => MissingTimestamp::Now,
                Some(other) => {
                    return Err(Error::Configuration(format!(
                        "STORAGE_MISSING_TIMESTAMP must be 'unknown' or 'now', got '{}'",
                        other
                    )))
                }
            },
            transport,
            backend: match var("STORAGE_BACKEND").as_deref() {
                None | Some("memory") => BackendKind::Memory,
                Some("http") => BackendKind::Http,
                Some("s3") => BackendKind::S3,
                Some(other) => {
                    return Err(Error::Configuration(format!(
                        "STORAGE_BACKEND must be memory, http or s3, got '{}'",
                        other
                    )))
                }
            },
            endpoint: var("STORAGE_ENDPOINT"),
            region: var("STORAGE_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string()),
        };

        config.validate()?;
        Ok(config)
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Configuration(format!(
            "{} must be true or false, got '{}'",
            name, value
        ))),
    }
}

fn parse_number(name: &str, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| {
        Error::Configuration(format!("{} must be a whole number, got '{}'", name, value))
    })
}
