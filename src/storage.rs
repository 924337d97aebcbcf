//! Object store facade
//!
//! [`ObjectStorage`] is what callers hold. It normalizes names, connects to
//! its backend lazily (once per instance), routes every call through the
//! resilient transport and applies the configured URL signing policy.

use crate::backend::{connector_for, Connector, ObjectBackend};
use crate::mime::guess_content_type;
use crate::models::{Listing, MissingTimestamp, ObjectProperties, StorageConfig};
use crate::names::clean_name;
use crate::token;
use crate::transport::ResilientTransport;
use crate::{Error, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Source of "now" for token expiry and the `Now` timestamp policy.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a single instant.
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    pub fn at_epoch(seconds: i64) -> Self {
        Self(DateTime::from_timestamp(seconds, 0).unwrap_or_default())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Parse a backend `Last-Modified` value (`%a, %d %b %Y %H:%M:%S %Z`) as UTC.
///
/// `GMT`, `UTC` and `UT` zones are all read as UTC; anything else must be a
/// valid RFC 2822 date.
pub fn parse_http_date(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();

    if let Some((stamp, zone)) = value.rsplit_once(' ') {
        if matches!(zone, "GMT" | "UTC" | "UT") {
            if let Ok(naive) = NaiveDateTime::parse_from_str(stamp, HTTP_DATE_FORMAT) {
                return Ok(naive.and_utc());
            }
        }
    }

    DateTime::parse_from_rfc2822(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Backend(format!("unparseable timestamp '{}': {}", value, e)))
}

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S";

/// `{base}{container}/{name}` with every name segment percent-encoded.
fn join_url(base: &str, container: &str, name: &str) -> String {
    let path = name
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");
    format!("{}{}/{}", base, urlencoding::encode(container), path)
}

pub struct ObjectStorage {
    config: StorageConfig,
    transport: ResilientTransport,
    connector: Box<dyn Connector>,
    connection: OnceCell<Arc<dyn ObjectBackend>>,
    clock: Arc<dyn Clock>,
}

impl ObjectStorage {
    /// Validate `config` and prepare (but not open) the connection.
    pub fn new(config: StorageConfig, connector: Box<dyn Connector>) -> Result<Self> {
        config.validate()?;
        let transport = ResilientTransport::new(config.transport.clone())?;

        Ok(Self {
            config,
            transport,
            connector,
            connection: OnceCell::new(),
            clock: Arc::new(SystemClock),
        })
    }

    /// Use the backend named by `config.backend`.
    pub fn from_config(config: StorageConfig) -> Result<Self> {
        let connector = connector_for(&config)?;
        Self::new(config, connector)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn container(&self) -> &str {
        &self.config.container_name
    }

    /// The shared connection, opened on first use.
    ///
    /// Concurrent first callers wait on a single connect. A failed connect
    /// leaves the cell empty so the next call tries again.
    pub async fn connection(&self) -> Result<Arc<dyn ObjectBackend>> {
        self.connection
            .get_or_try_init(|| async {
                info!("Opening connection for container {}", self.container());
                self.connector.connect(&self.transport).await
            })
            .await
            .map(Arc::clone)
    }

    async fn stat(&self, name: &str) -> Result<ObjectProperties> {
        let backend = self.connection().await?;
        let backend = backend.as_ref();
        let container = self.container();

        self.transport
            .retrying("stat", || backend.stat_object(container, name))
            .await
    }

    pub async fn open(&self, name: &str) -> Result<Vec<u8>> {
        let name = clean_name(name)?;
        debug!("Opening {}", name);

        let backend = self.connection().await?;
        let backend = backend.as_ref();
        let container = self.container();

        self.transport
            .retrying("get", || backend.get_object(container, &name))
            .await
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        let name = clean_name(name)?;

        match self.stat(&name).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Store `data` under `name`, replacing any existing object.
    ///
    /// Without an explicit `content_type` one is guessed from the name, then
    /// from the leading bytes. Returns the normalized name.
    pub async fn write(
        &self,
        name: &str,
        data: &[u8],
        content_type: Option<&str>,
    ) -> Result<String> {
        let name = clean_name(name)?;
        let content_type = match content_type {
            Some(ct) => Some(ct.to_string()),
            None => guess_content_type(&name, data),
        };
        debug!(
            "Writing {} ({} bytes, {})",
            name,
            data.len(),
            content_type.as_deref().unwrap_or("no content type")
        );

        let backend = self.connection().await?;
        let backend = backend.as_ref();
        let container = self.container();
        let put = || backend.put_object(container, &name, data, content_type.as_deref());

        if backend.idempotent_writes() {
            self.transport.retrying("put", put).await?;
        } else {
            self.transport.once("put", put).await?;
        }
        Ok(name)
    }

    /// Remove `name`; removing an absent object succeeds.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let name = clean_name(name)?;
        debug!("Deleting {}", name);

        let backend = self.connection().await?;
        let backend = backend.as_ref();
        let container = self.container();
        let delete = || backend.delete_object(container, &name);

        let result = if backend.idempotent_writes() {
            self.transport.retrying("delete", delete).await
        } else {
            self.transport.once("delete", delete).await
        };

        match result {
            Err(Error::NotFound(_)) => {
                debug!("{} was already absent", name);
                Ok(())
            }
            other => other,
        }
    }

    pub async fn size(&self, name: &str) -> Result<u64> {
        let name = clean_name(name)?;
        Ok(self.stat(&name).await?.size)
    }

    /// Last modification instant in UTC.
    ///
    /// When the backend reports no timestamp the configured
    /// [`MissingTimestamp`] policy decides the answer.
    pub async fn modified_time(&self, name: &str) -> Result<Option<DateTime<Utc>>> {
        let name = clean_name(name)?;

        match self.stat(&name).await?.last_modified {
            Some(raw) => parse_http_date(&raw).map(Some),
            None => Ok(match self.config.missing_timestamp {
                MissingTimestamp::Unknown => None,
                MissingTimestamp::Now => Some(self.clock.now()),
            }),
        }
    }

    pub async fn list(&self) -> Result<Listing> {
        let backend = self.connection().await?;
        let backend = backend.as_ref();
        let container = self.container();

        let names = self
            .transport
            .retrying("list", || backend.list_objects(container))
            .await?;
        Ok(Listing::flat(names))
    }

    /// Token for the configured key expiring `timeout` from now, if signing is on.
    pub fn sign_url_token(&self) -> Result<Option<String>> {
        let Some((key, timeout)) = self.config.signing() else {
            return Ok(None);
        };

        let expires_at = i64::try_from(timeout.as_secs())
            .ok()
            .and_then(|secs| self.clock.now().timestamp().checked_add(secs))
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "CDN token timeout of {}s is out of range",
                    timeout.as_secs()
                ))
            })?;
        token::sign_expiry(key, expires_at).map(Some)
    }

    /// Public URL for `name`.
    ///
    /// A configured CDN base wins, then the backend's own URL, then the
    /// media fallback. A signed token is appended when signing is on.
    pub async fn url(&self, name: &str) -> Result<String> {
        let name = clean_name(name)?;
        let container = self.container();

        let (base, has_query) = if let Some(cdn) = &self.config.cdn_base_url {
            (join_url(cdn, container, &name), false)
        } else if let Some(native) = self.native_url(&name).await? {
            let has_query = native.contains('?');
            (native, has_query)
        } else if let Some(media) = &self.config.media_url {
            (join_url(media, container, &name), false)
        } else {
            return Err(Error::Configuration(format!(
                "no URL source for {}: set a CDN base URL or media URL",
                name
            )));
        };

        Ok(match self.sign_url_token()? {
            Some(token) => {
                let separator = if has_query { '&' } else { '?' };
                format!("{}{}{}", base, separator, token)
            }
            None => base,
        })
    }

    async fn native_url(&self, name: &str) -> Result<Option<String>> {
        let backend = self.connection().await?;
        let backend = backend.as_ref();
        let container = self.container();
        let protocol = self.config.protocol();

        self.transport
            .retrying("url", || backend.build_url(container, name, protocol))
            .await
    }
}
