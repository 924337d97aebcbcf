//! Backend capability interface
//!
//! The facade only ever talks to an [`ObjectBackend`]. Which backend it gets
//! is decided when the storage is composed, by the [`Connector`] handed to
//! [`crate::storage::ObjectStorage::new`].

pub mod http;
pub mod memory;
pub mod s3;

pub use http::{HttpBackend, HttpConnector};
pub use memory::MemoryBackend;
pub use s3::{S3Backend, S3Connector};

use crate::models::{BackendKind, ObjectProperties, Protocol, StorageConfig};
use crate::transport::ResilientTransport;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Operations a storage provider must support.
///
/// Implementations report a missing object as [`crate::Error::NotFound`] and
/// network faults worth retrying as [`crate::Error::Transient`].
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    async fn get_object(&self, container: &str, name: &str) -> Result<Vec<u8>>;

    /// Full replace of any existing object with the same name.
    async fn put_object(
        &self,
        container: &str,
        name: &str,
        data: &[u8],
        content_type: Option<&str>,
    ) -> Result<()>;

    async fn delete_object(&self, container: &str, name: &str) -> Result<()>;

    async fn stat_object(&self, container: &str, name: &str) -> Result<ObjectProperties>;

    async fn list_objects(&self, container: &str) -> Result<Vec<String>>;

    /// Backend-native (possibly signed) URL, or `None` when unsupported.
    async fn build_url(
        &self,
        container: &str,
        name: &str,
        protocol: Option<Protocol>,
    ) -> Result<Option<String>>;

    /// Whether puts and deletes may be retried safely.
    fn idempotent_writes(&self) -> bool {
        false
    }
}

/// Opens the long-lived connection a facade reuses for its whole lifetime.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, transport: &ResilientTransport) -> Result<Arc<dyn ObjectBackend>>;
}

/// Pick the connector named by `config.backend`.
pub fn connector_for(config: &StorageConfig) -> Result<Box<dyn Connector>> {
    let connector: Box<dyn Connector> = match config.backend {
        BackendKind::Memory => Box::new(MemoryBackend::new()),
        BackendKind::Http => Box::new(HttpConnector::from_config(config)?),
        BackendKind::S3 => Box::new(S3Connector::from_config(config)?),
    };
    Ok(connector)
}
