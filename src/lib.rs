//! Object storage client with pluggable backends
//!
//! Reads, writes, deletes and URL-signs objects in a flat blob container.
//! Backend calls are retried on transient faults, and public URLs can carry
//! expiring CDN tokens.

pub mod backend;
pub mod error;
pub mod mime;
pub mod models;
pub mod names;
pub mod storage;
pub mod token;
pub mod transport;

pub use error::{Error, Result};
pub use storage::ObjectStorage;
