use super::{Connector, ObjectBackend};
use crate::models::{ObjectProperties, Protocol};
use crate::transport::ResilientTransport;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

pub const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    content_type: Option<String>,
    last_modified: Option<String>,
}

type Containers = HashMap<String, BTreeMap<String, StoredObject>>;

#[derive(Default)]
struct Counters {
    connects: AtomicUsize,
    gets: AtomicUsize,
    puts: AtomicUsize,
    deletes: AtomicUsize,
    stats: AtomicUsize,
    lists: AtomicUsize,
    pending_failures: AtomicUsize,
}

/// In-process backend used for tests and local runs.
///
/// Clones share the same store, so a test can keep a handle while the
/// facade owns the connection.
#[derive(Clone)]
pub struct MemoryBackend {
    containers: Arc<Mutex<Containers>>,
    counters: Arc<Counters>,
    native_urls: bool,
    record_timestamps: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            containers: Arc::new(Mutex::new(HashMap::new())),
            counters: Arc::new(Counters::default()),
            native_urls: false,
            record_timestamps: true,
        }
    }

    /// Serve `memory://<container>/<name>` from `build_url`.
    pub fn with_native_urls(mut self) -> Self {
        self.native_urls = true;
        self
    }

    /// Store objects without a last-modified timestamp.
    pub fn without_timestamps(mut self) -> Self {
        self.record_timestamps = false;
        self
    }

    /// Fail the next `n` calls with a transient error.
    pub fn with_transient_failures(self, n: usize) -> Self {
        self.fail_next(n);
        self
    }

    pub fn fail_next(&self, n: usize) {
        self.counters.pending_failures.store(n, Ordering::SeqCst);
    }

    /// Seed an object with an explicit raw timestamp.
    pub fn with_object(
        self,
        container: &str,
        name: &str,
        data: Vec<u8>,
        last_modified: Option<String>,
    ) -> Self {
        self.store().entry(container.to_string()).or_default().insert(
            name.to_string(),
            StoredObject {
                data,
                content_type: None,
                last_modified,
            },
        );
        self
    }

    pub fn get_connect_count(&self) -> usize {
        self.counters.connects.load(Ordering::SeqCst)
    }

    pub fn get_get_count(&self) -> usize {
        self.counters.gets.load(Ordering::SeqCst)
    }

    pub fn get_put_count(&self) -> usize {
        self.counters.puts.load(Ordering::SeqCst)
    }

    pub fn get_delete_count(&self) -> usize {
        self.counters.deletes.load(Ordering::SeqCst)
    }

    pub fn get_stat_count(&self) -> usize {
        self.counters.stats.load(Ordering::SeqCst)
    }

    pub fn get_list_count(&self) -> usize {
        self.counters.lists.load(Ordering::SeqCst)
    }

    pub fn content_type_of(&self, container: &str, name: &str) -> Option<String> {
        self.store()
            .get(container)
            .and_then(|objects| objects.get(name))
            .and_then(|object| object.content_type.clone())
    }

    fn store(&self) -> MutexGuard<'_, Containers> {
        self.containers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, counter: &AtomicUsize) -> Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);

        let pending = &self.counters.pending_failures;
        if pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Transient("injected connection reset".to_string()));
        }
        Ok(())
    }

    fn lookup<T>(
        &self,
        container: &str,
        name: &str,
        f: impl FnOnce(&StoredObject) -> T,
    ) -> Result<T> {
        self.store()
            .get(container)
            .and_then(|objects| objects.get(name))
            .map(f)
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    async fn get_object(&self, container: &str, name: &str) -> Result<Vec<u8>> {
        self.record(&self.counters.gets)?;
        self.lookup(container, name, |object| object.data.clone())
    }

    async fn put_object(
        &self,
        container: &str,
        name: &str,
        data: &[u8],
        content_type: Option<&str>,
    ) -> Result<()> {
        self.record(&self.counters.puts)?;

        let last_modified = self
            .record_timestamps
            .then(|| Utc::now().format(HTTP_DATE_FORMAT).to_string());

        self.store().entry(container.to_string()).or_default().insert(
            name.to_string(),
            StoredObject {
                data: data.to_vec(),
                content_type: content_type.map(str::to_string),
                last_modified,
            },
        );
        Ok(())
    }

    async fn delete_object(&self, container: &str, name: &str) -> Result<()> {
        self.record(&self.counters.deletes)?;
        self.store()
            .get_mut(container)
            .and_then(|objects| objects.remove(name))
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    async fn stat_object(&self, container: &str, name: &str) -> Result<ObjectProperties> {
        self.record(&self.counters.stats)?;
        self.lookup(container, name, |object| ObjectProperties {
            size: object.data.len() as u64,
            content_type: object.content_type.clone(),
            last_modified: object.last_modified.clone(),
        })
    }

    async fn list_objects(&self, container: &str) -> Result<Vec<String>> {
        self.record(&self.counters.lists)?;
        Ok(self
            .store()
            .get(container)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn build_url(
        &self,
        container: &str,
        name: &str,
        _protocol: Option<Protocol>,
    ) -> Result<Option<String>> {
        Ok(self
            .native_urls
            .then(|| {
                let path = name
                    .split('/')
                    .map(|segment| urlencoding::encode(segment).into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                format!("memory://{}/{}", container, path)
            }))
    }
}

#[async_trait]
impl Connector for MemoryBackend {
    async fn connect(&self, _transport: &ResilientTransport) -> Result<Arc<dyn ObjectBackend>> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_stat() {
        let backend = MemoryBackend::new();
        backend
            .put_object("c", "a.txt", b"hello", Some("text/plain"))
            .await
            .unwrap();

        assert_eq!(backend.get_object("c", "a.txt").await.unwrap(), b"hello");

        let props = backend.stat_object("c", "a.txt").await.unwrap();
        assert_eq!(props.size, 5);
        assert_eq!(props.content_type.as_deref(), Some("text/plain"));
        assert!(props.last_modified.unwrap().ends_with("GMT"));
        assert_eq!(backend.get_put_count(), 1);
        assert_eq!(backend.get_get_count(), 1);
        assert_eq!(backend.get_stat_count(), 1);
    }

    #[tokio::test]
    async fn test_containers_are_isolated() {
        let backend = MemoryBackend::new();
        backend.put_object("one", "x", b"1", None).await.unwrap();

        assert!(matches!(
            backend.get_object("two", "x").await,
            Err(Error::NotFound(_))
        ));
        assert!(backend.list_objects("two").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let backend = MemoryBackend::new();
        let err = backend.delete_object("c", "missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let backend = MemoryBackend::new().with_transient_failures(2);

        assert!(backend.list_objects("c").await.unwrap_err().is_transient());
        assert!(backend.list_objects("c").await.unwrap_err().is_transient());
        assert!(backend.list_objects("c").await.is_ok());
        assert_eq!(backend.get_list_count(), 3);
    }

    #[tokio::test]
    async fn test_native_urls_opt_in() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.build_url("c", "a", None).await.unwrap(), None);

        let backend = backend.with_native_urls();
        assert_eq!(
            backend.build_url("c", "a", None).await.unwrap().as_deref(),
            Some("memory://c/a")
        );
        assert_eq!(
            backend.build_url("c", "dir/a b?.txt", None).await.unwrap().as_deref(),
            Some("memory://c/dir/a%20b%3F.txt")
        );
    }

    #[tokio::test]
    async fn test_seeded_object_keeps_raw_timestamp() {
        let backend = MemoryBackend::new().with_object(
            "c",
            "old.txt",
            b"x".to_vec(),
            Some("Sun, 09 Sep 2001 01:46:40 GMT".to_string()),
        );

        let props = backend.stat_object("c", "old.txt").await.unwrap();
        assert_eq!(
            props.last_modified.as_deref(),
            Some("Sun, 09 Sep 2001 01:46:40 GMT")
        );
    }

    #[tokio::test]
    async fn test_connect_shares_store() {
        let backend = MemoryBackend::new();
        let transport = ResilientTransport::new(Default::default()).unwrap();
        let conn = backend.connect(&transport).await.unwrap();

        conn.put_object("c", "shared", b"1", None).await.unwrap();
        assert_eq!(backend.list_objects("c").await.unwrap(), vec!["shared"]);
        assert_eq!(backend.get_connect_count(), 1);
    }
}
