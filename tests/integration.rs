use blobkit::backend::{HttpConnector, MemoryBackend};
use blobkit::models::{BackendKind, Listing, StorageConfig};
use blobkit::storage::FixedClock;
use blobkit::transport::TransportConfig;
use blobkit::{token, Error, ObjectStorage};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn transport(max_retries: usize) -> TransportConfig {
    TransportConfig {
        timeout: Duration::from_secs(2),
        max_retries,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

fn memory_storage(backend: &MemoryBackend) -> ObjectStorage {
    ObjectStorage::new(
        StorageConfig::new("assets").with_transport(transport(3)),
        Box::new(backend.clone()),
    )
    .unwrap()
}

#[tokio::test]
async fn test_write_then_open_round_trip() {
    let storage = memory_storage(&MemoryBackend::new());

    let payloads: [(&str, &[u8]); 3] = [
        ("empty.bin", b""),
        ("text/hello.txt", b"hello world"),
        ("img.png", &[0x89, 0x50, 0x4E, 0x47, 0x00, 0xFF]),
    ];

    for (name, data) in payloads {
        let stored = storage.write(name, data, None).await.unwrap();
        assert_eq!(stored, name);
        assert_eq!(storage.open(name).await.unwrap(), data);
        assert_eq!(storage.size(name).await.unwrap(), data.len() as u64);
        assert!(storage.exists(name).await.unwrap());
    }
}

#[tokio::test]
async fn test_missing_object() {
    let storage = memory_storage(&MemoryBackend::new());

    assert!(!storage.exists("never-written").await.unwrap());
    assert!(matches!(
        storage.open("never-written").await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        storage.size("never-written").await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let storage = memory_storage(&MemoryBackend::new());

    storage.write("gone.txt", b"bye", None).await.unwrap();
    storage.delete("gone.txt").await.unwrap();
    storage.delete("gone.txt").await.unwrap();
    assert!(!storage.exists("gone.txt").await.unwrap());
}

#[tokio::test]
async fn test_overwrite_last_write_wins() {
    let storage = memory_storage(&MemoryBackend::new());

    storage.write("doc.txt", b"first", None).await.unwrap();
    storage.write("doc.txt", b"second version", None).await.unwrap();

    assert_eq!(storage.open("doc.txt").await.unwrap(), b"second version");
    assert_eq!(storage.size("doc.txt").await.unwrap(), 14);
    assert_eq!(storage.list().await.unwrap().files, vec!["doc.txt"]);
}

#[tokio::test]
async fn test_listing() {
    let storage = memory_storage(&MemoryBackend::new());
    assert_eq!(storage.list().await.unwrap(), Listing::default());

    for name in ["c.txt", "a.txt", "nested/b.txt"] {
        storage.write(name, b"x", None).await.unwrap();
    }

    let listing = storage.list().await.unwrap();
    assert!(listing.directories.is_empty());
    assert_eq!(listing.files, vec!["a.txt", "c.txt", "nested/b.txt"]);
}

#[tokio::test]
async fn test_cdn_url_unsigned() {
    let storage = ObjectStorage::new(
        StorageConfig::new("assets").with_cdn_base_url("https://cdn.example/"),
        Box::new(MemoryBackend::new()),
    )
    .unwrap();

    assert_eq!(
        storage.url("img.png").await.unwrap(),
        "https://cdn.example/assets/img.png"
    );
}

#[tokio::test]
async fn test_cdn_url_signed_with_fixed_clock() {
    let storage = ObjectStorage::new(
        StorageConfig::new("assets")
            .with_cdn_base_url("https://cdn.example/")
            .with_cdn_token("k", Duration::from_secs(60)),
        Box::new(MemoryBackend::new()),
    )
    .unwrap()
    .with_clock(Arc::new(FixedClock::at_epoch(1_000_000_000)));

    let url = storage.url("img.png").await.unwrap();
    let (base, signed) = url.split_once('?').unwrap();
    assert_eq!(base, "https://cdn.example/assets/img.png");
    assert_eq!(token::expiry_of("k", signed).unwrap(), 1_000_000_060);

    // Re-signing the same key and expiry reproduces the token exactly.
    assert_eq!(signed, token::sign_expiry("k", 1_000_000_060).unwrap());
    assert_eq!(url, storage.url("img.png").await.unwrap());
}

#[tokio::test]
async fn test_retries_recover_within_budget() {
    let backend = MemoryBackend::new();
    let storage = ObjectStorage::new(
        StorageConfig::new("assets").with_transport(transport(4)),
        Box::new(backend.clone()),
    )
    .unwrap();
    storage.write("a.txt", b"data", None).await.unwrap();

    backend.fail_next(4);
    assert_eq!(storage.open("a.txt").await.unwrap(), b"data");
    assert_eq!(backend.get_get_count(), 5);
}

#[tokio::test]
async fn test_retries_exhausted_beyond_budget() {
    let backend = MemoryBackend::new();
    let storage = ObjectStorage::new(
        StorageConfig::new("assets").with_transport(transport(2)),
        Box::new(backend.clone()),
    )
    .unwrap();
    storage.write("a.txt", b"data", None).await.unwrap();

    backend.fail_next(3);
    match storage.open("a.txt").await {
        Err(Error::TransportExhausted { attempts, source }) => {
            assert_eq!(attempts, 3);
            assert!(source.is_transient());
        }
        other => panic!("expected TransportExhausted, got {:?}", other.map(|d| d.len())),
    }
}

#[tokio::test]
async fn test_http_backend_end_to_end_with_retries() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/assets/report.csv"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/assets/report.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string("a,b\n1,2\n"))
        .expect(1)
        .mount(&server)
        .await;

    let config = StorageConfig::new("assets")
        .with_backend(BackendKind::Http, Some(server.uri()))
        .with_transport(transport(3));
    let storage = ObjectStorage::new(config, Box::new(HttpConnector::new(server.uri()))).unwrap();

    assert_eq!(storage.open("report.csv").await.unwrap(), b"a,b\n1,2\n");
}

#[tokio::test]
async fn test_http_backend_from_config_native_url() {
    let config = StorageConfig::new("assets")
        .with_use_ssl(true)
        .with_backend(BackendKind::Http, Some("http://blobs.example".to_string()));
    let storage = ObjectStorage::from_config(config).unwrap();

    assert_eq!(
        storage.url("img.png").await.unwrap(),
        "https://blobs.example/assets/img.png"
    );
}
