//! End-to-end tests of the HTTP surface through `StationClient`.

use std::sync::Arc;

use station::broadcast::SubscriberRegistry;
use station::downsampler::Downsampler;
use station::server::{self, AppState};
use station::store::{MemoryStore, SampleRecord, SampleStore};
use station_shared::{Frame, Orientation, StationClient, StationError, Timestamp};
use tokio::net::TcpListener;
use tokio::sync::watch;

const T0: u64 = 1_717_200_000;

struct TestServer {
    client: StationClient,
    registry: Arc<SubscriberRegistry>,
    shutdown: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<std::io::Result<()>>,
}

async fn start_server(store: Arc<MemoryStore>) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let registry = Arc::new(SubscriberRegistry::new());
    let state = AppState {
        registry: registry.clone(),
        downsampler: Downsampler::new(store, 100),
    };
    let (shutdown, rx) = watch::channel(false);
    let handle = tokio::spawn(server::serve(listener, state, rx));

    TestServer {
        client: StationClient::new(&format!("http://{addr}")),
        registry,
        shutdown,
        handle,
    }
}

fn seeded_store(count: u64) -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    let records: Vec<_> = (0..count)
        .map(|i| SampleRecord {
            timestamp: Timestamp::new(T0 + i, 0),
            frame: Frame {
                temperature: i as f64,
                lux: 100,
                ..Default::default()
            },
            orientation: Orientation::new(0.0, 0.0, i as f64),
        })
        .collect();
    store.append_batch(&records).unwrap();
    Arc::new(store)
}

#[tokio::test]
async fn test_history_query_returns_buckets() {
    let server = start_server(seeded_store(1000)).await;

    let buckets = server
        .client
        .history(Timestamp::new(T0, 0), Timestamp::new(T0 + 1000, 0), Some(100))
        .await
        .unwrap();

    assert_eq!(buckets.len(), 100);
    assert!(buckets.iter().all(|b| b.samples == 10));
    assert!(buckets.windows(2).all(|w| w[0].start < w[1].start));
    assert_eq!(buckets[3].temperature, 34.5);
    assert_eq!(buckets[3].lux, 100.0);

    // Default bucket count comes from the server
    let buckets = server
        .client
        .history(Timestamp::new(T0, 0), Timestamp::new(T0 + 500, 0), None)
        .await
        .unwrap();
    assert_eq!(buckets.len(), 100);
    assert!(buckets.iter().all(|b| b.samples == 5));
}

#[tokio::test]
async fn test_empty_range_is_empty() {
    let server = start_server(seeded_store(10)).await;
    let t = Timestamp::new(T0 + 5, 0);

    let buckets = server.client.history(t, t, Some(0)).await.unwrap();
    assert!(buckets.is_empty());
}

#[tokio::test]
async fn test_invalid_requests_are_bad_requests() {
    let server = start_server(seeded_store(10)).await;

    for (start, end, buckets) in [
        (T0 + 10, T0, Some(5)),
        (T0, T0 + 10, Some(0)),
        (T0, T0 + 10, Some(10_001)),
    ] {
        let err = server
            .client
            .history(Timestamp::new(start, 0), Timestamp::new(end, 0), buckets)
            .await
            .unwrap_err();
        assert!(
            matches!(err, StationError::ServerError { status: 400, .. }),
            "unexpected error: {err:?}"
        );
    }
}

#[tokio::test]
async fn test_unparseable_timestamp_is_bad_request() {
    let server = start_server(seeded_store(1)).await;

    for (start, expected) in [("yesterday", "yesterday"), ("1e20", "out of range")] {
        let url = format!(
            "{}/query?start={start}&end=1717200010",
            server.client.base_url()
        );
        let response = reqwest::get(&url).await.unwrap();
        assert_eq!(response.status().as_u16(), 400, "start={start}");
        assert!(response.text().await.unwrap().contains(expected));
    }

    // The server is still answering after the rejected requests
    assert_eq!(server.client.health().await.unwrap().status, "ok");
}

#[tokio::test]
async fn test_health_and_graceful_shutdown() {
    let server = start_server(seeded_store(1)).await;

    let health = server.client.health().await.unwrap();
    assert_eq!(health.status, "ok");
    assert_eq!(health.service, "station");
    assert!(health.timestamp >= T0);

    server.registry.close_all();
    server.shutdown.send_replace(true);
    server.handle.await.unwrap().unwrap();
}
