//! RedisStore against a real server. Run with `REDIS_URL=redis://127.0.0.1/ cargo test -- --ignored`.

use ai_gateway_rust::cache::{CacheConfig, ResponseCache};
use ai_gateway_rust::store::{RedisStore, Store};
use ai_gateway_rust::utils::now_ms;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

async fn connect(test: &str) -> Option<RedisStore> {
    let url = match std::env::var("REDIS_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("skipping {test}: REDIS_URL not set");
            return None;
        }
    };
    match RedisStore::connect(&url, Duration::from_secs(2)).await {
        Ok(store) => Some(store),
        Err(e) => {
            eprintln!("skipping {test}: {e}");
            None
        }
    }
}

fn unique(name: &str) -> String {
    format!("ai-gateway-test:{}:{}", uuid::Uuid::new_v4(), name)
}

#[tokio::test]
#[ignore = "requires REDIS_URL and a running Redis"]
async fn test_sliding_window_counts_and_expires() {
    let Some(store) = connect("test_sliding_window_counts_and_expires").await else {
        return;
    };
    let key = unique("rate_limit:user:alice");
    let t0 = now_ms();

    assert_eq!(store.sliding_window_hit(&key, "a", t0, 1_000, 5_000).await.unwrap(), 1);
    assert_eq!(store.sliding_window_hit(&key, "b", t0 + 10, 1_000, 5_000).await.unwrap(), 2);
    assert_eq!(store.sliding_window_hit(&key, "c", t0 + 500, 1_000, 5_000).await.unwrap(), 3);
    // a and b fall out of the window
    assert_eq!(store.sliding_window_hit(&key, "d", t0 + 1_200, 1_000, 5_000).await.unwrap(), 2);

    store.window_clear(&key).await.unwrap();
    assert_eq!(store.sliding_window_hit(&key, "e", t0 + 1_300, 1_000, 5_000).await.unwrap(), 1);
    store.window_clear(&key).await.unwrap();
}

#[tokio::test]
#[ignore = "requires REDIS_URL and a running Redis"]
async fn test_concurrent_hits_are_atomic() {
    let Some(store) = connect("test_concurrent_hits_are_atomic").await else {
        return;
    };
    let key = unique("rate_limit:user:bob");
    let now = now_ms();

    let hits = futures::future::join_all((0..20).map(|i| {
        let store = store.clone();
        let key = key.clone();
        async move {
            store
                .sliding_window_hit(&key, &format!("m{i}"), now, 60_000, 61_000)
                .await
                .unwrap()
        }
    }))
    .await;

    let mut counts = hits;
    counts.sort_unstable();
    assert_eq!(counts, (1..=20).collect::<Vec<u64>>());
    store.window_clear(&key).await.unwrap();
}

#[tokio::test]
#[ignore = "requires REDIS_URL and a running Redis"]
async fn test_cache_round_trip_between_instances() {
    let Some(store) = connect("test_cache_round_trip_between_instances").await else {
        return;
    };
    let store: Arc<dyn Store> = Arc::new(store);
    let prefix = Some(unique("gw"));
    let config = CacheConfig::new().with_key_prefix(prefix);
    let writer: ResponseCache = ResponseCache::with_store(config.clone(), Arc::clone(&store));
    let reader: ResponseCache = ResponseCache::with_store(config, Arc::clone(&store));

    // 1.5s must not be truncated to 1s in Redis
    writer
        .set("fp", json!({"insight": "pipeline up 12%"}), Some(Duration::from_millis(1_500)))
        .await;
    tokio::time::sleep(Duration::from_millis(1_200)).await;

    assert_eq!(reader.get("fp").await, Some(json!({"insight": "pipeline up 12%"})));
    assert_eq!(reader.get_stats().store_hits, 1);
    assert!(writer.delete("fp").await);
}
