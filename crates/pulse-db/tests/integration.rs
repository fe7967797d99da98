//! Offline tests for pulse-db pool configuration and the in-memory store.
//! These tests do not require a live database connection.

use std::path::PathBuf;
use std::sync::Arc;

use pulse_core::{AppConfig, Environment, InteractionRecord, Job, SentimentLabel, StageStatus};
use pulse_db::{record_key, HarvestStore, MemoryStore, PoolConfig};

fn app_config() -> AppConfig {
    AppConfig {
        database_url: "postgres://example".to_string(),
        env: Environment::Test,
        log_level: "info".to_string(),
        sources_path: PathBuf::from("./config/sources.yaml"),
        db_max_connections: 42,
        db_min_connections: 7,
        db_acquire_timeout_secs: 9,
        classifier_url: "https://api.deepseek.com".to_string(),
        classifier_model: "deepseek-chat".to_string(),
        classifier_api_key: None,
        classifier_timeout_secs: 60,
        classify_concurrency: 60,
        source_timeout_secs: 1800,
        default_target_count: 10,
    }
}

#[test]
fn pool_config_from_app_config_uses_core_values() {
    let pool_config = PoolConfig::from_app_config(&app_config());
    assert_eq!(pool_config.max_connections, 42);
    assert_eq!(pool_config.min_connections, 7);
    assert_eq!(pool_config.acquire_timeout_secs, 9);
}

#[test]
fn record_key_is_case_insensitive_on_platform() {
    let a = InteractionRecord::post("Twitter", Some(1), "x", "hello");
    let b = InteractionRecord::post("twitter ", Some(1), "x", "hello");
    assert_eq!(record_key(&a), record_key(&b));
}

#[tokio::test]
async fn concurrent_writers_on_disjoint_sources_do_not_clobber() {
    let store = Arc::new(MemoryStore::new());
    let sources: Vec<String> = (0..8).map(|i| format!("source-{i}")).collect();
    let job = Job::new("T", 10, sources.clone());
    store.create_job(&job).await.unwrap();

    let handles: Vec<_> = sources
        .iter()
        .cloned()
        .map(|source| {
            let store = Arc::clone(&store);
            let job_id = job.id;
            tokio::spawn(async move {
                store
                    .update_source_status(job_id, &source, StageStatus::Running)
                    .await
                    .unwrap();
                store
                    .update_source_status(job_id, &source, StageStatus::Completed)
                    .await
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let stored = store.get_job("T").await.unwrap().unwrap();
    assert!(stored
        .sources
        .values()
        .all(|status| *status == StageStatus::Completed));
}

#[tokio::test]
async fn trait_object_store_round_trips_records() {
    let store: Arc<dyn HarvestStore> = Arc::new(MemoryStore::new());
    let records = vec![
        InteractionRecord::post("reddit", Some(0), "op", "post")
            .with_sentiment(SentimentLabel::Neutral),
        InteractionRecord::post("reddit", Some(0), "op", "post")
            .with_comment("c", "great")
            .with_sentiment(SentimentLabel::Positive),
    ];

    assert_eq!(store.upsert_records("T", &records).await.unwrap(), 2);
    assert_eq!(store.list_records("T").await.unwrap(), records);
}
