//! Live integration tests for pulse-db using `#[sqlx::test]`.
//!
//! Each test gets a fresh, fully-migrated Postgres database spun up by the
//! sqlx test harness. They need `DATABASE_URL` and are ignored by default:
//! `cargo test -p pulse-db -- --ignored`.

use std::collections::BTreeMap;

use chrono::Utc;
use pulse_core::{
    AnalysisReport, ClassificationStatus, CommentEntry, GroupKey, InteractionRecord, Job,
    PostAggregate, SentimentLabel, SentimentSummary, StageStatus, TimingMetrics,
};
use pulse_db::{DbError, HarvestStore, PgStore};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn make_report(topic: &str, total: usize) -> AnalysisReport {
    AnalysisReport {
        topic: topic.to_string(),
        total_count: total,
        summary: SentimentSummary {
            total,
            ..SentimentSummary::default()
        },
        narrative_text: Some("steady".to_string()),
        timing: TimingMetrics::default(),
        source_counts: BTreeMap::from([("twitter".to_string(), total)]),
        classification_cost: 42,
        data_preview: vec![],
        generated_at: Utc::now(),
    }
}

fn make_post(content: &str) -> PostAggregate {
    PostAggregate {
        platform: "reddit".to_string(),
        key: GroupKey::Index(1),
        author: "op".to_string(),
        content: content.to_string(),
        dominant_sentiment: Some(SentimentLabel::Neutral),
        comments: vec![CommentEntry {
            author: "c".to_string(),
            content: "meh".to_string(),
            sentiment: Some(SentimentLabel::Neutral),
        }],
    }
}

// ---------------------------------------------------------------------------
// Section 1: Job lifecycle
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn job_lifecycle_moves_forward_only(pool: sqlx::PgPool) {
    let store = PgStore::new(pool);
    let job = Job::new("Rust", 10, ["twitter", "reddit"]);
    store.create_job(&job).await.expect("create_job failed");

    store
        .update_source_status(job.id, "twitter", StageStatus::Running)
        .await
        .expect("pending -> running");
    store
        .update_source_status(job.id, "twitter", StageStatus::Completed)
        .await
        .expect("running -> completed");
    store
        .update_source_status(job.id, "reddit", StageStatus::Failed)
        .await
        .expect("pending -> failed");

    let err = store
        .update_source_status(job.id, "twitter", StageStatus::Running)
        .await
        .expect_err("completed -> running must be rejected");
    assert!(matches!(err, DbError::InvalidStatusTransition { .. }));

    store
        .update_classification_status(job.id, ClassificationStatus::Running)
        .await
        .expect("classification running");
    store
        .update_classification_status(job.id, ClassificationStatus::Completed)
        .await
        .expect("classification completed");
    store
        .mark_job_complete(job.id)
        .await
        .expect("mark_job_complete");

    let stored = store
        .get_job("rust")
        .await
        .expect("get_job failed")
        .expect("job exists");
    assert_eq!(stored.id, job.id);
    assert_eq!(stored.sources["twitter"], StageStatus::Completed);
    assert_eq!(stored.sources["reddit"], StageStatus::Failed);
    assert_eq!(stored.classification, ClassificationStatus::Completed);
    assert!(stored.is_complete());
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn unknown_job_is_not_found(pool: sqlx::PgPool) {
    let store = PgStore::new(pool);
    let err = store
        .update_source_status(uuid::Uuid::new_v4(), "twitter", StageStatus::Running)
        .await
        .expect_err("no such job");
    assert!(matches!(err, DbError::NotFound));
}

// ---------------------------------------------------------------------------
// Section 2: Idempotent upserts
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn record_upsert_is_idempotent(pool: sqlx::PgPool) {
    let store = PgStore::new(pool);
    let record = InteractionRecord::post("twitter", Some(3), "a", "launch day")
        .with_comment("b", "love it");

    store.upsert_records("Rust", &[record.clone()]).await.unwrap();
    store
        .upsert_records(
            "Rust",
            &[record.clone().with_sentiment(SentimentLabel::Positive)],
        )
        .await
        .unwrap();

    let stored = store.list_records("Rust").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].sentiment_label, Some(SentimentLabel::Positive));
    assert_eq!(stored[0].comment_content, "love it");
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn post_upsert_is_idempotent(pool: sqlx::PgPool) {
    let store = PgStore::new(pool);
    let posts = vec![make_post("first"), make_post("second")];

    store.upsert_posts("Rust", &posts).await.unwrap();
    store.upsert_posts("Rust", &posts).await.unwrap();

    assert_eq!(store.list_posts("Rust").await.unwrap(), posts);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn analysis_upsert_keeps_latest_document(pool: sqlx::PgPool) {
    let store = PgStore::new(pool);
    let first = store
        .upsert_analysis("Rust", &make_report("Rust", 1))
        .await
        .unwrap();
    let second = store
        .upsert_analysis("Rust", &make_report("Rust", 2))
        .await
        .unwrap();
    assert!(second >= first);

    let stored = store.get_analysis("RUST").await.unwrap().expect("fallback");
    assert_eq!(stored.report.total_count, 2);
    assert_eq!(stored.updated_at, second);

    let history = store.get_history().await.unwrap();
    assert_eq!(history.len(), 1);
}

// ---------------------------------------------------------------------------
// Section 3: Delete
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn delete_topic_cascades(pool: sqlx::PgPool) {
    let store = PgStore::new(pool.clone());
    let job = Job::new("Rust", 10, ["twitter"]);
    store.create_job(&job).await.unwrap();
    store
        .upsert_records("Rust", &[InteractionRecord::post("twitter", None, "a", "x")])
        .await
        .unwrap();
    store.upsert_posts("Rust", &[make_post("x")]).await.unwrap();
    store
        .upsert_analysis("Rust", &make_report("Rust", 1))
        .await
        .unwrap();

    assert!(store.delete_topic("Rust").await.unwrap());

    let remaining_sources: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_sources")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining_sources, 0);
    assert!(store.get_job("Rust").await.unwrap().is_none());
    assert!(store.get_analysis("Rust").await.unwrap().is_none());
    assert!(!store.delete_topic("Rust").await.unwrap());
}
