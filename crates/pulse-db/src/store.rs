//! The persistence contract used by the orchestrator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulse_core::{
    AnalysisReport, ClassificationStatus, HistoryEntry, InteractionRecord, Job, PostAggregate,
    StageStatus,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{analyses, jobs, posts, records, DbError};

/// A stored report plus the time it was last written.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredAnalysis {
    pub report: AnalysisReport,
    pub updated_at: DateTime<Utc>,
}

/// Idempotent storage for jobs, records, post aggregates and reports.
///
/// Upserts are keyed by natural keys, so writing the same input twice leaves
/// exactly one copy with the later timestamp. Topic lookups try an exact
/// match first, then a case-insensitive one.
#[async_trait]
pub trait HarvestStore: Send + Sync {
    /// Store a fresh job, replacing any previous job for the same topic.
    async fn create_job(&self, job: &Job) -> Result<(), DbError>;

    async fn get_job(&self, topic: &str) -> Result<Option<Job>, DbError>;

    /// Move one source forward. Regressions are rejected with
    /// [`DbError::InvalidStatusTransition`].
    async fn update_source_status(
        &self,
        job_id: Uuid,
        source: &str,
        status: StageStatus,
    ) -> Result<(), DbError>;

    async fn update_classification_status(
        &self,
        job_id: Uuid,
        status: ClassificationStatus,
    ) -> Result<(), DbError>;

    async fn mark_job_complete(&self, job_id: Uuid) -> Result<(), DbError>;

    async fn upsert_records(
        &self,
        topic: &str,
        records: &[InteractionRecord],
    ) -> Result<usize, DbError>;

    async fn list_records(&self, topic: &str) -> Result<Vec<InteractionRecord>, DbError>;

    async fn upsert_posts(&self, topic: &str, posts: &[PostAggregate]) -> Result<usize, DbError>;

    async fn list_posts(&self, topic: &str) -> Result<Vec<PostAggregate>, DbError>;

    async fn upsert_analysis(
        &self,
        topic: &str,
        report: &AnalysisReport,
    ) -> Result<DateTime<Utc>, DbError>;

    async fn get_analysis(&self, topic: &str) -> Result<Option<StoredAnalysis>, DbError>;

    /// All stored reports, most recently updated first.
    async fn get_history(&self) -> Result<Vec<HistoryEntry>, DbError>;

    /// Remove every row for `topic`. Returns `true` if anything was deleted.
    async fn delete_topic(&self, topic: &str) -> Result<bool, DbError>;
}

/// [`HarvestStore`] backed by a Postgres pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl HarvestStore for PgStore {
    async fn create_job(&self, job: &Job) -> Result<(), DbError> {
        jobs::create_job(&self.pool, job).await
    }

    async fn get_job(&self, topic: &str) -> Result<Option<Job>, DbError> {
        jobs::get_job(&self.pool, topic).await
    }

    async fn update_source_status(
        &self,
        job_id: Uuid,
        source: &str,
        status: StageStatus,
    ) -> Result<(), DbError> {
        jobs::update_source_status(&self.pool, job_id, source, status).await
    }

    async fn update_classification_status(
        &self,
        job_id: Uuid,
        status: ClassificationStatus,
    ) -> Result<(), DbError> {
        jobs::update_classification_status(&self.pool, job_id, status).await
    }

    async fn mark_job_complete(&self, job_id: Uuid) -> Result<(), DbError> {
        jobs::mark_job_complete(&self.pool, job_id).await
    }

    async fn upsert_records(
        &self,
        topic: &str,
        records: &[InteractionRecord],
    ) -> Result<usize, DbError> {
        records::upsert_records(&self.pool, topic, records).await
    }

    async fn list_records(&self, topic: &str) -> Result<Vec<InteractionRecord>, DbError> {
        records::list_records(&self.pool, topic).await
    }

    async fn upsert_posts(&self, topic: &str, posts: &[PostAggregate]) -> Result<usize, DbError> {
        posts::upsert_posts(&self.pool, topic, posts).await
    }

    async fn list_posts(&self, topic: &str) -> Result<Vec<PostAggregate>, DbError> {
        posts::list_posts(&self.pool, topic).await
    }

    async fn upsert_analysis(
        &self,
        topic: &str,
        report: &AnalysisReport,
    ) -> Result<DateTime<Utc>, DbError> {
        analyses::upsert_analysis(&self.pool, topic, report).await
    }

    async fn get_analysis(&self, topic: &str) -> Result<Option<StoredAnalysis>, DbError> {
        analyses::get_analysis(&self.pool, topic).await
    }

    async fn get_history(&self) -> Result<Vec<HistoryEntry>, DbError> {
        analyses::get_history(&self.pool).await
    }

    async fn delete_topic(&self, topic: &str) -> Result<bool, DbError> {
        analyses::delete_topic(&self.pool, topic).await
    }
}
