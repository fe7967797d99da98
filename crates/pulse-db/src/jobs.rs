//! Database operations for `jobs` and `job_sources`.
//!
//! Each writer owns a disjoint set of columns: the collection tier writes
//! one `job_sources` row per source, the classification tier writes
//! `jobs.classification_status`. Every transition is a single conditional
//! `UPDATE`, so statuses can only move forward.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use pulse_core::{ClassificationStatus, Job, StageStatus};
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `jobs` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobRow {
    pub job_id: Uuid,
    pub topic: String,
    pub target_count: i32,
    pub classification_status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A row from the `job_sources` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobSourceRow {
    pub source: String,
    pub status: String,
    pub updated_at: DateTime<Utc>,
}

const STATUS_RANK_SQL: &str =
    "(CASE status WHEN 'pending' THEN 0 WHEN 'running' THEN 1 ELSE 2 END)";

const CLASSIFICATION_RANK_SQL: &str =
    "(CASE classification_status WHEN 'pending' THEN 0 WHEN 'running' THEN 1 ELSE 2 END)";

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Create the job record for a topic, replacing any previous job for it.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails; the transaction is
/// rolled back in that case.
pub async fn create_job(pool: &PgPool, job: &Job) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM jobs WHERE topic = $1")
        .bind(&job.topic)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "INSERT INTO jobs \
             (job_id, topic, target_count, classification_status, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $5)",
    )
    .bind(job.id)
    .bind(&job.topic)
    .bind(i32::try_from(job.target_count).unwrap_or(i32::MAX))
    .bind(job.classification.as_str())
    .bind(job.created_at)
    .execute(&mut *tx)
    .await?;

    for (source, status) in &job.sources {
        sqlx::query(
            "INSERT INTO job_sources (job_id, source, status, updated_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(job.id)
        .bind(source)
        .bind(status.as_str())
        .bind(job.created_at)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    tracing::debug!(
        topic = %job.topic,
        job_id = %job.id,
        sources = job.sources.len(),
        "job created"
    );
    Ok(())
}

/// Fetch the job for a topic, falling back to a case-insensitive match.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if a query fails, or [`DbError::Decode`] if a
/// stored status is not a known value.
pub async fn get_job(pool: &PgPool, topic: &str) -> Result<Option<Job>, DbError> {
    let select = "SELECT job_id, topic, target_count, classification_status, \
                         created_at, updated_at, completed_at \
                  FROM jobs";

    let mut row = sqlx::query_as::<_, JobRow>(&format!("{select} WHERE topic = $1"))
        .bind(topic)
        .fetch_optional(pool)
        .await?;

    if row.is_none() {
        row = sqlx::query_as::<_, JobRow>(&format!(
            "{select} WHERE lower(topic) = lower($1) ORDER BY updated_at DESC LIMIT 1"
        ))
        .bind(topic)
        .fetch_optional(pool)
        .await?;
    }

    let Some(row) = row else {
        return Ok(None);
    };

    let sources = sqlx::query_as::<_, JobSourceRow>(
        "SELECT source, status, updated_at FROM job_sources WHERE job_id = $1 ORDER BY source",
    )
    .bind(row.job_id)
    .fetch_all(pool)
    .await?;

    job_from_rows(row, sources).map(Some)
}

/// Move one source of a job forward.
///
/// # Errors
///
/// Returns [`DbError::InvalidStatusTransition`] if the source is already at
/// or past `status`, [`DbError::NotFound`] if the job/source does not
/// exist, or [`DbError::Sqlx`] if a query fails.
pub async fn update_source_status(
    pool: &PgPool,
    job_id: Uuid,
    source: &str,
    status: StageStatus,
) -> Result<(), DbError> {
    let result = sqlx::query(&format!(
        "UPDATE job_sources SET status = $3, updated_at = NOW() \
         WHERE job_id = $1 AND source = $2 AND {STATUS_RANK_SQL} < $4"
    ))
    .bind(job_id)
    .bind(source)
    .bind(status.as_str())
    .bind(status.rank())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        let current: Option<String> = sqlx::query_scalar(
            "SELECT status FROM job_sources WHERE job_id = $1 AND source = $2",
        )
        .bind(job_id)
        .bind(source)
        .fetch_optional(pool)
        .await?;

        return Err(match current {
            None => DbError::NotFound,
            Some(from) => DbError::InvalidStatusTransition {
                job_id,
                field: format!("source '{source}'"),
                from,
                to: status.to_string(),
            },
        });
    }

    Ok(())
}

/// Move the classification stage of a job forward.
///
/// # Errors
///
/// Same contract as [`update_source_status`].
pub async fn update_classification_status(
    pool: &PgPool,
    job_id: Uuid,
    status: ClassificationStatus,
) -> Result<(), DbError> {
    let result = sqlx::query(&format!(
        "UPDATE jobs SET classification_status = $2, updated_at = NOW() \
         WHERE job_id = $1 AND {CLASSIFICATION_RANK_SQL} < $3"
    ))
    .bind(job_id)
    .bind(status.as_str())
    .bind(status.rank())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        let current: Option<String> =
            sqlx::query_scalar("SELECT classification_status FROM jobs WHERE job_id = $1")
                .bind(job_id)
                .fetch_optional(pool)
                .await?;

        return Err(match current {
            None => DbError::NotFound,
            Some(from) => DbError::InvalidStatusTransition {
                job_id,
                field: "classification".to_string(),
                from,
                to: status.to_string(),
            },
        });
    }

    Ok(())
}

/// Stamp `completed_at` once the report is stored. Idempotent.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the job does not exist, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn mark_job_complete(pool: &PgPool, job_id: Uuid) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE jobs SET completed_at = COALESCE(completed_at, NOW()), updated_at = NOW() \
         WHERE job_id = $1",
    )
    .bind(job_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}

fn job_from_rows(row: JobRow, sources: Vec<JobSourceRow>) -> Result<Job, DbError> {
    let classification = row
        .classification_status
        .parse::<ClassificationStatus>()
        .map_err(DbError::Decode)?;

    let mut updated_at = row.updated_at;
    let mut statuses = BTreeMap::new();
    for source in sources {
        let status = source.status.parse::<StageStatus>().map_err(DbError::Decode)?;
        updated_at = updated_at.max(source.updated_at);
        statuses.insert(source.source, status);
    }

    Ok(Job {
        id: row.job_id,
        topic: row.topic,
        target_count: u32::try_from(row.target_count).unwrap_or(0),
        sources: statuses,
        classification,
        created_at: row.created_at,
        updated_at,
        completed_at: row.completed_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_row(status: &str) -> JobRow {
        JobRow {
            job_id: Uuid::new_v4(),
            topic: "T".to_string(),
            target_count: 10,
            classification_status: status.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        }
    }

    #[test]
    fn job_from_rows_takes_latest_timestamp() {
        let row = job_row("running");
        let later = row.updated_at + chrono::Duration::seconds(30);
        let sources = vec![
            JobSourceRow {
                source: "a".to_string(),
                status: "completed".to_string(),
                updated_at: later,
            },
            JobSourceRow {
                source: "b".to_string(),
                status: "failed".to_string(),
                updated_at: row.updated_at,
            },
        ];
        let job = job_from_rows(row, sources).unwrap();
        assert_eq!(job.updated_at, later);
        assert_eq!(job.sources["a"], StageStatus::Completed);
        assert_eq!(job.sources["b"], StageStatus::Failed);
        assert_eq!(job.classification, ClassificationStatus::Running);
        assert!(job.collection_finished());
    }

    #[test]
    fn job_from_rows_rejects_unknown_status() {
        let err = job_from_rows(job_row("exploded"), vec![]).unwrap_err();
        assert!(matches!(err, DbError::Decode(_)));
    }
}
