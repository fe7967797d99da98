//! Database operations for `analyses` and topic-wide deletes.

use chrono::{DateTime, Utc};
use pulse_core::{AnalysisReport, HistoryEntry};
use serde_json::Value;
use sqlx::PgPool;

use crate::store::StoredAnalysis;
use crate::{to_i32, DbError};

/// A row from the `analyses` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AnalysisRow {
    pub topic: String,
    pub total_count: i32,
    pub report: Value,
    pub updated_at: DateTime<Utc>,
}

/// Insert or overwrite the report for `topic`; returns the stored timestamp.
///
/// # Errors
///
/// Returns [`DbError`] if serialization or the upsert fails.
pub async fn upsert_analysis(
    pool: &PgPool,
    topic: &str,
    report: &AnalysisReport,
) -> Result<DateTime<Utc>, DbError> {
    let document = serde_json::to_value(report)?;

    let updated_at: DateTime<Utc> = sqlx::query_scalar(
        "INSERT INTO analyses (topic, total_count, report, updated_at) \
         VALUES ($1, $2, $3, NOW()) \
         ON CONFLICT (topic) DO UPDATE SET \
             total_count = EXCLUDED.total_count, \
             report      = EXCLUDED.report, \
             updated_at  = NOW() \
         RETURNING updated_at",
    )
    .bind(topic)
    .bind(to_i32(report.total_count))
    .bind(document)
    .fetch_one(pool)
    .await?;

    Ok(updated_at)
}

/// Fetch the report for a topic. An exact match wins; otherwise the most
/// recently updated case-insensitive match is returned.
///
/// # Errors
///
/// Returns [`DbError`] if a query fails or the stored document is malformed.
pub async fn get_analysis(pool: &PgPool, topic: &str) -> Result<Option<StoredAnalysis>, DbError> {
    let mut row = sqlx::query_as::<_, AnalysisRow>(
        "SELECT topic, total_count, report, updated_at FROM analyses WHERE topic = $1",
    )
    .bind(topic)
    .fetch_optional(pool)
    .await?;

    if row.is_none() {
        row = sqlx::query_as::<_, AnalysisRow>(
            "SELECT topic, total_count, report, updated_at FROM analyses \
             WHERE lower(topic) = lower($1) \
             ORDER BY updated_at DESC \
             LIMIT 1",
        )
        .bind(topic)
        .fetch_optional(pool)
        .await?;
    }

    row.map(|r| {
        Ok(StoredAnalysis {
            report: serde_json::from_value(r.report)?,
            updated_at: r.updated_at,
        })
    })
    .transpose()
}

/// List every stored analysis, most recent first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_history(pool: &PgPool) -> Result<Vec<HistoryEntry>, DbError> {
    let rows = sqlx::query_as::<_, (String, DateTime<Utc>, i32)>(
        "SELECT topic, updated_at, total_count FROM analyses ORDER BY updated_at DESC, topic",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(topic, updated_at, total)| HistoryEntry {
            topic,
            updated_at,
            total: usize::try_from(total).unwrap_or(0),
        })
        .collect())
}

/// Delete everything stored for a topic: analysis, posts, records and job.
///
/// Returns `true` if any row was removed.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails; nothing is deleted in
/// that case.
pub async fn delete_topic(pool: &PgPool, topic: &str) -> Result<bool, DbError> {
    let mut tx = pool.begin().await?;
    let mut removed = 0u64;

    for statement in [
        "DELETE FROM analyses WHERE topic = $1",
        "DELETE FROM posts WHERE topic = $1",
        "DELETE FROM interaction_records WHERE topic = $1",
        "DELETE FROM jobs WHERE topic = $1",
    ] {
        removed += sqlx::query(statement)
            .bind(topic)
            .execute(&mut *tx)
            .await?
            .rows_affected();
    }

    tx.commit().await?;
    tracing::debug!(topic, rows = removed, "topic rows deleted");
    Ok(removed > 0)
}
