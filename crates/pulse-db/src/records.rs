//! Database operations for `interaction_records`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use pulse_core::{InteractionRecord, SentimentLabel};
use serde_json::Value;
use sqlx::PgPool;

use crate::keys::record_key;
use crate::{to_i32, DbError};

/// A row from the `interaction_records` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RecordRow {
    pub id: i64,
    pub record_key: String,
    pub ordinal: i32,
    pub platform: String,
    pub post_index: Option<i64>,
    pub post_author: String,
    pub post_content: String,
    pub comment_author: String,
    pub comment_content: String,
    pub extra: Value,
    pub sentiment_label: Option<String>,
    pub sentiment_explanation: Option<String>,
    pub classification_cost: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for InteractionRecord {
    type Error = DbError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let sentiment_label = row
            .sentiment_label
            .as_deref()
            .map(str::parse::<SentimentLabel>)
            .transpose()
            .map_err(DbError::Decode)?;

        let extra: BTreeMap<String, Value> = match row.extra {
            Value::Null => BTreeMap::new(),
            other => serde_json::from_value(other)?,
        };

        Ok(InteractionRecord {
            platform: row.platform,
            post_index: row.post_index,
            post_author: row.post_author,
            post_content: row.post_content,
            comment_author: row.comment_author,
            comment_content: row.comment_content,
            sentiment_label,
            sentiment_explanation: row.sentiment_explanation,
            classification_cost: row.classification_cost.and_then(|c| u64::try_from(c).ok()),
            extra,
        })
    }
}

/// Upsert a batch of records for a topic, keyed by [`record_key`].
///
/// Conflicting rows take the incoming values (latest write wins). Records in
/// the same batch that share a key collapse onto one row. Returns the number
/// of statements applied.
///
/// # Errors
///
/// Returns [`DbError`] if serialization or any statement fails; the
/// transaction is rolled back in that case.
pub async fn upsert_records(
    pool: &PgPool,
    topic: &str,
    records: &[InteractionRecord],
) -> Result<usize, DbError> {
    if records.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;

    for (ordinal, record) in records.iter().enumerate() {
        let extra = serde_json::to_value(&record.extra)?;
        let cost = record
            .classification_cost
            .map(|c| i64::try_from(c).unwrap_or(i64::MAX));

        sqlx::query(
            "INSERT INTO interaction_records \
                 (topic, record_key, ordinal, platform, post_index, post_author, post_content, \
                  comment_author, comment_content, extra, sentiment_label, \
                  sentiment_explanation, classification_cost) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (topic, record_key) DO UPDATE SET \
                 ordinal               = EXCLUDED.ordinal, \
                 post_author           = EXCLUDED.post_author, \
                 extra                 = EXCLUDED.extra, \
                 sentiment_label       = EXCLUDED.sentiment_label, \
                 sentiment_explanation = EXCLUDED.sentiment_explanation, \
                 classification_cost   = EXCLUDED.classification_cost, \
                 updated_at            = NOW()",
        )
        .bind(topic)
        .bind(record_key(record))
        .bind(to_i32(ordinal))
        .bind(&record.platform)
        .bind(record.post_index)
        .bind(&record.post_author)
        .bind(&record.post_content)
        .bind(&record.comment_author)
        .bind(&record.comment_content)
        .bind(extra)
        .bind(record.sentiment_label.map(SentimentLabel::as_str))
        .bind(record.sentiment_explanation.as_deref())
        .bind(cost)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    tracing::debug!(topic, count = records.len(), "interaction records upserted");
    Ok(records.len())
}

/// List all records stored for a topic in their stored order.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails, or [`DbError::Decode`] /
/// [`DbError::Serialize`] if a stored row cannot be decoded.
pub async fn list_records(pool: &PgPool, topic: &str) -> Result<Vec<InteractionRecord>, DbError> {
    let rows = sqlx::query_as::<_, RecordRow>(
        "SELECT id, record_key, ordinal, platform, post_index, post_author, post_content, \
                comment_author, comment_content, extra, sentiment_label, \
                sentiment_explanation, classification_cost, updated_at \
         FROM interaction_records \
         WHERE topic = $1 \
         ORDER BY ordinal, id",
    )
    .bind(topic)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(InteractionRecord::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(label: Option<&str>) -> RecordRow {
        RecordRow {
            id: 1,
            record_key: "k".to_string(),
            ordinal: 0,
            platform: "twitter".to_string(),
            post_index: Some(2),
            post_author: "a".to_string(),
            post_content: "post".to_string(),
            comment_author: String::new(),
            comment_content: String::new(),
            extra: serde_json::json!({ "url": "https://x.com/1" }),
            sentiment_label: label.map(ToString::to_string),
            sentiment_explanation: None,
            classification_cost: Some(17),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn row_converts_to_record() {
        let record = InteractionRecord::try_from(row(Some("Positive"))).unwrap();
        assert_eq!(record.sentiment_label, Some(SentimentLabel::Positive));
        assert_eq!(record.classification_cost, Some(17));
        assert_eq!(record.post_index, Some(2));
        assert_eq!(record.extra["url"], serde_json::json!("https://x.com/1"));
    }

    #[test]
    fn row_with_unknown_label_is_a_decode_error() {
        let err = InteractionRecord::try_from(row(Some("Meh"))).unwrap_err();
        assert!(matches!(err, DbError::Decode(_)));
    }
}
