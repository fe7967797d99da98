//! Database operations for `posts`.

use chrono::{DateTime, Utc};
use pulse_core::{CommentEntry, GroupKey, PostAggregate, SentimentLabel};
use serde_json::Value;
use sqlx::PgPool;

use crate::keys::content_signature;
use crate::{to_i32, DbError};

/// A row from the `posts` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PostRow {
    pub id: i64,
    pub platform: String,
    pub content_key: String,
    pub group_key: Value,
    pub author: String,
    pub content: String,
    pub dominant_sentiment: Option<String>,
    pub comments: Value,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PostRow> for PostAggregate {
    type Error = DbError;

    fn try_from(row: PostRow) -> Result<Self, Self::Error> {
        let key: GroupKey = serde_json::from_value(row.group_key)?;
        let comments: Vec<CommentEntry> = serde_json::from_value(row.comments)?;
        let dominant_sentiment = row
            .dominant_sentiment
            .as_deref()
            .map(str::parse::<SentimentLabel>)
            .transpose()
            .map_err(DbError::Decode)?;

        Ok(PostAggregate {
            platform: row.platform,
            key,
            author: row.author,
            content: row.content,
            dominant_sentiment,
            comments,
        })
    }
}

/// Upsert post aggregates for a topic.
///
/// Natural key: `(topic, platform, content signature)`. Existing rows are
/// overwritten and their `updated_at` refreshed. Returns the number of
/// aggregates written.
///
/// # Errors
///
/// Returns [`DbError`] if serialization or any statement fails; the
/// transaction is rolled back in that case.
pub async fn upsert_posts(
    pool: &PgPool,
    topic: &str,
    posts: &[PostAggregate],
) -> Result<usize, DbError> {
    if posts.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;

    for (ordinal, post) in posts.iter().enumerate() {
        sqlx::query(
            "INSERT INTO posts \
                 (topic, platform, content_key, ordinal, group_key, author, content, \
                  dominant_sentiment, comments) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (topic, platform, content_key) DO UPDATE SET \
                 ordinal            = EXCLUDED.ordinal, \
                 group_key          = EXCLUDED.group_key, \
                 author             = EXCLUDED.author, \
                 content            = EXCLUDED.content, \
                 dominant_sentiment = EXCLUDED.dominant_sentiment, \
                 comments           = EXCLUDED.comments, \
                 updated_at         = NOW()",
        )
        .bind(topic)
        .bind(&post.platform)
        .bind(content_signature(post))
        .bind(to_i32(ordinal))
        .bind(serde_json::to_value(&post.key)?)
        .bind(&post.author)
        .bind(&post.content)
        .bind(post.dominant_sentiment.map(SentimentLabel::as_str))
        .bind(serde_json::to_value(&post.comments)?)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    tracing::debug!(topic, count = posts.len(), "posts upserted");
    Ok(posts.len())
}

/// List stored post aggregates for a topic.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a stored row cannot be decoded.
pub async fn list_posts(pool: &PgPool, topic: &str) -> Result<Vec<PostAggregate>, DbError> {
    let rows = sqlx::query_as::<_, PostRow>(
        "SELECT id, platform, content_key, group_key, author, content, \
                dominant_sentiment, comments, updated_at \
         FROM posts \
         WHERE topic = $1 \
         ORDER BY ordinal, id",
    )
    .bind(topic)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(PostAggregate::try_from).collect()
}
