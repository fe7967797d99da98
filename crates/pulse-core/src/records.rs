//! Interaction records and the post/comment aggregates derived from them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Key used in summary counts for records that have not been classified yet.
pub const UNCLASSIFIED: &str = "Unclassified";

/// Sentiment label assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
    Error,
    NotApplicable,
}

impl SentimentLabel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SentimentLabel::Positive => "Positive",
            SentimentLabel::Negative => "Negative",
            SentimentLabel::Neutral => "Neutral",
            SentimentLabel::Error => "Error",
            SentimentLabel::NotApplicable => "NotApplicable",
        }
    }

    /// `Error` and `NotApplicable` rows are picked up again by reconciliation.
    #[must_use]
    pub fn is_unresolved(self) -> bool {
        matches!(self, SentimentLabel::Error | SentimentLabel::NotApplicable)
    }
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SentimentLabel {
    type Err = String;

    /// Accepts the canonical names plus the lower-case, Spanish and `N/A`
    /// spellings classifiers are known to answer with.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().trim_matches('.').to_lowercase();
        match normalized.as_str() {
            "positive" | "positivo" | "positiva" => Ok(SentimentLabel::Positive),
            "negative" | "negativo" | "negativa" => Ok(SentimentLabel::Negative),
            "neutral" | "neutro" | "neutra" => Ok(SentimentLabel::Neutral),
            "error" => Ok(SentimentLabel::Error),
            "notapplicable" | "not_applicable" | "not applicable" | "n/a" | "na" => {
                Ok(SentimentLabel::NotApplicable)
            }
            _ => Err(format!("unknown sentiment label: {s}")),
        }
    }
}

/// One post, or one post + comment pair, as returned by a source collector.
///
/// Text fields tolerate `null`, numbers and missing keys (normalized to an
/// empty string). Any field the collector sends that is not part of the
/// known shape is kept in `extra` so the payload builder can salvage it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub platform: String,
    #[serde(
        default,
        deserialize_with = "lenient_index",
        skip_serializing_if = "Option::is_none"
    )]
    pub post_index: Option<i64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub post_author: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub post_content: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub comment_author: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub comment_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment_label: Option<SentimentLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment_explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification_cost: Option<u64>,
    #[serde(flatten, default)]
    pub extra: BTreeMap<String, Value>,
}

impl InteractionRecord {
    /// A bare post with no comment.
    #[must_use]
    pub fn post(
        platform: impl Into<String>,
        post_index: Option<i64>,
        author: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            platform: platform.into(),
            post_index,
            post_author: author.into(),
            post_content: content.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_comment(mut self, author: impl Into<String>, content: impl Into<String>) -> Self {
        self.comment_author = author.into();
        self.comment_content = content.into();
        self
    }

    #[must_use]
    pub fn with_sentiment(mut self, label: SentimentLabel) -> Self {
        self.sentiment_label = Some(label);
        self
    }

    /// Whether the record still needs (another) classification attempt.
    #[must_use]
    pub fn needs_classification(&self) -> bool {
        self.sentiment_label.is_none_or(SentimentLabel::is_unresolved)
    }

    /// Label name used in summary counts.
    #[must_use]
    pub fn label_key(&self) -> &'static str {
        self.sentiment_label.map_or(UNCLASSIFIED, SentimentLabel::as_str)
    }
}

/// Structural grouping key of a post: its index when the source provided
/// one, otherwise its content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum GroupKey {
    Index(i64),
    Content(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentEntry {
    pub author: String,
    pub content: String,
    pub sentiment: Option<SentimentLabel>,
}

/// A post with all of its interaction rows, in encounter order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostAggregate {
    pub platform: String,
    pub key: GroupKey,
    pub author: String,
    pub content: String,
    pub dominant_sentiment: Option<SentimentLabel>,
    pub comments: Vec<CommentEntry>,
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(other) => other.to_string(),
    })
}

/// Integers, integral floats and numeric strings become an index; anything
/// else (including blank strings) means "no index".
fn lenient_index<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.is_finite())
                .map(|f| {
                    #[allow(clippy::cast_possible_truncation)]
                    let i = f as i64;
                    i
                })
        }),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    })
}
