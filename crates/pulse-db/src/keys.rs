//! Natural keys used for idempotent upserts.

use pulse_core::{GroupKey, InteractionRecord, PostAggregate};
use sha2::{Digest, Sha256};

/// Stable identity of an interaction record within a topic.
///
/// Built from the structural fields only, so re-classifying a record maps
/// onto the same row.
#[must_use]
pub fn record_key(record: &InteractionRecord) -> String {
    let input = format!(
        "{}\x00{}\x00{}\x00{}\x00{}",
        record.platform.trim().to_lowercase(),
        record
            .post_index
            .map(|i| i.to_string())
            .unwrap_or_default(),
        record.post_content.trim(),
        record.comment_author.trim(),
        record.comment_content.trim(),
    );
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

/// Content signature of a post. Posts without content fall back to their
/// structural group key so they do not all collapse onto one row.
#[must_use]
pub fn content_signature(post: &PostAggregate) -> String {
    let content = post.content.trim();
    let input = if content.is_empty() {
        match &post.key {
            GroupKey::Index(i) => format!("index\x00{i}"),
            GroupKey::Content(c) => format!("content\x00{}", c.trim()),
        }
    } else {
        format!("content\x00{content}")
    };
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::SentimentLabel;

    fn post(key: GroupKey, content: &str) -> PostAggregate {
        PostAggregate {
            platform: "twitter".to_string(),
            key,
            author: "a".to_string(),
            content: content.to_string(),
            dominant_sentiment: None,
            comments: vec![],
        }
    }

    #[test]
    fn record_key_ignores_sentiment() {
        let plain =
            InteractionRecord::post("Twitter", Some(1), "a", "hello").with_comment("b", "hi");
        let labelled = plain.clone().with_sentiment(SentimentLabel::Positive);
        assert_eq!(record_key(&plain), record_key(&labelled));
    }

    #[test]
    fn record_key_distinguishes_comments() {
        let a = InteractionRecord::post("x", Some(1), "a", "hello").with_comment("b", "hi");
        let b = InteractionRecord::post("x", Some(1), "a", "hello").with_comment("c", "hi");
        assert_ne!(record_key(&a), record_key(&b));
    }

    #[test]
    fn record_key_is_hex_sha256() {
        let key = record_key(&InteractionRecord::default());
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signature_uses_content_when_present() {
        assert_eq!(
            content_signature(&post(GroupKey::Index(1), "same")),
            content_signature(&post(GroupKey::Index(2), "same"))
        );
    }

    #[test]
    fn signature_falls_back_to_group_key_for_empty_content() {
        assert_ne!(
            content_signature(&post(GroupKey::Index(1), "")),
            content_signature(&post(GroupKey::Index(2), ""))
        );
    }
}
