//! Classification stage.
//!
//! Fans records out to a [`Classifier`] with bounded concurrency. The stage
//! is total: every input row comes back, in its original position, with a
//! label. Errors, bad answers and panics become `Error` labels on that row.

use std::panic::AssertUnwindSafe;

use futures::{stream, FutureExt, StreamExt};
use pulse_core::{InteractionRecord, SentimentLabel};
use serde_json::Value;

use crate::classifier::{Classification, Classifier};

/// Upper bound on the text sent to the classifier, in characters.
pub const MAX_PAYLOAD_CHARS: usize = 1000;

/// Payloads shorter than this are treated as unusable and salvaged.
const MIN_PAYLOAD_CHARS: usize = 5;

const FILLER_TOKENS: [&str; 7] = ["nan", "none", "null", "post", "comment", "platform", "n/a"];

#[derive(Debug, Clone, Default)]
pub struct ClassifyOutcome {
    pub records: Vec<InteractionRecord>,
    /// Records that went to the classifier (or were skipped as empty).
    pub classified: usize,
    /// Sum of the costs reported for this batch.
    pub cost: u64,
}

impl ClassifyOutcome {
    #[must_use]
    pub fn count(&self, label: SentimentLabel) -> usize {
        self.records
            .iter()
            .filter(|r| r.sentiment_label == Some(label))
            .count()
    }
}

/// Build the text sent to the classifier for one record.
///
/// Uses `"Post: … | Comment: …"` when either primary field has text,
/// otherwise a flat `content` field. Unusable results (too short or a
/// `nan` placeholder) are replaced by every non-filler scalar field joined
/// with `" | "`. The result is capped at [`MAX_PAYLOAD_CHARS`] and may be
/// empty.
#[must_use]
pub fn build_payload(record: &InteractionRecord) -> String {
    let post = record.post_content.trim();
    let comment = record.comment_content.trim();

    let mut payload = if post.is_empty() && comment.is_empty() {
        record
            .extra
            .get("content")
            .and_then(scalar_text)
            .unwrap_or_default()
    } else {
        format!("Post: {post} | Comment: {comment}")
    };

    if payload.chars().count() < MIN_PAYLOAD_CHARS || has_nan_token(&payload) {
        payload = salvage(record);
    }

    payload.chars().take(MAX_PAYLOAD_CHARS).collect()
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn has_nan_token(text: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric())
        .any(|token| token.eq_ignore_ascii_case("nan"))
}

fn is_filler(text: &str, platform: &str) -> bool {
    let lowered = text.trim().to_lowercase();
    lowered.is_empty()
        || FILLER_TOKENS.contains(&lowered.as_str())
        || lowered == platform.trim().to_lowercase()
}

/// Join every meaningful scalar field of the record.
fn salvage(record: &InteractionRecord) -> String {
    let fixed = [
        &record.post_author,
        &record.post_content,
        &record.comment_author,
        &record.comment_content,
    ]
    .into_iter()
    .map(|s| s.trim().to_string());
    let extra = record.extra.values().filter_map(scalar_text);

    fixed
        .chain(extra)
        .filter(|text| !is_filler(text, &record.platform))
        .collect::<Vec<_>>()
        .join(" | ")
}

async fn classify_one(classifier: &dyn Classifier, record: &InteractionRecord) -> Classification {
    let payload = build_payload(record);
    if payload.is_empty() {
        return Classification::not_applicable("no text to classify");
    }

    match AssertUnwindSafe(classifier.classify(&payload))
        .catch_unwind()
        .await
    {
        Ok(Ok(verdict)) => verdict,
        Ok(Err(e)) => Classification::error(e.to_string()),
        Err(_) => Classification::error("classifier panicked"),
    }
}

/// Classify every record. Never fails and never drops a row.
pub async fn classify_all(
    classifier: &dyn Classifier,
    records: Vec<InteractionRecord>,
    concurrency: usize,
) -> ClassifyOutcome {
    classify_where(classifier, records, concurrency, |_| true).await
}

/// Re-classify only rows whose label is missing, `Error` or `NotApplicable`.
pub async fn classify_unresolved(
    classifier: &dyn Classifier,
    records: Vec<InteractionRecord>,
    concurrency: usize,
) -> ClassifyOutcome {
    classify_where(
        classifier,
        records,
        concurrency,
        InteractionRecord::needs_classification,
    )
    .await
}

async fn classify_where(
    classifier: &dyn Classifier,
    mut records: Vec<InteractionRecord>,
    concurrency: usize,
    select: impl Fn(&InteractionRecord) -> bool,
) -> ClassifyOutcome {
    // Collected first: a stream of borrowing closures makes the caller's
    // future non-`Send`, which `tokio::spawn` rejects.
    let pending: Vec<_> = records
        .iter()
        .enumerate()
        .filter(|(_, record)| select(*record))
        .map(|(idx, record)| async move { (idx, classify_one(classifier, record).await) })
        .collect();

    let verdicts: Vec<(usize, Classification)> = stream::iter(pending)
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let classified = verdicts.len();
    let mut cost = 0u64;
    for (idx, verdict) in verdicts {
        cost = cost.saturating_add(verdict.cost);
        let record = &mut records[idx];
        tracing::debug!(index = idx, label = %verdict.label, "record classified");
        record.sentiment_label = Some(verdict.label);
        record.sentiment_explanation = Some(verdict.explanation);
        record.classification_cost = Some(verdict.cost);
    }

    let outcome = ClassifyOutcome {
        records,
        classified,
        cost,
    };
    tracing::info!(
        classified,
        errors = outcome.count(SentimentLabel::Error),
        cost,
        "classification finished"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarvestError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Classifier for Echo {
        async fn classify(&self, text: &str) -> Result<Classification, HarvestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Finish out of order so index mapping is exercised.
            let delay = u64::try_from(text.len() % 7).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            let label = if text.contains("good") {
                SentimentLabel::Positive
            } else {
                SentimentLabel::Negative
            };
            Ok(Classification {
                label,
                explanation: text.to_string(),
                cost: 2,
            })
        }
    }

    struct Explodes;

    #[async_trait]
    impl Classifier for Explodes {
        async fn classify(&self, _text: &str) -> Result<Classification, HarvestError> {
            panic!("boom")
        }
    }

    fn echo() -> Echo {
        Echo {
            calls: AtomicUsize::new(0),
        }
    }

    #[test]
    fn payload_combines_post_and_comment() {
        let record = InteractionRecord::post("x", None, "a", " launch ").with_comment("b", "good");
        assert_eq!(build_payload(&record), "Post: launch | Comment: good");
    }

    #[test]
    fn payload_falls_back_to_flat_content() {
        let mut record = InteractionRecord::post("x", None, "", "");
        record
            .extra
            .insert("content".into(), Value::String("flat text here".into()));
        assert_eq!(build_payload(&record), "flat text here");
    }

    #[test]
    fn payload_salvages_nan_placeholders() {
        let mut record = InteractionRecord::post("facebook", None, "alice", "");
        record.extra.insert("content".into(), Value::String("nan".into()));
        record
            .extra
            .insert("caption".into(), Value::String("Loved the show".into()));
        record
            .extra
            .insert("source".into(), Value::String("Facebook".into()));
        assert_eq!(build_payload(&record), "alice | Loved the show");
    }

    #[test]
    fn payload_keeps_words_containing_nan() {
        let record = InteractionRecord::post("x", None, "a", "bananas again");
        assert_eq!(build_payload(&record), "Post: bananas again | Comment: ");
    }

    #[test]
    fn payload_is_capped() {
        let record = InteractionRecord::post("x", None, "a", "y".repeat(5000));
        assert_eq!(build_payload(&record).chars().count(), MAX_PAYLOAD_CHARS);
    }

    #[test]
    fn payload_of_empty_record_is_empty() {
        assert_eq!(build_payload(&InteractionRecord::default()), "");
    }

    #[tokio::test]
    async fn classify_all_preserves_order_and_sums_cost() {
        let classifier = echo();
        let records: Vec<_> = (0..40)
            .map(|i| {
                let text = if i % 3 == 0 { "good stuff" } else { "awful" };
                InteractionRecord::post("x", Some(i), "a", format!("{text} {i}"))
            })
            .collect();

        let outcome = classify_all(&classifier, records.clone(), 8).await;

        assert_eq!(outcome.records.len(), 40);
        assert_eq!(outcome.cost, 80);
        for (input, output) in records.iter().zip(&outcome.records) {
            assert_eq!(input.post_index, output.post_index);
            let expected = if input.post_content.contains("good") {
                SentimentLabel::Positive
            } else {
                SentimentLabel::Negative
            };
            assert_eq!(output.sentiment_label, Some(expected));
            assert!(output
                .sentiment_explanation
                .as_deref()
                .is_some_and(|e| e.contains(&input.post_content)));
        }
    }

    #[tokio::test]
    async fn empty_record_is_not_applicable_without_a_call() {
        let classifier = echo();
        let outcome = classify_all(&classifier, vec![InteractionRecord::default()], 4).await;
        assert_eq!(
            outcome.records[0].sentiment_label,
            Some(SentimentLabel::NotApplicable)
        );
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn panicking_classifier_yields_error_labels() {
        let records = vec![InteractionRecord::post("x", None, "a", "hello world"); 5];
        let outcome = classify_all(&Explodes, records, 2).await;
        assert_eq!(outcome.count(SentimentLabel::Error), 5);
    }

    #[tokio::test]
    async fn classify_unresolved_skips_settled_rows() {
        let classifier = echo();
        let records = vec![
            InteractionRecord::post("x", Some(1), "a", "good one")
                .with_sentiment(SentimentLabel::Neutral),
            InteractionRecord::post("x", Some(2), "a", "good two")
                .with_sentiment(SentimentLabel::Error),
            InteractionRecord::post("x", Some(3), "a", "good three"),
        ];

        let outcome = classify_unresolved(&classifier, records, 4).await;

        assert_eq!(outcome.classified, 2);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            outcome.records[0].sentiment_label,
            Some(SentimentLabel::Neutral)
        );
        assert_eq!(
            outcome.records[1].sentiment_label,
            Some(SentimentLabel::Positive)
        );
        assert_eq!(
            outcome.records[2].sentiment_label,
            Some(SentimentLabel::Positive)
        );
    }
}
