//! Consolidation: flat records into post aggregates and summary statistics.
//!
//! Both functions are pure and deterministic. Groups come out in the order
//! their first row was seen, and every map in the summary is ordered, so the
//! same input always serializes to the same bytes.

use std::collections::{BTreeMap, HashMap};

use pulse_core::{
    CommentEntry, GroupKey, InteractionRecord, PostAggregate, SentimentLabel, SentimentSummary,
};

/// Number of positive and negative excerpts kept in a summary.
pub const MAX_EXAMPLES: usize = 3;

/// Excerpts longer than this are cut, in characters.
pub const MAX_EXAMPLE_CHARS: usize = 300;

/// Platform key used when a record carries no platform at all.
pub const UNKNOWN_PLATFORM: &str = "unknown";

/// Group records by `(platform, post_index)`, or `(platform, post_content)`
/// when the record has no index.
///
/// The first row of a group supplies the post author and content. Every row
/// becomes a [`CommentEntry`] in encounter order. The dominant sentiment is
/// the most frequent label in the group; ties go to the label seen first.
#[must_use]
pub fn group(records: &[InteractionRecord]) -> Vec<PostAggregate> {
    let mut posts: Vec<PostAggregate> = Vec::new();
    let mut labels: Vec<Vec<SentimentLabel>> = Vec::new();
    let mut index: HashMap<(String, GroupKey), usize> = HashMap::new();

    for record in records {
        let platform = record.platform.trim().to_string();
        let key = match record.post_index {
            Some(i) => GroupKey::Index(i),
            None => GroupKey::Content(record.post_content.trim().to_string()),
        };

        let slot = *index.entry((platform.clone(), key.clone())).or_insert_with(|| {
            posts.push(PostAggregate {
                platform,
                key,
                author: record.post_author.trim().to_string(),
                content: record.post_content.trim().to_string(),
                dominant_sentiment: None,
                comments: Vec::new(),
            });
            labels.push(Vec::new());
            posts.len() - 1
        });

        posts[slot].comments.push(CommentEntry {
            author: record.comment_author.trim().to_string(),
            content: record.comment_content.trim().to_string(),
            sentiment: record.sentiment_label,
        });
        if let Some(label) = record.sentiment_label {
            labels[slot].push(label);
        }
    }

    for (post, group_labels) in posts.iter_mut().zip(&labels) {
        post.dominant_sentiment = dominant_label(group_labels);
    }

    posts
}

/// Statistical mode of `labels`; ties resolve to the earliest-seen label.
#[must_use]
pub fn dominant_label(labels: &[SentimentLabel]) -> Option<SentimentLabel> {
    let mut tally: Vec<(SentimentLabel, usize)> = Vec::new();
    for label in labels {
        match tally.iter_mut().find(|(seen, _)| seen == label) {
            Some((_, count)) => *count += 1,
            None => tally.push((*label, 1)),
        }
    }

    let mut best: Option<(SentimentLabel, usize)> = None;
    for (label, count) in tally {
        if best.is_none_or(|(_, top)| count > top) {
            best = Some((label, count));
        }
    }
    best.map(|(label, _)| label)
}

/// Label counts, percentages, per-platform counts and example excerpts.
#[must_use]
pub fn summarize(records: &[InteractionRecord]) -> SentimentSummary {
    let mut summary = SentimentSummary {
        total: records.len(),
        ..SentimentSummary::default()
    };

    for record in records {
        let label = record.label_key().to_string();
        *summary.global_counts.entry(label.clone()).or_default() += 1;

        let platform = match record.platform.trim().to_lowercase() {
            p if p.is_empty() => UNKNOWN_PLATFORM.to_string(),
            p => p,
        };
        *summary
            .per_platform_counts
            .entry(platform)
            .or_default()
            .entry(label)
            .or_default() += 1;

        match record.sentiment_label {
            Some(SentimentLabel::Positive) => push_example(&mut summary.positive_examples, record),
            Some(SentimentLabel::Negative) => push_example(&mut summary.negative_examples, record),
            _ => {}
        }
    }

    summary.global_percentages = percentages(&summary.global_counts, summary.total);
    summary
}

fn push_example(examples: &mut Vec<String>, record: &InteractionRecord) {
    if examples.len() >= MAX_EXAMPLES {
        return;
    }
    // Excerpts quote the post, never the comment.
    let text = record.post_content.trim();
    if text.is_empty() {
        return;
    }
    let excerpt: String = text.chars().take(MAX_EXAMPLE_CHARS).collect();
    if !examples.contains(&excerpt) {
        examples.push(excerpt);
    }
}

#[allow(clippy::cast_precision_loss)]
fn percentages(counts: &BTreeMap<String, usize>, total: usize) -> BTreeMap<String, f64> {
    if total == 0 {
        return BTreeMap::new();
    }
    counts
        .iter()
        .map(|(label, count)| {
            let share = (*count as f64) * 100.0 / (total as f64);
            (label.clone(), (share * 10.0).round() / 10.0)
        })
        .collect()
}
