//! Plain-text and markdown rendering for CLI output.

use std::fmt::Write as _;

use pulse_core::{AnalysisReport, HistoryEntry, Job};
use pulse_harvest::SourceOutcome;

/// One line per source plus the classification stage.
pub(crate) fn render_status(job: &Job) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<24}STATUS", "STAGE");
    for (source, status) in &job.sources {
        let _ = writeln!(out, "{source:<24}{status}");
    }
    let _ = writeln!(out, "{:<24}{}", "classification", job.classification);
    let state = job.completed_at.map_or_else(
        || "in progress".to_string(),
        |at| format!("completed {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
    );
    let _ = writeln!(out, "job {} ({state})", job.id);
    out
}

pub(crate) fn render_sources(sources: &[SourceOutcome]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<24}{:<12}{:<10}SECS", "SOURCE", "STATUS", "RECORDS");
    for s in sources {
        let _ = write!(
            out,
            "{:<24}{:<12}{:<10}{:.1}",
            s.source,
            s.status.to_string(),
            s.records,
            s.elapsed_secs
        );
        if let Some(error) = &s.error {
            let _ = write!(out, "  ({error})");
        }
        out.push('\n');
    }
    out
}

/// Markdown report for a topic.
pub(crate) fn render_report(report: &AnalysisReport) -> String {
    let mut out = String::new();
    let summary = &report.summary;

    let _ = writeln!(out, "# Sentiment Report: {}", report.topic);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "**Generated**: {}",
        report.generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(out, "**Records**: {}", report.total_count);
    let _ = writeln!(out, "**Classification cost**: {}", report.classification_cost);
    let _ = writeln!(out, "**Total time**: {:.1}s", report.timing.total_secs);
    let _ = writeln!(out);

    let _ = writeln!(out, "## Labels");
    let _ = writeln!(out);
    let _ = writeln!(out, "| Label | Count | Share |");
    let _ = writeln!(out, "|-------|-------|-------|");
    for (label, count) in &summary.global_counts {
        let share = summary.global_percentages.get(label).copied().unwrap_or(0.0);
        let _ = writeln!(out, "| {label} | {count} | {share:.1}% |");
    }
    let _ = writeln!(out);

    if !summary.per_platform_counts.is_empty() {
        let _ = writeln!(out, "## Platforms");
        let _ = writeln!(out);
        for (platform, counts) in &summary.per_platform_counts {
            let parts: Vec<String> = counts
                .iter()
                .map(|(label, count)| format!("{label} {count}"))
                .collect();
            let _ = writeln!(out, "- **{platform}**: {}", parts.join(", "));
        }
        let _ = writeln!(out);
    }

    if !report.source_counts.is_empty() {
        let _ = writeln!(out, "## Sources");
        let _ = writeln!(out);
        for (source, count) in &report.source_counts {
            let _ = writeln!(out, "- {source}: {count} records");
        }
        let _ = writeln!(out);
    }

    for (heading, examples) in [
        ("Positive examples", &summary.positive_examples),
        ("Negative examples", &summary.negative_examples),
    ] {
        if examples.is_empty() {
            continue;
        }
        let _ = writeln!(out, "## {heading}");
        let _ = writeln!(out);
        for example in examples {
            let _ = writeln!(out, "> {}", example.replace('\n', " "));
        }
        let _ = writeln!(out);
    }

    if let Some(narrative) = &report.narrative_text {
        let _ = writeln!(out, "## Narrative");
        let _ = writeln!(out);
        let _ = writeln!(out, "{narrative}");
    }

    out
}

pub(crate) fn render_history(entries: &[HistoryEntry]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<40}{:<20}RECORDS", "TOPIC", "UPDATED");
    for entry in entries {
        let _ = writeln!(
            out,
            "{:<40}{:<20}{}",
            entry.topic,
            entry.updated_at.format("%Y-%m-%d %H:%M"),
            entry.total
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pulse_core::{SentimentSummary, StageStatus, TimingMetrics};
    use std::collections::BTreeMap;

    fn report() -> AnalysisReport {
        let mut summary = SentimentSummary {
            total: 4,
            ..SentimentSummary::default()
        };
        summary.global_counts.insert("Positive".into(), 3);
        summary.global_counts.insert("Negative".into(), 1);
        summary.global_percentages.insert("Positive".into(), 75.0);
        summary.global_percentages.insert("Negative".into(), 25.0);
        summary.positive_examples.push("great\nlaunch".into());

        AnalysisReport {
            topic: "rust".into(),
            total_count: 4,
            summary,
            narrative_text: None,
            timing: TimingMetrics::default(),
            source_counts: BTreeMap::from([("twitter".to_string(), 4)]),
            classification_cost: 120,
            data_preview: vec![],
            generated_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
        }
    }

    #[test]
    fn report_lists_labels_sources_and_examples() {
        let text = render_report(&report());
        assert!(text.starts_with("# Sentiment Report: rust"));
        assert!(text.contains("| Positive | 3 | 75.0% |"));
        assert!(text.contains("- twitter: 4 records"));
        assert!(text.contains("> great launch"));
        assert!(!text.contains("## Negative examples"));
        assert!(!text.contains("## Narrative"));
    }

    #[test]
    fn report_includes_narrative_when_present() {
        let mut report = report();
        report.narrative_text = Some("Mostly upbeat.".into());
        assert!(render_report(&report).ends_with("## Narrative\n\nMostly upbeat.\n"));
    }

    #[test]
    fn status_shows_every_stage() {
        let mut job = Job::new("rust", 10, ["twitter", "reddit"]);
        job.sources.insert("reddit".into(), StageStatus::Failed);
        let text = render_status(&job);
        assert!(text.contains("reddit"));
        assert!(text.contains("failed"));
        assert!(text.contains("classification"));
        assert!(text.contains("in progress"));
    }

    #[test]
    fn sources_table_includes_errors() {
        let sources = vec![SourceOutcome {
            source: "reddit".into(),
            status: StageStatus::Failed,
            records: 0,
            error: Some("timed out".into()),
            elapsed_secs: 1.25,
        }];
        let text = render_sources(&sources);
        assert!(text.contains("(timed out)"));
    }
}
