//! Harvest pipeline orchestration.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use pulse_core::{
    AnalysisReport, ClassificationStatus, HistoryEntry, InteractionRecord, Job, PostAggregate,
    SentimentSummary, TimingMetrics,
};
use pulse_db::{HarvestStore, StoredAnalysis};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::classifier::{Classifier, Narrator};
use crate::classify::{classify_all, classify_unresolved};
use crate::consolidate::{group, summarize};
use crate::coordinator::{CollectionCoordinator, SourceOutcome};
use crate::error::HarvestError;
use crate::status::JobTracker;

/// Rows stored alongside a report for quick inspection.
pub const DATA_PREVIEW_ROWS: usize = 10;

const MAX_TOPIC_CHARS: usize = 200;

/// Everything one pipeline run produced.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: Option<Uuid>,
    pub report: AnalysisReport,
    pub posts: Vec<PostAggregate>,
    pub sources: Vec<SourceOutcome>,
    /// `false` if any write of records, posts or the report failed. The
    /// report above is complete either way.
    pub persisted: bool,
}

/// Runs topics end to end: collect, classify, consolidate, persist.
#[derive(Clone)]
pub struct Harvester {
    store: Arc<dyn HarvestStore>,
    tracker: JobTracker,
    coordinator: Arc<CollectionCoordinator>,
    classifier: Arc<dyn Classifier>,
    narrator: Option<Arc<dyn Narrator>>,
    classify_concurrency: usize,
}

impl Harvester {
    #[must_use]
    pub fn new(
        store: Arc<dyn HarvestStore>,
        coordinator: CollectionCoordinator,
        classifier: Arc<dyn Classifier>,
        classify_concurrency: usize,
    ) -> Self {
        Self {
            tracker: JobTracker::new(Arc::clone(&store)),
            store,
            coordinator: Arc::new(coordinator),
            classifier,
            narrator: None,
            classify_concurrency: classify_concurrency.max(1),
        }
    }

    #[must_use]
    pub fn with_narrator(mut self, narrator: Arc<dyn Narrator>) -> Self {
        self.narrator = Some(narrator);
        self
    }

    /// Create the job and run it in the background.
    ///
    /// Returns as soon as the job record exists; progress is visible
    /// through [`Harvester::status`].
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::InvalidTopic`] for a blank or oversized topic,
    /// or [`HarvestError::Persistence`] if the job record cannot be created.
    pub async fn submit(
        &self,
        topic: &str,
        target_count: u32,
    ) -> Result<JoinHandle<JobOutcome>, HarvestError> {
        let job = self.start(topic, target_count).await?;
        tracing::info!(topic = %job.topic, job_id = %job.id, target_count, "job submitted");
        let this = self.clone();
        Ok(tokio::spawn(async move { this.execute(job).await }))
    }

    /// Run a topic to completion in the current task.
    ///
    /// # Errors
    ///
    /// Same as [`Harvester::submit`]. Failures after the job starts are
    /// contained and reflected in the outcome instead.
    pub async fn run(&self, topic: &str, target_count: u32) -> Result<JobOutcome, HarvestError> {
        let job = self.start(topic, target_count).await?;
        Ok(self.execute(job).await)
    }

    async fn start(&self, topic: &str, target_count: u32) -> Result<Job, HarvestError> {
        let topic = validate_topic(topic)?;
        self.tracker
            .start(&topic, target_count, &self.coordinator.source_names())
            .await
    }

    async fn execute(&self, job: Job) -> JobOutcome {
        let started = Instant::now();
        let topic = job.topic.as_str();

        let collection = self
            .coordinator
            .run_collection(&self.tracker, job.id, topic, job.target_count)
            .await;
        let collection_secs = started.elapsed().as_secs_f64();
        let source_counts = collection.source_counts();
        tracing::debug!(
            topic,
            groups = group(&collection.records).len(),
            "structural grouping before classification"
        );

        self.tracker
            .classification_status(job.id, ClassificationStatus::Running)
            .await;
        let classify_started = Instant::now();
        let classified = classify_all(
            self.classifier.as_ref(),
            collection.records,
            self.classify_concurrency,
        )
        .await;
        let classification_secs = classify_started.elapsed().as_secs_f64();
        self.tracker
            .classification_status(job.id, ClassificationStatus::Completed)
            .await;

        let consolidate_started = Instant::now();
        let posts = group(&classified.records);
        let summary = summarize(&classified.records);
        let narrative_text = self.narrate(topic, &summary).await;
        let consolidation_secs = consolidate_started.elapsed().as_secs_f64();

        let report = AnalysisReport {
            topic: topic.to_string(),
            total_count: classified.records.len(),
            summary,
            narrative_text,
            timing: TimingMetrics {
                collection_secs,
                classification_secs,
                consolidation_secs,
                total_secs: started.elapsed().as_secs_f64(),
            },
            source_counts,
            classification_cost: classified.cost,
            data_preview: preview(&classified.records),
            generated_at: Utc::now(),
        };

        let persisted = self
            .persist(topic, &classified.records, &posts, &report)
            .await;
        // The pipeline is over either way; pollers must see a finished job.
        self.tracker.complete(job.id).await;
        if !persisted {
            tracing::warn!(topic, job_id = %job.id, "job finished without storing its output");
        }

        tracing::info!(
            topic,
            job_id = %job.id,
            total = report.total_count,
            persisted,
            total_secs = report.timing.total_secs,
            "job finished"
        );

        JobOutcome {
            job_id: Some(job.id),
            report,
            posts,
            sources: collection.sources,
            persisted,
        }
    }

    /// Re-classify stored rows that are unlabelled, `Error` or
    /// `NotApplicable`, then rebuild posts and the report.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::JobNotFound`] if nothing is stored for the
    /// topic, or [`HarvestError::Persistence`] if stored rows cannot be read.
    pub async fn reconcile(&self, topic: &str) -> Result<JobOutcome, HarvestError> {
        let started = Instant::now();
        let topic = topic.trim();
        let previous = self.store.get_analysis(topic).await?;
        let topic = previous
            .as_ref()
            .map_or_else(|| topic.to_string(), |stored| stored.report.topic.clone());

        let records = self.store.list_records(&topic).await?;
        if records.is_empty() {
            return Err(HarvestError::JobNotFound(topic));
        }

        let classified = classify_unresolved(
            self.classifier.as_ref(),
            records,
            self.classify_concurrency,
        )
        .await;
        let classification_secs = started.elapsed().as_secs_f64();

        let consolidate_started = Instant::now();
        let posts = group(&classified.records);
        let summary = summarize(&classified.records);
        let narrative_text = match (&previous, classified.classified) {
            (Some(stored), 0) => stored.report.narrative_text.clone(),
            _ => self.narrate(&topic, &summary).await,
        };
        let consolidation_secs = consolidate_started.elapsed().as_secs_f64();

        let (source_counts, previous_cost) = previous.as_ref().map_or_else(
            || (BTreeMap::new(), 0),
            |stored| {
                (
                    stored.report.source_counts.clone(),
                    stored.report.classification_cost,
                )
            },
        );

        let report = AnalysisReport {
            topic: topic.clone(),
            total_count: classified.records.len(),
            summary,
            narrative_text,
            timing: TimingMetrics {
                collection_secs: 0.0,
                classification_secs,
                consolidation_secs,
                total_secs: started.elapsed().as_secs_f64(),
            },
            source_counts,
            classification_cost: previous_cost.saturating_add(classified.cost),
            data_preview: preview(&classified.records),
            generated_at: Utc::now(),
        };

        let persisted = self
            .persist(&topic, &classified.records, &posts, &report)
            .await;

        let job_id = match self.store.get_job(&topic).await {
            Ok(job) => job.map(|job| job.id),
            Err(e) => {
                tracing::warn!(topic = %topic, error = %e, "job lookup failed during reconcile");
                None
            }
        };
        if let Some(job_id) = job_id {
            self.tracker.complete(job_id).await;
        }

        tracing::info!(
            topic = %topic,
            reclassified = classified.classified,
            persisted,
            "reconcile finished"
        );

        Ok(JobOutcome {
            job_id,
            report,
            posts,
            sources: Vec::new(),
            persisted,
        })
    }

    /// Current job status for a topic. Surrounding whitespace is ignored,
    /// as it is when the job is created.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::JobNotFound`] for an unknown topic.
    pub async fn status(&self, topic: &str) -> Result<Job, HarvestError> {
        self.tracker.poll(topic.trim()).await
    }

    /// The stored report for a topic, once its job has finished.
    ///
    /// If the latest run could not store its report, the last report that
    /// was stored is returned instead.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::JobNotReady`] while a job for the topic is
    /// still running, [`HarvestError::ReportNotPersisted`] when the job
    /// finished but no report was ever stored, and
    /// [`HarvestError::JobNotFound`] when the topic has neither a job nor a
    /// report.
    pub async fn get_result(&self, topic: &str) -> Result<StoredAnalysis, HarvestError> {
        let topic = topic.trim();
        let job = self.store.get_job(topic).await?;
        if job.as_ref().is_some_and(|j| !j.is_complete()) {
            return Err(HarvestError::JobNotReady(topic.to_string()));
        }

        match (self.store.get_analysis(topic).await?, job) {
            (Some(stored), Some(job)) if stored.updated_at < job.created_at => {
                tracing::warn!(
                    topic,
                    job_id = %job.id,
                    stored_at = %stored.updated_at,
                    "latest run did not store a report; serving the previous one"
                );
                Ok(stored)
            }
            (Some(stored), _) => Ok(stored),
            (None, Some(_)) => Err(HarvestError::ReportNotPersisted(topic.to_string())),
            (None, None) => Err(HarvestError::JobNotFound(topic.to_string())),
        }
    }

    /// # Errors
    ///
    /// Returns [`HarvestError::Persistence`] if the store cannot be read.
    pub async fn history(&self) -> Result<Vec<HistoryEntry>, HarvestError> {
        Ok(self.store.get_history().await?)
    }

    /// Delete everything stored for a topic. Returns `true` if anything
    /// was removed.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Persistence`] if the delete fails.
    pub async fn delete(&self, topic: &str) -> Result<bool, HarvestError> {
        let topic = topic.trim();
        let removed = self.store.delete_topic(topic).await?;
        tracing::info!(topic, removed, "topic deleted");
        Ok(removed)
    }

    async fn narrate(&self, topic: &str, summary: &SentimentSummary) -> Option<String> {
        let narrator = self.narrator.as_ref()?;
        if summary.total == 0 {
            return None;
        }
        match narrator.narrate(topic, summary).await {
            Ok(text) if !text.is_empty() => Some(text),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(topic, error = %e, "narrative generation failed");
                None
            }
        }
    }

    /// Write records, posts and the report. Each failure is logged; returns
    /// `true` only if all three writes succeeded.
    async fn persist(
        &self,
        topic: &str,
        records: &[InteractionRecord],
        posts: &[PostAggregate],
        report: &AnalysisReport,
    ) -> bool {
        let mut ok = true;

        if let Err(e) = self.store.upsert_records(topic, records).await {
            tracing::warn!(topic, error = %e, "persisting records failed");
            ok = false;
        }
        if let Err(e) = self.store.upsert_posts(topic, posts).await {
            tracing::warn!(topic, error = %e, "persisting posts failed");
            ok = false;
        }
        match self.store.upsert_analysis(topic, report).await {
            Ok(updated_at) => {
                tracing::info!(topic, updated_at = %updated_at, "report persisted");
            }
            Err(e) => {
                tracing::warn!(topic, error = %e, "persisting report failed");
                ok = false;
            }
        }

        ok
    }
}

fn validate_topic(topic: &str) -> Result<String, HarvestError> {
    let trimmed = topic.trim();
    if trimmed.is_empty() {
        return Err(HarvestError::InvalidTopic("topic must be non-empty".to_string()));
    }
    if trimmed.chars().count() > MAX_TOPIC_CHARS {
        return Err(HarvestError::InvalidTopic(format!(
            "topic exceeds {MAX_TOPIC_CHARS} characters"
        )));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(HarvestError::InvalidTopic(
            "topic contains control characters".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

fn preview(records: &[InteractionRecord]) -> Vec<InteractionRecord> {
    records.iter().take(DATA_PREVIEW_ROWS).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_topic_trims_and_rejects_blank() {
        assert_eq!(validate_topic("  rust  ").unwrap(), "rust");
        assert!(matches!(
            validate_topic("   "),
            Err(HarvestError::InvalidTopic(_))
        ));
        assert!(matches!(
            validate_topic("a\nb"),
            Err(HarvestError::InvalidTopic(_))
        ));
        assert!(validate_topic(&"x".repeat(MAX_TOPIC_CHARS + 1)).is_err());
    }

    #[test]
    fn preview_is_capped() {
        let records = vec![InteractionRecord::default(); 25];
        assert_eq!(preview(&records).len(), DATA_PREVIEW_ROWS);
        assert_eq!(preview(&records[..3]).len(), 3);
    }
}
