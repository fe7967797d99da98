//! In-process [`HarvestStore`] used by tests and `--in-memory` runs.
//!
//! Mirrors the Postgres semantics: natural-key upserts, forward-only status
//! transitions and the exact-then-case-insensitive topic lookup.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulse_core::{
    AnalysisReport, ClassificationStatus, HistoryEntry, InteractionRecord, Job, PostAggregate,
    StageStatus,
};
use uuid::Uuid;

use crate::keys::{content_signature, record_key};
use crate::store::{HarvestStore, StoredAnalysis};
use crate::DbError;

#[derive(Debug, Clone)]
struct Keyed<T> {
    key: String,
    value: T,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    jobs: HashMap<String, Job>,
    records: HashMap<String, Vec<Keyed<InteractionRecord>>>,
    posts: HashMap<String, Vec<Keyed<PostAggregate>>>,
    analyses: HashMap<String, StoredAnalysis>,
}

impl State {
    fn job_by_id(&mut self, job_id: Uuid) -> Result<&mut Job, DbError> {
        self.jobs
            .values_mut()
            .find(|job| job.id == job_id)
            .ok_or(DbError::NotFound)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exact key first, then the most recently updated case-insensitive match.
fn lookup<'a, T>(
    map: &'a HashMap<String, T>,
    topic: &str,
    updated_at: impl Fn(&T) -> DateTime<Utc>,
) -> Option<&'a T> {
    if let Some(hit) = map.get(topic) {
        return Some(hit);
    }
    let wanted = topic.to_lowercase();
    map.iter()
        .filter(|(k, _)| k.to_lowercase() == wanted)
        .map(|(_, v)| v)
        .max_by_key(|v| updated_at(*v))
}

fn upsert_keyed<T: Clone>(rows: &mut Vec<Keyed<T>>, key: String, value: &T, now: DateTime<Utc>) {
    if let Some(existing) = rows.iter_mut().find(|row| row.key == key) {
        existing.value = value.clone();
        existing.updated_at = now;
    } else {
        rows.push(Keyed {
            key,
            value: value.clone(),
            updated_at: now,
        });
    }
}

#[async_trait]
impl HarvestStore for MemoryStore {
    async fn create_job(&self, job: &Job) -> Result<(), DbError> {
        self.lock().jobs.insert(job.topic.clone(), job.clone());
        Ok(())
    }

    async fn get_job(&self, topic: &str) -> Result<Option<Job>, DbError> {
        let state = self.lock();
        Ok(lookup(&state.jobs, topic, |job| job.updated_at).cloned())
    }

    async fn update_source_status(
        &self,
        job_id: Uuid,
        source: &str,
        status: StageStatus,
    ) -> Result<(), DbError> {
        let mut state = self.lock();
        let job = state.job_by_id(job_id)?;
        let current = *job.sources.get(source).ok_or(DbError::NotFound)?;
        if !current.can_transition_to(status) {
            return Err(DbError::InvalidStatusTransition {
                job_id,
                field: format!("source '{source}'"),
                from: current.to_string(),
                to: status.to_string(),
            });
        }
        job.sources.insert(source.to_string(), status);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn update_classification_status(
        &self,
        job_id: Uuid,
        status: ClassificationStatus,
    ) -> Result<(), DbError> {
        let mut state = self.lock();
        let job = state.job_by_id(job_id)?;
        if !job.classification.can_transition_to(status) {
            return Err(DbError::InvalidStatusTransition {
                job_id,
                field: "classification".to_string(),
                from: job.classification.to_string(),
                to: status.to_string(),
            });
        }
        job.classification = status;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_job_complete(&self, job_id: Uuid) -> Result<(), DbError> {
        let mut state = self.lock();
        let job = state.job_by_id(job_id)?;
        let now = Utc::now();
        job.completed_at.get_or_insert(now);
        job.updated_at = now;
        Ok(())
    }

    async fn upsert_records(
        &self,
        topic: &str,
        records: &[InteractionRecord],
    ) -> Result<usize, DbError> {
        let now = Utc::now();
        let mut state = self.lock();
        let rows = state.records.entry(topic.to_string()).or_default();
        for record in records {
            upsert_keyed(rows, record_key(record), record, now);
        }
        Ok(records.len())
    }

    async fn list_records(&self, topic: &str) -> Result<Vec<InteractionRecord>, DbError> {
        let state = self.lock();
        Ok(state
            .records
            .get(topic)
            .map(|rows| rows.iter().map(|row| row.value.clone()).collect())
            .unwrap_or_default())
    }

    async fn upsert_posts(&self, topic: &str, posts: &[PostAggregate]) -> Result<usize, DbError> {
        let now = Utc::now();
        let mut state = self.lock();
        let rows = state.posts.entry(topic.to_string()).or_default();
        for post in posts {
            let key = format!("{}\x00{}", post.platform, content_signature(post));
            upsert_keyed(rows, key, post, now);
        }
        Ok(posts.len())
    }

    async fn list_posts(&self, topic: &str) -> Result<Vec<PostAggregate>, DbError> {
        let state = self.lock();
        Ok(state
            .posts
            .get(topic)
            .map(|rows| rows.iter().map(|row| row.value.clone()).collect())
            .unwrap_or_default())
    }

    async fn upsert_analysis(
        &self,
        topic: &str,
        report: &AnalysisReport,
    ) -> Result<DateTime<Utc>, DbError> {
        let updated_at = Utc::now();
        self.lock().analyses.insert(
            topic.to_string(),
            StoredAnalysis {
                report: report.clone(),
                updated_at,
            },
        );
        Ok(updated_at)
    }

    async fn get_analysis(&self, topic: &str) -> Result<Option<StoredAnalysis>, DbError> {
        let state = self.lock();
        Ok(lookup(&state.analyses, topic, |stored| stored.updated_at).cloned())
    }

    async fn get_history(&self) -> Result<Vec<HistoryEntry>, DbError> {
        let state = self.lock();
        let mut entries: Vec<HistoryEntry> = state
            .analyses
            .iter()
            .map(|(topic, stored)| HistoryEntry {
                topic: topic.clone(),
                updated_at: stored.updated_at,
                total: stored.report.total_count,
            })
            .collect();
        entries.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.topic.cmp(&b.topic))
        });
        Ok(entries)
    }

    async fn delete_topic(&self, topic: &str) -> Result<bool, DbError> {
        let mut state = self.lock();
        let analysis = state.analyses.remove(topic).is_some();
        let posts = state.posts.remove(topic).is_some_and(|rows| !rows.is_empty());
        let records = state
            .records
            .remove(topic)
            .is_some_and(|rows| !rows.is_empty());
        let job = state.jobs.remove(topic).is_some();
        Ok(analysis || posts || records || job)
    }
}
