//! Job status tracking.
//!
//! The collection tier writes per-source statuses and the classification
//! tier writes the classification status. Writes are best effort: a failed
//! status write is logged and never stops the pipeline.

use std::sync::Arc;

use pulse_core::{ClassificationStatus, Job, StageStatus};
use pulse_db::HarvestStore;
use uuid::Uuid;

use crate::error::HarvestError;

#[derive(Clone)]
pub struct JobTracker {
    store: Arc<dyn HarvestStore>,
}

impl JobTracker {
    #[must_use]
    pub fn new(store: Arc<dyn HarvestStore>) -> Self {
        Self { store }
    }

    /// Create a job with every source and the classification stage pending.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Persistence`] if the job cannot be stored.
    pub async fn start(
        &self,
        topic: &str,
        target_count: u32,
        sources: &[String],
    ) -> Result<Job, HarvestError> {
        let job = Job::new(topic, target_count, sources.iter().cloned());
        self.store.create_job(&job).await?;
        tracing::debug!(topic, job_id = %job.id, sources = sources.len(), "job created");
        Ok(job)
    }

    pub async fn source_status(&self, job_id: Uuid, source: &str, status: StageStatus) {
        if let Err(e) = self
            .store
            .update_source_status(job_id, source, status)
            .await
        {
            tracing::warn!(
                job_id = %job_id,
                source,
                status = %status,
                error = %e,
                "source status update failed"
            );
        }
    }

    pub async fn classification_status(&self, job_id: Uuid, status: ClassificationStatus) {
        if let Err(e) = self
            .store
            .update_classification_status(job_id, status)
            .await
        {
            tracing::warn!(
                job_id = %job_id,
                status = %status,
                error = %e,
                "classification status update failed"
            );
        }
    }

    /// Stamp the job complete. Returns `false` if the write failed.
    pub async fn complete(&self, job_id: Uuid) -> bool {
        match self.store.mark_job_complete(job_id).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "marking job complete failed");
                false
            }
        }
    }

    /// Current status of the job for `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::JobNotFound`] if no job exists for the topic,
    /// or [`HarvestError::Persistence`] if the store cannot be read.
    pub async fn poll(&self, topic: &str) -> Result<Job, HarvestError> {
        self.store
            .get_job(topic)
            .await?
            .ok_or_else(|| HarvestError::JobNotFound(topic.to_string()))
    }
}
