//! Collection coordinator.
//!
//! One spawned task per source, each bounded by its own wall clock. A
//! source that errors, panics or times out contributes nothing and is
//! marked `failed`; its siblings are unaffected. Results are merged in
//! dispatch order.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use pulse_core::{InteractionRecord, SourceConfig, StageStatus};
use uuid::Uuid;

use crate::collector::{CollectRequest, CommandCollector, SourceCollector};
use crate::status::JobTracker;

/// A configured source paired with the collector that serves it.
#[derive(Clone)]
pub struct SourceHandle {
    pub config: SourceConfig,
    pub collector: Arc<dyn SourceCollector>,
}

impl SourceHandle {
    #[must_use]
    pub fn new(config: SourceConfig, collector: Arc<dyn SourceCollector>) -> Self {
        Self { config, collector }
    }

    /// A source served by its configured external command.
    #[must_use]
    pub fn command(config: SourceConfig) -> Self {
        let collector = Arc::new(CommandCollector::from_config(&config));
        Self { config, collector }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }
}

/// How one source ended.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceOutcome {
    pub source: String,
    pub status: StageStatus,
    pub records: usize,
    pub error: Option<String>,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Default)]
pub struct CollectionOutcome {
    /// All records, concatenated in source dispatch order.
    pub records: Vec<InteractionRecord>,
    pub sources: Vec<SourceOutcome>,
}

impl CollectionOutcome {
    #[must_use]
    pub fn source_counts(&self) -> BTreeMap<String, usize> {
        self.sources
            .iter()
            .map(|s| (s.source.clone(), s.records))
            .collect()
    }
}

pub struct CollectionCoordinator {
    sources: Vec<SourceHandle>,
    default_timeout: Duration,
}

impl CollectionCoordinator {
    #[must_use]
    pub fn new(sources: Vec<SourceHandle>, default_timeout: Duration) -> Self {
        Self {
            sources,
            default_timeout,
        }
    }

    #[must_use]
    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.config.name.clone()).collect()
    }

    /// Collect `target_count` records per source for `topic`.
    ///
    /// The job's sources are expected to be `pending` already; each moves to
    /// `running` at dispatch and to `completed` or `failed` when it settles.
    pub async fn run_collection(
        &self,
        tracker: &JobTracker,
        job_id: Uuid,
        topic: &str,
        target_count: u32,
    ) -> CollectionOutcome {
        let units = self
            .sources
            .iter()
            .map(|source| self.run_source(tracker, job_id, source, topic, target_count));
        let results = join_all(units).await;

        let mut outcome = CollectionOutcome::default();
        for (source_outcome, records) in results {
            outcome.records.extend(records);
            outcome.sources.push(source_outcome);
        }

        tracing::info!(
            topic,
            records = outcome.records.len(),
            failed = outcome
                .sources
                .iter()
                .filter(|s| s.status == StageStatus::Failed)
                .count(),
            "collection finished"
        );
        outcome
    }

    async fn run_source(
        &self,
        tracker: &JobTracker,
        job_id: Uuid,
        source: &SourceHandle,
        topic: &str,
        target_count: u32,
    ) -> (SourceOutcome, Vec<InteractionRecord>) {
        let name = source.config.name.clone();
        let limit = source
            .config
            .timeout_secs
            .map_or(self.default_timeout, Duration::from_secs);
        let request = CollectRequest {
            topic: topic.to_string(),
            target_count: source.config.scaled_target(target_count),
            credentials: source.config.credentials.clone(),
        };

        tracker
            .source_status(job_id, &name, StageStatus::Running)
            .await;

        let started = Instant::now();
        let collector = Arc::clone(&source.collector);
        let mut handle = tokio::spawn(async move { collector.collect(request).await });

        let result = match tokio::time::timeout(limit, &mut handle).await {
            Ok(Ok(Ok(records))) => Ok(records),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Err(join_error)) => Err(format!("collector task failed: {join_error}")),
            Err(_) => {
                handle.abort();
                Err(format!("timed out after {}s", limit.as_secs()))
            }
        };
        let elapsed_secs = started.elapsed().as_secs_f64();

        match result {
            Ok(mut records) => {
                for record in &mut records {
                    if record.platform.trim().is_empty() {
                        record.platform.clone_from(&name);
                    }
                }
                tracker
                    .source_status(job_id, &name, StageStatus::Completed)
                    .await;
                tracing::info!(
                    source = name.as_str(),
                    count = records.len(),
                    elapsed_secs,
                    "source completed"
                );
                (
                    SourceOutcome {
                        source: name,
                        status: StageStatus::Completed,
                        records: records.len(),
                        error: None,
                        elapsed_secs,
                    },
                    records,
                )
            }
            Err(reason) => {
                tracker
                    .source_status(job_id, &name, StageStatus::Failed)
                    .await;
                tracing::warn!(
                    source = name.as_str(),
                    error = reason.as_str(),
                    elapsed_secs,
                    "source failed"
                );
                (
                    SourceOutcome {
                        source: name,
                        status: StageStatus::Failed,
                        records: 0,
                        error: Some(reason),
                        elapsed_secs,
                    },
                    Vec::new(),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarvestError;
    use async_trait::async_trait;
    use pulse_db::{HarvestStore, MemoryStore};

    struct Fixed(Vec<InteractionRecord>);

    #[async_trait]
    impl SourceCollector for Fixed {
        async fn collect(
            &self,
            _request: CollectRequest,
        ) -> Result<Vec<InteractionRecord>, HarvestError> {
            Ok(self.0.clone())
        }
    }

    struct Hangs;

    #[async_trait]
    impl SourceCollector for Hangs {
        async fn collect(
            &self,
            _request: CollectRequest,
        ) -> Result<Vec<InteractionRecord>, HarvestError> {
            futures::future::pending().await
        }
    }

    struct Panics;

    #[async_trait]
    impl SourceCollector for Panics {
        async fn collect(
            &self,
            _request: CollectRequest,
        ) -> Result<Vec<InteractionRecord>, HarvestError> {
            panic!("scraper blew up")
        }
    }

    struct EchoTarget;

    #[async_trait]
    impl SourceCollector for EchoTarget {
        async fn collect(
            &self,
            request: CollectRequest,
        ) -> Result<Vec<InteractionRecord>, HarvestError> {
            Ok(vec![InteractionRecord::post(
                "",
                None,
                "bot",
                request.target_count.to_string(),
            )])
        }
    }

    fn handle(name: &str, collector: impl SourceCollector + 'static) -> SourceHandle {
        SourceHandle::new(SourceConfig::named(name), Arc::new(collector))
    }

    async fn setup(
        sources: Vec<SourceHandle>,
        timeout: Duration,
    ) -> (CollectionCoordinator, JobTracker, Arc<MemoryStore>, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let tracker = JobTracker::new(store.clone());
        let coordinator = CollectionCoordinator::new(sources, timeout);
        let job = tracker
            .start("T", 10, &coordinator.source_names())
            .await
            .unwrap();
        (coordinator, tracker, store, job.id)
    }

    #[tokio::test]
    async fn failures_are_isolated_and_merge_follows_dispatch_order() {
        let (coordinator, tracker, store, job_id) = setup(
            vec![
                handle("panics", Panics),
                handle(
                    "b",
                    Fixed(vec![InteractionRecord::post("b", Some(1), "x", "b1")]),
                ),
                handle("hangs", Hangs),
                handle(
                    "a",
                    Fixed(vec![
                        InteractionRecord::post("a", Some(1), "x", "a1"),
                        InteractionRecord::post("a", Some(2), "x", "a2"),
                    ]),
                ),
            ],
            Duration::from_millis(100),
        )
        .await;

        let outcome = coordinator.run_collection(&tracker, job_id, "T", 10).await;

        let contents: Vec<&str> = outcome
            .records
            .iter()
            .map(|r| r.post_content.as_str())
            .collect();
        assert_eq!(contents, vec!["b1", "a1", "a2"]);
        assert_eq!(outcome.source_counts()["a"], 2);
        assert_eq!(outcome.source_counts()["hangs"], 0);

        let job = store.get_job("T").await.unwrap().unwrap();
        assert_eq!(job.sources["panics"], StageStatus::Failed);
        assert_eq!(job.sources["hangs"], StageStatus::Failed);
        assert_eq!(job.sources["a"], StageStatus::Completed);
        assert_eq!(job.sources["b"], StageStatus::Completed);
    }

    #[tokio::test]
    async fn per_source_timeout_overrides_default() {
        let mut config = SourceConfig::named("slow");
        config.timeout_secs = Some(1);
        let (coordinator, tracker, _store, job_id) = setup(
            vec![SourceHandle::new(config, Arc::new(Hangs))],
            Duration::from_secs(3600),
        )
        .await;

        let started = Instant::now();
        let outcome = coordinator.run_collection(&tracker, job_id, "T", 10).await;
        assert!(started.elapsed() < Duration::from_secs(30));
        assert_eq!(outcome.sources[0].status, StageStatus::Failed);
        assert!(outcome.sources[0]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("timed out")));
    }

    #[tokio::test]
    async fn target_is_scaled_and_platform_defaulted() {
        let mut config = SourceConfig::named("tiktok");
        config.target_multiplier = 3;
        let (coordinator, tracker, _store, job_id) = setup(
            vec![SourceHandle::new(config, Arc::new(EchoTarget))],
            Duration::from_secs(5),
        )
        .await;

        let outcome = coordinator.run_collection(&tracker, job_id, "T", 10).await;
        assert_eq!(outcome.records[0].post_content, "30");
        assert_eq!(outcome.records[0].platform, "tiktok");
    }
}
