//! Harvest-and-classify pipeline for SentimentPulse.
//!
//! Collects interaction records for a topic from every configured source in
//! parallel (each bounded by its own timeout), labels every record through a
//! [`Classifier`] with bounded concurrency, groups records into post
//! aggregates, summarizes them, and persists the result through a
//! [`pulse_db::HarvestStore`]. Per-source and classification progress is
//! tracked on the job record so callers can poll it.

pub mod classifier;
pub mod classify;
pub mod collector;
pub mod consolidate;
pub mod coordinator;
pub mod error;
pub mod pipeline;
pub mod status;

pub use classifier::{ChatClassifier, Classification, Classifier, Narrator};
pub use classify::{build_payload, classify_all, classify_unresolved, ClassifyOutcome};
pub use collector::{parse_records, CollectRequest, CommandCollector, SourceCollector};
pub use consolidate::{dominant_label, group, summarize};
pub use coordinator::{CollectionCoordinator, CollectionOutcome, SourceHandle, SourceOutcome};
pub use error::HarvestError;
pub use pipeline::{Harvester, JobOutcome};
pub use status::JobTracker;
