//! Domain types and configuration shared by every SentimentPulse crate.

pub mod app_config;
pub mod config;
pub mod jobs;
pub mod records;
pub mod report;
pub mod sources;

use thiserror::Error;

pub use app_config::{AppConfig, Environment};
pub use config::{build_app_config, load_app_config, load_app_config_from_env};
pub use jobs::{ClassificationStatus, Job, StageStatus};
pub use records::{
    CommentEntry, GroupKey, InteractionRecord, PostAggregate, SentimentLabel, UNCLASSIFIED,
};
pub use report::{AnalysisReport, HistoryEntry, SentimentSummary, TimingMetrics};
pub use sources::{load_sources, SourceConfig, SourceCredentials, SourcesFile};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read sources file {path}: {source}")]
    SourcesFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse sources file: {0}")]
    SourcesFileParse(#[from] serde_yaml::Error),

    #[error("sources validation failed: {0}")]
    Validation(String),
}
