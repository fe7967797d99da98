//! Job status model: one status per source plus one for classification.
//!
//! Both state machines are monotonic. A status may only move forward, and
//! terminal states (`completed`, `failed`) never change again.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-source collection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StageStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
        }
    }

    #[must_use]
    pub fn rank(self) -> i16 {
        match self {
            StageStatus::Pending => 0,
            StageStatus::Running => 1,
            StageStatus::Completed | StageStatus::Failed => 2,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Failed)
    }

    /// `pending → running → {completed | failed}`; skipping `running` is
    /// allowed (a source can fail before it ever starts).
    #[must_use]
    pub fn can_transition_to(self, next: StageStatus) -> bool {
        next.rank() > self.rank()
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StageStatus::Pending),
            "running" => Ok(StageStatus::Running),
            "completed" => Ok(StageStatus::Completed),
            "failed" => Ok(StageStatus::Failed),
            other => Err(format!("unknown stage status: {other}")),
        }
    }
}

/// Status of the classification stage. There is no failure state: the
/// stage always produces a label for every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationStatus {
    Pending,
    Running,
    Completed,
}

impl ClassificationStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ClassificationStatus::Pending => "pending",
            ClassificationStatus::Running => "running",
            ClassificationStatus::Completed => "completed",
        }
    }

    #[must_use]
    pub fn rank(self) -> i16 {
        match self {
            ClassificationStatus::Pending => 0,
            ClassificationStatus::Running => 1,
            ClassificationStatus::Completed => 2,
        }
    }

    #[must_use]
    pub fn can_transition_to(self, next: ClassificationStatus) -> bool {
        next.rank() > self.rank()
    }
}

impl fmt::Display for ClassificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClassificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ClassificationStatus::Pending),
            "running" => Ok(ClassificationStatus::Running),
            "completed" => Ok(ClassificationStatus::Completed),
            other => Err(format!("unknown classification status: {other}")),
        }
    }
}

/// One end-to-end execution for a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub topic: String,
    pub target_count: u32,
    pub sources: BTreeMap<String, StageStatus>,
    pub classification: ClassificationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set once the pipeline has finished, whether or not its writes
    /// succeeded.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A fresh job with every source and the classification stage pending.
    #[must_use]
    pub fn new<I, S>(topic: &str, target_count: u32, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            topic: topic.to_string(),
            target_count,
            sources: sources
                .into_iter()
                .map(|s| (s.into(), StageStatus::Pending))
                .collect(),
            classification: ClassificationStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Every source has reached a terminal state.
    #[must_use]
    pub fn collection_finished(&self) -> bool {
        self.sources.values().all(|s| s.is_terminal())
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_status_only_moves_forward() {
        use StageStatus::{Completed, Failed, Pending, Running};

        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Failed));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));

        assert!(!Running.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn classification_status_only_moves_forward() {
        use ClassificationStatus::{Completed, Pending, Running};

        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Running.can_transition_to(Pending));
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            StageStatus::Pending,
            StageStatus::Running,
            StageStatus::Completed,
            StageStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<StageStatus>(), Ok(status));
        }
        assert!("done".parse::<StageStatus>().is_err());
    }

    #[test]
    fn new_job_starts_pending() {
        let job = Job::new("T", 10, ["twitter", "facebook"]);
        assert_eq!(job.sources.len(), 2);
        assert!(job.sources.values().all(|s| *s == StageStatus::Pending));
        assert_eq!(job.classification, ClassificationStatus::Pending);
        assert!(!job.collection_finished());
        assert!(!job.is_complete());
    }
}
