//! Classification job data types, owned and mutated by the engine.

use crate::{JobId, Timestamp};
use serde::{Deserialize, Serialize};

/// Which items a job classifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemScope {
    /// Every item in the cache.
    All,
    /// Only items with update-time strictly greater than the tagger's
    /// last-classified time. Subject to the batching race documented
    /// in DESIGN.md — not fixed here, per design intent.
    New,
}

/// Job-level error kinds (distinct from the lower-level
/// [`crate::EngineError`] they are derived from at the HTTP boundary).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum JobErrorKind {
    NoSuchTag,
    NoTagsForUser,
    BadJobType,
    MissingItemTimeout,
    CheckedOut,
    UnknownError,
}

/// Lifecycle state of a classification job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Training,
    Classifying,
    Inserting,
    Complete,
    Cancelled,
    Error,
}

/// A classification job as tracked by the engine. Jobs are owned
/// exclusively by the engine; they outlive completion until explicit
/// deletion or auto-cleanup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub tag_url: String,
    pub progress: f64,
    pub state: JobState,
    pub error_kind: Option<JobErrorKind>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub trained_at: Option<Timestamp>,
    pub classified_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub item_scope: ItemScope,
    pub items_classified: u64,
    pub auto_cleanup: bool,
    /// Set the first time this job is requeued for `CheckedOut` or a
    /// pending tagger, so the missing-item timeout can be measured.
    pub first_time_tried: Option<Timestamp>,
}

impl Job {
    pub fn new(id: JobId, tag_url: impl Into<String>, item_scope: ItemScope, now: Timestamp) -> Self {
        Self {
            id,
            tag_url: tag_url.into(),
            progress: 0.0,
            state: JobState::Waiting,
            error_kind: None,
            error_message: None,
            created_at: now,
            started_at: None,
            trained_at: None,
            classified_at: None,
            completed_at: None,
            item_scope,
            items_classified: 0,
            auto_cleanup: true,
            first_time_tried: None,
        }
    }

    /// Cancelled jobs are invisible to HTTP GET; callers should treat
    /// them the same as "unknown job".
    pub fn visible_to_get(&self) -> bool {
        self.state != JobState::Cancelled
    }
}

/// A single (item, strength) result produced by classifying one item
/// with one tagger.
#[derive(Debug, Clone, PartialEq)]
pub struct Tagging {
    pub item_id: String,
    pub strength: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityIdType;
    use chrono::Utc;

    #[test]
    fn cancelled_job_is_not_visible_to_get() {
        let mut job = Job::new(JobId::now_v7(), "https://example.com/tag", ItemScope::All, Utc::now());
        job.state = JobState::Cancelled;
        assert!(!job.visible_to_get());
    }

    #[test]
    fn new_job_starts_waiting_with_zero_progress() {
        let job = Job::new(JobId::now_v7(), "https://example.com/tag", ItemScope::New, Utc::now());
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.progress, 0.0);
        assert!(job.first_time_tried.is_none());
    }
}
