//! Acquisition tasks.
//!
//! A [`Task`] is one unit of acquisition work: fetch a source locator and
//! produce a raw record. Tasks are owned by the queue until a worker claims
//! them, and only the claiming worker and the retry policy mutate them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::routing::RouteDecision;

/// Lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting in the queue, or backing off before a retry.
    Pending,
    /// An attempt is executing.
    Running,
    /// An attempt produced a raw record.
    Succeeded,
    /// Terminal failure: retries exhausted, refused, or cancelled.
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Succeeded => write!(f, "succeeded"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A source to acquire from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceSpec {
    /// Stable identifier of the source (e.g. a county records portal).
    pub id: String,
    /// URL or query the acquirer resolves.
    pub locator: String,
    /// Expected lead category, if the source is category-specific.
    #[serde(default)]
    pub category: Option<String>,
}

impl SourceSpec {
    pub fn new(id: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            locator: locator.into(),
            category: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// A unit of acquisition work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: Uuid,
    pub source_id: String,
    pub locator: String,
    #[serde(default)]
    pub category_hint: Option<String>,
    /// Attempts started so far.
    pub attempts: u32,
    pub status: TaskStatus,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Venue decision for each attempt, in order.
    #[serde(default)]
    pub routes: Vec<RouteDecision>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(source_id: impl Into<String>, locator: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source_id: source_id.into(),
            locator: locator.into(),
            category_hint: None,
            attempts: 0,
            status: TaskStatus::Pending,
            last_error: None,
            routes: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn from_source(source: &SourceSpec) -> Self {
        let mut task = Self::new(&source.id, &source.locator);
        task.category_hint = source.category.clone();
        task
    }

    pub fn with_category_hint(mut self, category: impl Into<String>) -> Self {
        self.category_hint = Some(category.into());
        self
    }

    /// Starts a new attempt on the decided venue.
    pub fn begin_attempt(&mut self, route: RouteDecision) {
        self.attempts += 1;
        self.status = TaskStatus::Running;
        self.routes.push(route);
        self.updated_at = Utc::now();
    }

    /// Records a failed attempt that will be retried.
    pub fn mark_retrying(&mut self, error: impl ToString) {
        self.status = TaskStatus::Pending;
        self.last_error = Some(error.to_string());
        self.updated_at = Utc::now();
    }

    pub fn mark_succeeded(&mut self) {
        self.status = TaskStatus::Succeeded;
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self, error: impl ToString) {
        self.status = TaskStatus::Failed;
        self.last_error = Some(error.to_string());
        self.updated_at = Utc::now();
    }

    /// Whether another attempt fits in a budget of `max_attempts`.
    pub fn can_retry(&self, max_attempts: u32) -> bool {
        self.attempts < max_attempts
    }

    /// Route decision of the latest attempt.
    pub fn last_route(&self) -> Option<&RouteDecision> {
        self.routes.last()
    }
}
