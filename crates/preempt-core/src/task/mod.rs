//! Tasks and their lifecycle.
//!
//! A task lives in exactly one context and may depend on other tasks. Its
//! remaining work is `estimated_minutes - elapsed_minutes`, which survives
//! preemption and re-planning.

mod graph;
mod resolver;

pub use graph::TaskGraph;
pub use resolver::{
    AppointmentParams, AppointmentRule, Completion, CompletionDetails, FollowUp, FollowUpRule,
    PrerequisiteResolver, Reservation,
};

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::context::ContextId;

/// Unique identifier for a task.
pub type TaskId = String;

/// Task status.
///
///   PENDING ──> READY ──> SCHEDULED ──> IN_PROGRESS ──> COMPLETED
///                 ^  \        |  ^           |
///                 |   \       v  |           |
///                 +---- BLOCKED <------------+
///
/// Pending tasks wait on prerequisites. Blocked tasks cannot meet their
/// deadline (or their context is unschedulable) and return to ready once a
/// rebuild finds them feasible. Completed is terminal.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Ready,
    Scheduled,
    InProgress,
    Completed,
    Blocked,
}

impl TaskStatus {
    /// Check if a transition is valid.
    pub fn can_transition_to(&self, to: &TaskStatus) -> bool {
        self.valid_transitions().contains(to)
    }

    /// Get valid next states for this state.
    pub fn valid_transitions(&self) -> &[TaskStatus] {
        use TaskStatus::*;
        match self {
            Pending => &[Pending, Ready, Completed],
            Ready => &[Ready, Pending, Scheduled, InProgress, Blocked, Completed],
            Scheduled => &[Scheduled, Pending, Ready, InProgress, Blocked, Completed],
            InProgress => &[InProgress, Pending, Ready, Scheduled, Blocked, Completed],
            Blocked => &[Blocked, Pending, Ready, Scheduled, InProgress, Completed],
            Completed => &[],
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, TaskStatus::Completed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Ready => "ready",
            TaskStatus::Scheduled => "scheduled",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Blocked => "blocked",
        };
        f.write_str(label)
    }
}

/// Names a registered follow-up rule and its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpSpec {
    pub rule: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// A description of a thing to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub estimated_minutes: u32,
    #[serde(default)]
    pub elapsed_minutes: u32,
    pub deadline: Option<DateTime<Utc>>,
    pub context_id: ContextId,
    pub status: TaskStatus,
    /// User priority (0-10); `None` uses the configured default
    pub priority: Option<u8>,
    #[serde(default)]
    pub prerequisites: BTreeSet<TaskId>,
    /// Inverse of `prerequisites`, maintained by the graph.
    #[serde(default)]
    pub dependents: BTreeSet<TaskId>,
    #[serde(default)]
    pub follow_up: Option<FollowUpSpec>,
    /// Task whose completion synthesized this one.
    #[serde(default)]
    pub spawned_by: Option<TaskId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(name: impl Into<String>, context_id: impl Into<String>, estimated_minutes: u32) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            estimated_minutes,
            elapsed_minutes: 0,
            deadline: None,
            context_id: context_id.into(),
            status: TaskStatus::Pending,
            priority: None,
            prerequisites: BTreeSet::new(),
            dependents: BTreeSet::new(),
            follow_up: None,
            spawned_by: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority.min(10));
        self
    }

    pub fn with_follow_up(mut self, rule: impl Into<String>, params: serde_json::Value) -> Self {
        self.follow_up = Some(FollowUpSpec {
            rule: rule.into(),
            params,
        });
        self
    }

    /// Work still to do.
    pub fn remaining(&self) -> Duration {
        Duration::minutes(self.estimated_minutes.saturating_sub(self.elapsed_minutes) as i64)
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// Everything needed to create a task; the context is referenced by id or name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub estimated_minutes: u32,
    pub deadline: Option<DateTime<Utc>>,
    pub context: String,
    #[serde(default)]
    pub prerequisites: Vec<TaskId>,
    pub priority: Option<u8>,
    #[serde(default)]
    pub follow_up: Option<FollowUpSpec>,
}

impl TaskDraft {
    pub fn new(name: impl Into<String>, context: impl Into<String>, estimated_minutes: u32) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            estimated_minutes,
            deadline: None,
            context: context.into(),
            prerequisites: Vec::new(),
            priority: None,
            follow_up: None,
        }
    }

    /// Materialize the draft against a resolved context id.
    pub fn into_task(self, context_id: ContextId) -> Task {
        let mut task = Task::new(self.name, context_id, self.estimated_minutes)
            .with_description(self.description);
        task.deadline = self.deadline;
        task.priority = self.priority.map(|p| p.min(10));
        task.follow_up = self.follow_up;
        task
    }
}
