use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::context::ContextId;
use crate::task::TaskId;

/// Every change to the planner's state produces an event.
/// Callers drain them after each operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlannerEvent {
    TaskAdded {
        task_id: TaskId,
        name: String,
        context_id: ContextId,
        at: DateTime<Utc>,
    },
    TaskCompleted {
        task_id: TaskId,
        /// Dependents released by the completion.
        released: Vec<TaskId>,
        at: DateTime<Utc>,
    },
    /// A follow-up rule created a task.
    FollowUpCreated {
        task_id: TaskId,
        spawned_by: TaskId,
        rule: String,
        at: DateTime<Utc>,
    },
    PrerequisiteAdded {
        task_id: TaskId,
        prerequisite: TaskId,
        at: DateTime<Utc>,
    },
    ContextAdded {
        context_id: ContextId,
        name: String,
        at: DateTime<Utc>,
    },
    ContextEdited {
        context_id: ContextId,
        effective_from: Option<NaiveDate>,
        at: DateTime<Utc>,
    },
    BoundaryObserved {
        context_id: ContextId,
        date: NaiveDate,
        start_delta_secs: i64,
        end_delta_secs: i64,
        at: DateTime<Utc>,
    },
    ScheduleRebuilt {
        entries: usize,
        blocked: usize,
        preemptions: usize,
        at: DateTime<Utc>,
    },
    /// A build outcome changed a task's status.
    TaskBlocked {
        task_id: TaskId,
        at: DateTime<Utc>,
    },
    TaskUnblocked {
        task_id: TaskId,
        at: DateTime<Utc>,
    },
}
