//! The schedule artifact.
//!
//! A schedule is derived and disposable: it is rebuilt whenever tasks,
//! contexts or observations change and is never edited by hand.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::ContextId;
use crate::error::PlanError;
use crate::predictor::ResolvedWindow;
use crate::priority::Urgency;
use crate::task::{TaskId, TaskStatus};
use crate::time::{at, Span};

/// The range a schedule covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Horizon {
    pub start: DateTime<Utc>,
    pub days: u32,
}

impl Horizon {
    pub fn new(start: DateTime<Utc>, days: u32) -> Self {
        Self { start, days }
    }

    /// Horizon starting at midnight of `date`.
    pub fn from_date(date: NaiveDate, days: u32) -> Self {
        Self::new(at(date, NaiveTime::MIN), days)
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start + Duration::days(self.days as i64)
    }

    pub fn span(&self) -> Span {
        Span::new(self.start, self.end())
    }
}

/// Type of schedule entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Slice of a task inside a focus quantum
    Focus,
    ShortBreak,
    LongBreak,
    /// Waiting inside a window for a dependent task to be released
    Idle,
}

impl EntryKind {
    pub fn is_break(&self) -> bool {
        matches!(self, EntryKind::ShortBreak | EntryKind::LongBreak)
    }
}

/// One interval of the schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub kind: EntryKind,
    pub context_id: ContextId,
    pub task_id: Option<TaskId>,
    pub task_name: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Ends after the latest-safe boundary of its window.
    #[serde(default)]
    pub at_risk: bool,
}

impl ScheduleEntry {
    pub fn span(&self) -> Span {
        Span::new(self.start_time, self.end_time)
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }
}

/// Why a task could not be scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BlockReason {
    /// Not enough context capacity before the deadline, even unshared.
    InfeasibleDeadline {
        required_minutes: i64,
        available_minutes: i64,
    },
    /// The deadline passed inside the horizon with work remaining.
    DeadlineMissed { remaining_minutes: i64 },
    /// The task's context cannot be resolved.
    UnschedulableContext { detail: String },
}

/// What happened to a task in a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// All remaining work placed.
    Scheduled { completes_at: DateTime<Utc> },
    /// Some work placed, the rest falls beyond the horizon.
    Partial {
        placed_minutes: i64,
        remaining_minutes: i64,
    },
    /// Ready but no capacity was left inside the horizon.
    Unplaced,
    /// Prerequisites do not complete inside the horizon.
    Waiting { on: Vec<TaskId> },
    Blocked(BlockReason),
}

impl TaskOutcome {
    pub fn is_blocked(&self) -> bool {
        matches!(self, TaskOutcome::Blocked(_))
    }

    /// Status the live task should take after a build.
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskOutcome::Scheduled { .. } | TaskOutcome::Partial { .. } => TaskStatus::Scheduled,
            TaskOutcome::Unplaced => TaskStatus::Ready,
            TaskOutcome::Waiting { .. } => TaskStatus::Pending,
            TaskOutcome::Blocked(_) => TaskStatus::Blocked,
        }
    }
}

/// Per-task summary of a build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_id: TaskId,
    pub task_name: String,
    pub context_id: ContextId,
    /// Urgency at the horizon start.
    pub urgency: Urgency,
    pub outcome: TaskOutcome,
}

impl TaskReport {
    /// The blocking problem as an error, for callers that report rather than render.
    pub fn error(&self) -> Option<PlanError> {
        let TaskOutcome::Blocked(reason) = &self.outcome else {
            return None;
        };
        Some(match reason {
            BlockReason::InfeasibleDeadline {
                required_minutes,
                available_minutes,
            } => PlanError::InfeasibleDeadline {
                task: self.task_name.clone(),
                required_minutes: *required_minutes,
                available_minutes: *available_minutes,
            },
            BlockReason::DeadlineMissed { remaining_minutes } => PlanError::InfeasibleDeadline {
                task: self.task_name.clone(),
                required_minutes: *remaining_minutes,
                available_minutes: 0,
            },
            BlockReason::UnschedulableContext { detail } => PlanError::UnschedulableContext {
                context: self.context_id.clone(),
                reason: detail.clone(),
            },
        })
    }
}

/// A running task displaced at a quantum boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preemption {
    pub task_id: TaskId,
    pub by: TaskId,
    pub at: DateTime<Utc>,
}

/// Ordered work, breaks and idle gaps over a horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub horizon: Horizon,
    pub entries: Vec<ScheduleEntry>,
    pub tasks: BTreeMap<TaskId, TaskReport>,
    #[serde(default)]
    pub preemptions: Vec<Preemption>,
    /// Resolved windows intersecting the horizon.
    #[serde(default)]
    pub windows: Vec<ResolvedWindow>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl Schedule {
    pub fn empty(horizon: Horizon) -> Self {
        Self {
            horizon,
            entries: Vec::new(),
            tasks: BTreeMap::new(),
            preemptions: Vec::new(),
            windows: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn focus_entries(&self) -> impl Iterator<Item = &ScheduleEntry> {
        self.entries.iter().filter(|e| e.kind == EntryKind::Focus)
    }

    pub fn entries_for<'a>(&'a self, task_id: &'a str) -> impl Iterator<Item = &'a ScheduleEntry> {
        self.focus_entries()
            .filter(move |e| e.task_id.as_deref() == Some(task_id))
    }

    pub fn placed_minutes(&self, task_id: &str) -> i64 {
        self.entries_for(task_id).map(|e| e.duration_minutes()).sum()
    }

    pub fn outcome(&self, task_id: &str) -> Option<&TaskOutcome> {
        self.tasks.get(task_id).map(|r| &r.outcome)
    }

    /// Tasks that ended up blocked, in id order.
    pub fn blocked(&self) -> impl Iterator<Item = &TaskReport> {
        self.tasks.values().filter(|r| r.outcome.is_blocked())
    }

    pub fn at_risk(&self) -> impl Iterator<Item = &ScheduleEntry> {
        self.entries.iter().filter(|e| e.at_risk)
    }

    /// Entries whose start falls on `date`.
    pub fn entries_on(&self, date: NaiveDate) -> impl Iterator<Item = &ScheduleEntry> {
        self.entries
            .iter()
            .filter(move |e| e.start_time.date_naive() == date)
    }

    /// Pretty JSON. Identical schedules give identical output.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
