//! # Preempt Core Library
//!
//! A personal scheduling engine that packs Pomodoro-style focus blocks into
//! recurring contexts (Work, Personal, ...) whose boundaries are fuzzy.
//! The CLI binary is a thin layer over the same library.
//!
//! ## Architecture
//!
//! - **Contexts**: recurring windows with dated revisions, one-off exceptions
//!   and a log of where their boundaries actually fell
//! - **Predictor**: turns that log into a fuzzy start/end per date
//! - **Tasks**: a dependency graph with follow-up rules that spawn new work
//! - **Scheduler**: a deterministic, preemptive pass over the predicted windows
//! - **Storage**: SQLite persistence and TOML configuration
//!
//! ## Key Components
//!
//! - [`Planner`]: the facade callers use; serializes mutations and coalesces rebuilds
//! - [`Scheduler`]: builds a [`Schedule`] for a [`Horizon`]
//! - [`BoundaryPredictor`]: boundary prediction from observed deltas
//! - [`PlanStore`]: task and context persistence
//! - [`Config`]: application configuration management

pub mod context;
pub mod error;
pub mod events;
pub mod planner;
pub mod predictor;
pub mod priority;
pub mod schedule;
pub mod scheduler;
pub mod storage;
pub mod task;
pub mod time;

pub use context::{ActiveDays, BoundaryObservation, Context, ContextException, ContextPatch, ContextRegistry};
pub use error::{ConfigError, CoreError, PlanError, StorageError};
pub use events::PlannerEvent;
pub use planner::Planner;
pub use predictor::{BoundaryPredictor, PredictorConfig, ResolvedWindow, WindowCalendar};
pub use priority::{PriorityConfig, PriorityEngine, Urgency};
pub use schedule::{BlockReason, EntryKind, Horizon, Schedule, ScheduleEntry, TaskOutcome};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use storage::{Config, PlanStore};
pub use task::{CompletionDetails, FollowUpRule, PrerequisiteResolver, Task, TaskDraft, TaskGraph, TaskStatus};
pub use time::{FuzzyInterval, Span};
