//! Preemptive Pomodoro scheduler.
//!
//! Builds a [`Schedule`] from the task graph and the context registry:
//! - Resolves every context's fuzzy windows over the horizon plus lookahead
//! - Releases tasks once their prerequisites are projected to complete
//! - Packs each window in focus quanta, re-ranking by urgency at every
//!   quantum start and preempting only for strictly higher urgency
//! - Surfaces infeasible and missed deadlines as blocked outcomes
//!
//! The build is a pure function of its inputs.

mod packer;

use std::collections::{BTreeMap, BTreeSet};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::context::ContextRegistry;
use crate::predictor::{BoundaryPredictor, WindowCalendar};
use crate::priority::PriorityEngine;
use crate::schedule::{BlockReason, Horizon, Schedule, TaskOutcome, TaskReport};
use crate::task::{TaskGraph, TaskId};

use packer::{Packer, WorkItem};

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Focus quantum (minutes)
    pub focus_minutes: u32,
    /// Short break (minutes)
    pub short_break_minutes: u32,
    /// Long break (minutes)
    pub long_break_minutes: u32,
    /// Consecutive quanta before a long break
    pub quanta_before_long_break: u32,
    /// Smallest slice a task is split into (minutes)
    pub min_slice_minutes: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            focus_minutes: 25,
            short_break_minutes: 5,
            long_break_minutes: 15,
            quanta_before_long_break: 4,
            min_slice_minutes: 5,
        }
    }
}

impl SchedulerConfig {
    pub(crate) fn focus(&self) -> Duration {
        Duration::minutes(self.focus_minutes.max(1) as i64)
    }

    pub(crate) fn min_slice(&self) -> Duration {
        Duration::minutes(self.min_slice_minutes.max(1) as i64)
    }

    /// Break after the `completed`-th consecutive quantum, and whether it is long.
    pub(crate) fn break_after(&self, completed: u32) -> (Duration, bool) {
        let every = self.quanta_before_long_break.max(1);
        if completed > 0 && completed % every == 0 {
            (Duration::minutes(self.long_break_minutes as i64), true)
        } else {
            (Duration::minutes(self.short_break_minutes as i64), false)
        }
    }
}

/// Default days resolved ahead for deadline feasibility.
const DEFAULT_LOOKAHEAD_DAYS: u32 = 28;

/// Preemptive Pomodoro scheduler
#[derive(Debug, Clone)]
pub struct Scheduler {
    config: SchedulerConfig,
    predictor: BoundaryPredictor,
    priority: PriorityEngine,
    lookahead_days: u32,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            config: SchedulerConfig::default(),
            predictor: BoundaryPredictor::new(),
            priority: PriorityEngine::new(),
            lookahead_days: DEFAULT_LOOKAHEAD_DAYS,
        }
    }
}

impl Scheduler {
    /// Create a new scheduler with default config
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with custom config
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn with_predictor(mut self, predictor: BoundaryPredictor) -> Self {
        self.predictor = predictor;
        self
    }

    pub fn with_priority(mut self, priority: PriorityEngine) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_lookahead_days(mut self, days: u32) -> Self {
        self.lookahead_days = days;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Resolve windows covering the horizon and the lookahead.
    ///
    /// Starts a day early so windows crossing midnight into the horizon are kept.
    pub fn resolve_windows(&self, contexts: &ContextRegistry, horizon: &Horizon) -> WindowCalendar {
        let first = horizon.start.date_naive() - Duration::days(1);
        let days = horizon.days.max(self.lookahead_days) + 2;
        WindowCalendar::resolve(&self.predictor, contexts, first, days)
    }

    /// Build the schedule for `horizon`.
    pub fn build_schedule(
        &self,
        graph: &TaskGraph,
        contexts: &ContextRegistry,
        horizon: Horizon,
    ) -> Schedule {
        // 1. Resolve windows
        let calendar = self.resolve_windows(contexts, &horizon);

        // 2. Collect open tasks, prerequisites first
        let mut items: BTreeMap<TaskId, WorkItem<'_>> = BTreeMap::new();
        for id in graph.topological_order() {
            let Some(task) = graph.get(&id) else { continue };
            if task.is_completed() {
                continue;
            }
            let waiting_on: BTreeSet<TaskId> = graph.incomplete_prerequisites(&id).into_iter().collect();
            let mut item = WorkItem::new(task, waiting_on);

            if contexts.get(&task.context_id).is_none() {
                item.blocked = Some(BlockReason::UnschedulableContext {
                    detail: format!("unknown context '{}'", task.context_id),
                });
            } else if let Some(reason) = calendar.unschedulable_reason(&task.context_id) {
                item.blocked = Some(BlockReason::UnschedulableContext {
                    detail: reason.to_string(),
                });
            }
            items.insert(id, item);
        }

        // 3. Release tasks with nothing to wait for
        let ready: Vec<TaskId> = items
            .iter()
            .filter(|(_, item)| item.waiting_on.is_empty() && item.blocked.is_none())
            .map(|(id, _)| id.clone())
            .collect();

        let mut packer = Packer::new(&self.config, &self.priority, &calendar, horizon, items);
        for id in ready {
            packer.release(&id, horizon.start);
        }

        // 4. Pack every window in chronological order
        packer.run();

        // 5. Summarize
        let (items, entries, preemptions) = packer.finish();
        let tasks = items
            .values()
            .map(|item| {
                let report = TaskReport {
                    task_id: item.task.id.clone(),
                    task_name: item.task.name.clone(),
                    context_id: item.task.context_id.clone(),
                    urgency: self.priority.urgency(item.task, item.task.remaining(), horizon.start, &calendar),
                    outcome: outcome(item, &horizon),
                };
                if let TaskOutcome::Blocked(reason) = &report.outcome {
                    tracing::warn!(task = %report.task_name, ?reason, "task blocked");
                }
                (report.task_id.clone(), report)
            })
            .collect();

        let warnings = warnings(&calendar, &horizon);
        let horizon_span = horizon.span();
        let windows = calendar
            .windows
            .iter()
            .filter(|w| w.boundary_span().overlaps(&horizon_span))
            .cloned()
            .collect();

        tracing::info!(
            entries = entries.len(),
            preemptions = preemptions.len(),
            days = horizon.days,
            "schedule built"
        );

        Schedule {
            horizon,
            entries,
            tasks,
            preemptions,
            windows,
            warnings,
        }
    }
}

fn outcome(item: &WorkItem<'_>, horizon: &Horizon) -> TaskOutcome {
    if let Some(reason) = &item.blocked {
        return TaskOutcome::Blocked(reason.clone());
    }
    if !item.waiting_on.is_empty() {
        return TaskOutcome::Waiting {
            on: item.waiting_on.iter().cloned().collect(),
        };
    }
    if let Some(completes_at) = item.completes_at {
        return TaskOutcome::Scheduled { completes_at };
    }
    if let Some(deadline) = item.task.deadline {
        if deadline <= horizon.end() {
            return TaskOutcome::Blocked(BlockReason::DeadlineMissed {
                remaining_minutes: item.remaining.num_minutes(),
            });
        }
    }
    if item.placed > Duration::zero() {
        TaskOutcome::Partial {
            placed_minutes: item.placed.num_minutes(),
            remaining_minutes: item.remaining.num_minutes(),
        }
    } else {
        TaskOutcome::Unplaced
    }
}

fn warnings(calendar: &WindowCalendar, horizon: &Horizon) -> Vec<String> {
    let span = horizon.span();
    let mut warnings = Vec::new();
    for (context, reason) in &calendar.unschedulable {
        warnings.push(format!("context {context} is unschedulable: {reason}"));
    }
    for (context, date, reason) in &calendar.skipped_days {
        if calendar.unschedulable.contains_key(context) {
            continue;
        }
        warnings.push(format!("context {context} skipped on {date}: {reason}"));
    }
    for window in calendar.windows.iter().filter(|w| w.boundary_span().overlaps(&span)) {
        if window.low_confidence() {
            warnings.push(format!(
                "low-confidence prediction for {} on {}",
                window.context_name, window.date
            ));
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ActiveDays, Context};
    use crate::schedule::{EntryKind, Preemption};
    use crate::task::Task;
    use crate::time::at;
    use chrono::{NaiveDate, NaiveTime};

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
    }

    fn work() -> ContextRegistry {
        let mut registry = ContextRegistry::new();
        registry
            .add(Context::new("Work", ActiveDays::weekdays(), t(9, 0), t(17, 0), 10).with_id("work"))
            .unwrap();
        registry
    }

    fn one_day() -> Horizon {
        Horizon::from_date(monday(), 1)
    }

    #[test]
    fn long_task_gets_quanta_and_breaks() {
        let mut graph = TaskGraph::new();
        graph.insert(Task::new("Report", "work", 90).with_id("report")).unwrap();

        let schedule = Scheduler::new().build_schedule(&graph, &work(), one_day());
        let focus: Vec<_> = schedule.focus_entries().collect();
        let breaks: Vec<_> = schedule.entries.iter().filter(|e| e.kind.is_break()).collect();

        assert_eq!(focus.len(), 4);
        assert_eq!(breaks.len(), 3);
        assert_eq!(focus[0].start_time, at(monday(), t(9, 10)));
        assert_eq!(focus[3].end_time, at(monday(), t(10, 55)));
        assert_eq!(
            schedule.outcome("report"),
            Some(&TaskOutcome::Scheduled { completes_at: at(monday(), t(10, 55)) })
        );
    }

    #[test]
    fn short_tasks_share_a_quantum() {
        let mut graph = TaskGraph::new();
        graph.insert(Task::new("Email", "work", 10).with_id("a").with_priority(9)).unwrap();
        graph.insert(Task::new("Call", "work", 10).with_id("b")).unwrap();

        let schedule = Scheduler::new().build_schedule(&graph, &work(), one_day());
        let focus: Vec<_> = schedule.focus_entries().collect();
        assert_eq!(focus.len(), 2);
        assert_eq!(focus[0].task_id.as_deref(), Some("a"));
        assert_eq!(focus[1].start_time, focus[0].end_time);
        assert!(schedule.entries.iter().all(|e| !e.kind.is_break()));
    }

    #[test]
    fn long_break_after_four_quanta() {
        let mut graph = TaskGraph::new();
        graph.insert(Task::new("Deep work", "work", 150).with_id("deep")).unwrap();

        let schedule = Scheduler::new().build_schedule(&graph, &work(), one_day());
        let kinds: Vec<EntryKind> = schedule.entries.iter().map(|e| e.kind).collect();
        assert_eq!(kinds[7], EntryKind::LongBreak);
        assert_eq!(schedule.entries[7].duration_minutes(), 15);
    }

    #[test]
    fn unknown_context_is_blocked() {
        let mut graph = TaskGraph::new();
        graph.insert(Task::new("Orphan", "nowhere", 30).with_id("orphan")).unwrap();
        let schedule = Scheduler::new().build_schedule(&graph, &work(), one_day());
        assert!(matches!(
            schedule.outcome("orphan"),
            Some(TaskOutcome::Blocked(BlockReason::UnschedulableContext { .. }))
        ));
        assert!(schedule.entries.is_empty());
    }

    #[test]
    fn urgent_task_preempts_at_quantum_boundary() {
        let mut graph = TaskGraph::new();
        graph.insert(Task::new("Long haul", "work", 400).with_id("a").with_priority(10)).unwrap();
        graph
            .insert(
                Task::new("Urgent fix", "work", 20)
                    .with_id("b")
                    .with_priority(0)
                    .with_deadline(at(monday(), t(16, 50))),
            )
            .unwrap();

        let schedule = Scheduler::new().build_schedule(&graph, &work(), one_day());

        let Preemption { task_id, by, at: preempted_at } = schedule.preemptions[0].clone();
        assert_eq!((task_id.as_str(), by.as_str()), ("a", "b"));
        assert!(schedule.entries_for("b").all(|e| e.start_time >= preempted_at));
        assert_eq!(schedule.placed_minutes("b"), 20);

        // The displaced task picks up again once the urgent one is done.
        let b_done = schedule.entries_for("b").map(|e| e.end_time).max().unwrap();
        assert!(schedule.entries_for("a").any(|e| e.start_time < preempted_at));
        assert!(schedule.entries_for("a").any(|e| e.start_time >= b_done));
        match schedule.outcome("a") {
            Some(TaskOutcome::Partial {
                placed_minutes,
                remaining_minutes,
            }) => {
                assert_eq!(*placed_minutes, schedule.placed_minutes("a"));
                assert_eq!(placed_minutes + remaining_minutes, 400);
            }
            other => panic!("expected partial outcome, got {other:?}"),
        }
    }

    #[test]
    fn equal_urgency_keeps_running_task() {
        let mut registry = work();
        registry
            .add(Context::new("Evening", ActiveDays::every_day(), t(18, 0), t(21, 0), 0).with_id("evening"))
            .unwrap();
        let mut graph = TaskGraph::new();
        graph.insert(Task::new("Migration", "work", 480).with_id("z")).unwrap();
        graph.insert(Task::new("Shopping", "evening", 10).with_id("x")).unwrap();
        graph.insert(Task::new("Review", "work", 30).with_id("b")).unwrap();
        graph.add_prerequisite("b", "x").unwrap();

        let tuesday = monday() + Duration::days(1);
        let schedule = Scheduler::new().build_schedule(&graph, &registry, Horizon::from_date(monday(), 2));

        // "b" is released Monday evening and would win the tie on remaining
        // work, but the running task is not strictly less urgent.
        assert!(schedule.preemptions.is_empty());
        let first_tuesday = schedule
            .focus_entries()
            .find(|e| e.start_time.date_naive() == tuesday)
            .unwrap();
        assert_eq!(first_tuesday.task_id.as_deref(), Some("z"));
        let z_done = schedule.entries_for("z").map(|e| e.end_time).max().unwrap();
        assert!(schedule.entries_for("b").all(|e| e.start_time >= z_done));
        assert_eq!(schedule.placed_minutes("z"), 480);
    }

    #[test]
    fn deadline_task_works_through_break_to_fill_window() {
        let mut registry = ContextRegistry::new();
        registry
            .add(Context::new("Clinic", ActiveDays::weekdays(), t(13, 0), t(14, 0), 0).with_id("clinic"))
            .unwrap();
        let mut graph = TaskGraph::new();
        graph
            .insert(
                Task::new("Appointment", "clinic", 60)
                    .with_id("visit")
                    .with_deadline(at(monday(), t(14, 0))),
            )
            .unwrap();

        let schedule = Scheduler::new().build_schedule(&graph, &registry, one_day());
        assert_eq!(schedule.placed_minutes("visit"), 60);
        assert!(schedule.entries.iter().all(|e| !e.kind.is_break()));
        assert_eq!(
            schedule.outcome("visit"),
            Some(&TaskOutcome::Scheduled { completes_at: at(monday(), t(14, 0)) })
        );
    }

    #[test]
    fn break_cadence() {
        let config = SchedulerConfig::default();
        assert_eq!(config.break_after(1), (Duration::minutes(5), false));
        assert_eq!(config.break_after(4), (Duration::minutes(15), true));
        assert_eq!(config.break_after(8), (Duration::minutes(15), true));
    }
}
