//! Planner facade: the operations callers use, over one shared state.
//!
//! Mutations are serialized behind a mutex. Schedule builds run on a cloned
//! snapshot, so mutations never wait for packing, and at most one build runs
//! at a time: requests that arrive mid-build wait while the running builder
//! makes one more pass per distinct horizon asked for. The latest schedule is
//! published as an `Arc` readers can hold on to.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{NaiveDate, NaiveTime, Utc};

use crate::context::{BoundaryObservation, Context, ContextException, ContextPatch, ContextRegistry};
use crate::error::{PlanError, StorageError};
use crate::events::PlannerEvent;
use crate::predictor::BoundaryPredictor;
use crate::priority::PriorityEngine;
use crate::schedule::{Horizon, Schedule, TaskOutcome};
use crate::scheduler::Scheduler;
use crate::storage::{Config, PlanStore};
use crate::task::{
    Completion, CompletionDetails, FollowUpRule, PrerequisiteResolver, Task, TaskDraft, TaskGraph,
    TaskStatus,
};

#[derive(Debug, Default)]
struct PlannerState {
    graph: TaskGraph,
    contexts: ContextRegistry,
    events: Vec<PlannerEvent>,
}

#[derive(Debug, Default)]
struct BuildGuard {
    in_flight: bool,
    /// Build round, counted over the planner's lifetime.
    round: u64,
    /// Horizons requested while a build was running, served by the next round.
    pending: Vec<Horizon>,
    /// Latest follow-up schedule per horizon, with the round that built it.
    served: Vec<(u64, Arc<Schedule>)>,
    /// Callers blocked on `built`.
    waiting: usize,
}

/// Shared planner state and operations.
#[derive(Debug)]
pub struct Planner {
    state: Mutex<PlannerState>,
    builds: Mutex<BuildGuard>,
    built: Condvar,
    latest: RwLock<Option<Arc<Schedule>>>,
    resolver: PrerequisiteResolver,
    scheduler: Scheduler,
    default_days: u32,
}

impl Default for Planner {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Planner {
    pub fn new(config: &Config) -> Self {
        Self::with_state(TaskGraph::new(), ContextRegistry::new(), config)
    }

    /// Planner over previously loaded state.
    pub fn with_state(graph: TaskGraph, contexts: ContextRegistry, config: &Config) -> Self {
        let scheduler = Scheduler::with_config(config.scheduler())
            .with_predictor(BoundaryPredictor::with_config(config.predictor()))
            .with_priority(PriorityEngine::with_config(config.priority_config()))
            .with_lookahead_days(config.horizon.lookahead_days);
        Self {
            state: Mutex::new(PlannerState {
                graph,
                contexts,
                events: Vec::new(),
            }),
            builds: Mutex::new(BuildGuard::default()),
            built: Condvar::new(),
            latest: RwLock::new(None),
            resolver: PrerequisiteResolver::new(),
            scheduler,
            default_days: config.horizon.days.max(1),
        }
    }

    /// Planner over the tasks and contexts persisted in `store`.
    pub fn load(store: &PlanStore, config: &Config) -> Result<Self, StorageError> {
        let (graph, contexts) = store.load()?;
        tracing::debug!(tasks = graph.len(), contexts = contexts.len(), "planner loaded");
        Ok(Self::with_state(graph, contexts, config))
    }

    /// Persist the live tasks and contexts.
    pub fn save(&self, store: &PlanStore) -> Result<(), StorageError> {
        let (graph, contexts) = self.snapshot();
        store.save(&graph, &contexts)
    }

    /// Register an additional follow-up rule.
    pub fn register_rule(&mut self, rule: impl FollowUpRule + 'static) {
        self.resolver.register(rule);
    }

    /// Horizon of the configured length starting at `date`.
    pub fn horizon_from(&self, date: NaiveDate) -> Horizon {
        Horizon::from_date(date, self.default_days)
    }

    /// Copies of the live graph and registry.
    pub fn snapshot(&self) -> (TaskGraph, ContextRegistry) {
        let state = lock(&self.state);
        (state.graph.clone(), state.contexts.clone())
    }

    pub fn task(&self, id: &str) -> Option<Task> {
        lock(&self.state).graph.get(id).cloned()
    }

    pub fn context(&self, reference: &str) -> Option<Context> {
        lock(&self.state).contexts.find(reference).cloned()
    }

    /// Take every event recorded since the last drain.
    pub fn drain_events(&self) -> Vec<PlannerEvent> {
        std::mem::take(&mut lock(&self.state).events)
    }

    /// Create a task.
    ///
    /// # Errors
    /// `InvalidContext` for an unknown context, `UnknownTask` for an unknown
    /// prerequisite, `InvalidValue` for a zero duration.
    pub fn add_task(&self, draft: TaskDraft) -> Result<Task, PlanError> {
        if draft.estimated_minutes == 0 {
            return Err(PlanError::InvalidValue {
                field: "estimated_minutes".into(),
                message: "must be positive".into(),
            });
        }
        if draft.name.trim().is_empty() {
            return Err(PlanError::InvalidValue {
                field: "name".into(),
                message: "task name is empty".into(),
            });
        }
        if let Some(spec) = &draft.follow_up {
            if !self.resolver.has_rule(&spec.rule) {
                return Err(PlanError::InvalidValue {
                    field: "follow_up.rule".into(),
                    message: format!("no rule named '{}'", spec.rule),
                });
            }
        }

        let mut state = lock(&self.state);
        let context_id = state.contexts.resolve_id(&draft.context)?;
        let prerequisites = draft.prerequisites.clone();
        let mut task = draft.into_task(context_id);
        task.prerequisites = prerequisites.into_iter().collect();

        let task = state.graph.insert(task)?.clone();
        tracing::info!(task = %task.name, context = %task.context_id, "task added");
        state.events.push(PlannerEvent::TaskAdded {
            task_id: task.id.clone(),
            name: task.name.clone(),
            context_id: task.context_id.clone(),
            at: Utc::now(),
        });
        Ok(task)
    }

    /// Make `task` depend on `prerequisite`; rejected when it would close a cycle.
    pub fn add_prerequisite(&self, task: &str, prerequisite: &str) -> Result<(), PlanError> {
        let mut state = lock(&self.state);
        state.graph.add_prerequisite(task, prerequisite)?;
        state.events.push(PlannerEvent::PrerequisiteAdded {
            task_id: task.to_string(),
            prerequisite: prerequisite.to_string(),
            at: Utc::now(),
        });
        Ok(())
    }

    /// Drop a task nothing depends on.
    pub fn remove_task(&self, id: &str) -> Result<Task, PlanError> {
        lock(&self.state).graph.remove(id)
    }

    /// Register a context.
    ///
    /// # Errors
    /// `OverlappingContext` when its windows collide with an existing context
    /// that neither suspends nor allows overlap.
    pub fn add_context(&self, context: Context) -> Result<Context, PlanError> {
        let mut state = lock(&self.state);
        let added = state.contexts.add(context)?.clone();
        state.events.push(PlannerEvent::ContextAdded {
            context_id: added.id.clone(),
            name: added.name.clone(),
            at: Utc::now(),
        });
        Ok(added)
    }

    /// Edit a context, from `effective_from` forward when given.
    pub fn edit_context(
        &self,
        reference: &str,
        patch: &ContextPatch,
        effective_from: Option<NaiveDate>,
    ) -> Result<Context, PlanError> {
        let mut state = lock(&self.state);
        let edited = state.contexts.edit(reference, patch, effective_from)?.clone();
        state.events.push(PlannerEvent::ContextEdited {
            context_id: edited.id.clone(),
            effective_from,
            at: Utc::now(),
        });
        Ok(edited)
    }

    /// Add a one-off window on a date.
    pub fn add_context_exception(
        &self,
        reference: &str,
        exception: ContextException,
    ) -> Result<Context, PlanError> {
        let mut state = lock(&self.state);
        let edited = state.contexts.add_exception(reference, exception)?.clone();
        state.events.push(PlannerEvent::ContextEdited {
            context_id: edited.id.clone(),
            effective_from: None,
            at: Utc::now(),
        });
        Ok(edited)
    }

    /// Append an actual start/end to a context's history.
    pub fn record_boundary_observation(
        &self,
        reference: &str,
        date: NaiveDate,
        actual_start: NaiveTime,
        actual_end: NaiveTime,
    ) -> Result<BoundaryObservation, PlanError> {
        let mut state = lock(&self.state);
        let context_id = state.contexts.resolve_id(reference)?;
        let observation = state
            .contexts
            .record_observation(&context_id, date, actual_start, actual_end)?
            .clone();
        state.events.push(PlannerEvent::BoundaryObserved {
            context_id,
            date,
            start_delta_secs: observation.start_delta_secs,
            end_delta_secs: observation.end_delta_secs,
            at: Utc::now(),
        });
        Ok(observation)
    }

    /// Add worked minutes to a task.
    pub fn record_work(&self, task_id: &str, minutes: u32) -> Result<(), PlanError> {
        lock(&self.state).graph.record_work(task_id, minutes)
    }

    /// Externally driven status change, e.g. starting work on a task.
    pub fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<(), PlanError> {
        if status == TaskStatus::Completed {
            return self.mark_completed(task_id, CompletionDetails::now()).map(|_| ());
        }
        lock(&self.state).graph.set_status(task_id, status)
    }

    /// Complete a task, release its dependents and create its follow-ups.
    pub fn mark_completed(
        &self,
        task_id: &str,
        details: CompletionDetails,
    ) -> Result<Completion, PlanError> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let completion =
            self.resolver
                .on_completed(&mut state.graph, &mut state.contexts, task_id, &details)?;

        let now = Utc::now();
        state.events.push(PlannerEvent::TaskCompleted {
            task_id: completion.completed.clone(),
            released: completion.newly_ready.clone(),
            at: now,
        });
        let rule = state
            .graph
            .get(task_id)
            .and_then(|t| t.follow_up.as_ref())
            .map(|spec| spec.rule.clone())
            .unwrap_or_default();
        for task in &completion.created {
            state.events.push(PlannerEvent::FollowUpCreated {
                task_id: task.id.clone(),
                spawned_by: completion.completed.clone(),
                rule: rule.clone(),
                at: now,
            });
        }
        Ok(completion)
    }

    /// Most recently published schedule.
    pub fn latest(&self) -> Option<Arc<Schedule>> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Build, publish and return the schedule for `horizon`.
    ///
    /// When another build is running, the request waits for that builder's
    /// follow-up round, which builds each distinct waiting horizon once.
    /// The returned schedule always covers the requested horizon.
    pub fn get_schedule(&self, horizon: Horizon) -> Arc<Schedule> {
        let mut builds = lock(&self.builds);
        if builds.in_flight {
            let wanted = builds.round + 1;
            if !builds.pending.contains(&horizon) {
                builds.pending.push(horizon);
            }
            builds.waiting += 1;
            loop {
                builds = self.built.wait(builds).unwrap_or_else(PoisonError::into_inner);
                let found = builds
                    .served
                    .iter()
                    .find(|(round, schedule)| *round >= wanted && schedule.horizon == horizon)
                    .map(|(_, schedule)| Arc::clone(schedule));
                if let Some(schedule) = found {
                    builds.waiting -= 1;
                    if builds.waiting == 0 && !builds.in_flight {
                        builds.served.clear();
                    }
                    return schedule;
                }
                if !builds.in_flight {
                    builds.waiting -= 1;
                    break;
                }
            }
        }
        builds.in_flight = true;
        builds.round += 1;
        drop(builds);

        let schedule = self.build_once(horizon);

        loop {
            let mut builds = lock(&self.builds);
            if builds.pending.is_empty() {
                builds.in_flight = false;
                if builds.waiting == 0 {
                    builds.served.clear();
                }
                self.built.notify_all();
                return schedule;
            }
            let horizons = std::mem::take(&mut builds.pending);
            builds.round += 1;
            let round = builds.round;
            drop(builds);

            tracing::debug!(horizons = horizons.len(), "coalesced rebuild");
            let rebuilt: Vec<Arc<Schedule>> = horizons.into_iter().map(|h| self.build_once(h)).collect();

            let mut builds = lock(&self.builds);
            for schedule in rebuilt {
                builds.served.retain(|(_, s)| s.horizon != schedule.horizon);
                builds.served.push((round, schedule));
            }
            self.built.notify_all();
        }
    }

    fn build_once(&self, horizon: Horizon) -> Arc<Schedule> {
        let (graph, contexts) = self.snapshot();
        let schedule = Arc::new(self.scheduler.build_schedule(&graph, &contexts, horizon));
        self.apply_outcomes(&schedule);
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&schedule));
        schedule
    }

    /// Reflect build outcomes onto the live tasks.
    fn apply_outcomes(&self, schedule: &Schedule) {
        let mut state = lock(&self.state);
        let now = Utc::now();
        let mut events = Vec::new();

        for report in schedule.tasks.values() {
            let Some(current) = state.graph.get(&report.task_id).map(|t| t.status) else {
                continue;
            };
            if matches!(current, TaskStatus::Completed | TaskStatus::InProgress) {
                continue;
            }
            if matches!(report.outcome, TaskOutcome::Waiting { .. }) {
                continue;
            }
            let target = report.outcome.status();
            if target == current {
                continue;
            }
            match state.graph.set_status(&report.task_id, target) {
                Ok(()) => {
                    if target == TaskStatus::Blocked {
                        events.push(PlannerEvent::TaskBlocked {
                            task_id: report.task_id.clone(),
                            at: now,
                        });
                    } else if current == TaskStatus::Blocked {
                        events.push(PlannerEvent::TaskUnblocked {
                            task_id: report.task_id.clone(),
                            at: now,
                        });
                    }
                }
                Err(e) => tracing::debug!(task = %report.task_id, error = %e, "status not updated"),
            }
        }

        events.push(PlannerEvent::ScheduleRebuilt {
            entries: schedule.entries.len(),
            blocked: schedule.blocked().count(),
            preemptions: schedule.preemptions.len(),
            at: now,
        });
        state.events.extend(events);
    }
}
