//! Readiness resolution and follow-up synthesis.
//!
//! Completing a task re-evaluates its dependents and may run the follow-up
//! rule attached to it. Rules are looked up by name, so task data stays plain
//! serializable values and new rules can be registered at runtime.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{Task, TaskDraft, TaskGraph, TaskId, TaskStatus};
use crate::context::{ContextException, ContextRegistry};
use crate::error::PlanError;

/// What the caller knows about a completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionDetails {
    pub completed_at: DateTime<Utc>,
    /// Time the outcome of the task was booked for, e.g. an appointment.
    #[serde(default)]
    pub booked_at: Option<DateTime<Utc>>,
}

impl CompletionDetails {
    pub fn now() -> Self {
        Self {
            completed_at: Utc::now(),
            booked_at: None,
        }
    }

    pub fn at(completed_at: DateTime<Utc>) -> Self {
        Self {
            completed_at,
            booked_at: None,
        }
    }

    pub fn booked_for(mut self, booked_at: DateTime<Utc>) -> Self {
        self.booked_at = Some(booked_at);
        self
    }
}

/// A dated window a follow-up reserves on its context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub context: String,
    pub exception: ContextException,
}

/// One task a rule wants created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUp {
    pub draft: TaskDraft,
    pub reservation: Option<Reservation>,
}

/// Produces new tasks when a task carrying it completes.
pub trait FollowUpRule: Send + Sync {
    /// Name referenced by `FollowUpSpec::rule`.
    fn name(&self) -> &str;

    fn synthesize(
        &self,
        completed: &Task,
        params: &serde_json::Value,
        details: &CompletionDetails,
    ) -> Result<Vec<FollowUp>, PlanError>;
}

/// Parameters of the `appointment` rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppointmentParams {
    pub title: String,
    /// Context the appointment happens in (id or name).
    pub context: Option<String>,
    pub duration_minutes: u32,
    /// Add a dated window on the context ending at the booked time.
    pub reserve_window: bool,
}

impl Default for AppointmentParams {
    fn default() -> Self {
        Self {
            title: "Attend appointment".to_string(),
            context: None,
            duration_minutes: 60,
            reserve_window: true,
        }
    }
}

/// "Book appointment" spawns "Attend appointment", due at the booked time.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppointmentRule;

impl AppointmentRule {
    pub const NAME: &'static str = "appointment";
}

impl FollowUpRule for AppointmentRule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn synthesize(
        &self,
        completed: &Task,
        params: &serde_json::Value,
        details: &CompletionDetails,
    ) -> Result<Vec<FollowUp>, PlanError> {
        let params: AppointmentParams = if params.is_null() {
            AppointmentParams::default()
        } else {
            serde_json::from_value(params.clone()).map_err(|e| PlanError::InvalidValue {
                field: "follow_up.params".into(),
                message: e.to_string(),
            })?
        };
        let context = params.context.clone().ok_or_else(|| PlanError::InvalidValue {
            field: "follow_up.params.context".into(),
            message: "appointment rule needs a context".into(),
        })?;
        let booked_at = details.booked_at.ok_or_else(|| PlanError::InvalidValue {
            field: "booked_at".into(),
            message: format!("completing '{}' needs the booked time", completed.name),
        })?;
        if params.duration_minutes == 0 {
            return Err(PlanError::InvalidValue {
                field: "follow_up.params.duration_minutes".into(),
                message: "must be positive".into(),
            });
        }

        let mut draft = TaskDraft::new(params.title.clone(), context.clone(), params.duration_minutes);
        draft.description = format!("Booked via '{}'", completed.name);
        draft.deadline = Some(booked_at);
        draft.priority = completed.priority;

        let reservation = params.reserve_window.then(|| {
            let opens = booked_at - Duration::minutes(params.duration_minutes as i64);
            Reservation {
                context,
                exception: ContextException {
                    date: opens.date_naive(),
                    start: opens.time(),
                    end: booked_at.time(),
                    buffer_minutes: 0,
                    label: Some(params.title.clone()),
                },
            }
        });

        Ok(vec![FollowUp { draft, reservation }])
    }
}

/// Result of marking a task completed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub completed: TaskId,
    /// Dependents that became ready.
    pub newly_ready: Vec<TaskId>,
    /// Tasks synthesized by the follow-up rule.
    pub created: Vec<Task>,
}

/// Determines readiness and runs follow-up rules.
#[derive(Clone)]
pub struct PrerequisiteResolver {
    rules: BTreeMap<String, Arc<dyn FollowUpRule>>,
}

impl fmt::Debug for PrerequisiteResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrerequisiteResolver")
            .field("rules", &self.rules.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for PrerequisiteResolver {
    fn default() -> Self {
        let mut resolver = Self::empty();
        resolver.register(AppointmentRule);
        resolver
    }
}

impl PrerequisiteResolver {
    /// Resolver with the built-in rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver with no rules at all.
    pub fn empty() -> Self {
        Self {
            rules: BTreeMap::new(),
        }
    }

    /// Add a rule, replacing any rule with the same name.
    pub fn register(&mut self, rule: impl FollowUpRule + 'static) {
        self.rules.insert(rule.name().to_string(), Arc::new(rule));
    }

    pub fn rule_names(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    pub fn has_rule(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    /// Open tasks not yet handed to the scheduler whose prerequisites are all completed.
    pub fn ready_tasks<'a>(&self, graph: &'a TaskGraph) -> Vec<&'a Task> {
        graph
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Ready))
            .filter(|t| graph.is_ready(&t.id))
            .collect()
    }

    /// Promote every pending task whose prerequisites are done.
    pub fn promote_ready(&self, graph: &mut TaskGraph) -> Vec<TaskId> {
        let candidates: Vec<TaskId> = graph
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| t.id.clone())
            .collect();
        candidates
            .into_iter()
            .filter(|id| graph.promote(id))
            .collect()
    }

    /// Mark `task_id` completed, release its dependents and run its follow-up rule.
    ///
    /// Either everything is applied or nothing is: the rule runs and every
    /// follow-up is validated before the graph or registry change.
    pub fn on_completed(
        &self,
        graph: &mut TaskGraph,
        contexts: &mut ContextRegistry,
        task_id: &str,
        details: &CompletionDetails,
    ) -> Result<Completion, PlanError> {
        let task = graph
            .get(task_id)
            .ok_or_else(|| PlanError::UnknownTask(task_id.to_string()))?;
        if task.is_completed() {
            return Err(PlanError::InvalidValue {
                field: "status".into(),
                message: format!("'{}' is already completed", task.name),
            });
        }

        let follow_ups = match &task.follow_up {
            Some(spec) => {
                let rule = self.rules.get(&spec.rule).ok_or_else(|| PlanError::InvalidValue {
                    field: "follow_up.rule".into(),
                    message: format!("no rule named '{}'", spec.rule),
                })?;
                rule.synthesize(task, &spec.params, details)?
            }
            None => Vec::new(),
        };

        let mut next_graph = graph.clone();
        let mut next_contexts = contexts.clone();

        next_graph.complete(task_id, details.completed_at)?;
        let dependents: Vec<TaskId> = next_graph
            .get(task_id)
            .map(|t| t.dependents.iter().cloned().collect())
            .unwrap_or_default();
        let newly_ready: Vec<TaskId> = dependents
            .into_iter()
            .filter(|id| next_graph.promote(id))
            .collect();

        let mut created = Vec::with_capacity(follow_ups.len());
        for follow_up in follow_ups {
            if let Some(reservation) = &follow_up.reservation {
                next_contexts.add_exception(&reservation.context, reservation.exception.clone())?;
            }
            let context_id = next_contexts.resolve_id(&follow_up.draft.context)?;
            let prerequisites = follow_up.draft.prerequisites.clone();
            let mut new_task = follow_up.draft.into_task(context_id);
            new_task.prerequisites = prerequisites.into_iter().collect();
            new_task.spawned_by = Some(task_id.to_string());
            new_task.status = TaskStatus::Pending;
            let inserted = next_graph.insert(new_task)?;
            tracing::info!(task = %inserted.name, from = %task_id, "follow-up synthesized");
            created.push(inserted.clone());
        }

        *graph = next_graph;
        *contexts = next_contexts;

        Ok(Completion {
            completed: task_id.to_string(),
            newly_ready,
            created,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ActiveDays, Context};
    use chrono::{NaiveDate, NaiveTime, TimeZone};

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn contexts() -> ContextRegistry {
        let mut registry = ContextRegistry::new();
        registry
            .add(Context::new("Personal", ActiveDays::every_day(), t(18, 0), t(21, 0), 0).with_id("personal"))
            .unwrap();
        registry
            .add(
                Context::new("Health", ActiveDays::Dates(vec![]), t(8, 0), t(9, 0), 0)
                    .with_id("health")
                    .allowing_overlap(),
            )
            .unwrap();
        registry
    }

    fn graph() -> TaskGraph {
        let mut graph = TaskGraph::new();
        graph
            .insert(
                Task::new("Book appointment", "personal", 15)
                    .with_id("book")
                    .with_follow_up("appointment", serde_json::json!({ "context": "Health" })),
            )
            .unwrap();
        graph.insert(Task::new("Prepare notes", "personal", 20).with_id("notes")).unwrap();
        graph.add_prerequisite("notes", "book").unwrap();
        graph
    }

    #[test]
    fn ready_tasks_skips_waiting() {
        let resolver = PrerequisiteResolver::new();
        let graph = graph();
        let ready: Vec<&str> = resolver.ready_tasks(&graph).iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ready, vec!["book"]);
    }

    #[test]
    fn completion_spawns_appointment() {
        let resolver = PrerequisiteResolver::new();
        let mut graph = graph();
        let mut registry = contexts();
        let booked = Utc.with_ymd_and_hms(2024, 3, 8, 14, 0, 0).unwrap();
        let details = CompletionDetails::at(Utc.with_ymd_and_hms(2024, 3, 4, 19, 0, 0).unwrap())
            .booked_for(booked);

        let completion = resolver
            .on_completed(&mut graph, &mut registry, "book", &details)
            .unwrap();

        assert_eq!(completion.newly_ready, vec!["notes"]);
        assert_eq!(completion.created.len(), 1);
        let attend = graph.get(&completion.created[0].id).unwrap();
        assert_eq!(attend.name, "Attend appointment");
        assert_eq!(attend.context_id, "health");
        assert_eq!(attend.deadline, Some(booked));
        assert_eq!(attend.status, TaskStatus::Ready);
        assert_eq!(attend.spawned_by.as_deref(), Some("book"));

        let health = registry.get("health").unwrap();
        let reserved = health
            .exception_on(NaiveDate::from_ymd_opt(2024, 3, 8).unwrap())
            .unwrap();
        assert_eq!((reserved.start, reserved.end), (t(13, 0), t(14, 0)));
        assert!(graph.get("book").unwrap().is_completed());
    }

    #[test]
    fn missing_booked_time_changes_nothing() {
        let resolver = PrerequisiteResolver::new();
        let mut graph = graph();
        let mut registry = contexts();
        let before = (graph.clone(), registry.clone());

        let err = resolver
            .on_completed(&mut graph, &mut registry, "book", &CompletionDetails::now())
            .unwrap_err();
        assert!(matches!(err, PlanError::InvalidValue { .. }));
        assert_eq!((graph, registry), before);
    }

    #[test]
    fn unknown_follow_up_context_changes_nothing() {
        let resolver = PrerequisiteResolver::new();
        let mut graph = TaskGraph::new();
        graph
            .insert(
                Task::new("Book", "personal", 15)
                    .with_id("book")
                    .with_follow_up("appointment", serde_json::json!({ "context": "Dentist" })),
            )
            .unwrap();
        let mut registry = contexts();
        let details = CompletionDetails::now().booked_for(Utc::now() + Duration::days(2));

        let err = resolver
            .on_completed(&mut graph, &mut registry, "book", &details)
            .unwrap_err();
        assert_eq!(err, PlanError::InvalidContext("Dentist".into()));
        assert!(!graph.get("book").unwrap().is_completed());
    }

    #[test]
    fn completing_twice_is_rejected() {
        let resolver = PrerequisiteResolver::new();
        let mut graph = TaskGraph::new();
        graph.insert(Task::new("Plain", "personal", 10).with_id("plain")).unwrap();
        let mut registry = contexts();
        resolver
            .on_completed(&mut graph, &mut registry, "plain", &CompletionDetails::now())
            .unwrap();
        assert!(resolver
            .on_completed(&mut graph, &mut registry, "plain", &CompletionDetails::now())
            .is_err());
    }

    struct Chores;

    impl FollowUpRule for Chores {
        fn name(&self) -> &str {
            "chores"
        }

        fn synthesize(
            &self,
            _completed: &Task,
            _params: &serde_json::Value,
            _details: &CompletionDetails,
        ) -> Result<Vec<FollowUp>, PlanError> {
            Ok(["Dishes", "Laundry"]
                .into_iter()
                .map(|name| FollowUp {
                    draft: TaskDraft::new(name, "personal", 15),
                    reservation: None,
                })
                .collect())
        }
    }

    #[test]
    fn custom_rules_can_be_registered() {
        let mut resolver = PrerequisiteResolver::empty();
        resolver.register(Chores);
        assert!(resolver.has_rule("chores"));
        assert!(!resolver.has_rule(AppointmentRule::NAME));

        let mut graph = TaskGraph::new();
        graph
            .insert(
                Task::new("Cook", "personal", 30)
                    .with_id("cook")
                    .with_follow_up("chores", serde_json::Value::Null),
            )
            .unwrap();
        let mut registry = contexts();
        let completion = resolver
            .on_completed(&mut graph, &mut registry, "cook", &CompletionDetails::now())
            .unwrap();
        assert_eq!(completion.created.len(), 2);
        assert_eq!(resolver.ready_tasks(&graph).len(), 2);
    }
}
