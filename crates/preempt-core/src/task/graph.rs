use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};

use super::{Task, TaskId, TaskStatus};
use crate::error::PlanError;

/// Tasks keyed by id with prerequisite edges kept acyclic.
///
/// Every edge is stored on both ends: `task.prerequisites` holds what the task
/// waits on and `prerequisite.dependents` holds the inverse.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskGraph {
    tasks: BTreeMap<TaskId, Task>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    fn task(&self, id: &str) -> Result<&Task, PlanError> {
        self.tasks
            .get(id)
            .ok_or_else(|| PlanError::UnknownTask(id.to_string()))
    }

    fn task_mut(&mut self, id: &str) -> Result<&mut Task, PlanError> {
        self.tasks
            .get_mut(id)
            .ok_or_else(|| PlanError::UnknownTask(id.to_string()))
    }

    /// Tasks in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// Insert a task together with the prerequisite edges it already lists.
    ///
    /// A new task has no dependents yet, so its edges cannot close a cycle
    /// unless it lists itself.
    pub fn insert(&mut self, mut task: Task) -> Result<&Task, PlanError> {
        if self.tasks.contains_key(&task.id) {
            return Err(PlanError::DuplicateName(task.id));
        }
        if task.prerequisites.contains(&task.id) {
            return Err(PlanError::DependencyCycle {
                task: task.id.clone(),
                prerequisite: task.id.clone(),
                path: vec![task.id.clone(), task.id],
            });
        }
        for prerequisite in &task.prerequisites {
            self.task(prerequisite)?;
        }

        task.dependents.clear();
        if task.status.is_open() {
            task.status = if self.all_completed(&task.prerequisites) {
                TaskStatus::Ready
            } else {
                TaskStatus::Pending
            };
        }
        for prerequisite in &task.prerequisites {
            if let Some(p) = self.tasks.get_mut(prerequisite) {
                p.dependents.insert(task.id.clone());
            }
        }

        let id = task.id.clone();
        tracing::debug!(task = %id, prerequisites = task.prerequisites.len(), "task added");
        Ok(self.tasks.entry(id).or_insert(task))
    }

    /// Make `task` depend on `prerequisite`.
    ///
    /// # Errors
    /// `DependencyCycle` when `prerequisite` already (transitively) depends on
    /// `task`; the graph is left untouched.
    pub fn add_prerequisite(&mut self, task: &str, prerequisite: &str) -> Result<(), PlanError> {
        let dependent = self.task(task)?;
        let required = self.task(prerequisite)?;
        if dependent.prerequisites.contains(prerequisite) {
            return Ok(());
        }
        if dependent.is_completed() && !required.is_completed() {
            return Err(PlanError::InvalidValue {
                field: "prerequisite".into(),
                message: format!("'{task}' is already completed"),
            });
        }
        if let Some(path) = self.path_between(prerequisite, task) {
            return Err(PlanError::DependencyCycle {
                task: task.to_string(),
                prerequisite: prerequisite.to_string(),
                path,
            });
        }

        let blocks = !required.is_completed();
        self.task_mut(prerequisite)?.dependents.insert(task.to_string());
        let dependent = self.task_mut(task)?;
        dependent.prerequisites.insert(prerequisite.to_string());
        if blocks && dependent.status.is_open() {
            dependent.status = TaskStatus::Pending;
        }
        dependent.updated_at = Utc::now();
        Ok(())
    }

    /// Drop an edge. Returns whether it existed.
    pub fn remove_prerequisite(&mut self, task: &str, prerequisite: &str) -> Result<bool, PlanError> {
        self.task(prerequisite)?;
        let removed = self.task_mut(task)?.prerequisites.remove(prerequisite);
        if removed {
            self.task_mut(prerequisite)?.dependents.remove(task);
            self.promote(task);
        }
        Ok(removed)
    }

    /// Remove a task that nothing depends on.
    pub fn remove(&mut self, id: &str) -> Result<Task, PlanError> {
        let task = self.task(id)?;
        if let Some(dependent) = task.dependents.iter().next() {
            return Err(PlanError::InvalidValue {
                field: "task".into(),
                message: format!("'{}' is a prerequisite of '{dependent}'", task.name),
            });
        }
        let task = self
            .tasks
            .remove(id)
            .ok_or_else(|| PlanError::UnknownTask(id.to_string()))?;
        for prerequisite in &task.prerequisites {
            if let Some(p) = self.tasks.get_mut(prerequisite) {
                p.dependents.remove(id);
            }
        }
        Ok(task)
    }

    fn all_completed(&self, ids: &BTreeSet<TaskId>) -> bool {
        ids.iter()
            .all(|id| self.tasks.get(id).is_some_and(Task::is_completed))
    }

    /// Every prerequisite of `id` is completed.
    pub fn is_ready(&self, id: &str) -> bool {
        self.tasks
            .get(id)
            .is_some_and(|t| t.status.is_open() && self.all_completed(&t.prerequisites))
    }

    /// Prerequisites of `id` that are not completed yet.
    pub fn incomplete_prerequisites(&self, id: &str) -> Vec<TaskId> {
        self.tasks
            .get(id)
            .map(|t| {
                t.prerequisites
                    .iter()
                    .filter(|p| !self.tasks.get(*p).is_some_and(Task::is_completed))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Move a pending task to ready when nothing holds it back.
    pub(crate) fn promote(&mut self, id: &str) -> bool {
        if !self.is_ready(id) {
            return false;
        }
        match self.tasks.get_mut(id) {
            Some(task) if task.status == TaskStatus::Pending => {
                task.status = TaskStatus::Ready;
                task.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// Deterministic topological order: prerequisites first, ties by id.
    pub fn topological_order(&self) -> Vec<TaskId> {
        let mut in_degree: BTreeMap<&str, usize> = self
            .tasks
            .iter()
            .map(|(id, t)| (id.as_str(), t.prerequisites.len()))
            .collect();
        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut order = Vec::with_capacity(self.tasks.len());
        while let Some(id) = ready.pop_first() {
            order.push(id.to_string());
            for dependent in &self.tasks[id].dependents {
                if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(dependent.as_str());
                    }
                }
            }
        }
        order
    }

    /// Change a task's status.
    ///
    /// # Errors
    /// `InvalidValue` when the transition is not allowed, or when a task with
    /// incomplete prerequisites would leave pending for anything but completion.
    pub fn set_status(&mut self, id: &str, status: TaskStatus) -> Result<(), PlanError> {
        let waiting = !self.all_completed(&self.task(id)?.prerequisites);
        let task = self.task_mut(id)?;
        if !task.status.can_transition_to(&status) {
            return Err(PlanError::InvalidValue {
                field: "status".into(),
                message: format!("cannot move '{}' from {} to {status}", task.name, task.status),
            });
        }
        if waiting && !matches!(status, TaskStatus::Pending | TaskStatus::Completed) {
            return Err(PlanError::InvalidValue {
                field: "status".into(),
                message: format!("'{}' has incomplete prerequisites", task.name),
            });
        }
        task.status = status;
        task.updated_at = Utc::now();
        Ok(())
    }

    /// Add worked minutes to a task, preserving what remains.
    pub fn record_work(&mut self, id: &str, minutes: u32) -> Result<(), PlanError> {
        let task = self.task_mut(id)?;
        task.elapsed_minutes = task.elapsed_minutes.saturating_add(minutes);
        task.updated_at = Utc::now();
        Ok(())
    }

    /// Mark completed without touching dependents.
    pub(crate) fn complete(&mut self, id: &str, at: DateTime<Utc>) -> Result<(), PlanError> {
        self.set_status(id, TaskStatus::Completed)?;
        let task = self.task_mut(id)?;
        task.completed_at = Some(at);
        task.elapsed_minutes = task.elapsed_minutes.max(task.estimated_minutes);
        Ok(())
    }

    /// Walk prerequisite edges from `from`; the path to `to` if one exists.
    fn path_between(&self, from: &str, to: &str) -> Option<Vec<TaskId>> {
        if from == to {
            return Some(vec![from.to_string(), to.to_string()]);
        }
        let mut parent: BTreeMap<&str, &str> = BTreeMap::new();
        let mut queue: VecDeque<&str> = VecDeque::from([from]);
        let mut seen: BTreeSet<&str> = BTreeSet::from([from]);

        while let Some(current) = queue.pop_front() {
            let Some(task) = self.tasks.get(current) else {
                continue;
            };
            for next in &task.prerequisites {
                if !seen.insert(next.as_str()) {
                    continue;
                }
                parent.insert(next.as_str(), current);
                if next == to {
                    let mut path = vec![to.to_string()];
                    let mut cursor = to;
                    while let Some(&p) = parent.get(cursor) {
                        path.push(p.to_string());
                        cursor = p;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next.as_str());
            }
        }
        None
    }
}

impl FromIterator<Task> for TaskGraph {
    /// Rebuild a graph from stored tasks, trusting their edges and statuses.
    fn from_iter<I: IntoIterator<Item = Task>>(iter: I) -> Self {
        let mut tasks: BTreeMap<TaskId, Task> =
            iter.into_iter().map(|t| (t.id.clone(), t)).collect();
        let edges: Vec<(TaskId, TaskId)> = tasks
            .values()
            .flat_map(|t| t.prerequisites.iter().map(|p| (p.clone(), t.id.clone())))
            .collect();
        for task in tasks.values_mut() {
            task.dependents.clear();
        }
        for (prerequisite, dependent) in edges {
            if let Some(p) = tasks.get_mut(&prerequisite) {
                p.dependents.insert(dependent);
            }
        }
        Self { tasks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn task(id: &str) -> Task {
        Task::new(id, "work", 30).with_id(id)
    }

    fn chain() -> TaskGraph {
        let mut graph = TaskGraph::new();
        graph.insert(task("a")).unwrap();
        graph.insert(task("b")).unwrap();
        graph.insert(task("c")).unwrap();
        graph.add_prerequisite("b", "a").unwrap();
        graph.add_prerequisite("c", "b").unwrap();
        graph
    }

    #[test]
    fn edges_are_kept_on_both_ends() {
        let graph = chain();
        assert!(graph.get("a").unwrap().dependents.contains("b"));
        assert!(graph.get("b").unwrap().prerequisites.contains("a"));
        assert_eq!(graph.get("a").unwrap().status, TaskStatus::Ready);
        assert_eq!(graph.get("b").unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn cycle_is_rejected_without_mutation() {
        let mut graph = chain();
        let before = graph.clone();
        let err = graph.add_prerequisite("a", "c").unwrap_err();
        match err {
            PlanError::DependencyCycle { path, .. } => {
                assert_eq!(path, vec!["c", "b", "a"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(graph, before);
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let mut graph = chain();
        assert!(matches!(
            graph.add_prerequisite("a", "a"),
            Err(PlanError::DependencyCycle { .. })
        ));
        let mut looped = task("x");
        looped.prerequisites.insert("x".into());
        assert!(graph.insert(looped).is_err());
    }

    #[test]
    fn unknown_prerequisite_is_rejected() {
        let mut graph = TaskGraph::new();
        let mut t = task("a");
        t.prerequisites.insert("ghost".into());
        assert_eq!(graph.insert(t).unwrap_err(), PlanError::UnknownTask("ghost".into()));
        assert!(graph.is_empty());
    }

    #[test]
    fn removing_edge_promotes() {
        let mut graph = chain();
        assert!(graph.remove_prerequisite("b", "a").unwrap());
        assert_eq!(graph.get("b").unwrap().status, TaskStatus::Ready);
        assert!(!graph.get("a").unwrap().dependents.contains("b"));
    }

    #[test]
    fn remove_refuses_while_depended_on() {
        let mut graph = chain();
        assert!(graph.remove("a").is_err());
        let removed = graph.remove("c").unwrap();
        assert_eq!(removed.id, "c");
        assert!(graph.get("b").unwrap().dependents.is_empty());
    }

    #[test]
    fn topological_order_is_deterministic() {
        let mut graph = TaskGraph::new();
        for id in ["d", "c", "b", "a"] {
            graph.insert(task(id)).unwrap();
        }
        graph.add_prerequisite("a", "d").unwrap();
        assert_eq!(graph.topological_order(), vec!["b", "c", "d", "a"]);
    }

    #[test]
    fn pending_cannot_be_scheduled() {
        let mut graph = chain();
        assert!(graph.set_status("b", TaskStatus::Scheduled).is_err());
        graph.set_status("a", TaskStatus::Scheduled).unwrap();
        assert!(graph.set_status("a", TaskStatus::Blocked).is_ok());
    }

    #[test]
    fn work_is_preserved() {
        let mut graph = chain();
        graph.record_work("a", 20).unwrap();
        assert_eq!(graph.get("a").unwrap().remaining().num_minutes(), 10);
    }

    #[test]
    fn rebuild_restores_inverse_edges() {
        let graph = chain();
        let rebuilt: TaskGraph = graph.iter().cloned().collect();
        assert_eq!(rebuilt, graph);
    }

    proptest! {
        #[test]
        fn random_edges_stay_acyclic(edges in proptest::collection::vec((0usize..8, 0usize..8), 0..40)) {
            let mut graph = TaskGraph::new();
            for i in 0..8 {
                graph.insert(task(&format!("t{i}"))).unwrap();
            }
            for (a, b) in edges {
                let _ = graph.add_prerequisite(&format!("t{a}"), &format!("t{b}"));
            }
            let order = graph.topological_order();
            prop_assert_eq!(order.len(), 8);
            let position: BTreeMap<&str, usize> =
                order.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();
            for t in graph.iter() {
                for p in &t.prerequisites {
                    prop_assert!(position[p.as_str()] < position[t.id.as_str()]);
                }
            }
        }
    }
}
