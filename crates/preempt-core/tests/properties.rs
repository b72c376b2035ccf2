//! Property tests over randomly generated task sets.

use chrono::{Duration, NaiveDate, NaiveTime};
use preempt_core::time::at;
use preempt_core::{
    ActiveDays, Context, ContextRegistry, EntryKind, Horizon, PlanError, Scheduler, Task, TaskGraph,
};
use proptest::prelude::*;

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
}

fn registry() -> ContextRegistry {
    ContextRegistry::from_contexts([
        Context::new("Work", ActiveDays::weekdays(), t(9, 0), t(17, 0), 10).with_id("work"),
        Context::new("Personal", ActiveDays::every_day(), t(18, 0), t(22, 0), 5).with_id("personal"),
    ])
}

#[derive(Debug, Clone)]
struct Spec {
    minutes: u32,
    personal: bool,
    priority: Option<u8>,
    deadline_hours: Option<i64>,
}

fn spec() -> impl Strategy<Value = Spec> {
    (
        5u32..240,
        any::<bool>(),
        proptest::option::of(0u8..=10),
        proptest::option::of(2i64..60),
    )
        .prop_map(|(minutes, personal, priority, deadline_hours)| Spec {
            minutes,
            personal,
            priority,
            deadline_hours,
        })
}

/// Tasks `t0..tn`; an edge `(a, b)` with `a < b` makes `tb` depend on `ta`.
fn build_graph(specs: &[Spec], edges: &[(usize, usize)]) -> TaskGraph {
    let mut graph = TaskGraph::new();
    for (i, spec) in specs.iter().enumerate() {
        let context = if spec.personal { "personal" } else { "work" };
        let mut task = Task::new(format!("Task {i}"), context, spec.minutes).with_id(format!("t{i}"));
        if let Some(priority) = spec.priority {
            task = task.with_priority(priority);
        }
        if let Some(hours) = spec.deadline_hours {
            task = task.with_deadline(at(monday(), NaiveTime::MIN) + Duration::hours(hours));
        }
        graph.insert(task).unwrap();
    }
    for &(a, b) in edges {
        let (a, b) = (a % specs.len(), b % specs.len());
        if a < b {
            graph.add_prerequisite(&format!("t{b}"), &format!("t{a}")).unwrap();
        }
    }
    graph
}

fn plan_inputs() -> impl Strategy<Value = (Vec<Spec>, Vec<(usize, usize)>)> {
    (
        proptest::collection::vec(spec(), 1..8),
        proptest::collection::vec((0usize..8, 0usize..8), 0..10),
    )
}

proptest! {
    #[test]
    fn entries_stay_inside_their_windows((specs, edges) in plan_inputs()) {
        let graph = build_graph(&specs, &edges);
        let schedule = Scheduler::new().build_schedule(&graph, &registry(), Horizon::from_date(monday(), 2));

        for window in &schedule.windows {
            let used = schedule
                .entries
                .iter()
                .filter(|e| e.kind != EntryKind::Idle && e.context_id == window.context_id)
                .filter_map(|e| e.span().intersect(&window.expected))
                .fold(Duration::zero(), |acc, s| acc + s.duration());
            prop_assert!(used <= window.capacity());
        }
        for entry in schedule.entries.iter().filter(|e| e.kind != EntryKind::Idle) {
            let inside = schedule.windows.iter().any(|w| {
                w.context_id == entry.context_id
                    && w.segments().iter().any(|s| s.start <= entry.start_time && entry.end_time <= s.end)
            });
            prop_assert!(inside, "entry outside any window: {:?}", entry);
        }
    }

    #[test]
    fn entries_never_overlap((specs, edges) in plan_inputs()) {
        let graph = build_graph(&specs, &edges);
        let schedule = Scheduler::new().build_schedule(&graph, &registry(), Horizon::from_date(monday(), 2));
        let busy: Vec<_> = schedule.entries.iter().filter(|e| e.kind != EntryKind::Idle).collect();
        for (i, a) in busy.iter().enumerate() {
            for b in &busy[i + 1..] {
                prop_assert!(!a.span().overlaps(&b.span()), "{:?} overlaps {:?}", a, b);
            }
        }
    }

    #[test]
    fn prerequisites_finish_before_dependents_start((specs, edges) in plan_inputs()) {
        let graph = build_graph(&specs, &edges);
        let schedule = Scheduler::new().build_schedule(&graph, &registry(), Horizon::from_date(monday(), 2));

        for task in graph.iter() {
            let Some(first) = schedule.entries_for(&task.id).map(|e| e.start_time).min() else {
                continue;
            };
            for prerequisite in &task.prerequisites {
                let last = schedule.entries_for(prerequisite).map(|e| e.end_time).max();
                prop_assert!(last.is_some(), "{} ran before {} was placed", task.id, prerequisite);
                prop_assert!(last.unwrap() <= first);
            }
        }
    }

    #[test]
    fn rejected_edges_leave_graph_unchanged(
        edges in proptest::collection::vec((0usize..6, 0usize..6), 1..30)
    ) {
        let mut graph = TaskGraph::new();
        for i in 0..6 {
            graph.insert(Task::new(format!("t{i}"), "work", 30).with_id(format!("t{i}"))).unwrap();
        }
        for (a, b) in edges {
            let before = graph.clone();
            match graph.add_prerequisite(&format!("t{a}"), &format!("t{b}")) {
                Ok(()) => {}
                Err(PlanError::DependencyCycle { path, .. }) => {
                    prop_assert_eq!(&graph, &before);
                    prop_assert!(path.len() >= 2);
                }
                Err(other) => {
                    prop_assert_eq!(&graph, &before);
                    prop_assert!(a == b, "unexpected error {}", other);
                }
            }
        }
        prop_assert_eq!(graph.topological_order().len(), 6);
    }

    #[test]
    fn builds_are_deterministic((specs, edges) in plan_inputs()) {
        let graph = build_graph(&specs, &edges);
        let contexts = registry();
        let horizon = Horizon::from_date(monday(), 3);
        let scheduler = Scheduler::new();

        let first = scheduler.build_schedule(&graph, &contexts, horizon).to_json().unwrap();
        let second = scheduler.build_schedule(&graph.clone(), &contexts.clone(), horizon).to_json().unwrap();
        prop_assert_eq!(first, second);
    }
}
