//! Task urgency calculation.
//!
//! Urgency is a real-valued score, higher meaning more urgent:
//! - Without a deadline it is a small baseline from the task's priority (0-10)
//! - With a deadline it adds `deadline_weight / ratio`, where `ratio` is the
//!   pessimistic capacity left before the deadline divided by the remaining
//!   work. A ratio at or below `critical_ratio` flags the task critical.
//!
//! Capacity comes from the earliest-safe resolution of the task's context, so
//! deadline risk is never underestimated.

use std::cmp::Ordering;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::task::Task;

/// Smallest ratio used in the score, so overdue tasks stay finite.
const MIN_RATIO: f64 = 0.01;

/// Pessimistic capacity of a context over a time range.
pub trait CapacityOracle {
    fn safe_capacity(&self, context: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Duration;
}

/// Priority calculation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityConfig {
    /// Priority used when a task does not set one (0-10)
    pub default_priority: u8,
    /// Weight of the priority baseline
    pub baseline_weight: f64,
    /// Weight of the deadline term
    pub deadline_weight: f64,
    /// Capacity/work ratio at or below which a task is critical
    pub critical_ratio: f64,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            default_priority: 5,
            baseline_weight: 1.0,
            deadline_weight: 10.0,
            critical_ratio: 1.0,
        }
    }
}

/// Urgency of a task at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Urgency {
    pub score: f64,
    pub critical: bool,
    /// Capacity before the deadline minus remaining work, in minutes.
    pub slack_minutes: Option<i64>,
}

/// A task paired with its urgency, ready for ordering.
#[derive(Debug, Clone, Copy)]
pub struct Ranked<'a> {
    pub task: &'a Task,
    pub remaining: Duration,
    pub urgency: Urgency,
}

/// Urgency calculator
#[derive(Debug, Clone, Default)]
pub struct PriorityEngine {
    config: PriorityConfig,
}

impl PriorityEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: PriorityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PriorityConfig {
        &self.config
    }

    fn baseline(&self, task: &Task) -> f64 {
        let priority = task.priority.unwrap_or(self.config.default_priority).min(10);
        self.config.baseline_weight * priority as f64 / 10.0
    }

    /// Urgency of `task` with `remaining` work left, evaluated at `now`.
    pub fn urgency(
        &self,
        task: &Task,
        remaining: Duration,
        now: DateTime<Utc>,
        capacity: &dyn CapacityOracle,
    ) -> Urgency {
        let baseline = self.baseline(task);
        let Some(deadline) = task.deadline else {
            return Urgency {
                score: baseline,
                critical: false,
                slack_minutes: None,
            };
        };

        let available = capacity.safe_capacity(&task.context_id, now, deadline);
        let needed = remaining.num_seconds().max(60) as f64;
        let ratio = available.num_seconds() as f64 / needed;

        Urgency {
            score: baseline + self.config.deadline_weight / ratio.max(MIN_RATIO),
            critical: ratio <= self.config.critical_ratio,
            slack_minutes: Some((available - remaining).num_minutes()),
        }
    }

    /// Most urgent first. Ties: earlier deadline, shorter remaining work, task id.
    pub fn compare(&self, a: &Ranked<'_>, b: &Ranked<'_>) -> Ordering {
        b.urgency
            .score
            .total_cmp(&a.urgency.score)
            .then_with(|| match (a.task.deadline, b.task.deadline) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| a.remaining.cmp(&b.remaining))
            .then_with(|| a.task.id.cmp(&b.task.id))
    }

    /// Rank tasks by urgency at `now`, using each task's persisted remaining work.
    pub fn rank<'a>(
        &self,
        tasks: &[&'a Task],
        now: DateTime<Utc>,
        capacity: &dyn CapacityOracle,
    ) -> Vec<Ranked<'a>> {
        let mut ranked: Vec<Ranked<'a>> = tasks
            .iter()
            .map(|&task| {
                let remaining = task.remaining();
                Ranked {
                    task,
                    remaining,
                    urgency: self.urgency(task, remaining, now, capacity),
                }
            })
            .collect();
        ranked.sort_by(|a, b| self.compare(a, b));
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    /// Context that is open around the clock.
    struct AlwaysOpen;

    impl CapacityOracle for AlwaysOpen {
        fn safe_capacity(&self, _context: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
            if to > from {
                to - from
            } else {
                Duration::zero()
            }
        }
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap()
    }

    fn task(id: &str, minutes: u32) -> Task {
        Task::new(id, "work", minutes).with_id(id)
    }

    #[test]
    fn no_deadline_is_baseline() {
        let engine = PriorityEngine::new();
        let t = task("a", 30).with_priority(8);
        let u = engine.urgency(&t, t.remaining(), base(), &AlwaysOpen);
        assert!((u.score - 0.8).abs() < 1e-9);
        assert!(!u.critical);
        assert_eq!(u.slack_minutes, None);
    }

    #[test]
    fn slack_equal_to_duration_is_critical() {
        let engine = PriorityEngine::new();
        let t = task("a", 60).with_deadline(base() + Duration::minutes(60));
        let u = engine.urgency(&t, t.remaining(), base(), &AlwaysOpen);
        assert!(u.critical);
        assert_eq!(u.slack_minutes, Some(0));

        let relaxed = task("b", 60).with_deadline(base() + Duration::hours(5));
        let r = engine.urgency(&relaxed, relaxed.remaining(), base(), &AlwaysOpen);
        assert!(!r.critical);
        assert!(u.score > r.score);
    }

    #[test]
    fn overdue_is_finite_and_critical() {
        let engine = PriorityEngine::new();
        let t = task("a", 30).with_deadline(base() - Duration::hours(1));
        let u = engine.urgency(&t, t.remaining(), base(), &AlwaysOpen);
        assert!(u.score.is_finite());
        assert!(u.critical);
    }

    #[test]
    fn ties_break_by_deadline_then_duration_then_id() {
        let engine = PriorityEngine::new();
        let short = task("b", 15);
        let long = task("a", 45);
        let other_short = task("c", 15);
        let tasks = vec![&long, &other_short, &short];
        let ranked = engine.rank(&tasks, base(), &AlwaysOpen);
        let ids: Vec<&str> = ranked.iter().map(|r| r.task.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn deadline_beats_no_deadline() {
        let engine = PriorityEngine::new();
        let free = task("a", 30).with_priority(10);
        let due = task("b", 30).with_priority(0).with_deadline(base() + Duration::days(2));
        let tasks = vec![&free, &due];
        let ranked = engine.rank(&tasks, base(), &AlwaysOpen);
        assert_eq!(ranked[0].task.id, "b");
    }

    proptest! {
        #[test]
        fn urgency_never_decreases_toward_deadline(
            duration in 5u32..480,
            lead_minutes in 0i64..20_000,
            step_a in 0i64..20_000,
            step_b in 0i64..20_000,
        ) {
            let engine = PriorityEngine::new();
            let t = task("p", duration).with_deadline(base() + Duration::minutes(lead_minutes));
            let (early, late) = if step_a <= step_b { (step_a, step_b) } else { (step_b, step_a) };
            let u_early = engine.urgency(&t, t.remaining(), base() + Duration::minutes(early), &AlwaysOpen);
            let u_late = engine.urgency(&t, t.remaining(), base() + Duration::minutes(late), &AlwaysOpen);
            prop_assert!(u_late.score >= u_early.score);
        }
    }
}
