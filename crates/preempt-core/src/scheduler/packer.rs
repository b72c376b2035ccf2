use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};

use super::SchedulerConfig;
use crate::context::ContextId;
use crate::predictor::{ResolvedWindow, WindowCalendar};
use crate::priority::{PriorityEngine, Ranked};
use crate::schedule::{BlockReason, EntryKind, Horizon, Preemption, ScheduleEntry};
use crate::task::{Task, TaskId};
use crate::time::Span;

/// Scheduling state of one open task during a build.
#[derive(Debug, Clone)]
pub(crate) struct WorkItem<'a> {
    pub task: &'a Task,
    pub remaining: Duration,
    pub placed: Duration,
    /// Earliest instant work may start; unknown while prerequisites are open.
    pub release: Option<DateTime<Utc>>,
    pub waiting_on: BTreeSet<TaskId>,
    pub blocked: Option<BlockReason>,
    pub completes_at: Option<DateTime<Utc>>,
}

impl<'a> WorkItem<'a> {
    pub fn new(task: &'a Task, waiting_on: BTreeSet<TaskId>) -> Self {
        Self {
            task,
            remaining: task.remaining(),
            placed: Duration::zero(),
            release: None,
            waiting_on,
            blocked: None,
            completes_at: None,
        }
    }

    fn is_open(&self) -> bool {
        self.blocked.is_none() && self.completes_at.is_none() && self.remaining > Duration::zero()
    }

    fn before_deadline(&self, instant: DateTime<Utc>) -> bool {
        self.task.deadline.map_or(true, |d| instant < d)
    }

    fn eligible_at(&self, instant: DateTime<Utc>) -> bool {
        self.is_open() && self.release.is_some_and(|r| r <= instant) && self.before_deadline(instant)
    }
}

/// Fills resolved windows with focus slices, breaks and idle gaps.
pub(crate) struct Packer<'a> {
    config: &'a SchedulerConfig,
    priority: &'a PriorityEngine,
    calendar: &'a WindowCalendar,
    horizon: Horizon,
    items: BTreeMap<TaskId, WorkItem<'a>>,
    entries: Vec<ScheduleEntry>,
    /// Spans already holding work or breaks, across all contexts.
    occupied: Vec<Span>,
    preemptions: Vec<Preemption>,
    /// Task left unfinished by the last quantum of each context.
    running: BTreeMap<ContextId, TaskId>,
}

impl<'a> Packer<'a> {
    pub fn new(
        config: &'a SchedulerConfig,
        priority: &'a PriorityEngine,
        calendar: &'a WindowCalendar,
        horizon: Horizon,
        items: BTreeMap<TaskId, WorkItem<'a>>,
    ) -> Self {
        Self {
            config,
            priority,
            calendar,
            horizon,
            items,
            entries: Vec::new(),
            occupied: Vec::new(),
            preemptions: Vec::new(),
            running: BTreeMap::new(),
        }
    }

    /// Make a task available from `at`, checking its deadline first.
    pub fn release(&mut self, id: &str, at: DateTime<Utc>) {
        let calendar = self.calendar;
        let Some(item) = self.items.get_mut(id) else {
            return;
        };
        if item.blocked.is_some() || item.release.is_some() {
            return;
        }
        item.release = Some(at);

        if let Some(deadline) = item.task.deadline {
            if deadline <= at {
                item.blocked = Some(BlockReason::DeadlineMissed {
                    remaining_minutes: item.remaining.num_minutes(),
                });
                return;
            }
            let covered = calendar.coverage_end().is_some_and(|end| deadline <= end);
            if covered {
                let available = calendar.expected_capacity(&item.task.context_id, at, deadline);
                if available < item.remaining {
                    tracing::warn!(
                        task = %item.task.name,
                        required = item.remaining.num_minutes(),
                        available = available.num_minutes(),
                        "deadline is infeasible"
                    );
                    item.blocked = Some(BlockReason::InfeasibleDeadline {
                        required_minutes: item.remaining.num_minutes(),
                        available_minutes: available.num_minutes(),
                    });
                    return;
                }
            }
        }

        if item.remaining <= Duration::zero() {
            self.complete(id, at);
        }
    }

    /// Record completion and release dependents whose last prerequisite this was.
    fn complete(&mut self, id: &str, at: DateTime<Utc>) {
        let Some(item) = self.items.get_mut(id) else {
            return;
        };
        item.remaining = Duration::zero();
        item.completes_at = Some(at);
        let dependents: Vec<TaskId> = item.task.dependents.iter().cloned().collect();
        self.running.retain(|_, running| running.as_str() != id);

        for dependent in dependents {
            let Some(next) = self.items.get_mut(&dependent) else {
                continue;
            };
            next.waiting_on.remove(id);
            if next.waiting_on.is_empty() {
                self.release(&dependent, at);
            }
        }
    }

    /// Pack every window in chronological order.
    pub fn run(&mut self) {
        let calendar = self.calendar;
        let horizon = self.horizon.span();
        for window in &calendar.windows {
            for segment in window.segments() {
                let Some(clipped) = segment.intersect(&horizon) else {
                    continue;
                };
                let mut pieces = vec![clipped];
                for busy in &self.occupied {
                    pieces = pieces.iter().flat_map(|p| p.subtract(busy)).collect();
                }
                pieces.retain(|p| !p.is_empty());
                pieces.sort();
                for piece in pieces {
                    self.pack(window, piece);
                }
            }
        }
    }

    /// Fill one free piece of a window, quantum by quantum.
    fn pack(&mut self, window: &ResolvedWindow, piece: Span) {
        let context = &window.context_id;
        let focus = self.config.focus();
        let mut cursor = piece.start;
        let mut quanta = 0u32;

        while cursor < piece.end {
            let quantum_start = cursor;
            let focus_end = (cursor + focus).min(piece.end);
            let mut now = cursor;

            while now < focus_end {
                let mut order = self.rank(context, now);
                if now == quantum_start {
                    self.keep_or_preempt(context, &mut order, now);
                }
                let Some((id, end)) = self.first_fit(&order, now, focus_end) else {
                    break;
                };
                self.place(window, &id, now, end);
                now = end;
            }

            if now == quantum_start {
                let Some(next) = self.next_release(context, now, piece.end) else {
                    break;
                };
                self.push(window, EntryKind::Idle, None, now, next);
                cursor = next;
                quanta = 0;
                continue;
            }

            quanta += 1;
            cursor = now;
            if !self.has_work(context, cursor, piece.end) {
                break;
            }
            let (length, long) = self.config.break_after(quanta);
            if self.works_through_break(context, cursor, piece.end, length) {
                continue;
            }
            if cursor + length + self.config.min_slice() > piece.end {
                break;
            }
            let kind = if long {
                EntryKind::LongBreak
            } else {
                EntryKind::ShortBreak
            };
            self.push(window, kind, None, cursor, cursor + length);
            cursor += length;
        }
    }

    /// Eligible tasks of `context` at `now`, most urgent first.
    fn rank(&self, context: &str, now: DateTime<Utc>) -> Vec<(TaskId, f64)> {
        let mut ranked: Vec<Ranked<'_>> = self
            .items
            .values()
            .filter(|item| item.task.context_id == context && item.eligible_at(now))
            .map(|item| Ranked {
                task: item.task,
                remaining: item.remaining,
                urgency: self.priority.urgency(item.task, item.remaining, now, self.calendar),
            })
            .collect();
        ranked.sort_by(|a, b| self.priority.compare(a, b));
        ranked
            .into_iter()
            .map(|r| (r.task.id.clone(), r.urgency.score))
            .collect()
    }

    /// The unfinished task keeps the next quantum unless another is strictly more urgent.
    fn keep_or_preempt(&mut self, context: &str, order: &mut Vec<(TaskId, f64)>, now: DateTime<Utc>) {
        let Some(running) = self.running.get(context) else {
            return;
        };
        let Some(position) = order.iter().position(|(id, _)| id == running) else {
            return;
        };
        if position == 0 {
            return;
        }
        let (best, best_score) = &order[0];
        if *best_score > order[position].1 {
            tracing::debug!(task = %running, by = %best, at = %now, "preempted");
            self.preemptions.push(Preemption {
                task_id: running.clone(),
                by: best.clone(),
                at: now,
            });
        } else {
            let kept = order.remove(position);
            order.insert(0, kept);
        }
    }

    /// First candidate whose slice is worth placing, with the slice end.
    fn first_fit(
        &self,
        order: &[(TaskId, f64)],
        now: DateTime<Utc>,
        focus_end: DateTime<Utc>,
    ) -> Option<(TaskId, DateTime<Utc>)> {
        let min_slice = self.config.min_slice();
        order.iter().find_map(|(id, _)| {
            let item = self.items.get(id)?;
            let mut end = focus_end.min(now + item.remaining);
            if let Some(deadline) = item.task.deadline {
                end = end.min(deadline);
            }
            let length = end - now;
            if length <= Duration::zero() || (length < min_slice && length < item.remaining) {
                return None;
            }
            Some((id.clone(), end))
        })
    }

    fn place(&mut self, window: &ResolvedWindow, id: &str, start: DateTime<Utc>, end: DateTime<Utc>) {
        let Some(item) = self.items.get_mut(id) else {
            return;
        };
        let length = end - start;
        item.remaining = item.remaining - length;
        item.placed = item.placed + length;
        let finished = item.remaining <= Duration::zero();
        let name = item.task.name.clone();

        tracing::debug!(task = %name, context = %window.context_id, %start, %end, "slice placed");
        self.push(window, EntryKind::Focus, Some((id, name)), start, end);

        if finished {
            self.complete(id, end);
        } else {
            self.running.insert(window.context_id.clone(), id.to_string());
        }
    }

    fn push(
        &mut self,
        window: &ResolvedWindow,
        kind: EntryKind,
        task: Option<(&str, String)>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) {
        if kind != EntryKind::Idle {
            self.occupied.push(Span::new(start, end));
        }
        let (task_id, task_name) = match task {
            Some((id, name)) => (Some(id.to_string()), Some(name)),
            None => (None, None),
        };
        self.entries.push(ScheduleEntry {
            kind,
            context_id: window.context_id.clone(),
            task_id,
            task_name,
            start_time: start,
            end_time: end,
            at_risk: kind == EntryKind::Focus && end > window.latest_safe(),
        });
    }

    /// Work that could still happen in `context` before `end`.
    fn has_work(&self, context: &str, now: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.items.values().any(|item| {
            item.task.context_id == context
                && item.is_open()
                && item.release.is_some_and(|r| r < end)
                && item.before_deadline(now.max(item.release.unwrap_or(now)))
        })
    }

    /// A deadline task whose remaining work fits before its deadline in this
    /// piece only if the break at `now` is skipped.
    fn works_through_break(&self, context: &str, now: DateTime<Utc>, end: DateTime<Utc>, pause: Duration) -> bool {
        self.items.values().any(|item| {
            let Some(deadline) = item.task.deadline else {
                return false;
            };
            let finish = now + item.remaining;
            item.task.context_id == context
                && item.eligible_at(now)
                && finish <= deadline.min(end)
                && finish + pause > deadline
        })
    }

    /// Next release strictly inside `(now, end)` for `context`.
    fn next_release(&self, context: &str, now: DateTime<Utc>, end: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.items
            .values()
            .filter(|item| item.task.context_id == context && item.is_open())
            .filter_map(|item| item.release)
            .filter(|&r| r > now && r < end)
            .min()
    }

    pub fn finish(
        mut self,
    ) -> (
        BTreeMap<TaskId, WorkItem<'a>>,
        Vec<ScheduleEntry>,
        Vec<Preemption>,
    ) {
        self.entries.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.context_id.cmp(&b.context_id))
                .then_with(|| a.kind.cmp(&b.kind))
        });
        (self.items, self.entries, self.preemptions)
    }
}
