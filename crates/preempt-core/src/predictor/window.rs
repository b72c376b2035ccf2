//! Resolved context windows over a range of days.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use super::BoundaryPredictor;
use crate::context::{ContextId, ContextRegistry};
use crate::priority::CapacityOracle;
use crate::time::{at, FuzzyInterval, Span};

/// One context's predicted window on one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedWindow {
    pub context_id: ContextId,
    pub context_name: String,
    pub date: NaiveDate,
    pub start: FuzzyInterval,
    pub end: FuzzyInterval,
    pub buffer_minutes: i64,
    /// Working capacity: expected boundaries minus buffers.
    pub expected: Span,
    /// Pessimistic span: `[start.latest + buffer, end.earliest - buffer]`.
    pub safe: Span,
    /// Spans carved out by overriding contexts.
    #[serde(default)]
    pub suspended: Vec<Span>,
}

impl ResolvedWindow {
    /// Expected boundaries without the buffer.
    pub fn boundary_span(&self) -> Span {
        Span::new(self.start.expected, self.end.expected)
    }

    /// Earliest instant it is safe to start work, even if the context starts late.
    pub fn earliest_safe(&self) -> DateTime<Utc> {
        self.safe.start
    }

    /// Latest instant work can safely run to, even if the context ends early.
    pub fn latest_safe(&self) -> DateTime<Utc> {
        self.safe.end
    }

    pub fn low_confidence(&self) -> bool {
        self.start.low_confidence || self.end.low_confidence
    }

    /// Usable pieces of the expected span once suspensions are removed.
    pub fn segments(&self) -> Vec<Span> {
        carve(self.expected, &self.suspended)
    }

    pub fn safe_segments(&self) -> Vec<Span> {
        carve(self.safe, &self.suspended)
    }

    /// Expected working capacity.
    pub fn capacity(&self) -> Duration {
        self.segments()
            .iter()
            .fold(Duration::zero(), |acc, s| acc + s.duration())
    }
}

fn carve(span: Span, holes: &[Span]) -> Vec<Span> {
    if span.is_empty() {
        return Vec::new();
    }
    let mut pieces = vec![span];
    for hole in holes {
        pieces = pieces.iter().flat_map(|p| p.subtract(hole)).collect();
    }
    pieces.retain(|p| !p.is_empty());
    pieces.sort();
    pieces
}

fn overlap_total(pieces: &[Span], from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    let range = Span::new(from, to);
    pieces
        .iter()
        .filter_map(|p| p.intersect(&range))
        .fold(Duration::zero(), |acc, s| acc + s.duration())
}

/// Every resolved window for a run of days, with suspensions applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowCalendar {
    pub first_date: Option<NaiveDate>,
    pub days: u32,
    pub windows: Vec<ResolvedWindow>,
    /// Contexts that produced errors and no usable window at all.
    pub unschedulable: BTreeMap<ContextId, String>,
    /// Individual days skipped because the window could not be resolved.
    pub skipped_days: Vec<(ContextId, NaiveDate, String)>,
}

impl WindowCalendar {
    /// Resolve every context for `days` days starting at `from`.
    pub fn resolve(
        predictor: &BoundaryPredictor,
        registry: &ContextRegistry,
        from: NaiveDate,
        days: u32,
    ) -> Self {
        let mut windows = Vec::new();
        let mut errors: BTreeMap<ContextId, String> = BTreeMap::new();
        let mut skipped_days = Vec::new();

        for offset in 0..days {
            let date = from + Duration::days(offset as i64);
            for context in registry.iter() {
                match predictor.predict(context, date) {
                    Ok(Some(window)) => windows.push(window),
                    Ok(None) => {}
                    Err(err) => {
                        let reason = err.to_string();
                        errors.entry(context.id.clone()).or_insert_with(|| reason.clone());
                        skipped_days.push((context.id.clone(), date, reason));
                    }
                }
            }
        }

        apply_suspensions(registry, &mut windows);
        windows.sort_by(|a, b| {
            a.expected
                .start
                .cmp(&b.expected.start)
                .then_with(|| a.context_id.cmp(&b.context_id))
        });

        let unschedulable: BTreeMap<ContextId, String> = errors
            .into_iter()
            .filter(|(id, _)| !windows.iter().any(|w| &w.context_id == id))
            .collect();
        for (id, reason) in &unschedulable {
            tracing::warn!(context = %id, %reason, "context is unschedulable");
        }

        Self {
            first_date: Some(from),
            days,
            windows,
            unschedulable,
            skipped_days,
        }
    }

    /// First instant after the resolved range.
    pub fn coverage_end(&self) -> Option<DateTime<Utc>> {
        self.first_date
            .map(|d| at(d + Duration::days(self.days as i64), NaiveTime::MIN))
    }

    pub fn windows_for<'a>(&'a self, context: &'a str) -> impl Iterator<Item = &'a ResolvedWindow> {
        self.windows.iter().filter(move |w| w.context_id == context)
    }

    pub fn unschedulable_reason(&self, context: &str) -> Option<&str> {
        self.unschedulable.get(context).map(String::as_str)
    }

    /// Expected capacity of `context` inside `[from, to)`.
    pub fn expected_capacity(&self, context: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
        if to <= from {
            return Duration::zero();
        }
        self.windows_for(context)
            .fold(Duration::zero(), |acc, w| acc + overlap_total(&w.segments(), from, to))
    }
}

impl CapacityOracle for WindowCalendar {
    fn safe_capacity(&self, context: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
        if to <= from {
            return Duration::zero();
        }
        self.windows_for(context)
            .fold(Duration::zero(), |acc, w| acc + overlap_total(&w.safe_segments(), from, to))
    }
}

/// Carve each overriding window (plus the suspended context's buffer) out of
/// the windows it suspends on the same day.
fn apply_suspensions(registry: &ContextRegistry, windows: &mut [ResolvedWindow]) {
    let mut holes: Vec<(usize, Span)> = Vec::new();
    for overriding in windows.iter() {
        let Some(context) = registry.get(&overriding.context_id) else {
            continue;
        };
        for suspended_id in &context.suspends {
            for (index, target) in windows.iter().enumerate() {
                if &target.context_id != suspended_id || target.date != overriding.date {
                    continue;
                }
                let buffer = Duration::minutes(target.buffer_minutes);
                let boundary = overriding.boundary_span();
                holes.push((index, Span::new(boundary.start - buffer, boundary.end + buffer)));
            }
        }
    }

    for (index, hole) in holes {
        tracing::debug!(
            context = %windows[index].context_id,
            start = %hole.start,
            end = %hole.end,
            "window suspended"
        );
        windows[index].suspended.push(hole);
    }
}
