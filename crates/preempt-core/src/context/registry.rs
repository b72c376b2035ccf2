//! Context registry with overlap validation.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveTime, Timelike};

use super::{BoundaryObservation, Context, ContextException, ContextId, ContextPatch, ContextRevision};
use crate::error::PlanError;

/// Holds every known context, keyed by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextRegistry {
    contexts: BTreeMap<ContextId, Context>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a registry from stored contexts without re-validating overlaps.
    pub fn from_contexts(contexts: impl IntoIterator<Item = Context>) -> Self {
        Self {
            contexts: contexts.into_iter().map(|c| (c.id.clone(), c)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Contexts in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Context> {
        self.contexts.values()
    }

    pub fn get(&self, id: &str) -> Option<&Context> {
        self.contexts.get(id)
    }

    /// Look a context up by id, then by case-insensitive name.
    pub fn find(&self, reference: &str) -> Option<&Context> {
        self.contexts.get(reference).or_else(|| {
            self.contexts
                .values()
                .find(|c| c.name.eq_ignore_ascii_case(reference))
        })
    }

    /// Resolve a reference to a context id.
    ///
    /// # Errors
    /// Returns `InvalidContext` when nothing matches.
    pub fn resolve_id(&self, reference: &str) -> Result<ContextId, PlanError> {
        self.find(reference)
            .map(|c| c.id.clone())
            .ok_or_else(|| PlanError::InvalidContext(reference.to_string()))
    }

    /// Register a new context.
    ///
    /// # Errors
    /// Rejects duplicate ids or names, unknown `suspends` references and
    /// windows that collide with an existing context.
    pub fn add(&mut self, context: Context) -> Result<&Context, PlanError> {
        if self.contexts.contains_key(&context.id) {
            return Err(PlanError::DuplicateName(context.id));
        }
        self.validate(&context)?;
        let id = context.id.clone();
        tracing::debug!(context = %context.name, "context added");
        Ok(self.contexts.entry(id).or_insert(context))
    }

    /// Edit a context, optionally only from `effective_from` forward.
    ///
    /// The edit is validated on a copy and only committed when it passes.
    pub fn edit(
        &mut self,
        reference: &str,
        patch: &ContextPatch,
        effective_from: Option<NaiveDate>,
    ) -> Result<&Context, PlanError> {
        let id = self.resolve_id(reference)?;
        let mut edited = self.contexts[&id].clone();
        edited.apply_patch(patch, effective_from);
        self.validate(&edited)?;
        tracing::debug!(context = %edited.name, ?effective_from, "context edited");
        self.contexts.insert(id.clone(), edited);
        Ok(&self.contexts[&id])
    }

    /// Add or replace the one-off window of a context on a date.
    pub fn add_exception(
        &mut self,
        reference: &str,
        exception: ContextException,
    ) -> Result<&Context, PlanError> {
        let id = self.resolve_id(reference)?;
        let edited = Self::with_exception(&self.contexts[&id], exception);
        self.validate(&edited)?;
        self.contexts.insert(id.clone(), edited);
        Ok(&self.contexts[&id])
    }

    /// Check an exception without committing it.
    pub fn check_exception(
        &self,
        reference: &str,
        exception: &ContextException,
    ) -> Result<(), PlanError> {
        let id = self.resolve_id(reference)?;
        self.validate(&Self::with_exception(&self.contexts[&id], exception.clone()))
    }

    fn with_exception(context: &Context, exception: ContextException) -> Context {
        let mut edited = context.clone();
        edited.exceptions.retain(|e| e.date != exception.date);
        edited.exceptions.push(exception);
        edited.exceptions.sort_by_key(|e| e.date);
        edited
    }

    /// Append an observed start/end to the context's log.
    pub fn record_observation(
        &mut self,
        reference: &str,
        date: NaiveDate,
        actual_start: NaiveTime,
        actual_end: NaiveTime,
    ) -> Result<&BoundaryObservation, PlanError> {
        let id = self.resolve_id(reference)?;
        let context = self
            .contexts
            .get_mut(&id)
            .ok_or_else(|| PlanError::InvalidContext(reference.to_string()))?;
        let observation = context.observe(date, actual_start, actual_end)?;
        context.log.append(observation);
        context
            .log
            .observations
            .last()
            .ok_or_else(|| PlanError::InvalidContext(reference.to_string()))
    }

    fn validate(&self, candidate: &Context) -> Result<(), PlanError> {
        if candidate.name.trim().is_empty() {
            return Err(PlanError::InvalidValue {
                field: "name".into(),
                message: "context name is empty".into(),
            });
        }

        for other in self.contexts.values().filter(|c| c.id != candidate.id) {
            if other.name.eq_ignore_ascii_case(&candidate.name) {
                return Err(PlanError::DuplicateName(candidate.name.clone()));
            }
        }

        for suspended in &candidate.suspends {
            if suspended == &candidate.id || !self.contexts.contains_key(suspended) {
                return Err(PlanError::InvalidContext(suspended.clone()));
            }
        }

        for other in self.contexts.values().filter(|c| c.id != candidate.id) {
            if overlap_permitted(candidate, other) {
                continue;
            }
            if let Some(day) = collision(candidate, other) {
                return Err(PlanError::OverlappingContext {
                    context: candidate.name.clone(),
                    existing: other.name.clone(),
                    day,
                });
            }
        }

        Ok(())
    }
}

fn overlap_permitted(a: &Context, b: &Context) -> bool {
    a.allow_overlap || b.allow_overlap || a.suspends.contains(&b.id) || b.suspends.contains(&a.id)
}

/// Minute-of-day range, with ends past midnight pushed into the next day.
fn minute_range(start: NaiveTime, end: NaiveTime) -> (i64, i64) {
    let s = (start.num_seconds_from_midnight() / 60) as i64;
    let mut e = (end.num_seconds_from_midnight() / 60) as i64;
    if e <= s {
        e += 24 * 60;
    }
    (s, e)
}

fn ranges_collide(a: (i64, i64), b: (i64, i64)) -> bool {
    const DAY: i64 = 24 * 60;
    let hit = |x: (i64, i64), y: (i64, i64)| x.0 < y.1 && y.0 < x.1;
    hit(a, b) || hit((a.0 + DAY, a.1 + DAY), b) || hit(a, (b.0 + DAY, b.1 + DAY))
}

fn revision_range(revision: &ContextRevision) -> Option<(i64, i64)> {
    match (revision.nominal_start, revision.nominal_end) {
        (Some(start), Some(end)) => Some(minute_range(start, end)),
        _ => None,
    }
}

/// First day on which the two contexts' windows intersect, if any.
///
/// Revisions are compared regardless of their effective dates.
fn collision(a: &Context, b: &Context) -> Option<String> {
    for ra in &a.revisions {
        let Some(range_a) = revision_range(ra) else {
            continue;
        };
        for rb in &b.revisions {
            let Some(range_b) = revision_range(rb) else {
                continue;
            };
            if let Some(day) = ra.days.shared_day(&rb.days) {
                if ranges_collide(range_a, range_b) {
                    return Some(day);
                }
            }
        }
    }

    for (first, second) in [(a, b), (b, a)] {
        for exception in &first.exceptions {
            let range = minute_range(exception.start, exception.end);
            if let Some(other) = second.exception_on(exception.date) {
                if ranges_collide(range, minute_range(other.start, other.end)) {
                    return Some(exception.date.to_string());
                }
                continue;
            }
            let revision = second.revision_on(exception.date);
            if !revision.days.includes(exception.date) {
                continue;
            }
            if let Some(other_range) = revision_range(revision) {
                if ranges_collide(range, other_range) {
                    return Some(exception.date.to_string());
                }
            }
        }
    }

    None
}
