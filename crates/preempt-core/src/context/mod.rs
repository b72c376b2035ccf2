//! Contexts: recurring windows of time such as Work or Personal.
//!
//! A context is described sort-of like a recurring calendar invite. Its
//! nominal window can change over time through dated revisions, and it keeps
//! an append-only log of where its boundaries actually fell.

mod registry;

pub use registry::ContextRegistry;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::PlanError;
use crate::time::{day_window, minutes, Span};

/// Unique identifier for a context.
pub type ContextId = String;

/// Days on which a context is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum ActiveDays {
    /// Recurring on these weekdays
    Weekdays(Vec<Weekday>),
    /// Only on these calendar dates
    Dates(Vec<NaiveDate>),
}

impl ActiveDays {
    /// Monday through Friday.
    pub fn weekdays() -> Self {
        ActiveDays::Weekdays(vec![
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
        ])
    }

    pub fn every_day() -> Self {
        ActiveDays::Weekdays(vec![
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ])
    }

    pub fn includes(&self, date: NaiveDate) -> bool {
        match self {
            ActiveDays::Weekdays(days) => days.contains(&date.weekday()),
            ActiveDays::Dates(dates) => dates.contains(&date),
        }
    }

    /// Describe the first day both sets share, if any.
    pub fn shared_day(&self, other: &ActiveDays) -> Option<String> {
        match (self, other) {
            (ActiveDays::Weekdays(a), ActiveDays::Weekdays(b)) => {
                let mut shared: Vec<&Weekday> = a.iter().filter(|d| b.contains(d)).collect();
                shared.sort_by_key(|d| d.num_days_from_monday());
                shared.first().map(|d| d.to_string())
            }
            (ActiveDays::Weekdays(days), ActiveDays::Dates(dates))
            | (ActiveDays::Dates(dates), ActiveDays::Weekdays(days)) => {
                let mut shared: Vec<&NaiveDate> =
                    dates.iter().filter(|d| days.contains(&d.weekday())).collect();
                shared.sort();
                shared.first().map(|d| d.to_string())
            }
            (ActiveDays::Dates(a), ActiveDays::Dates(b)) => {
                let mut shared: Vec<&NaiveDate> = a.iter().filter(|d| b.contains(d)).collect();
                shared.sort();
                shared.first().map(|d| d.to_string())
            }
        }
    }

    /// Sorted, human-readable listing.
    pub fn describe(&self) -> String {
        match self {
            ActiveDays::Weekdays(days) if days.is_empty() => "None Set".to_string(),
            ActiveDays::Weekdays(days) => {
                let mut days = days.clone();
                days.sort_by_key(|d| d.num_days_from_monday());
                days.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
            }
            ActiveDays::Dates(dates) => {
                let mut dates = dates.clone();
                dates.sort();
                dates.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
            }
        }
    }
}

/// The nominal definition of a context from `effective_from` onward.
///
/// The first revision has no effective date and covers all earlier days.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextRevision {
    pub effective_from: Option<NaiveDate>,
    pub days: ActiveDays,
    pub nominal_start: Option<NaiveTime>,
    pub nominal_end: Option<NaiveTime>,
    #[serde(default)]
    pub buffer_minutes: u32,
}

/// A dated one-off window that replaces (or adds) the context's window on that date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextException {
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    #[serde(default)]
    pub buffer_minutes: u32,
    #[serde(default)]
    pub label: Option<String>,
}

/// Actual boundaries reported for one day, with deltas against the nominal
/// window that was in effect on that day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryObservation {
    pub date: NaiveDate,
    pub actual_start: NaiveTime,
    pub actual_end: NaiveTime,
    pub start_delta_secs: i64,
    pub end_delta_secs: i64,
}

/// Append-only observation log. `version` increases with every append.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryLog {
    pub version: u64,
    pub observations: Vec<BoundaryObservation>,
}

impl BoundaryLog {
    pub fn append(&mut self, observation: BoundaryObservation) {
        self.observations.push(observation);
        self.version += 1;
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// The most recent `limit` observations on `weekday` strictly before `before`,
    /// in date order.
    pub fn samples_for(
        &self,
        weekday: Weekday,
        before: NaiveDate,
        limit: usize,
    ) -> Vec<&BoundaryObservation> {
        let mut samples: Vec<&BoundaryObservation> = self
            .observations
            .iter()
            .filter(|o| o.date.weekday() == weekday && o.date < before)
            .collect();
        samples.sort_by_key(|o| o.date);
        let skip = samples.len().saturating_sub(limit);
        samples.split_off(skip)
    }
}

/// The nominal window of a context on a specific date, before fuzziness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NominalWindow {
    pub span: Span,
    pub buffer: Duration,
}

/// Fields to change on a context. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextPatch {
    pub name: Option<String>,
    pub days: Option<ActiveDays>,
    pub nominal_start: Option<NaiveTime>,
    pub nominal_end: Option<NaiveTime>,
    pub buffer_minutes: Option<u32>,
    pub suspends: Option<Vec<ContextId>>,
    pub allow_overlap: Option<bool>,
}

impl ContextPatch {
    fn touches_window(&self) -> bool {
        self.days.is_some()
            || self.nominal_start.is_some()
            || self.nominal_end.is_some()
            || self.buffer_minutes.is_some()
    }

    fn apply_to(&self, revision: &mut ContextRevision) {
        if let Some(days) = &self.days {
            revision.days = days.clone();
        }
        if let Some(start) = self.nominal_start {
            revision.nominal_start = Some(start);
        }
        if let Some(end) = self.nominal_end {
            revision.nominal_end = Some(end);
        }
        if let Some(buffer) = self.buffer_minutes {
            revision.buffer_minutes = buffer;
        }
    }
}

/// A description of a context.
///
/// Contexts do not have a timezone. All times and dates are UTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub id: ContextId,
    pub name: String,
    /// Nominal definitions ordered by effective date.
    pub revisions: Vec<ContextRevision>,
    #[serde(default)]
    pub exceptions: Vec<ContextException>,
    /// Contexts whose windows this one carves out while it is active.
    #[serde(default)]
    pub suspends: Vec<ContextId>,
    /// Permit overlap with any other context.
    #[serde(default)]
    pub allow_overlap: bool,
    #[serde(default)]
    pub log: BoundaryLog,
    pub created_at: DateTime<Utc>,
}

impl Context {
    pub fn new(
        name: impl Into<String>,
        days: ActiveDays,
        nominal_start: NaiveTime,
        nominal_end: NaiveTime,
        buffer_minutes: u32,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            revisions: vec![ContextRevision {
                effective_from: None,
                days,
                nominal_start: Some(nominal_start),
                nominal_end: Some(nominal_end),
                buffer_minutes,
            }],
            exceptions: Vec::new(),
            suspends: Vec::new(),
            allow_overlap: false,
            log: BoundaryLog::default(),
            created_at: Utc::now(),
        }
    }

    /// A context with active days but no nominal times. It cannot be resolved.
    pub fn without_times(name: impl Into<String>, days: ActiveDays) -> Self {
        let mut context = Self::new(name, days, NaiveTime::MIN, NaiveTime::MIN, 0);
        context.revisions[0].nominal_start = None;
        context.revisions[0].nominal_end = None;
        context
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn suspending(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.suspends = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn allowing_overlap(mut self) -> Self {
        self.allow_overlap = true;
        self
    }

    pub fn with_exception(mut self, exception: ContextException) -> Self {
        self.exceptions.push(exception);
        self
    }

    /// The revision in effect on `date`.
    pub fn revision_on(&self, date: NaiveDate) -> &ContextRevision {
        self.revisions
            .iter()
            .rev()
            .find(|r| r.effective_from.map_or(true, |from| from <= date))
            .unwrap_or(&self.revisions[0])
    }

    pub fn exception_on(&self, date: NaiveDate) -> Option<&ContextException> {
        self.exceptions.iter().find(|e| e.date == date)
    }

    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.exception_on(date).is_some() || self.revision_on(date).days.includes(date)
    }

    /// Nominal window on `date`, `Ok(None)` when the context is inactive.
    ///
    /// # Errors
    /// Returns `UnschedulableContext` when the context is active but has no nominal times.
    pub fn nominal_window(&self, date: NaiveDate) -> Result<Option<NominalWindow>, PlanError> {
        if let Some(exception) = self.exception_on(date) {
            return Ok(Some(NominalWindow {
                span: day_window(date, exception.start, exception.end),
                buffer: minutes(exception.buffer_minutes as i64),
            }));
        }

        let revision = self.revision_on(date);
        if !revision.days.includes(date) {
            return Ok(None);
        }

        match (revision.nominal_start, revision.nominal_end) {
            (Some(start), Some(end)) => Ok(Some(NominalWindow {
                span: day_window(date, start, end),
                buffer: minutes(revision.buffer_minutes as i64),
            })),
            _ => Err(PlanError::UnschedulableContext {
                context: self.name.clone(),
                reason: "no nominal start/end time".to_string(),
            }),
        }
    }

    /// Apply a patch, from `effective_from` forward when given, otherwise to every revision.
    pub fn apply_patch(&mut self, patch: &ContextPatch, effective_from: Option<NaiveDate>) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(suspends) = &patch.suspends {
            self.suspends = suspends.clone();
        }
        if let Some(allow) = patch.allow_overlap {
            self.allow_overlap = allow;
        }
        if !patch.touches_window() {
            return;
        }

        match effective_from {
            None => {
                for revision in &mut self.revisions {
                    patch.apply_to(revision);
                }
            }
            Some(date) => {
                let mut revision = self.revision_on(date).clone();
                revision.effective_from = Some(date);
                patch.apply_to(&mut revision);
                // Later revisions are superseded by this one.
                self.revisions
                    .retain(|r| r.effective_from.map_or(true, |from| from < date));
                self.revisions.push(revision);
            }
        }
    }

    /// Build an observation with deltas against the nominal window in effect on `date`.
    ///
    /// # Errors
    /// Returns `UnschedulableContext` when there is no nominal window to compare against.
    pub fn observe(
        &self,
        date: NaiveDate,
        actual_start: NaiveTime,
        actual_end: NaiveTime,
    ) -> Result<BoundaryObservation, PlanError> {
        let revision = self.revision_on(date);
        let (start, end) = match self.exception_on(date) {
            Some(exception) => (exception.start, exception.end),
            None => match (revision.nominal_start, revision.nominal_end) {
                (Some(start), Some(end)) => (start, end),
                _ => {
                    return Err(PlanError::UnschedulableContext {
                        context: self.name.clone(),
                        reason: "no nominal start/end time to compare observations against"
                            .to_string(),
                    })
                }
            },
        };

        Ok(BoundaryObservation {
            date,
            actual_start,
            actual_end,
            start_delta_secs: signed_delta(actual_start, start),
            end_delta_secs: signed_delta(actual_end, end),
        })
    }
}

/// Signed distance in seconds from `nominal` to `actual`, wrapped into ±12h so
/// that boundaries reported across midnight stay small.
fn signed_delta(actual: NaiveTime, nominal: NaiveTime) -> i64 {
    const DAY: i64 = 24 * 60 * 60;
    let raw = (actual - nominal).num_seconds();
    let wrapped = raw.rem_euclid(DAY);
    if wrapped > DAY / 2 {
        wrapped - DAY
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn work() -> Context {
        Context::new("Work", ActiveDays::weekdays(), t(9, 0), t(17, 0), 10).with_id("work")
    }

    #[test]
    fn nominal_window_respects_days() {
        let ctx = work();
        // 2024-03-04 is a Monday, 2024-03-09 a Saturday.
        let monday = ctx.nominal_window(date(2024, 3, 4)).unwrap().unwrap();
        assert_eq!(monday.span.duration(), Duration::hours(8));
        assert_eq!(monday.buffer, minutes(10));
        assert!(ctx.nominal_window(date(2024, 3, 9)).unwrap().is_none());
    }

    #[test]
    fn missing_times_are_unschedulable() {
        let ctx = Context::without_times("Errands", ActiveDays::every_day());
        let err = ctx.nominal_window(date(2024, 3, 4)).unwrap_err();
        assert!(matches!(err, PlanError::UnschedulableContext { .. }));
    }

    #[test]
    fn dated_patch_applies_forward_only() {
        let mut ctx = work();
        let patch = ContextPatch {
            nominal_start: Some(t(8, 0)),
            ..Default::default()
        };
        ctx.apply_patch(&patch, Some(date(2024, 3, 11)));

        assert_eq!(ctx.revision_on(date(2024, 3, 4)).nominal_start, Some(t(9, 0)));
        assert_eq!(ctx.revision_on(date(2024, 3, 11)).nominal_start, Some(t(8, 0)));
        assert_eq!(ctx.revision_on(date(2024, 4, 1)).nominal_start, Some(t(8, 0)));
        assert_eq!(ctx.revisions.len(), 2);
    }

    #[test]
    fn undated_patch_rewrites_every_revision() {
        let mut ctx = work();
        ctx.apply_patch(
            &ContextPatch {
                nominal_start: Some(t(8, 0)),
                ..Default::default()
            },
            Some(date(2024, 3, 11)),
        );
        ctx.apply_patch(
            &ContextPatch {
                buffer_minutes: Some(0),
                ..Default::default()
            },
            None,
        );
        assert!(ctx.revisions.iter().all(|r| r.buffer_minutes == 0));
    }

    #[test]
    fn observation_deltas_use_revision_in_effect() {
        let mut ctx = work();
        ctx.apply_patch(
            &ContextPatch {
                nominal_start: Some(t(8, 0)),
                ..Default::default()
            },
            Some(date(2024, 3, 11)),
        );

        let before = ctx.observe(date(2024, 3, 4), t(9, 12), t(17, 0)).unwrap();
        assert_eq!(before.start_delta_secs, 12 * 60);

        let after = ctx.observe(date(2024, 3, 11), t(8, 5), t(16, 50)).unwrap();
        assert_eq!(after.start_delta_secs, 5 * 60);
        assert_eq!(after.end_delta_secs, -10 * 60);
    }

    #[test]
    fn delta_wraps_around_midnight() {
        assert_eq!(signed_delta(t(0, 10), t(23, 50)), 20 * 60);
        assert_eq!(signed_delta(t(23, 50), t(0, 10)), -20 * 60);
    }

    #[test]
    fn samples_are_filtered_by_weekday_and_window() {
        let ctx = work();
        let mut log = BoundaryLog::default();
        // Mondays in March 2024: 4, 11, 18, 25.
        for day in [4, 11, 18, 25] {
            log.append(ctx.observe(date(2024, 3, day), t(9, 5), t(17, 0)).unwrap());
        }
        log.append(ctx.observe(date(2024, 3, 5), t(9, 30), t(17, 0)).unwrap());
        assert_eq!(log.version, 5);

        let samples = log.samples_for(Weekday::Mon, date(2024, 4, 1), 2);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].date, date(2024, 3, 18));
        assert_eq!(samples[1].date, date(2024, 3, 25));
    }

    #[test]
    fn exception_replaces_window() {
        let ctx = Context::new("Health", ActiveDays::Dates(vec![]), t(0, 0), t(0, 0), 0)
            .with_exception(ContextException {
                date: date(2024, 3, 6),
                start: t(14, 0),
                end: t(15, 0),
                buffer_minutes: 0,
                label: Some("Dentist".into()),
            });
        assert!(ctx.is_active_on(date(2024, 3, 6)));
        assert!(!ctx.is_active_on(date(2024, 3, 7)));
        let window = ctx.nominal_window(date(2024, 3, 6)).unwrap().unwrap();
        assert_eq!(window.span.duration(), Duration::hours(1));
    }
}
