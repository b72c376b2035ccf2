//! Time model: spans, fuzzy boundaries, and day arithmetic.
//!
//! All instants are UTC. Contexts are described in naive times of day and
//! only become instants once anchored to a calendar date.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Convert whole minutes into a chrono duration.
pub fn minutes(value: i64) -> Duration {
    Duration::minutes(value)
}

/// Anchor a time of day to a date.
pub fn at(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(time))
}

/// Build the nominal span of a window on `date`.
///
/// An end that is not after the start means the window crosses midnight.
pub fn day_window(date: NaiveDate, start: NaiveTime, end: NaiveTime) -> Span {
    let start_at = at(date, start);
    let mut end_at = at(date, end);
    if end <= start {
        end_at += Duration::days(1);
    }
    Span::new(start_at, end_at)
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Span {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> Duration {
        if self.end > self.start {
            self.end - self.start
        } else {
            Duration::zero()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn intersect(&self, other: &Span) -> Option<Span> {
        let span = Span::new(self.start.max(other.start), self.end.min(other.end));
        (!span.is_empty()).then_some(span)
    }

    /// Remove `other` from this span, yielding zero, one or two pieces.
    pub fn subtract(&self, other: &Span) -> Vec<Span> {
        if !self.overlaps(other) {
            return vec![*self];
        }
        let mut pieces = Vec::with_capacity(2);
        if other.start > self.start {
            pieces.push(Span::new(self.start, other.start));
        }
        if other.end < self.end {
            pieces.push(Span::new(other.end, self.end));
        }
        pieces
    }

    /// Shrink both ends inward by `amount`.
    pub fn shrink(&self, amount: Duration) -> Span {
        Span::new(self.start + amount, self.end - amount)
    }
}

/// An uncertain boundary: expected instant plus an asymmetric spread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuzzyInterval {
    pub expected: DateTime<Utc>,
    pub earliest: DateTime<Utc>,
    pub latest: DateTime<Utc>,
    /// Number of observations behind the estimate.
    pub sample_count: u32,
    /// Set when the estimate rests on fewer samples than the confidence threshold.
    pub low_confidence: bool,
}

impl FuzzyInterval {
    /// Symmetric interval around `expected`.
    pub fn symmetric(
        expected: DateTime<Utc>,
        spread: Duration,
        sample_count: u32,
        low_confidence: bool,
    ) -> Self {
        Self {
            expected,
            earliest: expected - spread,
            latest: expected + spread,
            sample_count,
            low_confidence,
        }
    }

    pub fn spread_before(&self) -> Duration {
        self.expected - self.earliest
    }

    pub fn spread_after(&self) -> Duration {
        self.latest - self.expected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn d() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
    }

    #[test]
    fn day_window_crosses_midnight() {
        let span = day_window(d(), t(22, 0), t(2, 0));
        assert_eq!(span.duration(), Duration::hours(4));
        assert_eq!(span.end.date_naive(), d().succ_opt().unwrap());
    }

    #[test]
    fn subtract_splits_span() {
        let whole = day_window(d(), t(9, 0), t(17, 0));
        let hole = day_window(d(), t(12, 0), t(13, 0));
        let pieces = whole.subtract(&hole);
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].end, at(d(), t(12, 0)));
        assert_eq!(pieces[1].start, at(d(), t(13, 0)));

        let cover = day_window(d(), t(8, 0), t(18, 0));
        assert!(whole.subtract(&cover).is_empty());
    }

    #[test]
    fn fuzzy_spreads() {
        let fuzzy = FuzzyInterval::symmetric(at(d(), t(9, 0)), minutes(15), 0, true);
        assert_eq!(fuzzy.spread_before(), minutes(15));
        assert_eq!(fuzzy.spread_after(), minutes(15));
        assert_eq!(fuzzy.earliest, at(d(), t(8, 45)));
    }
}
