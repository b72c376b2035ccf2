//! Boundary prediction for fuzzy context windows.
//!
//! The predictor is a pure function of (context, date, observation log):
//! - Per weekday, take the most recent start/end deltas
//! - Expected boundary = nominal + mean delta
//! - Spread = multiplier x population standard deviation
//! - Fewer samples than the confidence threshold widen the spread by
//!   `min_samples / n`, never below the no-data spread
//! - No samples at all fall back to a fixed spread around the nominal time

mod window;

pub use window::{ResolvedWindow, WindowCalendar};

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::context::{BoundaryObservation, Context};
use crate::error::PlanError;
use crate::time::{FuzzyInterval, Span};

/// Predictor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictorConfig {
    /// Multiple of the standard deviation used as spread
    pub spread_multiplier: f64,
    /// Sample count below which the prediction is low-confidence
    pub min_samples: u32,
    /// Spread used when there are no samples (minutes)
    pub default_spread_minutes: u32,
    /// Most recent samples per weekday taken into account
    pub rolling_window: usize,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            spread_multiplier: 1.5,
            min_samples: 5,
            default_spread_minutes: 15,
            rolling_window: 20,
        }
    }
}

/// Mean and population standard deviation of a sample, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeltaStats {
    pub count: u32,
    pub mean_secs: f64,
    pub std_dev_secs: f64,
}

impl DeltaStats {
    pub fn from_samples(samples: &[i64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let n = samples.len() as f64;
        let mean = samples.iter().map(|&s| s as f64).sum::<f64>() / n;
        let variance = samples
            .iter()
            .map(|&s| {
                let diff = s as f64 - mean;
                diff * diff
            })
            .sum::<f64>()
            / n;
        Some(Self {
            count: samples.len() as u32,
            mean_secs: mean,
            std_dev_secs: variance.sqrt(),
        })
    }
}

/// Fuzzy boundary predictor
#[derive(Debug, Clone, Default)]
pub struct BoundaryPredictor {
    config: PredictorConfig,
}

impl BoundaryPredictor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: PredictorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    /// Predict the usable window of `context` on `date`.
    ///
    /// Returns `Ok(None)` when the context is not active that day.
    ///
    /// # Errors
    /// `UnschedulableContext` when the context has no nominal times or the
    /// buffered expected window is empty.
    pub fn predict(
        &self,
        context: &Context,
        date: NaiveDate,
    ) -> Result<Option<ResolvedWindow>, PlanError> {
        let Some(nominal) = context.nominal_window(date)? else {
            return Ok(None);
        };

        let samples = context.log.samples_for(
            date.weekday(),
            date,
            self.config.rolling_window.max(1),
        );
        let start_deltas: Vec<i64> = samples.iter().map(|o| o.start_delta_secs).collect();
        let end_deltas: Vec<i64> = samples.iter().map(|o| o.end_delta_secs).collect();

        let start = self.boundary(nominal.span.start, &start_deltas);
        let end = self.boundary(nominal.span.end, &end_deltas);

        // Buffers are applied after fuzziness: the safe span guards the worst case.
        let expected = Span::new(start.expected + nominal.buffer, end.expected - nominal.buffer);
        let safe = Span::new(start.latest + nominal.buffer, end.earliest - nominal.buffer);

        if expected.is_empty() {
            return Err(PlanError::UnschedulableContext {
                context: context.name.clone(),
                reason: format!("no usable capacity on {date}"),
            });
        }

        Ok(Some(ResolvedWindow {
            context_id: context.id.clone(),
            context_name: context.name.clone(),
            date,
            start,
            end,
            buffer_minutes: nominal.buffer.num_minutes(),
            expected,
            safe,
            suspended: Vec::new(),
        }))
    }

    /// Fuzzy boundary around `nominal` from a set of deltas.
    pub fn boundary(&self, nominal: chrono::DateTime<chrono::Utc>, deltas: &[i64]) -> FuzzyInterval {
        let default_spread = Duration::minutes(self.config.default_spread_minutes as i64);

        let Some(stats) = DeltaStats::from_samples(deltas) else {
            return FuzzyInterval::symmetric(nominal, default_spread, 0, true);
        };

        let expected = nominal + secs(stats.mean_secs);
        let mut spread_secs = self.config.spread_multiplier * stats.std_dev_secs;
        let low_confidence = stats.count < self.config.min_samples;
        if low_confidence {
            spread_secs *= self.config.min_samples as f64 / stats.count as f64;
            spread_secs = spread_secs.max(default_spread.num_seconds() as f64);
        }

        FuzzyInterval::symmetric(expected, secs(spread_secs), stats.count, low_confidence)
    }

    /// Raw deltas of a set of observations, for diagnostics.
    pub fn delta_stats(observations: &[&BoundaryObservation]) -> (Option<DeltaStats>, Option<DeltaStats>) {
        let starts: Vec<i64> = observations.iter().map(|o| o.start_delta_secs).collect();
        let ends: Vec<i64> = observations.iter().map(|o| o.end_delta_secs).collect();
        (DeltaStats::from_samples(&starts), DeltaStats::from_samples(&ends))
    }
}

fn secs(value: f64) -> Duration {
    Duration::seconds(value.round() as i64)
}
