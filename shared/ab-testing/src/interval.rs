//! Confidence intervals for group parameters and their difference

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregator::{GroupSummaries, GroupSummary};
use crate::config::check_open_unit;
use crate::dataset::OutcomeKind;
use crate::hypothesis::{normal_quantile, require_variance_sample, students_t_critical, welch_degrees_of_freedom};
use crate::{ABTestError, Result};

/// Construction method of an interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalMethod {
    Wald,
    StudentT,
    Percentile,
}

/// Point estimate with lower and upper bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalEstimate {
    pub point: f64,
    pub lower: f64,
    pub upper: f64,
    pub confidence_level: f64,
    pub method: IntervalMethod,
}

impl IntervalEstimate {
    fn symmetric(point: f64, margin: f64, confidence_level: f64, method: IntervalMethod) -> Self {
        Self {
            point,
            lower: point - margin,
            upper: point + margin,
            confidence_level,
            method,
        }
    }

    fn clamped(mut self, min: f64, max: f64) -> Self {
        self.lower = self.lower.clamp(min, max);
        self.upper = self.upper.clamp(min, max);
        self
    }

    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }

    pub fn excludes_zero(&self) -> bool {
        !self.contains(0.0)
    }

    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    pub fn margin(&self) -> f64 {
        self.width() / 2.0
    }
}

/// Two-sided standard normal critical value for a confidence level.
pub fn z_critical(confidence_level: f64) -> Result<f64> {
    check_open_unit("confidence_level", confidence_level)?;
    normal_quantile(1.0 - (1.0 - confidence_level) / 2.0)
}

/// Interval for one group's rate (Wald, clamped to [0, 1]) or mean (Student-t).
pub fn group_interval(summary: &GroupSummary, confidence_level: f64) -> Result<IntervalEstimate> {
    check_open_unit("confidence_level", confidence_level)?;

    match summary.kind {
        OutcomeKind::Binary => {
            let rate = summary.rate();
            let se = (rate * (1.0 - rate) / summary.n as f64).sqrt();
            let margin = z_critical(confidence_level)? * se;
            Ok(IntervalEstimate::symmetric(rate, margin, confidence_level, IntervalMethod::Wald)
                .clamped(0.0, 1.0))
        }
        OutcomeKind::Continuous => {
            require_variance_sample(summary)?;
            let se = summary.mean_variance().sqrt();
            let t = students_t_critical(confidence_level, (summary.n - 1) as f64)?;
            Ok(IntervalEstimate::symmetric(
                summary.mean,
                t * se,
                confidence_level,
                IntervalMethod::StudentT,
            ))
        }
    }
}

/// Interval for treatment minus control; never clamped.
pub fn difference_interval(
    summaries: &GroupSummaries,
    confidence_level: f64,
) -> Result<IntervalEstimate> {
    check_open_unit("confidence_level", confidence_level)?;
    let (c, t) = (&summaries.control, &summaries.treatment);
    let diff = summaries.difference();

    let interval = match summaries.kind() {
        OutcomeKind::Binary => {
            let se = (c.rate() * (1.0 - c.rate()) / c.n as f64
                + t.rate() * (1.0 - t.rate()) / t.n as f64)
                .sqrt();
            let margin = z_critical(confidence_level)? * se;
            IntervalEstimate::symmetric(diff, margin, confidence_level, IntervalMethod::Wald)
        }
        OutcomeKind::Continuous => {
            require_variance_sample(c)?;
            require_variance_sample(t)?;
            let se = (c.mean_variance() + t.mean_variance()).sqrt();
            let margin = if se > 0.0 {
                students_t_critical(confidence_level, welch_degrees_of_freedom(c, t))? * se
            } else {
                0.0
            };
            IntervalEstimate::symmetric(diff, margin, confidence_level, IntervalMethod::StudentT)
        }
    };

    debug!(
        point = interval.point,
        lower = interval.lower,
        upper = interval.upper,
        "Difference interval"
    );
    Ok(interval)
}

/// Linear-interpolated quantile of sorted samples.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() || !(0.0..=1.0).contains(&q) {
        return None;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Empirical interval from samples, with the median as point estimate.
pub fn percentile_interval(samples: &[f64], confidence_level: f64) -> Result<IntervalEstimate> {
    check_open_unit("confidence_level", confidence_level)?;
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);

    let tail = (1.0 - confidence_level) / 2.0;
    let bounds = (
        quantile(&sorted, tail),
        quantile(&sorted, 0.5),
        quantile(&sorted, 1.0 - tail),
    );
    match bounds {
        (Some(lower), Some(point), Some(upper)) => Ok(IntervalEstimate {
            point,
            lower,
            upper,
            confidence_level,
            method: IntervalMethod::Percentile,
        }),
        _ => Err(ABTestError::InsufficientData {
            scope: "simulation samples".to_string(),
            required: 1,
            found: 0,
        }),
    }
}
