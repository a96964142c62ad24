//! Effect size, achieved power and required sample size

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::aggregator::GroupSummaries;
use crate::config::{check_open_unit, AnalysisConfig};
use crate::dataset::OutcomeKind;
use crate::hypothesis::{normal_cdf, normal_quantile};
use crate::{ABTestError, Result};

/// Standardized effect measure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectMeasure {
    /// Arcsine-transformed difference of proportions
    CohensH,
    /// Mean difference over the pooled standard deviation
    CohensD,
}

/// Conventional magnitude band of a standardized effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectMagnitude {
    Small,
    Medium,
    Large,
}

impl EffectMagnitude {
    pub fn classify(effect: f64) -> Self {
        let effect = effect.abs();
        if effect < 0.2 {
            EffectMagnitude::Small
        } else if effect <= 0.5 {
            EffectMagnitude::Medium
        } else {
            EffectMagnitude::Large
        }
    }
}

impl fmt::Display for EffectMagnitude {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EffectMagnitude::Small => "small",
            EffectMagnitude::Medium => "medium",
            EffectMagnitude::Large => "large",
        })
    }
}

/// Relative lift, undefined when the control rate or mean is zero
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum RelativeLift {
    Defined(f64),
    Undefined,
}

impl RelativeLift {
    pub fn compute(absolute_lift: f64, baseline: f64) -> Self {
        if baseline == 0.0 {
            RelativeLift::Undefined
        } else {
            RelativeLift::Defined(absolute_lift / baseline)
        }
    }

    pub fn value(&self) -> Option<f64> {
        match *self {
            RelativeLift::Defined(value) => Some(value),
            RelativeLift::Undefined => None,
        }
    }

    pub fn is_defined(&self) -> bool {
        matches!(self, RelativeLift::Defined(_))
    }
}

impl fmt::Display for RelativeLift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelativeLift::Defined(value) => write!(f, "{:.2}%", value * 100.0),
            RelativeLift::Undefined => f.write_str("undefined"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectSizeReport {
    pub measure: EffectMeasure,
    /// Cohen's h or d, signed as treatment minus control
    pub standardized: f64,
    pub magnitude: EffectMagnitude,
    pub absolute_lift: f64,
    pub relative_lift: RelativeLift,
}

impl EffectSizeReport {
    pub fn cohens_h(&self) -> Option<f64> {
        (self.measure == EffectMeasure::CohensH).then_some(self.standardized)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerReport {
    pub achieved_power: f64,
    /// Units per group needed to reach `target_power`; `None` when no finite size suffices
    pub required_n_per_group: Option<u64>,
    pub target_power: f64,
    /// Standardized effect the requirement was planned for
    pub planning_effect: f64,
    /// Harmonic mean of the two group sizes
    pub effective_n_per_group: f64,
}

pub fn cohens_h(control_rate: f64, treatment_rate: f64) -> f64 {
    2.0 * treatment_rate.sqrt().asin() - 2.0 * control_rate.sqrt().asin()
}

/// Cohen's d with the pooled standard deviation; zero when both groups are constant.
pub fn cohens_d(summaries: &GroupSummaries) -> f64 {
    let (c, t) = (&summaries.control, &summaries.treatment);
    let dof = (c.n + t.n) as f64 - 2.0;
    if dof <= 0.0 {
        return 0.0;
    }
    let pooled = (((c.n as f64 - 1.0) * c.variance + (t.n as f64 - 1.0) * t.variance) / dof).sqrt();
    if pooled > 0.0 {
        summaries.difference() / pooled
    } else {
        0.0
    }
}

/// Effect size report for a pair of group summaries.
pub fn effect_size(summaries: &GroupSummaries) -> EffectSizeReport {
    let (measure, standardized) = match summaries.kind() {
        OutcomeKind::Binary => (
            EffectMeasure::CohensH,
            cohens_h(summaries.control.rate(), summaries.treatment.rate()),
        ),
        OutcomeKind::Continuous => (EffectMeasure::CohensD, cohens_d(summaries)),
    };

    let absolute_lift = summaries.difference();
    let relative_lift = RelativeLift::compute(absolute_lift, summaries.control.mean);
    if !relative_lift.is_defined() {
        warn!("Control baseline is zero, relative lift undefined");
    }

    EffectSizeReport {
        measure,
        standardized,
        magnitude: EffectMagnitude::classify(standardized),
        absolute_lift,
        relative_lift,
    }
}

/// Power of a two-sided z-test for a standardized effect at `n` units per group.
pub fn achieved_power(effect: f64, n_per_group: f64, alpha: f64) -> Result<f64> {
    check_open_unit("alpha", alpha)?;
    if !(n_per_group > 0.0) {
        return Err(ABTestError::InsufficientData {
            scope: "power calculation".to_string(),
            required: 1,
            found: 0,
        });
    }

    let z_alpha = normal_quantile(1.0 - alpha / 2.0)?;
    let shift = effect.abs() * (n_per_group / 2.0).sqrt();
    let power = normal_cdf(shift - z_alpha)? + normal_cdf(-shift - z_alpha)?;
    Ok(power.clamp(0.0, 1.0))
}

/// Smallest per-group size whose power reaches `target_power`.
pub fn required_sample_size(effect: f64, alpha: f64, target_power: f64) -> Result<Option<u64>> {
    check_open_unit("alpha", alpha)?;
    check_open_unit("target_power", target_power)?;

    let effect = effect.abs();
    if effect == 0.0 || !effect.is_finite() {
        return Ok(None);
    }

    let z_alpha = normal_quantile(1.0 - alpha / 2.0)?;
    let z_beta = normal_quantile(target_power)?;
    // Upper bound: ignores the opposite rejection tail
    let closed_form = (2.0 * ((z_alpha + z_beta) / effect).powi(2)).ceil().max(1.0);
    if !closed_form.is_finite() || closed_form > 1e15 {
        return Ok(None);
    }

    let (mut lo, mut hi) = (1u64, closed_form as u64);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if achieved_power(effect, mid as f64, alpha)? >= target_power {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    Ok(Some(lo))
}

/// Achieved and required power for an observed comparison.
pub fn power_report(
    summaries: &GroupSummaries,
    effect: &EffectSizeReport,
    config: &AnalysisConfig,
) -> Result<PowerReport> {
    let (n1, n2) = (summaries.control.n as f64, summaries.treatment.n as f64);
    let effective_n = 2.0 / (1.0 / n1 + 1.0 / n2);

    let achieved = achieved_power(effect.standardized, effective_n, config.alpha)?;
    let planning_effect = config
        .minimum_detectable_effect
        .unwrap_or(effect.standardized.abs());
    let required = required_sample_size(planning_effect, config.alpha, config.target_power)?;

    debug!(
        achieved_power = achieved,
        required_n = ?required,
        effective_n,
        "Power analysis"
    );

    Ok(PowerReport {
        achieved_power: achieved,
        required_n_per_group: required,
        target_power: config.target_power,
        planning_effect,
        effective_n_per_group: effective_n,
    })
}
