//! Analysis configuration

use serde::{Deserialize, Serialize};

use crate::{ABTestError, Result};

/// Statistical settings shared by every stage of one analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Significance level for two-sided tests
    pub alpha: f64,

    /// Confidence level for interval estimates
    pub confidence_level: f64,

    /// Minimum per-group units before a segment is flagged as low power
    pub min_segment_n: usize,

    /// Achieved power below this yields an insufficient-evidence recommendation
    pub power_threshold: f64,

    /// Power targeted by the required sample size calculation
    pub target_power: f64,

    /// Standardized effect used for sample size planning; the observed effect when unset
    pub minimum_detectable_effect: Option<f64>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            alpha: 0.05,
            confidence_level: 0.95,
            min_segment_n: 30,
            power_threshold: 0.8,
            target_power: 0.8,
            minimum_detectable_effect: None,
        }
    }
}

impl AnalysisConfig {
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_confidence_level(mut self, confidence_level: f64) -> Self {
        self.confidence_level = confidence_level;
        self
    }

    pub fn with_min_segment_n(mut self, min_segment_n: usize) -> Self {
        self.min_segment_n = min_segment_n;
        self
    }

    pub fn with_power_threshold(mut self, power_threshold: f64) -> Self {
        self.power_threshold = power_threshold;
        self
    }

    pub fn with_minimum_detectable_effect(mut self, effect: f64) -> Self {
        self.minimum_detectable_effect = Some(effect);
        self
    }

    /// Reject out-of-range settings before any computation starts.
    pub fn validate(&self) -> Result<()> {
        check_open_unit("alpha", self.alpha)?;
        check_open_unit("confidence_level", self.confidence_level)?;
        check_open_unit("target_power", self.target_power)?;

        if !(0.0..=1.0).contains(&self.power_threshold) {
            return Err(ABTestError::configuration(format!(
                "power_threshold must lie in [0, 1], got {}",
                self.power_threshold
            )));
        }

        if let Some(mde) = self.minimum_detectable_effect {
            if !mde.is_finite() || mde <= 0.0 {
                return Err(ABTestError::configuration(format!(
                    "minimum_detectable_effect must be positive, got {mde}"
                )));
            }
        }

        Ok(())
    }
}

/// Business inputs for the revenue projection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusinessParameters {
    /// Units exposed per period (e.g. monthly visitors)
    pub traffic_per_period: f64,

    /// Value of one additional conversion
    pub value_per_conversion: f64,

    /// Periods per year used to annualise the projection
    pub periods_per_year: u32,
}

impl Default for BusinessParameters {
    fn default() -> Self {
        Self {
            traffic_per_period: 100_000.0,
            value_per_conversion: 75.0,
            periods_per_year: 12,
        }
    }
}

impl BusinessParameters {
    pub fn validate(&self) -> Result<()> {
        if !self.traffic_per_period.is_finite() || self.traffic_per_period < 0.0 {
            return Err(ABTestError::configuration(format!(
                "traffic_per_period must be non-negative, got {}",
                self.traffic_per_period
            )));
        }
        if !self.value_per_conversion.is_finite() {
            return Err(ABTestError::configuration("value_per_conversion must be finite"));
        }
        Ok(())
    }
}

pub(crate) fn check_open_unit(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(ABTestError::configuration(format!(
            "{name} must lie in (0, 1), got {value}"
        )))
    }
}
