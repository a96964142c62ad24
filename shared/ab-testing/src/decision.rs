//! Rollout recommendation from test, interval, effect and power

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use crate::config::BusinessParameters;
use crate::effect::{EffectSizeReport, PowerReport};
use crate::hypothesis::TestResult;
use crate::interval::IntervalEstimate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    RollOut,
    Hold,
    InsufficientEvidence,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Recommendation::RollOut => "ROLL_OUT",
            Recommendation::Hold => "HOLD",
            Recommendation::InsufficientEvidence => "INSUFFICIENT_EVIDENCE",
        })
    }
}

/// Projected value of shipping the treatment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevenueImpact {
    pub additional_conversions_per_period: f64,
    pub additional_value_per_period: f64,
    pub annualized_value: f64,
}

impl RevenueImpact {
    pub fn project(absolute_lift: f64, business: &BusinessParameters) -> Self {
        let conversions = absolute_lift * business.traffic_per_period;
        let value = conversions * business.value_per_conversion;
        Self {
            additional_conversions_per_period: conversions,
            additional_value_per_period: value,
            annualized_value: value * f64::from(business.periods_per_year),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub recommendation: Recommendation,
    pub rationale: String,
    pub revenue_impact: RevenueImpact,
}

/// Combine the statistical evidence with business inputs.
///
/// Power below `power_threshold` always yields `InsufficientEvidence`; otherwise
/// `RollOut` needs a rejected null and a difference interval entirely above zero.
pub fn synthesize(
    test: &TestResult,
    difference: &IntervalEstimate,
    effect: &EffectSizeReport,
    power: &PowerReport,
    business: &BusinessParameters,
    power_threshold: f64,
) -> Decision {
    let revenue_impact = RevenueImpact::project(effect.absolute_lift, business);

    let (recommendation, rationale) = if power.achieved_power < power_threshold {
        (
            Recommendation::InsufficientEvidence,
            format!(
                "achieved power {:.3} is below the {:.3} threshold; extend the test",
                power.achieved_power, power_threshold
            ),
        )
    } else if test.reject_null && difference.lower > 0.0 {
        (
            Recommendation::RollOut,
            format!(
                "significant at alpha {} (p = {:.4}) and the difference interval [{:.4}, {:.4}] lies above zero",
                test.alpha, test.p_value, difference.lower, difference.upper
            ),
        )
    } else if test.reject_null {
        (
            Recommendation::Hold,
            format!(
                "significant (p = {:.4}) but the difference interval [{:.4}, {:.4}] is not favorable",
                test.p_value, difference.lower, difference.upper
            ),
        )
    } else {
        (
            Recommendation::Hold,
            format!("not significant at alpha {} (p = {:.4})", test.alpha, test.p_value),
        )
    };

    info!(%recommendation, annualized_value = revenue_impact.annualized_value, "Decision synthesized");

    Decision {
        recommendation,
        rationale,
        revenue_impact,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::summarize;
    use crate::config::AnalysisConfig;
    use crate::dataset::Dataset;
    use crate::effect::{effect_size, power_report};
    use crate::hypothesis::{TwoSampleTest, ZProportionTest};
    use crate::interval::difference_interval;

    fn decide(control: (usize, usize), treatment: (usize, usize)) -> Decision {
        let config = AnalysisConfig::default();
        let dataset = Dataset::from_counts(control.0, control.1, treatment.0, treatment.1).unwrap();
        let summaries = summarize(&dataset).unwrap();
        let test = ZProportionTest.test(&summaries, config.alpha).unwrap();
        let interval = difference_interval(&summaries, config.confidence_level).unwrap();
        let effect = effect_size(&summaries);
        let power = power_report(&summaries, &effect, &config).unwrap();
        synthesize(
            &test,
            &interval,
            &effect,
            &power,
            &BusinessParameters::default(),
            config.power_threshold,
        )
    }

    #[test]
    fn test_roll_out_reference_scenario() {
        let decision = decide((5000, 600), (5000, 725));
        assert_eq!(decision.recommendation, Recommendation::RollOut);

        // 0.025 * 100_000 visitors * 75
        assert!((decision.revenue_impact.additional_conversions_per_period - 2500.0).abs() < 1e-6);
        assert!((decision.revenue_impact.additional_value_per_period - 187_500.0).abs() < 1e-6);
        assert!((decision.revenue_impact.annualized_value - 2_250_000.0).abs() < 1e-4);
    }

    #[test]
    fn test_underpowered_is_insufficient_evidence() {
        let decision = decide((200, 24), (200, 29));
        assert_eq!(decision.recommendation, Recommendation::InsufficientEvidence);
    }

    #[test]
    fn test_significant_harm_is_hold() {
        let decision = decide((5000, 725), (5000, 600));
        assert_eq!(decision.recommendation, Recommendation::Hold);
        assert!(decision.revenue_impact.annualized_value < 0.0);
    }

    #[test]
    fn test_display_labels() {
        assert_eq!(Recommendation::RollOut.to_string(), "ROLL_OUT");
        assert_eq!(
            serde_json::to_string(&Recommendation::InsufficientEvidence).unwrap(),
            r#""INSUFFICIENT_EVIDENCE""#
        );
    }
}
