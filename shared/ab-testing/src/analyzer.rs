//! End-to-end analysis of one experiment

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregator::{summarize, GroupSummaries};
use crate::config::{AnalysisConfig, BusinessParameters};
use crate::dataset::{Dataset, OutcomeKind};
use crate::decision::{synthesize, Decision};
use crate::effect::{effect_size, power_report, EffectSizeReport, PowerReport};
use crate::hypothesis::{TestResult, TestStrategy, TwoSampleTest, WelchTTest};
use crate::interval::{difference_interval, group_interval, IntervalEstimate};
use crate::segmentation::{SegmentPartitionResult, SegmentationEngine};
use crate::Result;

/// Everything computed for one dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub report_id: uuid::Uuid,
    pub dataset_id: uuid::Uuid,
    pub generated_at: DateTime<Utc>,
    pub config: AnalysisConfig,
    pub summaries: GroupSummaries,
    pub primary_test: TestResult,
    /// Welch t-test on the 0/1 outcomes, binary data only
    pub robustness_test: Option<TestResult>,
    pub control_interval: IntervalEstimate,
    pub treatment_interval: IntervalEstimate,
    pub difference_interval: IntervalEstimate,
    pub effect: EffectSizeReport,
    pub power: PowerReport,
    pub decision: Decision,
}

impl AnalysisReport {
    /// Primary and robustness tests disagree on rejecting the null.
    pub fn tests_disagree(&self) -> bool {
        self.robustness_test
            .as_ref()
            .is_some_and(|t| t.reject_null != self.primary_test.reject_null)
    }
}

#[derive(Debug, Clone)]
pub struct ExperimentAnalyzer {
    config: AnalysisConfig,
    business: BusinessParameters,
}

impl ExperimentAnalyzer {
    pub fn new(config: AnalysisConfig, business: BusinessParameters) -> Result<Self> {
        config.validate()?;
        business.validate()?;
        Ok(Self { config, business })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn business(&self) -> &BusinessParameters {
        &self.business
    }

    pub fn analyze(&self, dataset: &Dataset) -> Result<AnalysisReport> {
        info!(
            dataset_id = %dataset.id(),
            records = dataset.len(),
            kind = ?dataset.outcome_kind(),
            "Analyzing experiment"
        );

        let summaries = summarize(dataset)?;
        self.analyze_summaries(dataset.id(), summaries)
    }

    /// Same pipeline starting from precomputed group summaries.
    pub fn analyze_summaries(
        &self,
        dataset_id: uuid::Uuid,
        summaries: GroupSummaries,
    ) -> Result<AnalysisReport> {
        let config = &self.config;
        let strategy = TestStrategy::primary_for(summaries.kind());

        let primary_test = strategy.test(&summaries, config.alpha)?;
        let robustness_test = match summaries.kind() {
            OutcomeKind::Binary => match WelchTTest.test(&summaries, config.alpha) {
                Ok(result) => Some(result),
                Err(err) => {
                    warn!(error = %err, "Skipping robustness t-test");
                    None
                }
            },
            OutcomeKind::Continuous => None,
        };

        let control_interval = group_interval(&summaries.control, config.confidence_level)?;
        let treatment_interval = group_interval(&summaries.treatment, config.confidence_level)?;
        let difference = difference_interval(&summaries, config.confidence_level)?;
        let effect = effect_size(&summaries);
        let power = power_report(&summaries, &effect, config)?;

        let decision = synthesize(
            &primary_test,
            &difference,
            &effect,
            &power,
            &self.business,
            config.power_threshold,
        );

        let report = AnalysisReport {
            report_id: uuid::Uuid::new_v4(),
            dataset_id,
            generated_at: Utc::now(),
            config: config.clone(),
            summaries,
            primary_test,
            robustness_test,
            control_interval,
            treatment_interval,
            difference_interval: difference,
            effect,
            power,
            decision,
        };

        if report.tests_disagree() {
            warn!(
                primary_p = report.primary_test.p_value,
                "Primary and robustness tests disagree"
            );
        }
        info!(
            p_value = report.primary_test.p_value,
            lift = report.effect.absolute_lift,
            recommendation = %report.decision.recommendation,
            "Analysis complete"
        );
        Ok(report)
    }

    /// Stratified analysis under this analyzer's configuration.
    pub fn segment(&self, dataset: &Dataset, keys: &[&str]) -> Result<Vec<SegmentPartitionResult>> {
        SegmentationEngine::new(self.config.clone())?.analyze(dataset, keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::Recommendation;
    use crate::hypothesis::TestKind;

    fn analyzer() -> ExperimentAnalyzer {
        ExperimentAnalyzer::new(AnalysisConfig::default(), BusinessParameters::default()).unwrap()
    }

    #[test]
    fn test_reference_conversion_experiment() {
        let dataset = Dataset::from_counts(5000, 600, 5000, 725).unwrap();
        let report = analyzer().analyze(&dataset).unwrap();

        assert_eq!(report.dataset_id, dataset.id());
        assert_eq!(report.primary_test.test_kind, TestKind::ZProportion);
        assert!((report.primary_test.statistic - 3.687).abs() < 0.01);
        assert!(report.primary_test.reject_null);
        assert!((report.effect.absolute_lift - 0.025).abs() < 1e-12);
        assert!(report.difference_interval.lower > 0.0);
        assert!(report.power.achieved_power > 0.9);
        assert_eq!(report.decision.recommendation, Recommendation::RollOut);

        let robustness = report.robustness_test.as_ref().unwrap();
        assert_eq!(robustness.test_kind, TestKind::TMean);
        assert!(!report.tests_disagree());

        assert!(report.control_interval.contains(0.12));
        assert!(report.treatment_interval.contains(0.145));
    }

    #[test]
    fn test_continuous_experiment_has_no_robustness_test() {
        let dataset =
            Dataset::from_values(&[1.0, 1.1, 0.9, 1.2, 0.8], &[5.0, 3.0, 7.0, 4.0, 6.0]).unwrap();
        let report = analyzer().analyze(&dataset).unwrap();

        assert_eq!(report.primary_test.test_kind, TestKind::TMean);
        assert!(report.robustness_test.is_none());
        assert!(report.primary_test.degrees_of_freedom.is_some());
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = AnalysisConfig::default().with_alpha(1.5);
        assert!(ExperimentAnalyzer::new(config, BusinessParameters::default()).is_err());
    }

    #[test]
    fn test_empty_group_is_an_error() {
        let dataset = Dataset::from_counts(0, 0, 100, 10).unwrap();
        assert!(analyzer().analyze(&dataset).is_err());
    }
}
