//! Flat key/value views of analysis results for tabular export

use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::aggregator::GroupSummary;
use crate::analyzer::AnalysisReport;
use crate::decision::Decision;
use crate::effect::{EffectSizeReport, PowerReport, RelativeLift};
use crate::hypothesis::TestResult;
use crate::interval::IntervalEstimate;
use crate::segmentation::SegmentPartitionResult;
use crate::simulation::SimulationSummary;

pub type Record = BTreeMap<String, Value>;

/// Flatten a result into one record; nested results get prefixed keys.
pub trait ToRecord {
    fn to_record(&self) -> Record;

    fn to_prefixed_record(&self, prefix: &str) -> Record {
        self.to_record()
            .into_iter()
            .map(|(k, v)| (format!("{prefix}_{k}"), v))
            .collect()
    }
}

impl ToRecord for GroupSummary {
    fn to_record(&self) -> Record {
        Record::from([
            ("n".to_string(), json!(self.n)),
            ("mean".to_string(), json!(self.mean)),
            ("variance".to_string(), json!(self.variance)),
        ])
    }
}

impl ToRecord for TestResult {
    fn to_record(&self) -> Record {
        Record::from([
            ("test".to_string(), json!(self.test_kind)),
            ("statistic".to_string(), json!(self.statistic)),
            ("p_value".to_string(), json!(self.p_value)),
            ("alpha".to_string(), json!(self.alpha)),
            ("reject_null".to_string(), json!(self.reject_null)),
            ("standard_error".to_string(), json!(self.standard_error)),
            ("df".to_string(), json!(self.degrees_of_freedom)),
            ("degenerate".to_string(), json!(self.degenerate)),
        ])
    }
}

impl ToRecord for IntervalEstimate {
    fn to_record(&self) -> Record {
        Record::from([
            ("point".to_string(), json!(self.point)),
            ("lower".to_string(), json!(self.lower)),
            ("upper".to_string(), json!(self.upper)),
            ("confidence_level".to_string(), json!(self.confidence_level)),
            ("method".to_string(), json!(self.method)),
        ])
    }
}

impl ToRecord for EffectSizeReport {
    fn to_record(&self) -> Record {
        Record::from([
            ("measure".to_string(), json!(self.measure)),
            ("standardized".to_string(), json!(self.standardized)),
            ("magnitude".to_string(), json!(self.magnitude)),
            ("absolute_lift".to_string(), json!(self.absolute_lift)),
            ("relative_lift".to_string(), relative_lift_value(&self.relative_lift)),
        ])
    }
}

/// Numeric when defined, the string "undefined" otherwise.
fn relative_lift_value(lift: &RelativeLift) -> Value {
    match lift {
        RelativeLift::Defined(value) => json!(value),
        RelativeLift::Undefined => json!(lift.to_string()),
    }
}

impl ToRecord for PowerReport {
    fn to_record(&self) -> Record {
        Record::from([
            ("achieved".to_string(), json!(self.achieved_power)),
            ("target".to_string(), json!(self.target_power)),
            ("required_n_per_group".to_string(), json!(self.required_n_per_group)),
            ("planning_effect".to_string(), json!(self.planning_effect)),
            ("effective_n_per_group".to_string(), json!(self.effective_n_per_group)),
        ])
    }
}

impl ToRecord for Decision {
    fn to_record(&self) -> Record {
        Record::from([
            ("recommendation".to_string(), json!(self.recommendation)),
            ("rationale".to_string(), json!(self.rationale)),
            (
                "additional_conversions_per_period".to_string(),
                json!(self.revenue_impact.additional_conversions_per_period),
            ),
            (
                "additional_value_per_period".to_string(),
                json!(self.revenue_impact.additional_value_per_period),
            ),
            (
                "annualized_value".to_string(),
                json!(self.revenue_impact.annualized_value),
            ),
        ])
    }
}

impl ToRecord for SegmentPartitionResult {
    fn to_record(&self) -> Record {
        let mut record = Record::from([
            ("segment".to_string(), json!(self.key.to_string())),
            ("n_control".to_string(), json!(self.n_control)),
            ("n_treatment".to_string(), json!(self.n_treatment)),
            ("low_power".to_string(), json!(self.low_power)),
        ]);
        for (key, value) in &self.key.0 {
            record.insert(format!("segment_{key}"), json!(value));
        }

        match &self.analysis {
            Ok(analysis) => {
                record.insert("error".to_string(), Value::Null);
                record.extend(analysis.summaries.control.to_prefixed_record("control"));
                record.extend(analysis.summaries.treatment.to_prefixed_record("treatment"));
                record.extend(analysis.test.to_prefixed_record("test"));
                record.extend(analysis.difference.to_prefixed_record("difference"));
                record.extend(analysis.effect.to_prefixed_record("effect"));
                record.extend(analysis.power.to_prefixed_record("power"));
            }
            Err(err) => {
                record.insert("error".to_string(), json!(err.to_string()));
            }
        }
        record
    }
}

impl ToRecord for SimulationSummary {
    fn to_record(&self) -> Record {
        let mut record = Record::from([
            ("iterations".to_string(), json!(self.iterations)),
            ("seed".to_string(), json!(self.seed)),
            ("statistic".to_string(), json!(self.statistic)),
            ("mean".to_string(), json!(self.mean)),
            ("std_dev".to_string(), json!(self.std_dev)),
            ("threshold".to_string(), json!(self.threshold)),
            ("prob_exceeds_threshold".to_string(), json!(self.prob_exceeds_threshold)),
            ("empirical_power".to_string(), json!(self.empirical_power)),
        ]);
        record.extend(self.interval.to_prefixed_record("interval"));
        record
    }
}

impl ToRecord for AnalysisReport {
    fn to_record(&self) -> Record {
        let mut record = Record::from([
            ("report_id".to_string(), json!(self.report_id)),
            ("dataset_id".to_string(), json!(self.dataset_id)),
            ("generated_at".to_string(), json!(self.generated_at.to_rfc3339())),
        ]);
        record.extend(self.summaries.control.to_prefixed_record("control"));
        record.extend(self.summaries.treatment.to_prefixed_record("treatment"));
        record.extend(self.primary_test.to_prefixed_record("test"));
        if let Some(robustness) = &self.robustness_test {
            record.extend(robustness.to_prefixed_record("robustness"));
        }
        record.extend(self.control_interval.to_prefixed_record("control_ci"));
        record.extend(self.treatment_interval.to_prefixed_record("treatment_ci"));
        record.extend(self.difference_interval.to_prefixed_record("difference"));
        record.extend(self.effect.to_prefixed_record("effect"));
        record.extend(self.power.to_prefixed_record("power"));
        record.extend(self.decision.to_prefixed_record("decision"));
        record
    }
}
