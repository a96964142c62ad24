//! A/B test analysis engine
//!
//! Fixed-horizon statistics for two-arm randomized experiments: descriptive
//! aggregation, hypothesis tests, confidence intervals, effect size and power,
//! segmentation, Monte Carlo resampling and a final rollout recommendation.
//!
//! Every stage is a pure function over an immutable [`Dataset`]; configuration
//! travels explicitly through [`AnalysisConfig`] and [`SimulationConfig`].

pub mod aggregator;
pub mod analyzer;
pub mod config;
pub mod dataset;
pub mod decision;
pub mod effect;
pub mod hypothesis;
pub mod interval;
pub mod record;
pub mod segmentation;
pub mod simulation;
pub mod synthetic;

pub use aggregator::{summarize, summarize_group, GroupSummary, GroupSummaries};
pub use analyzer::{AnalysisReport, ExperimentAnalyzer};
pub use config::{AnalysisConfig, BusinessParameters};
pub use dataset::{Dataset, DatasetBuilder, Group, Outcome, OutcomeKind, OutcomeRecord};
pub use decision::{synthesize, Decision, Recommendation, RevenueImpact};
pub use effect::{
    achieved_power, effect_size, power_report, required_sample_size, EffectMagnitude,
    EffectMeasure, EffectSizeReport, PowerReport, RelativeLift,
};
pub use hypothesis::{TestKind, TestResult, TestStrategy, TwoSampleTest, WelchTTest, ZProportionTest};
pub use interval::{difference_interval, group_interval, IntervalEstimate};
pub use record::{Record, ToRecord};
pub use segmentation::{PartitionAnalysis, SegmentKey, SegmentPartitionResult, SegmentationEngine};
pub use simulation::{
    iteration_seed, MonteCarloSimulator, SimulationConfig, SimulationRun, SimulationSummary,
    Statistic,
};
pub use synthetic::{ArmModel, ArmSpec, SegmentSpec, SyntheticDesign};

use serde::{Deserialize, Serialize};

/// Analysis error types
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum ABTestError {
    #[error("insufficient data in {scope}: need at least {required} units, found {found}")]
    InsufficientData {
        scope: String,
        required: usize,
        found: usize,
    },

    #[error("degenerate variance in {scope}: standard error is zero")]
    DegenerateVariance { scope: String },

    #[error("invalid configuration: {reason}")]
    Configuration { reason: String },

    #[error("simulation cancelled after {completed} of {requested} iterations")]
    Cancelled { completed: usize, requested: usize },

    #[error("distribution error: {reason}")]
    Distribution { reason: String },
}

impl ABTestError {
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Prefix the error scope with an outer context such as a segment or iteration.
    pub fn within(self, context: &str) -> Self {
        match self {
            Self::InsufficientData {
                scope,
                required,
                found,
            } => Self::InsufficientData {
                scope: format!("{context} / {scope}"),
                required,
                found,
            },
            Self::DegenerateVariance { scope } => Self::DegenerateVariance {
                scope: format!("{context} / {scope}"),
            },
            other => other,
        }
    }
}

impl From<statrs::StatsError> for ABTestError {
    fn from(err: statrs::StatsError) -> Self {
        Self::Distribution {
            reason: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ABTestError>;
