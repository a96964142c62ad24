//! Monte Carlo estimation of a statistic's sampling distribution
//!
//! Iteration `i` draws from its own generator seeded by [`iteration_seed`], so
//! the collected sequence depends only on the seed, the design and the
//! iteration count. Parallel and sequential runs are bit-identical.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::aggregator::{summarize, GroupSummaries};
use crate::config::check_open_unit;
use crate::dataset::OutcomeKind;
use crate::effect::{cohens_d, cohens_h};
use crate::hypothesis::{TestResult, TestStrategy, TwoSampleTest};
use crate::interval::{percentile_interval, IntervalEstimate};
use crate::synthetic::SyntheticDesign;
use crate::{ABTestError, Result};

/// Scalar extracted from each simulated experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statistic {
    AbsoluteLift,
    TestStatistic,
    PValue,
    StandardizedEffect,
}

impl Statistic {
    pub fn extract(&self, summaries: &GroupSummaries, test: &TestResult) -> f64 {
        match self {
            Statistic::AbsoluteLift => summaries.difference(),
            Statistic::TestStatistic => test.statistic,
            Statistic::PValue => test.p_value,
            Statistic::StandardizedEffect => match summaries.kind() {
                OutcomeKind::Binary => cohens_h(summaries.control.rate(), summaries.treatment.rate()),
                OutcomeKind::Continuous => cohens_d(summaries),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub design: SyntheticDesign,
    pub iterations: usize,
    pub seed: u64,
    pub statistic: Statistic,
    pub alpha: f64,
    pub confidence_level: f64,
    /// Reference value for the exceedance probability
    pub threshold: f64,
    pub parallel: bool,
}

impl SimulationConfig {
    /// Iteration count and seed have no defaults.
    pub fn new(design: SyntheticDesign, iterations: usize, seed: u64) -> Self {
        Self {
            design,
            iterations,
            seed,
            statistic: Statistic::AbsoluteLift,
            alpha: 0.05,
            confidence_level: 0.95,
            threshold: 0.0,
            parallel: true,
        }
    }

    pub fn with_statistic(mut self, statistic: Statistic) -> Self {
        self.statistic = statistic;
        self
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_confidence_level(mut self, confidence_level: f64) -> Self {
        self.confidence_level = confidence_level;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(ABTestError::configuration("iterations must be positive"));
        }
        check_open_unit("alpha", self.alpha)?;
        check_open_unit("confidence_level", self.confidence_level)?;
        if !self.threshold.is_finite() {
            return Err(ABTestError::configuration("threshold must be finite"));
        }
        self.design.validate()?;
        if self.design.kind() == OutcomeKind::Continuous
            && (self.design.control.n < 2 || self.design.treatment.n < 2)
        {
            return Err(ABTestError::configuration(
                "continuous simulations need at least 2 units per group",
            ));
        }
        Ok(())
    }
}

/// Raw output of one simulation invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRun {
    pub iterations: usize,
    pub seed: u64,
    pub statistic: Statistic,
    pub statistic_samples: Vec<f64>,
    /// Whether each iteration's test rejected the null
    pub rejections: Vec<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSummary {
    pub iterations: usize,
    pub seed: u64,
    pub statistic: Statistic,
    pub mean: f64,
    pub std_dev: f64,
    pub interval: IntervalEstimate,
    pub threshold: f64,
    pub prob_exceeds_threshold: f64,
    pub empirical_power: f64,
}

impl SimulationRun {
    pub fn summarize(&self, confidence_level: f64, threshold: f64) -> Result<SimulationSummary> {
        let interval = percentile_interval(&self.statistic_samples, confidence_level)?;
        let n = self.statistic_samples.len() as f64;

        let mean = self.statistic_samples.iter().mean();
        let std_dev = if self.statistic_samples.len() < 2 {
            0.0
        } else {
            self.statistic_samples.iter().std_dev()
        };
        let exceed = self.statistic_samples.iter().filter(|&&x| x > threshold).count();
        let rejected = self.rejections.iter().filter(|&&r| r).count();

        Ok(SimulationSummary {
            iterations: self.iterations,
            seed: self.seed,
            statistic: self.statistic,
            mean,
            std_dev,
            interval,
            threshold,
            prob_exceeds_threshold: exceed as f64 / n,
            empirical_power: rejected as f64 / self.rejections.len() as f64,
        })
    }
}

/// Seed of iteration `index`'s private generator.
pub fn iteration_seed(seed: u64, index: usize) -> u64 {
    // splitmix64 finalizer over seed and index
    let mut z = seed ^ (index as u64).wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

pub struct MonteCarloSimulator {
    config: SimulationConfig,
    strategy: TestStrategy,
    cancel: Option<Arc<AtomicBool>>,
}

impl MonteCarloSimulator {
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let strategy = TestStrategy::primary_for(config.design.kind());
        Ok(Self {
            config,
            strategy,
            cancel: None,
        })
    }

    /// Stop between iterations once `flag` is set.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn run(&self) -> Result<SimulationRun> {
        let iterations = self.config.iterations;
        info!(
            iterations,
            seed = self.config.seed,
            statistic = ?self.config.statistic,
            parallel = self.config.parallel,
            "Starting Monte Carlo simulation"
        );

        let completed = AtomicUsize::new(0);
        let step = |index: usize| -> Result<(f64, bool)> {
            if self.cancel.as_ref().is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                return Err(ABTestError::Cancelled {
                    completed: completed.load(Ordering::Relaxed),
                    requested: iterations,
                });
            }
            let outcome = self.iteration(index)?;
            completed.fetch_add(1, Ordering::Relaxed);
            Ok(outcome)
        };

        let outcomes: Vec<(f64, bool)> = if self.config.parallel {
            (0..iterations).into_par_iter().map(step).collect::<Result<_>>()?
        } else {
            (0..iterations).map(step).collect::<Result<_>>()?
        };

        let (statistic_samples, rejections) = outcomes.into_iter().unzip();
        debug!(iterations, "Monte Carlo simulation finished");

        Ok(SimulationRun {
            iterations,
            seed: self.config.seed,
            statistic: self.config.statistic,
            statistic_samples,
            rejections,
        })
    }

    pub fn run_and_summarize(&self) -> Result<(SimulationRun, SimulationSummary)> {
        let run = self.run()?;
        let summary = run.summarize(self.config.confidence_level, self.config.threshold)?;
        info!(
            mean = summary.mean,
            lower = summary.interval.lower,
            upper = summary.interval.upper,
            empirical_power = summary.empirical_power,
            "Monte Carlo summary"
        );
        Ok((run, summary))
    }

    /// One independent synthetic experiment.
    pub fn iteration(&self, index: usize) -> Result<(f64, bool)> {
        let scope = format!("iteration {index}");
        let mut rng = StdRng::seed_from_u64(iteration_seed(self.config.seed, index));

        let dataset = self
            .config
            .design
            .generate(&mut rng)
            .map_err(|err| err.within(&scope))?;
        let summaries = summarize(&dataset).map_err(|err| err.within(&scope))?;
        let test = self
            .strategy
            .test(&summaries, self.config.alpha)
            .map_err(|err| err.within(&scope))?;

        Ok((self.config.statistic.extract(&summaries, &test), test.reject_null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(iterations: usize, seed: u64) -> SimulationConfig {
        SimulationConfig::new(SyntheticDesign::binary(500, 0.12, 0.145), iterations, seed)
    }

    #[test]
    fn test_same_seed_is_bit_identical() {
        let a = MonteCarloSimulator::new(config(200, 42)).unwrap().run().unwrap();
        let b = MonteCarloSimulator::new(config(200, 42)).unwrap().run().unwrap();

        let bits = |run: &SimulationRun| -> Vec<u64> {
            run.statistic_samples.iter().map(|x| x.to_bits()).collect()
        };
        assert_eq!(bits(&a), bits(&b));
        assert_eq!(a.rejections, b.rejections);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let parallel = MonteCarloSimulator::new(config(150, 9)).unwrap().run().unwrap();
        let sequential = MonteCarloSimulator::new(config(150, 9).sequential())
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(parallel, sequential);
    }

    #[test]
    fn test_different_seeds_differ() {
        let a = MonteCarloSimulator::new(config(50, 1)).unwrap().run().unwrap();
        let b = MonteCarloSimulator::new(config(50, 2)).unwrap().run().unwrap();
        assert_ne!(a.statistic_samples, b.statistic_samples);
    }

    #[test]
    fn test_prefix_stable_across_iteration_counts() {
        let short = MonteCarloSimulator::new(config(20, 5)).unwrap().run().unwrap();
        let long = MonteCarloSimulator::new(config(40, 5)).unwrap().run().unwrap();
        assert_eq!(short.statistic_samples[..], long.statistic_samples[..20]);
    }

    #[test]
    fn test_summary_of_lift_distribution() {
        let simulator = MonteCarloSimulator::new(config(400, 42)).unwrap();
        let (run, summary) = simulator.run_and_summarize().unwrap();

        assert_eq!(run.statistic_samples.len(), 400);
        assert!((summary.mean - 0.025).abs() < 0.005);
        assert!(summary.interval.lower < 0.025 && summary.interval.upper > 0.025);
        assert!(summary.prob_exceeds_threshold > 0.85);
        // power at n=500 per group and h ~ 0.074 is about 0.2
        assert!(summary.empirical_power > 0.1 && summary.empirical_power < 0.35);
    }

    #[test]
    fn test_null_design_rejects_near_alpha() {
        let design = SyntheticDesign::binary(1000, 0.2, 0.2);
        let config = SimulationConfig::new(design, 1000, 3).with_statistic(Statistic::PValue);
        let (_, summary) = MonteCarloSimulator::new(config).unwrap().run_and_summarize().unwrap();
        assert!(summary.empirical_power > 0.02 && summary.empirical_power < 0.09);
    }

    #[test]
    fn test_continuous_design_uses_t_test() {
        let design = SyntheticDesign::continuous(50, (10.0, 4.0), (11.0, 4.0));
        let config = SimulationConfig::new(design, 100, 8).with_statistic(Statistic::TestStatistic);
        let (_, summary) = MonteCarloSimulator::new(config).unwrap().run_and_summarize().unwrap();
        assert!(summary.mean > 1.5);
    }

    #[test]
    fn test_standardized_effect_with_zero_baseline() {
        let design = SyntheticDesign::binary(200, 0.0, 0.1);
        let config =
            SimulationConfig::new(design, 50, 4).with_statistic(Statistic::StandardizedEffect);
        let run = MonteCarloSimulator::new(config).unwrap().run().unwrap();

        assert_eq!(run.statistic_samples.len(), 50);
        assert!(run.statistic_samples.iter().all(|h| h.is_finite() && *h > 0.0));
    }

    #[test]
    fn test_standardized_effect_matches_effect_report() {
        let dataset = crate::dataset::Dataset::from_counts(5000, 600, 5000, 725).unwrap();
        let summaries = summarize(&dataset).unwrap();
        let test = TestStrategy::ZProportion.test(&summaries, 0.05).unwrap();
        let expected = crate::effect::effect_size(&summaries).standardized;
        assert_eq!(Statistic::StandardizedEffect.extract(&summaries, &test), expected);
    }

    #[test]
    fn test_rejects_invalid_config() {
        assert!(MonteCarloSimulator::new(config(0, 1)).is_err());
        assert!(MonteCarloSimulator::new(config(10, 1).with_alpha(0.0)).is_err());
        let tiny = SimulationConfig::new(SyntheticDesign::continuous(1, (0.0, 1.0), (0.0, 1.0)), 10, 1);
        assert!(MonteCarloSimulator::new(tiny).is_err());
    }

    #[test]
    fn test_cancellation() {
        let flag = Arc::new(AtomicBool::new(true));
        let simulator = MonteCarloSimulator::new(config(10, 1).sequential())
            .unwrap()
            .with_cancellation(flag);
        assert_eq!(
            simulator.run().unwrap_err(),
            ABTestError::Cancelled {
                completed: 0,
                requested: 10,
            }
        );
    }

    #[test]
    fn test_iteration_seeds_distinct() {
        let seeds: std::collections::HashSet<u64> = (0..1000).map(|i| iteration_seed(42, i)).collect();
        assert_eq!(seeds.len(), 1000);
    }
}
