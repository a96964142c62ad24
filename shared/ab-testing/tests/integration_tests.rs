use ab_testing::{
    summarize, AnalysisConfig, AnalysisReport, BusinessParameters, Dataset, ExperimentAnalyzer, Group,
    MonteCarloSimulator, Outcome, OutcomeKind, OutcomeRecord, Recommendation, RelativeLift,
    SegmentationEngine, SimulationConfig, Statistic, SyntheticDesign, TestKind,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn analyzer() -> ExperimentAnalyzer {
    ExperimentAnalyzer::new(AnalysisConfig::default(), BusinessParameters::default()).unwrap()
}

#[test]
fn test_reference_scenario_rolls_out() {
    let dataset = Dataset::from_counts(5000, 600, 5000, 725).unwrap();
    let report = analyzer().analyze(&dataset).unwrap();

    assert_eq!(report.summaries.control.rate(), 0.12);
    assert_eq!(report.summaries.treatment.rate(), 0.145);
    assert!((report.primary_test.statistic - 3.687).abs() < 0.01);
    assert!(report.primary_test.p_value < 0.001);
    assert!(report.difference_interval.lower > 0.0);
    assert!(report.difference_interval.contains(0.025));

    let h = report.effect.cohens_h().unwrap();
    assert!((h - 0.0738).abs() < 0.001);
    let relative = report.effect.relative_lift.value().unwrap();
    assert!((relative - 0.025 / 0.12).abs() < 1e-9);
    assert!(report.power.achieved_power > 0.95);

    assert_eq!(report.decision.recommendation, Recommendation::RollOut);
    let impact = &report.decision.revenue_impact;
    assert!((impact.additional_conversions_per_period - 2500.0).abs() < 1e-6);
    assert!((impact.annualized_value - 2_250_000.0).abs() < 1e-3);
}

#[test]
fn test_identical_zero_rates_are_degenerate() {
    let dataset = Dataset::from_counts(100, 0, 100, 0).unwrap();
    let report = analyzer().analyze(&dataset).unwrap();

    assert!(report.primary_test.degenerate);
    assert_eq!(report.primary_test.statistic, 0.0);
    assert_eq!(report.primary_test.p_value, 1.0);
    assert!(!report.primary_test.reject_null);
    assert_eq!(report.effect.relative_lift, RelativeLift::Undefined);
    assert_eq!(report.power.required_n_per_group, None);
    assert_eq!(
        report.decision.recommendation,
        Recommendation::InsufficientEvidence
    );
}

#[test]
fn test_zero_control_baseline_leaves_relative_lift_undefined() {
    let dataset = Dataset::from_counts(1000, 0, 1000, 40).unwrap();
    let report = analyzer().analyze(&dataset).unwrap();

    assert!(!report.effect.relative_lift.is_defined());
    assert_eq!(report.effect.relative_lift.to_string(), "undefined");
    assert!((report.effect.absolute_lift - 0.04).abs() < 1e-12);
    assert!(report.primary_test.reject_null);
}

#[test]
fn test_swapped_labels_negate_the_comparison() {
    let dataset = Dataset::from_counts(5000, 600, 5000, 725).unwrap();
    let forward = analyzer().analyze(&dataset).unwrap();
    let backward = analyzer().analyze(&dataset.with_swapped_groups()).unwrap();

    assert!((forward.primary_test.statistic + backward.primary_test.statistic).abs() < 1e-12);
    assert!((forward.primary_test.p_value - backward.primary_test.p_value).abs() < 1e-12);
    assert!((forward.effect.standardized + backward.effect.standardized).abs() < 1e-12);
    assert_eq!(backward.decision.recommendation, Recommendation::Hold);
}

#[test]
fn test_welch_test_on_continuous_outcomes() {
    let dataset =
        Dataset::from_values(&[1.0, 1.1, 0.9, 1.2, 0.8], &[5.0, 3.0, 7.0, 4.0, 6.0]).unwrap();
    let report = analyzer().analyze(&dataset).unwrap();

    assert_eq!(report.primary_test.test_kind, TestKind::TMean);
    let df = report.primary_test.degrees_of_freedom.unwrap();
    assert!((df - 4.08).abs() < 0.05);
    assert!(report.primary_test.reject_null);
    assert!(report.effect.standardized > 0.5);
}

/// Share of seeded synthetic experiments whose report satisfies `covers`.
fn coverage(
    design: &SyntheticDesign,
    seed: u64,
    trials: usize,
    covers: impl Fn(&AnalysisReport) -> bool,
) -> f64 {
    let mut rng = StdRng::seed_from_u64(seed);
    let covered = (0..trials)
        .filter(|_| {
            let dataset = design.generate(&mut rng).unwrap();
            covers(&analyzer().analyze(&dataset).unwrap())
        })
        .count();
    covered as f64 / trials as f64
}

#[test]
fn test_difference_interval_coverage_is_near_nominal() {
    let design = SyntheticDesign::binary(400, 0.3, 0.35);
    let rate = coverage(&design, 2024, 1000, |report| report.difference_interval.contains(0.05));
    assert!((0.92..=0.98).contains(&rate), "coverage {rate}");
}

#[test]
fn test_group_rate_intervals_cover_true_rates() {
    let design = SyntheticDesign::binary(1000, 0.3, 0.35);
    let control = coverage(&design, 77, 1000, |report| report.control_interval.contains(0.3));
    let treatment = coverage(&design, 78, 1000, |report| report.treatment_interval.contains(0.35));

    assert!((0.92..=0.98).contains(&control), "control coverage {control}");
    assert!((0.92..=0.98).contains(&treatment), "treatment coverage {treatment}");
}

#[test]
fn test_group_mean_intervals_cover_true_means() {
    let design = SyntheticDesign::continuous(30, (10.0, 4.0), (12.0, 9.0));
    let control = coverage(&design, 5, 1000, |report| report.control_interval.contains(10.0));
    let treatment = coverage(&design, 6, 1000, |report| report.treatment_interval.contains(12.0));

    assert!((0.92..=0.98).contains(&control), "control coverage {control}");
    assert!((0.92..=0.98).contains(&treatment), "treatment coverage {treatment}");
}

#[test]
fn test_segment_results_reassemble_the_overall_summary() {
    let dataset = SyntheticDesign::binary(2000, 0.10, 0.12)
        .with_segment("device", ["mobile", "desktop", "tablet"])
        .with_segment("region", ["eu", "us"])
        .generate_seeded(7)
        .unwrap();
    let overall = summarize(&dataset).unwrap();

    let engine = SegmentationEngine::new(AnalysisConfig::default()).unwrap();
    for keys in [vec!["device"], vec!["device", "region"]] {
        let results = engine.analyze(&dataset, &keys).unwrap();
        let analyses: Vec<_> = results
            .iter()
            .map(|r| r.analysis.as_ref().unwrap())
            .collect();

        let control_n: usize = analyses.iter().map(|a| a.summaries.control.n).sum();
        let control_sum: f64 = analyses.iter().map(|a| a.summaries.control.sum).sum();
        let weighted_rate: f64 = analyses
            .iter()
            .map(|a| a.summaries.treatment.rate() * a.summaries.treatment.n as f64)
            .sum::<f64>()
            / overall.treatment.n as f64;

        assert_eq!(control_n, overall.control.n);
        assert!((control_sum - overall.control.sum).abs() < 1e-9);
        assert!((weighted_rate - overall.treatment.rate()).abs() < 1e-12);

        let sizes: Vec<usize> = results.iter().map(|r| r.total_n()).collect();
        assert!(sizes.windows(2).all(|w| w[0] >= w[1]));
    }
}

#[test]
fn test_sparse_segment_is_flagged_without_failing_the_rest() {
    let mut builder = Dataset::builder(OutcomeKind::Continuous);
    for i in 0..60 {
        let x = i as f64;
        builder
            .push(OutcomeRecord::new(Group::Control, Outcome::Continuous(x)).with_segment("plan", "free"))
            .unwrap();
        builder
            .push(OutcomeRecord::new(Group::Treatment, Outcome::Continuous(x + 5.0)).with_segment("plan", "free"))
            .unwrap();
    }
    for x in [1.0, 2.0, 3.0] {
        builder
            .push(OutcomeRecord::new(Group::Control, Outcome::Continuous(x)).with_segment("plan", "pro"))
            .unwrap();
        builder
            .push(OutcomeRecord::new(Group::Treatment, Outcome::Continuous(x * 2.0)).with_segment("plan", "pro"))
            .unwrap();
    }
    let dataset = builder.build();

    let results = analyzer().segment(&dataset, &["plan"]).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].key.get("plan"), Some("free"));
    assert!(!results[0].low_power);
    assert!(results[0].analysis.is_ok());
    assert!(results[1].low_power);
    assert!(results[1].analysis.is_ok());
}

#[test]
fn test_unknown_segment_key_is_a_configuration_error() {
    let dataset = Dataset::from_counts(50, 5, 50, 6).unwrap();
    let engine = SegmentationEngine::new(AnalysisConfig::default()).unwrap();
    assert!(engine.analyze(&dataset, &["country"]).is_err());
}

#[test]
fn test_simulation_is_reproducible_across_execution_modes() {
    let design = SyntheticDesign::binary(1000, 0.12, 0.145);
    let config = SimulationConfig::new(design, 300, 42).with_statistic(Statistic::AbsoluteLift);

    let (parallel, summary) = MonteCarloSimulator::new(config.clone())
        .unwrap()
        .run_and_summarize()
        .unwrap();
    let (sequential, again) = MonteCarloSimulator::new(config.sequential())
        .unwrap()
        .run_and_summarize()
        .unwrap();

    assert_eq!(parallel.statistic_samples, sequential.statistic_samples);
    assert_eq!(summary, again);
    assert!(summary.interval.lower <= summary.interval.point);
    assert!(summary.interval.point <= summary.interval.upper);
}

#[test]
fn test_simulated_power_tracks_analytic_power() {
    let design = SyntheticDesign::binary(2000, 0.12, 0.145);
    let config = SimulationConfig::new(design, 500, 11).with_statistic(Statistic::PValue);
    let (_, summary) = MonteCarloSimulator::new(config)
        .unwrap()
        .run_and_summarize()
        .unwrap();

    let h = ab_testing::effect::cohens_h(0.12, 0.145);
    let analytic = ab_testing::achieved_power(h, 2000.0, 0.05).unwrap();
    assert!((summary.empirical_power - analytic).abs() < 0.08);
}
