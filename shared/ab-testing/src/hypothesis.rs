//! Two-sample hypothesis tests over a pair of group summaries

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};
use tracing::{debug, warn};

use crate::aggregator::{GroupSummaries, GroupSummary};
use crate::config::check_open_unit;
use crate::dataset::OutcomeKind;
use crate::{ABTestError, Result};

/// Test family that produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    ZProportion,
    TMean,
}

/// Outcome of a two-sided test of treatment against control
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_kind: TestKind,
    /// Signed as treatment minus control
    pub statistic: f64,
    pub p_value: f64,
    pub alpha: f64,
    pub reject_null: bool,
    pub standard_error: f64,
    /// Welch-Satterthwaite degrees of freedom for t-tests
    pub degrees_of_freedom: Option<f64>,
    /// Standard error was zero and the result is the conventional null outcome
    pub degenerate: bool,
}

impl TestResult {
    fn new(
        test_kind: TestKind,
        statistic: f64,
        p_value: f64,
        alpha: f64,
        standard_error: f64,
        degrees_of_freedom: Option<f64>,
    ) -> Self {
        let p_value = p_value.clamp(0.0, 1.0);
        Self {
            test_kind,
            statistic,
            p_value,
            alpha,
            reject_null: p_value < alpha,
            standard_error,
            degrees_of_freedom,
            degenerate: false,
        }
    }

    fn degenerate(test_kind: TestKind, alpha: f64) -> Self {
        Self {
            test_kind,
            statistic: 0.0,
            p_value: 1.0,
            alpha,
            reject_null: false,
            standard_error: 0.0,
            degrees_of_freedom: None,
            degenerate: true,
        }
    }
}

/// Common capability of the two-sample tests
pub trait TwoSampleTest {
    fn kind(&self) -> TestKind;

    /// Whether the test applies to this outcome type
    fn supports(&self, outcome: OutcomeKind) -> bool;

    fn test(&self, summaries: &GroupSummaries, alpha: f64) -> Result<TestResult>;
}

/// Pooled two-proportion z-test
#[derive(Debug, Clone, Copy, Default)]
pub struct ZProportionTest;

impl ZProportionTest {
    /// Standard error under the pooled null proportion.
    pub fn pooled_standard_error(&self, summaries: &GroupSummaries) -> Result<f64> {
        let (c, t) = (&summaries.control, &summaries.treatment);
        let (n1, n2) = (c.n as f64, t.n as f64);
        let pooled = (c.sum + t.sum) / (n1 + n2);
        let se = (pooled * (1.0 - pooled) * (1.0 / n1 + 1.0 / n2)).sqrt();

        if se > 0.0 && se.is_finite() {
            Ok(se)
        } else {
            Err(ABTestError::DegenerateVariance {
                scope: format!("pooled proportion {pooled}"),
            })
        }
    }
}

impl TwoSampleTest for ZProportionTest {
    fn kind(&self) -> TestKind {
        TestKind::ZProportion
    }

    fn supports(&self, outcome: OutcomeKind) -> bool {
        outcome == OutcomeKind::Binary
    }

    fn test(&self, summaries: &GroupSummaries, alpha: f64) -> Result<TestResult> {
        check_open_unit("alpha", alpha)?;
        if !self.supports(summaries.kind()) {
            return Err(ABTestError::configuration(
                "two-proportion z-test requires binary outcomes",
            ));
        }

        let se = match self.pooled_standard_error(summaries) {
            Ok(se) => se,
            Err(err @ ABTestError::DegenerateVariance { .. }) => {
                warn!(error = %err, "z-test degenerate, reporting null result");
                return Ok(TestResult::degenerate(TestKind::ZProportion, alpha));
            }
            Err(err) => return Err(err),
        };

        let z = summaries.difference() / se;
        let p_value = 2.0 * normal_sf(z.abs())?;
        debug!(z, p_value, se, "Two-proportion z-test");

        Ok(TestResult::new(TestKind::ZProportion, z, p_value, alpha, se, None))
    }
}

/// Welch's unequal-variance t-test
#[derive(Debug, Clone, Copy, Default)]
pub struct WelchTTest;

impl TwoSampleTest for WelchTTest {
    fn kind(&self) -> TestKind {
        TestKind::TMean
    }

    fn supports(&self, _outcome: OutcomeKind) -> bool {
        true
    }

    fn test(&self, summaries: &GroupSummaries, alpha: f64) -> Result<TestResult> {
        check_open_unit("alpha", alpha)?;
        require_variance_sample(&summaries.control)?;
        require_variance_sample(&summaries.treatment)?;

        let se = (summaries.control.mean_variance() + summaries.treatment.mean_variance()).sqrt();
        if !(se > 0.0 && se.is_finite()) {
            let err = ABTestError::DegenerateVariance {
                scope: "both groups".to_string(),
            };
            warn!(error = %err, "t-test degenerate, reporting null result");
            return Ok(TestResult::degenerate(TestKind::TMean, alpha));
        }

        let t = summaries.difference() / se;
        let df = welch_degrees_of_freedom(&summaries.control, &summaries.treatment);
        let dist = StudentsT::new(0.0, 1.0, df)?;
        let p_value = 2.0 * dist.sf(t.abs());
        debug!(t, df, p_value, "Welch t-test");

        Ok(TestResult::new(TestKind::TMean, t, p_value, alpha, se, Some(df)))
    }
}

/// Strategy selector over the available tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStrategy {
    ZProportion,
    WelchT,
}

impl TestStrategy {
    /// Primary test for an outcome type.
    pub fn primary_for(kind: OutcomeKind) -> Self {
        match kind {
            OutcomeKind::Binary => TestStrategy::ZProportion,
            OutcomeKind::Continuous => TestStrategy::WelchT,
        }
    }

    fn as_test(&self) -> &dyn TwoSampleTest {
        match self {
            TestStrategy::ZProportion => &ZProportionTest,
            TestStrategy::WelchT => &WelchTTest,
        }
    }
}

impl TwoSampleTest for TestStrategy {
    fn kind(&self) -> TestKind {
        self.as_test().kind()
    }

    fn supports(&self, outcome: OutcomeKind) -> bool {
        self.as_test().supports(outcome)
    }

    fn test(&self, summaries: &GroupSummaries, alpha: f64) -> Result<TestResult> {
        self.as_test().test(summaries, alpha)
    }
}

/// Welch-Satterthwaite approximation of the degrees of freedom.
pub fn welch_degrees_of_freedom(control: &GroupSummary, treatment: &GroupSummary) -> f64 {
    let a = control.mean_variance();
    let b = treatment.mean_variance();
    let n1 = control.n as f64;
    let n2 = treatment.n as f64;

    (a + b).powi(2) / (a.powi(2) / (n1 - 1.0) + b.powi(2) / (n2 - 1.0))
}

pub(crate) fn require_variance_sample(summary: &GroupSummary) -> Result<()> {
    if summary.n < 2 {
        return Err(ABTestError::InsufficientData {
            scope: summary.group.label().to_string(),
            required: 2,
            found: summary.n,
        });
    }
    Ok(())
}

fn standard_normal() -> Result<Normal> {
    Ok(Normal::new(0.0, 1.0)?)
}

pub fn normal_cdf(x: f64) -> Result<f64> {
    Ok(standard_normal()?.cdf(x))
}

pub fn normal_sf(x: f64) -> Result<f64> {
    Ok(standard_normal()?.sf(x))
}

pub fn normal_quantile(p: f64) -> Result<f64> {
    Ok(standard_normal()?.inverse_cdf(p))
}

/// Two-sided critical value of a Student-t distribution.
pub fn students_t_critical(confidence_level: f64, df: f64) -> Result<f64> {
    let dist = StudentsT::new(0.0, 1.0, df)?;
    Ok(dist.inverse_cdf(1.0 - (1.0 - confidence_level) / 2.0))
}
