//! Descriptive aggregation of outcome records into per-group summaries

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::{Dataset, Group, OutcomeKind, OutcomeRecord};
use crate::{ABTestError, Result};

/// Descriptive statistics of one arm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub group: Group,
    pub kind: OutcomeKind,
    pub n: usize,
    /// Successes for binary outcomes, sum of values for continuous ones
    pub sum: f64,
    /// Conversion rate or mean
    pub mean: f64,
    /// Unbiased sample variance, zero when n < 2
    pub variance: f64,
}

impl GroupSummary {
    /// Summary of a binary arm from its counts.
    pub fn from_counts(group: Group, n: usize, successes: usize) -> Result<Self> {
        if n == 0 {
            return Err(ABTestError::InsufficientData {
                scope: group.label().to_string(),
                required: 1,
                found: 0,
            });
        }
        if successes > n {
            return Err(ABTestError::configuration(format!(
                "{group}: {successes} successes out of {n} units"
            )));
        }

        let nf = n as f64;
        let rate = successes as f64 / nf;
        let variance = if n < 2 {
            0.0
        } else {
            rate * (1.0 - rate) * nf / (nf - 1.0)
        };

        Ok(Self {
            group,
            kind: OutcomeKind::Binary,
            n,
            sum: successes as f64,
            mean: rate,
            variance,
        })
    }

    pub fn rate(&self) -> f64 {
        self.mean
    }

    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }

    /// Squared standard error of the mean
    pub fn mean_variance(&self) -> f64 {
        self.variance / self.n as f64
    }
}

/// Control and treatment summaries of one dataset or partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummaries {
    pub control: GroupSummary,
    pub treatment: GroupSummary,
}

impl GroupSummaries {
    pub fn get(&self, group: Group) -> &GroupSummary {
        match group {
            Group::Control => &self.control,
            Group::Treatment => &self.treatment,
        }
    }

    pub fn kind(&self) -> OutcomeKind {
        self.control.kind
    }

    pub fn total_n(&self) -> usize {
        self.control.n + self.treatment.n
    }

    /// Treatment mean minus control mean
    pub fn difference(&self) -> f64 {
        self.treatment.mean - self.control.mean
    }
}

/// Summarize one group of a record set.
pub fn summarize_group<'a, I>(records: I, group: Group, kind: OutcomeKind) -> Result<GroupSummary>
where
    I: IntoIterator<Item = &'a OutcomeRecord>,
{
    // Welford's running mean and squared deviations
    let mut n = 0usize;
    let mut sum = 0.0;
    let mut mean = 0.0;
    let mut m2 = 0.0;

    for record in records.into_iter().filter(|r| r.group() == group) {
        let x = record.outcome().value();
        n += 1;
        sum += x;
        let delta = x - mean;
        mean += delta / n as f64;
        m2 += delta * (x - mean);
    }

    if n == 0 {
        return Err(ABTestError::InsufficientData {
            scope: group.label().to_string(),
            required: 1,
            found: 0,
        });
    }

    let mean = sum / n as f64;
    let variance = if n < 2 {
        0.0
    } else {
        (m2 / (n - 1) as f64).max(0.0)
    };

    Ok(GroupSummary {
        group,
        kind,
        n,
        sum,
        mean,
        variance,
    })
}

/// Summarize both groups of a record set.
pub fn summarize_records<'a, I>(records: I, kind: OutcomeKind) -> Result<GroupSummaries>
where
    I: IntoIterator<Item = &'a OutcomeRecord> + Clone,
{
    let control = summarize_group(records.clone(), Group::Control, kind)?;
    let treatment = summarize_group(records, Group::Treatment, kind)?;

    debug!(
        control_n = control.n,
        control_mean = control.mean,
        treatment_n = treatment.n,
        treatment_mean = treatment.mean,
        "Summarized groups"
    );

    Ok(GroupSummaries { control, treatment })
}

/// Summarize both groups of a dataset.
pub fn summarize(dataset: &Dataset) -> Result<GroupSummaries> {
    summarize_records(dataset.records(), dataset.outcome_kind())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_rates() {
        let dataset = Dataset::from_counts(5000, 600, 5000, 725).unwrap();
        let summaries = summarize(&dataset).unwrap();

        assert_eq!(summaries.control.n, 5000);
        assert_eq!(summaries.control.sum, 600.0);
        assert!((summaries.control.rate() - 0.12).abs() < 1e-12);
        assert!((summaries.treatment.rate() - 0.145).abs() < 1e-12);
        assert!((summaries.difference() - 0.025).abs() < 1e-12);
    }

    #[test]
    fn test_binary_variance_matches_counts() {
        let dataset = Dataset::from_counts(40, 10, 30, 12).unwrap();
        let summaries = summarize(&dataset).unwrap();
        let expected = GroupSummary::from_counts(Group::Control, 40, 10).unwrap();

        assert!((summaries.control.variance - expected.variance).abs() < 1e-12);
    }

    #[test]
    fn test_continuous_unbiased_variance() {
        let dataset = Dataset::from_values(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0], &[1.0]).unwrap();
        let summaries = summarize(&dataset).unwrap();

        assert!((summaries.control.mean - 5.0).abs() < 1e-12);
        assert!((summaries.control.variance - 32.0 / 7.0).abs() < 1e-12);
        assert_eq!(summaries.treatment.variance, 0.0);
    }

    #[test]
    fn test_empty_group_is_insufficient() {
        let dataset = Dataset::from_values(&[1.0, 2.0], &[]).unwrap();
        let err = summarize(&dataset).unwrap_err();

        assert_eq!(
            err,
            ABTestError::InsufficientData {
                scope: "treatment".to_string(),
                required: 1,
                found: 0,
            }
        );
    }
}
