//! Seeded synthetic outcome generation for two arms

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Bernoulli, Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::dataset::{Dataset, DatasetBuilder, Group, Outcome, OutcomeKind, OutcomeRecord};
use crate::{ABTestError, Result};

/// Data-generating process of one arm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum ArmModel {
    Bernoulli { rate: f64 },
    Normal { mean: f64, variance: f64 },
}

impl ArmModel {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            ArmModel::Bernoulli { .. } => OutcomeKind::Binary,
            ArmModel::Normal { .. } => OutcomeKind::Continuous,
        }
    }

    fn validate(&self, group: Group) -> Result<()> {
        match *self {
            ArmModel::Bernoulli { rate } if !(0.0..=1.0).contains(&rate) => Err(
                ABTestError::configuration(format!("{group} rate must lie in [0, 1], got {rate}")),
            ),
            ArmModel::Normal { mean, variance } if !mean.is_finite() || !(variance >= 0.0) || !variance.is_finite() => {
                Err(ABTestError::configuration(format!(
                    "{group} needs a finite mean and non-negative variance"
                )))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmSpec {
    pub n: usize,
    pub model: ArmModel,
}

/// Categorical covariate assigned uniformly at random to generated units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentSpec {
    pub key: String,
    pub levels: Vec<String>,
}

/// Two-arm synthetic experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticDesign {
    pub control: ArmSpec,
    pub treatment: ArmSpec,
    #[serde(default)]
    pub segments: Vec<SegmentSpec>,
}

impl SyntheticDesign {
    pub fn binary(n_per_group: usize, control_rate: f64, treatment_rate: f64) -> Self {
        Self {
            control: ArmSpec {
                n: n_per_group,
                model: ArmModel::Bernoulli { rate: control_rate },
            },
            treatment: ArmSpec {
                n: n_per_group,
                model: ArmModel::Bernoulli { rate: treatment_rate },
            },
            segments: Vec::new(),
        }
    }

    pub fn continuous(n_per_group: usize, control: (f64, f64), treatment: (f64, f64)) -> Self {
        Self {
            control: ArmSpec {
                n: n_per_group,
                model: ArmModel::Normal {
                    mean: control.0,
                    variance: control.1,
                },
            },
            treatment: ArmSpec {
                n: n_per_group,
                model: ArmModel::Normal {
                    mean: treatment.0,
                    variance: treatment.1,
                },
            },
            segments: Vec::new(),
        }
    }

    pub fn with_segment<I, S>(mut self, key: impl Into<String>, levels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.segments.push(SegmentSpec {
            key: key.into(),
            levels: levels.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn kind(&self) -> OutcomeKind {
        self.control.model.kind()
    }

    pub fn arm(&self, group: Group) -> &ArmSpec {
        match group {
            Group::Control => &self.control,
            Group::Treatment => &self.treatment,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.control.model.kind() != self.treatment.model.kind() {
            return Err(ABTestError::configuration(
                "control and treatment must share an outcome type",
            ));
        }
        for group in Group::ALL {
            let arm = self.arm(group);
            if arm.n == 0 {
                return Err(ABTestError::configuration(format!("{group} sample size must be positive")));
            }
            arm.model.validate(group)?;
        }
        if let Some(spec) = self.segments.iter().find(|s| s.levels.is_empty()) {
            return Err(ABTestError::configuration(format!(
                "segment '{}' needs at least one level",
                spec.key
            )));
        }
        Ok(())
    }

    /// Draw one dataset, control units first.
    pub fn generate<R: Rng>(&self, rng: &mut R) -> Result<Dataset> {
        let mut builder = DatasetBuilder::new(self.kind())
            .with_segment_schema(self.segments.iter().map(|s| s.key.clone()));

        for group in Group::ALL {
            let arm = self.arm(group);
            match arm.model {
                ArmModel::Bernoulli { rate } => {
                    let dist = Bernoulli::new(rate).map_err(|e| ABTestError::Distribution {
                        reason: format!("{group}: {e}"),
                    })?;
                    for _ in 0..arm.n {
                        let outcome = Outcome::Binary(dist.sample(rng));
                        builder.push(self.assign_segments(OutcomeRecord::new(group, outcome), rng))?;
                    }
                }
                ArmModel::Normal { mean, variance } => {
                    let dist = Normal::new(mean, variance.sqrt()).map_err(|e| ABTestError::Distribution {
                        reason: format!("{group}: {e}"),
                    })?;
                    for _ in 0..arm.n {
                        let outcome = Outcome::Continuous(dist.sample(rng));
                        builder.push(self.assign_segments(OutcomeRecord::new(group, outcome), rng))?;
                    }
                }
            }
        }

        Ok(builder.build())
    }

    pub fn generate_seeded(&self, seed: u64) -> Result<Dataset> {
        self.validate()?;
        let mut rng = StdRng::seed_from_u64(seed);
        self.generate(&mut rng)
    }

    fn assign_segments<R: Rng>(&self, mut record: OutcomeRecord, rng: &mut R) -> OutcomeRecord {
        for spec in &self.segments {
            let level = &spec.levels[rng.gen_range(0..spec.levels.len())];
            record = record.with_segment(spec.key.clone(), level.clone());
        }
        record
    }
}
