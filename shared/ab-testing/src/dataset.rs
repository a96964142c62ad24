//! Per-unit outcome records and the immutable dataset that owns them

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::{ABTestError, Result};

/// Experiment arm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Group {
    Control,
    Treatment,
}

impl Group {
    pub const ALL: [Group; 2] = [Group::Control, Group::Treatment];

    pub fn label(&self) -> &'static str {
        match self {
            Group::Control => "control",
            Group::Treatment => "treatment",
        }
    }

    pub fn swapped(&self) -> Group {
        match self {
            Group::Control => Group::Treatment,
            Group::Treatment => Group::Control,
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Group {
    type Err = ABTestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "control" | "a" => Ok(Group::Control),
            "treatment" | "b" => Ok(Group::Treatment),
            other => Err(ABTestError::configuration(format!(
                "unknown group label '{other}', expected control/treatment"
            ))),
        }
    }
}

/// Observed outcome of one unit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outcome {
    Binary(bool),
    Continuous(f64),
}

impl Outcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Binary(_) => OutcomeKind::Binary,
            Outcome::Continuous(_) => OutcomeKind::Continuous,
        }
    }

    pub fn value(&self) -> f64 {
        match *self {
            Outcome::Binary(converted) => {
                if converted {
                    1.0
                } else {
                    0.0
                }
            }
            Outcome::Continuous(value) => value,
        }
    }
}

/// Outcome type of a whole dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Binary,
    Continuous,
}

/// One experimental unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    group: Group,
    outcome: Outcome,
    segments: BTreeMap<String, String>,
}

impl OutcomeRecord {
    pub fn new(group: Group, outcome: Outcome) -> Self {
        Self {
            group,
            outcome,
            segments: BTreeMap::new(),
        }
    }

    pub fn with_segment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.segments.insert(key.into(), value.into());
        self
    }

    pub fn group(&self) -> Group {
        self.group
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn segments(&self) -> &BTreeMap<String, String> {
        &self.segments
    }

    pub fn segment(&self, key: &str) -> Option<&str> {
        self.segments.get(key).map(String::as_str)
    }
}

/// Immutable collection of outcome records sharing one outcome kind and segment schema
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawDataset")]
pub struct Dataset {
    id: uuid::Uuid,
    outcome_kind: OutcomeKind,
    segment_schema: Vec<String>,
    records: Vec<OutcomeRecord>,
}

impl Dataset {
    pub fn builder(outcome_kind: OutcomeKind) -> DatasetBuilder {
        DatasetBuilder::new(outcome_kind)
    }

    /// Build a binary dataset from success counts per arm.
    pub fn from_counts(
        control_n: usize,
        control_successes: usize,
        treatment_n: usize,
        treatment_successes: usize,
    ) -> Result<Self> {
        if control_successes > control_n || treatment_successes > treatment_n {
            return Err(ABTestError::configuration(
                "successes cannot exceed the number of units",
            ));
        }

        let mut builder = DatasetBuilder::new(OutcomeKind::Binary);
        for (group, n, successes) in [
            (Group::Control, control_n, control_successes),
            (Group::Treatment, treatment_n, treatment_successes),
        ] {
            for i in 0..n {
                builder.push(OutcomeRecord::new(group, Outcome::Binary(i < successes)))?;
            }
        }
        Ok(builder.build())
    }

    /// Build a continuous dataset from raw values per arm.
    pub fn from_values(control: &[f64], treatment: &[f64]) -> Result<Self> {
        let mut builder = DatasetBuilder::new(OutcomeKind::Continuous);
        for (group, values) in [(Group::Control, control), (Group::Treatment, treatment)] {
            for &value in values {
                builder.push(OutcomeRecord::new(group, Outcome::Continuous(value)))?;
            }
        }
        Ok(builder.build())
    }

    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    pub fn outcome_kind(&self) -> OutcomeKind {
        self.outcome_kind
    }

    pub fn segment_schema(&self) -> &[String] {
        &self.segment_schema
    }

    pub fn records(&self) -> &[OutcomeRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Copy of this dataset with control and treatment labels exchanged.
    pub fn with_swapped_groups(&self) -> Dataset {
        Dataset {
            id: uuid::Uuid::new_v4(),
            outcome_kind: self.outcome_kind,
            segment_schema: self.segment_schema.clone(),
            records: self
                .records
                .iter()
                .map(|r| OutcomeRecord {
                    group: r.group.swapped(),
                    outcome: r.outcome,
                    segments: r.segments.clone(),
                })
                .collect(),
        }
    }
}

/// Serialized form, replayed through [`DatasetBuilder`] on the way in
#[derive(Deserialize)]
struct RawDataset {
    id: uuid::Uuid,
    outcome_kind: OutcomeKind,
    segment_schema: Option<Vec<String>>,
    records: Vec<OutcomeRecord>,
}

impl TryFrom<RawDataset> for Dataset {
    type Error = ABTestError;

    fn try_from(raw: RawDataset) -> Result<Self> {
        let mut builder = DatasetBuilder::new(raw.outcome_kind);
        if let Some(schema) = raw.segment_schema {
            builder = builder.with_segment_schema(schema);
        }
        for record in raw.records {
            builder.push(record)?;
        }
        Ok(Dataset {
            id: raw.id,
            ..builder.build()
        })
    }
}

/// Validating builder; the segment schema is fixed by the first record unless declared up front.
#[derive(Debug)]
pub struct DatasetBuilder {
    outcome_kind: OutcomeKind,
    segment_schema: Option<Vec<String>>,
    records: Vec<OutcomeRecord>,
}

impl DatasetBuilder {
    pub fn new(outcome_kind: OutcomeKind) -> Self {
        Self {
            outcome_kind,
            segment_schema: None,
            records: Vec::new(),
        }
    }

    pub fn with_segment_schema<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        keys.sort();
        keys.dedup();
        self.segment_schema = Some(keys);
        self
    }

    pub fn push(&mut self, record: OutcomeRecord) -> Result<()> {
        if record.outcome.kind() != self.outcome_kind {
            return Err(ABTestError::configuration(format!(
                "record {} has a {:?} outcome in a {:?} dataset",
                self.records.len(),
                record.outcome.kind(),
                self.outcome_kind
            )));
        }
        if let Outcome::Continuous(value) = record.outcome {
            if !value.is_finite() {
                return Err(ABTestError::configuration(format!(
                    "record {} has a non-finite outcome",
                    self.records.len()
                )));
            }
        }

        let keys: Vec<&String> = record.segments.keys().collect();
        match &self.segment_schema {
            Some(schema) => {
                if keys.len() != schema.len() || keys.iter().zip(schema).any(|(a, b)| *a != b) {
                    return Err(ABTestError::configuration(format!(
                        "record {} has segment keys {:?}, dataset schema is {:?}",
                        self.records.len(),
                        keys,
                        schema
                    )));
                }
            }
            None => {
                self.segment_schema = Some(keys.into_iter().cloned().collect());
            }
        }

        self.records.push(record);
        Ok(())
    }

    pub fn build(self) -> Dataset {
        Dataset {
            id: uuid::Uuid::new_v4(),
            outcome_kind: self.outcome_kind,
            segment_schema: self.segment_schema.unwrap_or_default(),
            records: self.records,
        }
    }
}
