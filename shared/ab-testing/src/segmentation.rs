//! Stratified analysis over segment-key partitions

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, warn};

use crate::aggregator::{summarize_records, GroupSummaries};
use crate::config::AnalysisConfig;
use crate::dataset::{Dataset, Group, OutcomeKind, OutcomeRecord};
use crate::effect::{effect_size, power_report, EffectSizeReport, PowerReport};
use crate::hypothesis::{TestResult, TestStrategy, TwoSampleTest};
use crate::interval::{difference_interval, IntervalEstimate};
use crate::{ABTestError, Result};

/// Tuple of segment values identifying one partition, in the order the keys were requested
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentKey(pub Vec<(String, String)>);

impl SegmentKey {
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(_, v)| v.as_str())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect();
        f.write_str(&parts.join(","))
    }
}

/// Test, interval, effect and power of one comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionAnalysis {
    pub summaries: GroupSummaries,
    pub test: TestResult,
    pub difference: IntervalEstimate,
    pub effect: EffectSizeReport,
    pub power: PowerReport,
}

impl PartitionAnalysis {
    pub fn from_summaries(
        summaries: GroupSummaries,
        strategy: TestStrategy,
        config: &AnalysisConfig,
    ) -> Result<Self> {
        let test = strategy.test(&summaries, config.alpha)?;
        let difference = difference_interval(&summaries, config.confidence_level)?;
        let effect = effect_size(&summaries);
        let power = power_report(&summaries, &effect, config)?;

        Ok(Self {
            summaries,
            test,
            difference,
            effect,
            power,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentPartitionResult {
    pub key: SegmentKey,
    pub n_control: usize,
    pub n_treatment: usize,
    /// A group holds fewer than `min_segment_n` units
    pub low_power: bool,
    /// Data errors stay attached to the partition that raised them
    pub analysis: std::result::Result<PartitionAnalysis, ABTestError>,
}

impl SegmentPartitionResult {
    pub fn total_n(&self) -> usize {
        self.n_control + self.n_treatment
    }
}

/// Reruns the single-comparison pipeline per segment partition
#[derive(Debug, Clone)]
pub struct SegmentationEngine {
    config: AnalysisConfig,
    strategy: Option<TestStrategy>,
}

impl SegmentationEngine {
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            strategy: None,
        })
    }

    /// Override the outcome-type default test.
    pub fn with_strategy(mut self, strategy: TestStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Partition by the cross-product of `keys`, ordered by descending size then key.
    pub fn analyze(&self, dataset: &Dataset, keys: &[&str]) -> Result<Vec<SegmentPartitionResult>> {
        self.validate_keys(dataset, keys)?;
        let strategy = self.strategy_for(dataset.outcome_kind())?;

        let mut partitions: BTreeMap<SegmentKey, Vec<&OutcomeRecord>> = BTreeMap::new();
        for (index, record) in dataset.records().iter().enumerate() {
            let mut key = Vec::with_capacity(keys.len());
            for &name in keys {
                let value = record.segment(name).ok_or_else(|| {
                    ABTestError::configuration(format!("record {index} has no value for segment '{name}'"))
                })?;
                key.push((name.to_string(), value.to_string()));
            }
            partitions.entry(SegmentKey(key)).or_default().push(record);
        }

        info!(
            keys = ?keys,
            partitions = partitions.len(),
            "Running segmented analysis"
        );

        let mut results: Vec<SegmentPartitionResult> = partitions
            .into_iter()
            .map(|(key, records)| self.analyze_partition(key, &records, dataset.outcome_kind(), strategy))
            .collect();

        results.sort_by(|a, b| b.total_n().cmp(&a.total_n()).then_with(|| a.key.cmp(&b.key)));
        Ok(results)
    }

    /// Stratify by each key on its own.
    pub fn analyze_marginals(
        &self,
        dataset: &Dataset,
        keys: &[&str],
    ) -> Result<Vec<(String, Vec<SegmentPartitionResult>)>> {
        self.validate_keys(dataset, keys)?;
        keys.iter()
            .map(|&key| Ok((key.to_string(), self.analyze(dataset, &[key])?)))
            .collect()
    }

    fn analyze_partition(
        &self,
        key: SegmentKey,
        records: &[&OutcomeRecord],
        kind: OutcomeKind,
        strategy: TestStrategy,
    ) -> SegmentPartitionResult {
        let count = |group: Group| records.iter().filter(|r| r.group() == group).count();
        let (n_control, n_treatment) = (count(Group::Control), count(Group::Treatment));

        let low_power = n_control.min(n_treatment) < self.config.min_segment_n;
        if low_power {
            warn!(
                segment = %key,
                n_control,
                n_treatment,
                min_segment_n = self.config.min_segment_n,
                "Segment below minimum group size"
            );
        }

        let scope = format!("segment {key}");
        let analysis = summarize_records(records.iter().copied(), kind)
            .and_then(|summaries| PartitionAnalysis::from_summaries(summaries, strategy, &self.config))
            .map_err(|err| err.within(&scope));

        SegmentPartitionResult {
            key,
            n_control,
            n_treatment,
            low_power,
            analysis,
        }
    }

    fn strategy_for(&self, kind: OutcomeKind) -> Result<TestStrategy> {
        let strategy = self.strategy.unwrap_or_else(|| TestStrategy::primary_for(kind));
        if strategy.supports(kind) {
            Ok(strategy)
        } else {
            Err(ABTestError::configuration(format!(
                "{strategy:?} does not support {kind:?} outcomes"
            )))
        }
    }

    fn validate_keys(&self, dataset: &Dataset, keys: &[&str]) -> Result<()> {
        if keys.is_empty() {
            return Err(ABTestError::configuration("at least one segment key is required"));
        }
        for (i, key) in keys.iter().enumerate() {
            if !dataset.segment_schema().iter().any(|k| k == key) {
                return Err(ABTestError::configuration(format!(
                    "segment key '{key}' is not in the dataset schema {:?}",
                    dataset.segment_schema()
                )));
            }
            if keys[..i].contains(key) {
                return Err(ABTestError::configuration(format!("segment key '{key}' repeated")));
            }
        }
        Ok(())
    }
}
