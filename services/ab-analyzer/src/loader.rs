//! CSV ingestion of per-unit outcome rows
//!
//! Expects a `group` and an `outcome` column; every other column becomes a
//! segment key. The outcome type is inferred from the values: only
//! `0`/`1`/`true`/`false` means binary, anything else must parse as a number.

use ab_testing::{Dataset, Group, Outcome, OutcomeKind, OutcomeRecord};
use anyhow::{anyhow, bail, Context, Result};
use std::path::Path;
use tracing::info;

const GROUP_COLUMN: &str = "group";
const OUTCOME_COLUMN: &str = "outcome";

struct Row {
    line: u64,
    group: Group,
    outcome: String,
    segments: Vec<(String, String)>,
}

pub fn load_dataset<P: AsRef<Path>>(path: P) -> Result<Dataset> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open CSV {}", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read headers of {}", path.display()))?
        .clone();

    let find = |name: &str| {
        headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                anyhow!(
                    "missing '{name}' column, available columns: {:?}",
                    headers.iter().collect::<Vec<_>>()
                )
            })
    };
    let group_idx = find(GROUP_COLUMN)?;
    let outcome_idx = find(OUTCOME_COLUMN)?;
    let segment_columns: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != group_idx && *i != outcome_idx)
        .map(|(i, h)| (i, h.to_string()))
        .collect();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.with_context(|| format!("Malformed CSV in {}", path.display()))?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        let field = |idx: usize| record.get(idx).unwrap_or_default();

        let group = field(group_idx)
            .parse::<Group>()
            .with_context(|| format!("line {line}: invalid group"))?;
        let segments = segment_columns
            .iter()
            .map(|(idx, key)| (key.clone(), field(*idx).to_string()))
            .collect();

        rows.push(Row {
            line,
            group,
            outcome: field(outcome_idx).to_string(),
            segments,
        });
    }

    if rows.is_empty() {
        bail!("{} contains no data rows", path.display());
    }

    let kind = infer_kind(rows.iter().map(|r| r.outcome.as_str()));
    let mut builder = Dataset::builder(kind).with_segment_schema(segment_columns.iter().map(|(_, k)| k.clone()));
    for row in rows {
        let outcome = parse_outcome(&row.outcome, kind)
            .with_context(|| format!("line {}: invalid outcome '{}'", row.line, row.outcome))?;
        let record = row
            .segments
            .into_iter()
            .fold(OutcomeRecord::new(row.group, outcome), |record, (k, v)| {
                record.with_segment(k, v)
            });
        builder
            .push(record)
            .with_context(|| format!("line {}", row.line))?;
    }

    let dataset = builder.build();
    info!(
        path = %path.display(),
        records = dataset.len(),
        kind = ?kind,
        segments = ?dataset.segment_schema(),
        "Loaded dataset"
    );
    Ok(dataset)
}

fn binary_value(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

fn infer_kind<'a>(mut values: impl Iterator<Item = &'a str>) -> OutcomeKind {
    if values.all(|v| binary_value(v).is_some()) {
        OutcomeKind::Binary
    } else {
        OutcomeKind::Continuous
    }
}

fn parse_outcome(raw: &str, kind: OutcomeKind) -> Result<Outcome> {
    match kind {
        OutcomeKind::Binary => binary_value(raw)
            .map(Outcome::Binary)
            .ok_or_else(|| anyhow!("expected 0/1/true/false")),
        OutcomeKind::Continuous => {
            let value: f64 = raw.parse().context("expected a number")?;
            Ok(Outcome::Continuous(value))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn csv_file(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file");
        for line in lines {
            writeln!(file, "{line}").expect("write row");
        }
        file
    }

    #[test]
    fn test_binary_dataset_with_segments() {
        let file = csv_file(&[
            "user_id,group,outcome,device",
            "1,control,0,mobile",
            "2,treatment,1,desktop",
            "3,A,true,mobile",
            "4,B,FALSE,desktop",
        ]);

        let dataset = load_dataset(file.path()).expect("load CSV");
        assert_eq!(dataset.len(), 4);
        assert_eq!(dataset.outcome_kind(), OutcomeKind::Binary);
        assert_eq!(dataset.segment_schema(), ["device".to_string(), "user_id".to_string()]);

        let third = &dataset.records()[2];
        assert_eq!(third.group(), Group::Control);
        assert_eq!(third.outcome(), Outcome::Binary(true));
        assert_eq!(third.segment("device"), Some("mobile"));
    }

    #[test]
    fn test_numeric_outcomes_infer_continuous() {
        let file = csv_file(&["Group,Outcome", "control,12.5", "treatment,0", "treatment,1"]);
        let dataset = load_dataset(file.path()).expect("load CSV");

        assert_eq!(dataset.outcome_kind(), OutcomeKind::Continuous);
        assert_eq!(dataset.records()[0].outcome(), Outcome::Continuous(12.5));
        assert!(dataset.segment_schema().is_empty());
    }

    #[test]
    fn test_missing_column() {
        let file = csv_file(&["group,value", "control,1"]);
        let err = load_dataset(file.path()).unwrap_err();
        assert!(err.to_string().contains("outcome"));
    }

    #[test]
    fn test_bad_group_reports_line() {
        let file = csv_file(&["group,outcome", "control,1", "holdout,0"]);
        let err = load_dataset(file.path()).unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_non_numeric_outcome() {
        let file = csv_file(&["group,outcome", "control,1.5", "treatment,abc"]);
        assert!(load_dataset(file.path()).is_err());
    }

    #[test]
    fn test_empty_file() {
        let file = csv_file(&["group,outcome"]);
        assert!(load_dataset(file.path()).is_err());
    }
}
