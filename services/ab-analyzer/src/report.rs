//! Rendering of analysis and simulation results

use ab_testing::{
    AnalysisReport, IntervalEstimate, Record, SegmentPartitionResult, SimulationSummary,
    SyntheticDesign, TestResult, ToRecord,
};
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Csv,
}

#[derive(Debug, Serialize)]
pub struct AnalysisOutput {
    pub report: AnalysisReport,
    pub segments: Vec<SegmentPartitionResult>,
    pub marginals: Vec<(String, Vec<SegmentPartitionResult>)>,
}

#[derive(Debug, Serialize)]
pub struct SimulationOutput {
    pub design: SyntheticDesign,
    pub summary: SimulationSummary,
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Output {
    Analysis(AnalysisOutput),
    Simulation(SimulationOutput),
}

impl Output {
    /// One flat record; segment fields are prefixed with their partition key.
    pub fn to_record(&self) -> Record {
        match self {
            Output::Analysis(output) => {
                let mut record = output.report.to_record();
                for segment in &output.segments {
                    record.extend(segment.to_prefixed_record(&format!("segment[{}]", segment.key)));
                }
                for (key, results) in &output.marginals {
                    for segment in results {
                        record.extend(
                            segment.to_prefixed_record(&format!("marginal[{key}][{}]", segment.key)),
                        );
                    }
                }
                record
            }
            Output::Simulation(output) => output.summary.to_record(),
        }
    }
}

pub fn write_output<W: Write>(writer: &mut W, output: &Output, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *writer, output).context("Failed to serialize JSON")?;
            writeln!(writer)?;
        }
        OutputFormat::Csv => {
            let mut csv_writer = csv::Writer::from_writer(&mut *writer);
            csv_writer.write_record(["key", "value"])?;
            for (key, value) in output.to_record() {
                let value = match value {
                    serde_json::Value::String(s) => s,
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                };
                csv_writer.write_record([key, value])?;
            }
            csv_writer.flush()?;
        }
        OutputFormat::Text => match output {
            Output::Analysis(output) => write_analysis_text(writer, output)?,
            Output::Simulation(output) => write_simulation_text(writer, &output.summary)?,
        },
    }
    Ok(())
}

fn format_interval(interval: &IntervalEstimate) -> String {
    format!(
        "{:.4} [{:.4}, {:.4}] ({:.0}% {:?})",
        interval.point,
        interval.lower,
        interval.upper,
        interval.confidence_level * 100.0,
        interval.method
    )
}

fn format_test(test: &TestResult) -> String {
    let df = test
        .degrees_of_freedom
        .map(|df| format!(", df = {df:.1}"))
        .unwrap_or_default();
    let flag = if test.degenerate { " (degenerate)" } else { "" };
    format!(
        "{:?}: statistic = {:.4}, p = {:.6}{df}, reject at {} = {}{flag}",
        test.test_kind, test.statistic, test.p_value, test.alpha, test.reject_null
    )
}

fn write_analysis_text<W: Write>(w: &mut W, output: &AnalysisOutput) -> Result<()> {
    let report = &output.report;
    let s = &report.summaries;

    writeln!(w, "=== A/B Test Analysis ===")?;
    writeln!(w, "report {} | dataset {} | {}", report.report_id, report.dataset_id, report.generated_at.to_rfc3339())?;
    writeln!(w)?;
    writeln!(w, "-- Groups --")?;
    for summary in [&s.control, &s.treatment] {
        writeln!(
            w,
            "{:<10} n = {:<8} mean = {:.4}  sd = {:.4}",
            summary.group.label(),
            summary.n,
            summary.mean,
            summary.std_dev()
        )?;
    }
    writeln!(w, "control interval:    {}", format_interval(&report.control_interval))?;
    writeln!(w, "treatment interval:  {}", format_interval(&report.treatment_interval))?;
    writeln!(w)?;

    writeln!(w, "-- Hypothesis tests --")?;
    writeln!(w, "primary:     {}", format_test(&report.primary_test))?;
    if let Some(robustness) = &report.robustness_test {
        writeln!(w, "robustness:  {}", format_test(robustness))?;
    }
    writeln!(w, "difference:  {}", format_interval(&report.difference_interval))?;
    writeln!(w)?;

    writeln!(w, "-- Effect size & power --")?;
    let effect = &report.effect;
    writeln!(
        w,
        "{:?} = {:.4} ({}), absolute lift = {:.4}, relative lift = {}",
        effect.measure, effect.standardized, effect.magnitude, effect.absolute_lift, effect.relative_lift
    )?;
    let power = &report.power;
    let required = power
        .required_n_per_group
        .map(|n| n.to_string())
        .unwrap_or_else(|| "n/a".to_string());
    writeln!(
        w,
        "achieved power = {:.3} at n = {:.0}/group, required n for {:.0}% power = {required}",
        power.achieved_power,
        power.effective_n_per_group,
        power.target_power * 100.0
    )?;
    writeln!(w)?;

    writeln!(w, "-- Decision --")?;
    let decision = &report.decision;
    writeln!(w, "{}: {}", decision.recommendation, decision.rationale)?;
    let impact = &decision.revenue_impact;
    writeln!(
        w,
        "projected +{:.1} conversions/period, {:.2} value/period, {:.2} annualized",
        impact.additional_conversions_per_period, impact.additional_value_per_period, impact.annualized_value
    )?;

    if !output.segments.is_empty() {
        writeln!(w)?;
        writeln!(w, "-- Segments --")?;
        write_segments_text(w, &output.segments)?;
    }
    for (key, results) in &output.marginals {
        writeln!(w)?;
        writeln!(w, "-- Segments by {key} --")?;
        write_segments_text(w, results)?;
    }
    Ok(())
}

fn write_segments_text<W: Write>(w: &mut W, results: &[SegmentPartitionResult]) -> Result<()> {
    for result in results {
        let flag = if result.low_power { " [low power]" } else { "" };
        match &result.analysis {
            Ok(analysis) => writeln!(
                w,
                "{} (n = {}/{}): lift = {:.4}, p = {:.4}, diff = {}{flag}",
                result.key,
                result.n_control,
                result.n_treatment,
                analysis.effect.absolute_lift,
                analysis.test.p_value,
                format_interval(&analysis.difference)
            )?,
            Err(err) => writeln!(
                w,
                "{} (n = {}/{}): {err}{flag}",
                result.key, result.n_control, result.n_treatment
            )?,
        }
    }
    Ok(())
}

fn write_simulation_text<W: Write>(w: &mut W, summary: &SimulationSummary) -> Result<()> {
    writeln!(w, "=== Monte Carlo Simulation ===")?;
    writeln!(w, "iterations = {}, seed = {}, statistic = {:?}", summary.iterations, summary.seed, summary.statistic)?;
    writeln!(w, "mean = {:.6}, sd = {:.6}", summary.mean, summary.std_dev)?;
    writeln!(w, "interval: {}", format_interval(&summary.interval))?;
    writeln!(
        w,
        "P(statistic > {}) = {:.4}",
        summary.threshold, summary.prob_exceeds_threshold
    )?;
    writeln!(w, "empirical power = {:.4}", summary.empirical_power)?;
    Ok(())
}
