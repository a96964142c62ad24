use ab_testing::{
    ExperimentAnalyzer, MonteCarloSimulator, SegmentationEngine, SimulationConfig, Statistic,
    SyntheticDesign,
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod loader;
mod report;

use config::{AppConfig, LoggingConfig};
use report::{AnalysisOutput, Output, OutputFormat, SimulationOutput};

#[derive(Parser, Debug)]
#[command(name = "ab-analyzer")]
#[command(author, version, about = "Statistical analysis of two-arm A/B experiments", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (toml, yaml or json)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short = 'f', long, global = true, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Write the report to a file instead of stdout
    #[arg(short, long, global = true, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Significance level, overrides the configuration
    #[arg(long, global = true)]
    alpha: Option<f64>,

    /// Confidence level, overrides the configuration
    #[arg(long, global = true)]
    confidence: Option<f64>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze a CSV file of per-unit outcomes
    Analyze {
        #[arg(short, long, value_name = "CSV")]
        input: PathBuf,

        /// Segment keys to stratify by (cross-product)
        #[arg(long, value_delimiter = ',')]
        segments: Vec<String>,

        /// Also stratify by each segment key on its own
        #[arg(long)]
        marginals: bool,
    },

    /// Monte Carlo simulation of a synthetic experiment
    Simulate {
        #[arg(long)]
        iterations: usize,

        #[arg(long)]
        seed: u64,

        #[command(flatten)]
        design: DesignArgs,

        #[arg(long, value_enum, default_value = "absolute-lift")]
        statistic: StatisticArg,

        #[arg(long, default_value = "0")]
        threshold: f64,

        /// Run iterations on one thread
        #[arg(long)]
        sequential: bool,
    },

    /// Analyze a seeded synthetic conversion experiment
    Demo {
        #[arg(long, default_value = "42")]
        seed: u64,

        #[arg(long, default_value = "5000")]
        n: usize,

        #[arg(long, default_value = "0.12")]
        control_rate: f64,

        #[arg(long, default_value = "0.145")]
        treatment_rate: f64,
    },
}

/// Synthetic arms: Bernoulli rates, or Normal arms once `--control-mean` is given
#[derive(Args, Debug)]
struct DesignArgs {
    /// Units per group
    #[arg(long, default_value = "5000")]
    n: usize,

    #[arg(long, default_value = "0.12")]
    control_rate: f64,

    #[arg(long, default_value = "0.145")]
    treatment_rate: f64,

    #[arg(long, requires = "treatment_mean", conflicts_with_all = ["control_rate", "treatment_rate"])]
    control_mean: Option<f64>,

    #[arg(long, requires = "control_mean")]
    treatment_mean: Option<f64>,

    #[arg(long, default_value = "1")]
    control_variance: f64,

    #[arg(long, default_value = "1")]
    treatment_variance: f64,
}

impl DesignArgs {
    fn to_design(&self) -> SyntheticDesign {
        match (self.control_mean, self.treatment_mean) {
            (Some(control_mean), Some(treatment_mean)) => SyntheticDesign::continuous(
                self.n,
                (control_mean, self.control_variance),
                (treatment_mean, self.treatment_variance),
            ),
            _ => SyntheticDesign::binary(self.n, self.control_rate, self.treatment_rate),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StatisticArg {
    AbsoluteLift,
    TestStatistic,
    PValue,
    StandardizedEffect,
}

impl From<StatisticArg> for Statistic {
    fn from(arg: StatisticArg) -> Self {
        match arg {
            StatisticArg::AbsoluteLift => Statistic::AbsoluteLift,
            StatisticArg::TestStatistic => Statistic::TestStatistic,
            StatisticArg::PValue => Statistic::PValue,
            StatisticArg::StandardizedEffect => Statistic::StandardizedEffect,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut app_config = AppConfig::load(cli.config.as_deref())?;
    if let Some(alpha) = cli.alpha {
        app_config.analysis.alpha = alpha;
    }
    if let Some(confidence) = cli.confidence {
        app_config.analysis.confidence_level = confidence;
    }
    if cli.log_json {
        app_config.logging.json = true;
    }
    app_config.validate()?;

    init_tracing(&app_config.logging)?;
    info!(command = ?cli.command, format = ?cli.format, "Starting ab-analyzer");

    let output = match cli.command {
        Commands::Analyze {
            input,
            segments,
            marginals,
        } => run_analysis(&app_config, &input, &segments, marginals)?,
        Commands::Simulate {
            iterations,
            seed,
            design,
            statistic,
            threshold,
            sequential,
        } => {
            let design = design.to_design();
            let mut config = SimulationConfig::new(design.clone(), iterations, seed)
                .with_statistic(statistic.into())
                .with_alpha(app_config.analysis.alpha)
                .with_confidence_level(app_config.analysis.confidence_level)
                .with_threshold(threshold);
            if sequential {
                config = config.sequential();
            }
            let (_, summary) = MonteCarloSimulator::new(config)?.run_and_summarize()?;
            Output::Simulation(SimulationOutput { design, summary })
        }
        Commands::Demo {
            seed,
            n,
            control_rate,
            treatment_rate,
        } => run_demo(&app_config, seed, n, control_rate, treatment_rate)?,
    };

    let mut writer: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => Box::new(io::stdout().lock()),
    };
    report::write_output(&mut writer, &output, cli.format)?;
    writer.flush()?;

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("Invalid log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn run_analysis(
    app_config: &AppConfig,
    input: &Path,
    segments: &[String],
    marginals: bool,
) -> Result<Output> {
    let dataset = loader::load_dataset(input)?;
    let analyzer = ExperimentAnalyzer::new(app_config.analysis.clone(), app_config.business.clone())?;
    let report = analyzer.analyze(&dataset).context("Analysis failed")?;

    let keys: Vec<&str> = segments.iter().map(String::as_str).collect();
    let (segments, marginals) = if keys.is_empty() {
        (Vec::new(), Vec::new())
    } else {
        let engine = SegmentationEngine::new(app_config.analysis.clone())?;
        let cross = engine.analyze(&dataset, &keys).context("Segmentation failed")?;
        let marginal = if marginals && keys.len() > 1 {
            engine.analyze_marginals(&dataset, &keys)?
        } else {
            Vec::new()
        };
        (cross, marginal)
    };

    Ok(Output::Analysis(AnalysisOutput {
        report,
        segments,
        marginals,
    }))
}

fn run_demo(
    app_config: &AppConfig,
    seed: u64,
    n: usize,
    control_rate: f64,
    treatment_rate: f64,
) -> Result<Output> {
    let design = SyntheticDesign::binary(n, control_rate, treatment_rate)
        .with_segment("device", ["desktop", "mobile", "tablet"]);
    let dataset = design.generate_seeded(seed)?;
    info!(seed, n, control_rate, treatment_rate, "Generated demo dataset");

    let analyzer = ExperimentAnalyzer::new(app_config.analysis.clone(), app_config.business.clone())?;
    let report = analyzer.analyze(&dataset)?;
    let segments = analyzer.segment(&dataset, &["device"])?;

    Ok(Output::Analysis(AnalysisOutput {
        report,
        segments,
        marginals: Vec::new(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ab_testing::{ArmModel, OutcomeKind};

    fn simulate_design(args: &[&str]) -> SyntheticDesign {
        let base = ["ab-analyzer", "simulate", "--iterations", "10", "--seed", "1"];
        let cli = Cli::try_parse_from(base.iter().chain(args)).unwrap();
        match cli.command {
            Commands::Simulate { design, .. } => design.to_design(),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_simulate_defaults_to_binary_design() {
        let design = simulate_design(&[]);
        assert_eq!(design.kind(), OutcomeKind::Binary);
        assert_eq!(design.control.n, 5000);
        assert_eq!(design.treatment.model, ArmModel::Bernoulli { rate: 0.145 });
    }

    #[test]
    fn test_simulate_continuous_design() {
        let design = simulate_design(&[
            "--n",
            "200",
            "--control-mean",
            "10",
            "--treatment-mean",
            "10.5",
            "--treatment-variance",
            "4",
        ]);
        assert_eq!(design.kind(), OutcomeKind::Continuous);
        assert_eq!(design.control.n, 200);
        assert_eq!(
            design.control.model,
            ArmModel::Normal {
                mean: 10.0,
                variance: 1.0
            }
        );
        assert_eq!(
            design.treatment.model,
            ArmModel::Normal {
                mean: 10.5,
                variance: 4.0
            }
        );
    }

    #[test]
    fn test_simulate_rejects_half_specified_continuous_design() {
        let base = ["ab-analyzer", "simulate", "--iterations", "10", "--seed", "1"];
        let args = base.iter().chain(&["--control-mean", "10"]);
        assert!(Cli::try_parse_from(args).is_err());

        let mixed = base.iter().chain(&["--control-mean", "1", "--treatment-mean", "2", "--control-rate", "0.1"]);
        assert!(Cli::try_parse_from(mixed).is_err());
    }
}
