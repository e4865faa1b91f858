use std::io::Read;

use anyhow::{bail, Context};
use clap::Parser;
use pronounce_grade::{
    AuxiliaryScores, BaselinePolicy, ComparisonInput, Config, EvaluationResult, Evaluator,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "pronounce-grade",
    about = "Grade a recognized utterance against its reference phrase",
    version
)]
struct Cli {
    /// Phrase the learner was asked to say
    reference: Option<String>,

    /// Text the speech recognizer heard
    hypothesis: Option<String>,

    /// Externally assessed fluency (0-100)
    #[arg(long)]
    fluency: Option<f64>,

    /// Externally assessed completeness (0-100)
    #[arg(long)]
    completeness: Option<f64>,

    /// JSON file holding one comparison input or an array of them ("-" for stdin)
    #[arg(long, short)]
    input: Option<String>,

    /// Longest accepted text in characters [env: PRONOUNCE_MAX_TEXT_CHARS]
    #[arg(long)]
    max_text_chars: Option<usize>,

    /// Baseline confidence policy: midpoint or sampled [env: PRONOUNCE_BASELINE]
    #[arg(long)]
    baseline: Option<BaselinePolicy>,

    /// Fill missing sub-scores with simulated placeholder values [env: PRONOUNCE_SIMULATE]
    #[arg(long)]
    simulate: bool,

    /// Clamp out-of-range intermediate values instead of failing [env: PRONOUNCE_STRICT=false]
    #[arg(long)]
    lenient: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Default log level when RUST_LOG is unset
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn init_tracing(json: bool, level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init()
            .ok();
    }
}

fn read_inputs(path: &str) -> anyhow::Result<Vec<ComparisonInput>> {
    let raw = if path == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?
    };
    pronounce_grade::parse_inputs(&raw).with_context(|| format!("failed to parse {path}"))
}

fn collect_inputs(cli: &Cli) -> anyhow::Result<Vec<ComparisonInput>> {
    match (&cli.input, &cli.reference, &cli.hypothesis) {
        (Some(path), None, None) => read_inputs(path),
        (None, Some(reference), Some(hypothesis)) => {
            let mut input = ComparisonInput::new(reference.as_str(), hypothesis.as_str());
            if cli.fluency.is_some() || cli.completeness.is_some() {
                input = input.with_auxiliary(AuxiliaryScores {
                    fluency: cli.fluency,
                    completeness: cli.completeness,
                });
            }
            Ok(vec![input])
        }
        (None, None, None) => read_inputs("-"),
        (None, Some(_), None) => bail!("a hypothesis is required after the reference"),
        _ => bail!("pass either REFERENCE HYPOTHESIS or --input, not both"),
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    // Environment first, explicit flags on top.
    let mut config = Config::from_env()?;
    if let Some(max_text_chars) = cli.max_text_chars {
        config.max_text_chars = max_text_chars;
    }
    if let Some(baseline) = cli.baseline {
        config.baseline = baseline;
    }
    if cli.simulate {
        config.simulate_missing = true;
    }
    if cli.lenient {
        config.strict_invariants = false;
    }
    let evaluator = Evaluator::new(config)?;
    tracing::debug!(config = ?evaluator.config(), "evaluator ready");

    let inputs = collect_inputs(&cli)?;
    let results: Vec<EvaluationResult> = inputs
        .iter()
        .map(|input| evaluator.evaluate(input))
        .collect::<Result<_, _>>()?;

    for result in &results {
        println!("{}", serde_json::to_string_pretty(result)?);
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_json, &cli.log_level);

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
