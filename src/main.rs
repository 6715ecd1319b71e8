//! Arith Eval CLI
//!
//! Arithmetic accuracy benchmark for language models

use anyhow::{bail, Context, Result};
use arith_eval::aggregate::AggregateRecord;
use arith_eval::config::ExtraContextConfig;
use arith_eval::{
    ledger, read_trials, remaining_trials, render_aggregate, render_overview, render_summary, reprice,
    sort_for_overview, summarize_ledger, CommandClient, CommandConfig, PriceTable, ReportFormat,
    RunConfig, Runner, Variant,
};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "arith-eval")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the benchmark grid against a model
    Run(RunArgs),

    /// Summarize trial ledgers (or the aggregate ledger)
    Report {
        /// Directory holding trial ledgers
        #[arg(long, default_value = "results")]
        results: PathBuf,

        /// Render records from this aggregate ledger instead
        #[arg(long)]
        aggregate: Option<PathBuf>,

        /// Only show runs of this model
        #[arg(long)]
        model: Option<String>,

        /// Ignore depths below this value
        #[arg(long)]
        min_depth: Option<u32>,

        /// Output format (text, markdown)
        #[arg(long, default_value = "text")]
        format: ReportFormat,

        /// Write the report to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Recompute trial costs from a price table into a new ledger
    Reprice {
        /// Source trial ledger
        #[arg(long)]
        input: PathBuf,

        /// Destination ledger (must not exist)
        #[arg(long)]
        output: PathBuf,

        /// Price table (YAML)
        #[arg(long, default_value = "prices.yaml")]
        prices: PathBuf,
    },

    /// List the benchmark variants
    Variants,
}

#[derive(Args)]
struct RunArgs {
    /// Run configuration file (YAML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model identifier, e.g. openai/gpt-4o
    #[arg(long, env = "MODEL")]
    model: Option<String>,

    /// Trials per variant-depth cell
    #[arg(long)]
    trials: Option<usize>,

    /// Digit depths to test, comma separated
    #[arg(long, value_delimiter = ',')]
    depths: Option<Vec<u32>>,

    /// Directory for trial ledgers
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Aggregate ledger path
    #[arg(long)]
    aggregate: Option<PathBuf>,

    /// Resume an existing trial ledger
    #[arg(long)]
    resume: Option<PathBuf>,

    /// Invocation attempts per trial
    #[arg(long)]
    max_attempts: Option<u32>,

    /// First retry delay in milliseconds (doubles each retry)
    #[arg(long)]
    retry_delay_ms: Option<u64>,

    /// Per-invocation timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Reasoning-effort hint
    #[arg(long)]
    reasoning_effort: Option<String>,

    /// System prompt
    #[arg(long)]
    system_prompt: Option<String>,

    /// Extra-context dialogue file (YAML list of {role, content})
    #[arg(long, requires = "extra_context_size")]
    extra_context: Option<PathBuf>,

    /// Number of extra-context messages to inject
    #[arg(long, requires = "extra_context")]
    extra_context_size: Option<usize>,

    /// Client preset (llm, ollama)
    #[arg(long)]
    client: Option<String>,

    /// Provider parameter override, KEY=VALUE (repeatable)
    #[arg(long = "param", value_parser = parse_key_value)]
    params: Vec<(String, String)>,

    /// Price table (YAML)
    #[arg(long, default_value = "prices.yaml")]
    prices: PathBuf,

    /// Operand seed
    #[arg(long)]
    seed: Option<u64>,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got {s}"))
}

impl RunArgs {
    /// File values first, flags override
    fn into_config(self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => {
                let Some(model) = self.model.clone() else {
                    bail!("--model is required (or set MODEL, or give --config)");
                };
                RunConfig::new(model)
            }
        };

        if let Some(model) = self.model {
            config.model = model;
        }
        if let Some(trials) = self.trials {
            config.trials_per_cell = trials;
        }
        if let Some(depths) = self.depths {
            config.depths = depths;
        }
        if let Some(dir) = self.output_dir {
            config.output_dir = dir;
        }
        if let Some(path) = self.aggregate {
            config.aggregate_path = path;
        }
        if self.resume.is_some() {
            config.resume = self.resume;
        }
        if let Some(n) = self.max_attempts {
            config.max_attempts = n;
        }
        if let Some(ms) = self.retry_delay_ms {
            config.retry_base_delay_ms = ms;
        }
        if let Some(ms) = self.timeout_ms {
            config.timeout_ms = ms;
        }
        if self.reasoning_effort.is_some() {
            config.reasoning_effort = self.reasoning_effort;
        }
        if self.system_prompt.is_some() {
            config.system_prompt = self.system_prompt;
        }
        if let (Some(path), Some(size)) = (self.extra_context, self.extra_context_size) {
            config.extra_context = Some(ExtraContextConfig { path, size });
        }
        if let Some(name) = self.client {
            config.client = CommandConfig::preset(&name)
                .with_context(|| format!("Unknown client preset: {name}"))?;
        }
        config.provider_params.extend(self.params);
        if let Some(seed) = self.seed {
            config.seed = seed;
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => run(args),
        Commands::Report {
            results,
            aggregate,
            model,
            min_depth,
            format,
            output,
        } => {
            let text = match aggregate {
                Some(path) => report_aggregate(&path, model.as_deref(), format)?,
                None => report_ledgers(&results, model.as_deref(), min_depth, format)?,
            };
            match output {
                Some(path) => std::fs::write(&path, text)
                    .with_context(|| format!("Failed to write {}", path.display()))?,
                None => print!("{text}"),
            }
            Ok(())
        }
        Commands::Reprice {
            input,
            output,
            prices,
        } => {
            if input == output {
                bail!("refusing to reprice {} in place", input.display());
            }
            let table = PriceTable::load(&prices)
                .with_context(|| format!("Failed to load prices {}", prices.display()))?;
            let records = read_trials(&input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let repriced = reprice(&records, &table);
            ledger::write_new(&output, &repriced)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            tracing::info!(
                input = %input.display(),
                output = %output.display(),
                records = repriced.len(),
                "Repriced ledger"
            );
            Ok(())
        }
        Commands::Variants => {
            for variant in Variant::ALL {
                println!("{:<10} {}", variant.name(), variant.operation.symbol());
            }
            Ok(())
        }
    }
}

fn run(args: RunArgs) -> Result<()> {
    let prices_path = args.prices.clone();
    let config = args.into_config()?;
    let prices = PriceTable::load(&prices_path)
        .with_context(|| format!("Failed to load prices {}", prices_path.display()))?;

    if let Some(path) = config.resume.as_deref().filter(|p| p.exists()) {
        let remaining = remaining_trials(&config, path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        tracing::info!(ledger = %path.display(), remaining, "Resuming run");
    }

    let client = CommandClient::new(config.client.clone());
    if !client.is_available() {
        tracing::warn!(
            command = %config.client.command,
            "Client command not found on PATH, every trial will fail"
        );
    }

    let mut runner = Runner::new(config, client)?
        .with_prices(prices)
        .with_progress(|p| {
            eprint!(
                "\r[{}/{}] {} depth {} ({}/{}) {}   ",
                p.executed, p.planned, p.variant, p.depth, p.cell_done, p.cell_target, p.classification
            );
        });
    let outcome = runner.run()?;
    eprintln!();

    println!("Ledger: {}", outcome.ledger_path.display());
    println!("Trials executed: {}", outcome.trials_executed);
    match &outcome.aggregate {
        Some(aggregate) => print!("{}", render_aggregate(aggregate, ReportFormat::Text)),
        None => println!("All cells already complete; no aggregate written"),
    }
    Ok(())
}

fn report_ledgers(
    dir: &Path,
    model: Option<&str>,
    min_depth: Option<u32>,
    format: ReportFormat,
) -> Result<String> {
    let pattern = dir.join("*.jsonl");
    let paths = glob::glob(&pattern.to_string_lossy())
        .with_context(|| format!("Invalid results path {}", dir.display()))?;

    let mut summaries = Vec::new();
    for path in paths.filter_map(Result::ok) {
        let records = read_trials(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let label = path
            .file_stem()
            .map_or_else(String::new, |s| s.to_string_lossy().into_owned());
        if let Some(summary) = summarize_ledger(&label, &records, min_depth) {
            if model.map_or(true, |m| summary.model == m) {
                summaries.push(summary);
            }
        }
    }

    match summaries.len() {
        0 => bail!("No trial records found in {}", dir.display()),
        1 => Ok(render_summary(&summaries[0], format)),
        _ => {
            sort_for_overview(&mut summaries);
            Ok(render_overview(&summaries, format))
        }
    }
}

fn report_aggregate(path: &Path, model: Option<&str>, format: ReportFormat) -> Result<String> {
    let records: Vec<AggregateRecord> = ledger::read_records(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let selected: Vec<&AggregateRecord> = records
        .iter()
        .filter(|r| model.map_or(true, |m| r.model == m))
        .collect();
    if selected.is_empty() {
        bail!("No aggregate records found in {}", path.display());
    }
    Ok(selected
        .iter()
        .map(|r| render_aggregate(r, format))
        .collect::<Vec<_>>()
        .join("\n"))
}
