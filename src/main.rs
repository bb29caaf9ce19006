use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod benford;
mod classify;
mod config;
mod consolidate;
mod error;
mod features;
mod generation;
mod journal;
mod models;
mod output;
mod prompts;
mod runner;
mod zipf;

use crate::classify::{ChainClassifier, HintClassifier, KeywordClassifier, RuleClassifier, TopicOverrides};
use crate::config::CollectConfig;
use crate::consolidate::Consolidator;
use crate::generation::{Generator, OpenAiGenerator};
use crate::output::OutputFormat;
use crate::runner::{Runner, StopHandle, stop_channel};

/// LLM output regularity verifier - collect model responses and test them against Benford's and Zipf's laws
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Verbose output - log every dispatch, retry and skipped line
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run prompts against models and append the responses to a log
    Collect {
        /// Path to the TOML run file
        run_file: PathBuf,

        /// Write placeholder records without calling any model
        #[arg(long)]
        dry_run: bool,
    },
    /// Merge response logs into a canonical dataset and summarise it
    Consolidate {
        /// Response logs, read in the given order
        #[arg(required = true)]
        logs: Vec<PathBuf>,

        /// Canonical dataset (JSON Lines)
        #[arg(long)]
        out: PathBuf,

        /// Summary table (TSV)
        #[arg(long)]
        summary: PathBuf,

        /// Topic rules (JSON)
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Topic overrides (TOML)
        #[arg(long)]
        overrides: Option<PathBuf>,

        /// Output format: plain or json
        #[arg(short, long, default_value = "plain")]
        output: OutputFormat,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let clean = match args.command {
        Command::Collect { run_file, dry_run } => collect(&run_file, dry_run).await?,
        Command::Consolidate {
            logs,
            out,
            summary,
            rules,
            overrides,
            output,
        } => consolidate_logs(&logs, &out, &summary, rules, overrides, output)?,
    };

    Ok(if clean {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn collect(run_file: &Path, dry_run: bool) -> anyhow::Result<bool> {
    let mut config = CollectConfig::from_file(run_file)?;
    config.dry_run |= dry_run;
    config.validate()?;
    let prompts = prompts::load(&config.prompts_source)?;

    let (handle, signal) = stop_channel();
    watch_for_interrupt(handle);

    let report = if config.dry_run {
        Runner::dry_run(config)?
            .with_stop_signal(signal)
            .run(&prompts)
            .await?
    } else {
        let generator = OpenAiGenerator::from_config(&config.api)?;
        run_collection(config, generator, signal, &prompts).await?
    };

    output::print_run_report(&report);
    Ok(!report.has_failures())
}

async fn run_collection<G: Generator + 'static>(
    config: CollectConfig,
    generator: G,
    signal: runner::StopSignal,
    prompts: &[models::Prompt],
) -> anyhow::Result<runner::RunReport> {
    Runner::new(config, generator)?
        .with_stop_signal(signal)
        .run(prompts)
        .await
}

fn watch_for_interrupt(handle: StopHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight calls");
            handle.stop();
        }
    });
}

fn consolidate_logs(
    logs: &[PathBuf],
    out: &Path,
    summary: &Path,
    rules: Option<PathBuf>,
    overrides: Option<PathBuf>,
    output: OutputFormat,
) -> anyhow::Result<bool> {
    let mut classifier = ChainClassifier::new().then(HintClassifier);
    if let Some(rules) = rules {
        let rule_set = RuleClassifier::from_file(&rules)?;
        if rule_set.is_empty() {
            warn!(path = %rules.display(), "topic rules file contains no usable rules");
        }
        info!(rules = rule_set.len(), "topic rules loaded");
        classifier = classifier.then(rule_set);
    }
    classifier = classifier.then(KeywordClassifier::new());

    let overrides = match overrides {
        Some(path) => TopicOverrides::from_file(&path)?,
        None => TopicOverrides::default(),
    };

    let consolidator = Consolidator::new(classifier).with_overrides(overrides);
    let (records, report) = consolidator.merge(logs);
    consolidate::write_canonical(&records, out)
        .with_context(|| format!("Failed to write canonical dataset: {}", out.display()))?;

    let rows = consolidate::summarize(&records);
    output::write_summary_tsv(&rows, summary)?;

    output::print_consolidation_report(&report);
    output::print_summary(&rows, output);
    Ok(!report.has_unreadable())
}
