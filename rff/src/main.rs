//! `rff`: run the reason-from-future controller on a single problem.
//!
//! The model is an external command (see `[model]` in `rff.toml`); the prompt
//! goes to its stdin and its stdout is the completion.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::warn;

use rff::config::{RunConfig, load_config, write_config};
use rff::controller;
use rff::core::types::{RunResult, RunStatus, Variant};
use rff::exit_codes;
use rff::model::{CommandModel, RetryingModel};
use rff::tasks::{TaskKind, build_task};
use rff::transcript::TranscriptWriter;

const DEFAULT_CONFIG: &str = "rff.toml";

#[derive(Parser)]
#[command(
    name = "rff",
    version,
    about = "Reason-from-future controller for language-model search"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Solve one problem and print the run result.
    Solve(SolveArgs),
    /// Write a default config file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
        #[arg(default_value = DEFAULT_CONFIG)]
        path: PathBuf,
    },
    /// Load and validate a config file.
    CheckConfig {
        #[arg(default_value = DEFAULT_CONFIG)]
        path: PathBuf,
    },
}

#[derive(clap::Args)]
struct SolveArgs {
    #[arg(long, value_enum)]
    task: TaskKind,
    /// Problem text (e.g. "4 6 1 1" for the 24-game).
    #[arg(long)]
    problem: String,
    /// Known answer; word problems verify against it instead of asking the model.
    #[arg(long)]
    gold: Option<f64>,
    #[arg(long, value_enum)]
    variant: Option<VariantArg>,
    #[arg(long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,
    #[arg(long)]
    max_iterations: Option<u32>,
    /// Model identifier substituted for `{model}` in the model command.
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    temperature: Option<f32>,
    /// Write per-iteration records to this JSONL file.
    #[arg(long)]
    transcript: Option<PathBuf>,
    /// Print the result as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum VariantArg {
    Dag,
    Tree,
}

impl From<VariantArg> for Variant {
    fn from(value: VariantArg) -> Self {
        match value {
            VariantArg::Dag => Variant::Dag,
            VariantArg::Tree => Variant::Tree,
        }
    }
}

fn main() {
    rff::logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Solve(args) => cmd_solve(&args),
        Command::InitConfig { force, path } => cmd_init_config(&path, force),
        Command::CheckConfig { path } => cmd_check_config(&path),
    }
}

fn cmd_solve(args: &SolveArgs) -> Result<i32> {
    let config = resolve_config(args)?;
    let task = build_task(args.task, &args.problem, args.gold, &config)?;
    let model = RetryingModel::new(CommandModel::new(config.model.clone()), config.retry.policy());

    let mut transcript = args
        .transcript
        .as_deref()
        .map(TranscriptWriter::create)
        .transpose()?;
    let result = controller::solve(task.as_ref(), &model, &args.problem, &config, |record| {
        if let Some(writer) = transcript.as_mut() {
            if let Err(err) = writer.record(record) {
                warn!(err = %format!("{err:#}"), "failed to write transcript record");
            }
        }
    })?;
    if let Some(writer) = transcript {
        writer.finish(task.name(), &result)?;
    }

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("serialize run result")?
        );
    } else {
        print_result(&result);
    }

    Ok(match result.status {
        RunStatus::Accepted | RunStatus::AcceptedUnverified => exit_codes::OK,
        RunStatus::Exhausted => exit_codes::NOT_ACCEPTED,
    })
}

/// Config file values with command-line overrides applied.
fn resolve_config(args: &SolveArgs) -> Result<RunConfig> {
    let mut config = load_config(&args.config)?;
    if let Some(variant) = args.variant {
        config.variant = variant.into();
    }
    if let Some(max_iterations) = args.max_iterations {
        config.max_iterations = max_iterations;
    }
    if let Some(model) = &args.model {
        config.model_identifier = model.clone();
    }
    if let Some(temperature) = args.temperature {
        config.sampling_temperature = temperature;
    }
    config.validate().context("invalid command-line options")?;
    Ok(config)
}

fn print_result(result: &RunResult) {
    println!("accepted: {}", result.accepted);
    println!("status: {}", result.status.as_str());
    println!("variant: {}", result.variant.as_str());
    println!("iterations: {}", result.iterations_used);
    println!("rationale: {}", result.rationale);
    println!();
    println!("{}", result.final_workspace_summary);
}

fn cmd_init_config(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &RunConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_check_config(path: &Path) -> Result<i32> {
    if !path.exists() {
        bail!("config not found: {}", path.display());
    }
    load_config(path)?;
    println!("ok");
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_solve_with_overrides() {
        let cli = Cli::parse_from([
            "rff",
            "solve",
            "--task",
            "word-problem",
            "--problem",
            "2 + 2?",
            "--variant",
            "tree",
            "--max-iterations",
            "4",
        ]);
        let Command::Solve(args) = cli.command else {
            panic!("expected solve");
        };
        assert_eq!(args.task, TaskKind::WordProblem);
        assert_eq!(args.max_iterations, Some(4));
        assert!(matches!(args.variant, Some(VariantArg::Tree)));
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG));
    }

    #[test]
    fn parse_init_config_force() {
        let cli = Cli::parse_from(["rff", "init-config", "--force", "custom.toml"]);
        assert!(matches!(
            cli.command,
            Command::InitConfig { force: true, ref path } if path == Path::new("custom.toml")
        ));
    }

    #[test]
    fn overrides_apply_and_validate() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut args = SolveArgs {
            task: TaskKind::Game24,
            problem: "4 6 1 1".to_string(),
            gold: None,
            variant: Some(VariantArg::Tree),
            config: temp.path().join("missing.toml"),
            max_iterations: Some(3),
            model: Some("tiny".to_string()),
            temperature: None,
            transcript: None,
            json: false,
        };
        let config = resolve_config(&args).expect("config");
        assert_eq!(config.variant, Variant::Tree);
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.model_identifier, "tiny");

        args.temperature = Some(2.0);
        assert!(resolve_config(&args).is_err());
    }
}
