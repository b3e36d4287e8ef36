//! CLI command definitions for scriptsmith.

use std::fs;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use crate::config::SynthesisConfig;
use crate::engine::{Outcome, SynthesisEngine, TaskContext};
use crate::environment::EnvProfile;
use crate::execution::SandboxExecutor;
use crate::llm::{ChatClient, LlmProvider};
use crate::research::TavilyClient;

/// How many directory entries the data description lists before truncating.
const MAX_LISTED_ENTRIES: usize = 50;

/// Iterative script synthesis with sandboxed execution and self-repair.
#[derive(Parser)]
#[command(name = "scriptsmith")]
#[command(about = "Generate, execute and repair data-analysis scripts with an LLM")]
#[command(version)]
#[command(
    long_about = "scriptsmith turns a natural-language task description into a runnable script.\n\nCandidates are reviewed, executed in a sandbox (native or Docker), diagnosed on failure and repaired until they succeed or the budget runs out.\n\nExample usage:\n  scriptsmith run --task \"normalize counts.csv and plot a histogram\" --data-dir ./task-data"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the synthesis loop for one task.
    #[command(alias = "r")]
    Run(RunArgs),

    /// Print the runtime environment profile as JSON.
    Env(EnvArgs),
}

/// Arguments for `scriptsmith run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Task instruction text.
    #[arg(short, long, conflicts_with = "task_file")]
    pub task: Option<String>,

    /// File holding the task instruction.
    #[arg(long)]
    pub task_file: Option<String>,

    /// Directory holding the task's input data; also the sandbox work dir.
    #[arg(short, long, default_value = ".")]
    pub data_dir: String,

    /// Description of the input data. When omitted, a directory listing is
    /// generated and used instead.
    #[arg(long)]
    pub data_description: Option<String>,

    /// YAML config file overriding the default budgets and models.
    #[arg(short, long)]
    pub config: Option<String>,

    /// JSON file listing container images available for isolated execution.
    #[arg(long)]
    pub images: Option<String>,

    /// Override both chat and code models.
    #[arg(short, long)]
    pub model: Option<String>,

    /// Skip the pre-execution review stage.
    #[arg(long)]
    pub no_review: bool,

    /// Enable web research on execution failures (needs TAVILY_API_KEY).
    #[arg(long)]
    pub research: bool,

    /// Write the final script to this file.
    #[arg(short, long)]
    pub output: Option<String>,

    /// Print the full run report as JSON.
    #[arg(short, long)]
    pub json: bool,
}

/// Arguments for `scriptsmith env`.
#[derive(Parser, Debug)]
pub struct EnvArgs {
    /// JSON file listing container images available for isolated execution.
    #[arg(long)]
    pub images: Option<String>,
}

/// Parses CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Dispatches a parsed CLI invocation.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_synthesis(args).await,
        Commands::Env(args) => show_env(args),
    }
}

fn load_profile(images: Option<&str>) -> anyhow::Result<EnvProfile> {
    match images {
        Some(path) => Ok(EnvProfile::from_image_profile_file(path)?),
        None => Ok(EnvProfile::local_default()),
    }
}

fn show_env(args: EnvArgs) -> anyhow::Result<()> {
    let profile = load_profile(args.images.as_deref())?;
    println!("{}", serde_json::to_string_pretty(&profile)?);
    Ok(())
}

async fn run_synthesis(args: RunArgs) -> anyhow::Result<()> {
    let instruction = match (&args.task, &args.task_file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => fs::read_to_string(path)?,
        (None, None) => anyhow::bail!("either --task or --task-file is required"),
    };

    let mut config = match &args.config {
        Some(path) => SynthesisConfig::from_yaml_file(path)?,
        None => SynthesisConfig::from_env()?,
    };
    if let Some(model) = &args.model {
        config.chat_model = model.clone();
        config.code_model = model.clone();
    }

    let data_dir = fs::canonicalize(&args.data_dir)?;
    let data_perception = match &args.data_description {
        Some(text) => text.clone(),
        None => describe_data_dir(&data_dir)?,
    };

    let profile = load_profile(args.images.as_deref())?;
    let provider: Arc<dyn LlmProvider> = Arc::new(ChatClient::from_env()?);

    let executor = Arc::new(SandboxExecutor::new(
        profile.clone(),
        &data_dir,
        config.native_timeout(),
        config.container_timeout(),
    ));

    let mut engine = SynthesisEngine::new(provider.clone(), executor, profile, config)?;
    if args.research {
        let search = Arc::new(TavilyClient::from_env()?);
        engine = engine.with_research(provider, search)?;
    }

    // Ctrl-C requests a stop at the next stage boundary.
    let abort = engine.abort_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current stage");
            abort.store(true, Ordering::SeqCst);
        }
    });

    let mut task = TaskContext::new(instruction, data_perception, &data_dir);
    if args.no_review {
        task = task.without_review();
    }

    let report = engine.run(&task).await?;

    match report.outcome {
        Outcome::Success => info!("Synthesis succeeded"),
        Outcome::Exhausted => warn!("Budget exhausted; returning best-effort script"),
        Outcome::Aborted => warn!("Run aborted"),
    }

    if let Some(path) = &args.output {
        if let Some(artifact) = report.final_script() {
            fs::write(path, &artifact.code)?;
            info!(path = %path, language = %artifact.language, "Wrote final script");
        } else {
            warn!("No script was produced; nothing written");
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if let Some(artifact) = report.final_script() {
        println!("{}", artifact.code);
    }

    Ok(())
}

/// Builds a fallback data description by listing the work directory.
fn describe_data_dir(dir: &Path) -> anyhow::Result<String> {
    let mut entries: Vec<String> = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if meta.is_dir() {
            entries.push(format!("- {}/ (directory)", name));
        } else {
            entries.push(format!("- {} ({} bytes)", name, meta.len()));
        }
    }
    entries.sort();

    if entries.is_empty() {
        return Ok("The working directory is empty; the task needs no input files.".to_string());
    }

    let truncated = entries.len() > MAX_LISTED_ENTRIES;
    entries.truncate(MAX_LISTED_ENTRIES);
    let mut text = format!(
        "Files in the working directory (scripts run with it as cwd):\n{}",
        entries.join("\n")
    );
    if truncated {
        text.push_str("\n- ... (more entries omitted)");
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_data_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("counts.csv"), "a,b\n1,2\n").expect("write");
        fs::create_dir(dir.path().join("raw")).expect("mkdir");

        let text = describe_data_dir(dir.path()).expect("describe");
        assert!(text.contains("counts.csv"));
        assert!(text.contains("raw/ (directory)"));
    }

    #[test]
    fn test_describe_empty_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let text = describe_data_dir(dir.path()).expect("describe");
        assert!(text.contains("empty"));
    }

    #[test]
    fn test_cli_parses_run_command() {
        let cli = Cli::try_parse_from([
            "scriptsmith",
            "run",
            "--task",
            "plot a histogram",
            "--data-dir",
            "/tmp",
            "--no-review",
        ])
        .expect("parse");

        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.task.as_deref(), Some("plot a histogram"));
                assert!(args.no_review);
                assert!(!args.research);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_cli_rejects_task_and_task_file_together() {
        let result = Cli::try_parse_from([
            "scriptsmith",
            "run",
            "--task",
            "a",
            "--task-file",
            "b.txt",
        ]);
        assert!(result.is_err());
    }
}
