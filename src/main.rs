use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use uuid::Uuid;

use anvil::cartographer::{self, RepoCartographer};
use anvil::client::HttpCompletionClient;
use anvil::config::Config;
use anvil::context::{WorkflowContext, WorkflowState};
use anvil::experience::ExperienceStore;
use anvil::persona::AgentExecutor;
use anvil::router::ModelRouter;
use anvil::sandbox::{GitSandbox, SandboxGuard};
use anvil::validate;
use anvil::verify::ProcessVerifier;
use anvil::workflow::{self, WorkflowController};
use anvil::{bench, init_tracing};

#[derive(Parser)]
#[command(name = "anvil")]
#[command(version, about = "Autonomous multi-agent code modification orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as line-delimited JSON.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute one modification task against a target file
    Run {
        /// File the task applies to, relative to the project root
        target: String,
        /// Natural-language task description
        task: String,
        /// Retry budget per phase (planning, coding, refactoring)
        #[arg(long)]
        retries: Option<u32>,
        /// Rebuild the repository map before running
        #[arg(long)]
        remap: bool,
    },
    /// Build (or rebuild) the repository map
    Map,
    /// Show recorded task outcomes
    History {
        /// Show only the most recent N records
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Replay a benchmark suite through the agent
    Bench {
        /// Path to the tasks.json suite definition
        suite: PathBuf,
        /// Where to write the JSON report
        #[arg(long, default_value = "bench_report.json")]
        report: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json)?;

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Run {
            target,
            task,
            retries,
            remap,
        } => cmd_run(project_dir, target, task, *retries, *remap, cli.verbose).await,
        Commands::Map => cmd_map(project_dir, cli.verbose),
        Commands::History { limit } => cmd_history(project_dir, *limit),
        Commands::Bench { suite, report } => cmd_bench(project_dir, suite, report).await,
    }
}

async fn cmd_run(
    project_dir: PathBuf,
    target: &str,
    task: &str,
    retries: Option<u32>,
    remap: bool,
    verbose: bool,
) -> Result<()> {
    let config = Config::new(project_dir, retries, verbose)?;
    config.ensure_directories()?;

    let task = validate::validate(task)?;

    let map = if remap {
        RepoCartographer::new(&config.project_dir).export(&config.map_file)?
    } else {
        cartographer::load_or_map(&config.project_dir, &config.map_file)?
    };
    let repository_summary =
        serde_json::to_string_pretty(&map).context("Failed to render repository map")?;

    let mut store = ExperienceStore::load(&config.experience_file)?;

    let client = Arc::new(HttpCompletionClient::new(
        &config.cloud_base_url,
        &config.local_base_url,
        config.api_key.clone(),
    ));
    let router = ModelRouter::connect(client, config.roster.clone()).await;
    let executor = AgentExecutor::new(router);
    let verifier = ProcessVerifier::new(
        &config.interpreter,
        config.lint_cmd.clone(),
        config.verify_timeout,
    );

    let run_id = Uuid::new_v4().to_string();
    let run_dir = config.run_dir(&run_id);

    let gate = GitSandbox::new(&config.project_dir);
    let guard = SandboxGuard::open(&gate, task)?;
    println!(
        "{} {}",
        style("Sandbox branch:").bold(),
        style(&guard.id().branch).cyan()
    );

    let mut ctx = WorkflowContext::new(task.to_string(), target.to_string());
    ctx.repository_summary = repository_summary;
    ctx.experiences = store.retrieve(task, config.experience_k);

    let controller = WorkflowController::new(
        &executor,
        &verifier,
        config.retry_budget,
        run_dir.clone(),
    );

    // A generation error drops the guard, which rolls the sandbox back.
    let state = controller.execute(&mut ctx, &mut store).await?;

    match state {
        WorkflowState::Done => {
            let target_path = config.project_dir.join(target);
            if let Some(parent) = target_path.parent() {
                fs::create_dir_all(parent).context("Failed to create target directory")?;
            }
            fs::write(&target_path, &ctx.solution)
                .with_context(|| format!("Failed to write {}", target_path.display()))?;
            guard.finalize(task)?;
            println!("{} {}", style("✓").green().bold(), style("Task completed").green());
            println!("  solution: {}", target_path.display());
            println!("  audit:    {}", run_dir.join(workflow::REVIEW_FILE).display());
        }
        _ => {
            guard.abandon()?;
            println!("{} {}", style("✗").red().bold(), style("Task failed").red());
            if !ctx.error_log.is_empty() {
                println!("  last error:\n{}", ctx.error_log);
            }
            println!("  artifacts: {}", run_dir.display());
            std::process::exit(1);
        }
    }
    Ok(())
}

fn cmd_map(project_dir: PathBuf, verbose: bool) -> Result<()> {
    let config = Config::new(project_dir, None, verbose)?;
    let map = RepoCartographer::new(&config.project_dir).export(&config.map_file)?;
    println!(
        "{} {} files mapped to {}",
        style("✓").green().bold(),
        map.len(),
        config.map_file.display()
    );
    Ok(())
}

fn cmd_history(project_dir: PathBuf, limit: Option<usize>) -> Result<()> {
    let config = Config::new(project_dir, None, false)?;
    let store = ExperienceStore::load(&config.experience_file)?;
    if store.is_empty() {
        println!("No recorded task outcomes yet.");
        return Ok(());
    }
    let records = store.records();
    let skip = limit.map_or(0, |n| records.len().saturating_sub(n));
    for record in &records[skip..] {
        let marker = if record.success {
            style("✓").green()
        } else {
            style("✗").red()
        };
        println!(
            "{} {} {}",
            marker,
            style(record.timestamp.format("%Y-%m-%d %H:%M")).dim(),
            record.task
        );
    }
    Ok(())
}

async fn cmd_bench(project_dir: PathBuf, suite: &PathBuf, report: &PathBuf) -> Result<()> {
    let config = Config::new(project_dir, None, false)?;
    let tasks = bench::load_tasks(suite)?;
    let exe = std::env::current_exe().context("Failed to locate agent binary")?;
    let runner = bench::BenchRunner::new(
        vec![exe.display().to_string(), "run".to_string()],
        &config.interpreter,
    );

    let results = runner.run_suite(&tasks).await?;
    bench::write_report(report, &results)?;

    println!("{}", style("Benchmark results").bold().cyan());
    for result in &results {
        let status = if result.success {
            style("PASSED").green()
        } else {
            style("FAILED").red()
        };
        println!(
            "  {} {} ({:.2}s)",
            status, result.id, result.duration_secs
        );
    }
    println!("{}", bench::summarize(&results));
    Ok(())
}
