mod benchmark_cmd;
mod config;
mod dag_cmd;
mod run_cmd;

use clap::{Parser, Subcommand};

use config::TcrConfig;
use tcr_core::benchmark::Strategy;

#[derive(Parser)]
#[command(name = "tcr", about = "Durable, gate-driven Test-Commit-Revert orchestration engine")]
struct Cli {
    /// Path to the main repository whose worktrees back each cell
    /// (overrides TCR_REPO_PATH env var and the config file).
    #[arg(long, global = true)]
    repo_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single Enhanced TCR workflow to completion.
    Run {
        /// Cell identifier (also used as the worktree branch suffix).
        cell_id: String,
        /// Branch to check out the worktree from.
        #[arg(long, default_value = "main")]
        branch: String,
        /// Task identifier, passed through to gate reviewers.
        #[arg(long)]
        task_id: String,
        /// Task description given to the test-generation agent.
        #[arg(long)]
        description: String,
        /// Acceptance criteria given to the implementation agent.
        #[arg(long)]
        acceptance_criteria: String,
        /// Number of parallel code reviewers in the MultiReview gate.
        #[arg(long, default_value_t = 3)]
        reviewers_count: u32,
        /// Max retries for a failing gate before the workflow fails.
        #[arg(long, default_value_t = 3)]
        max_retries: u32,
        /// Max attempts to fix a review's requested changes.
        #[arg(long, default_value_t = 3)]
        max_fix_attempts: u32,
        /// Restrict the lock acquired for this cell to specific paths
        /// (comma-separated). Defaults to locking the whole cell.
        #[arg(long, value_delimiter = ',')]
        changed_files: Option<Vec<String>>,
        /// Run the Parallel TCR variant: on a VerifyGREEN failure, fan out
        /// `fan_out` concurrent fix attempts instead of retrying serially.
        #[arg(long)]
        parallel: bool,
        /// Number of concurrent fix attempts fanned out when `--parallel`
        /// is set.
        #[arg(long, default_value_t = 3)]
        fan_out: u32,
        /// Fan out fix attempts against sibling-cloned cells rather than
        /// the shared cell. Only meaningful with `--parallel`.
        #[arg(long, default_value_t = true)]
        clone_cells: bool,
    },
    /// DAG task-graph commands.
    Dag {
        #[command(subcommand)]
        command: DagCommands,
    },
    /// Benchmark-driver commands.
    Benchmark {
        #[command(subcommand)]
        command: BenchmarkCommands,
    },
}

#[derive(Subcommand)]
enum DagCommands {
    /// Execute a task graph loaded from a JSON file.
    Run {
        /// Workflow identifier (also used as the worktree branch suffix).
        workflow_id: String,
        /// Branch to check out the worktree from.
        #[arg(long, default_value = "main")]
        branch: String,
        /// Path to a JSON file of the shape `{"tasks": [{"name", "command", "deps"}]}`.
        tasks_file: String,
    },
}

#[derive(Subcommand)]
enum BenchmarkCommands {
    /// Fan out N TCR runs and report the strategy's success rate.
    Run {
        /// Strategy under test.
        #[arg(long, default_value = "enhanced")]
        strategy: StrategyArg,
        /// Number of runs to fan out.
        #[arg(long, default_value_t = 1)]
        num_runs: u32,
        /// Maximum number of runs executing concurrently.
        #[arg(long, default_value_t = 1)]
        concurrency: usize,
        /// Prompt given to each run's implementation agent.
        #[arg(long)]
        prompt: String,
        /// Task description given to each run's test-generation agent.
        #[arg(long)]
        description: String,
        /// Branch to check out each run's worktree from.
        #[arg(long, default_value = "main")]
        branch: String,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum StrategyArg {
    Basic,
    Enhanced,
}

impl From<StrategyArg> for Strategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::Basic => Strategy::Basic,
            StrategyArg::Enhanced => Strategy::Enhanced,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = TcrConfig::resolve(cli.repo_path.as_deref())?;

    match cli.command {
        Commands::Run {
            cell_id,
            branch,
            task_id,
            description,
            acceptance_criteria,
            reviewers_count,
            max_retries,
            max_fix_attempts,
            changed_files,
            parallel,
            fan_out,
            clone_cells,
        } => {
            run_cmd::run(
                &config,
                run_cmd::RunArgs {
                    cell_id,
                    branch,
                    task_id,
                    description,
                    acceptance_criteria,
                    reviewers_count,
                    max_retries,
                    max_fix_attempts,
                    changed_files,
                    parallel,
                    fan_out,
                    clone_cells,
                },
            )
            .await?;
        }
        Commands::Dag {
            command: DagCommands::Run {
                workflow_id,
                branch,
                tasks_file,
            },
        } => {
            dag_cmd::run(
                &config,
                dag_cmd::DagArgs {
                    workflow_id,
                    branch,
                    tasks_file,
                },
            )
            .await?;
        }
        Commands::Benchmark {
            command:
                BenchmarkCommands::Run {
                    strategy,
                    num_runs,
                    concurrency,
                    prompt,
                    description,
                    branch,
                },
        } => {
            benchmark_cmd::run(
                &config,
                benchmark_cmd::BenchmarkArgs {
                    strategy: strategy.into(),
                    num_runs,
                    concurrency,
                    prompt,
                    description,
                    repo_branch: branch,
                },
            )
            .await?;
        }
    }

    Ok(())
}
