use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

/// Exit code for failures before a review could complete.
const EXIT_FATAL: i32 = 3;

#[derive(Parser)]
#[command(name = "plan-review")]
#[command(version, about = "Severity-classified review of implementation plans")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Auto-approve suspensions that have no critical findings
    #[arg(long, global = true)]
    pub yes: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Args, Clone, Debug)]
pub struct ReviewArgs {
    /// Plan JSON file to review
    #[arg(long)]
    pub plan: PathBuf,

    /// Review a single phase without the autonomy loop
    #[arg(long, conflicts_with = "all_phases")]
    pub phase: Option<String>,

    /// With --phase, run only this step
    #[arg(long, requires = "phase")]
    pub step: Option<String>,

    /// Report path; `.json` writes JSON, anything else markdown
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// checkpoint, batch or fully-autonomous
    #[arg(long)]
    pub mode: Option<String>,

    /// Run every phase without suspending (fully autonomous)
    #[arg(long)]
    pub all_phases: bool,

    /// Resume from a checkpoint file, or "latest"
    #[arg(long)]
    pub resume: Option<String>,

    #[arg(long)]
    pub stop_on_critical: bool,

    #[arg(long)]
    pub max_iterations: Option<u32>,

    #[arg(long)]
    pub concurrency: Option<usize>,

    #[arg(long)]
    pub checkpoint_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Review a plan through all phases
    #[command(visible_alias = "r", alias = "plan-review")]
    Review(ReviewArgs),
    /// List saved checkpoints
    Checkpoints {
        /// Only checkpoints for this plan name
        #[arg(long)]
        plan: Option<String>,

        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,
    },
    /// Validate a plan's requirement tree without reviewing it
    Validate {
        #[arg(long)]
        plan: PathBuf,
    },
}

async fn run(cli: Cli) -> Result<i32> {
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Review(args) => cmd::cmd_review(&cli, project_dir, args).await,
        Commands::Checkpoints {
            plan,
            checkpoint_dir,
        } => {
            cmd::cmd_checkpoints(&project_dir, plan.as_deref(), checkpoint_dir.as_deref())?;
            Ok(0)
        }
        Commands::Validate { plan } => cmd::cmd_validate(&project_dir, plan),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            EXIT_FATAL
        }
    };
    std::process::exit(code);
}
