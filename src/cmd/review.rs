//! `plan-review review`: the autonomy loop and targeted single-phase runs.

use anyhow::{Context, Result, anyhow};
use futures::FutureExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use plan_review::autonomy::report::render_batch_report;
use plan_review::autonomy::{AutonomyController, AutonomyMode, RunReport, RunStatus};
use plan_review::config::ReviewConfig;
use plan_review::gates::ApprovalGate;
use plan_review::logging::init_logging;
use plan_review::phase::{PhaseStatus, PhaseType};
use plan_review::requirements::LoadedPlan;
use plan_review::review::{ClaudeAnalyzer, ReviewEngine, ReviewStep};
use plan_review::shutdown::ShutdownCoordinator;
use plan_review::tracker::{BeadsTracker, GitSourceControl, SourceControl};
use plan_review::ui::ReviewUI;

use super::super::{Cli, ReviewArgs};

const RESUME_LATEST: &str = "latest";

fn resolve(project_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_dir.join(path)
    }
}

fn log_head_revision(project_dir: &Path) {
    match GitSourceControl::new(project_dir).and_then(|scm| scm.head_revision()) {
        Ok(Some(revision)) => info!(%revision, "Reviewing at source revision"),
        Ok(None) => debug!("Repository has no commits yet"),
        Err(e) => debug!(error = %e, "No source revision available"),
    }
}

/// Returns the process exit code: 0 clean, 1 warnings, 2 critical.
pub async fn cmd_review(cli: &Cli, project_dir: PathBuf, args: &ReviewArgs) -> Result<i32> {
    let mut config = ReviewConfig::with_cli_args(project_dir, cli.verbose, cli.yes)?;
    if let Some(concurrency) = args.concurrency {
        config.toml.review.concurrency = concurrency;
    }
    let _log_guard = init_logging(cli.verbose, Some(&config.log_dir()))?;
    for warning in config.validate() {
        warn!("{}", warning);
    }

    let plan_path = resolve(&config.project_dir, &args.plan);
    let loaded = LoadedPlan::load(&plan_path)?;
    let errors = loaded
        .plan
        .requirements
        .validate_with_max_depth(config.toml.review.max_depth);
    if !errors.is_empty() {
        anyhow::bail!("Plan '{}' failed validation: {}", loaded.plan.name, errors);
    }
    info!(
        plan = %loaded.plan.name,
        hash = %loaded.hash,
        nodes = loaded.plan.requirements.len(),
        "Loaded plan"
    );
    log_head_revision(&config.project_dir);

    let mut controller_config = config.controller_config();
    if let Some(mode) = &args.mode {
        controller_config.mode = mode.parse()?;
    }
    if args.all_phases {
        controller_config.mode = AutonomyMode::FullyAutonomous;
    }
    if args.stop_on_critical {
        controller_config.stop_on_critical = true;
    }
    if let Some(max) = args.max_iterations {
        controller_config.max_iterations = max;
    }

    let analyzer = Arc::new(ClaudeAnalyzer::new(config.analyzer_config()));
    let limiter = Arc::new(config.rate_limiter());
    let engine = Arc::new(ReviewEngine::new(
        analyzer,
        limiter,
        config.engine_config(),
        loaded.plan.name.clone(),
    ));
    let store = config.checkpoint_store(
        args.checkpoint_dir
            .as_deref()
            .map(|dir| resolve(&config.project_dir, dir))
            .as_deref(),
    );

    let plan_name = loaded.plan.name.clone();
    let node_count = loaded.plan.requirements.len();
    let mut controller = match &args.resume {
        Some(target) => {
            let path = if target == RESUME_LATEST {
                store
                    .latest(&plan_name)?
                    .ok_or_else(|| anyhow!("No checkpoint found for plan '{}'", plan_name))?
            } else {
                resolve(&config.project_dir, Path::new(target))
            };
            let checkpoint = store
                .load(&path, &loaded.hash)
                .with_context(|| format!("Failed to resume from {}", path.display()))?;
            if args.mode.is_none() && !args.all_phases {
                controller_config.mode = checkpoint.autonomy_mode;
            }
            println!("Resuming from {}", path.display());
            AutonomyController::resume(engine, store, loaded, controller_config, checkpoint)?
        }
        None => AutonomyController::new(engine, store, loaded, controller_config)?,
    };

    let shutdown = ShutdownCoordinator::new();
    let ui = Arc::new(ReviewUI::new(cli.verbose));
    controller = controller
        .with_tracker(Arc::new(BeadsTracker::new(&config.project_dir)))
        .with_observer(ui.clone())
        .with_cancel_token(shutdown.child_token());

    let pending = controller.pending_checkpoint();
    shutdown.on_shutdown("save pending checkpoint", move || {
        async move {
            match pending.flush() {
                Ok(Some(path)) => info!(path = %path.display(), "Saved checkpoint on shutdown"),
                Ok(None) => {}
                Err(e) => error!(error = %e, "Failed to save checkpoint on shutdown"),
            }
        }
        .boxed()
    });
    let listener = shutdown.listen();

    let mode = controller.config().mode;
    ui.print_header(&plan_name, &mode.to_string(), node_count);

    let report = match &args.phase {
        Some(phase) => {
            let phase: PhaseType = phase.parse()?;
            let step = args
                .step
                .as_deref()
                .map(str::parse::<ReviewStep>)
                .transpose()?;
            controller.review_targeted(phase, step).await?
        }
        None => drive(&mut controller, &ui, cli.yes).await?,
    };
    listener.abort();

    ui.print_summary(&report);
    write_report(&config.project_dir, args.output.as_deref(), &report)?;
    Ok(report.exit_code())
}

async fn drive(controller: &mut AutonomyController, ui: &ReviewUI, yes: bool) -> Result<RunReport> {
    let mut gate = ApprovalGate::new(yes);
    let completed = controller
        .board()
        .iter()
        .filter(|(_, status)| *status == PhaseStatus::Complete)
        .count();
    ui.set_position(completed);

    loop {
        match controller.run().await? {
            RunStatus::Suspended(suspension) => {
                ui.print_suspension(&suspension);
                if controller.config().mode == AutonomyMode::Batch && !suspension.phases.is_empty() {
                    ui.print_block(&render_batch_report(
                        controller.results(),
                        controller.board(),
                        &suspension.phases,
                    ));
                }
                let approval = gate.decide(&suspension)?;
                controller.approve(approval)?;
            }
            RunStatus::Terminated(report) => return Ok(report),
        }
    }
}

fn write_report(project_dir: &Path, output: Option<&Path>, report: &RunReport) -> Result<()> {
    match output {
        Some(path) => {
            let path = resolve(project_dir, path);
            report.write_to(&path)?;
            println!("Report written to {}", path.display());
        }
        None => println!("\n{}", report.to_markdown()),
    }
    Ok(())
}
