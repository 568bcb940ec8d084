use anyhow::Result;
use console::style;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use trellis::config::{CliOverrides, ExecutionConfig, TrellisToml};
use trellis::graph::validate;
use trellis::logs::LogManager;
use trellis::runner::ProcessRunner;
use trellis::scheduler::{FeatureEvent, Scheduler};
use trellis::ui::RunUi;

pub struct RunArgs {
    pub graph_file: Option<PathBuf>,
    pub dry_run: bool,
    pub max_parallel: Option<usize>,
    pub base_branch: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Execute the graph (or print its dispatch plan under `--dry-run`).
pub async fn execute(project_dir: &Path, args: RunArgs) -> Result<()> {
    let file = super::load_graph_file(project_dir, args.graph_file.as_ref())?;
    let (graph, execution) = file.into_parts();

    let report = validate(&graph);
    for warning in report.warnings() {
        println!("{} {warning}", style("warning:").yellow().bold());
    }
    if report.has_errors() {
        for error in report.errors() {
            println!("{} {error}", style("error:").red().bold());
        }
        anyhow::bail!("graph failed validation; refusing to run");
    }

    if args.dry_run {
        let waves = Scheduler::plan(&graph)?;
        println!(
            "{} {} features in {} waves",
            style("plan:").bold(),
            graph.feature_count(),
            waves.len()
        );
        for (i, wave) in waves.iter().enumerate() {
            println!("  wave {i}: {}", wave.join(", "));
        }
        return Ok(());
    }

    let toml = TrellisToml::load_or_default(&project_dir.join(".trellis"))?;
    let cli = CliOverrides {
        max_parallel: args.max_parallel,
        base_branch: args.base_branch,
        timeout_secs: args.timeout_secs,
    };
    let config = ExecutionConfig::resolve(project_dir, &toml, &execution, &cli);

    let logs = Arc::new(LogManager::open(&config.log_dir, config.max_log_size)?);
    let runner = Arc::new(ProcessRunner::new(&config.runner_cmd, logs));

    let (event_tx, mut event_rx) = tokio::sync::mpsc::channel::<FeatureEvent>(256);
    let total = graph.feature_count() as u64;
    let ui_task = tokio::spawn(async move {
        let mut ui = RunUi::new(total);
        while let Some(event) = event_rx.recv().await {
            ui.handle(&event);
        }
    });

    let scheduler = Scheduler::new(config).with_event_channel(event_tx);
    let report = scheduler.run(&graph, runner).await?;
    // close the event channel so the UI task drains and exits
    drop(scheduler);
    ui_task.await.ok();

    println!();
    for feature in &report.features {
        println!("  {:<24} {}", feature.id, feature.status.label());
    }
    println!(
        "\n{} completed, {} failed, {} blocked, {} awaiting resolution",
        report.count("completed"),
        report.count("failed"),
        report.count("blocked"),
        report.count("awaiting-resolution"),
    );
    if report.timed_out {
        println!("{}", style("run deadline exceeded").red().bold());
    }

    if !report.all_completed() {
        anyhow::bail!("run finished with unfinished features");
    }
    Ok(())
}
