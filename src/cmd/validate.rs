use anyhow::Result;
use console::style;
use std::path::{Path, PathBuf};
use trellis::graph::validate;

/// Parse and validate the graph document. Warnings print but do not fail;
/// any error makes the command fail.
pub fn execute(project_dir: &Path, graph_file: Option<&PathBuf>) -> Result<()> {
    let file = super::load_graph_file(project_dir, graph_file)?;
    let (graph, _) = file.into_parts();

    let report = validate(&graph);

    for warning in report.warnings() {
        println!("{} {warning}", style("warning:").yellow().bold());
    }
    for error in report.errors() {
        println!("{} {error}", style("error:").red().bold());
    }

    if report.has_errors() {
        anyhow::bail!(
            "graph '{}' failed validation with {} error(s)",
            graph.name,
            report.error_count()
        );
    }

    println!(
        "{} graph '{}' is valid ({} features in {} layers)",
        style("ok:").green().bold(),
        graph.name,
        graph.feature_count(),
        graph.layers.len()
    );
    Ok(())
}
