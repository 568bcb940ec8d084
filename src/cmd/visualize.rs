use anyhow::Result;
use console::style;
use std::path::{Path, PathBuf};
use trellis::scheduler::Scheduler;

/// Print the graph as an indented tree plus its dispatch waves.
pub fn execute(project_dir: &Path, graph_file: Option<&PathBuf>) -> Result<()> {
    let file = super::load_graph_file(project_dir, graph_file)?;
    let (graph, _) = file.into_parts();

    println!("{}", style(&graph.name).bold());
    for layer in &graph.layers {
        let deps = if layer.depends_on.is_empty() {
            String::new()
        } else {
            format!(" (after {})", layer.depends_on.join(", "))
        };
        println!("  {} {}{deps}", style(&layer.id).cyan(), layer.name);
        for feature in &layer.features {
            let deps = if feature.depends_on.is_empty() {
                String::new()
            } else {
                format!(" <- {}", feature.depends_on.join(", "))
            };
            println!("    {}{}", feature.id, style(deps).dim());
        }
    }

    let waves = Scheduler::plan(&graph)?;
    println!("\n{}", style("dispatch waves").bold());
    for (i, wave) in waves.iter().enumerate() {
        println!("  {i}: {}", wave.join(", "));
    }
    Ok(())
}
