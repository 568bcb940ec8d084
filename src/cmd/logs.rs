use anyhow::Result;
use std::path::{Path, PathBuf};
use trellis::config::{CliOverrides, ExecutionConfig, TrellisToml};
use trellis::logs::LogManager;

/// Print the captured log for one feature.
pub fn execute(
    project_dir: &Path,
    graph_file: Option<&PathBuf>,
    feature_id: &str,
) -> Result<()> {
    // the log directory may be overridden by the graph document
    let execution = super::load_graph_file(project_dir, graph_file)
        .map(|file| file.into_parts().1)
        .unwrap_or_default();
    let toml = TrellisToml::load_or_default(&project_dir.join(".trellis"))?;
    let config =
        ExecutionConfig::resolve(project_dir, &toml, &execution, &CliOverrides::default());

    let logs = LogManager::open(&config.log_dir, config.max_log_size)?;
    print!("{}", logs.read(feature_id)?);
    Ok(())
}
