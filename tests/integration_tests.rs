//! Integration tests for the trellis CLI.
//!
//! These drive the binary end to end: validation, visualization, dry-run
//! planning, and a full run against a real repository with a stub runner.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use git2::{Repository, RepositoryInitOptions, Signature};
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn trellis() -> Command {
    cargo_bin_cmd!("trellis")
}

fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

fn init_repo(dir: &Path) {
    let mut opts = RepositoryInitOptions::new();
    opts.initial_head("main");
    let repo = Repository::init_opts(dir, &opts).unwrap();
    std::fs::write(dir.join("README.md"), "hello\n").unwrap();
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let sig = Signature::now("test", "test@test.com").unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
        .unwrap();
}

fn write_graph(dir: &Path, body: &str) {
    std::fs::write(dir.join("trellis.yaml"), body).unwrap();
}

const VALID_GRAPH: &str = r#"
schema_version: 1
dag:
  name: demo
layers:
  - id: l0
    name: Foundations
    features:
      - id: core
        description: Core schema
  - id: l1
    name: Services
    depends_on: [l0]
    features:
      - id: api
        description: API service
        depends_on: [core]
"#;

// =============================================================================
// Basic CLI
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        trellis().arg("--help").assert().success();
    }

    #[test]
    fn test_version() {
        trellis().arg("--version").assert().success();
    }

    #[test]
    fn test_missing_graph_document_fails() {
        let dir = create_temp_project();
        trellis()
            .current_dir(dir.path())
            .arg("validate")
            .assert()
            .failure()
            .stderr(predicate::str::contains("trellis.yaml"));
    }
}

// =============================================================================
// validate
// =============================================================================

mod validate {
    use super::*;

    #[test]
    fn test_valid_graph_passes() {
        let dir = create_temp_project();
        write_graph(dir.path(), VALID_GRAPH);

        trellis()
            .current_dir(dir.path())
            .arg("validate")
            .assert()
            .success()
            .stdout(predicate::str::contains("is valid"))
            .stdout(predicate::str::contains("2 features"));
    }

    #[test]
    fn test_cycle_fails_validation() {
        let dir = create_temp_project();
        write_graph(
            dir.path(),
            r#"
schema_version: 1
dag:
  name: cyclic
layers:
  - id: l0
    name: All
    features:
      - id: a
        description: A
        depends_on: [b]
      - id: b
        description: B
        depends_on: [a]
"#,
        );

        trellis()
            .current_dir(dir.path())
            .arg("validate")
            .assert()
            .failure()
            .stdout(predicate::str::contains("cycle"));
    }

    #[test]
    fn test_unknown_dependency_fails_validation() {
        let dir = create_temp_project();
        write_graph(
            dir.path(),
            r#"
schema_version: 1
dag:
  name: dangling
layers:
  - id: l0
    name: All
    features:
      - id: a
        description: A
        depends_on: [ghost]
"#,
        );

        trellis()
            .current_dir(dir.path())
            .arg("validate")
            .assert()
            .failure()
            .stdout(predicate::str::contains("ghost"));
    }

    #[test]
    fn test_layer_ordering_warning_is_not_fatal() {
        let dir = create_temp_project();
        // cross-layer dependency without a matching layer declaration
        write_graph(
            dir.path(),
            r#"
schema_version: 1
dag:
  name: warned
layers:
  - id: l0
    name: First
    features:
      - id: core
        description: Core
  - id: l1
    name: Second
    features:
      - id: api
        description: API
        depends_on: [core]
"#,
        );

        trellis()
            .current_dir(dir.path())
            .arg("validate")
            .assert()
            .success()
            .stdout(predicate::str::contains("warning:"));
    }
}

// =============================================================================
// visualize / dry run
// =============================================================================

mod planning {
    use super::*;

    #[test]
    fn test_visualize_prints_layers_and_waves() {
        let dir = create_temp_project();
        write_graph(dir.path(), VALID_GRAPH);

        trellis()
            .current_dir(dir.path())
            .arg("visualize")
            .assert()
            .success()
            .stdout(predicate::str::contains("Foundations"))
            .stdout(predicate::str::contains("dispatch waves"))
            .stdout(predicate::str::contains("0: core"));
    }

    #[test]
    fn test_run_dry_run_prints_waves_without_executing() {
        let dir = create_temp_project();
        write_graph(dir.path(), VALID_GRAPH);

        trellis()
            .current_dir(dir.path())
            .args(["run", "--dry-run"])
            .assert()
            .success()
            .stdout(predicate::str::contains("wave 0: core"))
            .stdout(predicate::str::contains("wave 1: api"));

        // no state or worktrees were created
        assert!(!dir.path().join(".trellis/state").exists());
        assert!(!dir.path().join(".trellis/worktrees").exists());
    }
}

// =============================================================================
// run
// =============================================================================

mod run {
    use super::*;

    fn write_stub_runner(dir: &Path) -> String {
        let script = dir.join("stub-runner.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\ncat > /dev/null\necho \"phase done <unit>t1</unit>\"\n",
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        script.to_str().unwrap().to_string()
    }

    #[test]
    fn test_full_run_completes_and_captures_logs() {
        let dir = create_temp_project();
        init_repo(dir.path());
        let runner = write_stub_runner(dir.path());

        write_graph(
            dir.path(),
            &format!(
                r#"
schema_version: 1
dag:
  name: demo
execution:
  max_parallel: 2
  workflow: [implement]
  runner_cmd: {runner}
layers:
  - id: l0
    name: All
    features:
      - id: core
        description: Core schema
      - id: api
        description: API service
        depends_on: [core]
"#
            ),
        );

        trellis()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .success()
            .stdout(predicate::str::contains("2 completed"));

        // both features' phases wrote logs
        trellis()
            .current_dir(dir.path())
            .args(["logs", "core"])
            .assert()
            .success()
            .stdout(predicate::str::contains("<unit>t1</unit>"));

        // the run report was persisted
        let runs: Vec<_> = std::fs::read_dir(dir.path().join(".trellis/runs"))
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(runs.len(), 1);
    }

    #[test]
    fn test_run_without_repository_fails() {
        let dir = create_temp_project();
        let runner = write_stub_runner(dir.path());
        write_graph(
            dir.path(),
            &format!(
                r#"
schema_version: 1
dag:
  name: demo
execution:
  workflow: [implement]
  runner_cmd: {runner}
layers:
  - id: l0
    name: All
    features:
      - id: core
        description: Core schema
"#
            ),
        );

        trellis()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .failure();
    }

    #[test]
    fn test_failing_runner_fails_the_run() {
        let dir = create_temp_project();
        init_repo(dir.path());
        write_graph(
            dir.path(),
            r#"
schema_version: 1
dag:
  name: demo
execution:
  workflow: [implement]
  runner_cmd: "false"
  max_retries: 0
layers:
  - id: l0
    name: All
    features:
      - id: core
        description: Core schema
"#,
        );

        trellis()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .failure()
            .stdout(predicate::str::contains("1 failed"));
    }
}

// =============================================================================
// logs
// =============================================================================

mod logs {
    use super::*;

    #[test]
    fn test_logs_for_unknown_feature_fails() {
        let dir = create_temp_project();
        write_graph(dir.path(), VALID_GRAPH);

        trellis()
            .current_dir(dir.path())
            .args(["logs", "ghost"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("ghost"));
    }
}
