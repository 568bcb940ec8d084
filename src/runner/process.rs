//! Process-backed phase runner.
//!
//! Spawns the configured agent command once per (feature, phase) with the
//! feature description on stdin and the worktree as working directory, and
//! streams stdout into the log manager. Completed task units are reported by
//! the agent as `<unit>ID</unit>` markers in its output.
//!
//! Cancellation is cooperative: stdin is closed at spawn time, so the stop
//! signal is a bounded grace period after cancellation fires, then a kill.
//! The grace period lets the agent flush in-flight state writes.

use crate::errors::PhaseError;
use crate::logs::LogManager;
use crate::runner::{CancelToken, ConflictRequest, PhaseOutput, PhaseRequest, PhaseRunner};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

const DEFAULT_GRACE: Duration = Duration::from_secs(10);

pub struct ProcessRunner {
    cmd: String,
    logs: Arc<LogManager>,
    grace: Duration,
}

impl ProcessRunner {
    pub fn new(cmd: &str, logs: Arc<LogManager>) -> Self {
        Self {
            cmd: cmd.to_string(),
            logs,
            grace: DEFAULT_GRACE,
        }
    }

    /// Override the cancellation grace period.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    fn build_phase_prompt(request: &PhaseRequest) -> String {
        let mut prompt = format!(
            "## FEATURE\n{}: {}\n\n## PHASE\nExecute the '{}' phase for this feature.\n",
            request.feature_id, request.description, request.phase
        );
        if !request.completed_units.is_empty() {
            prompt.push_str("\n## ALREADY COMPLETED UNITS\nSkip these units; they are done:\n");
            for unit in &request.completed_units {
                prompt.push_str(&format!("- {unit}\n"));
            }
        }
        prompt.push_str(
            "\nReport each completed unit of work as <unit>ID</unit> on its own line.\n",
        );
        prompt
    }

    fn build_conflict_prompt(request: &ConflictRequest) -> String {
        let mut prompt = format!(
            "## MERGE CONFLICT\nMerging feature '{}' into '{}' conflicted.\n\
             Resolve the conflicts so the branch merges cleanly, then commit.\n\n\
             ## CONFLICTING PATHS\n",
            request.feature_id, request.base_branch
        );
        for path in &request.paths {
            prompt.push_str(&format!("- {path}\n"));
        }
        prompt
    }

    async fn spawn_and_drive(
        &self,
        feature_id: &str,
        phase: &str,
        prompt: &str,
        cwd: &std::path::Path,
        mut cancel: CancelToken,
    ) -> Result<Vec<String>, PhaseError> {
        let mut parts = self.cmd.split_whitespace();
        let program = parts.next().unwrap_or("claude");
        let mut command = Command::new(program);
        command
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(cwd);

        let mut child = command.spawn().map_err(PhaseError::SpawnFailed)?;
        debug!(feature = feature_id, phase, pid = child.id(), "runner spawned");

        if let Some(mut stdin) = child.stdin.take() {
            // the runner may exit before consuming the prompt; that is its call
            let _ = stdin.write_all(prompt.as_bytes()).await;
            let _ = stdin.shutdown().await;
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PhaseError::Other(anyhow::anyhow!("runner stdout unavailable")))?;

        let logs = Arc::clone(&self.logs);
        let feature = feature_id.to_string();
        let reader = tokio::spawn(async move {
            let mut units = Vec::new();
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                scan_unit_markers(&line, &mut units);
                let _ = logs.append(&feature, format!("{line}\n").as_bytes());
            }
            units
        });

        let waited = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };
        let Some(status) = waited else {
            warn!(feature = feature_id, phase, "cancellation requested, waiting for runner to exit");
            self.stop_gracefully(&mut child).await;
            reader.abort();
            return Err(PhaseError::Cancelled {
                phase: phase.to_string(),
            });
        };
        let status = status.map_err(|e| PhaseError::Other(e.into()))?;

        let units = reader.await.unwrap_or_default();

        if status.success() {
            Ok(units)
        } else {
            Err(PhaseError::AttemptFailed {
                phase: phase.to_string(),
                attempt: 0,
                message: format!(
                    "runner exited with code {}",
                    status.code().unwrap_or(-1)
                ),
            })
        }
    }

    /// Wait out the grace period, then kill whatever is still running.
    async fn stop_gracefully(&self, child: &mut Child) {
        if tokio::time::timeout(self.grace, child.wait()).await.is_err() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

#[async_trait]
impl PhaseRunner for ProcessRunner {
    async fn run_phase(
        &self,
        request: &PhaseRequest,
        cancel: CancelToken,
    ) -> Result<PhaseOutput, PhaseError> {
        let prompt = Self::build_phase_prompt(request);
        let units = self
            .spawn_and_drive(
                &request.feature_id,
                &request.phase,
                &prompt,
                &request.worktree_path,
                cancel,
            )
            .await
            .map_err(|e| match e {
                PhaseError::AttemptFailed { phase, message, .. } => PhaseError::AttemptFailed {
                    phase,
                    attempt: request.attempt,
                    message,
                },
                other => other,
            })?;
        Ok(PhaseOutput {
            completed_units: units,
        })
    }

    async fn resolve_conflicts(
        &self,
        request: &ConflictRequest,
        cancel: CancelToken,
    ) -> Result<(), PhaseError> {
        let prompt = Self::build_conflict_prompt(request);
        self.spawn_and_drive(
            &request.feature_id,
            "resolve-conflicts",
            &prompt,
            &request.worktree_path,
            cancel,
        )
        .await
        .map(|_| ())
    }
}

/// Collect the ids of every `<unit>ID</unit>` marker in a line.
fn scan_unit_markers(line: &str, out: &mut Vec<String>) {
    const OPEN: &str = "<unit>";
    const CLOSE: &str = "</unit>";
    let mut rest = line;
    while let Some(start) = rest.find(OPEN) {
        let after = &rest[start + OPEN.len()..];
        let Some(end) = after.find(CLOSE) else { break };
        let id = after[..end].trim();
        if !id.is_empty() {
            out.push(id.to_string());
        }
        rest = &after[end + CLOSE.len()..];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn scan_finds_single_marker() {
        let mut units = Vec::new();
        scan_unit_markers("done with <unit>t1</unit> today", &mut units);
        assert_eq!(units, vec!["t1"]);
    }

    #[test]
    fn scan_finds_multiple_markers_on_one_line() {
        let mut units = Vec::new();
        scan_unit_markers("<unit>a</unit><unit>b</unit>", &mut units);
        assert_eq!(units, vec!["a", "b"]);
    }

    #[test]
    fn scan_ignores_unclosed_and_empty_markers() {
        let mut units = Vec::new();
        scan_unit_markers("<unit>dangling", &mut units);
        scan_unit_markers("<unit> </unit>", &mut units);
        assert!(units.is_empty());
    }

    #[test]
    fn phase_prompt_lists_completed_units() {
        let request = PhaseRequest {
            feature_id: "api".into(),
            description: "Build the API".into(),
            phase: "implement".into(),
            attempt: 1,
            worktree_path: "/tmp/wt".into(),
            completed_units: vec!["t1".into(), "t2".into()],
        };
        let prompt = ProcessRunner::build_phase_prompt(&request);
        assert!(prompt.contains("'implement' phase"));
        assert!(prompt.contains("- t1"));
        assert!(prompt.contains("- t2"));
        assert!(prompt.contains("<unit>ID</unit>"));
    }

    #[test]
    fn conflict_prompt_lists_paths() {
        let request = ConflictRequest {
            feature_id: "api".into(),
            worktree_path: "/tmp/wt".into(),
            base_branch: "main".into(),
            paths: vec!["src/lib.rs".into()],
        };
        let prompt = ProcessRunner::build_conflict_prompt(&request);
        assert!(prompt.contains("src/lib.rs"));
        assert!(prompt.contains("main"));
    }

    #[tokio::test]
    async fn runner_captures_output_and_units() {
        let dir = tempdir().unwrap();
        let logs = Arc::new(LogManager::open(&dir.path().join("logs"), 65536).unwrap());
        let script = dir.path().join("runner.sh");
        std::fs::write(&script, "#!/bin/sh\ncat >/dev/null\necho '<unit>t1</unit>'\n").unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let runner = ProcessRunner::new(script.to_str().unwrap(), logs.clone());
        let request = PhaseRequest {
            feature_id: "api".into(),
            description: "Build the API".into(),
            phase: "implement".into(),
            attempt: 1,
            worktree_path: dir.path().to_path_buf(),
            completed_units: Vec::new(),
        };
        let output = runner
            .run_phase(&request, CancelToken::never())
            .await
            .unwrap();
        assert_eq!(output.completed_units, vec!["t1"]);
        assert!(logs.read("api").unwrap().contains("<unit>t1</unit>"));
    }

    #[tokio::test]
    async fn runner_failure_surfaces_exit_code() {
        let dir = tempdir().unwrap();
        let logs = Arc::new(LogManager::open(&dir.path().join("logs"), 65536).unwrap());
        let runner = ProcessRunner::new("false", logs);
        let request = PhaseRequest {
            feature_id: "api".into(),
            description: "Build the API".into(),
            phase: "implement".into(),
            attempt: 2,
            worktree_path: dir.path().to_path_buf(),
            completed_units: Vec::new(),
        };
        let err = runner
            .run_phase(&request, CancelToken::never())
            .await
            .unwrap_err();
        match err {
            PhaseError::AttemptFailed { attempt, .. } => assert_eq!(attempt, 2),
            other => panic!("expected AttemptFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_running_phase() {
        let dir = tempdir().unwrap();
        let logs = Arc::new(LogManager::open(&dir.path().join("logs"), 65536).unwrap());
        let runner = ProcessRunner::new("sleep 30", logs)
            .with_grace(Duration::from_millis(50));
        let request = PhaseRequest {
            feature_id: "api".into(),
            description: "Build the API".into(),
            phase: "implement".into(),
            attempt: 1,
            worktree_path: dir.path().to_path_buf(),
            completed_units: Vec::new(),
        };

        let (trigger, token) = CancelToken::new();
        let handle = tokio::spawn(async move { runner.run_phase(&request, token).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, PhaseError::Cancelled { .. }));
    }
}
