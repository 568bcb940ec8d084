//! Per-feature execution logs.
//!
//! One append-only file per feature, capped at `max_size` bytes. When an
//! append would exceed the cap, the oldest content is discarded and only the
//! newest half of the cap is retained, so the tail of a noisy runner is
//! always available. Independent of the execution state store.

use crate::util::sanitize_component;
use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const TRUNCATION_MARKER: &str = "--- log truncated, oldest content dropped ---\n";

#[derive(Debug)]
pub struct LogManager {
    log_dir: PathBuf,
    max_size: u64,
}

impl LogManager {
    /// Open (creating if needed) the log directory.
    pub fn open(log_dir: &Path, max_size: u64) -> Result<Self> {
        fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log dir {}", log_dir.display()))?;
        Ok(Self {
            log_dir: log_dir.to_path_buf(),
            max_size,
        })
    }

    pub fn path_for(&self, feature: &str) -> PathBuf {
        self.log_dir
            .join(format!("{}.log", sanitize_component(feature)))
    }

    /// Append bytes to a feature's log, enforcing the size cap.
    pub fn append(&self, feature: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(feature);
        let current = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

        if current + bytes.len() as u64 > self.max_size {
            self.truncate_oldest(&path, bytes.len() as u64)?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;

        // A single append larger than the cap keeps only its own tail.
        let keep_from = bytes
            .len()
            .saturating_sub(self.max_size.max(1) as usize);
        file.write_all(&bytes[keep_from..])
            .with_context(|| format!("Failed to append to log file {}", path.display()))?;
        Ok(())
    }

    /// Drop the oldest content so `incoming` more bytes fit under the cap,
    /// retaining at most half the cap of the newest existing content.
    fn truncate_oldest(&self, path: &Path, incoming: u64) -> Result<()> {
        let existing = match fs::read(path) {
            Ok(data) => data,
            Err(_) => return Ok(()),
        };

        let budget = self.max_size.saturating_sub(incoming).min(self.max_size / 2) as usize;
        let mut keep_from = existing.len().saturating_sub(budget);
        // align to the next line boundary so the tail starts cleanly
        if keep_from > 0 {
            if let Some(pos) = existing[keep_from..].iter().position(|&b| b == b'\n') {
                keep_from += pos + 1;
            }
        }

        let mut rewritten = Vec::with_capacity(TRUNCATION_MARKER.len() + existing.len() - keep_from);
        rewritten.extend_from_slice(TRUNCATION_MARKER.as_bytes());
        rewritten.extend_from_slice(&existing[keep_from..]);
        fs::write(path, rewritten)
            .with_context(|| format!("Failed to rewrite log file {}", path.display()))?;
        Ok(())
    }

    /// Read a feature's captured log.
    pub fn read(&self, feature: &str) -> Result<String> {
        let path = self.path_for(feature);
        fs::read_to_string(&path)
            .with_context(|| format!("No log captured for feature '{feature}'"))
    }
}
