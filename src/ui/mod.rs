//! Terminal rendering of run progress, via `indicatif` progress bars.
//!
//! One overall bar tracks terminal features; each running feature gets its
//! own spinner line that is finished with a status glyph when the feature
//! reaches a terminal state.

use crate::scheduler::FeatureEvent;
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::time::Duration;

pub struct RunUi {
    multi: MultiProgress,
    overall: ProgressBar,
    spinners: HashMap<String, ProgressBar>,
}

impl RunUi {
    pub fn new(total_features: u64) -> Self {
        let multi = MultiProgress::new();

        let overall_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");
        let overall = multi.add(ProgressBar::new(total_features));
        overall.set_style(overall_style);
        overall.set_prefix("Features");

        Self {
            multi,
            overall,
            spinners: HashMap::new(),
        }
    }

    fn spinner_for(&mut self, feature: &str) -> &ProgressBar {
        let multi = &self.multi;
        self.spinners.entry(feature.to_string()).or_insert_with(|| {
            let style = ProgressStyle::default_spinner()
                .template("  {spinner} {msg}")
                .expect("progress bar template is a valid static string");
            let bar = multi.add(ProgressBar::new_spinner());
            bar.set_style(style);
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        })
    }

    fn finish_feature(&mut self, feature: &str, line: String) {
        if let Some(bar) = self.spinners.remove(feature) {
            bar.finish_and_clear();
        }
        if self.multi.println(&line).is_err() {
            eprintln!("{line}");
        }
        self.overall.inc(1);
    }

    /// Apply one scheduler event to the display.
    pub fn handle(&mut self, event: &FeatureEvent) {
        match event {
            FeatureEvent::Started { feature } => {
                let msg = format!("{} starting", style(feature).cyan());
                self.spinner_for(feature).set_message(msg);
            }
            FeatureEvent::PhaseStarted {
                feature,
                phase,
                attempt,
            } => {
                let msg = if *attempt > 1 {
                    format!(
                        "{} {} (attempt {})",
                        style(feature).cyan(),
                        phase,
                        attempt
                    )
                } else {
                    format!("{} {}", style(feature).cyan(), phase)
                };
                self.spinner_for(feature).set_message(msg);
            }
            FeatureEvent::PhaseCompleted { feature, phase } => {
                let msg = format!("{} {} done", style(feature).cyan(), phase);
                self.spinner_for(feature).set_message(msg);
            }
            FeatureEvent::Completed { feature } => {
                self.finish_feature(feature, format!("{} {feature}", style("✓").green()));
            }
            FeatureEvent::Failed { feature, error } => {
                self.finish_feature(
                    feature,
                    format!("{} {feature}: {error}", style("✗").red()),
                );
            }
            FeatureEvent::Blocked {
                feature,
                failed_dependency,
            } => {
                self.finish_feature(
                    feature,
                    format!(
                        "{} {feature} blocked by {failed_dependency}",
                        style("⊘").yellow()
                    ),
                );
            }
            FeatureEvent::AwaitingResolution { feature, paths } => {
                self.finish_feature(
                    feature,
                    format!(
                        "{} {feature} awaiting conflict resolution ({} file(s))",
                        style("⚠").yellow(),
                        paths.len()
                    ),
                );
            }
            FeatureEvent::RunCompleted { completed, failed } => {
                self.overall.finish_with_message(format!(
                    "{completed} completed, {failed} failed"
                ));
            }
        }
    }
}
