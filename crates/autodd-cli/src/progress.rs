//! Progress display for duplication runs

use autodd_core::{format_speed, BenchmarkEvent, CandidateOutcome, IterationState, RunEvent};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner and per-candidate lines driven by [`RunEvent`]s
pub struct RunProgress {
    bar: ProgressBar,
    iterations: u32,
}

impl RunProgress {
    /// Create a progress display; a hidden one swallows every event
    pub fn new(iterations: u32, hidden: bool) -> Self {
        let bar = if hidden {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::default_spinner()
                    .template("  {spinner:.cyan} {msg} [{elapsed_precise}]")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        };
        Self { bar, iterations }
    }

    /// Update the display for one event
    pub fn handle(&self, event: &RunEvent) {
        match event {
            RunEvent::State { iteration, state } => {
                if *state == IterationState::ResolveDevice && self.iterations > 1 {
                    self.bar.println(format!(
                        "{} Iteration {}/{}",
                        style("▶").cyan(),
                        iteration,
                        self.iterations
                    ));
                }
                self.bar.set_message(state.to_string());
            }
            RunEvent::Benchmark(BenchmarkEvent::Started {
                index,
                total,
                candidate,
            }) => {
                self.bar
                    .set_message(format!("block size {candidate} ({}/{total})", index + 1));
            }
            RunEvent::Benchmark(BenchmarkEvent::Finished { outcome, .. }) => {
                self.bar.println(outcome_line(outcome));
            }
        }
    }

    /// Remove the spinner
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// One line describing a candidate outcome
pub fn outcome_line(outcome: &CandidateOutcome) -> String {
    match outcome {
        CandidateOutcome::Measured(result) => format!(
            "    {} {:>8}: {}",
            style("✓").green(),
            result.candidate.to_string(),
            format_speed(result.throughput_bytes_per_sec)
        ),
        CandidateOutcome::Failed { candidate, reason } => format!(
            "    {} {:>8}: Failed - {}",
            style("✗").red(),
            candidate.to_string(),
            reason
        ),
        CandidateOutcome::Skipped { candidate, reason } => format!(
            "    {} {:>8}: Skipped - {}",
            style("-").dim(),
            candidate.to_string(),
            reason
        ),
    }
}
