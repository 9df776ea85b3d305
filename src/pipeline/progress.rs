//! Progress reporting for backfill runs
//!
//! A single spinner using the `indicatif` crate. Hidden unless the run
//! asks for it, so library callers and tests stay quiet.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Spinner showing pages, published records and failures
pub struct BackfillProgress {
    bar: ProgressBar,
}

impl BackfillProgress {
    /// Create a progress reporter; hidden when `enabled` is false
    pub fn new(enabled: bool) -> Self {
        if !enabled {
            return Self::hidden();
        }

        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}") {
            bar.set_style(style);
        }
        bar.set_message("Starting backfill");
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Reporter that draws nothing
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    /// Update the running totals
    pub fn update(&self, pages: u64, published: u64, failures: u64) {
        self.bar.set_message(format!(
            "Pages: {} | Records: {} | Failures: {}",
            format_number(pages),
            format_number(published),
            format_number(failures)
        ));
    }

    /// Report a warning above the spinner
    pub fn warn(&self, msg: &str) {
        self.bar.println(format!("  ⚠ Warning: {msg}"));
    }

    /// Finish with success message
    pub fn finish_success(&self, msg: &str) {
        self.bar.finish_with_message(format!("✓ {msg}"));
    }

    /// Finish with error message
    pub fn finish_error(&self, msg: &str) {
        self.bar.abandon_with_message(format!("✗ {msg}"));
    }
}

/// Format a number with thousand separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}
