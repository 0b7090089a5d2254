//! Live progress line on stderr.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use pbisect_bisect::Stats;

pub struct Progress {
    bar: ProgressBar,
}

impl Progress {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
            .template("{spinner:.cyan} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(80));
        bar.set_message("starting");
        Self { bar }
    }

    /// Callback updating the line from search statistics.
    pub fn sink(&self) -> impl Fn(Stats) + Send + Sync + 'static {
        let bar = self.bar.clone();
        move |stats| bar.set_message(format_stats(&stats))
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

pub fn format_stats(stats: &Stats) -> String {
    format!(
        "pending {} | left {} | total {} | candidates {}",
        stats.pending, stats.left, stats.total, stats.width
    )
}
