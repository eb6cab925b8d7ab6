//! Logging helpers
//!
//! Console output goes through `tracing`; the run-log file gets a banner
//! header so interrupted runs are easy to tell apart when tailing it.

use anyhow::Result;
use std::fs;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` overrides the level
/// picked from the verbose flag.
pub fn init(verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose))),
        )
        .with_target(false)
        .init();
}

fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}

/// Start a fresh run-log file with a timestamped banner.
pub fn init_log_file(log_file_path: &str) -> Result<()> {
    let log_header = format!(
        "{}\nfiling extraction log - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)?;
    Ok(())
}

/// Truncate long text for log display.
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_only_when_over_limit() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("a longer sentence", 8), "a longer...");
    }

    #[test]
    fn verbose_flag_raises_the_default_level() {
        assert_eq!(default_directives(false), "info");
        assert_eq!(default_directives(true), "debug");
    }
}
