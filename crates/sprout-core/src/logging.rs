//! Logging setup
//!
//! Installs a `tracing` fmt subscriber for the embedding application. The
//! filter comes from the configured log level (`SPROUT_LOG` overrides it) and
//! output goes to the configured log file, or stderr when there is none.

use std::fs::OpenOptions;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Level used when nothing is configured
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Filter for a configured directive
///
/// A bare level applies to this crate only; anything else is used as a full
/// `EnvFilter` directive.
pub fn build_filter(level: Option<&str>) -> EnvFilter {
    let level = level
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .unwrap_or(DEFAULT_LOG_LEVEL);

    if level.contains('=') || level.contains(',') {
        EnvFilter::new(level)
    } else {
        EnvFilter::new(format!("sprout_core={}", level))
    }
}

/// Initialize logging (a no-op if a subscriber is already installed)
pub fn init_logging(config: &Config) -> Result<()> {
    let filter = build_filter(config.log_level.as_deref());

    // Ignore error if already initialized
    match &config.log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory {:?}", parent))?;
            }
            let log_file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {:?}", path))?;

            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(log_file)
                .try_init();

            info!("Logging initialized to {:?}", path);
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_bare_level_is_scoped_to_crate() {
        let rendered = |level| build_filter(level).to_string().to_lowercase();
        assert_eq!(rendered(Some("debug")), "sprout_core=debug");
        assert_eq!(rendered(None), "sprout_core=info");
        assert_eq!(rendered(Some("  ")), "sprout_core=info");
    }

    #[test]
    fn test_full_directive_passes_through() {
        let filter = build_filter(Some("sprout_core=trace,warn"));
        let rendered = filter.to_string().to_lowercase();
        assert!(rendered.contains("sprout_core=trace"));
        assert!(rendered.contains("warn"));
    }

    #[test]
    fn test_init_creates_log_file() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::with_data_dir(temp_dir.path());
        let log_path = temp_dir.path().join("logs").join("sprout.log");
        config.log_file = Some(log_path.clone());

        init_logging(&config).unwrap();
        // A second call is harmless
        init_logging(&config).unwrap();
        assert!(log_path.exists());
    }
}
