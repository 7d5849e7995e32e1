//! Diagnostic logging setup
//!
//! Logs go to stderr through `tracing-subscriber` so that reports on stdout
//! stay machine-readable. `RUST_LOG` takes precedence over the level derived
//! from the command line verbosity.

use tracing_subscriber::EnvFilter;

use crate::cli::VerbosityLevel;
use crate::error::{Result, ValidationError};

/// Default filter directive for a verbosity level
pub fn level_for(verbosity: VerbosityLevel) -> &'static str {
    match verbosity {
        VerbosityLevel::Quiet => "error",
        VerbosityLevel::Normal => "warn",
        VerbosityLevel::Verbose => "info",
        VerbosityLevel::Debug => "debug",
    }
}

fn create_env_filter(verbosity: VerbosityLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_for(verbosity)))
}

/// Install the global subscriber
///
/// Fails when a global subscriber is already set.
pub fn init_logging(verbosity: VerbosityLevel) -> Result<()> {
    let debug = verbosity == VerbosityLevel::Debug;

    tracing_subscriber::fmt()
        .with_env_filter(create_env_filter(verbosity))
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .with_target(debug)
        .with_thread_ids(debug)
        .with_line_number(debug)
        .compact()
        .try_init()
        .map_err(|e| ValidationError::Config(format!("Failed to initialize logging: {}", e)))?;

    tracing::debug!(level = level_for(verbosity), "logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_for_verbosity() {
        assert_eq!(level_for(VerbosityLevel::Quiet), "error");
        assert_eq!(level_for(VerbosityLevel::Normal), "warn");
        assert_eq!(level_for(VerbosityLevel::Verbose), "info");
        assert_eq!(level_for(VerbosityLevel::Debug), "debug");
    }

    #[test]
    fn test_second_init_fails() {
        // Whichever call comes first in this process wins.
        let _ = init_logging(VerbosityLevel::Normal);
        assert!(matches!(
            init_logging(VerbosityLevel::Debug),
            Err(ValidationError::Config(_))
        ));
    }
}
