// ============================================================================
// LOGGING & TRACING
// ============================================================================
// Structured logging through `tracing`. The subscriber format is chosen by
// `LoggingConfig`; `RUST_LOG` directives take precedence over the configured
// level.
// ============================================================================

use std::time::Instant;

use tracing::level_filters::LevelFilter;
use tracing::{info, trace, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{AgentError, AgentResult};

fn level_filter(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" | "warning" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        "off" => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> AgentResult<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter(&config.level).into())
        .from_env_lossy();

    let installed = match config.format.as_str() {
        "json" => {
            let subscriber = tracing_subscriber::registry().with(env_filter).with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_file(config.source_location)
                    .with_line_number(config.source_location)
                    .with_thread_names(true),
            );
            tracing::subscriber::set_global_default(subscriber)
        }
        "compact" => {
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().compact().with_ansi(config.colors).with_target(true));
            tracing::subscriber::set_global_default(subscriber)
        }
        _ => {
            let subscriber = tracing_subscriber::registry().with(env_filter).with(
                fmt::layer()
                    .pretty()
                    .with_ansi(config.colors)
                    .with_target(true)
                    .with_file(config.source_location)
                    .with_line_number(config.source_location),
            );
            tracing::subscriber::set_global_default(subscriber)
        }
    };
    installed.map_err(|e| AgentError::Internal(format!("Failed to set logger: {e}")))?;

    info!(
        target: "procfs_agent::init",
        level = %config.level,
        format = %config.format,
        "Logging initialized"
    );
    Ok(())
}

// ----------------------------------------------------------------------------
// Performance Timer
// ----------------------------------------------------------------------------

/// Measures one operation and warns when it runs past its threshold.
#[derive(Debug)]
pub struct PerfTimer {
    name: &'static str,
    start: Instant,
    threshold_ms: Option<u64>,
}

impl PerfTimer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
            threshold_ms: None,
        }
    }

    pub fn with_threshold(name: &'static str, threshold_ms: u64) -> Self {
        Self {
            name,
            start: Instant::now(),
            threshold_ms: Some(threshold_ms),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Stop the timer, returning the elapsed milliseconds.
    pub fn stop(self) -> u64 {
        let elapsed = self.elapsed_ms();
        match self.threshold_ms {
            Some(threshold) if elapsed > threshold => warn!(
                target: "procfs_agent::perf",
                operation = self.name,
                elapsed_ms = elapsed,
                threshold_ms = threshold,
                "Operation exceeded threshold"
            ),
            _ => trace!(
                target: "procfs_agent::perf",
                operation = self.name,
                elapsed_ms = elapsed,
                "Operation completed"
            ),
        }
        elapsed
    }
}
