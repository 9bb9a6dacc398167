// ============================================================================
// procfs-agent - command line entry point
// ============================================================================

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result as AnyhowResult};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use procfs_agent::config::AgentConfig;
use procfs_agent::logging::init_logging;
use procfs_agent::pattern::WildcardPattern;
use procfs_agent::{Engine, MetricRegistry, Sampler, AGENT_FULL_NAME, AGENT_VERSION};

// ----------------------------------------------------------------------------
// CLI Argument Parser
// ----------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "procfs-agent",
    author = "AIOps Team",
    version,
    about = "Host-local procfs sampling and windowed aggregation agent",
    long_about = "Periodically samples CPU, memory, network and disk counters from procfs, \
                  folds them into per-metric running statistics and rotates them into \
                  queryable windows."
)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "procfs-agent.toml", env = "PROCFS_AGENT_CONFIG")]
    config: PathBuf,

    /// Log level override
    #[arg(short, long, env = "PROCFS_AGENT_LOG_LEVEL")]
    log_level: Option<String>,

    /// Shorthand for --log-level debug
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the agent (default)
    Run,

    /// Take samples and print the last one as JSON
    Sample {
        /// Number of cycles; CPU utilisation needs at least two
        #[arg(short = 'n', long, default_value_t = 2)]
        count: u32,

        /// Pause between cycles
        #[arg(long, default_value = "1s", value_parser = humantime_serde::re::humantime::parse_duration)]
        delay: Duration,

        /// Only print keys matching this wildcard pattern
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Print the metric definition table, or resolve one key against it
    Definitions {
        /// Metric key to resolve
        key: Option<String>,
    },

    /// Validate the configuration file
    Validate {
        /// Show the full parsed configuration
        #[arg(short, long)]
        verbose: bool,
    },

    /// Generate a default configuration file
    GenerateConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

// ----------------------------------------------------------------------------
// CLI Handlers
// ----------------------------------------------------------------------------

/// Load the config file if present, otherwise defaults plus environment.
fn load_config(path: &Path) -> AnyhowResult<(AgentConfig, bool)> {
    if path.exists() {
        let config = AgentConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?;
        Ok((config, true))
    } else {
        let config = AgentConfig::from_env().context("Failed to build config from environment")?;
        Ok((config, false))
    }
}

fn handle_validate(config_path: &Path, verbose: bool) -> AnyhowResult<()> {
    println!("Validating configuration file: {}", config_path.display());

    let config = match AgentConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("Configuration validation failed: {e}");
            return Err(e.into());
        }
    };
    println!("Configuration is valid");

    if verbose {
        println!("\n{}", "=".repeat(60));
        println!("{}", toml::to_string_pretty(&config).context("Failed to render configuration")?);
    }

    println!("\nSummary:");
    println!("  instance name:      {}", config.agent.instance_name);
    println!("  proc root:          {}", config.sampler.proc_root.display());
    println!(
        "  sample interval:    {}",
        humantime_serde::re::humantime::format_duration(config.agent.sample_interval)
    );
    println!(
        "  rotation interval:  {}",
        humantime_serde::re::humantime::format_duration(config.agent.rotation_interval)
    );
    let enabled: Vec<String> = config
        .sampler
        .enabled_subsystems()
        .iter()
        .map(|s| s.to_string())
        .collect();
    println!("  subsystems:         {}", enabled.join(", "));
    println!("  extra definitions:  {}", config.metrics.len());
    Ok(())
}

fn handle_generate_config(output: Option<&Path>) -> AnyhowResult<()> {
    let rendered = AgentConfig::generate_default_config();
    match output {
        Some(path) => {
            fs::write(path, &rendered).with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Default configuration written to: {}", path.display());
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

fn handle_definitions(config: &AgentConfig, key: Option<&str>) -> AnyhowResult<()> {
    let registry = MetricRegistry::with_overrides(&config.metrics)?;

    match key {
        Some(key) => match registry.resolve(key) {
            Some(def) => println!(
                "{key}: {} (pattern {}, diff {})",
                def.aggregation, def.pattern, def.calc_diff
            ),
            None => println!("{key}: passthrough (no matching definition)"),
        },
        None => {
            for (idx, def) in registry.definitions().iter().enumerate() {
                println!(
                    "{idx:>3}  {:<28} {:<5} {}",
                    def.pattern.as_str(),
                    def.aggregation.to_string(),
                    if def.calc_diff { "diff" } else { "" }
                );
            }
        }
    }
    Ok(())
}

async fn handle_sample(config: &AgentConfig, count: u32, delay: Duration, filter: Option<&str>) -> AnyhowResult<()> {
    let matcher = filter.map(WildcardPattern::new).transpose()?;
    let sampler = Sampler::new(&config.sampler);

    let mut report = sampler.sample().await;
    for _ in 1..count.max(1) {
        tokio::time::sleep(delay).await;
        report = sampler.sample().await;
    }

    for failure in &report.failures {
        eprintln!("warning: {failure}");
    }

    let values: std::collections::BTreeMap<_, _> = report
        .values
        .into_iter()
        .filter(|(key, _)| matcher.as_ref().map_or(true, |m| m.matches(key)))
        .collect();
    println!("{}", serde_json::to_string_pretty(&values)?);
    Ok(())
}

fn handle_version() {
    println!("{} v{}", AGENT_FULL_NAME, AGENT_VERSION);
    println!();
    println!("Build Information:");
    println!("  Target: {}", std::env::consts::ARCH);
    println!("  OS: {}", std::env::consts::OS);
}

// ----------------------------------------------------------------------------
// Main Entry Point
// ----------------------------------------------------------------------------

#[tokio::main]
async fn main() -> AnyhowResult<()> {
    let cli = Cli::parse();

    // Commands that don't need logging
    match &cli.command {
        Some(Commands::Version) => {
            handle_version();
            return Ok(());
        }
        Some(Commands::GenerateConfig { output }) => return handle_generate_config(output.as_deref()),
        Some(Commands::Validate { verbose }) => return handle_validate(&cli.config, *verbose),
        _ => {}
    }

    let (config, from_file) = load_config(&cli.config)?;

    match &cli.command {
        Some(Commands::Definitions { key }) => return handle_definitions(&config, key.as_deref()),
        Some(Commands::Sample { count, delay, filter }) => {
            return handle_sample(&config, *count, *delay, filter.as_deref()).await
        }
        _ => {}
    }

    let mut logging_config = config.logging.clone();
    if let Some(level) = &cli.log_level {
        logging_config.level = level.clone();
    }
    if cli.debug {
        logging_config.level = "debug".into();
    }
    init_logging(&logging_config)?;

    info!("{} v{}", AGENT_FULL_NAME, AGENT_VERSION);
    if !from_file {
        warn!("Config file not found at {}, using defaults", cli.config.display());
    }

    let engine = Engine::new(config)?;
    engine.run().await?;
    Ok(())
}
