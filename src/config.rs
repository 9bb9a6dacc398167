// ============================================================================
// CONFIGURATION SYSTEM
// ============================================================================
// TOML file merged with `PROCFS_AGENT_`-prefixed environment variables
// (`__` separates nesting levels, e.g. `PROCFS_AGENT_AGENT__SAMPLE_INTERVAL=2s`).
// Every field has a default; the configuration is validated after loading.
// ============================================================================

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::parsers::{DEFAULT_DISK_EXCLUDES, DEFAULT_NET_EXCLUDES};
use crate::pattern::WildcardPattern;
use crate::registry::DefinitionSpec;
use crate::sampler::Subsystem;
use crate::{
    AGENT_NAME, DEFAULT_PARSER_TIMEOUT_MS, DEFAULT_PROC_ROOT, DEFAULT_ROTATION_INTERVAL_MS,
    DEFAULT_SAMPLE_INTERVAL_MS, MIN_SAMPLE_INTERVAL_MS,
};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "PROCFS_AGENT_";

// ----------------------------------------------------------------------------
// Root Configuration
// ----------------------------------------------------------------------------

/// Root configuration for the agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Cadences and identity
    #[serde(default)]
    pub agent: GeneralConfig,

    /// Proc root, deadlines and device filters
    #[serde(default)]
    pub sampler: SamplerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Extra metric definitions, registered after the built-in table
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<DefinitionSpec>,
}

impl AgentConfig {
    /// Load configuration from file with environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        Self::extract(
            Figment::from(Serialized::defaults(Self::default()))
                .merge(Toml::file(path))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    /// Defaults with environment overrides only.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::extract(Figment::from(Serialized::defaults(Self::default())).merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
            source: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let min_interval = Duration::from_millis(MIN_SAMPLE_INTERVAL_MS);
        if self.agent.sample_interval < min_interval {
            return Err(ConfigError::invalid_value(
                "agent.sample_interval",
                format!("Sample interval must be at least {}ms", MIN_SAMPLE_INTERVAL_MS),
            ));
        }

        if self.agent.rotation_interval < self.agent.sample_interval {
            return Err(ConfigError::invalid_value(
                "agent.rotation_interval",
                "Rotation interval cannot be shorter than the sample interval",
            ));
        }

        if self.sampler.parser_timeout.is_zero() {
            return Err(ConfigError::invalid_value(
                "sampler.parser_timeout",
                "Parser timeout must be greater than zero",
            ));
        }

        if self.sampler.enabled_subsystems().is_empty() {
            return Err(ConfigError::invalid_value(
                "sampler",
                "At least one subsystem must be enabled",
            ));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "compact" | "json") {
            return Err(ConfigError::invalid_value(
                "logging.format",
                format!("Unknown format '{}', expected pretty, compact or json", self.logging.format),
            ));
        }

        for (idx, def) in self.metrics.iter().enumerate() {
            WildcardPattern::new(&def.pattern)
                .map_err(|e| ConfigError::invalid_value(format!("metrics[{idx}].pattern"), e.to_string()))?;
        }

        Ok(())
    }

    /// Render the defaults as a TOML document.
    pub fn generate_default_config() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Parse a TOML document, without environment overrides.
impl FromStr for AgentConfig {
    type Err = ConfigError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Self = toml::from_str(toml_str).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
            source: Some(e.into()),
        })?;
        config.validate()?;
        Ok(config)
    }
}

// ----------------------------------------------------------------------------
// General Agent Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Instance name, used in log output
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// Period between sampling cycles
    #[serde(default = "default_sample_interval", with = "humantime_serde")]
    pub sample_interval: Duration,

    /// Period between window rotations
    #[serde(default = "default_rotation_interval", with = "humantime_serde")]
    pub rotation_interval: Duration,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            instance_name: default_instance_name(),
            sample_interval: default_sample_interval(),
            rotation_interval: default_rotation_interval(),
        }
    }
}

fn default_instance_name() -> String {
    AGENT_NAME.into()
}

fn default_sample_interval() -> Duration {
    Duration::from_millis(DEFAULT_SAMPLE_INTERVAL_MS)
}

fn default_rotation_interval() -> Duration {
    Duration::from_millis(DEFAULT_ROTATION_INTERVAL_MS)
}

fn default_true() -> bool {
    true
}

// ----------------------------------------------------------------------------
// Sampler Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Mount point of procfs
    #[serde(default = "default_proc_root")]
    pub proc_root: PathBuf,

    /// Deadline for one subsystem's read + parse
    #[serde(default = "default_parser_timeout", with = "humantime_serde")]
    pub parser_timeout: Duration,

    #[serde(default = "default_true")]
    pub collect_cpu: bool,

    #[serde(default = "default_true")]
    pub collect_memory: bool,

    #[serde(default = "default_true")]
    pub collect_network: bool,

    #[serde(default = "default_true")]
    pub collect_disk: bool,

    /// Interfaces whose name starts with one of these are skipped
    #[serde(default = "default_net_excludes")]
    pub net_exclude_prefixes: Vec<String>,

    /// Block devices whose name starts with one of these are skipped
    #[serde(default = "default_disk_excludes")]
    pub disk_exclude_prefixes: Vec<String>,
}

impl SamplerConfig {
    pub fn enabled_subsystems(&self) -> Vec<Subsystem> {
        Subsystem::ALL
            .into_iter()
            .filter(|s| match s {
                Subsystem::Cpu => self.collect_cpu,
                Subsystem::Memory => self.collect_memory,
                Subsystem::Network => self.collect_network,
                Subsystem::Disk => self.collect_disk,
            })
            .collect()
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            proc_root: default_proc_root(),
            parser_timeout: default_parser_timeout(),
            collect_cpu: true,
            collect_memory: true,
            collect_network: true,
            collect_disk: true,
            net_exclude_prefixes: default_net_excludes(),
            disk_exclude_prefixes: default_disk_excludes(),
        }
    }
}

fn default_proc_root() -> PathBuf {
    PathBuf::from(DEFAULT_PROC_ROOT)
}

fn default_parser_timeout() -> Duration {
    Duration::from_millis(DEFAULT_PARSER_TIMEOUT_MS)
}

fn default_net_excludes() -> Vec<String> {
    DEFAULT_NET_EXCLUDES.iter().map(|s| s.to_string()).collect()
}

fn default_disk_excludes() -> Vec<String> {
    DEFAULT_DISK_EXCLUDES.iter().map(|s| s.to_string()).collect()
}

// ----------------------------------------------------------------------------
// Logging Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// pretty, compact or json
    #[serde(default = "default_log_format")]
    pub format: String,

    /// ANSI colors (ignored for json)
    #[serde(default = "default_true")]
    pub colors: bool,

    /// Include file and line in events
    #[serde(default)]
    pub source_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            colors: true,
            source_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}
