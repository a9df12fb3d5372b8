use crate::errors::ConfigError;
use crate::logging::{self, LogConfig, LogFormat};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// File names searched by `Config::discover`
const CONFIG_FILES: [&str; 2] = ["gimarshal.toml", ".gimarshal.toml"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub binding: BindingConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingConfig {
    /// Base type whose instances start with a floating reference
    #[serde(default = "default_unowned_base")]
    pub unowned_base: String,

    /// Native function claiming a floating reference
    #[serde(default = "default_ref_sink_symbol")]
    pub ref_sink_symbol: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Reuse generated callables across calls
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: ConfigLogFormat,

    #[serde(default = "default_false")]
    pub span_events: bool,

    #[serde(default)]
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConfigLogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            unowned_base: default_unowned_base(),
            ref_sink_symbol: default_ref_sink_symbol(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: ConfigLogFormat::Pretty,
            span_events: false,
            filter: None,
        }
    }
}

fn default_true() -> bool { true }
fn default_false() -> bool { false }
fn default_level() -> String { "info".to_string() }
fn default_unowned_base() -> String { "GObject.InitiallyUnowned".to_string() }
fn default_ref_sink_symbol() -> String { "g_object_ref_sink".to_string() }

impl LoggingConfig {
    /// Logging setup described by this section; unknown levels fall back to info
    pub fn to_log_config(&self) -> LogConfig {
        let mut config = LogConfig::new()
            .with_level(logging::parse_level(&self.level).unwrap_or(tracing::Level::INFO))
            .with_format(match self.format {
                ConfigLogFormat::Pretty => LogFormat::Pretty,
                ConfigLogFormat::Compact => LogFormat::Compact,
                ConfigLogFormat::Json => LogFormat::Json,
            })
            .with_span_events(self.span_events);
        if let Some(filter) = &self.filter {
            config = config.with_filter(filter.clone());
        }
        config
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Find and load a configuration file from `start` or its parents
    pub fn discover(start: &Path) -> Self {
        for dir in start.ancestors() {
            for name in CONFIG_FILES {
                let candidate = dir.join(name);
                if candidate.exists() {
                    match Self::load(&candidate) {
                        Ok(config) => return config,
                        Err(err) => {
                            tracing::warn!(path = %candidate.display(), error = %err, "ignoring unreadable config");
                        }
                    }
                }
            }
        }
        Self::default()
    }

    /// Generate default configuration file content
    pub fn generate_default() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate config"))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
