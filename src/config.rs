//! Driver configuration using Figment.
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `RUST_IVI_`, nested keys separated
//!    by a double underscore (`RUST_IVI_APPLICATION__LOG_LEVEL=debug`)
//!
//! After extraction the schema constraints (`serde_valid`) and the cross-field
//! checks in [`IviConfig::validate`] run before the value is handed out.
//!
//! # Example
//! ```no_run
//! use rust_ivi::config::IviConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = IviConfig::load_from("config/switch.example.toml")?;
//! println!("Driver: {}", config.driver.prefix);
//! # Ok(())
//! # }
//! ```

use crate::driver::RelayCommands;
use crate::error::{IviError, IviResult};
use crate::inherent::{CapabilityGroup, CapabilitySet, Inherent};
use crate::switch::TopologyConfig;
use crate::transport::LineSettings;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_LOG_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct IviConfig {
    /// Application settings
    #[validate]
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Driver identity and I/O settings
    #[validate]
    pub driver: DriverConfig,
    /// Relay command templates
    #[validate]
    pub commands: RelayCommands,
    /// Switch topology
    #[validate]
    #[serde(default)]
    pub topology: TopologyConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ApplicationConfig {
    /// Application name
    #[validate(min_length = 1)]
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Driver identity and transport settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DriverConfig {
    /// Short driver prefix
    #[validate(min_length = 1)]
    #[validate(max_length = 50)]
    pub prefix: String,
    /// Driver vendor
    #[validate(min_length = 1)]
    #[validate(max_length = 100)]
    pub vendor: String,
    /// Free-form description
    #[validate(max_length = 500)]
    #[serde(default)]
    pub description: String,
    /// Supported instrument models (empty accepts any)
    #[serde(default)]
    pub supported_models: Vec<String>,
    /// Instrument class implemented
    #[serde(default = "default_class_spec")]
    pub class_spec: String,
    /// Implemented capability groups
    #[serde(default = "default_capabilities")]
    pub capabilities: CapabilitySet,
    /// Reply timeout in milliseconds
    #[validate(minimum = 1)]
    #[validate(maximum = 60000)]
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Line terminator for commands and replies
    #[validate(min_length = 1)]
    #[validate(max_length = 4)]
    #[serde(default = "default_terminator")]
    pub terminator: String,
    /// Default upper bound for debounce waits
    #[serde(default = "default_debounce_timeout", with = "humantime_serde")]
    pub debounce_timeout: Duration,
}

fn default_name() -> String {
    "rust_ivi".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_class_spec() -> String {
    "IviSwtch".to_string()
}

fn default_capabilities() -> CapabilitySet {
    CapabilitySet::new().with(CapabilityGroup::Base)
}

fn default_read_timeout_ms() -> u64 {
    1000
}

fn default_terminator() -> String {
    "\n".to_string()
}

fn default_debounce_timeout() -> Duration {
    Duration::from_secs(1)
}

impl DriverConfig {
    /// Driver identity described by this configuration.
    pub fn inherent(&self) -> Inherent {
        Inherent {
            prefix: self.prefix.clone(),
            vendor: self.vendor.clone(),
            description: self.description.clone(),
            class_spec: self.class_spec.clone(),
            class_spec_revision: (1, 0),
            supported_models: self.supported_models.clone(),
            capabilities: self.capabilities.clone(),
        }
    }

    /// Line framing for a serial or socket transport.
    pub fn line_settings(&self) -> LineSettings {
        LineSettings::default()
            .with_terminator(&self.terminator)
            .with_timeout(Duration::from_millis(self.read_timeout_ms))
    }
}

impl IviConfig {
    /// Load configuration from a TOML file and environment variables.
    pub fn load_from<P: AsRef<Path>>(path: P) -> IviResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(IviError::Configuration(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        tracing::debug!("Loading driver config from: {}", path.display());

        let config: IviConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("RUST_IVI_").split("__"))
            .extract()?;
        config.validate()?;

        tracing::info!(
            driver = %config.driver.prefix,
            channels = config.topology.channels.len(),
            paths = config.topology.paths.len(),
            "Loaded driver config"
        );
        Ok(config)
    }

    /// Load configuration from a TOML string (no environment overrides).
    pub fn load_from_str(toml_content: &str) -> IviResult<Self> {
        let config: IviConfig = toml::from_str(toml_content)
            .map_err(|e| IviError::Configuration(format!("Failed to parse TOML content: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Run schema and cross-field validation.
    pub fn validate(&self) -> IviResult<()> {
        if let Err(errors) = Validate::validate(self) {
            return Err(IviError::Configuration(format!(
                "Schema validation failed: {}",
                errors
            )));
        }

        if !VALID_LOG_LEVELS.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(IviError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        if !VALID_LOG_FORMATS.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(IviError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                VALID_LOG_FORMATS.join(", ")
            )));
        }

        self.commands.check_placeholders()?;

        let mut names = HashSet::new();
        for channel in &self.topology.channels {
            if !names.insert(channel.name.as_str()) {
                return Err(IviError::Configuration(format!(
                    "Duplicate channel name: {}",
                    channel.name
                )));
            }
            if channel.config && channel.source {
                return Err(IviError::Configuration(format!(
                    "Channel '{}' cannot be both a config and a source channel",
                    channel.name
                )));
            }
        }
        for path in &self.topology.paths {
            for end in [&path.a, &path.b] {
                if !names.contains(end.as_str()) {
                    return Err(IviError::Configuration(format!(
                        "Path {}->{} references unknown channel '{}'",
                        path.a, path.b, end
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [driver]
        prefix = "acme_sw"
        vendor = "ACME"

        [commands]
        close = "CLOSE {ch1},{ch2}"
        open = "OPEN {ch1},{ch2}"

        [[topology.channels]]
        name = "CH1"

        [[topology.channels]]
        name = "CH2"

        [[topology.paths]]
        a = "CH1"
        b = "CH2"
    "#;

    #[test]
    fn applies_defaults() {
        let config = IviConfig::load_from_str(MINIMAL).unwrap();
        assert_eq!(config.application.log_level, "info");
        assert_eq!(config.driver.read_timeout_ms, 1000);
        assert_eq!(config.driver.debounce_timeout, Duration::from_secs(1));
        assert!(config.driver.capabilities.supports(CapabilityGroup::Base));
        assert_eq!(config.driver.line_settings().read_terminator, b'\n');
    }

    #[test]
    fn rejects_invalid_log_level() {
        let mut config = IviConfig::load_from_str(MINIMAL).unwrap();
        config.application.log_level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_path_to_unknown_channel() {
        let mut config = IviConfig::load_from_str(MINIMAL).unwrap();
        config.topology.paths[0].b = "CH9".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("CH9"));
    }

    #[test]
    fn rejects_out_of_range_timeout() {
        let mut config = IviConfig::load_from_str(MINIMAL).unwrap();
        config.driver.read_timeout_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(IviError::Configuration(message)) if message.contains("Schema")
        ));
    }

    #[test]
    fn driver_section_builds_inherent() {
        let config = IviConfig::load_from_str(MINIMAL).unwrap();
        let inherent = config.driver.inherent();
        assert_eq!(inherent.prefix, "acme_sw");
        assert_eq!(inherent.class_spec, "IviSwtch");
    }
}
