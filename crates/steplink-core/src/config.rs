//! Bridge configuration
//!
//! Describes which serial lines to open and which controller addresses live on
//! each of them. Stored as JSON:
//!
//! ```json
//! {
//!   "ports": [{ "name": "bus0", "path": "/dev/ttyUSB0", "baud_rate": 115200 }],
//!   "controllers": [{ "name": "motorController1", "port": "bus0", "address": 1 }]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::protocol::ChannelConfig;

/// Errors from loading or validating a bridge configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read or written
    #[error("Failed to read config: {0}")]
    Io(#[from] io::Error),

    /// Config document is not valid JSON for this schema
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// Config parsed but is inconsistent, or a port failed to open
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// One serial line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    /// Name controllers use to refer to this line
    pub name: String,

    /// Device path, e.g. `/dev/ttyUSB0`
    pub path: String,

    /// Line settings, flattened into the port entry
    #[serde(flatten)]
    pub line: ChannelConfig,
}

/// One controller on a line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Name callers look the controller up by
    pub name: String,

    /// Name of the [`PortConfig`] the controller is wired to
    pub port: String,

    /// Bus address, 1..=254
    pub address: u8,
}

/// Every line and controller the bridge serves
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Serial lines to open
    pub ports: Vec<PortConfig>,

    /// Controllers on those lines
    #[serde(default)]
    pub controllers: Vec<ControllerConfig>,
}

impl BridgeConfig {
    /// Load and validate a configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse and validate a configuration document
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Port entry called `name`
    pub fn port(&self, name: &str) -> Option<&PortConfig> {
        self.ports.iter().find(|p| p.name == name)
    }

    /// Controllers wired to the port called `port`
    pub fn controllers_on<'a>(
        &'a self,
        port: &'a str,
    ) -> impl Iterator<Item = &'a ControllerConfig> + 'a {
        self.controllers.iter().filter(move |c| c.port == port)
    }

    /// Reject duplicate names, unknown ports and unusable addresses.
    ///
    /// Two controllers may share an address only on different ports.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ports.is_empty() {
            return Err(ConfigError::Invalid("no ports configured".to_string()));
        }

        let mut port_names = HashSet::new();
        for port in &self.ports {
            if port.name.is_empty() || port.path.is_empty() {
                return Err(ConfigError::Invalid(
                    "ports need both a name and a path".to_string(),
                ));
            }
            if !port_names.insert(port.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate port name '{}'",
                    port.name
                )));
            }
            if port.line.baud_rate == 0 {
                return Err(ConfigError::Invalid(format!(
                    "port '{}' has a zero baud rate",
                    port.name
                )));
            }
        }

        let mut controller_names = HashSet::new();
        let mut addresses = HashSet::new();
        for controller in &self.controllers {
            if !controller_names.insert(controller.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate controller name '{}'",
                    controller.name
                )));
            }
            if !port_names.contains(controller.port.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "controller '{}' references unknown port '{}'",
                    controller.name, controller.port
                )));
            }
            if !(1..=254).contains(&controller.address) {
                return Err(ConfigError::Invalid(format!(
                    "controller '{}' address {} outside 1..=254",
                    controller.name, controller.address
                )));
            }
            if !addresses.insert((controller.port.as_str(), controller.address)) {
                return Err(ConfigError::Invalid(format!(
                    "address {} used twice on port '{}'",
                    controller.address, controller.port
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::LineMode;
    use pretty_assertions::assert_eq;

    const MINIMAL: &str = r#"{
        "ports": [{ "name": "bus0", "path": "/dev/ttyUSB0" }],
        "controllers": [
            { "name": "motorController1", "port": "bus0", "address": 1 },
            { "name": "motorController2", "port": "bus0", "address": 2 }
        ]
    }"#;

    #[test]
    fn test_minimal_config_gets_line_defaults() {
        let config = BridgeConfig::from_json(MINIMAL).unwrap();
        let port = config.port("bus0").unwrap();
        assert_eq!(port.line, ChannelConfig::default());
        assert_eq!(config.controllers_on("bus0").count(), 2);
    }

    #[test]
    fn test_port_overrides() {
        let config = BridgeConfig::from_json(
            r#"{ "ports": [
                { "name": "a", "path": "/dev/ttyS0", "baud_rate": 9600, "mode": "canonical" }
            ] }"#,
        )
        .unwrap();
        assert_eq!(config.ports[0].line.baud_rate, 9600);
        assert_eq!(config.ports[0].line.mode, LineMode::Canonical);
        assert!(config.controllers.is_empty());
    }

    fn invalid(json: &str) -> String {
        match BridgeConfig::from_json(json) {
            Err(ConfigError::Invalid(msg)) => msg,
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_validation_failures() {
        assert!(invalid(r#"{ "ports": [] }"#).contains("no ports"));
        assert!(invalid(
            r#"{ "ports": [{ "name": "a", "path": "/x" }, { "name": "a", "path": "/y" }] }"#
        )
        .contains("duplicate port"));
        assert!(invalid(
            r#"{ "ports": [{ "name": "a", "path": "/x" }],
                 "controllers": [{ "name": "m", "port": "b", "address": 1 }] }"#
        )
        .contains("unknown port"));
        assert!(invalid(
            r#"{ "ports": [{ "name": "a", "path": "/x" }],
                 "controllers": [{ "name": "m", "port": "a", "address": 0 }] }"#
        )
        .contains("outside"));
        assert!(invalid(
            r#"{ "ports": [{ "name": "a", "path": "/x" }],
                 "controllers": [{ "name": "m", "port": "a", "address": 3 },
                                 { "name": "n", "port": "a", "address": 3 }] }"#
        )
        .contains("used twice"));
        assert!(invalid(
            r#"{ "ports": [{ "name": "a", "path": "/x" }],
                 "controllers": [{ "name": "m", "port": "a", "address": 3 },
                                 { "name": "m", "port": "a", "address": 4 }] }"#
        )
        .contains("duplicate controller"));
    }

    #[test]
    fn test_parse_errors_are_not_defaulted() {
        assert!(matches!(
            BridgeConfig::from_json(r#"{ "ports": [{ "name": "a" }] }"#),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            BridgeConfig::from_json(
                r#"{ "ports": [{ "name": "a", "path": "/x", "stop_bits": 5 }] }"#
            ),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.json");
        let config = BridgeConfig::from_json(MINIMAL).unwrap();
        config.save(&path).unwrap();
        assert_eq!(BridgeConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            BridgeConfig::from_file(dir.path().join("absent.json")),
            Err(ConfigError::Io(_))
        ));
    }
}
