//! Channel and controller registry built from a [`BridgeConfig`]
//!
//! Every configured port is opened once. Controllers wired to the same port
//! share its channel.

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::{BridgeConfig, ConfigError, PortConfig};
use crate::controller::Controller;
use crate::protocol::{Address, Channel, ProtocolError, SharedChannel};

/// Open channels and the controllers addressed over them
pub struct Bridge {
    channels: HashMap<String, SharedChannel>,
    controllers: HashMap<String, Controller>,
}

impl Bridge {
    /// Open every configured serial line
    pub fn open(config: &BridgeConfig) -> Result<Self, ConfigError> {
        Self::with_opener(config, |port| Channel::open(&port.path, port.line.clone()))
    }

    /// Build the registry, obtaining each port's channel from `open`
    pub fn with_opener<F>(config: &BridgeConfig, mut open: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&PortConfig) -> Result<Channel, ProtocolError>,
    {
        config.validate()?;

        let mut channels = HashMap::new();
        for port in &config.ports {
            let channel = open(port).map_err(|e| {
                ConfigError::Invalid(format!("port '{}' ({}): {}", port.name, port.path, e))
            })?;
            debug!("port '{}' ready on {}", port.name, channel.name());
            channels.insert(port.name.clone(), channel.into_shared());
        }

        let mut controllers = HashMap::new();
        for entry in &config.controllers {
            let address = Address::new(entry.address)
                .map_err(|e| ConfigError::Invalid(format!("controller '{}': {}", entry.name, e)))?;
            let channel = channels.get(&entry.port).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "controller '{}' references unknown port '{}'",
                    entry.name, entry.port
                ))
            })?;
            controllers.insert(entry.name.clone(), Controller::new(channel.clone(), address));
        }

        Ok(Self {
            channels,
            controllers,
        })
    }

    /// Controller configured under `name`
    pub fn controller(&self, name: &str) -> Option<&Controller> {
        self.controllers.get(name)
    }

    /// Controllers sorted by name
    pub fn controllers(&self) -> Vec<(&str, &Controller)> {
        let mut list: Vec<(&str, &Controller)> = self
            .controllers
            .iter()
            .map(|(name, c)| (name.as_str(), c))
            .collect();
        list.sort_by_key(|(name, _)| *name);
        list
    }

    /// Channel opened for the port called `port`
    pub fn channel(&self, port: &str) -> Option<&SharedChannel> {
        self.channels.get(port)
    }

    /// Close every channel. Controllers left over report `BadHandle` afterwards.
    pub fn close(&self) {
        for (name, channel) in &self.channels {
            match channel.lock() {
                Ok(mut guard) => guard.close(),
                Err(_) => warn!("port '{}': lock poisoned, leaving descriptor to drop", name),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ChannelConfig;
    use std::os::unix::net::UnixStream;
    use std::sync::Arc;

    const CONFIG: &str = r#"{
        "ports": [
            { "name": "bus0", "path": "/dev/ttyUSB0" },
            { "name": "bus1", "path": "/dev/ttyUSB1" }
        ],
        "controllers": [
            { "name": "x", "port": "bus0", "address": 1 },
            { "name": "y", "port": "bus0", "address": 2 },
            { "name": "z", "port": "bus1", "address": 1 }
        ]
    }"#;

    #[test]
    fn test_controllers_share_port_channel() {
        let config = BridgeConfig::from_json(CONFIG).unwrap();
        let mut peers = Vec::new();
        let bridge = Bridge::with_opener(&config, |_| {
            let (ours, theirs) = UnixStream::pair().unwrap();
            peers.push(theirs);
            Channel::from_link(Box::new(ours), ChannelConfig::default())
        })
        .unwrap();

        let x = bridge.controller("x").unwrap();
        let y = bridge.controller("y").unwrap();
        let z = bridge.controller("z").unwrap();
        assert!(Arc::ptr_eq(x.channel(), y.channel()));
        assert!(!Arc::ptr_eq(x.channel(), z.channel()));

        let names: Vec<&str> = bridge.controllers().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["x", "y", "z"]);
        assert_eq!(peers.len(), 2);
    }

    #[test]
    fn test_close_invalidates_controllers() {
        let config = BridgeConfig::from_json(CONFIG).unwrap();
        let mut peers = Vec::new();
        let bridge = Bridge::with_opener(&config, |_| {
            let (ours, theirs) = UnixStream::pair().unwrap();
            peers.push(theirs);
            Channel::from_link(Box::new(ours), ChannelConfig::default())
        })
        .unwrap();

        bridge.close();
        let err = bridge.controller("x").unwrap().position().unwrap_err();
        assert!(matches!(err, ProtocolError::BadHandle));
    }

    #[test]
    fn test_open_failure_names_port() {
        let config = BridgeConfig::from_json(CONFIG).unwrap();
        let missing = |_: &PortConfig| Err(ProtocolError::Config("no such device".into()));
        let err = Bridge::with_opener(&config, missing).err().unwrap();
        assert!(err.to_string().contains("bus0"));
    }
}
