//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Server configuration

use crate::tcp::parse_accepter;
use serbridge_service::PortConfig;
use std::collections::HashSet;

/// Server configuration
///
/// The set of ports to bridge plus process-wide settings. Use the builder
/// methods to assemble it.
///
/// # Example
///
/// ```
/// use serbridge_server::ServerConfig;
/// use serbridge_service::PortConfig;
///
/// let config = ServerConfig::default()
///     .with_port(PortConfig::new("console", "tcp,0.0.0.0:3001", "/dev/ttyUSB0"))
///     .with_notice_log(true);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Ports to bridge
    pub ports: Vec<PortConfig>,

    /// Log every port notice at info level
    pub log_notices: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ports: Vec::new(),
            log_notices: true,
        }
    }
}

impl ServerConfig {
    /// Create a configuration for the given ports
    pub fn new(ports: Vec<PortConfig>) -> Self {
        Self {
            ports,
            ..Default::default()
        }
    }

    /// Add a port
    pub fn with_port(mut self, port: PortConfig) -> Self {
        self.ports.push(port);
        self
    }

    /// Enable or disable notice logging
    pub fn with_notice_log(mut self, enabled: bool) -> Self {
        self.log_notices = enabled;
        self
    }

    /// Validate the configuration
    ///
    /// Every port must be valid on its own, names must be unique and no two
    /// ports may listen on the same accepter.
    pub fn validate(&self) -> Result<(), String> {
        let mut names = HashSet::new();
        let mut accepters = HashSet::new();
        for port in &self.ports {
            port.validate()?;
            if !names.insert(port.name.as_str()) {
                return Err(format!("port {} defined twice", port.name));
            }
            let addr = parse_accepter(&port.accepter)
                .map_err(|e| format!("port {}: bad accepter {}: {}", port.name, port.accepter, e))?;
            if addr.port() != 0 && !accepters.insert(addr) {
                return Err(format!(
                    "port {}: accepter {} already in use",
                    port.name, port.accepter
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str, accepter: &str) -> PortConfig {
        PortConfig::new(name, accepter, "/dev/ttyS0")
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert!(config.ports.is_empty());
        assert!(config.log_notices);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = ServerConfig::default()
            .with_port(port("a", "127.0.0.1:3001"))
            .with_port(port("b", "tcp,127.0.0.1:3002"))
            .with_notice_log(false);

        assert_eq!(config.ports.len(), 2);
        assert!(!config.log_notices);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = ServerConfig::new(vec![port("a", "127.0.0.1:3001")]);
        assert!(config.validate().is_ok());

        // Duplicate name
        config.ports.push(port("a", "127.0.0.1:3002"));
        assert!(config.validate().is_err());

        // Duplicate accepter
        config.ports[1].name = "b".to_string();
        config.ports[1].accepter = "tcp,127.0.0.1:3001".to_string();
        assert!(config.validate().is_err());

        // Ephemeral ports never clash
        config.ports[0].accepter = "127.0.0.1:0".to_string();
        config.ports[1].accepter = "127.0.0.1:0".to_string();
        assert!(config.validate().is_ok());

        // Invalid port
        config.ports[1].max_connections = 0;
        assert!(config.validate().is_err());
    }
}
