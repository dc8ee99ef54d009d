use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use serde::{Deserialize, Serialize};

pub const DEFAULT_BROADCAST_IP: &str = "255.255.255.255";
pub const MAX_UNIVERSE: u16 = 32767;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtNetMode {
    Broadcast,
    Unicast,
}

impl fmt::Display for ArtNetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtNetMode::Broadcast => write!(f, "broadcast"),
            ArtNetMode::Unicast => write!(f, "unicast"),
        }
    }
}

/// Where the universe goes on the network. Stored as
/// `universe_config.json` in the data directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniverseConfig {
    pub universe: u16,
    #[serde(rename = "broadcastIP")]
    pub broadcast_ip: String,
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            universe: 0,
            broadcast_ip: DEFAULT_BROADCAST_IP.to_string(),
        }
    }
}

impl UniverseConfig {
    pub fn new(universe: u16, broadcast_ip: impl Into<String>) -> Self {
        Self {
            universe,
            broadcast_ip: broadcast_ip.into(),
        }
    }

    /// Collects every problem rather than stopping at the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.universe > MAX_UNIVERSE {
            errors.push(format!(
                "universe {} must be between 0 and {}",
                self.universe, MAX_UNIVERSE
            ));
        }
        if self.broadcast_ip.parse::<Ipv4Addr>().is_err() {
            errors.push(format!(
                "'{}' is not a valid IPv4 address",
                self.broadcast_ip
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn mode(&self) -> ArtNetMode {
        if self.broadcast_ip.ends_with(".255") {
            ArtNetMode::Broadcast
        } else {
            ArtNetMode::Unicast
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.mode() == ArtNetMode::Broadcast
    }

    /// Resolve the target socket address. Fails only if the address has
    /// not been validated.
    pub fn destination(&self, port: u16) -> Result<SocketAddr, std::net::AddrParseError> {
        let ip: Ipv4Addr = self.broadcast_ip.parse()?;
        Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
    }

    pub fn get_mode_string(&self) -> &'static str {
        match self.mode() {
            ArtNetMode::Broadcast => "broadcast",
            ArtNetMode::Unicast => "unicast",
        }
    }

    pub fn get_destination(&self, port: u16) -> String {
        format!(
            "universe {} -> {}:{} ({})",
            self.universe,
            self.broadcast_ip,
            port,
            self.mode()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = UniverseConfig::default();
        assert_eq!(config.universe, 0);
        assert_eq!(config.broadcast_ip, "255.255.255.255");
        assert!(config.is_broadcast());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_broadcast_detection() {
        assert!(UniverseConfig::new(0, "192.168.1.255").is_broadcast());
        assert!(!UniverseConfig::new(0, "192.168.1.50").is_broadcast());
        assert_eq!(
            UniverseConfig::new(0, "10.0.0.7").get_mode_string(),
            "unicast"
        );
    }

    #[test]
    fn test_validation_collects_errors() {
        let errors = UniverseConfig::new(40000, "not-an-ip")
            .validate()
            .unwrap_err();
        assert_eq!(errors.len(), 2);

        assert!(UniverseConfig::new(32767, "10.0.0.1").validate().is_ok());
        assert!(UniverseConfig::new(0, "256.1.1.1").validate().is_err());
    }

    #[test]
    fn test_destination() {
        let dest = UniverseConfig::new(1, "192.168.1.255")
            .destination(6454)
            .unwrap();
        assert_eq!(dest.to_string(), "192.168.1.255:6454");
    }

    #[test]
    fn test_json_field_names() {
        let json = serde_json::to_value(UniverseConfig::new(2, "10.0.0.255")).unwrap();
        assert_eq!(json["universe"], 2);
        assert_eq!(json["broadcastIP"], "10.0.0.255");
    }
}
