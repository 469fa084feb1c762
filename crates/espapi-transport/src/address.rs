use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Default native API port.
pub const DEFAULT_PORT: u16 = 6053;

/// A device as reported by a discovery service.
///
/// Only [`DeviceAddress::addr`] matters to the client; the remaining fields are
/// carried for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAddress {
    /// Node name, e.g. `living-room`.
    pub name: String,
    /// Host name, e.g. `living-room.local.`.
    pub host: String,
    /// API port.
    pub port: u16,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    /// Firmware version advertised by the device.
    pub version: String,
}

impl DeviceAddress {
    /// Address from a bare host name, using the default port.
    pub fn from_host(host: impl Into<String>) -> Self {
        let host = host.into();
        Self {
            name: host.clone(),
            host,
            port: DEFAULT_PORT,
            ipv4: None,
            ipv6: None,
            version: String::new(),
        }
    }

    /// The dialable address. IPv6 wins over IPv4, which wins over the host name.
    pub fn addr(&self) -> String {
        if let Some(ip) = self.ipv6 {
            SocketAddr::new(IpAddr::V6(ip), self.port).to_string()
        } else if let Some(ip) = self.ipv4 {
            SocketAddr::new(IpAddr::V4(ip), self.port).to_string()
        } else {
            join_host_port(self.host.trim_end_matches('.'), self.port)
        }
    }

    /// A discovery record is usable once it has a host and at least one address.
    pub fn is_complete(&self) -> bool {
        !self.host.is_empty() && (self.ipv4.is_some() || self.ipv6.is_some())
    }
}

/// Join a host and port, bracketing bare IPv6 literals.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DeviceAddress {
        DeviceAddress {
            name: "camera0".to_string(),
            host: "camera0.local.".to_string(),
            port: DEFAULT_PORT,
            ipv4: None,
            ipv6: None,
            version: "1.14.3".to_string(),
        }
    }

    #[test]
    fn host_name_fallback() {
        assert_eq!(device().addr(), "camera0.local:6053");
        assert!(!device().is_complete());
    }

    #[test]
    fn ipv4_preferred_over_host() {
        let dev = DeviceAddress {
            ipv4: Some(Ipv4Addr::new(192, 168, 1, 20)),
            ..device()
        };
        assert_eq!(dev.addr(), "192.168.1.20:6053");
        assert!(dev.is_complete());
    }

    #[test]
    fn ipv6_preferred_over_ipv4() {
        let dev = DeviceAddress {
            ipv4: Some(Ipv4Addr::new(192, 168, 1, 20)),
            ipv6: Some("fd00::20".parse().unwrap()),
            ..device()
        };
        assert_eq!(dev.addr(), "[fd00::20]:6053");
    }

    #[test]
    fn join_brackets_ipv6_literals() {
        assert_eq!(join_host_port("::1", 6053), "[::1]:6053");
        assert_eq!(join_host_port("node", 1), "node:1");
    }
}
