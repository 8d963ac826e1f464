use std::fmt;
use std::str::FromStr;

use crate::error_chain_fmt;

/// Port a FerroDB server listens on when none is given explicitly.
pub const DEFAULT_PORT: u16 = 7171;

/// A `host:port` pair identifying one server.
///
/// The host may be a DNS name or an IP address; resolution to a canonical
/// address is the connector's job, not this type's. Parsing accepts a bare
/// host (the default port is assumed), `host:port`, and the bracketed IPv6
/// forms `[addr]` and `[addr]:port`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    host: String,
    port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(AddressParseError::EmptyHost);
        }

        if let Some(rest) = s.strip_prefix('[') {
            // Bracketed IPv6, with or without a port.
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| AddressParseError::Malformed(s.to_string()))?;
            if host.is_empty() {
                return Err(AddressParseError::EmptyHost);
            }
            let port = match tail {
                "" => DEFAULT_PORT,
                tail => tail
                    .strip_prefix(':')
                    .and_then(|p| p.parse().ok())
                    .ok_or_else(|| AddressParseError::InvalidPort(s.to_string()))?,
            };
            return Ok(Self::new(host, port));
        }

        match s.split_once(':') {
            None => Ok(Self::new(s, DEFAULT_PORT)),
            Some((host, port)) => {
                if host.is_empty() {
                    return Err(AddressParseError::EmptyHost);
                }
                if port.contains(':') {
                    // Unbracketed IPv6 is ambiguous; require brackets.
                    return Err(AddressParseError::Malformed(s.to_string()));
                }
                let port = port
                    .parse()
                    .map_err(|_| AddressParseError::InvalidPort(s.to_string()))?;
                Ok(Self::new(host, port))
            }
        }
    }
}

#[derive(thiserror::Error)]
pub enum AddressParseError {
    #[error("address has an empty host")]
    EmptyHost,
    #[error("address `{0}` has an invalid port")]
    InvalidPort(String),
    #[error("address `{0}` is not a valid host:port pair")]
    Malformed(String),
    #[error("seed scheme `{0}` is not supported")]
    UnsupportedScheme(String),
}
impl std::fmt::Debug for AddressParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::{Address, AddressParseError, DEFAULT_PORT};

    #[test]
    fn parse_bare_host_assumes_default_port() {
        // Arrange
        let input = "db1.example.com";

        // Act
        let address: Address = input.parse().unwrap();

        // Assert
        assert_eq!(address.host(), "db1.example.com");
        assert_eq!(address.port(), DEFAULT_PORT);
    }

    #[test]
    fn parse_host_and_port() {
        let address: Address = "db1.example.com:9000".parse().unwrap();

        assert_eq!(address.host(), "db1.example.com");
        assert_eq!(address.port(), 9000);
    }

    #[test]
    fn parse_bracketed_ipv6_with_and_without_port() {
        let with_port: Address = "[::1]:9000".parse().unwrap();
        let without_port: Address = "[::1]".parse().unwrap();

        assert_eq!(with_port.host(), "::1");
        assert_eq!(with_port.port(), 9000);
        assert_eq!(without_port.port(), DEFAULT_PORT);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(matches!(
            "".parse::<Address>(),
            Err(AddressParseError::EmptyHost)
        ));
        assert!(matches!(
            ":9000".parse::<Address>(),
            Err(AddressParseError::EmptyHost)
        ));
        assert!(matches!(
            "db1:notaport".parse::<Address>(),
            Err(AddressParseError::InvalidPort(_))
        ));
        assert!(matches!(
            "fe80::1:9000".parse::<Address>(),
            Err(AddressParseError::Malformed(_))
        ));
    }

    #[test]
    fn display_round_trips_through_parse() {
        let plain: Address = "db1.example.com:9000".parse().unwrap();
        let v6: Address = "[::1]:9000".parse().unwrap();

        assert_eq!(plain.to_string().parse::<Address>().unwrap(), plain);
        assert_eq!(v6.to_string().parse::<Address>().unwrap(), v6);
    }
}
