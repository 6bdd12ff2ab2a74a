//! Listen spec parsing.
//!
//! A listen spec is one of, first match wins:
//! - `<ipv6-literal>/<port>` binds IPv6 on the given address
//! - `<ipv4-literal>:<port>` binds IPv4 on the given address
//! - `<port>` binds IPv6 on all interfaces
//!
//! Literals are only checked for shape here. Whether the text is a real
//! address is decided at bind time.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Wildcard address used when a spec names only a port.
pub const IPV6_WILDCARD: &str = "::";

/// Address family a listener binds with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

/// Where a listener binds, as parsed from its listen spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindDescriptor {
    pub family: AddressFamily,
    pub ip: String,
    pub port: u16,
}

/// Error for listen specs matching none of the accepted forms, or naming a
/// port outside 0..=65535.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressSpecError {
    #[error("invalid listen spec {0:?}")]
    InvalidAddressSpec(String),
}

impl BindDescriptor {
    /// Parse a listen spec.
    pub fn parse(spec: &str) -> Result<Self, AddressSpecError> {
        let spec = spec.trim();
        let invalid = || AddressSpecError::InvalidAddressSpec(spec.to_string());

        if let Some((ip, port)) = spec.rsplit_once('/') {
            if looks_like_ipv6(ip) && is_port_text(port) {
                return Ok(Self {
                    family: AddressFamily::Ipv6,
                    ip: ip.to_string(),
                    port: parse_port(spec, port)?,
                });
            }
            return Err(invalid());
        }

        if let Some((ip, port)) = spec.rsplit_once(':') {
            if looks_like_ipv4(ip) && is_port_text(port) {
                return Ok(Self {
                    family: AddressFamily::Ipv4,
                    ip: ip.to_string(),
                    port: parse_port(spec, port)?,
                });
            }
            return Err(invalid());
        }

        if is_port_text(spec) {
            return Ok(Self {
                family: AddressFamily::Ipv6,
                ip: IPV6_WILDCARD.to_string(),
                port: parse_port(spec, spec)?,
            });
        }

        Err(invalid())
    }

    /// Resolve the literal into a socket address.
    pub fn socket_addr(&self) -> std::io::Result<SocketAddr> {
        let ip: IpAddr = self.ip.parse().map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid IP literal {:?}: {}", self.ip, e),
            )
        })?;

        let family_matches = match self.family {
            AddressFamily::Ipv4 => ip.is_ipv4(),
            AddressFamily::Ipv6 => ip.is_ipv6(),
        };
        if !family_matches {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{:?} is not an {:?} address", self.ip, self.family),
            ));
        }

        Ok(SocketAddr::new(ip, self.port))
    }
}

impl fmt::Display for BindDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.family {
            AddressFamily::Ipv4 => write!(f, "{}:{}", self.ip, self.port),
            AddressFamily::Ipv6 => write!(f, "[{}]:{}", self.ip, self.port),
        }
    }
}

impl std::str::FromStr for BindDescriptor {
    type Err = AddressSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn is_port_text(text: &str) -> bool {
    (1..=5).contains(&text.len()) && text.bytes().all(|b| b.is_ascii_digit())
}

fn parse_port(spec: &str, text: &str) -> Result<u16, AddressSpecError> {
    text.parse::<u16>()
        .map_err(|_| AddressSpecError::InvalidAddressSpec(spec.to_string()))
}

// Up to eight groups of at most four hex digits separated by colons.
fn looks_like_ipv6(text: &str) -> bool {
    if text.is_empty() || !text.contains(':') {
        return false;
    }
    let groups: Vec<&str> = text.split(':').collect();
    groups.len() <= 9
        && groups
            .iter()
            .all(|g| g.len() <= 4 && g.bytes().all(|b| b.is_ascii_hexdigit()))
}

// Four dot-separated runs of one to three digits; octet values are not checked.
fn looks_like_ipv4(text: &str) -> bool {
    let octets: Vec<&str> = text.split('.').collect();
    octets.len() == 4
        && octets
            .iter()
            .all(|o| (1..=3).contains(&o.len()) && o.bytes().all(|b| b.is_ascii_digit()))
}
