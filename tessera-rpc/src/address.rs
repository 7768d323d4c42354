use crate::error::{Error, Result};
use derive_more::{Display, From};
use std::{net::SocketAddr, str::FromStr};

/// Where a client connects to.
///
/// An unresolved `host:port` is looked up right before every connect
/// attempt, so a name that only becomes resolvable later still works on a
/// retry.
#[derive(Debug, Display, From, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    Resolved(SocketAddr),
    #[display("{host}:{port}")]
    #[from(ignore)]
    Unresolved { host: String, port: u16 },
}

impl Address {
    /// Keeps `host_port` unresolved even if it is a literal ip address.
    pub fn unresolved(host_port: &str) -> Result<Self> {
        let invalid = || Error::UnresolvedAddress(format!("invalid host:port `{host_port}`"));
        let (host, port) = host_port.rsplit_once(':').ok_or_else(invalid)?;
        let port = port.parse().map_err(|_| invalid())?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid());
        }
        Ok(Address::Unresolved {
            host: host.to_string(),
            port,
        })
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Address::Resolved(_))
    }

    pub async fn resolve(&self) -> Result<SocketAddr> {
        match self {
            Address::Resolved(addr) => Ok(*addr),
            Address::Unresolved { host, port } => {
                let mut addrs = tokio::net::lookup_host((host.as_str(), *port))
                    .await
                    .map_err(|e| Error::UnresolvedAddress(format!("{self}: {e}")))?;
                addrs
                    .next()
                    .ok_or_else(|| Error::UnresolvedAddress(format!("{self}: no addresses")))
            }
        }
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<SocketAddr>() {
            Ok(addr) => Ok(Address::Resolved(addr)),
            Err(_) => Address::unresolved(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_forms() {
        let resolved: Address = "127.0.0.1:80".parse().unwrap();
        assert!(resolved.is_resolved());

        let named: Address = "worker-3.cluster:9010".parse().unwrap();
        assert_eq!(
            named,
            Address::Unresolved {
                host: "worker-3.cluster".into(),
                port: 9010
            }
        );
        assert_eq!(named.to_string(), "worker-3.cluster:9010");

        assert!("no-port".parse::<Address>().is_err());
        assert!(":80".parse::<Address>().is_err());
        assert!("host:http".parse::<Address>().is_err());
    }

    #[test]
    fn unresolved_literal_ipv6() {
        let address = Address::unresolved("[::1]:7000").unwrap();
        assert_eq!(
            address,
            Address::Unresolved {
                host: "::1".into(),
                port: 7000
            }
        );
    }

    #[tokio::test]
    async fn resolves_at_use() {
        let address = Address::unresolved("127.0.0.1:4321").unwrap();
        assert!(!address.is_resolved());
        assert_eq!(
            address.resolve().await.unwrap(),
            "127.0.0.1:4321".parse::<SocketAddr>().unwrap()
        );
    }
}
