//! AMQP endpoint descriptor and link roles.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::EndpointError;

/// URI scheme used for every AMQP connection (TLS is mandatory).
pub const AMQPS_SCHEME: &str = "amqps";

/// Direction of the single link opened on an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkRole {
    /// Sending link; the endpoint address is the target.
    Sender,
    /// Receiving link; the endpoint address is the source.
    Receiver,
}

impl LinkRole {
    /// Name of the endpoint field carrying the address for this role.
    pub fn address_field(&self) -> &'static str {
        match self {
            Self::Sender => "target",
            Self::Receiver => "source",
        }
    }
}

impl fmt::Display for LinkRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sender => write!(f, "sender"),
            Self::Receiver => write!(f, "receiver"),
        }
    }
}

/// Where to attach an AMQP link: host, port and the target/source address.
///
/// Construct through [`Endpoint::new`], which rejects empty hosts, port 0
/// and empty addresses, so a value of this type is always usable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    host: String,
    port: u16,
    address: String,
}

impl Endpoint {
    /// Create a validated endpoint.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        address: impl Into<String>,
    ) -> Result<Self, EndpointError> {
        let host = host.into();
        let address = address.into();

        if host.trim().is_empty() {
            return Err(EndpointError::EmptyHost);
        }
        if port == 0 {
            return Err(EndpointError::InvalidPort(port.to_string()));
        }
        if address.trim().is_empty() {
            return Err(EndpointError::EmptyAddress);
        }

        Ok(Self {
            host,
            port,
            address,
        })
    }

    /// Create an endpoint from string-valued settings (environment style).
    pub fn parse(host: &str, port: &str, address: &str) -> Result<Self, EndpointError> {
        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|_| EndpointError::InvalidPort(port.to_string()))?;
        Self::new(host, port, address)
    }

    /// Endpoint host name.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Endpoint port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Target (sender) or source (receiver) address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Secure connection URI, e.g. `amqps://broker:5671`.
    pub fn uri(&self) -> String {
        format!("{}://{}:{}", AMQPS_SCHEME, self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.uri(), self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_uses_secure_scheme() {
        let endpoint = Endpoint::new("h", 5671, "/t1").unwrap();
        assert_eq!(endpoint.uri(), "amqps://h:5671");
        assert_eq!(endpoint.address(), "/t1");
    }

    #[test]
    fn test_rejects_empty_host() {
        assert_eq!(
            Endpoint::new("  ", 5671, "/t1"),
            Err(EndpointError::EmptyHost)
        );
    }

    #[test]
    fn test_rejects_zero_port() {
        assert!(matches!(
            Endpoint::new("h", 0, "/t1"),
            Err(EndpointError::InvalidPort(_))
        ));
    }

    #[test]
    fn test_rejects_empty_address() {
        assert_eq!(
            Endpoint::new("h", 5671, ""),
            Err(EndpointError::EmptyAddress)
        );
    }

    #[test]
    fn test_parse_from_strings() {
        let endpoint = Endpoint::parse("broker", " 5671 ", "/s1").unwrap();
        assert_eq!(endpoint.port(), 5671);

        assert!(matches!(
            Endpoint::parse("broker", "amqp_endpoint_port", "/s1"),
            Err(EndpointError::InvalidPort(p)) if p == "amqp_endpoint_port"
        ));
        assert!(Endpoint::parse("broker", "70000", "/s1").is_err());
    }

    #[test]
    fn test_role_address_field() {
        assert_eq!(LinkRole::Sender.address_field(), "target");
        assert_eq!(LinkRole::Receiver.address_field(), "source");
    }
}
