//! Endpoint string parsing and connect option assembly.
//!
//! A device property can carry up to three `host[:port]` style endpoints:
//! target, local and router. Splitting happens once at the first `:`; no
//! host validation is performed here, a malformed host surfaces as a
//! connection failure in the transport rather than a parse error.

use std::fmt;

use crate::config::DeviceProperty;
use crate::error::DeviceError;

/// Default local AMS port when the `local` endpoint omits one.
pub const DEFAULT_LOCAL_PORT: u16 = 32750;
/// Default router TCP port when the `router` endpoint omits one.
pub const DEFAULT_ROUTER_PORT: u16 = 48898;

/// One parsed `host[:port]` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: Option<u16>,
}

impl Endpoint {
    /// Split at the first `:`. Without a `:` the whole string is the host
    /// and the caller's default port applies. An unparsable port is
    /// treated the same as an absent one.
    pub fn parse(input: &str) -> Self {
        match input.split_once(':') {
            Some((host, port)) => Self {
                host: host.to_owned(),
                port: port.parse().ok(),
            },
            None => Self {
                host: input.to_owned(),
                port: None,
            },
        }
    }
}

/// A resolved AMS endpoint with a concrete port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmsAddress {
    pub net_id: String,
    pub port: u16,
}

impl fmt::Display for AmsAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.net_id, self.port)
    }
}

/// Options handed to the transport when opening a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub target: AmsAddress,
    pub local: Option<AmsAddress>,
    pub router: Option<AmsAddress>,
}

impl ConnectOptions {
    /// Build connect options from the device property block.
    ///
    /// The target port has no default: it must come either embedded in
    /// the address string or from the explicit `port` property.
    ///
    /// # Errors
    /// [`DeviceError::MissingConfig`] when the address or the target port
    /// is absent.
    pub fn build(property: &DeviceProperty) -> Result<Self, DeviceError> {
        let address = property
            .address
            .as_deref()
            .filter(|a| !a.is_empty())
            .ok_or(DeviceError::MissingConfig("address"))?;

        let target = Endpoint::parse(address);
        let target_port = target
            .port
            .or(property.port)
            .ok_or(DeviceError::MissingConfig("target port"))?;

        let local = property.local.as_deref().map(|raw| {
            let endpoint = Endpoint::parse(raw);
            AmsAddress {
                net_id: endpoint.host,
                port: endpoint.port.unwrap_or(DEFAULT_LOCAL_PORT),
            }
        });

        let router = property.router.as_deref().map(|raw| {
            let endpoint = Endpoint::parse(raw);
            AmsAddress {
                net_id: endpoint.host,
                port: endpoint.port.unwrap_or(DEFAULT_ROUTER_PORT),
            }
        });

        Ok(Self {
            target: AmsAddress {
                net_id: target.host,
                port: target_port,
            },
            local,
            router,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_without_colon_keeps_default_port() {
        let endpoint = Endpoint::parse("192.168.1.20.1.1");
        assert_eq!(endpoint.host, "192.168.1.20.1.1");
        assert_eq!(endpoint.port, None);
    }

    #[test]
    fn endpoint_with_colon_splits_host_and_port() {
        let endpoint = Endpoint::parse("1.2.3.4:1000");
        assert_eq!(endpoint.host, "1.2.3.4");
        assert_eq!(endpoint.port, Some(1000));
    }

    #[test]
    fn endpoint_with_bad_port_falls_back_to_default() {
        let endpoint = Endpoint::parse("1.2.3.4:abc");
        assert_eq!(endpoint.host, "1.2.3.4");
        assert_eq!(endpoint.port, None);
    }

    #[test]
    fn build_requires_an_address() {
        let property = DeviceProperty::default();
        assert!(matches!(
            ConnectOptions::build(&property),
            Err(DeviceError::MissingConfig("address"))
        ));
    }

    #[test]
    fn build_requires_an_explicit_target_port() {
        let property = DeviceProperty {
            address: Some("1.2.3.4.1.1".into()),
            ..DeviceProperty::default()
        };
        assert!(matches!(
            ConnectOptions::build(&property),
            Err(DeviceError::MissingConfig("target port"))
        ));
    }

    #[test]
    fn build_takes_port_from_address_over_property() {
        let property = DeviceProperty {
            address: Some("1.2.3.4.1.1:851".into()),
            port: Some(30012),
            ..DeviceProperty::default()
        };
        let options = ConnectOptions::build(&property).unwrap();
        assert_eq!(options.target.net_id, "1.2.3.4.1.1");
        assert_eq!(options.target.port, 851);
    }

    #[test]
    fn build_applies_local_and_router_defaults() {
        let property = DeviceProperty {
            address: Some("1.2.3.4.1.1".into()),
            port: Some(851),
            local: Some("10.0.0.5.1.1".into()),
            router: Some("10.0.0.9".into()),
        };
        let options = ConnectOptions::build(&property).unwrap();
        assert_eq!(options.local.unwrap().port, DEFAULT_LOCAL_PORT);
        assert_eq!(options.router.unwrap().port, DEFAULT_ROUTER_PORT);
    }

    #[test]
    fn build_honors_explicit_local_and_router_ports() {
        let property = DeviceProperty {
            address: Some("1.2.3.4.1.1:851".into()),
            port: None,
            local: Some("10.0.0.5.1.1:40000".into()),
            router: Some("10.0.0.9:50000".into()),
        };
        let options = ConnectOptions::build(&property).unwrap();
        assert_eq!(options.local.unwrap().port, 40000);
        assert_eq!(options.router.unwrap().port, 50000);
    }
}
