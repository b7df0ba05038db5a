//! Protocol endpoint resolution against a node's interfaces.

use otsim_common::Protocol;
use std::fmt;
use std::net::{IpAddr, Ipv6Addr};

use crate::error::{CompileError, Result};
use crate::topology::Node;

/// Default DNP3 TCP port.
pub const DNP3_PORT: u16 = 20000;
/// Default Modbus TCP port.
pub const MODBUS_PORT: u16 = 502;

pub fn default_port(protocol: Protocol) -> u16 {
    match protocol {
        Protocol::Dnp3 => DNP3_PORT,
        Protocol::Modbus => MODBUS_PORT,
    }
}

/// `host:port` a protocol module listens on or connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.parse::<Ipv6Addr>().is_ok() {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl Endpoint {
    /// Resolve the endpoint of `protocol` on `node`.
    ///
    /// `interface` is the `<ip|iface>[:port]` value from the node's protocol
    /// metadata; IPv6 literals take a port only in `[addr]:port` form.
    /// Without it, the node's first interface address is used with the
    /// protocol's default port.
    pub fn resolve(node: &Node, protocol: Protocol, interface: Option<&str>) -> Result<Self> {
        let Some(spec) = interface else {
            let host = node.first_address().ok_or_else(|| CompileError::MissingAddress {
                node: node.hostname.clone(),
            })?;

            return Ok(Self {
                host: host.to_string(),
                port: default_port(protocol),
            });
        };

        let (name, port) = split_host_port(node, protocol, spec)?;
        let port = match port {
            Some(port) => port.parse::<u16>().map_err(|_| {
                CompileError::config(format!(
                    "Node '{}': invalid {} port '{}'",
                    node.hostname, protocol, port
                ))
            })?,
            None => default_port(protocol),
        };

        let host = match name.parse::<IpAddr>() {
            Ok(ip) => ip.to_string(),
            Err(_) => node
                .interface_address(name)
                .ok_or_else(|| CompileError::UnresolvedInterface {
                    node: node.hostname.clone(),
                    interface: name.to_string(),
                })?
                .to_string(),
        };

        Ok(Self { host, port })
    }
}

/// Split `host[:port]`, accepting `[v6]:port` and bare IPv6 literals.
fn split_host_port<'s>(
    node: &Node,
    protocol: Protocol,
    spec: &'s str,
) -> Result<(&'s str, Option<&'s str>)> {
    if let Some(rest) = spec.strip_prefix('[') {
        let malformed = || {
            CompileError::config(format!(
                "Node '{}': malformed {} interface '{}'",
                node.hostname, protocol, spec
            ))
        };
        let (host, tail) = rest.split_once(']').ok_or_else(malformed)?;
        return match tail {
            "" => Ok((host, None)),
            _ => Ok((host, Some(tail.strip_prefix(':').ok_or_else(malformed)?))),
        };
    }

    if spec.parse::<IpAddr>().is_ok() {
        return Ok((spec, None));
    }

    Ok(match spec.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (spec, None),
    })
}
