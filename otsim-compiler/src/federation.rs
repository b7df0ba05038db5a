//! HELICS broker resolution and federation annotations.
//!
//! Servers with an I/O module join a HELICS federation. Brokers provisioned
//! by the experiment are tracked here so a later step can start them with
//! the right federate count.

use serde::Serialize;
use tracing::debug;

use crate::error::{CompileError, Result};
use crate::topology::{BrokerMetadata, Topology};

pub const DEFAULT_BROKER_LOG_LEVEL: &str = "SUMMARY";
pub const DEFAULT_BROKER_LOG_FILE: &str = "/var/log/helics-broker.log";

/// Provisioning details for one broker host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct FederationAnnotation {
    /// Topology node hosting the broker.
    pub hostname: String,
    pub broker_endpoint: String,
    /// Federates expected to connect, including the base count.
    pub federate_count: u32,
    pub dynamic: bool,
    pub log_level: String,
    pub log_file: String,
}

/// Broker annotations keyed by broker host, in first-use order.
#[derive(Debug, Clone, Default)]
pub struct BrokerRegistry {
    annotations: Vec<FederationAnnotation>,
}

impl BrokerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the broker endpoint for a federate hosted on `requester`.
    ///
    /// A `hostname` (optionally `host|iface`) is looked up in the topology;
    /// otherwise the literal `address` is used. Tracked brokers count one
    /// more federate per call.
    pub fn resolve(
        &mut self,
        broker: &BrokerMetadata,
        topology: &Topology,
        requester: &str,
    ) -> Result<String> {
        let Some(spec) = broker.hostname.as_deref() else {
            return broker.address.clone().ok_or_else(|| {
                CompileError::config(format!(
                    "Node '{}': HELICS broker needs a hostname or an address",
                    requester
                ))
            });
        };

        let (hostname, iface) = match spec.split_once('|') {
            Some((host, iface)) => (host, Some(iface)),
            None => (spec, None),
        };

        let node = topology
            .node(hostname)
            .ok_or_else(|| CompileError::UnresolvedReference {
                node: requester.to_string(),
                reference: hostname.to_string(),
            })?;

        let address = match iface {
            Some(iface) => node.interface_address(iface).ok_or_else(|| {
                CompileError::UnresolvedInterface {
                    node: hostname.to_string(),
                    interface: iface.to_string(),
                }
            })?,
            None => node
                .first_address()
                .ok_or_else(|| CompileError::MissingAddress {
                    node: hostname.to_string(),
                })?,
        };

        if broker.base_fed_count.is_some() || broker.dynamic.is_some() {
            self.track(hostname, address, broker);
        }

        Ok(address.to_string())
    }

    fn track(&mut self, hostname: &str, address: &str, broker: &BrokerMetadata) {
        let index = match self.annotations.iter().position(|a| a.hostname == hostname) {
            Some(index) => index,
            None => {
                self.annotations.push(FederationAnnotation {
                    hostname: hostname.to_string(),
                    broker_endpoint: address.to_string(),
                    federate_count: broker.base_fed_count.unwrap_or(0),
                    dynamic: broker.dynamic.unwrap_or(false),
                    log_level: broker
                        .log_level
                        .clone()
                        .unwrap_or_else(|| DEFAULT_BROKER_LOG_LEVEL.to_string()),
                    log_file: broker
                        .log_file
                        .clone()
                        .unwrap_or_else(|| DEFAULT_BROKER_LOG_FILE.to_string()),
                });
                self.annotations.len() - 1
            }
        };

        let annotation = &mut self.annotations[index];
        annotation.federate_count += 1;
        debug!(
            "Broker '{}' now expects {} federate(s)",
            hostname, annotation.federate_count
        );
    }

    pub fn annotations(&self) -> &[FederationAnnotation] {
        &self.annotations
    }

    pub fn into_annotations(self) -> Vec<FederationAnnotation> {
        self.annotations
    }
}
