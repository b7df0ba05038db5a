//! I/O module section: the server's HELICS federate.
//!
//! Every protocol device on a server maps to simulation topics. Read
//! points subscribe to `<federate>/<device>.<field>`; writable points send
//! updates to a message endpoint, or publish when the endpoint is disabled.

use otsim_common::IoClass;
use serde::Serialize;
use tracing::debug;

use crate::catalog::InfrastructureCatalog;
use crate::config::CompilerConfig;
use crate::error::{CompileError, Result};
use crate::federation::BrokerRegistry;
use crate::topology::{DeviceDeclaration, EndpointSetting, Node, Topology, strip_federate};

pub const DEFAULT_FEDERATE_LOG_LEVEL: &str = "SUMMARY";

/// A protocol device as seen by the federation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederateDevice {
    /// `<federate>/<device>`.
    pub topic: String,
    pub device_type: String,
    /// Qualified message endpoint; `None` when disabled.
    pub endpoint: Option<String>,
}

impl FederateDevice {
    pub fn tag_name(&self) -> &str {
        strip_federate(&self.topic)
    }

    fn federate(&self) -> &str {
        self.topic.split('/').next().unwrap_or(&self.topic)
    }
}

/// Value type carried by a HELICS topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Double,
    Boolean,
}

impl ValueType {
    pub fn for_class(class: IoClass) -> Self {
        if class.is_analog() {
            ValueType::Double
        } else {
            ValueType::Boolean
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Double => "double",
            ValueType::Boolean => "boolean",
        }
    }
}

/// Direction of a topic binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicKind {
    Subscription,
    Publication,
}

impl TopicKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicKind::Subscription => "subscription",
            TopicKind::Publication => "publication",
        }
    }
}

/// `<subscription>` or `<publication>` element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicBinding {
    pub kind: TopicKind,
    pub key: String,
    pub tag: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
}

/// Named message endpoint and the tags it forwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageEndpoint {
    pub name: String,
    pub tags: Vec<String>,
}

/// `<io name="helics-federate">` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct IoSection {
    pub name: String,
    pub broker_endpoint: String,
    pub federate_name: String,
    pub federate_log_level: String,
    pub topics: Vec<TopicBinding>,
    pub endpoints: Vec<MessageEndpoint>,
}

impl IoSection {
    /// Build the I/O section of a server, or `None` if it declares no
    /// protocol devices.
    pub fn for_server(
        node: &Node,
        decl: &DeviceDeclaration,
        catalog: &InfrastructureCatalog,
        config: &CompilerConfig,
        topology: &Topology,
        brokers: &mut BrokerRegistry,
    ) -> Result<Option<Self>> {
        let devices = federate_devices(decl, config)?;
        if devices.is_empty() {
            return Ok(None);
        }

        let helics = node.metadata.helics.as_ref();
        let broker = helics
            .and_then(|h| h.broker.as_ref())
            .or(config.helics.broker.as_ref())
            .ok_or_else(|| {
                CompileError::config(format!(
                    "Node '{}': no HELICS broker configured",
                    node.hostname
                ))
            })?;
        let broker_endpoint = brokers.resolve(broker, topology, &node.hostname)?;

        let federate = helics.and_then(|h| h.federate.as_ref());
        let federate_name = federate
            .and_then(|f| f.name())
            .unwrap_or(&node.hostname)
            .to_string();
        let federate_log_level = federate
            .and_then(|f| f.log_level())
            .unwrap_or(DEFAULT_FEDERATE_LOG_LEVEL)
            .to_string();

        let mut topics = Vec::new();
        let mut endpoints: Vec<MessageEndpoint> = Vec::new();

        for device in &devices {
            let fields = catalog.require(&decl.name, &decl.infrastructure, &device.device_type)?;
            let tag_name = device.tag_name();

            for (field, spec) in fields.iter() {
                let tag = format!("{}.{}", tag_name, field);
                let value_type = ValueType::for_class(spec.io_class);

                if !spec.io_class.is_writable() {
                    topics.push(TopicBinding {
                        kind: TopicKind::Subscription,
                        key: format!("{}.{}", device.topic, field),
                        tag,
                        value_type,
                    });
                    continue;
                }

                match &device.endpoint {
                    Some(name) => match endpoints.iter_mut().find(|e| &e.name == name) {
                        Some(endpoint) => endpoint.tags.push(tag),
                        None => endpoints.push(MessageEndpoint {
                            name: name.clone(),
                            tags: vec![tag],
                        }),
                    },
                    None => topics.push(TopicBinding {
                        kind: TopicKind::Publication,
                        key: tag.clone(),
                        tag,
                        value_type,
                    }),
                }
            }
        }

        debug!(
            "Node '{}': I/O module with {} topic(s) and {} endpoint(s)",
            node.hostname,
            topics.len(),
            endpoints.len()
        );

        Ok(Some(Self {
            name: "helics-federate".to_string(),
            broker_endpoint,
            federate_name,
            federate_log_level,
            topics,
            endpoints,
        }))
    }
}

/// Unique federate devices of a server across protocols.
///
/// Bare names are qualified with the default federate and bare endpoints
/// with the device's own federate. A name declared twice must agree.
pub fn federate_devices(
    decl: &DeviceDeclaration,
    config: &CompilerConfig,
) -> Result<Vec<FederateDevice>> {
    let default_federate = config.default_federate();
    let mut devices: Vec<FederateDevice> = Vec::new();

    for (_, refs) in &decl.protocol_entries {
        for device_ref in refs {
            let topic = if device_ref.alias_name.contains('/') {
                device_ref.alias_name.clone()
            } else {
                format!("{}/{}", default_federate, device_ref.alias_name)
            };

            let mut device = FederateDevice {
                topic,
                device_type: device_ref.device_type.clone(),
                endpoint: None,
            };

            device.endpoint = match &device_ref.endpoint {
                None | Some(EndpointSetting::Enabled(true)) => config.default_endpoint(),
                Some(EndpointSetting::Enabled(false)) => None,
                Some(EndpointSetting::Name(name)) if name.contains('/') => Some(name.clone()),
                Some(EndpointSetting::Name(name)) => {
                    Some(format!("{}/{}", device.federate(), name))
                }
            };

            match devices.iter().find(|d| d.topic == device.topic) {
                Some(existing) if *existing != device => {
                    return Err(CompileError::Conflict {
                        node: decl.name.clone(),
                        device: device.topic,
                    });
                }
                Some(_) => {}
                None => devices.push(device),
            }
        }
    }

    Ok(devices)
}
