//! Topology input model: nodes, their interfaces and protocol metadata.

use otsim_common::{IoClass, Protocol};
use serde::Deserialize;

use crate::config::{
    CpuModuleSettings, GroundTruthSettings, LogsSettings, MessageBusSettings, explicit_null,
};
use crate::error::{CompileError, Result};
use crate::logic::LogicMetadata;
use crate::register::{RegisterKind, RegisterOverride};

/// The experiment topology handed over by the orchestrator.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Topology {
    #[serde(default)]
    pub nodes: Vec<Node>,
}

impl Topology {
    /// Parse a topology from JSON5 text.
    pub fn from_json5(content: &str) -> Result<Self> {
        Ok(otsim_common::parse_config(content)?)
    }

    /// Find a node by hostname.
    pub fn node(&self, hostname: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.hostname == hostname)
    }
}

/// A single topology node.
#[derive(Debug, Clone, Deserialize)]
pub struct Node {
    pub hostname: String,

    /// Node type: "fd-server", "fep", "fd-client" or anything else.
    #[serde(rename = "type")]
    pub node_type: String,

    #[serde(default)]
    pub metadata: NodeMetadata,

    /// Network interfaces, in declaration order.
    #[serde(default)]
    pub interfaces: Vec<Interface>,
}

impl Node {
    pub fn role(&self) -> Option<NodeRole> {
        NodeRole::from_node_type(&self.node_type)
    }

    /// Address of the interface with the given name.
    pub fn interface_address(&self, name: &str) -> Option<&str> {
        self.interfaces
            .iter()
            .find(|i| i.name == name)
            .and_then(|i| i.address.as_deref())
    }

    /// Address of the first interface, if it has one.
    pub fn first_address(&self) -> Option<&str> {
        self.interfaces.first().and_then(|i| i.address.as_deref())
    }
}

/// Role a node plays in the device graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    /// Field device server (RTU/PLC) backed by the I/O module.
    Server,
    /// Front-end processor: client upstream, server downstream.
    Gateway,
    /// Field device client (HMI, master station).
    Client,
}

impl NodeRole {
    pub fn from_node_type(node_type: &str) -> Option<Self> {
        match node_type {
            "fd-server" => Some(NodeRole::Server),
            "fep" => Some(NodeRole::Gateway),
            "fd-client" => Some(NodeRole::Client),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Server => "fd-server",
            NodeRole::Gateway => "fep",
            NodeRole::Client => "fd-client",
        }
    }
}

/// Network interface of a node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Interface {
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub vlan: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// Node metadata relevant to the compiler. Unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NodeMetadata {
    #[serde(default)]
    pub infrastructure: Option<String>,

    #[serde(default)]
    pub dnp3: Option<ProtocolMetadata>,

    #[serde(default)]
    pub modbus: Option<ProtocolMetadata>,

    #[serde(default)]
    pub upstream: Option<Vec<String>>,

    /// Legacy spelling of `upstream`.
    #[serde(default, rename = "connected_rtus")]
    pub connected_rtus: Option<Vec<String>>,

    /// Downstream protocol of a gateway: "dnp3" (default) or "modbus".
    #[serde(default)]
    pub downstream: Option<String>,

    #[serde(default)]
    pub logic: Option<LogicMetadata>,

    #[serde(default)]
    pub helics: Option<HelicsMetadata>,

    #[serde(default)]
    pub message_bus: Option<MessageBusSettings>,

    #[serde(default)]
    pub cpu_module: Option<CpuModuleSettings>,

    #[serde(default)]
    pub logs: Option<LogsSettings>,

    /// `Some(None)` when set to `null`, disabling an app-level module.
    #[serde(default, deserialize_with = "explicit_null")]
    pub ground_truth_module: Option<Option<GroundTruthSettings>>,
}

impl NodeMetadata {
    /// Upstream node names, falling back to the legacy `connected_rtus` key.
    pub fn upstream(&self) -> &[String] {
        self.upstream
            .as_deref()
            .or(self.connected_rtus.as_deref())
            .unwrap_or(&[])
    }

    pub fn protocol(&self, protocol: Protocol) -> Option<&ProtocolMetadata> {
        match protocol {
            Protocol::Dnp3 => self.dnp3.as_ref(),
            Protocol::Modbus => self.modbus.as_ref(),
        }
    }
}

/// `metadata.<protocol>`: either a bare device list or an object with
/// `devices` and an optional endpoint `interface`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ProtocolMetadata {
    List(Vec<RawDeviceRef>),
    Detailed {
        #[serde(default)]
        devices: Vec<RawDeviceRef>,
        #[serde(default)]
        interface: Option<String>,
    },
}

impl ProtocolMetadata {
    pub fn devices(&self) -> &[RawDeviceRef] {
        match self {
            ProtocolMetadata::List(devices) => devices,
            ProtocolMetadata::Detailed { devices, .. } => devices,
        }
    }

    /// Explicit endpoint interface (`ip|iface[:port]`), only in the object form.
    pub fn interface(&self) -> Option<&str> {
        match self {
            ProtocolMetadata::List(_) => None,
            ProtocolMetadata::Detailed { interface, .. } => interface.as_deref(),
        }
    }
}

/// Message endpoint of a device: a name, or `false` to disable it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum EndpointSetting {
    Name(String),
    Enabled(bool),
}

/// Protocol device reference as written in topology metadata.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct RawDeviceRef {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub device_type: Option<String>,
    #[serde(default)]
    pub endpoint: Option<EndpointSetting>,
    #[serde(default, rename = "analog-read")]
    pub analog_read: Vec<OverrideEntry>,
    #[serde(default, rename = "analog-read-write")]
    pub analog_read_write: Vec<OverrideEntry>,
    #[serde(default, rename = "binary-read")]
    pub binary_read: Vec<OverrideEntry>,
    #[serde(default, rename = "binary-read-write")]
    pub binary_read_write: Vec<OverrideEntry>,
}

impl RawDeviceRef {
    fn overrides(&self, class: IoClass) -> &[OverrideEntry] {
        match class {
            IoClass::AnalogRead => &self.analog_read,
            IoClass::AnalogReadWrite => &self.analog_read_write,
            IoClass::BinaryRead => &self.binary_read,
            IoClass::BinaryReadWrite => &self.binary_read_write,
        }
    }
}

/// Manual register number for one field of a device.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OverrideEntry {
    pub field: String,
    pub register_number: u32,
    pub register_type: RegisterKind,
}

/// HELICS settings, valid both at app level and per node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HelicsMetadata {
    #[serde(default)]
    pub broker: Option<BrokerMetadata>,
    #[serde(default)]
    pub federate: Option<FederateSetting>,
    #[serde(default)]
    pub endpoint: Option<EndpointSetting>,
}

/// Where the HELICS broker lives and how it is provisioned.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BrokerMetadata {
    /// Broker node, optionally `hostname|interface`.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Literal broker address, used when no hostname is given.
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub base_fed_count: Option<u32>,
    #[serde(default)]
    pub dynamic: Option<bool>,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub log_file: Option<String>,
}

/// Federate name, either bare or with a log level.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FederateSetting {
    Name(String),
    Detailed {
        #[serde(default)]
        name: Option<String>,
        #[serde(default, rename = "log-level")]
        log_level: Option<String>,
    },
}

impl FederateSetting {
    /// Federate name, if one is given.
    pub fn name(&self) -> Option<&str> {
        match self {
            FederateSetting::Name(name) => Some(name),
            FederateSetting::Detailed { name, .. } => name.as_deref(),
        }
    }

    pub fn log_level(&self) -> Option<&str> {
        match self {
            FederateSetting::Name(_) => None,
            FederateSetting::Detailed { log_level, .. } => log_level.as_deref(),
        }
    }
}

/// One validated protocol device reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolDeviceRef {
    /// Declared name, possibly prefixed with `federate/`.
    pub alias_name: String,
    /// Catalog device type key.
    pub device_type: String,
    /// Message endpoint setting, if declared.
    pub endpoint: Option<EndpointSetting>,
    /// Manual register numbers declared on this device.
    pub overrides: Vec<RegisterOverride>,
}

impl ProtocolDeviceRef {
    /// Name used in tags: the alias without its `federate/` prefix.
    pub fn tag_name(&self) -> &str {
        strip_federate(&self.alias_name)
    }
}

/// Strip an optional `federate/` prefix from a device name.
pub fn strip_federate(name: &str) -> &str {
    match name.split_once('/') {
        Some((_, rest)) => rest.split('/').next().unwrap_or(rest),
        None => name,
    }
}

/// A server node's protocol devices, validated and ready for resolution.
#[derive(Debug, Clone)]
pub struct DeviceDeclaration {
    pub name: String,
    pub infrastructure: String,
    pub protocol_entries: Vec<(Protocol, Vec<ProtocolDeviceRef>)>,
}

impl DeviceDeclaration {
    /// Build the declaration of a node, validating every device reference.
    pub fn from_node(node: &Node, default_infrastructure: &str) -> Result<Self> {
        let infrastructure = node
            .metadata
            .infrastructure
            .clone()
            .unwrap_or_else(|| default_infrastructure.to_string());

        let mut protocol_entries = Vec::new();
        for protocol in Protocol::ALL {
            let Some(meta) = node.metadata.protocol(protocol) else {
                continue;
            };

            let refs = meta
                .devices()
                .iter()
                .enumerate()
                .map(|(index, raw)| validate_ref(&node.hostname, protocol, index, raw))
                .collect::<Result<Vec<_>>>()?;

            protocol_entries.push((protocol, refs));
        }

        Ok(Self {
            name: node.hostname.clone(),
            infrastructure,
            protocol_entries,
        })
    }

    /// Every manual override declared by this node, across protocols.
    pub fn overrides(&self) -> impl Iterator<Item = &RegisterOverride> {
        self.protocol_entries
            .iter()
            .flat_map(|(_, refs)| refs.iter())
            .flat_map(|r| r.overrides.iter())
    }
}

fn validate_ref(
    node: &str,
    protocol: Protocol,
    index: usize,
    raw: &RawDeviceRef,
) -> Result<ProtocolDeviceRef> {
    let missing = |field| CompileError::MissingField {
        node: node.to_string(),
        protocol,
        index,
        field,
    };

    let alias_name = raw.name.clone().ok_or_else(|| missing("name"))?;
    let device_type = raw.device_type.clone().ok_or_else(|| missing("type"))?;
    let device_name = strip_federate(&alias_name).to_string();

    let overrides = IoClass::ALL
        .iter()
        .flat_map(|class| {
            raw.overrides(*class).iter().map(|entry| RegisterOverride {
                device_name: device_name.clone(),
                device_type: device_type.clone(),
                io_class: *class,
                field: entry.field.clone(),
                register_type: entry.register_type,
                register_number: entry.register_number,
            })
        })
        .collect();

    Ok(ProtocolDeviceRef {
        alias_name,
        device_type,
        endpoint: raw.endpoint.clone(),
        overrides,
    })
}
