//! Device graph resolution.
//!
//! Servers produce registers from the catalog. Gateways pull the registers
//! exposed by their upstream devices and re-expose them on one downstream
//! protocol. Clients consume without exposing anything. Resolution walks
//! upstream references depth-first; each device resolves at most once and a
//! device met again while still in progress is a cycle.

use otsim_common::Protocol;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::allocator::OverrideTable;
use crate::catalog::InfrastructureCatalog;
use crate::encoder::{DocumentBuilder, EncodePass};
use crate::endpoint::Endpoint;
use crate::error::{CompileError, Result};
use crate::register::{self, RegisterSet};
use crate::topology::{DeviceDeclaration, Node, NodeRole, Topology};

/// Module start order of devices that serve registers.
const SERVING_MODULE_ORDER: [Protocol; 2] = [Protocol::Dnp3, Protocol::Modbus];

/// Module start order of pure clients.
const CLIENT_MODULE_ORDER: [Protocol; 2] = [Protocol::Modbus, Protocol::Dnp3];

/// What every kind of device can do in the graph.
pub trait Device {
    /// Names of the devices this one consumes from.
    fn upstream(&self) -> &[String];

    /// Compute this device's registers from its upstream devices' exposed sets.
    fn process(
        &self,
        catalog: &InfrastructureCatalog,
        upstream: &[RegisterSet],
    ) -> Result<RegisterSet>;

    /// Registers this device offers to its downstream consumers.
    fn exposed(&self, registers: &RegisterSet) -> RegisterSet;

    /// Emit this device's protocol sections.
    fn configure(
        &self,
        device: &GraphDevice<'_>,
        graph: &DeviceGraph<'_>,
        doc: &mut DocumentBuilder,
    ) -> Result<()>;
}

/// Field device server.
#[derive(Debug, Clone)]
pub struct ServerDevice {
    pub declaration: DeviceDeclaration,
}

/// Protocol a gateway serves downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Downstream {
    Protocol(Protocol),
    /// Unrecognised setting; no downstream block is emitted.
    Unsupported(String),
}

impl Downstream {
    /// Unset or blank settings select DNP3.
    pub fn from_setting(setting: Option<&str>) -> Self {
        let name = setting.map(str::trim).unwrap_or_default();
        if name.is_empty() {
            return Downstream::Protocol(Protocol::Dnp3);
        }

        match Protocol::from_name(name) {
            Some(protocol) => Downstream::Protocol(protocol),
            None => Downstream::Unsupported(name.to_string()),
        }
    }
}

/// Front-end processor.
#[derive(Debug, Clone)]
pub struct GatewayDevice {
    pub upstream: Vec<String>,
    pub downstream: Downstream,
}

/// Field device client.
#[derive(Debug, Clone)]
pub struct ClientDevice {
    pub upstream: Vec<String>,
}

/// A device of any kind.
#[derive(Debug, Clone)]
pub enum DeviceKind {
    Server(ServerDevice),
    Gateway(GatewayDevice),
    Client(ClientDevice),
}

impl DeviceKind {
    pub fn role(&self) -> NodeRole {
        match self {
            DeviceKind::Server(_) => NodeRole::Server,
            DeviceKind::Gateway(_) => NodeRole::Gateway,
            DeviceKind::Client(_) => NodeRole::Client,
        }
    }

    fn inner(&self) -> &dyn Device {
        match self {
            DeviceKind::Server(d) => d,
            DeviceKind::Gateway(d) => d,
            DeviceKind::Client(d) => d,
        }
    }
}

impl Device for DeviceKind {
    fn upstream(&self) -> &[String] {
        self.inner().upstream()
    }

    fn process(
        &self,
        catalog: &InfrastructureCatalog,
        upstream: &[RegisterSet],
    ) -> Result<RegisterSet> {
        self.inner().process(catalog, upstream)
    }

    fn exposed(&self, registers: &RegisterSet) -> RegisterSet {
        self.inner().exposed(registers)
    }

    fn configure(
        &self,
        device: &GraphDevice<'_>,
        graph: &DeviceGraph<'_>,
        doc: &mut DocumentBuilder,
    ) -> Result<()> {
        self.inner().configure(device, graph, doc)
    }
}

impl Device for ServerDevice {
    fn upstream(&self) -> &[String] {
        &[]
    }

    fn process(&self, catalog: &InfrastructureCatalog, _: &[RegisterSet]) -> Result<RegisterSet> {
        register::resolve(&self.declaration, catalog)
    }

    fn exposed(&self, registers: &RegisterSet) -> RegisterSet {
        registers.clone()
    }

    fn configure(
        &self,
        device: &GraphDevice<'_>,
        _: &DeviceGraph<'_>,
        doc: &mut DocumentBuilder,
    ) -> Result<()> {
        for (protocol, registers) in device.registers.iter() {
            let endpoint = protocol_endpoint(device.node, protocol)?;
            let pass = EncodePass::server(&device.node.hostname, endpoint, &device.overrides);
            doc.add_section(pass.encode(protocol, registers)?);
        }
        doc.activate_protocols(&SERVING_MODULE_ORDER);
        Ok(())
    }
}

impl Device for GatewayDevice {
    fn upstream(&self) -> &[String] {
        &self.upstream
    }

    /// Concatenate upstream sets per protocol, in upstream order. Points
    /// reachable through two upstream paths appear twice.
    fn process(&self, _: &InfrastructureCatalog, upstream: &[RegisterSet]) -> Result<RegisterSet> {
        let mut set = RegisterSet::new();
        for exposed in upstream {
            set.append(exposed);
        }
        Ok(set)
    }

    fn exposed(&self, registers: &RegisterSet) -> RegisterSet {
        let mut set = RegisterSet::new();
        if let Downstream::Protocol(protocol) = self.downstream {
            set.extend(protocol, registers.flatten());
        }
        set
    }

    fn configure(
        &self,
        device: &GraphDevice<'_>,
        graph: &DeviceGraph<'_>,
        doc: &mut DocumentBuilder,
    ) -> Result<()> {
        configure_clients(device, &self.upstream, graph, doc)?;

        match &self.downstream {
            Downstream::Protocol(protocol) => {
                let endpoint = protocol_endpoint(device.node, *protocol)?;
                let pass = EncodePass::server(&device.node.hostname, endpoint, &device.overrides);
                doc.add_section(pass.encode(*protocol, &device.registers.flatten())?);
            }
            Downstream::Unsupported(name) => {
                warn!(
                    "Gateway '{}': unsupported downstream protocol '{}', no downstream block emitted",
                    device.node.hostname, name
                );
            }
        }

        doc.activate_protocols(&SERVING_MODULE_ORDER);
        Ok(())
    }
}

impl Device for ClientDevice {
    fn upstream(&self) -> &[String] {
        &self.upstream
    }

    fn process(&self, _: &InfrastructureCatalog, _: &[RegisterSet]) -> Result<RegisterSet> {
        Ok(RegisterSet::new())
    }

    fn exposed(&self, _: &RegisterSet) -> RegisterSet {
        RegisterSet::new()
    }

    fn configure(
        &self,
        device: &GraphDevice<'_>,
        graph: &DeviceGraph<'_>,
        doc: &mut DocumentBuilder,
    ) -> Result<()> {
        configure_clients(device, &self.upstream, graph, doc)?;
        doc.activate_protocols(&CLIENT_MODULE_ORDER);
        Ok(())
    }
}

/// One client section per protocol exposed by each upstream device.
fn configure_clients(
    device: &GraphDevice<'_>,
    upstream: &[String],
    graph: &DeviceGraph<'_>,
    doc: &mut DocumentBuilder,
) -> Result<()> {
    for name in upstream {
        let target = graph
            .device(name)
            .ok_or_else(|| CompileError::UnresolvedReference {
                node: device.node.hostname.clone(),
                reference: name.clone(),
            })?;

        let exposed = target.exposed();
        for (protocol, registers) in exposed.iter() {
            let endpoint = protocol_endpoint(target.node, protocol)?;
            let pass =
                EncodePass::client(&device.node.hostname, name, endpoint, &target.overrides);
            doc.add_section(pass.encode(protocol, registers)?);
        }
    }
    Ok(())
}

fn protocol_endpoint(node: &Node, protocol: Protocol) -> Result<Endpoint> {
    let interface = node.metadata.protocol(protocol).and_then(|m| m.interface());
    Endpoint::resolve(node, protocol, interface)
}

/// Resolution progress of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionState {
    Pending,
    InProgress,
    Resolved,
}

/// A device in the graph together with its resolution results.
#[derive(Debug, Clone)]
pub struct GraphDevice<'t> {
    pub node: &'t Node,
    pub kind: DeviceKind,
    pub state: ResolutionState,
    pub registers: RegisterSet,
    /// Manual numbers that govern sections encoding this device's registers.
    pub overrides: OverrideTable,
}

impl GraphDevice<'_> {
    pub fn hostname(&self) -> &str {
        &self.node.hostname
    }

    pub fn role(&self) -> NodeRole {
        self.kind.role()
    }

    pub fn exposed(&self) -> RegisterSet {
        self.kind.exposed(&self.registers)
    }
}

/// All devices of a topology, keyed by hostname.
#[derive(Debug)]
pub struct DeviceGraph<'t> {
    devices: Vec<GraphDevice<'t>>,
    index: HashMap<String, usize>,
    resolution_order: Vec<String>,
}

impl<'t> DeviceGraph<'t> {
    /// Build the graph from every server, gateway and client node.
    pub fn build(topology: &'t Topology, default_infrastructure: &str) -> Result<Self> {
        let mut devices = Vec::new();
        let mut index = HashMap::new();

        for node in &topology.nodes {
            let Some(role) = node.role() else {
                continue;
            };

            let (kind, overrides) = match role {
                NodeRole::Server => {
                    let declaration = DeviceDeclaration::from_node(node, default_infrastructure)?;
                    let overrides: OverrideTable = declaration.overrides().cloned().collect();
                    (DeviceKind::Server(ServerDevice { declaration }), overrides)
                }
                NodeRole::Gateway => {
                    let downstream = Downstream::from_setting(node.metadata.downstream.as_deref());
                    let gateway = GatewayDevice {
                        upstream: node.metadata.upstream().to_vec(),
                        downstream,
                    };
                    (DeviceKind::Gateway(gateway), OverrideTable::new())
                }
                NodeRole::Client => {
                    let client = ClientDevice {
                        upstream: node.metadata.upstream().to_vec(),
                    };
                    (DeviceKind::Client(client), OverrideTable::new())
                }
            };

            if index.insert(node.hostname.clone(), devices.len()).is_some() {
                return Err(CompileError::config(format!(
                    "Duplicate device hostname '{}'",
                    node.hostname
                )));
            }

            devices.push(GraphDevice {
                node,
                kind,
                state: ResolutionState::Pending,
                registers: RegisterSet::new(),
                overrides,
            });
        }

        Ok(Self {
            devices,
            index,
            resolution_order: Vec::new(),
        })
    }

    /// Resolve every device: servers, then gateways, then clients.
    pub fn resolve_all(&mut self, catalog: &InfrastructureCatalog) -> Result<()> {
        for role in [NodeRole::Server, NodeRole::Gateway, NodeRole::Client] {
            for position in 0..self.devices.len() {
                if self.devices[position].role() == role {
                    self.resolve_at(position, catalog, &mut Vec::new())?;
                }
            }
        }

        info!("Resolved {} device(s)", self.resolution_order.len());
        Ok(())
    }

    /// Resolve one device and, first, everything upstream of it.
    pub fn resolve(&mut self, hostname: &str, catalog: &InfrastructureCatalog) -> Result<()> {
        let position = self
            .position(hostname)
            .ok_or_else(|| CompileError::config(format!("Unknown device '{}'", hostname)))?;
        self.resolve_at(position, catalog, &mut Vec::new())
    }

    fn resolve_at(
        &mut self,
        position: usize,
        catalog: &InfrastructureCatalog,
        stack: &mut Vec<String>,
    ) -> Result<()> {
        let hostname = self.devices[position].node.hostname.clone();

        match self.devices[position].state {
            ResolutionState::Resolved => return Ok(()),
            ResolutionState::InProgress => {
                let start = stack.iter().position(|n| *n == hostname).unwrap_or(0);
                let mut path = stack[start..].to_vec();
                path.push(hostname);
                return Err(CompileError::Cycle { path });
            }
            ResolutionState::Pending => {}
        }

        self.devices[position].state = ResolutionState::InProgress;
        stack.push(hostname.clone());

        let upstream_names = self.devices[position].kind.upstream().to_vec();
        let mut upstream = Vec::with_capacity(upstream_names.len());

        for name in &upstream_names {
            let up = self
                .position(name)
                .ok_or_else(|| CompileError::UnresolvedReference {
                    node: hostname.clone(),
                    reference: name.clone(),
                })?;

            self.resolve_at(up, catalog, stack)?;
            upstream.push(self.devices[up].exposed());
        }

        let registers = self.devices[position].kind.process(catalog, &upstream)?;
        debug!(
            "Device '{}' ({}): {} register(s)",
            hostname,
            self.devices[position].role().as_str(),
            registers.len()
        );

        let device = &mut self.devices[position];
        device.registers = registers;
        device.state = ResolutionState::Resolved;

        stack.pop();
        self.resolution_order.push(hostname);
        Ok(())
    }

    fn position(&self, hostname: &str) -> Option<usize> {
        self.index.get(hostname).copied()
    }

    pub fn device(&self, hostname: &str) -> Option<&GraphDevice<'t>> {
        self.position(hostname).map(|p| &self.devices[p])
    }

    pub fn devices(&self) -> impl Iterator<Item = &GraphDevice<'t>> {
        self.devices.iter()
    }

    /// Devices of one role, in topology order.
    pub fn devices_with_role(&self, role: NodeRole) -> impl Iterator<Item = &GraphDevice<'t>> {
        self.devices.iter().filter(move |d| d.role() == role)
    }

    /// Hostnames in the order their resolution completed.
    pub fn resolution_order(&self) -> &[String] {
        &self.resolution_order
    }

    /// Emit the protocol sections of one device.
    pub fn configure(&self, hostname: &str, doc: &mut DocumentBuilder) -> Result<()> {
        let device = self
            .device(hostname)
            .ok_or_else(|| CompileError::config(format!("Unknown device '{}'", hostname)))?;
        device.kind.configure(device, self, doc)
    }
}
