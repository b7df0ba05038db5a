//! Abstract registers and their resolution from the catalog.

use otsim_common::{IoClass, Protocol};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{Dnp3Hints, FieldSpec, InfrastructureCatalog, ModbusHints, ValueRange};
use crate::error::Result;
use crate::topology::DeviceDeclaration;

/// Wire-level register type a point is allocated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegisterKind {
    Coil,
    #[serde(alias = "discrete")]
    DiscreteInput,
    #[serde(alias = "input")]
    InputRegister,
    #[serde(alias = "holding")]
    HoldingRegister,
    AnalogInput,
    AnalogOutput,
    BinaryInput,
    BinaryOutput,
}

impl RegisterKind {
    /// Register type a point of `class` occupies under `protocol`.
    pub fn for_point(protocol: Protocol, class: IoClass) -> Self {
        match (protocol, class) {
            (Protocol::Modbus, IoClass::BinaryReadWrite) => RegisterKind::Coil,
            (Protocol::Modbus, IoClass::BinaryRead) => RegisterKind::DiscreteInput,
            (Protocol::Modbus, IoClass::AnalogRead) => RegisterKind::InputRegister,
            (Protocol::Modbus, IoClass::AnalogReadWrite) => RegisterKind::HoldingRegister,
            (Protocol::Dnp3, IoClass::AnalogRead) => RegisterKind::AnalogInput,
            (Protocol::Dnp3, IoClass::AnalogReadWrite) => RegisterKind::AnalogOutput,
            (Protocol::Dnp3, IoClass::BinaryRead) => RegisterKind::BinaryInput,
            (Protocol::Dnp3, IoClass::BinaryReadWrite) => RegisterKind::BinaryOutput,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RegisterKind::Coil => "coil",
            RegisterKind::DiscreteInput => "discrete-input",
            RegisterKind::InputRegister => "input-register",
            RegisterKind::HoldingRegister => "holding-register",
            RegisterKind::AnalogInput => "analog-input",
            RegisterKind::AnalogOutput => "analog-output",
            RegisterKind::BinaryInput => "binary-input",
            RegisterKind::BinaryOutput => "binary-output",
        }
    }
}

/// One protocol-addressable point, before address allocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Register {
    /// Device name with any `federate/` prefix stripped.
    pub device_name: String,
    pub field: String,
    pub io_class: IoClass,
    pub device_type: String,
    pub protocol: Protocol,
    pub modbus: ModbusHints,
    pub dnp3: Dnp3Hints,
    /// Value bounds carried over from the catalog field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<ValueRange>,
    /// Server node that declared the point; its overrides govern numbering.
    pub source: String,
}

impl Register {
    /// Tag name shared by every module: `<device>.<field>`.
    pub fn tag(&self) -> String {
        format!("{}.{}", self.device_name, self.field)
    }

    pub fn kind(&self) -> RegisterKind {
        RegisterKind::for_point(self.protocol, self.io_class)
    }

    fn from_field(
        source: &str,
        protocol: Protocol,
        device_name: &str,
        device_type: &str,
        field: &str,
        spec: &FieldSpec,
    ) -> Self {
        Self {
            device_name: device_name.to_string(),
            field: field.to_string(),
            io_class: spec.io_class,
            device_type: device_type.to_string(),
            protocol,
            modbus: spec.modbus.clone(),
            dnp3: spec.dnp3.clone(),
            range: spec.range,
            source: source.to_string(),
        }
    }
}

/// User-declared register number, matched by exact tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterOverride {
    pub device_name: String,
    pub device_type: String,
    pub io_class: IoClass,
    pub field: String,
    pub register_type: RegisterKind,
    pub register_number: u32,
}

impl RegisterOverride {
    /// Whether this override applies to `register` allocated as `kind`.
    pub fn matches(&self, register: &Register, kind: RegisterKind) -> bool {
        self.device_name == register.device_name
            && self.device_type == register.device_type
            && self.io_class == register.io_class
            && self.field == register.field
            && self.register_type == kind
    }
}

/// Registers grouped per protocol, keeping the order protocols first appear.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegisterSet {
    groups: Vec<(Protocol, Vec<Register>)>,
}

impl RegisterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(|(_, regs)| regs.is_empty())
    }

    /// Total number of registers across protocols.
    pub fn len(&self) -> usize {
        self.groups.iter().map(|(_, regs)| regs.len()).sum()
    }

    /// Registers of one protocol.
    pub fn get(&self, protocol: Protocol) -> Option<&[Register]> {
        self.groups
            .iter()
            .find(|(p, _)| *p == protocol)
            .map(|(_, regs)| regs.as_slice())
    }

    /// Protocols present, in first-appearance order.
    pub fn protocols(&self) -> impl Iterator<Item = Protocol> + '_ {
        self.groups.iter().map(|(p, _)| *p)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Protocol, &[Register])> {
        self.groups.iter().map(|(p, regs)| (*p, regs.as_slice()))
    }

    /// Append registers to a protocol group, creating it if needed.
    pub fn extend(&mut self, protocol: Protocol, registers: impl IntoIterator<Item = Register>) {
        match self.groups.iter_mut().find(|(p, _)| *p == protocol) {
            Some((_, regs)) => regs.extend(registers),
            None => self.groups.push((protocol, registers.into_iter().collect())),
        }
    }

    /// Concatenate every group of `other` onto this set, per protocol.
    pub fn append(&mut self, other: &RegisterSet) {
        for (protocol, regs) in other.iter() {
            self.extend(protocol, regs.iter().cloned());
        }
    }

    /// All registers across protocols, group by group.
    pub fn flatten(&self) -> Vec<Register> {
        self.groups
            .iter()
            .flat_map(|(_, regs)| regs.iter().cloned())
            .collect()
    }
}

/// Expand a device declaration into per-protocol registers.
///
/// Field declaration order from the catalog is preserved, which keeps
/// register numbering deterministic.
pub fn resolve(decl: &DeviceDeclaration, catalog: &InfrastructureCatalog) -> Result<RegisterSet> {
    let mut set = RegisterSet::new();

    for (protocol, refs) in &decl.protocol_entries {
        let mut registers = Vec::new();

        for device in refs {
            let fields = catalog.require(&decl.name, &decl.infrastructure, &device.device_type)?;
            let name = device.tag_name();

            registers.extend(fields.iter().map(|(field, spec)| {
                Register::from_field(&decl.name, *protocol, name, &device.device_type, field, spec)
            }));
        }

        debug!(
            "Node '{}': resolved {} {} register(s)",
            decl.name,
            registers.len(),
            protocol
        );
        set.extend(*protocol, registers);
    }

    Ok(set)
}
