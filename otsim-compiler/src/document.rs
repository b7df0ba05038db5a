//! Output configuration document.
//!
//! One [`ConfigDocument`] is produced per device. It serializes with serde
//! (JSON/CBOR) and renders to the simulator's XML format via [`crate::xml`].

use serde::Serialize;

use crate::allocator::Mode;
use crate::io_module::IoSection;
use crate::logic::LogicSection;
use crate::ordered::OrderedMap;

/// VM path of the CPU API private key.
pub const API_KEY_DESTINATION: &str = "/etc/ot-sim/certs/api.key";
/// VM path of the CPU API certificate.
pub const API_CERTIFICATE_DESTINATION: &str = "/etc/ot-sim/certs/api.crt";
/// VM path of the CA certificate the CPU API trusts.
pub const API_CA_DESTINATION: &str = "/etc/ot-sim/certs/api.ca.crt";

/// Complete simulator configuration for one device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigDocument {
    pub hostname: String,
    pub message_bus: MessageBus,
    pub cpu: Cpu,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ground_truth: Option<GroundTruthSection>,
    pub protocols: Vec<ProtocolSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub io: Option<IoSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logic: Option<LogicSection>,
}

impl ConfigDocument {
    /// Protocol sections of one mode.
    pub fn sections(&self, mode: Mode) -> impl Iterator<Item = &ProtocolSection> {
        self.protocols.iter().filter(move |s| s.mode() == mode)
    }
}

/// Message bus endpoints shared by every module of the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct MessageBus {
    pub pull_endpoint: String,
    pub pub_endpoint: String,
}

/// CPU module: optional API and log shipping, plus the module-activation
/// manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cpu {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api: Option<ApiSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<LogsSection>,
    pub modules: ModuleManifest,
}

/// CPU API listener. TLS paths point at files injected onto the VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ApiSection {
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_certificate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_certificate: Option<String>,
}

impl ApiSection {
    /// Plain-text API on `endpoint`.
    pub fn plain(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            tls_key: None,
            tls_certificate: None,
            ca_certificate: None,
        }
    }
}

/// Log shipping targets of the CPU module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogsSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elastic: Option<ElasticLogs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loki: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ElasticLogs {
    pub endpoint: String,
    pub index: String,
}

/// Ground-truth module publishing tag values to Elasticsearch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct GroundTruthSection {
    pub endpoint: String,
    pub index_base_name: String,
    pub labels: OrderedMap<String>,
}

/// Simulator modules the CPU starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Backplane,
    #[serde(rename = "ground-truth")]
    GroundTruth,
    Dnp3,
    Modbus,
    #[serde(rename = "i/o")]
    Io,
    Logic,
}

impl ModuleKind {
    pub fn name(&self) -> &'static str {
        match self {
            ModuleKind::Backplane => "backplane",
            ModuleKind::GroundTruth => "ground-truth",
            ModuleKind::Dnp3 => "dnp3",
            ModuleKind::Modbus => "modbus",
            ModuleKind::Io => "i/o",
            ModuleKind::Logic => "logic",
        }
    }

    /// Command line the CPU runs; `{{config_file}}` is filled in on the VM.
    pub fn command(&self) -> &'static str {
        match self {
            ModuleKind::Backplane => "ot-sim-message-bus {{config_file}}",
            ModuleKind::GroundTruth => "ot-sim-ground-truth-module {{config_file}}",
            ModuleKind::Dnp3 => "ot-sim-dnp3-module {{config_file}}",
            ModuleKind::Modbus => "ot-sim-modbus-module {{config_file}}",
            ModuleKind::Io => "ot-sim-io-module {{config_file}}",
            ModuleKind::Logic => "ot-sim-logic-module {{config_file}}",
        }
    }
}

impl From<otsim_common::Protocol> for ModuleKind {
    fn from(protocol: otsim_common::Protocol) -> Self {
        match protocol {
            otsim_common::Protocol::Dnp3 => ModuleKind::Dnp3,
            otsim_common::Protocol::Modbus => ModuleKind::Modbus,
        }
    }
}

/// Deduplicated, activation-ordered list of modules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ModuleManifest {
    modules: Vec<ModuleKind>,
}

impl Default for ModuleManifest {
    fn default() -> Self {
        Self {
            modules: vec![ModuleKind::Backplane],
        }
    }
}

impl ModuleManifest {
    /// Activate a module; activating it again is a no-op.
    pub fn activate(&mut self, module: ModuleKind) {
        if !self.modules.contains(&module) {
            self.modules.push(module);
        }
    }

    pub fn contains(&self, module: ModuleKind) -> bool {
        self.modules.contains(&module)
    }

    pub fn iter(&self) -> impl Iterator<Item = ModuleKind> + '_ {
        self.modules.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// A protocol client or server block.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum ProtocolSection {
    Dnp3(Dnp3Section),
    Modbus(ModbusSection),
}

impl ProtocolSection {
    pub fn protocol(&self) -> otsim_common::Protocol {
        match self {
            ProtocolSection::Dnp3(_) => otsim_common::Protocol::Dnp3,
            ProtocolSection::Modbus(_) => otsim_common::Protocol::Modbus,
        }
    }

    pub fn mode(&self) -> Mode {
        match self {
            ProtocolSection::Dnp3(s) => s.mode,
            ProtocolSection::Modbus(s) => s.mode,
        }
    }

    pub fn endpoint(&self) -> &str {
        match self {
            ProtocolSection::Dnp3(s) => &s.endpoint,
            ProtocolSection::Modbus(s) => &s.endpoint,
        }
    }
}

/// Modbus register types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModbusRegisterType {
    /// Discrete output coils (read/write, 1-bit)
    Coil,
    /// Discrete input contacts (read-only, 1-bit)
    Discrete,
    /// Input registers (read-only, 16-bit)
    Input,
    /// Holding registers (read/write, 16-bit)
    Holding,
}

impl ModbusRegisterType {
    /// Return the string name for this register type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModbusRegisterType::Coil => "coil",
            ModbusRegisterType::Discrete => "discrete",
            ModbusRegisterType::Input => "input",
            ModbusRegisterType::Holding => "holding",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModbusSection {
    pub name: String,
    pub mode: Mode,
    pub endpoint: String,
    pub registers: Vec<ModbusRegister>,
}

/// An allocated Modbus register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModbusRegister {
    #[serde(rename = "type")]
    pub register_type: ModbusRegisterType,
    pub address: u32,
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scaling: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dnp3Section {
    pub name: String,
    pub mode: Mode,
    pub endpoint: String,
    pub session: Dnp3Session,
    pub points: Vec<Dnp3Point>,
}

/// Link-layer session of a DNP3 section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Dnp3Session {
    Master {
        name: String,
        local_address: u16,
        remote_address: u16,
        scan_rate: u32,
    },
    Outstation {
        name: String,
        local_address: u16,
        remote_address: u16,
    },
}

impl Dnp3Session {
    pub fn master() -> Self {
        Dnp3Session::Master {
            name: "dnp3-master".to_string(),
            local_address: 1,
            remote_address: 1024,
            scan_rate: 5,
        }
    }

    pub fn outstation() -> Self {
        Dnp3Session::Outstation {
            name: "dnp3-outstation".to_string(),
            local_address: 1024,
            remote_address: 1,
        }
    }

    /// Session matching the side a section is encoded for.
    pub fn for_mode(mode: Mode) -> Self {
        match mode {
            Mode::Server => Self::outstation(),
            Mode::Client => Self::master(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PointDirection {
    Input,
    Output,
}

impl PointDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            PointDirection::Input => "input",
            PointDirection::Output => "output",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PointType {
    Analog,
    Binary,
}

impl PointType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PointType::Analog => "analog",
            PointType::Binary => "binary",
        }
    }
}

/// An allocated DNP3 point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dnp3Point {
    pub direction: PointDirection,
    #[serde(rename = "type")]
    pub point_type: PointType,
    pub address: u32,
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sgvar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub egvar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sbo: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_starts_with_backplane_and_dedups() {
        let mut manifest = ModuleManifest::default();
        manifest.activate(ModuleKind::Dnp3);
        manifest.activate(ModuleKind::Modbus);
        manifest.activate(ModuleKind::Dnp3);

        let modules: Vec<ModuleKind> = manifest.iter().collect();
        assert_eq!(
            modules,
            vec![ModuleKind::Backplane, ModuleKind::Dnp3, ModuleKind::Modbus]
        );
    }

    #[test]
    fn test_module_commands() {
        assert_eq!(ModuleKind::Io.name(), "i/o");
        assert_eq!(
            ModuleKind::Modbus.command(),
            "ot-sim-modbus-module {{config_file}}"
        );
        assert_eq!(ModuleKind::GroundTruth.name(), "ground-truth");
        assert_eq!(
            ModuleKind::GroundTruth.command(),
            "ot-sim-ground-truth-module {{config_file}}"
        );
    }

    #[test]
    fn test_api_section_skips_unset_tls() {
        let value = serde_json::to_value(ApiSection::plain("0.0.0.0:9101")).unwrap();
        assert_eq!(value["endpoint"], "0.0.0.0:9101");
        assert!(value.get("tls-key").is_none());
        assert!(value.get("ca-certificate").is_none());
    }

    #[test]
    fn test_session_for_mode() {
        assert!(matches!(
            Dnp3Session::for_mode(Mode::Server),
            Dnp3Session::Outstation { local_address: 1024, remote_address: 1, .. }
        ));
        assert!(matches!(
            Dnp3Session::for_mode(Mode::Client),
            Dnp3Session::Master { scan_rate: 5, .. }
        ));
    }

    #[test]
    fn test_section_serializes_with_protocol_tag() {
        let section = ProtocolSection::Modbus(ModbusSection {
            name: "modbus-outstation".into(),
            mode: Mode::Server,
            endpoint: "10.0.0.1:502".into(),
            registers: vec![ModbusRegister {
                register_type: ModbusRegisterType::Input,
                address: 30000,
                tag: "BUS7.voltage".into(),
                scaling: None,
            }],
        });

        let value = serde_json::to_value(&section).unwrap();
        assert_eq!(value["protocol"], "modbus");
        assert_eq!(value["mode"], "server");
        assert_eq!(value["registers"][0]["type"], "input");
        assert!(value["registers"][0].get("scaling").is_none());
    }
}
