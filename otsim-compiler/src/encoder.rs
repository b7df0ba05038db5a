//! Protocol section encoding and document assembly.

use otsim_common::Protocol;
use tracing::debug;

use crate::allocator::{Dnp3Allocator, Mode, ModbusAllocator, OverrideTable};
use crate::document::{
    ApiSection, ConfigDocument, Cpu, Dnp3Section, Dnp3Session, GroundTruthSection, LogsSection,
    MessageBus, ModbusSection, ModuleKind, ModuleManifest, ProtocolSection,
};
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::io_module::IoSection;
use crate::logic::LogicSection;
use crate::register::Register;

/// One (device, protocol, mode) encoding pass.
///
/// Each call to [`EncodePass::encode`] builds a fresh allocator, so no
/// numbering state survives between sections.
#[derive(Debug, Clone)]
pub struct EncodePass<'a> {
    /// Node whose document receives the section.
    pub node: &'a str,
    pub mode: Mode,
    pub endpoint: Endpoint,
    pub overrides: &'a OverrideTable,
    /// Section name; defaults to `<protocol>-outstation` for servers.
    pub name: Option<String>,
}

impl<'a> EncodePass<'a> {
    pub fn server(node: &'a str, endpoint: Endpoint, overrides: &'a OverrideTable) -> Self {
        Self {
            node,
            mode: Mode::Server,
            endpoint,
            overrides,
            name: None,
        }
    }

    /// Client pass talking to `target`.
    pub fn client(
        node: &'a str,
        target: &str,
        endpoint: Endpoint,
        overrides: &'a OverrideTable,
    ) -> Self {
        Self {
            node,
            mode: Mode::Client,
            endpoint,
            overrides,
            name: Some(target.to_string()),
        }
    }

    fn section_name(&self, protocol: Protocol) -> String {
        match &self.name {
            Some(target) => format!("{}-{}", protocol, target),
            None => format!("{}-outstation", protocol),
        }
    }

    /// Encode `registers` as a `protocol` section.
    pub fn encode(&self, protocol: Protocol, registers: &[Register]) -> Result<ProtocolSection> {
        let name = self.section_name(protocol);
        let endpoint = self.endpoint.to_string();

        let section = match protocol {
            Protocol::Modbus => {
                let mut allocator = ModbusAllocator::new(self.node, self.mode, self.overrides);
                ProtocolSection::Modbus(ModbusSection {
                    name,
                    mode: self.mode,
                    endpoint,
                    registers: allocator.allocate_all(registers)?,
                })
            }
            Protocol::Dnp3 => {
                let mut allocator = Dnp3Allocator::new(self.node, self.mode, self.overrides);
                ProtocolSection::Dnp3(Dnp3Section {
                    name,
                    mode: self.mode,
                    endpoint,
                    session: Dnp3Session::for_mode(self.mode),
                    points: allocator.allocate_all(registers)?,
                })
            }
        };

        debug!(
            "Node '{}': encoded {} {} section with {} register(s)",
            self.node,
            protocol,
            self.mode,
            registers.len()
        );

        Ok(section)
    }
}

/// Incrementally assembles one device's document.
#[derive(Debug)]
pub struct DocumentBuilder {
    doc: ConfigDocument,
}

impl DocumentBuilder {
    pub fn new(hostname: &str, message_bus: MessageBus, api: Option<ApiSection>) -> Self {
        Self {
            doc: ConfigDocument {
                hostname: hostname.to_string(),
                message_bus,
                cpu: Cpu {
                    api,
                    logs: None,
                    modules: ModuleManifest::default(),
                },
                ground_truth: None,
                protocols: Vec::new(),
                io: None,
                logic: None,
            },
        }
    }

    pub fn set_logs(&mut self, logs: LogsSection) {
        self.doc.cpu.logs = Some(logs);
    }

    /// Must precede every protocol section so the module starts right
    /// after the backplane.
    pub fn set_ground_truth(&mut self, ground_truth: GroundTruthSection) {
        self.doc.cpu.modules.activate(ModuleKind::GroundTruth);
        self.doc.ground_truth = Some(ground_truth);
    }

    /// Append a protocol section. Its module is started by
    /// [`DocumentBuilder::activate_protocols`].
    pub fn add_section(&mut self, section: ProtocolSection) {
        self.doc.protocols.push(section);
    }

    /// Activate the module of every protocol with at least one section,
    /// following `order` rather than section order.
    pub fn activate_protocols(&mut self, order: &[Protocol]) {
        for protocol in order {
            if self.doc.protocols.iter().any(|s| s.protocol() == *protocol) {
                self.doc.cpu.modules.activate((*protocol).into());
            }
        }
    }

    pub fn set_io(&mut self, io: IoSection) {
        self.doc.cpu.modules.activate(ModuleKind::Io);
        self.doc.io = Some(io);
    }

    pub fn set_logic(&mut self, logic: LogicSection) {
        self.doc.cpu.modules.activate(ModuleKind::Logic);
        self.doc.logic = Some(logic);
    }

    pub fn hostname(&self) -> &str {
        &self.doc.hostname
    }

    pub fn build(self) -> ConfigDocument {
        self.doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Dnp3Hints, ModbusHints};
    use crate::document::PointDirection;
    use otsim_common::IoClass;

    fn endpoint() -> Endpoint {
        Endpoint {
            host: "10.0.0.10".to_string(),
            port: 502,
        }
    }

    fn register(field: &str, class: IoClass, protocol: Protocol) -> Register {
        Register {
            device_name: "BUS7".to_string(),
            field: field.to_string(),
            io_class: class,
            device_type: "bus".to_string(),
            protocol,
            modbus: ModbusHints::default(),
            dnp3: Dnp3Hints::default(),
            range: None,
            source: "rtu1".to_string(),
        }
    }

    #[test]
    fn test_server_section_names() {
        let overrides = OverrideTable::new();
        let pass = EncodePass::server("rtu1", endpoint(), &overrides);

        let section = pass
            .encode(
                Protocol::Modbus,
                &[register("voltage", IoClass::AnalogRead, Protocol::Modbus)],
            )
            .unwrap();

        let ProtocolSection::Modbus(modbus) = section else {
            panic!("Expected Modbus section");
        };
        assert_eq!(modbus.name, "modbus-outstation");
        assert_eq!(modbus.mode, Mode::Server);
        assert_eq!(modbus.endpoint, "10.0.0.10:502");
        assert_eq!(modbus.registers[0].address, 30000);
    }

    #[test]
    fn test_client_section_targets_upstream() {
        let overrides = OverrideTable::new();
        let pass = EncodePass::client("fep1", "rtu1", endpoint(), &overrides);

        let section = pass
            .encode(
                Protocol::Dnp3,
                &[register("setpt", IoClass::AnalogReadWrite, Protocol::Dnp3)],
            )
            .unwrap();

        let ProtocolSection::Dnp3(dnp3) = section else {
            panic!("Expected DNP3 section");
        };
        assert_eq!(dnp3.name, "dnp3-rtu1");
        assert!(matches!(dnp3.session, Dnp3Session::Master { .. }));
        assert_eq!(dnp3.points.len(), 2);
        assert_eq!(dnp3.points[1].direction, PointDirection::Output);
    }

    #[test]
    fn test_repeated_passes_are_independent() {
        let overrides = OverrideTable::new();
        let pass = EncodePass::server("rtu1", endpoint(), &overrides);
        let regs = [register("voltage", IoClass::AnalogRead, Protocol::Modbus)];

        let first = pass.encode(Protocol::Modbus, &regs).unwrap();
        let second = pass.encode(Protocol::Modbus, &regs).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_builder_activates_modules_once() {
        let overrides = OverrideTable::new();
        let pass = EncodePass::server("fep1", endpoint(), &overrides);
        let mut builder = DocumentBuilder::new(
            "fep1",
            MessageBus {
                pull_endpoint: "tcp://127.0.0.1:1234".into(),
                pub_endpoint: "tcp://127.0.0.1:5678".into(),
            },
            None,
        );

        builder.add_section(pass.encode(Protocol::Modbus, &[]).unwrap());
        builder.add_section(pass.encode(Protocol::Dnp3, &[]).unwrap());
        builder.add_section(pass.encode(Protocol::Dnp3, &[]).unwrap());
        builder.activate_protocols(&[Protocol::Dnp3, Protocol::Modbus]);
        builder.activate_protocols(&[Protocol::Modbus, Protocol::Dnp3]);

        let doc = builder.build();
        let modules: Vec<ModuleKind> = doc.cpu.modules.iter().collect();
        assert_eq!(
            modules,
            vec![ModuleKind::Backplane, ModuleKind::Dnp3, ModuleKind::Modbus]
        );
        assert_eq!(doc.protocols.len(), 3);
    }

    #[test]
    fn test_ground_truth_module_follows_backplane() {
        let overrides = OverrideTable::new();
        let pass = EncodePass::server("rtu1", endpoint(), &overrides);
        let mut builder = DocumentBuilder::new(
            "rtu1",
            MessageBus {
                pull_endpoint: "tcp://127.0.0.1:1234".into(),
                pub_endpoint: "tcp://127.0.0.1:5678".into(),
            },
            Some(ApiSection::plain("0.0.0.0:9101")),
        );

        builder.set_ground_truth(GroundTruthSection {
            endpoint: "http://localhost:9200".into(),
            index_base_name: "ot-sim".into(),
            labels: Default::default(),
        });
        builder.add_section(pass.encode(Protocol::Modbus, &[]).unwrap());
        builder.activate_protocols(&[Protocol::Dnp3, Protocol::Modbus]);

        let doc = builder.build();
        let modules: Vec<ModuleKind> = doc.cpu.modules.iter().collect();
        assert_eq!(
            modules,
            vec![ModuleKind::Backplane, ModuleKind::GroundTruth, ModuleKind::Modbus]
        );
        assert!(doc.ground_truth.is_some());
    }

    #[test]
    fn test_builder_skips_protocols_without_sections() {
        let overrides = OverrideTable::new();
        let pass = EncodePass::client("hmi", "rtu1", endpoint(), &overrides);
        let mut builder = DocumentBuilder::new(
            "hmi",
            MessageBus {
                pull_endpoint: "tcp://127.0.0.1:1234".into(),
                pub_endpoint: "tcp://127.0.0.1:5678".into(),
            },
            None,
        );

        builder.add_section(pass.encode(Protocol::Modbus, &[]).unwrap());
        builder.activate_protocols(&[Protocol::Modbus, Protocol::Dnp3]);

        let modules: Vec<ModuleKind> = builder.build().cpu.modules.iter().collect();
        assert_eq!(modules, vec![ModuleKind::Backplane, ModuleKind::Modbus]);
    }
}
