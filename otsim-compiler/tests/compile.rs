//! End-to-end compilation tests for otsim-compiler.

use otsim_common::Protocol;
use otsim_compiler::allocator::Mode;
use otsim_compiler::document::{
    ConfigDocument, Dnp3Point, Dnp3Section, Dnp3Session, ModbusRegister, ModbusRegisterType,
    ModbusSection, ModuleKind, PointDirection, PointType, ProtocolSection,
};
use otsim_compiler::{
    CompileError, CompileOutput, Compiler, CompilerConfig, OutputFormat, Topology, xml,
};
use std::path::Path;

const CONFIG: &str = r#"{
    infrastructures: {
        "power-distribution": {
            bus: { voltage: "analog-read" },
            pump: {
                setpt_a: { type: "analog-read-write", modbus: { scaling: 2 } },
                setpt_b: { type: "analog-read-write", modbus: { scaling: 3 } },
            },
        },
    },
    helics: { broker: { address: "127.0.0.1" } },
}"#;

fn compile(topology: &str) -> Result<CompileOutput, CompileError> {
    let config = CompilerConfig::parse(CONFIG).expect("config");
    let topology = Topology::from_json5(topology).expect("topology");
    Compiler::new(config).compile(&topology)
}

fn document<'a>(output: &'a CompileOutput, hostname: &str) -> &'a ConfigDocument {
    &output.device(hostname).expect("device").document
}

fn modbus<'a>(doc: &'a ConfigDocument, name: &str) -> &'a ModbusSection {
    doc.protocols
        .iter()
        .find_map(|s| match s {
            ProtocolSection::Modbus(m) if m.name == name => Some(m),
            _ => None,
        })
        .expect("modbus section")
}

fn dnp3<'a>(doc: &'a ConfigDocument, name: &str) -> &'a Dnp3Section {
    doc.protocols
        .iter()
        .find_map(|s| match s {
            ProtocolSection::Dnp3(d) if d.name == name => Some(d),
            _ => None,
        })
        .expect("dnp3 section")
}

fn modules(doc: &ConfigDocument) -> Vec<ModuleKind> {
    doc.cpu.modules.iter().collect()
}

const GATEWAY_TOPOLOGY: &str = r#"{
    nodes: [
        {
            hostname: "rtu1",
            type: "fd-server",
            metadata: { modbus: [ { name: "rtu1/BUS7", type: "bus" } ] },
            interfaces: [ { name: "eth0", address: "10.0.0.1" } ],
        },
        {
            hostname: "fep1",
            type: "fep",
            metadata: { upstream: ["rtu1"], downstream: "dnp3" },
            interfaces: [ { name: "eth0", address: "10.0.0.2" } ],
        },
        {
            hostname: "hmi",
            type: "fd-client",
            metadata: { connected_rtus: ["fep1"] },
            interfaces: [ { name: "eth0", address: "10.0.0.3" } ],
        },
    ],
}"#;

#[test]
fn test_server_to_gateway_chain() {
    let output = compile(GATEWAY_TOPOLOGY).unwrap();

    let rtu = document(&output, "rtu1");
    let server = modbus(rtu, "modbus-outstation");
    assert_eq!(server.mode, Mode::Server);
    assert_eq!(server.endpoint, "10.0.0.1:502");
    assert_eq!(
        server.registers,
        vec![ModbusRegister {
            register_type: ModbusRegisterType::Input,
            address: 30000,
            tag: "BUS7.voltage".to_string(),
            scaling: None,
        }]
    );

    let fep = document(&output, "fep1");
    let client = modbus(fep, "modbus-rtu1");
    assert_eq!(client.mode, Mode::Client);
    assert_eq!(client.endpoint, "10.0.0.1:502");
    assert_eq!(client.registers, server.registers);

    let outstation = dnp3(fep, "dnp3-outstation");
    assert_eq!(outstation.endpoint, "10.0.0.2:20000");
    assert!(matches!(outstation.session, Dnp3Session::Outstation { .. }));
    assert_eq!(outstation.points.len(), 1);
    assert_eq!(outstation.points[0].direction, PointDirection::Input);
    assert_eq!(outstation.points[0].point_type, PointType::Analog);
    assert_eq!(outstation.points[0].address, 0);
    assert_eq!(outstation.points[0].tag, "BUS7.voltage");

    assert_eq!(
        modules(fep),
        vec![ModuleKind::Backplane, ModuleKind::Dnp3, ModuleKind::Modbus]
    );
}

#[test]
fn test_client_of_gateway_mirrors_outstation() {
    let output = compile(GATEWAY_TOPOLOGY).unwrap();

    let outstation = dnp3(document(&output, "fep1"), "dnp3-outstation");
    let master = dnp3(document(&output, "hmi"), "dnp3-fep1");

    assert_eq!(master.mode, Mode::Client);
    assert_eq!(master.endpoint, "10.0.0.2:20000");
    assert!(matches!(master.session, Dnp3Session::Master { scan_rate: 5, .. }));

    let addresses = |points: &[Dnp3Point]| -> Vec<(u32, String)> {
        points.iter().map(|p| (p.address, p.tag.clone())).collect()
    };
    assert_eq!(addresses(&master.points), addresses(&outstation.points));
}

#[test]
fn test_emission_order_and_server_modules() {
    let output = compile(GATEWAY_TOPOLOGY).unwrap();

    let hostnames: Vec<&str> = output.devices.iter().map(|d| d.hostname.as_str()).collect();
    assert_eq!(hostnames, vec!["rtu1", "fep1", "hmi"]);

    let rtu = document(&output, "rtu1");
    assert_eq!(
        modules(rtu),
        vec![ModuleKind::Backplane, ModuleKind::Modbus, ModuleKind::Io]
    );
    let io = rtu.io.as_ref().expect("io section");
    assert_eq!(io.broker_endpoint, "127.0.0.1");
    assert_eq!(io.federate_name, "rtu1");
    assert_eq!(io.topics[0].key, "rtu1/BUS7.voltage");
}

#[test]
fn test_modbus_scaling_mirror() {
    let output = compile(
        r#"{
            nodes: [
                {
                    hostname: "rtu1",
                    type: "fd-server",
                    metadata: { modbus: [ { name: "PMP1", type: "pump" } ] },
                    interfaces: [ { name: "eth0", address: "10.0.0.1" } ],
                },
                { hostname: "hmi", type: "fd-client", metadata: { upstream: ["rtu1"] } },
            ],
        }"#,
    )
    .unwrap();

    let server = modbus(document(&output, "rtu1"), "modbus-outstation");
    let summary: Vec<(ModbusRegisterType, u32, Option<i64>)> = server
        .registers
        .iter()
        .map(|r| (r.register_type, r.address, r.scaling))
        .collect();
    assert_eq!(
        summary,
        vec![
            (ModbusRegisterType::Holding, 40000, Some(-2)),
            (ModbusRegisterType::Holding, 40001, Some(-3)),
        ]
    );

    let client = modbus(document(&output, "hmi"), "modbus-rtu1");
    let scalings: Vec<Option<i64>> = client.registers.iter().map(|r| r.scaling).collect();
    assert_eq!(scalings, vec![Some(2), Some(3)]);
}

#[test]
fn test_gateway_merges_upstreams_in_order() {
    let output = compile(
        r#"{
            nodes: [
                {
                    hostname: "rtu1",
                    type: "fd-server",
                    metadata: { modbus: [ { name: "BUS1", type: "bus" }, { name: "BUS2", type: "bus" } ] },
                    interfaces: [ { name: "eth0", address: "10.0.0.1" } ],
                },
                {
                    hostname: "rtu2",
                    type: "fd-server",
                    metadata: { dnp3: [ { name: "BUS3", type: "bus" } ] },
                    interfaces: [ { name: "eth0", address: "10.0.0.2" } ],
                },
                {
                    hostname: "fep1",
                    type: "fep",
                    metadata: { upstream: ["rtu2", "rtu1"], downstream: "modbus" },
                    interfaces: [ { name: "eth0", address: "10.0.0.9" } ],
                },
            ],
        }"#,
    )
    .unwrap();

    let fep = document(&output, "fep1");
    assert_eq!(dnp3(fep, "dnp3-rtu2").points.len(), 1);
    assert_eq!(modbus(fep, "modbus-rtu1").registers.len(), 2);

    let downstream = modbus(fep, "modbus-outstation");
    let tags: Vec<&str> = downstream.registers.iter().map(|r| r.tag.as_str()).collect();
    assert_eq!(tags, vec!["BUS3.voltage", "BUS1.voltage", "BUS2.voltage"]);

    let addresses: Vec<u32> = downstream.registers.iter().map(|r| r.address).collect();
    assert_eq!(addresses, vec![30000, 30001, 30002]);
}

#[test]
fn test_overrides_shared_by_server_and_client() {
    let output = compile(
        r#"{
            nodes: [
                {
                    hostname: "rtu1",
                    type: "fd-server",
                    metadata: {
                        modbus: {
                            interface: "eth1:5020",
                            devices: [
                                {
                                    name: "PMP1",
                                    type: "pump",
                                    "analog-read-write": [
                                        { field: "setpt_a", register_number: 40100, register_type: "holding-register" },
                                    ],
                                },
                            ],
                        },
                    },
                    interfaces: [
                        { name: "eth0", address: "10.0.0.1" },
                        { name: "eth1", address: "192.168.0.1" },
                    ],
                },
                { hostname: "hmi", type: "fd-client", metadata: { upstream: ["rtu1"] } },
            ],
        }"#,
    )
    .unwrap();

    let server = modbus(document(&output, "rtu1"), "modbus-outstation");
    let client = modbus(document(&output, "hmi"), "modbus-rtu1");

    let server_addresses: Vec<u32> = server.registers.iter().map(|r| r.address).collect();
    assert_eq!(server_addresses, vec![40100, 40101]);

    let client_addresses: Vec<u32> = client.registers.iter().map(|r| r.address).collect();
    assert_eq!(client_addresses, server_addresses);
    assert_eq!(client.endpoint, "192.168.0.1:5020");
}

#[test]
fn test_compilation_is_deterministic() {
    let first = compile(GATEWAY_TOPOLOGY).unwrap();
    let second = compile(GATEWAY_TOPOLOGY).unwrap();

    for (a, b) in first.devices.iter().zip(&second.devices) {
        assert_eq!(xml::render(&a.document).unwrap(), xml::render(&b.document).unwrap());
    }
}

#[test]
fn test_unsupported_downstream_emits_no_server_block() {
    let output = compile(
        r#"{
            nodes: [
                {
                    hostname: "rtu1",
                    type: "fd-server",
                    metadata: { modbus: [ { name: "BUS7", type: "bus" } ] },
                    interfaces: [ { name: "eth0", address: "10.0.0.1" } ],
                },
                { hostname: "fep1", type: "fep", metadata: { upstream: ["rtu1"], downstream: "bacnet" } },
            ],
        }"#,
    )
    .unwrap();

    let fep = document(&output, "fep1");
    assert_eq!(fep.sections(Mode::Server).count(), 0);
    assert_eq!(fep.sections(Mode::Client).count(), 1);
}

#[test]
fn test_cycle_aborts_compilation() {
    let err = compile(
        r#"{
            nodes: [
                { hostname: "fep1", type: "fep", metadata: { upstream: ["fep2"] } },
                { hostname: "fep2", type: "fep", metadata: { upstream: ["fep1"] } },
            ],
        }"#,
    )
    .unwrap_err();

    assert!(matches!(err, CompileError::Cycle { .. }));
    assert!(err.to_string().contains("fep1 -> fep2 -> fep1"));
}

#[test]
fn test_unknown_device_type_aborts_compilation() {
    let err = compile(
        r#"{
            nodes: [
                {
                    hostname: "rtu1",
                    type: "fd-server",
                    metadata: { dnp3: [ { name: "PV1", type: "solar" } ] },
                    interfaces: [ { name: "eth0", address: "10.0.0.1" } ],
                },
            ],
        }"#,
    )
    .unwrap_err();

    assert!(matches!(
        err,
        CompileError::UnknownDeviceType { ref device_type, .. } if device_type == "solar"
    ));
}

#[test]
fn test_logic_module_activated() {
    let output = compile(
        r#"{
            nodes: [
                {
                    hostname: "hmi",
                    type: "fd-client",
                    metadata: {
                        logic: { program: "alarm = v > 1.05", variables: { v: { value: 1.0, tag: "BUS7.voltage" } } },
                        "message-bus": { "pull-endpoint": "tcp://127.0.0.1:4000" },
                    },
                },
            ],
        }"#,
    )
    .unwrap();

    let hmi = document(&output, "hmi");
    assert_eq!(modules(hmi), vec![ModuleKind::Backplane, ModuleKind::Logic]);
    assert_eq!(hmi.message_bus.pull_endpoint, "tcp://127.0.0.1:4000");

    let rendered = xml::render(hmi).unwrap();
    assert!(rendered.contains("<![CDATA[alarm = v > 1.05]]>"));
    assert!(rendered.contains(r#"<module name="logic">ot-sim-logic-module {{config_file}}</module>"#));
}

#[test]
fn test_broker_annotations() {
    let output = compile(
        r#"{
            nodes: [
                {
                    hostname: "broker",
                    type: "VirtualMachine",
                    interfaces: [ { name: "eth0", address: "10.0.0.100" } ],
                },
                {
                    hostname: "rtu1",
                    type: "fd-server",
                    metadata: {
                        helics: { broker: { hostname: "broker", "base-fed-count": 1 } },
                        modbus: [ { name: "BUS7", type: "bus" } ],
                    },
                    interfaces: [ { name: "eth0", address: "10.0.0.1" } ],
                },
                {
                    hostname: "rtu2",
                    type: "fd-server",
                    metadata: {
                        helics: { broker: { hostname: "broker", "base-fed-count": 1 } },
                        dnp3: [ { name: "BUS8", type: "bus" } ],
                    },
                    interfaces: [ { name: "eth0", address: "10.0.0.2" } ],
                },
            ],
        }"#,
    )
    .unwrap();

    assert_eq!(output.brokers.len(), 1);
    assert_eq!(output.brokers[0].hostname, "broker");
    assert_eq!(output.brokers[0].broker_endpoint, "10.0.0.100");
    assert_eq!(output.brokers[0].federate_count, 3);

    let io = document(&output, "rtu2").io.as_ref().expect("io section");
    assert_eq!(io.broker_endpoint, "10.0.0.100");
}

#[test]
fn test_dnp3_server_read_write_pairs() {
    let output = compile(
        r#"{
            nodes: [
                {
                    hostname: "rtu1",
                    type: "fd-server",
                    metadata: { dnp3: [ { name: "PMP1", type: "pump" } ] },
                    interfaces: [ { name: "eth0", address: "10.0.0.1" } ],
                },
            ],
        }"#,
    )
    .unwrap();

    let section = dnp3(document(&output, "rtu1"), "dnp3-outstation");
    let points: Vec<(PointDirection, u32)> =
        section.points.iter().map(|p| (p.direction, p.address)).collect();
    assert_eq!(
        points,
        vec![
            (PointDirection::Input, 0),
            (PointDirection::Output, 1000),
            (PointDirection::Input, 1),
            (PointDirection::Output, 1001),
        ]
    );
    assert_eq!(section.points[0].tag, "PMP1.setpt_a");
    assert!(
        document(&output, "rtu1")
            .protocols
            .iter()
            .all(|s| s.protocol() == Protocol::Dnp3)
    );
}

const MIXED_UPSTREAM_TOPOLOGY: &str = r#"{
    nodes: [
        {
            hostname: "rtu1",
            type: "fd-server",
            metadata: { modbus: [ { name: "BUS1", type: "bus" } ], dnp3: [ { name: "BUS2", type: "bus" } ] },
            interfaces: [ { name: "eth0", address: "10.0.0.1" } ],
        },
        {
            hostname: "rtu2",
            type: "fd-server",
            metadata: { dnp3: [ { name: "BUS3", type: "bus" } ] },
            interfaces: [ { name: "eth0", address: "10.0.0.2" } ],
        },
        { hostname: "hmi", type: "fd-client", metadata: { upstream: ["rtu2", "rtu1"] } },
    ],
}"#;

#[test]
fn test_module_order_by_role() {
    let output = compile(MIXED_UPSTREAM_TOPOLOGY).unwrap();

    assert_eq!(
        modules(document(&output, "rtu1")),
        vec![
            ModuleKind::Backplane,
            ModuleKind::Dnp3,
            ModuleKind::Modbus,
            ModuleKind::Io
        ]
    );

    let hmi = document(&output, "hmi");
    assert_eq!(hmi.protocols[0].protocol(), Protocol::Dnp3);
    assert_eq!(
        modules(hmi),
        vec![ModuleKind::Backplane, ModuleKind::Modbus, ModuleKind::Dnp3]
    );
}

#[test]
fn test_blank_downstream_serves_dnp3() {
    let output = compile(
        r#"{
            nodes: [
                {
                    hostname: "rtu1",
                    type: "fd-server",
                    metadata: { modbus: [ { name: "BUS7", type: "bus" } ] },
                    interfaces: [ { name: "eth0", address: "10.0.0.1" } ],
                },
                {
                    hostname: "fep1",
                    type: "fep",
                    metadata: { upstream: ["rtu1"], downstream: "" },
                    interfaces: [ { name: "eth0", address: "10.0.0.2" } ],
                },
            ],
        }"#,
    )
    .unwrap();

    let outstation = dnp3(document(&output, "fep1"), "dnp3-outstation");
    assert_eq!(outstation.endpoint, "10.0.0.2:20000");
    assert_eq!(outstation.points[0].tag, "BUS7.voltage");
}

#[test]
fn test_override_at_address_limit_aborts_compilation() {
    let err = compile(
        r#"{
            nodes: [
                {
                    hostname: "rtu1",
                    type: "fd-server",
                    metadata: {
                        modbus: [
                            {
                                name: "PMP1",
                                type: "pump",
                                "analog-read-write": [
                                    { field: "setpt_a", register_number: 4294967295, register_type: "holding-register" },
                                ],
                            },
                        ],
                    },
                    interfaces: [ { name: "eth0", address: "10.0.0.1" } ],
                },
            ],
        }"#,
    )
    .unwrap_err();

    assert!(matches!(
        err,
        CompileError::AddressExhausted { protocol: Protocol::Modbus, .. }
    ));
}

#[test]
fn test_cpu_services_from_app_config() {
    let config = CompilerConfig::parse(
        r#"{
            "cpu-module": {
                api: { endpoint: "0.0.0.0:9443", "tls-key": "/certs/api.key", "tls-certificate": "/certs/api.crt" },
            },
            logs: { elastic: { endpoint: "http://es:9200" } },
            "ground-truth-module": { elastic: { labels: { site: "lab" } } },
            helics: { broker: { address: "127.0.0.1" } },
        }"#,
    )
    .unwrap();
    let topology = Topology::from_json5(
        r#"{
            nodes: [
                {
                    hostname: "rtu1",
                    type: "fd-server",
                    metadata: { dnp3: [ { name: "BUS7", type: "bus" } ] },
                    interfaces: [ { name: "eth0", address: "10.0.0.1" } ],
                },
                {
                    hostname: "hmi",
                    type: "fd-client",
                    metadata: {
                        upstream: ["rtu1"],
                        "ground-truth-module": null,
                        logs: { loki: "http://loki:3100" },
                    },
                },
            ],
        }"#,
    )
    .unwrap();
    let output = Compiler::new(config).compile(&topology).unwrap();

    let rtu = document(&output, "rtu1");
    assert_eq!(
        modules(rtu),
        vec![
            ModuleKind::Backplane,
            ModuleKind::GroundTruth,
            ModuleKind::Dnp3,
            ModuleKind::Io
        ]
    );
    let rendered = xml::render(rtu).unwrap();
    assert!(rendered.contains("<endpoint>0.0.0.0:9443</endpoint>"));
    assert!(rendered.contains("<tls-key>/etc/ot-sim/certs/api.key</tls-key>"));
    assert!(rendered.contains(r#"<elastic index="ot-sim-logs">http://es:9200</elastic>"#));
    assert!(rendered.contains(r#"<label name="site">lab</label>"#));
    assert!(rendered.find("<ground-truth>").unwrap() < rendered.find("<dnp3 ").unwrap());

    let hmi = document(&output, "hmi");
    assert!(hmi.ground_truth.is_none());
    assert_eq!(modules(hmi), vec![ModuleKind::Backplane, ModuleKind::Dnp3]);
    let logs = hmi.cpu.logs.as_ref().expect("logs");
    assert_eq!(logs.loki.as_deref(), Some("http://loki:3100"));
    assert!(logs.elastic.is_some());

    let injects = output.injects(Path::new("/out"), OutputFormat::Xml);
    let rtu_files: Vec<&str> = injects
        .iter()
        .filter(|i| i.hostname == "rtu1")
        .map(|i| i.dst.as_str())
        .collect();
    assert_eq!(
        rtu_files,
        vec![
            "/etc/ot-sim/config.xml",
            "/etc/ot-sim/certs/api.key",
            "/etc/ot-sim/certs/api.crt",
        ]
    );
}
