//! Top-level compilation of a topology into device documents.

use otsim_common::Format;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::catalog::InfrastructureCatalog;
use crate::config::{CertificateFile, CompilerConfig};
use crate::document::ConfigDocument;
use crate::encoder::DocumentBuilder;
use crate::error::Result;
use crate::federation::{BrokerRegistry, FederationAnnotation};
use crate::graph::{DeviceGraph, DeviceKind, GraphDevice};
use crate::io_module::IoSection;
use crate::logic::LogicSection;
use crate::topology::{NodeRole, Topology};
use crate::xml;

/// Where the simulator reads its configuration on the VM.
pub const CONFIG_DESTINATION: &str = "/etc/ot-sim/config.xml";

/// Serialization of produced documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// The simulator's native `config.xml`.
    #[default]
    Xml,
    Json,
    Cbor,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Xml => "xml",
            OutputFormat::Json => Format::Json.extension(),
            OutputFormat::Cbor => Format::Cbor.extension(),
        }
    }

    /// Serialize a document in this format.
    pub fn render(&self, doc: &ConfigDocument) -> Result<Vec<u8>> {
        match self {
            OutputFormat::Xml => Ok(xml::render(doc)?.into_bytes()),
            OutputFormat::Json => Ok(otsim_common::encode(doc, Format::Json)?),
            OutputFormat::Cbor => Ok(otsim_common::encode(doc, Format::Cbor)?),
        }
    }
}

/// File to deliver onto a node's VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Inject {
    pub hostname: String,
    pub src: String,
    pub dst: String,
}

/// One compiled device.
#[derive(Debug, Clone)]
pub struct CompiledDevice {
    pub hostname: String,
    pub role: NodeRole,
    pub document: ConfigDocument,
    /// CPU API certificates the document refers to.
    pub certificates: Vec<CertificateFile>,
}

impl CompiledDevice {
    /// File name of this device's document.
    pub fn file_name(&self, format: OutputFormat) -> String {
        format!("{}.{}", self.hostname, format.extension())
    }
}

/// Everything a compilation produces.
#[derive(Debug, Clone, Default)]
pub struct CompileOutput {
    /// Documents in emission order: servers, gateways, clients.
    pub devices: Vec<CompiledDevice>,
    /// Brokers to provision, with their expected federate counts.
    pub brokers: Vec<FederationAnnotation>,
}

impl CompileOutput {
    pub fn device(&self, hostname: &str) -> Option<&CompiledDevice> {
        self.devices.iter().find(|d| d.hostname == hostname)
    }

    /// Inject records for documents written under `output_dir`, each
    /// followed by the device's certificates.
    pub fn injects(&self, output_dir: &Path, format: OutputFormat) -> Vec<Inject> {
        let mut injects = Vec::new();
        for device in &self.devices {
            injects.push(Inject {
                hostname: device.hostname.clone(),
                src: output_dir
                    .join(device.file_name(format))
                    .display()
                    .to_string(),
                dst: CONFIG_DESTINATION.to_string(),
            });
            injects.extend(device.certificates.iter().map(|file| Inject {
                hostname: device.hostname.clone(),
                src: file.src.clone(),
                dst: file.dst.to_string(),
            }));
        }
        injects
    }
}

/// Compiles topologies against one app configuration.
#[derive(Debug, Clone)]
pub struct Compiler {
    config: CompilerConfig,
    catalog: InfrastructureCatalog,
}

impl Compiler {
    /// Create a compiler; the catalog is built once and read-only afterwards.
    pub fn new(config: CompilerConfig) -> Self {
        let catalog = InfrastructureCatalog::with_overrides(&config.infrastructures);
        Self { config, catalog }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn catalog(&self) -> &InfrastructureCatalog {
        &self.catalog
    }

    /// Compile every server, gateway and client of a topology.
    ///
    /// Any error aborts the whole compilation.
    pub fn compile(&self, topology: &Topology) -> Result<CompileOutput> {
        let mut graph = DeviceGraph::build(topology, &self.config.infrastructure)?;
        graph.resolve_all(&self.catalog)?;

        let mut brokers = BrokerRegistry::new();
        let mut devices = Vec::new();

        for role in [NodeRole::Server, NodeRole::Gateway, NodeRole::Client] {
            for device in graph.devices_with_role(role) {
                devices.push(self.compile_device(device, &graph, topology, &mut brokers)?);
            }
        }

        info!("Compiled {} device document(s)", devices.len());

        Ok(CompileOutput {
            devices,
            brokers: brokers.into_annotations(),
        })
    }

    fn compile_device(
        &self,
        device: &GraphDevice<'_>,
        graph: &DeviceGraph<'_>,
        topology: &Topology,
        brokers: &mut BrokerRegistry,
    ) -> Result<CompiledDevice> {
        let node = device.node;
        let (api, certificates) = match self.config.api(node.metadata.cpu_module.as_ref()) {
            Some(api) => (Some(api.section), api.certificates),
            None => (None, Vec::new()),
        };
        let mut builder = DocumentBuilder::new(
            &node.hostname,
            self.config.message_bus(node.metadata.message_bus.as_ref()),
            api,
        );

        if let Some(logs) = self.config.logs(node.metadata.logs.as_ref()) {
            builder.set_logs(logs);
        }
        if let Some(ground_truth) = self
            .config
            .ground_truth(node.metadata.ground_truth_module.as_ref())
        {
            builder.set_ground_truth(ground_truth);
        }

        graph.configure(&node.hostname, &mut builder)?;

        if let DeviceKind::Server(server) = &device.kind {
            let io = IoSection::for_server(
                node,
                &server.declaration,
                &self.catalog,
                &self.config,
                topology,
                brokers,
            )?;
            if let Some(io) = io {
                builder.set_io(io);
            }
        }

        if let Some(logic) = node
            .metadata
            .logic
            .as_ref()
            .and_then(LogicSection::from_metadata)
        {
            builder.set_logic(logic);
        }

        let document = builder.build();
        debug!(
            "Device '{}': {} protocol section(s), {} module(s)",
            node.hostname,
            document.protocols.len(),
            document.cpu.modules.len()
        );

        Ok(CompiledDevice {
            hostname: node.hostname.clone(),
            role: device.kind.role(),
            document,
            certificates,
        })
    }
}
