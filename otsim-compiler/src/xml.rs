//! XML rendering of configuration documents.

use quick_xml::Writer;
use quick_xml::events::{BytesCData, BytesEnd, BytesStart, BytesText, Event};

use crate::document::{
    ApiSection, ConfigDocument, Cpu, Dnp3Point, Dnp3Section, Dnp3Session, GroundTruthSection,
    LogsSection, MessageBus, ModbusSection, ProtocolSection,
};
use crate::error::{CompileError, Result};
use crate::io_module::IoSection;
use crate::logic::LogicSection;

/// Render a document as the simulator's `config.xml`.
pub fn render(doc: &ConfigDocument) -> Result<String> {
    let mut xml = XmlBuilder::new();

    xml.open("ot-sim", &[])?;
    message_bus(&mut xml, &doc.message_bus)?;
    cpu(&mut xml, &doc.cpu)?;
    if let Some(ground_truth) = &doc.ground_truth {
        ground_truth_module(&mut xml, ground_truth)?;
    }

    for section in &doc.protocols {
        match section {
            ProtocolSection::Dnp3(s) => dnp3(&mut xml, s)?,
            ProtocolSection::Modbus(s) => modbus(&mut xml, s)?,
        }
    }

    if let Some(io) = &doc.io {
        io_module(&mut xml, io)?;
    }
    if let Some(logic) = &doc.logic {
        logic_module(&mut xml, logic)?;
    }

    xml.close("ot-sim")?;
    xml.finish()
}

fn message_bus(xml: &mut XmlBuilder, bus: &MessageBus) -> Result<()> {
    xml.open("message-bus", &[])?;
    xml.leaf("pull-endpoint", &[], &bus.pull_endpoint)?;
    xml.leaf("pub-endpoint", &[], &bus.pub_endpoint)?;
    xml.close("message-bus")
}

fn cpu(xml: &mut XmlBuilder, cpu: &Cpu) -> Result<()> {
    xml.open("cpu", &[])?;

    if let Some(api) = &cpu.api {
        api_listener(xml, api)?;
    }
    if let Some(logs) = &cpu.logs {
        log_targets(xml, logs)?;
    }

    for module in cpu.modules.iter() {
        xml.leaf("module", &[("name", module.name())], module.command())?;
    }

    xml.close("cpu")
}

fn api_listener(xml: &mut XmlBuilder, api: &ApiSection) -> Result<()> {
    xml.open("api", &[])?;
    xml.leaf("endpoint", &[], &api.endpoint)?;
    for (name, path) in [
        ("tls-key", &api.tls_key),
        ("tls-certificate", &api.tls_certificate),
        ("ca-certificate", &api.ca_certificate),
    ] {
        if let Some(path) = path {
            xml.leaf(name, &[], path)?;
        }
    }
    xml.close("api")
}

fn log_targets(xml: &mut XmlBuilder, logs: &LogsSection) -> Result<()> {
    xml.open("logs", &[])?;
    if let Some(elastic) = &logs.elastic {
        xml.leaf("elastic", &[("index", elastic.index.as_str())], &elastic.endpoint)?;
    }
    if let Some(loki) = &logs.loki {
        xml.leaf("loki", &[], loki)?;
    }
    xml.close("logs")
}

fn ground_truth_module(xml: &mut XmlBuilder, ground_truth: &GroundTruthSection) -> Result<()> {
    xml.open("ground-truth", &[])?;
    xml.open("elastic", &[])?;
    xml.leaf("endpoint", &[], &ground_truth.endpoint)?;
    xml.leaf("index-base-name", &[], &ground_truth.index_base_name)?;
    for (name, value) in ground_truth.labels.iter() {
        xml.leaf("label", &[("name", name)], value)?;
    }
    xml.close("elastic")?;
    xml.close("ground-truth")
}

fn modbus(xml: &mut XmlBuilder, section: &ModbusSection) -> Result<()> {
    xml.open(
        "modbus",
        &[("name", section.name.as_str()), ("mode", section.mode.as_str())],
    )?;
    xml.leaf("endpoint", &[], &section.endpoint)?;

    for register in &section.registers {
        xml.open("register", &[("type", register.register_type.as_str())])?;
        xml.leaf("address", &[], &register.address.to_string())?;
        xml.leaf("tag", &[], &register.tag)?;
        if let Some(scaling) = register.scaling {
            xml.leaf("scaling", &[], &scaling.to_string())?;
        }
        xml.close("register")?;
    }

    xml.close("modbus")
}

fn dnp3(xml: &mut XmlBuilder, section: &Dnp3Section) -> Result<()> {
    xml.open(
        "dnp3",
        &[("name", section.name.as_str()), ("mode", section.mode.as_str())],
    )?;
    xml.leaf("endpoint", &[], &section.endpoint)?;

    let session = match &section.session {
        Dnp3Session::Master {
            name,
            local_address,
            remote_address,
            scan_rate,
        } => {
            xml.open("master", &[("name", name.as_str())])?;
            xml.leaf("local-address", &[], &local_address.to_string())?;
            xml.leaf("remote-address", &[], &remote_address.to_string())?;
            xml.leaf("scan-rate", &[], &scan_rate.to_string())?;
            "master"
        }
        Dnp3Session::Outstation {
            name,
            local_address,
            remote_address,
        } => {
            xml.open("outstation", &[("name", name.as_str())])?;
            xml.leaf("local-address", &[], &local_address.to_string())?;
            xml.leaf("remote-address", &[], &remote_address.to_string())?;
            "outstation"
        }
    };

    for point in &section.points {
        dnp3_point(xml, point)?;
    }

    xml.close(session)?;
    xml.close("dnp3")
}

fn dnp3_point(xml: &mut XmlBuilder, point: &Dnp3Point) -> Result<()> {
    let element = point.direction.as_str();

    xml.open(element, &[("type", point.point_type.as_str())])?;
    xml.leaf("address", &[], &point.address.to_string())?;
    xml.leaf("tag", &[], &point.tag)?;

    for (name, value) in [
        ("sgvar", &point.sgvar),
        ("egvar", &point.egvar),
        ("class", &point.class),
    ] {
        if let Some(value) = value {
            xml.leaf(name, &[], value)?;
        }
    }
    if let Some(sbo) = point.sbo {
        xml.leaf("sbo", &[], if sbo { "true" } else { "false" })?;
    }

    xml.close(element)
}

fn io_module(xml: &mut XmlBuilder, io: &IoSection) -> Result<()> {
    xml.open("io", &[("name", io.name.as_str())])?;
    xml.leaf("broker-endpoint", &[], &io.broker_endpoint)?;
    xml.leaf("federate-name", &[], &io.federate_name)?;
    xml.leaf("federate-log-level", &[], &io.federate_log_level)?;

    for topic in &io.topics {
        let element = topic.kind.as_str();
        xml.open(element, &[])?;
        xml.leaf("key", &[], &topic.key)?;
        xml.leaf("tag", &[], &topic.tag)?;
        xml.leaf("type", &[], topic.value_type.as_str())?;
        xml.close(element)?;
    }

    for endpoint in &io.endpoints {
        xml.open("endpoint", &[("name", endpoint.name.as_str())])?;
        for tag in &endpoint.tags {
            xml.leaf("tag", &[("key", tag.as_str())], tag)?;
        }
        xml.close("endpoint")?;
    }

    xml.close("io")
}

fn logic_module(xml: &mut XmlBuilder, logic: &LogicSection) -> Result<()> {
    xml.open("logic", &[("name", logic.name.as_str())])?;
    xml.leaf("period", &[], &logic.period)?;
    xml.leaf(
        "process-updates",
        &[],
        if logic.process_updates { "true" } else { "false" },
    )?;
    xml.cdata_leaf("program", &logic.program)?;

    xml.open("variables", &[])?;
    for (name, variable) in logic.variables.iter() {
        let value = variable.rendered_value();
        match &variable.tag {
            Some(tag) => xml.leaf(name, &[("tag", tag.as_str())], &value)?,
            None => xml.leaf(name, &[], &value)?,
        }
    }
    xml.close("variables")?;

    xml.close("logic")
}

/// Thin wrapper over an indenting quick-xml writer.
struct XmlBuilder {
    writer: Writer<Vec<u8>>,
}

impl XmlBuilder {
    fn new() -> Self {
        Self {
            writer: Writer::new_with_indent(Vec::new(), b' ', 2),
        }
    }

    fn write(&mut self, event: Event<'_>) -> Result<()> {
        self.writer
            .write_event(event)
            .map_err(|e| CompileError::Xml(e.to_string()))
    }

    fn open(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        let mut start = BytesStart::new(name);
        for attr in attrs {
            start.push_attribute(*attr);
        }
        self.write(Event::Start(start))
    }

    fn close(&mut self, name: &str) -> Result<()> {
        self.write(Event::End(BytesEnd::new(name)))
    }

    fn leaf(&mut self, name: &str, attrs: &[(&str, &str)], text: &str) -> Result<()> {
        self.open(name, attrs)?;
        self.write(Event::Text(BytesText::new(text)))?;
        self.close(name)
    }

    fn cdata_leaf(&mut self, name: &str, text: &str) -> Result<()> {
        self.open(name, &[])?;
        self.write(Event::CData(BytesCData::new(text)))?;
        self.close(name)
    }

    fn finish(self) -> Result<String> {
        let mut bytes = self.writer.into_inner();
        bytes.push(b'\n');
        String::from_utf8(bytes).map_err(|e| CompileError::Xml(e.to_string()))
    }
}
