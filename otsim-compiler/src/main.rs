//! Field-device protocol configuration compiler.
//!
//! Reads the app configuration and an experiment topology, then writes one
//! simulator configuration per device plus the inject manifest.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::info;

use otsim_common::LoggingConfig;
use otsim_compiler::{Compiler, CompilerConfig, OutputFormat, Topology};

/// Document format selectable on the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Xml,
    Json,
    Cbor,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Xml => OutputFormat::Xml,
            FormatArg::Json => OutputFormat::Json,
            FormatArg::Cbor => OutputFormat::Cbor,
        }
    }
}

/// Compile DNP3/Modbus simulator configurations from a topology.
#[derive(Parser, Debug)]
#[command(name = "otsim-compiler")]
#[command(about = "Generates per-device ot-sim configurations from a topology")]
#[command(version)]
struct Args {
    /// Path to the app configuration file (JSON5 format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the topology file (JSON5 format)
    #[arg(short, long)]
    topology: PathBuf,

    /// Directory receiving the generated documents
    #[arg(short, long, default_value = "otsim")]
    output: PathBuf,

    /// Document format
    #[arg(short, long, value_enum, default_value = "xml")]
    format: FormatArg,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = match &args.config {
        Some(path) => CompilerConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => CompilerConfig::default(),
    };

    // Initialize logging
    let log_config = LoggingConfig {
        level: args
            .log_level
            .clone()
            .unwrap_or_else(|| config.logging.level.clone()),
        format: config.logging.format,
    };
    otsim_common::init_tracing(&log_config)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!("Starting otsim-compiler");

    let content = std::fs::read_to_string(&args.topology)
        .with_context(|| format!("Failed to read topology from {:?}", args.topology))?;
    let topology = Topology::from_json5(&content)
        .with_context(|| format!("Failed to parse topology {:?}", args.topology))?;
    info!(
        "Loaded {} node(s) from {:?}",
        topology.nodes.len(),
        args.topology
    );

    let output = Compiler::new(config)
        .compile(&topology)
        .context("Compilation failed")?;

    let format = OutputFormat::from(args.format);
    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create output directory {:?}", args.output))?;

    for device in &output.devices {
        let path = args.output.join(device.file_name(format));
        let bytes = format
            .render(&device.document)
            .with_context(|| format!("Failed to render document for '{}'", device.hostname))?;
        std::fs::write(&path, bytes).with_context(|| format!("Failed to write {:?}", path))?;
        info!("Wrote {:?}", path);
    }

    let injects = output.injects(&args.output, format);
    let injects_path = args.output.join("injects.json");
    std::fs::write(&injects_path, serde_json::to_vec_pretty(&injects)?)
        .with_context(|| format!("Failed to write {:?}", injects_path))?;

    if !output.brokers.is_empty() {
        let brokers_path = args.output.join("brokers.json");
        std::fs::write(&brokers_path, serde_json::to_vec_pretty(&output.brokers)?)
            .with_context(|| format!("Failed to write {:?}", brokers_path))?;
        info!("Wrote {} broker annotation(s)", output.brokers.len());
    }

    info!("Compiled {} device(s) into {:?}", output.devices.len(), args.output);

    Ok(())
}
