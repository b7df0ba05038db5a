//! Field-device protocol configuration compiler.
//!
//! Turns an experiment topology into one simulator configuration per
//! field device, front-end processor and client:
//!
//! - [`catalog`] - Infrastructure catalog: device types and their points
//! - [`topology`] - Topology input model and device declarations
//! - [`register`] - Register resolution from declarations
//! - [`graph`] - Device graph resolution (servers, gateways, clients)
//! - [`allocator`] - Modbus and DNP3 address allocation with manual overrides
//! - [`encoder`] - Protocol section encoding and document assembly
//! - [`io_module`], [`logic`], [`federation`] - Supplementary modules
//! - [`xml`] - Rendering to the simulator's `config.xml`
//!
//! # Example
//!
//! ```ignore
//! use otsim_compiler::{Compiler, CompilerConfig, Topology};
//!
//! let config = CompilerConfig::load_from_file("otsim.json5")?;
//! let topology = Topology::from_json5(&std::fs::read_to_string("topology.json5")?)?;
//! let output = Compiler::new(config).compile(&topology)?;
//! ```

pub mod allocator;
pub mod catalog;
pub mod compiler;
pub mod config;
pub mod document;
pub mod encoder;
pub mod endpoint;
pub mod error;
pub mod federation;
pub mod graph;
pub mod io_module;
pub mod logic;
pub mod ordered;
pub mod register;
pub mod topology;
pub mod xml;

pub use catalog::InfrastructureCatalog;
pub use compiler::{CompileOutput, CompiledDevice, Compiler, Inject, OutputFormat};
pub use config::CompilerConfig;
pub use document::ConfigDocument;
pub use error::{CompileError, Result};
pub use topology::Topology;
