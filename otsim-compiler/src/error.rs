//! Error types for the configuration compiler.

use otsim_common::Protocol;
use thiserror::Error;

/// Result type alias using [`CompileError`].
pub type Result<T> = std::result::Result<T, CompileError>;

/// Errors that abort a compilation.
///
/// Every variant is an input defect: nothing is recovered locally and the
/// whole experiment build stops.
#[derive(Error, Debug)]
pub enum CompileError {
    /// Generic configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Infrastructure/device-type pair not present in the catalog.
    #[error(
        "Node '{node}': unknown device type '{device_type}' for infrastructure '{infrastructure}'"
    )]
    UnknownDeviceType {
        node: String,
        infrastructure: String,
        device_type: String,
    },

    /// `upstream` / `connected_rtus` names a node that is not a known device.
    #[error("Node '{node}': unresolved upstream reference '{reference}'")]
    UnresolvedReference { node: String, reference: String },

    /// A protocol device reference lacks a required key.
    #[error("Node '{node}': {protocol} device #{index} is missing required field '{field}'")]
    MissingField {
        node: String,
        protocol: Protocol,
        index: usize,
        field: &'static str,
    },

    /// An endpoint names an interface the node does not have.
    #[error("Node '{node}': no interface named '{interface}' with an address")]
    UnresolvedInterface { node: String, interface: String },

    /// No IP address could be derived for an endpoint.
    #[error("Node '{node}': missing required IP address")]
    MissingAddress { node: String },

    /// The upstream graph loops back on itself.
    #[error("Upstream cycle detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    /// The same logical device declared twice with different entries.
    #[error("Node '{node}': device '{device}' declared with conflicting entries")]
    Conflict { node: String, device: String },

    /// A device exceeded the point capacity of an address class.
    #[error("Node '{node}': {protocol} {class} address space exhausted at {address}")]
    AddressExhausted {
        node: String,
        protocol: Protocol,
        class: &'static str,
        address: u32,
    },

    /// XML rendering failed.
    #[error("XML error: {0}")]
    Xml(String),

    /// Error from the common layer (config loading, serialization, I/O).
    #[error(transparent)]
    Common(#[from] otsim_common::Error),
}

impl CompileError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<json5::Error> for CompileError {
    fn from(err: json5::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<std::io::Error> for CompileError {
    fn from(err: std::io::Error) -> Self {
        Self::Common(otsim_common::Error::Io(err))
    }
}
