//! Infrastructure catalog: the standard instrumentation points of each
//! domain device type.
//!
//! Field specs are normalized once at load time. A bare string such as
//! `"analog-read"` becomes a [`FieldSpec`] with empty protocol hints, so
//! nothing downstream has to care which form was written.

use otsim_common::IoClass;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::error::{CompileError, Result};
use crate::ordered::OrderedMap;

/// Infrastructure used when neither the node nor the app names one.
pub const DEFAULT_INFRASTRUCTURE: &str = "power-distribution";

/// Ordered `field name -> spec` table for one device type.
pub type FieldTable = OrderedMap<FieldSpec>;

/// Per-experiment catalog additions: `infrastructure -> device type -> fields`.
pub type CatalogOverrides = HashMap<String, OrderedMap<FieldTable>>;

/// Modbus-specific hints for a field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModbusHints {
    /// Signed scaling exponent applied to analog registers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaling: Option<i64>,
}

/// DNP3-specific hints for a field, copied verbatim onto generated points.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dnp3Hints {
    /// Static group variation.
    #[serde(default, alias = "svar", skip_serializing_if = "Option::is_none")]
    pub sgvar: Option<String>,
    /// Event group variation.
    #[serde(default, alias = "evar", skip_serializing_if = "Option::is_none")]
    pub egvar: Option<String>,
    /// Event class.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    /// Select-before-operate, only meaningful on output points.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sbo: Option<bool>,
}

/// Engineering-unit bounds of a point's value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

/// A single instrumentation point of a device type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub io_class: IoClass,
    pub modbus: ModbusHints,
    pub dnp3: Dnp3Hints,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<ValueRange>,
}

impl FieldSpec {
    pub fn new(io_class: IoClass) -> Self {
        Self {
            io_class,
            modbus: ModbusHints::default(),
            dnp3: Dnp3Hints::default(),
            range: None,
        }
    }

    pub fn with_scaling(mut self, scaling: i64) -> Self {
        self.modbus.scaling = Some(scaling);
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFieldSpec {
    Bare(IoClass),
    Full {
        #[serde(rename = "type")]
        io_class: IoClass,
        #[serde(default)]
        modbus: ModbusHints,
        #[serde(default)]
        dnp3: Dnp3Hints,
        #[serde(default)]
        range: Option<ValueRange>,
    },
}

impl<'de> Deserialize<'de> for FieldSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(match RawFieldSpec::deserialize(deserializer)? {
            RawFieldSpec::Bare(io_class) => FieldSpec::new(io_class),
            RawFieldSpec::Full {
                io_class,
                modbus,
                dnp3,
                range,
            } => {
                if let Some(r) = range
                    && r.min > r.max
                {
                    return Err(D::Error::custom(format!(
                        "range min {} is greater than max {}",
                        r.min, r.max
                    )));
                }
                FieldSpec {
                    io_class,
                    modbus,
                    dnp3,
                    range,
                }
            }
        })
    }
}

/// `infrastructure -> device type -> fields`, read-only once built.
#[derive(Debug, Clone, Default)]
pub struct InfrastructureCatalog {
    infrastructures: HashMap<String, OrderedMap<FieldTable>>,
}

impl InfrastructureCatalog {
    /// Catalog holding the built-in power-distribution device types.
    pub fn builtin() -> Self {
        let mut infrastructures = HashMap::new();
        infrastructures.insert(DEFAULT_INFRASTRUCTURE.to_string(), power_distribution());
        Self { infrastructures }
    }

    /// Built-ins merged with per-experiment overrides.
    pub fn with_overrides(overrides: &CatalogOverrides) -> Self {
        let mut catalog = Self::builtin();
        catalog.merge(overrides);
        catalog
    }

    /// Merge overrides at device-type granularity.
    ///
    /// A known device type gets the override fields replacing or extending
    /// its own; an unknown device type is added as-is.
    pub fn merge(&mut self, overrides: &CatalogOverrides) {
        for (infra, device_types) in overrides {
            let entry = self.infrastructures.entry(infra.clone()).or_default();
            for (device_type, fields) in device_types.iter() {
                let merged = match entry.get(device_type) {
                    Some(existing) => existing.merged_with(fields),
                    None => fields.clone(),
                };
                entry.insert(device_type, merged);
            }
        }
    }

    /// Fields of a device type, if known.
    pub fn fields(&self, infrastructure: &str, device_type: &str) -> Option<&FieldTable> {
        self.infrastructures
            .get(infrastructure)
            .and_then(|types| types.get(device_type))
    }

    /// Fields of a device type, failing with context when unknown.
    pub fn require(&self, node: &str, infrastructure: &str, device_type: &str) -> Result<&FieldTable> {
        self.fields(infrastructure, device_type).ok_or_else(|| {
            debug!(
                "Known '{}' device types: [{}]",
                infrastructure,
                self.device_types(infrastructure).join(", ")
            );
            CompileError::UnknownDeviceType {
                node: node.to_string(),
                infrastructure: infrastructure.to_string(),
                device_type: device_type.to_string(),
            }
        })
    }

    /// Names of the device types known for an infrastructure.
    pub fn device_types(&self, infrastructure: &str) -> Vec<&str> {
        self.infrastructures
            .get(infrastructure)
            .map(|types| types.keys().collect())
            .unwrap_or_default()
    }
}

fn analog(scaling: i64) -> FieldSpec {
    FieldSpec::new(IoClass::AnalogRead).with_scaling(scaling)
}

fn table(fields: &[(&str, FieldSpec)]) -> FieldTable {
    fields.iter().map(|(k, v)| (*k, v.clone())).collect()
}

fn branch_fields() -> FieldTable {
    table(&[
        ("from_voltage", analog(2)),
        ("from_current", analog(2)),
        ("from_active_power", analog(2)),
        ("from_reactive_power", analog(2)),
        ("to_voltage", analog(2)),
        ("to_current", analog(2)),
        ("to_active_power", analog(2)),
        ("to_reactive_power", analog(2)),
    ])
}

fn power_distribution() -> OrderedMap<FieldTable> {
    let setpoint = FieldSpec::new(IoClass::AnalogReadWrite).with_scaling(2);
    let equipment = |extra: (&str, FieldSpec)| {
        table(&[
            ("voltage", analog(2)),
            ("current", analog(2)),
            ("freq", analog(2)),
            ("power", analog(2)),
            extra,
        ])
    };

    let mut types = OrderedMap::new();
    types.insert("node", table(&[("voltage", analog(2))]));
    types.insert("bus", table(&[("voltage", analog(2))]));
    types.insert(
        "breaker",
        table(&[
            ("voltage", analog(2)),
            ("current", analog(2)),
            ("freq", analog(2)),
            ("power", analog(2)),
            ("status", FieldSpec::new(IoClass::BinaryRead)),
            ("controls", FieldSpec::new(IoClass::BinaryReadWrite)),
        ]),
    );
    types.insert("capacitor", equipment(("setpt", setpoint.clone())));
    types.insert("regulator", equipment(("setpt", setpoint)));
    types.insert(
        "load",
        table(&[
            ("voltage", analog(2)),
            ("current", analog(2)),
            ("active_power", analog(2)),
            ("reactive_power", analog(2)),
        ]),
    );
    types.insert("line", branch_fields());
    types.insert("transformer", branch_fields());
    types
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_breaker_order() {
        let catalog = InfrastructureCatalog::builtin();
        let fields = catalog.fields(DEFAULT_INFRASTRUCTURE, "breaker").unwrap();
        let names: Vec<&str> = fields.keys().collect();
        assert_eq!(
            names,
            vec!["voltage", "current", "freq", "power", "status", "controls"]
        );
        assert_eq!(fields.get("controls").unwrap().io_class, IoClass::BinaryReadWrite);
        assert_eq!(fields.get("voltage").unwrap().modbus.scaling, Some(2));
    }

    #[test]
    fn test_builtin_covers_distribution_entities() {
        let catalog = InfrastructureCatalog::builtin();
        for device_type in [
            "bus",
            "breaker",
            "capacitor",
            "regulator",
            "load",
            "line",
            "transformer",
        ] {
            assert!(
                catalog.fields(DEFAULT_INFRASTRUCTURE, device_type).is_some(),
                "missing {device_type}"
            );
        }
    }

    #[test]
    fn test_bare_string_field_is_normalized() {
        let fields: FieldTable = json5::from_str(
            r#"{
                voltage: "analog-read",
                trip: { type: "binary-read-write", dnp3: { sbo: true, svar: "Group10Var2" } },
            }"#,
        )
        .unwrap();

        let voltage = fields.get("voltage").unwrap();
        assert_eq!(voltage.io_class, IoClass::AnalogRead);
        assert_eq!(voltage.modbus.scaling, None);

        let trip = fields.get("trip").unwrap();
        assert_eq!(trip.dnp3.sbo, Some(true));
        assert_eq!(trip.dnp3.sgvar.as_deref(), Some("Group10Var2"));
    }

    #[test]
    fn test_field_range_parsed() {
        let fields: FieldTable = json5::from_str(
            r#"{
                speed: { type: "analog-read-write", range: { min: 0, max: 1800.5 } },
                flow: "analog-read",
            }"#,
        )
        .unwrap();

        assert_eq!(
            fields.get("speed").unwrap().range,
            Some(ValueRange { min: 0.0, max: 1800.5 })
        );
        assert_eq!(fields.get("flow").unwrap().range, None);

        let inverted: std::result::Result<FieldTable, _> =
            json5::from_str(r#"{ speed: { type: "analog-read", range: { min: 5, max: 1 } } }"#);
        assert!(inverted.is_err());
    }

    #[test]
    fn test_override_merges_at_device_type() {
        let overrides: CatalogOverrides = json5::from_str(
            r#"{
                "power-distribution": {
                    bus: { voltage: "analog-read", angle: "analog-read" },
                    pump: { speed: "analog-read-write" },
                },
            }"#,
        )
        .unwrap();

        let catalog = InfrastructureCatalog::with_overrides(&overrides);

        let bus = catalog.fields(DEFAULT_INFRASTRUCTURE, "bus").unwrap();
        let names: Vec<&str> = bus.keys().collect();
        assert_eq!(names, vec!["voltage", "angle"]);
        // field replaced: the built-in scaling hint is gone
        assert_eq!(bus.get("voltage").unwrap().modbus.scaling, None);

        assert!(catalog.fields(DEFAULT_INFRASTRUCTURE, "pump").is_some());
        assert!(catalog.fields(DEFAULT_INFRASTRUCTURE, "breaker").is_some());
    }

    #[test]
    fn test_device_types_in_declaration_order() {
        let catalog = InfrastructureCatalog::builtin();
        let types = catalog.device_types(DEFAULT_INFRASTRUCTURE);
        assert_eq!(types[..3], ["node", "bus", "breaker"]);
        assert!(catalog.device_types("hvac").is_empty());
    }

    #[test]
    fn test_unknown_device_type_is_error() {
        let catalog = InfrastructureCatalog::builtin();
        let err = catalog
            .require("rtu1", DEFAULT_INFRASTRUCTURE, "turbine")
            .unwrap_err();
        assert!(matches!(err, CompileError::UnknownDeviceType { .. }));

        let err = catalog.require("rtu1", "hvac", "bus").unwrap_err();
        assert!(err.to_string().contains("hvac"));
    }
}
