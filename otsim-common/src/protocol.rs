use serde::{Deserialize, Serialize};

/// Field-device protocol stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Dnp3,
    Modbus,
}

impl Protocol {
    /// Every supported protocol, in the order devices declare them.
    pub const ALL: [Protocol; 2] = [Protocol::Dnp3, Protocol::Modbus];

    /// Get the string representation used in topology metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Dnp3 => "dnp3",
            Protocol::Modbus => "modbus",
        }
    }

    /// Parse a protocol name as written in topology metadata.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "dnp3" => Some(Protocol::Dnp3),
            "modbus" => Some(Protocol::Modbus),
            _ => None,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Direction and width of an instrumentation point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IoClass {
    /// Read-only measurement (voltage, current, ...).
    AnalogRead,
    /// Writable setpoint.
    AnalogReadWrite,
    /// Read-only status bit.
    BinaryRead,
    /// Writable control bit.
    BinaryReadWrite,
}

impl IoClass {
    pub const ALL: [IoClass; 4] = [
        IoClass::AnalogRead,
        IoClass::AnalogReadWrite,
        IoClass::BinaryRead,
        IoClass::BinaryReadWrite,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IoClass::AnalogRead => "analog-read",
            IoClass::AnalogReadWrite => "analog-read-write",
            IoClass::BinaryRead => "binary-read",
            IoClass::BinaryReadWrite => "binary-read-write",
        }
    }

    pub fn is_analog(&self) -> bool {
        matches!(self, IoClass::AnalogRead | IoClass::AnalogReadWrite)
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, IoClass::AnalogReadWrite | IoClass::BinaryReadWrite)
    }
}

impl std::fmt::Display for IoClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
