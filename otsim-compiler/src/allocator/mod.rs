//! Wire address allocation.
//!
//! An allocator is a plain value scoped to one (device, protocol, mode)
//! pass. Starting a new pass means constructing a new allocator, so
//! counters never leak between devices.

pub mod dnp3;
pub mod modbus;

use serde::{Deserialize, Serialize};

use crate::register::{Register, RegisterKind, RegisterOverride};

pub use dnp3::Dnp3Allocator;
pub use modbus::ModbusAllocator;

/// Side of the protocol conversation a section is encoded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Outstation / slave.
    Server,
    /// Master / client.
    Client,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Server => "server",
            Mode::Client => "client",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Manual register numbers that apply to one allocation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverrideTable {
    entries: Vec<RegisterOverride>,
}

impl OverrideTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Declared number for `register` allocated as `kind`. The last
    /// matching declaration wins.
    pub fn lookup(&self, register: &Register, kind: RegisterKind) -> Option<u32> {
        self.entries
            .iter()
            .rev()
            .find(|o| o.matches(register, kind))
            .map(|o| o.register_number)
    }
}

impl FromIterator<RegisterOverride> for OverrideTable {
    fn from_iter<I: IntoIterator<Item = RegisterOverride>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Take the next address from `counter`.
///
/// With a manual number the counter is first reassigned to it, then the
/// regular step runs unconditionally: the register lands on the declared
/// number and later registers continue from number + 1. Returns `None` when
/// the step would overflow the counter.
pub(crate) fn advance(counter: &mut u32, manual: Option<u32>) -> Option<u32> {
    if let Some(number) = manual {
        *counter = number;
    }

    let address = *counter;
    *counter = address.checked_add(1)?;
    Some(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_auto() {
        let mut counter = 30000;
        assert_eq!(advance(&mut counter, None), Some(30000));
        assert_eq!(advance(&mut counter, None), Some(30001));
        assert_eq!(counter, 30002);
    }

    #[test]
    fn test_advance_manual_reassigns_counter() {
        let mut counter = 30000;
        assert_eq!(advance(&mut counter, None), Some(30000));
        assert_eq!(advance(&mut counter, Some(30100)), Some(30100));
        assert_eq!(advance(&mut counter, None), Some(30101));
    }

    #[test]
    fn test_advance_manual_can_jump_backwards() {
        let mut counter = 40005;
        assert_eq!(advance(&mut counter, Some(40001)), Some(40001));
        assert_eq!(advance(&mut counter, None), Some(40002));
    }

    #[test]
    fn test_advance_overflow_is_none() {
        let mut counter = 0;
        assert_eq!(advance(&mut counter, Some(u32::MAX)), None);
        assert_eq!(advance(&mut counter, Some(u32::MAX - 1)), Some(u32::MAX - 1));
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(Mode::Server.to_string(), "server");
        assert_eq!(Mode::Client.as_str(), "client");
    }
}
