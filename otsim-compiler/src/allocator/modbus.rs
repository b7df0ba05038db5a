//! Modbus address allocation.

use otsim_common::{IoClass, Protocol};
use tracing::debug;

use super::{Mode, OverrideTable, advance};
use crate::document::{ModbusRegister, ModbusRegisterType};
use crate::error::{CompileError, Result};
use crate::register::Register;

/// First coil address.
pub const COIL_BASE: u32 = 0;
/// First discrete-input address.
pub const DISCRETE_BASE: u32 = 20000;
/// First input-register address.
pub const INPUT_BASE: u32 = 30000;
/// First holding-register address.
pub const HOLDING_BASE: u32 = 40000;
/// Number of addresses in one register table (16-bit data address).
pub const TABLE_SIZE: u32 = 1 << 16;

/// Sequential Modbus allocator for one (device, mode) pass.
#[derive(Debug)]
pub struct ModbusAllocator<'a> {
    node: &'a str,
    mode: Mode,
    coil: u32,
    discrete: u32,
    input: u32,
    holding: u32,
    overrides: &'a OverrideTable,
}

impl<'a> ModbusAllocator<'a> {
    /// Create an allocator with every counter at its base offset.
    pub fn new(node: &'a str, mode: Mode, overrides: &'a OverrideTable) -> Self {
        Self {
            node,
            mode,
            coil: COIL_BASE,
            discrete: DISCRETE_BASE,
            input: INPUT_BASE,
            holding: HOLDING_BASE,
            overrides,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Allocate the next address for a register.
    ///
    /// Fails when the address falls past the end of its register table.
    pub fn allocate(&mut self, register: &Register) -> Result<ModbusRegister> {
        let register_type = register_type(register.io_class);
        let manual = self.overrides.lookup(register, register.kind());

        if let Some(number) = manual {
            debug!(
                "Manual Modbus {} address {} for '{}'",
                register_type.as_str(),
                number,
                register.tag()
            );
        }

        let last = base(register_type) + (TABLE_SIZE - 1);
        let address = match advance(self.counter(register_type), manual) {
            Some(address) if address <= last => address,
            other => {
                return Err(CompileError::AddressExhausted {
                    node: self.node.to_string(),
                    protocol: Protocol::Modbus,
                    class: register_type.as_str(),
                    address: other.unwrap_or(u32::MAX),
                });
            }
        };

        // Scaling only applies to 16-bit registers; servers store the
        // inverse exponent of what clients read back.
        let scaling = if register.io_class.is_analog() {
            register.modbus.scaling.map(|s| match self.mode {
                Mode::Server => -s,
                Mode::Client => s,
            })
        } else {
            None
        };

        Ok(ModbusRegister {
            register_type,
            address,
            tag: register.tag(),
            scaling,
        })
    }

    /// Allocate a list of registers in order.
    pub fn allocate_all(&mut self, registers: &[Register]) -> Result<Vec<ModbusRegister>> {
        registers.iter().map(|r| self.allocate(r)).collect()
    }

    fn counter(&mut self, register_type: ModbusRegisterType) -> &mut u32 {
        match register_type {
            ModbusRegisterType::Coil => &mut self.coil,
            ModbusRegisterType::Discrete => &mut self.discrete,
            ModbusRegisterType::Input => &mut self.input,
            ModbusRegisterType::Holding => &mut self.holding,
        }
    }
}

/// Register type an I/O class is stored in.
pub fn register_type(class: IoClass) -> ModbusRegisterType {
    match class {
        IoClass::BinaryReadWrite => ModbusRegisterType::Coil,
        IoClass::BinaryRead => ModbusRegisterType::Discrete,
        IoClass::AnalogRead => ModbusRegisterType::Input,
        IoClass::AnalogReadWrite => ModbusRegisterType::Holding,
    }
}

/// First address of a register table.
pub fn base(register_type: ModbusRegisterType) -> u32 {
    match register_type {
        ModbusRegisterType::Coil => COIL_BASE,
        ModbusRegisterType::Discrete => DISCRETE_BASE,
        ModbusRegisterType::Input => INPUT_BASE,
        ModbusRegisterType::Holding => HOLDING_BASE,
    }
}
