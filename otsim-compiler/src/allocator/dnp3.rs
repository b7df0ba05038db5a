//! DNP3 index allocation.
//!
//! Analog and binary points each have one counter starting at 0. A
//! read-write point takes an input index from the counter and a paired
//! output at `index + OUTPUT_OFFSET`; the counter still advances by one.

use otsim_common::{IoClass, Protocol};
use tracing::debug;

use super::{Mode, OverrideTable, advance};
use crate::document::{Dnp3Point, PointDirection, PointType};
use crate::error::{CompileError, Result};
use crate::register::Register;

/// Offset between an input index and its paired output index.
pub const OUTPUT_OFFSET: u32 = 1000;

/// Sequential DNP3 allocator for one (device, mode) pass.
#[derive(Debug)]
pub struct Dnp3Allocator<'a> {
    node: &'a str,
    mode: Mode,
    analog: u32,
    binary: u32,
    overrides: &'a OverrideTable,
}

impl<'a> Dnp3Allocator<'a> {
    pub fn new(node: &'a str, mode: Mode, overrides: &'a OverrideTable) -> Self {
        Self {
            node,
            mode,
            analog: 0,
            binary: 0,
            overrides,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Allocate the point (or input/output pair) for a register.
    pub fn allocate(&mut self, register: &Register) -> Result<Vec<Dnp3Point>> {
        let point_type = if register.io_class.is_analog() {
            PointType::Analog
        } else {
            PointType::Binary
        };

        let manual = self.overrides.lookup(register, register.kind());
        if let Some(number) = manual {
            debug!(
                "Manual DNP3 {} index {} for '{}'",
                point_type.as_str(),
                number,
                register.tag()
            );
        }

        let counter = match point_type {
            PointType::Analog => &mut self.analog,
            PointType::Binary => &mut self.binary,
        };
        let address = match advance(counter, manual) {
            Some(address) if address < OUTPUT_OFFSET => address,
            other => {
                return Err(CompileError::AddressExhausted {
                    node: self.node.to_string(),
                    protocol: Protocol::Dnp3,
                    class: point_type.as_str(),
                    address: other.unwrap_or(u32::MAX),
                });
            }
        };

        let input = point(register, PointDirection::Input, point_type, address);

        if !register.io_class.is_writable() {
            return Ok(vec![input]);
        }

        let mut output = point(
            register,
            PointDirection::Output,
            point_type,
            address + OUTPUT_OFFSET,
        );
        output.sbo = register.dnp3.sbo;

        Ok(vec![input, output])
    }

    /// Allocate a list of registers in order.
    pub fn allocate_all(&mut self, registers: &[Register]) -> Result<Vec<Dnp3Point>> {
        let capacity = registers
            .iter()
            .map(|r| points_per_register(r.io_class))
            .sum();
        let mut points = Vec::with_capacity(capacity);
        for register in registers {
            points.extend(self.allocate(register)?);
        }
        Ok(points)
    }
}

fn point(
    register: &Register,
    direction: PointDirection,
    point_type: PointType,
    address: u32,
) -> Dnp3Point {
    Dnp3Point {
        direction,
        point_type,
        address,
        tag: register.tag(),
        sgvar: register.dnp3.sgvar.clone(),
        egvar: register.dnp3.egvar.clone(),
        class: register.dnp3.class.clone(),
        sbo: None,
    }
}

/// Number of points a register expands to.
pub fn points_per_register(class: IoClass) -> usize {
    if class.is_writable() { 2 } else { 1 }
}
