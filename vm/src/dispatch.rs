use std::collections::BTreeMap;

use anyhow::Result;

use crate::error::VmResult;
use crate::state::VmState;

pub const MAX_OPCODE_BITS: u16 = 24;
pub const MAX_OPCODE: u32 = 1 << MAX_OPCODE_BITS;

pub type FnExecInstrSimple = fn(&mut VmState) -> VmResult<i32>;
pub type FnExecInstrArg = Box<dyn Fn(&mut VmState, u32) -> VmResult<i32> + Send + Sync>;
pub type FnExecInstrArgExt = Box<dyn Fn(&mut VmState, u32, u16) -> VmResult<i32> + Send + Sync>;

/// Instruction table of a codepage, a sorted set of opcode ranges
/// covering the whole opcode space.
pub struct DispatchTable {
    id: u16,
    opcodes: Vec<(u32, Box<dyn Opcode>)>,
}

impl DispatchTable {
    pub fn builder(id: u16) -> Opcodes {
        Opcodes {
            id,
            opcodes: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn dispatch(&self, st: &mut VmState) -> VmResult<i32> {
        let (opcode, bits) = {
            let code = st.code.apply()?;
            ok!(Self::get_opcode_from_slice(&code))
        };
        let op = self.lookup(opcode);
        op.dispatch(st, opcode, bits)
    }

    fn get_opcode_from_slice(slice: &tonkit_types::cell::CellSlice<'_>) -> VmResult<(u32, u16)> {
        let bits = std::cmp::min(MAX_OPCODE_BITS, slice.size_bits());
        let opcode = (slice.get_uint(0, bits)? as u32) << (MAX_OPCODE_BITS - bits);
        Ok((opcode, bits))
    }

    fn lookup(&self, opcode: u32) -> &dyn Opcode {
        debug_assert!(!self.opcodes.is_empty());

        let mut i = 0;
        let mut j = self.opcodes.len();
        while j - i > 1 {
            let k = (j + i) >> 1;
            if self.opcodes[k].0 <= opcode {
                i = k;
            } else {
                j = k;
            }
        }
        self.opcodes[i].1.as_ref()
    }
}

/// Builder for a [`DispatchTable`].
pub struct Opcodes {
    id: u16,
    opcodes: BTreeMap<u32, Box<dyn Opcode>>,
}

impl Opcodes {
    pub fn build(self) -> DispatchTable {
        let mut opcodes = Vec::with_capacity(self.opcodes.len() * 2 + 1);

        let mut upto = 0;
        for (min, opcode) in self.opcodes {
            let (start, end) = opcode.range();
            debug_assert_eq!(min, start);
            if min > upto {
                opcodes.push((
                    upto,
                    Box::new(DummyOpcode {
                        opcode_min: upto,
                        opcode_max: min,
                    }) as Box<dyn Opcode>,
                ));
            }
            opcodes.push((min, opcode));
            upto = end;
        }

        if upto < MAX_OPCODE {
            opcodes.push((
                upto,
                Box::new(DummyOpcode {
                    opcode_min: upto,
                    opcode_max: MAX_OPCODE,
                }),
            ));
        }

        opcodes.shrink_to_fit();

        DispatchTable {
            id: self.id,
            opcodes,
        }
    }

    pub fn add_simple(&mut self, opcode: u32, bits: u16, exec: FnExecInstrSimple) -> Result<()> {
        debug_assert!(bits <= MAX_OPCODE_BITS);
        let remaining_bits = MAX_OPCODE_BITS - bits;
        self.add_opcode(Box::new(SimpleOpcode {
            exec,
            opcode_min: opcode << remaining_bits,
            opcode_max: (opcode + 1) << remaining_bits,
            opcode_bits: bits,
        }))
    }

    pub fn add_fixed(
        &mut self,
        opcode: u32,
        opcode_bits: u16,
        arg_bits: u16,
        exec: FnExecInstrArg,
    ) -> Result<()> {
        debug_assert!(opcode_bits + arg_bits <= MAX_OPCODE_BITS);
        let remaining_bits = MAX_OPCODE_BITS - opcode_bits - arg_bits;
        self.add_opcode(Box::new(FixedOpcode {
            exec,
            opcode_min: opcode << (remaining_bits + arg_bits),
            opcode_max: (opcode + 1) << (remaining_bits + arg_bits),
            total_bits: opcode_bits + arg_bits,
        }))
    }

    pub fn add_fixed_range(
        &mut self,
        opcode_min: u32,
        opcode_max: u32,
        total_bits: u16,
        _arg_bits: u16,
        exec: FnExecInstrArg,
    ) -> Result<()> {
        debug_assert!(total_bits <= MAX_OPCODE_BITS);
        let remaining_bits = MAX_OPCODE_BITS - total_bits;
        self.add_opcode(Box::new(FixedOpcode {
            exec,
            opcode_min: opcode_min << remaining_bits,
            opcode_max: opcode_max << remaining_bits,
            total_bits,
        }))
    }

    pub fn add_ext(
        &mut self,
        opcode: u32,
        opcode_bits: u16,
        arg_bits: u16,
        exec: FnExecInstrArgExt,
    ) -> Result<()> {
        debug_assert!(opcode_bits + arg_bits <= MAX_OPCODE_BITS);
        let remaining_bits = MAX_OPCODE_BITS - opcode_bits - arg_bits;
        self.add_opcode(Box::new(ExtOpcode {
            exec,
            opcode_min: opcode << (remaining_bits + arg_bits),
            opcode_max: (opcode + 1) << (remaining_bits + arg_bits),
            total_bits: opcode_bits + arg_bits,
        }))
    }

    pub fn add_ext_range(
        &mut self,
        opcode_min: u32,
        opcode_max: u32,
        total_bits: u16,
        exec: FnExecInstrArgExt,
    ) -> Result<()> {
        debug_assert!(total_bits <= MAX_OPCODE_BITS);
        let remaining_bits = MAX_OPCODE_BITS - total_bits;
        self.add_opcode(Box::new(ExtOpcode {
            exec,
            opcode_min: opcode_min << remaining_bits,
            opcode_max: opcode_max << remaining_bits,
            total_bits,
        }))
    }

    fn add_opcode(&mut self, opcode: Box<dyn Opcode>) -> Result<()> {
        let (min, max) = opcode.range();
        debug_assert!(min < max);
        debug_assert!(max <= MAX_OPCODE);

        if let Some((_, other)) = self.opcodes.range(..max).next_back() {
            let (other_min, other_max) = other.range();
            anyhow::ensure!(
                other_max <= min,
                "opcode range {min:06x}..{max:06x} overlaps with {other_min:06x}..{other_max:06x}"
            );
        }
        self.opcodes.insert(min, opcode);
        Ok(())
    }
}

pub trait Opcode: Send + Sync {
    /// Covered opcode range, left-aligned to [`MAX_OPCODE_BITS`].
    fn range(&self) -> (u32, u32);

    fn dispatch(&self, st: &mut VmState, opcode: u32, bits: u16) -> VmResult<i32>;
}

struct DummyOpcode {
    opcode_min: u32,
    opcode_max: u32,
}

impl Opcode for DummyOpcode {
    fn range(&self) -> (u32, u32) {
        (self.opcode_min, self.opcode_max)
    }

    fn dispatch(&self, st: &mut VmState, _: u32, _: u16) -> VmResult<i32> {
        st.gas.try_consume_instr_gas(0)?;
        vm_bail!(InvalidOpcode)
    }
}

struct SimpleOpcode {
    exec: FnExecInstrSimple,
    opcode_min: u32,
    opcode_max: u32,
    opcode_bits: u16,
}

impl Opcode for SimpleOpcode {
    fn range(&self) -> (u32, u32) {
        (self.opcode_min, self.opcode_max)
    }

    fn dispatch(&self, st: &mut VmState, _: u32, bits: u16) -> VmResult<i32> {
        vm_ensure!(bits >= self.opcode_bits, InvalidOpcode);
        st.code.range_mut().try_advance(self.opcode_bits, 0);
        st.gas.try_consume_instr_gas(self.opcode_bits)?;
        (self.exec)(st)
    }
}

struct FixedOpcode {
    exec: FnExecInstrArg,
    opcode_min: u32,
    opcode_max: u32,
    total_bits: u16,
}

impl Opcode for FixedOpcode {
    fn range(&self) -> (u32, u32) {
        (self.opcode_min, self.opcode_max)
    }

    fn dispatch(&self, st: &mut VmState, opcode: u32, bits: u16) -> VmResult<i32> {
        vm_ensure!(bits >= self.total_bits, InvalidOpcode);
        st.code.range_mut().try_advance(self.total_bits, 0);
        st.gas.try_consume_instr_gas(self.total_bits)?;
        (self.exec)(st, opcode >> (MAX_OPCODE_BITS - self.total_bits))
    }
}

struct ExtOpcode {
    exec: FnExecInstrArgExt,
    opcode_min: u32,
    opcode_max: u32,
    total_bits: u16,
}

impl Opcode for ExtOpcode {
    fn range(&self) -> (u32, u32) {
        (self.opcode_min, self.opcode_max)
    }

    fn dispatch(&self, st: &mut VmState, opcode: u32, bits: u16) -> VmResult<i32> {
        vm_ensure!(bits >= self.total_bits, InvalidOpcode);
        st.code.range_mut().try_advance(self.total_bits, 0);
        st.gas.try_consume_instr_gas(self.total_bits)?;
        (self.exec)(
            st,
            opcode >> (MAX_OPCODE_BITS - self.total_bits),
            self.total_bits,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gaps_are_filled_with_dummies() {
        let mut cp = DispatchTable::builder(0);
        cp.add_simple(0x00, 8, |_| Ok(0)).unwrap();
        cp.add_simple(0xff, 8, |_| Ok(0)).unwrap();
        let cp = cp.build();

        // 0x00, dummy gap, 0xff, trailing dummy is merged into the gap
        assert_eq!(cp.opcodes.len(), 3);
        let (min, _) = cp.lookup(0x80 << 16).range();
        assert_eq!(min, 0x01 << 16);
    }

    #[test]
    fn overlapping_ranges_are_rejected() {
        let mut cp = DispatchTable::builder(0);
        cp.add_fixed_range(0x70, 0x80, 8, 4, Box::new(|_, _| Ok(0)))
            .unwrap();
        assert!(cp.add_simple(0x74, 8, |_| Ok(0)).is_err());
    }
}
