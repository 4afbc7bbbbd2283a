use anyhow::Result;

use crate::dispatch::Opcodes;
use crate::error::VmResult;
use crate::stack::StackValue;
use crate::state::VmState;

pub fn register(t: &mut Opcodes) -> Result<()> {
    t.add_simple(0xfe00, 16, exec_dump_stack)?;
    t.add_fixed_range(0xfe01, 0xfe14, 16, 8, Box::new(exec_dummy_debug))?;
    t.add_simple(0xfe14, 16, exec_dump_string)?;
    t.add_fixed_range(0xfe15, 0xfe20, 16, 8, Box::new(exec_dummy_debug))?;
    t.add_fixed(0xfe2, 12, 4, Box::new(exec_dump_value))?;
    t.add_fixed_range(0xfe30, 0xfef0, 16, 8, Box::new(exec_dummy_debug))?;
    t.add_ext(0xfef, 12, 4, Box::new(exec_dummy_debug_str))?;
    Ok(())
}

fn exec_dump_stack(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute DUMPSTK");
    let dump = format!("{}", st.stack.display_dump());
    vm_log!(st, "#DEBUG#: stack({} values) {dump}", st.stack.depth());
    Ok(0)
}

fn exec_dummy_debug(st: &mut VmState, args: u32) -> VmResult<i32> {
    vm_log!(st, "execute DEBUG {}", args & 0xff);
    Ok(0)
}

fn exec_dump_string(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute STRDUMP");
    let line = match st.stack.items.last() {
        Some(value) if value.as_slice().is_some() => {
            format!("#DEBUG#: {}", DisplayValue(value.as_ref()))
        }
        Some(_) => "#DEBUG#: is not a slice".to_owned(),
        None => "#DEBUG#: s0 is absent".to_owned(),
    };
    vm_log!(st, "{line}");
    Ok(0)
}

fn exec_dump_value(st: &mut VmState, args: u32) -> VmResult<i32> {
    let x = (args & 0xf) as usize;
    vm_log!(st, "execute DUMP s{x}");
    let depth = st.stack.depth();
    let line = if x < depth {
        format!(
            "#DEBUG#: s{x} = {}",
            DisplayValue(st.stack.items[depth - x - 1].as_ref())
        )
    } else {
        format!("#DEBUG#: s{x} is absent")
    };
    vm_log!(st, "{line}");
    Ok(0)
}

/// `DEBUGSTR`: an inline binary payload of `(args & 0xf) + 1` bytes which
/// is skipped without any effect on the state.
fn exec_dummy_debug_str(st: &mut VmState, args: u32, _bits: u16) -> VmResult<i32> {
    let data_bits = ((args & 0xf) + 1) as u16 * 8;
    vm_ensure!(st.code.range().has_remaining(data_bits, 0), InvalidOpcode);

    vm_log!(st, "execute DEBUGSTR {data_bits} bits");

    st.code.range_mut().try_advance(data_bits, 0);
    Ok(0)
}

struct DisplayValue<'a>(&'a dyn StackValue);

impl std::fmt::Display for DisplayValue<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt_dump(f)
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use num_bigint::BigInt;
    use tonkit_types::cell::CellBuilder;

    use crate::stack::{RcStackValue, StackValue};
    use crate::state::VmState;

    fn run(bytes: &[u8], stack: Vec<RcStackValue>) -> VmState {
        let mut b = CellBuilder::new();
        b.store_raw(bytes, bytes.len() as u16 * 8).unwrap();
        let mut vm = VmState::builder()
            .with_code(b.build().unwrap())
            .with_stack(stack)
            .build();
        vm.run();
        vm
    }

    #[test]
    fn debug_opcodes_leave_the_stack_alone() {
        // DUMPSTK; DEBUG 0x05; DUMP s0
        let vm = run(
            &[0xfe, 0x00, 0xfe, 0x05, 0xfe, 0x20],
            vec![Rc::new(BigInt::from(9))],
        );
        assert_eq!(vm.stack.items.len(), 1);
        assert_eq!(
            vm.stack.items.last().unwrap().as_int(),
            Some(&BigInt::from(9))
        );
    }

    #[test]
    fn debugstr_skips_its_payload() {
        // DEBUGSTR with a 1-byte payload, then PUSHINT 2
        let vm = run(&[0xfe, 0xf0, 0xaa, 0x72], vec![]);
        assert_eq!(
            vm.stack.items.last().unwrap().as_int(),
            Some(&BigInt::from(2))
        );
    }

    #[test]
    fn debugstr_without_payload_is_an_invalid_opcode() {
        let mut b = CellBuilder::new();
        b.store_raw(&[0xfe, 0xf0], 16).unwrap();
        let mut vm = VmState::builder().with_code(b.build().unwrap()).build();
        assert_ne!(vm.run(), 0);
    }
}
