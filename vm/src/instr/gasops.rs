use std::rc::Rc;

use anyhow::Result;
use num_traits::{Signed, ToPrimitive};

use crate::dispatch::Opcodes;
use crate::error::VmResult;
use crate::state::VmState;

pub fn register(t: &mut Opcodes) -> Result<()> {
    t.add_simple(0xf800, 16, exec_accept)?;
    t.add_simple(0xf801, 16, exec_set_gas_limit)?;
    t.add_simple(0xf806, 16, exec_gas_consumed)?;
    t.add_simple(0xf80f, 16, exec_commit)?;
    Ok(())
}

fn exec_accept(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute ACCEPT");
    set_gas_limit(st, u64::MAX)
}

fn exec_set_gas_limit(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute SETGASLIMIT");
    let x = ok!(Rc::make_mut(&mut st.stack).pop_int());
    let limit = if x.is_positive() {
        x.to_u64().unwrap_or(u64::MAX)
    } else {
        0
    };
    set_gas_limit(st, limit)
}

fn set_gas_limit(st: &mut VmState, limit: u64) -> VmResult<i32> {
    vm_ensure!(limit >= st.gas.gas_consumed(), OutOfGas);
    st.gas.set_limit(limit);
    Ok(0)
}

fn exec_gas_consumed(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute GASCONSUMED");
    ok!(Rc::make_mut(&mut st.stack).push_int(st.gas.gas_consumed()));
    Ok(0)
}

fn exec_commit(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute COMMIT");
    st.force_commit()?;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use num_bigint::BigInt;
    use tonkit_types::cell::CellBuilder;

    use crate::stack::StackValue;
    use crate::state::VmState;

    fn run(bytes: &[u8]) -> VmState {
        let mut b = CellBuilder::new();
        b.store_raw(bytes, bytes.len() as u16 * 8).unwrap();
        let mut vm = VmState::builder().with_code(b.build().unwrap()).build();
        vm.run();
        vm
    }

    #[test]
    fn gasconsumed_tracks_spent_gas() {
        // PUSHINT 1; DROP; GASCONSUMED
        let vm = run(&[0x71, 0x30, 0xf8, 0x06]);
        let consumed = vm.stack.items.last().unwrap().as_int().unwrap();
        // two 8-bit instructions at 18 gas each plus the 16-bit one at 26
        assert_eq!(consumed, &BigInt::from(62));
    }

    #[test]
    fn accept_lifts_the_limit() {
        // ACCEPT; PUSHINT 1
        let vm = run(&[0xf8, 0x00, 0x71]);
        assert_eq!(
            vm.stack.items.last().unwrap().as_int(),
            Some(&BigInt::from(1))
        );
        assert_eq!(vm.gas.gas_limit(), i64::MAX as u64);
    }

    #[test]
    fn commit_snapshots_registers() {
        // COMMIT
        let vm = run(&[0xf8, 0x0f]);
        assert!(vm.commited_state.is_some());
    }
}
