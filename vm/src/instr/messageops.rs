use std::rc::Rc;

use anyhow::Result;
use num_traits::ToPrimitive;
use tonkit_types::cell::{CellBuilder, EmptyCellContext, HashBytes, Store};
use tonkit_types::num::Tokens;

use crate::cont::ControlRegs;
use crate::dispatch::Opcodes;
use crate::error::VmResult;
use crate::state::VmState;

const OUTPUT_ACTIONS_IDX: usize = 5;

pub const ACTION_SEND_MSG: u32 = 0x0ec3c86d;
pub const ACTION_RESERVE: u32 = 0x36e6b809;
pub const ACTION_SET_CODE: u32 = 0xad4de08e;
pub const ACTION_CHANGE_LIBRARY: u32 = 0x26fa1dd4;

pub fn register(t: &mut Opcodes) -> Result<()> {
    t.add_simple(0xfb00, 16, exec_send_message_raw)?;
    t.add_fixed_range(0xfb02, 0xfb04, 16, 1, Box::new(exec_reserve_raw))?;
    t.add_simple(0xfb04, 16, exec_set_code)?;
    t.add_simple(0xfb06, 16, exec_set_lib_code)?;
    t.add_simple(0xfb07, 16, exec_change_lib)?;
    Ok(())
}

fn exec_send_message_raw(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute SENDRAWMSG");
    let stack = Rc::make_mut(&mut st.stack);
    let mode = ok!(stack.pop_smallint_range(0, 255));
    let msg = ok!(stack.pop_cell());

    let mut cb = CellBuilder::new();
    let Some(actions) = st.cr.get_d(OUTPUT_ACTIONS_IDX) else {
        vm_bail!(ControlRegisterOutOfRange(OUTPUT_ACTIONS_IDX));
    };
    cb.store_reference(actions)?;
    cb.store_u32(ACTION_SEND_MSG)?;
    cb.store_u8(mode as u8)?;
    cb.store_reference(Rc::unwrap_or_clone(msg))?;

    install_output_actions(st, cb)
}

fn exec_reserve_raw(st: &mut VmState, args: u32) -> VmResult<i32> {
    let with_extra = args & 1 != 0;
    vm_log!(st, "execute RAWRESERVE{}", if with_extra { "X" } else { "" });

    let stack = Rc::make_mut(&mut st.stack);
    let mode = ok!(stack.pop_smallint_range(0, 15));
    let extra = if with_extra {
        ok!(stack.pop_cell_opt())
    } else {
        None
    };
    let amount = ok!(stack.pop_int());

    let tokens = match amount.to_u128().map(Tokens::new) {
        Some(tokens) if tokens.is_valid() => tokens,
        _ => vm_bail!(IntegerOutOfRange {
            min: 0,
            max: i64::MAX,
            actual: amount.to_string(),
        }),
    };

    let mut cb = CellBuilder::new();
    let Some(actions) = st.cr.get_d(OUTPUT_ACTIONS_IDX) else {
        vm_bail!(ControlRegisterOutOfRange(OUTPUT_ACTIONS_IDX));
    };
    cb.store_reference(actions)?;
    cb.store_u32(ACTION_RESERVE)?;
    cb.store_u8(mode as u8)?;
    tokens.store_into(&mut cb, &mut EmptyCellContext)?;
    match extra {
        Some(cell) => {
            cb.store_bit_one()?;
            cb.store_reference(Rc::unwrap_or_clone(cell))?;
        }
        None => cb.store_bit_zero()?,
    }

    install_output_actions(st, cb)
}

fn exec_set_code(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute SETCODE");
    let code = ok!(Rc::make_mut(&mut st.stack).pop_cell());

    let mut cb = CellBuilder::new();
    let Some(actions) = st.cr.get_d(OUTPUT_ACTIONS_IDX) else {
        vm_bail!(ControlRegisterOutOfRange(OUTPUT_ACTIONS_IDX));
    };
    cb.store_reference(actions)?;
    cb.store_u32(ACTION_SET_CODE)?;
    cb.store_reference(Rc::unwrap_or_clone(code))?;

    install_output_actions(st, cb)
}

fn exec_set_lib_code(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute SETLIBCODE");
    let stack = Rc::make_mut(&mut st.stack);
    let mode = ok!(stack.pop_smallint_range(0, 2));
    let code = ok!(stack.pop_cell());

    let mut cb = CellBuilder::new();
    let Some(actions) = st.cr.get_d(OUTPUT_ACTIONS_IDX) else {
        vm_bail!(ControlRegisterOutOfRange(OUTPUT_ACTIONS_IDX));
    };
    cb.store_reference(actions)?;
    cb.store_u32(ACTION_CHANGE_LIBRARY)?;
    // libref_ref$1 with the mode in the upper bits
    cb.store_u8((mode * 2 + 1) as u8)?;
    cb.store_reference(Rc::unwrap_or_clone(code))?;

    install_output_actions(st, cb)
}

fn exec_change_lib(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute CHANGELIB");
    let stack = Rc::make_mut(&mut st.stack);
    let mode = ok!(stack.pop_smallint_range(0, 2));
    let hash = ok!(stack.pop_int());

    let (_, bytes) = hash.to_bytes_be();
    vm_ensure!(bytes.len() <= 32, IntegerOverflow);
    let mut hash_bytes = HashBytes::default();
    hash_bytes.0[32 - bytes.len()..].copy_from_slice(&bytes);

    let mut cb = CellBuilder::new();
    let Some(actions) = st.cr.get_d(OUTPUT_ACTIONS_IDX) else {
        vm_bail!(ControlRegisterOutOfRange(OUTPUT_ACTIONS_IDX));
    };
    cb.store_reference(actions)?;
    cb.store_u32(ACTION_CHANGE_LIBRARY)?;
    // libref_hash$0 with the mode in the upper bits
    cb.store_u8((mode * 2) as u8)?;
    cb.store_u256(&hash_bytes)?;

    install_output_actions(st, cb)
}

fn install_output_actions(st: &mut VmState, cb: CellBuilder) -> VmResult<i32> {
    let head = cb.build_ext(&mut st.gas)?;
    vm_log!(st, "installing an output action");
    st.cr.d[OUTPUT_ACTIONS_IDX - 4] = Some(head);
    Ok(0)
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use num_bigint::BigInt;
    use tonkit_types::cell::{Cell, CellBuilder};

    use super::{ACTION_RESERVE, ACTION_SEND_MSG};
    use crate::stack::RcStackValue;
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
    fn sendrawmsg_appends_an_action() {
        let mut mb = CellBuilder::new();
        mb.store_u32(0x1234).unwrap();
        let msg = mb.build().unwrap();

        let vm = run(
            &[0xfb, 0x00],
            vec![Rc::new(msg.clone()), Rc::new(BigInt::from(3))],
        );

        let head = vm.commited_state.unwrap().c5;
        let mut cs = head.as_slice().unwrap();
        let prev = cs.load_reference_cloned().unwrap();
        assert_eq!(prev, Cell::empty_cell());
        assert_eq!(cs.load_u32().unwrap(), ACTION_SEND_MSG);
        assert_eq!(cs.load_u8().unwrap(), 3);
        assert_eq!(
            cs.load_reference_cloned().unwrap().repr_hash(),
            msg.repr_hash()
        );
    }

    #[test]
    fn actions_chain_through_the_list_head() {
        let mut mb = CellBuilder::new();
        mb.store_u32(0x1234).unwrap();
        let msg = mb.build().unwrap();

        // two sends in a row
        let vm = run(
            &[0xfb, 0x00, 0xfb, 0x00],
            vec![
                Rc::new(msg.clone()),
                Rc::new(BigInt::from(1)),
                Rc::new(msg),
                Rc::new(BigInt::from(2)),
            ],
        );

        let head = vm.commited_state.unwrap().c5;
        let mut cs = head.as_slice().unwrap();
        let prev = cs.load_reference_cloned().unwrap();
        assert_eq!(cs.load_u32().unwrap(), ACTION_SEND_MSG);
        assert_eq!(cs.load_u8().unwrap(), 1);

        let mut prev_cs = prev.as_slice().unwrap();
        let first = prev_cs.load_reference_cloned().unwrap();
        assert_eq!(first, Cell::empty_cell());
        assert_eq!(prev_cs.load_u32().unwrap(), ACTION_SEND_MSG);
        assert_eq!(prev_cs.load_u8().unwrap(), 2);
    }

    #[test]
    fn rawreserve_stores_mode_and_amount() {
        let vm = run(
            &[0xfb, 0x02],
            vec![Rc::new(BigInt::from(1_000_000u64)), Rc::new(BigInt::from(4))],
        );

        let head = vm.commited_state.unwrap().c5;
        let mut cs = head.as_slice().unwrap();
        cs.load_reference_cloned().unwrap();
        assert_eq!(cs.load_u32().unwrap(), ACTION_RESERVE);
        assert_eq!(cs.load_u8().unwrap(), 4);
        // VarUInteger 16: length prefix 3, then the three amount bytes
        assert_eq!(cs.load_small_uint(4).unwrap(), 3);
        assert_eq!(cs.load_uint(24).unwrap(), 1_000_000);
    }

    #[test]
    fn rawreserve_rejects_negative_amounts() {
        let vm = run(
            &[0xfb, 0x02],
            vec![Rc::new(BigInt::from(-5)), Rc::new(BigInt::from(0))],
        );
        assert!(vm.commited_state.is_none());
    }
}
