use std::rc::Rc;

use anyhow::Result;
use tonkit_types::cell::CellBuilder;
use tonkit_types::dict;

use crate::dispatch::Opcodes;
use crate::error::VmResult;
use crate::stack::{RcStackValue, Stack};
use crate::state::VmState;
use crate::util::{store_int_to_builder, OwnedCellSlice};

pub fn register(t: &mut Opcodes) -> Result<()> {
    t.add_fixed(0xf82, 12, 4, Box::new(exec_get_param))?;
    t.add_simple(0xf830, 16, exec_get_config_dict)?;
    t.add_simple(0xf832, 16, exec_get_config_param)?;
    t.add_simple(0xf833, 16, exec_get_config_opt_param)?;
    t.add_simple(0xf840, 16, exec_get_global_var)?;
    t.add_fixed_range(0xf841, 0xf860, 16, 5, Box::new(exec_get_global))?;
    t.add_simple(0xf860, 16, exec_set_global_var)?;
    t.add_fixed_range(0xf861, 0xf880, 16, 5, Box::new(exec_set_global))?;
    Ok(())
}

fn param_name(i: usize) -> &'static str {
    match i {
        3 => "NOW",
        4 => "BLOCKLT",
        5 => "LTIME",
        6 => "RANDSEED",
        7 => "BALANCE",
        8 => "MYADDR",
        9 => "CONFIGROOT",
        10 => "MYCODE",
        11 => "INCOMINGVALUE",
        12 => "STORAGEFEES",
        13 => "PREVBLOCKSINFOTUPLE",
        _ => "GETPARAM",
    }
}

fn get_param(st: &VmState, index: usize) -> VmResult<RcStackValue> {
    let params = ok!(st.cr.get_c7_params());
    match params.get(index) {
        Some(param) => Ok(param.clone()),
        None => vm_bail!(ControlRegisterOutOfRange(index)),
    }
}

fn exec_get_param(st: &mut VmState, args: u32) -> VmResult<i32> {
    let i = (args & 0xf) as usize;
    vm_log!(st, "execute {}", param_name(i));
    let param = ok!(get_param(st, i));
    ok!(Rc::make_mut(&mut st.stack).push_raw(param));
    Ok(0)
}

fn exec_get_config_dict(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute CONFIGDICT");
    let config = ok!(get_param(st, 9));
    let stack = Rc::make_mut(&mut st.stack);
    ok!(stack.push_raw(config));
    ok!(stack.push_int(32));
    Ok(0)
}

fn exec_get_config_param(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute CONFIGPARAM");
    config_param_common(st, false)
}

fn exec_get_config_opt_param(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute CONFIGOPTPARAM");
    config_param_common(st, true)
}

fn config_param_common(st: &mut VmState, opt: bool) -> VmResult<i32> {
    let idx = ok!(Rc::make_mut(&mut st.stack).pop_int());
    let config = ok!(get_param(st, 9));
    let dict = config.as_cell();

    let mut b = CellBuilder::new();
    store_int_to_builder(&idx, 32, true, &mut b)?;
    let key = b.build()?;

    let value = dict::dict_get_owned(dict, 32, key.as_slice()?)?;
    let cell = match value {
        Some(parts) => Some(OwnedCellSlice::from(parts).apply()?.get_reference_cloned(0)?),
        None => None,
    };

    let stack = Rc::make_mut(&mut st.stack);
    if opt {
        match cell {
            Some(cell) => ok!(stack.push(cell)),
            None => ok!(stack.push_null()),
        }
    } else {
        match cell {
            Some(cell) => {
                ok!(stack.push(cell));
                ok!(stack.push_bool(true));
            }
            None => ok!(stack.push_bool(false)),
        }
    }
    Ok(0)
}

// === Global variables, the c7 tuple entries past the parameter tuple ===

fn exec_get_global_var(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute GETGLOBVAR");
    let k = ok!(Rc::make_mut(&mut st.stack).pop_smallint_range(0, 254)) as usize;
    push_global(st, k)
}

fn exec_get_global(st: &mut VmState, args: u32) -> VmResult<i32> {
    let k = (args & 0x1f) as usize;
    vm_log!(st, "execute GETGLOB {k}");
    push_global(st, k)
}

fn push_global(st: &mut VmState, k: usize) -> VmResult<i32> {
    let value = match &st.cr.c7 {
        Some(c7) => c7.get(k).cloned(),
        None => None,
    };
    let stack = Rc::make_mut(&mut st.stack);
    match value {
        Some(value) => ok!(stack.push_raw(value)),
        None => ok!(stack.push_null()),
    }
    Ok(0)
}

fn exec_set_global_var(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute SETGLOBVAR");
    let k = ok!(Rc::make_mut(&mut st.stack).pop_smallint_range(0, 254)) as usize;
    set_global(st, k)
}

fn exec_set_global(st: &mut VmState, args: u32) -> VmResult<i32> {
    let k = (args & 0x1f) as usize;
    vm_log!(st, "execute SETGLOB {k}");
    set_global(st, k)
}

fn set_global(st: &mut VmState, k: usize) -> VmResult<i32> {
    let value = ok!(Rc::make_mut(&mut st.stack).pop());
    let mut c7 = match &st.cr.c7 {
        Some(c7) => c7.as_ref().clone(),
        None => Vec::new(),
    };
    if c7.len() <= k {
        c7.resize(k + 1, Stack::make_null());
    }
    c7[k] = value;
    st.gas.try_consume_tuple_gas(c7.len() as u64)?;
    st.cr.c7 = Some(Rc::new(c7));
    Ok(0)
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use num_bigint::BigInt;
    use tonkit_types::cell::{CellBuilder, EmptyCellContext};
    use tonkit_types::dict;

    use crate::smc_info::SmcInfo;
    use crate::stack::{RcStackValue, StackValue};
    use crate::state::VmState;

    fn run_with_info(bytes: &[u8], info: &SmcInfo, stack: Vec<RcStackValue>) -> VmState {
        let mut b = CellBuilder::new();
        b.store_raw(bytes, bytes.len() as u16 * 8).unwrap();
        let mut vm = VmState::builder()
            .with_code(b.build().unwrap())
            .with_smc_info(info)
            .with_stack(stack)
            .build();
        vm.run();
        vm
    }

    #[test]
    fn now_reads_context_time() {
        let info = SmcInfo::default().with_now(1700000000);
        let vm = run_with_info(&[0xf8, 0x23], &info, vec![]);
        assert_eq!(
            vm.stack.items.last().unwrap().as_int(),
            Some(&BigInt::from(1700000000u32))
        );
    }

    #[test]
    fn configdict_pushes_root_and_key_length() {
        let mut b = CellBuilder::new();
        b.store_u8(0xaa).unwrap();
        let root = b.build().unwrap();
        let info = SmcInfo::default().with_config(Some(root.clone()));
        let vm = run_with_info(&[0xf8, 0x30], &info, vec![]);

        assert_eq!(
            vm.stack.items.last().unwrap().as_int(),
            Some(&BigInt::from(32))
        );
        let dict = vm.stack.items[vm.stack.items.len() - 2].as_cell().unwrap();
        assert_eq!(dict.repr_hash(), root.repr_hash());
    }

    #[test]
    fn configparam_resolves_entry() {
        let mut pb = CellBuilder::new();
        pb.store_u32(0xdeadbeef).unwrap();
        let param = pb.build().unwrap();

        let mut kb = CellBuilder::new();
        kb.store_u32(18).unwrap();
        let key = kb.build().unwrap();
        let mut vb = CellBuilder::new();
        vb.store_reference(param.clone()).unwrap();
        let value = vb.build().unwrap();
        let root = dict::dict_insert(
            None,
            32,
            key.as_slice().unwrap(),
            &value.as_slice().unwrap(),
            &mut EmptyCellContext,
        )
        .unwrap()
        .unwrap();

        let info = SmcInfo::default().with_config(Some(root));
        let vm = run_with_info(&[0xf8, 0x32], &info, vec![Rc::new(BigInt::from(18))]);
        assert_eq!(
            vm.stack.items.last().unwrap().as_int(),
            Some(&BigInt::from(-1))
        );
        let cell = vm.stack.items[vm.stack.items.len() - 2].as_cell().unwrap();
        assert_eq!(cell.repr_hash(), param.repr_hash());
    }

    #[test]
    fn configparam_misses_on_unknown_index() {
        let info = SmcInfo::default();
        let vm = run_with_info(&[0xf8, 0x32], &info, vec![Rc::new(BigInt::from(7))]);
        assert_eq!(
            vm.stack.items.last().unwrap().as_int(),
            Some(&BigInt::from(0))
        );
    }

    #[test]
    fn globals_round_trip() {
        // PUSHINT 5; SETGLOB 2; GETGLOB 2
        let mut b = CellBuilder::new();
        b.store_raw(&[0x75, 0xf8, 0x62, 0xf8, 0x42], 40).unwrap();
        let mut vm = VmState::builder().with_code(b.build().unwrap()).build();
        vm.run();
        assert_eq!(
            vm.stack.items.last().unwrap().as_int(),
            Some(&BigInt::from(5))
        );
    }
}
