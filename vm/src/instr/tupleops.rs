use std::rc::Rc;

use anyhow::Result;

use crate::dispatch::Opcodes;
use crate::error::VmResult;
use crate::stack::{Stack, StackValueType, Tuple};
use crate::state::VmState;

pub fn register(t: &mut Opcodes) -> Result<()> {
    t.add_simple(0x6d, 8, exec_push_null)?;
    t.add_simple(0x6e, 8, exec_is_null)?;
    t.add_fixed(0x6f0, 12, 4, Box::new(exec_mktuple))?;
    t.add_fixed(0x6f1, 12, 4, Box::new(exec_index))?;
    t.add_fixed(0x6f2, 12, 4, Box::new(exec_untuple))?;
    t.add_fixed(0x6f3, 12, 4, Box::new(exec_unpackfirst))?;
    t.add_fixed(0x6f4, 12, 4, Box::new(exec_setindex))?;
    t.add_fixed(0x6f5, 12, 4, Box::new(exec_index_quiet))?;
    t.add_fixed(0x6f6, 12, 4, Box::new(exec_setindex_quiet))?;
    t.add_simple(0x6f88, 16, exec_tuple_len)?;
    t.add_simple(0x6f8a, 16, exec_is_tuple)?;
    t.add_simple(0x6f8b, 16, exec_tuple_last)?;
    t.add_simple(0x6f8c, 16, exec_tuple_push)?;
    t.add_simple(0x6f8d, 16, exec_tuple_pop)?;
    t.add_fixed_range(0x6fa0, 0x6fa8, 16, 3, Box::new(exec_null_swap_if))?;
    t.add_fixed(0x6fb, 12, 4, Box::new(exec_index2))?;
    Ok(())
}

fn exec_push_null(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute PUSHNULL");
    ok!(Rc::make_mut(&mut st.stack).push_null());
    Ok(0)
}

fn exec_is_null(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute ISNULL");
    let stack = Rc::make_mut(&mut st.stack);
    let is_null = ok!(stack.pop()).ty() == StackValueType::Null;
    ok!(stack.push_bool(is_null));
    Ok(0)
}

fn exec_mktuple(st: &mut VmState, args: u32) -> VmResult<i32> {
    let n = (args & 0xf) as usize;
    vm_log!(st, "execute TUPLE {n}");
    let stack = Rc::make_mut(&mut st.stack);
    let depth = stack.depth();
    vm_ensure!(n <= depth, StackUnderflow(n));
    let tuple: Tuple = stack.items.split_off(depth - n);
    st.gas.try_consume_tuple_gas(n as u64)?;
    ok!(Rc::make_mut(&mut st.stack).push(tuple));
    Ok(0)
}

fn exec_index(st: &mut VmState, args: u32) -> VmResult<i32> {
    let n = (args & 0xf) as usize;
    vm_log!(st, "execute INDEX {n}");
    let stack = Rc::make_mut(&mut st.stack);
    let tuple = ok!(stack.pop_tuple());
    vm_ensure!(
        n < tuple.len(),
        IntegerOutOfRange {
            min: 0,
            max: tuple.len() as _,
            actual: n.to_string(),
        }
    );
    ok!(stack.push_raw(tuple[n].clone()));
    Ok(0)
}

fn exec_untuple(st: &mut VmState, args: u32) -> VmResult<i32> {
    let n = (args & 0xf) as usize;
    vm_log!(st, "execute UNTUPLE {n}");
    let stack = Rc::make_mut(&mut st.stack);
    let tuple = ok!(stack.pop_tuple_range(n as u32, n as u32));
    for item in tuple.iter() {
        ok!(stack.push_raw(item.clone()));
    }
    st.gas.try_consume_tuple_gas(n as u64)?;
    Ok(0)
}

fn exec_unpackfirst(st: &mut VmState, args: u32) -> VmResult<i32> {
    let n = (args & 0xf) as usize;
    vm_log!(st, "execute UNPACKFIRST {n}");
    let stack = Rc::make_mut(&mut st.stack);
    let tuple = ok!(stack.pop_tuple_range(n as u32, 255));
    for item in tuple.iter().take(n) {
        ok!(stack.push_raw(item.clone()));
    }
    st.gas.try_consume_tuple_gas(n as u64)?;
    Ok(0)
}

fn exec_setindex(st: &mut VmState, args: u32) -> VmResult<i32> {
    let n = (args & 0xf) as usize;
    vm_log!(st, "execute SETINDEX {n}");
    let stack = Rc::make_mut(&mut st.stack);
    let value = ok!(stack.pop());
    let mut tuple = ok!(stack.pop_tuple());
    vm_ensure!(
        n < tuple.len(),
        IntegerOutOfRange {
            min: 0,
            max: tuple.len() as _,
            actual: n.to_string(),
        }
    );
    Rc::make_mut(&mut tuple)[n] = value;
    st.gas.try_consume_tuple_gas(tuple.len() as u64)?;
    ok!(stack.push_raw(tuple));
    Ok(0)
}

fn exec_index_quiet(st: &mut VmState, args: u32) -> VmResult<i32> {
    let n = (args & 0xf) as usize;
    vm_log!(st, "execute INDEXQ {n}");
    let stack = Rc::make_mut(&mut st.stack);
    let item = ok!(stack.pop());
    let actual = item.ty();
    if actual == StackValueType::Null {
        ok!(stack.push_null());
        return Ok(0);
    }
    let Some(tuple) = item.into_tuple() else {
        vm_bail!(InvalidType {
            expected: StackValueType::Tuple,
            actual,
        });
    };
    match tuple.get(n) {
        Some(value) => ok!(stack.push_raw(value.clone())),
        None => ok!(stack.push_null()),
    }
    Ok(0)
}

fn exec_setindex_quiet(st: &mut VmState, args: u32) -> VmResult<i32> {
    let n = (args & 0xf) as usize;
    vm_log!(st, "execute SETINDEXQ {n}");
    let stack = Rc::make_mut(&mut st.stack);
    let value = ok!(stack.pop());
    let item = ok!(stack.pop());
    let actual = item.ty();
    let mut tuple = if actual == StackValueType::Null {
        Rc::new(Tuple::new())
    } else {
        match item.into_tuple() {
            Some(tuple) => tuple,
            None => vm_bail!(InvalidType {
                expected: StackValueType::Tuple,
                actual,
            }),
        }
    };

    if n >= tuple.len() && value.ty() == StackValueType::Null {
        // nothing to do, absent entries read back as null
        ok!(stack.push_raw(tuple));
        return Ok(0);
    }

    let items = Rc::make_mut(&mut tuple);
    if n >= items.len() {
        items.resize(n + 1, Stack::make_null());
    }
    items[n] = value;
    st.gas.try_consume_tuple_gas(tuple.len() as u64)?;
    ok!(stack.push_raw(tuple));
    Ok(0)
}

fn exec_tuple_len(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute TLEN");
    let stack = Rc::make_mut(&mut st.stack);
    let tuple = ok!(stack.pop_tuple());
    ok!(stack.push_int(tuple.len()));
    Ok(0)
}

fn exec_is_tuple(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute ISTUPLE");
    let stack = Rc::make_mut(&mut st.stack);
    let is_tuple = ok!(stack.pop()).ty() == StackValueType::Tuple;
    ok!(stack.push_bool(is_tuple));
    Ok(0)
}

fn exec_tuple_last(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute LAST");
    let stack = Rc::make_mut(&mut st.stack);
    let tuple = ok!(stack.pop_tuple_range(1, 255));
    let value = tuple[tuple.len() - 1].clone();
    ok!(stack.push_raw(value));
    Ok(0)
}

fn exec_tuple_push(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute TPUSH");
    let stack = Rc::make_mut(&mut st.stack);
    let value = ok!(stack.pop());
    let mut tuple = ok!(stack.pop_tuple_range(0, 254));
    Rc::make_mut(&mut tuple).push(value);
    st.gas.try_consume_tuple_gas(tuple.len() as u64)?;
    ok!(stack.push_raw(tuple));
    Ok(0)
}

fn exec_tuple_pop(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute TPOP");
    let stack = Rc::make_mut(&mut st.stack);
    let mut tuple = ok!(stack.pop_tuple_range(1, 255));
    let value = match Rc::make_mut(&mut tuple).pop() {
        Some(value) => value,
        None => vm_bail!(StackUnderflow(0)),
    };
    st.gas.try_consume_tuple_gas(tuple.len() as u64)?;
    ok!(stack.push_raw(tuple));
    ok!(stack.push_raw(value));
    Ok(0)
}

fn exec_null_swap_if(st: &mut VmState, args: u32) -> VmResult<i32> {
    let invert = args & 0b001 != 0;
    let rot = args & 0b010 != 0;
    let double = args & 0b100 != 0;
    vm_log!(
        st,
        "execute NULL{}IF{}{}",
        if rot { "ROTR" } else { "SWAP" },
        if invert { "NOT" } else { "" },
        if double { "2" } else { "" },
    );

    let stack = Rc::make_mut(&mut st.stack);
    let x = ok!(stack.pop_int());
    let cond = x.sign() != num_bigint::Sign::NoSign;
    if cond != invert {
        let held = if rot { Some(ok!(stack.pop())) } else { None };
        ok!(stack.push_null());
        if double {
            ok!(stack.push_null());
        }
        if let Some(held) = held {
            ok!(stack.push_raw(held));
        }
    }
    ok!(stack.push_raw(x));
    Ok(0)
}

fn exec_index2(st: &mut VmState, args: u32) -> VmResult<i32> {
    let i = ((args >> 2) & 0b11) as usize;
    let j = (args & 0b11) as usize;
    vm_log!(st, "execute INDEX2 {i},{j}");
    let stack = Rc::make_mut(&mut st.stack);
    let tuple = ok!(stack.pop_tuple());
    let inner = match tuple.get(i).and_then(|v| v.as_tuple()) {
        Some(inner) => inner,
        None => vm_bail!(InvalidType {
            expected: StackValueType::Tuple,
            actual: StackValueType::Null,
        }),
    };
    vm_ensure!(
        j < inner.len(),
        IntegerOutOfRange {
            min: 0,
            max: inner.len() as _,
            actual: j.to_string(),
        }
    );
    ok!(stack.push_raw(inner[j].clone()));
    Ok(0)
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use num_bigint::BigInt;
    use tonkit_types::cell::CellBuilder;

    use crate::stack::{RcStackValue, StackValue, StackValueType};
    use crate::state::VmState;

    fn run(bytes: &[u8], stack: Vec<RcStackValue>) -> VmState {
        let mut b = CellBuilder::new();
        b.store_raw(bytes, bytes.len() as u16 * 8).unwrap();
        let mut vm = VmState::builder()
            .with_code(b.build().unwrap())
            .with_stack(stack)
            .build();
        assert_eq!(vm.run(), 0);
        vm
    }

    #[test]
    fn tuple_and_index() {
        // TUPLE 2; INDEX 1
        let stack = vec![
            Rc::new(BigInt::from(10)) as RcStackValue,
            Rc::new(BigInt::from(20)) as RcStackValue,
        ];
        let vm = run(&[0x6f, 0x02, 0x6f, 0x11], stack);
        assert_eq!(vm.stack.items.len(), 1);
        assert_eq!(vm.stack.items[0].as_int(), Some(&BigInt::from(20)));
    }

    #[test]
    fn setindexq_extends_with_nulls() {
        // PUSHNULL; PUSHINT 7; SETINDEXQ 2
        let vm = run(&[0x6d, 0x77, 0x6f, 0x62], Vec::new());
        let tuple = vm.stack.items[0].as_tuple().unwrap();
        assert_eq!(tuple.len(), 3);
        assert_eq!(tuple[0].ty(), StackValueType::Null);
        assert_eq!(tuple[2].as_int(), Some(&BigInt::from(7)));
    }

    #[test]
    fn nullswapifnot_inserts_null() {
        // PUSHINT 0; NULLSWAPIFNOT
        let vm = run(&[0x70, 0x6f, 0xa1], Vec::new());
        assert_eq!(vm.stack.items.len(), 2);
        assert_eq!(vm.stack.items[0].ty(), StackValueType::Null);
        assert_eq!(vm.stack.items[1].as_int(), Some(&BigInt::from(0)));
    }
}
