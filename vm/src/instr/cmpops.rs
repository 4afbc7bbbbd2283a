use std::cmp::Ordering;
use std::rc::Rc;

use anyhow::Result;
use num_bigint::BigInt;

use crate::dispatch::Opcodes;
use crate::error::VmResult;
use crate::state::VmState;

pub fn register(t: &mut Opcodes) -> Result<()> {
    t.add_simple(0xb8, 8, exec_sgn)?;
    t.add_simple(0xb9, 8, exec_less)?;
    t.add_simple(0xba, 8, exec_equal)?;
    t.add_simple(0xbb, 8, exec_leq)?;
    t.add_simple(0xbc, 8, exec_greater)?;
    t.add_simple(0xbd, 8, exec_neq)?;
    t.add_simple(0xbe, 8, exec_geq)?;
    t.add_simple(0xbf, 8, exec_cmp)?;
    t.add_fixed(0xc0, 8, 8, Box::new(exec_eqint))?;
    t.add_fixed(0xc1, 8, 8, Box::new(exec_lessint))?;
    t.add_fixed(0xc2, 8, 8, Box::new(exec_gtint))?;
    t.add_fixed(0xc3, 8, 8, Box::new(exec_neqint))?;
    t.add_simple(0xc4, 8, exec_is_nan)?;
    t.add_simple(0xc5, 8, exec_chk_nan)?;
    t.add_simple(0xc700, 16, exec_sempty)?;
    t.add_simple(0xc701, 16, exec_sdempty)?;
    t.add_simple(0xc702, 16, exec_srempty)?;
    t.add_simple(0xc705, 16, exec_sdeq)?;
    Ok(())
}

fn cmp2(st: &mut VmState, name: &str, f: fn(Ordering) -> bool) -> VmResult<i32> {
    vm_log!(st, "execute {name}");
    let stack = Rc::make_mut(&mut st.stack);
    let y = ok!(stack.pop_int());
    let x = ok!(stack.pop_int());
    ok!(stack.push_bool(f(x.cmp(&y))));
    Ok(0)
}

fn cmp_int(st: &mut VmState, name: &str, args: u32, f: fn(Ordering) -> bool) -> VmResult<i32> {
    let y = args as u8 as i8;
    vm_log!(st, "execute {name} {y}");
    let stack = Rc::make_mut(&mut st.stack);
    let x = ok!(stack.pop_int());
    ok!(stack.push_bool(f(x.as_ref().cmp(&BigInt::from(y)))));
    Ok(0)
}

fn exec_sgn(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute SGN");
    let stack = Rc::make_mut(&mut st.stack);
    let x = ok!(stack.pop_int());
    let sign = match x.sign() {
        num_bigint::Sign::Minus => -1,
        num_bigint::Sign::NoSign => 0,
        num_bigint::Sign::Plus => 1,
    };
    ok!(stack.push_int(sign));
    Ok(0)
}

fn exec_less(st: &mut VmState) -> VmResult<i32> {
    cmp2(st, "LESS", Ordering::is_lt)
}

fn exec_equal(st: &mut VmState) -> VmResult<i32> {
    cmp2(st, "EQUAL", Ordering::is_eq)
}

fn exec_leq(st: &mut VmState) -> VmResult<i32> {
    cmp2(st, "LEQ", Ordering::is_le)
}

fn exec_greater(st: &mut VmState) -> VmResult<i32> {
    cmp2(st, "GREATER", Ordering::is_gt)
}

fn exec_neq(st: &mut VmState) -> VmResult<i32> {
    cmp2(st, "NEQ", Ordering::is_ne)
}

fn exec_geq(st: &mut VmState) -> VmResult<i32> {
    cmp2(st, "GEQ", Ordering::is_ge)
}

fn exec_cmp(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute CMP");
    let stack = Rc::make_mut(&mut st.stack);
    let y = ok!(stack.pop_int());
    let x = ok!(stack.pop_int());
    let res = match x.cmp(&y) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    };
    ok!(stack.push_int(res));
    Ok(0)
}

fn exec_eqint(st: &mut VmState, args: u32) -> VmResult<i32> {
    cmp_int(st, "EQINT", args, Ordering::is_eq)
}

fn exec_lessint(st: &mut VmState, args: u32) -> VmResult<i32> {
    cmp_int(st, "LESSINT", args, Ordering::is_lt)
}

fn exec_gtint(st: &mut VmState, args: u32) -> VmResult<i32> {
    cmp_int(st, "GTINT", args, Ordering::is_gt)
}

fn exec_neqint(st: &mut VmState, args: u32) -> VmResult<i32> {
    cmp_int(st, "NEQINT", args, Ordering::is_ne)
}

fn exec_is_nan(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute ISNAN");
    let stack = Rc::make_mut(&mut st.stack);
    let is_nan = ok!(stack.pop_int_or_nan()).is_none();
    ok!(stack.push_bool(is_nan));
    Ok(0)
}

fn exec_chk_nan(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute CHKNAN");
    let stack = Rc::make_mut(&mut st.stack);
    match ok!(stack.pop_int_or_nan()) {
        Some(x) => ok!(stack.push_raw(x)),
        None => vm_bail!(IntegerOverflow),
    }
    Ok(0)
}

fn exec_sempty(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute SEMPTY");
    let stack = Rc::make_mut(&mut st.stack);
    let cs = ok!(stack.pop_slice());
    let empty = cs.range().is_empty();
    ok!(stack.push_bool(empty));
    Ok(0)
}

fn exec_sdempty(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute SDEMPTY");
    let stack = Rc::make_mut(&mut st.stack);
    let cs = ok!(stack.pop_slice());
    let empty = cs.range().size_bits() == 0;
    ok!(stack.push_bool(empty));
    Ok(0)
}

fn exec_srempty(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute SREMPTY");
    let stack = Rc::make_mut(&mut st.stack);
    let cs = ok!(stack.pop_slice());
    let empty = cs.range().size_refs() == 0;
    ok!(stack.push_bool(empty));
    Ok(0)
}

fn exec_sdeq(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute SDEQ");
    let stack = Rc::make_mut(&mut st.stack);
    let y = ok!(stack.pop_slice());
    let x = ok!(stack.pop_slice());
    let equal = x.apply()?.contents_eq(&y.apply()?)?;
    ok!(stack.push_bool(equal));
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
        assert_eq!(vm.run(), 0);
        vm
    }

    fn top_int(vm: &VmState) -> BigInt {
        vm.stack.items.last().unwrap().as_int().unwrap().clone()
    }

    #[test]
    fn comparisons_push_minus_one_for_true() {
        // PUSHINT 2; PUSHINT 3; LESS
        let vm = run(&[0x72, 0x73, 0xb9]);
        assert_eq!(top_int(&vm), BigInt::from(-1));

        // PUSHINT 2; PUSHINT 3; GEQ
        let vm = run(&[0x72, 0x73, 0xbe]);
        assert_eq!(top_int(&vm), BigInt::from(0));
    }

    #[test]
    fn cmp_pushes_sign() {
        // PUSHINT 5; PUSHINT 3; CMP
        let vm = run(&[0x75, 0x73, 0xbf]);
        assert_eq!(top_int(&vm), BigInt::from(1));
    }

    #[test]
    fn isnan_on_nan() {
        // PUSHNAN; ISNAN
        let mut b = CellBuilder::new();
        b.store_u16(0x83ff).unwrap();
        b.store_u8(0xc4).unwrap();
        let mut vm = VmState::builder().with_code(b.build().unwrap()).build();
        assert_eq!(vm.run(), 0);
        assert_eq!(top_int(&vm), BigInt::from(-1));
    }

    #[test]
    fn eqint_against_immediate() {
        // PUSHINT -3; EQINT -3
        let vm = run(&[0x80, 0xfd, 0xc0, 0xfd]);
        assert_eq!(top_int(&vm), BigInt::from(-1));
    }
}
