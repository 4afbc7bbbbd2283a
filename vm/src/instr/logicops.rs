use std::rc::Rc;

use anyhow::Result;
use num_bigint::BigInt;
use num_traits::{One, Signed};

use crate::dispatch::Opcodes;
use crate::error::VmResult;
use crate::state::VmState;
use crate::util::bitsize;

pub fn register(t: &mut Opcodes) -> Result<()> {
    t.add_fixed(0xaa, 8, 8, Box::new(exec_lshift_const))?;
    t.add_fixed(0xab, 8, 8, Box::new(exec_rshift_const))?;
    t.add_simple(0xac, 8, exec_lshift)?;
    t.add_simple(0xad, 8, exec_rshift)?;
    t.add_simple(0xae, 8, exec_pow2)?;
    t.add_simple(0xb0, 8, exec_and)?;
    t.add_simple(0xb1, 8, exec_or)?;
    t.add_simple(0xb2, 8, exec_xor)?;
    t.add_simple(0xb3, 8, exec_not)?;
    t.add_fixed(0xb4, 8, 8, Box::new(exec_fits_const))?;
    t.add_fixed(0xb5, 8, 8, Box::new(exec_ufits_const))?;
    t.add_simple(0xb600, 16, exec_fits)?;
    t.add_simple(0xb601, 16, exec_ufits)?;
    t.add_simple(0xb602, 16, exec_bitsize)?;
    t.add_simple(0xb603, 16, exec_ubitsize)?;
    t.add_simple(0xb608, 16, exec_min)?;
    t.add_simple(0xb609, 16, exec_max)?;
    t.add_simple(0xb60a, 16, exec_minmax)?;
    t.add_simple(0xb60b, 16, exec_abs)?;
    Ok(())
}

use super::arithops::check_int257;

fn lshift(st: &mut VmState, shift: u16) -> VmResult<i32> {
    let stack = Rc::make_mut(&mut st.stack);
    let x = ok!(stack.pop_int());
    let res = x.as_ref() << shift;
    ok!(check_int257(&res));
    ok!(stack.push_int(res));
    Ok(0)
}

fn rshift(st: &mut VmState, shift: u16) -> VmResult<i32> {
    let stack = Rc::make_mut(&mut st.stack);
    let x = ok!(stack.pop_int());
    // BigInt shifts arithmetically, which is floor division by 2^shift
    ok!(stack.push_int(x.as_ref() >> shift));
    Ok(0)
}

fn exec_lshift_const(st: &mut VmState, args: u32) -> VmResult<i32> {
    let shift = (args & 0xff) as u16 + 1;
    vm_log!(st, "execute LSHIFT {shift}");
    lshift(st, shift)
}

fn exec_rshift_const(st: &mut VmState, args: u32) -> VmResult<i32> {
    let shift = (args & 0xff) as u16 + 1;
    vm_log!(st, "execute RSHIFT {shift}");
    rshift(st, shift)
}

fn exec_lshift(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute LSHIFT");
    let shift = ok!(Rc::make_mut(&mut st.stack).pop_smallint_range(0, 1023)) as u16;
    lshift(st, shift)
}

fn exec_rshift(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute RSHIFT");
    let shift = ok!(Rc::make_mut(&mut st.stack).pop_smallint_range(0, 1023)) as u16;
    rshift(st, shift)
}

fn exec_pow2(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute POW2");
    let stack = Rc::make_mut(&mut st.stack);
    let shift = ok!(stack.pop_smallint_range(0, 1023)) as u16;
    let res = BigInt::one() << shift;
    ok!(check_int257(&res));
    ok!(stack.push_int(res));
    Ok(0)
}

fn exec_and(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute AND");
    let stack = Rc::make_mut(&mut st.stack);
    let y = ok!(stack.pop_int());
    let x = ok!(stack.pop_int());
    ok!(stack.push_int(x.as_ref() & y.as_ref()));
    Ok(0)
}

fn exec_or(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute OR");
    let stack = Rc::make_mut(&mut st.stack);
    let y = ok!(stack.pop_int());
    let x = ok!(stack.pop_int());
    ok!(stack.push_int(x.as_ref() | y.as_ref()));
    Ok(0)
}

fn exec_xor(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute XOR");
    let stack = Rc::make_mut(&mut st.stack);
    let y = ok!(stack.pop_int());
    let x = ok!(stack.pop_int());
    ok!(stack.push_int(x.as_ref() ^ y.as_ref()));
    Ok(0)
}

fn exec_not(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute NOT");
    let stack = Rc::make_mut(&mut st.stack);
    let x = ok!(stack.pop_int());
    ok!(stack.push_int(!x.as_ref()));
    Ok(0)
}

fn fits_impl(st: &mut VmState, bits: u16, signed: bool) -> VmResult<i32> {
    let stack = Rc::make_mut(&mut st.stack);
    let x = ok!(stack.pop_int());
    if !signed {
        vm_ensure!(!x.is_negative(), IntegerOverflow);
    }
    vm_ensure!(bitsize(&x, signed) <= bits, IntegerOverflow);
    ok!(stack.push_raw(x));
    Ok(0)
}

fn exec_fits_const(st: &mut VmState, args: u32) -> VmResult<i32> {
    let bits = (args & 0xff) as u16 + 1;
    vm_log!(st, "execute FITS {bits}");
    fits_impl(st, bits, true)
}

fn exec_ufits_const(st: &mut VmState, args: u32) -> VmResult<i32> {
    let bits = (args & 0xff) as u16 + 1;
    vm_log!(st, "execute UFITS {bits}");
    fits_impl(st, bits, false)
}

fn exec_fits(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute FITSX");
    let bits = ok!(Rc::make_mut(&mut st.stack).pop_smallint_range(0, 1023)) as u16;
    fits_impl(st, bits, true)
}

fn exec_ufits(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute UFITSX");
    let bits = ok!(Rc::make_mut(&mut st.stack).pop_smallint_range(0, 1023)) as u16;
    fits_impl(st, bits, false)
}

fn exec_bitsize(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute BITSIZE");
    let stack = Rc::make_mut(&mut st.stack);
    let x = ok!(stack.pop_int());
    ok!(stack.push_int(bitsize(&x, true)));
    Ok(0)
}

fn exec_ubitsize(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute UBITSIZE");
    let stack = Rc::make_mut(&mut st.stack);
    let x = ok!(stack.pop_int());
    vm_ensure!(
        !x.is_negative(),
        IntegerOutOfRange {
            min: 0,
            max: i64::MAX,
            actual: x.to_string(),
        }
    );
    ok!(stack.push_int(bitsize(&x, false)));
    Ok(0)
}

fn exec_min(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute MIN");
    let stack = Rc::make_mut(&mut st.stack);
    let y = ok!(stack.pop_int());
    let x = ok!(stack.pop_int());
    ok!(stack.push_raw(if x <= y { x } else { y }));
    Ok(0)
}

fn exec_max(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute MAX");
    let stack = Rc::make_mut(&mut st.stack);
    let y = ok!(stack.pop_int());
    let x = ok!(stack.pop_int());
    ok!(stack.push_raw(if x >= y { x } else { y }));
    Ok(0)
}

fn exec_minmax(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute MINMAX");
    let stack = Rc::make_mut(&mut st.stack);
    let y = ok!(stack.pop_int());
    let x = ok!(stack.pop_int());
    let (min, max) = if x <= y { (x, y) } else { (y, x) };
    ok!(stack.push_raw(min));
    ok!(stack.push_raw(max));
    Ok(0)
}

fn exec_abs(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute ABS");
    let stack = Rc::make_mut(&mut st.stack);
    let x = ok!(stack.pop_int());
    if x.is_negative() {
        let res = -x.as_ref();
        ok!(check_int257(&res));
        ok!(stack.push_int(res));
    } else {
        ok!(stack.push_raw(x));
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use num_bigint::BigInt;
    use tonkit_types::cell::CellBuilder;

    use crate::error::VmException;
    use crate::stack::StackValue;
    use crate::state::VmState;

    fn run(bytes: &[u8]) -> VmState {
        let mut b = CellBuilder::new();
        b.store_raw(bytes, bytes.len() as u16 * 8).unwrap();
        let mut vm = VmState::builder().with_code(b.build().unwrap()).build();
        vm.run();
        vm
    }

    fn top_int(vm: &VmState) -> BigInt {
        vm.stack.items.last().unwrap().as_int().unwrap().clone()
    }

    #[test]
    fn shifts() {
        // PUSHINT 3; LSHIFT 4
        let vm = run(&[0x73, 0xaa, 0x03]);
        assert_eq!(top_int(&vm), BigInt::from(48));

        // PUSHINT -7; RSHIFT 1 floors toward minus infinity
        let vm = run(&[0x80, 0xf9, 0xab, 0x00]);
        assert_eq!(top_int(&vm), BigInt::from(-4));
    }

    #[test]
    fn bitwise_not() {
        // PUSHINT 0; NOT
        let vm = run(&[0x70, 0xb3]);
        assert_eq!(top_int(&vm), BigInt::from(-1));
    }

    #[test]
    fn ufits_rejects_negative() {
        // PUSHINT -1; UFITS 8
        let mut b = CellBuilder::new();
        b.store_raw(&[0x7f, 0xb5, 0x07], 24).unwrap();
        let mut vm = VmState::builder().with_code(b.build().unwrap()).build();
        assert_eq!(vm.run(), VmException::IntOverflow.as_exit_code());
    }

    #[test]
    fn minmax_orders_pair() {
        // PUSHINT 9; PUSHINT 4; MINMAX
        let vm = run(&[0x79, 0x74, 0xb6, 0x0a]);
        assert_eq!(vm.stack.items[0].as_int(), Some(&BigInt::from(4)));
        assert_eq!(vm.stack.items[1].as_int(), Some(&BigInt::from(9)));
    }
}
