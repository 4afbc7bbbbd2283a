use std::rc::Rc;

use anyhow::Result;
use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Zero};

use crate::dispatch::Opcodes;
use crate::error::VmResult;
use crate::state::VmState;
use crate::util::{bitsize, load_int_from_slice};

pub fn register(t: &mut Opcodes) -> Result<()> {
    t.add_fixed_range(0x70, 0x80, 8, 4, Box::new(exec_push_tinyint))?;
    t.add_fixed(0x80, 8, 8, Box::new(exec_push_int8))?;
    t.add_fixed(0x81, 8, 16, Box::new(exec_push_int16))?;
    t.add_ext(0x82, 8, 5, Box::new(exec_push_int_long))?;
    t.add_fixed_range(0x8300, 0x83ff, 16, 8, Box::new(exec_push_pow2))?;
    t.add_simple(0x83ff, 16, exec_push_nan)?;
    t.add_fixed(0x84, 8, 8, Box::new(exec_push_pow2dec))?;
    t.add_fixed(0x85, 8, 8, Box::new(exec_push_negpow2))?;
    t.add_simple(0xa0, 8, exec_add)?;
    t.add_simple(0xa1, 8, exec_sub)?;
    t.add_simple(0xa2, 8, exec_subr)?;
    t.add_simple(0xa3, 8, exec_negate)?;
    t.add_simple(0xa4, 8, exec_inc)?;
    t.add_simple(0xa5, 8, exec_dec)?;
    t.add_fixed(0xa6, 8, 8, Box::new(exec_addint))?;
    t.add_fixed(0xa7, 8, 8, Box::new(exec_mulint))?;
    t.add_simple(0xa8, 8, exec_mul)?;
    t.add_fixed(0xa90, 12, 4, Box::new(exec_div))?;
    t.add_fixed(0xa98, 12, 4, Box::new(exec_muldiv))?;
    Ok(())
}

/// Checks that the result still fits into 257 bits.
pub fn check_int257(int: &BigInt) -> VmResult<()> {
    vm_ensure!(bitsize(int, true) <= 257, IntegerOverflow);
    Ok(())
}

fn exec_push_tinyint(st: &mut VmState, args: u32) -> VmResult<i32> {
    let mut x = (args & 0xf) as i32;
    if x > 10 {
        x -= 16;
    }
    vm_log!(st, "execute PUSHINT {x}");
    ok!(Rc::make_mut(&mut st.stack).push_int(x));
    Ok(0)
}

fn exec_push_int8(st: &mut VmState, args: u32) -> VmResult<i32> {
    let x = args as u8 as i8;
    vm_log!(st, "execute PUSHINT {x}");
    ok!(Rc::make_mut(&mut st.stack).push_int(x));
    Ok(0)
}

fn exec_push_int16(st: &mut VmState, args: u32) -> VmResult<i32> {
    let x = args as u16 as i16;
    vm_log!(st, "execute PUSHINT {x}");
    ok!(Rc::make_mut(&mut st.stack).push_int(x));
    Ok(0)
}

fn exec_push_int_long(st: &mut VmState, args: u32, _: u16) -> VmResult<i32> {
    let value_bits = 19 + (args & 0x1f) as u16 * 8;
    st.gas.try_consume(value_bits as u64)?;

    let mut code = st.code.apply()?;
    let x = load_int_from_slice(&mut code, value_bits, true)?;
    let range = code.range();
    st.code.set_range(range);

    vm_log!(st, "execute PUSHINT {x}");
    ok!(Rc::make_mut(&mut st.stack).push_int(x));
    Ok(0)
}

fn exec_push_pow2(st: &mut VmState, args: u32) -> VmResult<i32> {
    let x = (args & 0xff) as u16 + 1;
    vm_log!(st, "execute PUSHPOW2 {x}");
    ok!(Rc::make_mut(&mut st.stack).push_int(BigInt::one() << x));
    Ok(0)
}

fn exec_push_nan(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute PUSHNAN");
    ok!(Rc::make_mut(&mut st.stack).push_nan());
    Ok(0)
}

fn exec_push_pow2dec(st: &mut VmState, args: u32) -> VmResult<i32> {
    let x = (args & 0xff) as u16 + 1;
    vm_log!(st, "execute PUSHPOW2DEC {x}");
    ok!(Rc::make_mut(&mut st.stack).push_int((BigInt::one() << x) - 1));
    Ok(0)
}

fn exec_push_negpow2(st: &mut VmState, args: u32) -> VmResult<i32> {
    let x = (args & 0xff) as u16 + 1;
    vm_log!(st, "execute PUSHNEGPOW2 {x}");
    ok!(Rc::make_mut(&mut st.stack).push_int(-(BigInt::one() << x)));
    Ok(0)
}

fn exec_add(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute ADD");
    let stack = Rc::make_mut(&mut st.stack);
    let y = ok!(stack.pop_int());
    let x = ok!(stack.pop_int());
    let res = x.as_ref() + y.as_ref();
    ok!(check_int257(&res));
    ok!(stack.push_int(res));
    Ok(0)
}

fn exec_sub(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute SUB");
    let stack = Rc::make_mut(&mut st.stack);
    let y = ok!(stack.pop_int());
    let x = ok!(stack.pop_int());
    let res = x.as_ref() - y.as_ref();
    ok!(check_int257(&res));
    ok!(stack.push_int(res));
    Ok(0)
}

fn exec_subr(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute SUBR");
    let stack = Rc::make_mut(&mut st.stack);
    let y = ok!(stack.pop_int());
    let x = ok!(stack.pop_int());
    let res = y.as_ref() - x.as_ref();
    ok!(check_int257(&res));
    ok!(stack.push_int(res));
    Ok(0)
}

fn exec_negate(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute NEGATE");
    let stack = Rc::make_mut(&mut st.stack);
    let x = ok!(stack.pop_int());
    let res = -x.as_ref();
    ok!(check_int257(&res));
    ok!(stack.push_int(res));
    Ok(0)
}

fn exec_inc(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute INC");
    let stack = Rc::make_mut(&mut st.stack);
    let x = ok!(stack.pop_int());
    let res = x.as_ref() + 1;
    ok!(check_int257(&res));
    ok!(stack.push_int(res));
    Ok(0)
}

fn exec_dec(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute DEC");
    let stack = Rc::make_mut(&mut st.stack);
    let x = ok!(stack.pop_int());
    let res = x.as_ref() - 1;
    ok!(check_int257(&res));
    ok!(stack.push_int(res));
    Ok(0)
}

fn exec_addint(st: &mut VmState, args: u32) -> VmResult<i32> {
    let y = args as u8 as i8;
    vm_log!(st, "execute ADDINT {y}");
    let stack = Rc::make_mut(&mut st.stack);
    let x = ok!(stack.pop_int());
    let res = x.as_ref() + y;
    ok!(check_int257(&res));
    ok!(stack.push_int(res));
    Ok(0)
}

fn exec_mulint(st: &mut VmState, args: u32) -> VmResult<i32> {
    let y = args as u8 as i8;
    vm_log!(st, "execute MULINT {y}");
    let stack = Rc::make_mut(&mut st.stack);
    let x = ok!(stack.pop_int());
    let res = x.as_ref() * y;
    ok!(check_int257(&res));
    ok!(stack.push_int(res));
    Ok(0)
}

fn exec_mul(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute MUL");
    let stack = Rc::make_mut(&mut st.stack);
    let y = ok!(stack.pop_int());
    let x = ok!(stack.pop_int());
    let res = x.as_ref() * y.as_ref();
    ok!(check_int257(&res));
    ok!(stack.push_int(res));
    Ok(0)
}

/// Rounding mode of a division, encoded in the low two opcode bits.
#[derive(Debug, Clone, Copy)]
enum Round {
    Floor,
    Nearest,
    Ceil,
}

impl Round {
    fn from_args(args: u32) -> VmResult<Self> {
        Ok(match args & 0b11 {
            0 => Self::Floor,
            1 => Self::Nearest,
            2 => Self::Ceil,
            _ => vm_bail!(InvalidOpcode),
        })
    }

    fn display(self) -> &'static str {
        match self {
            Self::Floor => "",
            Self::Nearest => "R",
            Self::Ceil => "C",
        }
    }
}

fn div_rem(x: &BigInt, y: &BigInt, round: Round) -> VmResult<(BigInt, BigInt)> {
    vm_ensure!(!y.is_zero(), IntegerOverflow);
    let q = match round {
        Round::Floor => x.div_floor(y),
        // ties round toward plus infinity
        Round::Nearest => (x * 2i32 + y).div_floor(&(y * 2i32)),
        Round::Ceil => -(-x).div_floor(y),
    };
    let r = x - &q * y;
    Ok((q, r))
}

fn exec_div(st: &mut VmState, args: u32) -> VmResult<i32> {
    let mode = (args >> 2) & 0b11;
    vm_ensure!(mode != 0, InvalidOpcode);
    let round = ok!(Round::from_args(args));
    vm_log!(
        st,
        "execute {}{}",
        match mode {
            1 => "DIV",
            2 => "MOD",
            _ => "DIVMOD",
        },
        round.display(),
    );

    let stack = Rc::make_mut(&mut st.stack);
    let y = ok!(stack.pop_int());
    let x = ok!(stack.pop_int());
    let (q, r) = ok!(div_rem(&x, &y, round));
    if mode & 0b01 != 0 {
        ok!(check_int257(&q));
        ok!(stack.push_int(q));
    }
    if mode & 0b10 != 0 {
        ok!(stack.push_int(r));
    }
    Ok(0)
}

fn exec_muldiv(st: &mut VmState, args: u32) -> VmResult<i32> {
    let mode = (args >> 2) & 0b11;
    vm_ensure!(mode != 0, InvalidOpcode);
    let round = ok!(Round::from_args(args));
    vm_log!(
        st,
        "execute MUL{}{}",
        match mode {
            1 => "DIV",
            2 => "MOD",
            _ => "DIVMOD",
        },
        round.display(),
    );

    let stack = Rc::make_mut(&mut st.stack);
    let z = ok!(stack.pop_int());
    let y = ok!(stack.pop_int());
    let x = ok!(stack.pop_int());
    let p = x.as_ref() * y.as_ref();
    let (q, r) = ok!(div_rem(&p, &z, round));
    if mode & 0b01 != 0 {
        ok!(check_int257(&q));
        ok!(stack.push_int(q));
    }
    if mode & 0b10 != 0 {
        ok!(stack.push_int(r));
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
    fn push_and_add() {
        // PUSHINT 2; PUSHINT 3; ADD
        let vm = run(&[0x72, 0x73, 0xa0]);
        assert_eq!(top_int(&vm), BigInt::from(5));
    }

    #[test]
    fn pushint_long() {
        // PUSHINT with l = 0, a 19-bit payload of -1
        let mut b = CellBuilder::new();
        b.store_u8(0x82).unwrap();
        b.store_small_uint(0, 5).unwrap();
        b.store_ones(19).unwrap();
        let mut vm = VmState::builder().with_code(b.build().unwrap()).build();
        assert_eq!(vm.run(), 0);
        assert_eq!(top_int(&vm), BigInt::from(-1));
    }

    #[test]
    fn division_rounding() {
        // PUSHINT -7; PUSHINT 2; DIV (floor)
        let vm = run(&[0x80, 0xf9, 0x72, 0xa9, 0x04]);
        assert_eq!(top_int(&vm), BigInt::from(-4));

        // PUSHINT -7; PUSHINT 2; DIVC (ceil)
        let vm = run(&[0x80, 0xf9, 0x72, 0xa9, 0x06]);
        assert_eq!(top_int(&vm), BigInt::from(-3));

        // PUSHINT 5; PUSHINT 2; DIVR rounds 2.5 up
        let vm = run(&[0x75, 0x72, 0xa9, 0x05]);
        assert_eq!(top_int(&vm), BigInt::from(3));
    }

    #[test]
    fn division_by_zero_throws() {
        // PUSHINT 1; PUSHINT 0; DIV
        let mut b = CellBuilder::new();
        b.store_raw(&[0x71, 0x70, 0xa9, 0x04], 32).unwrap();
        let mut vm = VmState::builder().with_code(b.build().unwrap()).build();
        assert_eq!(vm.run(), VmException::IntOverflow.as_exit_code());
    }

    #[test]
    fn muldivmod() {
        // PUSHINT 7; PUSHINT 3; PUSHINT 4; MULDIVMOD: 21 = 5*4 + 1
        let vm = run(&[0x77, 0x73, 0x74, 0xa9, 0x8c]);
        let q = vm.stack.items[0].as_int().unwrap();
        let r = vm.stack.items[1].as_int().unwrap();
        assert_eq!(*q, BigInt::from(5));
        assert_eq!(*r, BigInt::from(1));
    }

    #[test]
    fn overflow_on_nan_operand() {
        // PUSHNAN; PUSHINT 1; ADD
        let mut b = CellBuilder::new();
        b.store_u16(0x83ff).unwrap();
        b.store_raw(&[0x71, 0xa0], 16).unwrap();
        let mut vm = VmState::builder().with_code(b.build().unwrap()).build();
        assert_eq!(vm.run(), VmException::IntOverflow.as_exit_code());
    }
}
