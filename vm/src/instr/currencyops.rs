use std::rc::Rc;

use anyhow::Result;
use num_bigint::{BigInt, Sign};
use num_traits::{One, Zero};
use tonkit_types::cell::{CellBuilder, CellSlice};
use tonkit_types::error::Error;

use crate::dispatch::Opcodes;
use crate::error::VmResult;
use crate::stack::{RcStackValue, Stack, Tuple};
use crate::state::VmState;
use crate::util::{load_varint_from_slice, store_varint_to_builder, OwnedCellSlice};

pub fn register(t: &mut Opcodes) -> Result<()> {
    t.add_fixed(0x1f40, 13, 3, Box::new(exec_var_integer))?;
    t.add_simple(0xfa40, 16, exec_load_message_addr)?;
    t.add_simple(0xfa41, 16, exec_load_message_addr_q)?;
    t.add_simple(0xfa42, 16, exec_parse_message_addr)?;
    t.add_simple(0xfa43, 16, exec_parse_message_addr_q)?;
    t.add_simple(0xfa44, 16, exec_rewrite_std_addr)?;
    t.add_simple(0xfa45, 16, exec_rewrite_std_addr_q)?;
    Ok(())
}

fn var_integer_name(store: bool, signed: bool, len_bits: u16) -> &'static str {
    match (store, signed, len_bits) {
        (false, false, 4) => "LDGRAMS",
        (false, true, 4) => "LDVARINT16",
        (true, false, 4) => "STGRAMS",
        (true, true, 4) => "STVARINT16",
        (false, false, _) => "LDVARUINT32",
        (false, true, _) => "LDVARINT32",
        (true, false, _) => "STVARUINT32",
        (true, true, _) => "STVARINT32",
    }
}

fn exec_var_integer(st: &mut VmState, args: u32) -> VmResult<i32> {
    let signed = args & 0b001 != 0;
    let store = args & 0b010 != 0;
    let len_bits = if args & 0b100 != 0 { 5 } else { 4 };
    vm_log!(st, "execute {}", var_integer_name(store, signed, len_bits));

    let stack = Rc::make_mut(&mut st.stack);
    if store {
        let int = ok!(stack.pop_int());
        let mut builder = ok!(stack.pop_builder());
        store_varint_to_builder(&int, len_bits, signed, Rc::make_mut(&mut builder))?;
        ok!(stack.push_raw(builder));
    } else {
        let cs = ok!(stack.pop_slice());
        let mut rest = cs.as_ref().clone();
        let mut slice = rest.apply()?;
        let int = load_varint_from_slice(&mut slice, len_bits, signed)?;
        rest.set_range(slice.range());
        ok!(stack.push_int(int));
        ok!(stack.push_raw(Rc::new(rest)));
    }
    Ok(0)
}

fn exec_load_message_addr(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute LDMSGADDR");
    load_message_addr_common(st, false)
}

fn exec_load_message_addr_q(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute LDMSGADDRQ");
    load_message_addr_common(st, true)
}

fn load_message_addr_common(st: &mut VmState, quiet: bool) -> VmResult<i32> {
    let stack = Rc::make_mut(&mut st.stack);
    let cs = ok!(stack.pop_slice());

    let full = cs.apply()?;
    let mut rest = full;
    match skip_message_addr(&mut rest) {
        Ok(()) => {
            let mut addr = full;
            addr.only_first(full.size_bits() - rest.size_bits(), 0)?;

            let mut addr_part = cs.as_ref().clone();
            addr_part.set_range(addr.range());
            ok!(stack.push_raw(Rc::new(addr_part)));

            let mut rest_part = cs.as_ref().clone();
            rest_part.set_range(rest.range());
            ok!(stack.push_raw(Rc::new(rest_part)));
            if quiet {
                ok!(stack.push_bool(true));
            }
        }
        Err(e) => {
            if !quiet {
                return Err(e.into());
            }
            ok!(stack.push_raw(cs));
            ok!(stack.push_bool(false));
        }
    }
    Ok(0)
}

fn exec_parse_message_addr(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute PARSEMSGADDR");
    parse_message_addr_common(st, false)
}

fn exec_parse_message_addr_q(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute PARSEMSGADDRQ");
    parse_message_addr_common(st, true)
}

fn parse_message_addr_common(st: &mut VmState, quiet: bool) -> VmResult<i32> {
    let stack = Rc::make_mut(&mut st.stack);
    let cs = ok!(stack.pop_slice());

    match parse_message_addr(&cs) {
        Ok(tuple) => {
            st.gas.try_consume_tuple_gas(tuple.len() as u64)?;
            ok!(stack.push_raw(Rc::new(tuple)));
            if quiet {
                ok!(stack.push_bool(true));
            }
        }
        Err(_) if quiet => ok!(stack.push_bool(false)),
        Err(e) => return Err(e.into()),
    }
    Ok(0)
}

fn exec_rewrite_std_addr(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute REWRITESTDADDR");
    rewrite_std_addr_common(st, false)
}

fn exec_rewrite_std_addr_q(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute REWRITESTDADDRQ");
    rewrite_std_addr_common(st, true)
}

fn rewrite_std_addr_common(st: &mut VmState, quiet: bool) -> VmResult<i32> {
    let stack = Rc::make_mut(&mut st.stack);
    let cs = ok!(stack.pop_slice());

    match rewrite_std_addr(&cs) {
        Ok((workchain, addr)) => {
            ok!(stack.push_int(workchain));
            ok!(stack.push_int(addr));
            if quiet {
                ok!(stack.push_bool(true));
            }
        }
        Err(_) if quiet => ok!(stack.push_bool(false)),
        Err(e) => return Err(e.into()),
    }
    Ok(0)
}

fn rewrite_std_addr(cs: &OwnedCellSlice) -> Result<(BigInt, BigInt), Error> {
    let mut slice = cs.apply()?;
    if slice.load_small_uint(2)? != 2 {
        return Err(Error::InvalidData);
    }

    let anycast = parse_maybe_anycast(&mut slice)?;
    let workchain = slice.load_u8()? as i8;
    let mut addr = slice.load_u256()?;

    if let Some(mut prefix) = anycast {
        let depth = prefix.size_bits();
        let mut buf = [0u8; 4];
        prefix.load_raw(&mut buf, depth)?;
        // splice the rewrite prefix over the leading address bits
        for bit in 0..depth {
            let value = buf[(bit / 8) as usize] >> (7 - bit % 8) & 1;
            let byte = &mut addr.0[(bit / 8) as usize];
            let mask = 1 << (7 - bit % 8);
            *byte = *byte & !mask | value << (7 - bit % 8) & mask;
        }
    }

    Ok((
        BigInt::from(workchain),
        BigInt::from_bytes_be(Sign::Plus, addr.as_array()),
    ))
}

fn parse_message_addr(cs: &OwnedCellSlice) -> Result<Tuple, Error> {
    let mut slice = cs.apply()?;

    // reuses the stack value's cell for every slice put into the tuple
    let part = |range: &CellSlice<'_>, bits: u16| -> Result<Rc<OwnedCellSlice>, Error> {
        let mut prefix = *range;
        prefix.only_first(bits, 0)?;
        let mut owned = cs.clone();
        owned.set_range(prefix.range());
        Ok(Rc::new(owned))
    };

    let mut tuple = Tuple::new();
    match slice.load_small_uint(2)? {
        // addr_none$00
        0 => {
            tuple.push(Rc::new(BigInt::zero()));
        }
        // addr_extern$01 len:(## 9) external_address:(bits len)
        1 => {
            let len = slice.load_uint(9)? as u16;
            tuple.push(Rc::new(BigInt::one()));
            tuple.push(part(&slice, len)?);
            slice.skip_first(len, 0)?;
        }
        // addr_std$10 anycast:(Maybe Anycast) workchain_id:int8 address:bits256
        2 => {
            tuple.push(Rc::new(BigInt::from(2)));
            tuple.push(anycast_value(cs, &mut slice)?);
            tuple.push(Rc::new(BigInt::from(slice.load_u8()? as i8)));
            tuple.push(part(&slice, 256)?);
            slice.skip_first(256, 0)?;
        }
        // addr_var$11 anycast:(Maybe Anycast) addr_len:(## 9) workchain_id:int32
        3 => {
            tuple.push(Rc::new(BigInt::from(3)));
            let anycast = anycast_value(cs, &mut slice)?;
            let len = slice.load_uint(9)? as u16;
            tuple.push(anycast);
            tuple.push(Rc::new(BigInt::from(slice.load_u32()? as i32)));
            tuple.push(part(&slice, len)?);
            slice.skip_first(len, 0)?;
        }
        _ => return Err(Error::InvalidData),
    }
    Ok(tuple)
}

fn anycast_value(
    cs: &OwnedCellSlice,
    slice: &mut CellSlice<'_>,
) -> Result<RcStackValue, Error> {
    match parse_maybe_anycast(slice)? {
        Some(prefix) => {
            let mut owned = cs.clone();
            owned.set_range(prefix.range());
            Ok(Rc::new(owned))
        }
        None => Ok(Stack::make_null()),
    }
}

fn skip_message_addr(slice: &mut CellSlice<'_>) -> Result<(), Error> {
    match slice.load_small_uint(2)? {
        0 => Ok(()),
        1 => {
            let len = slice.load_uint(9)? as u16;
            slice.skip_first(len, 0)
        }
        2 => {
            skip_maybe_anycast(slice)?;
            slice.skip_first(8 + 256, 0)
        }
        3 => {
            skip_maybe_anycast(slice)?;
            let len = slice.load_uint(9)? as u16;
            slice.skip_first(32 + len, 0)
        }
        _ => Err(Error::InvalidData),
    }
}

fn skip_maybe_anycast(slice: &mut CellSlice<'_>) -> Result<(), Error> {
    if !slice.load_bit()? {
        return Ok(());
    }
    let depth = load_uint_leq(slice, 30)? as u16;
    if depth == 0 {
        return Err(Error::InvalidData);
    }
    slice.skip_first(depth, 0)
}

/// Parses `anycast_info$_ depth:(#<= 30) rewrite_pfx:(bits depth)` and
/// returns the rewrite prefix.
fn parse_maybe_anycast<'a>(slice: &mut CellSlice<'a>) -> Result<Option<CellSlice<'a>>, Error> {
    if !slice.load_bit()? {
        return Ok(None);
    }
    let depth = load_uint_leq(slice, 30)? as u16;
    if depth == 0 {
        return Err(Error::InvalidData);
    }
    let mut prefix = *slice;
    prefix.only_first(depth, 0)?;
    slice.skip_first(depth, 0)?;
    Ok(Some(prefix))
}

/// Loads a `#<= n` value: the minimal number of bits that can hold `n`.
fn load_uint_leq(slice: &mut CellSlice<'_>, upper_bound: u32) -> Result<u64, Error> {
    let bits = (32 - upper_bound.leading_zeros()) as u16;
    let value = slice.load_uint(bits)?;
    if value > upper_bound as u64 {
        return Err(Error::IntOverflow);
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use num_bigint::BigInt;
    use tonkit_types::cell::{CellBuilder, EmptyCellContext, HashBytes, Store};
    use tonkit_types::models::StdAddr;

    use crate::stack::{RcStackValue, StackValue, StackValueType};
    use crate::state::VmState;
    use crate::util::OwnedCellSlice;

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

    fn std_addr_slice(addr: &StdAddr) -> Rc<OwnedCellSlice> {
        let mut b = CellBuilder::new();
        addr.store_into(&mut b, &mut EmptyCellContext).unwrap();
        Rc::new(OwnedCellSlice::new(b.build().unwrap()))
    }

    #[test]
    fn ldgrams_reads_amount_and_remainder() {
        // 4-bit length 2, value 0x0102, then one trailing byte
        let mut b = CellBuilder::new();
        b.store_small_uint(2, 4).unwrap();
        b.store_u16(0x0102).unwrap();
        b.store_u8(0xee).unwrap();
        let value = Rc::new(OwnedCellSlice::new(b.build().unwrap()));

        let vm = run(&[0xfa, 0x00], vec![value]);
        let rest = vm.stack.items.last().unwrap().as_slice().unwrap();
        assert_eq!(rest.range().size_bits(), 8);
        let int = vm.stack.items[vm.stack.items.len() - 2].as_int();
        assert_eq!(int, Some(&BigInt::from(0x0102)));
    }

    #[test]
    fn stgrams_prefixes_the_byte_length() {
        let vm = run(
            &[0xfa, 0x02],
            vec![
                Rc::new(CellBuilder::new()),
                Rc::new(BigInt::from(1_000_000_000)),
            ],
        );
        let builder = vm.stack.items.last().unwrap().as_builder().unwrap();
        // 4-bit length prefix plus four value bytes
        assert_eq!(builder.size_bits(), 4 + 32);
    }

    #[test]
    fn stvarint16_rejects_oversized_values() {
        // fifteen bytes cannot hold a 201-bit value
        let vm = run(
            &[0xfa, 0x03],
            vec![Rc::new(CellBuilder::new()), Rc::new(BigInt::from(1) << 200)],
        );
        assert!(vm.stack.items.last().unwrap().as_builder().is_none());
    }

    #[test]
    fn ldmsgaddr_splits_address_from_body() {
        let addr = StdAddr::new(0, HashBytes([0x44; 32]));
        let mut b = CellBuilder::new();
        addr.store_into(&mut b, &mut EmptyCellContext).unwrap();
        b.store_u32(0xdeadbeef).unwrap();
        let value = Rc::new(OwnedCellSlice::new(b.build().unwrap()));

        let vm = run(&[0xfa, 0x40], vec![value]);
        let rest = vm.stack.items.last().unwrap().as_slice().unwrap();
        assert_eq!(rest.range().size_bits(), 32);
        let addr_part = vm.stack.items[vm.stack.items.len() - 2]
            .as_slice()
            .unwrap();
        assert_eq!(addr_part.range().size_bits(), 2 + 1 + 8 + 256);
    }

    #[test]
    fn ldmsgaddrq_returns_false_on_garbage() {
        let mut b = CellBuilder::new();
        // addr_std tag with a truncated body
        b.store_small_uint(0b100, 3).unwrap();
        let value = Rc::new(OwnedCellSlice::new(b.build().unwrap()));

        let vm = run(&[0xfa, 0x41], vec![value]);
        assert_eq!(
            vm.stack.items.last().unwrap().as_int(),
            Some(&BigInt::from(0))
        );
    }

    #[test]
    fn parsemsgaddr_builds_the_std_tuple() {
        let addr = StdAddr::new(-1, HashBytes([0x11; 32]));
        let vm = run(&[0xfa, 0x42], vec![std_addr_slice(&addr)]);

        let tuple = vm.stack.items.last().unwrap().as_tuple().unwrap();
        assert_eq!(tuple.len(), 4);
        assert_eq!(tuple[0].as_int(), Some(&BigInt::from(2)));
        assert_eq!(tuple[1].ty(), StackValueType::Null);
        assert_eq!(tuple[2].as_int(), Some(&BigInt::from(-1)));
        assert_eq!(tuple[3].as_slice().unwrap().range().size_bits(), 256);
    }

    #[test]
    fn rewritestdaddr_yields_workchain_and_int_address() {
        let addr = StdAddr::new(0, HashBytes([0xab; 32]));
        let vm = run(&[0xfa, 0x44], vec![std_addr_slice(&addr)]);

        let hash = vm.stack.items.last().unwrap().as_int().unwrap();
        assert_eq!(
            *hash,
            num_bigint::BigInt::from_bytes_be(num_bigint::Sign::Plus, &[0xab; 32])
        );
        let wc = vm.stack.items[vm.stack.items.len() - 2].as_int();
        assert_eq!(wc, Some(&BigInt::from(0)));
    }
}
