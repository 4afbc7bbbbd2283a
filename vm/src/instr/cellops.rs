use std::rc::Rc;

use anyhow::Result;
use tonkit_types::cell::{CellBuilder, CellContext, LoadMode};
use tonkit_types::error::Error;

use crate::dispatch::Opcodes;
use crate::error::VmResult;
use crate::state::VmState;
use crate::util::{load_int_from_slice, store_int_to_builder, OwnedCellSlice};

pub fn register(t: &mut Opcodes) -> Result<()> {
    t.add_simple(0x88, 8, exec_push_ref)?;
    t.add_simple(0x89, 8, exec_push_ref_slice)?;
    t.add_fixed(0x8b, 8, 4, Box::new(exec_push_slice))?;
    t.add_simple(0xc8, 8, exec_new_builder)?;
    t.add_simple(0xc9, 8, exec_builder_to_cell)?;
    t.add_fixed(0xca, 8, 8, Box::new(exec_store_int_const::<true>))?;
    t.add_fixed(0xcb, 8, 8, Box::new(exec_store_int_const::<false>))?;
    t.add_simple(0xcc, 8, exec_store_ref)?;
    t.add_simple(0xcd, 8, exec_store_builder_as_ref_rev)?;
    t.add_simple(0xce, 8, exec_store_slice)?;
    t.add_simple(0xcf00, 16, exec_store_int_var::<true>)?;
    t.add_simple(0xcf01, 16, exec_store_int_var::<false>)?;
    t.add_simple(0xcf13, 16, exec_store_builder)?;
    t.add_simple(0xcf31, 16, exec_builder_bits)?;
    t.add_simple(0xcf32, 16, exec_builder_refs)?;
    t.add_simple(0xd0, 8, exec_cell_to_slice)?;
    t.add_simple(0xd1, 8, exec_slice_chk_empty)?;
    t.add_fixed(0xd2, 8, 8, Box::new(exec_load_int_const::<true>))?;
    t.add_fixed(0xd3, 8, 8, Box::new(exec_load_int_const::<false>))?;
    t.add_simple(0xd4, 8, exec_load_ref)?;
    t.add_fixed(0xd6, 8, 8, Box::new(exec_load_slice_const))?;
    t.add_simple(0xd700, 16, exec_load_int_var::<true>)?;
    t.add_simple(0xd701, 16, exec_load_int_var::<false>)?;
    t.add_simple(0xd718, 16, exec_load_slice_var)?;
    t.add_simple(0xd720, 16, exec_slice_cut_first)?;
    t.add_simple(0xd721, 16, exec_slice_skip_first)?;
    t.add_simple(0xd749, 16, exec_slice_bits)?;
    t.add_simple(0xd74a, 16, exec_slice_refs)?;
    t.add_simple(0xd74b, 16, exec_slice_bits_refs)?;
    Ok(())
}

fn exec_push_ref(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute PUSHREF");
    let mut code = st.code.apply()?;
    let cell = code.load_reference_cloned()?;
    st.code.set_range(code.range());
    ok!(Rc::make_mut(&mut st.stack).push(cell));
    Ok(0)
}

fn exec_push_ref_slice(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute PUSHREFSLICE");
    let mut code = st.code.apply()?;
    let cell = code.load_reference_cloned()?;
    st.code.set_range(code.range());
    let cell = st.gas.load_cell(cell, LoadMode::Full)?;
    ok!(Rc::make_mut(&mut st.stack).push(OwnedCellSlice::new(cell)));
    Ok(0)
}

fn exec_push_slice(st: &mut VmState, args: u32) -> VmResult<i32> {
    let data_bits = (args & 0xf) as u16 * 8 + 4;
    vm_log!(st, "execute PUSHSLICE");
    st.gas.try_consume(data_bits as u64)?;

    let mut code = st.code.apply()?;
    let mut prefix = code;
    prefix.only_first(data_bits, 0)?;
    code.skip_first(data_bits, 0)?;

    // The payload is padded with a single one bit followed by zeros
    let mut bits = prefix.size_bits();
    while bits > 0 && !prefix.get_bit(bits - 1)? {
        bits -= 1;
    }
    vm_ensure!(bits > 0, InvalidOpcode);
    prefix.only_first(bits - 1, 0)?;

    let slice = OwnedCellSlice::from((st.code.cell().clone(), prefix.range()));
    st.code.set_range(code.range());
    ok!(Rc::make_mut(&mut st.stack).push(slice));
    Ok(0)
}

fn exec_new_builder(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute NEWC");
    ok!(Rc::make_mut(&mut st.stack).push(CellBuilder::new()));
    Ok(0)
}

fn exec_builder_to_cell(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute ENDC");
    let stack = Rc::make_mut(&mut st.stack);
    let builder = ok!(stack.pop_builder());
    let cell = Rc::unwrap_or_clone(builder).build_ext(&mut st.gas)?;
    ok!(stack.push(cell));
    Ok(0)
}

fn store_int(st: &mut VmState, bits: u16, signed: bool) -> VmResult<i32> {
    let stack = Rc::make_mut(&mut st.stack);
    let mut builder = ok!(stack.pop_builder());
    let x = ok!(stack.pop_int());
    match store_int_to_builder(&x, bits, signed, Rc::make_mut(&mut builder)) {
        Ok(()) => {}
        Err(Error::IntOverflow) => vm_bail!(IntegerOutOfRange {
            min: i64::MIN,
            max: i64::MAX,
            actual: x.to_string(),
        }),
        Err(e) => return Err(e.into()),
    }
    ok!(stack.push_raw(builder));
    Ok(0)
}

fn exec_store_int_const<const SIGNED: bool>(st: &mut VmState, args: u32) -> VmResult<i32> {
    let bits = (args & 0xff) as u16 + 1;
    vm_log!(st, "execute {} {bits}", if SIGNED { "STI" } else { "STU" });
    store_int(st, bits, SIGNED)
}

fn exec_store_int_var<const SIGNED: bool>(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute {}", if SIGNED { "STIX" } else { "STUX" });
    let max = if SIGNED { 257 } else { 256 };
    let bits = ok!(Rc::make_mut(&mut st.stack).pop_smallint_range(0, max)) as u16;
    store_int(st, bits, SIGNED)
}

fn exec_store_ref(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute STREF");
    let stack = Rc::make_mut(&mut st.stack);
    let mut builder = ok!(stack.pop_builder());
    let cell = ok!(stack.pop_cell());
    Rc::make_mut(&mut builder).store_reference(Rc::unwrap_or_clone(cell))?;
    ok!(stack.push_raw(builder));
    Ok(0)
}

fn exec_store_builder_as_ref_rev(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute STBREFR");
    let stack = Rc::make_mut(&mut st.stack);
    let inner = ok!(stack.pop_builder());
    let mut builder = ok!(stack.pop_builder());
    let cell = Rc::unwrap_or_clone(inner).build_ext(&mut st.gas)?;
    Rc::make_mut(&mut builder).store_reference(cell)?;
    ok!(stack.push_raw(builder));
    Ok(0)
}

fn exec_store_slice(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute STSLICE");
    let stack = Rc::make_mut(&mut st.stack);
    let mut builder = ok!(stack.pop_builder());
    let slice = ok!(stack.pop_slice());
    Rc::make_mut(&mut builder).store_slice(&slice.apply()?)?;
    ok!(stack.push_raw(builder));
    Ok(0)
}

fn exec_store_builder(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute STB");
    let stack = Rc::make_mut(&mut st.stack);
    let mut builder = ok!(stack.pop_builder());
    let other = ok!(stack.pop_builder());
    Rc::make_mut(&mut builder).store_builder(&other)?;
    ok!(stack.push_raw(builder));
    Ok(0)
}

fn exec_builder_bits(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute BBITS");
    let stack = Rc::make_mut(&mut st.stack);
    let builder = ok!(stack.pop_builder());
    ok!(stack.push_int(builder.size_bits()));
    Ok(0)
}

fn exec_builder_refs(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute BREFS");
    let stack = Rc::make_mut(&mut st.stack);
    let builder = ok!(stack.pop_builder());
    ok!(stack.push_int(builder.size_refs()));
    Ok(0)
}

fn exec_cell_to_slice(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute CTOS");
    let stack = Rc::make_mut(&mut st.stack);
    let cell = ok!(stack.pop_cell());
    let cell = st.gas.load_cell(Rc::unwrap_or_clone(cell), LoadMode::Full)?;
    ok!(stack.push(OwnedCellSlice::new(cell)));
    Ok(0)
}

fn exec_slice_chk_empty(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute ENDS");
    let slice = ok!(Rc::make_mut(&mut st.stack).pop_slice());
    let cs = slice.apply()?;
    if !cs.is_data_empty() || !cs.is_refs_empty() {
        return Err(Error::CellUnderflow.into());
    }
    Ok(0)
}

fn load_int(st: &mut VmState, bits: u16, signed: bool) -> VmResult<i32> {
    let stack = Rc::make_mut(&mut st.stack);
    let slice = ok!(stack.pop_slice());
    let mut cs = slice.apply()?;
    let int = load_int_from_slice(&mut cs, bits, signed)?;
    let range = cs.range();
    let mut slice = Rc::unwrap_or_clone(slice);
    slice.set_range(range);
    ok!(stack.push_int(int));
    ok!(stack.push(slice));
    Ok(0)
}

fn exec_load_int_const<const SIGNED: bool>(st: &mut VmState, args: u32) -> VmResult<i32> {
    let bits = (args & 0xff) as u16 + 1;
    vm_log!(st, "execute {} {bits}", if SIGNED { "LDI" } else { "LDU" });
    load_int(st, bits, SIGNED)
}

fn exec_load_int_var<const SIGNED: bool>(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute {}", if SIGNED { "LDIX" } else { "LDUX" });
    let max = if SIGNED { 257 } else { 256 };
    let bits = ok!(Rc::make_mut(&mut st.stack).pop_smallint_range(0, max)) as u16;
    load_int(st, bits, SIGNED)
}

fn exec_load_ref(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute LDREF");
    let stack = Rc::make_mut(&mut st.stack);
    let slice = ok!(stack.pop_slice());
    let mut cs = slice.apply()?;
    let cell = cs.load_reference_cloned()?;
    let range = cs.range();
    let mut slice = Rc::unwrap_or_clone(slice);
    slice.set_range(range);
    ok!(stack.push(cell));
    ok!(stack.push(slice));
    Ok(0)
}

fn load_slice(st: &mut VmState, bits: u16) -> VmResult<i32> {
    let stack = Rc::make_mut(&mut st.stack);
    let slice = ok!(stack.pop_slice());
    let mut cs = slice.apply()?;
    let mut prefix = cs;
    prefix.only_first(bits, 0)?;
    cs.skip_first(bits, 0)?;
    let head = OwnedCellSlice::from((slice.cell().clone(), prefix.range()));
    let range = cs.range();
    let mut slice = Rc::unwrap_or_clone(slice);
    slice.set_range(range);
    ok!(stack.push(head));
    ok!(stack.push(slice));
    Ok(0)
}

fn exec_load_slice_const(st: &mut VmState, args: u32) -> VmResult<i32> {
    let bits = (args & 0xff) as u16 + 1;
    vm_log!(st, "execute LDSLICE {bits}");
    load_slice(st, bits)
}

fn exec_load_slice_var(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute LDSLICEX");
    let bits = ok!(Rc::make_mut(&mut st.stack).pop_smallint_range(0, 1023)) as u16;
    load_slice(st, bits)
}

fn exec_slice_cut_first(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute SDCUTFIRST");
    let stack = Rc::make_mut(&mut st.stack);
    let bits = ok!(stack.pop_smallint_range(0, 1023)) as u16;
    let slice = ok!(stack.pop_slice());
    let mut cs = slice.apply()?;
    cs.only_first(bits, 0)?;
    let range = cs.range();
    let mut slice = Rc::unwrap_or_clone(slice);
    slice.set_range(range);
    ok!(stack.push(slice));
    Ok(0)
}

fn exec_slice_skip_first(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute SDSKIPFIRST");
    let stack = Rc::make_mut(&mut st.stack);
    let bits = ok!(stack.pop_smallint_range(0, 1023)) as u16;
    let slice = ok!(stack.pop_slice());
    let mut cs = slice.apply()?;
    cs.skip_first(bits, 0)?;
    let range = cs.range();
    let mut slice = Rc::unwrap_or_clone(slice);
    slice.set_range(range);
    ok!(stack.push(slice));
    Ok(0)
}

fn exec_slice_bits(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute SBITS");
    let stack = Rc::make_mut(&mut st.stack);
    let slice = ok!(stack.pop_slice());
    ok!(stack.push_int(slice.range().size_bits()));
    Ok(0)
}

fn exec_slice_refs(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute SREFS");
    let stack = Rc::make_mut(&mut st.stack);
    let slice = ok!(stack.pop_slice());
    ok!(stack.push_int(slice.range().size_refs()));
    Ok(0)
}

fn exec_slice_bits_refs(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute SBITREFS");
    let stack = Rc::make_mut(&mut st.stack);
    let slice = ok!(stack.pop_slice());
    ok!(stack.push_int(slice.range().size_bits()));
    ok!(stack.push_int(slice.range().size_refs()));
    Ok(0)
}

#[cfg(test)]
mod tests {
    use num_bigint::BigInt;
    use tonkit_types::cell::CellBuilder;

    use crate::error::VmException;
    use crate::stack::StackValue;
    use crate::state::VmState;

    fn run_code(code: tonkit_types::cell::Cell) -> VmState {
        let mut vm = VmState::builder().with_code(code).build();
        assert_eq!(vm.run(), 0);
        vm
    }

    fn run(bytes: &[u8]) -> VmState {
        let mut b = CellBuilder::new();
        b.store_raw(bytes, bytes.len() as u16 * 8).unwrap();
        run_code(b.build().unwrap())
    }

    fn top_int(vm: &VmState) -> BigInt {
        vm.stack.items.last().unwrap().as_int().unwrap().clone()
    }

    #[test]
    fn build_store_and_reload() {
        // PUSHINT -5; NEWC; STI 8; ENDC; CTOS; LDI 8; ENDS
        let vm = run(&[0x80, 0xfb, 0xc8, 0xca, 0x07, 0xc9, 0xd0, 0xd2, 0x07, 0xd1]);
        assert_eq!(top_int(&vm), BigInt::from(-5));
    }

    #[test]
    fn store_rejects_non_fitting_int() {
        // PUSHINT 9; NEWC; STU 3
        let mut b = CellBuilder::new();
        b.store_raw(&[0x79, 0xc8, 0xcb, 0x02], 32).unwrap();
        let mut vm = VmState::builder().with_code(b.build().unwrap()).build();
        assert_eq!(vm.run(), VmException::RangeCheck.as_exit_code());
    }

    #[test]
    fn pushref_and_stref_round_trip() {
        let inner = {
            let mut b = CellBuilder::new();
            b.store_u32(0xdeadbeef).unwrap();
            b.build().unwrap()
        };
        // PUSHREF; NEWC; STREF; ENDC; CTOS; LDREF; ENDS
        let mut b = CellBuilder::new();
        b.store_raw(&[0x88, 0xc8, 0xcc, 0xc9, 0xd0, 0xd4, 0xd1], 56)
            .unwrap();
        b.store_reference(inner.clone()).unwrap();
        let vm = run_code(b.build().unwrap());
        let cell = vm.stack.items.last().unwrap().as_cell().unwrap();
        assert_eq!(cell.repr_hash(), inner.repr_hash());
    }

    #[test]
    fn pushslice_trims_completion_tag() {
        // PUSHSLICE x=0 with payload bits 1010 then tag 1 would not fit in 4
        // bits, so use payload 101 + tag: 1011 -> slice bits 101
        let mut b = CellBuilder::new();
        b.store_u8(0x8b).unwrap();
        b.store_small_uint(0b0000, 4).unwrap();
        b.store_small_uint(0b1011, 4).unwrap();
        let mut vm = VmState::builder().with_code(b.build().unwrap()).build();
        assert_eq!(vm.run(), 0);
        let slice = vm.stack.items.last().unwrap().as_slice().unwrap();
        let mut cs = slice.apply().unwrap();
        assert_eq!(cs.size_bits(), 3);
        assert_eq!(cs.load_small_uint(3).unwrap(), 0b101);
    }

    #[test]
    fn slice_introspection() {
        // PUSHREFSLICE; SBITREFS
        let inner = {
            let mut b = CellBuilder::new();
            b.store_u16(0xffff).unwrap();
            b.build().unwrap()
        };
        let mut b = CellBuilder::new();
        b.store_u8(0x89).unwrap();
        b.store_u16(0xd74b).unwrap();
        b.store_reference(inner).unwrap();
        let vm = run_code(b.build().unwrap());
        let n = vm.stack.items.len();
        assert_eq!(vm.stack.items[n - 2].as_int(), Some(&BigInt::from(16)));
        assert_eq!(vm.stack.items[n - 1].as_int(), Some(&BigInt::from(0)));
    }

    #[test]
    fn ldslice_splits_prefix() {
        // PUSHSLICE (8 data bits: 0xA5 + tag); LDSLICE 4
        let mut b = CellBuilder::new();
        b.store_u8(0x8b).unwrap();
        b.store_small_uint(1, 4).unwrap();
        b.store_u8(0xa5).unwrap();
        b.store_small_uint(0b1000, 4).unwrap();
        b.store_u8(0xd6).unwrap();
        b.store_u8(0x03).unwrap();
        let mut vm = VmState::builder().with_code(b.build().unwrap()).build();
        assert_eq!(vm.run(), 0);
        let n = vm.stack.items.len();
        let head = vm.stack.items[n - 2].as_slice().unwrap();
        assert_eq!(head.apply().unwrap().load_small_uint(4).unwrap(), 0xa);
        let tail = vm.stack.items[n - 1].as_slice().unwrap();
        assert_eq!(tail.apply().unwrap().load_small_uint(4).unwrap(), 0x5);
    }
}
