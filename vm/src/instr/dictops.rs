use std::rc::Rc;

use anyhow::Result;
use num_bigint::BigInt;
use num_traits::Signed;
use tonkit_types::cell::CellBuilder;
use tonkit_types::dict;
use tonkit_types::error::Error;

use crate::cont::OrdCont;
use crate::dispatch::Opcodes;
use crate::error::VmResult;
use crate::state::VmState;
use crate::util::{bitsize, store_int_to_builder, OwnedCellSlice};

pub fn register(t: &mut Opcodes) -> Result<()> {
    t.add_simple(0xf400, 16, exec_stdict)?;
    t.add_simple(0xf404, 16, exec_lddict)?;
    t.add_simple(0xf405, 16, exec_plddict)?;
    t.add_fixed_range(0xf40a, 0xf410, 16, 4, Box::new(exec_dict_get))?;
    t.add_fixed_range(0xf412, 0xf418, 16, 4, Box::new(exec_dict_set))?;
    t.add_fixed_range(0xf459, 0xf45c, 16, 4, Box::new(exec_dict_delete))?;
    t.add_fixed_range(0xf4a0, 0xf4a4, 16, 4, Box::new(exec_dict_get_jmp))?;
    t.add_ext(0x3d29, 14, 10, Box::new(exec_dict_push_const))?;
    t.add_fixed_range(0xf4bc, 0xf4c0, 16, 4, Box::new(exec_dict_get_jmp_z))?;
    Ok(())
}

// Low bits of the opcode select the key and value flavor.
struct DictOpArgs(u32);

impl DictOpArgs {
    fn is_ref(&self) -> bool {
        self.0 & 0b001 != 0
    }

    fn is_unsigned(&self) -> bool {
        self.0 & 0b010 != 0
    }

    fn is_int(&self) -> bool {
        self.0 & 0b100 != 0
    }

    fn key_tag(&self) -> &'static str {
        if !self.is_int() {
            ""
        } else if self.is_unsigned() {
            "U"
        } else {
            "I"
        }
    }

    fn ref_tag(&self) -> &'static str {
        if self.is_ref() {
            "REF"
        } else {
            ""
        }
    }
}

fn int_key_fits(int: &BigInt, n: u16, unsigned: bool) -> bool {
    if unsigned && int.is_negative() {
        return false;
    }
    bitsize(int, !unsigned) <= n
}

fn exec_stdict(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute STDICT");
    let stack = Rc::make_mut(&mut st.stack);
    let mut builder = ok!(stack.pop_builder());
    let dict = ok!(stack.pop_cell_opt());
    {
        let builder = Rc::make_mut(&mut builder);
        match dict {
            Some(cell) => {
                builder.store_bit_one()?;
                builder.store_reference(Rc::unwrap_or_clone(cell))?;
            }
            None => builder.store_bit_zero()?,
        }
    }
    ok!(stack.push_raw(builder));
    Ok(0)
}

fn exec_lddict(st: &mut VmState) -> VmResult<i32> {
    load_dict_common(st, false)
}

fn exec_plddict(st: &mut VmState) -> VmResult<i32> {
    load_dict_common(st, true)
}

fn load_dict_common(st: &mut VmState, preload: bool) -> VmResult<i32> {
    vm_log!(st, "execute {}LDDICT", if preload { "P" } else { "" });
    let stack = Rc::make_mut(&mut st.stack);
    let slice = ok!(stack.pop_slice());
    let mut cs = slice.apply()?;
    match cs.load_bit()? {
        true => {
            let cell = cs.load_reference_cloned()?;
            ok!(stack.push(cell));
        }
        false => ok!(stack.push_null()),
    }
    if !preload {
        let range = cs.range();
        let mut rest = Rc::unwrap_or_clone(slice);
        rest.set_range(range);
        ok!(stack.push(rest));
    }
    Ok(0)
}

fn exec_dict_get(st: &mut VmState, args: u32) -> VmResult<i32> {
    let s = DictOpArgs(args & 0xf);
    vm_log!(st, "execute DICT{}GET{}", s.key_tag(), s.ref_tag());
    let stack = Rc::make_mut(&mut st.stack);
    let n = ok!(stack.pop_smallint_range(0, 1023)) as u16;
    let dict = ok!(stack.pop_cell_opt());

    let int_cell;
    let key_slice;
    let key = if s.is_int() {
        let int = ok!(stack.pop_int());
        if !int_key_fits(&int, n, s.is_unsigned()) {
            // a key that cannot be encoded is simply absent
            ok!(stack.push_bool(false));
            return Ok(0);
        }
        let mut b = CellBuilder::new();
        store_int_to_builder(&int, n, !s.is_unsigned(), &mut b)?;
        int_cell = b.build()?;
        int_cell.as_slice()?
    } else {
        key_slice = ok!(stack.pop_slice());
        let mut cs = key_slice.apply()?;
        cs.only_first(n, 0)?;
        cs
    };

    match dict::dict_get_owned(dict.as_deref(), n, key)? {
        Some(parts) => {
            let value = OwnedCellSlice::from(parts);
            if s.is_ref() {
                let cell = value.apply()?.get_reference_cloned(0)?;
                ok!(stack.push(cell));
            } else {
                ok!(stack.push(value));
            }
            ok!(stack.push_bool(true));
        }
        None => ok!(stack.push_bool(false)),
    }
    Ok(0)
}

fn exec_dict_set(st: &mut VmState, args: u32) -> VmResult<i32> {
    let s = DictOpArgs(args & 0xf);
    vm_log!(st, "execute DICT{}SET{}", s.key_tag(), s.ref_tag());
    let stack = Rc::make_mut(&mut st.stack);
    let n = ok!(stack.pop_smallint_range(0, 1023)) as u16;
    let dict = ok!(stack.pop_cell_opt());

    let int_cell;
    let key_slice;
    let key = if s.is_int() {
        let int = ok!(stack.pop_int());
        let mut b = CellBuilder::new();
        store_int_to_builder(&int, n, !s.is_unsigned(), &mut b)?;
        int_cell = b.build()?;
        int_cell.as_slice()?
    } else {
        key_slice = ok!(stack.pop_slice());
        let mut cs = key_slice.apply()?;
        cs.only_first(n, 0)?;
        cs
    };
    if key.size_bits() == 0 {
        return Err(Error::CellUnderflow.into());
    }

    let ref_cell;
    let value_slice;
    let value = if s.is_ref() {
        let cell = ok!(stack.pop_cell());
        let mut b = CellBuilder::new();
        b.store_reference(Rc::unwrap_or_clone(cell))?;
        ref_cell = b.build()?;
        ref_cell.as_slice()?
    } else {
        value_slice = ok!(stack.pop_slice());
        value_slice.apply()?
    };

    match dict::dict_insert(dict.as_deref(), n, key, &value, &mut st.gas)? {
        Some(cell) => ok!(stack.push(cell)),
        None => ok!(stack.push_null()),
    }
    Ok(0)
}

fn exec_dict_delete(st: &mut VmState, args: u32) -> VmResult<i32> {
    let v = args & 0xf;
    let is_int = v != 0x9;
    let unsigned = v == 0xb;
    vm_log!(
        st,
        "execute DICT{}DEL",
        if !is_int {
            ""
        } else if unsigned {
            "U"
        } else {
            "I"
        }
    );
    let stack = Rc::make_mut(&mut st.stack);
    let n = ok!(stack.pop_smallint_range(0, 1023)) as u16;
    let dict = ok!(stack.pop_cell_opt());

    let int_cell;
    let key_slice;
    let key = if is_int {
        let int = ok!(stack.pop_int());
        if !int_key_fits(&int, n, unsigned) {
            match dict {
                Some(cell) => ok!(stack.push_raw(cell)),
                None => ok!(stack.push_null()),
            }
            ok!(stack.push_bool(false));
            return Ok(0);
        }
        let mut b = CellBuilder::new();
        store_int_to_builder(&int, n, !unsigned, &mut b)?;
        int_cell = b.build()?;
        int_cell.as_slice()?
    } else {
        key_slice = ok!(stack.pop_slice());
        let mut cs = key_slice.apply()?;
        cs.only_first(n, 0)?;
        cs
    };

    let (root, removed) = dict::dict_remove(dict.as_deref(), n, key, &mut st.gas)?;
    match root {
        Some(cell) => ok!(stack.push(cell)),
        None => ok!(stack.push_null()),
    }
    ok!(stack.push_bool(removed));
    Ok(0)
}

fn exec_dict_get_jmp(st: &mut VmState, args: u32) -> VmResult<i32> {
    dict_get_jmp_common(st, args & 0xf, false)
}

fn exec_dict_get_jmp_z(st: &mut VmState, args: u32) -> VmResult<i32> {
    dict_get_jmp_common(st, args & 0xf, true)
}

fn dict_get_jmp_common(st: &mut VmState, v: u32, push_back: bool) -> VmResult<i32> {
    let unsigned = v & 0b01 != 0;
    let call = v & 0b10 != 0;
    vm_log!(
        st,
        "execute DICT{}GET{}{}",
        if unsigned { "U" } else { "I" },
        if call { "EXEC" } else { "JMP" },
        if push_back { "Z" } else { "" }
    );
    let stack = Rc::make_mut(&mut st.stack);
    let n = ok!(stack.pop_smallint_range(0, 1023)) as u16;
    let dict = ok!(stack.pop_cell_opt());
    let int = ok!(stack.pop_int());

    let value = if int_key_fits(&int, n, unsigned) {
        let mut b = CellBuilder::new();
        store_int_to_builder(&int, n, !unsigned, &mut b)?;
        let key_cell = b.build()?;
        dict::dict_get_owned(dict.as_deref(), n, key_cell.as_slice()?)?
    } else {
        None
    };

    match value {
        Some(parts) => {
            let cont = Rc::new(OrdCont::simple(OwnedCellSlice::from(parts), st.cp.id()));
            if call {
                st.call(cont)
            } else {
                st.jump(cont)
            }
        }
        None => {
            if push_back {
                ok!(stack.push_raw(int));
            }
            Ok(0)
        }
    }
}

fn exec_dict_push_const(st: &mut VmState, args: u32, _: u16) -> VmResult<i32> {
    let n = args & 0x3ff;
    vm_log!(st, "execute DICTPUSHCONST {n}");
    let range = st.code.range();
    vm_ensure!(range.size_refs() > 0, InvalidOpcode);
    let Some(cell) = st.code.cell().reference_cloned(range.offset_refs()) else {
        return Err(Error::CellUnderflow.into());
    };
    st.code.range_mut().try_advance(0, 1);

    let stack = Rc::make_mut(&mut st.stack);
    ok!(stack.push(cell));
    ok!(stack.push_int(n));
    Ok(0)
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use num_bigint::BigInt;
    use tonkit_types::cell::{CellBuilder, EmptyCellContext};
    use tonkit_types::dict;
    use tonkit_types::prelude::Cell;

    use crate::stack::{RcStackValue, StackValue, StackValueType};
    use crate::state::VmState;
    use crate::util::OwnedCellSlice;

    fn run_with_stack(bytes: &[u8], items: Vec<RcStackValue>) -> VmState {
        let mut b = CellBuilder::new();
        b.store_raw(bytes, bytes.len() as u16 * 8).unwrap();
        let mut vm = VmState::builder()
            .with_code(b.build().unwrap())
            .with_stack(items)
            .build();
        vm.run();
        vm
    }

    fn top_int(vm: &VmState) -> BigInt {
        vm.stack.items.last().unwrap().as_int().unwrap().clone()
    }

    fn sample_dict(key: u64, key_bits: u16, value: u16) -> Cell {
        let mut kb = CellBuilder::new();
        kb.store_uint(key, key_bits).unwrap();
        let key = kb.build().unwrap();
        let mut vb = CellBuilder::new();
        vb.store_u16(value).unwrap();
        let value = vb.build().unwrap();
        dict::dict_insert(
            None,
            key_bits,
            key.as_slice().unwrap(),
            &value.as_slice().unwrap(),
            &mut EmptyCellContext,
        )
        .unwrap()
        .unwrap()
    }

    #[test]
    fn stdict_stores_presence_bit() {
        // PUSHNULL; NEWC; STDICT
        let vm = run_with_stack(&[0x6d, 0xc8, 0xf4, 0x00], vec![]);
        let builder = vm.stack.items.last().unwrap().as_builder().unwrap();
        assert_eq!(builder.size_bits(), 1);
        assert_eq!(builder.size_refs(), 0);
    }

    #[test]
    fn dictuget_finds_stored_value() {
        let root = sample_dict(5, 8, 0xbeef);
        let vm = run_with_stack(
            &[0xf4, 0x0e],
            vec![
                Rc::new(BigInt::from(5)),
                Rc::new(root),
                Rc::new(BigInt::from(8)),
            ],
        );
        assert_eq!(top_int(&vm), BigInt::from(-1));
        let value = vm.stack.items[vm.stack.items.len() - 2]
            .as_slice()
            .unwrap();
        assert_eq!(value.apply().unwrap().load_u16().unwrap(), 0xbeef);
    }

    #[test]
    fn dictuget_misses_on_absent_key() {
        let root = sample_dict(5, 8, 0xbeef);
        let vm = run_with_stack(
            &[0xf4, 0x0e],
            vec![
                Rc::new(BigInt::from(6)),
                Rc::new(root),
                Rc::new(BigInt::from(8)),
            ],
        );
        assert_eq!(top_int(&vm), BigInt::from(0));
    }

    #[test]
    fn dictuset_inserts_entry() {
        let mut vb = CellBuilder::new();
        vb.store_u16(0xcafe).unwrap();
        let value = OwnedCellSlice::new(vb.build().unwrap());

        // value key dict n -> DICTUSET
        let vm = run_with_stack(
            &[0xf4, 0x16],
            vec![
                Rc::new(value),
                Rc::new(BigInt::from(7)),
                crate::stack::Stack::make_null(),
                Rc::new(BigInt::from(8)),
            ],
        );
        let root = vm.stack.items.last().unwrap().as_cell().unwrap().clone();

        let mut kb = CellBuilder::new();
        kb.store_uint(7, 8).unwrap();
        let key = kb.build().unwrap();
        let mut found = dict::dict_get(Some(&root), 8, key.as_slice().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(found.load_u16().unwrap(), 0xcafe);
    }

    #[test]
    fn dictudel_removes_last_entry() {
        let root = sample_dict(9, 8, 0x1234);
        let vm = run_with_stack(
            &[0xf4, 0x5b],
            vec![
                Rc::new(BigInt::from(9)),
                Rc::new(root),
                Rc::new(BigInt::from(8)),
            ],
        );
        assert_eq!(top_int(&vm), BigInt::from(-1));
        let remaining = &vm.stack.items[vm.stack.items.len() - 2];
        assert_eq!(remaining.ty(), StackValueType::Null);
    }

    #[test]
    fn dictigetjmp_runs_stored_code() {
        // value is code that pushes 7
        let mut kb = CellBuilder::new();
        kb.store_uint(0, 8).unwrap();
        let key = kb.build().unwrap();
        let mut vb = CellBuilder::new();
        vb.store_u8(0x77).unwrap();
        let body = vb.build().unwrap();
        let root = dict::dict_insert(
            None,
            8,
            key.as_slice().unwrap(),
            &body.as_slice().unwrap(),
            &mut EmptyCellContext,
        )
        .unwrap()
        .unwrap();

        let vm = run_with_stack(
            &[0xf4, 0xa0],
            vec![
                Rc::new(BigInt::from(0)),
                Rc::new(root),
                Rc::new(BigInt::from(8)),
            ],
        );
        assert_eq!(top_int(&vm), BigInt::from(7));
    }

    #[test]
    fn dictpushconst_reads_code_ref() {
        let root = sample_dict(5, 8, 0xbeef);
        // DICTPUSHCONST 8 (dict in the code ref); DICTUGET
        let mut b = CellBuilder::new();
        b.store_raw(&[0xf4, 0xa4, 0x08, 0xf4, 0x0e], 40).unwrap();
        b.store_reference(root).unwrap();
        let mut vm = VmState::builder()
            .with_code(b.build().unwrap())
            .with_stack(vec![Rc::new(BigInt::from(5))])
            .build();
        vm.run();
        assert_eq!(top_int(&vm), BigInt::from(-1));
    }

    #[test]
    fn lddict_splits_optional_root() {
        // slice with an empty dict marker and trailing data
        let mut b = CellBuilder::new();
        b.store_bit_zero().unwrap();
        b.store_u8(0xab).unwrap();
        let slice = OwnedCellSlice::new(b.build().unwrap());

        let vm = run_with_stack(&[0xf4, 0x04], vec![Rc::new(slice)]);
        let rest = vm.stack.items.last().unwrap().as_slice().unwrap();
        assert_eq!(rest.apply().unwrap().load_u8().unwrap(), 0xab);
        let dict = &vm.stack.items[vm.stack.items.len() - 2];
        assert_eq!(dict.ty(), StackValueType::Null);
    }
}
