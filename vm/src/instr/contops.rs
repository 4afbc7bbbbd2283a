use std::rc::Rc;

use anyhow::Result;
use tonkit_types::cell::Cell;
use tonkit_types::error::Error;

use crate::cont::{
    force_cdata, AgainCont, Cont, ControlData, ControlRegs, OrdCont, RcCont, RepeatCont, UntilCont,
    WhileCont,
};
use crate::dispatch::Opcodes;
use crate::error::VmResult;
use crate::stack::Stack;
use crate::state::{SaveCr, VmState};
use crate::util::OwnedCellSlice;

pub fn register(t: &mut Opcodes) -> Result<()> {
    t.add_simple(0x8a, 8, exec_push_ref_cont)?;
    t.add_ext(0x8e >> 1, 7, 9, Box::new(exec_push_cont))?;
    t.add_ext(0x9, 4, 4, Box::new(exec_push_cont_simple))?;

    t.add_simple(0xd8, 8, exec_execute)?;
    t.add_simple(0xd9, 8, exec_jmpx)?;
    t.add_fixed(0xda, 8, 8, Box::new(exec_callx_args))?;
    t.add_fixed(0xdb0, 12, 4, Box::new(exec_callx_args_p))?;
    t.add_fixed(0xdb1, 12, 4, Box::new(exec_jmpx_args))?;
    t.add_fixed(0xdb2, 12, 4, Box::new(exec_ret_args))?;
    t.add_simple(0xdb30, 16, exec_ret)?;
    t.add_simple(0xdb31, 16, exec_ret_alt)?;
    t.add_simple(0xdb32, 16, exec_ret_bool)?;
    t.add_simple(0xdb3c, 16, exec_callref)?;
    t.add_simple(0xdb3d, 16, exec_jmpref)?;

    t.add_simple(0xdc, 8, exec_ifret)?;
    t.add_simple(0xdd, 8, exec_ifnotret)?;
    t.add_simple(0xde, 8, exec_if)?;
    t.add_simple(0xdf, 8, exec_ifnot)?;
    t.add_simple(0xe0, 8, exec_if_jmp)?;
    t.add_simple(0xe1, 8, exec_ifnot_jmp)?;
    t.add_simple(0xe2, 8, exec_if_else)?;
    t.add_simple(0xe300, 16, exec_ifref)?;
    t.add_simple(0xe301, 16, exec_ifnotref)?;
    t.add_simple(0xe302, 16, exec_ifjmpref)?;
    t.add_simple(0xe303, 16, exec_ifnotjmpref)?;
    t.add_simple(0xe304, 16, exec_condsel)?;

    t.add_simple(0xe4, 8, exec_repeat)?;
    t.add_simple(0xe5, 8, exec_repeat_end)?;
    t.add_simple(0xe6, 8, exec_until)?;
    t.add_simple(0xe7, 8, exec_until_end)?;
    t.add_simple(0xe8, 8, exec_while)?;
    t.add_simple(0xe9, 8, exec_while_end)?;
    t.add_simple(0xea, 8, exec_again)?;
    t.add_simple(0xeb, 8, exec_again_end)?;

    t.add_fixed(0xec, 8, 8, Box::new(exec_setcontargs))?;
    t.add_fixed(0xed4, 12, 4, Box::new(exec_push_ctr))?;
    t.add_fixed(0xed5, 12, 4, Box::new(exec_pop_ctr))?;
    t.add_simple(0xedf0, 16, exec_compos)?;
    t.add_simple(0xedf1, 16, exec_compos_alt)?;
    t.add_simple(0xedf2, 16, exec_compos_both)?;
    t.add_fixed(0xee, 8, 8, Box::new(exec_bless_args))?;

    t.add_fixed(0xf0, 8, 8, Box::new(exec_calldict_short))?;
    t.add_fixed(0x3c4, 10, 14, Box::new(exec_calldict))?;
    t.add_fixed(0x3c5, 10, 14, Box::new(exec_jmpdict))?;
    t.add_fixed(0x3c6, 10, 14, Box::new(exec_preparedict))?;

    t.add_fixed(0x3c8, 10, 6, Box::new(exec_throw_short))?;
    t.add_fixed(0x3c9, 10, 6, Box::new(exec_throwif_short))?;
    t.add_fixed(0x3ca, 10, 6, Box::new(exec_throwifnot_short))?;
    t.add_fixed(0x1e58, 13, 11, Box::new(exec_throw))?;
    t.add_fixed(0x1e59, 13, 11, Box::new(exec_throwarg))?;
    t.add_fixed(0x1e5a, 13, 11, Box::new(exec_throwif))?;
    t.add_fixed(0x1e5b, 13, 11, Box::new(exec_throwargif))?;
    t.add_fixed(0x1e5c, 13, 11, Box::new(exec_throwifnot))?;
    t.add_fixed(0x1e5d, 13, 11, Box::new(exec_throwargifnot))?;
    t.add_fixed_range(0xf2f0, 0xf2f6, 16, 4, Box::new(exec_throw_any))?;
    t.add_simple(0xf2ff, 16, exec_try)?;
    t.add_fixed(0xf3, 8, 8, Box::new(exec_tryargs))?;

    t.add_fixed(0xff, 8, 8, Box::new(exec_set_cp))?;
    Ok(())
}

// === Continuation literals ===

fn exec_push_ref_cont(st: &mut VmState) -> VmResult<i32> {
    let cell = ok!(exec_cell_prefix(st, "PUSHREFCONT"));
    let cont = ok!(st.ref_to_cont(cell));
    ok!(Rc::make_mut(&mut st.stack).push_raw(cont.into_stack_value()));
    Ok(0)
}

fn exec_push_cont(st: &mut VmState, args: u32, _: u16) -> VmResult<i32> {
    let refs = ((args >> 7) & 0b11) as u8;
    let data_bits = (args & 0x7f) as u16 * 8;
    push_cont_common(st, data_bits, refs)
}

fn exec_push_cont_simple(st: &mut VmState, args: u32, _: u16) -> VmResult<i32> {
    let data_bits = (args & 0xf) as u16 * 8;
    push_cont_common(st, data_bits, 0)
}

fn push_cont_common(st: &mut VmState, data_bits: u16, refs: u8) -> VmResult<i32> {
    st.gas.try_consume(data_bits as u64)?;

    let mut code = st.code.apply()?;
    vm_ensure!(code.has_remaining(data_bits, refs), InvalidOpcode);
    let mut prefix = code;
    prefix.only_first(data_bits, refs)?;
    code.skip_first(data_bits, refs)?;

    let prefix_range = prefix.range();
    let rest_range = code.range();
    let cont_code = OwnedCellSlice::from((st.code.cell().clone(), prefix_range));
    st.code.set_range(rest_range);

    vm_log!(st, "execute PUSHCONT");
    let cont = Rc::new(OrdCont::simple(cont_code, st.cp.id()));
    ok!(Rc::make_mut(&mut st.stack).push_raw(cont.into_stack_value()));
    Ok(0)
}

// === Jump ops ===

fn exec_execute(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute EXECUTE");
    let cont = ok!(Rc::make_mut(&mut st.stack).pop_cont());
    st.call(cont)
}

fn exec_jmpx(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute JMPX");
    let cont = ok!(Rc::make_mut(&mut st.stack).pop_cont());
    st.jump(cont)
}

fn exec_callx_args(st: &mut VmState, args: u32) -> VmResult<i32> {
    let p = (args >> 4) & 0xf;
    let r = args & 0xf;
    vm_log!(st, "execute CALLXARGS {p},{r}");
    let cont = ok!(Rc::make_mut(&mut st.stack).pop_cont());
    st.call_ext(cont, Some(p as _), Some(r as _))
}

fn exec_callx_args_p(st: &mut VmState, args: u32) -> VmResult<i32> {
    let p = args & 0xf;
    vm_log!(st, "execute CALLXARGS {p},-1");
    let cont = ok!(Rc::make_mut(&mut st.stack).pop_cont());
    st.call_ext(cont, Some(p as _), None)
}

fn exec_jmpx_args(st: &mut VmState, args: u32) -> VmResult<i32> {
    let p = args & 0xf;
    vm_log!(st, "execute JMPXARGS {p}");
    let cont = ok!(Rc::make_mut(&mut st.stack).pop_cont());
    st.jump_ext(cont, Some(p as _))
}

fn exec_ret_args(st: &mut VmState, args: u32) -> VmResult<i32> {
    let r = args & 0xf;
    vm_log!(st, "execute RETARGS {r}");
    st.ret_ext(Some(r as _))
}

fn exec_ret(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute RET");
    st.ret()
}

fn exec_ret_alt(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute RETALT");
    st.ret_alt()
}

fn exec_ret_bool(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute RETBOOL");
    if ok!(Rc::make_mut(&mut st.stack).pop_bool()) {
        st.ret()
    } else {
        st.ret_alt()
    }
}

fn exec_callref(st: &mut VmState) -> VmResult<i32> {
    let cell = ok!(exec_cell_prefix(st, "CALLREF"));
    let cont = ok!(st.ref_to_cont(cell));
    st.call(cont)
}

fn exec_jmpref(st: &mut VmState) -> VmResult<i32> {
    let cell = ok!(exec_cell_prefix(st, "JMPREF"));
    let cont = ok!(st.ref_to_cont(cell));
    st.jump(cont)
}

fn exec_cell_prefix(st: &mut VmState, name: &str) -> VmResult<Cell> {
    let range = st.code.range();
    vm_ensure!(range.size_refs() > 0, InvalidOpcode);
    let Some(cell) = st.code.cell().reference_cloned(range.offset_refs()) else {
        return Err(Error::CellUnderflow.into());
    };
    let ok = st.code.range_mut().try_advance(0, 1);
    debug_assert!(ok);
    vm_log!(st, "execute {name} ({})", cell.repr_hash());
    Ok(cell)
}

// === Conditions ===

fn exec_ifret(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute IFRET");
    if ok!(Rc::make_mut(&mut st.stack).pop_bool()) {
        st.ret()
    } else {
        Ok(0)
    }
}

fn exec_ifnotret(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute IFNOTRET");
    if ok!(Rc::make_mut(&mut st.stack).pop_bool()) {
        Ok(0)
    } else {
        st.ret()
    }
}

fn exec_if(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute IF");
    let stack = Rc::make_mut(&mut st.stack);
    let cont = ok!(stack.pop_cont());
    if ok!(stack.pop_bool()) {
        st.call(cont)
    } else {
        Ok(0)
    }
}

fn exec_ifnot(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute IFNOT");
    let stack = Rc::make_mut(&mut st.stack);
    let cont = ok!(stack.pop_cont());
    if ok!(stack.pop_bool()) {
        Ok(0)
    } else {
        st.call(cont)
    }
}

fn exec_if_jmp(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute IFJMP");
    let stack = Rc::make_mut(&mut st.stack);
    let cont = ok!(stack.pop_cont());
    if ok!(stack.pop_bool()) {
        st.jump(cont)
    } else {
        Ok(0)
    }
}

fn exec_ifnot_jmp(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute IFNOTJMP");
    let stack = Rc::make_mut(&mut st.stack);
    let cont = ok!(stack.pop_cont());
    if ok!(stack.pop_bool()) {
        Ok(0)
    } else {
        st.jump(cont)
    }
}

fn exec_if_else(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute IFELSE");
    let stack = Rc::make_mut(&mut st.stack);
    let cont = {
        let cont0 = ok!(stack.pop_cont());
        let cont1 = ok!(stack.pop_cont());
        match ok!(stack.pop_bool()) {
            false => cont0,
            true => cont1,
        }
    };
    st.call(cont)
}

fn exec_ifref(st: &mut VmState) -> VmResult<i32> {
    let cell = ok!(exec_cell_prefix(st, "IFREF"));
    if ok!(Rc::make_mut(&mut st.stack).pop_bool()) {
        let cont = ok!(st.ref_to_cont(cell));
        st.call(cont)
    } else {
        Ok(0)
    }
}

fn exec_ifnotref(st: &mut VmState) -> VmResult<i32> {
    let cell = ok!(exec_cell_prefix(st, "IFNOTREF"));
    if ok!(Rc::make_mut(&mut st.stack).pop_bool()) {
        Ok(0)
    } else {
        let cont = ok!(st.ref_to_cont(cell));
        st.call(cont)
    }
}

fn exec_ifjmpref(st: &mut VmState) -> VmResult<i32> {
    let cell = ok!(exec_cell_prefix(st, "IFJMPREF"));
    if ok!(Rc::make_mut(&mut st.stack).pop_bool()) {
        let cont = ok!(st.ref_to_cont(cell));
        st.jump(cont)
    } else {
        Ok(0)
    }
}

fn exec_ifnotjmpref(st: &mut VmState) -> VmResult<i32> {
    let cell = ok!(exec_cell_prefix(st, "IFNOTJMPREF"));
    if ok!(Rc::make_mut(&mut st.stack).pop_bool()) {
        Ok(0)
    } else {
        let cont = ok!(st.ref_to_cont(cell));
        st.jump(cont)
    }
}

fn exec_condsel(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute CONDSEL");
    let stack = Rc::make_mut(&mut st.stack);
    let y = ok!(stack.pop());
    let x = ok!(stack.pop());
    let cond = ok!(stack.pop_bool());
    ok!(stack.push_raw(match cond {
        true => x,
        false => y,
    }));
    Ok(0)
}

// === Loops ===

fn exec_repeat(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute REPEAT");
    let stack = Rc::make_mut(&mut st.stack);
    let body = ok!(stack.pop_cont());
    let n = ok!(stack.pop_smallint_signed_range(i32::MIN, i32::MAX));
    if n <= 0 {
        return Ok(0);
    }
    let after = ok!(st.extract_cc(SaveCr::C0, None, None));
    st.jump(Rc::new(RepeatCont {
        count: n as u64,
        body,
        after,
    }))
}

fn exec_repeat_end(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute REPEATEND");
    let n = ok!(Rc::make_mut(&mut st.stack).pop_smallint_signed_range(i32::MIN, i32::MAX));
    if n <= 0 {
        return st.ret();
    }
    let body = ok!(rest_of_code(st));
    let Some(after) = st.cr.c[0].clone() else {
        vm_bail!(Fatal("c0 is undefined"));
    };
    st.jump(Rc::new(RepeatCont {
        count: n as u64,
        body,
        after,
    }))
}

fn exec_until(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute UNTIL");
    let body = ok!(Rc::make_mut(&mut st.stack).pop_cont());
    let after = ok!(st.extract_cc(SaveCr::C0, None, None));
    st.cr.c[0] = Some(Rc::new(UntilCont {
        body: body.clone(),
        after,
    }));
    st.jump(body)
}

fn exec_until_end(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute UNTILEND");
    let body = ok!(rest_of_code(st));
    let Some(after) = st.cr.c[0].clone() else {
        vm_bail!(Fatal("c0 is undefined"));
    };
    st.cr.c[0] = Some(Rc::new(UntilCont {
        body: body.clone(),
        after,
    }));
    st.jump(body)
}

fn exec_while(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute WHILE");
    let stack = Rc::make_mut(&mut st.stack);
    let body = ok!(stack.pop_cont());
    let cond = ok!(stack.pop_cont());
    let after = ok!(st.extract_cc(SaveCr::C0, None, None));
    st.cr.c[0] = Some(Rc::new(WhileCont {
        check_cond: true,
        cond: cond.clone(),
        body,
        after,
    }));
    st.jump(cond)
}

fn exec_while_end(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute WHILEEND");
    let cond = ok!(Rc::make_mut(&mut st.stack).pop_cont());
    let body = ok!(rest_of_code(st));
    let Some(after) = st.cr.c[0].clone() else {
        vm_bail!(Fatal("c0 is undefined"));
    };
    st.cr.c[0] = Some(Rc::new(WhileCont {
        check_cond: true,
        cond: cond.clone(),
        body,
        after,
    }));
    st.jump(cond)
}

fn exec_again(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute AGAIN");
    let body = ok!(Rc::make_mut(&mut st.stack).pop_cont());
    st.cr.c[0] = Some(Rc::new(AgainCont { body: body.clone() }));
    st.jump(body)
}

fn exec_again_end(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute AGAINEND");
    let body = ok!(rest_of_code(st));
    st.cr.c[0] = Some(Rc::new(AgainCont { body: body.clone() }));
    st.jump(body)
}

/// Wraps the remaining code into a plain continuation with no saved
/// registers, leaving the current code empty.
fn rest_of_code(st: &mut VmState) -> VmResult<RcCont> {
    let code = std::mem::take(&mut st.code);
    Ok(Rc::new(OrdCont::simple(code, st.cp.id())))
}

// === Continuation change ===

fn exec_setcontargs(st: &mut VmState, args: u32) -> VmResult<i32> {
    let r = (args >> 4) & 0xf;
    let n = ((args as i32 + 1) & 0xf) - 1;
    vm_log!(st, "execute SETCONTARGS {r},{n}");
    ok!(exec_setcontargs_common(st, r, n));
    Ok(0)
}

fn exec_setcontargs_common(st: &mut VmState, copy: u32, more: i32) -> VmResult<()> {
    let stack = Rc::make_mut(&mut st.stack);
    let mut cont = ok!(stack.pop_cont());
    if copy > 0 || more >= 0 {
        let cdata = ok!(force_cdata(&mut cont));

        if copy > 0 {
            ok!(cdata.require_nargs(copy as _));
            if let Some(cdata_stack) = &mut cdata.stack {
                ok!(Rc::make_mut(cdata_stack).move_from_stack(stack, copy as _));
            } else {
                cdata.stack = Some(ok!(stack.split_top(copy as _)));
            }

            st.gas.try_consume_stack_gas(cdata.stack.as_deref())?;

            if let Some(n) = &mut cdata.nargs {
                *n -= copy as u16;
            }
        }

        if more >= 0 {
            match &mut cdata.nargs {
                Some(n) => {
                    if *n as i32 > more {
                        // will underflow when the continuation runs
                        *n = u16::MAX;
                    }
                }
                None => cdata.nargs = Some(more as _),
            }
        }
    }

    ok!(stack.push_raw(cont.into_stack_value()));
    Ok(())
}

fn exec_push_ctr(st: &mut VmState, args: u32) -> VmResult<i32> {
    let i = (args & 0xf) as usize;
    vm_log!(st, "execute PUSH c{i}");
    vm_ensure!(ControlRegs::is_valid_idx(i), InvalidOpcode);
    ok!(Rc::make_mut(&mut st.stack).push_opt_raw(st.cr.get_as_stack_value(i)));
    Ok(0)
}

fn exec_pop_ctr(st: &mut VmState, args: u32) -> VmResult<i32> {
    let i = (args & 0xf) as usize;
    vm_log!(st, "execute POP c{i}");
    vm_ensure!(ControlRegs::is_valid_idx(i), InvalidOpcode);
    let value = ok!(Rc::make_mut(&mut st.stack).pop());
    ok!(st.cr.set(i, value));
    Ok(0)
}

fn exec_compos(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute COMPOS");
    compos_common(st, true, false)
}

fn exec_compos_alt(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute COMPOSALT");
    compos_common(st, false, true)
}

fn exec_compos_both(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute COMPOSBOTH");
    compos_common(st, true, true)
}

fn compos_common(st: &mut VmState, set_c0: bool, set_c1: bool) -> VmResult<i32> {
    let stack = Rc::make_mut(&mut st.stack);
    let value = ok!(stack.pop_cont());
    let mut cont = ok!(stack.pop_cont());
    let save = &mut ok!(force_cdata(&mut cont)).save;
    if set_c0 {
        save.define_c0(&Some(value.clone()));
    }
    if set_c1 {
        save.define_c1(&Some(value));
    }
    ok!(stack.push_raw(cont.into_stack_value()));
    Ok(0)
}

fn exec_bless_args(st: &mut VmState, args: u32) -> VmResult<i32> {
    let r = (args >> 4) & 0xf;
    let n = ((args as i32 + 1) & 0xf) - 1;
    vm_log!(st, "execute BLESSARGS {r},{n}");

    let stack = Rc::make_mut(&mut st.stack);
    let cs = ok!(stack.pop_slice());
    let new_stack = ok!(stack.split_top(r as _));
    st.gas.try_consume_stack_gas(Some(&new_stack))?;

    let cont = Rc::new(OrdCont {
        data: ControlData {
            nargs: (n >= 0).then_some(n as _),
            stack: Some(new_stack),
            save: Default::default(),
            cp: Some(st.cp.id()),
        },
        code: Rc::unwrap_or_clone(cs),
    });
    ok!(stack.push_raw(cont.into_stack_value()));
    Ok(0)
}

// === Dictionary jumps ===

fn exec_calldict_short(st: &mut VmState, args: u32) -> VmResult<i32> {
    calldict_common(st, args & 0xff, false)
}

fn exec_calldict(st: &mut VmState, args: u32) -> VmResult<i32> {
    calldict_common(st, args & 0x3fff, false)
}

fn exec_jmpdict(st: &mut VmState, args: u32) -> VmResult<i32> {
    calldict_common(st, args & 0x3fff, true)
}

fn calldict_common(st: &mut VmState, n: u32, jump: bool) -> VmResult<i32> {
    vm_log!(st, "execute {} {n}", if jump { "JMPDICT" } else { "CALLDICT" });
    ok!(Rc::make_mut(&mut st.stack).push_int(n));
    let Some(c3) = st.cr.c[3].clone() else {
        vm_bail!(Fatal("c3 is undefined"));
    };
    if jump {
        st.jump(c3)
    } else {
        st.call(c3)
    }
}

fn exec_preparedict(st: &mut VmState, args: u32) -> VmResult<i32> {
    let n = args & 0x3fff;
    vm_log!(st, "execute PREPAREDICT {n}");
    let stack = Rc::make_mut(&mut st.stack);
    ok!(stack.push_int(n));
    let c3 = match st.cr.c[3].clone() {
        Some(c3) => c3.into_stack_value(),
        None => Stack::make_null(),
    };
    ok!(stack.push_raw(c3));
    Ok(0)
}

// === Exceptions ===

fn exec_throw_short(st: &mut VmState, args: u32) -> VmResult<i32> {
    let n = args & 0x3f;
    vm_log!(st, "execute THROW {n}");
    st.throw_exception(n as i32)
}

fn exec_throwif_short(st: &mut VmState, args: u32) -> VmResult<i32> {
    let n = args & 0x3f;
    vm_log!(st, "execute THROWIF {n}");
    throw_cond(st, n, true)
}

fn exec_throwifnot_short(st: &mut VmState, args: u32) -> VmResult<i32> {
    let n = args & 0x3f;
    vm_log!(st, "execute THROWIFNOT {n}");
    throw_cond(st, n, false)
}

fn exec_throw(st: &mut VmState, args: u32) -> VmResult<i32> {
    let n = args & 0x7ff;
    vm_log!(st, "execute THROW {n}");
    st.throw_exception(n as i32)
}

fn exec_throwif(st: &mut VmState, args: u32) -> VmResult<i32> {
    let n = args & 0x7ff;
    vm_log!(st, "execute THROWIF {n}");
    throw_cond(st, n, true)
}

fn exec_throwifnot(st: &mut VmState, args: u32) -> VmResult<i32> {
    let n = args & 0x7ff;
    vm_log!(st, "execute THROWIFNOT {n}");
    throw_cond(st, n, false)
}

fn throw_cond(st: &mut VmState, n: u32, when: bool) -> VmResult<i32> {
    if ok!(Rc::make_mut(&mut st.stack).pop_bool()) != when {
        return Ok(0);
    }
    st.throw_exception(n as i32)
}

fn exec_throwarg(st: &mut VmState, args: u32) -> VmResult<i32> {
    let n = args & 0x7ff;
    vm_log!(st, "execute THROWARG {n}");
    let arg = ok!(Rc::make_mut(&mut st.stack).pop());
    st.throw_exception_with_arg(n as i32, arg)
}

fn exec_throwargif(st: &mut VmState, args: u32) -> VmResult<i32> {
    let n = args & 0x7ff;
    vm_log!(st, "execute THROWARGIF {n}");
    throw_arg_cond(st, n, true)
}

fn exec_throwargifnot(st: &mut VmState, args: u32) -> VmResult<i32> {
    let n = args & 0x7ff;
    vm_log!(st, "execute THROWARGIFNOT {n}");
    throw_arg_cond(st, n, false)
}

fn throw_arg_cond(st: &mut VmState, n: u32, when: bool) -> VmResult<i32> {
    let stack = Rc::make_mut(&mut st.stack);
    if ok!(stack.pop_bool()) != when {
        ok!(stack.pop());
        return Ok(0);
    }
    let arg = ok!(stack.pop());
    st.throw_exception_with_arg(n as i32, arg)
}

fn exec_throw_any(st: &mut VmState, args: u32) -> VmResult<i32> {
    let has_param = args & 0b001 != 0;
    let has_cond = args & 0b110 != 0;
    let throw_cond = args & 0b010 != 0;
    vm_log!(
        st,
        "execute THROW{}ANY{}",
        if has_param { "ARG" } else { "" },
        if !has_cond {
            ""
        } else if throw_cond {
            "IF"
        } else {
            "IFNOT"
        }
    );

    let stack = Rc::make_mut(&mut st.stack);
    let cond = if has_cond {
        ok!(stack.pop_bool())
    } else {
        throw_cond
    };
    let n = ok!(stack.pop_smallint_range(0, 0xffff));

    if cond != throw_cond {
        if has_param {
            ok!(stack.pop());
        }
        Ok(0)
    } else if has_param {
        let arg = ok!(stack.pop());
        st.throw_exception_with_arg(n as i32, arg)
    } else {
        st.throw_exception(n as i32)
    }
}

fn exec_try(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute TRY");
    exec_try_common(st, None)
}

fn exec_tryargs(st: &mut VmState, args: u32) -> VmResult<i32> {
    let p = (args >> 4) & 0xf;
    let r = args & 0xf;
    vm_log!(st, "execute TRYARGS {p},{r}");
    exec_try_common(st, Some((p as u16, r as u16)))
}

fn exec_try_common(st: &mut VmState, args: Option<(u16, u16)>) -> VmResult<i32> {
    let stack = Rc::make_mut(&mut st.stack);
    let mut handler = ok!(stack.pop_cont());
    let cont = ok!(stack.pop_cont());
    let old_c2 = st.cr.c[2].clone();

    let (stack_copy, nargs) = args.unzip();
    let cc = ok!(st.extract_cc(SaveCr::C0C1C2, stack_copy, nargs));

    let handler_cr = &mut ok!(force_cdata(&mut handler)).save;
    handler_cr.define_c2(&old_c2);
    handler_cr.define_c0(&Some(cc.clone()));

    st.cr.c[0] = Some(cc);
    st.cr.c[2] = Some(handler);
    st.jump(cont)
}

// === Codepage ops ===

fn exec_set_cp(st: &mut VmState, args: u32) -> VmResult<i32> {
    let x = args & 0xff;
    let cp = if x < 0xf0 { x as i16 } else { x as i16 - 0x100 };
    vm_log!(st, "execute SETCP {cp}");
    ok!(st.force_cp(cp as u16));
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

    fn top_int(vm: &VmState) -> BigInt {
        vm.stack.items.last().unwrap().as_int().unwrap().clone()
    }

    #[test]
    fn pushcont_and_execute() {
        // PUSHCONT { PUSHINT 2; PUSHINT 3 }; EXECUTE; ADD
        let vm = run(&[0x92, 0x72, 0x73, 0xd8, 0xa0]);
        assert_eq!(top_int(&vm), BigInt::from(5));
    }

    #[test]
    fn if_executes_on_true_only() {
        // PUSHINT 1; PUSHCONT { PUSHINT 7 }; IF
        let vm = run(&[0x71, 0x91, 0x77, 0xde]);
        assert_eq!(top_int(&vm), BigInt::from(7));

        // PUSHINT 0; PUSHCONT { PUSHINT 7 }; IF; PUSHINT 9
        let vm = run(&[0x70, 0x91, 0x77, 0xde, 0x79]);
        assert_eq!(top_int(&vm), BigInt::from(9));
    }

    #[test]
    fn repeat_runs_body_n_times() {
        // PUSHINT 0; PUSHINT 3; PUSHCONT { INC }; REPEAT
        let vm = run(&[0x70, 0x73, 0x91, 0xa4, 0xe4]);
        assert_eq!(top_int(&vm), BigInt::from(3));
    }

    #[test]
    fn until_counts_down_to_zero() {
        // PUSHINT 3; PUSHCONT { DEC; DUP; EQINT 0 }; UNTIL
        let vm = run(&[0x73, 0x94, 0xa5, 0x20, 0xc0, 0x00, 0xe6]);
        assert_eq!(top_int(&vm), BigInt::from(0));
    }

    #[test]
    fn uncaught_throw_terminates_with_exception_code() {
        // THROW 5 (short form)
        let vm = {
            let mut b = CellBuilder::new();
            b.store_u16(0xf205).unwrap();
            let mut vm = VmState::builder().with_code(b.build().unwrap()).build();
            assert_eq!(vm.run(), !5);
            vm
        };
        assert_eq!(top_int(&vm), BigInt::from(5));
    }

    #[test]
    fn try_routes_exception_into_handler() {
        // PUSHCONT { THROW 5 }; PUSHCONT {}; TRY
        let vm = run(&[0x92, 0xf2, 0x05, 0x90, 0xf2, 0xff]);
        // the handler receives (0, 5) and simply returns
        assert_eq!(top_int(&vm), BigInt::from(5));
    }

    #[test]
    fn throwif_skips_when_condition_is_false() {
        // PUSHINT 0; THROWIF 3; PUSHINT 1
        let vm = run(&[0x70, 0xf2, 0x43, 0x71]);
        assert_eq!(top_int(&vm), BigInt::from(1));
    }

    #[test]
    fn push_ctr_exposes_data_register() {
        // PUSH c4; CTOS; SDEMPTY (c4 defaults to an empty cell)
        let vm = run(&[0xed, 0x44, 0xd0, 0xc7, 0x01]);
        assert_eq!(top_int(&vm), BigInt::from(-1));
    }
}
