use std::rc::Rc;

use anyhow::Result;

use crate::dispatch::Opcodes;
use crate::error::VmResult;
use crate::state::VmState;

pub fn register(t: &mut Opcodes) -> Result<()> {
    t.add_simple(0x00, 8, exec_nop)?;
    t.add_fixed_range(0x01, 0x10, 8, 4, Box::new(exec_xchg0))?;
    t.add_fixed(0x10, 8, 8, Box::new(exec_xchg))?;
    t.add_fixed(0x11, 8, 8, Box::new(exec_xchg0_l))?;
    t.add_fixed_range(0x12, 0x20, 8, 4, Box::new(exec_xchg1))?;
    t.add_fixed_range(0x20, 0x30, 8, 4, Box::new(exec_push))?;
    t.add_fixed_range(0x30, 0x40, 8, 4, Box::new(exec_pop))?;
    t.add_fixed(0x4, 4, 12, Box::new(exec_xchg3))?;
    t.add_fixed(0x50, 8, 8, Box::new(exec_xchg2))?;
    t.add_fixed(0x51, 8, 8, Box::new(exec_xcpu))?;
    t.add_fixed(0x52, 8, 8, Box::new(exec_puxc))?;
    t.add_fixed(0x53, 8, 8, Box::new(exec_push2))?;
    t.add_fixed(0x540, 12, 12, Box::new(exec_xchg3_l))?;
    t.add_fixed(0x541, 12, 12, Box::new(exec_xc2pu))?;
    t.add_fixed(0x542, 12, 12, Box::new(exec_xcpuxc))?;
    t.add_fixed(0x543, 12, 12, Box::new(exec_xcpu2))?;
    t.add_fixed(0x544, 12, 12, Box::new(exec_puxc2))?;
    t.add_fixed(0x545, 12, 12, Box::new(exec_puxcpu))?;
    t.add_fixed(0x546, 12, 12, Box::new(exec_pu2xc))?;
    t.add_fixed(0x547, 12, 12, Box::new(exec_push3))?;
    t.add_fixed(0x55, 8, 8, Box::new(exec_blkswap))?;
    t.add_fixed(0x56, 8, 8, Box::new(exec_push_l))?;
    t.add_fixed(0x57, 8, 8, Box::new(exec_pop_l))?;
    t.add_simple(0x58, 8, exec_rot)?;
    t.add_simple(0x59, 8, exec_rotrev)?;
    t.add_simple(0x5a, 8, exec_2swap)?;
    t.add_simple(0x5b, 8, exec_2drop)?;
    t.add_simple(0x5c, 8, exec_2dup)?;
    t.add_simple(0x5d, 8, exec_2over)?;
    t.add_fixed(0x5e, 8, 8, Box::new(exec_reverse))?;
    t.add_fixed(0x5f0, 12, 4, Box::new(exec_blkdrop))?;
    t.add_fixed_range(0x5f10, 0x6000, 16, 8, Box::new(exec_blkpush))?;
    t.add_simple(0x60, 8, exec_pick)?;
    t.add_simple(0x61, 8, exec_roll)?;
    t.add_simple(0x62, 8, exec_rollrev)?;
    t.add_simple(0x63, 8, exec_blkswap_x)?;
    t.add_simple(0x64, 8, exec_reverse_x)?;
    t.add_simple(0x65, 8, exec_drop_x)?;
    t.add_simple(0x66, 8, exec_tuck)?;
    t.add_simple(0x67, 8, exec_xchg_x)?;
    t.add_simple(0x68, 8, exec_depth)?;
    t.add_simple(0x69, 8, exec_chkdepth)?;
    t.add_simple(0x6a, 8, exec_onlytop_x)?;
    t.add_simple(0x6b, 8, exec_only_x)?;
    Ok(())
}

fn exec_nop(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute NOP");
    Ok(0)
}

fn exec_xchg0(st: &mut VmState, args: u32) -> VmResult<i32> {
    let i = (args & 0xf) as usize;
    vm_log!(st, "execute XCHG s{i}");
    ok!(Rc::make_mut(&mut st.stack).swap(0, i));
    Ok(0)
}

fn exec_xchg(st: &mut VmState, args: u32) -> VmResult<i32> {
    let i = ((args >> 4) & 0xf) as usize;
    let j = (args & 0xf) as usize;
    vm_log!(st, "execute XCHG s{i},s{j}");
    vm_ensure!(i != 0 && i < j, InvalidOpcode);
    ok!(Rc::make_mut(&mut st.stack).swap(i, j));
    Ok(0)
}

fn exec_xchg0_l(st: &mut VmState, args: u32) -> VmResult<i32> {
    let i = (args & 0xff) as usize;
    vm_log!(st, "execute XCHG s{i}");
    ok!(Rc::make_mut(&mut st.stack).swap(0, i));
    Ok(0)
}

fn exec_xchg1(st: &mut VmState, args: u32) -> VmResult<i32> {
    let i = (args & 0xf) as usize;
    vm_log!(st, "execute XCHG s1,s{i}");
    ok!(Rc::make_mut(&mut st.stack).swap(1, i));
    Ok(0)
}

fn exec_push(st: &mut VmState, args: u32) -> VmResult<i32> {
    let i = (args & 0xf) as usize;
    vm_log!(st, "execute PUSH s{i}");
    let stack = Rc::make_mut(&mut st.stack);
    let value = ok!(stack.fetch(i));
    ok!(stack.push_raw(value));
    Ok(0)
}

fn exec_pop(st: &mut VmState, args: u32) -> VmResult<i32> {
    let i = (args & 0xf) as usize;
    vm_log!(st, "execute POP s{i}");
    let stack = Rc::make_mut(&mut st.stack);
    ok!(stack.swap(0, i));
    ok!(stack.pop());
    Ok(0)
}

fn exec_xchg3(st: &mut VmState, args: u32) -> VmResult<i32> {
    let i = ((args >> 8) & 0xf) as usize;
    let j = ((args >> 4) & 0xf) as usize;
    let k = (args & 0xf) as usize;
    vm_log!(st, "execute XCHG3 s{i},s{j},s{k}");
    let stack = Rc::make_mut(&mut st.stack);
    ok!(stack.swap(2, i));
    ok!(stack.swap(1, j));
    ok!(stack.swap(0, k));
    Ok(0)
}

fn exec_xchg2(st: &mut VmState, args: u32) -> VmResult<i32> {
    let i = ((args >> 4) & 0xf) as usize;
    let j = (args & 0xf) as usize;
    vm_log!(st, "execute XCHG2 s{i},s{j}");
    let stack = Rc::make_mut(&mut st.stack);
    ok!(stack.swap(1, i));
    ok!(stack.swap(0, j));
    Ok(0)
}

fn exec_xcpu(st: &mut VmState, args: u32) -> VmResult<i32> {
    let i = ((args >> 4) & 0xf) as usize;
    let j = (args & 0xf) as usize;
    vm_log!(st, "execute XCPU s{i},s{j}");
    let stack = Rc::make_mut(&mut st.stack);
    ok!(stack.swap(0, i));
    let value = ok!(stack.fetch(j));
    ok!(stack.push_raw(value));
    Ok(0)
}

fn exec_puxc(st: &mut VmState, args: u32) -> VmResult<i32> {
    let i = ((args >> 4) & 0xf) as usize;
    let j = (args & 0xf) as usize;
    vm_log!(st, "execute PUXC s{i},s{}", j as i32 - 1);
    let stack = Rc::make_mut(&mut st.stack);
    let value = ok!(stack.fetch(i));
    ok!(stack.push_raw(value));
    ok!(stack.swap(0, 1));
    ok!(stack.swap(0, j));
    Ok(0)
}

fn exec_push2(st: &mut VmState, args: u32) -> VmResult<i32> {
    let i = ((args >> 4) & 0xf) as usize;
    let j = (args & 0xf) as usize;
    vm_log!(st, "execute PUSH2 s{i},s{j}");
    let stack = Rc::make_mut(&mut st.stack);
    let value = ok!(stack.fetch(i));
    ok!(stack.push_raw(value));
    let value = ok!(stack.fetch(j + 1));
    ok!(stack.push_raw(value));
    Ok(0)
}

fn exec_xchg3_l(st: &mut VmState, args: u32) -> VmResult<i32> {
    exec_xchg3(st, args)
}

fn exec_xc2pu(st: &mut VmState, args: u32) -> VmResult<i32> {
    let i = ((args >> 8) & 0xf) as usize;
    let j = ((args >> 4) & 0xf) as usize;
    let k = (args & 0xf) as usize;
    vm_log!(st, "execute XC2PU s{i},s{j},s{k}");
    let stack = Rc::make_mut(&mut st.stack);
    ok!(stack.swap(1, i));
    ok!(stack.swap(0, j));
    let value = ok!(stack.fetch(k));
    ok!(stack.push_raw(value));
    Ok(0)
}

fn exec_xcpuxc(st: &mut VmState, args: u32) -> VmResult<i32> {
    let i = ((args >> 8) & 0xf) as usize;
    let j = ((args >> 4) & 0xf) as usize;
    let k = (args & 0xf) as usize;
    vm_log!(st, "execute XCPUXC s{i},s{j},s{}", k as i32 - 1);
    let stack = Rc::make_mut(&mut st.stack);
    ok!(stack.swap(1, i));
    let value = ok!(stack.fetch(j));
    ok!(stack.push_raw(value));
    ok!(stack.swap(0, 1));
    ok!(stack.swap(0, k));
    Ok(0)
}

fn exec_xcpu2(st: &mut VmState, args: u32) -> VmResult<i32> {
    let i = ((args >> 8) & 0xf) as usize;
    let j = ((args >> 4) & 0xf) as usize;
    let k = (args & 0xf) as usize;
    vm_log!(st, "execute XCPU2 s{i},s{j},s{k}");
    let stack = Rc::make_mut(&mut st.stack);
    ok!(stack.swap(0, i));
    let value = ok!(stack.fetch(j));
    ok!(stack.push_raw(value));
    let value = ok!(stack.fetch(k + 1));
    ok!(stack.push_raw(value));
    Ok(0)
}

fn exec_puxc2(st: &mut VmState, args: u32) -> VmResult<i32> {
    let i = ((args >> 8) & 0xf) as usize;
    let j = ((args >> 4) & 0xf) as usize;
    let k = (args & 0xf) as usize;
    vm_log!(st, "execute PUXC2 s{i},s{},s{}", j as i32 - 1, k as i32 - 1);
    let stack = Rc::make_mut(&mut st.stack);
    let value = ok!(stack.fetch(i));
    ok!(stack.push_raw(value));
    ok!(stack.swap(0, 2));
    ok!(stack.swap(1, j));
    ok!(stack.swap(0, k));
    Ok(0)
}

fn exec_puxcpu(st: &mut VmState, args: u32) -> VmResult<i32> {
    let i = ((args >> 8) & 0xf) as usize;
    let j = ((args >> 4) & 0xf) as usize;
    let k = (args & 0xf) as usize;
    vm_log!(st, "execute PUXCPU s{i},s{},s{}", j as i32 - 1, k as i32 - 1);
    let stack = Rc::make_mut(&mut st.stack);
    let value = ok!(stack.fetch(i));
    ok!(stack.push_raw(value));
    ok!(stack.swap(0, 1));
    ok!(stack.swap(0, j));
    let value = ok!(stack.fetch(k));
    ok!(stack.push_raw(value));
    Ok(0)
}

fn exec_pu2xc(st: &mut VmState, args: u32) -> VmResult<i32> {
    let i = ((args >> 8) & 0xf) as usize;
    let j = ((args >> 4) & 0xf) as usize;
    let k = (args & 0xf) as usize;
    vm_log!(st, "execute PU2XC s{i},s{},s{}", j as i32 - 1, k as i32 - 2);
    let stack = Rc::make_mut(&mut st.stack);
    let value = ok!(stack.fetch(i));
    ok!(stack.push_raw(value));
    ok!(stack.swap(0, 1));
    let value = ok!(stack.fetch(j));
    ok!(stack.push_raw(value));
    ok!(stack.swap(0, 1));
    ok!(stack.swap(0, k));
    Ok(0)
}

fn exec_push3(st: &mut VmState, args: u32) -> VmResult<i32> {
    let i = ((args >> 8) & 0xf) as usize;
    let j = ((args >> 4) & 0xf) as usize;
    let k = (args & 0xf) as usize;
    vm_log!(st, "execute PUSH3 s{i},s{j},s{k}");
    let stack = Rc::make_mut(&mut st.stack);
    let value = ok!(stack.fetch(i));
    ok!(stack.push_raw(value));
    let value = ok!(stack.fetch(j + 1));
    ok!(stack.push_raw(value));
    let value = ok!(stack.fetch(k + 2));
    ok!(stack.push_raw(value));
    Ok(0)
}

fn blkswap(st: &mut VmState, x: usize, y: usize) -> VmResult<i32> {
    let stack = Rc::make_mut(&mut st.stack);
    ok!(stack.reverse_range(0, y));
    ok!(stack.reverse_range(y, x));
    ok!(stack.reverse_range(0, x + y));
    Ok(0)
}

fn exec_blkswap(st: &mut VmState, args: u32) -> VmResult<i32> {
    let x = (((args >> 4) & 0xf) + 1) as usize;
    let y = ((args & 0xf) + 1) as usize;
    vm_log!(st, "execute BLKSWAP {x},{y}");
    blkswap(st, x, y)
}

fn exec_push_l(st: &mut VmState, args: u32) -> VmResult<i32> {
    let i = (args & 0xff) as usize;
    vm_log!(st, "execute PUSH s{i}");
    let stack = Rc::make_mut(&mut st.stack);
    let value = ok!(stack.fetch(i));
    ok!(stack.push_raw(value));
    Ok(0)
}

fn exec_pop_l(st: &mut VmState, args: u32) -> VmResult<i32> {
    let i = (args & 0xff) as usize;
    vm_log!(st, "execute POP s{i}");
    let stack = Rc::make_mut(&mut st.stack);
    ok!(stack.swap(0, i));
    ok!(stack.pop());
    Ok(0)
}

fn exec_rot(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute ROT");
    let stack = Rc::make_mut(&mut st.stack);
    ok!(stack.swap(1, 2));
    ok!(stack.swap(0, 1));
    Ok(0)
}

fn exec_rotrev(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute ROTREV");
    let stack = Rc::make_mut(&mut st.stack);
    ok!(stack.swap(0, 1));
    ok!(stack.swap(1, 2));
    Ok(0)
}

fn exec_2swap(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute 2SWAP");
    let stack = Rc::make_mut(&mut st.stack);
    ok!(stack.swap(0, 2));
    ok!(stack.swap(1, 3));
    Ok(0)
}

fn exec_2drop(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute 2DROP");
    let stack = Rc::make_mut(&mut st.stack);
    ok!(stack.pop_many(2));
    Ok(0)
}

fn exec_2dup(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute 2DUP");
    let stack = Rc::make_mut(&mut st.stack);
    let value = ok!(stack.fetch(1));
    ok!(stack.push_raw(value));
    let value = ok!(stack.fetch(1));
    ok!(stack.push_raw(value));
    Ok(0)
}

fn exec_2over(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute 2OVER");
    let stack = Rc::make_mut(&mut st.stack);
    let value = ok!(stack.fetch(3));
    ok!(stack.push_raw(value));
    let value = ok!(stack.fetch(3));
    ok!(stack.push_raw(value));
    Ok(0)
}

fn exec_reverse(st: &mut VmState, args: u32) -> VmResult<i32> {
    let x = (((args >> 4) & 0xf) + 2) as usize;
    let y = (args & 0xf) as usize;
    vm_log!(st, "execute REVERSE {x},{y}");
    ok!(Rc::make_mut(&mut st.stack).reverse_range(y, x));
    Ok(0)
}

fn exec_blkdrop(st: &mut VmState, args: u32) -> VmResult<i32> {
    let x = (args & 0xf) as usize;
    vm_log!(st, "execute BLKDROP {x}");
    ok!(Rc::make_mut(&mut st.stack).pop_many(x));
    Ok(0)
}

fn exec_blkpush(st: &mut VmState, args: u32) -> VmResult<i32> {
    let x = ((args >> 4) & 0xf) as usize;
    let y = (args & 0xf) as usize;
    vm_log!(st, "execute BLKPUSH {x},{y}");
    let stack = Rc::make_mut(&mut st.stack);
    for _ in 0..x {
        let value = ok!(stack.fetch(y));
        ok!(stack.push_raw(value));
    }
    Ok(0)
}

fn exec_pick(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute PICK");
    let stack = Rc::make_mut(&mut st.stack);
    let i = ok!(stack.pop_smallint_range(0, 255)) as usize;
    let value = ok!(stack.fetch(i));
    ok!(stack.push_raw(value));
    Ok(0)
}

fn exec_roll(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute ROLLX");
    let x = ok!(Rc::make_mut(&mut st.stack).pop_smallint_range(0, 255)) as usize;
    if x > 0 {
        ok!(blkswap(st, 1, x));
    }
    Ok(0)
}

fn exec_rollrev(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute ROLLREVX");
    let x = ok!(Rc::make_mut(&mut st.stack).pop_smallint_range(0, 255)) as usize;
    if x > 0 {
        ok!(blkswap(st, x, 1));
    }
    Ok(0)
}

fn exec_blkswap_x(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute BLKSWX");
    let stack = Rc::make_mut(&mut st.stack);
    let y = ok!(stack.pop_smallint_range(0, 255)) as usize;
    let x = ok!(stack.pop_smallint_range(0, 255)) as usize;
    if x > 0 && y > 0 {
        ok!(blkswap(st, x, y));
    }
    Ok(0)
}

fn exec_reverse_x(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute REVX");
    let stack = Rc::make_mut(&mut st.stack);
    let y = ok!(stack.pop_smallint_range(0, 255)) as usize;
    let x = ok!(stack.pop_smallint_range(0, 255)) as usize;
    ok!(stack.reverse_range(y, x));
    Ok(0)
}

fn exec_drop_x(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute DROPX");
    let stack = Rc::make_mut(&mut st.stack);
    let x = ok!(stack.pop_smallint_range(0, 255)) as usize;
    ok!(stack.pop_many(x));
    Ok(0)
}

fn exec_tuck(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute TUCK");
    let stack = Rc::make_mut(&mut st.stack);
    ok!(stack.swap(0, 1));
    let value = ok!(stack.fetch(1));
    ok!(stack.push_raw(value));
    Ok(0)
}

fn exec_xchg_x(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute XCHGX");
    let stack = Rc::make_mut(&mut st.stack);
    let x = ok!(stack.pop_smallint_range(0, 255)) as usize;
    ok!(stack.swap(0, x));
    Ok(0)
}

fn exec_depth(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute DEPTH");
    let stack = Rc::make_mut(&mut st.stack);
    let depth = stack.depth();
    ok!(stack.push_int(depth));
    Ok(0)
}

fn exec_chkdepth(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute CHKDEPTH");
    let stack = Rc::make_mut(&mut st.stack);
    let x = ok!(stack.pop_smallint_range(0, 255)) as usize;
    vm_ensure!(x <= stack.depth(), StackUnderflow(x));
    Ok(0)
}

fn exec_onlytop_x(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute ONLYTOPX");
    let stack = Rc::make_mut(&mut st.stack);
    let x = ok!(stack.pop_smallint_range(0, 255)) as usize;
    let depth = stack.depth();
    vm_ensure!(x <= depth, StackUnderflow(x));
    ok!(stack.drop_bottom(depth - x));
    Ok(0)
}

fn exec_only_x(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute ONLYX");
    let stack = Rc::make_mut(&mut st.stack);
    let x = ok!(stack.pop_smallint_range(0, 255)) as usize;
    let depth = stack.depth();
    vm_ensure!(x <= depth, StackUnderflow(x));
    ok!(stack.pop_many(depth - x));
    Ok(0)
}

#[cfg(test)]
mod tests {
    use num_bigint::BigInt;
    use tonkit_types::cell::{Cell, CellBuilder};

    use crate::stack::StackValue;
    use crate::state::VmState;

    fn run(bytes: &[u8], stack: Vec<crate::stack::RcStackValue>) -> VmState {
        let mut b = CellBuilder::new();
        b.store_raw(bytes, bytes.len() as u16 * 8).unwrap();
        let code: Cell = b.build().unwrap();
        let mut vm = VmState::builder()
            .with_code(code)
            .with_stack(stack)
            .build();
        assert_eq!(vm.run(), 0);
        vm
    }

    fn ints(values: &[i32]) -> Vec<crate::stack::RcStackValue> {
        values
            .iter()
            .map(|&x| std::rc::Rc::new(BigInt::from(x)) as crate::stack::RcStackValue)
            .collect()
    }

    fn dump_ints(vm: &VmState) -> Vec<i32> {
        vm.stack
            .items
            .iter()
            .map(|item| {
                item.as_int()
                    .and_then(num_traits::ToPrimitive::to_i32)
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn xchg_and_push() {
        // SWAP; PUSH s1
        let vm = run(&[0x01, 0x21], ints(&[1, 2]));
        assert_eq!(dump_ints(&vm), vec![2, 1, 2]);
    }

    #[test]
    fn blkswap_rotates_blocks() {
        // BLKSWAP 2,3 over 1 2 3 4 5 (top = 5)
        let vm = run(&[0x55, 0x12], ints(&[1, 2, 3, 4, 5]));
        assert_eq!(dump_ints(&vm), vec![3, 4, 5, 1, 2]);
    }

    #[test]
    fn rot_and_tuck() {
        let vm = run(&[0x58], ints(&[1, 2, 3]));
        assert_eq!(dump_ints(&vm), vec![2, 3, 1]);

        let vm = run(&[0x66], ints(&[1, 2]));
        assert_eq!(dump_ints(&vm), vec![2, 1, 2]);
    }

    #[test]
    fn depth_and_pick() {
        // DEPTH; DEC; PICK picks the former bottom item
        let vm = run(&[0x68, 0xa5, 0x60], ints(&[7, 8]));
        assert_eq!(dump_ints(&vm), vec![7, 8, 7]);
    }

    #[test]
    fn onlyx_keeps_bottom() {
        // ONLYX 1 keeps only the bottom item
        let vm = run(&[0x71, 0x6b], ints(&[5, 6, 7]));
        assert_eq!(dump_ints(&vm), vec![5]);
    }
}
