use std::rc::Rc;

use anyhow::Result;
use num_bigint::{BigInt, Sign};
use sha2::{Digest, Sha256, Sha512};

use crate::dispatch::Opcodes;
use crate::error::VmResult;
use crate::smc_info::SmcInfo;
use crate::stack::{Stack, StackValue, StackValueType};
use crate::state::VmState;

pub fn register(t: &mut Opcodes) -> Result<()> {
    t.add_simple(0xf810, 16, exec_randu256)?;
    t.add_simple(0xf811, 16, exec_rand_int)?;
    t.add_simple(0xf814, 16, exec_set_rand)?;
    t.add_simple(0xf815, 16, exec_add_rand)?;
    Ok(())
}

fn exec_randu256(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute RANDU256");
    let random = ok!(generate_random_u256(st));
    ok!(Rc::make_mut(&mut st.stack).push_int(random));
    Ok(0)
}

fn exec_rand_int(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute RAND");
    let x = ok!(Rc::make_mut(&mut st.stack).pop_int());
    let random = ok!(generate_random_u256(st));
    // floor(x * r / 2^256), uniform on [0, x) for positive x
    let scaled = (x.as_ref() * random) >> 256u32;
    ok!(Rc::make_mut(&mut st.stack).push_int(scaled));
    Ok(0)
}

fn exec_set_rand(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute SETRAND");
    set_rand_common(st, false)
}

fn exec_add_rand(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute ADDRAND");
    set_rand_common(st, true)
}

fn set_rand_common(st: &mut VmState, mix: bool) -> VmResult<i32> {
    let x = ok!(Rc::make_mut(&mut st.stack).pop_int());
    let x_bytes = ok!(seed_to_bytes(&x));

    let seed = if mix {
        let old_seed = ok!(current_seed(st));
        let old_bytes = ok!(seed_to_bytes(&old_seed));

        let mut hasher = Sha256::new();
        hasher.update(old_bytes);
        hasher.update(x_bytes);
        BigInt::from_bytes_be(Sign::Plus, &hasher.finalize())
    } else {
        Rc::unwrap_or_clone(x)
    };

    ok!(update_rand_seed(st, Rc::new(seed)));
    Ok(0)
}

/// Advances the seed with one Sha512 round and returns the random half.
fn generate_random_u256(st: &mut VmState) -> VmResult<BigInt> {
    let seed = ok!(current_seed(st));
    let seed_bytes = ok!(seed_to_bytes(&seed));

    let mut hasher = Sha512::new();
    hasher.update(seed_bytes);
    let hash = hasher.finalize();

    let new_seed = BigInt::from_bytes_be(Sign::Plus, &hash[..32]);
    ok!(update_rand_seed(st, Rc::new(new_seed)));
    Ok(BigInt::from_bytes_be(Sign::Plus, &hash[32..]))
}

fn current_seed(st: &VmState) -> VmResult<Rc<BigInt>> {
    let params = ok!(st.cr.get_c7_params());
    let Some(seed) = params.get(SmcInfo::RANDSEED_IDX).cloned() else {
        vm_bail!(InvalidType {
            expected: StackValueType::Int,
            actual: StackValueType::Null,
        });
    };
    let actual = seed.ty();
    match seed.into_int() {
        Some(seed) => Ok(seed),
        None => vm_bail!(InvalidType {
            expected: StackValueType::Int,
            actual,
        }),
    }
}

fn seed_to_bytes(seed: &BigInt) -> VmResult<[u8; 32]> {
    let (sign, bytes) = seed.to_bytes_be();
    vm_ensure!(
        sign != Sign::Minus && bytes.len() <= 32,
        IntegerOutOfRange {
            min: 0,
            max: 256,
            actual: seed.to_string(),
        }
    );
    let mut buf = [0u8; 32];
    buf[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(buf)
}

fn update_rand_seed(st: &mut VmState, seed: Rc<BigInt>) -> VmResult<()> {
    let params = ok!(st.cr.get_c7_params());
    let mut t1 = params.to_vec();
    if t1.len() <= SmcInfo::RANDSEED_IDX {
        t1.resize(SmcInfo::RANDSEED_IDX + 1, Stack::make_null());
    }
    t1[SmcInfo::RANDSEED_IDX] = seed;
    st.gas.try_consume_tuple_gas(t1.len() as u64)?;

    // get_c7_params already proved that c7 exists and holds a tuple
    let mut c7 = match &st.cr.c7 {
        Some(c7) => c7.as_ref().clone(),
        None => vm_bail!(ControlRegisterOutOfRange(7)),
    };
    c7[0] = Rc::new(t1);
    st.gas.try_consume_tuple_gas(c7.len() as u64)?;
    st.cr.c7 = Some(Rc::new(c7));
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use num_bigint::{BigInt, Sign};
    use sha2::{Digest, Sha512};
    use tonkit_types::cell::{CellBuilder, HashBytes};

    use crate::smc_info::SmcInfo;
    use crate::stack::{RcStackValue, StackValue};
    use crate::state::VmState;

    fn run_seeded(bytes: &[u8], seed: HashBytes, stack: Vec<RcStackValue>) -> VmState {
        let mut b = CellBuilder::new();
        b.store_raw(bytes, bytes.len() as u16 * 8).unwrap();
        let info = SmcInfo::default().with_rand_seed(seed);
        let mut vm = VmState::builder()
            .with_code(b.build().unwrap())
            .with_smc_info(&info)
            .with_stack(stack)
            .build();
        vm.run();
        vm
    }

    #[test]
    fn randu256_matches_seed_evolution() {
        let seed = HashBytes([1; 32]);
        let vm = run_seeded(&[0xf8, 0x10], seed, vec![]);

        let mut hasher = Sha512::new();
        hasher.update([1u8; 32]);
        let hash = hasher.finalize();
        let expected = BigInt::from_bytes_be(Sign::Plus, &hash[32..]);
        assert_eq!(
            vm.stack.items.last().unwrap().as_int(),
            Some(&expected)
        );
    }

    #[test]
    fn randu256_is_deterministic_per_seed() {
        let seed = HashBytes([7; 32]);
        let a = run_seeded(&[0xf8, 0x10], seed, vec![]);
        let b = run_seeded(&[0xf8, 0x10], seed, vec![]);
        assert_eq!(
            a.stack.items.last().unwrap().as_int(),
            b.stack.items.last().unwrap().as_int()
        );

        // consecutive draws differ
        let c = run_seeded(&[0xf8, 0x10, 0xf8, 0x10], seed, vec![]);
        let top = c.stack.items.last().unwrap().as_int().unwrap();
        let below = c.stack.items[c.stack.items.len() - 2].as_int().unwrap();
        assert_ne!(top, below);
    }

    #[test]
    fn rand_stays_below_bound() {
        // PUSHINT 10; RAND
        let vm = run_seeded(&[0x7a, 0xf8, 0x11], HashBytes([3; 32]), vec![]);
        let value = vm.stack.items.last().unwrap().as_int().unwrap();
        assert!(value >= &BigInt::from(0) && value < &BigInt::from(10));
    }

    #[test]
    fn setrand_replaces_seed() {
        // SETRAND; RANDU256 twice from the same explicit seed
        let run = || {
            run_seeded(
                &[0xf8, 0x14, 0xf8, 0x10],
                HashBytes([9; 32]),
                vec![Rc::new(BigInt::from(42))],
            )
        };
        let a = run();
        let b = run();
        assert_eq!(
            a.stack.items.last().unwrap().as_int(),
            b.stack.items.last().unwrap().as_int()
        );
    }
}
