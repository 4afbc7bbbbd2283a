use std::rc::Rc;

use anyhow::Result;
use num_bigint::{BigInt, Sign};
use sha2::{Digest, Sha256};
use tonkit_types::cell::CellBuilder;
use tonkit_types::error::Error;

use crate::dispatch::Opcodes;
use crate::error::VmResult;
use crate::state::VmState;

pub fn register(t: &mut Opcodes) -> Result<()> {
    t.add_simple(0xf900, 16, exec_hash_cu)?;
    t.add_simple(0xf901, 16, exec_hash_su)?;
    t.add_simple(0xf902, 16, exec_sha256u)?;
    t.add_simple(0xf910, 16, exec_check_signature_uint)?;
    t.add_simple(0xf911, 16, exec_check_signature_slice)?;
    Ok(())
}

fn exec_hash_cu(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute HASHCU");
    let stack = Rc::make_mut(&mut st.stack);
    let cell = ok!(stack.pop_cell());
    let hash = BigInt::from_bytes_be(Sign::Plus, cell.repr_hash().as_slice());
    ok!(stack.push_int(hash));
    Ok(0)
}

fn exec_hash_su(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute HASHSU");
    let cs = ok!(Rc::make_mut(&mut st.stack).pop_slice());

    let mut b = CellBuilder::new();
    b.store_slice(&cs.apply()?)?;
    let cell = b.build_ext(&mut st.gas)?;

    let hash = BigInt::from_bytes_be(Sign::Plus, cell.repr_hash().as_slice());
    ok!(Rc::make_mut(&mut st.stack).push_int(hash));
    Ok(0)
}

fn exec_sha256u(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute SHA256U");
    let stack = Rc::make_mut(&mut st.stack);
    let cs = ok!(stack.pop_slice());
    let mut slice = cs.apply()?;

    let bits = slice.size_bits();
    if bits % 8 != 0 {
        return Err(Error::CellUnderflow.into());
    }
    let mut buffer = [0u8; 128];
    let data = slice.load_raw(&mut buffer, bits)?;

    let hash = Sha256::digest(data);
    ok!(stack.push_int(BigInt::from_bytes_be(Sign::Plus, &hash)));
    Ok(0)
}

fn exec_check_signature_uint(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute CHKSIGNU");
    check_signature_common(st, false)
}

fn exec_check_signature_slice(st: &mut VmState) -> VmResult<i32> {
    vm_log!(st, "execute CHKSIGNS");
    check_signature_common(st, true)
}

fn check_signature_common(st: &mut VmState, from_slice: bool) -> VmResult<i32> {
    let stack = Rc::make_mut(&mut st.stack);
    let key_int = ok!(stack.pop_int());
    let signature_cs = ok!(stack.pop_slice());

    let mut data = [0u8; 128];
    let data_len;
    if from_slice {
        let cs = ok!(stack.pop_slice());
        let mut slice = cs.apply()?;
        let bits = slice.size_bits();
        if bits % 8 != 0 {
            return Err(Error::CellUnderflow.into());
        }
        data_len = (bits / 8) as usize;
        slice.load_raw(&mut data, bits)?;
    } else {
        let hash_int = ok!(stack.pop_int());
        data_len = 32;
        data[..32].copy_from_slice(&ok!(int_to_hash_bytes(&hash_int)));
    }

    let mut signature = [0u8; 64];
    let mut signature_slice = signature_cs.apply()?;
    signature_slice.load_raw(&mut signature, 512)?;

    let key_bytes = ok!(int_to_hash_bytes(&key_int));

    st.gas.try_consume_check_signature_gas()?;
    let valid = if st.modifiers.chksig_always_succeed {
        true
    } else {
        let Some(key) = everscale_crypto::ed25519::PublicKey::from_bytes(key_bytes) else {
            vm_bail!(Fatal("failed to construct ed25519 public key"));
        };
        key.verify_raw(&data[..data_len], &signature)
    };
    ok!(Rc::make_mut(&mut st.stack).push_bool(valid));
    Ok(0)
}

/// Encodes a non-negative integer as 32 big endian bytes.
fn int_to_hash_bytes(int: &BigInt) -> VmResult<[u8; 32]> {
    let (sign, bytes) = int.to_bytes_be();
    vm_ensure!(sign != Sign::Minus && bytes.len() <= 32, IntegerOverflow);
    let mut buf = [0u8; 32];
    buf[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use num_bigint::{BigInt, Sign};
    use sha2::{Digest, Sha256};
    use tonkit_types::cell::CellBuilder;

    use crate::stack::{RcStackValue, StackValue};
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

    fn slice_of(bytes: &[u8]) -> Rc<OwnedCellSlice> {
        let mut b = CellBuilder::new();
        b.store_raw(bytes, bytes.len() as u16 * 8).unwrap();
        Rc::new(OwnedCellSlice::new(b.build().unwrap()))
    }

    #[test]
    fn hashcu_matches_repr_hash() {
        let mut b = CellBuilder::new();
        b.store_u32(0x12345678).unwrap();
        let cell = b.build().unwrap();
        let expected = BigInt::from_bytes_be(Sign::Plus, cell.repr_hash().as_slice());

        let vm = run(&[0xf9, 0x00], vec![Rc::new(cell)]);
        assert_eq!(vm.stack.items.last().unwrap().as_int(), Some(&expected));
    }

    #[test]
    fn hashsu_hashes_the_rebuilt_cell() {
        let mut b = CellBuilder::new();
        b.store_u32(0xcafebabe).unwrap();
        let cell = b.build().unwrap();
        let expected = BigInt::from_bytes_be(Sign::Plus, cell.repr_hash().as_slice());

        let vm = run(&[0xf9, 0x01], vec![slice_of(&[0xca, 0xfe, 0xba, 0xbe])]);
        assert_eq!(vm.stack.items.last().unwrap().as_int(), Some(&expected));
    }

    #[test]
    fn sha256u_matches_direct_digest() {
        let data = b"hello";
        let expected = BigInt::from_bytes_be(Sign::Plus, &Sha256::digest(data));

        let vm = run(&[0xf9, 0x02], vec![slice_of(data)]);
        assert_eq!(vm.stack.items.last().unwrap().as_int(), Some(&expected));
    }

    #[test]
    fn chksigns_accepts_a_valid_signature() {
        // ed25519 test vector with an empty message
        let key = hex::decode("d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a")
            .unwrap();
        let signature = hex::decode(
            "e5564300c360ac729086e2cc806e828a84877f1eb8e5d974d873e06522490155\
             5fb8821590a33bacc61e39701cf9b46bd25bf5f0595bbe24655141438e7a100b",
        )
        .unwrap();

        let vm = run(
            &[0xf9, 0x11],
            vec![
                slice_of(&[]),
                slice_of(&signature),
                Rc::new(BigInt::from_bytes_be(Sign::Plus, &key)),
            ],
        );
        assert_eq!(
            vm.stack.items.last().unwrap().as_int(),
            Some(&BigInt::from(-1))
        );
    }

    #[test]
    fn chksigns_rejects_a_tampered_signature() {
        let key = hex::decode("d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a")
            .unwrap();
        let mut signature = hex::decode(
            "e5564300c360ac729086e2cc806e828a84877f1eb8e5d974d873e06522490155\
             5fb8821590a33bacc61e39701cf9b46bd25bf5f0595bbe24655141438e7a100b",
        )
        .unwrap();
        signature[10] ^= 0xff;

        let vm = run(
            &[0xf9, 0x11],
            vec![
                slice_of(&[]),
                slice_of(&signature),
                Rc::new(BigInt::from_bytes_be(Sign::Plus, &key)),
            ],
        );
        assert_eq!(
            vm.stack.items.last().unwrap().as_int(),
            Some(&BigInt::from(0))
        );
    }

    #[test]
    fn chksig_always_succeed_skips_verification() {
        use crate::state::BehaviourModifiers;

        let mut b = CellBuilder::new();
        b.store_u16(0xf911).unwrap();
        let mut vm = VmState::builder()
            .with_code(b.build().unwrap())
            .with_stack(vec![
                slice_of(&[]),
                slice_of(&[0u8; 64]),
                Rc::new(BigInt::from_bytes_be(Sign::Plus, &[7u8; 32])),
            ])
            .with_modifiers(BehaviourModifiers {
                chksig_always_succeed: true,
            })
            .build();
        vm.run();
        assert_eq!(
            vm.stack.items.last().unwrap().as_int(),
            Some(&BigInt::from(-1))
        );
    }

    #[test]
    fn chksignu_rejects_a_wrong_hash() {
        let key = hex::decode("d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a")
            .unwrap();
        let signature = hex::decode(
            "e5564300c360ac729086e2cc806e828a84877f1eb8e5d974d873e06522490155\
             5fb8821590a33bacc61e39701cf9b46bd25bf5f0595bbe24655141438e7a100b",
        )
        .unwrap();

        let vm = run(
            &[0xf9, 0x10],
            vec![
                Rc::new(BigInt::from(123)),
                slice_of(&signature),
                Rc::new(BigInt::from_bytes_be(Sign::Plus, &key)),
            ],
        );
        assert_eq!(
            vm.stack.items.last().unwrap().as_int(),
            Some(&BigInt::from(0))
        );
    }
}
