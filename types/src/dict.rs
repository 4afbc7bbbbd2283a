//! `HashmapE n X` dictionaries: binary Patricia trees over fixed-width keys.
//!
//! Every edge carries a label compressed with one of three encodings
//! (`hml_short`, `hml_long`, `hml_same`); the serializer always picks the
//! shortest one, which keeps the representation canonical and the root hash
//! stable across implementations.

use std::marker::PhantomData;

use crate::cell::{
    Cell, CellBuilder, CellContext, CellSlice, CellSliceParts, EmptyCellContext, HashBytes, Load,
    Store,
};
use crate::error::Error;

/// A fixed-width dictionary key.
pub trait DictKey: Sized {
    const BITS: u16;

    fn serialize_key(&self, builder: &mut CellBuilder) -> Result<(), Error>;

    fn deserialize_key(slice: &mut CellSlice<'_>) -> Result<Self, Error>;
}

macro_rules! impl_dict_key_uint {
    ($($ty:ty => $bits:literal),*$(,)?) => {$(
        impl DictKey for $ty {
            const BITS: u16 = $bits;

            fn serialize_key(&self, builder: &mut CellBuilder) -> Result<(), Error> {
                builder.store_uint(*self as u64, $bits)
            }

            fn deserialize_key(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
                Ok(ok!(slice.load_uint($bits)) as $ty)
            }
        }
    )*};
}

impl_dict_key_uint! {
    u8 => 8,
    u16 => 16,
    u32 => 32,
    u64 => 64,
}

impl DictKey for i32 {
    const BITS: u16 = 32;

    fn serialize_key(&self, builder: &mut CellBuilder) -> Result<(), Error> {
        builder.store_uint(*self as u32 as u64, 32)
    }

    fn deserialize_key(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        Ok(ok!(slice.load_uint(32)) as u32 as i32)
    }
}

impl DictKey for HashBytes {
    const BITS: u16 = 256;

    fn serialize_key(&self, builder: &mut CellBuilder) -> Result<(), Error> {
        builder.store_u256(self)
    }

    fn deserialize_key(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        slice.load_u256()
    }
}

/// Typed dictionary over an optional root cell.
pub struct Dict<K, V> {
    root: Option<Cell>,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> Default for Dict<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Clone for Dict<K, V> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            _marker: PhantomData,
        }
    }
}

impl<K, V> std::fmt::Debug for Dict<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dict").field("root", &self.root).finish()
    }
}

impl<K, V> PartialEq for Dict<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
    }
}

impl<K, V> Eq for Dict<K, V> {}

impl<K, V> Dict<K, V> {
    pub const fn new() -> Self {
        Self {
            root: None,
            _marker: PhantomData,
        }
    }

    pub const fn from_root(root: Option<Cell>) -> Self {
        Self {
            root,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub const fn root(&self) -> &Option<Cell> {
        &self.root
    }

    pub fn into_root(self) -> Option<Cell> {
        self.root
    }

    pub const fn is_empty(&self) -> bool {
        self.root.is_none()
    }
}

impl<K: DictKey, V> Dict<K, V> {
    pub fn get<'a>(&'a self, key: &K) -> Result<Option<V>, Error>
    where
        V: Load<'a>,
    {
        match ok!(self.get_raw(key)) {
            Some(mut slice) => Ok(Some(ok!(V::load_from(&mut slice)))),
            None => Ok(None),
        }
    }

    pub fn get_raw(&self, key: &K) -> Result<Option<CellSlice<'_>>, Error> {
        let key = ok!(build_dict_key(key));
        dict_get(self.root.as_ref(), K::BITS, ok!(key.as_slice()))
    }

    pub fn contains_key(&self, key: &K) -> Result<bool, Error> {
        Ok(ok!(self.get_raw(key)).is_some())
    }

    pub fn set(&mut self, key: &K, value: &V) -> Result<(), Error>
    where
        V: Store,
    {
        self.set_ext(key, value, &mut EmptyCellContext)
    }

    pub fn set_ext(
        &mut self,
        key: &K,
        value: &V,
        context: &mut dyn CellContext,
    ) -> Result<(), Error>
    where
        V: Store,
    {
        let key = ok!(build_dict_key(key));
        let mut builder = CellBuilder::new();
        ok!(value.store_into(&mut builder, context));
        let value = ok!(builder.build_ext(context));
        self.root = ok!(dict_insert(
            self.root.as_ref(),
            K::BITS,
            ok!(key.as_slice()),
            &ok!(value.as_slice()),
            context,
        ));
        Ok(())
    }

    pub fn remove(&mut self, key: &K) -> Result<bool, Error> {
        self.remove_ext(key, &mut EmptyCellContext)
    }

    pub fn remove_ext(&mut self, key: &K, context: &mut dyn CellContext) -> Result<bool, Error> {
        let key = ok!(build_dict_key(key));
        let (root, removed) = ok!(dict_remove(
            self.root.as_ref(),
            K::BITS,
            ok!(key.as_slice()),
            context,
        ));
        self.root = root;
        Ok(removed)
    }

    /// Iterates entries in ascending key order.
    pub fn iter(&self) -> DictIter<'_, K, V> {
        DictIter {
            inner: RawIter::new(self.root.as_ref(), K::BITS),
            _marker: PhantomData,
        }
    }
}

impl<K, V> Store for Dict<K, V> {
    fn store_into(&self, builder: &mut CellBuilder, _: &mut dyn CellContext) -> Result<(), Error> {
        match &self.root {
            Some(root) => {
                ok!(builder.store_bit_one());
                builder.store_reference(root.clone())
            }
            None => builder.store_bit_zero(),
        }
    }
}

impl<K, V> Load<'_> for Dict<K, V> {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        Ok(Self::from_root(match ok!(slice.load_bit()) {
            true => Some(ok!(slice.load_reference_cloned())),
            false => None,
        }))
    }
}

/// Untyped dictionary with an `N`-bit key, for callers that assemble keys
/// themselves.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RawDict<const N: u16>(Option<Cell>);

impl<const N: u16> RawDict<N> {
    pub const fn new() -> Self {
        Self(None)
    }

    pub const fn from_root(root: Option<Cell>) -> Self {
        Self(root)
    }

    pub const fn root(&self) -> &Option<Cell> {
        &self.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn get(&self, key: CellSlice<'_>) -> Result<Option<CellSlice<'_>>, Error> {
        dict_get(self.0.as_ref(), N, key)
    }

    pub fn set(
        &mut self,
        key: CellSlice<'_>,
        value: &CellSlice<'_>,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        self.0 = ok!(dict_insert(self.0.as_ref(), N, key, value, context));
        Ok(())
    }

    pub fn remove(
        &mut self,
        key: CellSlice<'_>,
        context: &mut dyn CellContext,
    ) -> Result<bool, Error> {
        let (root, removed) = ok!(dict_remove(self.0.as_ref(), N, key, context));
        self.0 = root;
        Ok(removed)
    }

    pub fn iter(&self) -> RawIter<'_> {
        RawIter::new(self.0.as_ref(), N)
    }
}

fn build_dict_key<K: DictKey>(key: &K) -> Result<Cell, Error> {
    let mut builder = CellBuilder::new();
    ok!(key.serialize_key(&mut builder));
    builder.build()
}

/// Looks up `key` in the tree rooted at `root`; the returned slice points
/// at the stored value bits.
pub fn dict_get<'a>(
    root: Option<&'a Cell>,
    key_bit_len: u16,
    mut key: CellSlice<'_>,
) -> Result<Option<CellSlice<'a>>, Error> {
    if key.size_bits() != key_bit_len {
        return Err(Error::InvalidData);
    }
    let Some(mut node) = root else {
        return Ok(None);
    };

    let mut n = key_bit_len;
    loop {
        let mut remaining = ok!(node.as_slice());
        let label = ok!(read_label(&mut remaining, n));
        let label_len = label.len();
        for i in 0..label_len {
            if ok!(label.bit(i)) != ok!(key.get_bit(i)) {
                return Ok(None);
            }
        }
        if !key.try_advance(label_len, 0) {
            return Err(Error::CellUnderflow);
        }
        n -= label_len;
        if n == 0 {
            return Ok(Some(remaining));
        }
        let branch = ok!(key.load_bit()) as u8;
        n -= 1;
        node = ok!(remaining.get_reference(branch));
    }
}

/// Like [`dict_get`], but returns the value together with the cell that
/// holds it, so the caller can keep the slice without borrowing the tree.
pub fn dict_get_owned(
    root: Option<&Cell>,
    key_bit_len: u16,
    mut key: CellSlice<'_>,
) -> Result<Option<CellSliceParts>, Error> {
    if key.size_bits() != key_bit_len {
        return Err(Error::InvalidData);
    }
    let Some(root) = root else {
        return Ok(None);
    };
    let mut node = root.clone();

    let mut n = key_bit_len;
    loop {
        let mut remaining = ok!(node.as_slice());
        let label = ok!(read_label(&mut remaining, n));
        let label_len = label.len();
        for i in 0..label_len {
            if ok!(label.bit(i)) != ok!(key.get_bit(i)) {
                return Ok(None);
            }
        }
        if !key.try_advance(label_len, 0) {
            return Err(Error::CellUnderflow);
        }
        n -= label_len;
        if n == 0 {
            let range = remaining.range();
            return Ok(Some((node, range)));
        }
        let branch = ok!(key.load_bit()) as u8;
        n -= 1;
        let child = ok!(remaining.get_reference_cloned(branch));
        node = child;
    }
}

/// Inserts or replaces `key -> value`, returning the new root.
pub fn dict_insert(
    root: Option<&Cell>,
    key_bit_len: u16,
    key: CellSlice<'_>,
    value: &CellSlice<'_>,
    context: &mut dyn CellContext,
) -> Result<Option<Cell>, Error> {
    if key.size_bits() != key_bit_len {
        return Err(Error::InvalidData);
    }
    Ok(Some(ok!(insert_impl(root, key, key_bit_len, value, context))))
}

fn insert_impl(
    node: Option<&Cell>,
    mut key: CellSlice<'_>,
    n: u16,
    value: &CellSlice<'_>,
    context: &mut dyn CellContext,
) -> Result<Cell, Error> {
    let Some(cell) = node else {
        return make_leaf(&key, n, value, context);
    };

    let mut remaining = ok!(cell.as_slice());
    let label = ok!(read_label(&mut remaining, n));
    let label_cell = ok!(label.build_cell());
    let label_cs = ok!(label_cell.as_slice());
    let lcp = key.longest_common_data_prefix(&label_cs);

    if lcp == label.len() {
        if lcp == n {
            // exact key, replace the leaf value
            return make_leaf(&key, n, value, context);
        }
        // the whole label matches, descend into a branch
        let prefix = key;
        if !key.try_advance(lcp, 0) {
            return Err(Error::CellUnderflow);
        }
        let branch = ok!(key.load_bit()) as u8;
        let child = ok!(remaining.get_reference(branch));
        let new_child = ok!(insert_impl(Some(child), key, n - lcp - 1, value, context));

        let mut prefix = prefix;
        ok!(prefix.only_first(lcp, 0));
        let mut builder = CellBuilder::new();
        ok!(store_label(&mut builder, &prefix, n));
        let other = ok!(remaining.get_reference_cloned(1 - branch));
        if branch == 0 {
            ok!(builder.store_reference(new_child));
            ok!(builder.store_reference(other));
        } else {
            ok!(builder.store_reference(other));
            ok!(builder.store_reference(new_child));
        }
        return builder.build_ext(context);
    }

    // split the edge at the first differing bit
    let mut common = key;
    ok!(common.only_first(lcp, 0));
    let old_bit = ok!(label.bit(lcp)) as u8;
    let mut key_tail = key;
    ok!(key_tail.skip_first(lcp, 0));
    let new_bit = ok!(key_tail.load_bit()) as u8;
    debug_assert_ne!(old_bit, new_bit);

    // the displaced subtree keeps its payload under a shortened label
    let mut old_label = CellBuilder::new();
    for i in lcp + 1..label.len() {
        ok!(old_label.store_bit(ok!(label.bit(i))));
    }
    let old_label_cell = ok!(old_label.build());
    let mut old_node = CellBuilder::new();
    ok!(store_label(
        &mut old_node,
        &ok!(old_label_cell.as_slice()),
        n - lcp - 1,
    ));
    ok!(old_node.store_slice(&remaining));
    let old_node = ok!(old_node.build_ext(context));

    let new_node = ok!(make_leaf(&key_tail, n - lcp - 1, value, context));

    let mut fork = CellBuilder::new();
    ok!(store_label(&mut fork, &common, n));
    if new_bit == 0 {
        ok!(fork.store_reference(new_node));
        ok!(fork.store_reference(old_node));
    } else {
        ok!(fork.store_reference(old_node));
        ok!(fork.store_reference(new_node));
    }
    fork.build_ext(context)
}

/// Removes `key`, returning the new root and whether the key was present.
pub fn dict_remove(
    root: Option<&Cell>,
    key_bit_len: u16,
    key: CellSlice<'_>,
    context: &mut dyn CellContext,
) -> Result<(Option<Cell>, bool), Error> {
    if key.size_bits() != key_bit_len {
        return Err(Error::InvalidData);
    }
    let Some(cell) = root else {
        return Ok((None, false));
    };
    match ok!(remove_impl(cell, key, key_bit_len, context)) {
        Some(new_root) => Ok((new_root, true)),
        None => Ok((root.cloned(), false)),
    }
}

// Outer `None` means the key was absent; inner `None` means the subtree
// became empty.
fn remove_impl(
    cell: &Cell,
    mut key: CellSlice<'_>,
    n: u16,
    context: &mut dyn CellContext,
) -> Result<Option<Option<Cell>>, Error> {
    let mut remaining = ok!(cell.as_slice());
    let label = ok!(read_label(&mut remaining, n));
    let label_cell = ok!(label.build_cell());
    let label_cs = ok!(label_cell.as_slice());
    let lcp = key.longest_common_data_prefix(&label_cs);

    if lcp < label.len() {
        return Ok(None);
    }
    if lcp == n {
        return Ok(Some(None));
    }

    let prefix = key;
    if !key.try_advance(lcp, 0) {
        return Err(Error::CellUnderflow);
    }
    let branch = ok!(key.load_bit()) as u8;
    let child = ok!(remaining.get_reference(branch));

    match ok!(remove_impl(child, key, n - lcp - 1, context)) {
        None => Ok(None),
        Some(Some(new_child)) => {
            let mut prefix = prefix;
            ok!(prefix.only_first(lcp, 0));
            let mut builder = CellBuilder::new();
            ok!(store_label(&mut builder, &prefix, n));
            let other = ok!(remaining.get_reference_cloned(1 - branch));
            if branch == 0 {
                ok!(builder.store_reference(new_child));
                ok!(builder.store_reference(other));
            } else {
                ok!(builder.store_reference(other));
                ok!(builder.store_reference(new_child));
            }
            Ok(Some(Some(ok!(builder.build_ext(context)))))
        }
        Some(None) => {
            // one branch disappeared, splice the sibling into this edge
            let sibling = ok!(remaining.get_reference(1 - branch));
            let mut sibling_cs = ok!(sibling.as_slice());
            let sibling_label = ok!(read_label(&mut sibling_cs, n - lcp - 1));

            let mut merged = CellBuilder::new();
            for i in 0..lcp {
                ok!(merged.store_bit(ok!(prefix.get_bit(i))));
            }
            ok!(merged.store_bit(branch == 0));
            for i in 0..sibling_label.len() {
                ok!(merged.store_bit(ok!(sibling_label.bit(i))));
            }
            let merged = ok!(merged.build());

            let mut builder = CellBuilder::new();
            ok!(store_label(&mut builder, &ok!(merged.as_slice()), n));
            ok!(builder.store_slice(&sibling_cs));
            Ok(Some(Some(ok!(builder.build_ext(context)))))
        }
    }
}

fn make_leaf(
    key: &CellSlice<'_>,
    n: u16,
    value: &CellSlice<'_>,
    context: &mut dyn CellContext,
) -> Result<Cell, Error> {
    debug_assert_eq!(key.size_bits(), n);
    let mut builder = CellBuilder::new();
    ok!(store_label(&mut builder, key, n));
    ok!(builder.store_slice(value));
    builder.build_ext(context)
}

enum Label<'a> {
    Slice(CellSlice<'a>),
    Same(bool, u16),
}

impl Label<'_> {
    fn len(&self) -> u16 {
        match self {
            Self::Slice(slice) => slice.size_bits(),
            Self::Same(_, len) => *len,
        }
    }

    fn bit(&self, index: u16) -> Result<bool, Error> {
        match self {
            Self::Slice(slice) => slice.get_bit(index),
            Self::Same(bit, len) => {
                if index < *len {
                    Ok(*bit)
                } else {
                    Err(Error::CellUnderflow)
                }
            }
        }
    }

    fn build_cell(&self) -> Result<Cell, Error> {
        let mut builder = CellBuilder::new();
        match self {
            Self::Slice(slice) => ok!(builder.store_slice_data(slice)),
            Self::Same(bit, len) => {
                for _ in 0..*len {
                    ok!(builder.store_bit(*bit));
                }
            }
        }
        builder.build()
    }
}

/// Number of bits needed to encode a label length for a key space of `n`.
const fn label_len_bits(n: u16) -> u16 {
    16 - n.leading_zeros() as u16
}

fn read_label<'a>(slice: &mut CellSlice<'a>, n: u16) -> Result<Label<'a>, Error> {
    if n == 0 {
        return Ok(Label::Same(false, 0));
    }
    if !ok!(slice.load_bit()) {
        // hml_short$0: unary length then the bits themselves
        let mut len = 0u16;
        while ok!(slice.load_bit()) {
            len += 1;
        }
        if len > n {
            return Err(Error::InvalidData);
        }
        let mut data = *slice;
        ok!(data.only_first(len, 0));
        ok!(slice.skip_first(len, 0));
        Ok(Label::Slice(data))
    } else if !ok!(slice.load_bit()) {
        // hml_long$10
        let len = ok!(slice.load_uint(label_len_bits(n))) as u16;
        if len > n {
            return Err(Error::InvalidData);
        }
        let mut data = *slice;
        ok!(data.only_first(len, 0));
        ok!(slice.skip_first(len, 0));
        Ok(Label::Slice(data))
    } else {
        // hml_same$11
        let bit = ok!(slice.load_bit());
        let len = ok!(slice.load_uint(label_len_bits(n))) as u16;
        if len > n {
            return Err(Error::InvalidData);
        }
        Ok(Label::Same(bit, len))
    }
}

fn store_label(builder: &mut CellBuilder, label: &CellSlice<'_>, n: u16) -> Result<(), Error> {
    let len = label.size_bits();
    debug_assert!(len <= n);
    let len_bits = label_len_bits(n);

    let mut all_same = len > 0;
    if all_same {
        let first = ok!(label.get_bit(0));
        for i in 1..len {
            if ok!(label.get_bit(i)) != first {
                all_same = false;
                break;
            }
        }
    }

    let short_len = 2 * len + 2;
    let long_len = 2 + len_bits + len;
    let same_len = 3 + len_bits;

    if all_same && len > 1 && same_len < short_len.min(long_len) {
        ok!(builder.store_small_uint(0b11, 2));
        ok!(builder.store_bit(ok!(label.get_bit(0))));
        builder.store_uint(len as u64, len_bits)
    } else if short_len <= long_len {
        ok!(builder.store_bit_zero());
        for _ in 0..len {
            ok!(builder.store_bit_one());
        }
        ok!(builder.store_bit_zero());
        builder.store_slice_data(label)
    } else {
        ok!(builder.store_small_uint(0b10, 2));
        ok!(builder.store_uint(len as u64, len_bits));
        builder.store_slice_data(label)
    }
}

/// Depth-first in-order traversal, smallest key first.
pub struct RawIter<'a> {
    // (node, remaining key space, accumulated key prefix)
    stack: Vec<(&'a Cell, u16, CellBuilder)>,
    broken: bool,
}

impl<'a> RawIter<'a> {
    fn new(root: Option<&'a Cell>, key_bit_len: u16) -> Self {
        let mut stack = Vec::new();
        if let Some(root) = root {
            stack.push((root, key_bit_len, CellBuilder::new()));
        }
        Self {
            stack,
            broken: false,
        }
    }
}

impl<'a> Iterator for RawIter<'a> {
    type Item = Result<(CellBuilder, CellSlice<'a>), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.broken {
            return None;
        }
        loop {
            let (node, n, mut key) = self.stack.pop()?;
            let result: Result<_, Error> = (|| {
                let mut remaining = ok!(node.as_slice());
                let label = ok!(read_label(&mut remaining, n));
                for i in 0..label.len() {
                    ok!(key.store_bit(ok!(label.bit(i))));
                }
                let n = n - label.len();
                if n == 0 {
                    return Ok(Some((key, remaining)));
                }
                let left = ok!(remaining.get_reference(0));
                let right = ok!(remaining.get_reference(1));
                let mut right_key = key.clone();
                ok!(right_key.store_bit_one());
                ok!(key.store_bit_zero());
                self.stack.push((right, n - 1, right_key));
                self.stack.push((left, n - 1, key));
                Ok(None)
            })();
            match result {
                Ok(Some(entry)) => return Some(Ok(entry)),
                Ok(None) => continue,
                Err(e) => {
                    self.broken = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Typed wrapper over [`RawIter`].
pub struct DictIter<'a, K, V> {
    inner: RawIter<'a>,
    _marker: PhantomData<(K, V)>,
}

impl<'a, K, V> Iterator for DictIter<'a, K, V>
where
    K: DictKey,
    V: Load<'a>,
{
    type Item = Result<(K, V), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = match self.inner.next()? {
            Ok(entry) => entry,
            Err(e) => return Some(Err(e)),
        };
        Some((|| {
            let (key, mut value) = entry;
            let key_cell = ok!(key.build());
            let key = ok!(K::deserialize_key(&mut ok!(key_cell.as_slice())));
            let value = ok!(V::load_from(&mut value));
            Ok((key, value))
        })())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_remove() -> anyhow::Result<()> {
        let mut dict = Dict::<u32, u64>::new();
        assert!(dict.is_empty());
        assert_eq!(dict.get(&1)?, None);

        dict.set(&1, &100)?;
        dict.set(&2, &200)?;
        dict.set(&0xdead_beef, &300)?;
        assert_eq!(dict.get(&1)?, Some(100));
        assert_eq!(dict.get(&2)?, Some(200));
        assert_eq!(dict.get(&0xdead_beef)?, Some(300));
        assert_eq!(dict.get(&3)?, None);

        dict.set(&2, &201)?;
        assert_eq!(dict.get(&2)?, Some(201));

        assert!(dict.remove(&2)?);
        assert!(!dict.remove(&2)?);
        assert_eq!(dict.get(&2)?, None);
        assert_eq!(dict.get(&1)?, Some(100));
        assert_eq!(dict.get(&0xdead_beef)?, Some(300));

        assert!(dict.remove(&1)?);
        assert!(dict.remove(&0xdead_beef)?);
        assert!(dict.is_empty());
        Ok(())
    }

    #[test]
    fn insertion_order_does_not_change_root_hash() -> anyhow::Result<()> {
        let entries = [(7u32, 1u64), (12, 2), (1024, 3), (0, 4), (u32::MAX, 5)];

        let mut forward = Dict::<u32, u64>::new();
        for (k, v) in entries {
            forward.set(&k, &v)?;
        }
        let mut backward = Dict::<u32, u64>::new();
        for (k, v) in entries.iter().rev() {
            backward.set(k, v)?;
        }
        assert_eq!(
            forward.root().as_ref().unwrap().repr_hash(),
            backward.root().as_ref().unwrap().repr_hash()
        );
        Ok(())
    }

    #[test]
    fn iteration_is_key_ordered() -> anyhow::Result<()> {
        let mut dict = Dict::<u32, u64>::new();
        for key in [42u32, 7, 100, 0, 55] {
            dict.set(&key, &(key as u64 * 10))?;
        }
        let entries = dict.iter().collect::<Result<Vec<_>, _>>()?;
        assert_eq!(
            entries,
            vec![(0, 0), (7, 70), (42, 420), (55, 550), (100, 1000)]
        );
        Ok(())
    }

    #[test]
    fn hash_keys() -> anyhow::Result<()> {
        let mut dict = Dict::<HashBytes, u32>::new();
        let a = HashBytes([0x11; 32]);
        let b = HashBytes([0x12; 32]);
        dict.set(&a, &1)?;
        dict.set(&b, &2)?;
        assert_eq!(dict.get(&a)?, Some(1));
        assert_eq!(dict.get(&b)?, Some(2));
        assert!(dict.remove(&a)?);
        assert_eq!(dict.get(&b)?, Some(2));
        Ok(())
    }

    #[test]
    fn raw_access_matches_typed() -> anyhow::Result<()> {
        let mut dict = Dict::<u32, u64>::new();
        dict.set(&5, &50)?;

        let mut key = CellBuilder::new();
        key.store_u32(5)?;
        let key = key.build()?;
        let raw = RawDict::<32>::from_root(dict.root().clone());
        let mut value = raw.get(key.as_slice()?)?.unwrap();
        assert_eq!(value.load_u64()?, 50);
        Ok(())
    }
}
