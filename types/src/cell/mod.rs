use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use sha2::{Digest, Sha256};
use smallvec::SmallVec;

use crate::error::Error;

pub use self::builder::{make_cell, CellBuilder};
pub use self::slice::{CellSlice, CellSliceRange};

mod builder;
mod slice;

/// Maximum number of data bits a single cell can hold.
pub const MAX_BIT_LEN: u16 = 1023;
/// Maximum number of child references a single cell can hold.
pub const MAX_REF_COUNT: usize = 4;
/// Maximum cell tree depth accepted by the codec.
pub const MAX_SAFE_DEPTH: u16 = 2048;

/// A 256-bit hash (or any other 32-byte value keyed by it).
#[derive(Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct HashBytes(pub [u8; 32]);

impl HashBytes {
    pub const ZERO: Self = Self([0; 32]);

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    #[inline]
    pub fn as_array(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, Error> {
        match <[u8; 32]>::try_from(slice) {
            Ok(bytes) => Ok(Self(bytes)),
            Err(_) => Err(Error::InvalidData),
        }
    }
}

impl From<[u8; 32]> for HashBytes {
    #[inline]
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for HashBytes {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for HashBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl std::fmt::Debug for HashBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl FromStr for HashBytes {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        match hex::decode_to_slice(s, &mut bytes) {
            Ok(()) => Ok(Self(bytes)),
            Err(_) => Err(Error::InvalidData),
        }
    }
}

/// Cell kind tag. Ordinary cells carry plain payload; special (exotic)
/// cells encode pruned subtrees, library indirections and Merkle nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellType {
    Ordinary,
    PrunedBranch,
    LibraryReference,
    MerkleProof,
    MerkleUpdate,
}

impl CellType {
    pub const fn is_exotic(self) -> bool {
        !matches!(self, Self::Ordinary)
    }

    pub const fn is_pruned_branch(self) -> bool {
        matches!(self, Self::PrunedBranch)
    }

    pub const fn is_library(self) -> bool {
        matches!(self, Self::LibraryReference)
    }

    pub const fn is_merkle(self) -> bool {
        matches!(self, Self::MerkleProof | Self::MerkleUpdate)
    }

    const fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            1 => Self::PrunedBranch,
            2 => Self::LibraryReference,
            3 => Self::MerkleProof,
            4 => Self::MerkleUpdate,
            _ => return None,
        })
    }
}

/// Three-bit mask of non-trivial hash levels present in a cell.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct LevelMask(u8);

impl LevelMask {
    pub const EMPTY: Self = Self(0);

    pub const fn new(mask: u8) -> Self {
        Self(mask & 0b111)
    }

    #[inline]
    pub const fn to_byte(self) -> u8 {
        self.0
    }

    /// Highest level present in the mask.
    pub const fn level(self) -> u8 {
        8 - self.0.leading_zeros() as u8
    }

    /// Number of hashes stored for this mask (one per set bit plus the base).
    pub const fn hash_count(self) -> usize {
        self.0.count_ones() as usize + 1
    }

    /// Restricts the mask to levels strictly below `level`.
    pub const fn apply(self, level: u8) -> Self {
        Self(self.0 & !(!0u8 << level))
    }

    /// Index of the hash corresponding to `level` among the stored hashes.
    pub const fn hash_index(self, level: u8) -> usize {
        self.apply(level).0.count_ones() as usize
    }

    /// Shifts the mask down one level (Merkle cells hide one level).
    pub const fn virtualize(self) -> Self {
        Self(self.0 >> 1)
    }

    pub const fn contains(self, level: u8) -> bool {
        level == 0 || self.0 & (1 << (level - 1)) != 0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// The two descriptor bytes preceding cell payload in the canonical
/// representation: `d1 = refs + 8·exotic + 32·level_mask`,
/// `d2 = ⌊bits/8⌋ + ⌈bits/8⌉`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellDescriptor {
    pub d1: u8,
    pub d2: u8,
}

impl CellDescriptor {
    pub const fn new(d1: u8, d2: u8) -> Self {
        Self { d1, d2 }
    }

    pub fn compute(ref_count: u8, is_exotic: bool, level_mask: LevelMask, bit_len: u16) -> Self {
        let d1 = ref_count | ((is_exotic as u8) << 3) | (level_mask.to_byte() << 5);
        let d2 = ((bit_len / 8) + bit_len.div_ceil(8)) as u8;
        Self { d1, d2 }
    }

    #[inline]
    pub const fn reference_count(self) -> u8 {
        self.d1 & 0b111
    }

    #[inline]
    pub const fn is_exotic(self) -> bool {
        self.d1 & 0b1000 != 0
    }

    #[inline]
    pub const fn level_mask(self) -> LevelMask {
        LevelMask::new(self.d1 >> 5)
    }

    /// Number of payload bytes, including a partially filled one.
    #[inline]
    pub const fn byte_len(self) -> usize {
        ((self.d2 >> 1) + (self.d2 & 1)) as usize
    }

    /// Whether the last payload byte carries a completion tag.
    #[inline]
    pub const fn has_partial_byte(self) -> bool {
        self.d2 & 1 != 0
    }
}

/// Raw material for cell finalization: payload bits, children and the
/// exotic flag. Hashes and depths are computed by the finalizer.
pub struct CellParts<'a> {
    pub data: &'a [u8],
    pub bit_len: u16,
    pub references: SmallVec<[Cell; MAX_REF_COUNT]>,
    pub is_exotic: bool,
}

/// How a cell is (re)loaded through a [`CellContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Do not track gas, do not resolve.
    Noop,
    /// Track gas usage only.
    UseGas,
    /// Resolve library cells only.
    Resolve,
    /// Track gas and resolve library cells.
    Full,
}

impl LoadMode {
    #[inline]
    pub const fn use_gas(self) -> bool {
        matches!(self, Self::UseGas | Self::Full)
    }

    #[inline]
    pub const fn resolve(self) -> bool {
        matches!(self, Self::Resolve | Self::Full)
    }
}

/// Hooks invoked whenever a cell is built or loaded. The VM's gas consumer
/// implements this to meter cell work and to resolve library cells.
pub trait CellContext {
    fn finalize_cell(&mut self, parts: CellParts<'_>) -> Result<Cell, Error>;

    fn load_cell(&mut self, cell: Cell, mode: LoadMode) -> Result<Cell, Error>;
}

/// Context that builds cells without metering or library resolution.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyCellContext;

impl CellContext for EmptyCellContext {
    fn finalize_cell(&mut self, parts: CellParts<'_>) -> Result<Cell, Error> {
        Cell::finalize_parts(parts)
    }

    fn load_cell(&mut self, cell: Cell, _: LoadMode) -> Result<Cell, Error> {
        Ok(cell)
    }
}

struct CellInner {
    descriptor: CellDescriptor,
    cell_type: CellType,
    bit_len: u16,
    data: Vec<u8>,
    references: SmallVec<[Cell; MAX_REF_COUNT]>,
    // (hash, depth) per hash index of the level mask
    hashes: SmallVec<[(HashBytes, u16); 4]>,
}

/// An immutable, cheaply clonable node of a content-addressed cell DAG.
///
/// Equality and hashing go through the representation hash, never through
/// pointer identity; structurally identical cells are interchangeable.
#[derive(Clone)]
pub struct Cell(Arc<CellInner>);

/// A cell together with a cursor range over it.
pub type CellSliceParts = (Cell, CellSliceRange);

impl Cell {
    /// The canonical empty cell (zero bits, zero refs).
    pub fn empty_cell() -> Cell {
        static EMPTY: OnceLock<Cell> = OnceLock::new();
        EMPTY
            .get_or_init(|| {
                Cell::finalize_parts(CellParts {
                    data: &[],
                    bit_len: 0,
                    references: SmallVec::new(),
                    is_exotic: false,
                })
                .expect("empty cell is always valid")
            })
            .clone()
    }

    #[inline]
    pub fn descriptor(&self) -> CellDescriptor {
        self.0.descriptor
    }

    #[inline]
    pub fn cell_type(&self) -> CellType {
        self.0.cell_type
    }

    #[inline]
    pub fn is_exotic(&self) -> bool {
        self.0.cell_type.is_exotic()
    }

    #[inline]
    pub fn bit_len(&self) -> u16 {
        self.0.bit_len
    }

    /// Payload bytes with any unused low bits zeroed (no completion tag).
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.0.data
    }

    #[inline]
    pub fn reference_count(&self) -> u8 {
        self.0.references.len() as u8
    }

    #[inline]
    pub fn references(&self) -> &[Cell] {
        &self.0.references
    }

    pub fn reference(&self, index: u8) -> Option<&Cell> {
        self.0.references.get(index as usize)
    }

    pub fn reference_cloned(&self, index: u8) -> Option<Cell> {
        self.0.references.get(index as usize).cloned()
    }

    #[inline]
    pub fn level_mask(&self) -> LevelMask {
        self.0.descriptor.level_mask()
    }

    #[inline]
    pub fn level(&self) -> u8 {
        self.level_mask().level()
    }

    /// Hash of the cell at the given level (clamped to the cell's level).
    pub fn hash(&self, level: u8) -> &HashBytes {
        let index = self.level_mask().hash_index(level.min(3));
        let index = index.min(self.0.hashes.len() - 1);
        &self.0.hashes[index].0
    }

    /// Depth of the subtree at the given level.
    pub fn depth(&self, level: u8) -> u16 {
        let index = self.level_mask().hash_index(level.min(3));
        let index = index.min(self.0.hashes.len() - 1);
        self.0.hashes[index].1
    }

    /// Representation hash: the identity of this cell.
    #[inline]
    pub fn repr_hash(&self) -> &HashBytes {
        self.hash(3)
    }

    #[inline]
    pub fn repr_depth(&self) -> u16 {
        self.depth(3)
    }

    /// For library-reference cells: the hash of the indirected code cell.
    pub fn library_ref_hash(&self) -> Result<HashBytes, Error> {
        if self.0.cell_type != CellType::LibraryReference {
            return Err(Error::InvalidData);
        }
        HashBytes::from_slice(&self.0.data[1..33])
    }

    /// Read cursor over the whole payload; exotic cells are rejected since
    /// their payload is structural, not data.
    pub fn as_slice(&self) -> Result<CellSlice<'_>, Error> {
        if self.is_exotic() {
            return Err(Error::PrunedBranchAccess);
        }
        Ok(CellSliceRange::full(self).apply_unchecked(self))
    }

    /// Read cursor that also admits exotic payloads (Merkle traversal,
    /// message roots inside proofs).
    pub fn as_slice_allow_exotic(&self) -> CellSlice<'_> {
        CellSliceRange::full(self).apply_unchecked(self)
    }

    /// Parses the cell as a TL-B value.
    pub fn parse<'a, T: Load<'a>>(&'a self) -> Result<T, Error> {
        T::load_from(&mut ok!(self.as_slice()))
    }

    /// Canonical representation bytes used for hashing and BoC packing:
    /// both descriptors followed by payload with a completion tag.
    pub fn raw_data_with_descriptors(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.0.data.len());
        out.push(self.0.descriptor.d1);
        out.push(self.0.descriptor.d2);
        out.extend_from_slice(&self.0.data);
        if self.0.bit_len % 8 != 0 {
            // completion tag: a single 1 bit right after the payload
            let last = out.last_mut().expect("partial byte implies data");
            *last |= 1 << (7 - self.0.bit_len % 8);
        }
        out
    }

    pub(crate) fn finalize_parts(parts: CellParts<'_>) -> Result<Cell, Error> {
        let CellParts {
            data,
            bit_len,
            references,
            is_exotic,
        } = parts;

        if bit_len > MAX_BIT_LEN || references.len() > MAX_REF_COUNT {
            return Err(Error::CellOverflow);
        }
        let byte_len = bit_len.div_ceil(8) as usize;
        if data.len() < byte_len {
            return Err(Error::InvalidData);
        }

        let mut data = data[..byte_len].to_vec();
        if bit_len % 8 != 0 {
            // normalize: unused low bits are always zero
            let last = data.last_mut().expect("partial byte implies data");
            *last &= !(0xffu8 >> (bit_len % 8));
        }

        let (cell_type, level_mask) = ok!(classify(&data, bit_len, &references, is_exotic));

        let descriptor = CellDescriptor::compute(
            references.len() as u8,
            is_exotic,
            level_mask,
            bit_len,
        );

        let hashes = ok!(compute_hashes(
            cell_type, level_mask, descriptor, &data, bit_len, &references,
        ));

        Ok(Cell(Arc::new(CellInner {
            descriptor,
            cell_type,
            bit_len,
            data,
            references,
            hashes,
        })))
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0.as_ref(), other.0.as_ref()) || self.repr_hash() == other.repr_hash()
    }
}

impl Eq for Cell {}

impl std::hash::Hash for Cell {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.repr_hash().0.hash(state)
    }
}

impl std::fmt::Debug for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell")
            .field("repr_hash", self.repr_hash())
            .field("bit_len", &self.0.bit_len)
            .field("refs", &self.0.references.len())
            .field("type", &self.0.cell_type)
            .finish()
    }
}

/// Validates exotic layouts and derives the cell type and level mask.
fn classify(
    data: &[u8],
    bit_len: u16,
    references: &[Cell],
    is_exotic: bool,
) -> Result<(CellType, LevelMask), Error> {
    if !is_exotic {
        let mut mask = LevelMask::EMPTY;
        for child in references {
            mask = mask.union(child.level_mask());
        }
        return Ok((CellType::Ordinary, mask));
    }

    if bit_len < 8 {
        return Err(Error::InvalidData);
    }
    let Some(ty) = CellType::from_byte(data[0]) else {
        return Err(Error::InvalidData);
    };

    match ty {
        CellType::PrunedBranch => {
            if bit_len < 16 || !references.is_empty() {
                return Err(Error::InvalidData);
            }
            let mask = LevelMask::new(data[1]);
            let stored = mask.to_byte().count_ones() as u16;
            if mask == LevelMask::EMPTY || bit_len != 16 + stored * (256 + 16) {
                return Err(Error::InvalidData);
            }
            Ok((ty, mask))
        }
        CellType::LibraryReference => {
            if bit_len != 8 + 256 || !references.is_empty() {
                return Err(Error::InvalidData);
            }
            Ok((ty, LevelMask::EMPTY))
        }
        CellType::MerkleProof => {
            if bit_len != 8 + 256 + 16 || references.len() != 1 {
                return Err(Error::InvalidData);
            }
            Ok((ty, references[0].level_mask().virtualize()))
        }
        CellType::MerkleUpdate => {
            if bit_len != 8 + 2 * (256 + 16) || references.len() != 2 {
                return Err(Error::InvalidData);
            }
            let mask = references[0]
                .level_mask()
                .union(references[1].level_mask());
            Ok((ty, mask.virtualize()))
        }
        CellType::Ordinary => unreachable!(),
    }
}

fn compute_hashes(
    cell_type: CellType,
    level_mask: LevelMask,
    descriptor: CellDescriptor,
    data: &[u8],
    bit_len: u16,
    references: &[Cell],
) -> Result<SmallVec<[(HashBytes, u16); 4]>, Error> {
    let level = level_mask.level();
    let mut hashes = SmallVec::<[(HashBytes, u16); 4]>::new();

    if cell_type == CellType::PrunedBranch {
        // lower-level hashes/depths are stored verbatim in the payload
        let count = level_mask.to_byte().count_ones() as usize;
        let hashes_offset = 2;
        let depths_offset = hashes_offset + count * 32;
        for i in 0..count {
            let hash = ok!(HashBytes::from_slice(
                &data[hashes_offset + i * 32..hashes_offset + (i + 1) * 32]
            ));
            let depth = u16::from_be_bytes([
                data[depths_offset + i * 2],
                data[depths_offset + i * 2 + 1],
            ]);
            hashes.push((hash, depth));
        }
    }

    let computed_from = if cell_type == CellType::PrunedBranch {
        level
    } else {
        0
    };

    let mut prev_hash: Option<HashBytes> = None;
    for current in computed_from..=level {
        if !level_mask.contains(current) {
            continue;
        }

        // Merkle nodes hash their children one level higher.
        let child_level = if cell_type.is_merkle() {
            current + 1
        } else {
            current
        };

        let mut depth = 0u16;
        for child in references {
            let child_depth = child.depth(child_level);
            if child_depth >= MAX_SAFE_DEPTH {
                return Err(Error::DepthOverflow);
            }
            depth = depth.max(child_depth + 1);
        }

        let mut hasher = Sha256::new();
        match &prev_hash {
            // higher-level hashes replace the payload with the previous hash
            Some(prev) => {
                let d1 = (descriptor.d1 & 0b1111) | (level_mask.apply(current).to_byte() << 5);
                hasher.update([d1, 64]);
                hasher.update(prev.as_slice());
            }
            None => {
                let d1 = (descriptor.d1 & 0b1111)
                    | (level_mask.apply(current).to_byte() << 5);
                hasher.update([d1, descriptor.d2]);
                let byte_len = bit_len.div_ceil(8) as usize;
                if bit_len % 8 != 0 {
                    let mut tail = data[..byte_len].to_vec();
                    *tail.last_mut().expect("partial byte implies data") |=
                        1 << (7 - bit_len % 8);
                    hasher.update(&tail);
                } else {
                    hasher.update(&data[..byte_len]);
                }
            }
        }
        for child in references {
            hasher.update(child.depth(child_level).to_be_bytes());
        }
        for child in references {
            hasher.update(child.hash(child_level).as_slice());
        }

        let hash = HashBytes(hasher.finalize().into());
        prev_hash = Some(hash);
        hashes.push((hash, depth));
    }

    debug_assert!(!hashes.is_empty());
    Ok(hashes)
}

/// Serializes a value into cell builders.
pub trait Store {
    fn store_into(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error>;
}

/// Deserializes a value from a cell slice.
pub trait Load<'a>: Sized {
    fn load_from(slice: &mut CellSlice<'a>) -> Result<Self, Error>;
}

impl<T: Store + ?Sized> Store for &T {
    fn store_into(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        T::store_into(self, builder, context)
    }
}

impl Store for () {
    fn store_into(&self, _: &mut CellBuilder, _: &mut dyn CellContext) -> Result<(), Error> {
        Ok(())
    }
}

impl Load<'_> for () {
    fn load_from(_: &mut CellSlice<'_>) -> Result<Self, Error> {
        Ok(())
    }
}

impl Store for bool {
    fn store_into(&self, builder: &mut CellBuilder, _: &mut dyn CellContext) -> Result<(), Error> {
        builder.store_bit(*self)
    }
}

impl Load<'_> for bool {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        slice.load_bit()
    }
}

macro_rules! impl_primitive_store_load {
    ($($ty:ty => ($bits:literal, $store:ident, $load:ident)),*$(,)?) => {$(
        impl Store for $ty {
            fn store_into(
                &self,
                builder: &mut CellBuilder,
                _: &mut dyn CellContext,
            ) -> Result<(), Error> {
                builder.$store(*self)
            }
        }

        impl Load<'_> for $ty {
            fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
                slice.$load()
            }
        }
    )*};
}

impl_primitive_store_load! {
    u8 => (8, store_u8, load_u8),
    u16 => (16, store_u16, load_u16),
    u32 => (32, store_u32, load_u32),
    u64 => (64, store_u64, load_u64),
    u128 => (128, store_u128, load_u128),
}

impl Store for HashBytes {
    fn store_into(&self, builder: &mut CellBuilder, _: &mut dyn CellContext) -> Result<(), Error> {
        builder.store_u256(self)
    }
}

impl Load<'_> for HashBytes {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        slice.load_u256()
    }
}

/// A `Cell` value in a TL-B position means "stored as a reference".
impl Store for Cell {
    fn store_into(&self, builder: &mut CellBuilder, _: &mut dyn CellContext) -> Result<(), Error> {
        builder.store_reference(self.clone())
    }
}

impl Load<'_> for Cell {
    fn load_from(slice: &mut CellSlice<'_>) -> Result<Self, Error> {
        slice.load_reference_cloned()
    }
}

/// `Maybe X`: presence bit followed by the value.
impl<T: Store> Store for Option<T> {
    fn store_into(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        match self {
            Some(value) => {
                ok!(builder.store_bit_one());
                value.store_into(builder, context)
            }
            None => builder.store_bit_zero(),
        }
    }
}

impl<'a, T: Load<'a>> Load<'a> for Option<T> {
    fn load_from(slice: &mut CellSlice<'a>) -> Result<Self, Error> {
        Ok(match ok!(slice.load_bit()) {
            true => Some(ok!(T::load_from(slice))),
            false => None,
        })
    }
}

impl<A: Store, B: Store> Store for (A, B) {
    fn store_into(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        ok!(self.0.store_into(builder, context));
        self.1.store_into(builder, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cell_is_stable() {
        let cell = Cell::empty_cell();
        assert_eq!(cell.bit_len(), 0);
        assert_eq!(cell.reference_count(), 0);
        // well-known hash of the empty ordinary cell
        assert_eq!(
            cell.repr_hash().to_string(),
            "96a296d224f285c67bee93c30f8a309157f0daa35dc5b87e410b78630a09cfc7"
        );
    }

    #[test]
    fn level_mask_math() {
        let mask = LevelMask::new(0b101);
        assert_eq!(mask.level(), 3);
        assert_eq!(mask.hash_count(), 3);
        assert_eq!(mask.apply(1).to_byte(), 0b001);
        assert_eq!(mask.hash_index(3), 2);
        assert!(mask.contains(1) && !mask.contains(2) && mask.contains(3));
    }

    #[test]
    fn descriptor_round_trip() {
        let d = CellDescriptor::compute(3, false, LevelMask::EMPTY, 20);
        assert_eq!(d.reference_count(), 3);
        assert!(!d.is_exotic());
        assert_eq!(d.byte_len(), 3);
        assert!(d.has_partial_byte());
    }
}
