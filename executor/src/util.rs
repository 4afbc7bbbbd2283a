use ahash::HashSet;
use tonkit_types::cell::{Cell, CellSlice, HashBytes};
use tonkit_types::num::{VarUint24, VarUint56};

/// Aggregated size of a cell tree with duplicates counted once.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CellStats {
    pub bit_count: u64,
    pub cell_count: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct StorageStatLimits {
    pub bit_count: u32,
    pub cell_count: u32,
}

/// Storage stat counter which deduplicates cells across multiple roots.
pub struct ExtStorageStat {
    visited: HashSet<HashBytes>,
    limits: StorageStatLimits,
    stats: CellStats,
}

impl ExtStorageStat {
    pub fn with_limits(limits: StorageStatLimits) -> Self {
        Self {
            visited: HashSet::default(),
            limits,
            stats: CellStats::default(),
        }
    }

    /// Computes stats for all cells referenced by the slice itself.
    pub fn compute_for_slice(
        slice: &CellSlice<'_>,
        limits: StorageStatLimits,
    ) -> Option<CellStats> {
        let mut this = Self::with_limits(limits);
        for idx in 0..slice.size_refs() {
            let cell = slice.get_reference(idx).ok()?;
            if !this.add_cell(cell) {
                return None;
            }
        }
        Some(this.stats)
    }

    pub fn stats(&self) -> CellStats {
        self.stats
    }

    /// Adds a subtree to the stats. Returns `false` as soon as the limits
    /// are exceeded, leaving the partial counters in place.
    pub fn add_cell(&mut self, cell: &Cell) -> bool {
        if !self.visited.insert(*cell.repr_hash()) {
            return true;
        }

        self.stats.cell_count += 1;
        self.stats.bit_count += cell.bit_len() as u64;

        if self.stats.bit_count > self.limits.bit_count as u64
            || self.stats.cell_count > self.limits.cell_count as u64
        {
            return false;
        }

        for child in cell.references() {
            if !self.add_cell(child) {
                return false;
            }
        }
        true
    }
}

pub fn new_varuint24_truncate(value: u64) -> VarUint24 {
    VarUint24::new(std::cmp::min(value, (1 << 24) - 1) as u32)
}

pub fn new_varuint56_truncate(value: u64) -> VarUint56 {
    VarUint56::new(std::cmp::min(value, (1 << 56) - 1))
}

#[cfg(test)]
mod tests {
    use tonkit_types::cell::CellBuilder;

    use super::*;

    #[test]
    fn shared_subtrees_are_counted_once() {
        let mut b = CellBuilder::new();
        b.store_u32(0xdead_beef).unwrap();
        let leaf = b.build().unwrap();

        let mut b = CellBuilder::new();
        b.store_u8(1).unwrap();
        b.store_reference(leaf.clone()).unwrap();
        b.store_reference(leaf).unwrap();
        let root = b.build().unwrap();

        let mut stat = ExtStorageStat::with_limits(StorageStatLimits {
            bit_count: 1 << 20,
            cell_count: 1 << 10,
        });
        assert!(stat.add_cell(&root));
        assert_eq!(stat.stats().cell_count, 2);
        assert_eq!(stat.stats().bit_count, 8 + 32);
    }

    #[test]
    fn limits_stop_the_walk() {
        let mut cell = CellBuilder::new().build().unwrap();
        for i in 0..10u8 {
            let mut b = CellBuilder::new();
            b.store_u8(i).unwrap();
            b.store_reference(cell).unwrap();
            cell = b.build().unwrap();
        }

        let mut stat = ExtStorageStat::with_limits(StorageStatLimits {
            bit_count: 1 << 20,
            cell_count: 5,
        });
        assert!(!stat.add_cell(&cell));
    }

    #[test]
    fn varuint_truncation() {
        assert_eq!(new_varuint24_truncate(u64::MAX).into_inner(), (1 << 24) - 1);
        assert_eq!(new_varuint24_truncate(7).into_inner(), 7);
        assert_eq!(new_varuint56_truncate(u64::MAX).into_inner(), (1 << 56) - 1);
    }
}
