use std::rc::Rc;
use std::sync::Arc;

use ahash::HashSet;
use tonkit_types::cell::{
    Cell, CellContext, CellParts, CellType, EmptyCellContext, HashBytes, LoadMode,
};
use tonkit_types::dict::Dict;
use tonkit_types::error::Error;
use tonkit_types::models::SimpleLib;

/// Initial gas limits of a VM run.
#[derive(Debug, Clone, Copy)]
pub struct GasParams {
    /// Limit that `SETGASLIMIT` and `ACCEPT` can raise the current limit to.
    pub max: u64,
    /// Initial gas limit.
    pub limit: u64,
    /// Free gas for external message acceptance checks.
    pub credit: u64,
}

impl GasParams {
    const MAX_GAS: u64 = i64::MAX as u64;

    pub const fn unlimited() -> Self {
        Self {
            max: Self::MAX_GAS,
            limit: Self::MAX_GAS,
            credit: 0,
        }
    }

    pub const fn getter() -> Self {
        Self {
            max: 1_000_000,
            limit: 1_000_000,
            credit: 0,
        }
    }
}

impl Default for GasParams {
    #[inline]
    fn default() -> Self {
        Self::unlimited()
    }
}

/// Library cell resolver.
pub trait LibraryProvider {
    fn find(&self, library_hash: &HashBytes) -> Result<Option<Cell>, Error>;
}

impl<T: LibraryProvider + ?Sized> LibraryProvider for &'_ T {
    fn find(&self, library_hash: &HashBytes) -> Result<Option<Cell>, Error> {
        T::find(self, library_hash)
    }
}

impl<T: LibraryProvider + ?Sized> LibraryProvider for Box<T> {
    fn find(&self, library_hash: &HashBytes) -> Result<Option<Cell>, Error> {
        T::find(self, library_hash)
    }
}

impl<T: LibraryProvider + ?Sized> LibraryProvider for Rc<T> {
    fn find(&self, library_hash: &HashBytes) -> Result<Option<Cell>, Error> {
        T::find(self, library_hash)
    }
}

impl<T: LibraryProvider + ?Sized> LibraryProvider for Arc<T> {
    fn find(&self, library_hash: &HashBytes) -> Result<Option<Cell>, Error> {
        T::find(self, library_hash)
    }
}

/// Provider with no libraries at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLibraries;

impl LibraryProvider for NoLibraries {
    #[inline]
    fn find(&self, _: &HashBytes) -> Result<Option<Cell>, Error> {
        Ok(None)
    }
}

impl LibraryProvider for Dict<HashBytes, SimpleLib> {
    fn find(&self, library_hash: &HashBytes) -> Result<Option<Cell>, Error> {
        Ok(ok!(self.get(library_hash)).map(|lib| lib.root))
    }
}

impl LibraryProvider for Vec<Dict<HashBytes, SimpleLib>> {
    fn find(&self, library_hash: &HashBytes) -> Result<Option<Cell>, Error> {
        for dict in self {
            if let Some(lib) = ok!(dict.get(library_hash)) {
                return Ok(Some(lib.root));
            }
        }
        Ok(None)
    }
}

impl<S> LibraryProvider for std::collections::HashMap<HashBytes, Cell, S>
where
    S: std::hash::BuildHasher,
{
    fn find(&self, library_hash: &HashBytes) -> Result<Option<Cell>, Error> {
        Ok(self.get(library_hash).cloned())
    }
}

/// Gas tracking context.
pub struct GasConsumer {
    gas_max: u64,
    gas_limit: u64,
    gas_credit: u64,
    gas_remaining: u64,
    gas_base: u64,

    libraries: Box<dyn LibraryProvider>,
    loaded_cells: HashSet<HashBytes>,
    missing_library: Option<HashBytes>,
    chksgn_counter: u64,
}

impl GasConsumer {
    pub const BUILD_CELL_GAS: u64 = 500;
    pub const NEW_CELL_GAS: u64 = 100;
    pub const OLD_CELL_GAS: u64 = 25;

    pub const FREE_STACK_DEPTH: u64 = 32;
    pub const FREE_SIGNATURE_CHECKS: u64 = 10;

    pub const INSTR_GAS_PRICE: u64 = 10;
    pub const STACK_VALUE_GAS_PRICE: u64 = 1;
    pub const TUPLE_ENTRY_GAS_PRICE: u64 = 1;
    pub const HASH_EXT_ENTRY_GAS_PRICE: u64 = 1;
    pub const CHK_SGN_GAS_PRICE: u64 = 4000;
    pub const IMPLICIT_JMPREF_GAS_PRICE: u64 = 10;
    pub const IMPLICIT_RET_GAS_PRICE: u64 = 5;
    pub const EXCEPTION_GAS_PRICE: u64 = 50;

    pub fn new(params: GasParams) -> Self {
        Self::with_libraries(params, Box::new(NoLibraries))
    }

    pub fn with_libraries(params: GasParams, libraries: Box<dyn LibraryProvider>) -> Self {
        let gas_remaining = params.limit.saturating_add(params.credit);
        Self {
            gas_max: params.max,
            gas_limit: params.limit,
            gas_credit: params.credit,
            gas_remaining,
            gas_base: gas_remaining,
            libraries,
            loaded_cells: Default::default(),
            missing_library: None,
            chksgn_counter: 0,
        }
    }

    pub fn try_consume_instr_gas(&mut self, total_bit_len: u16) -> Result<(), Error> {
        self.try_consume(Self::INSTR_GAS_PRICE + total_bit_len as u64)
    }

    pub fn try_consume_exception_gas(&mut self) -> Result<(), Error> {
        self.try_consume(Self::EXCEPTION_GAS_PRICE)
    }

    pub fn try_consume_implicit_jmpref_gas(&mut self) -> Result<(), Error> {
        self.try_consume(Self::IMPLICIT_JMPREF_GAS_PRICE)
    }

    pub fn try_consume_implicit_ret_gas(&mut self) -> Result<(), Error> {
        self.try_consume(Self::IMPLICIT_RET_GAS_PRICE)
    }

    pub fn try_consume_stack_gas(&mut self, stack: Option<&crate::stack::Stack>) -> Result<(), Error> {
        if let Some(stack) = stack {
            self.try_consume_stack_depth_gas(stack.depth() as u64)?;
        }
        Ok(())
    }

    pub fn try_consume_tuple_gas(&mut self, tuple_len: u64) -> Result<(), Error> {
        self.try_consume(tuple_len * Self::TUPLE_ENTRY_GAS_PRICE)
    }

    pub fn try_consume_stack_depth_gas(&mut self, depth: u64) -> Result<(), Error> {
        self.try_consume(
            depth.saturating_sub(Self::FREE_STACK_DEPTH) * Self::STACK_VALUE_GAS_PRICE,
        )
    }

    pub fn try_consume_check_signature_gas(&mut self) -> Result<(), Error> {
        self.chksgn_counter += 1;
        if self.chksgn_counter > Self::FREE_SIGNATURE_CHECKS {
            self.try_consume(Self::CHK_SGN_GAS_PRICE)?;
        }
        Ok(())
    }

    pub fn try_consume(&mut self, amount: u64) -> Result<(), Error> {
        if let Some(remaining) = self.gas_remaining.checked_sub(amount) {
            self.gas_remaining = remaining;
            Ok(())
        } else {
            self.gas_remaining = 0;
            Err(Error::Cancelled)
        }
    }

    pub fn gas_consumed(&self) -> u64 {
        self.gas_base - self.gas_remaining
    }

    pub fn gas_remaining(&self) -> u64 {
        self.gas_remaining
    }

    pub fn gas_credit(&self) -> u64 {
        self.gas_credit
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    pub fn gas_max(&self) -> u64 {
        self.gas_max
    }

    /// Sets a new gas limit, dropping the remaining gas credit.
    pub fn set_limit(&mut self, limit: u64) {
        let limit = limit.min(self.gas_max);
        let consumed = self.gas_consumed();
        self.gas_limit = limit;
        self.gas_credit = 0;
        self.gas_remaining = limit.saturating_sub(consumed.min(limit));

        // NOTE: keep `gas_consumed` stable across the limit change
        self.gas_base = self.gas_remaining + consumed;
    }

    pub fn missing_library(&self) -> Option<&HashBytes> {
        self.missing_library.as_ref()
    }

    pub fn libraries(&self) -> &dyn LibraryProvider {
        self.libraries.as_ref()
    }

    fn resolve_library(&mut self, cell: &Cell) -> Result<Cell, Error> {
        let library_hash = ok!(cell.library_ref_hash());
        match ok!(self.libraries.find(&library_hash)) {
            Some(cell) => {
                if cell.repr_hash() == &library_hash {
                    Ok(cell)
                } else {
                    self.missing_library = Some(library_hash);
                    Err(Error::LibraryNotFound(library_hash))
                }
            }
            None => {
                self.missing_library = Some(library_hash);
                Err(Error::LibraryNotFound(library_hash))
            }
        }
    }
}

impl CellContext for GasConsumer {
    fn finalize_cell(&mut self, parts: CellParts<'_>) -> Result<Cell, Error> {
        ok!(self.try_consume(Self::BUILD_CELL_GAS));
        EmptyCellContext.finalize_cell(parts)
    }

    fn load_cell(&mut self, mut cell: Cell, mode: LoadMode) -> Result<Cell, Error> {
        // A cell may resolve into a library cell again, but only one
        // level of indirection is allowed.
        for _ in 0..2 {
            if mode.use_gas() {
                let gas = if self.loaded_cells.insert(*cell.repr_hash()) {
                    Self::NEW_CELL_GAS
                } else {
                    Self::OLD_CELL_GAS
                };
                ok!(self.try_consume(gas));
            }

            if mode.resolve() && cell.cell_type() == CellType::LibraryReference {
                cell = ok!(self.resolve_library(&cell));
                continue;
            }
            return Ok(cell);
        }
        Err(Error::CellUnderflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_until_exhausted() {
        let mut gas = GasConsumer::new(GasParams {
            max: 1000,
            limit: 100,
            credit: 0,
        });
        gas.try_consume(60).unwrap();
        assert_eq!(gas.gas_consumed(), 60);
        assert!(matches!(gas.try_consume(50), Err(Error::Cancelled)));
    }

    #[test]
    fn set_limit_drops_credit() {
        let mut gas = GasConsumer::new(GasParams {
            max: 10_000,
            limit: 100,
            credit: 50,
        });
        gas.try_consume(30).unwrap();
        gas.set_limit(1000);
        assert_eq!(gas.gas_credit(), 0);
        assert_eq!(gas.gas_consumed(), 30);
        assert_eq!(gas.gas_remaining(), 970);
    }

    #[test]
    fn set_limit_respects_max() {
        let mut gas = GasConsumer::new(GasParams {
            max: 500,
            limit: 100,
            credit: 0,
        });
        gas.set_limit(u64::MAX);
        assert_eq!(gas.gas_limit(), 500);
        assert_eq!(gas.gas_remaining(), 500);
    }

    #[test]
    fn cell_loads_are_metered() {
        let mut gas = GasConsumer::new(GasParams::getter());
        let cell = Cell::empty_cell();
        gas.load_cell(cell.clone(), LoadMode::Full).unwrap();
        assert_eq!(gas.gas_consumed(), GasConsumer::NEW_CELL_GAS);
        gas.load_cell(cell, LoadMode::Full).unwrap();
        assert_eq!(
            gas.gas_consumed(),
            GasConsumer::NEW_CELL_GAS + GasConsumer::OLD_CELL_GAS
        );
    }

    fn make_library_cell(hash: &HashBytes) -> Cell {
        let mut b = tonkit_types::cell::CellBuilder::new();
        b.set_exotic(true);
        // library cell layout: type byte 0x02 followed by the target hash
        b.store_u8(2).unwrap();
        b.store_u256(hash).unwrap();
        b.build().unwrap()
    }

    #[test]
    fn missing_library_is_recorded() {
        let mut gas = GasConsumer::new(GasParams::getter());
        assert!(gas.missing_library().is_none());

        let hash = HashBytes([0x42; 32]);
        let cell = make_library_cell(&hash);
        assert!(matches!(
            gas.load_cell(cell, LoadMode::Full),
            Err(Error::LibraryNotFound(_))
        ));
        assert_eq!(gas.missing_library(), Some(&hash));
    }

    #[test]
    fn library_cells_resolve_through_the_provider() {
        let mut code = tonkit_types::cell::CellBuilder::new();
        code.store_u8(0x72).unwrap();
        let code = code.build().unwrap();

        let mut libraries = ahash::HashMap::default();
        libraries.insert(*code.repr_hash(), code.clone());

        let mut gas =
            GasConsumer::with_libraries(GasParams::getter(), Box::new(libraries));
        let cell = make_library_cell(code.repr_hash());
        let resolved = gas.load_cell(cell, LoadMode::Full).unwrap();
        assert_eq!(resolved, code);
    }
}
