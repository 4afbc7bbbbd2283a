use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};
use tonkit_types::cell::{
    Cell, CellBuilder, CellContext, CellSlice, CellSliceRange, LoadMode, Store,
};
use tonkit_types::error::Error;

use crate::cont::RcCont;
use crate::error::{VmError, VmResult};
use crate::util::{ensure_empty_slice, store_int_to_builder, OwnedCellSlice};

pub type Tuple = Vec<RcStackValue>;
pub type RcStackValue = Rc<dyn StackValue>;

#[derive(Default, Clone)]
pub struct Stack {
    pub items: Vec<RcStackValue>,
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.display_dump(), f)
    }
}

impl Stack {
    pub fn with_items(items: Vec<RcStackValue>) -> Self {
        Self { items }
    }

    pub fn make_null() -> RcStackValue {
        thread_local! {
            static NULL: RcStackValue = Rc::new(());
        }
        NULL.with(Rc::clone)
    }

    pub fn make_nan() -> RcStackValue {
        thread_local! {
            static NAN: RcStackValue = Rc::new(NaN);
        }
        NAN.with(Rc::clone)
    }

    pub fn make_zero() -> RcStackValue {
        thread_local! {
            static ZERO: RcStackValue = Rc::new(BigInt::zero());
        }
        ZERO.with(Rc::clone)
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.items.len()
    }

    pub fn push<T: StackValue + 'static>(&mut self, item: T) -> VmResult<()> {
        self.push_raw(Rc::new(item))
    }

    pub fn push_raw(&mut self, item: RcStackValue) -> VmResult<()> {
        self.items.push(item);
        Ok(())
    }

    pub fn push_null(&mut self) -> VmResult<()> {
        self.push_raw(Self::make_null())
    }

    pub fn push_nan(&mut self) -> VmResult<()> {
        self.push_raw(Self::make_nan())
    }

    pub fn push_bool(&mut self, value: bool) -> VmResult<()> {
        // TVM true is -1
        self.push_int(if value { -1 } else { 0 })
    }

    pub fn push_int<T: Into<BigInt>>(&mut self, value: T) -> VmResult<()> {
        self.push(value.into())
    }

    pub fn push_int_or_nan(&mut self, value: Option<BigInt>) -> VmResult<()> {
        match value {
            Some(value) => self.push(value),
            None => self.push_nan(),
        }
    }

    pub fn push_opt<T: StackValue + 'static>(&mut self, value: Option<T>) -> VmResult<()> {
        match value {
            Some(value) => self.push(value),
            None => self.push_null(),
        }
    }

    pub fn push_opt_raw(&mut self, value: Option<RcStackValue>) -> VmResult<()> {
        match value {
            Some(value) => self.push_raw(value),
            None => self.push_null(),
        }
    }

    /// Clones the item at depth `idx` (`0` is the top).
    pub fn fetch(&self, idx: usize) -> VmResult<RcStackValue> {
        let len = self.items.len();
        vm_ensure!(idx < len, StackUnderflow(idx));
        Ok(self.items[len - idx - 1].clone())
    }

    pub fn swap(&mut self, lhs: usize, rhs: usize) -> VmResult<()> {
        let len = self.items.len();
        vm_ensure!(lhs < len, StackUnderflow(lhs));
        vm_ensure!(rhs < len, StackUnderflow(rhs));
        self.items.swap(len - lhs - 1, len - rhs - 1);
        Ok(())
    }

    /// Reverses `n` items starting at depth `offset`.
    pub fn reverse_range(&mut self, offset: usize, n: usize) -> VmResult<()> {
        let len = self.items.len();
        vm_ensure!(offset < len || n == 0, StackUnderflow(offset));
        vm_ensure!(offset + n <= len, StackUnderflow(offset + n));
        self.items[len - offset - n..len - offset].reverse();
        Ok(())
    }

    pub fn pop(&mut self) -> VmResult<RcStackValue> {
        match self.items.pop() {
            Some(item) => Ok(item),
            None => vm_bail!(StackUnderflow(0)),
        }
    }

    pub fn pop_many(&mut self, n: usize) -> VmResult<()> {
        let len = self.items.len();
        vm_ensure!(n <= len, StackUnderflow(n));
        self.items.truncate(len - n);
        Ok(())
    }

    pub fn drop_bottom(&mut self, n: usize) -> VmResult<()> {
        vm_ensure!(n <= self.items.len(), StackUnderflow(n));
        self.items.drain(..n);
        Ok(())
    }

    /// Moves the top `n` items of `other` onto this stack, keeping order.
    /// Splits off the top `n` items into a new stack, preserving order.
    pub fn split_top(&mut self, n: usize) -> VmResult<Rc<Stack>> {
        let len = self.items.len();
        vm_ensure!(n <= len, StackUnderflow(n));
        Ok(Rc::new(Stack::with_items(self.items.split_off(len - n))))
    }

    pub fn move_from_stack(&mut self, other: &mut Stack, n: usize) -> VmResult<()> {
        let len = other.items.len();
        vm_ensure!(n <= len, StackUnderflow(n));
        self.items.extend(other.items.drain(len - n..));
        Ok(())
    }

    pub fn pop_int(&mut self) -> VmResult<Rc<BigInt>> {
        let item = ok!(self.pop());
        let actual = item.ty();
        if actual == StackValueType::NaN {
            vm_bail!(IntegerOverflow);
        }
        match item.into_int() {
            Some(int) => Ok(int),
            None => vm_bail!(InvalidType {
                expected: StackValueType::Int,
                actual,
            }),
        }
    }

    pub fn pop_int_or_nan(&mut self) -> VmResult<Option<Rc<BigInt>>> {
        let item = ok!(self.pop());
        let actual = item.ty();
        if actual == StackValueType::NaN {
            return Ok(None);
        }
        match item.into_int() {
            Some(int) => Ok(Some(int)),
            None => vm_bail!(InvalidType {
                expected: StackValueType::Int,
                actual,
            }),
        }
    }

    pub fn pop_smallint_range(&mut self, min: u32, max: u32) -> VmResult<u32> {
        let item = ok!(self.pop_int());
        if let Some(value) = item.to_u32() {
            if value >= min && value <= max {
                return Ok(value);
            }
        }
        vm_bail!(IntegerOutOfRange {
            min: min as _,
            max: max as _,
            actual: item.to_string(),
        })
    }

    pub fn pop_smallint_signed_range(&mut self, min: i32, max: i32) -> VmResult<i32> {
        let item = ok!(self.pop_int());
        if let Some(value) = item.to_i32() {
            if value >= min && value <= max {
                return Ok(value);
            }
        }
        vm_bail!(IntegerOutOfRange {
            min: min as _,
            max: max as _,
            actual: item.to_string(),
        })
    }

    pub fn pop_long_range(&mut self, min: u64, max: u64) -> VmResult<u64> {
        let item = ok!(self.pop_int());
        if let Some(value) = item.to_u64() {
            if value >= min && value <= max {
                return Ok(value);
            }
        }
        vm_bail!(IntegerOutOfRange {
            min: min.min(i64::MAX as u64) as _,
            max: max.min(i64::MAX as u64) as _,
            actual: item.to_string(),
        })
    }

    pub fn pop_bool(&mut self) -> VmResult<bool> {
        Ok(!ok!(self.pop_int()).is_zero())
    }

    pub fn pop_cell(&mut self) -> VmResult<Rc<Cell>> {
        let item = ok!(self.pop());
        let actual = item.ty();
        match item.into_cell() {
            Some(cell) => Ok(cell),
            None => vm_bail!(InvalidType {
                expected: StackValueType::Cell,
                actual,
            }),
        }
    }

    pub fn pop_cell_opt(&mut self) -> VmResult<Option<Rc<Cell>>> {
        let item = ok!(self.pop());
        let actual = item.ty();
        if actual == StackValueType::Null {
            return Ok(None);
        }
        match item.into_cell() {
            Some(cell) => Ok(Some(cell)),
            None => vm_bail!(InvalidType {
                expected: StackValueType::Cell,
                actual,
            }),
        }
    }

    pub fn pop_slice(&mut self) -> VmResult<Rc<OwnedCellSlice>> {
        let item = ok!(self.pop());
        let actual = item.ty();
        match item.into_slice() {
            Some(slice) => Ok(slice),
            None => vm_bail!(InvalidType {
                expected: StackValueType::Slice,
                actual,
            }),
        }
    }

    pub fn pop_builder(&mut self) -> VmResult<Rc<CellBuilder>> {
        let item = ok!(self.pop());
        let actual = item.ty();
        match item.into_builder() {
            Some(builder) => Ok(builder),
            None => vm_bail!(InvalidType {
                expected: StackValueType::Builder,
                actual,
            }),
        }
    }

    pub fn pop_cont(&mut self) -> VmResult<RcCont> {
        let item = ok!(self.pop());
        let actual = item.ty();
        match item.into_cont() {
            Some(cont) => Ok(cont),
            None => vm_bail!(InvalidType {
                expected: StackValueType::Cont,
                actual,
            }),
        }
    }

    pub fn pop_tuple(&mut self) -> VmResult<Rc<Tuple>> {
        let item = ok!(self.pop());
        let actual = item.ty();
        match item.into_tuple() {
            Some(tuple) => Ok(tuple),
            None => vm_bail!(InvalidType {
                expected: StackValueType::Tuple,
                actual,
            }),
        }
    }

    pub fn pop_tuple_range(&mut self, min_len: u32, max_len: u32) -> VmResult<Rc<Tuple>> {
        let tuple = ok!(self.pop_tuple());
        vm_ensure!(
            (min_len as usize..=max_len as usize).contains(&tuple.len()),
            IntegerOutOfRange {
                min: min_len as _,
                max: max_len as _,
                actual: tuple.len().to_string(),
            }
        );
        Ok(tuple)
    }

    pub fn pop_opt_tuple_range(&mut self, min_len: u32, max_len: u32) -> VmResult<Option<Rc<Tuple>>> {
        let item = ok!(self.pop());
        if item.ty() == StackValueType::Null {
            return Ok(None);
        }
        let actual = item.ty();
        let tuple = match item.into_tuple() {
            Some(tuple) => tuple,
            None => vm_bail!(InvalidType {
                expected: StackValueType::Tuple,
                actual,
            }),
        };
        vm_ensure!(
            (min_len as usize..=max_len as usize).contains(&tuple.len()),
            IntegerOutOfRange {
                min: min_len as _,
                max: max_len as _,
                actual: tuple.len().to_string(),
            }
        );
        Ok(Some(tuple))
    }

    pub fn display_dump(&self) -> impl std::fmt::Display + '_ {
        struct DisplayDump<'a>(&'a Stack);

        impl std::fmt::Display for DisplayDump<'_> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("[")?;
                for item in &self.0.items {
                    f.write_str(" ")?;
                    item.fmt_dump(f)?;
                }
                f.write_str(" ]")
            }
        }

        DisplayDump(self)
    }
}

// TODO: impl store with depth limit
impl Store for Stack {
    fn store_into(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        let depth = self.items.len();
        if depth > 0xffffff {
            return Err(Error::IntOverflow);
        }
        ok!(builder.store_uint(depth as _, 24));

        if let Some((last, items)) = self.items.split_last() {
            let mut rest = Cell::empty_cell();
            for item in items {
                let mut builder = CellBuilder::new();
                ok!(builder.store_reference(rest));
                ok!(item.store_as_stack_value(&mut builder, context));
                rest = ok!(builder.build_ext(context));
            }

            ok!(builder.store_reference(rest));
            ok!(last.store_as_stack_value(builder, context));
        }
        Ok(())
    }
}

pub fn load_stack(slice: &mut CellSlice, context: &mut dyn CellContext) -> Result<Stack, Error> {
    let depth = ok!(slice.load_uint(24)) as usize;
    if depth == 0 {
        return Ok(Stack::default());
    }

    let mut items = Vec::with_capacity(std::cmp::min(depth, 128));

    let mut rest = ok!(slice.load_reference_cloned());
    items.push(ok!(load_stack_value(slice, context)));

    for _ in 1..depth {
        let cell = ok!(context.load_cell(rest, LoadMode::Full));
        let mut slice = ok!(cell.as_slice());
        rest = ok!(slice.load_reference_cloned());
        items.push(ok!(load_stack_value(&mut slice, context)));
        ok!(ensure_empty_slice(&slice));
    }

    items.reverse();
    Ok(Stack { items })
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StackValueType {
    Null,
    NaN,
    Int,
    Cell,
    Slice,
    Builder,
    Cont,
    Tuple,
}

pub trait StackValue {
    fn ty(&self) -> StackValueType;

    fn store_as_stack_value(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error>;

    fn fmt_dump(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result;

    fn as_int(&self) -> Option<&BigInt> {
        None
    }

    fn into_int(self: Rc<Self>) -> Option<Rc<BigInt>> {
        None
    }

    fn as_cell(&self) -> Option<&Cell> {
        None
    }

    fn into_cell(self: Rc<Self>) -> Option<Rc<Cell>> {
        None
    }

    fn as_slice(&self) -> Option<&OwnedCellSlice> {
        None
    }

    fn into_slice(self: Rc<Self>) -> Option<Rc<OwnedCellSlice>> {
        None
    }

    fn as_builder(&self) -> Option<&CellBuilder> {
        None
    }

    fn into_builder(self: Rc<Self>) -> Option<Rc<CellBuilder>> {
        None
    }

    fn as_cont(&self) -> Option<&crate::cont::DynCont> {
        None
    }

    fn into_cont(self: Rc<Self>) -> Option<RcCont> {
        None
    }

    fn as_tuple(&self) -> Option<&[RcStackValue]> {
        None
    }

    fn into_tuple(self: Rc<Self>) -> Option<Rc<Tuple>> {
        None
    }
}

impl std::fmt::Debug for dyn StackValue + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.fmt_dump(f)
    }
}

pub trait TupleExt {
    fn try_get(&self, index: usize) -> VmResult<&RcStackValue>;

    fn try_get_tuple_range(
        &self,
        index: usize,
        len_range: std::ops::RangeInclusive<usize>,
    ) -> VmResult<&[RcStackValue]>;
}

impl TupleExt for [RcStackValue] {
    fn try_get(&self, index: usize) -> VmResult<&RcStackValue> {
        match self.get(index) {
            Some(value) => Ok(value),
            None => vm_bail!(IntegerOutOfRange {
                min: 0,
                max: self.len() as _,
                actual: index.to_string(),
            }),
        }
    }

    fn try_get_tuple_range(
        &self,
        index: usize,
        len_range: std::ops::RangeInclusive<usize>,
    ) -> VmResult<&[RcStackValue]> {
        let value = ok!(self.try_get(index));
        match value.as_tuple() {
            Some(tuple) if len_range.contains(&tuple.len()) => Ok(tuple),
            Some(tuple) => vm_bail!(IntegerOutOfRange {
                min: *len_range.start() as _,
                max: *len_range.end() as _,
                actual: tuple.len().to_string(),
            }),
            None => vm_bail!(InvalidType {
                expected: StackValueType::Tuple,
                actual: value.ty(),
            }),
        }
    }
}

pub fn load_stack_value(
    slice: &mut CellSlice,
    context: &mut dyn CellContext,
) -> Result<RcStackValue, Error> {
    let ty = ok!(slice.load_u8());
    Ok(match ty {
        0 => Stack::make_null(),
        // NOTE: tinyint is skipped as unused
        2 => {
            let t = ok!(slice.get_small_uint(0, 7));
            if t == 0x7f {
                ok!(slice.skip_first(8, 0));
                Stack::make_nan()
            } else {
                ok!(slice.skip_first(7, 0));
                Rc::new(ok!(crate::util::load_int_from_slice(slice, 257, true)))
            }
        }
        3 => Rc::new(ok!(slice.load_reference_cloned())),
        4 => Rc::new(ok!(load_slice_as_stack_value(slice, context))),
        5 => {
            let cell = ok!(context.load_cell(ok!(slice.load_reference_cloned()), LoadMode::Full));
            let mut builder = CellBuilder::new();
            ok!(builder.store_slice(&ok!(cell.as_slice())));
            Rc::new(builder)
        }
        6 => ok!(crate::cont::load_cont(slice, context)).into_stack_value(),
        7 => {
            let len = ok!(slice.load_u16()) as usize;
            let mut tuple = Vec::with_capacity(std::cmp::min(len, 128));

            if len > 1 {
                let mut head = ok!(slice.load_reference_cloned());
                let mut tail = ok!(slice.load_reference_cloned());
                tuple.push(ok!(load_stack_value_from_cell(tail, context)));

                for _ in 0..len - 2 {
                    let cell = ok!(context.load_cell(head, LoadMode::Full));
                    let slice = &mut ok!(cell.as_slice());
                    head = ok!(slice.load_reference_cloned());
                    tail = ok!(slice.load_reference_cloned());
                    ok!(ensure_empty_slice(slice));
                    tuple.push(ok!(load_stack_value_from_cell(tail, context)));
                }

                tuple.push(ok!(load_stack_value_from_cell(head, context)));
                tuple.reverse();
            } else if len == 1 {
                tuple.push(ok!(load_stack_value_from_cell(
                    ok!(slice.load_reference_cloned()),
                    context
                )));
            }

            Rc::new(tuple)
        }
        _ => return Err(Error::InvalidTag),
    })
}

fn load_stack_value_from_cell(
    cell: Cell,
    context: &mut dyn CellContext,
) -> Result<RcStackValue, Error> {
    let cell = ok!(context.load_cell(cell, LoadMode::Full));
    let slice = &mut ok!(cell.as_slice());
    let res = ok!(load_stack_value(slice, context));
    ok!(ensure_empty_slice(slice));
    Ok(res)
}

impl StackValue for () {
    fn ty(&self) -> StackValueType {
        StackValueType::Null
    }

    fn store_as_stack_value(
        &self,
        builder: &mut CellBuilder,
        _: &mut dyn CellContext,
    ) -> Result<(), Error> {
        builder.store_zeros(8)
    }

    fn fmt_dump(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("()")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NaN;

impl StackValue for NaN {
    fn ty(&self) -> StackValueType {
        StackValueType::NaN
    }

    fn store_as_stack_value(
        &self,
        builder: &mut CellBuilder,
        _: &mut dyn CellContext,
    ) -> Result<(), Error> {
        builder.store_u16(0x02ff)
    }

    fn fmt_dump(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("NaN")
    }
}

impl StackValue for BigInt {
    fn ty(&self) -> StackValueType {
        StackValueType::Int
    }

    fn store_as_stack_value(
        &self,
        builder: &mut CellBuilder,
        _: &mut dyn CellContext,
    ) -> Result<(), Error> {
        ok!(builder.store_uint(0x0200 >> 1, 15));
        store_int_to_builder(self, 257, true, builder)
    }

    fn fmt_dump(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }

    fn as_int(&self) -> Option<&BigInt> {
        Some(self)
    }

    fn into_int(self: Rc<Self>) -> Option<Rc<BigInt>> {
        Some(self)
    }
}

impl StackValue for Cell {
    fn ty(&self) -> StackValueType {
        StackValueType::Cell
    }

    fn store_as_stack_value(
        &self,
        builder: &mut CellBuilder,
        _: &mut dyn CellContext,
    ) -> Result<(), Error> {
        ok!(builder.store_u8(0x03));
        builder.store_reference(self.clone())
    }

    fn fmt_dump(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "C{{{}}}", self.repr_hash())
    }

    fn as_cell(&self) -> Option<&Cell> {
        Some(self)
    }

    fn into_cell(self: Rc<Self>) -> Option<Rc<Cell>> {
        Some(self)
    }
}

impl StackValue for OwnedCellSlice {
    fn ty(&self) -> StackValueType {
        StackValueType::Slice
    }

    fn store_as_stack_value(
        &self,
        builder: &mut CellBuilder,
        _: &mut dyn CellContext,
    ) -> Result<(), Error> {
        ok!(builder.store_u8(0x04));
        store_slice_as_stack_value(self, builder)
    }

    fn fmt_dump(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let range = self.range();
        write!(
            f,
            "CS{{{} bits: {}..{}; refs: {}..{}}}",
            self.cell().repr_hash(),
            range.offset_bits(),
            range.offset_bits() + range.size_bits(),
            range.offset_refs(),
            range.offset_refs() + range.size_refs(),
        )
    }

    fn as_slice(&self) -> Option<&OwnedCellSlice> {
        Some(self)
    }

    fn into_slice(self: Rc<Self>) -> Option<Rc<OwnedCellSlice>> {
        Some(self)
    }
}

impl StackValue for CellBuilder {
    fn ty(&self) -> StackValueType {
        StackValueType::Builder
    }

    fn store_as_stack_value(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        ok!(builder.store_u8(0x05));
        builder.store_reference(ok!(self.clone().build_ext(context)))
    }

    fn fmt_dump(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BC{{bits: {}; refs: {}}}", self.size_bits(), self.size_refs())
    }

    fn as_builder(&self) -> Option<&CellBuilder> {
        Some(self)
    }

    fn into_builder(self: Rc<Self>) -> Option<Rc<CellBuilder>> {
        Some(self)
    }
}

impl StackValue for Tuple {
    fn ty(&self) -> StackValueType {
        StackValueType::Tuple
    }

    fn store_as_stack_value(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        if self.len() > u16::MAX as usize {
            return Err(Error::IntOverflow);
        }

        let mut head = None::<Cell>;
        let mut tail = None::<Cell>;

        for item in self {
            std::mem::swap(&mut head, &mut tail);

            if let (Some(t), Some(h)) = (tail.take(), head.take()) {
                let mut builder = CellBuilder::new();
                ok!(builder.store_reference(t));
                ok!(builder.store_reference(h));
                head = Some(ok!(builder.build_ext(context)));
            }

            let mut builder = CellBuilder::new();
            ok!(item.store_as_stack_value(&mut builder, context));
            tail = Some(ok!(builder.build_ext(context)));
        }

        ok!(builder.store_u8(0x07));
        ok!(builder.store_u16(self.len() as _));
        if let Some(head) = head {
            ok!(builder.store_reference(head));
        }
        if let Some(tail) = tail {
            ok!(builder.store_reference(tail));
        }
        Ok(())
    }

    fn fmt_dump(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return f.write_str("[]");
        }
        f.write_str("[")?;
        for item in self {
            f.write_str(" ")?;
            item.fmt_dump(f)?;
        }
        f.write_str(" ]")
    }

    fn as_tuple(&self) -> Option<&[RcStackValue]> {
        Some(self)
    }

    fn into_tuple(self: Rc<Self>) -> Option<Rc<Tuple>> {
        Some(self)
    }
}

pub fn store_slice_as_stack_value(
    slice: &OwnedCellSlice,
    builder: &mut CellBuilder,
) -> Result<(), Error> {
    ok!(builder.store_reference(slice.cell().clone()));

    let range = slice.range();
    let value = ((range.offset_bits() as u64) << 16)
        | (((range.offset_bits() + range.size_bits()) as u64) << 6)
        | ((range.offset_refs() as u64) << 3)
        | (range.offset_refs() + range.size_refs()) as u64;
    builder.store_uint(value, 26)
}

pub fn load_slice_as_stack_value(
    slice: &mut CellSlice,
    context: &mut dyn CellContext,
) -> Result<OwnedCellSlice, Error> {
    let cell = ok!(slice.load_reference_cloned());
    let range = ok!(slice.load_uint(26));

    let bits_start = (range >> 16) as u16;
    let bits_end = (range >> 6) as u16 & 0x3ff;
    let refs_start = (range >> 3) as u8 & 0b111;
    let refs_end = range as u8 & 0b111;

    if bits_start > bits_end || refs_start > refs_end || refs_end > 4 {
        return Err(Error::InvalidData);
    }

    let cell = ok!(context.load_cell(cell, LoadMode::Full));
    if bits_end > cell.bit_len() || refs_end > cell.reference_count() {
        return Err(Error::InvalidData);
    }

    let mut range = CellSliceRange::full(&cell);
    if !range.try_advance(bits_start, refs_start) {
        return Err(Error::InvalidData);
    }
    let mut result = OwnedCellSlice::from((cell, range));
    {
        let mut slice = ok!(result.apply());
        ok!(slice.only_first(bits_end - bits_start, refs_end - refs_start));
        let range = slice.range();
        result.set_range(range);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonkit_types::cell::EmptyCellContext;

    #[test]
    fn typed_pops() {
        let mut stack = Stack::default();
        stack.push_int(42).unwrap();
        stack.push_null().unwrap();
        stack.push(Cell::empty_cell()).unwrap();

        let cell = stack.pop_cell().unwrap();
        assert_eq!(*cell, Cell::empty_cell());
        assert!(stack.pop_int().is_err());
        assert_eq!(*stack.pop_int().unwrap(), BigInt::from(42));
        assert!(stack.pop().is_err());
    }

    #[test]
    fn smallint_range_checks() {
        let mut stack = Stack::default();
        stack.push_int(300).unwrap();
        assert!(stack.pop_smallint_range(0, 255).is_err());

        stack.push_int(-5).unwrap();
        assert_eq!(stack.pop_smallint_signed_range(-10, 10).unwrap(), -5);
    }

    #[test]
    fn reverse_and_swap() {
        let mut stack = Stack::default();
        for i in 0..5 {
            stack.push_int(i).unwrap();
        }
        // 0 1 2 3 4 (top = 4)
        stack.reverse_range(0, 3).unwrap();
        // 0 1 4 3 2
        assert_eq!(*stack.pop_int().unwrap(), BigInt::from(2));
        assert_eq!(*stack.pop_int().unwrap(), BigInt::from(3));
        assert_eq!(*stack.pop_int().unwrap(), BigInt::from(4));
        assert_eq!(*stack.pop_int().unwrap(), BigInt::from(1));
    }

    #[test]
    fn stack_cell_round_trip() {
        let mut stack = Stack::default();
        stack.push_int(123).unwrap();
        stack.push_null().unwrap();
        stack
            .push(vec![Stack::make_zero(), Stack::make_nan()])
            .unwrap();

        let mut b = CellBuilder::new();
        stack
            .store_into(&mut b, &mut EmptyCellContext)
            .unwrap();
        let cell = b.build().unwrap();

        let mut cs = cell.as_slice().unwrap();
        let loaded = load_stack(&mut cs, &mut EmptyCellContext).unwrap();
        assert_eq!(loaded.depth(), 3);
        assert_eq!(loaded.items[0].as_int(), Some(&BigInt::from(123)));
        assert_eq!(loaded.items[1].ty(), StackValueType::Null);
        let tuple = loaded.items[2].as_tuple().unwrap();
        assert_eq!(tuple.len(), 2);
        assert_eq!(tuple[1].ty(), StackValueType::NaN);
    }
}
