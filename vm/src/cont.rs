use std::rc::Rc;

use dyn_clone::DynClone;
use tonkit_types::cell::{
    Cell, CellBuilder, CellContext, CellSlice, LoadMode, Store,
};
use tonkit_types::dict::RawDict;
use tonkit_types::error::Error;

use crate::error::{AsException, VmResult};
use crate::stack::{
    load_stack, load_stack_value, load_slice_as_stack_value, store_slice_as_stack_value,
    RcStackValue, Stack, StackValue, StackValueType, Tuple, TupleExt,
};
use crate::state::VmState;
use crate::util::{ensure_empty_slice, OwnedCellSlice};

pub type RcCont = Rc<DynCont>;
pub type DynCont = dyn Cont;

pub trait Cont: Store + DynClone + std::fmt::Debug {
    fn as_stack_value(&self) -> &dyn StackValue;

    fn into_stack_value(self: Rc<Self>) -> RcStackValue;

    fn jump(self: Rc<Self>, state: &mut VmState) -> VmResult<i32>;

    fn get_control_data(&self) -> Option<&ControlData> {
        None
    }

    fn get_control_data_mut(&mut self) -> Option<&mut ControlData> {
        None
    }
}

dyn_clone::clone_trait_object!(Cont);

impl<T: Cont + 'static> StackValue for T {
    fn ty(&self) -> StackValueType {
        StackValueType::Cont
    }

    fn store_as_stack_value(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        ok!(builder.store_u8(0x06));
        self.store_into(builder, context)
    }

    fn fmt_dump(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = std::any::type_name::<T>();
        let name = name.rsplit("::").next().unwrap_or(name);
        write!(f, "Cont{{{name}}}")
    }

    fn as_cont(&self) -> Option<&DynCont> {
        Some(self)
    }

    fn into_cont(self: Rc<Self>) -> Option<RcCont> {
        Some(self)
    }
}

/// Saved registers and calling convention of a continuation.
#[derive(Debug, Default, Clone)]
pub struct ControlData {
    pub nargs: Option<u16>,
    pub stack: Option<Rc<Stack>>,
    pub save: ControlRegs,
    pub cp: Option<u16>,
}

impl ControlData {
    pub fn with_cp(cp: u16) -> Self {
        Self {
            cp: Some(cp),
            ..Default::default()
        }
    }

    pub fn with_nargs(nargs: u16) -> Self {
        Self {
            nargs: Some(nargs),
            ..Default::default()
        }
    }

    pub fn require_nargs(&self, copy: usize) -> VmResult<()> {
        if matches!(self.nargs, Some(nargs) if (nargs as usize) < copy) {
            vm_bail!(StackUnderflow(copy));
        }
        Ok(())
    }
}

impl Store for ControlData {
    fn store_into(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        match self.nargs {
            None => ok!(builder.store_bit(false)),
            Some(nargs) if nargs <= 0x1fff => {
                ok!(builder.store_bit(true));
                ok!(builder.store_uint(nargs as _, 13));
            }
            Some(_) => return Err(Error::IntOverflow),
        }
        match &self.stack {
            None => ok!(builder.store_bit(false)),
            Some(stack) => {
                ok!(builder.store_bit(true));
                ok!(stack.store_into(builder, context));
            }
        }
        ok!(self.save.store_into(builder, context));
        match self.cp {
            None => builder.store_bit(false),
            Some(cp) => {
                ok!(builder.store_bit(true));
                builder.store_u16(cp)
            }
        }
    }
}

pub fn load_control_data(
    slice: &mut CellSlice,
    context: &mut dyn CellContext,
) -> Result<ControlData, Error> {
    let nargs = if ok!(slice.load_bit()) {
        Some(ok!(slice.load_uint(13)) as u16)
    } else {
        None
    };
    let stack = if ok!(slice.load_bit()) {
        Some(Rc::new(ok!(load_stack(slice, context))))
    } else {
        None
    };
    let save = ok!(load_control_regs(slice, context));
    let cp = if ok!(slice.load_bit()) {
        Some(ok!(slice.load_u16()))
    } else {
        None
    };
    Ok(ControlData {
        nargs,
        stack,
        save,
        cp,
    })
}

/// Control registers `c0..c3`, `c4..c5` and `c7`.
#[derive(Default, Clone)]
pub struct ControlRegs {
    pub c: [Option<RcCont>; Self::CONT_REG_COUNT],
    pub d: [Option<Cell>; Self::DATA_REG_COUNT],
    pub c7: Option<Rc<Tuple>>,
}

impl ControlRegs {
    pub const CONT_REG_COUNT: usize = 4;
    pub const DATA_REG_OFFSET: usize = 4;
    pub const DATA_REG_COUNT: usize = 2;

    pub fn is_valid_idx(i: usize) -> bool {
        i < Self::CONT_REG_COUNT
            || (Self::DATA_REG_OFFSET..Self::DATA_REG_OFFSET + Self::DATA_REG_COUNT).contains(&i)
            || i == 7
    }

    /// Copies all registers defined in `other` into `self`.
    pub fn merge(&mut self, other: &Self) {
        for (c, other) in self.c.iter_mut().zip(&other.c) {
            if other.is_some() {
                *c = other.clone();
            }
        }
        for (d, other) in self.d.iter_mut().zip(&other.d) {
            if other.is_some() {
                *d = other.clone();
            }
        }
        if other.c7.is_some() {
            self.c7 = other.c7.clone();
        }
    }

    /// Clears all registers that `other` defines.
    pub fn preclear(&mut self, other: &Self) {
        for (c, other) in self.c.iter_mut().zip(&other.c) {
            if other.is_some() {
                *c = None;
            }
        }
        for (d, other) in self.d.iter_mut().zip(&other.d) {
            if other.is_some() {
                *d = None;
            }
        }
        if other.c7.is_some() {
            self.c7 = None;
        }
    }

    pub fn set(&mut self, i: usize, value: RcStackValue) -> VmResult<()> {
        let actual = value.ty();
        match i {
            0..=3 => match value.into_cont() {
                Some(cont) => {
                    self.c[i] = Some(cont);
                    Ok(())
                }
                None => vm_bail!(InvalidType {
                    expected: StackValueType::Cont,
                    actual,
                }),
            },
            4..=5 => match value.into_cell() {
                Some(cell) => {
                    self.d[i - Self::DATA_REG_OFFSET] = Some(Rc::unwrap_or_clone(cell));
                    Ok(())
                }
                None => vm_bail!(InvalidType {
                    expected: StackValueType::Cell,
                    actual,
                }),
            },
            7 => match value.into_tuple() {
                Some(tuple) => {
                    self.c7 = Some(tuple);
                    Ok(())
                }
                None => vm_bail!(InvalidType {
                    expected: StackValueType::Tuple,
                    actual,
                }),
            },
            _ => vm_bail!(ControlRegisterOutOfRange(i)),
        }
    }

    /// Same as [`set`], but fails if the register is already defined.
    ///
    /// [`set`]: Self::set
    pub fn define(&mut self, i: usize, value: RcStackValue) -> VmResult<()> {
        vm_ensure!(Self::is_valid_idx(i), ControlRegisterOutOfRange(i));
        let defined = match i {
            0..=3 => self.c[i].is_some(),
            4..=5 => self.d[i - Self::DATA_REG_OFFSET].is_some(),
            7 => self.c7.is_some(),
            _ => false,
        };
        vm_ensure!(!defined, ControlRegisterRedefined);
        self.set(i, value)
    }

    pub fn define_c0(&mut self, cont: &Option<RcCont>) {
        if self.c[0].is_none() {
            self.c[0] = cont.clone();
        }
    }

    pub fn define_c1(&mut self, cont: &Option<RcCont>) {
        if self.c[1].is_none() {
            self.c[1] = cont.clone();
        }
    }

    pub fn define_c2(&mut self, cont: &Option<RcCont>) {
        if self.c[2].is_none() {
            self.c[2] = cont.clone();
        }
    }

    pub fn get_c(&self, i: usize) -> Option<RcCont> {
        self.c.get(i).cloned().flatten()
    }

    pub fn get_d(&self, i: usize) -> Option<Cell> {
        self.d.get(i.wrapping_sub(Self::DATA_REG_OFFSET)).cloned().flatten()
    }

    pub fn get_as_stack_value(&self, i: usize) -> Option<RcStackValue> {
        match i {
            0..=3 => self.c[i].clone().map(Cont::into_stack_value),
            4..=5 => self.d[i - Self::DATA_REG_OFFSET]
                .clone()
                .map(|cell| Rc::new(cell) as RcStackValue),
            7 => self.c7.clone().map(|tuple| tuple as RcStackValue),
            _ => None,
        }
    }

    /// Returns the parameter tuple `c7[0]`.
    pub fn get_c7_params(&self) -> VmResult<&[RcStackValue]> {
        match &self.c7 {
            Some(c7) => c7.as_slice().try_get_tuple_range(0, 0..=255),
            None => vm_bail!(InvalidType {
                expected: StackValueType::Tuple,
                actual: StackValueType::Null,
            }),
        }
    }
}

impl std::fmt::Debug for ControlRegs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlRegs")
            .field("c", &self.c)
            .field("d", &self.d)
            .field("c7", &self.c7.as_ref().map(|t| t.len()))
            .finish()
    }
}

impl Store for ControlRegs {
    fn store_into(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        fn add_entry(
            dict: &mut RawDict<4>,
            index: u8,
            value: &dyn StackValue,
            context: &mut dyn CellContext,
        ) -> Result<(), Error> {
            let mut key = CellBuilder::new();
            ok!(key.store_small_uint(index, 4));
            let key = ok!(key.build());

            let mut value_builder = CellBuilder::new();
            ok!(value.store_as_stack_value(&mut value_builder, context));
            let value = ok!(value_builder.build_ext(context));

            dict.set(ok!(key.as_slice()), &ok!(value.as_slice()), context)
        }

        let mut dict = RawDict::<4>::new();
        for (i, c) in self.c.iter().enumerate() {
            if let Some(cont) = c {
                ok!(add_entry(&mut dict, i as u8, cont.as_stack_value(), context));
            }
        }
        for (i, d) in self.d.iter().enumerate() {
            if let Some(cell) = d {
                ok!(add_entry(
                    &mut dict,
                    (Self::DATA_REG_OFFSET + i) as u8,
                    cell,
                    context
                ));
            }
        }
        if let Some(c7) = &self.c7 {
            ok!(add_entry(&mut dict, 7, &**c7, context));
        }

        match dict.root() {
            Some(root) => {
                ok!(builder.store_bit(true));
                builder.store_reference(root.clone())
            }
            None => builder.store_bit(false),
        }
    }
}

pub fn load_control_regs(
    slice: &mut CellSlice,
    context: &mut dyn CellContext,
) -> Result<ControlRegs, Error> {
    let root = if ok!(slice.load_bit()) {
        Some(ok!(slice.load_reference_cloned()))
    } else {
        None
    };

    let mut regs = ControlRegs::default();
    let dict = RawDict::<4>::from_root(root);
    for entry in dict.iter() {
        let (key, mut value) = ok!(entry);
        let index = (key.raw_data()[0] >> 4) as usize;
        let value = ok!(load_stack_value(&mut value, context));
        if regs.set(index, value).is_err() {
            return Err(Error::InvalidData);
        }
    }
    Ok(regs)
}

/// Continuation that terminates the VM with a fixed exit code.
#[derive(Debug, Clone, Copy)]
pub struct QuitCont {
    pub exit_code: i32,
}

impl QuitCont {
    const TAG: u8 = 0b1000;
}

impl Cont for QuitCont {
    fn as_stack_value(&self) -> &dyn StackValue {
        self
    }

    fn into_stack_value(self: Rc<Self>) -> RcStackValue {
        self
    }

    fn jump(self: Rc<Self>, _: &mut VmState) -> VmResult<i32> {
        Ok(!self.exit_code)
    }
}

impl Store for QuitCont {
    fn store_into(&self, builder: &mut CellBuilder, _: &mut dyn CellContext) -> Result<(), Error> {
        ok!(builder.store_small_uint(Self::TAG, 4));
        builder.store_uint(self.exit_code as u32 as u64, 32)
    }
}

/// Default exception handler, terminates with `~n` where `n` is
/// the exception number on the stack.
#[derive(Debug, Clone, Copy)]
pub struct ExcQuitCont;

impl ExcQuitCont {
    const TAG: u8 = 0b1001;
}

impl Cont for ExcQuitCont {
    fn as_stack_value(&self) -> &dyn StackValue {
        self
    }

    fn into_stack_value(self: Rc<Self>) -> RcStackValue {
        self
    }

    fn jump(self: Rc<Self>, state: &mut VmState) -> VmResult<i32> {
        let n = match Rc::make_mut(&mut state.stack).pop_smallint_range(0, 0xffff) {
            Ok(n) => n,
            Err(e) => e.as_exception() as u32,
        };
        vm_log!(state, "default exception handler, terminating vm with exit code {n}");
        Ok(!(n as i32))
    }
}

impl Store for ExcQuitCont {
    fn store_into(&self, builder: &mut CellBuilder, _: &mut dyn CellContext) -> Result<(), Error> {
        builder.store_small_uint(Self::TAG, 4)
    }
}

/// Pushes an integer before jumping to `next`.
#[derive(Debug, Clone)]
pub struct PushIntCont {
    pub value: i32,
    pub next: RcCont,
}

impl PushIntCont {
    const TAG: u8 = 0b1111;
}

impl Cont for PushIntCont {
    fn as_stack_value(&self) -> &dyn StackValue {
        self
    }

    fn into_stack_value(self: Rc<Self>) -> RcStackValue {
        self
    }

    fn jump(self: Rc<Self>, state: &mut VmState) -> VmResult<i32> {
        ok!(Rc::make_mut(&mut state.stack).push_int(self.value));
        let next = match Rc::try_unwrap(self) {
            Ok(this) => this.next,
            Err(this) => this.next.clone(),
        };
        state.jump(next)
    }
}

impl Store for PushIntCont {
    fn store_into(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        ok!(builder.store_small_uint(Self::TAG, 4));
        ok!(builder.store_uint(self.value as u32 as u64, 32));
        store_cont_as_ref(self.next.as_ref(), builder, context)
    }
}

/// Runs `body` the remaining `count` times, then `after`.
#[derive(Debug, Clone)]
pub struct RepeatCont {
    pub count: u64,
    pub body: RcCont,
    pub after: RcCont,
}

impl RepeatCont {
    const TAG: u8 = 0b10100;

    pub const MAX_COUNT: u64 = 1 << 63;
}

impl Cont for RepeatCont {
    fn as_stack_value(&self) -> &dyn StackValue {
        self
    }

    fn into_stack_value(self: Rc<Self>) -> RcStackValue {
        self
    }

    fn jump(self: Rc<Self>, state: &mut VmState) -> VmResult<i32> {
        if self.count == 0 {
            return state.jump(self.after.clone());
        }
        let body = self.body.clone();
        let next = match Rc::try_unwrap(self) {
            Ok(mut this) => {
                this.count -= 1;
                Rc::new(this)
            }
            Err(this) => Rc::new(RepeatCont {
                count: this.count - 1,
                body: this.body.clone(),
                after: this.after.clone(),
            }),
        };
        state.cr.c[0] = Some(next);
        state.jump(body)
    }
}

impl Store for RepeatCont {
    fn store_into(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        if self.count >= Self::MAX_COUNT {
            return Err(Error::IntOverflow);
        }
        ok!(builder.store_small_uint(Self::TAG, 5));
        ok!(builder.store_uint(self.count, 63));
        ok!(store_cont_as_ref(self.body.as_ref(), builder, context));
        store_cont_as_ref(self.after.as_ref(), builder, context)
    }
}

/// Loop body of `UNTIL`, re-entered until the body leaves a non-zero
/// integer on the stack.
#[derive(Debug, Clone)]
pub struct UntilCont {
    pub body: RcCont,
    pub after: RcCont,
}

impl UntilCont {
    const TAG: u8 = 0b110000;
}

impl Cont for UntilCont {
    fn as_stack_value(&self) -> &dyn StackValue {
        self
    }

    fn into_stack_value(self: Rc<Self>) -> RcStackValue {
        self
    }

    fn jump(self: Rc<Self>, state: &mut VmState) -> VmResult<i32> {
        let terminate = ok!(Rc::make_mut(&mut state.stack).pop_bool());
        if terminate {
            return state.jump(self.after.clone());
        }
        let body = self.body.clone();
        state.cr.c[0] = Some(self);
        state.jump(body)
    }
}

impl Store for UntilCont {
    fn store_into(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        ok!(builder.store_small_uint(Self::TAG, 6));
        ok!(store_cont_as_ref(self.body.as_ref(), builder, context));
        store_cont_as_ref(self.after.as_ref(), builder, context)
    }
}

/// Infinite loop body of `AGAIN`.
#[derive(Debug, Clone)]
pub struct AgainCont {
    pub body: RcCont,
}

impl AgainCont {
    const TAG: u8 = 0b110001;
}

impl Cont for AgainCont {
    fn as_stack_value(&self) -> &dyn StackValue {
        self
    }

    fn into_stack_value(self: Rc<Self>) -> RcStackValue {
        self
    }

    fn jump(self: Rc<Self>, state: &mut VmState) -> VmResult<i32> {
        let body = self.body.clone();
        state.cr.c[0] = Some(self);
        state.jump(body)
    }
}

impl Store for AgainCont {
    fn store_into(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        ok!(builder.store_small_uint(Self::TAG, 6));
        store_cont_as_ref(self.body.as_ref(), builder, context)
    }
}

/// Loop state of `WHILE`.
///
/// With `check_cond` set the condition result is on the stack and must
/// be checked next, otherwise the condition is yet to run.
#[derive(Debug, Clone)]
pub struct WhileCont {
    pub check_cond: bool,
    pub cond: RcCont,
    pub body: RcCont,
    pub after: RcCont,
}

impl WhileCont {
    const TAG: u8 = 0b11001;

    fn tag(&self) -> u8 {
        (Self::TAG << 1) | !self.check_cond as u8
    }
}

impl Cont for WhileCont {
    fn as_stack_value(&self) -> &dyn StackValue {
        self
    }

    fn into_stack_value(self: Rc<Self>) -> RcStackValue {
        self
    }

    fn jump(self: Rc<Self>, state: &mut VmState) -> VmResult<i32> {
        let next = if self.check_cond {
            let proceed = ok!(Rc::make_mut(&mut state.stack).pop_bool());
            if !proceed {
                return state.jump(self.after.clone());
            }
            let body = self.body.clone();
            state.cr.c[0] = Some(Rc::new(Self {
                check_cond: false,
                cond: self.cond.clone(),
                body: self.body.clone(),
                after: self.after.clone(),
            }));
            body
        } else {
            let cond = self.cond.clone();
            state.cr.c[0] = Some(Rc::new(Self {
                check_cond: true,
                cond: self.cond.clone(),
                body: self.body.clone(),
                after: self.after.clone(),
            }));
            cond
        };
        state.jump(next)
    }
}

impl Store for WhileCont {
    fn store_into(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        ok!(builder.store_small_uint(self.tag(), 6));
        ok!(store_cont_as_ref(self.cond.as_ref(), builder, context));
        ok!(store_cont_as_ref(self.body.as_ref(), builder, context));
        store_cont_as_ref(self.after.as_ref(), builder, context)
    }
}

/// Continuation with a saved calling convention wrapped around `ext`.
#[derive(Debug, Clone)]
pub struct ArgContExt {
    pub data: ControlData,
    pub ext: RcCont,
}

impl ArgContExt {
    const TAG: u8 = 0b01;
}

impl Cont for ArgContExt {
    fn as_stack_value(&self) -> &dyn StackValue {
        self
    }

    fn into_stack_value(self: Rc<Self>) -> RcStackValue {
        self
    }

    fn jump(self: Rc<Self>, state: &mut VmState) -> VmResult<i32> {
        state.adjust_cr(&self.data.save);
        if let Some(cp) = self.data.cp {
            ok!(state.force_cp(cp));
        }
        let ext = match Rc::try_unwrap(self) {
            Ok(this) => this.ext,
            Err(this) => this.ext.clone(),
        };
        ext.jump(state)
    }

    fn get_control_data(&self) -> Option<&ControlData> {
        Some(&self.data)
    }

    fn get_control_data_mut(&mut self) -> Option<&mut ControlData> {
        Some(&mut self.data)
    }
}

impl Store for ArgContExt {
    fn store_into(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        ok!(builder.store_small_uint(Self::TAG, 2));
        ok!(self.data.store_into(builder, context));
        store_cont_as_ref(self.ext.as_ref(), builder, context)
    }
}

/// Ordinary continuation, a code slice with a saved calling convention.
#[derive(Debug, Clone)]
pub struct OrdCont {
    pub data: ControlData,
    pub code: OwnedCellSlice,
}

impl OrdCont {
    const TAG: u8 = 0b00;

    pub fn simple(code: OwnedCellSlice, cp: u16) -> Self {
        Self {
            data: ControlData::with_cp(cp),
            code,
        }
    }
}

impl Cont for OrdCont {
    fn as_stack_value(&self) -> &dyn StackValue {
        self
    }

    fn into_stack_value(self: Rc<Self>) -> RcStackValue {
        self
    }

    fn jump(self: Rc<Self>, state: &mut VmState) -> VmResult<i32> {
        state.adjust_cr(&self.data.save);
        if let Some(cp) = self.data.cp {
            ok!(state.force_cp(cp));
        }
        state.code = match Rc::try_unwrap(self) {
            Ok(this) => this.code,
            Err(this) => this.code.clone(),
        };
        Ok(0)
    }

    fn get_control_data(&self) -> Option<&ControlData> {
        Some(&self.data)
    }

    fn get_control_data_mut(&mut self) -> Option<&mut ControlData> {
        Some(&mut self.data)
    }
}

impl Store for OrdCont {
    fn store_into(
        &self,
        builder: &mut CellBuilder,
        context: &mut dyn CellContext,
    ) -> Result<(), Error> {
        ok!(builder.store_small_uint(Self::TAG, 2));
        ok!(self.data.store_into(builder, context));
        store_slice_as_stack_value(&self.code, builder)
    }
}

/// Returns a unique mutable reference to the continuation, cloning it
/// out of a shared `Rc` first if needed.
pub fn make_cont_mut(cont: &mut RcCont) -> &mut DynCont {
    if Rc::get_mut(cont).is_none() {
        *cont = Rc::from(dyn_clone::clone_box(cont.as_ref()));
    }
    match Rc::get_mut(cont) {
        Some(cont) => cont,
        None => unreachable!(),
    }
}

/// Makes sure the continuation carries control data, wrapping it into
/// an [`ArgContExt`] if it has none, and returns the data for editing.
pub fn force_cdata(cont: &mut RcCont) -> VmResult<&mut ControlData> {
    if cont.get_control_data().is_none() {
        *cont = Rc::new(ArgContExt {
            data: ControlData::default(),
            ext: cont.clone(),
        });
    }
    match make_cont_mut(cont).get_control_data_mut() {
        Some(data) => Ok(data),
        None => vm_bail!(Fatal("continuation has no control data")),
    }
}

fn store_cont_as_ref(
    cont: &DynCont,
    builder: &mut CellBuilder,
    context: &mut dyn CellContext,
) -> Result<(), Error> {
    let mut b = CellBuilder::new();
    ok!(cont.store_into(&mut b, context));
    builder.store_reference(ok!(b.build_ext(context)))
}

fn load_cont_from_ref(
    slice: &mut CellSlice,
    context: &mut dyn CellContext,
) -> Result<RcCont, Error> {
    let cell = ok!(context.load_cell(ok!(slice.load_reference_cloned()), LoadMode::Full));
    let slice = &mut ok!(cell.as_slice());
    let cont = ok!(load_cont(slice, context));
    ok!(ensure_empty_slice(slice));
    Ok(cont)
}

pub fn load_cont(slice: &mut CellSlice, context: &mut dyn CellContext) -> Result<RcCont, Error> {
    Ok(match ok!(slice.get_small_uint(0, 2)) {
        OrdCont::TAG => {
            ok!(slice.skip_first(2, 0));
            let data = ok!(load_control_data(slice, context));
            let code = ok!(load_slice_as_stack_value(slice, context));
            Rc::new(OrdCont { data, code })
        }
        ArgContExt::TAG => {
            ok!(slice.skip_first(2, 0));
            let data = ok!(load_control_data(slice, context));
            let ext = ok!(load_cont_from_ref(slice, context));
            Rc::new(ArgContExt { data, ext })
        }
        _ => match ok!(slice.get_small_uint(0, 4)) {
            QuitCont::TAG => {
                ok!(slice.skip_first(4, 0));
                let exit_code = ok!(slice.load_uint(32)) as u32 as i32;
                Rc::new(QuitCont { exit_code })
            }
            ExcQuitCont::TAG => {
                ok!(slice.skip_first(4, 0));
                Rc::new(ExcQuitCont)
            }
            0b1010 => {
                if ok!(slice.load_small_uint(5)) != RepeatCont::TAG {
                    return Err(Error::InvalidTag);
                }
                let count = ok!(slice.load_uint(63));
                let body = ok!(load_cont_from_ref(slice, context));
                let after = ok!(load_cont_from_ref(slice, context));
                Rc::new(RepeatCont { count, body, after })
            }
            PushIntCont::TAG => {
                ok!(slice.skip_first(4, 0));
                let value = ok!(slice.load_uint(32)) as u32 as i32;
                let next = ok!(load_cont_from_ref(slice, context));
                Rc::new(PushIntCont { value, next })
            }
            0b1100 => match ok!(slice.load_small_uint(6)) {
                UntilCont::TAG => {
                    let body = ok!(load_cont_from_ref(slice, context));
                    let after = ok!(load_cont_from_ref(slice, context));
                    Rc::new(UntilCont { body, after })
                }
                AgainCont::TAG => {
                    let body = ok!(load_cont_from_ref(slice, context));
                    Rc::new(AgainCont { body })
                }
                tag if tag >> 1 == WhileCont::TAG => {
                    let cond = ok!(load_cont_from_ref(slice, context));
                    let body = ok!(load_cont_from_ref(slice, context));
                    let after = ok!(load_cont_from_ref(slice, context));
                    Rc::new(WhileCont {
                        check_cond: tag & 1 == 0,
                        cond,
                        body,
                        after,
                    })
                }
                _ => return Err(Error::InvalidTag),
            },
            _ => return Err(Error::InvalidTag),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonkit_types::cell::EmptyCellContext;

    fn round_trip(cont: &DynCont) -> RcCont {
        let mut b = CellBuilder::new();
        cont.store_into(&mut b, &mut EmptyCellContext).unwrap();
        let cell = b.build().unwrap();
        let mut cs = cell.as_slice().unwrap();
        let cont = load_cont(&mut cs, &mut EmptyCellContext).unwrap();
        assert!(cs.is_data_empty() && cs.is_refs_empty());
        cont
    }

    #[test]
    fn quit_cont_round_trip() {
        let cont = round_trip(&QuitCont { exit_code: -5 });
        let mut b1 = CellBuilder::new();
        cont.store_into(&mut b1, &mut EmptyCellContext).unwrap();
        let mut b2 = CellBuilder::new();
        QuitCont { exit_code: -5 }
            .store_into(&mut b2, &mut EmptyCellContext)
            .unwrap();
        assert_eq!(b1.build().unwrap(), b2.build().unwrap());
    }

    #[test]
    fn ord_cont_round_trip() {
        let code = {
            let mut b = CellBuilder::new();
            b.store_u8(0x72).unwrap();
            OwnedCellSlice::new(b.build().unwrap())
        };
        let cont = OrdCont::simple(code, 0);
        let loaded = round_trip(&cont);
        assert!(loaded.get_control_data().is_some());
        assert_eq!(loaded.get_control_data().unwrap().cp, Some(0));
    }

    #[test]
    fn control_regs_round_trip() {
        let mut regs = ControlRegs::default();
        regs.c[0] = Some(Rc::new(QuitCont { exit_code: 0 }));
        regs.d[0] = Some(Cell::empty_cell());
        regs.c7 = Some(Rc::new(vec![Stack::make_null()]));

        let mut b = CellBuilder::new();
        regs.store_into(&mut b, &mut EmptyCellContext).unwrap();
        let cell = b.build().unwrap();
        let mut cs = cell.as_slice().unwrap();
        let loaded = load_control_regs(&mut cs, &mut EmptyCellContext).unwrap();
        assert!(loaded.c[0].is_some());
        assert!(loaded.c[1].is_none());
        assert_eq!(loaded.d[0], Some(Cell::empty_cell()));
        assert_eq!(loaded.c7.map(|t| t.len()), Some(1));
    }
}
