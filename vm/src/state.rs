use std::rc::Rc;

use tonkit_types::cell::{Cell, CellContext, LoadMode};

use crate::cont::{
    ControlData, ControlRegs, ExcQuitCont, OrdCont, QuitCont, RcCont,
};
use crate::dispatch::DispatchTable;
use crate::error::{AsException, VmException, VmResult};
use crate::gas::{GasConsumer, GasParams, LibraryProvider};
use crate::instr::{codepage, codepage0};
use crate::log::VmLog;
use crate::smc_info::SmcInfo;
use crate::stack::{RcStackValue, Stack, Tuple};
use crate::util::OwnedCellSlice;

/// Which control registers [`VmState::extract_cc`] moves into the
/// return continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveCr {
    C0,
    C0C1,
    C0C1C2,
}

impl SaveCr {
    const fn save_c1(self) -> bool {
        matches!(self, Self::C0C1 | Self::C0C1C2)
    }

    const fn save_c2(self) -> bool {
        matches!(self, Self::C0C1C2)
    }
}

/// Persistent data and actions committed by `COMMIT` or by a
/// successful run.
#[derive(Debug, Clone)]
pub struct CommitedState {
    pub c4: Cell,
    pub c5: Cell,
}

/// Behaviour switches applied by the host, not by the executed code.
#[derive(Debug, Clone, Copy, Default)]
pub struct BehaviourModifiers {
    /// Treat every signature check as successful. Used when replaying
    /// external messages whose signature is unknown or stripped.
    pub chksig_always_succeed: bool,
}

pub struct VmState {
    pub code: OwnedCellSlice,
    pub stack: Rc<Stack>,
    pub cr: ControlRegs,
    pub commited_state: Option<CommitedState>,
    pub steps: u64,
    pub quit0: Rc<QuitCont>,
    pub quit1: Rc<QuitCont>,
    pub gas: GasConsumer,
    pub cp: &'static DispatchTable,
    pub modifiers: BehaviourModifiers,
    pub log: VmLog,
}

impl VmState {
    const MAX_DATA_DEPTH: u16 = 512;

    pub fn builder() -> VmStateBuilder {
        VmStateBuilder::default()
    }

    /// Runs the VM until it terminates and returns the exit code.
    pub fn run(&mut self) -> i32 {
        let mut res = 0;
        while res == 0 {
            res = match self.step() {
                Ok(res) => res,
                Err(e) => {
                    let exception = e.as_exception();
                    vm_log!(self, "unhandled exception {}: {e}", exception as u8);
                    match self.throw_exception(exception as i32) {
                        Ok(res) => res,
                        Err(e) => {
                            vm_log!(self, "exception in exception handler: {e}");
                            return exception.as_exit_code();
                        }
                    }
                }
            };
        }

        let exit_code = !res;
        if (exit_code == 0 || exit_code == 1) && !self.try_commit() {
            vm_log!(self, "cannot commit c4 and c5");
            self.stack = Rc::new(Stack::default());
            return VmException::CellOverflow.as_exit_code();
        }
        exit_code
    }

    pub fn step(&mut self) -> VmResult<i32> {
        self.steps += 1;

        let (data_empty, has_refs) = {
            let code = self.code.apply()?;
            (code.is_data_empty(), !code.is_refs_empty())
        };

        if !data_empty {
            self.log.write_stack(&self.stack);
            self.log.write_gas_remaining(self.gas.gas_remaining());
            let cp = self.cp;
            cp.dispatch(self)
        } else if has_refs {
            vm_log!(self, "implicit JMPREF");
            self.gas.try_consume_implicit_jmpref_gas()?;
            let cell = self.code.apply()?.get_reference_cloned(0)?;
            let cell = self.gas.load_cell(cell, LoadMode::Full)?;
            self.code = OwnedCellSlice::new(cell);
            Ok(0)
        } else {
            vm_log!(self, "implicit RET");
            self.gas.try_consume_implicit_ret_gas()?;
            self.ret()
        }
    }

    pub fn throw_exception(&mut self, n: i32) -> VmResult<i32> {
        self.steps += 1;
        let stack = Rc::make_mut(&mut self.stack);
        stack.items.clear();
        ok!(stack.push_int(0));
        ok!(stack.push_int(n));
        self.gas.try_consume_exception_gas()?;
        let Some(c2) = self.cr.get_c(2) else {
            vm_bail!(Fatal("c2 is undefined"));
        };
        self.jump(c2)
    }

    pub fn throw_exception_with_arg(&mut self, n: i32, arg: RcStackValue) -> VmResult<i32> {
        self.steps += 1;
        let stack = Rc::make_mut(&mut self.stack);
        stack.items.clear();
        ok!(stack.push_raw(arg));
        ok!(stack.push_int(n));
        self.gas.try_consume_exception_gas()?;
        let Some(c2) = self.cr.get_c(2) else {
            vm_bail!(Fatal("c2 is undefined"));
        };
        self.jump(c2)
    }

    pub fn jump(&mut self, cont: RcCont) -> VmResult<i32> {
        if let Some(control_data) = cont.get_control_data() {
            if control_data.stack.is_some() || control_data.nargs.is_some() {
                return self.jump_ext(cont, None);
            }
        }
        cont.jump(self)
    }

    pub fn jump_ext(&mut self, mut cont: RcCont, pass_args: Option<u16>) -> VmResult<i32> {
        let depth = self.stack.depth();

        let (nargs, has_cont_stack) = match cont.get_control_data() {
            Some(data) => (data.nargs, data.stack.is_some()),
            None => (None, false),
        };

        let copy = match (nargs, pass_args) {
            (Some(nargs), Some(pass_args)) => {
                vm_ensure!(nargs <= pass_args, StackUnderflow(nargs as usize));
                Some(nargs)
            }
            (Some(nargs), None) => Some(nargs),
            (None, pass_args) => pass_args,
        };
        if let Some(copy) = copy {
            vm_ensure!(copy as usize <= depth, StackUnderflow(copy as usize));
        }

        if let Some(control_data) = cont.get_control_data() {
            self.preclear_cr(&control_data.save);
        }

        if has_cont_stack {
            let cont_stack = match Rc::get_mut(&mut cont) {
                Some(cont) => cont.get_control_data_mut().and_then(|d| d.stack.take()),
                None => cont.get_control_data().and_then(|d| d.stack.clone()),
            };
            if let Some(cont_stack) = cont_stack {
                let mut new_stack = Rc::unwrap_or_clone(cont_stack);
                let n = copy.map(|c| c as usize).unwrap_or(depth);
                ok!(new_stack.move_from_stack(Rc::make_mut(&mut self.stack), n));
                self.gas.try_consume_stack_gas(Some(&new_stack))?;
                self.stack = Rc::new(new_stack);
            }
        } else if let Some(copy) = copy {
            if (copy as usize) < depth {
                ok!(Rc::make_mut(&mut self.stack).drop_bottom(depth - copy as usize));
                self.gas.try_consume_stack_depth_gas(copy as u64)?;
            }
        }

        cont.jump(self)
    }

    pub fn call(&mut self, cont: RcCont) -> VmResult<i32> {
        if let Some(control_data) = cont.get_control_data() {
            if control_data.save.c[0].is_some() {
                // the callee will restore c0 itself
                return self.jump(cont);
            }
            if control_data.stack.is_some() || control_data.nargs.is_some() {
                return self.call_ext(cont, None, None);
            }
        }

        let ret = ok!(self.extract_cc(SaveCr::C0, None, None));
        self.cr.c[0] = Some(ret);
        cont.jump(self)
    }

    pub fn call_ext(
        &mut self,
        cont: RcCont,
        pass_args: Option<u16>,
        ret_args: Option<u16>,
    ) -> VmResult<i32> {
        let nargs = match cont.get_control_data() {
            Some(data) => {
                if data.save.c[0].is_some() {
                    return self.jump_ext(cont, pass_args);
                }
                data.nargs
            }
            None => None,
        };

        let copy = match (nargs, pass_args) {
            (Some(nargs), Some(pass_args)) => {
                vm_ensure!(nargs <= pass_args, StackUnderflow(nargs as usize));
                Some(pass_args)
            }
            (Some(nargs), None) => Some(nargs),
            (None, pass_args) => pass_args,
        };

        let ret = ok!(self.extract_cc(SaveCr::C0, copy, ret_args));
        self.cr.c[0] = Some(ret);
        self.jump_ext(cont, None)
    }

    pub fn ret(&mut self) -> VmResult<i32> {
        let cont = ok!(self.take_c0());
        self.jump(cont)
    }

    pub fn ret_ext(&mut self, ret_args: Option<u16>) -> VmResult<i32> {
        let cont = ok!(self.take_c0());
        self.jump_ext(cont, ret_args)
    }

    pub fn ret_alt(&mut self) -> VmResult<i32> {
        let cont = ok!(self.take_c1());
        self.jump(cont)
    }

    /// Turns the remaining code and (optionally part of) the stack into
    /// an ordinary return continuation.
    pub fn extract_cc(
        &mut self,
        mode: SaveCr,
        stack_copy: Option<u16>,
        nargs: Option<u16>,
    ) -> VmResult<RcCont> {
        let code = std::mem::take(&mut self.code);

        let mut saved_stack = None;
        if let Some(copy) = stack_copy {
            let depth = self.stack.depth();
            vm_ensure!(copy as usize <= depth, StackUnderflow(copy as usize));
            if (copy as usize) < depth {
                let mut callee_stack = Stack::default();
                ok!(callee_stack.move_from_stack(Rc::make_mut(&mut self.stack), copy as usize));
                self.gas.try_consume_stack_gas(Some(&callee_stack))?;
                saved_stack = Some(std::mem::replace(&mut self.stack, Rc::new(callee_stack)));
            }
        }

        let mut save = ControlRegs::default();
        save.c[0] = std::mem::replace(&mut self.cr.c[0], Some(self.quit0.clone()));
        if mode.save_c1() {
            save.c[1] = std::mem::replace(&mut self.cr.c[1], Some(self.quit1.clone()));
        }
        if mode.save_c2() {
            save.c[2] = self.cr.c[2].clone();
        }

        Ok(Rc::new(OrdCont {
            data: ControlData {
                nargs,
                stack: saved_stack,
                save,
                cp: Some(self.cp.id()),
            },
            code,
        }))
    }

    pub fn ref_to_cont(&mut self, cell: Cell) -> VmResult<RcCont> {
        let cell = self.gas.load_cell(cell, LoadMode::Full)?;
        Ok(Rc::new(OrdCont::simple(
            OwnedCellSlice::new(cell),
            self.cp.id(),
        )))
    }

    pub fn take_c0(&mut self) -> VmResult<RcCont> {
        match std::mem::replace(&mut self.cr.c[0], Some(self.quit0.clone())) {
            Some(cont) => Ok(cont),
            None => vm_bail!(Fatal("c0 is undefined")),
        }
    }

    pub fn take_c1(&mut self) -> VmResult<RcCont> {
        match std::mem::replace(&mut self.cr.c[1], Some(self.quit1.clone())) {
            Some(cont) => Ok(cont),
            None => vm_bail!(Fatal("c1 is undefined")),
        }
    }

    pub fn adjust_cr(&mut self, save: &ControlRegs) {
        self.cr.merge(save);
    }

    pub fn preclear_cr(&mut self, save: &ControlRegs) {
        self.cr.preclear(save);
    }

    pub fn force_cp(&mut self, cp: u16) -> VmResult<()> {
        match codepage(cp) {
            Some(table) => {
                self.cp = table;
                Ok(())
            }
            None => vm_bail!(UnknownCodePage(cp)),
        }
    }

    pub fn try_commit(&mut self) -> bool {
        if let (Some(c4), Some(c5)) = (&self.cr.d[0], &self.cr.d[1]) {
            if c4.level() == 0
                && c5.level() == 0
                && c4.repr_depth() <= Self::MAX_DATA_DEPTH
                && c5.repr_depth() <= Self::MAX_DATA_DEPTH
            {
                self.commited_state = Some(CommitedState {
                    c4: c4.clone(),
                    c5: c5.clone(),
                });
                return true;
            }
        }
        false
    }

    pub fn force_commit(&mut self) -> VmResult<()> {
        if self.try_commit() {
            Ok(())
        } else {
            vm_bail!(Fatal("cannot commit c4 and c5"))
        }
    }
}

pub struct VmStateBuilder {
    code: OwnedCellSlice,
    data: Cell,
    stack: Vec<RcStackValue>,
    c7: Option<Rc<Tuple>>,
    gas: GasParams,
    libraries: Option<Box<dyn LibraryProvider>>,
    modifiers: BehaviourModifiers,
    log: VmLog,
}

impl Default for VmStateBuilder {
    fn default() -> Self {
        Self {
            code: Default::default(),
            data: Cell::empty_cell(),
            stack: Vec::new(),
            c7: None,
            gas: GasParams::unlimited(),
            libraries: None,
            modifiers: BehaviourModifiers::default(),
            log: VmLog::default(),
        }
    }
}

impl VmStateBuilder {
    pub fn with_code<T: Into<OwnedCellSlice>>(mut self, code: T) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_data(mut self, data: Cell) -> Self {
        self.data = data;
        self
    }

    pub fn with_stack(mut self, items: Vec<RcStackValue>) -> Self {
        self.stack = items;
        self
    }

    pub fn with_c7(mut self, c7: Rc<Tuple>) -> Self {
        self.c7 = Some(c7);
        self
    }

    pub fn with_smc_info(mut self, info: &SmcInfo) -> Self {
        self.c7 = Some(info.build_c7());
        self
    }

    pub fn with_gas(mut self, gas: GasParams) -> Self {
        self.gas = gas;
        self
    }

    pub fn with_libraries(mut self, libraries: Box<dyn LibraryProvider>) -> Self {
        self.libraries = Some(libraries);
        self
    }

    pub fn with_modifiers(mut self, modifiers: BehaviourModifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn with_log(mut self, log: VmLog) -> Self {
        self.log = log;
        self
    }

    pub fn build(self) -> VmState {
        let quit0 = Rc::new(QuitCont { exit_code: 0 });
        let quit1 = Rc::new(QuitCont { exit_code: 1 });

        let gas = match self.libraries {
            Some(libraries) => GasConsumer::with_libraries(self.gas, libraries),
            None => GasConsumer::new(self.gas),
        };

        VmState {
            cr: ControlRegs {
                c: [
                    Some(quit0.clone()),
                    Some(quit1.clone()),
                    Some(Rc::new(ExcQuitCont)),
                    Some(Rc::new(OrdCont::simple(self.code.clone(), 0))),
                ],
                d: [Some(self.data), Some(Cell::empty_cell())],
                c7: Some(self.c7.unwrap_or_default()),
            },
            code: self.code,
            stack: Rc::new(Stack::with_items(self.stack)),
            commited_state: None,
            steps: 0,
            quit0,
            quit1,
            gas,
            cp: codepage0(),
            modifiers: self.modifiers,
            log: self.log,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonkit_types::cell::CellBuilder;

    fn code(bytes: &[u8]) -> Cell {
        let mut b = CellBuilder::new();
        b.store_raw(bytes, bytes.len() as u16 * 8).unwrap();
        b.build().unwrap()
    }

    #[test]
    fn empty_code_returns_immediately() {
        let mut vm = VmState::builder().build();
        // implicit RET jumps to quit0
        assert_eq!(vm.run(), 0);
        assert_eq!(vm.steps, 1);
    }

    #[test]
    fn stack_underflow_becomes_exception_exit_code() {
        // ADD on an empty stack
        let mut vm = VmState::builder().with_code(code(&[0xa0])).build();
        assert_eq!(
            vm.run(),
            VmException::StackUnderflow.as_exit_code()
        );
    }

    #[test]
    fn out_of_gas_exit_code() {
        // an endless loop of NOPs cannot finish on a small gas limit
        let mut vm = VmState::builder()
            .with_code(code(&[0x00, 0x00, 0x00, 0x00]))
            .with_gas(GasParams {
                max: 30,
                limit: 30,
                credit: 0,
            })
            .build();
        assert_eq!(vm.run(), VmException::OutOfGas.as_exit_code());
    }

    #[test]
    fn commited_state_is_set_on_success() {
        let mut vm = VmState::builder()
            .with_code(code(&[0x00]))
            .with_data(Cell::empty_cell())
            .build();
        assert_eq!(vm.run(), 0);
        let commited = vm.commited_state.expect("commited state must be set");
        assert_eq!(commited.c4, Cell::empty_cell());
        assert_eq!(commited.c5, Cell::empty_cell());
    }
}
