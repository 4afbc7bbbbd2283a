//! Compute-only emulation of a single contract.

use std::rc::Rc;

use anyhow::{Context, Result};
use num_bigint::BigInt;
use serde::Serialize;
use tonkit_types::boc::Boc;
use tonkit_types::cell::{Cell, CellBuilder, EmptyCellContext, HashBytes, Store};
use tonkit_types::dict::Dict;
use tonkit_types::models::{
    CurrencyCollection, ExtInMsgInfo, IntMsgInfo, MsgInfo, SimpleLib, StdAddr,
};
use tonkit_types::num::Tokens;
use tonkit_vm::util::OwnedCellSlice;
use tonkit_vm::{GasParams, RcStackValue, SmcInfo, VmLog, VmState};

use crate::stack::{decode_stack, encode_stack, StackEntry};

/// Runs get methods and message handlers of one contract without the
/// surrounding transaction bookkeeping.
///
/// The instance owns the contract code and data; message sends commit the
/// updated data back into the instance so that consecutive calls observe
/// each other.
pub struct TvmEmulator {
    code: Cell,
    data: Cell,
    verbosity: u8,
    libraries: Dict<HashBytes, SimpleLib>,
    address: StdAddr,
    unixtime: u32,
    balance: u64,
    rand_seed: HashBytes,
    config: Option<Cell>,
    gas_limit: Option<u64>,
}

/// Result of one VM run in the transport encoding.
#[derive(Debug, Serialize)]
pub struct TvmEmulatorOutput {
    pub vm_exit_code: i32,
    pub stack: Vec<StackEntry>,
    pub gas_used: u64,
    pub vm_log: String,
    /// Hash of the first library cell the run failed to resolve.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_library: Option<String>,
    /// Committed contract data, present only for message sends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_data: Option<String>,
    /// Committed action list root, present only for message sends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<String>,
}

impl TvmEmulator {
    pub fn new(code_boc: &str, data_boc: &str, vm_log_verbosity: u8) -> Result<Self> {
        Ok(Self {
            code: Boc::decode_base64(code_boc).context("invalid code")?,
            data: Boc::decode_base64(data_boc).context("invalid data")?,
            verbosity: vm_log_verbosity,
            libraries: Dict::new(),
            address: StdAddr::default(),
            unixtime: 0,
            balance: 0,
            rand_seed: HashBytes::default(),
            config: None,
            gas_limit: None,
        })
    }

    /// Replaces the shared libraries dictionary (`HashmapE 256 ^Cell`).
    pub fn set_libraries(&mut self, libs_boc: &str) -> Result<()> {
        let root = Boc::decode_base64(libs_boc).context("invalid libraries")?;
        self.libraries = Dict::from_root(Some(root));
        Ok(())
    }

    /// Sets the execution context the contract observes through `c7`.
    pub fn set_c7(
        &mut self,
        address: &str,
        unixtime: u32,
        balance: u64,
        rand_seed_hex: &str,
        config_boc: Option<&str>,
    ) -> Result<()> {
        let address = match address.parse::<StdAddr>() {
            Ok(address) => address,
            Err(_) => anyhow::bail!("invalid address"),
        };
        let rand_seed = match rand_seed_hex.parse::<HashBytes>() {
            Ok(seed) => seed,
            Err(_) => anyhow::bail!("invalid random seed"),
        };
        let config = match config_boc {
            Some(boc) => Some(Boc::decode_base64(boc).context("invalid config")?),
            None => None,
        };

        self.address = address;
        self.unixtime = unixtime;
        self.balance = balance;
        self.rand_seed = rand_seed;
        self.config = config;
        Ok(())
    }

    pub fn set_gas_limit(&mut self, gas_limit: u64) {
        self.gas_limit = Some(gas_limit);
    }

    /// Runs a get method with the given selector and initial stack.
    pub fn run_get_method(
        &mut self,
        method_id: i32,
        stack: &[StackEntry],
    ) -> Result<TvmEmulatorOutput> {
        let mut items = decode_stack(stack)?;
        items.push(Rc::new(BigInt::from(method_id)));
        self.run(items, false)
    }

    /// Feeds an external message body through the compute phase.
    pub fn send_external_message(&mut self, message_body_boc: &str) -> Result<TvmEmulatorOutput> {
        let body = Boc::decode_base64(message_body_boc).context("invalid message body")?;
        let info = MsgInfo::ExtIn(ExtInMsgInfo {
            src: None,
            dst: self.address.clone().into(),
            import_fee: Tokens::ZERO,
        });
        let msg_root = build_message(&info, &body).context("failed to build the message")?;

        let items = vec![
            Rc::new(BigInt::from(self.balance)) as RcStackValue,
            Rc::new(BigInt::from(0)),
            Rc::new(msg_root),
            Rc::new(OwnedCellSlice::new(body)),
            Rc::new(BigInt::from(-1)),
        ];
        self.run(items, true)
    }

    /// Feeds an internal message body through the compute phase.
    pub fn send_internal_message(
        &mut self,
        message_body_boc: &str,
        amount: u64,
    ) -> Result<TvmEmulatorOutput> {
        let body = Boc::decode_base64(message_body_boc).context("invalid message body")?;
        let info = MsgInfo::Int(IntMsgInfo {
            dst: self.address.clone().into(),
            value: CurrencyCollection::new(amount as u128),
            created_at: self.unixtime,
            ..Default::default()
        });
        let msg_root = build_message(&info, &body).context("failed to build the message")?;

        let balance = self.balance as u128 + amount as u128;
        let items = vec![
            Rc::new(BigInt::from(balance)) as RcStackValue,
            Rc::new(BigInt::from(amount)),
            Rc::new(msg_root),
            Rc::new(OwnedCellSlice::new(body)),
            Rc::new(BigInt::from(0)),
        ];
        self.run(items, true)
    }

    fn run(&mut self, items: Vec<RcStackValue>, commit: bool) -> Result<TvmEmulatorOutput> {
        let smc_info = SmcInfo::default()
            .with_now(self.unixtime)
            .with_rand_seed(self.rand_seed)
            .with_account_balance(CurrencyCollection::new(self.balance as u128))
            .with_account_addr(self.address.clone().into())
            .with_config(self.config.clone())
            .with_mycode(self.code.clone());

        let mut vm = VmState::builder()
            .with_code(self.code.clone())
            .with_data(self.data.clone())
            .with_stack(items)
            .with_smc_info(&smc_info)
            .with_gas(self.gas_params())
            .with_libraries(Box::new(self.libraries.clone()))
            .with_log(VmLog::new(self.verbosity))
            .build();

        let vm_exit_code = vm.run();
        let vm_log = std::mem::take(&mut vm.log).finish();
        let gas_used = std::cmp::min(vm.gas.gas_consumed(), vm.gas.gas_limit());
        let missing_library = vm.gas.missing_library().map(HashBytes::to_string);

        let mut new_data = None;
        let mut actions = None;
        if commit {
            if let Some(commited) = vm.commited_state.take() {
                new_data = Some(Boc::encode_base64(&commited.c4));
                actions = Some(Boc::encode_base64(&commited.c5));
                self.data = commited.c4;
            }
        }

        Ok(TvmEmulatorOutput {
            vm_exit_code,
            stack: encode_stack(&vm.stack.items)?,
            gas_used,
            vm_log,
            missing_library,
            new_data,
            actions,
        })
    }

    fn gas_params(&self) -> GasParams {
        match self.gas_limit {
            Some(limit) => GasParams {
                max: limit,
                limit,
                credit: 0,
            },
            None => GasParams::unlimited(),
        }
    }
}

fn build_message(info: &MsgInfo, body: &Cell) -> Result<Cell, tonkit_types::error::Error> {
    let context = &mut EmptyCellContext;
    let mut b = CellBuilder::new();
    info.store_into(&mut b, context)?;

    // no state init
    b.store_bit_zero()?;

    let body_slice = body.as_slice()?;
    if b.has_capacity(1 + body_slice.size_bits(), body_slice.size_refs()) {
        b.store_bit_zero()?;
        b.store_slice(&body_slice)?;
    } else {
        b.store_bit_one()?;
        b.store_reference(body.clone())?;
    }
    b.build()
}
