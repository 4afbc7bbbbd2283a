//! Whole-transaction emulation over serialized account states.

use anyhow::{Context, Result};
use serde::Serialize;
use tonkit_executor::{Executor, ExecutorParams, ParsedConfig, TxError};
use tonkit_types::boc::Boc;
use tonkit_types::cell::{CellBuilder, EmptyCellContext, HashBytes, Load, Store};
use tonkit_types::dict::Dict;
use tonkit_types::models::{MsgInfo, ShardAccount, SimpleLib};
use tonkit_vm::BehaviourModifiers;

/// Replays a single inbound message against a serialized account state.
///
/// Holds the blockchain config and the per-call overrides between calls.
/// All cell-bearing arguments and results are Base64-encoded bags of
/// cells, so the emulator never exposes raw cell types to its caller.
pub struct TransactionEmulator {
    config: ParsedConfig,
    libraries: Dict<HashBytes, SimpleLib>,
    verbosity: u8,
    unixtime: u32,
    lt: u64,
    rand_seed: HashBytes,
    ignore_chksig: bool,
}

/// Emulation outcome in the transport encoding.
///
/// `success: false` with a `vm_exit_code` means the inbound external
/// message would not be accepted on chain; `success: false` with only an
/// `error` means the input itself was unusable.
#[derive(Debug, Serialize)]
pub struct TxEmulatorOutput {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard_account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_log: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TxEmulatorOutput {
    fn from_error(error: String) -> Self {
        Self {
            success: false,
            transaction: None,
            shard_account: None,
            vm_log: None,
            vm_exit_code: None,
            error: Some(error),
        }
    }
}

impl TransactionEmulator {
    /// Creates an emulator over a Base64 BoC with a config dictionary root.
    pub fn new(config_boc: &str, vm_log_verbosity: u8) -> Result<Self> {
        Ok(Self {
            config: parse_config(config_boc)?,
            libraries: Dict::new(),
            verbosity: vm_log_verbosity,
            unixtime: 0,
            lt: 0,
            rand_seed: HashBytes::default(),
            ignore_chksig: false,
        })
    }

    /// Block time override. Zero means the current wall clock time.
    pub fn set_unixtime(&mut self, unixtime: u32) {
        self.unixtime = unixtime;
    }

    pub fn set_lt(&mut self, lt: u64) {
        self.lt = lt;
    }

    /// Block entropy as a 64-character hex string.
    pub fn set_rand_seed(&mut self, rand_seed_hex: &str) -> Result<()> {
        match rand_seed_hex.parse::<HashBytes>() {
            Ok(seed) => {
                self.rand_seed = seed;
                Ok(())
            }
            Err(_) => anyhow::bail!("invalid random seed"),
        }
    }

    /// Treat every signature check in the VM as successful.
    pub fn set_ignore_chksig(&mut self, ignore_chksig: bool) {
        self.ignore_chksig = ignore_chksig;
    }

    pub fn set_config(&mut self, config_boc: &str) -> Result<()> {
        self.config = parse_config(config_boc)?;
        Ok(())
    }

    /// Replaces the shared libraries dictionary (`HashmapE 256 ^Cell`).
    pub fn set_libs(&mut self, libs_boc: &str) -> Result<()> {
        let root = Boc::decode_base64(libs_boc).context("invalid libraries")?;
        self.libraries = Dict::from_root(Some(root));
        Ok(())
    }

    /// Executes one transaction and returns the transport result.
    ///
    /// Never panics: internal failures are folded into the `error` field.
    pub fn emulate_transaction(
        &self,
        shard_account_boc: &str,
        message_boc: &str,
    ) -> TxEmulatorOutput {
        match self.emulate_transaction_ext(shard_account_boc, message_boc) {
            Ok(output) => output,
            Err(e) => TxEmulatorOutput::from_error(format!("{e:#}")),
        }
    }

    fn emulate_transaction_ext(
        &self,
        shard_account_boc: &str,
        message_boc: &str,
    ) -> Result<TxEmulatorOutput> {
        let account_root = Boc::decode_base64(shard_account_boc).context("invalid shard account")?;
        let account = account_root
            .parse::<ShardAccount>()
            .context("invalid shard account")?;

        let msg_root = Boc::decode_base64(message_boc).context("invalid message")?;
        let (address, is_external) = {
            let mut cs = msg_root.as_slice().context("invalid message")?;
            match MsgInfo::load_from(&mut cs).context("invalid message")? {
                MsgInfo::Int(info) => (info.dst.as_std().clone(), false),
                MsgInfo::ExtIn(info) => (info.dst.as_std().clone(), true),
                MsgInfo::ExtOut(_) => anyhow::bail!("unexpected outbound message"),
            }
        };

        let params = ExecutorParams {
            libraries: self.libraries.clone(),
            rand_seed: self.rand_seed,
            block_unixtime: match self.unixtime {
                0 => now(),
                unixtime => unixtime,
            },
            block_lt: self.lt,
            vm_verbosity: self.verbosity,
            modifiers: BehaviourModifiers {
                chksig_always_succeed: self.ignore_chksig,
            },
        };

        let executor = Executor::new(&params, &self.config);
        Ok(
            match executor.run_ordinary(&address, is_external, msg_root, &account) {
                Ok(out) => TxEmulatorOutput {
                    success: true,
                    transaction: Some(Boc::encode_base64(&out.transaction)),
                    shard_account: Some(serialize_account(&out.new_state)?),
                    vm_log: Some(out.vm_log),
                    vm_exit_code: out.transaction_meta.exit_code,
                    error: None,
                },
                Err(TxError::NotAccepted { exit_code, vm_log }) => TxEmulatorOutput {
                    success: false,
                    transaction: None,
                    shard_account: None,
                    vm_log: Some(vm_log),
                    vm_exit_code: Some(exit_code),
                    error: Some("external message not accepted".to_owned()),
                },
                Err(TxError::Skipped) => {
                    TxEmulatorOutput::from_error("transaction skipped".to_owned())
                }
                Err(TxError::Fatal(e)) => return Err(e),
            },
        )
    }
}

fn parse_config(config_boc: &str) -> Result<ParsedConfig> {
    let root = Boc::decode_base64(config_boc).context("invalid config")?;
    ParsedConfig::parse(root)
}

fn serialize_account(account: &ShardAccount) -> Result<String> {
    let mut b = CellBuilder::new();
    account.store_into(&mut b, &mut EmptyCellContext)?;
    let cell = b.build().context("failed to serialize the account state")?;
    Ok(Boc::encode_base64(&cell))
}

fn now() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|since_epoch| since_epoch.as_secs() as u32)
        .unwrap_or_default()
}
