use tonkit_emulator::{StackEntry, TransactionEmulator, TvmEmulator};
use tonkit_types::boc::Boc;
use tonkit_types::cell::{Cell, CellBuilder, EmptyCellContext, HashBytes, Store};
use tonkit_types::dict::Dict;
use tonkit_types::models::{
    Account, AccountState, CurrencyCollection, ExtInMsgInfo, GasLimitsPrices, IntMsgInfo,
    MsgForwardPrices, MsgInfo, ShardAccount, SimpleLib, StateInit, StdAddr, StorageInfo,
    StoragePrices,
};
use tonkit_types::num::Tokens;
use tonkit_vm::VmException;

fn store_to_boc<T: Store>(value: &T) -> String {
    let mut b = CellBuilder::new();
    value.store_into(&mut b, &mut EmptyCellContext).unwrap();
    Boc::encode_base64(&b.build().unwrap())
}

fn make_code(bytes: &[u8], refs: &[Cell]) -> Cell {
    let mut b = CellBuilder::new();
    for byte in bytes {
        b.store_u8(*byte).unwrap();
    }
    for cell in refs {
        b.store_reference(cell.clone()).unwrap();
    }
    b.build().unwrap()
}

fn make_config_boc() -> String {
    fn param<T: Store>(value: &T) -> Cell {
        let mut b = CellBuilder::new();
        value.store_into(&mut b, &mut EmptyCellContext).unwrap();
        b.build().unwrap()
    }

    let gas_prices = GasLimitsPrices {
        gas_price: 26_214_400,
        gas_limit: 1_000_000,
        special_gas_limit: 100_000_000,
        gas_credit: 10_000,
        block_gas_limit: 10_000_000,
        freeze_due_limit: 100_000_000,
        delete_due_limit: 1_000_000_000,
        flat_gas_limit: 100,
        flat_gas_price: 40_000,
    };
    let fwd_prices = MsgForwardPrices {
        lump_price: 400_000,
        bit_price: 26_214_400,
        cell_price: 2_621_440_000,
        ihr_price_factor: 98_304,
        first_frac: 21_845,
        next_frac: 21_845,
    };
    let storage_prices = StoragePrices {
        utime_since: 0,
        bit_price_ps: 1,
        cell_price_ps: 500,
        mc_bit_price_ps: 1000,
        mc_cell_price_ps: 500_000,
    };

    let mut storage_dict = Dict::<u32, StoragePrices>::new();
    storage_dict.set(&0, &storage_prices).unwrap();

    let mut dict = Dict::<u32, Cell>::new();
    dict.set(&18, storage_dict.root().as_ref().unwrap()).unwrap();
    dict.set(&20, &param(&gas_prices)).unwrap();
    dict.set(&21, &param(&gas_prices)).unwrap();
    dict.set(&24, &param(&fwd_prices)).unwrap();
    dict.set(&25, &param(&fwd_prices)).unwrap();

    Boc::encode_base64(dict.root().as_ref().unwrap())
}

fn make_message_boc(info: MsgInfo) -> String {
    let mut b = CellBuilder::new();
    info.store_into(&mut b, &mut EmptyCellContext).unwrap();
    b.store_bit_zero().unwrap(); // init
    b.store_bit_zero().unwrap(); // body
    Boc::encode_base64(&b.build().unwrap())
}

fn make_tx_emulator() -> TransactionEmulator {
    let mut emulator = TransactionEmulator::new(&make_config_boc(), 1).unwrap();
    emulator.set_unixtime(1_700_000_000);
    emulator.set_lt(1_000_000);
    emulator
}

// DROP the method id, then PUSHINT 42.
const ANSWER_CODE: &[u8] = &[0x30, 0x80, 0x2a];

fn make_answer_emulator() -> TvmEmulator {
    let code = Boc::encode_base64(&make_code(ANSWER_CODE, &[]));
    let data = Boc::encode_base64(&Cell::empty_cell());
    TvmEmulator::new(&code, &data, 1).unwrap()
}

#[test]
fn get_method_returns_literal() {
    let mut emulator = make_answer_emulator();
    let output = emulator.run_get_method(85143, &[]).unwrap();

    assert_eq!(output.vm_exit_code, 0);
    assert!(output.gas_used > 0);
    assert!(output.missing_library.is_none());
    assert!(matches!(&output.stack[..], [StackEntry::Number(n)] if n == "42"));
}

#[test]
fn get_method_runs_are_deterministic() {
    let run = || {
        let mut emulator = make_answer_emulator();
        let output = emulator.run_get_method(0, &[]).unwrap();
        serde_json::to_value(&output).unwrap()
    };
    assert_eq!(run(), run());
}

#[test]
fn tiny_gas_limit_stops_the_run() {
    let mut emulator = make_answer_emulator();
    emulator.set_gas_limit(1);

    let output = emulator.run_get_method(0, &[]).unwrap();
    assert_eq!(output.vm_exit_code, VmException::OutOfGas.as_exit_code());
    assert!(output.missing_library.is_none());
    assert!(output.gas_used <= 1);
}

#[test]
fn send_commits_the_new_data() {
    let new_data = {
        let mut b = CellBuilder::new();
        b.store_u32(0xdeadbeef).unwrap();
        b.build().unwrap()
    };

    // PUSHREF, then POPCTR c4
    let code = make_code(&[0x88, 0xed, 0x54], &[new_data.clone()]);
    let mut emulator = TvmEmulator::new(
        &Boc::encode_base64(&code),
        &Boc::encode_base64(&Cell::empty_cell()),
        1,
    )
    .unwrap();

    let output = emulator
        .send_internal_message(&Boc::encode_base64(&Cell::empty_cell()), 1_000_000)
        .unwrap();
    assert_eq!(output.vm_exit_code, 0);
    assert_eq!(output.new_data, Some(Boc::encode_base64(&new_data)));
    assert!(output.actions.is_some());
}

#[test]
fn bad_c7_settings_are_rejected() {
    let mut emulator = make_answer_emulator();
    assert!(emulator
        .set_c7("0:not-a-hash", 0, 0, &"00".repeat(32), None)
        .is_err());
    assert!(emulator
        .set_c7(
            "0:2222222222222222222222222222222222222222222222222222222222222222",
            1_700_000_000,
            1_000_000_000,
            &"77".repeat(32),
            None,
        )
        .is_ok());
}

#[test]
fn transfer_to_missing_account_credits_balance() {
    let emulator = make_tx_emulator();

    let src = StdAddr::new(0, HashBytes([0x01; 32]));
    let dst = StdAddr::new(0, HashBytes([0x02; 32]));
    let msg = make_message_boc(MsgInfo::Int(IntMsgInfo {
        src: src.into(),
        dst: dst.into(),
        value: CurrencyCollection::new(1_000_000_000),
        bounce: false,
        created_lt: 500,
        ..Default::default()
    }));

    let output = emulator.emulate_transaction(&store_to_boc(&ShardAccount::EMPTY), &msg);
    assert!(output.success, "{:?}", output.error);
    assert!(output.error.is_none());
    // the compute phase was skipped, no code to run
    assert!(output.vm_exit_code.is_none());

    let tx = Boc::decode_base64(output.transaction.as_deref().unwrap()).unwrap();
    let account_cell = Boc::decode_base64(output.shard_account.as_deref().unwrap()).unwrap();
    let account = account_cell.parse::<ShardAccount>().unwrap();

    assert_eq!(account.last_trans_hash, *tx.repr_hash());
    let account = account.account.unwrap();
    assert_eq!(account.balance.tokens, Tokens::new(1_000_000_000));
    assert!(matches!(account.state, AccountState::Uninit));
}

#[test]
fn external_message_without_accept_is_rejected() {
    let emulator = make_tx_emulator();

    let dst = StdAddr::new(0, HashBytes([0x02; 32]));
    // PUSHINT 42 and return without ACCEPT
    let code = make_code(&[0x80, 0x2a], &[]);

    let account = ShardAccount {
        account: Some(Account {
            address: dst.clone().into(),
            storage_stat: StorageInfo::default(),
            last_trans_lt: 0,
            balance: CurrencyCollection::new(1_000_000_000),
            state: AccountState::Active(StateInit {
                code: Some(code),
                data: Some(Cell::empty_cell()),
                ..Default::default()
            }),
        }),
        last_trans_hash: HashBytes::default(),
        last_trans_lt: 0,
    };

    let msg = make_message_boc(MsgInfo::ExtIn(ExtInMsgInfo {
        src: None,
        dst: dst.into(),
        import_fee: Tokens::ZERO,
    }));

    let output = emulator.emulate_transaction(&store_to_boc(&account), &msg);
    assert!(!output.success);
    assert_eq!(output.vm_exit_code, Some(0));
    assert!(output.transaction.is_none());
    assert!(output.vm_log.is_some());
}

#[test]
fn malformed_inputs_produce_an_error_field() {
    let emulator = make_tx_emulator();

    let output = emulator.emulate_transaction("definitely not a boc", "neither is this");
    assert!(!output.success);
    assert!(output.error.is_some());
    assert!(output.transaction.is_none());
}

#[test]
fn seed_and_libs_setters_validate_input() {
    let mut emulator = make_tx_emulator();
    assert!(emulator.set_rand_seed("zz").is_err());
    assert!(emulator.set_rand_seed(&"ab".repeat(32)).is_ok());

    let mut libs = Dict::<HashBytes, SimpleLib>::new();
    libs.set(
        &HashBytes([0x33; 32]),
        &SimpleLib {
            public: true,
            root: Cell::empty_cell(),
        },
    )
    .unwrap();
    assert!(emulator
        .set_libs(&Boc::encode_base64(libs.root().as_ref().unwrap()))
        .is_ok());
    assert!(emulator.set_libs("???").is_err());
}
