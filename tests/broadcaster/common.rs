use std::{sync::Arc, time::Duration};

use alloy::{
    primitives::{Address, U256},
    rpc::types::Log,
    sol,
    sol_types::SolEvent,
};
use log_broadcaster::{
    InMemoryLedger, ListenerOpts, LogBroadcaster, LogBroadcasterBuilder,
    test_utils::{MockLogSource, make_log},
};
use tracing_subscriber::EnvFilter;

pub const TOKEN: Address = Address::repeat_byte(0xc0);
pub const OTHER_TOKEN: Address = Address::repeat_byte(0xc1);
pub const ALICE: Address = Address::repeat_byte(0xa1);
pub const BOB: Address = Address::repeat_byte(0xb0);

sol! {
    #[derive(Debug, PartialEq)]
    event Transfer(address indexed from, address indexed to, uint256 value);
}

pub struct Setup {
    pub source: MockLogSource,
    pub ledger: Arc<InMemoryLedger>,
    pub broadcaster: LogBroadcaster<MockLogSource, InMemoryLedger>,
}

pub fn setup(latest_block: u64) -> Setup {
    setup_with(latest_block, LogBroadcasterBuilder::new())
}

/// Test timings are shortened; everything else comes from `builder`.
pub fn setup_with(latest_block: u64, builder: LogBroadcasterBuilder) -> Setup {
    init_tracing();
    let source = MockLogSource::new(latest_block);
    let ledger = Arc::new(InMemoryLedger::new());
    let broadcaster = builder
        .resubscribe_debounce(Duration::from_millis(50))
        .subscribe_retry_delays(Duration::from_millis(10), Duration::from_millis(50))
        .build(source.clone(), Arc::clone(&ledger))
        .expect("valid broadcaster config");
    Setup { source, ledger, broadcaster }
}

pub fn transfer_opts(contract: Address, num_confirmations: u64) -> ListenerOpts {
    ListenerOpts::for_event::<Transfer>(contract).num_confirmations(num_confirmations)
}

/// A `Transfer` to `to` emitted by `contract` at (`block`, `index`).
pub fn transfer(contract: Address, to: Address, block: u64, index: u64) -> Log {
    let event = Transfer { from: ALICE, to, value: U256::from(block) };
    let mut log = make_log(contract, vec![], block, index);
    log.inner.data = event.encode_log_data();
    log
}

fn init_tracing() {
    _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
