use std::{sync::Arc, time::Duration};

use log_broadcaster::{
    Broadcaster, LogBroadcaster, LogBroadcasterBuilder, assert_delivered, assert_eventually,
    assert_no_delivery,
    test_utils::{FlakyLedger, MockLogSource, RecordingListener, make_head},
};

use crate::common::{BOB, TOKEN, transfer, transfer_opts};

fn flaky_setup(
    latest_block: u64,
) -> anyhow::Result<(MockLogSource, Arc<FlakyLedger>, LogBroadcaster<MockLogSource, FlakyLedger>)> {
    let source = MockLogSource::new(latest_block);
    let ledger = Arc::new(FlakyLedger::new());
    let broadcaster = LogBroadcasterBuilder::new()
        .resubscribe_debounce(Duration::from_millis(50))
        .subscribe_retry_delays(Duration::from_millis(10), Duration::from_millis(50))
        .build(source.clone(), Arc::clone(&ledger))?;
    Ok((source, ledger, broadcaster))
}

#[tokio::test]
async fn confirmed_logs_stay_pooled_when_the_ledger_read_fails() -> anyhow::Result<()> {
    let (source, ledger, broadcaster) = flaky_setup(100)?;
    let listener = RecordingListener::new(1);
    let _registration = broadcaster.register(listener.clone(), transfer_opts(TOKEN, 2))?;
    broadcaster.start()?;
    assert_eventually!(broadcaster.is_connected());

    source.emit(transfer(TOKEN, BOB, 100, 0));
    tokio::time::sleep(Duration::from_millis(100)).await;

    ledger.fail_next_reads(1);
    broadcaster.on_new_longest_chain(make_head(102));
    assert_eventually!(ledger.failed_reads() == 1);
    assert_no_delivery!(listener);

    broadcaster.on_new_longest_chain(make_head(103));
    assert_delivered!(listener, [100]);
    assert_eq!(listener.received()[0].confirmations(), 3);

    broadcaster.close().await;
    Ok(())
}

#[tokio::test]
async fn drained_unconfirmed_logs_are_restored_when_the_ledger_read_fails() -> anyhow::Result<()> {
    let (source, ledger, broadcaster) = flaky_setup(100)?;
    let listener = RecordingListener::new(1);
    let _registration = broadcaster.register(listener.clone(), transfer_opts(TOKEN, 0))?;
    broadcaster.start()?;
    assert_eventually!(broadcaster.is_connected());

    ledger.fail_next_reads(1);
    broadcaster.on_new_longest_chain(make_head(100));
    source.emit(transfer(TOKEN, BOB, 100, 0));
    assert_eventually!(ledger.failed_reads() == 1);
    assert_no_delivery!(listener);

    broadcaster.on_new_longest_chain(make_head(101));
    assert_delivered!(listener, [100]);

    broadcaster.close().await;
    Ok(())
}
