use std::sync::Arc;

use log_broadcaster::{
    Broadcaster, LogBroadcasterBuilder, assert_delivered, assert_eventually, assert_no_delivery,
    test_utils::{RecordingListener, make_head},
};

use crate::common::{BOB, TOKEN, Transfer, setup, setup_with, transfer, transfer_opts};

#[tokio::test]
async fn zero_confirmations_dispatches_as_soon_as_the_head_covers_the_log() -> anyhow::Result<()> {
    let setup = setup(100);
    let listener = RecordingListener::marking(1, Arc::clone(&setup.ledger));
    let _registration = setup.broadcaster.register(listener.clone(), transfer_opts(TOKEN, 0))?;
    setup.broadcaster.start()?;
    assert_eventually!(setup.broadcaster.is_connected());

    setup.broadcaster.on_new_longest_chain(make_head(100));
    setup.source.emit(transfer(TOKEN, BOB, 100, 0));

    assert_delivered!(listener, [100]);
    let broadcast = &listener.received()[0];
    assert_eq!(broadcast.decoded_log::<Transfer>().map(|transfer| transfer.to), Some(BOB));
    assert_eq!(broadcast.confirmations(), 0);

    setup.broadcaster.on_new_longest_chain(make_head(101));
    assert_no_delivery!(listener);

    setup.broadcaster.close().await;
    Ok(())
}

#[tokio::test]
async fn log_ahead_of_the_head_waits_for_it() -> anyhow::Result<()> {
    let setup = setup(100);
    let listener = RecordingListener::new(1);
    let _registration = setup.broadcaster.register(listener.clone(), transfer_opts(TOKEN, 0))?;
    setup.broadcaster.start()?;
    assert_eventually!(setup.broadcaster.is_connected());

    setup.broadcaster.on_new_longest_chain(make_head(99));
    setup.source.emit(transfer(TOKEN, BOB, 100, 0));
    assert_no_delivery!(listener);

    setup.broadcaster.on_new_longest_chain(make_head(100));
    assert_delivered!(listener, [100]);

    setup.broadcaster.close().await;
    Ok(())
}

#[tokio::test]
async fn log_is_delivered_exactly_once_when_confirmed() -> anyhow::Result<()> {
    let setup = setup(100);
    let listener = RecordingListener::marking(1, Arc::clone(&setup.ledger));
    let _registration = setup.broadcaster.register(listener.clone(), transfer_opts(TOKEN, 3))?;
    setup.broadcaster.start()?;
    assert_eventually!(setup.broadcaster.is_connected());

    setup.source.emit(transfer(TOKEN, BOB, 100, 0));
    setup.broadcaster.on_new_longest_chain(make_head(101));
    assert_no_delivery!(listener);
    setup.broadcaster.on_new_longest_chain(make_head(102));
    assert_no_delivery!(listener);

    setup.broadcaster.on_new_longest_chain(make_head(103));
    assert_delivered!(listener, [100]);
    assert_eq!(listener.received()[0].confirmations(), 3);

    setup.broadcaster.on_new_longest_chain(make_head(104));
    assert_no_delivery!(listener);
    assert_eq!(setup.ledger.len(), 1);

    setup.broadcaster.close().await;
    Ok(())
}

#[tokio::test]
async fn each_listener_is_served_at_its_own_depth() -> anyhow::Result<()> {
    // Retention follows the deepest listener even with a shallower finality depth.
    let setup = setup_with(100, LogBroadcasterBuilder::new().finality_depth(1));
    let shallow = RecordingListener::marking(1, Arc::clone(&setup.ledger));
    let deep = RecordingListener::marking(2, Arc::clone(&setup.ledger));
    let _shallow = setup.broadcaster.register(shallow.clone(), transfer_opts(TOKEN, 2))?;
    let _deep = setup.broadcaster.register(deep.clone(), transfer_opts(TOKEN, 5))?;
    setup.broadcaster.start()?;
    assert_eventually!(setup.broadcaster.is_connected());

    setup.source.emit(transfer(TOKEN, BOB, 100, 0));
    assert_no_delivery!(shallow);

    setup.broadcaster.on_new_longest_chain(make_head(102));
    assert_delivered!(shallow, [100]);
    assert_no_delivery!(deep);

    setup.broadcaster.on_new_longest_chain(make_head(104));
    assert_no_delivery!(deep);

    setup.broadcaster.on_new_longest_chain(make_head(105));
    assert_delivered!(deep, [100]);
    assert_no_delivery!(shallow);

    setup.broadcaster.close().await;
    Ok(())
}

#[tokio::test]
async fn logs_older_than_retention_are_evicted() -> anyhow::Result<()> {
    let setup = setup_with(100, LogBroadcasterBuilder::new().finality_depth(2));
    let listener = RecordingListener::new(1);
    let _registration = setup.broadcaster.register(listener.clone(), transfer_opts(TOKEN, 1))?;
    setup.broadcaster.start()?;
    assert_eventually!(setup.broadcaster.is_connected());

    setup.source.emit(transfer(TOKEN, BOB, 100, 0));
    setup.broadcaster.on_new_longest_chain(make_head(99));
    assert_no_delivery!(listener);

    // Without a consumption marker the log is offered again on every head until it is evicted.
    setup.broadcaster.on_new_longest_chain(make_head(101));
    assert_delivered!(listener, [100]);
    setup.broadcaster.on_new_longest_chain(make_head(103));
    assert_delivered!(listener, [100, 100]);
    setup.broadcaster.on_new_longest_chain(make_head(104));
    assert_no_delivery!(listener);

    setup.broadcaster.close().await;
    Ok(())
}
