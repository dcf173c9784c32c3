use std::{sync::Arc, time::Duration};

use alloy::primitives::B256;
use log_broadcaster::{
    Broadcaster, assert_delivered, assert_eventually, assert_no_delivery,
    test_utils::{RecordingListener, make_head, removed},
};

use crate::common::{BOB, TOKEN, setup, transfer, transfer_opts};

#[tokio::test]
async fn removed_log_is_never_delivered() -> anyhow::Result<()> {
    let setup = setup(100);
    let listener = RecordingListener::new(1);
    let _registration = setup.broadcaster.register(listener.clone(), transfer_opts(TOKEN, 2))?;
    setup.broadcaster.start()?;
    assert_eventually!(setup.broadcaster.is_connected());

    let log = transfer(TOKEN, BOB, 100, 0);
    setup.source.emit(log.clone());
    setup.source.emit(removed(log));

    tokio::time::sleep(Duration::from_millis(100)).await;
    setup.broadcaster.on_new_longest_chain(make_head(105));
    assert_no_delivery!(listener);

    setup.broadcaster.close().await;
    Ok(())
}

#[tokio::test]
async fn replacement_log_from_the_new_fork_is_delivered() -> anyhow::Result<()> {
    let setup = setup(100);
    let listener = RecordingListener::marking(1, Arc::clone(&setup.ledger));
    let _registration = setup.broadcaster.register(listener.clone(), transfer_opts(TOKEN, 2))?;
    setup.broadcaster.start()?;
    assert_eventually!(setup.broadcaster.is_connected());

    let orphaned = transfer(TOKEN, BOB, 100, 0);
    let mut canonical = orphaned.clone();
    canonical.block_hash = Some(B256::repeat_byte(0xfe));

    setup.source.emit(orphaned.clone());
    setup.source.emit(removed(orphaned));
    setup.source.emit(canonical);

    tokio::time::sleep(Duration::from_millis(100)).await;
    setup.broadcaster.on_new_longest_chain(make_head(102));
    assert_delivered!(listener, [100]);
    assert_eq!(listener.received()[0].raw_log().block_hash, Some(B256::repeat_byte(0xfe)));

    setup.broadcaster.close().await;
    Ok(())
}

#[tokio::test]
async fn removal_only_purges_the_matching_block_hash() -> anyhow::Result<()> {
    let setup = setup(100);
    let listener = RecordingListener::new(1);
    let _registration = setup.broadcaster.register(listener.clone(), transfer_opts(TOKEN, 1))?;
    setup.broadcaster.start()?;
    assert_eventually!(setup.broadcaster.is_connected());

    let first = transfer(TOKEN, BOB, 100, 0);
    let mut competing = first.clone();
    competing.block_hash = Some(B256::repeat_byte(0x01));

    setup.source.emit(first);
    setup.source.emit(removed(competing));

    tokio::time::sleep(Duration::from_millis(100)).await;
    setup.broadcaster.on_new_longest_chain(make_head(101));
    assert_delivered!(listener, [100]);

    setup.broadcaster.close().await;
    Ok(())
}
