use std::{sync::Arc, time::Duration};

use log_broadcaster::{
    Broadcaster, LogBroadcasterBuilder, assert_delivered, assert_eventually, assert_no_delivery,
    test_utils::{RecordingListener, make_head},
};

use crate::common::{BOB, OTHER_TOKEN, TOKEN, setup, setup_with, transfer, transfer_opts};

#[tokio::test]
async fn backfills_the_configured_depth_behind_the_latest_block() -> anyhow::Result<()> {
    let setup = setup_with(200, LogBroadcasterBuilder::new().block_backfill_depth(10));
    for block in [185, 190, 195] {
        setup.source.add_historical_log(transfer(TOKEN, BOB, block, 0));
    }
    setup.source.add_historical_log(transfer(OTHER_TOKEN, BOB, 196, 0));

    let listener = RecordingListener::marking(1, Arc::clone(&setup.ledger));
    let _registration = setup.broadcaster.register(listener.clone(), transfer_opts(TOKEN, 0))?;
    setup.broadcaster.start()?;
    assert_eventually!(setup.broadcaster.is_connected());

    setup.broadcaster.on_new_longest_chain(make_head(200));

    assert_delivered!(listener, [190, 195]);
    assert_eq!(setup.source.log_requests(), vec![(190, 200)]);

    setup.broadcaster.close().await;
    Ok(())
}

#[tokio::test]
async fn backfill_is_split_into_batches() -> anyhow::Result<()> {
    let setup = setup_with(
        200,
        LogBroadcasterBuilder::new().block_backfill_depth(25).log_backfill_batch_size(10),
    );
    let listener = RecordingListener::new(1);
    let _registration = setup.broadcaster.register(listener.clone(), transfer_opts(TOKEN, 0))?;
    setup.broadcaster.start()?;

    assert_eventually!(setup.source.log_requests().len() == 3);
    assert_eq!(setup.source.log_requests(), vec![(175, 184), (185, 194), (195, 200)]);

    setup.broadcaster.close().await;
    Ok(())
}

#[tokio::test]
async fn saved_head_moves_the_backfill_start_back() -> anyhow::Result<()> {
    let setup = setup_with(
        200,
        LogBroadcasterBuilder::new().block_backfill_depth(10).highest_saved_head(make_head(150)),
    );
    for block in [130, 140, 190] {
        setup.source.add_historical_log(transfer(TOKEN, BOB, block, 0));
    }

    let listener = RecordingListener::marking(1, Arc::clone(&setup.ledger));
    let _registration = setup.broadcaster.register(listener.clone(), transfer_opts(TOKEN, 5))?;
    setup.broadcaster.start()?;
    assert_eventually!(!setup.source.log_requests().is_empty());
    // Confirmed logs are only dispatched on a head, so let the backfill land in the pool first.
    tokio::time::sleep(Duration::from_millis(100)).await;

    setup.broadcaster.on_new_longest_chain(make_head(200));

    assert_delivered!(listener, [140, 190]);
    assert_eq!(setup.source.log_requests()[0], (135, 200));

    setup.broadcaster.close().await;
    Ok(())
}

#[tokio::test]
async fn failed_batch_keeps_the_saved_head_start() -> anyhow::Result<()> {
    let setup = setup_with(
        200,
        LogBroadcasterBuilder::new()
            .block_backfill_depth(10)
            .log_backfill_batch_size(10)
            .highest_saved_head(make_head(150)),
    );
    setup.source.fail_next_log_requests(1);
    setup.source.add_historical_log(transfer(TOKEN, BOB, 145, 0));

    let listener = RecordingListener::marking(1, Arc::clone(&setup.ledger));
    let _registration = setup.broadcaster.register(listener.clone(), transfer_opts(TOKEN, 0))?;
    setup.broadcaster.start()?;
    setup.broadcaster.on_new_longest_chain(make_head(200));

    assert_delivered!(listener, [145]);
    let requests = setup.source.log_requests();
    assert_eq!(requests[..2], [(140, 149), (140, 149)]);
    assert_eq!(setup.source.subscription_count(), 1);

    setup.broadcaster.close().await;
    Ok(())
}

#[tokio::test]
async fn backfill_skip_ignores_the_saved_head() -> anyhow::Result<()> {
    let setup = setup_with(
        200,
        LogBroadcasterBuilder::new()
            .block_backfill_depth(10)
            .block_backfill_skip(true)
            .highest_saved_head(make_head(150)),
    );
    for block in [140, 195] {
        setup.source.add_historical_log(transfer(TOKEN, BOB, block, 0));
    }

    let listener = RecordingListener::new(1);
    let _registration = setup.broadcaster.register(listener.clone(), transfer_opts(TOKEN, 0))?;
    setup.broadcaster.start()?;
    assert_eventually!(setup.broadcaster.is_connected());

    setup.broadcaster.on_new_longest_chain(make_head(200));

    assert_delivered!(listener, [195]);
    assert_eq!(setup.source.log_requests(), vec![(190, 200)]);

    setup.broadcaster.close().await;
    Ok(())
}

#[tokio::test]
async fn replay_backfills_again_from_the_requested_block() -> anyhow::Result<()> {
    let setup = setup_with(200, LogBroadcasterBuilder::new().block_backfill_depth(10));
    for block in [150, 195] {
        setup.source.add_historical_log(transfer(TOKEN, BOB, block, 0));
    }

    let listener = RecordingListener::new(1);
    let _registration = setup.broadcaster.register(listener.clone(), transfer_opts(TOKEN, 0))?;
    setup.broadcaster.start()?;
    assert_eventually!(setup.broadcaster.is_connected());

    setup.broadcaster.on_new_longest_chain(make_head(200));
    assert_delivered!(listener, [195]);

    setup.broadcaster.replay_from_block(140);

    assert_delivered!(listener, [195, 150, 195]);
    assert_eq!(setup.source.subscription_count(), 2);
    assert_eq!(setup.source.log_requests(), vec![(190, 200), (140, 200)]);

    setup.broadcaster.close().await;
    Ok(())
}

#[tokio::test]
async fn replayed_logs_already_consumed_are_skipped() -> anyhow::Result<()> {
    let setup = setup_with(200, LogBroadcasterBuilder::new().block_backfill_depth(10));
    setup.source.add_historical_log(transfer(TOKEN, BOB, 195, 0));

    let listener = RecordingListener::marking(1, Arc::clone(&setup.ledger));
    let _registration = setup.broadcaster.register(listener.clone(), transfer_opts(TOKEN, 0))?;
    setup.broadcaster.start()?;
    assert_eventually!(setup.broadcaster.is_connected());

    setup.broadcaster.on_new_longest_chain(make_head(200));
    assert_delivered!(listener, [195]);

    setup.broadcaster.replay_from_block(190);
    assert_eventually!(setup.source.log_requests().len() == 2);
    assert_no_delivery!(listener);

    setup.broadcaster.close().await;
    Ok(())
}

#[tokio::test]
async fn close_during_backfill_waits_for_it_and_stops_delivery() -> anyhow::Result<()> {
    let setup = setup(200);
    setup.source.set_log_request_delay(Duration::from_secs(30));
    setup.source.add_historical_log(transfer(TOKEN, BOB, 195, 0));

    let listener = RecordingListener::new(1);
    let _registration = setup.broadcaster.register(listener.clone(), transfer_opts(TOKEN, 0))?;
    setup.broadcaster.start()?;
    setup.broadcaster.on_new_longest_chain(make_head(200));
    assert_eventually!(!setup.source.log_requests().is_empty());

    tokio::time::timeout(Duration::from_secs(5), setup.broadcaster.close()).await?;

    assert_eq!(setup.source.open_subscriptions(), 0);
    assert!(!setup.broadcaster.is_connected());
    setup.source.emit(transfer(TOKEN, BOB, 200, 0));
    assert_no_delivery!(listener);

    Ok(())
}
