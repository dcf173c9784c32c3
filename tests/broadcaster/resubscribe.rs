use std::sync::Arc;

use log_broadcaster::{
    Broadcaster, assert_delivered, assert_eventually,
    robust_provider::Error,
    test_utils::{RecordingListener, make_head},
};

use crate::common::{BOB, TOKEN, setup, transfer, transfer_opts};

#[tokio::test]
async fn failed_subscription_is_replaced() -> anyhow::Result<()> {
    let setup = setup(100);
    let listener = RecordingListener::marking(1, Arc::clone(&setup.ledger));
    let _registration = setup.broadcaster.register(listener.clone(), transfer_opts(TOKEN, 0))?;
    setup.broadcaster.start()?;
    assert_eventually!(setup.broadcaster.is_connected());

    setup.source.fail_subscription(Error::SubscriptionClosed);

    assert_eventually!(setup.source.subscription_count() == 2);
    assert_eventually!(setup.broadcaster.is_connected());

    setup.broadcaster.on_new_longest_chain(make_head(101));
    setup.source.emit(transfer(TOKEN, BOB, 101, 0));
    assert_delivered!(listener, [101]);

    setup.broadcaster.close().await;
    Ok(())
}

#[tokio::test]
async fn ended_subscription_is_replaced() -> anyhow::Result<()> {
    let setup = setup(100);
    let listener = RecordingListener::new(1);
    let _registration = setup.broadcaster.register(listener.clone(), transfer_opts(TOKEN, 0))?;
    setup.broadcaster.start()?;
    assert_eventually!(setup.broadcaster.is_connected());

    setup.source.end_subscription();

    assert_eventually!(setup.source.subscription_count() == 2);
    assert_eventually!(setup.source.open_subscriptions() == 1);

    setup.broadcaster.close().await;
    Ok(())
}

#[tokio::test]
async fn subscribe_is_retried_until_the_node_accepts() -> anyhow::Result<()> {
    let setup = setup(100);
    setup.source.fail_next_subscriptions(3);
    let listener = RecordingListener::new(1);
    let _registration = setup.broadcaster.register(listener.clone(), transfer_opts(TOKEN, 0))?;
    setup.broadcaster.start()?;

    assert_eventually!(setup.broadcaster.is_connected());
    assert_eq!(setup.source.subscription_count(), 1);

    setup.broadcaster.close().await;
    Ok(())
}
