use std::{sync::Arc, time::Duration};

use alloy::{primitives::B256, rpc::types::Log, sol_types::SolEvent};
use log_broadcaster::{
    Broadcaster, BroadcasterError, ConsumptionKey, DecodeError, DecodedLog, ListenerOpts,
    assert_delivered, assert_eventually, assert_no_delivery,
    test_utils::{RecordingListener, make_head, make_log},
};

use crate::common::{ALICE, BOB, OTHER_TOKEN, TOKEN, Transfer, setup, transfer, transfer_opts};

#[tokio::test]
async fn registration_without_topics_is_rejected() {
    let setup = setup(100);
    let opts = ListenerOpts::new(TOKEN, |_: &Log| Ok::<DecodedLog, DecodeError>(Arc::new(())));

    let result = setup.broadcaster.register(RecordingListener::new(1), opts);

    assert!(matches!(result, Err(BroadcasterError::MissingTopicFilters(contract)) if contract == TOKEN));
}

#[tokio::test]
async fn listener_registered_while_running_triggers_a_resubscribe() -> anyhow::Result<()> {
    let setup = setup(100);
    let first = RecordingListener::new(1);
    let _first = setup.broadcaster.register(first.clone(), transfer_opts(TOKEN, 0))?;
    setup.broadcaster.start()?;
    assert_eventually!(setup.broadcaster.is_connected());
    assert_eq!(setup.broadcaster.tracked_addresses_count(), 1);
    assert!(!setup.source.last_subscription_covers(OTHER_TOKEN));

    let second = RecordingListener::new(2);
    let second_registration =
        setup.broadcaster.register(second.clone(), transfer_opts(OTHER_TOKEN, 0))?;

    assert_eventually!(setup.source.last_subscription_covers(OTHER_TOKEN));
    assert_eventually!(setup.broadcaster.tracked_addresses_count() == 2);

    setup.broadcaster.on_new_longest_chain(make_head(101));
    setup.source.emit(transfer(OTHER_TOKEN, BOB, 101, 0));
    assert_delivered!(second, [101]);
    assert_no_delivery!(first);

    second_registration.unsubscribe();
    assert_eventually!(setup.broadcaster.tracked_addresses_count() == 1);
    assert!(!setup.source.last_subscription_covers(OTHER_TOKEN));

    setup.broadcaster.close().await;
    Ok(())
}

#[tokio::test]
async fn registration_on_a_covered_topic_does_not_resubscribe() -> anyhow::Result<()> {
    let setup = setup(100);
    let first = RecordingListener::new(1);
    let _first = setup.broadcaster.register(first.clone(), transfer_opts(TOKEN, 0))?;
    setup.broadcaster.start()?;
    assert_eventually!(setup.broadcaster.is_connected());

    let second = RecordingListener::new(2);
    let _second = setup.broadcaster.register(second.clone(), transfer_opts(TOKEN, 0))?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(setup.source.subscription_count(), 1);

    setup.broadcaster.on_new_longest_chain(make_head(100));
    setup.source.emit(transfer(TOKEN, BOB, 100, 0));
    assert_delivered!(first, [100]);
    assert_delivered!(second, [100]);

    setup.broadcaster.close().await;
    Ok(())
}

#[tokio::test]
async fn unsubscribed_listener_receives_nothing() -> anyhow::Result<()> {
    let setup = setup(100);
    let staying = RecordingListener::new(1);
    let leaving = RecordingListener::new(2);
    let _staying = setup.broadcaster.register(staying.clone(), transfer_opts(TOKEN, 0))?;
    let leaving_registration = setup.broadcaster.register(leaving.clone(), transfer_opts(TOKEN, 0))?;
    setup.broadcaster.start()?;
    assert_eventually!(setup.broadcaster.is_connected());

    leaving_registration.unsubscribe();
    tokio::time::sleep(Duration::from_millis(100)).await;

    setup.broadcaster.on_new_longest_chain(make_head(100));
    setup.source.emit(transfer(TOKEN, BOB, 100, 0));
    assert_delivered!(staying, [100]);
    assert_no_delivery!(leaving);

    setup.broadcaster.close().await;
    Ok(())
}

#[tokio::test]
async fn indexed_topic_values_are_filtered() -> anyhow::Result<()> {
    let setup = setup(100);
    let to_bob = RecordingListener::new(1);
    let opts = ListenerOpts::for_event::<Transfer>(TOKEN)
        .topic(Transfer::SIGNATURE_HASH, vec![vec![], vec![BOB.into_word()]]);
    let _registration = setup.broadcaster.register(to_bob.clone(), opts)?;
    setup.broadcaster.start()?;
    assert_eventually!(setup.broadcaster.is_connected());

    setup.broadcaster.on_new_longest_chain(make_head(100));
    setup.source.emit(transfer(TOKEN, ALICE, 100, 0));
    setup.source.emit(transfer(TOKEN, BOB, 100, 1));

    assert_delivered!(to_bob, [100]);
    assert_eq!(to_bob.received()[0].raw_log().log_index, Some(1));

    setup.broadcaster.close().await;
    Ok(())
}

#[tokio::test]
async fn undecodable_log_is_marked_consumed_for_its_job() -> anyhow::Result<()> {
    let setup = setup(100);
    let listener = RecordingListener::new(7);
    let _registration = setup.broadcaster.register(listener.clone(), transfer_opts(TOKEN, 0))?;
    setup.broadcaster.start()?;
    assert_eventually!(setup.broadcaster.is_connected());

    let garbage = make_log(TOKEN, vec![Transfer::SIGNATURE_HASH, B256::ZERO, B256::ZERO], 100, 3);
    setup.broadcaster.on_new_longest_chain(make_head(100));
    setup.source.emit(garbage.clone());

    assert_eventually!(setup.ledger.len() == 1);
    assert_no_delivery!(listener);

    let key = ConsumptionKey::new(garbage.block_hash.unwrap_or_default(), 3, 7);
    let broadcast = log_broadcaster::Broadcast::new(garbage, &make_head(100), 7);
    assert_eq!(broadcast.consumption_key(), key);
    assert!(setup.broadcaster.was_already_consumed(&mut (), &broadcast).await?);

    setup.broadcaster.close().await;
    Ok(())
}

#[tokio::test]
async fn dependents_gate_the_first_subscription() -> anyhow::Result<()> {
    let setup = setup(100);
    setup.broadcaster.add_dependents(1);
    setup.broadcaster.start()?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(setup.source.subscription_count(), 0);

    let listener = RecordingListener::new(1);
    let _registration = setup.broadcaster.register(listener, transfer_opts(TOKEN, 0))?;
    setup.broadcaster.dependent_ready();
    setup.broadcaster.await_dependents().await;

    assert_eventually!(setup.broadcaster.is_connected());
    assert_eq!(setup.source.subscription_count(), 1);
    assert!(setup.source.last_subscription_covers(TOKEN));

    setup.broadcaster.close().await;
    Ok(())
}
