//! Ack-table counters. These live in their own test binary because the counters are
//! process-wide and other ack tests time out on purpose.

mod common;

use common::*;
use meshbot::meshtastic::DeliveryStatus;
use meshbot::metrics;
use meshbot::protobuf::meshtastic_generated::routing::Error as RoutingError;
use std::time::Duration;

#[tokio::test]
async fn timer_after_ack_changes_nothing() {
    let mut h = Harness::connected().await;
    let msg = h.hear_text(ALICE, LOCAL, "ping").await;
    let before = metrics::snapshot();

    let timeout = Duration::from_millis(200);
    let waiter = tokio::spawn(async move { msg.reply_blocking("pong", timeout).await });
    let out = h.radio.recv_packet().await;
    h.radio.ack(ALICE, out.id, RoutingError::None).await;
    let status = within("delivery", waiter).await.unwrap().unwrap();
    assert_eq!(status, DeliveryStatus::Delivered);

    // Let the timer for the same id fire.
    tokio::time::sleep(timeout * 2).await;

    let after = metrics::snapshot();
    assert_eq!(h.session.pending_acks(), 0);
    assert_eq!(after.acks_delivered, before.acks_delivered + 1);
    assert_eq!(after.acks_timed_out, before.acks_timed_out);
    assert_eq!(after.acks_failed, before.acks_failed);
}
