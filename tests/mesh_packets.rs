//! Incoming mesh packets: model updates, hop/SNR rules and event topics.

mod common;

use common::*;
use meshbot::meshtastic::{MessageType, Payload, Topic, BROADCAST_ID};
use meshbot::protobuf::meshtastic_generated as proto;
use prost::Message as _;

#[tokio::test]
async fn direct_text_updates_snr_and_hops() {
    let mut h = Harness::connected().await;
    let msg = h.hear_text(ALICE, LOCAL, "hello bot").await;

    assert_eq!(msg.text(), Some("hello bot"));
    assert_eq!(msg.hops_away, 0);
    assert!(msg.is_private());
    assert!(msg.receiving.is_some());

    let alice = h.session.node_list().get(ALICE).unwrap();
    let node = alice.read();
    assert_eq!(node.snr, 6.5);
    assert_eq!(node.hops_away, 0);
    assert_eq!(node.messages.len(), 1);
    assert_eq!(node.messages[0].message_type, MessageType::Text);
}

#[tokio::test]
async fn relayed_packet_keeps_previous_snr() {
    let mut h = Harness::connected().await;
    let mut packet = text_packet(BOB, BROADCAST_ID, "via relay");
    packet.hop_start = 5;
    packet.hop_limit = 3;
    packet.rx_snr = -12.0;
    h.radio.send_packet(packet).await;

    let msg = next(&mut h.texts).await;
    assert_eq!(msg.hops_away, 2);
    assert!(!msg.is_private());
    let bob = h.session.node_list().get(BOB).unwrap();
    assert_eq!(bob.read().hops_away, 2);
    // Node info reported 4.0; the relayed packet must not overwrite it.
    assert_eq!(bob.read().snr, 4.0);
}

#[tokio::test]
async fn missing_hop_start_counts_as_direct() {
    let mut h = Harness::connected().await;
    let mut packet = text_packet(BOB, LOCAL, "old firmware");
    packet.hop_start = 0;
    packet.hop_limit = 3;
    h.radio.send_packet(packet).await;

    let msg = next(&mut h.texts).await;
    assert_eq!(msg.hops_away, 0);
    assert_eq!(h.session.node_list().get(BOB).unwrap().read().snr, 6.5);
}

#[tokio::test]
async fn unknown_sender_becomes_placeholder() {
    let mut h = Harness::connected().await;
    let stranger = 0x5eed_0001;
    let msg = h.hear_text(stranger, BROADCAST_ID, "anyone?").await;

    let node = h.session.node_list().get(stranger).unwrap();
    assert!(node.ptr_eq(&msg.from));
    assert_eq!(node.read().short_name, "UNKN");
}

#[tokio::test]
async fn position_is_recorded_and_published() {
    let mut h = Harness::connected().await;
    let mut positions = collect_messages(&h.events, Topic::Position);
    let position = proto::Position {
        latitude_i: Some(599_133_000),
        longitude_i: Some(107_450_000),
        altitude: Some(12),
        ..Default::default()
    };
    h.radio
        .send_packet(data_packet(
            ALICE,
            BROADCAST_ID,
            proto::PortNum::PositionApp,
            position.encode_to_vec(),
        ))
        .await;

    let msg = next(&mut positions).await;
    match &msg.payload {
        Payload::Position(p) => {
            assert!((p.latitude.unwrap() - 59.9133).abs() < 1e-6);
            assert_eq!(p.altitude, Some(12));
        }
        other => panic!("Expected position, got {:?}", other),
    }
    let alice = h.session.node_list().get(ALICE).unwrap();
    assert_eq!(alice.read().positions.len(), 1);
}

#[tokio::test]
async fn device_telemetry_hits_both_topics() {
    let mut h = Harness::connected().await;
    let mut telemetry = collect_messages(&h.events, Topic::Telemetry);
    let mut device = collect_messages(&h.events, Topic::DeviceTelemetry);
    let report = proto::Telemetry {
        time: 1_700_000_000,
        variant: Some(proto::telemetry::Variant::DeviceMetrics(proto::DeviceMetrics {
            battery_level: Some(87),
            voltage: Some(4.01),
            ..Default::default()
        })),
    };
    h.radio
        .send_packet(data_packet(
            BOB,
            BROADCAST_ID,
            proto::PortNum::TelemetryApp,
            report.encode_to_vec(),
        ))
        .await;

    let a = next(&mut telemetry).await;
    let b = next(&mut device).await;
    assert_eq!(a.message_type(), MessageType::DeviceTelemetry);
    assert_eq!(b.packet_id, a.packet_id);
    let bob = h.session.node_list().get(BOB).unwrap();
    assert_eq!(bob.read().latest_device_metrics().unwrap().battery_level, Some(87));
}

#[tokio::test]
async fn neighbor_info_links_nodes() {
    let mut h = Harness::connected().await;
    let mut neighbors = collect_messages(&h.events, Topic::NeighborInfo);
    let far_away = 0x0fa7_0001;
    let info = proto::NeighborInfo {
        node_id: ALICE,
        neighbors: vec![
            proto::Neighbor {
                node_id: BOB,
                snr: 3.5,
                ..Default::default()
            },
            proto::Neighbor {
                node_id: far_away,
                snr: -7.0,
                ..Default::default()
            },
        ],
        ..Default::default()
    };
    h.radio
        .send_packet(data_packet(
            ALICE,
            BROADCAST_ID,
            proto::PortNum::NeighborinfoApp,
            info.encode_to_vec(),
        ))
        .await;
    next(&mut neighbors).await;

    let alice = h.session.node_list().get(ALICE).unwrap();
    let linked: Vec<u32> = alice.read().neighbors.iter().map(|n| n.id).collect();
    assert_eq!(linked, vec![BOB, far_away]);
    let placeholder = alice.read().neighbors[1].node.upgrade().unwrap();
    assert!(h.session.node_list().get(far_away).unwrap().ptr_eq(&placeholder));
}

#[tokio::test]
async fn routing_is_not_a_conversation_message() {
    let mut h = Harness::connected().await;
    let mut any = collect_messages(&h.events, Topic::AnyMessage);
    let mut routing = collect_messages(&h.events, Topic::Routing);

    h.radio.ack(ALICE, 0x1234, proto::routing::Error::None).await;
    next(&mut routing).await;
    h.radio.send_packet(text_packet(ALICE, LOCAL, "after ack")).await;

    let first = next(&mut any).await;
    assert_eq!(first.text(), Some("after ack"));
}

#[tokio::test]
async fn encrypted_and_malformed_packets_are_dropped() {
    let mut h = Harness::connected().await;
    let mut any = collect_messages(&h.events, Topic::AnyMessage);

    let mut encrypted = text_packet(BOB, LOCAL, "");
    encrypted.payload_variant = Some(proto::mesh_packet::PayloadVariant::Encrypted(
        bytes::Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]),
    ));
    h.radio.send_packet(encrypted).await;
    h.radio
        .send_packet(data_packet(
            BOB,
            LOCAL,
            proto::PortNum::PositionApp,
            vec![0xff, 0xff, 0xff],
        ))
        .await;
    h.radio.send_packet(text_packet(BOB, LOCAL, "still alive")).await;

    let first = next(&mut any).await;
    assert_eq!(first.text(), Some("still alive"));
}

#[tokio::test]
async fn empty_payloads_are_dropped() {
    let mut h = Harness::connected().await;
    let mut any = collect_messages(&h.events, Topic::AnyMessage);

    let mut empty = text_packet(BOB, LOCAL, "");
    empty.rx_snr = -20.0;
    h.radio.send_packet(empty).await;
    h.radio.send_packet(text_packet(ALICE, LOCAL, "not empty")).await;

    let first = next(&mut any).await;
    assert_eq!(first.text(), Some("not empty"));
    let bob = h.session.node_list().get(BOB).unwrap();
    assert!(bob.read().messages.is_empty());
    assert_eq!(bob.read().snr, 4.0);
}

#[tokio::test]
async fn unknown_ports_are_published_as_other() {
    let mut h = Harness::connected().await;
    let mut any = collect_messages(&h.events, Topic::AnyMessage);
    h.radio
        .send_packet(data_packet(
            ALICE,
            LOCAL,
            proto::PortNum::PrivateApp,
            b"opaque".to_vec(),
        ))
        .await;
    let msg = next(&mut any).await;
    match &msg.payload {
        Payload::Other { port, raw } => {
            assert_eq!(*port, proto::PortNum::PrivateApp as i32);
            assert_eq!(&raw[..], b"opaque");
        }
        other => panic!("Expected other payload, got {:?}", other),
    }
}
