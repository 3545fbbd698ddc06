//! Node join/relay end-to-end scenarios (S5) plus the cross-role handshake.

use crate::mock_radio::{MockClock, MockLog, MockRadio};
use loramesh::config::MeshConfig;
use loramesh::frame::{Frame, MessageType, BROADCAST_ID};
use loramesh::node::NodeJoinEngine;

fn beacon(src: u8, hops: u8) -> Frame {
    Frame::new(src, BROADCAST_ID, hops, MessageType::Beacon, &[0u8]).unwrap()
}

// S5 — parent handover: prefers lower hops when RSSI ties.
#[test]
fn node_prefers_fewer_hops_when_rssi_ties() {
    let mut node = NodeJoinEngine::new(MeshConfig::default(), 0x42);
    let mut radio = MockRadio::new();
    let clock = MockClock::new(1_000);

    radio.rssi = -60;
    radio.push_frame(&beacon(0xA0, 2));
    node.poll_receive(&mut radio, clock.now_ms(), &mut MockLog::new());

    radio.rssi = -60;
    radio.push_frame(&beacon(0xB0, 1));
    node.poll_receive(&mut radio, clock.now_ms(), &mut MockLog::new());

    node.tick(&mut radio, &clock);

    let join_req = radio
        .sent_frames()
        .into_iter()
        .find(|f| f.msg_type == MessageType::JoinReq)
        .expect("node must attempt to join a candidate");
    assert_eq!(join_req.dst, 0xB0, "must prefer the fewer-hops candidate when RSSI ties");
}

// S5 — attach on JOIN_ACK.
#[test]
fn node_attaches_to_parent_after_join_ack() {
    let mut node = NodeJoinEngine::new(MeshConfig::default(), 0x42);
    let mut radio = MockRadio::new();
    let clock = MockClock::new(1_000);
    let mut log = MockLog::new();

    radio.push_frame(&beacon(0x10, 1));
    node.poll_receive(&mut radio, clock.now_ms(), &mut log);
    node.tick(&mut radio, &clock);
    assert!(!node.has_parent());

    let ack = Frame::new(0x10, 0x42, 0, MessageType::JoinAck, &[0u8]).unwrap();
    radio.push_frame(&ack);
    node.poll_receive(&mut radio, clock.now_ms(), &mut log);

    assert!(node.has_parent());
    assert_eq!(node.parent_id(), 0x10);
    assert!(log.contains("attached to parent 16"), "attach must be logged: {:?}", log.0);
}

// S5 — JOIN_NACK resets parent and schedules a fresh retry.
#[test]
fn node_resets_parent_on_join_nack() {
    let mut node = NodeJoinEngine::new(MeshConfig::default(), 0x42);
    let mut radio = MockRadio::new();
    let mut log = MockLog::new();

    radio.push_frame(&beacon(0x10, 1));
    node.poll_receive(&mut radio, 0, &mut log);
    node.tick(&mut radio, &MockClock::new(0));

    let nack = Frame::new(0x10, 0x42, 0, MessageType::JoinNack, &[]).unwrap();
    radio.push_frame(&nack);
    node.poll_receive(&mut radio, 100, &mut log);

    assert!(!node.has_parent(), "JOIN_NACK must leave the node unattached");
}

// Cross-role: a joined node relays a downstream child's JOIN_REQ onward
// toward the gateway id and forwards its own child's DataUp.
#[test]
fn joined_node_accepts_a_child_and_relays_its_data() {
    let mut node = NodeJoinEngine::new(MeshConfig::default(), 0x10);
    let mut radio = MockRadio::new();
    let mut log = MockLog::new();

    // Bootstrap: attach to the gateway directly.
    radio.push_frame(&beacon(0x00, 0));
    node.poll_receive(&mut radio, 0, &mut log);
    node.tick(&mut radio, &MockClock::new(0));
    let ack = Frame::new(0x00, 0x10, 0, MessageType::JoinAck, &[0u8]).unwrap();
    radio.push_frame(&ack);
    node.poll_receive(&mut radio, 10, &mut log);
    assert!(node.has_parent());

    // A downstream node joins through us.
    let child_join = Frame::new(0x30, 0x10, 0, MessageType::JoinReq, &[]).unwrap();
    radio.push_frame(&child_join);
    node.poll_receive(&mut radio, 20, &mut log);
    assert!(node.is_child(0x30));

    // The child's data frame, addressed to the gateway, must be relayed
    // upstream with the hop count incremented.
    let data = Frame::new(0x30, 0x00, 1, MessageType::DataUp, &[9, 9]).unwrap();
    radio.push_frame(&data);
    node.poll_receive(&mut radio, 30, &mut log);

    let relayed = radio
        .sent_frames()
        .into_iter()
        .find(|f| f.msg_type == MessageType::DataUp && f.src == 0x30)
        .expect("data from a known child must be relayed");
    assert_eq!(relayed.hops, 2);
    assert_eq!(relayed.dst, 0x00);
}
