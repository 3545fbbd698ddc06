//! Node join/relay engine: candidate parent table, parent selection, join
//! handshake, selective forwarding, and the deferred-transmit queue that
//! retries frames the duty-cycle shaper could not send immediately.
//!
//! DATA_ACK routing note: a gateway `DATA_ACK` is addressed directly back
//! to the originating node's id, hop-unaware. It relies on the relay
//! anti-loop rule (forward only from `parent` or a known child) holding
//! along the same path the `DATA_UP` travelled upstream — there is no
//! separate return-routing state here.

use core::fmt::Write as _;

use crate::config::MeshConfig;
use crate::frame::{
    ChildEventPayload, Frame, MessageType, StatusPayload, BROADCAST_ID, GATEWAY_ID, MAX_HOPS,
    MAX_PAYLOAD,
};
use crate::ports::{ClockPort, LogSink, RadioPort};
use crate::shaper::{DutyCycleShaper, TransmitOutcome};

const MAX_CANDIDATES: usize = 5;
const MAX_CHILDREN: usize = 10;
const MAX_TXQ: usize = 16;
const NO_PARENT: u8 = 0xFF;
const NO_HOP: u8 = 0xFF;
const MAX_TRIES: u16 = 200;

#[derive(Debug, Clone, Copy)]
struct Candidate {
    id: u8,
    rssi: i8,
    hops: u8,
    last_seen_ms: u32,
}

impl Candidate {
    const EMPTY: Candidate = Candidate {
        id: NO_PARENT,
        rssi: -127,
        hops: NO_HOP,
        last_seen_ms: 0,
    };

    fn is_empty(&self) -> bool {
        self.id == NO_PARENT
    }
}

#[derive(Debug, Clone, Copy)]
struct LocalChild {
    id: u8,
    last_seen_ms: u32,
}

impl LocalChild {
    const EMPTY: LocalChild = LocalChild {
        id: 0,
        last_seen_ms: 0,
    };
}

#[derive(Debug, Clone)]
struct PendingTx {
    in_use: bool,
    src: u8,
    dst: u8,
    hops: u8,
    msg_type: MessageType,
    data: [u8; MAX_PAYLOAD],
    len: u8,
    next_try_ms: u32,
    tries: u16,
}

impl PendingTx {
    const fn empty() -> Self {
        Self {
            in_use: false,
            src: 0,
            dst: 0,
            hops: 0,
            msg_type: MessageType::DataUp,
            data: [0u8; MAX_PAYLOAD],
            len: 0,
            next_try_ms: 0,
            tries: 0,
        }
    }
}

pub struct NodeJoinEngine {
    config: MeshConfig,
    shaper: DutyCycleShaper,
    my_id: u8,
    parent_id: u8,
    parent_rssi: i8,
    last_parent_rx_ms: u32,
    my_hop_to_gw: u8,
    next_join_at_ms: u32,
    join_ack_deadline_ms: u32,
    candidates: [Candidate; MAX_CANDIDATES],
    children: [LocalChild; MAX_CHILDREN],
    txq: [PendingTx; MAX_TXQ],
}

impl NodeJoinEngine {
    pub fn new(config: MeshConfig, my_id: u8) -> Self {
        let shaper = DutyCycleShaper::new(&config);
        Self {
            config,
            shaper,
            my_id,
            parent_id: NO_PARENT,
            parent_rssi: -127,
            last_parent_rx_ms: 0,
            my_hop_to_gw: NO_HOP,
            next_join_at_ms: 0,
            join_ack_deadline_ms: 0,
            candidates: [Candidate::EMPTY; MAX_CANDIDATES],
            children: [LocalChild::EMPTY; MAX_CHILDREN],
            txq: core::array::from_fn(|_| PendingTx::empty()),
        }
    }

    pub fn parent_id(&self) -> u8 {
        self.parent_id
    }

    pub fn has_parent(&self) -> bool {
        self.parent_id != NO_PARENT
    }

    pub fn child_count(&self) -> usize {
        self.children.iter().filter(|c| c.id != 0).count()
    }

    pub fn is_child(&self, id: u8) -> bool {
        self.children.iter().any(|c| c.id == id)
    }

    // ---- candidate table --------------------------------------------------

    fn candidate_update(&mut self, id: u8, rssi: i8, hops: u8, now_ms: u32) {
        if id == self.my_id || rssi < self.config.candidate_min_rssi || hops > MAX_HOPS {
            return;
        }
        if let Some(c) = self.candidates.iter_mut().find(|c| c.id == id) {
            c.rssi = rssi;
            c.hops = hops;
            c.last_seen_ms = now_ms;
            return;
        }
        // Insert into an empty slot, or evict the least-recently-seen one.
        if let Some(slot) = self.candidates.iter_mut().find(|c| c.is_empty()) {
            *slot = Candidate {
                id,
                rssi,
                hops,
                last_seen_ms: now_ms,
            };
            return;
        }
        let oldest = self
            .candidates
            .iter_mut()
            .min_by_key(|c| c.last_seen_ms)
            .expect("table is non-empty");
        *oldest = Candidate {
            id,
            rssi,
            hops,
            last_seen_ms: now_ms,
        };
    }

    /// Best candidate by `(higher rssi, lower hops, lower id)` among those
    /// seen within `candidate_stale_ms`. `NO_PARENT` if none qualify.
    fn pick_parent(&self, now_ms: u32) -> u8 {
        self.candidates
            .iter()
            .filter(|c| {
                !c.is_empty() && now_ms.wrapping_sub(c.last_seen_ms) <= self.config.candidate_stale_ms
            })
            .min_by_key(|c| (-(c.rssi as i16), c.hops, c.id))
            .map(|c| c.id)
            .unwrap_or(NO_PARENT)
    }

    // ---- local child table -------------------------------------------------

    fn add_child_local(&mut self, id: u8, now_ms: u32) -> bool {
        if self.is_child(id) {
            return false;
        }
        if let Some(slot) = self.children.iter_mut().find(|c| c.id == 0) {
            *slot = LocalChild {
                id,
                last_seen_ms: now_ms,
            };
            true
        } else {
            false
        }
    }

    fn touch_child_local(&mut self, id: u8, now_ms: u32) {
        if let Some(c) = self.children.iter_mut().find(|c| c.id == id) {
            c.last_seen_ms = now_ms;
        }
    }

    fn remove_child_local(&mut self, id: u8) {
        if let Some(c) = self.children.iter_mut().find(|c| c.id == id) {
            *c = LocalChild::EMPTY;
        }
    }

    // ---- transmit helpers ---------------------------------------------------

    fn enqueue_tx(&mut self, src: u8, dst: u8, hops: u8, msg_type: MessageType, payload: &[u8], when_ms: u32) {
        if let Some(slot) = self.txq.iter_mut().find(|p| !p.in_use) {
            let mut data = [0u8; MAX_PAYLOAD];
            data[..payload.len()].copy_from_slice(payload);
            *slot = PendingTx {
                in_use: true,
                src,
                dst,
                hops,
                msg_type,
                data,
                len: payload.len() as u8,
                next_try_ms: when_ms,
                tries: 0,
            };
        }
    }

    /// Build and shape-transmit a frame with arbitrary `src` (used for
    /// relaying); on deferral the frame is queued for retry rather than
    /// dropped, unlike the gateway's fire-and-forget sends.
    fn send_packet(
        &mut self,
        radio: &mut impl RadioPort,
        now_ms: u32,
        src: u8,
        dst: u8,
        hops: u8,
        msg_type: MessageType,
        payload: &[u8],
    ) -> TransmitOutcome {
        let Some(frame) = Frame::new(src, dst, hops, msg_type, payload) else {
            return TransmitOutcome::RadioError(crate::error::RadioError::TransmitFailed);
        };
        let mut buf = [0u8; crate::frame::HEADER_LEN + MAX_PAYLOAD];
        let Some(n) = frame.encode(&mut buf) else {
            return TransmitOutcome::RadioError(crate::error::RadioError::TransmitFailed);
        };
        let outcome = self.shaper.transmit_shaped(radio, now_ms, &buf[..n]);
        if let TransmitOutcome::Deferred = outcome {
            let when = self.shaper.free_at_ms().wrapping_add(50);
            self.enqueue_tx(src, dst, hops, msg_type, payload, when);
        }
        outcome
    }

    fn process_tx_queue(&mut self, radio: &mut impl RadioPort, now_ms: u32) {
        for i in 0..self.txq.len() {
            if !self.txq[i].in_use || self.txq[i].next_try_ms > now_ms {
                continue;
            }
            let entry = self.txq[i].clone();
            let Some(frame) = Frame::new(
                entry.src,
                entry.dst,
                entry.hops,
                entry.msg_type,
                &entry.data[..entry.len as usize],
            ) else {
                self.txq[i].in_use = false;
                continue;
            };
            let mut buf = [0u8; crate::frame::HEADER_LEN + MAX_PAYLOAD];
            let Some(n) = frame.encode(&mut buf) else {
                self.txq[i].in_use = false;
                continue;
            };
            match self.shaper.transmit_shaped(radio, now_ms, &buf[..n]) {
                TransmitOutcome::Sent => {
                    self.txq[i].in_use = false;
                }
                TransmitOutcome::Deferred => {
                    self.txq[i].next_try_ms = self.shaper.free_at_ms().wrapping_add(50);
                    self.txq[i].tries = self.txq[i].tries.saturating_add(1).min(MAX_TRIES);
                }
                TransmitOutcome::RadioError(_) => {
                    self.txq[i].next_try_ms = now_ms.wrapping_add(200);
                    self.txq[i].tries = self.txq[i].tries.saturating_add(1).min(MAX_TRIES);
                }
            }
        }
    }

    // ---- receive path ---------------------------------------------------

    pub fn poll_receive(&mut self, radio: &mut impl RadioPort, now_ms: u32, log: &mut impl LogSink) {
        let mut buf = [0u8; crate::frame::HEADER_LEN + MAX_PAYLOAD];
        let Some(n) = radio.read_packet(&mut buf) else {
            return;
        };
        let Some(frame) = Frame::decode(&buf[..n]) else {
            return;
        };
        let rssi = radio.rssi();
        self.handle_frame(radio, now_ms, &frame, rssi, log);
    }

    fn handle_frame(
        &mut self,
        radio: &mut impl RadioPort,
        now_ms: u32,
        frame: &Frame,
        rssi: i8,
        log: &mut impl LogSink,
    ) {
        if frame.src != self.my_id {
            self.candidate_update(frame.src, rssi, frame.hops, now_ms);
        }
        if frame.src == self.parent_id {
            self.last_parent_rx_ms = now_ms;
            self.parent_rssi = rssi;
        }
        if self.is_child(frame.src) {
            self.touch_child_local(frame.src, now_ms);
        }

        // Relay before dispatch: frames not addressed to us (and not
        // broadcast) are forwarded and never reach the type switch below.
        if frame.dst != self.my_id && frame.dst != BROADCAST_ID {
            self.forward(radio, now_ms, frame);
            return;
        }

        match frame.msg_type {
            MessageType::JoinReq => {
                if !self.has_parent() {
                    return;
                }
                if !self.is_child(frame.src) && self.child_count() < MAX_CHILDREN {
                    if self.add_child_local(frame.src, now_ms) {
                        self.send_packet(
                            radio,
                            now_ms,
                            self.my_id,
                            frame.src,
                            0,
                            MessageType::JoinAck,
                            &[0u8],
                        );
                        let reported_hops = if self.my_hop_to_gw == NO_HOP {
                            NO_HOP
                        } else {
                            self.my_hop_to_gw.saturating_add(1)
                        };
                        let ev = ChildEventPayload {
                            child: frame.src,
                            parent: self.my_id,
                            hops: reported_hops,
                        };
                        self.send_packet(
                            radio,
                            now_ms,
                            self.my_id,
                            GATEWAY_ID,
                            self.my_hop_to_gw,
                            MessageType::ChildAdd,
                            &ev.encode(),
                        );
                    }
                } else {
                    self.send_packet(
                        radio,
                        now_ms,
                        self.my_id,
                        frame.src,
                        0,
                        MessageType::JoinNack,
                        &[],
                    );
                }
            }
            MessageType::JoinAck => {
                if !self.has_parent() {
                    self.parent_id = frame.src;
                    self.last_parent_rx_ms = now_ms;
                    let _ = writeln_attach(log, frame.src);
                }
            }
            MessageType::JoinNack => {
                self.parent_id = NO_PARENT;
            }
            MessageType::Query => {
                self.my_hop_to_gw = frame.hops;
                let status = StatusPayload {
                    parent: self.parent_id,
                    hops: frame.hops,
                    rssi: self.parent_rssi,
                };
                self.send_packet(
                    radio,
                    now_ms,
                    self.my_id,
                    GATEWAY_ID,
                    frame.hops,
                    MessageType::State,
                    &status.encode(),
                );
            }
            _ => {}
        }
    }

    /// Forward a non-self-addressed frame iff it came from our parent or a
    /// known child, and the hop budget allows it. This is the anti-loop
    /// guard: a frame from anyone else is silently dropped.
    fn forward(&mut self, radio: &mut impl RadioPort, now_ms: u32, frame: &Frame) {
        let allowed = frame.src == self.parent_id || self.is_child(frame.src);
        if !allowed || frame.hops >= MAX_HOPS {
            return;
        }
        let mut payload = [0u8; MAX_PAYLOAD];
        let plen = frame.payload().len();
        payload[..plen].copy_from_slice(frame.payload());
        if frame.msg_type == MessageType::DataUp {
            crate::frame::TestHeader::bump_hop_count_in_place(&mut payload[..plen]);
        }
        self.send_packet(
            radio,
            now_ms,
            frame.src,
            frame.dst,
            frame.hops + 1,
            frame.msg_type,
            &payload[..plen],
        );
    }

    // ---- periodic loop ----------------------------------------------------

    fn prune_children(&mut self, radio: &mut impl RadioPort, now_ms: u32) {
        let gone: heapless::Vec<u8, MAX_CHILDREN> = self
            .children
            .iter()
            .filter(|c| c.id != 0 && now_ms.wrapping_sub(c.last_seen_ms) > self.config.child_silent_ms)
            .map(|c| c.id)
            .collect();
        for id in gone {
            let ev = ChildEventPayload {
                child: id,
                parent: self.my_id,
                hops: self.my_hop_to_gw,
            };
            self.send_packet(
                radio,
                now_ms,
                self.my_id,
                GATEWAY_ID,
                self.my_hop_to_gw,
                MessageType::ChildGone,
                &ev.encode(),
            );
            self.remove_child_local(id);
        }
    }

    fn join_flow(&mut self, radio: &mut impl RadioPort, now_ms: u32) {
        if self.has_parent() || now_ms < self.next_join_at_ms {
            return;
        }
        let candidate = self.pick_parent(now_ms);
        if candidate == NO_PARENT {
            self.next_join_at_ms = now_ms.wrapping_add(self.config.join_retry_ms);
            return;
        }
        match self.send_packet(
            radio,
            now_ms,
            self.my_id,
            candidate,
            0,
            MessageType::JoinReq,
            &[],
        ) {
            TransmitOutcome::Deferred => {
                let floor = now_ms.wrapping_add(200);
                let shaped = self.shaper.free_at_ms().wrapping_add(50);
                self.next_join_at_ms = floor.max(shaped);
            }
            _ => {
                self.join_ack_deadline_ms = now_ms.wrapping_add(self.config.join_ack_timeout_ms);
                self.next_join_at_ms = now_ms.wrapping_add(self.config.join_retry_ms);
            }
        }
    }

    /// Run one periodic-maintenance pass: drains the deferred-TX queue,
    /// prunes silent children, checks parent liveness, and drives the join
    /// flow. Call once per tick, after `poll_receive`.
    pub fn tick(&mut self, radio: &mut impl RadioPort, clock: &impl ClockPort) {
        let now_ms = clock.now_ms();

        self.process_tx_queue(radio, now_ms);
        self.prune_children(radio, now_ms);

        if self.has_parent() && now_ms.wrapping_sub(self.last_parent_rx_ms) > self.config.lost_parent_ms {
            self.parent_id = NO_PARENT;
            for c in self.children.iter_mut() {
                *c = LocalChild::EMPTY;
            }
        }

        self.join_flow(radio, now_ms);
    }
}

fn writeln_attach(log: &mut impl LogSink, parent: u8) -> core::fmt::Result {
    let mut line: heapless::String<32> = heapless::String::new();
    write!(line, "attached to parent {parent}")?;
    log.line(&line);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::test_support::FakeRadio;

    struct NullClock(u32);
    impl ClockPort for NullClock {
        fn now_ms(&self) -> u32 {
            self.0
        }
    }

    struct VecLog(std::vec::Vec<std::string::String>);
    impl LogSink for VecLog {
        fn line(&mut self, line: &str) {
            self.0.push(line.into());
        }
    }

    fn beacon_frame(src: u8, hops: u8) -> heapless::Vec<u8, 70> {
        let f = Frame::new(src, BROADCAST_ID, hops, MessageType::Beacon, &[0u8]).unwrap();
        let mut buf = [0u8; 70];
        let n = f.encode(&mut buf).unwrap();
        let mut v = heapless::Vec::new();
        let _ = v.extend_from_slice(&buf[..n]);
        v
    }

    #[test]
    fn parent_selection_prefers_higher_rssi_then_lower_hops_then_lower_id() {
        let mut node = NodeJoinEngine::new(MeshConfig::default(), 0x99);
        node.candidate_update(0x10, -60, 2, 1_000);
        node.candidate_update(0x11, -60, 1, 1_000);
        node.candidate_update(0x12, -70, 1, 1_000);
        assert_eq!(node.pick_parent(1_000), 0x11);
    }

    #[test]
    fn stale_candidates_are_excluded() {
        let mut node = NodeJoinEngine::new(MeshConfig::default(), 0x99);
        node.candidate_update(0x10, -40, 1, 0);
        assert_eq!(node.pick_parent(200_000), NO_PARENT);
    }

    #[test]
    fn join_flow_attaches_on_ack() {
        let cfg = MeshConfig::default();
        let mut node = NodeJoinEngine::new(cfg, 0x42);
        let mut radio = FakeRadio::new();
        radio.push_inbound(&beacon_frame(0x10, 1));

        let mut log = VecLog(std::vec::Vec::new());
        node.poll_receive(&mut radio, 1_000, &mut log);
        let clock = NullClock(1_000);
        node.tick(&mut radio, &clock);
        assert!(!node.has_parent());

        let ack = Frame::new(0x10, node.my_id, 0, MessageType::JoinAck, &[0u8]).unwrap();
        let mut buf = [0u8; 70];
        let n = ack.encode(&mut buf).unwrap();
        radio.push_inbound(&buf[..n]);
        node.poll_receive(&mut radio, 1_100, &mut log);

        assert_eq!(node.parent_id(), 0x10);
    }

    #[test]
    fn join_nack_resets_parent() {
        let mut node = NodeJoinEngine::new(MeshConfig::default(), 0x42);
        let mut radio = FakeRadio::new();
        let mut log = VecLog(std::vec::Vec::new());
        node.parent_id = 0x10;

        let nack = Frame::new(0x10, node.my_id, 0, MessageType::JoinNack, &[]).unwrap();
        let mut buf = [0u8; 70];
        let n = nack.encode(&mut buf).unwrap();
        radio.push_inbound(&buf[..n]);
        node.poll_receive(&mut radio, 0, &mut log);

        assert_eq!(node.parent_id(), NO_PARENT);
    }

    #[test]
    fn relay_only_forwards_from_parent_or_child() {
        let mut node = NodeJoinEngine::new(MeshConfig::default(), 0x42);
        let mut radio = FakeRadio::new();
        let mut log = VecLog(std::vec::Vec::new());
        node.parent_id = 0x10;

        // Frame from an unrelated node addressed elsewhere: must not forward.
        let stray = Frame::new(0x77, 0x05, 0, MessageType::DataUp, &[1, 2, 3]).unwrap();
        let mut buf = [0u8; 70];
        let n = stray.encode(&mut buf).unwrap();
        radio.push_inbound(&buf[..n]);
        node.poll_receive(&mut radio, 0, &mut log);
        assert!(radio.sent.is_empty(), "frame from an unrelated src must not be relayed");
    }

    #[test]
    fn relay_increments_hops_and_respects_cap() {
        let mut node = NodeJoinEngine::new(MeshConfig::default(), 0x42);
        let mut radio = FakeRadio::new();
        node.parent_id = 0x10;

        let from_parent = Frame::new(0x10, 0x05, MAX_HOPS - 1, MessageType::DataUp, &[9]).unwrap();
        let mut buf = [0u8; 70];
        let n = from_parent.encode(&mut buf).unwrap();
        node.forward(&mut radio, 0, &Frame::decode(&buf[..n]).unwrap());
        assert_eq!(radio.sent.len(), 1, "below the hop cap, the frame must be relayed");
        let relayed = Frame::decode(&radio.sent[0]).unwrap();
        assert_eq!(relayed.hops, MAX_HOPS);

        let at_cap = Frame::new(0x10, 0x05, MAX_HOPS, MessageType::DataUp, &[9]).unwrap();
        let n2 = at_cap.encode(&mut buf).unwrap();
        node.forward(&mut radio, 0, &Frame::decode(&buf[..n2]).unwrap());
        assert_eq!(radio.sent.len(), 1, "at the hop cap, forward must refuse");
    }

    #[test]
    fn pending_join_accepted_and_grandchild_event_sent() {
        let mut node = NodeJoinEngine::new(MeshConfig::default(), 0x10);
        let mut radio = FakeRadio::new();
        let mut log = VecLog(std::vec::Vec::new());
        node.parent_id = GATEWAY_ID;
        node.my_hop_to_gw = 0;

        let req = Frame::new(0x30, 0x10, 0, MessageType::JoinReq, &[]).unwrap();
        let mut buf = [0u8; 70];
        let n = req.encode(&mut buf).unwrap();
        radio.push_inbound(&buf[..n]);
        node.poll_receive(&mut radio, 0, &mut log);

        assert!(node.is_child(0x30));
    }

    #[test]
    fn resent_join_req_from_existing_child_gets_nacked() {
        let mut node = NodeJoinEngine::new(MeshConfig::default(), 0x10);
        let mut radio = FakeRadio::new();
        let mut log = VecLog(std::vec::Vec::new());
        node.parent_id = GATEWAY_ID;

        let req = Frame::new(0x30, 0x10, 0, MessageType::JoinReq, &[]).unwrap();
        let mut buf = [0u8; 70];
        let n = req.encode(&mut buf).unwrap();
        radio.push_inbound(&buf[..n]);
        node.poll_receive(&mut radio, 0, &mut log);
        assert!(node.is_child(0x30));
        radio.sent.clear();

        // A resent JOIN_REQ from a node that is already a child must be
        // rejected with JOIN_NACK, not re-acked.
        radio.push_inbound(&buf[..n]);
        node.poll_receive(&mut radio, 100, &mut log);
        assert_eq!(radio.sent.len(), 1, "exactly one reply, the NACK");
        let reply = Frame::decode(&radio.sent[0]).unwrap();
        assert_eq!(reply.msg_type, MessageType::JoinNack);
    }
}
