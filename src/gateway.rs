//! Gateway supervisor: child table, join handshake, periodic status
//! polling, and the beacon/eviction housekeeping that keeps the tree live.
//!
//! Mirrors the node supervisor's shape (`crate::node::NodeJoinEngine`): an
//! orchestrator that owns its tables and a duty-cycle shaper, and exposes
//! `handle_frame`/`tick` to the cooperative loop in `bin/gateway.rs`.
//!
//! Beacon suppression: the gateway only re-broadcasts `BEACON` while its
//! child table is empty. Once at least one child exists, new nodes are
//! expected to discover the tree by overhearing ordinary traffic. A node
//! that loses its entire upstream path after a long uptime can therefore
//! take up to `child_timeout_ms + beacon_period_ms` (~240s with defaults)
//! to see a beacon again — this is a deliberate trade against needlessly
//! chatty beaconing once a subtree is established.

use core::fmt::Write as _;

use crate::config::MeshConfig;
use crate::frame::{
    ChildEventPayload, Frame, MessageType, StatusPayload, BROADCAST_ID, GATEWAY_ID,
};
use crate::ports::{ClockPort, LogSink, RadioPort};
use crate::shaper::{DutyCycleShaper, TransmitOutcome};

const MAX_CHILDREN: usize = 64;
const MAX_PENDING_JOIN: usize = 16;
const MAX_PENDING_QUERY: usize = 32;
const MAX_JOIN_TRIES: u16 = 200;

#[derive(Debug, Clone, Copy)]
struct Child {
    id: u8,
    parent: u8,
    hops_to_gw: u8,
    misses: u8,
    last_rssi: i8,
    last_seen_ms: u32,
    last_query_ms: u32,
    last_join_ack_ms: u32,
    answered_since_query: bool,
}

impl Child {
    const EMPTY: Child = Child {
        id: 0,
        parent: 0,
        hops_to_gw: 0,
        misses: 0,
        last_rssi: -127,
        last_seen_ms: 0,
        last_query_ms: 0,
        last_join_ack_ms: 0,
        answered_since_query: false,
    };
}

#[derive(Debug, Clone, Copy)]
struct PendingJoin {
    id: u8,
    next_try_ms: u32,
    tries: u16,
    last_seen_ms: u32,
}

impl PendingJoin {
    const EMPTY: PendingJoin = PendingJoin {
        id: 0,
        next_try_ms: 0,
        tries: 0,
        last_seen_ms: 0,
    };
}

#[derive(Debug, Clone, Copy)]
struct PendingQuery {
    id: u8,
    next_try_ms: u32,
    tries: u16,
}

impl PendingQuery {
    const EMPTY: PendingQuery = PendingQuery {
        id: 0,
        next_try_ms: 0,
        tries: 0,
    };
}

pub struct GatewaySupervisor {
    config: MeshConfig,
    shaper: DutyCycleShaper,
    children: [Child; MAX_CHILDREN],
    pending_join: [PendingJoin; MAX_PENDING_JOIN],
    pending_query: [PendingQuery; MAX_PENDING_QUERY],
    last_beacon_ms: u32,
    last_status_dump_ms: u32,
    last_query_round_ms: u32,
}

impl GatewaySupervisor {
    pub fn new(config: MeshConfig) -> Self {
        let shaper = DutyCycleShaper::new(&config);
        Self {
            config,
            shaper,
            children: [Child::EMPTY; MAX_CHILDREN],
            pending_join: [PendingJoin::EMPTY; MAX_PENDING_JOIN],
            pending_query: [PendingQuery::EMPTY; MAX_PENDING_QUERY],
            last_beacon_ms: 0,
            last_status_dump_ms: 0,
            last_query_round_ms: 0,
        }
    }

    pub fn child_count(&self) -> usize {
        self.children.iter().filter(|c| c.id != 0).count()
    }

    pub fn has_child(&self, id: u8) -> bool {
        self.children.iter().any(|c| c.id == id)
    }

    // ---- table helpers ----------------------------------------------

    fn find_child(&mut self, id: u8) -> Option<&mut Child> {
        self.children.iter_mut().find(|c| c.id == id)
    }

    fn alloc_child(&mut self, id: u8) -> Option<&mut Child> {
        if let Some(slot) = self.children.iter_mut().find(|c| c.id == 0) {
            *slot = Child {
                id,
                parent: GATEWAY_ID,
                hops_to_gw: 1,
                ..Child::EMPTY
            };
            Some(slot)
        } else {
            None
        }
    }

    fn touch_child(&mut self, id: u8, now_ms: u32, rssi: i8) {
        if self.find_child(id).is_none() {
            self.alloc_child(id);
        }
        if let Some(c) = self.find_child(id) {
            c.last_seen_ms = now_ms;
            c.last_rssi = rssi;
            c.misses = 0;
        }
    }

    fn erase_child(&mut self, id: u8) {
        if let Some(c) = self.find_child(id) {
            *c = Child::EMPTY;
        }
    }

    fn find_pending_join(&mut self, id: u8) -> Option<&mut PendingJoin> {
        self.pending_join.iter_mut().find(|p| p.id == id)
    }

    fn alloc_pending_join(&mut self, id: u8, now_ms: u32) {
        if self.find_pending_join(id).is_some() {
            return;
        }
        if let Some(slot) = self.pending_join.iter_mut().find(|p| p.id == 0) {
            *slot = PendingJoin {
                id,
                next_try_ms: now_ms,
                tries: 0,
                last_seen_ms: now_ms,
            };
        }
    }

    fn remove_pending_join(&mut self, id: u8) {
        if let Some(p) = self.find_pending_join(id) {
            *p = PendingJoin::EMPTY;
        }
    }

    fn alloc_pending_query(&mut self, id: u8, next_try_ms: u32) {
        if self.pending_query.iter().any(|p| p.id == id) {
            return;
        }
        if let Some(slot) = self.pending_query.iter_mut().find(|p| p.id == 0) {
            *slot = PendingQuery {
                id,
                next_try_ms,
                tries: 0,
            };
        }
    }

    fn remove_pending_query(&mut self, id: u8) {
        if let Some(p) = self.pending_query.iter_mut().find(|p| p.id == id) {
            *p = PendingQuery::EMPTY;
        }
    }

    // ---- transmit helpers ---------------------------------------------

    fn send_packet(
        &mut self,
        radio: &mut impl RadioPort,
        now_ms: u32,
        dst: u8,
        msg_type: MessageType,
        payload: &[u8],
    ) -> TransmitOutcome {
        let Some(frame) = Frame::new(GATEWAY_ID, dst, 0, msg_type, payload) else {
            return TransmitOutcome::RadioError(crate::error::RadioError::TransmitFailed);
        };
        let mut buf = [0u8; crate::frame::HEADER_LEN + crate::frame::MAX_PAYLOAD];
        let Some(n) = frame.encode(&mut buf) else {
            return TransmitOutcome::RadioError(crate::error::RadioError::TransmitFailed);
        };
        self.shaper.transmit_shaped(radio, now_ms, &buf[..n])
    }

    /// Attempt a join-ack for `id`. Returns true if the ack was sent.
    fn try_send_join_ack(&mut self, radio: &mut impl RadioPort, now_ms: u32, id: u8) -> bool {
        if let Some(c) = self.find_child(id) {
            if now_ms.wrapping_sub(c.last_join_ack_ms) < self.config.join_ack_gap_ms {
                return false;
            }
        }

        match self.send_packet(radio, now_ms, id, MessageType::JoinAck, &[0u8]) {
            TransmitOutcome::Sent => {
                if self.find_child(id).is_none() {
                    self.alloc_child(id);
                }
                if let Some(c) = self.find_child(id) {
                    c.last_seen_ms = now_ms;
                    c.last_join_ack_ms = now_ms;
                    c.misses = 0;
                    c.answered_since_query = true;
                }
                self.remove_pending_join(id);
                true
            }
            TransmitOutcome::Deferred => {
                if let Some(p) = self.find_pending_join(id) {
                    p.next_try_ms = self.shaper.free_at_ms().wrapping_add(50);
                    p.tries = p.tries.saturating_add(1).min(MAX_JOIN_TRIES);
                }
                false
            }
            TransmitOutcome::RadioError(_) => {
                if let Some(p) = self.find_pending_join(id) {
                    p.next_try_ms = now_ms.wrapping_add(self.config.join_ack_gap_ms);
                }
                false
            }
        }
    }

    fn try_send_query(&mut self, radio: &mut impl RadioPort, now_ms: u32, id: u8) {
        match self.send_packet(radio, now_ms, id, MessageType::Query, &[]) {
            TransmitOutcome::Sent => {
                if let Some(c) = self.find_child(id) {
                    c.last_query_ms = now_ms;
                    c.answered_since_query = false;
                }
                self.remove_pending_query(id);
            }
            TransmitOutcome::Deferred => {
                let next = self.shaper.free_at_ms().wrapping_add(50);
                if let Some(p) = self.pending_query.iter_mut().find(|p| p.id == id) {
                    p.next_try_ms = next;
                } else {
                    self.alloc_pending_query(id, next);
                }
            }
            TransmitOutcome::RadioError(_) => {
                let next = now_ms.wrapping_add(50);
                if let Some(p) = self.pending_query.iter_mut().find(|p| p.id == id) {
                    p.next_try_ms = next;
                } else {
                    self.alloc_pending_query(id, next);
                }
            }
        }
    }

    // ---- receive path ---------------------------------------------------

    /// Poll the radio once for an inbound packet and dispatch it.
    pub fn poll_receive(&mut self, radio: &mut impl RadioPort, now_ms: u32) {
        let mut buf = [0u8; crate::frame::HEADER_LEN + crate::frame::MAX_PAYLOAD];
        let Some(n) = radio.read_packet(&mut buf) else {
            return;
        };
        let Some(frame) = Frame::decode(&buf[..n]) else {
            return;
        };
        let rssi = radio.rssi();
        self.handle_frame(radio, now_ms, &frame, rssi);
    }

    fn handle_frame(
        &mut self,
        radio: &mut impl RadioPort,
        now_ms: u32,
        frame: &Frame,
        rssi: i8,
    ) {
        match frame.msg_type {
            MessageType::JoinReq => {
                self.alloc_pending_join(frame.src, now_ms);
                if let Some(p) = self.find_pending_join(frame.src) {
                    p.last_seen_ms = now_ms;
                }
                if self.has_child(frame.src) {
                    self.touch_child(frame.src, now_ms, rssi);
                }
                let due = self
                    .find_pending_join(frame.src)
                    .map(|p| p.next_try_ms <= now_ms)
                    .unwrap_or(false);
                if due {
                    self.try_send_join_ack(radio, now_ms, frame.src);
                }
            }
            MessageType::DataUp => {
                self.touch_child(frame.src, now_ms, rssi);
                self.send_packet(radio, now_ms, frame.src, MessageType::DataAck, &[]);
            }
            MessageType::State => {
                self.touch_child(frame.src, now_ms, rssi);
                if let Some(status) = StatusPayload::decode(frame.payload()) {
                    if let Some(c) = self.find_child(frame.src) {
                        c.parent = status.parent;
                        c.hops_to_gw = status.hops;
                        c.last_query_ms = 0;
                        c.answered_since_query = true;
                    }
                }
            }
            MessageType::ChildAdd => {
                if let Some(ev) = ChildEventPayload::decode(frame.payload()) {
                    if self.find_child(ev.child).is_none() {
                        self.alloc_child(ev.child);
                    }
                    if let Some(c) = self.find_child(ev.child) {
                        c.parent = ev.parent;
                        c.hops_to_gw = ev.hops;
                        c.last_seen_ms = now_ms;
                        c.last_rssi = rssi;
                        c.misses = 0;
                    }
                    self.remove_pending_join(ev.child);
                }
            }
            MessageType::ChildGone => {
                if let Some(ev) = ChildEventPayload::decode(frame.payload()) {
                    self.erase_child(ev.child);
                    self.remove_pending_join(ev.child);
                }
            }
            _ => {
                if self.has_child(frame.src) {
                    self.touch_child(frame.src, now_ms, rssi);
                }
            }
        }
    }

    // ---- periodic loop ----------------------------------------------------

    /// Run one periodic-maintenance pass. Should be called every tick of
    /// the cooperative loop, after `poll_receive`.
    pub fn tick(&mut self, radio: &mut impl RadioPort, clock: &impl ClockPort, log: &mut impl LogSink) {
        let now_ms = clock.now_ms();

        // 1. Service due pending-joins.
        let due_joins: heapless::Vec<u8, MAX_PENDING_JOIN> = self
            .pending_join
            .iter()
            .filter(|p| p.id != 0 && p.next_try_ms <= now_ms)
            .map(|p| p.id)
            .collect();
        for id in due_joins {
            self.try_send_join_ack(radio, now_ms, id);
        }

        // 2. Service due pending-queries; drop if the target vanished.
        let due_queries: heapless::Vec<u8, MAX_PENDING_QUERY> = self
            .pending_query
            .iter()
            .filter(|p| p.id != 0 && p.next_try_ms <= now_ms)
            .map(|p| p.id)
            .collect();
        for id in due_queries {
            if self.has_child(id) {
                self.try_send_query(radio, now_ms, id);
            } else {
                self.remove_pending_query(id);
            }
        }

        // 3. Evict silent children.
        let timed_out: heapless::Vec<u8, MAX_CHILDREN> = self
            .children
            .iter()
            .filter(|c| c.id != 0 && now_ms.wrapping_sub(c.last_seen_ms) > self.config.child_timeout_ms)
            .map(|c| c.id)
            .collect();
        for id in timed_out {
            self.erase_child(id);
        }

        // 4. Issue fresh queries for idle children, once per query_period_ms.
        if now_ms.wrapping_sub(self.last_query_round_ms) >= self.config.query_period_ms {
            let due_for_query: heapless::Vec<u8, MAX_CHILDREN> = self
                .children
                .iter()
                .filter(|c| c.id != 0 && c.last_query_ms == 0 && !self.pending_query.iter().any(|p| p.id == c.id))
                .map(|c| c.id)
                .collect();
            for id in due_for_query {
                self.try_send_query(radio, now_ms, id);
            }
            self.last_query_round_ms = now_ms;
        }

        // 5. Evaluate outstanding queries for timeout.
        let ids: heapless::Vec<u8, MAX_CHILDREN> =
            self.children.iter().filter(|c| c.id != 0).map(|c| c.id).collect();
        let mut evicted = heapless::Vec::<u8, MAX_CHILDREN>::new();
        for id in ids {
            if let Some(c) = self.find_child(id) {
                if c.last_query_ms != 0
                    && now_ms.wrapping_sub(c.last_query_ms) > self.config.query_timeout_ms
                {
                    c.last_query_ms = 0;
                    if !c.answered_since_query {
                        c.misses = c.misses.saturating_add(1);
                    }
                    if c.misses > self.config.max_misses {
                        let _ = evicted.push(id);
                    }
                }
            }
        }
        for id in evicted {
            self.erase_child(id);
        }

        // 6. Beacon while subtree is empty.
        if self.child_count() == 0
            && now_ms.wrapping_sub(self.last_beacon_ms) > self.config.beacon_period_ms
        {
            self.send_packet(radio, now_ms, BROADCAST_ID, MessageType::Beacon, &[0u8]);
            self.last_beacon_ms = now_ms;
        }

        // 7. Periodic status dump.
        if now_ms.wrapping_sub(self.last_status_dump_ms) > 5_000 {
            self.dump_status(log, now_ms);
            self.last_status_dump_ms = now_ms;
        }
    }

    fn dump_status(&self, log: &mut impl LogSink, now_ms: u32) {
        let mut line: heapless::String<96> = heapless::String::new();
        let _ = write!(line, "ID  P  H  RSSI  Age(ms)  Miss  Pending");
        log.line(&line);
        for c in self.children.iter().filter(|c| c.id != 0) {
            line.clear();
            let _ = write!(
                line,
                "{:<3} {:<2} {:<2} {:<5} {:<8} {:<5} {}",
                c.id,
                c.parent,
                c.hops_to_gw,
                c.last_rssi,
                now_ms.wrapping_sub(c.last_seen_ms),
                c.misses,
                if c.last_query_ms != 0 { "query" } else { "-" },
            );
            log.line(&line);
        }
        for p in self.pending_join.iter().filter(|p| p.id != 0) {
            line.clear();
            let _ = write!(line, "pending-join {} tries={}", p.id, p.tries);
            log.line(&line);
        }
        for p in self.pending_query.iter().filter(|p| p.id != 0) {
            line.clear();
            let _ = write!(line, "pending-query {} tries={}", p.id, p.tries);
            log.line(&line);
        }
    }
}
