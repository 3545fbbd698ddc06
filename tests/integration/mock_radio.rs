//! Mock radio + clock adapters for integration tests.
//!
//! Records every transmitted frame so tests can assert on the full
//! send history without a real LoRa transceiver or host-simulation ether.

use loramesh::error::RadioError;
use loramesh::frame::Frame;
use loramesh::ports::{ClockPort, LogSink, RadioPort};
use std::cell::Cell;
use std::collections::VecDeque;

pub struct MockRadio {
    pub inbound: VecDeque<Vec<u8>>,
    pub sent: Vec<Vec<u8>>,
    pub on_air_ms: u32,
    pub rssi: i8,
    pub fail_next: bool,
}

#[allow(dead_code)]
impl MockRadio {
    pub fn new() -> Self {
        Self {
            inbound: VecDeque::new(),
            sent: Vec::new(),
            on_air_ms: 10,
            rssi: -80,
            fail_next: false,
        }
    }

    pub fn push_frame(&mut self, frame: &Frame) {
        let mut buf = [0u8; 70];
        let n = frame.encode(&mut buf).unwrap();
        self.inbound.push_back(buf[..n].to_vec());
    }

    pub fn sent_frames(&self) -> Vec<Frame> {
        self.sent.iter().filter_map(|b| Frame::decode(b)).collect()
    }

    pub fn last_sent(&self) -> Option<Frame> {
        self.sent.last().and_then(|b| Frame::decode(b))
    }
}

impl Default for MockRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl RadioPort for MockRadio {
    fn transmit(&mut self, bytes: &[u8]) -> Result<u32, RadioError> {
        if self.fail_next {
            self.fail_next = false;
            return Err(RadioError::TransmitFailed);
        }
        self.sent.push(bytes.to_vec());
        Ok(self.on_air_ms)
    }

    fn start_receive(&mut self) {}

    fn read_packet(&mut self, buf: &mut [u8]) -> Option<usize> {
        let pkt = self.inbound.pop_front()?;
        let n = pkt.len().min(buf.len());
        buf[..n].copy_from_slice(&pkt[..n]);
        Some(n)
    }

    fn rssi(&self) -> i8 {
        self.rssi
    }
}

/// A manually-advanced clock for deterministic multi-tick scenarios.
pub struct MockClock(Cell<u32>);

#[allow(dead_code)]
impl MockClock {
    pub fn new(start_ms: u32) -> Self {
        Self(Cell::new(start_ms))
    }

    pub fn advance(&self, by_ms: u32) {
        self.0.set(self.0.get().wrapping_add(by_ms));
    }
}

impl ClockPort for MockClock {
    fn now_ms(&self) -> u32 {
        self.0.get()
    }
}

pub struct MockLog(pub Vec<String>);

#[allow(dead_code)]
impl MockLog {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn contains(&self, substr: &str) -> bool {
        self.0.iter().any(|l| l.contains(substr))
    }
}

impl Default for MockLog {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink for MockLog {
    fn line(&mut self, line: &str) {
        self.0.push(line.to_string());
    }
}
