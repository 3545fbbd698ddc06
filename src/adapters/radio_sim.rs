//! Host-simulation radio adapter.
//!
//! Stands in for [`adapters::radio_lora`] when not building for `espidf`.
//! A [`SharedEther`] is a broadcast medium shared by every [`RadioSim`]
//! instance attached to it; `transmit` pushes onto every other attached
//! radio's inbound queue, and on-air duration is derived from payload size
//! using the same symbol-time approximation the LoRa adapter would use on
//! real hardware, so duty-cycle behaviour in host simulations and demos
//! matches what the device sees in the field.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::error::RadioError;
use crate::ports::RadioPort;

/// Approximate on-air time for a LoRa SF12/125kHz packet: ~50ms of
/// preamble/header plus ~15ms per payload byte. Close enough for
/// duty-cycle shaping in simulation; real timing comes from the
/// radio adapter's measured TX-done interrupt.
fn estimate_on_air_ms(payload_len: usize) -> u32 {
    50 + (payload_len as u32) * 15
}

struct Medium {
    queues: Vec<(u8, Rc<RefCell<VecDeque<Vec<u8>>>>)>,
}

/// A shared broadcast medium. Clone to attach additional [`RadioSim`]s to
/// the same simulated channel.
#[derive(Clone)]
pub struct SharedEther(Rc<RefCell<Medium>>);

impl SharedEther {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(Medium { queues: Vec::new() })))
    }

    fn attach(&self, id: u8) -> Rc<RefCell<VecDeque<Vec<u8>>>> {
        let inbound = Rc::new(RefCell::new(VecDeque::new()));
        self.0.borrow_mut().queues.push((id, inbound.clone()));
        inbound
    }

    fn broadcast(&self, from_id: u8, bytes: &[u8]) {
        for (id, queue) in &self.0.borrow().queues {
            if *id != from_id {
                queue.borrow_mut().push_back(bytes.to_vec());
            }
        }
    }
}

impl Default for SharedEther {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RadioSim {
    id: u8,
    ether: SharedEther,
    inbound: Rc<RefCell<VecDeque<Vec<u8>>>>,
    rssi: i8,
}

impl RadioSim {
    pub fn new(id: u8, ether: SharedEther) -> Self {
        let inbound = ether.attach(id);
        Self {
            id,
            ether,
            inbound,
            rssi: -70,
        }
    }

    pub fn set_rssi(&mut self, rssi: i8) {
        self.rssi = rssi;
    }
}

impl RadioPort for RadioSim {
    fn transmit(&mut self, bytes: &[u8]) -> Result<u32, RadioError> {
        self.ether.broadcast(self.id, bytes);
        Ok(estimate_on_air_ms(bytes.len()))
    }

    fn start_receive(&mut self) {}

    fn read_packet(&mut self, buf: &mut [u8]) -> Option<usize> {
        let pkt = self.inbound.borrow_mut().pop_front()?;
        let n = pkt.len().min(buf.len());
        buf[..n].copy_from_slice(&pkt[..n]);
        Some(n)
    }

    fn rssi(&self) -> i8 {
        self.rssi
    }
}
