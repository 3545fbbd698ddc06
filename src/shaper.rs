//! Duty-cycle transmit shaper.
//!
//! A token bucket sized to a regulatory on-air budget (e.g. the EU868 1%
//! duty-cycle sub-bands). Every transmit attempt is routed through
//! [`DutyCycleShaper::transmit_shaped`], which defers the call until the
//! bucket has refilled and, after a successful transmit, converts any
//! borrowed overdraft into a proportional cooldown window.
//!
//! This is hand-rolled rather than built on a general-purpose rate limiter:
//! the shaper needs to report *when* it will next be ready (`free_at_ms`)
//! and needs an asymmetric borrow-then-cooldown curve, neither of which a
//! plain `try_consume` token bucket exposes.

use crate::config::MeshConfig;
use crate::error::RadioError;
use crate::ports::RadioPort;

/// Outcome of a shaped transmit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitOutcome {
    Sent,
    Deferred,
    RadioError(RadioError),
}

pub struct DutyCycleShaper {
    cap_ms: i32,
    borrow_ms: i32,
    free_at_ms: u32,
    tokens_ms: i32,
    last_refill_ms: u32,
    refill_remainder: u32,
    primed: bool,
}

impl DutyCycleShaper {
    pub fn new(config: &MeshConfig) -> Self {
        Self {
            cap_ms: config.dc_cap_ms,
            borrow_ms: config.dc_borrow_ms,
            free_at_ms: 0,
            tokens_ms: config.dc_cap_ms,
            last_refill_ms: 0,
            refill_remainder: 0,
            primed: false,
        }
    }

    pub fn free_at_ms(&self) -> u32 {
        self.free_at_ms
    }

    pub fn tokens_ms(&self) -> i32 {
        self.tokens_ms
    }

    fn refill(&mut self, now_ms: u32) {
        if !self.primed {
            self.last_refill_ms = now_ms;
            self.primed = true;
            return;
        }
        let elapsed = now_ms.wrapping_sub(self.last_refill_ms);
        self.last_refill_ms = now_ms;

        // One token per elapsed 100ms; the sub-100ms remainder carries
        // forward so short, frequent ticks still accumulate correctly.
        let mut tokens = elapsed / 100;
        self.refill_remainder += elapsed % 100;
        if self.refill_remainder >= 100 {
            tokens += 1;
            self.refill_remainder -= 100;
        }
        self.tokens_ms = (self.tokens_ms + tokens as i32).min(self.cap_ms);
    }

    /// Attempt a shaped transmit. `now_ms` is the caller's current monotonic
    /// clock reading.
    pub fn transmit_shaped(
        &mut self,
        radio: &mut impl RadioPort,
        now_ms: u32,
        bytes: &[u8],
    ) -> TransmitOutcome {
        if now_ms < self.free_at_ms {
            return TransmitOutcome::Deferred;
        }

        self.refill(now_ms);

        let t0 = now_ms;
        match radio.transmit(bytes) {
            Ok(on_air) => {
                let on_air = on_air.max(1);
                let t1 = t0.wrapping_add(on_air);
                self.tokens_ms -= on_air as i32;

                if self.tokens_ms < -self.borrow_ms {
                    let deficit = -self.borrow_ms - self.tokens_ms;
                    self.free_at_ms = t1.wrapping_add((deficit as u32).saturating_mul(100));
                } else {
                    self.free_at_ms = t1;
                }
                radio.start_receive();
                TransmitOutcome::Sent
            }
            Err(e) => TransmitOutcome::RadioError(e),
        }
    }
}
