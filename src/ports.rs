//! Port traits — the hexagonal boundary between the mesh domain logic and
//! the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ GatewaySupervisor / NodeJoinEngine (domain)
//! ```
//!
//! Driven adapters (radio, clock, storage, log sink) implement these traits.
//! The domain consumes them via generics, so it never touches hardware
//! directly and runs unmodified against the host simulation adapters in
//! tests.
//!
//! ## Notes
//!
//! - **RadioPort** implementations own the half-duplex radio exclusively;
//!   the domain never calls it from more than one place per tick.
//! - **ConfigPort** implementations SHOULD validate before persisting.

use crate::config::MeshConfig;
use crate::error::{ConfigError, RadioError, StorageError};

/// Read-and-write port over the physical radio. `transmit` is synchronous
/// and blocking, exactly as it is on the hardware; it returns how long the
/// transmission held the air, in milliseconds, so the duty-cycle shaper can
/// debit the right amount without a second clock read.
pub trait RadioPort {
    /// Blocking transmit. On success, returns on-air duration in ms.
    fn transmit(&mut self, bytes: &[u8]) -> Result<u32, RadioError>;

    /// Switch the radio back into continuous receive mode.
    fn start_receive(&mut self);

    /// Non-blocking poll for a received packet. Returns the number of bytes
    /// written into `buf`, or `None` if nothing is pending.
    fn read_packet(&mut self, buf: &mut [u8]) -> Option<usize>;

    /// RSSI (dBm) of the most recently received packet.
    fn rssi(&self) -> i8;
}

/// Monotonic millisecond clock. May wrap; all domain comparisons are
/// written to tolerate wraparound (`now.wrapping_sub(t0) > delta`).
pub trait ClockPort {
    fn now_ms(&self) -> u32;
}

/// The domain emits formatted status lines through this port. Adapters
/// decide where they go (serial log, OLED, etc.).
pub trait LogSink {
    fn line(&mut self, line: &str);
}

/// Byte-oriented namespaced key/value storage, backing persisted node
/// identity and configuration.
pub trait StoragePort {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

/// Loads and persists [`MeshConfig`].
///
/// Implementations MUST validate values before persisting — a malformed
/// config written over a bad RPC channel must not silently take effect.
pub trait ConfigPort {
    fn load(&self) -> MeshConfig;
    fn save(&mut self, config: &MeshConfig) -> Result<(), ConfigError>;
}
