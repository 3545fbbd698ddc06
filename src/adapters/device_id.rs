//! Node identity — a persistent one-byte mesh address in `1..=0xFE`.
//!
//! Unlike the teacher firmware's MAC-derived serial number, mesh node IDs
//! are small enough to collide and must be stable across reboots without
//! depending on a factory-burned MAC, so the first boot draws a random byte
//! and commits it to storage; every later boot just reads it back.

use crate::ports::StoragePort;

use super::storage::{NODE_ID_KEY, NODE_ID_NAMESPACE};

/// Draw a random candidate node ID in `1..=0xFE` (0 is the gateway,
/// 0xFF is broadcast).
#[cfg(target_os = "espidf")]
fn random_candidate() -> u8 {
    // SAFETY: esp_random() reads the hardware TRNG and has no preconditions.
    let r = unsafe { esp_idf_svc::sys::esp_random() };
    1 + (r % 0xFE) as u8
}

#[cfg(not(target_os = "espidf"))]
fn random_candidate() -> u8 {
    use rand::Rng;
    rand::rng().random_range(1..=0xFEu8)
}

/// Load the persisted node ID, or mint and persist a fresh one on first boot.
pub fn load_or_generate(storage: &mut impl StoragePort) -> u8 {
    let mut buf = [0u8; 1];
    if let Ok(n) = storage.read(NODE_ID_NAMESPACE, NODE_ID_KEY, &mut buf) {
        if n == 1 && buf[0] != 0 && buf[0] != 0xFF {
            return buf[0];
        }
    }
    let id = random_candidate();
    let _ = storage.write(NODE_ID_NAMESPACE, NODE_ID_KEY, &[id]);
    id
}
