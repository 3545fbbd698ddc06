//! Mesh configuration parameters.
//!
//! All tunable parameters for the mesh coordination layer, grouped the way
//! the wire protocol and the duty-cycle shaper group them. Values can be
//! overridden via persistent storage (see `adapters::storage`).

use serde::{Deserialize, Serialize};

/// Core mesh configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    // --- Duty cycle shaper ---
    /// Token-bucket capacity in milliseconds of on-air budget.
    pub dc_cap_ms: i32,
    /// Maximum the bucket may be borrowed below zero, in milliseconds.
    pub dc_borrow_ms: i32,

    // --- Gateway timing ---
    /// How often the gateway re-broadcasts BEACON while it has no children.
    pub beacon_period_ms: u32,
    /// How often the gateway queries each child for status.
    pub query_period_ms: u32,
    /// How long the gateway waits for a STATE reply before counting a miss.
    pub query_timeout_ms: u32,
    /// Consecutive unanswered queries before a child is evicted.
    pub max_misses: u8,
    /// Silence after which a child is evicted regardless of query state.
    pub child_timeout_ms: u32,
    /// Minimum spacing between JOIN_ACKs sent to the same child.
    pub join_ack_gap_ms: u32,

    // --- Node timing ---
    /// Silence from the parent after which a node detaches.
    pub lost_parent_ms: u32,
    /// Interval between join attempts while unattached.
    pub join_retry_ms: u32,
    /// How long a node waits for JOIN_ACK before retrying.
    pub join_ack_timeout_ms: u32,
    /// Silence after which a node prunes one of its own children.
    pub child_silent_ms: u32,
    /// Candidate parents older than this are ignored by parent selection.
    pub candidate_stale_ms: u32,
    /// Minimum RSSI (dBm) for a candidate to be considered.
    pub candidate_min_rssi: i8,

    // --- Radio parameters (informative; forwarded to the radio adapter) ---
    pub radio_freq_hz: u32,
    pub radio_bandwidth_hz: u32,
    pub radio_spreading_factor: u8,
    pub radio_coding_rate: u8,
    pub radio_sync_word: u8,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            dc_cap_ms: 36_000,
            dc_borrow_ms: 12_000,

            beacon_period_ms: 60_000,
            query_period_ms: 50_000,
            query_timeout_ms: 15_000,
            max_misses: 5,
            child_timeout_ms: 180_000,
            join_ack_gap_ms: 2_000,

            lost_parent_ms: 300_000,
            join_retry_ms: 5_000,
            join_ack_timeout_ms: 10_000,
            child_silent_ms: 180_000,
            candidate_stale_ms: 90_000,
            candidate_min_rssi: -120,

            radio_freq_hz: 868_000_000,
            radio_bandwidth_hz: 125_000,
            radio_spreading_factor: 12,
            radio_coding_rate: 5,
            radio_sync_word: 0x12,
        }
    }
}
