//! LoRa mesh coordination firmware library.
//!
//! Exposes the pure-logic modules for integration testing and external
//! inspection. All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod config;
pub mod error;
pub mod frame;
pub mod gateway;
pub mod node;
pub mod ports;
pub mod shaper;

pub mod adapters;
