//! Node role entry point.
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                 Adapters (outer ring)             │
//! │                                                    │
//! │  LoraRadio    NvsAdapter    LogLineSink   SystemClock │
//! │  (RadioPort)  (Config+Storage+Identity) (LogSink) (ClockPort) │
//! │                                                    │
//! │  ──────────── Port Trait Boundary ───────────────  │
//! │                                                    │
//! │  ┌──────────────────────────────────────────────┐  │
//! │  │           NodeJoinEngine (pure logic)         │  │
//! │  └──────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────┘
//! ```

#![deny(unused_must_use)]

use anyhow::Result;
use log::info;

use loramesh::adapters::clock::SystemClock;
use loramesh::adapters::device_id;
use loramesh::adapters::log_sink::LogLineSink;
use loramesh::adapters::radio_lora::LoraRadio;
use loramesh::adapters::storage::NvsAdapter;
use loramesh::node::NodeJoinEngine;
use loramesh::ports::{ClockPort, ConfigPort};

fn main() -> Result<()> {
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  Mesh Node v{}                        ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    let mut nvs = NvsAdapter::new()?;
    let config = nvs.load();
    let my_id = device_id::load_or_generate(&mut nvs);
    info!("Node ID: {my_id}");

    let peripherals = esp_idf_hal::peripherals::Peripherals::take()?;
    let mut radio = LoraRadio::new(
        peripherals.spi2,
        peripherals.pins.gpio12,
        peripherals.pins.gpio11,
        peripherals.pins.gpio13,
        peripherals.pins.gpio10,
        peripherals.pins.gpio5,
        peripherals.pins.gpio4,
        peripherals.pins.gpio1,
        &config,
    )?;
    radio.start_receive();

    let clock = SystemClock::new();
    let mut log_sink = LogLineSink::new();
    let mut node = NodeJoinEngine::new(config, my_id);

    info!("Node ready. Entering event loop.");

    loop {
        let now_ms = clock.now_ms();
        node.poll_receive(&mut radio, now_ms, &mut log_sink);
        node.tick(&mut radio, &clock);
        esp_idf_hal::delay::FreeRtos::delay_ms(5);
    }
}
