//! Adapters — concrete implementations of the hexagonal port traits.
//!
//! | Adapter       | Implements                 | Connects to                  |
//! |---------------|-----------------------------|-------------------------------|
//! | `clock`       | `ClockPort`                 | ESP32 system timer / `Instant`|
//! | `device_id`   | —                           | persisted node address        |
//! | `log_sink`    | `LogSink`                   | serial log output             |
//! | `storage`     | `ConfigPort`/`StoragePort`  | NVS / in-memory store         |
//! | `radio_sim`   | `RadioPort`                 | in-memory broadcast medium    |
//! | `radio_lora`  | `RadioPort`                 | SX1262 over SPI (`espidf`)    |

pub mod clock;
pub mod device_id;
pub mod log_sink;
pub mod storage;

#[cfg(not(target_os = "espidf"))]
pub mod radio_sim;

#[cfg(target_os = "espidf")]
pub mod radio_lora;
