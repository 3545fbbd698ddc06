//! Log-based sink adapter.
//!
//! Implements [`LogSink`] by writing status lines through the `log` crate
//! (UART/USB-CDC on device, stderr on host). A future MQTT or BLE adapter
//! would implement the same trait.

use log::info;

use crate::ports::LogSink;

/// Adapter that logs every line to the serial console.
pub struct LogLineSink;

impl LogLineSink {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogLineSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink for LogLineSink {
    fn line(&mut self, line: &str) {
        info!("{line}");
    }
}
