//! SX1262 LoRa radio adapter (ESP32, SPI).
//!
//! Implements [`RadioPort`] over an SX1262 transceiver using blocking SPI
//! commands via the `sx1262` crate, with a GPIO-interrupt-backed binary
//! semaphore for TX/RX-done signalling — the same pattern ESP-IDF firmware
//! uses for any interrupt-driven peripheral. Everything here is blocking,
//! matching the single-threaded cooperative tick loop: no IRQ handler runs
//! concurrently with the task that owns the radio.

use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::gpio::{AnyIOPin, Gpio1, Gpio10, Gpio4, Gpio5, Input, InterruptType, Output, PinDriver};
use esp_idf_hal::peripheral::Peripheral;
use esp_idf_hal::spi::config::{Config as SpiConfig, DriverConfig};
use esp_idf_hal::spi::{SpiDeviceDriver, SpiDriver, SPI2};
use esp_idf_hal::task::queue::Queue;
use esp_idf_hal::units::FromValueType;
use std::sync::Arc;

use sx1262::{
    ClearIrqStatus, Device, DeviceSelect, DioIrqConfig, GetIrqStatus, GetRxBufferStatus, IrqMask,
    PacketParams, PacketType, RxMode, SetDioIrqParams, SetPacketParams, SetPacketType, SetRx,
    SetStandby, SetTx, StandbyConfig, Timeout,
};

use crate::config::MeshConfig;
use crate::error::RadioError as MeshRadioError;
use crate::ports::RadioPort;

/// Busy-poll granularity while waiting on a TX/RX-done interrupt.
const IRQ_POLL_MS: u32 = 2;
const BUSY_TIMEOUT_MS: u32 = 1000;

struct IrqSignal(Arc<Queue<()>>);

impl IrqSignal {
    fn new() -> Self {
        Self(Arc::new(Queue::new(2)))
    }

    fn signal_from_isr(&self) {
        let _ = self.0.send_back((), 0);
    }

    fn wait(&self, timeout_ms: u32) -> bool {
        use esp_idf_hal::delay::TICK_RATE_HZ;
        let ticks = (timeout_ms as u64 * TICK_RATE_HZ as u64 / 1000) as u32;
        self.0.recv_front(ticks).is_some()
    }
}

pub struct LoraRadio<'d> {
    device: Device<SpiDeviceDriver<'d, SpiDriver<'d>>, PinDriver<'d, Gpio10, Output>>,
    busy: PinDriver<'d, Gpio4, Input>,
    reset: PinDriver<'d, Gpio5, Output>,
    irq: IrqSignal,
    last_rssi: i8,
}

impl<'d> LoraRadio<'d> {
    pub fn new(
        spi: impl Peripheral<P = SPI2> + 'd,
        sclk: impl Peripheral<P = esp_idf_hal::gpio::Gpio12> + 'd,
        mosi: impl Peripheral<P = esp_idf_hal::gpio::Gpio11> + 'd,
        miso: impl Peripheral<P = esp_idf_hal::gpio::Gpio13> + 'd,
        cs: impl Peripheral<P = Gpio10> + 'd,
        reset_pin: impl Peripheral<P = Gpio5> + 'd,
        busy_pin: impl Peripheral<P = Gpio4> + 'd,
        dio1: impl Peripheral<P = Gpio1> + 'd,
        config: &MeshConfig,
    ) -> Result<Self, MeshRadioError> {
        let spi_driver = SpiDriver::new(spi, sclk, mosi, Some(miso), &DriverConfig::new())
            .map_err(|_| MeshRadioError::NotReady)?;
        let spi_device = SpiDeviceDriver::new(
            spi_driver,
            Option::<AnyIOPin>::None,
            &SpiConfig::new().baudrate(8.MHz().into()),
        )
        .map_err(|_| MeshRadioError::NotReady)?;
        let cs_pin = PinDriver::output(cs).map_err(|_| MeshRadioError::NotReady)?;
        let mut reset = PinDriver::output(reset_pin).map_err(|_| MeshRadioError::NotReady)?;
        let busy = PinDriver::input(busy_pin).map_err(|_| MeshRadioError::NotReady)?;
        let mut dio1_pin = PinDriver::input(dio1).map_err(|_| MeshRadioError::NotReady)?;

        let irq = IrqSignal::new();
        let irq_for_isr = IrqSignal(irq.0.clone());
        dio1_pin
            .set_interrupt_type(InterruptType::PosEdge)
            .map_err(|_| MeshRadioError::NotReady)?;
        // SAFETY: the closure only touches an ISR-safe queue and runs on
        // this core's interrupt stack; it never blocks or allocates.
        unsafe {
            dio1_pin
                .subscribe(move || irq_for_isr.signal_from_isr())
                .map_err(|_| MeshRadioError::NotReady)?;
        }
        dio1_pin
            .enable_interrupt()
            .map_err(|_| MeshRadioError::NotReady)?;
        core::mem::forget(dio1_pin);

        reset.set_low().map_err(|_| MeshRadioError::NotReady)?;
        FreeRtos::delay_ms(10);
        reset.set_high().map_err(|_| MeshRadioError::NotReady)?;
        FreeRtos::delay_ms(10);

        let device = Device::new(spi_device, cs_pin, DeviceSelect::default());

        let mut radio = Self {
            device,
            busy,
            reset,
            irq,
            last_rssi: -128,
        };
        radio.init(config)?;
        Ok(radio)
    }

    fn wait_busy(&self) -> Result<(), MeshRadioError> {
        let mut waited = 0;
        while self.busy.is_high() {
            FreeRtos::delay_ms(1);
            waited += 1;
            if waited > BUSY_TIMEOUT_MS {
                return Err(MeshRadioError::Timeout);
            }
        }
        Ok(())
    }

    fn init(&mut self, config: &MeshConfig) -> Result<(), MeshRadioError> {
        let _ = config.radio_freq_hz;
        self.wait_busy()?;
        self.device
            .execute_command(SetStandby {
                config: StandbyConfig::StbyRc,
            })
            .map_err(|_| MeshRadioError::NotReady)?;
        self.device
            .execute_command(SetPacketType {
                packet_type: PacketType::LoRa,
            })
            .map_err(|_| MeshRadioError::NotReady)?;
        self.device
            .execute_command(SetDioIrqParams {
                irq_mask: IrqMask::TX_DONE | IrqMask::RX_DONE | IrqMask::TIMEOUT,
                dio1_mask: IrqMask::TX_DONE | IrqMask::RX_DONE | IrqMask::TIMEOUT,
                dio2_mask: IrqMask::empty(),
                dio3_mask: IrqMask::empty(),
            })
            .map_err(|_| MeshRadioError::NotReady)?;
        Ok(())
    }

    fn packet_params(payload_len: u8, is_tx: bool) -> PacketParams {
        PacketParams {
            preamble_length: 8,
            implicit_header: false,
            payload_length: payload_len,
            crc_on: true,
            invert_iq: is_tx,
        }
    }
}

impl RadioPort for LoraRadio<'_> {
    fn transmit(&mut self, bytes: &[u8]) -> Result<u32, MeshRadioError> {
        self.wait_busy()?;
        self.device
            .execute_command(SetPacketParams {
                params: Self::packet_params(bytes.len() as u8, true),
            })
            .map_err(|_| MeshRadioError::TransmitFailed)?;
        self.device
            .write_buffer(0, bytes)
            .map_err(|_| MeshRadioError::TransmitFailed)?;
        self.device
            .execute_command(ClearIrqStatus {
                irq_mask: IrqMask::all(),
            })
            .map_err(|_| MeshRadioError::TransmitFailed)?;

        let t0 = std::time::Instant::now();
        self.device
            .execute_command(SetTx {
                timeout: Timeout::from_ms(4_000),
            })
            .map_err(|_| MeshRadioError::TransmitFailed)?;

        loop {
            if self.irq.wait(IRQ_POLL_MS) {
                let irq = self
                    .device
                    .execute_command(GetIrqStatus)
                    .map_err(|_| MeshRadioError::TransmitFailed)?;
                if irq.irq_mask.contains(IrqMask::TX_DONE) {
                    let _ = self.device.execute_command(ClearIrqStatus {
                        irq_mask: IrqMask::all(),
                    });
                    break;
                }
                if irq.irq_mask.contains(IrqMask::TIMEOUT) {
                    return Err(MeshRadioError::Timeout);
                }
            }
            if t0.elapsed().as_millis() > 4_000 {
                return Err(MeshRadioError::Timeout);
            }
        }
        Ok(t0.elapsed().as_millis() as u32)
    }

    fn start_receive(&mut self) {
        let _ = self.device.execute_command(SetPacketParams {
            params: Self::packet_params(255, false),
        });
        let _ = self.device.execute_command(ClearIrqStatus {
            irq_mask: IrqMask::all(),
        });
        let _ = self.device.execute_command(SetRx {
            mode: RxMode::Continuous,
        });
    }

    fn read_packet(&mut self, buf: &mut [u8]) -> Option<usize> {
        if !self.irq.wait(0) {
            return None;
        }
        let irq = self.device.execute_command(GetIrqStatus).ok()?;
        if !irq.irq_mask.contains(IrqMask::RX_DONE) {
            return None;
        }
        let status = self.device.execute_command(GetRxBufferStatus).ok()?;
        let n = (status.payload_length_rx as usize).min(buf.len());
        self.device
            .read_buffer(status.rx_start_buffer_pointer, &mut buf[..n])
            .ok()?;
        let _ = self.device.execute_command(ClearIrqStatus {
            irq_mask: IrqMask::all(),
        });
        self.start_receive();
        Some(n)
    }

    fn rssi(&self) -> i8 {
        self.last_rssi
    }
}

impl Drop for LoraRadio<'_> {
    fn drop(&mut self) {
        let _ = self.reset.set_low();
    }
}
