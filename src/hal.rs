//! Hardware capabilities consumed by the driver.
//!
//! Register-level setup is left to the platform HAL. The driver only needs a
//! handful of operations, expressed as the traits below, plus
//! [`embedded_hal::digital`] pins and [`embedded_hal::delay::DelayNs`] for the
//! bit-banged arbitration.
//!
//! | Capability          | Used by                  |
//! |---------------------|--------------------------|
//! | [`SerialPort`]      | both modes               |
//! | [`TransceiverClock`] | [`Transceiver`](crate::arbitration::Transceiver) |
//! | [`IdleSignals`]     | [`Transceiver`](crate::arbitration::Transceiver) |
//! | [`IdleTimer`]       | [`BitBang`](crate::arbitration::BitBang) |

use crate::error::SerialError;

/// Byte-oriented UART wired to the CCD bus.
///
/// The peripheral must run at 7812.5 bit/s, 8 data bits, no parity, 1 stop bit.
/// Its receive-complete interrupt calls
/// [`CcdBus::on_byte_received`](crate::driver::CcdBus::on_byte_received) and its
/// data-register-empty interrupt calls
/// [`CcdBus::on_tx_ready`](crate::driver::CcdBus::on_tx_ready).
pub trait SerialPort {
    /// Configures the bit rate and frame format, then enables the receiver,
    /// the transmitter and the receive-complete interrupt.
    fn begin(&mut self);

    /// Reads the last received byte along with its framing/overrun flags.
    ///
    /// Only the [`SerialError::FRAMING`] and [`SerialError::OVERRUN`] bits are
    /// expected here.
    fn read_byte(&mut self) -> (u8, SerialError);

    /// Loads the next byte into the transmit data register.
    fn write_byte(&mut self, byte: u8);

    /// Enables or disables the receiver, the transmitter and the
    /// receive-complete interrupt.
    ///
    /// While disabled the RX and TX lines must be released to plain GPIO:
    /// RX as an input with its pull-up enabled, TX as an output.
    fn set_enabled(&mut self, enabled: bool);

    /// Enables or disables the transmit data-register-empty interrupt.
    fn set_tx_ready_interrupt(&mut self, enabled: bool);
}

/// Clock output that drives an external CCD transceiver.
pub trait TransceiverClock {
    /// Starts toggling the clock pin at `hz`.
    fn enable(&mut self, hz: u32);

    /// Stops the clock output.
    fn disable(&mut self);
}

/// Falling-edge interrupts for the transceiver's IDLE and CTRL lines.
///
/// The IDLE edge calls [`CcdBus::on_idle_edge`](crate::driver::CcdBus::on_idle_edge),
/// the CTRL (active byte) edge calls
/// [`CcdBus::on_active_edge`](crate::driver::CcdBus::on_active_edge).
pub trait IdleSignals {
    /// Configures both lines as pulled-up inputs and attaches the interrupts.
    fn listen(&mut self);

    /// Detaches both interrupts.
    fn unlisten(&mut self);
}

/// Countdown timer measuring bus silence.
///
/// Its expiry interrupt calls
/// [`CcdBus::on_idle_timer`](crate::driver::CcdBus::on_idle_timer).
/// See [`crate::timer`] for compare value helpers.
pub trait IdleTimer {
    /// Restarts the countdown from zero so that it expires after `duration_us`.
    fn start(&mut self, duration_us: u32);

    /// Stops the countdown. No expiry interrupt fires until the next `start`.
    fn stop(&mut self);
}
