//! Bus access strategies.
//!
//! The CCD bus is multi-master: every module may start talking once the bus
//! has been idle long enough, and collisions are resolved bit by bit during
//! the first (ID) byte. The line is wired-AND, a module sending a `1` while
//! another sends a `0` reads back `0` and has to back off.
//!
//! Two strategies are available, chosen once by type when the
//! [`CcdBus`](crate::driver::CcdBus) is started:
//!
//! - [`Transceiver`]: a CDP68HC68S1 style transceiver detects idle and handles
//!   arbitration on its own, signalling the MCU through two edge interrupts.
//! - [`BitBang`]: the driver measures idle time with a countdown timer and
//!   arbitrates the ID byte itself by bit-banging the UART pins.

use embedded_hal::delay::DelayNs;

use crate::buffer::{RxBuffer, TxBuffer};
use crate::config::Config;
use crate::error::WriteError;
use crate::hal::SerialPort;

mod bitbang;
mod transceiver;

pub use bitbang::{BitBang, IdByteOutcome, arbitrate_id_byte};
pub use transceiver::Transceiver;

/// Idle detection and arbitration, as seen by the protocol engine.
pub trait Arbitration {
    /// UART wired to the bus.
    type Serial: SerialPort;

    /// Whether the bus is considered idle right after [`begin`](Arbitration::begin).
    const STARTS_IDLE: bool;

    /// The UART wired to the bus.
    fn serial(&mut self) -> &mut Self::Serial;

    /// One-time hardware bring-up.
    fn begin(&mut self, config: &Config);

    /// Stops whatever [`begin`](Arbitration::begin) started: timers, clock
    /// outputs and edge interrupts. The UART is left as is.
    fn shutdown(&mut self);

    /// Called from the byte-received interrupt before the byte is stored.
    fn byte_received(&mut self);

    /// Starts sending the frame staged in `tx`.
    ///
    /// The bus has just been seen idle and is already marked busy. On return,
    /// either the remaining bytes are handed to the interrupt-driven
    /// transmitter or `tx` has been cleared.
    fn start_transmission<D: DelayNs>(
        &mut self,
        rx: &mut RxBuffer,
        tx: &mut TxBuffer,
        delay: &mut D,
    ) -> Result<(), WriteError>;
}
