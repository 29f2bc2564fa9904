//! Transceiver-assisted bus access.
//!
//! Idle detection and arbitration are done by the transceiver itself, the
//! driver only feeds the UART and follows the IDLE/CTRL edges.

use embedded_hal::delay::DelayNs;

use super::Arbitration;
use crate::buffer::{RxBuffer, TxBuffer};
use crate::config::Config;
use crate::consts::TRANSCEIVER_CLOCK_HZ;
use crate::error::WriteError;
use crate::hal::{IdleSignals, SerialPort, TransceiverClock};

/// Transceiver-assisted bus access.
///
/// An external CCD transceiver (CDP68HC68S1) clocked by the MCU decides when
/// the bus is idle and silently drops our bytes if we lose arbitration. The
/// driver only needs to hand it bytes and follow its IDLE/CTRL interrupts.
///
/// ## Type Parameters
///
/// - `S`: the UART wired to the transceiver
/// - `C`: the clock output feeding the transceiver
/// - `I`: the IDLE/CTRL edge interrupts
#[derive(Debug)]
pub struct Transceiver<S, C, I> {
    serial: S,
    clock: C,
    signals: I,
}

impl<S, C, I> Transceiver<S, C, I>
where
    S: SerialPort,
    C: TransceiverClock,
    I: IdleSignals,
{
    /// Bundles the hardware used in transceiver-assisted mode.
    pub const fn new(serial: S, clock: C, signals: I) -> Self {
        Self {
            serial,
            clock,
            signals,
        }
    }

    /// Stops the clock and detaches the edge interrupts, returning the hardware.
    pub fn release(mut self) -> (S, C, I) {
        self.shutdown();
        (self.serial, self.clock, self.signals)
    }
}

impl<S, C, I> Arbitration for Transceiver<S, C, I>
where
    S: SerialPort,
    C: TransceiverClock,
    I: IdleSignals,
{
    type Serial = S;

    const STARTS_IDLE: bool = true;

    fn serial(&mut self) -> &mut S {
        &mut self.serial
    }

    fn begin(&mut self, _config: &Config) {
        self.serial.begin();
        self.clock.enable(TRANSCEIVER_CLOCK_HZ);
        self.signals.listen();
    }

    fn shutdown(&mut self) {
        self.signals.unlisten();
        self.clock.disable();
    }

    fn byte_received(&mut self) {}

    fn start_transmission<D: DelayNs>(
        &mut self,
        _rx: &mut RxBuffer,
        _tx: &mut TxBuffer,
        _delay: &mut D,
    ) -> Result<(), WriteError> {
        // The transceiver arbitrates on its own, just start feeding it.
        self.serial.set_tx_ready_interrupt(true);
        Ok(())
    }
}
