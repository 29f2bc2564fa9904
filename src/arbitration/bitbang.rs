//! Software arbitration by bit-banging the UART pins.
//!
//! The ID byte is sent by hand, one half bit-time at a time, so that every bit
//! can be read back in the middle of its slot and compared with what was
//! driven. The rest of the frame goes out through the UART as usual.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin, PinState};

use super::Arbitration;
use crate::buffer::{RxBuffer, TxBuffer};
use crate::config::Config;
use crate::consts::{DATA_BITS, HALF_BIT_TIME_US};
use crate::error::WriteError;
use crate::fmt::{debug, trace};
use crate::hal::{IdleTimer, SerialPort};

/// What happened on the bus while bit-banging an ID byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct IdByteOutcome {
    /// The ID byte we tried to send.
    pub sent: u8,
    /// The byte actually seen on the bus.
    pub sampled: u8,
    /// Set when the bus was busy, a bit read back differently than it was
    /// driven, or the start/stop bit had the wrong level.
    pub lost: bool,
}

impl IdByteOutcome {
    /// `true` if the whole ID byte went out unchallenged.
    pub fn won(&self) -> bool {
        !self.lost && self.sampled == self.sent
    }
}

fn sample<RX: InputPin>(rx: &mut RX) -> bool {
    rx.is_high().unwrap_or(false)
}

// Marks the byte as lost and releases the line.
fn lose<TX: OutputPin>(tx: &mut TX, outcome: &mut IdByteOutcome) {
    if !outcome.lost {
        outcome.lost = true;
        let _ = tx.set_high();
    }
}

/// Sends `id` bit by bit while reading the bus back.
///
/// Expects `tx` and `rx` to be detached from the UART: `rx` an input with its
/// pull-up enabled, `tx` an output. Each bit slot is split in two halves of
/// 64 µs, the bus is sampled at the boundary. After losing, the line is
/// released and the remaining bits are only read, so the outcome always holds
/// the byte that won the bus.
///
/// Pin errors are treated as reading a low level, which at worst makes us
/// back off.
pub fn arbitrate_id_byte<TX, RX, D>(tx: &mut TX, rx: &mut RX, delay: &mut D, id: u8) -> IdByteOutcome
where
    TX: OutputPin,
    RX: InputPin,
    D: DelayNs,
{
    let mut outcome = IdByteOutcome {
        sent: id,
        sampled: 0,
        lost: false,
    };
    // Idle high
    let _ = tx.set_high();

    // Someone else is already sending
    if !sample(rx) {
        lose(tx, &mut outcome);
    }

    if !outcome.lost {
        let _ = tx.set_low();
        delay.delay_us(HALF_BIT_TIME_US);
        if sample(rx) {
            lose(tx, &mut outcome);
        }
        delay.delay_us(HALF_BIT_TIME_US);
    }

    // LSB first
    let mut driven = false;
    for i in 0..DATA_BITS {
        if !outcome.lost {
            driven = id & (1 << i) != 0;
            let _ = tx.set_state(PinState::from(driven));
        }
        delay.delay_us(HALF_BIT_TIME_US);
        let level = sample(rx);
        if level {
            outcome.sampled |= 1 << i;
        }
        if level != driven {
            lose(tx, &mut outcome);
        }
        delay.delay_us(HALF_BIT_TIME_US);
    }

    // Stop bit
    let _ = tx.set_high();
    delay.delay_us(HALF_BIT_TIME_US);
    if !sample(rx) {
        lose(tx, &mut outcome);
    }
    delay.delay_us(HALF_BIT_TIME_US);

    outcome
}

/// Timer-measured idle detection with bit-banged arbitration.
///
/// Used when the MCU talks to the bus through a plain transceiver that just
/// converts levels. Idle is declared once `idle_bits` bit-times pass without a
/// byte, and collisions are detected by [`arbitrate_id_byte`] while the UART
/// is switched off.
///
/// ## Type Parameters
///
/// - `S`: the UART wired to the bus
/// - `T`: the countdown timer measuring bus silence
/// - `TX`: the UART TX pin, driven manually during arbitration
/// - `RX`: the UART RX pin, sampled manually during arbitration
#[derive(Debug)]
pub struct BitBang<S, T, TX, RX> {
    serial: S,
    timer: T,
    tx: TX,
    rx: RX,
    idle_us: u32,
}

impl<S, T, TX, RX> BitBang<S, T, TX, RX>
where
    S: SerialPort,
    T: IdleTimer,
    TX: OutputPin,
    RX: InputPin,
{
    /// Bundles the hardware used in bit-banged mode.
    pub const fn new(serial: S, timer: T, tx: TX, rx: RX) -> Self {
        Self {
            serial,
            timer,
            tx,
            rx,
            idle_us: 0,
        }
    }

    /// Called when the idle countdown expired.
    pub(crate) fn idle_expired(&mut self) {
        self.timer.stop();
    }

    /// Stops the idle timer, returning the hardware.
    pub fn release(mut self) -> (S, T, TX, RX) {
        self.shutdown();
        (self.serial, self.timer, self.tx, self.rx)
    }
}

impl<S, T, TX, RX> Arbitration for BitBang<S, T, TX, RX>
where
    S: SerialPort,
    T: IdleTimer,
    TX: OutputPin,
    RX: InputPin,
{
    type Serial = S;

    const STARTS_IDLE: bool = false;

    fn serial(&mut self) -> &mut S {
        &mut self.serial
    }

    fn begin(&mut self, config: &Config) {
        self.idle_us = config.idle_bits.duration_us();
        self.serial.begin();
        self.timer.start(self.idle_us);
    }

    fn shutdown(&mut self) {
        self.timer.stop();
    }

    fn byte_received(&mut self) {
        self.timer.start(self.idle_us);
    }

    fn start_transmission<D: DelayNs>(
        &mut self,
        rx: &mut RxBuffer,
        tx: &mut TxBuffer,
        delay: &mut D,
    ) -> Result<(), WriteError> {
        let Some(id) = tx.id_byte() else {
            return Ok(());
        };

        self.serial.set_enabled(false);
        let outcome = arbitrate_id_byte(&mut self.tx, &mut self.rx, delay, id);
        self.serial.set_enabled(true);
        self.timer.start(self.idle_us);

        // Whoever won, the bus carried this byte
        rx.restart_with(outcome.sampled);

        if outcome.won() {
            trace!("won arbitration with id {}", id);
            tx.seek(1);
            self.serial.set_tx_ready_interrupt(true);
            Ok(())
        } else {
            debug!("arbitration lost: sent {}, bus had {}", id, outcome.sampled);
            tx.clear();
            Err(WriteError::Collision)
        }
    }
}
