//! CCD bus protocol engine.
//!
//! This module provides the [`CcdBus`] handle, which turns a UART, a pair of
//! interrupt sources and a timer into a framed message transport for the CCD
//! (Collision Detection) bus found in vehicle electronics.
//!
//! The handle is shared between the application and the interrupt handlers:
//! every method takes `&self` and does its work inside
//! [`critical_section::with`], so a `CcdBus` can live in a `static`.
//!
//! ## Interrupt wiring
//!
//! | Hardware event              | Handler |
//! |-----------------------------|---------|
//! | UART receive complete       | [`on_byte_received`](CcdBus::on_byte_received) |
//! | UART data register empty    | [`on_tx_ready`](CcdBus::on_tx_ready) |
//! | Idle timer expired          | [`on_idle_timer`](CcdBus::on_idle_timer) (bit-banged mode) |
//! | Transceiver IDLE falling    | [`on_idle_edge`](CcdBus::on_idle_edge) (transceiver mode) |
//! | Transceiver CTRL falling    | [`on_active_edge`](CcdBus::on_active_edge) (transceiver mode) |
//!
//! ## Example
//!
//! ```ignore
//! use ccd_bus::arbitration::BitBang;
//! use ccd_bus::config::Config;
//! use ccd_bus::driver::CcdBus;
//!
//! static CCD: CcdBus<BitBang<Usart1, Timer3, TxPin, RxPin>> = CcdBus::new();
//!
//! #[interrupt]
//! fn USART1_RX() {
//!     CCD.on_byte_received();
//! }
//!
//! #[interrupt]
//! fn USART1_UDRE() {
//!     CCD.on_tx_ready();
//! }
//!
//! #[interrupt]
//! fn TIMER3_COMPA() {
//!     CCD.on_idle_timer();
//! }
//!
//! fn main() -> ! {
//!     CCD.begin(BitBang::new(usart, timer, tx, rx), Config::default());
//!     let mut buf = [0u8; 16];
//!     loop {
//!         if CCD.available() {
//!             let len = CCD.read(&mut buf);
//!             // ...
//!         }
//!         let _ = CCD.write(&[0xb2, 0x20, 0x22, 0x00, 0x00, 0xf4], &mut delay);
//!     }
//! }
//! ```
//!
//! ## Design Notes
//!
//! The bus is marked busy once a whole byte has been received, not when its
//! start bit shows up. A write issued during the first byte of someone else's
//! frame still sees the bus idle and finds out during arbitration.

use core::cell::RefCell;
use core::convert::Infallible;
use core::fmt;

use critical_section::Mutex;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};

use crate::arbitration::{Arbitration, BitBang, Transceiver};
use crate::buffer::{RxBuffer, TxBuffer};
use crate::config::Config;
use crate::consts::{CCD_MAX_MESSAGE_LEN_USIZE, WRITE_POLL_INTERVAL_US, WRITE_TIMEOUT_US};
use crate::error::{SerialError, WriteError};
use crate::fmt::{debug, trace, warning};
use crate::hal::{IdleSignals, IdleTimer, SerialPort, TransceiverClock};
use crate::message::{Assembly, Mailbox, Message, assemble};

/// Running counters, for diagnostics only.
///
/// All counters wrap around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct Stats {
    /// Frames stored in the mailbox.
    pub rx_good: u16,
    /// Frames dropped because of a checksum mismatch.
    pub rx_bad: u16,
    /// Bytes dropped because the receive buffer was full.
    pub rx_dropped: u16,
    /// Frames fully handed to the UART.
    pub tx_good: u16,
    /// Writes that lost arbitration.
    pub collisions: u16,
    /// Writes that gave up waiting for the bus.
    pub timeouts: u16,
}

struct Engine<M> {
    mode: M,
    config: Config,
    bus_idle: bool,
    rx: RxBuffer,
    tx: TxBuffer,
    mailbox: Mailbox,
    last_error: SerialError,
    stats: Stats,
}

impl<M: Arbitration> Engine<M> {
    fn bus_went_idle(&mut self) {
        self.bus_idle = true;
        match assemble(&mut self.rx, self.config.verify_rx_checksum, &mut self.mailbox) {
            Assembly::Empty => {}
            Assembly::Accepted(len) => {
                trace!("assembled {} byte message", len);
                self.stats.rx_good = self.stats.rx_good.wrapping_add(1);
            }
            Assembly::ChecksumMismatch => {
                debug!("dropped message with bad checksum");
                self.stats.rx_bad = self.stats.rx_bad.wrapping_add(1);
            }
        }
    }

    fn transmit<D: DelayNs>(&mut self, frame: &[u8], delay: &mut D) -> Result<(), WriteError> {
        if !self.tx.load(frame, self.config.calculate_tx_checksum) {
            return Err(WriteError::FrameTooLong);
        }
        self.bus_idle = false;
        let result = self
            .mode
            .start_transmission(&mut self.rx, &mut self.tx, delay);
        if result.is_err() {
            self.stats.collisions = self.stats.collisions.wrapping_add(1);
        }
        result
    }
}

/// Handle to a CCD bus transport.
///
/// `M` selects how the bus is accessed, see [`crate::arbitration`]. The handle
/// starts out empty so it can be built in a `static`; nothing happens until
/// [`begin`](CcdBus::begin) hands it the hardware. Until then the interrupt
/// handlers do nothing, [`read`](CcdBus::read) returns `0` and
/// [`write`](CcdBus::write) times out.
pub struct CcdBus<M> {
    engine: Mutex<RefCell<Option<Engine<M>>>>,
}

impl<M> CcdBus<M> {
    /// Creates an idle handle with no hardware attached.
    pub const fn new() -> Self {
        Self {
            engine: Mutex::new(RefCell::new(None)),
        }
    }
}

impl<M> Default for CcdBus<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for CcdBus<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CcdBus").finish_non_exhaustive()
    }
}

impl<M: Arbitration> CcdBus<M> {
    /// Creates a handle and starts it right away.
    pub fn with_mode(mode: M, config: Config) -> Self {
        let bus = Self::new();
        bus.begin(mode, config);
        bus
    }

    /// Brings up the hardware and starts listening to the bus.
    ///
    /// In transceiver mode the bus starts idle. In bit-banged mode it starts
    /// busy and the idle timer is armed, so a first write waits for one idle
    /// period. Calling `begin` again shuts the previous hardware down, drops
    /// it along with any pending state, and starts over with `mode`. Use
    /// [`end`](CcdBus::end) instead to get the previous hardware back.
    pub fn begin(&self, mut mode: M, config: Config) {
        critical_section::with(|cs| {
            let mut engine = self.engine.borrow_ref_mut(cs);
            if let Some(mut previous) = engine.take() {
                previous.mode.shutdown();
            }
            mode.begin(&config);
            let _ = engine.replace(Engine {
                mode,
                config,
                bus_idle: M::STARTS_IDLE,
                rx: RxBuffer::new(),
                tx: TxBuffer::new(),
                mailbox: Mailbox::new(),
                last_error: SerialError::NONE,
                stats: Stats::default(),
            });
        });
        debug!("ccd bus started, {} idle bits", config.idle_bits.bits());
    }

    /// Detaches the hardware, returning the bus access strategy.
    pub fn end(&self) -> Option<M> {
        critical_section::with(|cs| self.engine.borrow_ref_mut(cs).take().map(|e| e.mode))
    }

    fn with_engine<R>(&self, f: impl FnOnce(&mut Engine<M>) -> R) -> Option<R> {
        critical_section::with(|cs| self.engine.borrow_ref_mut(cs).as_mut().map(f))
    }

    /// Returns `true` if a message was received and not read yet.
    pub fn available(&self) -> bool {
        self.with_engine(|e| e.mailbox.is_available())
            .unwrap_or(false)
    }

    /// Copies the last received message into `buf` and marks it as read.
    ///
    /// # Returns
    /// The number of bytes copied: the message length bounded by `buf.len()`,
    /// or `0` if no unread message is available.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        self.with_engine(|e| e.mailbox.read_into(buf)).unwrap_or(0)
    }

    /// Returns the last received message, if unread, and marks it as read.
    pub fn receive(&self) -> Option<Message> {
        self.with_engine(|e| e.mailbox.take()).flatten()
    }

    /// Sends `frame` on the bus if it is idle right now.
    ///
    /// When checksum generation is enabled, the last byte of frames longer
    /// than one byte is replaced by their checksum.
    ///
    /// # Errors
    /// - `nb::Error::WouldBlock` if the bus is busy or the previous frame is
    ///   still being sent; nothing was changed
    /// - [`WriteError::EmptyBuffer`] / [`WriteError::FrameTooLong`] for
    ///   frames outside of 1..=16 bytes
    /// - [`WriteError::Collision`] if another module won arbitration
    pub fn try_write<D: DelayNs>(&self, frame: &[u8], delay: &mut D) -> nb::Result<(), WriteError> {
        if frame.is_empty() {
            return Err(WriteError::EmptyBuffer.into());
        }
        if frame.len() > CCD_MAX_MESSAGE_LEN_USIZE {
            return Err(WriteError::FrameTooLong.into());
        }
        critical_section::with(|cs| {
            let mut engine = self.engine.borrow_ref_mut(cs);
            let Some(engine) = engine.as_mut() else {
                return Err(nb::Error::WouldBlock);
            };
            if !engine.bus_idle || !engine.tx.is_empty() {
                return Err(nb::Error::WouldBlock);
            }
            engine.transmit(frame, delay).map_err(nb::Error::Other)
        })
    }

    /// Sends `frame`, waiting up to one second for the bus to go idle.
    ///
    /// In transceiver mode this returns as soon as the frame is handed to the
    /// UART. In bit-banged mode the ID byte is arbitrated first, which blocks
    /// for about 1.3 ms with interrupts masked.
    ///
    /// # Errors
    /// - [`WriteError::EmptyBuffer`]: `frame` is empty, returned immediately
    /// - [`WriteError::FrameTooLong`]: `frame` is longer than 16 bytes
    /// - [`WriteError::Timeout`]: the bus stayed busy for one second
    /// - [`WriteError::Collision`]: another module won arbitration
    pub fn write<D: DelayNs>(&self, frame: &[u8], delay: &mut D) -> Result<(), WriteError> {
        let mut waited_us = 0;
        loop {
            match self.try_write(frame, delay) {
                Ok(()) => return Ok(()),
                Err(nb::Error::Other(e)) => return Err(e),
                Err(nb::Error::WouldBlock) => {}
            }
            if waited_us >= WRITE_TIMEOUT_US {
                warning!("bus not idle after {} us", waited_us);
                let _ = self.with_engine(|e| {
                    e.stats.timeouts = e.stats.timeouts.wrapping_add(1);
                });
                return Err(WriteError::Timeout);
            }
            delay.delay_us(WRITE_POLL_INTERVAL_US);
            waited_us += WRITE_POLL_INTERVAL_US;
        }
    }

    /// Completes once the interrupt-driven transmitter has handed out every
    /// byte of the last frame.
    pub fn flush(&self) -> nb::Result<(), Infallible> {
        match self.with_engine(|e| e.tx.is_empty()) {
            Some(false) => Err(nb::Error::WouldBlock),
            _ => Ok(()),
        }
    }

    /// Returns `true` if the bus is currently considered idle.
    pub fn is_bus_idle(&self) -> bool {
        self.with_engine(|e| e.bus_idle).unwrap_or(false)
    }

    /// Error flags of the most recently received byte.
    pub fn last_serial_error(&self) -> SerialError {
        self.with_engine(|e| e.last_error)
            .unwrap_or(SerialError::NONE)
    }

    /// Snapshot of the diagnostic counters.
    pub fn stats(&self) -> Stats {
        self.with_engine(|e| e.stats).unwrap_or_default()
    }

    /// UART receive-complete handler.
    ///
    /// Restarts idle detection, marks the bus busy and stores the byte. Bytes
    /// beyond 16 per frame are dropped and flagged with
    /// [`SerialError::BUFFER_OVERFLOW`].
    pub fn on_byte_received(&self) {
        let _ = self.with_engine(|e| {
            e.mode.byte_received();
            e.bus_idle = false;

            let (byte, mut status) = e.mode.serial().read_byte();
            if !e.rx.push(byte) {
                status.insert(SerialError::BUFFER_OVERFLOW);
                e.stats.rx_dropped = e.stats.rx_dropped.wrapping_add(1);
            }
            if !status.is_empty() {
                debug!("serial error {} on byte {}", status.bits(), byte);
            }
            e.last_error = status;
        });
    }

    /// UART data-register-empty handler.
    ///
    /// Hands the next staged byte to the UART, or disables the interrupt once
    /// the frame is done.
    pub fn on_tx_ready(&self) {
        let _ = self.with_engine(|e| {
            let sending = !e.tx.is_empty();
            match e.tx.next_byte() {
                Some(byte) => e.mode.serial().write_byte(byte),
                None => {
                    e.mode.serial().set_tx_ready_interrupt(false);
                    if sending {
                        e.stats.tx_good = e.stats.tx_good.wrapping_add(1);
                    }
                }
            }
        });
    }
}

impl<S, T, TX, RX> CcdBus<BitBang<S, T, TX, RX>>
where
    S: SerialPort,
    T: IdleTimer,
    TX: OutputPin,
    RX: InputPin,
{
    /// Idle timer expiry handler.
    ///
    /// The bus has been silent for the configured number of bit-times: stop
    /// the timer, mark the bus idle and assemble whatever was received.
    pub fn on_idle_timer(&self) {
        let _ = self.with_engine(|e| {
            e.mode.idle_expired();
            e.bus_went_idle();
        });
    }
}

impl<S, C, I> CcdBus<Transceiver<S, C, I>>
where
    S: SerialPort,
    C: TransceiverClock,
    I: IdleSignals,
{
    /// Transceiver IDLE line handler: marks the bus idle and assembles
    /// whatever was received.
    pub fn on_idle_edge(&self) {
        let _ = self.with_engine(|e| e.bus_went_idle());
    }

    /// Transceiver CTRL line handler: a byte started on the bus.
    pub fn on_active_edge(&self) {
        let _ = self.with_engine(|e| e.bus_idle = false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum;
    use crate::config::IdleBits;
    use crate::consts::BIT_TIME_US;
    use core::cell::Cell;
    use embedded_hal::digital::ErrorType;
    use embedded_hal_mock::eh1::delay::NoopDelay;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Debug, Default)]
    struct SerialLog {
        incoming: VecDeque<(u8, SerialError)>,
        written: Vec<u8>,
        begun: bool,
        enabled: bool,
        tx_ready_irq: bool,
        disabled_count: u32,
    }

    #[derive(Debug, Clone, Default)]
    struct MockSerial(Rc<RefCell<SerialLog>>);

    impl MockSerial {
        fn feed(&self, bytes: &[u8]) {
            let mut log = self.0.borrow_mut();
            log.incoming
                .extend(bytes.iter().map(|&b| (b, SerialError::NONE)));
        }
    }

    impl SerialPort for MockSerial {
        fn begin(&mut self) {
            let mut log = self.0.borrow_mut();
            log.begun = true;
            log.enabled = true;
        }

        fn read_byte(&mut self) -> (u8, SerialError) {
            self.0
                .borrow_mut()
                .incoming
                .pop_front()
                .expect("no byte to read")
        }

        fn write_byte(&mut self, byte: u8) {
            self.0.borrow_mut().written.push(byte);
        }

        fn set_enabled(&mut self, enabled: bool) {
            let mut log = self.0.borrow_mut();
            log.enabled = enabled;
            if !enabled {
                log.disabled_count += 1;
            }
        }

        fn set_tx_ready_interrupt(&mut self, enabled: bool) {
            self.0.borrow_mut().tx_ready_irq = enabled;
        }
    }

    #[derive(Debug, Default)]
    struct TimerLog {
        running: bool,
        duration_us: u32,
        starts: u32,
    }

    #[derive(Debug, Clone, Default)]
    struct MockTimer(Rc<RefCell<TimerLog>>);

    impl IdleTimer for MockTimer {
        fn start(&mut self, duration_us: u32) {
            let mut log = self.0.borrow_mut();
            log.running = true;
            log.duration_us = duration_us;
            log.starts += 1;
        }

        fn stop(&mut self) {
            self.0.borrow_mut().running = false;
        }
    }

    #[derive(Debug, Clone, Default)]
    struct MockClock(Rc<Cell<Option<u32>>>);

    impl TransceiverClock for MockClock {
        fn enable(&mut self, hz: u32) {
            self.0.set(Some(hz));
        }

        fn disable(&mut self) {
            self.0.set(None);
        }
    }

    #[derive(Debug, Clone, Default)]
    struct MockSignals(Rc<Cell<bool>>);

    impl IdleSignals for MockSignals {
        fn listen(&mut self) {
            self.0.set(true);
        }

        fn unlisten(&mut self) {
            self.0.set(false);
        }
    }

    /// Another module competing for the bus with its own ID byte.
    #[derive(Debug)]
    struct Remote {
        id: u8,
        start_us: u64,
        lost: bool,
    }

    /// Wired-AND bus line with a virtual clock.
    #[derive(Debug)]
    struct Line {
        now_us: u64,
        local: bool,
        remote: Option<Remote>,
    }

    impl Line {
        fn new() -> Self {
            Self {
                now_us: 0,
                local: true,
                remote: None,
            }
        }

        fn level(&mut self) -> bool {
            let now = self.now_us;
            let local = self.local;
            let Some(remote) = self.remote.as_mut() else {
                return local;
            };
            let slot = now.saturating_sub(remote.start_us) / BIT_TIME_US as u64;
            let remote_level = match slot {
                _ if now < remote.start_us => true,
                0 => false,
                1..=8 => remote.lost || remote.id & (1 << (slot - 1)) != 0,
                _ => true,
            };
            let level = local && remote_level;
            // The remote backs off the same way we do
            if (1..=8).contains(&slot) && remote_level && !level {
                remote.lost = true;
            }
            level
        }
    }

    #[derive(Debug, Clone)]
    struct LinePin(Rc<RefCell<Line>>);

    impl ErrorType for LinePin {
        type Error = Infallible;
    }

    impl OutputPin for LinePin {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.0.borrow_mut().local = false;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.0.borrow_mut().local = true;
            Ok(())
        }
    }

    impl InputPin for LinePin {
        fn is_high(&mut self) -> Result<bool, Infallible> {
            Ok(self.0.borrow_mut().level())
        }

        fn is_low(&mut self) -> Result<bool, Infallible> {
            Ok(!self.0.borrow_mut().level())
        }
    }

    /// Advances the line clock and optionally fires a callback once.
    struct LineDelay<'a> {
        line: Rc<RefCell<Line>>,
        hook: Option<(u64, Box<dyn FnOnce() + 'a>)>,
    }

    impl<'a> LineDelay<'a> {
        fn new(line: &Rc<RefCell<Line>>) -> Self {
            Self {
                line: line.clone(),
                hook: None,
            }
        }

        fn at(mut self, when_us: u64, f: impl FnOnce() + 'a) -> Self {
            self.hook = Some((when_us, Box::new(f)));
            self
        }
    }

    impl DelayNs for LineDelay<'_> {
        fn delay_ns(&mut self, ns: u32) {
            let now = {
                let mut line = self.line.borrow_mut();
                line.now_us += u64::from(ns / 1_000);
                line.now_us
            };
            if self.hook.as_ref().is_some_and(|(when, _)| now >= *when) {
                if let Some((_, f)) = self.hook.take() {
                    f();
                }
            }
        }
    }

    type SoftBus = CcdBus<BitBang<MockSerial, MockTimer, LinePin, LinePin>>;
    type HardBus = CcdBus<Transceiver<MockSerial, MockClock, MockSignals>>;

    struct SoftRig {
        bus: SoftBus,
        serial: MockSerial,
        timer: MockTimer,
        line: Rc<RefCell<Line>>,
    }

    fn soft_rig(config: Config) -> SoftRig {
        let serial = MockSerial::default();
        let timer = MockTimer::default();
        let line = Rc::new(RefCell::new(Line::new()));
        let mode = BitBang::new(
            serial.clone(),
            timer.clone(),
            LinePin(line.clone()),
            LinePin(line.clone()),
        );
        SoftRig {
            bus: CcdBus::with_mode(mode, config),
            serial,
            timer,
            line,
        }
    }

    struct HardRig {
        bus: HardBus,
        serial: MockSerial,
        clock: MockClock,
        signals: MockSignals,
    }

    fn hard_rig(config: Config) -> HardRig {
        let serial = MockSerial::default();
        let clock = MockClock::default();
        let signals = MockSignals::default();
        let mode = Transceiver::new(serial.clone(), clock.clone(), signals.clone());
        HardRig {
            bus: CcdBus::with_mode(mode, config),
            serial,
            clock,
            signals,
        }
    }

    fn deliver<M: Arbitration>(bus: &CcdBus<M>, serial: &MockSerial, bytes: &[u8]) {
        serial.feed(bytes);
        for _ in bytes {
            bus.on_byte_received();
        }
    }

    fn drain_tx<M: Arbitration>(bus: &CcdBus<M>, serial: &MockSerial) {
        while serial.0.borrow().tx_ready_irq {
            bus.on_tx_ready();
        }
    }

    fn no_checksums() -> Config {
        Config::new()
            .verify_rx_checksum(false)
            .calculate_tx_checksum(false)
    }

    #[test]
    fn test_unstarted_bus_is_inert() {
        let bus: SoftBus = CcdBus::new();
        bus.on_byte_received();
        bus.on_tx_ready();
        bus.on_idle_timer();
        assert!(!bus.available());
        assert_eq!(bus.read(&mut [0u8; 16]), 0);
        assert!(!bus.is_bus_idle());
        assert_eq!(bus.write(&[0x10], &mut NoopDelay::new()), Err(WriteError::Timeout));
        assert!(bus.end().is_none());
    }

    #[test]
    fn test_begin_bitbang() {
        let rig = soft_rig(Config::new().idle_bits(IdleBits::Twelve));
        assert!(rig.serial.0.borrow().begun);
        let timer = rig.timer.0.borrow();
        assert!(timer.running);
        assert_eq!(timer.duration_us, 1_536);
        assert!(!rig.bus.is_bus_idle());
    }

    #[test]
    fn test_begin_transceiver() {
        let rig = hard_rig(Config::default());
        assert!(rig.serial.0.borrow().begun);
        assert_eq!(rig.clock.0.get(), Some(2_000_000));
        assert!(rig.signals.0.get());
        assert!(rig.bus.is_bus_idle());

        let (_serial, _clock, _signals) = rig.bus.end().expect("started").release();
        assert_eq!(rig.clock.0.get(), None);
        assert!(!rig.signals.0.get());
    }

    #[test]
    fn test_begin_again_stops_previous_hardware() {
        let first = hard_rig(no_checksums());
        deliver(&first.bus, &first.serial, &[0x24, 0x01]);

        let clock = MockClock::default();
        let signals = MockSignals::default();
        first.bus.begin(
            Transceiver::new(first.serial.clone(), clock.clone(), signals.clone()),
            Config::default(),
        );
        assert_eq!(first.clock.0.get(), None);
        assert!(!first.signals.0.get());
        assert_eq!(clock.0.get(), Some(2_000_000));
        assert!(signals.0.get());

        // Pending bytes went with the old state
        first.bus.on_idle_edge();
        assert!(!first.bus.available());

        let soft = soft_rig(Config::default());
        soft.bus.begin(
            BitBang::new(
                MockSerial::default(),
                MockTimer::default(),
                LinePin(soft.line.clone()),
                LinePin(soft.line.clone()),
            ),
            Config::default(),
        );
        assert!(!soft.timer.0.borrow().running);
    }

    #[test]
    fn test_received_frames_read_back_exactly() {
        let rig = soft_rig(no_checksums());
        for len in 1..=16u8 {
            let frame: Vec<u8> = (0..len).map(|i| 0xa0 ^ i.wrapping_mul(7)).collect();
            deliver(&rig.bus, &rig.serial, &frame);
            assert!(!rig.bus.is_bus_idle());
            assert!(!rig.bus.available());

            rig.bus.on_idle_timer();
            assert!(rig.bus.is_bus_idle());
            assert!(!rig.timer.0.borrow().running);
            assert!(rig.bus.available());

            let mut buf = [0u8; 16];
            let n = rig.bus.read(&mut buf);
            assert_eq!(&buf[..n], frame.as_slice());
        }
        assert_eq!(rig.bus.stats().rx_good, 16);
    }

    #[test]
    fn test_byte_rearms_idle_timer() {
        let rig = soft_rig(Config::default());
        let starts = rig.timer.0.borrow().starts;
        deliver(&rig.bus, &rig.serial, &[0x24, 0x00]);
        assert_eq!(rig.timer.0.borrow().starts, starts + 2);
        assert!(rig.timer.0.borrow().running);
    }

    #[test]
    fn test_read_twice() {
        let rig = soft_rig(no_checksums());
        deliver(&rig.bus, &rig.serial, &[0x24, 0x01, 0x02]);
        rig.bus.on_idle_timer();

        let mut buf = [0u8; 16];
        assert_eq!(rig.bus.read(&mut buf), 3);
        assert!(!rig.bus.available());
        assert_eq!(rig.bus.read(&mut buf), 0);
    }

    #[test]
    fn test_receive_returns_message() {
        let rig = hard_rig(no_checksums());
        rig.bus.on_active_edge();
        assert!(!rig.bus.is_bus_idle());
        deliver(&rig.bus, &rig.serial, &[0x82, 0x20]);
        rig.bus.on_idle_edge();
        assert!(rig.bus.is_bus_idle());

        let message = rig.bus.receive().expect("message");
        assert_eq!(message.as_slice(), &[0x82, 0x20]);
        assert!(rig.bus.receive().is_none());
    }

    #[test]
    fn test_unread_message_is_replaced() {
        let rig = soft_rig(no_checksums());
        deliver(&rig.bus, &rig.serial, &[1, 2, 3]);
        rig.bus.on_idle_timer();
        deliver(&rig.bus, &rig.serial, &[4, 5]);
        rig.bus.on_idle_timer();

        let mut buf = [0u8; 16];
        assert_eq!(rig.bus.read(&mut buf), 2);
        assert_eq!(&buf[..2], &[4, 5]);
    }

    #[test]
    fn test_checksum_verification() {
        let rig = soft_rig(Config::default());

        deliver(&rig.bus, &rig.serial, &[0x24, 0x01, 0x02, 0x00]);
        rig.bus.on_idle_timer();
        assert!(!rig.bus.available());
        assert_eq!(rig.bus.read(&mut [0u8; 16]), 0);
        assert_eq!(rig.bus.stats().rx_bad, 1);

        deliver(&rig.bus, &rig.serial, &[0x24, 0x01, 0x02, 0x27]);
        rig.bus.on_idle_timer();
        assert!(rig.bus.available());
        assert_eq!(rig.bus.read(&mut [0u8; 16]), 4);

        // A bad frame after a good one must not resurrect it
        deliver(&rig.bus, &rig.serial, &[0x24, 0x01, 0x02, 0x28]);
        rig.bus.on_idle_timer();
        assert!(!rig.bus.available());
    }

    #[test]
    fn test_receive_overflow() {
        let rig = soft_rig(no_checksums());
        let bytes: Vec<u8> = (0..20).collect();
        deliver(&rig.bus, &rig.serial, &bytes[..16]);
        assert!(rig.bus.last_serial_error().is_empty());

        deliver(&rig.bus, &rig.serial, &bytes[16..]);
        assert!(
            rig.bus
                .last_serial_error()
                .contains(SerialError::BUFFER_OVERFLOW)
        );
        assert_eq!(rig.bus.stats().rx_dropped, 4);

        rig.bus.on_idle_timer();
        let mut buf = [0u8; 16];
        assert_eq!(rig.bus.read(&mut buf), 16);
        assert_eq!(&buf[..], &bytes[..16]);

        // The next frame starts from an empty buffer
        deliver(&rig.bus, &rig.serial, &[0x42]);
        assert!(rig.bus.last_serial_error().is_empty());
    }

    #[test]
    fn test_serial_error_is_recorded() {
        let rig = hard_rig(no_checksums());
        rig.serial
            .0
            .borrow_mut()
            .incoming
            .push_back((0x55, SerialError::FRAMING));
        rig.bus.on_byte_received();
        assert_eq!(rig.bus.last_serial_error(), SerialError::FRAMING);

        rig.bus.on_idle_edge();
        assert_eq!(rig.bus.read(&mut [0u8; 16]), 1);
    }

    #[test]
    fn test_write_empty_frame() {
        let rig = hard_rig(Config::default());
        assert_eq!(
            rig.bus.write(&[], &mut NoopDelay::new()),
            Err(WriteError::EmptyBuffer)
        );
        assert!(rig.bus.is_bus_idle());
        assert!(!rig.serial.0.borrow().tx_ready_irq);
        assert_eq!(rig.bus.flush(), Ok(()));
    }

    #[test]
    fn test_write_too_long() {
        let rig = hard_rig(Config::default());
        assert_eq!(
            rig.bus.write(&[0u8; 17], &mut NoopDelay::new()),
            Err(WriteError::FrameTooLong)
        );
        assert!(rig.bus.is_bus_idle());
    }

    #[test]
    fn test_write_transceiver_mode() {
        let rig = hard_rig(Config::default());
        let frame = [0xb2, 0x20, 0x22, 0x00, 0x00, 0x00];

        assert_eq!(rig.bus.write(&frame, &mut NoopDelay::new()), Ok(()));
        assert!(!rig.bus.is_bus_idle());
        assert!(rig.serial.0.borrow().tx_ready_irq);
        assert_eq!(rig.bus.flush(), Err(nb::Error::WouldBlock));

        drain_tx(&rig.bus, &rig.serial);
        let mut expected = frame;
        checksum::stamp(&mut expected);
        assert_eq!(rig.serial.0.borrow().written, expected);
        assert_eq!(expected[5], 0xf4);
        assert_eq!(rig.bus.flush(), Ok(()));
        assert_eq!(rig.bus.stats().tx_good, 1);
    }

    #[test]
    fn test_write_without_checksum() {
        let rig = hard_rig(no_checksums());
        let frame = [0x24, 0x01, 0x02, 0x00];
        assert_eq!(rig.bus.write(&frame, &mut NoopDelay::new()), Ok(()));
        drain_tx(&rig.bus, &rig.serial);
        assert_eq!(rig.serial.0.borrow().written, frame);
    }

    #[test]
    fn test_write_times_out_on_busy_bus() {
        let rig = hard_rig(Config::default());
        rig.bus.on_active_edge();

        let line = Rc::new(RefCell::new(Line::new()));
        let mut delay = LineDelay::new(&line);
        assert_eq!(
            rig.bus.write(&[0x24, 0x00], &mut delay),
            Err(WriteError::Timeout)
        );
        assert!(line.borrow().now_us >= u64::from(WRITE_TIMEOUT_US));
        assert!(line.borrow().now_us < u64::from(WRITE_TIMEOUT_US + 1_000));

        assert_eq!(rig.bus.flush(), Ok(()));
        assert!(!rig.serial.0.borrow().tx_ready_irq);
        assert!(rig.serial.0.borrow().written.is_empty());
        assert_eq!(rig.bus.stats().timeouts, 1);
    }

    #[test]
    fn test_write_waits_for_idle() {
        let rig = hard_rig(no_checksums());
        rig.bus.on_active_edge();

        let line = Rc::new(RefCell::new(Line::new()));
        let bus = &rig.bus;
        let mut delay = LineDelay::new(&line).at(5_000, move || bus.on_idle_edge());
        assert_eq!(rig.bus.try_write(&[0x24], &mut NoopDelay::new()), Err(nb::Error::WouldBlock));
        assert_eq!(rig.bus.write(&[0x24], &mut delay), Ok(()));
        assert!(line.borrow().now_us >= 5_000);
        assert!(rig.serial.0.borrow().tx_ready_irq);
    }

    #[test]
    fn test_write_waits_for_previous_frame() {
        let rig = hard_rig(no_checksums());
        assert_eq!(rig.bus.write(&[0x24, 0x01], &mut NoopDelay::new()), Ok(()));
        rig.bus.on_idle_edge();

        // Bus idle again, but our own frame is still queued
        assert_eq!(
            rig.bus.try_write(&[0x25], &mut NoopDelay::new()),
            Err(nb::Error::WouldBlock)
        );
        drain_tx(&rig.bus, &rig.serial);
        assert_eq!(rig.bus.try_write(&[0x25], &mut NoopDelay::new()), Ok(()));
    }

    #[test]
    fn test_bitbang_write_on_quiet_bus() {
        let rig = soft_rig(Config::default());
        rig.bus.on_idle_timer();
        assert!(rig.bus.is_bus_idle());

        let frame = [0xb2, 0x20, 0x22, 0x00, 0x00, 0x00];
        let mut delay = LineDelay::new(&rig.line);
        assert_eq!(rig.bus.write(&frame, &mut delay), Ok(()));

        // Start, 8 data bits and stop, two halves each
        assert_eq!(rig.line.borrow().now_us, 10 * u64::from(BIT_TIME_US));
        assert!(rig.line.borrow().local);
        {
            let serial = rig.serial.0.borrow();
            assert_eq!(serial.disabled_count, 1);
            assert!(serial.enabled);
            assert!(serial.tx_ready_irq);
        }
        assert!(rig.timer.0.borrow().running);
        assert!(!rig.bus.is_bus_idle());

        // The UART sends everything after the ID byte
        drain_tx(&rig.bus, &rig.serial);
        assert_eq!(
            rig.serial.0.borrow().written,
            [0x20, 0x22, 0x00, 0x00, 0xf4]
        );

        // Our own bytes echo back and form the received frame
        deliver(&rig.bus, &rig.serial, &[0x20, 0x22, 0x00, 0x00, 0xf4]);
        rig.bus.on_idle_timer();
        let mut buf = [0u8; 16];
        assert_eq!(rig.bus.read(&mut buf), 6);
        assert_eq!(&buf[..6], &[0xb2, 0x20, 0x22, 0x00, 0x00, 0xf4]);
    }

    #[test]
    fn test_bitbang_arbitration_between_two_modules() {
        // The line is wired-AND and sent LSB first, so the first differing bit
        // from the bottom decides: 0x20 has a 0 at bit 4 where 0x10 has a 1.
        let rig = soft_rig(no_checksums());
        rig.bus.on_idle_timer();
        rig.line.borrow_mut().remote = Some(Remote {
            id: 0x20,
            start_us: 1,
            lost: false,
        });

        let mut delay = LineDelay::new(&rig.line);
        assert_eq!(
            rig.bus.write(&[0x10, 0x01, 0x02], &mut delay),
            Err(WriteError::Collision)
        );
        assert!(!rig.line.borrow().remote.as_ref().expect("remote").lost);
        assert!(rig.line.borrow().local);
        assert!(!rig.serial.0.borrow().tx_ready_irq);
        assert_eq!(rig.bus.flush(), Ok(()));
        assert_eq!(rig.bus.stats().collisions, 1);

        // The winner's ID byte is received like any other frame
        assert!(rig.timer.0.borrow().running);
        rig.bus.on_idle_timer();
        let mut buf = [0u8; 16];
        assert_eq!(rig.bus.read(&mut buf), 1);
        assert_eq!(buf[0], 0x20);
    }

    #[test]
    fn test_bitbang_wins_against_higher_priority_bits() {
        let rig = soft_rig(no_checksums());
        rig.bus.on_idle_timer();
        rig.line.borrow_mut().remote = Some(Remote {
            id: 0x11,
            start_us: 1,
            lost: false,
        });

        let mut delay = LineDelay::new(&rig.line);
        assert_eq!(rig.bus.write(&[0x10, 0x01, 0x02], &mut delay), Ok(()));
        assert!(rig.line.borrow().remote.as_ref().expect("remote").lost);

        drain_tx(&rig.bus, &rig.serial);
        assert_eq!(rig.serial.0.borrow().written, [0x01, 0x02]);
    }

    #[test]
    fn test_bitbang_busy_line_collides() {
        let rig = soft_rig(no_checksums());
        rig.bus.on_idle_timer();
        // Someone already started before our idle check
        rig.line.borrow_mut().remote = Some(Remote {
            id: 0x10,
            start_us: 0,
            lost: false,
        });

        let mut delay = LineDelay::new(&rig.line);
        assert_eq!(
            rig.bus.write(&[0x05], &mut delay),
            Err(WriteError::Collision)
        );
        rig.bus.on_idle_timer();
        assert!(rig.bus.available());
    }

    #[test]
    fn test_bitbang_first_write_waits_for_idle_period() {
        let rig = soft_rig(no_checksums());
        let bus = &rig.bus;
        let mut delay = LineDelay::new(&rig.line).at(1_280, move || bus.on_idle_timer());
        assert_eq!(rig.bus.write(&[0x42], &mut delay), Ok(()));

        drain_tx(&rig.bus, &rig.serial);
        assert!(rig.serial.0.borrow().written.is_empty());
        assert_eq!(rig.bus.stats().tx_good, 1);
    }

    #[test]
    fn test_checksum_round_trip_between_modes() {
        let sender = hard_rig(Config::default());
        let receiver = soft_rig(Config::default());

        for frame in [&[0x24, 0x00][..], &[0xb2, 0x20, 0x22, 0x00, 0x00, 0x00], &[0x7f]] {
            assert_eq!(sender.bus.write(frame, &mut NoopDelay::new()), Ok(()));
            drain_tx(&sender.bus, &sender.serial);
            sender.bus.on_idle_edge();

            let sent = std::mem::take(&mut sender.serial.0.borrow_mut().written);
            deliver(&receiver.bus, &receiver.serial, &sent);
            receiver.bus.on_idle_timer();
            assert_eq!(
                receiver.bus.receive().as_deref(),
                Some(sent.as_slice())
            );
        }
    }
}
