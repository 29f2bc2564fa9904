//! Constants used across the CCD bus implementation.
//!
//! This module defines the bus-wide constants used for buffer sizing,
//! bit timing, idle detection and write timeouts.
//!
//! ## Key Concepts
//!
//! - **Bit rate**: the CCD bus runs at a fixed 7812.5 bit/s, 8 data bits,
//!   no parity, 1 stop bit. One bit lasts exactly 128 µs.
//! - **Frames**: a message is 1 to 16 bytes. The first byte is the ID byte,
//!   which also decides arbitration, the last byte is usually a checksum.
//! - **Idle**: the bus is idle once it has been high for a number of
//!   consecutive bit-times (10 by default, stop bit of the last byte included).
//!
//! These values should be used wherever framing or timing logic is implemented
//! so that buffer limits and delays stay consistent.

/// Maximum length (in bytes) of a CCD bus message, checksum included.
pub const CCD_MAX_MESSAGE_LEN: u8 = 16;

/// See [`CCD_MAX_MESSAGE_LEN`](crate::consts::CCD_MAX_MESSAGE_LEN)
pub const CCD_MAX_MESSAGE_LEN_USIZE: usize = CCD_MAX_MESSAGE_LEN as usize;

/// Bus bit rate multiplied by two (the real rate is 7812.5 bit/s).
///
/// Kept doubled so that every timing computation can stay in integers.
pub const BITS_PER_SECOND_X2: u32 = 15_625;

/// (7812.5 bits / second)^-1 == 128 µs / bit
pub const BIT_TIME_US: u32 = 128;

/// Half of a bit-time, the sampling point used while bit-banging the ID byte.
pub const HALF_BIT_TIME_US: u32 = BIT_TIME_US / 2;

/// Number of data bits in a CCD byte.
pub const DATA_BITS: u8 = 8;

/// Default number of consecutive idle bit-times (stop bit included)
/// that mark the end of a message.
pub const DEFAULT_IDLE_BITS: u8 = 10;

/// How long [`write`](crate::driver::CcdBus::write) waits for the bus to go idle.
pub const WRITE_TIMEOUT_US: u32 = 1_000_000;

/// Polling interval used while waiting for the bus to go idle.
pub const WRITE_POLL_INTERVAL_US: u32 = 100;

/// Frequency of the clock fed to an external CCD transceiver (CDP68HC68S1).
pub const TRANSCEIVER_CLOCK_HZ: u32 = 2_000_000;
