//! Runtime configuration of the CCD bus driver.
//!
//! The operating mode (transceiver-assisted or bit-banged arbitration) is
//! chosen by type, see [`crate::arbitration`]. Everything else lives in
//! [`Config`].

use crate::consts::{BIT_TIME_US, DEFAULT_IDLE_BITS};

/// Number of consecutive idle bit-times, stop bit included, that end a message.
///
/// The CDP68HC68S1 datasheet uses 10. Larger values tolerate noisier buses
/// at the cost of a slower turnaround.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
#[repr(u8)]
pub enum IdleBits {
    /// 10 bit-times (1.28 ms)
    #[default]
    Ten = 10,
    /// 11 bit-times (1.408 ms)
    Eleven = 11,
    /// 12 bit-times (1.536 ms)
    Twelve = 12,
    /// 13 bit-times (1.664 ms)
    Thirteen = 13,
    /// 14 bit-times (1.792 ms)
    Fourteen = 14,
}

impl IdleBits {
    /// Returns the bit count.
    pub const fn bits(self) -> u8 {
        self as u8
    }

    /// Idle duration in microseconds.
    pub const fn duration_us(self) -> u32 {
        self.bits() as u32 * BIT_TIME_US
    }

    /// Looks up the variant for a raw bit count.
    ///
    /// Returns `None` outside of the supported 10..=14 range.
    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            10 => Some(Self::Ten),
            11 => Some(Self::Eleven),
            12 => Some(Self::Twelve),
            13 => Some(Self::Thirteen),
            14 => Some(Self::Fourteen),
            _ => None,
        }
    }
}

/// Driver configuration passed to [`CcdBus::begin`](crate::driver::CcdBus::begin).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct Config {
    /// Idle bit-times that end a message.
    pub idle_bits: IdleBits,
    /// Drop received messages whose last byte does not match their checksum.
    pub verify_rx_checksum: bool,
    /// Overwrite the last byte of outgoing messages with their checksum.
    pub calculate_tx_checksum: bool,
}

impl Config {
    /// Default configuration: 10 idle bits, checksums verified and generated.
    pub const fn new() -> Self {
        Self {
            idle_bits: IdleBits::Ten,
            verify_rx_checksum: true,
            calculate_tx_checksum: true,
        }
    }

    /// Sets the idle bit count.
    pub const fn idle_bits(mut self, idle_bits: IdleBits) -> Self {
        self.idle_bits = idle_bits;
        self
    }

    /// Enables or disables checksum verification of received messages.
    pub const fn verify_rx_checksum(mut self, enabled: bool) -> Self {
        self.verify_rx_checksum = enabled;
        self
    }

    /// Enables or disables checksum generation for sent messages.
    pub const fn calculate_tx_checksum(mut self, enabled: bool) -> Self {
        self.calculate_tx_checksum = enabled;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

const _: () = assert!(IdleBits::Ten.bits() == DEFAULT_IDLE_BITS);
