//! Error and status types.
//!
//! [`WriteError`] is returned synchronously by
//! [`CcdBus::write`](crate::driver::CcdBus::write). Link integrity problems on
//! the receive side are never raised; they are recorded in a [`SerialError`]
//! and the offending frame is dropped.

use core::fmt;

/// Reasons a [`write`](crate::driver::CcdBus::write) can fail.
///
/// Each variant maps to the numeric status code returned by [`WriteError::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum WriteError {
    /// The frame to send was empty.
    #[error("cannot write an empty frame")]
    EmptyBuffer,
    /// The bus did not go idle within one second.
    #[error("timed out waiting for the bus to go idle")]
    Timeout,
    /// Another module won arbitration of the ID byte.
    #[error("bus arbitration lost")]
    Collision,
    /// The frame is longer than the 16 bytes a CCD message can hold.
    #[error("frame longer than 16 bytes")]
    FrameTooLong,
}

impl WriteError {
    /// Status code of a successful write.
    pub const OK: u8 = 0;

    /// Returns the numeric status code of this error.
    ///
    /// | Code | Meaning |
    /// |------|---------|
    /// | 0    | ok (see [`WriteError::OK`]) |
    /// | 1    | empty buffer |
    /// | 2    | timeout |
    /// | 3    | collision |
    /// | 4    | frame too long |
    pub const fn code(&self) -> u8 {
        match self {
            Self::EmptyBuffer => 1,
            Self::Timeout => 2,
            Self::Collision => 3,
            Self::FrameTooLong => 4,
        }
    }
}

/// Converts the outcome of a write into its numeric status code.
pub fn status_code(result: &Result<(), WriteError>) -> u8 {
    match result {
        Ok(()) => WriteError::OK,
        Err(e) => e.code(),
    }
}

/// Error flags recorded for the most recently received byte.
///
/// The framing and overrun bits come straight from the serial peripheral,
/// [`SerialError::BUFFER_OVERFLOW`] is set by the driver when the receive
/// staging buffer was already full.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct SerialError(u8);

impl SerialError {
    /// No error.
    pub const NONE: Self = Self(0);
    /// The stop bit was not high.
    pub const FRAMING: Self = Self(1 << 4);
    /// A byte was lost because the data register was not read in time.
    pub const OVERRUN: Self = Self(1 << 3);
    /// The receive staging buffer was full and the byte was dropped.
    pub const BUFFER_OVERFLOW: Self = Self(1 << 1);

    /// Builds a value from raw flag bits.
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw flag bits.
    pub const fn bits(&self) -> u8 {
        self.0
    }

    /// `true` when no flag is set.
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// `true` when every flag of `other` is set in `self`.
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Sets the flags of `other`.
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl core::ops::BitOr for SerialError {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for SerialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialError")
            .field("framing", &self.contains(Self::FRAMING))
            .field("overrun", &self.contains(Self::OVERRUN))
            .field("buffer_overflow", &self.contains(Self::BUFFER_OVERFLOW))
            .finish()
    }
}
