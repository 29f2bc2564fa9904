//! Message assembly and the single-slot message mailbox.
//!
//! When the bus goes idle, the bytes collected in the [`RxBuffer`] form one
//! frame. [`assemble`] validates it and moves it into the [`Mailbox`], which
//! only ever holds the most recent frame: a frame assembled while the previous
//! one is still unread replaces it.

use heapless::Vec;

use crate::buffer::RxBuffer;
use crate::checksum;
use crate::consts::CCD_MAX_MESSAGE_LEN_USIZE;

/// A received CCD message, checksum byte included.
pub type Message = Vec<u8, CCD_MAX_MESSAGE_LEN_USIZE>;

/// Result of handing a completed receive buffer to [`assemble`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum Assembly {
    /// Nothing was received since the last idle period.
    Empty,
    /// The frame was stored in the mailbox.
    Accepted(usize),
    /// The last byte did not match the checksum and the frame was dropped.
    ChecksumMismatch,
}

impl Assembly {
    /// Length of the assembled message, `0` unless the frame was accepted.
    pub fn len(&self) -> usize {
        match self {
            Self::Accepted(len) => *len,
            _ => 0,
        }
    }

    /// `true` unless the frame was accepted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Holds the last assembled message until the application reads it.
#[derive(Debug, Default)]
pub struct Mailbox {
    message: Message,
    unread: bool,
}

impl Mailbox {
    /// Creates an empty mailbox.
    pub const fn new() -> Self {
        Self {
            message: Vec::new(),
            unread: false,
        }
    }

    /// `true` while the stored message has not been read.
    pub fn is_available(&self) -> bool {
        self.unread
    }

    /// Replaces the stored message and flags it as unread.
    ///
    /// Bytes beyond the mailbox capacity are ignored.
    pub fn store(&mut self, frame: &[u8]) {
        self.message.clear();
        let len = frame.len().min(self.message.capacity());
        let _ = self.message.extend_from_slice(&frame[..len]);
        self.unread = true;
    }

    /// Copies the unread message into `out` and marks it as read.
    ///
    /// Returns the number of bytes copied, bounded by `out.len()`, or `0` when
    /// no unread message is stored.
    pub fn read_into(&mut self, out: &mut [u8]) -> usize {
        if !self.unread {
            return 0;
        }
        self.unread = false;
        let len = self.message.len().min(out.len());
        out[..len].copy_from_slice(&self.message[..len]);
        len
    }

    /// Returns a copy of the unread message and marks it as read.
    pub fn take(&mut self) -> Option<Message> {
        if !self.unread {
            return None;
        }
        self.unread = false;
        Some(self.message.clone())
    }
}

/// Turns the content of `rx` into a message.
///
/// With `verify_checksum` set, frames longer than one byte must end with the
/// sum of their other bytes or they are dropped without touching the mailbox.
/// `rx` is reset in every case.
pub fn assemble(rx: &mut RxBuffer, verify_checksum: bool, mailbox: &mut Mailbox) -> Assembly {
    if rx.is_empty() {
        return Assembly::Empty;
    }
    let frame = rx.as_slice();
    let outcome = if verify_checksum && !checksum::verify(frame) {
        Assembly::ChecksumMismatch
    } else {
        mailbox.store(frame);
        Assembly::Accepted(frame.len())
    };
    rx.clear();
    outcome
}
