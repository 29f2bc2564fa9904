//! Receive and transmit staging buffers.
//!
//! Both buffers are fixed at [`CCD_MAX_MESSAGE_LEN`](crate::consts::CCD_MAX_MESSAGE_LEN)
//! bytes and are only ever touched from inside a critical section owned by
//! [`CcdBus`](crate::driver::CcdBus).

use heapless::Vec;

use crate::checksum;
use crate::consts::CCD_MAX_MESSAGE_LEN_USIZE;

/// Bytes of the frame currently being received.
///
/// Appended to by the byte-received interrupt, drained when the bus goes idle.
/// Once full, further bytes are dropped until the next [`clear`](RxBuffer::clear).
#[derive(Debug, Default)]
pub struct RxBuffer {
    buf: Vec<u8, CCD_MAX_MESSAGE_LEN_USIZE>,
}

impl RxBuffer {
    /// Creates an empty buffer.
    pub const fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Appends a byte.
    ///
    /// Returns `false` when the buffer was already full and the byte was dropped.
    pub fn push(&mut self, byte: u8) -> bool {
        self.buf.push(byte).is_ok()
    }

    /// Discards the current content and starts a new frame with `byte`.
    pub fn restart_with(&mut self, byte: u8) {
        self.buf.clear();
        let _ = self.buf.push(byte);
    }

    /// Resets the cursor to zero.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Bytes received so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Number of bytes received so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// `true` when nothing was received since the last reset.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// `true` when no more bytes fit.
    pub fn is_full(&self) -> bool {
        self.buf.is_full()
    }
}

/// The frame being transmitted and the position of the next byte to send.
#[derive(Debug, Default)]
pub struct TxBuffer {
    buf: Vec<u8, CCD_MAX_MESSAGE_LEN_USIZE>,
    pos: usize,
}

impl TxBuffer {
    /// Creates an empty buffer.
    pub const fn new() -> Self {
        Self {
            buf: Vec::new(),
            pos: 0,
        }
    }

    /// Copies `frame` in and rewinds the cursor.
    ///
    /// With `stamp_checksum` set, the last byte of frames longer than one byte
    /// is replaced by the checksum of the preceding ones. Returns `false`
    /// (leaving the buffer empty) if `frame` does not fit.
    pub fn load(&mut self, frame: &[u8], stamp_checksum: bool) -> bool {
        self.clear();
        if self.buf.extend_from_slice(frame).is_err() {
            return false;
        }
        if stamp_checksum {
            checksum::stamp(&mut self.buf);
        }
        true
    }

    /// Returns the next byte to hand to the UART and advances the cursor.
    ///
    /// Once every byte has been handed out this resets the buffer and returns
    /// `None`.
    pub fn next_byte(&mut self) -> Option<u8> {
        match self.buf.get(self.pos) {
            Some(&byte) => {
                self.pos += 1;
                Some(byte)
            }
            None => {
                self.clear();
                None
            }
        }
    }

    /// Moves the cursor to `pos`, e.g. past an ID byte sent by bit-banging.
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos.min(self.buf.len());
    }

    /// Empties the buffer and rewinds the cursor.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.pos = 0;
    }

    /// First byte of the staged frame, the ID byte.
    pub fn id_byte(&self) -> Option<u8> {
        self.buf.first().copied()
    }

    /// The staged frame.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Index of the next byte to send.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Length of the staged frame, `0` when nothing is being sent.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// `true` when no frame is staged.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
