//! CCD frame checksum.
//!
//! The checksum of a CCD message is the wrapping 8-bit sum of every byte
//! except the last one, and it is carried in that last byte.

/// Adds a single byte to a running checksum.
pub(crate) fn checksum_update(sum: u8, data: u8) -> u8 {
    sum.wrapping_add(data)
}

/// Computes the checksum for `frame`: the sum (mod 256) of all bytes but the last.
///
/// Returns `0` for empty and single-byte frames.
pub fn checksum(frame: &[u8]) -> u8 {
    match frame.split_last() {
        Some((_, body)) => body.iter().fold(0, |sum, &b| checksum_update(sum, b)),
        None => 0,
    }
}

/// Returns `true` when the last byte of `frame` matches the sum of the others.
///
/// Frames shorter than two bytes carry no checksum and are always accepted.
pub fn verify(frame: &[u8]) -> bool {
    match frame.last() {
        Some(&last) if frame.len() > 1 => checksum(frame) == last,
        _ => true,
    }
}

/// Overwrites the last byte of `frame` with its checksum.
///
/// Frames shorter than two bytes are left untouched.
pub fn stamp(frame: &mut [u8]) {
    if frame.len() > 1 {
        let sum = checksum(frame);
        if let Some(last) = frame.last_mut() {
            *last = sum;
        }
    }
}
