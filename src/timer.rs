//! Timer and UART setup helpers for HAL implementers.
//!
//! The driver itself only talks to timers through
//! [`IdleTimer`](crate::hal::IdleTimer) and
//! [`TransceiverClock`](crate::hal::TransceiverClock), which take durations and
//! frequencies. These helpers turn those into register values for the usual
//! CTC-mode timers and the AVR-style UART baud divisor:
//! - `compute_compare_value`: runtime compare value calculator
//! - `const_compare_value`: compile-time compare value calculator
//! - `const_clock_compare_value`: compare value for a toggling clock output
//! - `const_baud_divisor`: UBRR value for 7812.5 bit/s
//!
//! Idle timer compare values at 16 MHz with a 1024 prescaler:
//!
//! | IDLE BITS | DURATION | COMPARE |
//! |-----------|----------|---------|
//! |        10 |  1280 µs |      19 |
//! |        11 |  1408 µs |      21 |
//! |        12 |  1536 µs |      23 |
//! |        13 |  1664 µs |      25 |
//! |        14 |  1792 µs |      27 |

use libm::round;

use crate::consts::BITS_PER_SECOND_X2;

/// 1,000,000 microseconds = 1 second
pub const MICROSECONDS_PER_SECOND: u32 = 1_000_000;

/// Computes the compare value for a CTC-mode timer expiring after `duration_us`.
///
/// # Arguments
/// - `f_cpu`: CPU frequency in Hz
/// - `prescaler`: timer prescaler (e.g., 64, 256, 1024)
/// - `duration_us`: desired countdown in microseconds
///
/// # Returns
/// - Compare value (the counter counts from 0 up to and including it),
///   rounded to the nearest tick
pub fn compute_compare_value(f_cpu: u32, prescaler: u32, duration_us: u32) -> u16 {
    let ticks_per_second = f_cpu as f64 / prescaler as f64;
    let ticks = ticks_per_second * duration_us as f64 / MICROSECONDS_PER_SECOND as f64;
    (round(ticks) as u16).saturating_sub(1)
}

/// Compile-time compare value calculator
///
/// Same as [`compute_compare_value`] but truncating instead of rounding.
///
/// # Arguments
/// - `f_cpu`: CPU frequency in Hz
/// - `prescaler`: timer prescaler (e.g., 64, 256, 1024)
/// - `duration_us`: desired countdown in microseconds
pub const fn const_compare_value(f_cpu: u32, prescaler: u32, duration_us: u32) -> u16 {
    let ticks = (f_cpu / prescaler) as u64 * duration_us as u64 / MICROSECONDS_PER_SECOND as u64;
    (ticks as u16).saturating_sub(1)
}

/// Compare value for a timer toggling its output pin on every match.
///
/// A toggle output runs at half the match rate, so reaching `hz` needs
/// `2 * hz` matches per second.
pub const fn const_clock_compare_value(f_cpu: u32, prescaler: u32, hz: u32) -> u16 {
    ((f_cpu / prescaler / (2 * hz)) as u16).saturating_sub(1)
}

/// UART baud rate divisor (UBRR, normal speed mode) for the CCD bit rate.
///
/// 127 at 16 MHz.
pub const fn const_baud_divisor(f_cpu: u32) -> u16 {
    // f_cpu / (16 * 7812.5) - 1
    ((f_cpu as u64 * 2 / (16 * BITS_PER_SECOND_X2 as u64)) as u16).saturating_sub(1)
}
