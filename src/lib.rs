//! # ccd-bus
//!
//! A portable, no_std Rust driver for the Chrysler CCD (Collision Detection)
//! bus, the single-wire 7812.5 bit/s multi-master network found in older
//! vehicle electronics.
//!
//! This driver implements the bus protocol on top of a hardware UART using:
//! - `embedded-hal` traits for digital I/O and timing
//! - small HAL traits ([`hal`]) for the UART, idle timer and transceiver signals
//! - interrupt-safe state shared with the ISRs through `critical-section`
//! - a choice of transceiver-assisted or bit-banged arbitration ([`arbitration`])
//!
//! ## Crate features
//! | Feature      | Description |
//! |--------------|-------------|
//! | `std`        | Disables `#![no_std]` and enables `std` support in dependencies |
//! | `defmt-0-3`  | Uses `defmt` logging and derives `defmt::Format` on public types |
//! | `log`        | Uses `log` logging |
//!
//! ## Software Features
//!
//! - **Idle detection** either from a CDP68HC68S1 transceiver's IDLE/CTRL lines
//!   or by timing bus silence (10 to 14 bit-times)
//! - **Bit-wise arbitration** of the ID byte by bit-banging the UART pins
//! - **Checksummed frames** of 1 to 16 bytes, verified on receive and stamped
//!   on transmit (both can be turned off)
//! - Latest-message mailbox, readable without allocation
//!
//! ## Usage
//!
//! ```ignore
//! use ccd_bus::{BitBang, CcdBus, Config};
//!
//! static CCD: CcdBus<BitBang<Usart1, Timer3, TxPin, RxPin>> = CcdBus::new();
//!
//! CCD.begin(BitBang::new(usart, timer, tx, rx), Config::default());
//! CCD.write(&[0xb2, 0x20, 0x22, 0x00, 0x00, 0x00], &mut delay)?;
//! ```
//!
//! The UART and timer interrupts must be forwarded to the handle, see
//! [`driver`] for the list.
//!
//! ## Integration Notes
//!
//! - The UART must be set up for 7812.5 bit/s, 8N1. [`timer`] has helpers for
//!   the register values.
//! - Bit-banged arbitration blocks for about 1.3 ms with interrupts masked.
//! - Only one handle should drive a given bus.
//!
//! --
//! Designed for `#![no_std]` use in resource-constrained embedded environments.

#![deny(
    bad_style,
    dead_code,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    unused,
    while_true,
    missing_debug_implementations,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
    unused_results
)]
#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub use critical_section;
pub use heapless;

mod fmt;

pub mod arbitration;
pub mod buffer;
pub mod checksum;
pub mod config;
pub mod consts;
pub mod driver;
pub mod error;
pub mod hal;
pub mod message;
pub mod timer;

pub use arbitration::{Arbitration, BitBang, Transceiver};
pub use config::{Config, IdleBits};
pub use driver::{CcdBus, Stats};
pub use error::{SerialError, WriteError};
pub use message::Message;
