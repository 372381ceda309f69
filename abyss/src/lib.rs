//! The abyss of the monitor that touches the machine.
//!
//! This crate collects the pieces of the kernel monitor that talk directly to
//! the x86_64 machine or to raw memory:
//!
//! - [`addressing`]: physical and virtual address types.
//! - [`kprint`]: the console printing and logging macros.
//! - [`spinlock`]: the lock guarding the few monitor globals.
//! - [`interrupt`]: the saved trap frame and its printer.
//! - [`unwind`]: the frame-pointer stack walker.
//! - [`x86_64`] and [`dev`]: register reads, port I/O and the COM1 UART.
//!
//! You are **not** required to understand every line of code in this crate to
//! use the monitor. The [`kmon`] crate is the place where the commands live.
//!
//! [`kmon`]: ../kmon/index.html
#![cfg_attr(not(test), no_std)]
#![allow(clippy::missing_safety_doc)]

use core::sync::atomic::AtomicBool;

#[doc(hidden)]
#[macro_use]
pub mod kprint;
pub mod addressing;
pub mod dev;
pub mod interrupt;
pub mod spinlock;
pub mod unwind;
pub mod x86_64;

pub use addressing::{PAGE_MASK, PAGE_SHIFT, PAGE_SIZE, Pa, Va};
pub use interrupt::Registers;

/// Silences `info!`, `warning!` and `debug!` when set.
#[doc(hidden)]
pub static QUITE: AtomicBool = AtomicBool::new(false);
