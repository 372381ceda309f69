//! # kmon: the kernel monitor
//!
//! **kmon** is the interactive debugging shell of the kernel. When the kernel
//! traps into the monitor, the operator gets a `K> ` prompt on the serial
//! console and may inspect the state of the machine without a debugger
//! attached.
//!
//! The monitor understands four commands:
//!
//! | Command | Description |
//! |---|---|
//! | `help` | Display this list of commands |
//! | `kerninfo` | Display information about the kernel |
//! | `backtrace` | Display information of the kernel stack |
//! | `showmappings` | Show physical address mappings corresponding to specific virtual addresses |
//!
//! ## Project Structure
//!
//! - [`monitor`]: the read-eval-print loop, the command table and the command
//!   line parser.
//! - [`mm::page_table`]: the x86_64 page-table walker used by `showmappings`.
//! - [`debug_info`]: resolving return addresses to `file:line: function`.
//! - [`teletype`]: the character device the monitor talks through, and the
//!   line editor.
//!
//! Anything that touches the hardware directly (port I/O, the frame pointer
//! register, raw stack memory) lives in the [`abyss`] crate.
//!
//! ## Collaborators
//!
//! The monitor never reaches for kernel globals itself. Every piece of state it
//! inspects comes in through a narrow trait, so the same code runs inside the
//! kernel and inside a host test with synthetic memory:
//!
//! - [`abyss::unwind::Peeker`] reads words of the inspected stack,
//! - [`mm::page_table::PageLookup`] translates a virtual address,
//! - [`debug_info::SymbolResolver`] names a code address,
//! - [`teletype::Teletype`] carries the bytes of the session.
//!
//! ## Debugging the monitor
//!
//! `backtrace` relies on frame pointers. Build the kernel with
//! `-C force-frame-pointers=yes`; otherwise the chain ends early or walks into
//! garbage, which the monitor reports as a failed backtrace instead of
//! faulting.
#![cfg_attr(not(test), no_std)]
#![deny(missing_docs)]
#![allow(clippy::missing_safety_doc)]

extern crate alloc;

pub mod debug_info;
pub mod mm;
pub mod monitor;
pub mod teletype;

pub use abyss::addressing;

/// Size of a kernel thread's stack.
///
/// Stacks are `STACK_SIZE`-aligned, so the stack holding any frame pointer is
/// found by rounding it down.
pub const STACK_SIZE: usize = 0x100000;

/// Errors raised by a [`teletype::Teletype`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KernelError {
    /// IO Error. (EIO)
    IOError,
}

/// Enter the monitor from a trap.
///
/// Talks over COM1, translates through the active page table, and resolves
/// symbols with the resolver installed by [`debug_info::install`], if any.
/// Returns only if a command asks the session to stop.
///
/// `backtrace` walks from the frame of `enter` outwards, towards the trap.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub fn enter(tf: Option<&abyss::Registers>) {
    use abyss::{addressing::Pa, unwind::StackRange, x86_64::Cr3};
    use mm::page_table::{DirectMap, PageTable};

    abyss::info!("Entering the kernel monitor.");
    let fp = abyss::x86_64::read_rbp();
    // Safety: the monitor runs on a mapped kernel stack of STACK_SIZE bytes.
    let stack = unsafe { StackRange::containing(fp, STACK_SIZE) };
    let Some(root) = Pa::new(Cr3::current().into_usize()) else {
        abyss::warning!("CR3 holds an invalid physical address.");
        return;
    };
    let page_table = PageTable::new(root, DirectMap);
    let config = monitor::MonitorConfigBuilder::new()
        .layout(monitor::KernelLayout::from_linker())
        .build();

    debug_info::with_installed(|symbols| {
        let env = monitor::Environment {
            stack: &stack,
            frame_pointer: &move || fp,
            symbols,
            page_table: &page_table,
        };
        let mut serial = teletype::Serial::new();
        monitor::Monitor::new(config, env, &mut serial).run(tf);
    });
}
