//! Kernel print utilities.
//!
//! Every macro funnels into a single sink. On bare metal the sink starts as
//! the COM1 writer; on a host it starts empty and output is dropped until
//! [`set_sink`] installs one.

use crate::spinlock::SpinLock;

/// The sink in place before any call to [`set_sink`].
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub const DEFAULT_SINK: Option<fn(core::fmt::Arguments<'_>)> =
    Some(crate::dev::serial::print_args as fn(core::fmt::Arguments<'_>));

/// The sink in place before any call to [`set_sink`].
#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
pub const DEFAULT_SINK: Option<fn(core::fmt::Arguments<'_>)> = None;

static SINK: SpinLock<Option<fn(core::fmt::Arguments<'_>)>> = SpinLock::new(DEFAULT_SINK);

/// Install the function that receives everything printed through this module.
pub fn set_sink(sink: fn(core::fmt::Arguments<'_>)) {
    let mut guard = SINK.lock();
    *guard = Some(sink);
    guard.unlock();
}

/// Remove the installed sink. Subsequent prints are dropped.
pub fn clear_sink() {
    let mut guard = SINK.lock();
    *guard = None;
    guard.unlock();
}

#[doc(hidden)]
pub fn _print(fmt: core::fmt::Arguments<'_>) {
    // The lock is released before calling out so a sink may print itself.
    let guard = SINK.lock();
    let sink = *guard;
    guard.unlock();
    if let Some(sink) = sink {
        sink(fmt);
    }
}

/// Prints out the message.
///
/// Use the format! syntax to write data to the installed sink.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::kprint::_print(format_args!($($arg)*)));
}

/// Prints out the message with a newline.
///
/// Use the format! syntax to write data to the installed sink.
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

/// Display an information message.
#[macro_export]
macro_rules! info {
    () => (if !$crate::QUITE.load(core::sync::atomic::Ordering::SeqCst) { $crate::print!("[INFO]\n") });
    ($($arg:tt)*) => (if !$crate::QUITE.load(core::sync::atomic::Ordering::SeqCst) { $crate::print!("[INFO] {}\n", format_args!($($arg)*)) });
}

/// Display a warning message.
#[macro_export]
macro_rules! warning {
    () => (if !$crate::QUITE.load(core::sync::atomic::Ordering::SeqCst) { $crate::print!("[WARN]\n") });
    ($($arg:tt)*) => (if !$crate::QUITE.load(core::sync::atomic::Ordering::SeqCst) { $crate::print!("[WARN] {}\n", format_args!($($arg)*)) });
}

/// Display a debug message.
#[macro_export]
macro_rules! debug {
    () => (if !$crate::QUITE.load(core::sync::atomic::Ordering::SeqCst) { $crate::print!("[DEBUG]\n") });
    ($($arg:tt)*) => (if !$crate::QUITE.load(core::sync::atomic::Ordering::SeqCst) { $crate::print!("[DEBUG] {}\n", format_args!($($arg)*))} );
}
