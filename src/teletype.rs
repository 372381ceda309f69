//! A teletype (TTY) interface for character-based I/O.
//!
//! This module provides a trait [`Teletype`] that defines an interface for
//! reading from and writing to a teletype device, such as a serial port.
//! The [`Serial`] struct implements this interface over COM1. On top of any
//! teletype, [`Console`] accepts formatted output and [`readline`] reads one
//! edited line of input.

use crate::KernelError;
use alloc::{string::String, vec::Vec};

/// Size of the line buffer of [`readline`], terminator included.
pub const BUFLEN: usize = 1024;

const BACKSPACE: u8 = 0x08;
const DELETE: u8 = 0x7f;

/// The `Teletype` trait represents a generic character-based input/output
/// device.
pub trait Teletype {
    /// Writes data to the teletype.
    ///
    /// # Returns
    /// - `Ok(usize)`: The number of bytes successfully written.
    /// - `Err(KernelError)`: If the write operation failed.
    fn write(&mut self, data: &[u8]) -> Result<usize, KernelError>;

    /// Reads data from the teletype.
    ///
    /// # Returns
    /// - `Ok(usize)`: The number of bytes successfully read. `Ok(0)` means the
    ///   input has ended.
    /// - `Err(KernelError)`: If the read operation failed.
    fn read(&mut self, data: &mut [u8]) -> Result<usize, KernelError>;
}

impl<T: Teletype + ?Sized> Teletype for &mut T {
    fn write(&mut self, data: &[u8]) -> Result<usize, KernelError> {
        (**self).write(data)
    }

    fn read(&mut self, data: &mut [u8]) -> Result<usize, KernelError> {
        (**self).read(data)
    }
}

/// A serial teletype interface for x86_64 systems.
///
/// This struct provides a basic implementation of a serial TTY using the
/// **COM1** serial port.
#[cfg(target_arch = "x86_64")]
pub struct Serial {
    _p: (),
}

#[cfg(target_arch = "x86_64")]
impl Serial {
    /// Creates a new **COM1** serial interface instance.
    pub const fn new() -> Self {
        Self { _p: () }
    }
}

#[cfg(target_arch = "x86_64")]
impl Default for Serial {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_arch = "x86_64")]
impl Teletype for Serial {
    fn write(&mut self, data: &[u8]) -> Result<usize, KernelError> {
        abyss::dev::serial::write_bytes(data);
        Ok(data.len())
    }

    fn read(&mut self, data: &mut [u8]) -> Result<usize, KernelError> {
        Ok(abyss::dev::serial::read_bytes_busywait(data))
    }
}

/// Formatted output to a teletype.
pub struct Console<'a, T: Teletype + ?Sized> {
    tty: &'a mut T,
}

impl<'a, T: Teletype + ?Sized> Console<'a, T> {
    /// Write through `tty`.
    pub fn new(tty: &'a mut T) -> Self {
        Self { tty }
    }
}

impl<T: Teletype + ?Sized> core::fmt::Write for Console<'_, T> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let mut data = s.as_bytes();
        while !data.is_empty() {
            match self.tty.write(data) {
                Ok(0) | Err(_) => return Err(core::fmt::Error),
                Ok(n) => data = data.get(n..).unwrap_or(&[]),
            }
        }
        Ok(())
    }
}

fn getc<T: Teletype + ?Sized>(tty: &mut T) -> Result<Option<u8>, KernelError> {
    let mut c = [0u8; 1];
    match tty.read(&mut c)? {
        0 => Ok(None),
        _ => Ok(Some(c[0])),
    }
}

/// Read one line from `tty`, printing `prompt` first.
///
/// Printable characters are echoed, backspace and DEL erase the last one,
/// and a carriage return or newline ends the line. Other control characters,
/// `Ctrl-D` included, are ignored. Characters past `BUFLEN - 1` are dropped.
///
/// # Returns
/// - `Ok(Some(line))` with the line, without its terminator.
/// - `Ok(None)` if the input ends before anything was entered. Input that
///   ends mid-line yields the partial line.
/// - `Err(e)` if reading failed.
pub fn readline<T: Teletype + ?Sized>(
    tty: &mut T,
    prompt: Option<&str>,
) -> Result<Option<String>, KernelError> {
    if let Some(prompt) = prompt {
        tty.write(prompt.as_bytes())?;
    }
    let mut buf = Vec::new();
    loop {
        let Some(c) = getc(tty)? else {
            return Ok((!buf.is_empty()).then(|| buf.into_iter().map(char::from).collect()));
        };
        match c {
            BACKSPACE | DELETE => {
                if buf.pop().is_some() {
                    tty.write(b"\x08 \x08")?;
                }
            }
            b'\r' | b'\n' => {
                tty.write(b"\n")?;
                return Ok(Some(buf.into_iter().map(char::from).collect()));
            }
            0x20..=0x7e if buf.len() < BUFLEN - 1 => {
                tty.write(&[c])?;
                buf.push(c);
            }
            _ => (),
        }
    }
}
