//! COM1 serial device driver.
use crate::x86_64::pio::Pio;

const COM1: u16 = 0x3f8;

/// Write raw bytes to COM1, waiting for the transmitter before each byte.
pub fn write_bytes(data: &[u8]) {
    for b in data {
        for _ in 0..12800 {
            if Pio::new(COM1 + 5).read_u8() & 0x20 != 0 {
                break;
            }
            // delay
            Pio::new(0x84).read_u8();
            Pio::new(0x84).read_u8();
            Pio::new(0x84).read_u8();
            Pio::new(0x84).read_u8();
        }
        Pio::new(COM1).write_u8(*b);
    }
}

/// Read raw bytes from COM1 until `buffer` is full.
///
/// Spins on the line status register until each byte arrives; no echo or line
/// editing is done here. The caller must be the only reader of the port, as
/// the monitor is while the rest of the kernel is stopped in a trap.
pub fn read_bytes_busywait(buffer: &mut [u8]) -> usize {
    for slot in buffer.iter_mut() {
        while Pio::new(COM1 + 5).read_u8() & 0x01 == 0 {
            core::hint::spin_loop();
        }
        *slot = Pio::new(COM1).read_u8();
    }
    buffer.len()
}

/// `kprint` sink writing to COM1.
pub fn print_args(args: core::fmt::Arguments<'_>) {
    use core::fmt::Write;
    let _ = Com1Sink::new().write_fmt(args);
}

/// `core::fmt::Write` adapter over COM1.
pub struct Com1Sink {
    _p: (),
}

impl Com1Sink {
    /// Create a new serial device interface.
    pub const fn new() -> Self {
        Com1Sink { _p: () }
    }
}

impl core::fmt::Write for Com1Sink {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        write_bytes(s.as_bytes());
        Ok(())
    }
}

impl Default for Com1Sink {
    fn default() -> Self {
        Self::new()
    }
}
