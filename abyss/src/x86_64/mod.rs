//! x86_64 registers and instructions used by the monitor.

#[cfg(target_arch = "x86_64")]
pub mod pio;

bitflags::bitflags! {
    /// The RFLAGS register.
    pub struct Rflags: usize {
        /// Carry flag.
        const CF = 1 << 0;
        /// Reserved, always 1.
        const _1 = 1 << 1;
        /// Parity flag.
        const PF = 1 << 2;
        /// Auxiliary carry flag.
        const AF = 1 << 4;
        /// Zero flag.
        const ZF = 1 << 6;
        /// Sign flag.
        const SF = 1 << 7;
        /// Trap flag.
        const TF = 1 << 8;
        /// Interrupt enable flag.
        const IF = 1 << 9;
        /// Direction flag.
        const DF = 1 << 10;
        /// Overflow flag.
        const OF = 1 << 11;
        /// I/O privilege level 0.
        const IOPL0 = 1 << 12;
        /// I/O privilege level 1.
        const IOPL1 = 1 << 13;
        /// Nested task.
        const NT = 1 << 14;
        /// Resume flag.
        const RF = 1 << 16;
        /// Virtual-8086 mode.
        const VM = 1 << 17;
        /// Alignment check.
        const AC = 1 << 18;
        /// Virtual interrupt flag.
        const VIF = 1 << 19;
        /// Virtual interrupt pending.
        const VIP = 1 << 20;
        /// CPUID available.
        const ID = 1 << 21;
    }
}

/// A segment selector.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Segment(pub u16);

impl Segment {
    /// Index into the descriptor table.
    pub const fn index(self) -> u16 {
        self.0 >> 3
    }

    /// Requested privilege level.
    pub const fn rpl(self) -> u16 {
        self.0 & 3
    }
}

impl core::fmt::Debug for Segment {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Segment(0x{:x}, idx={}, rpl={})", self.0, self.index(), self.rpl())
    }
}

/// The CR3 register: physical address of the active PML4 plus PCID bits.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cr3(pub u64);

impl Cr3 {
    /// Read the current CR3.
    ///
    /// Privileged; only meaningful when running as the kernel.
    #[cfg(target_arch = "x86_64")]
    #[inline]
    pub fn current() -> Self {
        let cr3: u64;
        unsafe {
            core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }
        Self(cr3)
    }

    /// Physical address of the PML4 table.
    #[inline]
    pub const fn into_usize(self) -> usize {
        (self.0 & !0xfff) as usize
    }
}

/// Read the current frame pointer.
///
/// The caller must be compiled with frame pointers for the result to head a
/// walkable chain. Called directly, the value is the frame pointer of the
/// caller. Called through a function pointer or `dyn Fn`, an outlined copy
/// runs and the value is that copy's own frame.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn read_rbp() -> usize {
    let rbp: usize;
    unsafe {
        core::arch::asm!("mov {}, rbp", out(reg) rbp, options(nomem, nostack, preserves_flags));
    }
    rbp
}

/// Read the current frame pointer (`x29`).
#[cfg(target_arch = "aarch64")]
#[inline(always)]
pub fn read_rbp() -> usize {
    let fp: usize;
    unsafe {
        core::arch::asm!("mov {}, x29", out(reg) fp, options(nomem, nostack, preserves_flags));
    }
    fp
}

/// No frame-pointer register is known on this architecture; the walk is
/// empty.
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
#[inline(always)]
pub fn read_rbp() -> usize {
    0
}
