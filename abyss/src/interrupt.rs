//! The saved machine state of a trapped execution context.
//!
//! The trap entry code pushes a [`Registers`] on the kernel stack and hands a
//! reference to the monitor. The monitor never modifies it; it prints it once
//! when a session starts.
use crate::x86_64::{Rflags, Segment};

/// X86_64's general purpose registers.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct GeneralPurposeRegisters {
    /// R15 register.
    pub r15: usize,
    /// R14 register.
    pub r14: usize,
    /// R13 register.
    pub r13: usize,
    /// R12 register.
    pub r12: usize,
    /// R11 register.
    pub r11: usize,
    /// R10 register.
    pub r10: usize,
    /// R9 register.
    pub r9: usize,
    /// R8 register.
    pub r8: usize,
    /// RSI register.
    pub rsi: usize,
    /// RDI register.
    pub rdi: usize,
    /// RBP register.
    pub rbp: usize,
    /// RDX register.
    pub rdx: usize,
    /// RCX register.
    pub rcx: usize,
    /// RBX register.
    pub rbx: usize,
    /// RAX register.
    pub rax: usize,
}

/// The frame the CPU pushes on an interrupt or exception.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct InterruptStackFrame {
    /// Instruction pointer at the trap.
    pub rip: usize,
    /// Code segment.
    pub cs: Segment,
    #[doc(hidden)]
    pub __pad0: [u16; 3],
    /// Flags at the trap.
    pub rflags: Rflags,
    /// Stack pointer at the trap.
    pub rsp: usize,
    /// Stack segment.
    pub ss: Segment,
    #[doc(hidden)]
    pub __pad1: [u16; 3],
}

/// x86_64 Trap frame.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Registers {
    /// General purpose registers.
    pub gprs: GeneralPurposeRegisters,
    /// Error code pushed by the CPU, or 0.
    pub error_code: u64,
    /// Hardware-pushed part of the frame.
    pub interrupt_stack_frame: InterruptStackFrame,
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

impl Registers {
    /// Creates an empty register frame with interrupts enabled.
    pub const fn new() -> Self {
        Self {
            gprs: GeneralPurposeRegisters {
                r15: 0,
                r14: 0,
                r13: 0,
                r12: 0,
                r11: 0,
                r10: 0,
                r9: 0,
                r8: 0,
                rsi: 0,
                rdi: 0,
                rbp: 0,
                rdx: 0,
                rcx: 0,
                rbx: 0,
                rax: 0,
            },
            error_code: 0,
            interrupt_stack_frame: InterruptStackFrame {
                rip: 0,
                cs: Segment(0x8),
                __pad0: [0; 3],
                rflags: Rflags::from_bits_truncate(Rflags::IF.bits() | Rflags::_1.bits()),
                rsp: 0,
                ss: Segment(0x10),
                __pad1: [0; 3],
            },
        }
    }
}

impl core::fmt::Debug for Registers {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> Result<(), core::fmt::Error> {
        write!(
            f,
            "RAX: {:016x} | RBX: {:016x}  | RCX: {:016x} | RDX: {:016x}\n\
             RSI: {:016x} | RDI: {:016x}  | RBP: {:016x} | RSP: {:016x}\n\
             R8 : {:016x} | R9 : {:016x}  | R10: {:016x} | R11: {:016x}\n\
             R12: {:016x} | R13: {:016x}  | R14: {:016x} | R15: {:016x}\n\
             RIP: {:016x} | Error Code: {:#x} | RFLAGS: {:016x} [{:?}]\n\
             CS:  {:?}   | SS: {:?}",
            self.gprs.rax,
            self.gprs.rbx,
            self.gprs.rcx,
            self.gprs.rdx,
            self.gprs.rsi,
            self.gprs.rdi,
            self.gprs.rbp,
            self.interrupt_stack_frame.rsp,
            self.gprs.r8,
            self.gprs.r9,
            self.gprs.r10,
            self.gprs.r11,
            self.gprs.r12,
            self.gprs.r13,
            self.gprs.r14,
            self.gprs.r15,
            self.interrupt_stack_frame.rip,
            self.error_code,
            self.interrupt_stack_frame.rflags.bits(),
            self.interrupt_stack_frame.rflags,
            self.interrupt_stack_frame.cs,
            self.interrupt_stack_frame.ss,
        )
    }
}
