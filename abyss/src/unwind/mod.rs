//! Frame-pointer stack unwinding.
//!
//! With frame pointers enabled every x86_64 function starts with
//! `push rbp; mov rbp, rsp`, so the frame pointer always points at the caller's
//! saved frame pointer, and the word above it is the return address:
//!
//! ```text
//!           +-----------------+
//!           |      ...        |  <- candidate arguments (up to 5 words)
//! rbp + 16  |     arg 0       |
//! rbp +  8  | return address  |
//! rbp       | caller's rbp    | ---> next frame, 0 at the bottom
//!           +-----------------+
//! ```
//!
//! [`FramePointerWalker`] follows this chain and yields one [`StackFrame`] per
//! call, innermost first. All memory is read through a [`Peeker`], so reading
//! a corrupted chain surfaces as an [`UnwindError`] instead of a fault.

use arrayvec::ArrayVec;
use core::ops::Range;

/// Size of a machine word on the stack.
pub const WORD: usize = core::mem::size_of::<usize>();

/// Number of words above the return address shown as candidate arguments.
pub const MAX_FRAME_ARGS: usize = 5;

/// Errors raised while walking a frame-pointer chain.
#[derive(Clone, PartialEq, Eq)]
pub enum UnwindError {
    /// The address lies outside the memory the peeker may read.
    MemoryOutOfBound(usize, Range<usize>),
    /// The address is not aligned to a machine word.
    Unaligned(usize),
    /// The chain is longer than the configured frame limit.
    TooDeep(usize),
}

impl core::fmt::Debug for UnwindError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::MemoryOutOfBound(v, r) => {
                write!(f, "MemoryOutOfBound(0x{v:x}, 0x{:x}..0x{:x})", r.start, r.end)
            }
            Self::Unaligned(v) => write!(f, "Unaligned(0x{v:x})"),
            Self::TooDeep(v) => write!(f, "TooDeep({v})"),
        }
    }
}

/// Reads machine words from inspected memory.
pub trait Peeker {
    /// Read the word at `addr`.
    fn peek(&self, addr: usize) -> Result<usize, UnwindError>;
}

impl<T: Peeker + ?Sized> Peeker for &T {
    fn peek(&self, addr: usize) -> Result<usize, UnwindError> {
        (**self).peek(addr)
    }
}

/// A window of live memory, usually a kernel stack, that may be read.
#[derive(Clone, Debug)]
pub struct StackRange {
    range: Range<usize>,
}

impl StackRange {
    /// Allow reads of `range`.
    ///
    /// # Safety
    /// Every word of `range` must be mapped and readable for as long as this
    /// `StackRange` is used.
    pub unsafe fn new(range: Range<usize>) -> Self {
        Self { range }
    }

    /// Allow reads of the `size`-aligned stack of `size` bytes holding `addr`.
    ///
    /// # Safety
    /// `size` must be a power of two and the whole stack must be mapped.
    pub unsafe fn containing(addr: usize, size: usize) -> Self {
        let lo = addr & !(size - 1);
        Self {
            range: lo..lo.saturating_add(size),
        }
    }

    /// The readable window.
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }
}

impl Peeker for StackRange {
    #[inline]
    fn peek(&self, addr: usize) -> Result<usize, UnwindError> {
        if addr % WORD != 0 {
            return Err(UnwindError::Unaligned(addr));
        }
        match addr.checked_add(WORD) {
            Some(end) if addr >= self.range.start && end <= self.range.end => {
                Ok(unsafe { (addr as *const usize).read_volatile() })
            }
            _ => Err(UnwindError::MemoryOutOfBound(addr, self.range.clone())),
        }
    }
}

/// One call frame recovered from the chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackFrame {
    /// Frame pointer of this frame.
    pub fp: usize,
    /// Return address into the caller.
    pub ra: usize,
    /// Raw words above the return address. Shorter than
    /// [`MAX_FRAME_ARGS`] when the window ends first.
    pub args: ArrayVec<usize, MAX_FRAME_ARGS>,
}

/// Iterator over the frames of a frame-pointer chain.
///
/// Yields `Ok(frame)` innermost first, ends at a zero frame pointer, and
/// yields at most one `Err` after which it is exhausted.
pub struct FramePointerWalker<P: Peeker> {
    peeker: P,
    fp: usize,
    prev: Option<usize>,
    depth: usize,
    limit: usize,
    done: bool,
}

impl<P: Peeker> FramePointerWalker<P> {
    /// Start walking at frame pointer `fp` with no frame limit.
    pub fn new(peeker: P, fp: usize) -> Self {
        Self {
            peeker,
            fp,
            prev: None,
            depth: 0,
            limit: usize::MAX,
            done: false,
        }
    }

    /// Stop with [`UnwindError::TooDeep`] after `limit` frames.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    fn frame_at(&self, fp: usize) -> Result<StackFrame, UnwindError> {
        let ra = self.peeker.peek(fp.wrapping_add(WORD))?;
        let mut args = ArrayVec::new();
        for i in 0..MAX_FRAME_ARGS {
            match self.peeker.peek(fp.wrapping_add((2 + i) * WORD)) {
                Ok(word) => args.push(word),
                Err(_) => break,
            }
        }
        Ok(StackFrame { fp, ra, args })
    }
}

impl<P: Peeker> Iterator for FramePointerWalker<P> {
    type Item = Result<StackFrame, UnwindError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        // The saved frame pointer of the last frame is only followed now, so
        // the frame itself is reported even if its link is unreadable.
        if let Some(prev) = self.prev.take() {
            match self.peeker.peek(prev) {
                Ok(next) => self.fp = next,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        if self.fp == 0 {
            self.done = true;
            return None;
        }
        if self.depth >= self.limit {
            self.done = true;
            return Some(Err(UnwindError::TooDeep(self.limit)));
        }
        match self.frame_at(self.fp) {
            Ok(frame) => {
                self.depth += 1;
                self.prev = Some(self.fp);
                Some(Ok(frame))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
