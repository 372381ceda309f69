#![allow(dead_code)]

use kmon::{
    KernelError,
    addressing::Pa,
    mm::page_table::{PageTable, PhysicalMemory, PtIndices},
    teletype::Teletype,
};
use std::collections::{BTreeMap, VecDeque};

/// A teletype that plays back a script and records the session.
///
/// Each read returns one scripted event: a byte, the end of input, or an
/// error. Past the script, reads report the end of input, or panic once the
/// script is `exhaustible`.
pub struct Script {
    input: VecDeque<Result<Option<u8>, KernelError>>,
    output: Vec<u8>,
    panic_when_done: bool,
}

impl Script {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.bytes().map(|b| Ok(Some(b))).collect(),
            output: Vec::new(),
            panic_when_done: false,
        }
    }

    /// Queue a failing read after the input so far.
    pub fn fail_read(mut self) -> Self {
        self.input.push_back(Err(KernelError::IOError));
        self
    }

    /// Queue one end-of-input read after the input so far.
    pub fn hang_up(mut self) -> Self {
        self.input.push_back(Ok(None));
        self
    }

    /// Queue more input.
    pub fn then(mut self, input: &str) -> Self {
        self.input.extend(input.bytes().map(|b| Ok(Some(b))));
        self
    }

    /// Panic on a read past the script, ending a session that never stops
    /// by itself.
    pub fn exhaustible(mut self) -> Self {
        self.panic_when_done = true;
        self
    }

    pub fn output(&self) -> String {
        String::from_utf8(self.output.clone()).unwrap()
    }
}

impl Teletype for Script {
    fn write(&mut self, data: &[u8]) -> Result<usize, KernelError> {
        self.output.extend_from_slice(data);
        Ok(data.len())
    }

    fn read(&mut self, data: &mut [u8]) -> Result<usize, KernelError> {
        match self.input.pop_front() {
            None if self.panic_when_done => panic!("script exhausted"),
            None | Some(Ok(None)) => Ok(0),
            Some(Ok(Some(b))) => {
                data[0] = b;
                Ok(1)
            }
            Some(Err(e)) => Err(e),
        }
    }
}

/// Physical memory made of heap-allocated page tables.
pub struct Frames {
    tables: BTreeMap<usize, Box<[usize; 512]>>,
    next: usize,
    root: Pa,
}

impl Frames {
    pub fn new() -> Self {
        let mut frames = Self {
            tables: BTreeMap::new(),
            next: 0x10_0000,
            root: Pa::ZERO,
        };
        frames.root = frames.alloc();
        frames
    }

    fn alloc(&mut self) -> Pa {
        self.next += 0x1000;
        self.tables.insert(self.next, Box::new([0; 512]));
        Pa::new(self.next).unwrap()
    }

    fn next_level(&mut self, table: Pa, index: usize) -> Pa {
        let entry = self.tables[&table.into_usize()][index];
        if entry & 1 != 0 {
            return Pa::new(entry & 0x000f_ffff_ffff_f000).unwrap();
        }
        let new = self.alloc();
        self.tables.get_mut(&table.into_usize()).unwrap()[index] = new.into_usize() | 0x7;
        new
    }

    /// Install the PTE `pte` for the 4K page holding `va`.
    pub fn map(&mut self, va: usize, pte: usize) {
        let idx = PtIndices::from_va(kmon::addressing::Va::new(va).unwrap());
        let pdpt = self.next_level(self.root, idx.pml4ei);
        let pd = self.next_level(pdpt, idx.pdptei);
        let pt = self.next_level(pd, idx.pdei);
        self.tables.get_mut(&pt.into_usize()).unwrap()[idx.ptei] = pte;
    }

    pub fn page_table(&self) -> PageTable<&Self> {
        PageTable::new(self.root, self)
    }
}

impl PhysicalMemory for Frames {
    fn table(&self, pa: Pa) -> Option<&[usize; 512]> {
        self.tables.get(&pa.into_usize()).map(|t| &**t)
    }
}

/// Lays out linked frames, innermost first, each as `[saved fp, ra, 5 args]`.
///
/// Returns the stack and the innermost frame pointer. The stack must outlive
/// every walk of it.
pub fn frame_chain(ras: &[usize]) -> (Vec<usize>, usize) {
    const SLOTS: usize = 7;
    let word = std::mem::size_of::<usize>();
    let mut stack = vec![0usize; ras.len() * SLOTS + 1];
    let base = stack.as_ptr() as usize;
    for (i, ra) in ras.iter().enumerate() {
        let slot = i * SLOTS;
        stack[slot] = if i + 1 == ras.len() {
            0
        } else {
            base + (slot + SLOTS) * word
        };
        stack[slot + 1] = *ra;
        for a in 0..5 {
            stack[slot + 2 + a] = 0xa0 * (i + 1) + a;
        }
    }
    (stack, base)
}
