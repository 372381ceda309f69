//! Entries of Page Table, their permissions, and a read-only walker.
//!
//! x86_64 translates a virtual address through four levels of tables. Each
//! level is a page-sized array of 512 entries, indexed by 9 bits of the
//! virtual address:
//!
//! ```text
//!  63     48 47    39 38    30 29    21 20    12 11        0
//! +---------+--------+--------+--------+--------+-----------+
//! | sign ext|  PML4  |  PDPT  |   PD   |   PT   |  offset   |
//! +---------+--------+--------+--------+--------+-----------+
//! ```
//!
//! A PDPT entry or PD entry with the `PS` bit set maps a 1 GiB or 2 MiB page
//! directly and ends the walk early.
//!
//! The monitor reads the tables through a [`PhysicalMemory`], which turns the
//! physical address stored in an entry into the table it points to. In the
//! kernel that is the direct mapping ([`DirectMap`]); tests hand in tables
//! built on the heap.
use crate::addressing::{Pa, Va};

bitflags::bitflags! {
    /// Flags for pml4e.
    pub struct Pml4eFlags: usize {
        /// Present; must be 1 to reference a page-directory-pointer table.
        const P = 1 << 0;
        /// Read/write; if 0, writes to the 512-GByte region are not allowed.
        const RW = 1 << 1;
        /// User/supervisor; if 0, user-mode accesses to the region are not allowed.
        const US = 1 << 2;
        /// Page-level write-through.
        const PWT = 1 << 3;
        /// Page-level cache disable.
        const PCD = 1 << 4;
        /// Accessed.
        const A = 1 << 5;
        /// Execute-disable.
        const XD = 1 << 63;
    }
}

bitflags::bitflags! {
    /// Flags for pdpe.
    pub struct PdpeFlags: usize {
        /// Present; must be 1 to reference a page directory or map a 1-GByte page.
        const P = 1 << 0;
        /// Read/write; if 0, writes to the 1-GByte region are not allowed.
        const RW = 1 << 1;
        /// User/supervisor; if 0, user-mode accesses to the region are not allowed.
        const US = 1 << 2;
        /// Page-level write-through.
        const PWT = 1 << 3;
        /// Page-level cache disable.
        const PCD = 1 << 4;
        /// Accessed.
        const A = 1 << 5;
        /// Dirty; only meaningful for a 1-GByte page.
        const D = 1 << 6;
        /// Page size; the entry maps a 1-GByte page.
        const PS = 1 << 7;
        /// Global; only meaningful for a 1-GByte page.
        const G = 1 << 8;
        /// Execute-disable.
        const XD = 1 << 63;
    }
}

bitflags::bitflags! {
    /// Flags for pde.
    pub struct PdeFlags: usize {
        /// Present; must be 1 to reference a page table or map a 2-MByte page.
        const P = 1 << 0;
        /// Read/write; if 0, writes to the 2-MByte region are not allowed.
        const RW = 1 << 1;
        /// User/supervisor; if 0, user-mode accesses to the region are not allowed.
        const US = 1 << 2;
        /// Page-level write-through.
        const PWT = 1 << 3;
        /// Page-level cache disable.
        const PCD = 1 << 4;
        /// Accessed.
        const A = 1 << 5;
        /// Dirty; only meaningful for a 2-MByte page.
        const D = 1 << 6;
        /// Page size; the entry maps a 2-MByte page.
        const PS = 1 << 7;
        /// Global; only meaningful for a 2-MByte page.
        const G = 1 << 8;
        /// Execute-disable.
        const XD = 1 << 63;
    }
}

bitflags::bitflags! {
    /// Flags for pte.
    pub struct PteFlags: usize {
        /// Present; must be 1 to map a 4-KByte page.
        const P = 1 << 0;
        /// Read/write; if 0, writes to the page are not allowed.
        const RW = 1 << 1;
        /// User/supervisor; if 0, user-mode accesses to the page are not allowed.
        const US = 1 << 2;
        /// Page-level write-through.
        const PWT = 1 << 3;
        /// Page-level cache disable.
        const PCD = 1 << 4;
        /// Accessed.
        const A = 1 << 5;
        /// Dirty.
        const D = 1 << 6;
        /// Page attribute table.
        const PAT = 1 << 7;
        /// Global.
        const G = 1 << 8;
        /// Execute-disable.
        const XD = 1 << 63;
    }
}

/// Bits 12..=51 of an entry: the physical address of a table or 4-KByte page.
pub const FRAME_MASK_4K: usize = 0x000f_ffff_ffff_f000;
/// Bits 21..=51 of an entry: the physical address of a 2-MByte page.
pub const FRAME_MASK_2M: usize = 0x000f_ffff_ffe0_0000;
/// Bits 30..=51 of an entry: the physical address of a 1-GByte page.
pub const FRAME_MASK_1G: usize = 0x000f_ffff_c000_0000;

macro_rules! entry {
    ($(#[$m:meta])* $name:ident, $flags:ident) => {
        $(#[$m])*
        #[derive(Clone, Copy, PartialEq, Eq)]
        #[repr(transparent)]
        pub struct $name(pub usize);

        impl $name {
            /// The physical address this entry points to, if it is present.
            #[inline]
            pub const fn pa(&self) -> Option<Pa> {
                if self.flags().contains($flags::P) {
                    Pa::new(self.0 & FRAME_MASK_4K)
                } else {
                    None
                }
            }

            /// The flags of this entry.
            #[inline]
            pub const fn flags(&self) -> $flags {
                $flags::from_bits_truncate(self.0)
            }
        }

        impl core::fmt::Debug for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                if let Some(pa) = self.pa() {
                    write!(f, concat!(stringify!($name), "({:016x}, {:?})"), pa.into_usize(), self.flags())
                } else {
                    write!(f, ".")
                }
            }
        }
    };
}

entry!(
    /// Page Map Level 4 Entry (PML4E).
    ///
    /// Points to a Page Directory Pointer Table.
    Pml4e,
    Pml4eFlags
);
entry!(
    /// Page Directory Pointer Table Entry (PDPE).
    ///
    /// Points to a Page Directory, or maps a 1-GByte page when `PS` is set.
    Pdpe,
    PdpeFlags
);
entry!(
    /// Page Directory Entry (PDE).
    ///
    /// Points to a Page Table, or maps a 2-MByte page when `PS` is set.
    Pde,
    PdeFlags
);
entry!(
    /// Page Table Entry (PTE).
    ///
    /// Maps a single 4-KByte page.
    Pte,
    PteFlags
);

/// Page Table Mapping Error.
#[derive(Debug, PartialEq, Eq)]
pub enum PageTableMappingError {
    /// Not exist.
    ///
    /// Some level of the walk has no present entry, the table it points to is
    /// unreadable, or the address is not canonical.
    NotExist,
}

bitflags::bitflags! {
    /// Possible memory permissions for a page.
    pub struct Permission: usize {
        /// Page is readable.
        const READ = 1 << 0;
        /// Page is writable.
        const WRITE = 1 << 1;
        /// Page is executable.
        const EXECUTABLE = 1 << 2;
        /// Page can be referred by user application.
        const USER = 1 << 3;
    }
}

impl core::fmt::Display for Permission {
    /// Formats as `rwx` with `-` for a missing right, followed by `user` or
    /// `kernel`.
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let bit = |p: Permission, c: char| if self.contains(p) { c } else { '-' };
        write!(
            f,
            "{}{}{} {}",
            bit(Permission::READ, 'r'),
            bit(Permission::WRITE, 'w'),
            bit(Permission::EXECUTABLE, 'x'),
            if self.contains(Permission::USER) {
                "user"
            } else {
                "kernel"
            }
        )
    }
}

/// Represents page table indices for a given virtual address (VA).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PtIndices {
    /// The virtual address (VA) associated with this page table index
    /// breakdown.
    pub va: Va,
    /// Page Map Level 4 Index (PML4EI).
    pub pml4ei: usize,
    /// Page Directory Pointer table Index (PDPTEI).
    pub pdptei: usize,
    /// Page Directory Index (PDEI).
    pub pdei: usize,
    /// Page Table Index (PTEI).
    pub ptei: usize,
}

impl PtIndices {
    /// Extracts page table indices from a given virtual address ([`Va`]).
    ///
    /// The offset within the page is ignored, so any address of a page yields
    /// the same indices.
    pub const fn from_va(va: Va) -> Self {
        let va_raw = va.into_usize();
        Self {
            va,
            pml4ei: (va_raw >> 39) & 0x1ff,
            pdptei: (va_raw >> 30) & 0x1ff,
            pdei: (va_raw >> 21) & 0x1ff,
            ptei: (va_raw >> 12) & 0x1ff,
        }
    }
}

/// The leaf entry that maps a virtual address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mapping {
    /// A 4-KByte page mapped by a page table entry.
    Page4K(Pte),
    /// A 2-MByte page mapped by a page directory entry with `PS` set.
    Page2M(Pde),
    /// A 1-GByte page mapped by a page directory pointer entry with `PS` set.
    Page1G(Pdpe),
}

impl Mapping {
    /// The raw value of the leaf entry.
    #[inline]
    pub const fn entry(&self) -> usize {
        match self {
            Self::Page4K(e) => e.0,
            Self::Page2M(e) => e.0,
            Self::Page1G(e) => e.0,
        }
    }

    /// The frame bits of the leaf entry: the physical address of the start of
    /// the mapped page.
    #[inline]
    pub fn pa(&self) -> Pa {
        let mask = match self {
            Self::Page4K(_) => FRAME_MASK_4K,
            Self::Page2M(_) => FRAME_MASK_2M,
            Self::Page1G(_) => FRAME_MASK_1G,
        };
        // The mask keeps the value below 2^52, so it is always a valid Pa.
        Pa::ZERO + (self.entry() & mask)
    }

    /// Access rights granted by the leaf entry.
    ///
    /// A present page is always readable. Rights restricted by an upper level
    /// are not reflected here.
    pub fn permission(&self) -> Permission {
        let raw = self.entry();
        let mut perm = Permission::READ;
        if raw & PteFlags::RW.bits() != 0 {
            perm |= Permission::WRITE;
        }
        if raw & PteFlags::XD.bits() == 0 {
            perm |= Permission::EXECUTABLE;
        }
        if raw & PteFlags::US.bits() != 0 {
            perm |= Permission::USER;
        }
        perm
    }
}

/// Translates a raw virtual address to the entry that maps it.
///
/// This is the only view of address translation `showmappings` needs.
pub trait PageLookup {
    /// Find the leaf entry mapping `va`.
    ///
    /// # Returns
    /// - `Ok(Mapping)` if `va` is mapped.
    /// - `Err(PageTableMappingError::NotExist)` if it is not, including when
    ///   `va` is not a canonical address.
    fn lookup(&self, va: usize) -> Result<Mapping, PageTableMappingError>;
}

/// Read access to the page-sized tables that make up a page table.
pub trait PhysicalMemory {
    /// The 512 entries stored in the physical frame at `pa`, or `None` if the
    /// frame cannot be read.
    fn table(&self, pa: Pa) -> Option<&[usize; 512]>;
}

impl<T: PhysicalMemory + ?Sized> PhysicalMemory for &T {
    fn table(&self, pa: Pa) -> Option<&[usize; 512]> {
        (**self).table(pa)
    }
}

/// Size of the kernel's direct mapping of physical memory.
pub const DIRECT_MAP_SIZE: usize = 1 << 39;

/// Physical memory seen through the kernel's direct mapping.
///
/// Only usable inside the kernel, where every frame below
/// [`DIRECT_MAP_SIZE`] is mapped at [`crate::addressing::DIRECT_MAP_BASE`].
#[derive(Clone, Copy, Debug, Default)]
pub struct DirectMap;

impl PhysicalMemory for DirectMap {
    fn table(&self, pa: Pa) -> Option<&[usize; 512]> {
        if pa.offset() != 0 || pa.into_usize() >= DIRECT_MAP_SIZE {
            return None;
        }
        // Safety: frames below DIRECT_MAP_SIZE are mapped read-write in the
        // direct mapping and page tables are page-aligned.
        unsafe { (pa.into_kva().into_usize() as *const [usize; 512]).as_ref() }
    }
}

/// A 4-level x86_64 page table, read through `M`.
pub struct PageTable<M: PhysicalMemory> {
    root: Pa,
    mem: M,
}

impl<M: PhysicalMemory> PageTable<M> {
    /// The page table whose PML4 lives at `root`.
    pub const fn new(root: Pa, mem: M) -> Self {
        Self { root, mem }
    }

    fn entry(&self, table: Pa, index: usize) -> Result<usize, PageTableMappingError> {
        self.mem
            .table(table)
            .map(|t| t[index])
            .ok_or(PageTableMappingError::NotExist)
    }

    /// Walk through the page table to find the leaf entry for `va`.
    ///
    /// # Returns
    /// - `Ok(Mapping)` with the PTE, or with the PDE / PDPE when a huge page
    ///   maps `va`.
    /// - `Err(PageTableMappingError::NotExist)` when a level is not present.
    pub fn walk(&self, va: Va) -> Result<Mapping, PageTableMappingError> {
        let indices = PtIndices::from_va(va);

        let pml4e = Pml4e(self.entry(self.root, indices.pml4ei)?);
        let pdpt = pml4e.pa().ok_or(PageTableMappingError::NotExist)?;

        let pdpe = Pdpe(self.entry(pdpt, indices.pdptei)?);
        let pd = pdpe.pa().ok_or(PageTableMappingError::NotExist)?;
        if pdpe.flags().contains(PdpeFlags::PS) {
            return Ok(Mapping::Page1G(pdpe));
        }

        let pde = Pde(self.entry(pd, indices.pdei)?);
        let pt = pde.pa().ok_or(PageTableMappingError::NotExist)?;
        if pde.flags().contains(PdeFlags::PS) {
            return Ok(Mapping::Page2M(pde));
        }

        let pte = Pte(self.entry(pt, indices.ptei)?);
        match pte.pa() {
            Some(_) => Ok(Mapping::Page4K(pte)),
            None => Err(PageTableMappingError::NotExist),
        }
    }
}

impl<M: PhysicalMemory> PageLookup for PageTable<M> {
    fn lookup(&self, va: usize) -> Result<Mapping, PageTableMappingError> {
        let va = Va::new(va).ok_or(PageTableMappingError::NotExist)?;
        self.walk(va)
    }
}
