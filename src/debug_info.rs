//! Resolving code addresses to source locations.
//!
//! `backtrace` prints every return address as `file:line: function+offset`.
//! The lookup is behind [`SymbolResolver`] so the monitor works with or without
//! debug information:
//!
//! - [`DwarfResolver`] reads the DWARF sections and the symbol table of the
//!   kernel ELF image.
//! - [`SymbolTable`] names functions from a plain symbol list, without lines.
//! - [`NoDebugInfo`] answers `<unknown>` for every address.
//!
//! A resolver never fails: an address it cannot place comes back as
//! [`SymbolInfo::unknown`].
use abyss::spinlock::SpinLock;
use addr2line::Context;
use alloc::{borrow::Cow, boxed::Box, string::String, sync::Arc, vec::Vec};

/// Placeholder for a file or function name that could not be resolved.
pub const UNKNOWN: &str = "<unknown>";

/// Source-level information about a code address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SymbolInfo {
    /// Source file.
    pub file: String,
    /// Line number, 0 if unknown.
    pub line: u32,
    /// Name of the enclosing function.
    pub fn_name: String,
    /// Number of bytes of `fn_name` to print.
    pub fn_namelen: usize,
    /// Start address of the enclosing function.
    pub fn_addr: usize,
}

impl SymbolInfo {
    /// The answer for an address nothing is known about.
    ///
    /// The function is assumed to start at `addr`, so the offset printed by
    /// `backtrace` is 0.
    pub fn unknown(addr: usize) -> Self {
        Self {
            file: String::from(UNKNOWN),
            line: 0,
            fn_name: String::from(UNKNOWN),
            fn_namelen: UNKNOWN.len(),
            fn_addr: addr,
        }
    }

    /// The first `fn_namelen` bytes of the function name.
    pub fn name(&self) -> &str {
        self.fn_name.get(..self.fn_namelen).unwrap_or(&self.fn_name)
    }
}

/// Maps a code address to its [`SymbolInfo`].
pub trait SymbolResolver {
    /// Resolve `addr`. Unknown addresses yield [`SymbolInfo::unknown`] or a
    /// partially filled record, never an error.
    fn resolve(&self, addr: usize) -> SymbolInfo;
}

/// A resolver that knows nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoDebugInfo;

impl SymbolResolver for NoDebugInfo {
    fn resolve(&self, addr: usize) -> SymbolInfo {
        SymbolInfo::unknown(addr)
    }
}

/// A function symbol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Symbol {
    /// Start address.
    pub addr: usize,
    /// Size in bytes, 0 if unknown.
    pub size: usize,
    /// Raw (possibly mangled) name.
    pub name: String,
}

/// Function symbols sorted by address.
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    /// Build a table from `symbols` in any order.
    pub fn new(mut symbols: Vec<Symbol>) -> Self {
        symbols.sort_by_key(|s| s.addr);
        Self { symbols }
    }

    /// Collect the function symbols of an ELF file.
    pub fn from_elf(elf: &object::File<'_>) -> Self {
        use object::{Object, ObjectSymbol, SymbolKind};

        Self::new(
            elf.symbols()
                .filter(|s| s.kind() == SymbolKind::Text && s.address() != 0)
                .filter_map(|s| {
                    Some(Symbol {
                        addr: s.address() as usize,
                        size: s.size() as usize,
                        name: String::from(s.name().ok()?),
                    })
                })
                .collect(),
        )
    }

    /// Number of symbols.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Whether the table holds no symbol.
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// The symbol whose body holds `addr`.
    ///
    /// That is the symbol with the greatest start address not above `addr`,
    /// unless its size is known and `addr` lies past its end.
    pub fn lookup(&self, addr: usize) -> Option<&Symbol> {
        let idx = self.symbols.partition_point(|s| s.addr <= addr);
        let sym = self.symbols.get(idx.checked_sub(1)?)?;
        if sym.size != 0 && addr - sym.addr >= sym.size {
            None
        } else {
            Some(sym)
        }
    }
}

fn demangle(name: &str) -> String {
    addr2line::demangle_auto(Cow::Borrowed(name), None).into_owned()
}

impl SymbolResolver for SymbolTable {
    fn resolve(&self, addr: usize) -> SymbolInfo {
        let mut info = SymbolInfo::unknown(addr);
        if let Some(sym) = self.lookup(addr) {
            info.fn_name = demangle(&sym.name);
            info.fn_namelen = info.fn_name.len();
            info.fn_addr = sym.addr;
        }
        info
    }
}

/// Errors raised while loading debug information.
#[derive(Debug)]
pub enum DebugInfoError {
    /// The image is not a readable object file.
    Object(object::Error),
    /// The DWARF sections are malformed.
    Dwarf(gimli::Error),
}

/// Resolves addresses with the DWARF line tables of an ELF image.
pub struct DwarfResolver {
    context: Context<gimli::EndianArcSlice<gimli::LittleEndian>>,
    symbols: SymbolTable,
}

impl DwarfResolver {
    /// Load the debug information of the ELF image `image`.
    ///
    /// Sections are copied out of `image`, which may be dropped afterwards.
    pub fn new(image: &[u8]) -> Result<Self, DebugInfoError> {
        use object::{Object, ObjectSection};

        let elf = object::File::parse(image).map_err(DebugInfoError::Object)?;
        let dwarf = gimli::Dwarf::load(|id| -> Result<_, gimli::Error> {
            let data = elf
                .section_by_name(id.name())
                .and_then(|section| section.uncompressed_data().ok())
                .unwrap_or(Cow::Borrowed(&[]));
            let data: Arc<[u8]> = Arc::from(data.as_ref());
            Ok(gimli::EndianArcSlice::new(data, gimli::LittleEndian))
        })
        .map_err(DebugInfoError::Dwarf)?;
        let context = Context::from_dwarf(dwarf).map_err(DebugInfoError::Dwarf)?;
        Ok(Self {
            context,
            symbols: SymbolTable::from_elf(&elf),
        })
    }

    /// The function symbols of the image.
    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    fn innermost_function(&self, probe: u64) -> Option<String> {
        let mut frames = self.context.find_frames(probe).ok()?;
        let frame = frames.next().ok()??;
        let name = frame.function.as_ref()?.demangle().ok()?;
        Some(name.into_owned())
    }
}

impl SymbolResolver for DwarfResolver {
    fn resolve(&self, addr: usize) -> SymbolInfo {
        let probe = addr as u64;
        let mut info = self.symbols.resolve(addr);
        if let Ok(Some(location)) = self.context.find_location(probe) {
            if let Some(file) = location.file {
                info.file = String::from(file);
            }
            info.line = location.line.unwrap_or(0);
        }
        // Without a covering symbol, name the innermost function DWARF knows.
        if self.symbols.lookup(addr).is_none() {
            if let Some(name) = self.innermost_function(probe) {
                info.fn_namelen = name.len();
                info.fn_name = name;
            }
        }
        info
    }
}

struct Installed(Option<Box<dyn SymbolResolver>>);

// The monitor runs on a single core with interrupts off.
unsafe impl Send for Installed {}

static INSTALLED: SpinLock<Installed> = SpinLock::new(Installed(None));

/// Make `resolver` the one used by [`with_installed`], replacing any earlier
/// one.
pub fn install(resolver: impl SymbolResolver + 'static) {
    let mut guard = INSTALLED.lock();
    guard.0 = Some(Box::new(resolver));
    guard.unlock();
}

/// Load the kernel image `image` and install a [`DwarfResolver`] for it.
///
/// On failure the previous resolver stays in place and a warning is printed.
pub fn install_from_image(image: &[u8]) -> Result<(), DebugInfoError> {
    match DwarfResolver::new(image) {
        Ok(resolver) => {
            abyss::info!(
                "Loaded debug information: {} function symbols.",
                resolver.symbols().len()
            );
            install(resolver);
            Ok(())
        }
        Err(e) => {
            abyss::warning!("Failed to load debug information: {:?}", e);
            Err(e)
        }
    }
}

/// Run `f` with the installed resolver, or with [`NoDebugInfo`] if none is.
///
/// The resolver stays locked while `f` runs; `f` must not call [`install`].
pub fn with_installed<R>(f: impl FnOnce(&dyn SymbolResolver) -> R) -> R {
    let guard = INSTALLED.lock();
    let r = match guard.0.as_deref() {
        Some(resolver) => f(resolver),
        None => f(&NoDebugInfo),
    };
    guard.unlock();
    r
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec;

    fn table() -> SymbolTable {
        SymbolTable::new(vec![
            Symbol {
                addr: 0x2000,
                size: 0x80,
                name: String::from("_ZN4kmon7monitor3run17h0123456789abcdefE"),
            },
            Symbol {
                addr: 0x1000,
                size: 0x100,
                name: String::from("entry"),
            },
            Symbol {
                addr: 0x3000,
                size: 0,
                name: String::from("trap_entry"),
            },
        ])
    }

    #[test]
    fn lookup_respects_symbol_bounds() {
        let t = table();
        assert_eq!(t.len(), 3);
        assert!(t.lookup(0xfff).is_none());
        assert_eq!(t.lookup(0x1000).unwrap().name, "entry");
        assert_eq!(t.lookup(0x10ff).unwrap().name, "entry");
        assert!(t.lookup(0x1100).is_none());
        assert_eq!(t.lookup(0x207f).unwrap().addr, 0x2000);
        assert!(t.lookup(0x2080).is_none());
        // Unknown size: everything up to the next symbol belongs to it.
        assert_eq!(t.lookup(0xdead_beef).unwrap().name, "trap_entry");
    }

    #[test]
    fn symbol_table_demangles_and_reports_the_start() {
        let info = table().resolve(0x2010);
        assert_eq!(info.fn_name, "kmon::monitor::run");
        assert_eq!(info.name(), "kmon::monitor::run");
        assert_eq!(info.fn_addr, 0x2000);
        assert_eq!(info.file, UNKNOWN);
        assert_eq!(info.line, 0);
    }

    #[test]
    fn unknown_addresses_have_zero_offset() {
        let info = NoDebugInfo.resolve(0xffff_8000_0000_1234);
        assert_eq!(info.fn_name, "<unknown>");
        assert_eq!(info.fn_namelen, 9);
        assert_eq!(info.fn_addr, 0xffff_8000_0000_1234);
        assert_eq!(table().resolve(0x1200), SymbolInfo::unknown(0x1200));
    }

    #[test]
    fn name_is_cut_at_namelen() {
        let mut info = SymbolInfo::unknown(0);
        info.fn_name = String::from("backtrace:F(0,25)");
        info.fn_namelen = 9;
        assert_eq!(info.name(), "backtrace");
        info.fn_namelen = 100;
        assert_eq!(info.name(), "backtrace:F(0,25)");
    }

    #[test]
    fn garbage_image_is_an_object_error() {
        assert!(matches!(
            DwarfResolver::new(b"not an elf"),
            Err(DebugInfoError::Object(_))
        ));
    }

    #[test]
    fn installed_resolver_is_used() {
        assert_eq!(with_installed(|r| r.resolve(0x10).fn_addr), 0x10);
        install(table());
        assert_eq!(with_installed(|r| r.resolve(0x1004).fn_name), "entry");
        install(NoDebugInfo);
        assert_eq!(with_installed(|r| r.resolve(0x1004).fn_name), UNKNOWN);
    }

    #[inline(never)]
    fn probe_target(x: usize) -> usize {
        x ^ 0x5a
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn dwarf_resolver_names_its_own_functions() {
        use object::{Object, ObjectSymbol};

        assert_eq!(probe_target(0x5a), 0);
        let image = std::fs::read("/proc/self/exe").unwrap();
        let elf = object::File::parse(&*image).unwrap();
        let start = elf
            .symbols()
            .find(|s| s.name().is_ok_and(|n| n.contains("probe_target")))
            .expect("test binary keeps its symbols")
            .address() as usize;

        let resolver = DwarfResolver::new(&image).expect("test binary parses");
        let info = resolver.resolve(start + 1);
        assert_eq!(info.fn_addr, start);
        assert!(info.name().ends_with("probe_target"), "{info:?}");
        assert!(info.file.ends_with("debug_info.rs"), "{info:?}");
        assert!(info.line > 0);
    }
}
