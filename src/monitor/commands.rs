//! The monitor's commands.
//!
//! Commands are a closed set: [`Command`] has one variant per command and
//! [`COMMANDS`] lists them in the order `help` prints them. Each handler writes
//! its report to the console and returns the status the REPL acts on; a
//! negative status ends the session.
use super::{Environment, KernelLayout, Monitor, MonitorConfig};
use crate::{
    addressing::PAGE_SIZE,
    mm::page_table::PageLookup,
    monitor::parser::parse_hex_address,
    teletype::Console,
};
use abyss::{Registers, unwind::FramePointerWalker};
use core::fmt::{self, Write};

/// A monitor command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// `help`: list the commands.
    Help,
    /// `kerninfo`: print the kernel's special symbols and footprint.
    KernInfo,
    /// `backtrace`: walk the frame-pointer chain of the monitor's stack.
    Backtrace,
    /// `showmappings`: translate virtual addresses through the page table.
    ShowMappings,
}

/// Every command, in registration order.
pub static COMMANDS: [Command; 4] = [
    Command::Help,
    Command::KernInfo,
    Command::Backtrace,
    Command::ShowMappings,
];

impl Command {
    /// The name the command is invoked by.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Help => "help",
            Self::KernInfo => "kerninfo",
            Self::Backtrace => "backtrace",
            Self::ShowMappings => "showmappings",
        }
    }

    /// One-line description shown by `help`.
    pub const fn desc(self) -> &'static str {
        match self {
            Self::Help => "Display this list of commands",
            Self::KernInfo => "Display information about the kernel",
            Self::Backtrace => "Display information of the kernel stack",
            Self::ShowMappings => {
                "Show physical address mappings corresponding to specific virtual addresses"
            }
        }
    }

    /// The registered command called exactly `name`.
    pub fn lookup(name: &str) -> Option<Self> {
        COMMANDS.iter().copied().find(|cmd| cmd.name() == name)
    }

    /// The function implementing the command.
    pub const fn handler(self) -> Handler {
        match self {
            Self::Help => run_help,
            Self::KernInfo => run_kerninfo,
            Self::Backtrace => run_backtrace,
            Self::ShowMappings => run_showmappings,
        }
    }

    /// Run the command and return its handler's status.
    ///
    /// `args` holds every token of the line, the command name first. `tf` is
    /// the trapped context the monitor was entered with, if any.
    pub fn run(self, args: &[&str], tf: Option<&Registers>, monitor: &mut Monitor<'_>) -> isize {
        (self.handler())(args, tf, monitor)
    }
}

/// A command handler. Takes the tokens of the line, the trapped context and
/// the session; a negative return value ends the session.
pub type Handler = fn(&[&str], Option<&Registers>, &mut Monitor<'_>) -> isize;

/// Write a report to the session's console.
///
/// A console write failure is logged and the command still succeeds.
fn report(
    cmd: Command,
    monitor: &mut Monitor<'_>,
    f: impl FnOnce(&mut dyn Write, &MonitorConfig, &Environment<'_>) -> fmt::Result,
) -> isize {
    let Monitor { config, env, tty } = monitor;
    let mut console = Console::new(&mut **tty);
    let out: &mut dyn Write = &mut console;
    if let Err(e) = f(out, &*config, &*env) {
        abyss::warning!("Console write failed in `{}`: {:?}", cmd.name(), e);
    }
    0
}

fn run_help(_args: &[&str], _tf: Option<&Registers>, monitor: &mut Monitor<'_>) -> isize {
    report(Command::Help, monitor, |out, _, _| help(out))
}

fn run_kerninfo(_args: &[&str], _tf: Option<&Registers>, monitor: &mut Monitor<'_>) -> isize {
    report(Command::KernInfo, monitor, |out, config, _| {
        kerninfo(out, &config.layout)
    })
}

fn run_backtrace(_args: &[&str], _tf: Option<&Registers>, monitor: &mut Monitor<'_>) -> isize {
    report(Command::Backtrace, monitor, |out, config, env| {
        backtrace(out, env, config.max_frames)
    })
}

fn run_showmappings(args: &[&str], _tf: Option<&Registers>, monitor: &mut Monitor<'_>) -> isize {
    report(Command::ShowMappings, monitor, |out, _, env| {
        showmappings(out, env.page_table, args)
    })
}

/// List every command as `name - desc`.
pub fn help(out: &mut dyn Write) -> fmt::Result {
    for cmd in COMMANDS.iter() {
        writeln!(out, "{} - {}", cmd.name(), cmd.desc())?;
    }
    Ok(())
}

/// Print the special kernel symbols and the kernel's memory footprint.
pub fn kerninfo(out: &mut dyn Write, layout: &KernelLayout) -> fmt::Result {
    writeln!(out, "Special kernel symbols:")?;
    writeln!(out, "  _start                  {:08x} (phys)", layout.start)?;
    for (name, virt) in [
        ("entry", layout.entry),
        ("etext", layout.etext),
        ("edata", layout.edata),
        ("end", layout.end),
    ] {
        writeln!(
            out,
            "  {name:<6} {virt:08x} (virt)  {:08x} (phys)",
            layout.phys(virt)
        )?;
    }
    writeln!(
        out,
        "Kernel executable memory footprint: {}KB",
        layout.footprint_kb()
    )
}

/// Walk the frame-pointer chain from the current frame, innermost first.
///
/// Each frame prints as two lines: the frame pointer, return address and the
/// words above it, then where the return address points. A chain longer than
/// `max_frames`, or one leading out of the stack, ends with `Backtrace
/// failed` after the frames already found.
pub fn backtrace(out: &mut dyn Write, env: &Environment<'_>, max_frames: usize) -> fmt::Result {
    writeln!(out, "Stack backtrace:")?;
    let fp = (env.frame_pointer)();
    for frame in FramePointerWalker::new(env.stack, fp).with_limit(max_frames) {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                abyss::warning!("Backtrace stopped: {:?}", e);
                return writeln!(out, "Backtrace failed: {e:?}");
            }
        };
        write!(out, "  rbp {:016x}  rip {:016x}  args", frame.fp, frame.ra)?;
        for arg in frame.args.iter() {
            write!(out, " {arg:016x}")?;
        }
        writeln!(out)?;
        let info = env.symbols.resolve(frame.ra);
        writeln!(
            out,
            "         {}:{}: {}+{}",
            info.file,
            info.line,
            info.name(),
            frame.ra.wrapping_sub(info.fn_addr)
        )?;
    }
    Ok(())
}

fn show_mapping(out: &mut dyn Write, page_table: &dyn PageLookup, va: usize) -> fmt::Result {
    match page_table.lookup(va) {
        Ok(mapping) => writeln!(
            out,
            "va: 0x{va:08x}    pa: 0x{:08x}    {}",
            mapping.pa().into_usize(),
            mapping.permission()
        ),
        Err(_) => writeln!(out, "No physical page mapping at 0x{va:08x}"),
    }
}

/// Report the mapping of one address, or of every page-sized step of an
/// inclusive range.
///
/// `args[1]` (and `args[2]`) are hexadecimal addresses. Addresses are used
/// as given, without rounding to a page boundary. A range whose low end is
/// above its high end prints nothing.
pub fn showmappings(out: &mut dyn Write, page_table: &dyn PageLookup, args: &[&str]) -> fmt::Result {
    match args {
        [_, va] => show_mapping(out, page_table, parse_hex_address(va)),
        [_, low, high] => {
            let (mut va, high) = (parse_hex_address(low), parse_hex_address(high));
            while va <= high {
                show_mapping(out, page_table, va)?;
                match va.checked_add(PAGE_SIZE) {
                    Some(next) => va = next,
                    None => break,
                }
            }
            Ok(())
        }
        _ => writeln!(out, "Usage: showmappings <vaddr_hex> [<vaddr_hex>]"),
    }
}
