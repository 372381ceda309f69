//! The kernel monitor's read-eval-print loop.
//!
//! A [`Monitor`] reads a line from its teletype, splits it with
//! [`parser::tokenize`], and runs the [`commands::Command`] named by the first
//! token:
//!
//! ```text
//! Welcome to the kernel monitor!
//! Type 'help' for a list of commands.
//! K> showmappings 0xffff800000100000
//! va: 0xffff800000100000    pa: 0x00100000    r-x kernel
//! K> frobnicate
//! Unknown command 'frobnicate'
//! ```
//!
//! Everything the commands inspect comes from an [`Environment`]; how the
//! session looks comes from a [`MonitorConfig`].
pub mod commands;
pub mod parser;

use crate::{
    debug_info::SymbolResolver,
    mm::page_table::PageLookup,
    teletype::{self, Console, Teletype},
};
use abyss::{Registers, unwind::Peeker};
use commands::Command;
use core::fmt::Write;

/// Default prompt.
pub const PROMPT: &str = "K> ";

/// Default bound on the number of frames `backtrace` walks.
pub const MAX_FRAMES: usize = 64;

/// Where the higher-half kernel image is linked.
pub const KERNBASE: usize = 0xffff_ffff_8000_0000;

/// Addresses of the special kernel symbols printed by `kerninfo`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KernelLayout {
    /// Physical address of `_start`.
    pub start: usize,
    /// Virtual address of the kernel entry point.
    pub entry: usize,
    /// End of the text section.
    pub etext: usize,
    /// End of the initialized data section.
    pub edata: usize,
    /// End of the kernel image.
    pub end: usize,
    /// Virtual address at which physical address 0 of the image is mapped.
    pub kernbase: usize,
}

impl KernelLayout {
    /// Physical address of the kernel virtual address `virt`.
    pub const fn phys(&self, virt: usize) -> usize {
        virt.wrapping_sub(self.kernbase)
    }

    /// Memory taken by the kernel from `entry` to `end`, in KB rounded up.
    pub const fn footprint_kb(&self) -> usize {
        self.end.saturating_sub(self.entry).div_ceil(1024)
    }

    /// The layout of the running kernel, from its linker script.
    #[cfg(target_os = "none")]
    pub fn from_linker() -> Self {
        unsafe extern "C" {
            static _start: u8;
            static entry: u8;
            static etext: u8;
            static edata: u8;
            static end: u8;
        }
        unsafe {
            Self {
                start: &_start as *const u8 as usize,
                entry: &entry as *const u8 as usize,
                etext: &etext as *const u8 as usize,
                edata: &edata as *const u8 as usize,
                end: &end as *const u8 as usize,
                kernbase: KERNBASE,
            }
        }
    }
}

/// Settings of a monitor session.
#[derive(Clone, Debug)]
pub struct MonitorConfig {
    /// Printed before every line read.
    pub prompt: &'static str,
    /// Whether to greet the operator when the session starts.
    pub banner: bool,
    /// `backtrace` gives up after this many frames.
    pub max_frames: usize,
    /// Reported by `kerninfo`.
    pub layout: KernelLayout,
    /// Whether the end of input ends the session. Off by default: a serial
    /// console never ends, and only a command may stop the REPL.
    pub stop_at_eof: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfigBuilder::new().build()
    }
}

/// Builds a [`MonitorConfig`].
///
/// ```
/// use kmon::monitor::MonitorConfigBuilder;
///
/// let config = MonitorConfigBuilder::new().prompt("kmon> ").banner(false).build();
/// assert_eq!(config.prompt, "kmon> ");
/// assert_eq!(config.max_frames, 64);
/// assert!(!config.stop_at_eof);
/// ```
pub struct MonitorConfigBuilder {
    config: MonitorConfig,
}

impl MonitorConfigBuilder {
    /// Start from the defaults: prompt `K> `, banner on, 64 frames, an
    /// all-zero layout, and a session the end of input does not stop.
    pub const fn new() -> Self {
        Self {
            config: MonitorConfig {
                prompt: PROMPT,
                banner: true,
                max_frames: MAX_FRAMES,
                layout: KernelLayout {
                    start: 0,
                    entry: 0,
                    etext: 0,
                    edata: 0,
                    end: 0,
                    kernbase: 0,
                },
                stop_at_eof: false,
            },
        }
    }

    /// Sets the prompt.
    pub fn prompt(mut self, prompt: &'static str) -> Self {
        self.config.prompt = prompt;
        self
    }

    /// Turns the greeting on or off.
    pub fn banner(mut self, banner: bool) -> Self {
        self.config.banner = banner;
        self
    }

    /// Sets the frame bound of `backtrace`.
    pub fn max_frames(mut self, max_frames: usize) -> Self {
        self.config.max_frames = max_frames;
        self
    }

    /// Sets the layout reported by `kerninfo`.
    pub fn layout(mut self, layout: KernelLayout) -> Self {
        self.config.layout = layout;
        self
    }

    /// Lets the end of input end the session, for scripted input.
    pub fn stop_at_eof(mut self, stop_at_eof: bool) -> Self {
        self.config.stop_at_eof = stop_at_eof;
        self
    }

    /// Finish the configuration.
    pub fn build(self) -> MonitorConfig {
        self.config
    }
}

impl Default for MonitorConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The kernel state a monitor session inspects.
pub struct Environment<'a> {
    /// Reads words of the stack `backtrace` walks.
    pub stack: &'a dyn Peeker,
    /// Returns the frame pointer `backtrace` starts from.
    pub frame_pointer: &'a dyn Fn() -> usize,
    /// Names the return addresses found by `backtrace`.
    pub symbols: &'a dyn SymbolResolver,
    /// Translates addresses for `showmappings`.
    pub page_table: &'a dyn PageLookup,
}

/// An interactive monitor session.
pub struct Monitor<'a> {
    config: MonitorConfig,
    env: Environment<'a>,
    tty: &'a mut dyn Teletype,
}

impl<'a> Monitor<'a> {
    /// A session over `tty`, inspecting `env`.
    pub fn new(config: MonitorConfig, env: Environment<'a>, tty: &'a mut dyn Teletype) -> Self {
        Self { config, env, tty }
    }

    fn say(&mut self, args: core::fmt::Arguments<'_>) {
        if Console::new(&mut *self.tty).write_fmt(args).is_err() {
            abyss::warning!("Console write failed.");
        }
    }

    /// Parse and run one command line.
    ///
    /// # Returns
    /// The status of the command, or 0 when the line is blank, has too many
    /// tokens, or names no command. A negative status asks the REPL to stop.
    pub fn runcmd(&mut self, line: &str, tf: Option<&Registers>) -> isize {
        let argv = match parser::tokenize(line) {
            Ok(argv) => argv,
            Err(e) => {
                self.say(format_args!("{e}\n"));
                return 0;
            }
        };
        let Some(name) = argv.first() else {
            return 0;
        };
        match Command::lookup(name) {
            Some(cmd) => cmd.run(&argv, tf, self),
            None => {
                self.say(format_args!("Unknown command '{name}'\n"));
                0
            }
        }
    }

    /// Run the session until a command returns a negative status.
    ///
    /// `tf` is printed once before the first prompt. A blank line, a failed
    /// read and the end of input all lead back to the prompt; with
    /// [`MonitorConfig::stop_at_eof`] set, the end of input ends the session
    /// instead. A run of failed reads is reported once, and the prompt is not
    /// repeated while it lasts.
    pub fn run(&mut self, tf: Option<&Registers>) {
        if self.config.banner {
            self.say(format_args!(
                "Welcome to the kernel monitor!\nType 'help' for a list of commands.\n"
            ));
        }
        if let Some(tf) = tf {
            self.say(format_args!("{tf:?}\n"));
        }
        let mut failed_reads = 0usize;
        loop {
            let prompt = (failed_reads <= 1).then_some(self.config.prompt);
            match teletype::readline(&mut *self.tty, prompt) {
                Ok(Some(line)) => {
                    failed_reads = 0;
                    if self.runcmd(&line, tf) < 0 {
                        break;
                    }
                }
                Ok(None) if self.config.stop_at_eof => break,
                Ok(None) => failed_reads = 0,
                Err(e) => {
                    failed_reads = failed_reads.saturating_add(1);
                    if failed_reads == 1 {
                        abyss::warning!("Teletype read failed: {:?}", e);
                        self.say(format_args!("read error: {e:?}\n"));
                    } else {
                        core::hint::spin_loop();
                    }
                }
            }
        }
        abyss::info!("Leaving the kernel monitor.");
    }
}
