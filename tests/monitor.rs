mod common;

use abyss::{Registers, unwind::StackRange};
use common::{Frames, Script, frame_chain};
use kmon::{
    debug_info::{NoDebugInfo, Symbol, SymbolResolver, SymbolTable},
    mm::page_table::{PageLookup, PteFlags},
    monitor::{Environment, KernelLayout, Monitor, MonitorConfig, MonitorConfigBuilder},
};

const WORD: usize = std::mem::size_of::<usize>();

/// Run a whole session over `script` and return what the operator saw.
fn session(
    script: Script,
    config: MonitorConfig,
    page_table: &dyn PageLookup,
    symbols: &dyn SymbolResolver,
    stack: &[usize],
    tf: Option<&Registers>,
) -> String {
    let base = stack.as_ptr() as usize;
    let window = unsafe { StackRange::new(base..base + stack.len() * WORD) };
    let fp = if stack.is_empty() { 0 } else { base };
    let env = Environment {
        stack: &window,
        frame_pointer: &move || fp,
        symbols,
        page_table,
    };
    let mut tty = script;
    Monitor::new(config, env, &mut tty).run(tf);
    tty.output()
}

/// A session that ends with its script.
fn scripted() -> MonitorConfigBuilder {
    MonitorConfigBuilder::new().stop_at_eof(true)
}

fn quiet() -> MonitorConfig {
    scripted().banner(false).build()
}

fn run(input: &str) -> String {
    let frames = Frames::new();
    session(
        Script::new(input),
        quiet(),
        &frames.page_table(),
        &NoDebugInfo,
        &[],
        None,
    )
}

#[test]
fn greets_and_lists_commands() {
    let frames = Frames::new();
    let out = session(
        Script::new("help extra args\n"),
        scripted().build(),
        &frames.page_table(),
        &NoDebugInfo,
        &[],
        None,
    );
    assert_eq!(
        out,
        "Welcome to the kernel monitor!\n\
         Type 'help' for a list of commands.\n\
         K> help extra args\n\
         help - Display this list of commands\n\
         kerninfo - Display information about the kernel\n\
         backtrace - Display information of the kernel stack\n\
         showmappings - Show physical address mappings corresponding to specific virtual addresses\n\
         K> "
    );
}

#[test]
fn showmappings_of_an_unmapped_page() {
    let mut frames = Frames::new();
    frames.map(0x1000, 0x0020_0000 | PteFlags::P.bits());
    let out = session(
        Script::new("showmappings 0xAB000\n"),
        quiet(),
        &frames.page_table(),
        &NoDebugInfo,
        &[],
        None,
    );
    let reports: Vec<_> = out
        .lines()
        .filter(|l| l.starts_with("No physical") || l.contains("pa:"))
        .collect();
    assert_eq!(reports, ["No physical page mapping at 0x000ab000"]);
}

#[test]
fn showmappings_over_a_range() {
    let mut frames = Frames::new();
    let kva = 0xffff_ffff_8010_0000;
    frames.map(kva, 0x0010_0000 | PteFlags::P.bits());
    frames.map(
        kva + 0x1000,
        0x0010_1000 | PteFlags::P.bits() | PteFlags::RW.bits() | PteFlags::XD.bits(),
    );
    let out = session(
        Script::new("showmappings 0xffffffff80100000 0xffffffff80102000\n"),
        quiet(),
        &frames.page_table(),
        &NoDebugInfo,
        &[],
        None,
    );
    let lines: Vec<_> = out.lines().skip(1).take(3).collect();
    assert_eq!(
        lines,
        [
            "va: 0xffffffff80100000    pa: 0x00100000    r-x kernel",
            "va: 0xffffffff80101000    pa: 0x00101000    rw- kernel",
            "No physical page mapping at 0xffffffff80102000",
        ]
    );
}

#[test]
fn wrong_showmappings_arity_does_not_translate() {
    let out = run("showmappings\nshowmappings 0x1 0x2 0x3\n");
    assert_eq!(out.matches("Usage: showmappings").count(), 2);
    assert!(!out.contains("mapping at"));
}

#[test]
fn unknown_commands_and_long_lines_are_reported() {
    let long = ["x"; 16].join(" ");
    let out = run(&format!("frobnicate now\n{long}\n\n   \nHELP\n"));
    assert_eq!(
        out,
        format!(
            "K> frobnicate now\nUnknown command 'frobnicate'\n\
             K> {long}\nToo many arguments (max 16)\n\
             K> \nK>    \nK> HELP\nUnknown command 'HELP'\nK> "
        )
    );
}

#[test]
fn backtrace_walks_the_synthetic_stack() {
    let frames = Frames::new();
    let symbols = SymbolTable::new(vec![
        Symbol {
            addr: 0xffff_ffff_8010_0100,
            size: 0x80,
            name: String::from("_ZN4kmon7monitor7Monitor6runcmd17h0123456789abcdefE"),
        },
        Symbol {
            addr: 0xffff_ffff_8010_0200,
            size: 0x80,
            name: String::from("kernel_main"),
        },
    ]);
    let (stack, fp) = frame_chain(&[0xffff_ffff_8010_0123, 0xffff_ffff_8010_0242, 0x1234]);
    let out = session(
        Script::new("backtrace\n"),
        quiet(),
        &frames.page_table(),
        &symbols,
        &stack,
        None,
    );
    let lines: Vec<_> = out.lines().collect();
    assert_eq!(lines[1], "Stack backtrace:");
    assert_eq!(
        lines[2],
        format!(
            "  rbp {fp:016x}  rip ffffffff80100123  args 00000000000000a0 00000000000000a1 \
             00000000000000a2 00000000000000a3 00000000000000a4"
        )
    );
    assert_eq!(lines[3], "         <unknown>:0: kmon::monitor::Monitor::runcmd+35");
    assert!(lines[4].starts_with(&format!("  rbp {:016x}  rip ffffffff80100242", fp + 7 * WORD)));
    assert_eq!(lines[5], "         <unknown>:0: kernel_main+66");
    assert!(lines[6].contains("rip 0000000000001234"));
    assert_eq!(lines[7], "         <unknown>:0: <unknown>+0");
    assert_eq!(lines[8], "K> ");
}

#[test]
fn backtrace_stops_at_the_frame_bound() {
    let frames = Frames::new();
    let ras: Vec<usize> = (1..=10).collect();
    let (stack, _) = frame_chain(&ras);
    let out = session(
        Script::new("backtrace\n"),
        scripted().banner(false).max_frames(4).build(),
        &frames.page_table(),
        &NoDebugInfo,
        &stack,
        None,
    );
    assert_eq!(out.matches("  rbp ").count(), 4);
    assert!(out.contains("Backtrace failed: TooDeep(4)\n"));
    assert!(out.ends_with("K> "));
}

#[test]
fn kerninfo_uses_the_configured_layout() {
    let frames = Frames::new();
    let layout = KernelLayout {
        start: 0x0010_000c,
        entry: 0xffff_ffff_8010_000c,
        etext: 0xffff_ffff_8010_4000,
        edata: 0xffff_ffff_8010_8000,
        end: 0xffff_ffff_8010_840c,
        kernbase: 0xffff_ffff_8000_0000,
    };
    let out = session(
        Script::new("kerninfo\n"),
        scripted().banner(false).layout(layout).build(),
        &frames.page_table(),
        &NoDebugInfo,
        &[],
        None,
    );
    assert!(out.contains("  end    ffffffff8010840c (virt)  0010840c (phys)\n"));
    assert!(out.contains("Kernel executable memory footprint: 33KB\n"));
}

#[test]
fn trapframe_is_printed_once_before_the_prompt() {
    let frames = Frames::new();
    let mut tf = Registers::new();
    tf.gprs.rax = 0xdead;
    let out = session(
        Script::new("help\nhelp\n"),
        scripted().banner(false).prompt("kmon> ").build(),
        &frames.page_table(),
        &NoDebugInfo,
        &[],
        Some(&tf),
    );
    assert!(out.starts_with("RAX: 000000000000dead"));
    assert_eq!(out.matches("RAX:").count(), 1);
    assert_eq!(out.matches("kmon> ").count(), 3);
}

#[test]
fn read_errors_do_not_end_the_session() {
    let frames = Frames::new();
    let out = session(
        Script::new("").fail_read().then("help\n"),
        quiet(),
        &frames.page_table(),
        &NoDebugInfo,
        &[],
        None,
    );
    assert!(out.starts_with("K> read error: IOError\nK> help\n"));
    assert!(out.contains("help - Display this list of commands"));
}

#[test]
fn repeated_read_errors_are_reported_once() {
    let frames = Frames::new();
    let out = session(
        Script::new("")
            .fail_read()
            .fail_read()
            .fail_read()
            .then("help\n"),
        quiet(),
        &frames.page_table(),
        &NoDebugInfo,
        &[],
        None,
    );
    assert!(out.starts_with("K> read error: IOError\nK> help\nhelp - "));
    assert_eq!(out.matches("read error").count(), 1);
    assert!(out.ends_with("K> "));
}

#[test]
fn ctrl_d_does_not_end_the_session() {
    let out = run("\x04help\n\x04\nkerninfo\n");
    assert!(out.starts_with("K> help\nhelp - Display this list of commands\n"));
    assert!(out.contains("K> \nK> kerninfo\nSpecial kernel symbols:\n"));
    assert!(out.ends_with("K> "));
}

#[test]
fn end_of_input_leads_back_to_the_prompt() {
    let frames = Frames::new();
    let page_table = frames.page_table();
    let window = unsafe { StackRange::new(0..0) };
    let mut tty = Script::new("").hang_up().then("help\n").exhaustible();
    let ended = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let env = Environment {
            stack: &window,
            frame_pointer: &|| 0,
            symbols: &NoDebugInfo,
            page_table: &page_table,
        };
        let config = MonitorConfigBuilder::new().banner(false).build();
        Monitor::new(config, env, &mut tty).run(None);
    }));
    assert!(ended.is_err(), "the session only stops when the script runs out");
    let out = tty.output();
    assert!(out.starts_with("K> K> help\nhelp - Display this list of commands\n"));
    assert!(out.ends_with("K> "));
}

#[test]
fn commands_pass_their_status_back() {
    let frames = Frames::new();
    let page_table = frames.page_table();
    let window = unsafe { StackRange::new(0..0) };
    let env = Environment {
        stack: &window,
        frame_pointer: &|| 0,
        symbols: &NoDebugInfo,
        page_table: &page_table,
    };
    let mut tty = Script::new("");
    let mut monitor = Monitor::new(quiet(), env, &mut tty);
    for line in ["help", "kerninfo", "backtrace", "showmappings 0x1000", "", "frobnicate"] {
        assert_eq!(monitor.runcmd(line, None), 0, "{line}");
    }
    drop(monitor);
    let out = tty.output();
    assert!(out.contains("Stack backtrace:\n"));
    assert!(out.contains("No physical page mapping at 0x00001000\n"));
    assert!(out.ends_with("Unknown command 'frobnicate'\n"));
}
