// src/panic.rs
//! Fatal error handling.
//!
//! Two paths lead here: a Rust `panic!` (heap exhaustion, an assertion, a
//! `Mutex` poisoned by a prior fault) via the `#[panic_handler]` below, and
//! a CPU fault the common interrupt dispatcher cannot recover from
//! ([`fatal_interrupt`]) — invalid opcode, general protection fault, double
//! fault. Both converge on [`halt_with_message`]: write to the serial port
//! first, since the heap and the VGA buffer's lock may themselves be the
//! thing that faulted, then the VGA console if it still answers, then spin
//! with interrupts disabled forever.

use core::fmt::Write;
use core::panic::PanicInfo;

use crate::arch::{write_debug_byte, ArchCpu, Cpu};

/// A `Write` sink that pushes every byte out the debug serial port,
/// allocation-free so it remains usable after the heap has faulted.
struct SerialSink;

impl Write for SerialSink {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for byte in s.bytes() {
            write_debug_byte(byte);
        }
        Ok(())
    }
}

fn halt_with_message(args: core::fmt::Arguments<'_>) -> ! {
    ArchCpu::disable_interrupts();

    let mut sink = SerialSink;
    let _ = sink.write_str("\n*** PIKE-OS FATAL: ");
    let _ = sink.write_fmt(args);
    let _ = sink.write_str(" ***\n");

    // Best-effort: the VGA console may itself be the thing that faulted
    // (e.g. a bad pointer into the text buffer), so errors here are
    // swallowed rather than re-entering the panic path.
    if let Some(console) = crate::drivers::vga::try_console() {
        let mut console = console;
        let _ = write!(console, "\n*** PIKE-OS FATAL: ");
        let _ = console.write_fmt(args);
        let _ = console.write_str(" ***\n");
    }

    loop {
        ArchCpu::halt();
    }
}

/// Called by `common_interrupt_dispatch` for vectors that have no
/// recovery path (invalid opcode, GPF, double fault). Never returns; the
/// `!` return type lets the caller's match arm still type-check as `u32`.
pub fn fatal_interrupt(reason: &str, vector: u32, eip: u32) -> ! {
    halt_with_message(format_args!(
        "{reason} (vector {vector:#04x}, eip {eip:#010x})"
    ))
}

/// This kernel has no demand paging or copy-on-write, so every page fault
/// is a bug rather than something to resolve and resume from.
pub fn fatal_page_fault(fault_addr: u32, error_code: u32, eip: u32) -> ! {
    halt_with_message(format_args!(
        "page fault at {fault_addr:#010x} (error {error_code:#06x}, eip {eip:#010x})"
    ))
}

/// Rust's own panic entry point: assertion failures, `unwrap`/`expect` on
/// `None`/`Err` in code paths that still use them, arithmetic overflow in
/// debug builds.
#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo<'_>) -> ! {
    halt_with_message(format_args!("{info}"))
}

/// Panic entry point for the in-kernel `#[test_case]` harness: a failing
/// assertion inside a test should fail that test run rather than halt the
/// machine, so this exits QEMU with [`crate::qemu::QemuExitCode::Failed`]
/// instead of spinning.
#[cfg(test)]
#[panic_handler]
fn panic(info: &PanicInfo<'_>) -> ! {
    test_panic_handler(info)
}

#[cfg(test)]
pub fn test_panic_handler(info: &PanicInfo<'_>) -> ! {
    crate::debug_println!("[failed]\n{info}");
    crate::qemu::exit_qemu(crate::qemu::QemuExitCode::Failed);
}
