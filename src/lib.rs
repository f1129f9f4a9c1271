// src/lib.rs
//! `pike_os`: a small preemptive, protected-mode x86 kernel. `kernel_main`
//! in `kernel::mod` is the only entry point; everything else is library
//! code so the pieces stay independently testable.

#![no_std]
#![feature(abi_x86_interrupt)]
#![cfg_attr(test, feature(custom_test_frameworks))]
#![cfg_attr(test, test_runner(crate::test_runner))]
#![cfg_attr(test, reexport_test_harness_main = "test_main")]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod arch;
pub mod drivers;
pub mod errors;
pub mod fs;
pub mod kernel;
pub mod mm;
pub mod panic;
pub mod process;
pub mod qemu;
pub mod sched;
pub mod serial;
pub mod signal;
pub mod syscall;

use crate::arch::{ArchCpu, Cpu};

#[global_allocator]
static ALLOCATOR: mm::heap::LockedHeap = mm::heap::LockedHeap::new();

pub use qemu::{exit_qemu, QemuExitCode};

/// Spins with interrupts enabled, halting between them. `Sched::next_proc`
/// exits the VM rather than idling when no process is runnable, so this is
/// never reached in practice; kept as the obvious place a future idle
/// process would park.
#[inline]
pub fn hlt_loop() -> ! {
    loop {
        ArchCpu::halt();
    }
}

/// A `#[test_case]` function, run by [`test_runner`] one at a time with its
/// name printed before and `[ok]` after so a hang points at the right test.
#[cfg(test)]
pub trait Testable {
    fn run(&self);
}

#[cfg(test)]
impl<T: Fn()> Testable for T {
    fn run(&self) {
        crate::debug_print!("{} ... ", core::any::type_name::<T>());
        self();
        crate::debug_println!("[ok]");
    }
}

/// Entry point for every `#[test_case]` in the crate, reached via
/// `kernel_main` in test builds instead of the real boot sequence.
#[cfg(test)]
pub fn test_runner(tests: &[&dyn Testable]) {
    crate::debug_println!("running {} tests", tests.len());
    for test in tests {
        test.run();
    }
    exit_qemu(QemuExitCode::Success);
}
