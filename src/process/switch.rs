// src/process/switch.rs
//! Fabricating the initial register/stack snapshot for a process that has
//! never yet been interrupted (the target of `execve`).
//!
//! A running process's `RegisterSnapshot`/`StackSnapshot` are written back
//! into the live interrupt frame by the scheduler on every switch (see
//! `sched::RoundRobin::next_proc`); the actual "context switch" is just
//! overwriting those two structs before the common interrupt tail's
//! `popad`/`iretd` resumes execution, since `iretd` reloads `CS:EIP` and
//! `SS:ESP` wholesale. A brand new process needs those fields seeded as if
//! it *had* already been interrupted once, right at its entry point.

use crate::arch::x86::gdt;
use crate::arch::x86::idt::{RegisterSnapshot, StackSnapshot};

/// EFLAGS with the interrupt flag set and the reserved bit 1 set, nothing
/// else — the standard resting state for a freshly started task.
const INITIAL_EFLAGS: u32 = 0x202;

/// Builds the stack snapshot for a process about to start executing
/// `entry` with its user stack at `user_esp`.
#[must_use]
pub fn initial_stack_snapshot(entry: u32, user_esp: u32) -> StackSnapshot {
    let selectors = gdt::selectors();
    StackSnapshot {
        error_code: 0,
        eip: entry,
        cs: u32::from(selectors.user_code.bits()),
        eflags: INITIAL_EFLAGS,
        user_esp,
        user_ss: u32::from(selectors.user_data.bits()),
    }
}

/// A zeroed register snapshot: no caller-visible initial register state is
/// promised beyond the ABI's argc/argv placement, which the loader writes
/// onto the user stack rather than into registers.
#[must_use]
pub fn initial_register_snapshot() -> RegisterSnapshot {
    RegisterSnapshot::default()
}
