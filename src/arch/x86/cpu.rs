// src/arch/x86/cpu.rs

use crate::arch::Cpu;

/// Saved EFLAGS, as captured by [`X86Cpu::save_and_disable_interrupts`].
#[derive(Clone, Copy, Debug)]
pub struct InterruptFlags(u32);

pub struct X86Cpu;

impl Cpu for X86Cpu {
    fn halt() {
        unsafe {
            x86::halt();
        }
    }

    fn disable_interrupts() {
        unsafe {
            x86::irq::disable();
        }
    }

    fn enable_interrupts() {
        unsafe {
            x86::irq::enable();
        }
    }

    fn are_interrupts_enabled() -> bool {
        x86::irq::enabled()
    }
}

impl X86Cpu {
    /// Save the current EFLAGS and disable interrupts.
    #[inline]
    pub fn save_and_disable_interrupts() -> InterruptFlags {
        let eflags: u32;
        unsafe {
            core::arch::asm!(
                "pushfd",
                "pop {}",
                "cli",
                out(reg) eflags,
                options(nomem, nostack, preserves_flags)
            );
        }
        InterruptFlags(eflags)
    }

    /// Restore a previously saved EFLAGS value.
    ///
    /// # Safety
    ///
    /// `flags` must be a value obtained from `save_and_disable_interrupts`.
    #[inline]
    pub unsafe fn restore_interrupts(flags: InterruptFlags) {
        unsafe {
            core::arch::asm!(
                "push {}",
                "popfd",
                in(reg) flags.0,
                options(nomem, nostack)
            );
        }
    }
}

/// Run `f` with interrupts disabled, restoring the prior EFLAGS state on
/// every exit path (including unwinding through a panic-as-abort, where the
/// restore still runs as part of stack teardown before the abort completes).
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let saved_flags = X86Cpu::save_and_disable_interrupts();

    struct InterruptGuard(InterruptFlags);

    impl Drop for InterruptGuard {
        fn drop(&mut self) {
            unsafe {
                X86Cpu::restore_interrupts(self.0);
            }
        }
    }

    let _guard = InterruptGuard(saved_flags);

    f()
}

/// Read the Time Stamp Counter (TSC).
#[must_use]
pub fn read_timestamp() -> u64 {
    unsafe { x86::time::rdtsc() }
}
