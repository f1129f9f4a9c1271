// src/sched/mod.rs
//! Round-robin scheduler and the four switch-block flags that gate
//! preemption. Parameterized over a `Strategy` at compile time rather than
//! boxed as `dyn` (see section 9) — this crate only ever instantiates
//! `Sched<RoundRobin>`, but the seam stays generic.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch::x86::idt::{RegisterSnapshot, StackSnapshot};
use crate::errors::KernelError;
use crate::process::table::ProcTable;
use crate::process::Pid;

/// Chooses the next runnable PID given the table and the currently active
/// one. Implementations must not mutate `table`.
pub trait Strategy {
    fn pick_next(&self, table: &ProcTable, current: Pid) -> Option<Pid>;
}

/// Walks PIDs in ascending order starting just after `current`, wrapping —
/// the first runnable-or-active one found wins. Falls back to `current`
/// itself if nothing else qualifies.
pub struct RoundRobin;

impl Strategy for RoundRobin {
    fn pick_next(&self, table: &ProcTable, current: Pid) -> Option<Pid> {
        for pid in table.pids_from(current) {
            if let Some(proc) = table.get(pid) {
                use crate::process::Status;
                if matches!(proc.status, Status::Runnable | Status::Active) {
                    return Some(pid);
                }
            }
        }
        None
    }
}

/// Four kernel-global booleans that, when any is set, suppress the timer
/// handler's call into `next_proc`.
#[derive(Default)]
pub struct SwitchBlock {
    switch_in_progress: AtomicBool,
    still_initialising: AtomicBool,
    in_exec: AtomicBool,
    in_notify: AtomicBool,
}

impl SwitchBlock {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            switch_in_progress: AtomicBool::new(false),
            still_initialising: AtomicBool::new(true),
            in_exec: AtomicBool::new(false),
            in_notify: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn all_clear(&self) -> bool {
        !self.switch_in_progress.load(Ordering::Acquire)
            && !self.still_initialising.load(Ordering::Acquire)
            && !self.in_exec.load(Ordering::Acquire)
            && !self.in_notify.load(Ordering::Acquire)
    }

    pub fn clear_all(&self) {
        self.switch_in_progress.store(false, Ordering::Release);
        self.still_initialising.store(false, Ordering::Release);
        self.in_exec.store(false, Ordering::Release);
        self.in_notify.store(false, Ordering::Release);
    }

    pub fn set_switch_in_progress(&self, value: bool) {
        self.switch_in_progress.store(value, Ordering::Release);
    }

    pub fn set_still_initialising(&self, value: bool) {
        self.still_initialising.store(value, Ordering::Release);
    }

    pub fn set_in_exec(&self, value: bool) {
        self.in_exec.store(value, Ordering::Release);
    }

    pub fn set_in_notify(&self, value: bool) {
        self.in_notify.store(value, Ordering::Release);
    }

    #[must_use]
    pub fn in_exec(&self) -> bool {
        self.in_exec.load(Ordering::Acquire)
    }
}

pub struct Sched<S: Strategy> {
    strategy: S,
    current: Pid,
    pub switch_block: SwitchBlock,
}

impl<S: Strategy> Sched<S> {
    #[must_use]
    pub const fn new(strategy: S, init_pid: Pid) -> Self {
        Self { strategy, current: init_pid, switch_block: SwitchBlock::new() }
    }

    #[must_use]
    pub fn current(&self) -> Pid {
        self.current
    }

    /// Switches to the init process; does not return on success.
    pub fn start(
        &mut self,
        table: &mut ProcTable,
        regs: &mut RegisterSnapshot,
        stack: &mut StackSnapshot,
    ) -> Result<(), KernelError> {
        self.switch_block.set_still_initialising(false);
        table.swap_in(self.current, regs, stack)
    }

    /// Chooses the next runnable process. If it is the currently active
    /// one, does nothing; otherwise saves the outgoing process and
    /// installs the incoming one. An empty table is a shutdown condition.
    pub fn next_proc(
        &mut self,
        table: &mut ProcTable,
        regs: &mut RegisterSnapshot,
        stack: &mut StackSnapshot,
    ) -> Result<(), KernelError> {
        let Some(next) = self.strategy.pick_next(table, self.current) else {
            crate::qemu::exit_qemu(crate::qemu::QemuExitCode::Failed);
        };
        if next == self.current {
            return Ok(());
        }
        self.switch_block.set_switch_in_progress(true);
        table.swap_out(self.current, regs, stack)?;
        table.swap_in(next, regs, stack)?;
        self.current = next;
        self.switch_block.set_switch_in_progress(false);
        Ok(())
    }

    /// Unconditionally clears every switch-block flag and re-enters the
    /// dispatcher via a software interrupt so the normal save path
    /// captures the caller's current register state.
    pub fn yield_now(&self) {
        self.switch_block.clear_all();
        unsafe {
            core::arch::asm!("int 0x20", options(nomem, nostack));
        }
    }

    pub fn set_current(&mut self, pid: Pid) {
        self.current = pid;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::pdt::Pdt;
    use crate::process::{Process, Status};

    fn with_status(status: Status) -> Process {
        let mut process = Process::new(Pdt::new().expect("allocating a test Pdt"), 0);
        process.status = status;
        process
    }

    #[test_case]
    fn round_robin_skips_sleeping_processes_and_wraps() {
        let mut table = ProcTable::new(1, 100);
        table.insert(1, with_status(Status::Active));
        table.insert(2, with_status(Status::Sleeping));
        table.insert(3, with_status(Status::Runnable));

        assert_eq!(RoundRobin.pick_next(&table, 1), Some(3));
        assert_eq!(RoundRobin.pick_next(&table, 3), Some(1));
    }

    #[test_case]
    fn round_robin_returns_none_when_nothing_is_runnable() {
        let mut table = ProcTable::new(1, 100);
        table.insert(1, with_status(Status::Sleeping));
        assert_eq!(RoundRobin.pick_next(&table, 1), None);
    }
}
