// src/process/table.rs
//! PID -> Process map with incremental-search allocation and wraparound.

use alloc::collections::BTreeMap;

use crate::arch::x86::gdt;
use crate::arch::x86::idt::{RegisterSnapshot, StackSnapshot};
use crate::errors::{KernelError, ProcessError};
use crate::process::{Pid, Process, Status};

pub struct ProcTable {
    processes: BTreeMap<Pid, Process>,
    last_pid: Pid,
    init_pid: Pid,
    max_pid: Pid,
}

impl ProcTable {
    #[must_use]
    pub fn new(init_pid: Pid, max_pid: Pid) -> Self {
        Self {
            processes: BTreeMap::new(),
            last_pid: init_pid,
            init_pid,
            max_pid,
        }
    }

    #[must_use]
    pub fn init_pid(&self) -> Pid {
        self.init_pid
    }

    /// Incremental search starting one past the last issued PID, wrapping
    /// at `max_pid` back to one past `init_pid`.
    pub fn allocate_pid(&mut self) -> Result<Pid, KernelError> {
        let start = self.last_pid;
        let mut candidate = start;
        loop {
            candidate = if candidate + 1 >= self.max_pid {
                self.init_pid + 1
            } else {
                candidate + 1
            };
            if !self.processes.contains_key(&candidate) {
                self.last_pid = candidate;
                return Ok(candidate);
            }
            if candidate == start {
                return Err(ProcessError::TableFull.into());
            }
        }
    }

    pub fn insert(&mut self, pid: Pid, process: Process) {
        self.processes.insert(pid, process);
    }

    #[must_use]
    pub fn get(&self, pid: Pid) -> Option<&Process> {
        self.processes.get(&pid)
    }

    #[must_use]
    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.processes.get_mut(&pid)
    }

    pub fn remove(&mut self, pid: Pid) -> Option<Process> {
        self.processes.remove(&pid)
    }

    #[must_use]
    pub fn contains(&self, pid: Pid) -> bool {
        self.processes.contains_key(&pid)
    }

    /// Iterates live PIDs in ascending order, starting one past `from` and
    /// wrapping — the order the round-robin scheduler walks in.
    pub fn pids_from(&self, from: Pid) -> impl Iterator<Item = Pid> + '_ {
        let after = self.processes.range((core::ops::Bound::Excluded(from), core::ops::Bound::Unbounded));
        let before = self.processes.range(..=from);
        after.chain(before).map(|(&pid, _)| pid)
    }

    /// Installs `pid`'s PDT and copies its saved registers/stack into the
    /// live interrupt frame so the scheduler's caller resumes as that
    /// process. Requires the process be runnable or already active.
    pub fn swap_in(
        &mut self,
        pid: Pid,
        regs: &mut RegisterSnapshot,
        stack: &mut StackSnapshot,
    ) -> Result<(), KernelError> {
        let process = self.processes.get_mut(&pid).ok_or(ProcessError::NotFound)?;
        match process.status {
            Status::Runnable | Status::Active => {
                process.status = Status::Active;
                process.pdt.load();
                gdt::set_kernel_stack(process.kernel_stack_top);
                *regs = process.registers;
                *stack = process.stack;
                Ok(())
            }
            _ => Err(ProcessError::NotFound.into()),
        }
    }

    /// Saves the live interrupt frame into `pid`'s process and transitions
    /// active -> runnable, unless something else (e.g. a blocking `poll`)
    /// already moved it to sleeping in the meantime. Looks the PID up and
    /// bails cleanly on a miss rather than indexing blindly.
    pub fn swap_out(
        &mut self,
        pid: Pid,
        regs: &RegisterSnapshot,
        stack: &StackSnapshot,
    ) -> Result<(), KernelError> {
        let process = self.processes.get_mut(&pid).ok_or(ProcessError::NotFound)?;
        process.registers = *regs;
        process.stack = *stack;
        if process.status == Status::Active {
            process.status = Status::Runnable;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::pdt::Pdt;

    /// A real `Process` backed by a freshly allocated `Pdt`. Building one
    /// actually touches the frame allocator, which is fine here: these
    /// `#[test_case]` functions run inside a booted test kernel image with
    /// `FRAME_ALLOCATOR` already initialized, not on the host.
    fn dummy_process() -> Process {
        Process::new(Pdt::new().expect("allocating a test Pdt"), 0)
    }

    #[test_case]
    fn allocate_pid_skips_occupied_slots() {
        let mut table = ProcTable::new(1, 10);
        table.insert(2, dummy_process());
        let pid = table.allocate_pid().unwrap();
        assert_eq!(pid, 3);
    }

    #[test_case]
    fn allocate_pid_wraps_past_max_back_to_init_plus_one() {
        let mut table = ProcTable::new(1, 4);
        table.last_pid = 3;
        let pid = table.allocate_pid().unwrap();
        assert_eq!(pid, 2);
    }

    #[test_case]
    fn allocate_pid_errors_once_every_slot_is_taken() {
        let mut table = ProcTable::new(1, 3);
        table.insert(2, dummy_process());
        assert!(table.allocate_pid().is_err());
    }

    #[test_case]
    fn pids_from_wraps_in_ascending_order_starting_after_from() {
        let mut table = ProcTable::new(1, 100);
        for pid in [2, 5, 7] {
            table.insert(pid, dummy_process());
        }
        let order: alloc::vec::Vec<_> = table.pids_from(5).collect();
        assert_eq!(order, alloc::vec![7, 2, 5]);
    }
}
