// src/signal/mod.rs
//! SignalManager: poll/waitpid/notify/tick-down coordination over three
//! lists (pending polls, pending waits, happened-but-uncollected child
//! events).
//!
//! All four public operations disable switching by setting *in-notify* on
//! entry and clearing it on every return path, per section 4.8 — enforced
//! here with an RAII guard rather than by hand at each return.

use alloc::vec::Vec;

use crate::errors::{KernelError, SignalError};
use crate::fs::{FileDescriptor, FILE_TABLE, POLLNVAL};
use crate::process::table::ProcTable;
use crate::process::{Pid, Status};
use crate::sched::{Sched, Strategy};

/// One `pollfd` slot already resolved to a global file-table key (`0` if
/// the fd didn't resolve — reported back as `pollnval`).
#[derive(Clone, Copy)]
pub struct PollInput {
    pub fd_key: u32,
    pub requested: u8,
}

struct PollEntry {
    fd_key: u32,
    requested: u8,
    revents: u8,
    owner: Pid,
    timeout_ms: i32,
    slot: usize,
}

struct WaitRequest {
    owner: Pid,
    candidates: Vec<Pid>,
    satisfied_pid: Option<Pid>,
    status: i32,
}

struct HappenedEvent {
    pid: Pid,
    status: i32,
}

pub struct SignalManager {
    polls: Vec<PollEntry>,
    waits: Vec<WaitRequest>,
    happened: Vec<HappenedEvent>,
}

struct InNotifyGuard<'a, S: Strategy>(&'a Sched<S>);

impl<S: Strategy> Drop for InNotifyGuard<'_, S> {
    fn drop(&mut self) {
        self.0.switch_block.set_in_notify(false);
    }
}

impl<S: Strategy> InNotifyGuard<'_, S> {
    fn enter(sched: &Sched<S>) -> InNotifyGuard<'_, S> {
        sched.switch_block.set_in_notify(true);
        InNotifyGuard(sched)
    }
}

impl SignalManager {
    #[must_use]
    pub const fn new() -> Self {
        Self { polls: Vec::new(), waits: Vec::new(), happened: Vec::new() }
    }

    /// Checks immediate readiness for every entry; returns the count of
    /// satisfied descriptors and fills in `revents` when any are ready.
    /// Callers register the rest as pending only if this returns `None`.
    pub fn check_immediate(&self, inputs: &[PollInput], out_revents: &mut [u8]) -> Option<usize> {
        let mut any = false;
        for (input, revents) in inputs.iter().zip(out_revents.iter_mut()) {
            *revents = if input.fd_key == 0 {
                POLLNVAL
            } else if let Some(descriptor) = FILE_TABLE.lock().get(input.fd_key) {
                descriptor.lock().poll(input.requested)
            } else {
                POLLNVAL
            };
            if *revents != 0 {
                any = true;
            }
        }
        any.then(|| out_revents.iter().filter(|&&r| r != 0).count())
    }

    /// Registers one pending poll entry per still-unsatisfied input and
    /// marks the owner sleeping.
    pub fn register_polls<S: Strategy>(
        &mut self,
        owner: Pid,
        inputs: &[PollInput],
        timeout_ms: i32,
        table: &mut ProcTable,
        sched: &Sched<S>,
    ) -> Result<(), KernelError> {
        let _guard = InNotifyGuard::enter(sched);
        for (slot, input) in inputs.iter().enumerate() {
            if input.fd_key == 0 {
                continue;
            }
            self.polls.push(PollEntry {
                fd_key: input.fd_key,
                requested: input.requested,
                revents: 0,
                owner,
                timeout_ms,
                slot,
            });
        }
        table
            .get_mut(owner)
            .ok_or(crate::errors::ProcessError::NotFound)?
            .status = Status::Sleeping;
        Ok(())
    }

    /// Called on wake: collects and removes this owner's satisfied
    /// entries, writing `revents` back into `out_revents` by original
    /// slot. Returns the satisfied count (`0` => timeout).
    pub fn collect_polls(&mut self, owner: Pid, out_revents: &mut [u8]) -> usize {
        let mut count = 0;
        self.polls.retain(|entry| {
            if entry.owner != owner {
                return true;
            }
            if entry.revents != 0 {
                if let Some(slot) = out_revents.get_mut(entry.slot) {
                    *slot = entry.revents;
                }
                count += 1;
                false
            } else {
                false
            }
        });
        count
    }

    /// Scans pending polls for `dev`'s matching descriptor key; sets the
    /// intersected `revents` and wakes the owner if sleeping.
    pub fn notify_file<S: Strategy>(
        &mut self,
        fd_key: u32,
        events: u8,
        table: &mut ProcTable,
        sched: &Sched<S>,
    ) {
        let _guard = InNotifyGuard::enter(sched);
        for entry in &mut self.polls {
            if entry.fd_key != fd_key {
                continue;
            }
            let matched = entry.requested & events;
            if matched != 0 {
                entry.revents |= matched;
                if let Some(proc) = table.get_mut(entry.owner) {
                    if proc.status == Status::Sleeping {
                        proc.status = Status::Runnable;
                    }
                }
            }
        }
    }

    /// Decrements positive-timeout polls; wakes owners whose timeout
    /// crosses zero with `revents` left at zero (signalling timeout).
    pub fn tick_down<S: Strategy>(&mut self, ms: i32, table: &mut ProcTable, sched: &Sched<S>) {
        let _guard = InNotifyGuard::enter(sched);
        for entry in &mut self.polls {
            if entry.timeout_ms > 0 {
                entry.timeout_ms -= ms;
                if entry.timeout_ms <= 0 {
                    if let Some(proc) = table.get_mut(entry.owner) {
                        if proc.status == Status::Sleeping {
                            proc.status = Status::Runnable;
                        }
                    }
                }
            }
        }
    }

    /// Forms the candidate child set, checks already-happened events, or
    /// enqueues a new wait. A process may have at most one outstanding
    /// `waitpid`; a second concurrent call is rejected.
    pub fn waitpid<S: Strategy>(
        &mut self,
        owner: Pid,
        pid: i32,
        table: &mut ProcTable,
        sched: &Sched<S>,
    ) -> Result<WaitOutcome, KernelError> {
        let _guard = InNotifyGuard::enter(sched);

        if self.waits.iter().any(|w| w.owner == owner) {
            return Err(SignalError::DuplicateWait.into());
        }

        let children = table.get(owner).ok_or(crate::errors::ProcessError::NotFound)?.children.clone();
        let candidates: Vec<Pid> = if pid == -1 {
            children
        } else {
            let target = pid as Pid;
            if children.contains(&target) {
                alloc::vec![target]
            } else {
                Vec::new()
            }
        };
        if candidates.is_empty() {
            return Err(SignalError::NoCandidateChildren.into());
        }

        if let Some(index) = self
            .happened
            .iter()
            .position(|event| candidates.contains(&event.pid))
        {
            let event = self.happened.remove(index);
            return Ok(WaitOutcome::Immediate { pid: event.pid, status: event.status });
        }

        self.waits.push(WaitRequest { owner, candidates, satisfied_pid: None, status: 0 });
        table.get_mut(owner).ok_or(crate::errors::ProcessError::NotFound)?.status = Status::Sleeping;
        Ok(WaitOutcome::Pending)
    }

    /// Called on wake: finds this owner's satisfied wait, if any.
    pub fn collect_wait(&mut self, owner: Pid) -> Option<(Pid, i32)> {
        let index = self.waits.iter().position(|w| w.owner == owner && w.satisfied_pid.is_some())?;
        let wait = self.waits.remove(index);
        wait.satisfied_pid.map(|pid| (pid, wait.status))
    }

    /// Called by an exiting process: scans pending waits for one whose
    /// candidate set contains `pid`, copies `status` into its kernel-side
    /// slot, narrows the candidate set, and wakes the waiter. If none
    /// match, the event is queued as happened.
    pub fn notify_wait<S: Strategy>(
        &mut self,
        pid: Pid,
        status: i32,
        table: &mut ProcTable,
        sched: &Sched<S>,
    ) {
        let _guard = InNotifyGuard::enter(sched);
        if let Some(wait) = self.waits.iter_mut().find(|w| w.candidates.contains(&pid)) {
            wait.status = status;
            wait.candidates = alloc::vec![pid];
            wait.satisfied_pid = Some(pid);
            if let Some(proc) = table.get_mut(wait.owner) {
                if proc.status == Status::Sleeping {
                    proc.status = Status::Runnable;
                }
            }
            return;
        }
        self.happened.push(HappenedEvent { pid, status });
    }

    /// Removes every entry referring to `pid` across all three lists;
    /// called before a process is actually destroyed.
    pub fn purge_process(&mut self, pid: Pid) {
        self.polls.retain(|e| e.owner != pid && e.fd_key != 0);
        self.waits.retain(|w| w.owner != pid);
        for wait in &mut self.waits {
            wait.candidates.retain(|&c| c != pid);
        }
        self.happened.retain(|e| e.pid != pid);
    }
}

impl Default for SignalManager {
    fn default() -> Self {
        Self::new()
    }
}

pub enum WaitOutcome {
    Immediate { pid: Pid, status: i32 },
    Pending,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::pdt::Pdt;
    use crate::process::Process;
    use crate::sched::{RoundRobin, Sched};

    fn dummy_process() -> Process {
        Process::new(Pdt::new().expect("allocating a test Pdt"), 0)
    }

    #[test_case]
    fn waitpid_with_no_children_is_rejected() {
        let mut table = ProcTable::new(1, 100);
        table.insert(1, dummy_process());
        let sched = Sched::new(RoundRobin, 1);
        let mut signal = SignalManager::new();

        assert!(signal.waitpid(1, -1, &mut table, &sched).is_err());
    }

    #[test_case]
    fn notify_wait_before_waitpid_is_collected_as_an_immediate_result() {
        let mut table = ProcTable::new(1, 100);
        let mut parent = dummy_process();
        parent.children.push(2);
        table.insert(1, parent);
        table.insert(2, dummy_process());
        let sched = Sched::new(RoundRobin, 1);
        let mut signal = SignalManager::new();

        signal.notify_wait(2, 7, &mut table, &sched);
        match signal.waitpid(1, -1, &mut table, &sched).unwrap() {
            WaitOutcome::Immediate { pid, status } => {
                assert_eq!(pid, 2);
                assert_eq!(status, 7);
            }
            WaitOutcome::Pending => panic!("expected the already-happened exit to be picked up"),
        }
    }

    #[test_case]
    fn waitpid_then_notify_wakes_the_sleeping_owner() {
        let mut table = ProcTable::new(1, 100);
        let mut parent = dummy_process();
        parent.children.push(2);
        table.insert(1, parent);
        table.insert(2, dummy_process());
        let sched = Sched::new(RoundRobin, 1);
        let mut signal = SignalManager::new();

        assert!(matches!(signal.waitpid(1, -1, &mut table, &sched).unwrap(), WaitOutcome::Pending));
        assert_eq!(table.get(1).unwrap().status, Status::Sleeping);

        signal.notify_wait(2, 9, &mut table, &sched);
        assert_eq!(table.get(1).unwrap().status, Status::Runnable);
        assert_eq!(signal.collect_wait(1), Some((2, 9)));
    }

    #[test_case]
    fn a_second_concurrent_waitpid_from_the_same_owner_is_rejected() {
        let mut table = ProcTable::new(1, 100);
        let mut parent = dummy_process();
        parent.children.push(2);
        parent.children.push(3);
        table.insert(1, parent);
        table.insert(2, dummy_process());
        table.insert(3, dummy_process());
        let sched = Sched::new(RoundRobin, 1);
        let mut signal = SignalManager::new();

        assert!(matches!(signal.waitpid(1, -1, &mut table, &sched).unwrap(), WaitOutcome::Pending));
        assert!(matches!(signal.waitpid(1, -1, &mut table, &sched), Err(_)));
    }

    #[test_case]
    fn purge_process_drops_it_from_every_pending_wait() {
        let mut table = ProcTable::new(1, 100);
        let mut parent = dummy_process();
        parent.children.push(2);
        table.insert(1, parent);
        table.insert(2, dummy_process());
        let sched = Sched::new(RoundRobin, 1);
        let mut signal = SignalManager::new();

        signal.waitpid(1, -1, &mut table, &sched).unwrap();
        signal.purge_process(1);
        signal.notify_wait(2, 0, &mut table, &sched);
        assert_eq!(signal.collect_wait(1), None);
    }
}
