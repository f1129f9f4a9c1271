// src/process/mod.rs
//! Process: owns a PDT, the register/stack snapshots the scheduler swaps
//! through the interrupt frame, and everything `fork`/`execve`/`wait` need.

pub mod elf;
pub mod switch;
pub mod table;

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::arch::x86::idt::{RegisterSnapshot, StackSnapshot};
use crate::errors::{KernelError, ProcessError};
use crate::fs::FILE_TABLE;
use crate::mm::pdt::Pdt;
use crate::mm::types::VirtAddr;

pub type Pid = u32;

/// Top of user address space; also the fixed top of every process's user
/// stack, which grows downward from here.
pub const USER_SPACE_END: VirtAddr = VirtAddr::new(crate::mm::KERNEL_VIRTUAL_BASE);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Invalid,
    Runnable,
    Active,
    Sleeping,
    Zombie,
}

pub struct Process {
    pub pdt: Pdt,
    pub registers: RegisterSnapshot,
    pub stack: StackSnapshot,
    pub status: Status,
    pub fds: BTreeMap<i32, u32>,
    pub ppid: Pid,
    pub children: Vec<Pid>,
    pub exit_status: i32,
    /// Top of this process's kernel-mode stack, installed into the TSS's
    /// `esp0` on every `swap_in`.
    pub kernel_stack_top: u32,
    /// Lowest currently-mapped address of the user stack; it grows
    /// downward toward this from `USER_SPACE_END`.
    pub stack_bottom: VirtAddr,
}

impl Process {
    #[must_use]
    pub fn new(pdt: Pdt, kernel_stack_top: u32) -> Self {
        Self {
            pdt,
            registers: RegisterSnapshot::default(),
            stack: StackSnapshot::default(),
            status: Status::Invalid,
            fds: BTreeMap::new(),
            ppid: 0,
            children: Vec::new(),
            exit_status: 0,
            kernel_stack_top,
            stack_bottom: USER_SPACE_END,
        }
    }

    /// Copies register/stack snapshots and the fd map (bumping global
    /// reference counts) and duplicates the parent's user address space.
    /// Caller still must clear the child's EAX and set its PPID/PID.
    pub fn fork_duplicate(parent: &Process, kernel_stack_top: u32) -> Result<Self, KernelError> {
        let pdt = parent.pdt.duplicate_user_space(USER_SPACE_END)?;
        let mut fds = BTreeMap::new();
        {
            let mut table = FILE_TABLE.lock();
            for (&fd, &key) in &parent.fds {
                table.copy_file(key);
                fds.insert(fd, key);
            }
        }
        Ok(Self {
            pdt,
            registers: parent.registers,
            stack: parent.stack,
            status: Status::Runnable,
            fds,
            ppid: 0,
            children: Vec::new(),
            exit_status: 0,
            kernel_stack_top,
            stack_bottom: parent.stack_bottom,
        })
    }

    /// Copies the fd map, PPID, and child list from the process being
    /// replaced; `pdt` is a freshly built address space for the new image.
    #[must_use]
    pub fn exec_duplicate(old: &Process, pdt: Pdt, kernel_stack_top: u32) -> Self {
        Self {
            pdt,
            registers: RegisterSnapshot::default(),
            stack: StackSnapshot::default(),
            status: Status::Runnable,
            fds: old.fds.clone(),
            ppid: old.ppid,
            children: old.children.clone(),
            exit_status: 0,
            kernel_stack_top,
            stack_bottom: USER_SPACE_END,
        }
    }

    /// Grows the user stack downward to `new_size` bytes. Fails if that
    /// would collide with another mapping or run the machine out of
    /// physical memory.
    pub fn set_user_stack(&mut self, new_size: usize) -> Result<(), KernelError> {
        let new_bottom = USER_SPACE_END
            .checked_sub(new_size)
            .ok_or(ProcessError::StackCollision)?;
        if new_bottom >= self.stack_bottom {
            return Ok(());
        }
        let mut page = new_bottom.align_down(crate::mm::PAGE_SIZE);
        while page < self.stack_bottom {
            self.pdt
                .allocate(
                    page,
                    crate::mm::pt::flags::PRESENT
                        | crate::mm::pt::flags::WRITABLE
                        | crate::mm::pt::flags::USER,
                    None,
                    false,
                )
                .map_err(|_| ProcessError::StackCollision)?;
            page = page + crate::mm::PAGE_SIZE;
        }
        self.stack_bottom = new_bottom;
        Ok(())
    }

    /// Resolves a small per-process fd to a global file-table key. `0`
    /// means "no such fd".
    #[must_use]
    pub fn get_fd_key(&self, fd: i32) -> u32 {
        self.fds.get(&fd).copied().unwrap_or(0)
    }
}
