// src/syscall/mod.rs
//! Dispatch table and verb implementations for the vector-0x80 syscall
//! gate. Every verb is range-checked against user memory before use and
//! collapses any internal `KernelError` into the ABI's `-1`.

use alloc::string::String;
use alloc::vec::Vec;

use crate::arch::x86::idt::{RegisterSnapshot, StackSnapshot};
use crate::errors::{FsError, KernelError, ProcessError, SyscallError};
use crate::fs::{FileDescriptor, FILE_TABLE, POLLIN, POLLOUT};
use crate::kernel::KERNEL;
use crate::mm::KERNEL_VIRTUAL_BASE;
use crate::process::{Process, Status};
use crate::signal::PollInput;

pub const SYS_EXIT: u32 = 1;
pub const SYS_FORK: u32 = 2;
pub const SYS_READ: u32 = 3;
pub const SYS_WRITE: u32 = 4;
pub const SYS_OPEN: u32 = 5;
pub const SYS_CLOSE: u32 = 6;
pub const SYS_WAIT: u32 = 7;
pub const SYS_UNLINK: u32 = 10;
pub const SYS_EXECVE: u32 = 11;
pub const SYS_GETPID: u32 = 20;
pub const SYS_YIELD: u32 = 158;

pub const OPEN_RDONLY: u32 = 1;
pub const OPEN_WRONLY: u32 = 2;
pub const OPEN_RDWR: u32 = 3;
pub const OPEN_APPEND: u32 = 4;
pub const OPEN_TRUNC: u32 = 8;

/// Bit pattern of the ABI's signed `-1` error value.
const ERROR: u32 = u32::MAX;

/// Entry point called by `common_interrupt_dispatch` for vector `0x80`.
/// Function index is in `eax`, arguments in `ebx`/`ecx`/`edx`; the return
/// value (written back into `eax` before `iret`) is the result here.
pub fn dispatch(regs: &mut RegisterSnapshot, stack: &mut StackSnapshot) -> u32 {
    let index = regs.eax;
    let a = regs.ebx;
    let b = regs.ecx;
    let c = regs.edx;

    if index == SYS_EXIT {
        return match sys_exit(a, regs, stack) {
            Ok(()) => unreachable!("a reaped or rescheduled process never returns here"),
            Err(e) => {
                log_failure(index, e);
                ERROR
            }
        };
    }
    if index == SYS_EXECVE {
        return match sys_execve(a, b, c, regs, stack) {
            Ok(()) => unreachable!("successful execve does not return to its caller"),
            Err(e) => {
                log_failure(index, e);
                ERROR
            }
        };
    }
    if index == SYS_YIELD {
        return sys_yield();
    }

    let result = match index {
        SYS_FORK => sys_fork(regs, stack),
        SYS_READ => sys_read(a, b, c),
        SYS_WRITE => sys_write(a, b, c),
        SYS_OPEN => sys_open(a, b, c),
        SYS_CLOSE => sys_close(a),
        SYS_WAIT => sys_wait(a, b, c),
        SYS_UNLINK => sys_unlink(a),
        SYS_GETPID => Ok(sys_getpid()),
        _ => Err(SyscallError::Unknown.into()),
    };

    match result {
        Ok(v) => v,
        Err(e) => {
            log_failure(index, e);
            ERROR
        }
    }
}

fn log_failure(index: u32, e: KernelError) {
    crate::debug_println!("syscall {} failed: {}", index, e);
}

/// A caller-supplied pointer argument must range-check strictly below
/// `kernel_virtual_base`.
fn check_user_range(addr: u32, len: u32) -> Result<(), KernelError> {
    let end = addr.checked_add(len).ok_or(SyscallError::InvalidPointer)?;
    if end >= KERNEL_VIRTUAL_BASE {
        return Err(SyscallError::InvalidPointer.into());
    }
    Ok(())
}

fn active_pid() -> Result<crate::process::Pid, KernelError> {
    let kernel = KERNEL.lock();
    let pid = kernel.scheduler.current();
    match kernel.proc_table.get(pid) {
        Some(p) if p.status == Status::Active => Ok(pid),
        _ => Err(SyscallError::NotActiveProcess.into()),
    }
}

fn user_slice<'a>(addr: u32, len: u32) -> Result<&'a [u8], KernelError> {
    check_user_range(addr, len)?;
    Ok(unsafe { core::slice::from_raw_parts(addr as *const u8, len as usize) })
}

fn user_slice_mut<'a>(addr: u32, len: u32) -> Result<&'a mut [u8], KernelError> {
    check_user_range(addr, len)?;
    Ok(unsafe { core::slice::from_raw_parts_mut(addr as *mut u8, len as usize) })
}

/// Copies a NUL-terminated path out of user memory into an owned `String`.
fn user_path(addr: u32) -> Result<String, KernelError> {
    const MAX_PATH: u32 = 256;
    check_user_range(addr, MAX_PATH)?;
    let mut bytes = Vec::new();
    for i in 0..MAX_PATH {
        let byte = unsafe { *((addr + i) as *const u8) };
        if byte == 0 {
            break;
        }
        bytes.push(byte);
    }
    String::from_utf8(bytes).map_err(|_| SyscallError::InvalidArgument.into())
}

fn sys_fork(regs: &mut RegisterSnapshot, stack: &mut StackSnapshot) -> Result<u32, KernelError> {
    let mut kernel = KERNEL.lock();
    let parent_pid = kernel.scheduler.current();

    kernel
        .proc_table
        .get_mut(parent_pid)
        .ok_or(ProcessError::NotFound)?
        .registers = *regs;
    kernel
        .proc_table
        .get_mut(parent_pid)
        .ok_or(ProcessError::NotFound)?
        .stack = *stack;

    let child_pid = kernel.proc_table.allocate_pid()?;
    let kernel_stack_top = crate::kernel::alloc_kernel_stack()?;

    let mut child = {
        let parent = kernel.proc_table.get(parent_pid).ok_or(ProcessError::NotFound)?;
        Process::fork_duplicate(parent, kernel_stack_top)?
    };
    child.registers.eax = 0;
    child.ppid = parent_pid;

    kernel.proc_table.insert(child_pid, child);
    kernel
        .proc_table
        .get_mut(parent_pid)
        .ok_or(ProcessError::NotFound)?
        .children
        .push(child_pid);

    Ok(child_pid)
}

/// Terminates the calling process with `status`. Closes every fd it still
/// holds, frees its user address space, re-parents live children to the
/// init process, and wakes a waiting parent (or queues the event for a
/// later `wait`) before picking the next process to run in its place.
fn sys_exit(status: u32, regs: &mut RegisterSnapshot, stack: &mut StackSnapshot) -> Result<(), KernelError> {
    let mut guard = KERNEL.lock();
    let kernel = &mut *guard;
    let pid = kernel.scheduler.current();

    let fd_keys: Vec<u32> = {
        let process = kernel.proc_table.get_mut(pid).ok_or(ProcessError::NotFound)?;
        process.status = Status::Zombie;
        process.exit_status = status as i32;
        process.fds.values().copied().collect()
    };
    for key in fd_keys {
        FILE_TABLE.lock().close_file(key);
    }

    {
        let process = kernel.proc_table.get_mut(pid).ok_or(ProcessError::NotFound)?;
        process.fds.clear();
        process.pdt.clean_user_space(crate::process::USER_SPACE_END);
    }

    let init_pid = kernel.proc_table.init_pid();
    let children = kernel.proc_table.get(pid).ok_or(ProcessError::NotFound)?.children.clone();
    for child in children {
        if let Some(c) = kernel.proc_table.get_mut(child) {
            c.ppid = init_pid;
        }
        if init_pid != pid {
            if let Some(init) = kernel.proc_table.get_mut(init_pid) {
                init.children.push(child);
            }
        }
    }

    kernel.signal.notify_wait(pid, status as i32, &mut kernel.proc_table, &kernel.scheduler);

    kernel.scheduler.next_proc(&mut kernel.proc_table, regs, stack)
}

fn sys_read(fd: u32, buf: u32, n: u32) -> Result<u32, KernelError> {
    let buf = user_slice_mut(buf, n)?;
    let pid = active_pid()?;
    let key = {
        let kernel = KERNEL.lock();
        kernel.proc_table.get(pid).ok_or(ProcessError::NotFound)?.get_fd_key(fd as i32)
    };
    if key == 0 {
        return Err(FsError::NotFound.into());
    }

    block_until_ready(pid, key, POLLIN)?;

    let descriptor = FILE_TABLE.lock().get(key).ok_or(FsError::NotFound)?;
    let n = descriptor.lock().read(buf).or_else(|e| {
        if e == FsError::WouldBlock {
            Ok(0)
        } else {
            Err(e)
        }
    })?;
    Ok(n as u32)
}

fn sys_write(fd: u32, buf: u32, n: u32) -> Result<u32, KernelError> {
    let buf = user_slice(buf, n)?;
    let pid = active_pid()?;
    let key = {
        let kernel = KERNEL.lock();
        kernel.proc_table.get(pid).ok_or(ProcessError::NotFound)?.get_fd_key(fd as i32)
    };
    if key == 0 {
        return Err(FsError::NotFound.into());
    }

    block_until_ready(pid, key, POLLOUT)?;

    let descriptor = FILE_TABLE.lock().get(key).ok_or(FsError::NotFound)?;
    let n = descriptor.lock().write(buf)?;
    Ok(n as u32)
}

/// Blocks the caller, via the signal manager's poll list, until `key` is
/// ready for `events`. Used internally by `read`/`write`; not a syscall
/// verb of its own.
fn block_until_ready(pid: crate::process::Pid, key: u32, events: u8) -> Result<(), KernelError> {
    let input = [PollInput { fd_key: key, requested: events }];
    loop {
        let mut revents = [0u8];
        let ready = {
            let kernel = KERNEL.lock();
            kernel.signal.check_immediate(&input, &mut revents)
        };
        if ready.is_some() {
            return Ok(());
        }
        {
            let mut kernel = KERNEL.lock();
            let scheduler = &kernel.scheduler;
            kernel
                .signal
                .register_polls(pid, &input, -1, &mut kernel.proc_table, scheduler)?;
        }
        KERNEL.lock().scheduler.yield_now();
        let mut out = [0u8];
        let satisfied = KERNEL.lock().signal.collect_polls(pid, &mut out);
        if satisfied > 0 {
            return Ok(());
        }
    }
}

fn sys_open(path: u32, flags: u32, mode: u32) -> Result<u32, KernelError> {
    let path = user_path(path)?;
    let pid = active_pid()?;
    let descriptor = crate::fs::vfs::VFS.lock().open(&path, flags, mode)?;
    let key = FILE_TABLE.lock().open_file(descriptor);
    let mut kernel = KERNEL.lock();
    let process = kernel.proc_table.get_mut(pid).ok_or(ProcessError::NotFound)?;
    let fd = lowest_free_fd(process);
    process.fds.insert(fd, key);
    Ok(fd as u32)
}

fn lowest_free_fd(process: &Process) -> i32 {
    let mut candidate = 0;
    while process.fds.contains_key(&candidate) {
        candidate += 1;
    }
    candidate
}

fn sys_close(fd: u32) -> Result<u32, KernelError> {
    let pid = active_pid()?;
    let mut kernel = KERNEL.lock();
    let process = kernel.proc_table.get_mut(pid).ok_or(ProcessError::NotFound)?;
    let key = process.fds.remove(&(fd as i32)).ok_or(FsError::NotFound)?;
    FILE_TABLE.lock().close_file(key);
    Ok(0)
}

fn sys_wait(pid_arg: u32, wstatus: u32, _opts: u32) -> Result<u32, KernelError> {
    let pid = active_pid()?;
    if wstatus != 0 {
        check_user_range(wstatus, 4)?;
    }

    let outcome = loop {
        let result = {
            let mut kernel = KERNEL.lock();
            let scheduler = &kernel.scheduler;
            kernel.signal.waitpid(pid, pid_arg as i32, &mut kernel.proc_table, scheduler)
        };
        match result? {
            crate::signal::WaitOutcome::Immediate { pid: child, status } => break (child, status),
            crate::signal::WaitOutcome::Pending => {
                KERNEL.lock().scheduler.yield_now();
                if let Some((child, status)) = KERNEL.lock().signal.collect_wait(pid) {
                    break (child, status);
                }
            }
        }
    };

    let (child_pid, status) = outcome;
    if wstatus != 0 {
        let out = user_slice_mut(wstatus, 4)?;
        out.copy_from_slice(&status.to_ne_bytes());
    }

    let mut kernel = KERNEL.lock();
    if let Some(reaped) = kernel.proc_table.remove(child_pid) {
        crate::kernel::free_kernel_stack(reaped.kernel_stack_top);
    }
    kernel.signal.purge_process(child_pid);
    if let Some(parent) = kernel.proc_table.get_mut(pid) {
        parent.children.retain(|&c| c != child_pid);
    }

    Ok(child_pid)
}

fn sys_unlink(path: u32) -> Result<u32, KernelError> {
    let path = user_path(path)?;
    crate::fs::vfs::VFS.lock().unlink(&path)?;
    Ok(0)
}

fn sys_execve(
    path: u32,
    _argv: u32,
    _envp: u32,
    regs: &mut RegisterSnapshot,
    stack: &mut StackSnapshot,
) -> Result<(), KernelError> {
    let path = user_path(path)?;
    let pid = active_pid()?;

    KERNEL.lock().scheduler.switch_block.set_in_exec(true);
    let result = do_execve(pid, &path, regs, stack);
    KERNEL.lock().scheduler.switch_block.set_in_exec(false);
    result
}

fn do_execve(
    pid: crate::process::Pid,
    path: &str,
    regs: &mut RegisterSnapshot,
    stack: &mut StackSnapshot,
) -> Result<(), KernelError> {
    use crate::process::USER_SPACE_END;

    let descriptor = crate::fs::vfs::VFS.lock().open(path, OPEN_RDONLY, 0)?;
    let mut image_buf = Vec::new();
    {
        let mut descriptor = descriptor.lock();
        let mut chunk = [0u8; 512];
        loop {
            match descriptor.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => image_buf.extend_from_slice(&chunk[..n]),
                Err(FsError::WouldBlock) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        descriptor.close();
    }

    // Built and loaded entirely off to the side: the old process's address
    // space is left untouched until the new image is known-good, so a
    // failed execve needs no restore step.
    let mut new_pdt = crate::kernel::new_user_pdt()?;
    let entry = crate::process::elf::load(&mut new_pdt, &image_buf)?;

    {
        let mut kernel = KERNEL.lock();
        kernel.proc_table.get_mut(pid).ok_or(ProcessError::NotFound)?.pdt.clean_user_space(USER_SPACE_END);
    }

    // The kernel is still running on the old process's kernel stack at this
    // point, so it is carried over rather than freed: `exec_duplicate` keeps
    // using the same physical frame under the same PID instead of handing
    // out a fresh one that would just leak when the old `Process` is
    // replaced below.
    let mut new_process = {
        let kernel = KERNEL.lock();
        let old = kernel.proc_table.get(pid).ok_or(ProcessError::NotFound)?;
        Process::exec_duplicate(old, new_pdt, old.kernel_stack_top)
    };
    new_process.set_user_stack(crate::mm::PAGE_SIZE)?;
    new_process.registers = crate::process::switch::initial_register_snapshot();
    new_process.stack =
        crate::process::switch::initial_stack_snapshot(entry.as_u32(), new_process.stack_bottom.as_u32());

    let mut kernel = KERNEL.lock();
    kernel.proc_table.insert(pid, new_process);
    kernel.proc_table.swap_in(pid, regs, stack)?;
    Ok(())
}

fn sys_getpid() -> u32 {
    KERNEL.lock().scheduler.current()
}

fn sys_yield() -> u32 {
    KERNEL.lock().scheduler.yield_now();
    0
}
