//! Process management API.

use crate::syscall;

pub fn exit(code: i32) -> ! {
    syscall::exit(code)
}

pub fn getpid() -> u32 {
    syscall::getpid()
}

/// Returns `0` in the child, the child's pid in the parent.
pub fn fork() -> Result<u32, ()> {
    syscall::fork()
}

/// Replaces the calling process's image; does not return on success.
pub fn execve(path: &str) -> Result<(), ()> {
    syscall::execve(path)
}

/// Waits for `pid` (`-1` for any child) to exit, returning its pid.
pub fn wait(pid: i32, status: Option<&mut i32>) -> Result<u32, ()> {
    syscall::wait(pid, status)
}

pub fn yield_now() {
    syscall::yield_now()
}

/// fork + execve: spawns `path` as a child and returns its pid without
/// waiting for it.
pub fn spawn(path: &str) -> Result<u32, ()> {
    match fork()? {
        0 => {
            let _ = execve(path);
            exit(127)
        }
        child => Ok(child),
    }
}
