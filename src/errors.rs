// src/errors.rs
//! Unified kernel error type.
//!
//! `KernelError` aggregates one leaf enum per subsystem so internal
//! `Result<T, KernelError>` plumbing can use `?` across subsystem
//! boundaries (mm -> process -> syscall, signal -> syscall, etc). It
//! carries no heap allocation — every payload is `Copy` and every message
//! is a `&'static str` — because a `KernelError` must remain constructible
//! on the heap-exhaustion panic path (see `panic.rs`).
//!
//! This is strictly a kernel-internal concern: the syscall layer collapses
//! any `Err(KernelError)` it receives into the ABI's `-1`, logging the
//! `Display` output through the serial sink first.

use core::fmt;

/// Top-level kernel error: one variant per subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelError {
    kind: ErrorKind,
    context: Option<&'static str>,
}

impl KernelError {
    #[inline]
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self { kind, context: None }
    }

    #[inline]
    #[must_use]
    pub const fn with_context(kind: ErrorKind, context: &'static str) -> Self {
        Self { kind, context: Some(context) }
    }

    #[inline]
    #[must_use]
    pub const fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    #[inline]
    #[must_use]
    pub const fn context(&self) -> Option<&'static str> {
        self.context
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(ctx) = self.context {
            write!(f, " ({ctx})")?;
        }
        Ok(())
    }
}

/// One variant per kernel subsystem, mirroring the component table in
/// section 2 of the design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Memory(MemoryError),
    Process(ProcessError),
    Syscall(SyscallError),
    Disk(DiskIoError),
    Scheduler(SchedulerError),
    Signal(SignalError),
    Fs(FsError),
    Arch(ArchError),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Memory(e) => write!(f, "memory error: {e}"),
            ErrorKind::Process(e) => write!(f, "process error: {e}"),
            ErrorKind::Syscall(e) => write!(f, "syscall error: {e}"),
            ErrorKind::Disk(e) => write!(f, "disk error: {e}"),
            ErrorKind::Scheduler(e) => write!(f, "scheduler error: {e}"),
            ErrorKind::Signal(e) => write!(f, "signal error: {e}"),
            ErrorKind::Fs(e) => write!(f, "fs error: {e}"),
            ErrorKind::Arch(e) => write!(f, "arch error: {e}"),
        }
    }
}

macro_rules! leaf_error {
    ($name:ident { $($variant:ident => $msg:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($variant),+
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let msg = match self {
                    $(Self::$variant => $msg),+
                };
                f.write_str(msg)
            }
        }
    };
}

leaf_error!(MemoryError {
    OutOfMemory => "out of physical memory",
    InvalidAddress => "address is not validly mapped",
    MisalignedAccess => "misaligned address",
    AlreadyMapped => "virtual page already mapped",
    NotMapped => "virtual page not mapped",
    FrameAllocationFailed => "frame allocation failed",
});

leaf_error!(ProcessError {
    NotFound => "no such process",
    TableFull => "process table exhausted its PID range",
    NoSuchChild => "pid is not a child of the caller",
    AddressSpaceFailure => "failed to build address space",
    StackCollision => "stack growth would collide with another mapping",
});

leaf_error!(SyscallError {
    InvalidPointer => "user pointer out of range",
    InvalidArgument => "invalid syscall argument",
    NotActiveProcess => "caller is not the active process",
    Unknown => "unknown syscall number",
});

/// Disk I/O status, modeled as the design's `DiskIoError` enum: includes
/// `Success` since ATA operations return this directly rather than a
/// `Result`, matching the source's status-code convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskIoError {
    Success,
    BadAlignment,
    BadSize,
    ReadOnly,
    HardwareFault,
    NoDevice,
    BadDriver,
}

impl DiskIoError {
    #[inline]
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, DiskIoError::Success)
    }

    /// Convert to a `Result`, collapsing `Success` to `Ok(())`.
    #[inline]
    pub const fn into_result(self) -> Result<(), DiskIoError> {
        match self {
            DiskIoError::Success => Ok(()),
            other => Err(other),
        }
    }
}

impl fmt::Display for DiskIoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            DiskIoError::Success => "success",
            DiskIoError::BadAlignment => "offset or size not sector-aligned",
            DiskIoError::BadSize => "size not a whole number of sectors, or too large for one command",
            DiskIoError::ReadOnly => "device is read-only",
            DiskIoError::HardwareFault => "controller reported an error status",
            DiskIoError::NoDevice => "no such device",
            DiskIoError::BadDriver => "device exists but is not ATA",
        };
        f.write_str(msg)
    }
}

leaf_error!(SchedulerError {
    NoRunnableProcess => "process table has no runnable process",
    InvalidPid => "pid does not name a live process",
});

leaf_error!(SignalError {
    NoCandidateChildren => "pid is not a child of the caller",
    DuplicateWait => "caller already has an outstanding waitpid",
    NotFound => "no matching poll or wait entry",
});

leaf_error!(FsError {
    NotFound => "no such global file-table key",
    BrokenPipe => "the peer end of this pipe is gone",
    WouldBlock => "operation would block",
    InvalidInput => "invalid argument to file operation",
    TableFull => "file-description table exhausted",
});

leaf_error!(ArchError {
    InvalidOpcode => "invalid opcode",
    GeneralProtectionFault => "general protection fault",
    DoubleFault => "double fault",
    UnhandledPageFault => "unhandled page fault",
});

macro_rules! impl_from_leaf {
    ($leaf:ty, $variant:ident) => {
        impl From<$leaf> for KernelError {
            #[inline]
            fn from(e: $leaf) -> Self {
                KernelError::new(ErrorKind::$variant(e))
            }
        }
    };
}

impl_from_leaf!(MemoryError, Memory);
impl_from_leaf!(ProcessError, Process);
impl_from_leaf!(SyscallError, Syscall);
impl_from_leaf!(DiskIoError, Disk);
impl_from_leaf!(SchedulerError, Scheduler);
impl_from_leaf!(SignalError, Signal);
impl_from_leaf!(FsError, Fs);
impl_from_leaf!(ArchError, Arch);

impl From<ErrorKind> for KernelError {
    #[inline]
    fn from(kind: ErrorKind) -> Self {
        KernelError::new(kind)
    }
}

/// Kernel-internal result type used across subsystem boundaries.
pub type KernelResult<T> = Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test_case]
    fn leaf_errors_convert_into_kernel_error_through_their_own_variant() {
        let err: KernelError = MemoryError::OutOfMemory.into();
        assert_eq!(err.kind(), &ErrorKind::Memory(MemoryError::OutOfMemory));
    }

    #[test_case]
    fn display_appends_context_in_parentheses_when_present() {
        let err = KernelError::with_context(ErrorKind::Fs(FsError::NotFound), "opening /bin/shell");
        assert_eq!(err.to_string(), "fs error: no such global file-table key (opening /bin/shell)");
    }

    #[test_case]
    fn display_omits_the_parenthetical_without_context() {
        let err = KernelError::new(ErrorKind::Process(ProcessError::NotFound));
        assert_eq!(err.to_string(), "process error: no such process");
    }
}
