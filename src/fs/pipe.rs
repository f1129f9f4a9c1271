// src/fs/pipe.rs
//! An in-memory pipe: a shared byte ring between one reader and one
//! writer end, each its own `FileDescriptor`.

use alloc::collections::VecDeque;
use alloc::sync::Arc;

use spin::Mutex;

use crate::errors::FsError;
use crate::fs::{FileDescriptor, POLLIN, POLLOUT};

struct Pipe {
    buffer: VecDeque<u8>,
    write_closed: bool,
}

impl Pipe {
    const fn new() -> Self {
        Self { buffer: VecDeque::new(), write_closed: false }
    }
}

pub struct PipeReader {
    pipe: Arc<Mutex<Pipe>>,
}

pub struct PipeWriter {
    pipe: Arc<Mutex<Pipe>>,
}

/// Creates a connected reader/writer pair sharing one buffer.
#[must_use]
pub fn new_pipe() -> (PipeReader, PipeWriter) {
    let pipe = Arc::new(Mutex::new(Pipe::new()));
    (PipeReader { pipe: pipe.clone() }, PipeWriter { pipe })
}

impl FileDescriptor for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        let mut pipe = self.pipe.lock();
        if pipe.buffer.is_empty() {
            if pipe.write_closed {
                return Ok(0);
            }
            return Err(FsError::WouldBlock);
        }
        let n = buf.len().min(pipe.buffer.len());
        for slot in buf.iter_mut().take(n) {
            *slot = pipe.buffer.pop_front().expect("checked non-empty above");
        }
        Ok(n)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize, FsError> {
        Err(FsError::InvalidInput)
    }

    fn close(&mut self) {}

    fn poll(&mut self, events: u8) -> u8 {
        let pipe = self.pipe.lock();
        let mut revents = 0;
        if events & POLLIN != 0 && (!pipe.buffer.is_empty() || pipe.write_closed) {
            revents |= POLLIN;
        }
        revents
    }
}

impl FileDescriptor for PipeWriter {
    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, FsError> {
        Err(FsError::InvalidInput)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, FsError> {
        if Arc::strong_count(&self.pipe) == 1 {
            return Err(FsError::BrokenPipe);
        }
        let mut pipe = self.pipe.lock();
        pipe.buffer.extend(buf.iter().copied());
        Ok(buf.len())
    }

    fn close(&mut self) {
        self.pipe.lock().write_closed = true;
    }

    fn poll(&mut self, events: u8) -> u8 {
        let mut revents = 0;
        if events & POLLOUT != 0 {
            revents |= POLLOUT;
        }
        revents
    }
}
