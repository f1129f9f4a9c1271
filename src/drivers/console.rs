// src/drivers/console.rs
//! Console stdio device: keyboard input queued by `drivers::keyboard`,
//! output written straight to the VGA console and mirrored to the serial
//! debug log. Pre-opened as fd 0/1/2 for the init process so `read`/`write`
//! on the standard descriptors mean something from the first instruction.

use alloc::collections::VecDeque;

use spin::Mutex;

use crate::errors::FsError;
use crate::fs::{FileDescriptor, POLLIN, POLLOUT};

const INPUT_CAPACITY: usize = 256;

static INPUT: Mutex<VecDeque<u8>> = Mutex::new(VecDeque::new());

/// Called by the keyboard interrupt handler for each decoded character.
/// A full buffer silently drops further input rather than blocking inside
/// interrupt context.
pub fn push_input(ch: char) {
    let mut encoded = [0u8; 4];
    let bytes = ch.encode_utf8(&mut encoded).as_bytes();
    let mut input = INPUT.lock();
    if input.len() + bytes.len() <= INPUT_CAPACITY {
        input.extend(bytes.iter().copied());
    }
}

pub struct Console;

impl FileDescriptor for Console {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        let mut input = INPUT.lock();
        if input.is_empty() {
            return Err(FsError::WouldBlock);
        }
        let mut n = 0;
        while n < buf.len() {
            let Some(byte) = input.pop_front() else { break };
            buf[n] = byte;
            n += 1;
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, FsError> {
        let s = core::str::from_utf8(buf).map_err(|_| FsError::InvalidInput)?;
        crate::drivers::vga::print(format_args!("{s}"));
        crate::debug_print!("{}", s);
        Ok(buf.len())
    }

    fn close(&mut self) {}

    fn poll(&mut self, events: u8) -> u8 {
        let mut revents = 0;
        if events & POLLIN != 0 && !INPUT.lock().is_empty() {
            revents |= POLLIN;
        }
        if events & POLLOUT != 0 {
            revents |= POLLOUT;
        }
        revents
    }
}
