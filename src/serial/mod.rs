// src/serial/mod.rs
//! COM1 UART driver backing `debug_print!`/`debug_println!`. Polled, 8N1 at
//! 38400 baud, FIFO enabled. Kept distinct from `panic.rs`'s raw
//! single-byte fallback in `arch::x86::qemu::write_debug_byte`, which
//! exists specifically to avoid taking this module's lock on the panic
//! path.

use core::fmt::{self, Write};
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::arch::x86::port::Port;

const SERIAL_IO_PORT: u16 = 0x3F8;

mod register_offset {
    pub const DATA: u16 = 0;
    pub const INTERRUPT_ENABLE: u16 = 1;
    pub const FIFO_CONTROL: u16 = 2;
    pub const LINE_CONTROL: u16 = 3;
    pub const MODEM_CONTROL: u16 = 4;
    pub const LINE_STATUS: u16 = 5;
}

mod line_control {
    pub const DLAB_ENABLE: u8 = 0x80;
    pub const CONFIG_8N1: u8 = 0x03;
}

mod line_status {
    pub const TRANSMIT_EMPTY: u8 = 0x20;
}

const FIFO_ENABLE_AND_CLEAR: u8 = 0xC7;
const MODEM_ENABLE_IRQ_RTS_DSR: u8 = 0x0B;

/// 115200 / 38400.
const BAUD_RATE_DIVISOR: u16 = 3;

static DATA: Mutex<Port<u8>> = Mutex::new(Port::new(SERIAL_IO_PORT + register_offset::DATA));
static LINE_STATUS: Mutex<Port<u8>> =
    Mutex::new(Port::new(SERIAL_IO_PORT + register_offset::LINE_STATUS));
static READY: AtomicBool = AtomicBool::new(false);

/// Programs the UART. Called once during boot; safe to call more than
/// once, each call just reprograms the same registers.
pub fn init() {
    unsafe {
        let mut interrupt_enable: Port<u8> = Port::new(SERIAL_IO_PORT + register_offset::INTERRUPT_ENABLE);
        let mut fifo: Port<u8> = Port::new(SERIAL_IO_PORT + register_offset::FIFO_CONTROL);
        let mut line_control: Port<u8> = Port::new(SERIAL_IO_PORT + register_offset::LINE_CONTROL);
        let mut modem_control: Port<u8> = Port::new(SERIAL_IO_PORT + register_offset::MODEM_CONTROL);
        let mut data = DATA.lock();

        interrupt_enable.write(0x00);

        line_control.write(line_control::DLAB_ENABLE);
        data.write((BAUD_RATE_DIVISOR & 0xFF) as u8);
        interrupt_enable.write((BAUD_RATE_DIVISOR >> 8) as u8);
        line_control.write(line_control::CONFIG_8N1);

        fifo.write(FIFO_ENABLE_AND_CLEAR);
        modem_control.write(MODEM_ENABLE_IRQ_RTS_DSR);
    }
    READY.store(true, Ordering::Release);
}

fn wait_transmit_empty() {
    while unsafe { LINE_STATUS.lock().read() } & line_status::TRANSMIT_EMPTY == 0 {
        core::hint::spin_loop();
    }
}

fn write_byte(byte: u8) {
    if !READY.load(Ordering::Acquire) {
        return;
    }
    wait_transmit_empty();
    unsafe {
        DATA.lock().write(byte);
    }
}

pub fn write_str(s: &str) {
    for byte in s.bytes() {
        write_byte(byte);
    }
}

pub struct SerialWriter;

impl Write for SerialWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        write_str(s);
        Ok(())
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments<'_>) {
    let _ = SerialWriter.write_fmt(args);
}

#[macro_export]
macro_rules! debug_print {
    ($($arg:tt)*) => ({
        $crate::serial::_print(format_args!($($arg)*));
    });
}

#[macro_export]
macro_rules! debug_println {
    () => ($crate::debug_print!("\n"));
    ($fmt:expr) => ($crate::debug_print!(concat!($fmt, "\n")));
    ($fmt:expr, $($arg:tt)*) => ($crate::debug_print!(concat!($fmt, "\n"), $($arg)*));
}
