// src/drivers/vga.rs
//! VGA text-mode console: 80x25, 16-color, writing straight into the text
//! buffer at physical `0xB8000` through the kernel's identity-mapped low
//! window. Used for user-facing output and as `panic.rs`'s best-effort
//! second sink after the serial port.

use core::fmt;

use spin::{Mutex, MutexGuard};

use crate::mm::types::PhysAddr;

const VGA_WIDTH: usize = 80;
const VGA_HEIGHT: usize = 25;
const VGA_PHYS: u32 = 0xB_8000;

#[repr(u8)]
#[derive(Debug, Clone, Copy)]
#[allow(dead_code)]
pub enum Color {
    Black = 0,
    Blue = 1,
    Green = 2,
    Cyan = 3,
    Red = 4,
    Magenta = 5,
    Brown = 6,
    LightGray = 7,
    DarkGray = 8,
    LightBlue = 9,
    LightGreen = 10,
    LightCyan = 11,
    LightRed = 12,
    Pink = 13,
    Yellow = 14,
    White = 15,
}

#[derive(Clone, Copy)]
struct ColorCode(u8);

impl ColorCode {
    const fn new(fg: Color, bg: Color) -> Self {
        Self(((bg as u8) << 4) | fg as u8)
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
struct ScreenChar {
    ascii: u8,
    color: u8,
}

struct VgaConsole {
    col: usize,
    row: usize,
    color: ColorCode,
}

impl VgaConsole {
    const fn new() -> Self {
        Self { col: 0, row: 0, color: ColorCode::new(Color::LightGray, Color::Black) }
    }

    /// Text buffer as seen through the kernel's identity-mapped low window;
    /// valid as soon as the boot trampoline's paging is live, well before
    /// the PDT or heap exist.
    fn buffer(&self) -> *mut ScreenChar {
        unsafe { crate::mm::phys_to_kernel_virt(PhysAddr::new(VGA_PHYS)).as_mut_ptr::<ScreenChar>() }
    }

    fn write_byte(&mut self, byte: u8) {
        if byte == b'\n' {
            self.new_line();
            return;
        }
        if self.col >= VGA_WIDTH {
            self.new_line();
        }
        let (row, col) = (self.row, self.col);
        unsafe {
            self.buffer()
                .add(row * VGA_WIDTH + col)
                .write_volatile(ScreenChar { ascii: byte, color: self.color.0 });
        }
        self.col += 1;
    }

    fn new_line(&mut self) {
        self.col = 0;
        if self.row + 1 >= VGA_HEIGHT {
            self.scroll();
        } else {
            self.row += 1;
        }
    }

    fn scroll(&mut self) {
        let buf = self.buffer();
        unsafe {
            for row in 1..VGA_HEIGHT {
                for col in 0..VGA_WIDTH {
                    let c = buf.add(row * VGA_WIDTH + col).read_volatile();
                    buf.add((row - 1) * VGA_WIDTH + col).write_volatile(c);
                }
            }
            let blank = ScreenChar { ascii: b' ', color: self.color.0 };
            for col in 0..VGA_WIDTH {
                buf.add((VGA_HEIGHT - 1) * VGA_WIDTH + col).write_volatile(blank);
            }
        }
    }

    fn clear(&mut self) {
        for _ in 0..VGA_HEIGHT {
            self.new_line();
        }
        self.row = 0;
        self.col = 0;
    }
}

impl fmt::Write for VgaConsole {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            match byte {
                0x20..=0x7E | b'\n' => self.write_byte(byte),
                _ => self.write_byte(0xFE),
            }
        }
        Ok(())
    }
}

static CONSOLE: Mutex<VgaConsole> = Mutex::new(VgaConsole::new());

/// Clears the screen. Called once during boot, after paging is live but
/// before anything else has a reason to write to the console.
pub fn init() {
    CONSOLE.lock().clear();
}

pub fn print(args: fmt::Arguments<'_>) {
    use fmt::Write;
    let _ = CONSOLE.lock().write_fmt(args);
}

struct ConsoleGuard(MutexGuard<'static, VgaConsole>);

impl fmt::Write for ConsoleGuard {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s)
    }
}

/// Non-blocking: the panic path cannot afford to deadlock on a console lock
/// some other fault left held, so a contended lock just yields no sink
/// rather than spinning.
pub fn try_console() -> Option<impl fmt::Write + 'static> {
    CONSOLE.try_lock().map(ConsoleGuard)
}
