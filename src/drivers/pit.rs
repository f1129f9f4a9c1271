// src/drivers/pit.rs
//! Programmable Interval Timer (8253/8254), channel 0 wired to IRQ0. Drives
//! the preemption tick and the signal manager's poll-timeout countdown.

use crate::arch::x86::port::Port;
use crate::arch::x86::pic::PICS;

const PIT_FREQUENCY_HZ: u32 = 1_193_182;
const CHANNEL0_DATA: u16 = 0x40;
const COMMAND: u16 = 0x43;

/// Channel 0, access mode lobyte/hibyte, mode 3 (square wave), binary.
const COMMAND_BYTE: u8 = 0b0011_0110;

/// Milliseconds between ticks at [`TICK_HZ`].
pub const TICK_HZ: u32 = 100;
pub const MS_PER_TICK: i32 = (1000 / TICK_HZ) as i32;

/// Programs channel 0 for `TICK_HZ` and unmasks IRQ0. Called once during
/// boot, after the PIC itself has been initialized.
pub fn init() {
    let divisor = (PIT_FREQUENCY_HZ / TICK_HZ) as u16;
    unsafe {
        let mut command: Port<u8> = Port::new(COMMAND);
        command.write(COMMAND_BYTE);

        let mut data: Port<u8> = Port::new(CHANNEL0_DATA);
        data.write((divisor & 0xFF) as u8);
        data.write((divisor >> 8) as u8);

        PICS.lock().unmask_irq(0);
    }
}
