// src/arch/x86/qemu.rs

use crate::arch::x86::port::Port;

/// Write the exit code to QEMU's `isa-debug-exit` port, used by the
/// integration tests under `tests/` to report pass/fail without a human at
/// the console.
pub fn exit_qemu(code: u32) {
    unsafe {
        let mut port = Port::<u32>::new(0xF4);
        port.write(code);
    }
}

/// Write a single byte to the serial debug port (COM1), used as a last
/// resort inside the panic handler before the heap or a `Mutex` can be
/// trusted.
pub fn write_debug_byte(byte: u8) {
    unsafe {
        let mut port = Port::<u8>::new(0x3F8);
        port.write(byte);
    }
}
