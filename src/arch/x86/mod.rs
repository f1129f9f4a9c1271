// src/arch/x86/mod.rs
//! 32-bit protected-mode x86 primitives: GDT/TSS, IDT, PIC, port I/O, and
//! the CPU flag/halt wrappers. Hardware drivers built on top of these
//! (serial UART, VGA text buffer, PS/2 keyboard, PIT, ATA) live under
//! `drivers/` and `serial/`, not here.

pub mod boot;
pub mod cpu;
pub mod gdt;
pub mod idt;
pub mod keyboard;
pub mod multiboot;
pub mod pic;
pub mod port;
pub mod qemu;

pub use cpu::{critical_section, read_timestamp, X86Cpu};
pub use gdt::init as init_gdt;
pub use idt::init as init_idt;
pub use pic::PICS;
pub use port::{Port, PortReadOnly, PortWriteOnly};
pub use qemu::write_debug_byte;
