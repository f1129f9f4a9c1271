// src/main.rs
//! The real entry point is `_start` in `arch::x86::boot`, reached directly
//! by GRUB per `ENTRY(_start)` in `linker.ld` before Rust's normal startup
//! machinery would even apply. This crate exists only so Cargo has a
//! `[[bin]]` target to link `pike_os` into a freestanding ELF image.

#![no_std]
#![no_main]

use pike_os as _;
