// src/arch/x86/boot.rs
//! Multiboot-1 header and the `_start` trampoline GRUB jumps to directly,
//! in 32-bit protected mode with paging still off.
//!
//! Builds just enough paging — two 4 MiB PSE pages mapping the same
//! physical frame 0 at both virtual address 0 (the identity window the
//! trampoline itself is still executing under once `CR0.PG` flips) and at
//! `KERNEL_VIRTUAL_BASE` (where the linker actually placed `.text`) — that
//! a direct `call kernel_main` into a symbol linked at its higher-half
//! address resolves immediately. No separate jump-to-higher-half step is
//! needed: `_start` keeps running at an address both mappings agree on, so
//! the `call`'s absolute high-half target is already valid the instant
//! paging turns on. The PDT built here is throwaway — `kernel_main` builds
//! and installs the real one, covering all usable RAM, during boot.

use core::arch::global_asm;

const MULTIBOOT_MAGIC: u32 = 0x1BAD_B002;
const MULTIBOOT_FLAG_ALIGN: u32 = 1 << 0;
const MULTIBOOT_FLAG_MEMINFO: u32 = 1 << 1;
const MULTIBOOT_FLAGS: u32 = MULTIBOOT_FLAG_ALIGN | MULTIBOOT_FLAG_MEMINFO;
const MULTIBOOT_CHECKSUM: u32 = 0u32
    .wrapping_sub(MULTIBOOT_MAGIC)
    .wrapping_sub(MULTIBOOT_FLAGS);

global_asm!(
    ".section .multiboot, \"a\"",
    ".align 4",
    ".long {magic}",
    ".long {flags}",
    ".long {checksum}",
    magic = const MULTIBOOT_MAGIC,
    flags = const MULTIBOOT_FLAGS,
    checksum = const MULTIBOOT_CHECKSUM,
);

global_asm!(
    r#"
.section .boot.bss, "aw"
.align 4096
.global boot_pdt
boot_pdt:
    .skip 4096
.align 16
boot_stack_bottom:
    .skip 65536
boot_stack_top:

.section .boot.text, "ax"
.global _start
_start:
    cli

    lea edi, [boot_pdt]
    mov dword ptr [edi], 0x00000083            # PDE0: frame 0, present|writable|PS
    mov dword ptr [edi + 768*4], 0x00000083    # PDE768: same frame, high window

    mov eax, cr4
    or eax, 0x10                               # CR4.PSE
    mov cr4, eax

    mov cr3, edi

    mov eax, cr0
    or eax, 0x80000000                         # CR0.PG
    mov cr0, eax

    lea esp, [boot_stack_top]
    push ebx                                   # multiboot info pointer, from GRUB
    call kernel_main

.hang:
    hlt
    jmp .hang
"#,
);
