//! Interrupt Descriptor Table and the common interrupt entry.
//!
//! Every vector funnels through one assembly stub per vector (pushing a
//! vector number, since the CPU does not) into a single Rust dispatcher.
//! That dispatcher builds the two value objects the design calls for — a
//! [`RegisterSnapshot`] of the general-purpose registers the stub just
//! pushed, and a [`StackSnapshot`] of what the CPU itself pushed (error
//! code, EIP, CS, EFLAGS, and ESP/SS when a privilege change occurred) —
//! dispatches on the vector, and returns a 32-bit value the stub writes
//! back into the saved EAX slot before `iret`. This is how a syscall's
//! return value gets back into user space: the syscall handler's return
//! value IS the interrupt dispatcher's return value.

use crate::arch::x86::gdt;
use core::arch::{asm, global_asm};
use lazy_static::lazy_static;
use x86::dtables::{self, DescriptorTablePointer};
use x86::Ring;

const IDT_ENTRIES: usize = 256;

pub const VECTOR_INVALID_OPCODE: u32 = 6;
pub const VECTOR_DOUBLE_FAULT: u32 = 8;
pub const VECTOR_GENERAL_PROTECTION: u32 = 13;
pub const VECTOR_PAGE_FAULT: u32 = 14;
pub const VECTOR_TIMER: u32 = 32;
pub const VECTOR_KEYBOARD: u32 = 33;
pub const VECTOR_ATA_PRIMARY: u32 = crate::arch::x86::pic::SLAVE_OFFSET as u32 + 6;
pub const VECTOR_ATA_SECONDARY: u32 = crate::arch::x86::pic::SLAVE_OFFSET as u32 + 7;
pub const VECTOR_SYSCALL: u32 = 0x80;

/// General-purpose registers, frozen at the moment the common stub trapped.
/// Field order matches `pushad` so the assembly side stays a single
/// instruction pair for the bulk of the save/restore.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct RegisterSnapshot {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp_dummy: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
}

/// What the CPU itself pushed: present for every vector, with `error_code`
/// zeroed by the stub for vectors that don't have a hardware error code.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct StackSnapshot {
    pub error_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub user_esp: u32,
    pub user_ss: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

impl IdtEntry {
    const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            zero: 0,
            type_attr: 0,
            offset_high: 0,
        }
    }

    fn new(handler: u32, selector: u16, dpl: Ring, gate_is_trap: bool) -> Self {
        let type_attr = 0x80 /* present */
            | ((dpl as u8) << 5)
            | if gate_is_trap { 0x0F } else { 0x0E };
        Self {
            offset_low: (handler & 0xFFFF) as u16,
            selector,
            zero: 0,
            type_attr,
            offset_high: (handler >> 16) as u16,
        }
    }
}

struct Idt {
    entries: [IdtEntry; IDT_ENTRIES],
}

impl Idt {
    fn pointer(&self) -> DescriptorTablePointer<IdtEntry> {
        DescriptorTablePointer::new(&self.entries)
    }
}

macro_rules! stub_addr {
    ($name:ident) => {{
        unsafe extern "C" {
            fn $name();
        }
        $name as usize as u32
    }};
}

lazy_static! {
    static ref IDT: Idt = {
        let mut entries = [IdtEntry::missing(); IDT_ENTRIES];
        let code = gdt::selectors().kernel_code.bits();

        macro_rules! set {
            ($vector:expr, $stub:ident, $dpl:expr) => {
                entries[$vector as usize] = IdtEntry::new(stub_addr!($stub), code, $dpl, false);
            };
        }

        set!(VECTOR_INVALID_OPCODE, isr_stub_invalid_opcode, Ring::Ring0);
        set!(VECTOR_DOUBLE_FAULT, isr_stub_double_fault, Ring::Ring0);
        set!(VECTOR_GENERAL_PROTECTION, isr_stub_gpf, Ring::Ring0);
        set!(VECTOR_PAGE_FAULT, isr_stub_page_fault, Ring::Ring0);
        set!(VECTOR_TIMER, isr_stub_timer, Ring::Ring0);
        set!(VECTOR_KEYBOARD, isr_stub_keyboard, Ring::Ring0);
        set!(VECTOR_ATA_PRIMARY, isr_stub_ata_primary, Ring::Ring0);
        set!(VECTOR_ATA_SECONDARY, isr_stub_ata_secondary, Ring::Ring0);
        // Syscall gate is reachable from ring 3, and is a trap gate so the
        // handler runs with the caller's EFLAGS.IF preserved.
        entries[VECTOR_SYSCALL as usize] =
            IdtEntry::new(stub_addr!(isr_stub_syscall), code, Ring::Ring3, true);

        Idt { entries }
    };
}

pub fn init() {
    let pointer = IDT.pointer();
    unsafe {
        dtables::lidt(&pointer);
    }
}

/// Called by every `isr_stub_*` after it has pushed a [`RegisterSnapshot`]
/// and the stub tail has located the [`StackSnapshot`]. Returns the value
/// the stub writes back into EAX before `iret` — used by the syscall path
/// to deliver a return value, ignored by every other vector.
#[unsafe(no_mangle)]
extern "C" fn common_interrupt_dispatch(
    vector: u32,
    regs: &mut RegisterSnapshot,
    stack: &mut StackSnapshot,
) -> u32 {
    match vector {
        VECTOR_INVALID_OPCODE | VECTOR_GENERAL_PROTECTION => {
            crate::panic::fatal_interrupt("invalid opcode or general protection fault", vector, stack.eip)
        }
        VECTOR_DOUBLE_FAULT => {
            crate::panic::fatal_interrupt("double fault", vector, stack.eip)
        }
        VECTOR_PAGE_FAULT => {
            let fault_addr = read_cr2();
            crate::kernel::handle_page_fault(fault_addr, stack.error_code, stack.eip);
            0
        }
        VECTOR_TIMER => {
            crate::kernel::on_timer_tick(regs, stack);
            unsafe {
                crate::arch::x86::pic::PICS
                    .lock()
                    .notify_end_of_interrupt(VECTOR_TIMER as u8);
            }
            0
        }
        VECTOR_KEYBOARD => {
            crate::drivers::keyboard::on_interrupt();
            unsafe {
                crate::arch::x86::pic::PICS
                    .lock()
                    .notify_end_of_interrupt(VECTOR_KEYBOARD as u8);
            }
            0
        }
        VECTOR_ATA_PRIMARY | VECTOR_ATA_SECONDARY => {
            crate::drivers::ata::on_interrupt(vector == VECTOR_ATA_PRIMARY);
            unsafe {
                crate::arch::x86::pic::PICS
                    .lock()
                    .notify_end_of_interrupt_checked(vector as u8);
            }
            0
        }
        VECTOR_SYSCALL => crate::syscall::dispatch(regs, stack),
        _ => {
            unsafe {
                crate::arch::x86::pic::PICS
                    .lock()
                    .notify_end_of_interrupt_checked(vector as u8);
            }
            0
        }
    }
}

fn read_cr2() -> u32 {
    let value: u32;
    unsafe {
        asm!("mov {}, cr2", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value
}

/// One stub per vector: pushes a dummy error code for vectors that don't
/// have one, pushes the vector number, then falls into the shared tail that
/// saves GP registers, calls the Rust dispatcher, restores EAX from its
/// return value, and `iret`s.
macro_rules! isr_stub {
    ($name:literal, $vector:literal, has_error_code: $has_err:literal) => {
        concat!(
            ".global ",
            $name,
            "\n",
            $name,
            ":\n",
            if $has_err { "" } else { "push 0\n" },
            "push ",
            $vector,
            "\n",
            "jmp isr_common_tail\n",
        )
    };
}

global_asm!(
    isr_stub!("isr_stub_invalid_opcode", "6", has_error_code: false),
    isr_stub!("isr_stub_double_fault", "8", has_error_code: true),
    isr_stub!("isr_stub_gpf", "13", has_error_code: true),
    isr_stub!("isr_stub_page_fault", "14", has_error_code: true),
    isr_stub!("isr_stub_timer", "32", has_error_code: false),
    isr_stub!("isr_stub_keyboard", "33", has_error_code: false),
    isr_stub!("isr_stub_ata_primary", "46", has_error_code: false),
    isr_stub!("isr_stub_ata_secondary", "47", has_error_code: false),
    isr_stub!("isr_stub_syscall", "128", has_error_code: false),
    r#"
.global isr_common_tail
isr_common_tail:
    pushad
    lea eax, [esp + 32]       # &StackSnapshot: right past the pushad image
    push eax
    mov eax, [esp + 4 + 32]   # vector dword, pushed before pushad and the ptr above
    push eax
    lea eax, [esp + 8]        # &mut RegisterSnapshot: the pushad image itself
    push eax
    call common_interrupt_dispatch
    add esp, 12
    mov [esp + 28], eax       # overwrite saved EAX slot inside the pushad image
    popad
    add esp, 8                # drop vector number and error code
    iretd

.global enter_user_mode
enter_user_mode:
    mov ecx, [esp + 4]        # &RegisterSnapshot
    mov edx, [esp + 8]        # &StackSnapshot
    push dword ptr [edx + 20] # user_ss
    push dword ptr [edx + 16] # user_esp
    push dword ptr [edx + 12] # eflags
    push dword ptr [edx + 8]  # cs
    push dword ptr [edx + 4]  # eip
    push dword ptr [ecx + 28] # eax
    push dword ptr [ecx + 24] # ecx
    push dword ptr [ecx + 20] # edx
    push dword ptr [ecx + 16] # ebx
    push dword ptr [ecx + 12] # esp_dummy, discarded by popad
    push dword ptr [ecx + 8]  # ebp
    push dword ptr [ecx + 4]  # esi
    push dword ptr [ecx + 0]  # edi
    popad
    iretd
"#,
);

unsafe extern "C" {
    fn enter_user_mode(regs: *const RegisterSnapshot, stack: *const StackSnapshot) -> !;
}

/// Builds the same stack shape `isr_common_tail`'s epilogue expects —
/// a pushad image followed by an `iret` frame — from scratch and jumps
/// into it. Used once, to hand off to the very first process: every later
/// transition into user space rides an actual interrupt and goes through
/// `isr_common_tail` itself.
pub fn enter_first_process(regs: &RegisterSnapshot, stack: &StackSnapshot) -> ! {
    unsafe { enter_user_mode(regs, stack) }
}
