// src/kernel/mod.rs
//! Global kernel state and the boot sequence: `KERNEL_PDT` (the page
//! directory installed for kernel space), the `Kernel` bundle every
//! syscall verb reaches through as `KERNEL`, and `kernel_main` itself,
//! called once by the Multiboot trampoline in `arch::x86::boot`.

use alloc::sync::Arc;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::arch::x86::idt::{self, RegisterSnapshot, StackSnapshot};
use crate::arch::x86::multiboot::{self, BootInfo};
use crate::drivers::ata::DeviceId;
use crate::errors::KernelError;
use crate::fs::diskfs::DiskFs;
use crate::mm::frame::{UsableRange, FRAME_ALLOCATOR};
use crate::mm::pdt::Pdt;
use crate::mm::pt::flags;
use crate::mm::types::{LARGE_PAGE_SIZE, PAGE_SIZE};
use crate::mm::{self, phys_to_kernel_virt, KERNEL_VIRTUAL_BASE};
use crate::process::table::ProcTable;
use crate::process::{Pid, Process, Status};
use crate::sched::{RoundRobin, Sched};
use crate::signal::SignalManager;

/// PID of the first process started during boot.
pub const INIT_PID: Pid = 1;
/// Exclusive upper bound on allocatable PIDs.
pub const MAX_PID: Pid = 65536;

pub struct Kernel {
    pub proc_table: ProcTable,
    pub scheduler: Sched<RoundRobin>,
    pub signal: SignalManager,
}

lazy_static! {
    pub static ref KERNEL: Mutex<Kernel> = Mutex::new(Kernel {
        proc_table: ProcTable::new(INIT_PID, MAX_PID),
        scheduler: Sched::new(RoundRobin, INIT_PID),
        signal: SignalManager::new(),
    });

    /// The kernel half of every address space. `None` until `kernel_main`
    /// has built and installed it; every later `Pdt` clones its kernel-side
    /// PDEs out of this one.
    pub static ref KERNEL_PDT: Mutex<Option<Pdt>> = Mutex::new(None);
}

/// Builds a fresh user address space with the kernel's own half already
/// mapped in, so the first instruction fetched under its CR3 (still
/// running in kernel mode, before the `iret` into ring 3) does not fault.
pub fn new_user_pdt() -> Result<Pdt, KernelError> {
    let mut pdt = Pdt::new()?;
    let guard = KERNEL_PDT.lock();
    let kernel_pdt = guard.as_ref().expect("KERNEL_PDT is installed before any process is built");
    kernel_pdt.clone_kernel_space_into(&mut pdt, crate::mm::types::VirtAddr::new(KERNEL_VIRTUAL_BASE));
    Ok(pdt)
}

/// Hands out a single physical frame as a process's kernel-mode stack,
/// addressed through the identity-mapped low window rather than a
/// dedicated `Pdt::map` reservation — the same frame can be read or
/// freed by physical address alone, with no virtual bookkeeping to undo.
pub fn alloc_kernel_stack() -> Result<u32, KernelError> {
    let frame = FRAME_ALLOCATOR.lock().allocate()?;
    let base = phys_to_kernel_virt(frame.base());
    Ok(base.as_u32() + PAGE_SIZE as u32)
}

/// Returns a kernel-mode stack handed out by [`alloc_kernel_stack`] to the
/// frame allocator. Callers are responsible for making sure nothing is
/// still executing on it — a reaped zombie's stack is always safe to free
/// since only its (already descheduled) owner ever ran on it.
pub fn free_kernel_stack(top: u32) {
    let base = crate::mm::types::VirtAddr::new(top - PAGE_SIZE as u32);
    let phys = crate::mm::kernel_virt_to_phys(base);
    FRAME_ALLOCATOR.lock().free(crate::mm::frame::Frame::containing(phys));
}

/// This kernel has no demand paging; every page fault is fatal.
pub fn handle_page_fault(fault_addr: u32, error_code: u32, eip: u32) -> ! {
    crate::panic::fatal_page_fault(fault_addr, error_code, eip)
}

/// Called on every timer interrupt: counts down pending poll timeouts,
/// then hands off to the next runnable process unless something has the
/// switch block held (mid-syscall bookkeeping, boot still in progress).
pub fn on_timer_tick(regs: &mut RegisterSnapshot, stack: &mut StackSnapshot) {
    let mut kernel = KERNEL.lock();
    let Kernel { proc_table, scheduler, signal } = &mut *kernel;
    signal.tick_down(crate::drivers::pit::MS_PER_TICK, proc_table, scheduler);
    if scheduler.switch_block.all_clear() {
        let _ = scheduler.next_proc(proc_table, regs, stack);
    }
}

/// Splits `ranges` so that none of them overlap `[k_start, k_end)` — the
/// kernel's own physical footprint, which the Multiboot memory map has no
/// notion of and which must never be handed out by the frame allocator.
fn trim_kernel_image(ranges: &[UsableRange], k_start: u32, k_end: u32) -> ([UsableRange; 64], usize) {
    let mut out = [UsableRange { start: 0, end: 0 }; 64];
    let mut n = 0;
    for r in ranges {
        if n >= out.len() {
            break;
        }
        if r.end <= k_start || r.start >= k_end {
            out[n] = *r;
            n += 1;
            continue;
        }
        if r.start < k_start && n < out.len() {
            out[n] = UsableRange { start: r.start, end: k_start };
            n += 1;
        }
        if r.end > k_end && n < out.len() {
            out[n] = UsableRange { start: k_end, end: r.end };
            n += 1;
        }
    }
    (out, n)
}

fn align_up_large(bytes: u32) -> u32 {
    let large = LARGE_PAGE_SIZE as u32;
    bytes.div_ceil(large) * large
}

/// Reads the init program's ELF image straight out of the first
/// GRUB-supplied boot module. No compiled userland binary can be baked
/// into this kernel's own image (there is nowhere for one to come from at
/// this crate's build time), so the very first process's bytes always
/// arrive this way rather than through the VFS.
fn load_init_image(boot_info: &BootInfo) -> &'static [u8] {
    let module = boot_info.modules[..boot_info.module_count]
        .first()
        .expect("GRUB must supply the init program as the first boot module");
    let start = crate::mm::types::PhysAddr::new(module.start);
    let len = (module.end - module.start) as usize;
    unsafe { core::slice::from_raw_parts(phys_to_kernel_virt(start).as_ptr::<u8>(), len) }
}

/// Called once by `_start` with paging already on under the trampoline's
/// throwaway identity map. Brings up every subsystem in dependency order
/// and hands off to the init process; never returns.
///
/// In test builds this skips straight to the `#[test_case]` harness after
/// bringing up just enough of the machine (serial, GDT/IDT, the heap) for
/// the tests to run against; see `lib.rs`'s `test_runner`.
#[unsafe(no_mangle)]
pub extern "C" fn kernel_main(mb_info_phys: u32) -> ! {
    crate::serial::init();

    #[cfg(test)]
    {
        crate::arch::init_gdt();
        crate::arch::init_idt();
        let boot_info = multiboot::parse(mb_info_phys);
        let k_start = mm::kernel_physical_start_addr().as_u32();
        let k_end = mm::kernel_physical_end_addr().as_u32();
        let (trimmed, trimmed_len) = trim_kernel_image(&boot_info.ranges[..boot_info.range_count], k_start, k_end);
        FRAME_ALLOCATOR.lock().init(&trimmed[..trimmed_len]);
        unsafe {
            crate::ALLOCATOR.init(phys_to_kernel_virt(mm::kernel_physical_end_addr()));
        }
        crate::test_main();
        crate::exit_qemu(crate::QemuExitCode::Success);
    }

    #[cfg(not(test))]
    kernel_main_boot(mb_info_phys)
}

#[cfg(not(test))]
fn kernel_main_boot(mb_info_phys: u32) -> ! {
    crate::drivers::vga::init();
    crate::arch::init_gdt();

    let boot_info = multiboot::parse(mb_info_phys);

    let k_start = mm::kernel_physical_start_addr().as_u32();
    let k_end = mm::kernel_physical_end_addr().as_u32();
    let (trimmed, trimmed_len) = trim_kernel_image(&boot_info.ranges[..boot_info.range_count], k_start, k_end);
    FRAME_ALLOCATOR.lock().init(&trimmed[..trimmed_len]);

    let highest = trimmed[..trimmed_len].iter().map(|r| r.end).max().unwrap_or(k_end);
    let high_window_bytes = align_up_large(highest.max(k_end));

    // The new directory's own backing frame must come from the boot
    // trampoline's throwaway 4 MiB identity window (the only mapping live
    // right now), so it is built and zeroed before it is ever installed.
    let mut pdt = Pdt::new().expect("allocating the kernel page directory");
    pdt.map_large_identity_window(0, LARGE_PAGE_SIZE as u32, flags::PRESENT | flags::WRITABLE);
    pdt.map_large_identity_window(KERNEL_VIRTUAL_BASE, high_window_bytes, flags::PRESENT | flags::WRITABLE);
    pdt.load();
    *KERNEL_PDT.lock() = Some(pdt);

    unsafe {
        crate::ALLOCATOR.init(phys_to_kernel_virt(mm::kernel_physical_end_addr()));
    }

    crate::arch::init_idt();
    unsafe {
        crate::arch::PICS.lock().initialize();
    }
    crate::drivers::pit::init();
    crate::drivers::keyboard::init();
    crate::drivers::ata::init();

    crate::fs::vfs::VFS.lock().mount(DiskFs::mount(DeviceId { channel: 0, is_master: true }));

    let (stdin, stdout, stderr) = {
        let mut file_table = crate::fs::FILE_TABLE.lock();
        let open_console = |table: &mut crate::fs::FileTable| {
            table.open_file(Arc::new(Mutex::new(crate::drivers::console::Console)))
        };
        (open_console(&mut file_table), open_console(&mut file_table), open_console(&mut file_table))
    };

    let init_image = load_init_image(&boot_info);
    let kernel_stack_top = alloc_kernel_stack().expect("allocating init's kernel stack");
    let mut init_pdt = new_user_pdt().expect("building init's address space");
    let entry = crate::process::elf::load(&mut init_pdt, init_image).expect("loading the init ELF image");

    let mut process = Process::new(init_pdt, kernel_stack_top);
    process.set_user_stack(PAGE_SIZE).expect("mapping init's user stack");
    process.status = Status::Runnable;
    process.fds.insert(0, stdin);
    process.fds.insert(1, stdout);
    process.fds.insert(2, stderr);
    process.registers = crate::process::switch::initial_register_snapshot();
    process.stack =
        crate::process::switch::initial_stack_snapshot(entry.as_u32(), process.stack_bottom.as_u32());

    let mut regs = RegisterSnapshot::default();
    let mut stack = StackSnapshot::default();
    {
        let mut kernel = KERNEL.lock();
        kernel.proc_table.insert(INIT_PID, process);
        let Kernel { proc_table, scheduler, .. } = &mut *kernel;
        scheduler.start(proc_table, &mut regs, &mut stack).expect("starting the init process");
    }

    idt::enter_first_process(&regs, &stack)
}
