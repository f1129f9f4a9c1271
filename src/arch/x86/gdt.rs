//! Global Descriptor Table (GDT) and Task State Segment (TSS).
//!
//! Defines the four flat segments (kernel/user x code/data) plus one TSS
//! descriptor used only to hold `esp0`/`ss0` for the ring3->ring0 transition
//! on interrupt/syscall entry; protected mode still requires a TSS even
//! though this kernel does no hardware task-switching through it.

use lazy_static::lazy_static;
use spin::Mutex;
use x86::bits32::task::TaskStateSegment;
use x86::dtables::{self, DescriptorTablePointer};
use x86::segmentation::{
    BuildDescriptor, CodeSegmentType, DataSegmentType, Descriptor as SegDescriptor,
    DescriptorBuilder, SegmentDescriptorBuilder, SegmentSelector,
};
use x86::Ring;

const GDT_ENTRIES: usize = 6;

/// Flat GDT: null, kernel code, kernel data, user code, user data, TSS.
struct Gdt {
    table: [u64; GDT_ENTRIES],
}

impl Gdt {
    const fn new() -> Self {
        Self {
            table: [0; GDT_ENTRIES],
        }
    }

    fn set(&mut self, index: usize, descriptor: SegDescriptor) {
        self.table[index] = descriptor.as_u64();
    }

    fn pointer(&self) -> DescriptorTablePointer<u64> {
        DescriptorTablePointer::new(&self.table)
    }
}

pub struct Selectors {
    pub kernel_code: SegmentSelector,
    pub kernel_data: SegmentSelector,
    pub user_code: SegmentSelector,
    pub user_data: SegmentSelector,
    pub tss: SegmentSelector,
}

static mut TSS: TaskStateSegment = TaskStateSegment::new();

lazy_static! {
    static ref GDT_AND_SELECTORS: (Gdt, Selectors) = {
        let mut gdt = Gdt::new();

        let kernel_code = SegmentSelector::new(1, Ring::Ring0);
        let kernel_data = SegmentSelector::new(2, Ring::Ring0);
        let user_code = SegmentSelector::new(3, Ring::Ring3);
        let user_data = SegmentSelector::new(4, Ring::Ring3);
        let tss_selector = SegmentSelector::new(5, Ring::Ring0);

        gdt.set(
            1,
            DescriptorBuilder::code_descriptor(0, 0xFFFFF, CodeSegmentType::ExecuteRead)
                .present()
                .limit_granularity_4kb()
                .dpl(Ring::Ring0)
                .finish(),
        );
        gdt.set(
            2,
            DescriptorBuilder::data_descriptor(0, 0xFFFFF, DataSegmentType::ReadWrite)
                .present()
                .limit_granularity_4kb()
                .dpl(Ring::Ring0)
                .finish(),
        );
        gdt.set(
            3,
            DescriptorBuilder::code_descriptor(0, 0xFFFFF, CodeSegmentType::ExecuteRead)
                .present()
                .limit_granularity_4kb()
                .dpl(Ring::Ring3)
                .finish(),
        );
        gdt.set(
            4,
            DescriptorBuilder::data_descriptor(0, 0xFFFFF, DataSegmentType::ReadWrite)
                .present()
                .limit_granularity_4kb()
                .dpl(Ring::Ring3)
                .finish(),
        );

        let tss_ptr = core::ptr::addr_of!(TSS) as u32;
        let tss_size = core::mem::size_of::<TaskStateSegment>() as u32 - 1;
        gdt.set(
            5,
            DescriptorBuilder::tss_descriptor(tss_ptr, tss_size, true)
                .present()
                .dpl(Ring::Ring0)
                .finish(),
        );

        (
            gdt,
            Selectors {
                kernel_code,
                kernel_data,
                user_code,
                user_data,
                tss: tss_selector,
            },
        )
    };

    /// Current kernel stack top, mirrored here so other subsystems can read
    /// it without reaching into the TSS directly.
    pub static ref KERNEL_STACK_TOP: Mutex<u32> = Mutex::new(0);
}

pub fn selectors() -> &'static Selectors {
    &GDT_AND_SELECTORS.1
}

/// Update `esp0` in the TSS. Called by the scheduler on every switch-in so a
/// ring3->ring0 trap lands on the newly active process's kernel stack.
pub fn set_kernel_stack(top: u32) {
    *KERNEL_STACK_TOP.lock() = top;
    unsafe {
        let tss = &mut *core::ptr::addr_of_mut!(TSS);
        tss.esp0 = top;
        tss.ss0 = u32::from(selectors().kernel_data.bits());
    }
}

pub fn init() {
    unsafe {
        let tss = &mut *core::ptr::addr_of_mut!(TSS);
        tss.ss0 = u32::from(selectors().kernel_data.bits());
        tss.iomap_base = core::mem::size_of::<TaskStateSegment>() as u16;

        let pointer = GDT_AND_SELECTORS.0.pointer();
        dtables::lgdt(&pointer);

        x86::segmentation::load_cs(selectors().kernel_code);
        x86::segmentation::load_ds(selectors().kernel_data);
        x86::segmentation::load_es(selectors().kernel_data);
        x86::segmentation::load_ss(selectors().kernel_data);
        x86::segmentation::load_fs(selectors().kernel_data);
        x86::segmentation::load_gs(selectors().kernel_data);

        x86::task::load_tr(selectors().tss);
    }
}
