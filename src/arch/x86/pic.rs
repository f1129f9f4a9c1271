//! Programmable Interrupt Controller (8259 PIC), master/slave chained pair.
//!
//! Remapped to vectors 0x20-0x27 (master) / 0x28-0x2F (slave): timer at
//! master+0, keyboard at master+1, primary ATA at slave+6, secondary ATA
//! at slave+7.

use crate::arch::x86::port::{Port, PortWriteOnly};
use spin::Mutex;

const PIC1_COMMAND: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_COMMAND: u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;

const ICW1_INIT: u8 = 0x11;
const ICW4_8086: u8 = 0x01;
const PIC_EOI: u8 = 0x20;

/// OCW3 "read in-service register" command, used to distinguish a real
/// IRQ7/IRQ15 from a spurious one.
const OCW3_READ_ISR: u8 = 0x0B;

pub const MASTER_OFFSET: u8 = 0x20;
pub const SLAVE_OFFSET: u8 = 0x28;

pub struct ChainedPics {
    pics: [Pic; 2],
}

impl ChainedPics {
    #[must_use]
    pub const fn new(offset1: u8, offset2: u8) -> Self {
        Self {
            pics: [
                Pic {
                    offset: offset1,
                    command: PortWriteOnly::new(PIC1_COMMAND),
                    data: PortWriteOnly::new(PIC1_DATA),
                },
                Pic {
                    offset: offset2,
                    command: PortWriteOnly::new(PIC2_COMMAND),
                    data: PortWriteOnly::new(PIC2_DATA),
                },
            ],
        }
    }

    /// # Safety
    /// Must be called exactly once, before unmasking any IRQ.
    pub unsafe fn initialize(&mut self) {
        unsafe {
            let mut wait_port: PortWriteOnly<u8> = PortWriteOnly::new(0x80);
            let mut wait = || wait_port.write(0);

            self.pics[0].command.write(ICW1_INIT);
            wait();
            self.pics[1].command.write(ICW1_INIT);
            wait();

            self.pics[0].data.write(self.pics[0].offset);
            wait();
            self.pics[1].data.write(self.pics[1].offset);
            wait();

            self.pics[0].data.write(4);
            wait();
            self.pics[1].data.write(2);
            wait();

            self.pics[0].data.write(ICW4_8086);
            wait();
            self.pics[1].data.write(ICW4_8086);
            wait();

            // Mask everything initially; individual drivers unmask their own IRQ.
            self.pics[0].data.write(0xff);
            self.pics[1].data.write(0xff);
        }
    }

    /// Sends EOI(s) for a handled (non-spurious) interrupt, no spurious check.
    ///
    /// # Safety
    /// Must be called from interrupt context for the vector it reports.
    pub unsafe fn notify_end_of_interrupt(&mut self, interrupt_id: u8) {
        unsafe {
            if self.pics[1].handles_interrupt(interrupt_id) {
                self.pics[1].end_of_interrupt();
            }
            if self.handles_interrupt(interrupt_id) {
                self.pics[0].end_of_interrupt();
            }
        }
    }

    /// Checks IRQ7/IRQ15 in-service state before acknowledging: if master
    /// reports spurious, no EOI at all is sent; if slave reports spurious,
    /// EOI only goes to master.
    ///
    /// # Safety
    /// Must be called from interrupt context for the vector it reports.
    pub unsafe fn notify_end_of_interrupt_checked(&mut self, interrupt_id: u8) {
        unsafe {
            let from_slave = self.pics[1].handles_interrupt(interrupt_id);
            if from_slave {
                if !self.pics[1].in_service(7) {
                    self.pics[0].end_of_interrupt();
                    return;
                }
                self.pics[1].end_of_interrupt();
                self.pics[0].end_of_interrupt();
            } else if self.handles_interrupt(interrupt_id) {
                if !self.pics[0].in_service(7) {
                    return;
                }
                self.pics[0].end_of_interrupt();
            }
        }
    }

    fn handles_interrupt(&self, interrupt_id: u8) -> bool {
        self.pics.iter().any(|p| p.handles_interrupt(interrupt_id))
    }

    /// # Safety
    /// Must be called after `initialize`.
    pub unsafe fn unmask_irq(&mut self, irq: u8) {
        unsafe {
            let mut port: Port<u8>;
            if irq < 8 {
                port = Port::new(PIC1_DATA);
                let value = port.read();
                port.write(value & !(1 << irq));
            } else {
                port = Port::new(PIC2_DATA);
                let value = port.read();
                port.write(value & !(1 << (irq - 8)));
            }
        }
    }
}

struct Pic {
    offset: u8,
    command: PortWriteOnly<u8>,
    data: PortWriteOnly<u8>,
}

impl Pic {
    const fn handles_interrupt(&self, interrupt_id: u8) -> bool {
        self.offset <= interrupt_id && interrupt_id < self.offset + 8
    }

    unsafe fn end_of_interrupt(&mut self) {
        unsafe {
            self.command.write(PIC_EOI);
        }
    }

    /// Reads the in-service register and checks whether `local_irq` (0-7,
    /// relative to this PIC) is currently flagged as in-service.
    unsafe fn in_service(&mut self, local_irq: u8) -> bool {
        unsafe {
            self.command.write(OCW3_READ_ISR);
            let mut read_port: Port<u8> = Port::new(self.command_port());
            let isr = read_port.read();
            (isr & (1 << local_irq)) != 0
        }
    }

    const fn command_port(&self) -> u16 {
        if self.offset == MASTER_OFFSET {
            PIC1_COMMAND
        } else {
            PIC2_COMMAND
        }
    }
}

pub static PICS: Mutex<ChainedPics> = Mutex::new(ChainedPics::new(MASTER_OFFSET, SLAVE_OFFSET));
