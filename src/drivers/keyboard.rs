// src/drivers/keyboard.rs
//! PS/2 keyboard: raw scancode reads from `arch::x86::keyboard` decoded
//! through `pc-keyboard` into actual characters, fed to the console's
//! input queue.

use pc_keyboard::{layouts, DecodedKey, HandleControl, Keyboard, ScancodeSet1};
use spin::Mutex;

use crate::arch::x86::keyboard::Keyboard as RawKeyboard;
use crate::arch::x86::pic::PICS;

static RAW: Mutex<RawKeyboard> = Mutex::new(RawKeyboard::new());
static DECODER: Mutex<Keyboard<layouts::Us104Key, ScancodeSet1>> =
    Mutex::new(Keyboard::new(ScancodeSet1::new(), layouts::Us104Key, HandleControl::Ignore));

/// Unmasks IRQ1 at the PIC. Called once during boot, after the PIC itself
/// has been initialized and masked.
pub fn init() {
    unsafe {
        PICS.lock().unmask_irq(1);
    }
}

/// Called by the common interrupt dispatcher for vector 33. Reads exactly
/// one scancode byte and, once a full key event decodes to a character,
/// hands it to the console device.
pub fn on_interrupt() {
    let Some(scancode) = RAW.lock().read_scancode() else { return };
    let mut decoder = DECODER.lock();
    let Ok(Some(event)) = decoder.add_byte(scancode) else { return };
    let Some(DecodedKey::Unicode(ch)) = decoder.process_keyevent(event) else { return };
    crate::drivers::console::push_input(ch);
}
