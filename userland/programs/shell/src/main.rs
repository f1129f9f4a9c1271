#![no_std]
#![no_main]

use core::panic::PanicInfo;

use libuser::io::{read, STDIN};
use libuser::println;
use libuser::process::{exit, spawn, wait};

const LINE_CAPACITY: usize = 128;

/// Reads one line from stdin, polling `read` until a newline or a full
/// buffer turns up. `read` returning `Err` (no data yet, console is
/// non-blocking) just means try again.
fn read_line(buf: &mut [u8; LINE_CAPACITY]) -> usize {
    let mut len = 0;
    loop {
        let mut byte = [0u8; 1];
        match read(STDIN, &mut byte) {
            Ok(1) if byte[0] == b'\n' => return len,
            Ok(1) => {
                if len < buf.len() {
                    buf[len] = byte[0];
                    len += 1;
                }
            }
            _ => libuser::process::yield_now(),
        }
    }
}

#[no_mangle]
#[link_section = ".text.entry"]
pub extern "C" fn _start() -> ! {
    println!("pike-os shell");

    let mut line = [0u8; LINE_CAPACITY];
    loop {
        libuser::io::print("$ ");
        let len = read_line(&mut line);
        let command = core::str::from_utf8(&line[..len]).unwrap_or("").trim();

        if command.is_empty() {
            continue;
        }
        if command == "exit" {
            exit(0);
        }

        match spawn(command) {
            Ok(child) => {
                let mut status = 0;
                match wait(child as i32, Some(&mut status)) {
                    Ok(_) if status != 0 => println!("{command}: exited with status {status}"),
                    Ok(_) => {}
                    Err(()) => println!("{command}: wait failed"),
                }
            }
            Err(()) => println!("{command}: fork failed"),
        }
    }
}

#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    println!("shell: panic");
    exit(1);
}
