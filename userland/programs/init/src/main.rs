#![no_std]
#![no_main]

use core::panic::PanicInfo;

use libuser::println;
use libuser::process::{exit, fork, wait};

/// PID 1: forks a shell, waits for it to exit, and forks another one.
/// Never exits itself, so it stays around to adopt any orphaned children
/// along the way.
#[no_mangle]
#[link_section = ".text.entry"]
pub extern "C" fn _start() -> ! {
    println!("init: starting /bin/shell");

    loop {
        match fork() {
            Ok(0) => {
                let _ = libuser::process::execve("/bin/shell");
                println!("init: execve(/bin/shell) failed");
                exit(127);
            }
            Ok(child) => {
                let mut status = 0;
                loop {
                    match wait(-1, Some(&mut status)) {
                        Ok(pid) if pid == child => break,
                        Ok(_) => continue,
                        Err(()) => break,
                    }
                }
                println!("init: shell exited, restarting");
            }
            Err(()) => {
                println!("init: fork failed");
            }
        }
    }
}

#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    println!("init: panic");
    exit(1);
}
