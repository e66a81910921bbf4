// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hardware reset primitives.
//!
//! The two terminal outcomes a launch can reach: `reboot()` for the
//! "bootloader handoff cannot be trusted" class of error, `terminate()` for
//! everything that should simply stop the machine rather than restart it.
//! Both are diverging and both are the bin crate's problem, not
//! `skl-core`'s: the library only ever returns a `Result`.

use skl_arch::port::outb;

const KBC_COMMAND_PORT: u16 = 0x64;
const KBC_RESET_PULSE: u8 = 0xfe;

/// Resets the platform: pulses the keyboard controller's reset line, and if
/// that somehow returns, falls back to a triple fault by loading a null IDT
/// and executing a software interrupt.
pub fn reboot() -> ! {
    // SAFETY: port 0x64 is the legacy i8042 command port; pulsing the reset
    // line is the standard warm-reset sequence on every PC-compatible
    // platform this loader targets.
    unsafe {
        outb(KBC_COMMAND_PORT, KBC_RESET_PULSE);
    }
    triple_fault();
}

/// Halts the machine without restarting it: disables interrupts and spins
/// on `hlt` forever.
pub fn terminate() -> ! {
    loop {
        // SAFETY: `cli`/`hlt` have no preconditions on this platform.
        unsafe {
            core::arch::asm!("cli", "hlt", options(nomem, nostack));
        }
    }
}

fn triple_fault() -> ! {
    #[repr(C, packed)]
    struct NullIdt {
        limit: u16,
        base: u64,
    }
    let idt = NullIdt { limit: 0, base: 0 };
    loop {
        // SAFETY: loading a zero-limit IDT and raising an interrupt is
        // guaranteed to triple-fault the processor, which is the intended
        // outcome here.
        unsafe {
            core::arch::asm!("lidt [{0}]", "int3", in(reg) &idt, options(nostack));
        }
    }
}
