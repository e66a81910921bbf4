// SPDX-License-Identifier: MIT OR Apache-2.0

//! UART diagnostics output and the `log` facade wired to it.
//!
//! The register layout and init sequence mirror a standard 16550-compatible
//! serial port (port `0x3f8`, 8n1, no FIFO, no interrupts): the same shape
//! as every other bare-metal loader's first console.

use core::fmt::{self, Write};
use core::sync::atomic::{AtomicBool, Ordering};

use skl_arch::port::{inb, outb};

const SERIAL_PORT: u16 = 0x3f8;
const BAUD: u32 = 115_200;
const DLAB: u8 = 0x80;

const TXR: u16 = 0; // Transmit register
const IER: u16 = 1; // Interrupt enable
const FCR: u16 = 2; // FIFO control
const LCR: u16 = 3; // Line control
const MCR: u16 = 4; // Modem control
const LSR: u16 = 5; // Line status
const DLL: u16 = 0; // Divisor latch low
const DLH: u16 = 1; // Divisor latch high

const XMTRDY: u8 = 0x20;

#[derive(Clone, Copy)]
struct SerialPort {
    port: u16,
}

impl SerialPort {
    const fn new(port: u16) -> Self {
        Self { port }
    }

    fn init(&self) {
        let divisor = 115_200 / BAUD;
        // SAFETY: this loader owns the UART for the duration of the launch;
        // nothing else touches port 0x3f8 concurrently (single logical
        // processor, interrupts disabled).
        unsafe {
            outb(self.port + LCR, 0x3); // 8n1
            outb(self.port + IER, 0); // no interrupts
            outb(self.port + FCR, 0); // no FIFO
            outb(self.port + MCR, 0x3); // DTR + RTS

            let c = inb(self.port + LCR);
            outb(self.port + LCR, c | DLAB);
            outb(self.port + DLL, (divisor & 0xff) as u8);
            outb(self.port + DLH, ((divisor >> 8) & 0xff) as u8);
            outb(self.port + LCR, c & !DLAB);
        }
    }

    fn put_byte(&self, ch: u8) {
        // SAFETY: see `init`.
        unsafe {
            while inb(self.port + LSR) & XMTRDY != XMTRDY {}
            outb(self.port + TXR, ch);
        }
    }
}

impl Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &b in s.as_bytes() {
            if b == b'\n' {
                self.put_byte(b'\r');
            }
            self.put_byte(b);
        }
        Ok(())
    }
}

struct SerialLogger {
    port: SerialPort,
    initialized: AtomicBool,
}

// SAFETY: the launch environment runs with a single logical processor and
// interrupts disabled, so there is never a concurrent caller to race with;
// the same reasoning as `skl_arch::mmio`'s `unsafe impl Send` for its MMIO
// handles.
unsafe impl Sync for SerialLogger {}

impl log::Log for SerialLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if !self.initialized.load(Ordering::Relaxed) {
            return;
        }
        // `SerialPort` carries only a port number, so a local copy writes
        // through the same I/O port as the shared one above.
        let mut port = self.port;
        let _ = writeln!(port, "[{}] {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

static LOGGER: SerialLogger = SerialLogger {
    port: SerialPort::new(SERIAL_PORT),
    initialized: AtomicBool::new(false),
};

/// Initializes the UART and installs it as the `log` backend. Must run
/// before any `log::info!`/`warn!`/`error!` call; safe to call exactly
/// once, which the entry point does before calling into `skl-core`.
pub fn init() {
    LOGGER.port.init();
    LOGGER.initialized.store(true, Ordering::Relaxed);
    log::set_logger(&LOGGER).ok();
    log::set_max_level(log::LevelFilter::Info);
}
