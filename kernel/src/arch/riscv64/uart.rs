//! 16550 UART console backend (QEMU virt machine)
//!
//! The QEMU virt machine exposes a 16550-compatible UART at MMIO
//! address 0x1000_0000 on PLIC source 10. Output falls back to the SBI
//! legacy console until `init` has run.

use spin::Mutex;
use uart_16550::MmioSerialPort;

use super::sbi;

/// UART MMIO base on the QEMU virt machine.
const UART_BASE: usize = 0x1000_0000;

static UART: Mutex<Option<MmioSerialPort>> = Mutex::new(None);

/// Initialize the UART (enables receive interrupts in the device).
pub fn init() {
    // SAFETY: UART_BASE is the virt machine's 16550 MMIO window,
    // identity-mapped by the kernel address space.
    let mut port = unsafe { MmioSerialPort::new(UART_BASE) };
    port.init();
    *UART.lock() = Some(port);
    log::info!(target: "uart", "16550 console at {:#x}", UART_BASE);
}

/// Write one byte to the console.
pub fn putc(byte: u8) {
    let mut uart = UART.lock();
    match uart.as_mut() {
        Some(port) => port.send(byte),
        None => sbi::console_putchar(byte),
    }
}

/// Read the pending receive byte. Only called from the UART interrupt
/// handler, where the data-ready condition is already known to hold.
pub fn getc() -> Option<u8> {
    let mut uart = UART.lock();
    match uart.as_mut() {
        Some(port) => Some(port.receive()),
        None => {
            let c = sbi::console_getchar();
            if c < 0 {
                None
            } else {
                Some(c as u8)
            }
        }
    }
}
