//! Console multiplexer
//!
//! Byte put/get plus a batched write over the UART, multiplexed across
//! a small set of virtual terminals. Input bytes land in the active
//! terminal's ring; a process reads from the terminal its PCB names as
//! controlling terminal. The only escape the kernel interprets is the
//! terminal switch: Ctrl-T followed by a digit selects that terminal;
//! everything else passes through.

use core::fmt::{self, Write};

use spin::Mutex;

use crate::config::{MAX_VTERMS, VTERM_INPUT_BUF};
use crate::error::{KernelError, KernelResult};
use crate::sched::WaitQueue;

/// Terminal-switch prefix byte (Ctrl-T).
const SWITCH_PREFIX: u8 = 0x14;

struct VtInput {
    buf: [u8; VTERM_INPUT_BUF],
    head: usize,
    len: usize,
}

impl VtInput {
    const fn new() -> Self {
        Self {
            buf: [0; VTERM_INPUT_BUF],
            head: 0,
            len: 0,
        }
    }

    fn push(&mut self, byte: u8) {
        if self.len == VTERM_INPUT_BUF {
            // Drop the oldest byte; input is lossy under overrun.
            self.head = (self.head + 1) % VTERM_INPUT_BUF;
            self.len -= 1;
        }
        self.buf[(self.head + self.len) % VTERM_INPUT_BUF] = byte;
        self.len += 1;
    }

    fn pop(&mut self) -> Option<u8> {
        if self.len == 0 {
            return None;
        }
        let byte = self.buf[self.head];
        self.head = (self.head + 1) % VTERM_INPUT_BUF;
        self.len -= 1;
        Some(byte)
    }
}

struct ConsoleState {
    terminals: [VtInput; MAX_VTERMS],
    active: usize,
    /// Set after a Ctrl-T prefix; the next byte picks the terminal.
    switch_pending: bool,
}

static CONSOLE: Mutex<ConsoleState> = Mutex::new(ConsoleState {
    terminals: [const { VtInput::new() }; MAX_VTERMS],
    active: 0,
    switch_pending: false,
});

static READ_WAIT: [WaitQueue; MAX_VTERMS] = [const { WaitQueue::new() }; MAX_VTERMS];

/// The currently active (input-receiving) terminal.
pub fn active_terminal() -> usize {
    CONSOLE.lock().active
}

/// Feed one input byte from the UART interrupt handler.
pub fn handle_input(byte: u8) {
    let target = {
        let mut console = CONSOLE.lock();
        if console.switch_pending {
            console.switch_pending = false;
            if let Some(n) = (byte as char).to_digit(10) {
                let n = n as usize;
                if n >= 1 && n <= MAX_VTERMS {
                    console.active = n - 1;
                }
            }
            return;
        }
        if byte == SWITCH_PREFIX {
            console.switch_pending = true;
            return;
        }
        let active = console.active;
        console.terminals[active].push(byte);
        active
    };
    READ_WAIT[target].wake_one();
}

/// Non-blocking read from terminal `vt`.
pub fn try_read(vt: usize, buf: &mut [u8]) -> KernelResult<usize> {
    if vt >= MAX_VTERMS || buf.is_empty() {
        return Err(KernelError::InvalidArgument);
    }
    let mut console = CONSOLE.lock();
    let mut n = 0;
    while n < buf.len() {
        match console.terminals[vt].pop() {
            Some(byte) => {
                buf[n] = byte;
                n += 1;
            }
            None => break,
        }
    }
    if n == 0 {
        Err(KernelError::WouldBlock)
    } else {
        Ok(n)
    }
}

/// Blocking read from terminal `vt`: sleeps until input arrives or a
/// deliverable signal interrupts the wait.
pub fn read(vt: usize, buf: &mut [u8]) -> KernelResult<usize> {
    if vt >= MAX_VTERMS {
        return Err(KernelError::InvalidArgument);
    }
    loop {
        {
            let _irq = crate::arch::irq_save();
            match try_read(vt, buf) {
                Err(KernelError::WouldBlock) => READ_WAIT[vt].sleep(),
                other => return other,
            }
        }
        let interrupted = crate::process::current()
            .map(|p| crate::signal::has_deliverable(&p))
            .unwrap_or(false);
        if interrupted {
            return Err(KernelError::Interrupted);
        }
    }
}

fn putc_hw(byte: u8) {
    #[cfg(target_arch = "riscv64")]
    crate::arch::riscv64::uart::putc(byte);
    #[cfg(not(target_arch = "riscv64"))]
    let _ = byte;
}

/// Write one byte to the console.
pub fn putc(byte: u8) {
    putc_hw(byte);
}

/// Pop one input byte from terminal `vt`, if any is buffered.
pub fn getc(vt: usize) -> Option<u8> {
    let mut byte = [0u8; 1];
    match try_read(vt, &mut byte) {
        Ok(_) => Some(byte[0]),
        Err(_) => None,
    }
}

/// Batched write. All terminals share the one serial display; the
/// terminal argument exists for the contract and future framebuffers.
pub fn write_bytes(_vt: usize, bytes: &[u8]) -> usize {
    for &byte in bytes {
        if byte == b'\n' {
            putc_hw(b'\r');
        }
        putc_hw(byte);
    }
    bytes.len()
}

struct ConsoleWriter;

impl Write for ConsoleWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        write_bytes(0, s.as_bytes());
        Ok(())
    }
}

/// Sink for the `print!`/`println!` macros. Allocation-free so it
/// works before the heap is up.
pub fn _print(args: fmt::Arguments) {
    let _ = ConsoleWriter.write_fmt(args);
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    // The console is one global; the harness runs tests on threads, so
    // anything touching the active-terminal state serializes here.
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn input_reaches_active_terminal() {
        let _serial = TEST_LOCK.lock();
        // Switch to terminal 2 (index 1), type, switch back.
        handle_input(SWITCH_PREFIX);
        handle_input(b'2');
        assert_eq!(active_terminal(), 1);
        handle_input(b'h');
        handle_input(b'i');
        let mut buf = [0u8; 4];
        assert_eq!(try_read(1, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"hi");
        assert_eq!(try_read(1, &mut buf), Err(KernelError::WouldBlock));
        handle_input(SWITCH_PREFIX);
        handle_input(b'1');
        assert_eq!(active_terminal(), 0);
    }

    #[test]
    fn switch_prefix_is_not_delivered_as_input() {
        let _serial = TEST_LOCK.lock();
        handle_input(SWITCH_PREFIX);
        handle_input(b'4');
        assert_eq!(active_terminal(), 3);
        handle_input(b'x');
        let mut buf = [0u8; 8];
        let n = try_read(3, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"x");
        handle_input(SWITCH_PREFIX);
        handle_input(b'1');
    }

    #[test]
    fn bogus_switch_target_is_ignored() {
        let _serial = TEST_LOCK.lock();
        let before = active_terminal();
        handle_input(SWITCH_PREFIX);
        handle_input(b'9');
        assert_eq!(active_terminal(), before);
    }
}
