//! PL011 UART Driver for Raspberry Pi
//!
//! Serial console used for boot messages and filesystem diagnostics.

use crate::arch;
use crate::drivers::UART0_BASE;
use crate::kernel::sync::SpinLock;
use core::fmt::{self, Write};

// ═══════════════════════════════════════════════════════════════════════════════
// PL011 REGISTERS
// ═══════════════════════════════════════════════════════════════════════════════

const DR: usize = 0x00;        // Data Register
const FR: usize = 0x18;        // Flag Register
const IBRD: usize = 0x24;      // Integer Baud Rate Divisor
const FBRD: usize = 0x28;      // Fractional Baud Rate Divisor
const LCRH: usize = 0x2C;      // Line Control Register
const CR: usize = 0x30;        // Control Register
const IMSC: usize = 0x38;      // Interrupt Mask Set/Clear
const ICR: usize = 0x44;       // Interrupt Clear Register

// Flag Register bits
const FR_TXFF: u32 = 1 << 5;   // Transmit FIFO full
const FR_RXFE: u32 = 1 << 4;   // Receive FIFO empty
const FR_BUSY: u32 = 1 << 3;   // UART busy

// Line Control Register bits
const LCRH_WLEN_8: u32 = 0b11 << 5; // 8-bit word length
const LCRH_FEN: u32 = 1 << 4;       // Enable FIFOs

// Control Register bits
const CR_RXE: u32 = 1 << 9;        // Receive enable
const CR_TXE: u32 = 1 << 8;        // Transmit enable
const CR_UARTEN: u32 = 1 << 0;     // UART enable

/// UART reference clock (set by `init_uart_clock` in config.txt)
const UART_CLOCK: u32 = 48_000_000;

/// Longest line accepted by [`get_line`]
pub const LINE_MAX: usize = 128;

// ═══════════════════════════════════════════════════════════════════════════════
// UART DRIVER
// ═══════════════════════════════════════════════════════════════════════════════

/// UART driver instance
pub struct Uart {
    base: usize,
}

impl Uart {
    pub const fn new(base: usize) -> Self {
        Uart { base }
    }

    #[inline]
    fn read(&self, offset: usize) -> u32 {
        unsafe { arch::read32(self.base + offset) }
    }

    #[inline]
    fn write(&self, offset: usize, value: u32) {
        unsafe { arch::write32(self.base + offset, value) }
    }

    #[inline]
    fn wait_tx_ready(&self) {
        while self.read(FR) & FR_TXFF != 0 {
            core::hint::spin_loop();
        }
    }

    #[inline]
    fn wait_tx_complete(&self) {
        while self.read(FR) & FR_BUSY != 0 {
            core::hint::spin_loop();
        }
    }

    /// Program 8N1 at `baud_rate` with FIFOs enabled.
    pub fn init(&mut self, baud_rate: u32) {
        // Disable while reprogramming
        self.write(CR, 0);
        self.wait_tx_complete();

        // Flush FIFOs, clear and mask all interrupts
        self.write(LCRH, 0);
        self.write(ICR, 0x7FF);
        self.write(IMSC, 0);

        // Divisor = UART_CLK / (16 * Baud), with 6 fractional bits
        let divisor = (UART_CLOCK * 4) / baud_rate;
        self.write(IBRD, divisor >> 6);
        self.write(FBRD, divisor & 0x3F);

        self.write(LCRH, LCRH_WLEN_8 | LCRH_FEN);
        self.write(CR, CR_UARTEN | CR_TXE | CR_RXE);
    }

    /// Send a single byte
    pub fn send(&self, byte: u8) {
        self.wait_tx_ready();
        self.write(DR, byte as u32);
    }

    /// Send a string, translating `\n` to `\r\n`
    pub fn send_str(&self, s: &str) {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.send(b'\r');
            }
            self.send(byte);
        }
    }

    /// Check if data is available
    pub fn has_data(&self) -> bool {
        self.read(FR) & FR_RXFE == 0
    }

    /// Receive a byte (blocking)
    pub fn receive(&self) -> u8 {
        while !self.has_data() {
            core::hint::spin_loop();
        }
        self.read(DR) as u8
    }
}

impl Write for Uart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.send_str(s);
        Ok(())
    }
}

// SAFETY: Uart is just a wrapper around MMIO, safe to send across cores
unsafe impl Send for Uart {}

// ═══════════════════════════════════════════════════════════════════════════════
// GLOBAL UART INSTANCE
// ═══════════════════════════════════════════════════════════════════════════════

static UART0: SpinLock<Uart> = SpinLock::new(Uart::new(UART0_BASE));

/// Early initialization at 115200 baud
pub fn early_init() {
    UART0.lock().init(115_200);
}

/// Send a byte
pub fn send(byte: u8) {
    UART0.lock().send(byte);
}

/// Receive a byte (blocking)
pub fn receive() -> u8 {
    UART0.lock().receive()
}

// ═══════════════════════════════════════════════════════════════════════════════
// LINE CONSOLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Write one line followed by a newline.
pub fn put_line(line: &str) {
    let uart = UART0.lock();
    uart.send_str(line);
    uart.send_str("\n");
}

/// Read a line of input into buffer, echoing it back; returns its length.
///
/// Handles backspace and Ctrl+C (discards the line). The line is not
/// NUL-terminated; bytes past the returned length are untouched.
pub fn get_line(buffer: &mut [u8]) -> usize {
    let mut idx = 0;
    let limit = buffer.len().min(LINE_MAX);

    loop {
        let byte = receive();

        match byte {
            // Enter
            b'\r' | b'\n' => {
                send(b'\r');
                send(b'\n');
                break;
            }
            // Backspace
            0x7F | 0x08 => {
                if idx > 0 {
                    idx -= 1;
                    send(0x08);
                    send(b' ');
                    send(0x08);
                }
            }
            // Ctrl+C
            0x03 => {
                send(b'^');
                send(b'C');
                send(b'\r');
                send(b'\n');
                idx = 0;
                break;
            }
            // Printable characters
            0x20..=0x7E => {
                if idx < limit {
                    buffer[idx] = byte;
                    idx += 1;
                    send(byte);
                }
            }
            _ => {}
        }
    }

    idx
}

// ═══════════════════════════════════════════════════════════════════════════════
// PRINT MACROS
// ═══════════════════════════════════════════════════════════════════════════════

pub fn print(args: fmt::Arguments) {
    let mut uart = UART0.lock();
    let _ = uart.write_fmt(args);
}
