//! ╔═══════════════════════════════════════════════════════════════════════════╗
//! ║                       PI KERNEL - LIBRARY ROOT                            ║
//! ║              UART Console, Heap, and the Virtual Filesystem               ║
//! ╚═══════════════════════════════════════════════════════════════════════════╝
//!
//! This is the library root that exposes all kernel functionality for testing
//! and reuse. The binary entry point is in main.rs.
//!
//! Hardware access (MMIO, interrupt masking) is only real when building for
//! `aarch64-unknown-none`; every other target gets mocks, so the filesystem
//! layer runs under a normal `cargo test` on the host.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

// ═══════════════════════════════════════════════════════════════════════════════
// PUBLIC MODULES
// ═══════════════════════════════════════════════════════════════════════════════

pub mod arch;
pub mod drivers;
pub mod kernel;
pub mod fs;

// ═══════════════════════════════════════════════════════════════════════════════
// MACROS
// ═══════════════════════════════════════════════════════════════════════════════

#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {
        $crate::drivers::uart::print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! kprintln {
    () => { $crate::kprint!("\n") };
    ($($arg:tt)*) => {
        $crate::kprint!("{}\n", format_args!($($arg)*))
    };
}

/// Verbose tracing, compiled in with the `debug` feature.
#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {
        if cfg!(feature = "debug") {
            $crate::kprintln!($($arg)*);
        }
    };
}
