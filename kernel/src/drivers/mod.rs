//! Hardware drivers for Raspberry Pi 3/4

pub mod uart;
pub mod ramdisk;

// Re-export commonly used items
pub use uart::Uart;
pub use ramdisk::RamDisk;

// ═══════════════════════════════════════════════════════════════════════════════
// BCM2837 MEMORY MAP
// ═══════════════════════════════════════════════════════════════════════════════

/// Peripheral base as seen by the ARM cores (BCM2837, Pi 3)
pub const PERIPHERAL_BASE: usize = 0x3F00_0000;

/// PL011 UART0
pub const UART0_BASE: usize = PERIPHERAL_BASE + 0x0020_1000;
