//! Architecture-specific code for ARM64 (AArch64)
//!
//! On `aarch64-unknown-none` these are thin wrappers over system registers
//! and MMIO. Everywhere else they are mocks, which keeps the rest of the
//! kernel testable on the build host.

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
mod real {
    use core::arch::asm;

    /// Mask IRQ and FIQ, returning the previous DAIF value.
    #[inline]
    pub unsafe fn disable_interrupts() -> u64 {
        let daif: u64;
        asm!(
            "mrs {0}, daif",
            "msr daifset, #0b0011",
            out(reg) daif,
            options(nostack),
        );
        daif
    }

    #[inline]
    pub unsafe fn restore_interrupts(state: u64) {
        asm!("msr daif, {0}", in(reg) state, options(nostack));
    }

    #[inline]
    pub unsafe fn get_core_id() -> u64 {
        let mpidr: u64;
        asm!("mrs {0}, mpidr_el1", out(reg) mpidr, options(nomem, nostack));
        mpidr & 0xFF
    }

    #[inline]
    pub unsafe fn get_exception_level() -> u64 {
        let el: u64;
        asm!("mrs {0}, CurrentEL", out(reg) el, options(nomem, nostack));
        (el >> 2) & 0b11
    }

    #[inline]
    pub unsafe fn data_sync_barrier() {
        asm!("dsb sy", options(nostack));
    }

    #[inline]
    pub unsafe fn wait_for_interrupt() {
        asm!("wfi", options(nomem, nostack));
    }

    #[inline]
    pub unsafe fn read32(addr: usize) -> u32 {
        core::ptr::read_volatile(addr as *const u32)
    }

    #[inline]
    pub unsafe fn write32(addr: usize, value: u32) {
        core::ptr::write_volatile(addr as *mut u32, value)
    }
}

#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
mod mocks {
    pub unsafe fn disable_interrupts() -> u64 { 0 }

    pub unsafe fn restore_interrupts(_state: u64) {}

    pub unsafe fn get_core_id() -> u64 { 0 }

    pub unsafe fn get_exception_level() -> u64 { 1 }

    pub unsafe fn data_sync_barrier() {}

    pub unsafe fn wait_for_interrupt() {
        core::hint::spin_loop();
    }

    // No device behind any address: reads float low, writes vanish.
    pub unsafe fn read32(_addr: usize) -> u32 { 0 }

    pub unsafe fn write32(_addr: usize, _value: u32) {}
}

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub use real::{read32, write32};

#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
pub use mocks::{read32, write32};

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
use real as imp;

#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
use mocks as imp;

// ═══════════════════════════════════════════════════════════════════════════════
// SAFE WRAPPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Disable interrupts and return the previous state for [`irq_restore`].
#[inline]
pub fn irq_disable() -> u64 {
    unsafe { imp::disable_interrupts() }
}

/// Restore an interrupt state saved by [`irq_disable`].
#[inline]
pub fn irq_restore(state: u64) {
    unsafe { imp::restore_interrupts(state) }
}

/// Get the current core ID (0-3)
#[inline]
pub fn core_id() -> u64 {
    unsafe { imp::get_core_id() }
}

/// Get the current exception level (1-3)
#[inline]
pub fn exception_level() -> u64 {
    unsafe { imp::get_exception_level() }
}

/// Data synchronization barrier
#[inline]
pub fn dsb() {
    unsafe { imp::data_sync_barrier() }
}

/// Wait for interrupt (low-power idle)
#[inline]
pub fn wfi() {
    unsafe { imp::wait_for_interrupt() }
}
