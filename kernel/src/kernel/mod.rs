//! Kernel Subsystems
//!
//! - Memory management (heap)
//! - Synchronization primitives

pub mod memory;
pub mod sync;

pub use memory::{AllocatorStats, BuddyAllocator, KernelAllocator, PAGE_SIZE};
pub use sync::SpinLock;
