//! Kernel Heap Allocator
//!
//! A buddy allocator over the linker-provided heap region. Blocks are powers
//! of two from 16 bytes up; freed blocks merge with their buddy, so scratch
//! buffers dropped by the filesystem go back to the heap.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;
use crate::kernel::sync::SpinLock;

// ═══════════════════════════════════════════════════════════════════════════════
// MEMORY REGIONS (from linker script)
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
extern "C" {
    static __heap_start: u8;
    static __heap_end: u8;
}

/// Get heap region bounds
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub fn heap_region() -> (usize, usize) {
    unsafe {
        let start = &__heap_start as *const u8 as usize;
        let end = &__heap_end as *const u8 as usize;
        (start, end)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Page size
pub const PAGE_SIZE: usize = 4096;

/// Smallest block (also the minimum alignment handed out)
const MIN_BLOCK_SIZE: usize = 16;

/// 16 << 20 = 16 MiB blocks at most
const MAX_ORDER: usize = 20;

// ═══════════════════════════════════════════════════════════════════════════════
// BUDDY ALLOCATOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Free list link, stored inside the free block itself
#[repr(C)]
struct FreeNode {
    next: Option<NonNull<FreeNode>>,
}

/// Raw buddy allocator. Not synchronized; see [`KernelAllocator`].
pub struct BuddyAllocator {
    free_lists: [Option<NonNull<FreeNode>>; MAX_ORDER + 1],
    /// Page-aligned start; buddies are paired by offset from here
    base: usize,
    size: usize,
    allocated: usize,
    allocations: usize,
    frees: usize,
}

// SAFETY: the free lists only point into the region the allocator owns.
unsafe impl Send for BuddyAllocator {}

fn block_size(order: usize) -> usize {
    MIN_BLOCK_SIZE << order
}

/// Smallest order whose block holds `size` bytes
fn order_for_size(size: usize) -> Option<usize> {
    let size = size.max(MIN_BLOCK_SIZE);
    (0..=MAX_ORDER).find(|&order| block_size(order) >= size)
}

impl BuddyAllocator {
    pub const fn new() -> Self {
        BuddyAllocator {
            free_lists: [None; MAX_ORDER + 1],
            base: 0,
            size: 0,
            allocated: 0,
            allocations: 0,
            frees: 0,
        }
    }

    /// Hand the allocator its region.
    ///
    /// # Safety
    /// `[base, base + size)` must be unused RAM owned by the allocator from now on.
    pub unsafe fn init(&mut self, base: usize, size: usize) {
        let aligned = (base + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
        let mut remaining = size.saturating_sub(aligned - base);

        self.free_lists = [None; MAX_ORDER + 1];
        self.base = aligned;
        self.size = remaining;
        self.allocated = 0;
        self.allocations = 0;
        self.frees = 0;

        // Largest blocks first, so every block sits at a multiple of its size
        let mut addr = aligned;
        while remaining >= MIN_BLOCK_SIZE {
            let order = (0..=MAX_ORDER)
                .rev()
                .find(|&order| block_size(order) <= remaining)
                .unwrap_or(0);
            self.push(addr, order);
            addr += block_size(order);
            remaining -= block_size(order);
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.size != 0
    }

    unsafe fn push(&mut self, addr: usize, order: usize) {
        let node = addr as *mut FreeNode;
        (*node).next = self.free_lists[order];
        self.free_lists[order] = NonNull::new(node);
    }

    unsafe fn pop(&mut self, order: usize) -> Option<usize> {
        let node = self.free_lists[order]?;
        self.free_lists[order] = (*node.as_ptr()).next;
        Some(node.as_ptr() as usize)
    }

    /// Unlink `addr` from the `order` free list if it is there.
    unsafe fn take(&mut self, addr: usize, order: usize) -> bool {
        let mut link = core::ptr::addr_of_mut!(self.free_lists[order]);
        while let Some(node) = *link {
            if node.as_ptr() as usize == addr {
                *link = (*node.as_ptr()).next;
                return true;
            }
            link = core::ptr::addr_of_mut!((*node.as_ptr()).next);
        }
        false
    }

    fn buddy_of(&self, addr: usize, order: usize) -> usize {
        self.base + ((addr - self.base) ^ block_size(order))
    }

    /// Allocate a block of at least `size` bytes, 16-byte aligned.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        let order = order_for_size(size)?;
        let mut current = (order..=MAX_ORDER).find(|&o| self.free_lists[o].is_some())?;

        // SAFETY: free list entries are unused blocks inside the region
        unsafe {
            let addr = self.pop(current)?;
            while current > order {
                current -= 1;
                self.push(addr + block_size(current), current);
            }
            self.allocated += block_size(order);
            self.allocations += 1;
            NonNull::new(addr as *mut u8)
        }
    }

    /// Return a block from [`allocate`](Self::allocate) with the same `size`.
    ///
    /// # Safety
    /// `ptr` must be a live block of this allocator, allocated for `size` bytes.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>, size: usize) {
        let Some(order) = order_for_size(size) else { return };
        let mut addr = ptr.as_ptr() as usize;
        let mut current = order;

        while current < MAX_ORDER {
            let buddy = self.buddy_of(addr, current);
            if buddy + block_size(current) > self.base + self.size || !self.take(buddy, current) {
                break;
            }
            addr = addr.min(buddy);
            current += 1;
        }

        self.push(addr, current);
        self.allocated -= block_size(order);
        self.frees += 1;
    }

    pub fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            total: self.size,
            allocated: self.allocated,
            total_allocations: self.allocations,
            frees: self.frees,
        }
    }
}

impl Default for BuddyAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorStats {
    pub total: usize,
    /// Bytes in live blocks, rounded up to block size
    pub allocated: usize,
    pub total_allocations: usize,
    pub frees: usize,
}

// ═══════════════════════════════════════════════════════════════════════════════
// GLOBAL ALLOCATOR
// ═══════════════════════════════════════════════════════════════════════════════

pub struct KernelAllocator {
    inner: SpinLock<BuddyAllocator>,
}

impl KernelAllocator {
    pub const fn new() -> Self {
        KernelAllocator { inner: SpinLock::new(BuddyAllocator::new()) }
    }

    /// # Safety
    /// See [`BuddyAllocator::init`].
    pub unsafe fn init(&self, base: usize, size: usize) {
        self.inner.lock().init(base, size);
    }

    pub fn stats(&self) -> AllocatorStats {
        self.inner.lock().stats()
    }
}

impl Default for KernelAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Blocks are aligned to their size, up to the page-aligned base.
fn block_request(layout: Layout) -> Option<usize> {
    if layout.align() > PAGE_SIZE {
        return None;
    }
    Some(layout.size().max(layout.align()))
}

unsafe impl GlobalAlloc for KernelAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let Some(size) = block_request(layout) else {
            return core::ptr::null_mut();
        };
        match self.inner.lock().allocate(size) {
            Some(ptr) => ptr.as_ptr(),
            None => core::ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if let (Some(ptr), Some(size)) = (NonNull::new(ptr), block_request(layout)) {
            self.inner.lock().deallocate(ptr, size);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// GLOBAL INSTANCE
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
#[global_allocator]
static GLOBAL: KernelAllocator = KernelAllocator::new();

/// Initialize the kernel heap from the linker script region.
///
/// # Safety
/// Must be called once during boot, before the first allocation.
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub unsafe fn init() {
    let (start, end) = heap_region();
    GLOBAL.init(start, end - start);
}

/// Get allocator statistics
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub fn stats() -> AllocatorStats {
    GLOBAL.stats()
}

/// Get available heap memory
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub fn heap_available() -> usize {
    let stats = GLOBAL.stats();
    stats.total.saturating_sub(stats.allocated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::boxed::Box;
    use std::vec::Vec;

    const ARENA: usize = 4 * PAGE_SIZE;

    #[repr(C, align(4096))]
    struct Arena([u8; ARENA]);

    fn heap(arena: &mut Arena) -> KernelAllocator {
        let heap = KernelAllocator::new();
        unsafe { heap.init(arena.0.as_mut_ptr() as usize, ARENA) };
        heap
    }

    #[test]
    fn test_uninitialized_allocator_refuses() {
        let mut buddy = BuddyAllocator::new();
        assert!(!buddy.is_initialized());
        assert!(buddy.allocate(32).is_none());
    }

    #[test]
    fn test_allocations_are_aligned_and_disjoint() {
        let mut arena = Box::new(Arena([0; ARENA]));
        let heap = heap(&mut arena);

        let layout = Layout::from_size_align(24, 8).unwrap();
        let a = unsafe { heap.alloc(layout) } as usize;
        let b = unsafe { heap.alloc(layout) } as usize;
        assert_ne!(a, 0);
        assert_eq!(a % MIN_BLOCK_SIZE, 0);
        assert_eq!(b % MIN_BLOCK_SIZE, 0);
        assert!(a + 32 <= b || b + 32 <= a);

        let page = Layout::from_size_align(PAGE_SIZE, PAGE_SIZE).unwrap();
        let p = unsafe { heap.alloc(page) } as usize;
        assert_eq!(p % PAGE_SIZE, 0);

        let stats = heap.stats();
        assert_eq!(stats.total, ARENA);
        assert_eq!(stats.total_allocations, 3);
        assert_eq!(stats.allocated, 32 + 32 + PAGE_SIZE);
    }

    #[test]
    fn test_exhaustion_returns_null() {
        let mut arena = Box::new(Arena([0; ARENA]));
        let heap = heap(&mut arena);

        let whole = Layout::from_size_align(ARENA, 16).unwrap();
        let ptr = unsafe { heap.alloc(whole) };
        assert!(!ptr.is_null());
        assert!(unsafe { heap.alloc(Layout::from_size_align(1, 1).unwrap()) }.is_null());
        assert!(unsafe { heap.alloc(Layout::from_size_align(16, 8192).unwrap()) }.is_null());
    }

    #[test]
    fn test_freed_blocks_are_reused() {
        let mut arena = Box::new(Arena([0; ARENA]));
        let heap = heap(&mut arena);
        let cluster = Layout::from_size_align(512, 1).unwrap();

        // Far more traffic than the arena could hold without reuse
        for _ in 0..1000 {
            let ptr = unsafe { heap.alloc(cluster) };
            assert!(!ptr.is_null());
            unsafe { heap.dealloc(ptr, cluster) };
        }

        let stats = heap.stats();
        assert_eq!(stats.allocated, 0);
        assert_eq!(stats.frees, 1000);
    }

    #[test]
    fn test_buddies_coalesce() {
        let mut arena = Box::new(Arena([0; ARENA]));
        let heap = heap(&mut arena);
        let small = Layout::from_size_align(16, 16).unwrap();

        let blocks: Vec<*mut u8> = (0..64).map(|_| unsafe { heap.alloc(small) }).collect();
        assert!(blocks.iter().all(|p| !p.is_null()));
        for &ptr in &blocks {
            unsafe { heap.dealloc(ptr, small) };
        }

        // Only possible once the 16-byte blocks merged back
        let whole = Layout::from_size_align(ARENA, 16).unwrap();
        assert!(!unsafe { heap.alloc(whole) }.is_null());
    }
}
