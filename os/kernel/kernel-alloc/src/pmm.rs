//! # Kernel Physical Memory Manager
//!
//! The one [`PhysicalMemory`] instance covering `KERNBASE..PHYSTOP`.
//! [`init`] runs once during boot with the first page after the kernel image;
//! everything else may be called from any hart afterwards.

use crate::phys_memory::{FrameBlock, PhysicalMemory};
use crate::phys_mapper::IdentityPhysMapper;
use kernel_info::memory::{KERNBASE, MAX_PAGES, PHYSTOP};
use kernel_memory_addresses::PhysicalAddress;

/// Physical memory manager of the running kernel.
pub type KernelMemory = PhysicalMemory<IdentityPhysMapper, MAX_PAGES>;

static PMM: KernelMemory = PhysicalMemory::new(IdentityPhysMapper, PhysicalAddress::new(KERNBASE));

/// The kernel instance, for use as a [`FrameAlloc`](kernel_vmem::FrameAlloc).
#[inline]
pub fn kernel_memory() -> &'static KernelMemory {
    &PMM
}

/// Hand `[kernel_end, PHYSTOP)` to the allocator.
///
/// # Panics
/// If called twice.
pub fn init(kernel_end: PhysicalAddress) {
    PMM.init(kernel_end, PhysicalAddress::new(PHYSTOP));
}

/// One zeroed, reference-counted page.
pub fn allocate_page() -> Option<PhysicalAddress> {
    PMM.allocate_page()
}

/// A zeroed block of at least `count` pages; see [`PhysicalMemory::allocate_pages`].
pub fn allocate_pages(count: usize) -> Option<FrameBlock> {
    PMM.allocate_pages(count)
}

/// Drop a reference to `pa`; no-op for a null address.
pub fn free_page(pa: PhysicalAddress) {
    PMM.free_page(pa);
}

/// Return a block from [`allocate_pages`].
pub fn free_pages(block: FrameBlock) {
    PMM.free_pages(block);
}
