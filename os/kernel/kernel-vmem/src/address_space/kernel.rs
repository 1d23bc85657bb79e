//! The kernel's own address space: identity-mapped devices and RAM, the
//! trampoline, and one kernel stack per process slot.
//!
//! Built once on the boot hart and loaded on every hart with
//! [`AddressSpace::activate`]. Failures here happen before any process exists,
//! so they panic instead of returning errors.

use super::AddressSpace;
use crate::info::{
    KERNBASE, NPROC, PAGE_SIZE, PHYSTOP, PLIC, PLIC_SIZE, TRAMPOLINE, UART0, VIRTIO0, kstack,
};
use crate::{FrameAlloc, PageEntryBits, PhysMapper};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress};
use log::info;

/// Where the linker placed the kernel image.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct KernelLayout {
    /// First byte after the kernel text; page aligned.
    pub text_end: PhysicalAddress,
    /// Page holding the trap trampoline code.
    pub trampoline: PhysicalPage,
    /// Number of process slots that receive a kernel stack.
    pub stacks: usize,
}

impl KernelLayout {
    /// A layout with one kernel stack for each of the [`NPROC`] slots.
    #[must_use]
    pub const fn new(text_end: PhysicalAddress, trampoline: PhysicalPage) -> Self {
        Self {
            text_end,
            trampoline,
            stacks: NPROC,
        }
    }
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// Build the kernel page table for `layout`.
    ///
    /// | Range                      | Target              | Access |
    /// |----------------------------|---------------------|--------|
    /// | `UART0`, `VIRTIO0`, `PLIC` | same address        | RW     |
    /// | `KERNBASE..text_end`       | same address        | RX     |
    /// | `text_end..PHYSTOP`        | same address        | RW     |
    /// | `TRAMPOLINE`               | `layout.trampoline` | RX     |
    /// | `kstack(i)`                | fresh page          | RW     |
    ///
    /// # Panics
    /// If `text_end` is unaligned or outside RAM, or a page cannot be
    /// allocated.
    #[must_use]
    pub fn new_kernel<A: FrameAlloc>(mapper: &'m M, alloc: &A, layout: &KernelLayout) -> Self {
        let text_end = layout.text_end.as_u64();
        assert!(
            layout.text_end.is_page_aligned() && text_end > KERNBASE && text_end < PHYSTOP,
            "new_kernel: bad end of text {}",
            layout.text_end
        );
        let Some(mut space) = Self::create(mapper, alloc) else {
            panic!("new_kernel: no page for the root table");
        };

        let rw = PageEntryBits::kernel_rw();
        let rx = PageEntryBits::kernel_rx();
        for device in [UART0, VIRTIO0] {
            space.map_kernel(alloc, device, PhysicalAddress::new(device), PAGE_SIZE, rw);
        }
        space.map_kernel(alloc, PLIC, PhysicalAddress::new(PLIC), PLIC_SIZE, rw);
        space.map_kernel(alloc, KERNBASE, PhysicalAddress::new(KERNBASE), text_end - KERNBASE, rx);
        space.map_kernel(alloc, text_end, layout.text_end, PHYSTOP - text_end, rw);
        space.map_kernel(alloc, TRAMPOLINE, layout.trampoline.base(), PAGE_SIZE, rx);

        for slot in 0..layout.stacks {
            let Some(stack) = alloc.alloc_4k() else {
                panic!("new_kernel: no page for kernel stack {slot}");
            };
            space.map_kernel(alloc, kstack(slot), stack.base(), PAGE_SIZE, rw);
        }

        info!(
            "vmem: kernel address space at {} with {} stacks",
            space.root, layout.stacks
        );
        space
    }

    /// [`map_range`](Self::map_range) for kernel mappings.
    ///
    /// # Panics
    /// If any part of the range is already mapped or a table cannot be
    /// allocated.
    pub fn map_kernel<A: FrameAlloc>(
        &mut self,
        alloc: &A,
        va: u64,
        pa: PhysicalAddress,
        size: u64,
        perm: PageEntryBits,
    ) {
        let va = VirtualAddress::new(va);
        if let Err(e) = self.map_range(alloc, va, size, pa, perm) {
            panic!("map_kernel: {va} -> {pa}: {e}");
        }
    }

    /// Physical address behind a kernel virtual address.
    ///
    /// # Panics
    /// If `va` is not mapped.
    #[must_use]
    pub fn kernel_pa(&self, va: VirtualAddress) -> PhysicalAddress {
        self.translate_kernel(va)
            .unwrap_or_else(|| panic!("kernel_pa: {va} not mapped"))
    }
}
