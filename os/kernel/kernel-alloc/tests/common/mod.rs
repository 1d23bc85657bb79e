//! Host memory standing in for physical RAM.

#![allow(dead_code)]

use kernel_alloc::PhysicalMemory;
use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::PhysMapper;
use std::alloc::{Layout, alloc_zeroed, dealloc};

/// Physical address the simulated RAM starts at.
pub const RAM_BASE: u64 = 0x8000_0000;
pub const PAGE: u64 = 4096;

/// Pages in the allocator window used by the tests (8 MiB, two largest blocks).
pub const WINDOW: usize = 2048;

pub type TestMemory = PhysicalMemory<ArenaMapper, WINDOW>;

/// Owns the host buffer backing the window.
pub struct TestArena {
    ptr: *mut u8,
    layout: Layout,
}

impl TestArena {
    pub fn new() -> Self {
        let layout = Layout::from_size_align(WINDOW * PAGE as usize, PAGE as usize).unwrap();
        let ptr = unsafe { alloc_zeroed(layout) };
        assert!(!ptr.is_null());
        Self { ptr, layout }
    }

    pub fn mapper(&self) -> ArenaMapper {
        ArenaMapper { host: self.ptr }
    }

    /// A fresh manager over this arena, not yet initialized.
    pub fn memory(&self) -> Box<TestMemory> {
        Box::new(PhysicalMemory::new(self.mapper(), pa(0)))
    }

    /// A manager holding the first `pages` pages of the window.
    pub fn memory_with(&self, pages: u64) -> Box<TestMemory> {
        let mem = self.memory();
        mem.init(pa(0), pa(pages));
        mem
    }

    pub fn bytes(&self, at: PhysicalAddress, len: usize) -> &mut [u8] {
        let off = usize::try_from(at.as_u64() - RAM_BASE).unwrap();
        assert!(off + len <= self.layout.size());
        unsafe { std::slice::from_raw_parts_mut(self.ptr.add(off), len) }
    }
}

impl Drop for TestArena {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr, self.layout) };
    }
}

/// Translates window addresses into the host buffer.
#[derive(Copy, Clone)]
pub struct ArenaMapper {
    host: *mut u8,
}

// Safety: the buffer outlives every manager built on it; access is serialized
// by the allocator's locks.
unsafe impl Send for ArenaMapper {}
unsafe impl Sync for ArenaMapper {}

impl PhysMapper for ArenaMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let off = usize::try_from(pa.as_u64() - RAM_BASE).unwrap();
        assert!(off < WINDOW * PAGE as usize, "{pa} outside the test window");
        unsafe { &mut *self.host.add(off).cast::<T>() }
    }
}

/// Physical address of window page `n`.
pub fn pa(n: u64) -> PhysicalAddress {
    PhysicalAddress::new(RAM_BASE + n * PAGE)
}

/// Sorted snapshot of every free list.
pub fn free_lists(mem: &TestMemory) -> Vec<Vec<u64>> {
    mem.inspect(|buddy| {
        (0..=10)
            .map(|order| {
                let mut v: Vec<u64> = buddy.free_blocks(order).map(|a| a.as_u64()).collect();
                v.sort_unstable();
                v
            })
            .collect()
    })
}
