//! # Virtual Memory Support
//!
//! Sv39 paging for a small RISC-V kernel: page-table entries, table nodes,
//! per-process address spaces and the copy-on-write fault resolver.
//!
//! ## What you get
//! - An [`AddressSpace`] describing one root page table and the operations on it
//!   (map, unmap, translate, duplicate, destroy, user copies), and the
//!   identity-mapped kernel space built from a [`KernelLayout`].
//! - Sv39 entry bits as [`PageEntryBits`], including the software COW marker.
//! - A 4 KiB-aligned [`PageTable`] node and its [`PageTableEntry`] slots.
//! - The seams to the rest of the kernel: [`FrameAlloc`] for physical pages and
//!   [`PhysMapper`] for touching them.
//!
//! ## Sv39 Virtual Address → Physical Address Walk
//!
//! A user virtual address is divided into three 9-bit indices and an offset:
//!
//! ```text
//! | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  L2   |  L1   |  L0   | Offset |
//! ```
//!
//! ```text
//!  satp → L2 table → L1 table → L0 table → Physical Page
//! ```
//!
//! | Level | Entry role |
//! |:------|:-----------|
//! | 2 (root) | Links to an L1 table. One per address space, referenced by `satp`. |
//! | 1 | Links to an L0 table. |
//! | 0 (leaf) | Maps a 4 KiB physical page with `R`/`W`/`X`/`U` permissions. |
//!
//! Addresses at or above [`MAX_VA`](info::MAX_VA) are never walked; bit 38 is
//! left clear so no sign extension is needed.
//!
//! ## Copy-on-write
//!
//! [`AddressSpace::duplicate`] shares every user page between parent and child:
//! writable leaves lose `W` and gain the COW marker on both sides, and the
//! page's reference count is bumped. The first store raises a store page fault,
//! and [`AddressSpace::cow_alloc`] replaces the faulting mapping with a private
//! copy.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

pub mod address_space;
mod cow;
mod page_entry_bits;
pub mod page_table;
mod tlb;

#[cfg(test)]
mod test_support;

use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress};

pub use crate::address_space::{AddressSpace, KernelLayout};
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::{Level, PageTable, PageTableEntry, TableIndex};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

/// Recoverable failures of address-space operations.
///
/// Invariant violations (walking past [`MAX_VA`](info::MAX_VA), unmapping a
/// missing page, inconsistent tree shape on teardown) are not represented here;
/// they panic.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmError {
    #[error("out of physical memory")]
    OutOfMemory,
    #[error("{0} is already mapped")]
    AlreadyMapped(VirtualAddress),
    #[error("{0} is not mapped")]
    NotMapped(VirtualAddress),
    #[error("{0} is not accessible from user mode")]
    NotUserAccessible(VirtualAddress),
    #[error("{0} is mapped read-only")]
    NotWritable(VirtualAddress),
    #[error("{0} is outside the user address range")]
    OutOfRange(VirtualAddress),
    #[error("string not terminated within {0} bytes")]
    StringTooLong(usize),
}

/// Source of physical 4 KiB pages for table nodes and user memory.
///
/// Pages handed out are zero-filled and carry one reference. Every page
/// obtained from [`alloc_4k`](Self::alloc_4k) or shared with
/// [`share_4k`](Self::share_4k) is given back exactly once through
/// [`release_4k`](Self::release_4k); the page returns to the free pool when
/// its last reference goes.
pub trait FrameAlloc {
    /// Allocate one zeroed page with a reference count of one.
    fn alloc_4k(&self) -> Option<PhysicalPage>;

    /// Record an additional mapping of an already allocated page.
    fn share_4k(&self, page: PhysicalPage);

    /// Drop one reference; frees the page when none remain.
    fn release_4k(&self, page: PhysicalPage);
}

/// Converts physical addresses to *temporarily* usable pointers in the current
/// virtual address space.
///
/// The kernel runs with RAM identity-mapped, so its mapper is a plain cast;
/// tests back "physical" memory with a host buffer.
///
/// # Safety
/// - `pa` must be mapped as writable in the current page tables for `&mut T`.
/// - Lifetime `'a` is purely borrow-checked; the mapping must remain valid
///   for `'a`.
/// - Type `T` must match the bytes at `pa` (no aliasing UB).
pub trait PhysMapper {
    /// Convert a *physical* address to a usable mutable reference.
    ///
    /// # Safety
    /// See the trait documentation.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;

    /// The bytes of one physical page.
    ///
    /// # Safety
    /// No other live reference may point into `page`.
    #[inline]
    unsafe fn page_bytes<'a>(&self, page: PhysicalPage) -> &'a mut [u8; info::PAGE_SIZE as usize] {
        unsafe { self.phys_to_mut(page.base()) }
    }
}

/// Map a physical page table frame and return a mutable reference to it.
///
/// # Safety
/// - `page` must hold a page table.
/// - No other live reference may point at the same table.
#[inline]
unsafe fn get_table<'a, M: PhysMapper + ?Sized>(m: &M, page: PhysicalPage) -> &'a mut PageTable {
    unsafe { m.phys_to_mut::<PageTable>(page.base()) }
}
