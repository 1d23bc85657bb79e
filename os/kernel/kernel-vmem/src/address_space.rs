//! # Address Space (Sv39, three-level)
//!
//! Strongly-typed helpers to build and manipulate a **single** virtual address
//! space: a tree of [`PageTable`] nodes rooted at one page.
//!
//! ## Highlights
//!
//! - [`AddressSpace::walk`] / [`AddressSpace::walk_or_create`] to reach the
//!   leaf slot for a VA, optionally allocating missing tables.
//! - [`AddressSpace::map_range`] / [`AddressSpace::unmap_range`] for runs of
//!   4 KiB pages.
//! - [`AddressSpace::translate`] to resolve a user VA to a PA.
//! - [`AddressSpace::duplicate`] to share every user page copy-on-write.
//! - [`AddressSpace::destroy`] for post-order teardown.
//!
//! ## Ownership
//!
//! Every valid non-leaf entry owns its child table; teardown follows that
//! direction only. Leaf pages are owned through their reference count and are
//! released by unmapping, never by the table teardown.
//!
//! ## Safety
//!
//! - Mutating live mappings requires TLB maintenance; this module issues a
//!   local `sfence.vma` for every leaf it rewrites.
//! - The provided `PhysMapper` must yield **writable** references to table frames.

mod kernel;
mod user;

pub use kernel::KernelLayout;

use crate::info::{MAX_VA, PAGE_SIZE, SATP_SV39};
use crate::page_table::{Level, PageTable, PageTableEntry, TableIndex};
use crate::tlb::flush_page;
use crate::{FrameAlloc, PageEntryBits, PhysMapper, VmError, get_table};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress, page_round_up};
use log::debug;

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    pub(crate) root: PhysicalPage,
    pub(crate) mapper: &'m M,
}

/// The root table page of an [`AddressSpace`].
pub type RootPage = PhysicalPage;

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// Allocate an empty root table.
    ///
    /// Returns `None` if no page is available.
    pub fn create<A: FrameAlloc>(mapper: &'m M, alloc: &A) -> Option<Self> {
        let root = alloc.alloc_4k()?;
        debug!("vmem: created address space rooted at {root}");
        Some(Self { root, mapper })
    }

    /// Wrap an existing root table.
    #[inline]
    pub const fn from_root(mapper: &'m M, root: RootPage) -> Self {
        Self { root, mapper }
    }

    /// Physical page of the root table.
    #[inline]
    pub const fn root_page(&self) -> RootPage {
        self.root
    }

    /// `satp` value selecting Sv39 translation through this root.
    #[inline]
    pub const fn satp(&self) -> u64 {
        SATP_SV39 | self.root.number()
    }

    /// Load `satp` with this address space’s root and flush the TLB.
    ///
    /// # Safety
    /// The currently executing code and the kernel's data must be mapped in
    /// the target space.
    #[cfg(target_arch = "riscv64")]
    #[inline]
    pub unsafe fn activate(&self) {
        crate::tlb::flush_all();
        unsafe {
            core::arch::asm!("csrw satp, {}", in(reg) self.satp(), options(nostack, preserves_flags));
        }
        crate::tlb::flush_all();
    }

    /// Borrow the table stored in `page`.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    fn table(&self, page: PhysicalPage) -> &mut PageTable {
        // SAFETY: table pages are only ever reached through this address
        // space, which is used by one hart at a time.
        unsafe { get_table(self.mapper, page) }
    }

    /// Descend to the leaf slot for `va`.
    ///
    /// With `alloc` present, missing intermediate tables are allocated and
    /// linked; without it, a missing table yields [`VmError::NotMapped`].
    #[allow(clippy::mut_from_ref)]
    fn descend(
        &self,
        va: VirtualAddress,
        alloc: Option<&dyn FrameAlloc>,
    ) -> Result<&mut PageTableEntry, VmError> {
        assert!(va.as_u64() < MAX_VA, "walk: {va} beyond the last user address");

        let mut page = self.root;
        for level in [Level::Root, Level::Middle] {
            let entry = self.table(page).entry_mut(TableIndex::of(va, level));
            if entry.is_valid() {
                assert!(
                    entry.is_table(),
                    "walk: leaf at {level:?} level while resolving {va}"
                );
                page = entry.page();
                continue;
            }

            let Some(alloc) = alloc else {
                return Err(VmError::NotMapped(va));
            };
            let child = alloc.alloc_4k().ok_or(VmError::OutOfMemory)?;
            *entry = PageTableEntry::make_table(child);
            page = child;
        }

        Ok(self.table(page).entry_mut(TableIndex::of(va, Level::Leaf)))
    }

    /// Leaf slot for `va`, or `None` if an intermediate table is missing.
    ///
    /// The returned slot may itself be invalid.
    ///
    /// # Panics
    /// If `va` is at or above [`MAX_VA`].
    pub fn walk(&mut self, va: VirtualAddress) -> Option<&mut PageTableEntry> {
        self.descend(va, None).ok()
    }

    /// Leaf slot for `va`, allocating intermediate tables as needed.
    ///
    /// # Errors
    /// [`VmError::OutOfMemory`] if a table page cannot be allocated. Tables
    /// linked before the failure stay in the tree and are reclaimed by
    /// [`destroy`](Self::destroy).
    ///
    /// # Panics
    /// If `va` is at or above [`MAX_VA`].
    pub fn walk_or_create<A: FrameAlloc>(
        &mut self,
        alloc: &A,
        va: VirtualAddress,
    ) -> Result<&mut PageTableEntry, VmError> {
        self.descend(va, Some(alloc as &dyn FrameAlloc))
    }

    /// Copy of the leaf entry for `va`, if its tables exist.
    fn lookup(&self, va: VirtualAddress) -> Option<PageTableEntry> {
        self.descend(va, None).ok().map(|e| *e)
    }

    /// Map `size` bytes at `va` to physical memory starting at `pa`.
    ///
    /// `va`, `pa` and `size` must be page aligned.
    ///
    /// # Errors
    /// - [`VmError::AlreadyMapped`] if any target slot is already valid.
    /// - [`VmError::OutOfMemory`] if a table page cannot be allocated.
    ///
    /// On error every entry installed by this call is removed again; the
    /// physical pages are not released.
    pub fn map_range<A: FrameAlloc>(
        &mut self,
        alloc: &A,
        va: VirtualAddress,
        size: u64,
        pa: PhysicalAddress,
        perm: PageEntryBits,
    ) -> Result<(), VmError> {
        assert!(size > 0, "map_range: empty range at {va}");
        assert!(
            va.is_page_aligned() && pa.is_page_aligned() && size.is_multiple_of(PAGE_SIZE),
            "map_range: unaligned request {va} -> {pa} ({size:#x} bytes)"
        );

        let pages = size / PAGE_SIZE;
        let mut vpage = va.page();
        let mut ppage = pa.page();
        for installed in 0..pages {
            let outcome = match self.walk_or_create(alloc, vpage.base()) {
                Ok(slot) if slot.is_valid() => Err(VmError::AlreadyMapped(vpage.base())),
                Ok(slot) => {
                    *slot = PageTableEntry::make_leaf(ppage, perm);
                    Ok(())
                }
                Err(e) => Err(e),
            };

            if let Err(e) = outcome {
                if installed > 0 {
                    self.unmap_range(alloc, va, installed, false);
                }
                return Err(e);
            }

            vpage = vpage.next();
            ppage = ppage.next();
        }
        Ok(())
    }

    /// Remove `n_pages` leaf mappings starting at `va`.
    ///
    /// With `free_physical`, each underlying page loses one reference.
    ///
    /// # Panics
    /// If `va` is unaligned or any page in the range is not mapped by a leaf.
    pub fn unmap_range<A: FrameAlloc>(
        &mut self,
        alloc: &A,
        va: VirtualAddress,
        n_pages: u64,
        free_physical: bool,
    ) {
        assert!(va.is_page_aligned(), "unmap_range: unaligned {va}");

        let mut vpage = va.page();
        for _ in 0..n_pages {
            let at = vpage.base();
            let Some(slot) = self.walk(at) else {
                panic!("unmap_range: no page table for {at}");
            };
            assert!(slot.is_valid(), "unmap_range: {at} not mapped");
            assert!(slot.is_leaf(), "unmap_range: {at} is not a leaf");

            let page = slot.page();
            *slot = PageTableEntry::zero();
            flush_page(at);
            if free_physical {
                alloc.release_4k(page);
            }
            vpage = vpage.next();
        }
    }

    /// Resolve a user virtual address, including its page offset.
    ///
    /// Returns `None` if `va` is out of range, unmapped, or not user accessible.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        if va.as_u64() >= MAX_VA {
            return None;
        }
        let entry = self.lookup(va)?;
        (entry.is_leaf() && entry.is_user()).then(|| entry.page().join(va.page_offset()))
    }

    /// Like [`translate`](Self::translate) without the user-access check.
    #[must_use]
    pub fn translate_kernel(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        if va.as_u64() >= MAX_VA {
            return None;
        }
        let entry = self.lookup(va)?;
        entry
            .is_leaf()
            .then(|| entry.page().join(va.page_offset()))
    }

    /// Share the user pages `[0, size)` of `self` with `child`.
    ///
    /// Writable pages become read-only copy-on-write in both spaces and every
    /// shared page gains a reference.
    ///
    /// # Errors
    /// [`VmError::OutOfMemory`] or [`VmError::AlreadyMapped`] from the child.
    /// Whatever was installed in `child` is unmapped again, and the
    /// references taken are dropped.
    ///
    /// # Panics
    /// If a page in `[0, size)` is missing from `self`.
    pub fn duplicate<A: FrameAlloc>(
        &mut self,
        child: &mut Self,
        alloc: &A,
        size: u64,
    ) -> Result<(), VmError> {
        let pages = page_round_up(size) / PAGE_SIZE;
        let mut vpage = VirtualAddress::zero().page();
        for shared in 0..pages {
            let at = vpage.base();
            let dst = match child.walk_or_create(alloc, at) {
                Ok(slot) if slot.is_valid() => Err(VmError::AlreadyMapped(at)),
                other => other,
            };
            let dst = match dst {
                Ok(slot) => slot,
                Err(e) => {
                    if shared > 0 {
                        child.unmap_range(alloc, VirtualAddress::zero(), shared, true);
                    }
                    return Err(e);
                }
            };

            let Some(src) = self.walk(at) else {
                panic!("duplicate: no page table for {at}");
            };
            assert!(src.is_leaf(), "duplicate: {at} not mapped");

            src.share_with(dst);
            flush_page(at);
            alloc.share_4k(src.page());
            vpage = vpage.next();
        }

        debug!(
            "vmem: shared {pages} pages of {} with {}",
            self.root, child.root
        );
        Ok(())
    }

    /// Release the user pages `[0, size)` and every table node.
    ///
    /// # Panics
    /// If a page in `[0, size)` is not mapped, or a leaf outside that range is
    /// still present when the tables are freed.
    pub fn destroy<A: FrameAlloc>(mut self, alloc: &A, size: u64) {
        let pages = page_round_up(size) / PAGE_SIZE;
        if pages > 0 {
            self.unmap_range(alloc, VirtualAddress::zero(), pages, true);
        }
        self.free_tables(alloc, self.root, Level::Root);
        debug!("vmem: destroyed address space rooted at {}", self.root);
    }

    /// Post-order release of the table in `page` and all tables below it.
    fn free_tables<A: FrameAlloc>(&self, alloc: &A, page: PhysicalPage, level: Level) {
        for slot in self.table(page).iter_mut() {
            if !slot.is_valid() {
                continue;
            }
            match level.next_lower() {
                Some(lower) if slot.is_table() => {
                    self.free_tables(alloc, slot.page(), lower);
                    *slot = PageTableEntry::zero();
                }
                _ => panic!(
                    "destroy: leaf {:#x} still mapped in table {page}",
                    slot.raw()
                ),
            }
        }
        alloc.release_4k(page);
    }
}
