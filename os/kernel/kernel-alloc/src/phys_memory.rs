//! # Physical Memory
//!
//! The buddy allocator and the reference-count table behind one interface.
//!
//! Single pages ([`PhysicalMemory::allocate_page`]) are reference counted and
//! may be shared between address spaces. Multi-page blocks
//! ([`PhysicalMemory::allocate_pages`]) come back as a [`FrameBlock`], which
//! is never counted and can only be released through
//! [`PhysicalMemory::free_pages`].
//!
//! ## Locking
//!
//! The allocator lock and the reference-count lock are never held together.
//! A decrement that drops the last reference releases the count lock before
//! taking the allocator lock. Nothing is logged while either lock is held.

use crate::buddy::{BuddyAllocator, order_for, pages_in};
use crate::refcount::RefCounts;
use core::sync::atomic::{AtomicBool, Ordering};
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};
use kernel_sync::SpinLock;
use kernel_vmem::{FrameAlloc, PhysMapper};
use log::{info, warn};

/// A block of `2^order` contiguous pages from [`PhysicalMemory::allocate_pages`].
///
/// Not reference counted; must not be mapped into more than one address
/// space. Dropping it leaks the pages.
#[derive(Debug, Eq, PartialEq)]
#[must_use = "a FrameBlock must be returned with free_pages"]
pub struct FrameBlock {
    base: PhysicalAddress,
    order: u8,
}

impl FrameBlock {
    #[inline]
    #[must_use]
    pub const fn base(&self) -> PhysicalAddress {
        self.base
    }

    #[inline]
    #[must_use]
    pub const fn order(&self) -> usize {
        self.order as usize
    }

    #[inline]
    #[must_use]
    pub const fn page_count(&self) -> usize {
        pages_in(self.order as usize)
    }

    /// Size of the block in bytes.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> u64 {
        PAGE_SIZE << self.order
    }

    /// First page of the block.
    #[inline]
    #[must_use]
    pub const fn first_page(&self) -> PhysicalPage {
        self.base.page()
    }
}

/// Physical memory manager for a window of `PAGES` pages.
pub struct PhysicalMemory<M: PhysMapper, const PAGES: usize> {
    mapper: M,
    buddy: SpinLock<BuddyAllocator<M, PAGES>>,
    refs: RefCounts<PAGES>,
    initialized: AtomicBool,
}

impl<M: PhysMapper + Copy, const PAGES: usize> PhysicalMemory<M, PAGES> {
    /// A manager for the window starting at `window_base`; empty until
    /// [`init`](Self::init).
    ///
    /// # Panics
    /// If `window_base` is null or not aligned to the largest buddy block.
    pub const fn new(mapper: M, window_base: PhysicalAddress) -> Self {
        Self {
            mapper,
            buddy: SpinLock::named("buddy", BuddyAllocator::new(mapper, window_base)),
            refs: RefCounts::new(window_base),
            initialized: AtomicBool::new(false),
        }
    }
}

impl<M: PhysMapper, const PAGES: usize> PhysicalMemory<M, PAGES> {
    /// Release every page of `[start, end)` into the free lists.
    ///
    /// # Panics
    /// On a second call, or if the range leaves the window.
    pub fn init(&self, start: PhysicalAddress, end: PhysicalAddress) {
        assert!(
            !self.initialized.swap(true, Ordering::AcqRel),
            "pmm: initialized twice"
        );
        let pages = self.buddy.lock().release_range(start, end);
        info!(
            "pmm: {pages} pages ({} KiB) free in {start}..{end}",
            pages as u64 * PAGE_SIZE / 1024
        );
    }

    /// Whether [`init`](Self::init) has run.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// The mapper used to reach physical pages.
    #[inline]
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }

    /// Allocate one zeroed page with a reference count of one.
    pub fn allocate_page(&self) -> Option<PhysicalAddress> {
        let Some(pa) = self.buddy.lock().allocate(0) else {
            warn!("pmm: out of pages");
            return None;
        };
        self.refs.publish(pa);
        Some(pa)
    }

    /// Allocate the smallest block holding `count` zeroed pages.
    ///
    /// Returns `None` for `count == 0`, for more pages than the largest block,
    /// or when no block is available.
    pub fn allocate_pages(&self, count: usize) -> Option<FrameBlock> {
        let order = order_for(count)?;
        let Some(base) = self.buddy.lock().allocate(order) else {
            warn!("pmm: no block of {count} pages");
            return None;
        };
        #[allow(clippy::cast_possible_truncation)]
        let order = order as u8;
        Some(FrameBlock { base, order })
    }

    /// Return a block from [`allocate_pages`](Self::allocate_pages).
    ///
    /// # Panics
    /// If the allocator disagrees about the block's size.
    pub fn free_pages(&self, block: FrameBlock) {
        let mut buddy = self.buddy.lock();
        assert_eq!(
            buddy.allocated_order(block.base),
            Some(block.order()),
            "pmm: {} is not an allocated block of order {}",
            block.base,
            block.order
        );
        buddy.free(block.base);
    }

    /// Drop one reference to the page at `pa`; a null address is ignored.
    ///
    /// # Panics
    /// If `pa` is outside physical memory or has no references left.
    pub fn free_page(&self, pa: PhysicalAddress) {
        if pa.is_null() {
            return;
        }
        self.decrement_and_maybe_free(pa);
    }

    /// Record an additional mapping of the page at `pa`.
    ///
    /// # Panics
    /// If `pa` is out of range or has no owner.
    pub fn increment(&self, pa: PhysicalAddress) {
        self.refs.increment(pa);
    }

    /// Drop one reference; the page goes back to the buddy allocator when it
    /// was the last one.
    ///
    /// # Panics
    /// On reference-count underflow.
    pub fn decrement_and_maybe_free(&self, pa: PhysicalAddress) {
        let page = pa.page().base();
        if self.refs.decrement(page) == 0 {
            self.buddy.lock().free(page);
        }
    }

    /// Current reference count of the page containing `pa`.
    #[must_use]
    pub fn ref_count(&self, pa: PhysicalAddress) -> u32 {
        self.refs.count(pa)
    }

    /// Number of free pages.
    #[must_use]
    pub fn free_page_count(&self) -> usize {
        self.buddy.lock().free_pages()
    }

    /// Whether `pa` lies in a free block.
    #[must_use]
    pub fn is_free(&self, pa: PhysicalAddress) -> bool {
        self.buddy.lock().is_free(pa)
    }

    /// Run `f` with the allocator locked, for diagnostics.
    ///
    /// `f` must not allocate or log.
    pub fn inspect<R>(&self, f: impl FnOnce(&BuddyAllocator<M, PAGES>) -> R) -> R {
        let buddy = self.buddy.lock();
        f(&buddy)
    }
}

impl<M: PhysMapper, const PAGES: usize> FrameAlloc for PhysicalMemory<M, PAGES> {
    fn alloc_4k(&self) -> Option<PhysicalPage> {
        self.allocate_page().map(PhysicalAddress::page)
    }

    fn share_4k(&self, page: PhysicalPage) {
        self.increment(page.base());
    }

    fn release_4k(&self, page: PhysicalPage) {
        self.decrement_and_maybe_free(page.base());
    }
}
