//! # Buddy Allocator
//!
//! Power-of-two block allocator over one window of physical memory.
//!
//! ```text
//! order 2: [               8000_0000 .. 8000_4000               ]
//! order 1: [ 8000_0000 .. 8000_2000 ][ 8000_2000 .. 8000_4000 ]
//! order 0: [  0000 ][  1000 ]        [  2000 ][  3000 ]
//! ```
//!
//! A block of order `n` spans `2^n` pages and is aligned to its own size. Its
//! buddy is found by flipping bit `12 + n` of its address; two free buddies of
//! the same order merge into one block of order `n + 1`.
//!
//! ## Storage
//!
//! Free blocks are kept in one singly-linked list per order. The link lives in
//! the first eight bytes of the free block itself and is reached through the
//! [`PhysMapper`]. Per-page metadata (order and state of the block starting at
//! that page) is a flat array indexed by page number relative to the window.
//!
//! ## Invariants
//! - The window base is aligned to the largest block, so buddy arithmetic on
//!   absolute addresses stays inside aligned blocks.
//! - A block is on the list for order `n` iff its base page has state
//!   [`BlockState::Free`] with order `n`.
//! - Pages that are not the base of a block are [`BlockState::Interior`].

use kernel_info::memory::{MAX_BLOCK_SIZE, MAX_ORDER, PAGE_SIZE};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, page_round_down, page_round_up};
use kernel_vmem::PhysMapper;

/// State of the block whose base is a given page.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BlockState {
    /// Not the base of any block (inside a larger block, or not managed).
    Interior,
    /// Base of a block on a free list.
    Free,
    /// Base of a block handed out by [`BuddyAllocator::allocate`].
    Allocated,
}

#[derive(Copy, Clone, Debug)]
struct PageMeta {
    order: u8,
    state: BlockState,
}

impl PageMeta {
    const INTERIOR: Self = Self {
        order: 0,
        state: BlockState::Interior,
    };
}

/// Link stored at the start of every free block.
#[repr(C)]
struct FreeLink {
    /// Physical address of the next free block of the same order; `0` ends the list.
    next: u64,
}

/// Buddy allocator for a window of `PAGES` pages starting at `base`.
pub struct BuddyAllocator<M: PhysMapper, const PAGES: usize> {
    mapper: M,
    base: PhysicalPage,
    /// Managed range `[arena_start, arena_end)` as page indices into `meta`.
    arena_start: usize,
    arena_end: usize,
    heads: [Option<PhysicalPage>; MAX_ORDER + 1],
    lengths: [usize; MAX_ORDER + 1],
    meta: [PageMeta; PAGES],
    free_pages: usize,
}

/// Number of pages in a block of `order`.
#[inline]
#[must_use]
pub const fn pages_in(order: usize) -> usize {
    1 << order
}

/// Smallest order whose block holds `count` pages.
///
/// Returns `None` for `count == 0` or more pages than the largest block.
#[must_use]
pub const fn order_for(count: usize) -> Option<usize> {
    if count == 0 || count > pages_in(MAX_ORDER) {
        return None;
    }
    Some(count.next_power_of_two().trailing_zeros() as usize)
}

/// Address of the buddy of the order-`order` block at `block`.
#[inline]
#[must_use]
pub const fn buddy_of(block: PhysicalAddress, order: usize) -> PhysicalAddress {
    PhysicalAddress::new(block.as_u64() ^ (PAGE_SIZE << order))
}

impl<M: PhysMapper, const PAGES: usize> BuddyAllocator<M, PAGES> {
    /// An allocator with no free memory for the window starting at `window_base`.
    ///
    /// # Panics
    /// If `window_base` is null or not aligned to the largest block.
    pub const fn new(mapper: M, window_base: PhysicalAddress) -> Self {
        assert!(!window_base.is_null(), "buddy: window at address zero");
        assert!(
            window_base.as_u64().is_multiple_of(MAX_BLOCK_SIZE),
            "buddy: window not aligned to the largest block"
        );
        Self {
            mapper,
            base: PhysicalPage::from_addr(window_base),
            arena_start: 0,
            arena_end: 0,
            heads: [None; MAX_ORDER + 1],
            lengths: [0; MAX_ORDER + 1],
            meta: [PageMeta::INTERIOR; PAGES],
            free_pages: 0,
        }
    }

    /// Hand every page of `[start, end)` to the allocator.
    ///
    /// `start` is rounded up and `end` down to page boundaries. Returns the
    /// number of pages added.
    ///
    /// # Panics
    /// If the range leaves the window, or memory was already added.
    pub fn release_range(&mut self, start: PhysicalAddress, end: PhysicalAddress) -> usize {
        assert_eq!(self.arena_end, 0, "buddy: arena already initialized");
        let lo = page_round_up(start.as_u64());
        let hi = page_round_down(end.as_u64());
        let window = self.base.base().as_u64()..=self.window_end().base().as_u64();
        assert!(
            window.contains(&lo) && window.contains(&hi),
            "buddy: arena {start}..{end} outside the window at {}",
            self.base
        );
        if lo >= hi {
            return 0;
        }

        let first = self.expect_index(PhysicalAddress::new(lo));
        let last = first + usize::try_from((hi - lo) / PAGE_SIZE).unwrap_or(0);
        self.arena_start = first;
        self.arena_end = last;
        for idx in first..last {
            self.set_meta(idx, 0, BlockState::Allocated);
            self.free(self.address_of(idx));
        }
        last - first
    }

    /// Remove a zero-filled block of `2^order` pages from the free lists.
    ///
    /// Returns `None` if `order` exceeds [`MAX_ORDER`] or no block is large
    /// enough.
    pub fn allocate(&mut self, order: usize) -> Option<PhysicalAddress> {
        if order > MAX_ORDER {
            return None;
        }

        let mut current = (order..=MAX_ORDER).find(|&o| self.heads[o].is_some())?;
        let block = self.pop(current)?;
        while current > order {
            current -= 1;
            let upper = PhysicalAddress::new(block.as_u64() + (PAGE_SIZE << current));
            self.push(upper, current);
        }

        let idx = self.expect_index(block);
        self.set_meta(idx, order, BlockState::Allocated);
        self.free_pages -= pages_in(order);

        let mut page = block.page();
        for _ in 0..pages_in(order) {
            // SAFETY: the page belongs to the block just taken off the lists.
            let bytes = unsafe { self.mapper.page_bytes(page) };
            bytes.fill(0);
            page = page.next();
        }
        Some(block)
    }

    /// Return the block starting at `pa` and merge it with free buddies.
    ///
    /// # Panics
    /// If `pa` is null, outside the arena, already free, not the start of an
    /// allocated block, or misaligned for the block's order.
    pub fn free(&mut self, pa: PhysicalAddress) {
        assert!(!pa.is_null(), "buddy: free of address zero");
        let idx = match self.index_of(pa) {
            Some(idx) if (self.arena_start..self.arena_end).contains(&idx) => idx,
            _ => panic!("buddy: free of {pa} outside the arena"),
        };
        let meta = self.meta[idx];
        match meta.state {
            BlockState::Allocated => {}
            BlockState::Free => panic!("buddy: double free of {pa}"),
            BlockState::Interior => panic!("buddy: {pa} is not the start of an allocated block"),
        }

        let mut order = usize::from(meta.order);
        assert!(
            pa.as_u64().is_multiple_of(PAGE_SIZE << order),
            "buddy: {pa} misaligned for order {order}"
        );
        self.free_pages += pages_in(order);
        self.meta[idx] = PageMeta::INTERIOR;

        let mut block = pa;
        while order < MAX_ORDER {
            let buddy = buddy_of(block, order);
            let Some(bidx) = self.index_of(buddy) else {
                break;
            };
            let bm = self.meta[bidx];
            if bm.state != BlockState::Free || usize::from(bm.order) != order {
                break;
            }
            self.unlink(buddy, order);
            self.meta[bidx] = PageMeta::INTERIOR;
            block = if buddy.as_u64() < block.as_u64() { buddy } else { block };
            order += 1;
        }
        self.push(block, order);
    }

    /// Number of free pages over all lists.
    #[inline]
    #[must_use]
    pub const fn free_pages(&self) -> usize {
        self.free_pages
    }

    /// Number of blocks on the list for `order`.
    #[inline]
    #[must_use]
    pub const fn free_list_len(&self, order: usize) -> usize {
        self.lengths[order]
    }

    /// Walk the free list for `order`, head first.
    pub fn free_blocks(&self, order: usize) -> FreeBlocks<'_, M, PAGES> {
        FreeBlocks {
            alloc: self,
            next: self.heads[order],
        }
    }

    /// Whether `pa` lies inside a free block.
    #[must_use]
    pub fn is_free(&self, pa: PhysicalAddress) -> bool {
        (0..=MAX_ORDER).any(|order| {
            let base = PhysicalAddress::new(pa.as_u64() & !((PAGE_SIZE << order) - 1));
            self.index_of(base).is_some_and(|idx| {
                let m = self.meta[idx];
                m.state == BlockState::Free && usize::from(m.order) == order
            })
        })
    }

    /// Order recorded for the allocated block starting at `pa`.
    #[must_use]
    pub fn allocated_order(&self, pa: PhysicalAddress) -> Option<usize> {
        let m = self.meta[self.index_of(pa)?];
        (m.state == BlockState::Allocated).then_some(usize::from(m.order))
    }

    #[inline]
    const fn window_end(&self) -> PhysicalPage {
        PhysicalPage::from_number(self.base.number() + PAGES as u64)
    }

    /// Page index of `pa` within the window.
    #[inline]
    fn index_of(&self, pa: PhysicalAddress) -> Option<usize> {
        let page = pa.page().number().checked_sub(self.base.number())?;
        let idx = usize::try_from(page).ok()?;
        (idx < PAGES).then_some(idx)
    }

    #[inline]
    fn expect_index(&self, pa: PhysicalAddress) -> usize {
        self.index_of(pa)
            .unwrap_or_else(|| panic!("buddy: {pa} outside the window"))
    }

    #[inline]
    const fn address_of(&self, idx: usize) -> PhysicalAddress {
        PhysicalPage::from_number(self.base.number() + idx as u64).base()
    }

    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    const fn set_meta(&mut self, idx: usize, order: usize, state: BlockState) {
        self.meta[idx] = PageMeta {
            order: order as u8,
            state,
        };
    }

    #[inline]
    #[allow(clippy::mut_from_ref)]
    fn link(&self, block: PhysicalAddress) -> &mut FreeLink {
        // SAFETY: free blocks are owned by the allocator; only their first
        // bytes are touched while on a list.
        unsafe { self.mapper.phys_to_mut::<FreeLink>(block) }
    }

    fn push(&mut self, block: PhysicalAddress, order: usize) {
        let next = self.heads[order].map_or(0, |p| p.base().as_u64());
        self.link(block).next = next;
        self.heads[order] = Some(block.page());
        self.lengths[order] += 1;

        let idx = self.expect_index(block);
        self.set_meta(idx, order, BlockState::Free);
    }

    fn pop(&mut self, order: usize) -> Option<PhysicalAddress> {
        let head = self.heads[order]?.base();
        let next = self.link(head).next;
        self.heads[order] = (next != 0).then(|| PhysicalAddress::new(next).page());
        self.lengths[order] -= 1;
        Some(head)
    }

    /// Remove `block` from the list for `order`.
    fn unlink(&mut self, block: PhysicalAddress, order: usize) {
        let target = block.as_u64();
        let mut prev: Option<PhysicalAddress> = None;
        let mut cursor = self.heads[order].map_or(0, |p| p.base().as_u64());
        while cursor != 0 && cursor != target {
            prev = Some(PhysicalAddress::new(cursor));
            cursor = self.link(PhysicalAddress::new(cursor)).next;
        }
        assert_ne!(cursor, 0, "buddy: {block} missing from the order {order} list");

        let next = self.link(block).next;
        match prev {
            None => self.heads[order] = (next != 0).then(|| PhysicalAddress::new(next).page()),
            Some(prev) => self.link(prev).next = next,
        }
        self.lengths[order] -= 1;
    }
}

/// Iterator over one free list; see [`BuddyAllocator::free_blocks`].
pub struct FreeBlocks<'a, M: PhysMapper, const PAGES: usize> {
    alloc: &'a BuddyAllocator<M, PAGES>,
    next: Option<PhysicalPage>,
}

impl<M: PhysMapper, const PAGES: usize> Iterator for FreeBlocks<'_, M, PAGES> {
    type Item = PhysicalAddress;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?.base();
        let next = self.alloc.link(current).next;
        self.next = (next != 0).then(|| PhysicalAddress::new(next).page());
        Some(current)
    }
}
