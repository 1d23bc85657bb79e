//! # Page Reference Counts
//!
//! One counter per page of the physical window, counting the mappings that
//! alias the page. A page with a non-zero count must never be on a buddy free
//! list. The table has its own lock, separate from the allocator's.

use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};
use kernel_sync::SpinLock;

pub struct RefCounts<const PAGES: usize> {
    base: PhysicalPage,
    counts: SpinLock<[u32; PAGES]>,
}

impl<const PAGES: usize> RefCounts<PAGES> {
    pub const fn new(window_base: PhysicalAddress) -> Self {
        Self {
            base: PhysicalPage::from_addr(window_base),
            counts: SpinLock::named("refcount", [0; PAGES]),
        }
    }

    fn index(&self, pa: PhysicalAddress) -> usize {
        pa.page()
            .number()
            .checked_sub(self.base.number())
            .and_then(|i| usize::try_from(i).ok())
            .filter(|&i| i < PAGES)
            .unwrap_or_else(|| panic!("refcount: {pa} outside physical memory"))
    }

    /// Give a freshly allocated page its first owner.
    ///
    /// # Panics
    /// If the page already has owners.
    pub fn publish(&self, pa: PhysicalAddress) {
        let idx = self.index(pa);
        self.counts.with_lock(|counts| {
            assert_eq!(counts[idx], 0, "refcount: publish of {pa} which is in use");
            counts[idx] = 1;
        });
    }

    /// Record one more mapping of `pa`.
    ///
    /// # Panics
    /// If `pa` is out of range or was never published.
    pub fn increment(&self, pa: PhysicalAddress) {
        let idx = self.index(pa);
        self.counts.with_lock(|counts| {
            assert_ne!(counts[idx], 0, "refcount: sharing {pa} which has no owner");
            counts[idx] += 1;
        });
    }

    /// Drop one mapping of `pa` and return how many remain.
    ///
    /// # Panics
    /// If the count is already zero.
    pub fn decrement(&self, pa: PhysicalAddress) -> u32 {
        let idx = self.index(pa);
        self.counts.with_lock(|counts| {
            let Some(left) = counts[idx].checked_sub(1) else {
                panic!("refcount: underflow on {pa}");
            };
            counts[idx] = left;
            left
        })
    }

    /// Current count of `pa`.
    #[must_use]
    pub fn count(&self, pa: PhysicalAddress) -> u32 {
        let idx = self.index(pa);
        self.counts.with_lock(|counts| counts[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_info::memory::PAGE_SIZE;

    const BASE: u64 = 0x8000_0000;

    fn pa(page: u64) -> PhysicalAddress {
        PhysicalAddress::new(BASE + page * PAGE_SIZE)
    }

    #[test]
    fn publish_share_and_drop() {
        let refs = RefCounts::<16>::new(pa(0));
        refs.publish(pa(3));
        refs.increment(pa(3));
        refs.increment(pa(3));
        assert_eq!(refs.count(pa(3)), 3);
        assert_eq!(refs.decrement(pa(3)), 2);
        assert_eq!(refs.decrement(pa(3)), 1);
        assert_eq!(refs.decrement(pa(3)), 0);
        assert_eq!(refs.count(pa(4)), 0);
    }

    #[test]
    fn offsets_within_a_page_share_a_counter() {
        let refs = RefCounts::<16>::new(pa(0));
        refs.publish(pa(2));
        refs.increment(PhysicalAddress::new(pa(2).as_u64() + 0x10));
        assert_eq!(refs.count(pa(2)), 2);
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn decrement_below_zero_panics() {
        let refs = RefCounts::<16>::new(pa(0));
        refs.publish(pa(1));
        refs.decrement(pa(1));
        refs.decrement(pa(1));
    }

    #[test]
    #[should_panic(expected = "has no owner")]
    fn sharing_an_unpublished_page_panics() {
        let refs = RefCounts::<16>::new(pa(0));
        refs.increment(pa(5));
    }

    #[test]
    #[should_panic(expected = "which is in use")]
    fn double_publish_panics() {
        let refs = RefCounts::<16>::new(pa(0));
        refs.publish(pa(5));
        refs.publish(pa(5));
    }

    #[test]
    #[should_panic(expected = "outside physical memory")]
    fn out_of_range_panics() {
        let refs = RefCounts::<16>::new(pa(0));
        refs.increment(pa(16));
    }
}
