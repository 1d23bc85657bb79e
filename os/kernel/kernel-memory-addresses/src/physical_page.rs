use crate::{PAGE_SHIFT, PAGE_SIZE, PhysicalAddress};
use core::fmt;

/// Base of a 4 KiB physical page.
///
/// ### Invariants
/// - The low 12 bits of the base are always zero.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let page = PhysicalAddress::new(0x8000_3abc).page();
/// assert_eq!(page.base().as_u64(), 0x8000_3000);
/// assert_eq!(PhysicalPage::from_number(page.number()), page);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage(u64);

impl PhysicalPage {
    /// Page that contains `pa` (aligns down).
    #[inline]
    #[must_use]
    pub const fn from_addr(pa: PhysicalAddress) -> Self {
        Self(pa.as_u64() & !(PAGE_SIZE - 1))
    }

    /// Page from its physical page number (PPN).
    #[inline]
    #[must_use]
    pub const fn from_number(ppn: u64) -> Self {
        Self(ppn << PAGE_SHIFT)
    }

    /// The physical page number (PPN) as stored in a page-table entry.
    #[inline]
    #[must_use]
    pub const fn number(self) -> u64 {
        self.0 >> PAGE_SHIFT
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0)
    }

    /// Combine with an in-page offset to form a full address.
    #[inline]
    #[must_use]
    pub const fn join(self, offset: u64) -> PhysicalAddress {
        debug_assert!(offset < PAGE_SIZE, "offset must be < page size");
        PhysicalAddress::new(self.0 + offset)
    }

    /// The page directly following this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + PAGE_SIZE)
    }
}

impl fmt::Display for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}/4K", self.0)
    }
}

impl fmt::Debug for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPage({:#018X})", self.0)
    }
}
