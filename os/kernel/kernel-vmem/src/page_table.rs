//! # Sv39 Page Table
//!
//! - [`Level`]: the three levels of the radix tree, root first.
//! - [`TableIndex`]: index into one table, derived from a 9-bit slice of the VA.
//! - [`PageTableEntry`]: one slot; either a leaf translation or a link to the
//!   next table.
//! - [`PageTable`]: a 4 KiB-aligned array of 512 entries.
//!
//! ## Invariants & Notes
//!
//! - A valid entry with none of `R`/`W`/`X` set links to a child table; a valid
//!   entry with any of them set is a leaf. This kernel maps 4 KiB pages only, so
//!   leaves exist at [`Level::Leaf`] alone.
//! - After modifying live mappings the caller performs TLB maintenance.

use crate::PageEntryBits;
use kernel_memory_addresses::{PhysicalPage, VirtualAddress};

/// Number of entries in one table node.
pub const ENTRIES_PER_TABLE: usize = 512;

/// Level of a table node in the Sv39 walk.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(u8)]
pub enum Level {
    /// Level 0; entries map 4 KiB pages.
    Leaf = 0,
    /// Level 1; entries link to leaf tables.
    Middle = 1,
    /// Level 2; the table referenced by `satp`.
    Root = 2,
}

impl Level {
    /// Bit position of this level's 9-bit index slice within a virtual address.
    #[inline]
    #[must_use]
    pub const fn shift(self) -> u32 {
        12 + 9 * self as u32
    }

    /// The level below, or `None` at the leaf level.
    #[inline]
    #[must_use]
    pub const fn next_lower(self) -> Option<Self> {
        match self {
            Self::Root => Some(Self::Middle),
            Self::Middle => Some(Self::Leaf),
            Self::Leaf => None,
        }
    }
}

/// Index into a single table node. Range is `0..512`.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TableIndex(u16);

impl TableIndex {
    /// Extract the index for `level` from `va`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn of(va: VirtualAddress, level: Level) -> Self {
        Self(((va.as_u64() >> level.shift()) & 0x1FF) as u16)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// A single page-table entry.
#[doc(alias = "PTE")]
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PageTableEntry(PageEntryBits);

impl PageTableEntry {
    /// Create a zero (invalid) entry.
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(PageEntryBits::new())
    }

    /// A leaf mapping `page` with permissions `perm`; `V` is forced on.
    #[inline]
    #[must_use]
    pub const fn make_leaf(page: PhysicalPage, perm: PageEntryBits) -> Self {
        debug_assert!(perm.has_access(), "leaf without R/W/X");
        Self(perm.flags_only().with_valid(true).with_page(page))
    }

    /// A link to the child table in `page`.
    #[inline]
    #[must_use]
    pub const fn make_table(page: PhysicalPage) -> Self {
        Self(PageEntryBits::new().with_valid(true).with_page(page))
    }

    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0.valid()
    }

    /// Valid and maps a page.
    #[inline]
    #[must_use]
    pub const fn is_leaf(self) -> bool {
        self.0.valid() && self.0.has_access()
    }

    /// Valid and links to a child table.
    #[inline]
    #[must_use]
    pub const fn is_table(self) -> bool {
        self.0.valid() && !self.0.has_access()
    }

    #[inline]
    #[must_use]
    pub const fn is_user(self) -> bool {
        self.0.user_access()
    }

    #[inline]
    #[must_use]
    pub const fn is_writable(self) -> bool {
        self.0.writable()
    }

    #[inline]
    #[must_use]
    pub const fn is_cow(self) -> bool {
        self.0.copy_on_write()
    }

    /// Physical page referenced by the entry (meaningless when invalid).
    #[inline]
    #[must_use]
    pub const fn page(self) -> PhysicalPage {
        self.0.page()
    }

    /// Expose the underlying bitfield.
    #[inline]
    #[must_use]
    pub const fn flags(self) -> PageEntryBits {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn with_flags(self, bits: PageEntryBits) -> Self {
        Self(bits)
    }

    /// Make `self` and `dst` share the page mapped by `self`.
    ///
    /// A writable source loses `W` and gains the COW marker *before* it is
    /// copied, so both entries end up read-only COW. Read-only sources are
    /// copied as they are.
    #[inline]
    pub const fn share_with(&mut self, dst: &mut Self) {
        if self.0.writable() {
            self.0 = self.0.with_writable(false).with_copy_on_write(true);
        }
        *dst = *self;
    }

    /// The entry after the COW page was copied to `fresh`: writable, unshared.
    #[inline]
    #[must_use]
    pub const fn into_private(self, fresh: PhysicalPage) -> Self {
        Self(
            self.0
                .with_page(fresh)
                .with_copy_on_write(false)
                .with_writable(true),
        )
    }

    /// Return the raw 64-bit value (flags + page number).
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0.into_bits()
    }
}

/// One table node: 512 entries, 4 KiB-aligned.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; ENTRIES_PER_TABLE],
}

const _: () = assert!(size_of::<PageTable>() == 4096);

impl PageTable {
    /// Invalidate every entry.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PageTableEntry::zero());
    }

    /// Mutable access to the slot at `i`.
    #[inline]
    pub const fn entry_mut(&mut self, i: TableIndex) -> &mut PageTableEntry {
        &mut self.entries[i.as_usize()]
    }

    /// Iterate over all slots.
    #[inline]
    pub fn iter_mut(&mut self) -> core::slice::IterMut<'_, PageTableEntry> {
        self.entries.iter_mut()
    }
}
