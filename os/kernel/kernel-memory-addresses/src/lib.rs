//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for raw addresses and 4 KiB page bases used by the
//! buddy allocator, the Sv39 page-table walker and the copy-on-write resolver.
//!
//! ## Overview
//!
//! This crate defines a minimal set of types that prevent mixing virtual and
//! physical addresses at compile time while remaining zero-cost wrappers around
//! `u64` values.
//!
//! | Concept | Description |
//! |----------|-------------|
//! | [`MemoryAddress`] | A raw 64-bit address, either physical or virtual. |
//! | [`PhysicalAddress`] / [`PhysicalPage`] | Physical memory (RAM or MMIO) and its 4 KiB page base. |
//! | [`VirtualAddress`] / [`VirtualPage`] | Page-table translated memory and its 4 KiB page base. |
//!
//! Sv39 has a single base page size of 4 KiB; larger mappings are not used by
//! this kernel, so the page types are not generic over a page size.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x0000_0000_0040_1234);
//! let page = va.page();
//! assert_eq!(page.base().as_u64(), 0x40_1000);
//! assert_eq!(page.join(va.page_offset()).as_u64(), va.as_u64());
//!
//! let pa = PhysicalAddress::new(0x8000_2042);
//! assert_eq!(pa.page().number(), 0x8_0002);
//! ```
//!
//! ## Design Notes
//!
//! - The types are `#[repr(transparent)]` and implement `Copy`, `Eq`, `Ord`, and
//!   `Hash`, making them suitable as map keys or for FFI use.
//! - All alignment and offset calculations are `const fn`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod memory_address;
mod physical_address;
mod physical_page;
mod virtual_address;
mod virtual_page;

pub use memory_address::MemoryAddress;
pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;
pub use virtual_address::VirtualAddress;
pub use virtual_page::VirtualPage;

/// Number of in-page offset bits.
const PAGE_SHIFT: u32 = 12;

/// Size of a base page in bytes.
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;

/// Round `x` up to the next page boundary.
///
/// ```rust
/// # use kernel_memory_addresses::page_round_up;
/// assert_eq!(page_round_up(0), 0);
/// assert_eq!(page_round_up(1), 4096);
/// assert_eq!(page_round_up(4096), 4096);
/// assert_eq!(page_round_up(4097), 8192);
/// ```
#[inline(always)]
#[must_use]
pub const fn page_round_up(x: u64) -> u64 {
    (x + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Round `x` down to the containing page boundary.
///
/// ```rust
/// # use kernel_memory_addresses::page_round_down;
/// assert_eq!(page_round_down(4095), 0);
/// assert_eq!(page_round_down(8191), 4096);
/// ```
#[inline(always)]
#[must_use]
pub const fn page_round_down(x: u64) -> u64 {
    x & !(PAGE_SIZE - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_split_and_join() {
        let va = VirtualAddress::new(0x3f_ffff_f123);
        let page = va.page();
        assert_eq!(page.base().as_u64(), 0x3f_ffff_f000);
        assert_eq!(va.page_offset(), 0x123);
        assert_eq!(page.join(va.page_offset()), va);
    }

    #[test]
    fn physical_page_numbers() {
        let page = PhysicalPage::from_number(0x8_0001);
        assert_eq!(page.base(), PhysicalAddress::new(0x8000_1000));
        assert_eq!(page.next().number(), 0x8_0002);
        assert_eq!(PhysicalAddress::new(0x8000_1fff).page(), page);
    }

    #[test]
    fn alignment_checks() {
        assert!(PhysicalAddress::new(0x8000_0000).is_page_aligned());
        assert!(!PhysicalAddress::new(0x8000_0008).is_page_aligned());
        assert!(VirtualAddress::zero().is_page_aligned());
        assert!(PhysicalAddress::zero().is_null());
    }

    #[test]
    fn rounding() {
        assert_eq!(page_round_up(0x1001), 0x2000);
        assert_eq!(page_round_down(0x1fff), 0x1000);
        assert_eq!(MemoryAddress::new(0x1001).align_up().as_u64(), 0x2000);
    }

    #[test]
    fn display_formats() {
        use std::format;
        assert_eq!(
            format!("{}", PhysicalAddress::new(0x8000_0000)),
            "0x0000000080000000"
        );
        assert_eq!(
            format!("{:?}", VirtualAddress::new(0x1000)),
            "VA(0x0000000000001000)"
        );
    }
}
