//! # Kernel Physical Memory Allocation
//!
//! Physical page management for the kernel: a buddy allocator for blocks of
//! `2^order` pages and a per-page reference count that lets address spaces
//! share pages copy-on-write.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │        Address spaces (kernel-vmem)                 │
//! │    • page tables, duplicate, COW faults             │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ FrameAlloc
//! ┌─────────────────▼───────────────────────────────────┐
//! │              PhysicalMemory                         │
//! │    • allocate_page / free_page (reference counted)  │
//! │    • allocate_pages / free_pages (FrameBlock)       │
//! └───────┬─────────────────────────────┬───────────────┘
//!         │                             │
//! ┌───────▼──────────────┐   ┌──────────▼──────────────┐
//! │   RefCounts          │   │   BuddyAllocator        │
//! │   • own lock         │   │   • orders 0..=10       │
//! │   • publish/inc/dec  │   │   • split and coalesce  │
//! └──────────────────────┘   └─────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! - [`buddy`]: free lists per order with links embedded in the free blocks
//!   and a flat per-page metadata table.
//! - [`refcount`]: one counter per page; a page goes back to the buddy
//!   allocator only when its count drops to zero.
//! - [`phys_memory`]: [`PhysicalMemory`] combines both behind their own
//!   locks and implements [`FrameAlloc`](kernel_vmem::FrameAlloc).
//! - [`pmm`]: the kernel's single instance over `KERNBASE..PHYSTOP`.
//! - [`phys_mapper`]: identity mapping from physical addresses to pointers.
//!
//! ## Usage
//! ```rust,no_run
//! use kernel_alloc::pmm;
//! use kernel_memory_addresses::PhysicalAddress;
//!
//! pmm::init(PhysicalAddress::new(0x8002_1000));
//! let page = pmm::allocate_page().expect("out of memory");
//! pmm::free_page(page);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod buddy;
pub mod phys_mapper;
pub mod phys_memory;
pub mod pmm;
pub mod refcount;

pub use crate::phys_memory::{FrameBlock, PhysicalMemory};
