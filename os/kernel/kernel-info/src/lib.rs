//! # Kernel Memory Layout
//!
//! Compile-time description of the board's physical memory and of the Sv39
//! virtual address space layout. Every other memory crate takes its constants
//! from here, so the allocator, the page-table walker and the trap code agree on
//! one layout.
//!
//! ## Physical Memory
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │  MMIO (CLINT, PLIC, UART, ...)  │
//! KERNBASE    ├─────────────────────────────────┤ 0x8000_0000
//!             │   Kernel Image (text, data)     │
//!             ├─────────────────────────────────┤ end of kernel image
//!             │   Buddy Arena                   │
//!             │   (managed by kernel-alloc)     │
//! PHYSTOP     └─────────────────────────────────┘ KERNBASE + 128 MiB
//! ```
//!
//! ## Virtual Memory (per process)
//!
//! ```text
//! 0x0000_0000_0000 ┌─────────────────────────────────┐
//!                  │  User text, data, heap          │
//!                  │  (grows upward, copy-on-write)  │
//!                  │            ...                  │
//! TRAPFRAME        ├─────────────────────────────────┤ MAX_VA - 2 pages
//!                  │  Trap frame (per process)       │
//! TRAMPOLINE       ├─────────────────────────────────┤ MAX_VA - 1 page
//!                  │  Trampoline (shared)            │
//! MAX_VA           └─────────────────────────────────┘ 1 << 38
//! ```
//!
//! The top two pages are mapped identically in every address space and are
//! never part of copy-on-write duplication or recursive teardown.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
