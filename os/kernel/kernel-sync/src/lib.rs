//! # Kernel synchronization primitives
//!
//! The memory core shares two structures between harts, the buddy free lists
//! and the page reference counts, each behind its own [`SpinLock`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod spin_lock;

pub use spin_lock::{SpinLock, SpinLockGuard};
