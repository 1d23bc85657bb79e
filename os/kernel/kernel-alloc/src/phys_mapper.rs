//! # Identity PhysMapper
//!
//! The kernel maps RAM at its physical address (`KERNBASE..PHYSTOP` is
//! identity-mapped in the kernel page table), so turning a physical address
//! into a pointer is a plain cast.
//!
//! ## Example
//! ```rust,no_run
//! use kernel_alloc::phys_mapper::IdentityPhysMapper;
//! use kernel_memory_addresses::PhysicalAddress;
//! use kernel_vmem::{PageTable, PhysMapper};
//! let mapper = IdentityPhysMapper;
//! unsafe {
//!     let table: &mut PageTable = mapper.phys_to_mut(PhysicalAddress::new(0x8020_0000));
//!     table.zero();
//! }
//! ```

use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::PhysMapper;

/// [`PhysMapper`] for identity-mapped RAM.
///
/// # Safety
/// - The identity mapping must cover the referenced physical range.
/// - The returned reference must only be used for valid, writable memory.
#[derive(Copy, Clone, Debug, Default)]
pub struct IdentityPhysMapper;

impl PhysMapper for IdentityPhysMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let va = pa.as_u64() as usize as *mut T;
        // SAFETY: Caller must ensure the physical address is valid and identity-mapped.
        unsafe { &mut *va }
    }
}
