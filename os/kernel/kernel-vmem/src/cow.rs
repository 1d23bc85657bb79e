//! # Copy-on-write fault resolution
//!
//! A store to a page shared by [`AddressSpace::duplicate`] faults because the
//! leaf is read-only. The trap handler calls [`AddressSpace::cow_alloc`] with
//! the faulting address; the mapping is replaced by a private, writable copy
//! and the shared page loses one reference.

use crate::info::MAX_VA;
use crate::tlb::flush_page;
use crate::{AddressSpace, FrameAlloc, PhysMapper, VmError};
use kernel_memory_addresses::{PhysicalPage, VirtualAddress};
use log::trace;

impl<M: PhysMapper> AddressSpace<'_, M> {
    /// Give the page containing `va` a private copy if it is marked COW.
    ///
    /// Succeeds without changes when the page is mapped but not COW; whether
    /// such a write fault is fatal for the process is the caller's decision.
    ///
    /// The copy is made even when the current mapping holds the last
    /// reference to the shared page.
    ///
    /// # Errors
    /// - [`VmError::OutOfRange`] if `va` is at or above [`MAX_VA`].
    /// - [`VmError::NotMapped`] if there is no valid leaf for `va`.
    /// - [`VmError::NotUserAccessible`] if the leaf lacks `U`.
    /// - [`VmError::OutOfMemory`] if no page is available for the copy; the
    ///   mapping is left as it was.
    pub fn cow_alloc<A: FrameAlloc>(&mut self, alloc: &A, va: VirtualAddress) -> Result<(), VmError> {
        let va = va.page().base();
        if va.as_u64() >= MAX_VA {
            return Err(VmError::OutOfRange(va));
        }

        let mapper = self.mapper;
        let slot = match self.walk(va) {
            Some(slot) if slot.is_leaf() => slot,
            _ => return Err(VmError::NotMapped(va)),
        };
        if !slot.is_user() {
            return Err(VmError::NotUserAccessible(va));
        }
        if !slot.is_cow() {
            return Ok(());
        }

        let shared = slot.page();
        let private = alloc.alloc_4k().ok_or(VmError::OutOfMemory)?;
        // SAFETY: `private` is freshly allocated and distinct from `shared`.
        unsafe { copy_page(mapper, shared, private) };

        *slot = slot.into_private(private);
        flush_page(va);
        alloc.release_4k(shared);

        trace!("vmem: cow {va}: {shared} -> {private}");
        Ok(())
    }
}

/// Copy the contents of page `from` into page `to`.
///
/// # Safety
/// The pages must differ and no other reference may point into `to`.
unsafe fn copy_page<M: PhysMapper>(mapper: &M, from: PhysicalPage, to: PhysicalPage) {
    let src = unsafe { mapper.page_bytes(from) };
    let dst = unsafe { mapper.page_bytes(to) };
    dst.copy_from_slice(src);
}
