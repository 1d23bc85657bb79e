//! TLB maintenance.

use kernel_memory_addresses::VirtualAddress;

/// Invalidate the local hart's cached translation for `va`.
///
/// Other harts running the same address space are not shot down; this layer
/// assumes one hart per address space at a time.
#[inline]
pub fn flush_page(va: VirtualAddress) {
    #[cfg(target_arch = "riscv64")]
    unsafe {
        core::arch::asm!("sfence.vma {0}, zero", in(reg) va.as_u64(), options(nostack, preserves_flags));
    }
    #[cfg(not(target_arch = "riscv64"))]
    let _ = va;
}

/// Invalidate every cached translation on the local hart.
#[cfg(target_arch = "riscv64")]
#[inline]
pub fn flush_all() {
    unsafe {
        core::arch::asm!("sfence.vma zero, zero", options(nostack, preserves_flags));
    }
}
