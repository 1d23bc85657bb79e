//! # Memory Layout

pub use kernel_memory_addresses::PAGE_SIZE;

/// Start of RAM; the kernel image is loaded here by the boot firmware.
pub const KERNBASE: u64 = 0x8000_0000;

/// End of usable RAM (exclusive). The board provides 128 MiB.
pub const PHYSTOP: u64 = KERNBASE + 128 * 1024 * 1024;

/// Number of pages in `[KERNBASE, PHYSTOP)`; sizes the per-page metadata tables.
#[allow(clippy::cast_possible_truncation)]
pub const MAX_PAGES: usize = ((PHYSTOP - KERNBASE) / PAGE_SIZE) as usize;

/// Largest buddy block order; a block of order `n` spans `2^n` pages (4 MiB at 10).
pub const MAX_ORDER: usize = 10;

/// Size in bytes of the largest buddy block.
pub const MAX_BLOCK_SIZE: u64 = PAGE_SIZE << MAX_ORDER;

/// One beyond the highest user virtual address.
///
/// Sv39 has 39 address bits, but addresses with bit 38 set would have to be
/// sign-extended; using only 38 bits avoids that.
pub const MAX_VA: u64 = 1 << 38;

/// Trampoline page holding the user/kernel trap transition code.
pub const TRAMPOLINE: u64 = MAX_VA - PAGE_SIZE;

/// Per-process trap frame, directly below the trampoline.
pub const TRAPFRAME: u64 = TRAMPOLINE - PAGE_SIZE;

/// `satp.MODE` value selecting Sv39 translation.
pub const SATP_SV39: u64 = 8 << 60;

/// NS16550 UART registers.
pub const UART0: u64 = 0x1000_0000;

/// virtio MMIO disk interface.
pub const VIRTIO0: u64 = 0x1000_1000;

/// Platform-level interrupt controller.
pub const PLIC: u64 = 0x0c00_0000;

/// Size of the PLIC register window.
pub const PLIC_SIZE: u64 = 0x40_0000;

/// Maximum number of processes, one kernel stack each.
pub const NPROC: usize = 64;

/// Virtual address of the kernel stack for process slot `slot`.
///
/// Stacks sit below the trampoline, each followed by an unmapped guard page.
#[must_use]
pub const fn kstack(slot: usize) -> u64 {
    TRAMPOLINE - (slot as u64 + 1) * 2 * PAGE_SIZE
}

const _: () = {
    assert!(KERNBASE.is_multiple_of(MAX_BLOCK_SIZE));
    assert!(PHYSTOP.is_multiple_of(PAGE_SIZE));
    assert!(TRAPFRAME < TRAMPOLINE);
    assert!(TRAMPOLINE < MAX_VA);
    assert!(MAX_ORDER < u8::MAX as usize);
    assert!(PLIC + PLIC_SIZE <= UART0);
    assert!(VIRTIO0 + PAGE_SIZE <= KERNBASE);
    assert!(kstack(NPROC - 1) > PHYSTOP);
};
