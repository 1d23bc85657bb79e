use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalPage;

/// A single 64-bit Sv39 page-table entry in its raw bitfield form.
///
/// The same layout is used at all three levels. Whether an entry is a leaf
/// (a translation) or a pointer to the next table is decided by the
/// `R`/`W`/`X` bits: a valid entry with all three clear points to a child
/// table, a valid entry with any of them set maps a page.
///
/// ### Bit layout
///
/// | Bits   | Name  | Meaning |
/// |--------|-------|---------|
/// | 0      | `V`   | Entry is valid |
/// | 1      | `R`   | Readable |
/// | 2      | `W`   | Writable |
/// | 3      | `X`   | Executable |
/// | 4      | `U`   | Accessible from user mode |
/// | 5      | `G`   | Global mapping |
/// | 6      | `A`   | Accessed |
/// | 7      | `D`   | Dirty |
/// | 8      | `COW` | Copy-on-write marker (first RSW bit, ignored by hardware) |
/// | 9      | RSW   | Reserved for software |
/// | 10–53  | `PPN` | Physical page number |
/// | 54–63  | –     | Reserved, must be zero |
///
/// ### Notes
/// - `W` without `R` is a reserved encoding; the constructors below never
///   produce it.
/// - Whenever `COW` is set, `W` is clear, so a store through the mapping
///   raises a store page fault that the copy-on-write resolver handles.
///
/// ### Example
/// ```rust
/// # use kernel_vmem::PageEntryBits;
/// let e = PageEntryBits::user_rw().with_valid(true).with_ppn(0x8_0001);
/// assert!(e.writable());
/// assert_eq!(e.ppn(), 0x8_0001);
/// ```
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Valid (`V`, bit 0).
    pub valid: bool,

    /// Readable (`R`, bit 1).
    pub readable: bool,

    /// Writable (`W`, bit 2).
    pub writable: bool,

    /// Executable (`X`, bit 3).
    pub executable: bool,

    /// User (`U`, bit 4).
    ///
    /// Set to allow U-mode access; supervisor access to such pages requires
    /// `sstatus.SUM`.
    pub user_access: bool,

    /// Global (`G`, bit 5). Present in all address spaces.
    pub global_mapping: bool,

    /// Accessed (`A`, bit 6). Maintained by hardware or by software on fault.
    pub accessed: bool,

    /// Dirty (`D`, bit 7).
    pub dirty: bool,

    /// Copy-on-write marker (bit 8, software reserved).
    pub copy_on_write: bool,

    /// Second software-reserved bit (bit 9); unused.
    pub os_reserved: bool,

    /// Physical page number (bits 10..=53).
    #[bits(44)]
    pub ppn: u64,

    #[bits(10)]
    __: u16,
}

impl PageEntryBits {
    /// Mask of the ten flag bits below the page number.
    pub const FLAG_MASK: u64 = 0x3FF;

    /// Physical page referenced by this entry.
    #[inline]
    #[must_use]
    pub const fn page(self) -> PhysicalPage {
        PhysicalPage::from_number(self.ppn())
    }

    #[inline]
    #[must_use]
    pub const fn with_page(self, page: PhysicalPage) -> Self {
        self.with_ppn(page.number())
    }

    /// Only the flag bits, with the page number cleared.
    #[inline]
    #[must_use]
    pub const fn flags_only(self) -> Self {
        Self::from_bits(self.into_bits() & Self::FLAG_MASK)
    }

    /// Any of `R`, `W` or `X` set.
    #[inline]
    #[must_use]
    pub const fn has_access(self) -> bool {
        self.readable() || self.writable() || self.executable()
    }

    #[inline]
    #[must_use]
    pub const fn user_rw() -> Self {
        Self::new()
            .with_readable(true)
            .with_writable(true)
            .with_user_access(true)
    }

    #[inline]
    #[must_use]
    pub const fn user_ro() -> Self {
        Self::new().with_readable(true).with_user_access(true)
    }

    #[inline]
    #[must_use]
    pub const fn user_rx() -> Self {
        Self::new()
            .with_readable(true)
            .with_executable(true)
            .with_user_access(true)
    }

    /// Permissions of the first user page: readable, writable and executable.
    #[inline]
    #[must_use]
    pub const fn user_rwx() -> Self {
        Self::user_rw().with_executable(true)
    }

    /// Supervisor-only data (the trap frame).
    #[inline]
    #[must_use]
    pub const fn kernel_rw() -> Self {
        Self::new().with_readable(true).with_writable(true)
    }

    /// Supervisor-only code (the trampoline).
    #[inline]
    #[must_use]
    pub const fn kernel_rx() -> Self {
        Self::new().with_readable(true).with_executable(true)
    }
}
