//! Process-level helpers: the trampoline/trap-frame layout, heap growth and
//! copies between kernel buffers and user memory.

use super::AddressSpace;
use crate::info::{MAX_VA, PAGE_SIZE, TRAMPOLINE, TRAPFRAME};
use crate::{FrameAlloc, PageEntryBits, PhysMapper, VmError};
use kernel_memory_addresses::{PhysicalPage, VirtualAddress, page_round_down, page_round_up};

#[allow(clippy::cast_possible_truncation)]
const PAGE_BYTES: usize = PAGE_SIZE as usize;

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// Create a user address space with the trampoline and trap frame mapped.
    ///
    /// The trampoline page is shared by every process and mapped `R|X`;
    /// `trapframe` belongs to the process and is mapped `R|W`. Neither is
    /// user accessible.
    ///
    /// # Errors
    /// [`VmError::OutOfMemory`] if the root or a table cannot be allocated.
    pub fn new_user<A: FrameAlloc>(
        mapper: &'m M,
        alloc: &A,
        trampoline: PhysicalPage,
        trapframe: PhysicalPage,
    ) -> Result<Self, VmError> {
        let mut space = Self::create(mapper, alloc).ok_or(VmError::OutOfMemory)?;

        if let Err(e) = space.map_range(
            alloc,
            VirtualAddress::new(TRAMPOLINE),
            PAGE_SIZE,
            trampoline.base(),
            PageEntryBits::kernel_rx(),
        ) {
            space.destroy(alloc, 0);
            return Err(e);
        }

        if let Err(e) = space.map_range(
            alloc,
            VirtualAddress::new(TRAPFRAME),
            PAGE_SIZE,
            trapframe.base(),
            PageEntryBits::kernel_rw(),
        ) {
            space.unmap_range(alloc, VirtualAddress::new(TRAMPOLINE), 1, false);
            space.destroy(alloc, 0);
            return Err(e);
        }

        Ok(space)
    }

    /// Tear down a space made by [`new_user`](Self::new_user).
    ///
    /// The trampoline and trap-frame pages are unmapped without being
    /// released; the caller owns them.
    pub fn destroy_user<A: FrameAlloc>(mut self, alloc: &A, size: u64) {
        self.unmap_range(alloc, VirtualAddress::new(TRAMPOLINE), 1, false);
        self.unmap_range(alloc, VirtualAddress::new(TRAPFRAME), 1, false);
        self.destroy(alloc, size);
    }

    /// Grow the user image from `old_size` to `new_size` bytes with fresh
    /// zeroed pages. `R` and `U` are always added to `perm`.
    ///
    /// Returns the new size; shrinking requests leave the image unchanged.
    ///
    /// # Errors
    /// [`VmError::OutOfMemory`], after every page added by this call was
    /// released again.
    pub fn grow<A: FrameAlloc>(
        &mut self,
        alloc: &A,
        old_size: u64,
        new_size: u64,
        perm: PageEntryBits,
    ) -> Result<u64, VmError> {
        if new_size < old_size {
            return Ok(old_size);
        }
        if new_size > TRAPFRAME {
            return Err(VmError::OutOfRange(VirtualAddress::new(new_size)));
        }

        let perm = perm.with_readable(true).with_user_access(true);
        let mut at = page_round_up(old_size);
        while at < new_size {
            let Some(page) = alloc.alloc_4k() else {
                self.shrink(alloc, at, old_size);
                return Err(VmError::OutOfMemory);
            };
            if let Err(e) =
                self.map_range(alloc, VirtualAddress::new(at), PAGE_SIZE, page.base(), perm)
            {
                alloc.release_4k(page);
                self.shrink(alloc, at, old_size);
                return Err(e);
            }
            at += PAGE_SIZE;
        }
        Ok(new_size)
    }

    /// Shrink the user image from `old_size` to `new_size` bytes, releasing
    /// whole pages that fall out of it. Returns the new size.
    pub fn shrink<A: FrameAlloc>(&mut self, alloc: &A, old_size: u64, new_size: u64) -> u64 {
        if new_size >= old_size {
            return old_size;
        }

        let keep = page_round_up(new_size);
        let had = page_round_up(old_size);
        if keep < had {
            self.unmap_range(
                alloc,
                VirtualAddress::new(keep),
                (had - keep) / PAGE_SIZE,
                true,
            );
        }
        new_size
    }

    /// Place the first process image at virtual address zero.
    ///
    /// # Errors
    /// [`VmError::OutOfMemory`] if the page or its tables cannot be allocated.
    ///
    /// # Panics
    /// If the image does not fit in one page.
    pub fn load_initial_image<A: FrameAlloc>(&mut self, alloc: &A, image: &[u8]) -> Result<(), VmError> {
        assert!(
            image.len() < PAGE_BYTES,
            "load_initial_image: {} bytes do not fit in one page",
            image.len()
        );

        let page = alloc.alloc_4k().ok_or(VmError::OutOfMemory)?;
        if let Err(e) = self.map_range(
            alloc,
            VirtualAddress::zero(),
            PAGE_SIZE,
            page.base(),
            PageEntryBits::user_rwx(),
        ) {
            alloc.release_4k(page);
            return Err(e);
        }

        // SAFETY: the page was just allocated and is only mapped here.
        let bytes = unsafe { self.mapper.page_bytes(page) };
        bytes[..image.len()].copy_from_slice(image);
        Ok(())
    }

    /// Remove user access from the page at `va`; used for the stack guard.
    ///
    /// # Panics
    /// If `va` is not mapped.
    pub fn clear_user_access(&mut self, va: VirtualAddress) {
        let Some(slot) = self.walk(va).filter(|slot| slot.is_leaf()) else {
            panic!("clear_user_access: {va} not mapped");
        };
        *slot = slot.with_flags(slot.flags().with_user_access(false));
        crate::tlb::flush_page(va);
    }

    /// Copy `src` into user memory at `dst`.
    ///
    /// Copy-on-write pages in the destination are made private first.
    ///
    /// # Errors
    /// - [`VmError::OutOfRange`], [`VmError::NotMapped`] or
    ///   [`VmError::NotUserAccessible`] for a bad destination page.
    /// - [`VmError::NotWritable`] for a read-only page that is not COW.
    /// - [`VmError::OutOfMemory`] if a COW copy cannot be made.
    ///
    /// Bytes before the failing page have already been written.
    pub fn copy_out<A: FrameAlloc>(&mut self, alloc: &A, dst: VirtualAddress, src: &[u8]) -> Result<(), VmError> {
        let mut at = dst.as_u64();
        let mut rest = src;
        while !rest.is_empty() {
            let base = VirtualAddress::new(page_round_down(at));
            if base.as_u64() >= MAX_VA {
                return Err(VmError::OutOfRange(base));
            }

            let entry = match self.walk(base) {
                Some(slot) if slot.is_leaf() => *slot,
                _ => return Err(VmError::NotMapped(base)),
            };
            if !entry.is_user() {
                return Err(VmError::NotUserAccessible(base));
            }
            if entry.is_cow() {
                self.cow_alloc(alloc, base)?;
            } else if !entry.is_writable() {
                return Err(VmError::NotWritable(base));
            }

            let Some(pa) = self.translate(base) else {
                return Err(VmError::NotMapped(base));
            };
            let off = usize::try_from(at - base.as_u64()).unwrap_or(0);
            let n = (PAGE_BYTES - off).min(rest.len());

            // SAFETY: the destination page is mapped writable in this space only.
            let page = unsafe { self.mapper.page_bytes(pa.page()) };
            page[off..off + n].copy_from_slice(&rest[..n]);

            rest = &rest[n..];
            at = base.as_u64() + PAGE_SIZE;
        }
        Ok(())
    }

    /// Fill `dst` from user memory at `src`.
    ///
    /// # Errors
    /// [`VmError::NotMapped`] for a source page that is not mapped for user
    /// access or lies outside the user range.
    pub fn copy_in(&self, dst: &mut [u8], src: VirtualAddress) -> Result<(), VmError> {
        let mut at = src.as_u64();
        let mut filled = 0;
        while filled < dst.len() {
            let (chunk, next) = self.user_chunk(at)?;
            let n = chunk.len().min(dst.len() - filled);
            dst[filled..filled + n].copy_from_slice(&chunk[..n]);
            filled += n;
            at = next;
        }
        Ok(())
    }

    /// Copy a NUL-terminated string from user memory at `src` into `dst`,
    /// terminator included. Returns the string length without the terminator.
    ///
    /// # Errors
    /// - [`VmError::NotMapped`] as for [`copy_in`](Self::copy_in).
    /// - [`VmError::StringTooLong`] if no terminator fits in `dst`.
    pub fn copy_in_str(&self, dst: &mut [u8], src: VirtualAddress) -> Result<usize, VmError> {
        let mut at = src.as_u64();
        let mut filled = 0;
        while filled < dst.len() {
            let (chunk, next) = self.user_chunk(at)?;
            for &byte in chunk {
                if filled == dst.len() {
                    break;
                }
                dst[filled] = byte;
                if byte == 0 {
                    return Ok(filled);
                }
                filled += 1;
            }
            at = next;
        }
        Err(VmError::StringTooLong(dst.len()))
    }

    /// The user-readable bytes from `at` to the end of its page, and the
    /// address of the following page.
    fn user_chunk(&self, at: u64) -> Result<(&[u8], u64), VmError> {
        let base = page_round_down(at);
        let va = VirtualAddress::new(at);
        let Some(pa) = self.translate(va) else {
            return Err(VmError::NotMapped(VirtualAddress::new(base)));
        };
        // SAFETY: mapped user page; only read while `self` is borrowed.
        let page: &[u8; PAGE_BYTES] = unsafe { self.mapper.page_bytes(pa.page()) };
        let off = usize::try_from(pa.page_offset()).unwrap_or(0);
        Ok((&page[off..], base + PAGE_SIZE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestAlloc, TestPhys};

    fn va(v: u64) -> VirtualAddress {
        VirtualAddress::new(v)
    }

    fn user_space<'p>(phys: &'p TestPhys, alloc: &TestAlloc<'p>) -> AddressSpace<'p, TestPhys> {
        let trampoline = alloc.alloc_4k().unwrap();
        let trapframe = alloc.alloc_4k().unwrap();
        AddressSpace::new_user(phys, alloc, trampoline, trapframe).unwrap()
    }

    #[test]
    fn new_user_maps_trampoline_and_trapframe_for_the_kernel_only() {
        let phys = TestPhys::with_frames(32);
        let alloc = TestAlloc::new(&phys);
        let space = user_space(&phys, &alloc);

        assert!(space.translate_kernel(va(TRAMPOLINE)).is_some());
        assert!(space.translate_kernel(va(TRAPFRAME)).is_some());
        assert!(space.translate(va(TRAMPOLINE)).is_none());
        assert!(space.translate(va(TRAPFRAME)).is_none());
    }

    #[test]
    fn destroy_user_keeps_shared_pages() {
        let phys = TestPhys::with_frames(32);
        let alloc = TestAlloc::new(&phys);
        let trampoline = alloc.alloc_4k().unwrap();
        let trapframe = alloc.alloc_4k().unwrap();
        let mut space = AddressSpace::new_user(&phys, &alloc, trampoline, trapframe).unwrap();
        space.grow(&alloc, 0, 3 * PAGE_SIZE, PageEntryBits::user_rw()).unwrap();

        space.destroy_user(&alloc, 3 * PAGE_SIZE);
        assert_eq!(alloc.live(), 2);
        assert_eq!(alloc.refs(trampoline), 1);
        assert_eq!(alloc.refs(trapframe), 1);
    }

    #[test]
    fn grow_and_shrink() {
        let phys = TestPhys::with_frames(32);
        let alloc = TestAlloc::new(&phys);
        let mut space = user_space(&phys, &alloc);

        assert_eq!(space.grow(&alloc, 0, 0x2800, PageEntryBits::user_rw()), Ok(0x2800));
        assert!(space.translate(va(0x2000)).is_some());
        assert!(space.translate(va(0x3000)).is_none());

        // growing within the last page maps nothing new
        let live = alloc.live();
        assert_eq!(space.grow(&alloc, 0x2800, 0x2900, PageEntryBits::user_rw()), Ok(0x2900));
        assert_eq!(alloc.live(), live);

        assert_eq!(space.shrink(&alloc, 0x2900, 0x1000), 0x1000);
        assert!(space.translate(va(0x0)).is_some());
        assert!(space.translate(va(0x1000)).is_none());
        assert_eq!(alloc.live(), live - 2);

        assert_eq!(space.shrink(&alloc, 0x1000, 0x2000), 0x1000);
    }

    #[test]
    fn failed_grow_rolls_back() {
        // trampoline, trap frame, root and the two tables above them leave
        // room for two heap tables and three heap pages
        let phys = TestPhys::with_frames(10);
        let alloc = TestAlloc::new(&phys);
        let mut space = user_space(&phys, &alloc);
        let live = alloc.live();

        assert_eq!(
            space.grow(&alloc, 0, 4 * PAGE_SIZE, PageEntryBits::user_rw()),
            Err(VmError::OutOfMemory)
        );
        assert_eq!(alloc.live(), live + 2);
        assert!(space.translate(va(0)).is_none());
    }

    #[test]
    fn initial_image_is_executable_user_memory() {
        let phys = TestPhys::with_frames(32);
        let alloc = TestAlloc::new(&phys);
        let mut space = user_space(&phys, &alloc);
        space.load_initial_image(&alloc, &[0x13, 0x05, 0x00, 0x00]).unwrap();

        let entry = *space.walk(va(0)).unwrap();
        assert!(entry.flags().executable() && entry.is_writable() && entry.is_user());

        let mut buf = [0u8; 4];
        space.copy_in(&mut buf, va(0)).unwrap();
        assert_eq!(buf, [0x13, 0x05, 0x00, 0x00]);
    }

    #[test]
    #[should_panic(expected = "do not fit in one page")]
    fn oversized_initial_image_panics() {
        let phys = TestPhys::with_frames(32);
        let alloc = TestAlloc::new(&phys);
        let mut space = user_space(&phys, &alloc);
        let image = vec![0u8; PAGE_BYTES];
        let _ = space.load_initial_image(&alloc, &image);
    }

    #[test]
    fn guard_page_is_hidden_from_user_mode() {
        let phys = TestPhys::with_frames(32);
        let alloc = TestAlloc::new(&phys);
        let mut space = user_space(&phys, &alloc);
        space.grow(&alloc, 0, 2 * PAGE_SIZE, PageEntryBits::user_rw()).unwrap();

        space.clear_user_access(va(0));
        assert!(space.translate(va(0)).is_none());
        assert!(space.translate_kernel(va(0)).is_some());
        assert_eq!(
            space.copy_out(&alloc, va(0xff8), &[1; 16]),
            Err(VmError::NotUserAccessible(va(0)))
        );
    }

    #[test]
    fn copy_out_and_in_across_a_page_boundary() {
        let phys = TestPhys::with_frames(32);
        let alloc = TestAlloc::new(&phys);
        let mut space = user_space(&phys, &alloc);
        space.grow(&alloc, 0, 2 * PAGE_SIZE, PageEntryBits::user_rw()).unwrap();

        let data: Vec<u8> = (0..32).collect();
        space.copy_out(&alloc, va(0xff0), &data).unwrap();

        let mut back = [0u8; 32];
        space.copy_in(&mut back, va(0xff0)).unwrap();
        assert_eq!(&back[..], &data[..]);

        assert_eq!(
            space.copy_in(&mut back, va(0x1ff0)),
            Err(VmError::NotMapped(va(0x2000)))
        );
    }

    #[test]
    fn copy_out_respects_read_only_pages() {
        let phys = TestPhys::with_frames(32);
        let alloc = TestAlloc::new(&phys);
        let mut space = user_space(&phys, &alloc);
        space.grow(&alloc, 0, PAGE_SIZE, PageEntryBits::user_ro()).unwrap();

        assert_eq!(
            space.copy_out(&alloc, va(8), b"x"),
            Err(VmError::NotWritable(va(0)))
        );
        assert_eq!(
            space.copy_out(&alloc, va(MAX_VA), b"x"),
            Err(VmError::OutOfRange(va(MAX_VA)))
        );
    }

    #[test]
    fn copy_out_breaks_cow_sharing() {
        let phys = TestPhys::with_frames(64);
        let alloc = TestAlloc::new(&phys);
        let mut parent = user_space(&phys, &alloc);
        let mut child = user_space(&phys, &alloc);
        parent.grow(&alloc, 0, PAGE_SIZE, PageEntryBits::user_rw()).unwrap();
        parent.copy_out(&alloc, va(0), b"parent").unwrap();
        parent.duplicate(&mut child, &alloc, PAGE_SIZE).unwrap();

        child.copy_out(&alloc, va(0), b"child!").unwrap();

        let mut seen = [0u8; 6];
        parent.copy_in(&mut seen, va(0)).unwrap();
        assert_eq!(&seen, b"parent");
        child.copy_in(&mut seen, va(0)).unwrap();
        assert_eq!(&seen, b"child!");
        assert!(child.walk(va(0)).unwrap().is_writable());
    }

    #[test]
    fn copy_in_str_stops_at_terminator() {
        let phys = TestPhys::with_frames(32);
        let alloc = TestAlloc::new(&phys);
        let mut space = user_space(&phys, &alloc);
        space.grow(&alloc, 0, 2 * PAGE_SIZE, PageEntryBits::user_rw()).unwrap();
        space.copy_out(&alloc, va(0xffc), b"init\0").unwrap();

        let mut buf = [0xffu8; 16];
        assert_eq!(space.copy_in_str(&mut buf, va(0xffc)), Ok(4));
        assert_eq!(&buf[..5], b"init\0");

        let mut small = [0u8; 3];
        assert_eq!(
            space.copy_in_str(&mut small, va(0xffc)),
            Err(VmError::StringTooLong(3))
        );
    }
}
