//! Host-memory stand-ins for physical RAM and the page allocator.

use crate::{FrameAlloc, PhysMapper};
use core::cell::{RefCell, UnsafeCell};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};
use std::collections::BTreeMap;

/// Base address of the simulated RAM.
pub const RAM_BASE: u64 = 0x8000_0000;

/// A 4 KiB-aligned raw frame.
#[repr(C, align(4096))]
struct Aligned4K(#[allow(dead_code)] [u8; 4096]);

/// Simulated physical memory: `n` frames starting at [`RAM_BASE`].
pub struct TestPhys {
    frames: Vec<UnsafeCell<Aligned4K>>,
}

impl TestPhys {
    pub fn with_frames(n: usize) -> Self {
        let mut v = Vec::with_capacity(n);
        for _ in 0..n {
            v.push(UnsafeCell::new(Aligned4K([0u8; 4096])));
        }
        Self { frames: v }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    fn frame_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        let idx = usize::try_from((pa.as_u64() - RAM_BASE) >> 12).unwrap();
        self.frames[idx].get().cast::<u8>()
    }
}

impl PhysMapper for TestPhys {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let off = usize::try_from(pa.page_offset()).unwrap();
        // SAFETY: the caller promises `T` matches the bytes in the frame.
        unsafe { &mut *self.frame_ptr(pa).add(off).cast::<T>() }
    }
}

/// Page allocator over a [`TestPhys`] that tracks reference counts.
pub struct TestAlloc<'p> {
    phys: &'p TestPhys,
    state: RefCell<State>,
}

#[derive(Default)]
struct State {
    next: usize,
    free: Vec<PhysicalPage>,
    refs: BTreeMap<u64, u32>,
}

impl<'p> TestAlloc<'p> {
    pub fn new(phys: &'p TestPhys) -> Self {
        Self {
            phys,
            state: RefCell::new(State::default()),
        }
    }

    /// Number of pages currently holding at least one reference.
    pub fn live(&self) -> usize {
        self.state.borrow().refs.len()
    }

    pub fn refs(&self, page: PhysicalPage) -> u32 {
        self.state
            .borrow()
            .refs
            .get(&page.number())
            .copied()
            .unwrap_or(0)
    }
}

impl FrameAlloc for TestAlloc<'_> {
    fn alloc_4k(&self) -> Option<PhysicalPage> {
        let mut st = self.state.borrow_mut();
        let page = if let Some(p) = st.free.pop() {
            p
        } else if st.next < self.phys.len() {
            st.next += 1;
            PhysicalPage::from_addr(PhysicalAddress::new(
                RAM_BASE + (st.next as u64 - 1) * 4096,
            ))
        } else {
            return None;
        };
        let bytes = unsafe { self.phys.page_bytes(page) };
        bytes.fill(0);
        st.refs.insert(page.number(), 1);
        Some(page)
    }

    fn share_4k(&self, page: PhysicalPage) {
        let mut st = self.state.borrow_mut();
        let count = st.refs.get_mut(&page.number()).expect("share of a free page");
        *count += 1;
    }

    fn release_4k(&self, page: PhysicalPage) {
        let mut st = self.state.borrow_mut();
        let count = st
            .refs
            .get_mut(&page.number())
            .expect("release of a free page");
        *count -= 1;
        if *count == 0 {
            st.refs.remove(&page.number());
            st.free.push(page);
        }
    }
}
