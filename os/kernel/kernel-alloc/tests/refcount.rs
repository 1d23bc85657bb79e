mod common;

use common::TestArena;

#[test]
fn shared_page_returns_after_the_last_reference() {
    let arena = TestArena::new();
    let mem = arena.memory_with(8);
    let page = mem.allocate_page().unwrap();
    assert_eq!(mem.ref_count(page), 1);

    let k = 3;
    for _ in 0..k {
        mem.increment(page);
    }
    assert_eq!(mem.ref_count(page), k + 1);

    for left in (0..=k).rev() {
        assert!(!mem.is_free(page));
        mem.decrement_and_maybe_free(page);
        assert_eq!(mem.ref_count(page), left);
    }
    assert!(mem.is_free(page));
    assert_eq!(mem.free_page_count(), 8);
}

#[test]
#[should_panic(expected = "underflow")]
fn one_decrement_too_many_panics() {
    let arena = TestArena::new();
    let mem = arena.memory_with(8);
    let page = mem.allocate_page().unwrap();
    mem.increment(page);
    mem.decrement_and_maybe_free(page);
    mem.decrement_and_maybe_free(page);
    mem.decrement_and_maybe_free(page);
}

#[test]
#[should_panic(expected = "has no owner")]
fn bulk_blocks_cannot_be_shared() {
    let arena = TestArena::new();
    let mem = arena.memory_with(8);
    let block = mem.allocate_pages(2).unwrap();
    mem.increment(block.base());
}

#[test]
#[should_panic(expected = "outside physical memory")]
fn increment_out_of_range_panics() {
    let arena = TestArena::new();
    let mem = arena.memory_with(8);
    mem.increment(common::pa(common::WINDOW as u64));
}

#[test]
fn concurrent_sharing_is_exact() {
    use std::sync::Arc;
    use std::thread;

    let arena = TestArena::new();
    let mem: Arc<common::TestMemory> = Arc::from(arena.memory_with(64));
    let page = mem.allocate_page().unwrap();

    let harts = 4;
    let rounds = 1000;
    let handles: Vec<_> = (0..harts)
        .map(|_| {
            let mem = Arc::clone(&mem);
            thread::spawn(move || {
                for _ in 0..rounds {
                    mem.increment(page);
                    let extra = mem.allocate_page().unwrap();
                    mem.free_page(extra);
                    mem.decrement_and_maybe_free(page);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(mem.ref_count(page), 1);
    assert_eq!(mem.free_page_count(), 63);
}
