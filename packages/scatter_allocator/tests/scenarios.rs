//! Integration tests for the `scatter_allocator` package.
//!
//! These exercise the public contract end to end: request fulfillment order, reuse of
//! deallocated storage without coalescing, growth and the storage/object lifetime split.

use std::cell::Cell;
use std::rc::Rc;

use new_zealand::nz;
use scatter_allocator::{ScatterAllocator, Span};

#[test]
fn allocates_requested_total() {
    const ELEMENTS: usize = 123;

    let mut allocator = ScatterAllocator::<i32>::new();

    let mut total = 0;
    allocator.allocate(ELEMENTS, |span| total += span.len());

    assert_eq!(total, ELEMENTS);
}

#[test]
fn frees_subspan() {
    let mut allocator = ScatterAllocator::<i32>::new();

    let mut allocated: Option<Span<i32>> = None;
    allocator.allocate(10, |span| {
        assert!(allocated.is_none(), "expected a single span");
        allocated = Some(span);
    });

    let subspan = allocated.unwrap().subspan(3, 4);
    allocator.deallocate(subspan);

    assert_eq!(allocator.len(), 6);
    assert_eq!(allocator.hole_count(), 1);
}

#[test]
fn scatters_across_holes_tail_and_new_pool() {
    let mut allocator = ScatterAllocator::<i32>::builder()
        .min_pool_size(nz!(16))
        .build();

    let mut allocated: Option<Span<i32>> = None;
    allocator.allocate(10, |span| {
        assert!(allocated.is_none(), "expected a single span");
        allocated = Some(span);
    });
    let allocated = allocated.unwrap();

    allocator.deallocate(allocated.subspan(2, 2));
    allocator.deallocate(allocated.subspan(4, 2));

    // Fills in the two holes (2 + 2), the rest of the first pool (6)
    // and the remainder from a new second pool (10).
    let mut sizes = Vec::new();
    allocator.allocate(20, |span| sizes.push(span.len()));

    assert_eq!(sizes, [2, 2, 6, 10]);
    assert_eq!(allocator.pool_count(), 2);
}

#[test]
fn works_with_construction_and_destruction() {
    struct Tracked {
        live: Rc<Cell<usize>>,
    }

    impl Tracked {
        fn new(live: &Rc<Cell<usize>>) -> Self {
            live.set(live.get() + 1);
            Self {
                live: Rc::clone(live),
            }
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.live.set(self.live.get() - 1);
        }
    }

    let live = Rc::new(Cell::new(0));
    let mut allocator = ScatterAllocator::<Tracked>::new();

    let mut spans = Vec::new();
    allocator.allocate(16, |span| spans.push(span));

    {
        // Whatever happens while the elements exist, they get destroyed on the way out.
        let spans = scopeguard::guard(&spans, |spans| {
            for span in spans {
                // SAFETY: Every slot was initialized below and nothing references it any more.
                unsafe { span.drop_in_place() };
            }
        });

        for span in spans.iter() {
            // SAFETY: The span was just allocated and nothing else refers to its storage.
            unsafe { span.write_with(|_| Tracked::new(&live)) };
        }

        assert_eq!(live.get(), 16);
    }

    assert_eq!(live.get(), 0);

    for span in spans {
        allocator.deallocate(span);
    }

    assert!(allocator.is_empty());
    assert_eq!(allocator.free_len(), allocator.capacity());
}

#[test]
fn single_allocations_share_one_pool() {
    let mut allocator = ScatterAllocator::<u64>::builder()
        .min_pool_size(nz!(32))
        .build();

    let spans: Vec<_> = (0..17).map(|_| allocator.allocate_one()).collect();

    assert!(spans.iter().all(|span| span.len() == 1));
    assert_eq!(allocator.pool_count(), 1);
}

#[test]
fn default_pool_size_fits_many_single_allocations() {
    let mut allocator = ScatterAllocator::<u64>::new();

    for _ in 0..17 {
        _ = allocator.allocate_one();
    }

    assert_eq!(allocator.pool_count(), 1);
}

#[test]
fn freed_storage_is_reused_before_growing() {
    let mut allocator = ScatterAllocator::<u16>::builder()
        .min_pool_size(nz!(8))
        .build();

    let mut spans = Vec::new();
    allocator.allocate(8, |span| spans.push(span));
    assert_eq!(allocator.free_len(), 0);

    let whole = spans[0];
    allocator.deallocate(whole.subspan(6, 2));
    allocator.deallocate(whole.subspan(0, 3));

    let mut reused = Vec::new();
    allocator.allocate(5, |span| reused.push(span));

    // Oldest hole first, no new pool.
    assert_eq!(reused, [whole.subspan(6, 2), whole.subspan(0, 3)]);
    assert_eq!(allocator.pool_count(), 1);
}

#[test]
fn adjacent_holes_are_delivered_separately() {
    let mut allocator = ScatterAllocator::<u16>::builder()
        .min_pool_size(nz!(8))
        .build();

    let whole = allocator.allocate_iter(8).next().unwrap();

    let (left, right) = whole.subspan(2, 4).split_at(2);
    allocator.deallocate(left);
    allocator.deallocate(right);

    let lengths: Vec<usize> = allocator.allocate_iter(4).map(|span| span.len()).collect();

    assert_eq!(lengths, [2, 2]);
}

#[test]
fn iterator_and_callback_agree() {
    fn build() -> ScatterAllocator<u32> {
        let mut allocator = ScatterAllocator::<u32>::builder()
            .min_pool_size(nz!(10))
            .build();

        let first = allocator.allocate_iter(7).next().unwrap();
        allocator.deallocate(first.subspan(1, 1));
        allocator.deallocate(first.subspan(3, 2));
        allocator
    }

    let mut by_callback = build();
    let mut via_callback = Vec::new();
    by_callback.allocate(30, |span| via_callback.push(span.len()));

    let mut by_iterator = build();
    let via_iterator: Vec<usize> = by_iterator.allocate_iter(30).map(|span| span.len()).collect();

    assert_eq!(via_callback, [1, 2, 3, 24]);
    assert_eq!(via_callback, via_iterator);
}

#[test]
fn totals_always_match_request() {
    let mut allocator = ScatterAllocator::<u8>::builder()
        .min_pool_size(nz!(5))
        .build();

    let mut live = Vec::new();

    for count in 0..40 {
        let mut total = 0;
        allocator.allocate(count, |span| {
            total += span.len();
            live.push(span);
        });
        assert_eq!(total, count);

        // Return every other span to keep a healthy supply of holes around.
        if count % 2 == 0 {
            for span in live.drain(..).step_by(2) {
                allocator.deallocate(span);
            }
        }
    }

    assert_eq!(allocator.len() + allocator.free_len(), allocator.capacity());
}
