//! Basic usage of the `scatter_allocator` crate:
//!
//! * Creating an allocator.
//! * Allocating storage that may come back in several pieces.
//! * Constructing and destroying elements in that storage.
//! * Returning storage and watching it get reused.

use new_zealand::nz;
use scatter_allocator::{ScatterAllocator, Span};

fn main() {
    let mut allocator = ScatterAllocator::<String>::builder()
        .min_pool_size(nz!(16))
        .build();

    // A fresh allocator creates one pool that fits the request.
    let mut names: Vec<Span<String>> = Vec::new();
    allocator.allocate(10, |span| names.push(span));
    println!("First request arrived in {} span(s)", names.len());

    for span in &names {
        // SAFETY: The storage was just allocated and nothing else refers to it.
        unsafe { span.write_with(|index| format!("name #{index}")) };
    }

    // SAFETY: Every slot was initialized above.
    let first = unsafe { names[0].as_slice() };
    println!("Stored: {first:?}");

    // Destroy a couple of elements and give their storage back.
    let returned = names[0].subspan(2, 2);
    // SAFETY: These slots hold initialized values and nothing else refers to them.
    unsafe { returned.drop_in_place() };
    allocator.deallocate(returned);

    let returned = names[0].subspan(4, 2);
    // SAFETY: These slots hold initialized values and nothing else refers to them.
    unsafe { returned.drop_in_place() };
    allocator.deallocate(returned);

    println!(
        "Allocator holds {} elements in {} pool(s) with {} hole(s)",
        allocator.len(),
        allocator.pool_count(),
        allocator.hole_count()
    );

    // The next request is scattered: both holes, the rest of the first pool, a new pool.
    allocator.allocate(20, |span| {
        println!("Got a span of {} elements from pool storage at {:p}", span.len(), span.as_ptr());
    });

    println!(
        "Allocator now holds {} elements in {} pool(s) with a capacity of {}",
        allocator.len(),
        allocator.pool_count(),
        allocator.capacity()
    );

    // The remaining names still need to be destroyed before the program ends.
    // SAFETY: These slots were initialized above and not yet destroyed.
    unsafe {
        names[0].subspan(0, 2).drop_in_place();
        names[0].subspan(6, 4).drop_in_place();
    }
}
